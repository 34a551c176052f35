/// 迷霧註冊表
///
/// 管理產生視野的觀測者與消費視野的可剔除物件。
/// 註冊順序即遍歷順序，重複註冊同一物件會被去重，
/// 對不存在的代號操作一律是無操作
use std::cell::RefCell;
use std::rc::Rc;
use vek::Vec2;

/// 產生視野的能力：提供目前位置與視野半徑
pub trait FogObserver {
    fn position(&self) -> Vec2<f32>;
    fn sight_radius(&self) -> f32;
}

/// 被迷霧控制顯示/隱藏狀態的能力
pub trait FogCullable {
    fn position(&self) -> Vec2<f32>;
    fn bounds(&self) -> CullBounds;
    /// 可見狀態轉換時呼叫，每次轉換恰好一次
    fn on_visibility_changed(&mut self, _visible: bool) {}
    /// 每幀套用本幀可見狀態，無論是否發生轉換
    fn apply_visible(&mut self, _visible: bool) {}
}

pub type ObserverHandle = Rc<RefCell<dyn FogObserver>>;
pub type CullableHandle = Rc<RefCell<dyn FogCullable>>;

/// 觀測者代號，單一註冊表內不重複使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

/// 可剔除物件代號
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CullableId(pub u64);

/// 相對於物件位置的軸對齊碰撞範圍
#[derive(Debug, Clone, Copy)]
pub struct CullBounds {
    pub min: Vec2<f32>,
    pub max: Vec2<f32>,
}

impl CullBounds {
    pub fn new(min: Vec2<f32>, max: Vec2<f32>) -> Self {
        Self { min, max }
    }

    /// 以中心對稱的半長寬建立範圍
    pub fn from_half_extents(half: Vec2<f32>) -> Self {
        Self { min: -half, max: half }
    }

    /// 平移到 position 後是否與圓形重疊（取圓心到範圍的最近點判距離）
    pub fn overlaps_circle(&self, position: Vec2<f32>, center: Vec2<f32>, radius: f32) -> bool {
        let min = self.min + position;
        let max = self.max + position;
        let closest = Vec2::new(center.x.clamp(min.x, max.x), center.y.clamp(min.y, max.y));
        center.distance(closest) <= radius
    }
}

/// 固定位置的觀測者，供限時視野、展示程式與測試使用
#[derive(Debug, Clone)]
pub struct PointViewer {
    pub position: Vec2<f32>,
    pub sight_radius: f32,
}

impl PointViewer {
    pub fn new(position: Vec2<f32>, sight_radius: f32) -> Self {
        Self {
            position,
            sight_radius,
        }
    }
}

impl FogObserver for PointViewer {
    fn position(&self) -> Vec2<f32> {
        self.position
    }

    fn sight_radius(&self) -> f32 {
        self.sight_radius
    }
}

/// 註冊表內的觀測者項目
pub struct ViewerEntry {
    pub id: ViewerId,
    pub object: ObserverHandle,
    /// 上一幀的位置，歷史標記用；移除時以此位置寫入最後足跡
    pub last_position: Vec2<f32>,
}

/// 觀測者註冊表，維持註冊順序
pub struct ViewerRegistry {
    entries: Vec<ViewerEntry>,
    next_id: u64,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// 預先配發代號，實際加入延後到幀邊界
    pub fn reserve_id(&mut self) -> ViewerId {
        let id = ViewerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// 加入觀測者；同一物件重複註冊會被忽略並回傳 false
    pub fn insert(&mut self, id: ViewerId, object: ObserverHandle) -> bool {
        if self.entries.iter().any(|e| Rc::ptr_eq(&e.object, &object)) {
            log::warn!("觀測者重複註冊被忽略: {:?}", id);
            return false;
        }
        let last_position = object.borrow().position();
        self.entries.push(ViewerEntry {
            id,
            object,
            last_position,
        });
        true
    }

    /// 依代號移除並交還項目；不存在時回傳 None（無操作）
    pub fn remove(&mut self, id: ViewerId) -> Option<ViewerEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, id: ViewerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn entries(&self) -> &[ViewerEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ViewerEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 單一可剔除物件的本幀狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullState {
    /// 本幀是否可見
    pub visible: bool,
    /// 是否曾被看見（單調，一旦為真不再重設）
    pub ever_seen: bool,
    /// 上一個完成的幀是否發生了可見狀態轉換
    pub changed: bool,
}

/// 註冊表內的可剔除物件項目。
/// 可見狀態保存在項目本身而不是物件上，
/// 遍歷測試時不需要可變借用被註冊的物件
pub struct CullableEntry {
    pub id: CullableId,
    pub object: CullableHandle,
    pub visible: bool,
    pub was_visible: bool,
    pub ever_seen: bool,
}

/// 可剔除物件註冊表，維持註冊順序
pub struct CullableRegistry {
    entries: Vec<CullableEntry>,
    next_id: u64,
}

impl CullableRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn reserve_id(&mut self) -> CullableId {
        let id = CullableId(self.next_id);
        self.next_id += 1;
        id
    }

    /// 加入可剔除物件，初始為隱藏且未曾被看見；
    /// 重複註冊同一物件會被忽略並回傳 false
    pub fn insert(&mut self, id: CullableId, object: CullableHandle) -> bool {
        if self.entries.iter().any(|e| Rc::ptr_eq(&e.object, &object)) {
            log::warn!("可剔除物件重複註冊被忽略: {:?}", id);
            return false;
        }
        self.entries.push(CullableEntry {
            id,
            object,
            visible: false,
            was_visible: false,
            ever_seen: false,
        });
        true
    }

    pub fn remove(&mut self, id: CullableId) -> Option<CullableEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, id: CullableId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// 查詢單一物件的本幀狀態
    pub fn state(&self, id: CullableId) -> Option<CullState> {
        self.entries.iter().find(|e| e.id == id).map(|e| CullState {
            visible: e.visible,
            ever_seen: e.ever_seen,
            changed: e.visible != e.was_visible,
        })
    }

    pub fn entries(&self) -> &[CullableEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [CullableEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
