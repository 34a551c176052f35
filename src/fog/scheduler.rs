/// 迷霧排程器
///
/// 每場對戰持有一個 FogOfWar 實例，驅動兩遍式逐幀更新：
/// 第一遍用上一幀位置寫入探索歷史，第二遍計算即時視野並
/// 測試可剔除物件的重疊。註冊表的增刪一律排入佇列，
/// 在下一個幀邊界一次套用，更新過程中不會交錯發生
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cell::RefCell;
use std::rc::Rc;
use vek::Vec2;

use crate::config::FogSettings;
use crate::fog::grid::{FogBounds, FogGrid, FogSnapshot};
use crate::fog::registry::{
    CullState, CullableHandle, CullableId, CullableRegistry, ObserverHandle, PointViewer,
    ViewerId, ViewerRegistry,
};

/// 視野半徑與柔化視覺邊緣的調和倍數
pub const RENDER_RANGE_SCALE: f32 = 1.125;

/// 跨執行緒邊界的迷霧指令，由遊戲邏輯或伺服器端產生，
/// 緩衝到下一個幀邊界才被處理
#[derive(Debug, Clone, Copy)]
pub enum FogCommand {
    /// 一次性揭露，不留下持續的觀測者
    RevealOnce { position: Vec2<f32>, radius: f32 },
    /// 建立限時觀測者
    RevealTimed {
        position: Vec2<f32>,
        radius: f32,
        duration: f32,
    },
    /// 啟用或停用迷霧更新
    SetActive(bool),
    /// 重設全部探索歷史
    Clear,
}

/// 延後到幀邊界的註冊表編輯
enum PendingEdit {
    AddViewer { id: ViewerId, object: ObserverHandle },
    RemoveViewer(ViewerId),
    AddCullable { id: CullableId, object: CullableHandle },
    RemoveCullable(CullableId),
}

/// 限時觀測者的倒數項目，使用幀時鐘而非獨立計時器
struct TimedEntry {
    id: ViewerId,
    remaining: f32,
}

/// 戰爭迷霧子系統，每場對戰一個實例
pub struct FogOfWar {
    grid: FogGrid,
    viewers: ViewerRegistry,
    cullables: CullableRegistry,
    pending: Vec<PendingEdit>,
    timed: Vec<TimedEntry>,
    active: bool,
    /// 已完成的幀數，快照以此標記有效性
    frame: u64,
    active_listeners: Vec<Box<dyn FnMut(bool)>>,
    settings: FogSettings,
    cmd_tx: Sender<FogCommand>,
    cmd_rx: Receiver<FogCommand>,
}

impl FogOfWar {
    pub fn new(bounds: FogBounds, settings: &FogSettings) -> Self {
        let (cmd_tx, cmd_rx) = unbounded();
        Self {
            grid: FogGrid::new(bounds, settings),
            viewers: ViewerRegistry::new(),
            cullables: CullableRegistry::new(),
            pending: Vec::new(),
            timed: Vec::new(),
            active: true,
            frame: 0,
            active_listeners: Vec::new(),
            settings: settings.clone(),
            cmd_tx,
            cmd_rx,
        }
    }

    /// 世界範圍改變時重建網格。全部探索歷史會被捨棄，
    /// 這是預期行為而非錯誤；註冊表維持不變
    pub fn reinitialize(&mut self, bounds: FogBounds) {
        log::info!("迷霧網格重建，探索歷史已捨棄");
        self.grid = FogGrid::new(bounds, &self.settings);
    }

    // ------------------------------------------------------------------
    // 註冊介面：代號立即配發，實際增刪延後到下一個幀邊界
    // ------------------------------------------------------------------

    /// 註冊一個觀測者物件，每幀讀取其位置與視野半徑
    pub fn register_viewer(&mut self, object: ObserverHandle) -> ViewerId {
        let id = self.viewers.reserve_id();
        self.pending.push(PendingEdit::AddViewer { id, object });
        id
    }

    /// 註冊一個固定位置的觀測者
    pub fn register_point_viewer(&mut self, position: Vec2<f32>, radius: f32) -> ViewerId {
        self.register_viewer(Rc::new(RefCell::new(PointViewer::new(position, radius))))
    }

    /// 移除觀測者；其最後足跡會被標記為已探索。
    /// 不存在的代號是無操作
    pub fn unregister_viewer(&mut self, id: ViewerId) {
        self.pending.push(PendingEdit::RemoveViewer(id));
    }

    /// 註冊一個可剔除物件，初始為隱藏
    pub fn register_cullable(&mut self, object: CullableHandle) -> CullableId {
        let id = self.cullables.reserve_id();
        self.pending.push(PendingEdit::AddCullable { id, object });
        id
    }

    /// 移除可剔除物件；不存在的代號是無操作
    pub fn unregister_cullable(&mut self, id: CullableId) {
        self.pending.push(PendingEdit::RemoveCullable(id));
    }

    // ------------------------------------------------------------------
    // 揭露指令（遊戲邏輯 → 表現層邊界）
    // ------------------------------------------------------------------

    /// 一次性揭露：立即打開即時視野並標記歷史，
    /// 範圍內的可剔除物件記為曾被看見，但不改變本幀可見狀態
    pub fn reveal_once(&mut self, position: Vec2<f32>, radius: f32) {
        let (position, radius) = match self.grid.sanitize(position, radius) {
            Some(v) => v,
            None => {
                log::warn!("忽略不合法的揭露參數: {:?} 半徑 {}", position, radius);
                return;
            }
        };

        self.grid.reveal_live(position, radius);
        self.grid.stamp_history(position, radius);

        let render_radius = radius * RENDER_RANGE_SCALE;
        for entry in self.cullables.entries_mut() {
            if entry.visible {
                continue;
            }
            let (cull_position, cull_bounds) = {
                let object = entry.object.borrow();
                (object.position(), object.bounds())
            };
            if cull_bounds.overlaps_circle(cull_position, position, render_radius) {
                entry.ever_seen = true;
            }
        }
    }

    /// 建立限時觀測者，時間到自動移除；
    /// 若其間已被其他途徑移除，到期移除是無操作
    pub fn reveal_timed(&mut self, position: Vec2<f32>, radius: f32, duration: f32) -> ViewerId {
        let id = self.viewers.reserve_id();
        if !duration.is_finite() {
            log::warn!("忽略不合法的限時揭露時長: {}", duration);
            return id;
        }
        self.pending.push(PendingEdit::AddViewer {
            id,
            object: Rc::new(RefCell::new(PointViewer::new(position, radius))),
        });
        self.timed.push(TimedEntry {
            id,
            remaining: duration.max(0.0),
        });
        id
    }

    // ------------------------------------------------------------------
    // 啟用狀態
    // ------------------------------------------------------------------

    /// 全域啟用/停用迷霧更新。停用期間不執行任何遍次、
    /// 不發出任何回呼，註冊表維持成員不變
    pub fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        log::info!("迷霧更新{}", if active { "啟用" } else { "停用" });
        for listener in self.active_listeners.iter_mut() {
            listener(active);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 註冊啟用狀態變更的監聽者（例如切換迷霧覆蓋層的 UI）
    pub fn on_active_changed(&mut self, listener: Box<dyn FnMut(bool)>) {
        self.active_listeners.push(listener);
    }

    /// 取得指令傳送端，供其他節奏的程式碼緩衝指令
    pub fn commands(&self) -> Sender<FogCommand> {
        self.cmd_tx.clone()
    }

    // ------------------------------------------------------------------
    // 逐幀更新
    // ------------------------------------------------------------------

    /// 執行一幀的兩遍式更新，dt 為自上一幀經過的秒數。
    /// 嚴格順序：套用佇列中的編輯 → 暫定隱藏 → 歷史遍 →
    /// 即時視野遍 → 轉換回呼 → 發佈 → 限時觀測者倒數
    pub fn update(&mut self, dt: f32) {
        self.drain_commands();
        if !self.active {
            return;
        }
        self.apply_pending_edits();
        if !self.grid.is_ready() {
            return;
        }

        // 步驟一：保存上一幀可見狀態並暫定隱藏，回呼延後到步驟四
        for entry in self.cullables.entries_mut() {
            entry.was_visible = entry.visible;
            entry.visible = false;
        }

        // 第一遍：以上一幀位置寫入探索歷史。
        // 觀測者即使已經移動，上一幀覆蓋過的區域也要被記住
        for viewer in self.viewers.entries() {
            let radius = viewer.object.borrow().sight_radius();
            self.grid.stamp_history(viewer.last_position, radius);
        }

        // 第二遍：依註冊順序計算即時視野。
        // 可見性是所有觀測者的聯集，處理順序不影響最終結果
        for viewer in self.viewers.entries_mut() {
            let (position, radius) = {
                let object = viewer.object.borrow();
                (object.position(), object.sight_radius())
            };
            let (position, radius) = match self.grid.sanitize(position, radius) {
                Some(v) => v,
                None => {
                    log::debug!("觀測者 {:?} 的資料不合法，本幀跳過", viewer.id);
                    continue;
                }
            };

            self.grid.reveal_live(position, radius);

            let render_radius = radius * RENDER_RANGE_SCALE;
            for entry in self.cullables.entries_mut() {
                if entry.visible {
                    continue;
                }
                let (cull_position, cull_bounds) = {
                    let object = entry.object.borrow();
                    (object.position(), object.bounds())
                };
                if cull_bounds.overlaps_circle(cull_position, position, render_radius) {
                    entry.ever_seen = true;
                    entry.visible = true;
                }
            }

            viewer.last_position = position;
        }

        // 步驟四：每次轉換恰好發出一次回呼，
        // 套用鉤子則每幀都呼叫，讓消費端能持續做淡入淡出
        for entry in self.cullables.entries_mut() {
            let mut object = entry.object.borrow_mut();
            if entry.visible != entry.was_visible {
                object.on_visibility_changed(entry.visible);
            }
            object.apply_visible(entry.visible);
        }

        // 步驟五：本幀完成，快照自此有效
        self.frame += 1;

        // 限時觀測者倒數；到期排入移除，下一幀邊界生效
        let mut expired = Vec::new();
        self.timed.retain_mut(|entry| {
            entry.remaining -= dt;
            if entry.remaining <= 0.0 {
                expired.push(entry.id);
                false
            } else {
                true
            }
        });
        for id in expired {
            self.pending.push(PendingEdit::RemoveViewer(id));
        }
    }

    // ------------------------------------------------------------------
    // 查詢介面
    // ------------------------------------------------------------------

    /// 該點是否曾被探索；未就緒的網格一律回傳 false
    pub fn is_explored(&self, point: Vec2<f32>) -> bool {
        self.grid.is_explored(point)
    }

    /// 查詢可剔除物件的本幀狀態
    pub fn cull_state(&self, id: CullableId) -> Option<CullState> {
        self.cullables.state(id)
    }

    /// 取得渲染端快照，只在一幀更新完整結束後有效
    pub fn snapshot(&self) -> FogSnapshot {
        self.grid.snapshot(self.frame)
    }

    /// 世界座標對應的格子座標，渲染與小地圖消費端使用
    pub fn world_to_cell(&self, point: Vec2<f32>) -> Option<Vec2<usize>> {
        self.grid.world_to_cell(point)
    }

    /// 格子中心的世界座標
    pub fn cell_to_world(&self, cell: Vec2<usize>) -> Vec2<f32> {
        self.grid.cell_to_world(cell)
    }

    pub fn grid(&self) -> &FogGrid {
        &self.grid
    }

    /// 重設全部探索歷史
    pub fn clear(&mut self) {
        self.grid.clear();
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn cullable_count(&self) -> usize {
        self.cullables.len()
    }

    // ------------------------------------------------------------------
    // 內部
    // ------------------------------------------------------------------

    /// 處理緩衝的跨邊界指令
    fn drain_commands(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            match command {
                FogCommand::RevealOnce { position, radius } => {
                    self.reveal_once(position, radius);
                }
                FogCommand::RevealTimed {
                    position,
                    radius,
                    duration,
                } => {
                    self.reveal_timed(position, radius, duration);
                }
                FogCommand::SetActive(active) => self.set_active(active),
                FogCommand::Clear => self.grid.clear(),
            }
        }
    }

    /// 原子性套用佇列中的註冊表編輯，只在幀邊界呼叫
    fn apply_pending_edits(&mut self) {
        for edit in std::mem::take(&mut self.pending) {
            match edit {
                PendingEdit::AddViewer { id, object } => {
                    self.viewers.insert(id, object);
                }
                PendingEdit::RemoveViewer(id) => {
                    if let Some(entry) = self.viewers.remove(id) {
                        // 最後足跡標記為已探索，探索歷史在觀測者消失後仍保留
                        let radius = entry.object.borrow().sight_radius();
                        self.grid.stamp_history(entry.last_position, radius);
                    }
                    self.timed.retain(|t| t.id != id);
                }
                PendingEdit::AddCullable { id, object } => {
                    if self.cullables.insert(id, object.clone()) {
                        object.borrow_mut().on_visibility_changed(false);
                    }
                }
                PendingEdit::RemoveCullable(id) => {
                    self.cullables.remove(id);
                }
            }
        }
    }
}
