/// 戰爭迷霧不透明度網格
///
/// 以正方形網格覆蓋世界範圍，每格保存一個 0-255 的不透明度：
/// 等於 unseen_opacity 代表從未探索，小於等於 seen_floor 代表已探索，
/// 接近 0 代表目前正被觀測。網格只會變得更透明，
/// 重新建立網格（世界範圍改變）會捨棄全部探索歷史，屬於預期行為。
use serde::{Deserialize, Serialize};
use vek::Vec2;

use crate::config::FogSettings;

/// 揭露邊緣的線性衰減斜率（每個網格像素增加的不透明度）
const FALLOFF_SLOPE: f32 = 0.25 * 255.0;
/// 區域掃描的半徑填充倍數，涵蓋柔化後的視覺邊緣
const REGION_PADDING: f32 = std::f32::consts::FRAC_PI_2;

/// 迷霧世界邊界（正方形）
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FogBounds {
    /// 中心點
    pub center: Vec2<f32>,
    /// 邊長
    pub size: f32,
}

impl FogBounds {
    pub fn new(center: Vec2<f32>, size: f32) -> Self {
        Self { center, size }
    }

    /// 從最小/最大角點建立正方形邊界，取長寬較大者為邊長
    pub fn from_rect(min: Vec2<f32>, max: Vec2<f32>) -> Self {
        let size = (max.x - min.x).max(max.y - min.y);
        Self {
            center: (min + max) * 0.5,
            size,
        }
    }

    pub fn half_size(&self) -> f32 {
        self.size * 0.5
    }

    pub fn contains_point(&self, point: Vec2<f32>) -> bool {
        let half = self.half_size();
        point.x >= self.center.x - half
            && point.x <= self.center.x + half
            && point.y >= self.center.y - half
            && point.y <= self.center.y + half
    }

    fn is_degenerate(&self) -> bool {
        !self.size.is_finite()
            || self.size <= 0.0
            || !self.center.x.is_finite()
            || !self.center.y.is_finite()
    }
}

/// 提供給渲染端的唯讀網格快照，只在一幀更新完整結束後有效
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FogSnapshot {
    /// 網格解析度（邊長格數）
    pub resolution: usize,
    /// 世界中心點
    pub world_origin: Vec2<f32>,
    /// 世界邊長
    pub world_size: f32,
    /// 已完成的幀序號
    pub frame: u64,
    /// 已探索判定門檻
    pub seen_floor: u8,
    /// 未探索不透明度
    pub unseen_opacity: u8,
    /// 不透明度資料，索引為 y * resolution + x
    pub data: Vec<u8>,
}

impl FogSnapshot {
    /// 已探索格子占全圖的比例
    pub fn explored_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let seen = self.data.iter().filter(|&&v| v <= self.seen_floor).count();
        seen as f32 / self.data.len() as f32
    }
}

/// 網格內一塊待處理的矩形區域（像素座標）
struct CellRegion {
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
    /// 中心點的像素座標
    center_px: Vec2<f32>,
    /// 半徑的像素長度
    radius_px: f32,
}

/// 不透明度網格
#[derive(Debug, Clone)]
pub struct FogGrid {
    resolution: usize,
    /// 世界單位換算為像素的比例
    pixel_scale: f32,
    origin: Vec2<f32>,
    world_size: f32,
    seen_floor: u8,
    unseen_opacity: u8,
    data: Vec<u8>,
    ready: bool,
}

impl FogGrid {
    /// 依世界邊界與設定建立網格；退化的邊界會產生「未就緒」的網格，
    /// 其所有查詢回傳保守預設值（未探索）
    pub fn new(bounds: FogBounds, settings: &FogSettings) -> Self {
        if bounds.is_degenerate() || !settings.is_valid() {
            log::warn!(
                "迷霧網格初始化失敗：邊界或設定不合法（邊長 {:?}），網格進入未就緒狀態",
                bounds.size
            );
            return Self {
                resolution: 0,
                pixel_scale: 0.0,
                origin: bounds.center,
                world_size: 0.0,
                seen_floor: settings.seen_floor,
                unseen_opacity: settings.unseen_opacity,
                data: Vec::new(),
                ready: false,
            };
        }

        let resolution = ((bounds.size / settings.cell_pitch).ceil() as usize)
            .max(settings.min_resolution);
        let pixel_scale = resolution as f32 / bounds.size;

        log::info!(
            "初始化迷霧網格: 解析度 {}x{}，世界邊長 {:.0}，每格 {:.1} 單位",
            resolution,
            resolution,
            bounds.size,
            1.0 / pixel_scale
        );

        Self {
            resolution,
            pixel_scale,
            origin: bounds.center,
            world_size: bounds.size,
            seen_floor: settings.seen_floor,
            unseen_opacity: settings.unseen_opacity,
            data: vec![settings.unseen_opacity; resolution * resolution],
            ready: true,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn world_origin(&self) -> Vec2<f32> {
        self.origin
    }

    pub fn world_size(&self) -> f32 {
        self.world_size
    }

    pub fn seen_floor(&self) -> u8 {
        self.seen_floor
    }

    pub fn unseen_opacity(&self) -> u8 {
        self.unseen_opacity
    }

    /// 不透明度資料的唯讀借用，索引為 y * resolution + x
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 全部重設為未探索
    pub fn clear(&mut self) {
        for cell in self.data.iter_mut() {
            *cell = self.unseen_opacity;
        }
    }

    /// 檢查並修正揭露參數；非有限值或非正半徑回傳 None，
    /// 過大的半徑收斂到世界邊長
    pub fn sanitize(&self, center: Vec2<f32>, radius: f32) -> Option<(Vec2<f32>, f32)> {
        if !center.x.is_finite() || !center.y.is_finite() || !radius.is_finite() {
            return None;
        }
        if radius <= 0.0 || self.world_size <= 0.0 {
            return None;
        }
        Some((center, radius.min(self.world_size)))
    }

    /// 把上一幀觀測過的區域標記為已探索：
    /// 區域內每格降到 seen_floor，已經更透明的格子保持不動。
    /// 只「記住」探索，永遠不會完整揭露也不會重新變暗
    pub fn stamp_history(&mut self, center: Vec2<f32>, radius: f32) {
        let region = match self.cell_region(center, radius) {
            Some(r) => r,
            None => return,
        };

        let floor = self.seen_floor;
        for y in region.y0..=region.y1 {
            let row = y * self.resolution;
            for x in region.x0..=region.x1 {
                let cell = &mut self.data[row + x];
                if *cell > floor {
                    *cell = floor;
                }
            }
        }
    }

    /// 即時揭露：區域內每格取「目前值」與「距離衰減值」的較小者。
    /// 衰減在半徑內為 0（完全可見），超出半徑後隨距離線性上升，
    /// 平滑無階梯且永遠不會提高不透明度
    pub fn reveal_live(&mut self, center: Vec2<f32>, radius: f32) {
        let region = match self.cell_region(center, radius) {
            Some(r) => r,
            None => return,
        };

        for y in region.y0..=region.y1 {
            let row = y * self.resolution;
            for x in region.x0..=region.x1 {
                let delta = region.center_px - Vec2::new(x as f32, y as f32);
                let falloff = (delta.magnitude() - region.radius_px) * FALLOFF_SLOPE;
                let value = falloff.clamp(0.0, 255.0) as u8;
                let cell = &mut self.data[row + x];
                if value < *cell {
                    *cell = value;
                }
            }
        }
    }

    /// 該點所在的格子是否曾被探索；未就緒或超出範圍回傳 false
    pub fn is_explored(&self, point: Vec2<f32>) -> bool {
        match self.world_to_cell(point) {
            Some(cell) => self.data[cell.y * self.resolution + cell.x] <= self.seen_floor,
            None => false,
        }
    }

    /// 世界座標對應的格子座標
    pub fn world_to_cell(&self, point: Vec2<f32>) -> Option<Vec2<usize>> {
        if !self.ready || !point.x.is_finite() || !point.y.is_finite() {
            return None;
        }
        let half = self.resolution as f32 * 0.5;
        let x = ((point.x - self.origin.x) * self.pixel_scale + half).floor();
        let y = ((point.y - self.origin.y) * self.pixel_scale + half).floor();
        if x < 0.0 || y < 0.0 || x >= self.resolution as f32 || y >= self.resolution as f32 {
            return None;
        }
        Some(Vec2::new(x as usize, y as usize))
    }

    /// 格子中心的世界座標
    pub fn cell_to_world(&self, cell: Vec2<usize>) -> Vec2<f32> {
        let half = self.resolution as f32 * 0.5;
        Vec2::new(
            self.origin.x + (cell.x as f32 + 0.5 - half) / self.pixel_scale,
            self.origin.y + (cell.y as f32 + 0.5 - half) / self.pixel_scale,
        )
    }

    /// 複製目前網格內容給渲染端
    pub fn snapshot(&self, frame: u64) -> FogSnapshot {
        FogSnapshot {
            resolution: self.resolution,
            world_origin: self.origin,
            world_size: self.world_size,
            frame,
            seen_floor: self.seen_floor,
            unseen_opacity: self.unseen_opacity,
            data: self.data.clone(),
        }
    }

    /// 計算揭露區域覆蓋的格子範圍，完全在網格外回傳 None
    fn cell_region(&self, center: Vec2<f32>, radius: f32) -> Option<CellRegion> {
        if !self.ready {
            return None;
        }
        let (center, radius) = self.sanitize(center, radius)?;

        let half = self.resolution as f32 * 0.5;
        let center_px = Vec2::new(
            (center.x - self.origin.x) * self.pixel_scale + half,
            (center.y - self.origin.y) * self.pixel_scale + half,
        );
        let radius_px = radius * self.pixel_scale;
        let padded = radius_px * REGION_PADDING;

        let max_index = (self.resolution - 1) as i64;
        let x0 = (center_px.x - padded).floor() as i64;
        let x1 = (center_px.x + padded).ceil() as i64;
        let y0 = (center_px.y - padded).floor() as i64;
        let y1 = (center_px.y + padded).ceil() as i64;
        if x1 < 0 || y1 < 0 || x0 > max_index || y0 > max_index {
            return None;
        }

        Some(CellRegion {
            x0: x0.max(0) as usize,
            x1: x1.min(max_index) as usize,
            y0: y0.max(0) as usize,
            y1: y1.min(max_index) as usize,
            center_px,
            radius_px,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_4000() -> FogGrid {
        let bounds = FogBounds::from_rect(Vec2::new(-2000.0, -2000.0), Vec2::new(2000.0, 2000.0));
        FogGrid::new(bounds, &FogSettings::default())
    }

    /// 測試解析度推導與初始狀態
    #[test]
    fn test_grid_creation() {
        let grid = grid_4000();
        assert!(grid.is_ready());
        // 4000 / 30 = 133.3 -> 134，高於最低解析度 128
        assert_eq!(grid.resolution(), 134);
        assert_eq!(grid.data().len(), 134 * 134);
        assert!(grid.data().iter().all(|&v| v == grid.unseen_opacity()));
        assert!(!grid.is_explored(Vec2::new(0.0, 0.0)));
    }

    /// 測試退化邊界進入未就緒狀態且查詢回傳保守預設值
    #[test]
    fn test_degenerate_bounds() {
        let grid = FogGrid::new(
            FogBounds::new(Vec2::new(0.0, 0.0), 0.0),
            &FogSettings::default(),
        );
        assert!(!grid.is_ready());
        assert!(!grid.is_explored(Vec2::new(0.0, 0.0)));
        assert!(grid.world_to_cell(Vec2::new(0.0, 0.0)).is_none());
        assert!(grid.snapshot(0).data.is_empty());

        let mut grid = grid;
        // 未就緒網格上的寫入不會崩潰
        grid.reveal_live(Vec2::new(0.0, 0.0), 500.0);
        grid.stamp_history(Vec2::new(0.0, 0.0), 500.0);
        grid.clear();
    }

    /// 測試世界座標與格子座標的往返換算
    #[test]
    fn test_coordinate_round_trip() {
        let grid = grid_4000();
        for &point in &[
            Vec2::new(0.0, 0.0),
            Vec2::new(-1999.0, -1999.0),
            Vec2::new(1999.0, 1999.0),
            Vec2::new(123.0, -456.0),
        ] {
            let cell = grid.world_to_cell(point).unwrap();
            let back = grid.cell_to_world(cell);
            // 還原點必須落在同一個格子內
            assert_eq!(grid.world_to_cell(back).unwrap(), cell);
            assert!((back - point).magnitude() <= grid.world_size() / grid.resolution() as f32);
        }
        assert!(grid.world_to_cell(Vec2::new(2500.0, 0.0)).is_none());
        assert!(grid.world_to_cell(Vec2::new(f32::NAN, 0.0)).is_none());
    }

    /// 測試即時揭露的中心透明、邊緣平滑上升、範圍外不受影響
    #[test]
    fn test_reveal_live_falloff() {
        let mut grid = grid_4000();
        let center = Vec2::new(0.0, 0.0);
        grid.reveal_live(center, 500.0);

        let center_cell = grid.world_to_cell(center).unwrap();
        let center_value = grid.data()[center_cell.y * grid.resolution() + center_cell.x];
        assert_eq!(center_value, 0);

        // 半徑內完全透明
        let inner = grid.world_to_cell(Vec2::new(400.0, 0.0)).unwrap();
        assert_eq!(grid.data()[inner.y * grid.resolution() + inner.x], 0);

        // 遠離半徑的格子保持未探索
        let far = grid.world_to_cell(Vec2::new(1500.0, 1500.0)).unwrap();
        assert_eq!(
            grid.data()[far.y * grid.resolution() + far.x],
            grid.unseen_opacity()
        );

        // 沿 x 軸取樣，不透明度必須單調不減
        let mut last = 0u8;
        for step in 0..60 {
            let p = Vec2::new(step as f32 * 30.0, 0.0);
            if let Some(cell) = grid.world_to_cell(p) {
                let v = grid.data()[cell.y * grid.resolution() + cell.x];
                assert!(v >= last, "距離 {} 處的不透明度下降了", step * 30);
                last = v;
            }
        }
    }

    /// 測試歷史標記只拉到 seen_floor，不影響更透明的格子
    #[test]
    fn test_stamp_history_floor_rule() {
        let mut grid = grid_4000();
        let center = Vec2::new(0.0, 0.0);

        grid.reveal_live(center, 300.0);
        let cell = grid.world_to_cell(center).unwrap();
        let idx = cell.y * grid.resolution() + cell.x;
        assert_eq!(grid.data()[idx], 0);

        // 已完全揭露的格子不會被標記拉高
        grid.stamp_history(center, 300.0);
        assert_eq!(grid.data()[idx], 0);

        // 未探索的格子被拉到 seen_floor
        let fresh = Vec2::new(1000.0, 1000.0);
        grid.stamp_history(fresh, 300.0);
        let cell = grid.world_to_cell(fresh).unwrap();
        assert_eq!(
            grid.data()[cell.y * grid.resolution() + cell.x],
            grid.seen_floor()
        );
        assert!(grid.is_explored(fresh));
    }

    /// 測試揭露操作的冪等性：重複同樣的揭露不再改變網格
    #[test]
    fn test_reveal_idempotent() {
        let mut grid = grid_4000();
        grid.reveal_live(Vec2::new(100.0, 100.0), 400.0);
        grid.stamp_history(Vec2::new(100.0, 100.0), 400.0);
        let first = grid.data().to_vec();

        grid.reveal_live(Vec2::new(100.0, 100.0), 400.0);
        grid.stamp_history(Vec2::new(100.0, 100.0), 400.0);
        assert_eq!(grid.data(), &first[..]);
    }

    /// 測試參數修正：非有限值與非正半徑被拒絕，超大半徑被收斂
    #[test]
    fn test_sanitize() {
        let mut grid = grid_4000();
        assert!(grid.sanitize(Vec2::new(f32::NAN, 0.0), 100.0).is_none());
        assert!(grid.sanitize(Vec2::new(0.0, 0.0), -5.0).is_none());
        assert!(grid.sanitize(Vec2::new(0.0, 0.0), f32::INFINITY).is_none());
        let (_, r) = grid.sanitize(Vec2::new(0.0, 0.0), 99999.0).unwrap();
        assert_eq!(r, grid.world_size());

        let before = grid.data().to_vec();
        grid.reveal_live(Vec2::new(f32::NAN, f32::NAN), 500.0);
        grid.reveal_live(Vec2::new(0.0, 0.0), -1.0);
        assert_eq!(grid.data(), &before[..]);
    }

    /// 測試 clear 後全部回到未探索
    #[test]
    fn test_clear() {
        let mut grid = grid_4000();
        grid.reveal_live(Vec2::new(0.0, 0.0), 800.0);
        assert!(grid.is_explored(Vec2::new(0.0, 0.0)));
        grid.clear();
        assert!(!grid.is_explored(Vec2::new(0.0, 0.0)));
        assert!(grid.data().iter().all(|&v| v == grid.unseen_opacity()));
    }

    /// 測試快照帶出正確的中繼資料與探索比例
    #[test]
    fn test_snapshot() {
        let mut grid = grid_4000();
        let empty = grid.snapshot(0);
        assert_eq!(empty.explored_ratio(), 0.0);

        grid.reveal_live(Vec2::new(0.0, 0.0), 600.0);
        let snap = grid.snapshot(7);
        assert_eq!(snap.frame, 7);
        assert_eq!(snap.resolution, grid.resolution());
        assert_eq!(snap.world_size, grid.world_size());
        assert!(snap.explored_ratio() > 0.0);
        assert!(snap.explored_ratio() < 1.0);
    }
}
