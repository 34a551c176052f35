/// 戰爭迷霧模組
///
/// 包含不透明度網格、觀測者與可剔除物件註冊表、以及逐幀排程器
pub mod grid;
pub mod registry;
pub mod scheduler;

pub use self::{
    grid::{FogBounds, FogGrid, FogSnapshot},
    registry::*,
    scheduler::{FogCommand, FogOfWar, RENDER_RANGE_SCALE},
};
