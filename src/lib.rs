/// Open Fog of War Library
///
/// RTS 戰爭迷霧（視野與探索）子系統的核心函式庫

pub mod config;
pub mod fog;

// Re-export commonly used types
pub use crate::config::FogSettings;
pub use crate::fog::*;
