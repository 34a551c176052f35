/// 迷霧子系統設定
///
/// 初始化時決定，要變更需重建網格
use failure::{err_msg, Error};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FogSettings {
    /// 已探索但目前未被觀測的不透明度（嚴格小於 unseen_opacity）
    pub seen_floor: u8,
    /// 未探索區域的初始不透明度
    pub unseen_opacity: u8,
    /// 每個網格在世界座標中的間距
    pub cell_pitch: f32,
    /// 網格解析度下限
    pub min_resolution: usize,
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            seen_floor: 200,
            unseen_opacity: 240,
            cell_pitch: 30.0,
            min_resolution: 128,
        }
    }
}

#[derive(Deserialize, Default)]
struct Setting {
    #[serde(default)]
    fog: FogSettings,
}

impl FogSettings {
    /// 設定值是否合法
    pub fn is_valid(&self) -> bool {
        self.seen_floor < self.unseen_opacity
            && self.cell_pitch.is_finite()
            && self.cell_pitch > 0.0
            && self.min_resolution > 0
    }

    /// 從 TOML 檔案載入設定；檔案缺失或內容不合法時退回預設值
    pub fn load(file_path: &str) -> FogSettings {
        match Self::try_load(file_path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("無法載入迷霧設定 {}: {}，使用預設值", file_path, e);
                FogSettings::default()
            }
        }
    }

    fn try_load(file_path: &str) -> Result<FogSettings, Error> {
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| err_msg(format!("無法讀取設定檔 {}: {}", file_path, e)))?;
        let settings = Self::from_toml_str(&content)?;

        log::info!(
            "載入迷霧設定: seen_floor={} unseen_opacity={} cell_pitch={} min_resolution={}",
            settings.seen_floor,
            settings.unseen_opacity,
            settings.cell_pitch,
            settings.min_resolution
        );
        Ok(settings)
    }

    /// 解析 TOML 內容中的 [fog] 區段
    pub fn from_toml_str(content: &str) -> Result<FogSettings, Error> {
        let setting: Setting =
            toml::from_str(content).map_err(|e| err_msg(format!("設定檔解析失敗: {}", e)))?;
        if !setting.fog.is_valid() {
            return Err(err_msg(format!(
                "設定值不合法: seen_floor={} unseen_opacity={} cell_pitch={} min_resolution={}",
                setting.fog.seen_floor,
                setting.fog.unseen_opacity,
                setting.fog.cell_pitch,
                setting.fog.min_resolution
            )));
        }
        Ok(setting.fog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 測試預設值合法
    #[test]
    fn test_default_valid() {
        let settings = FogSettings::default();
        assert!(settings.is_valid());
        assert!(settings.seen_floor < settings.unseen_opacity);
    }

    /// 測試 TOML 解析與缺省欄位
    #[test]
    fn test_from_toml() {
        let settings = FogSettings::from_toml_str(
            r#"
            [fog]
            seen_floor = 180
            cell_pitch = 25.0
            "#,
        )
        .unwrap();
        assert_eq!(settings.seen_floor, 180);
        assert_eq!(settings.cell_pitch, 25.0);
        // 未指定的欄位保持預設
        assert_eq!(settings.unseen_opacity, 240);
        assert_eq!(settings.min_resolution, 128);

        // 空內容等同全預設
        let empty = FogSettings::from_toml_str("").unwrap();
        assert_eq!(empty, FogSettings::default());
    }

    /// 測試不合法的組合被拒絕
    #[test]
    fn test_invalid_rejected() {
        // seen_floor 不得大於等於 unseen_opacity
        assert!(FogSettings::from_toml_str(
            r#"
            [fog]
            seen_floor = 240
            unseen_opacity = 200
            "#,
        )
        .is_err());

        // cell_pitch 必須為正
        assert!(FogSettings::from_toml_str(
            r#"
            [fog]
            cell_pitch = -1.0
            "#,
        )
        .is_err());

        assert!(FogSettings::from_toml_str("not toml at all [").is_err());
    }
}
