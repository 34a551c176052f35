#![allow(unused)]

use chrono::Local;
use failure::{err_msg, Error};
use log::{debug, error, info, trace, warn};
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use vek::Vec2;

use ofow::{
    CullBounds, FogBounds, FogCullable, FogOfWar, FogSettings, PointViewer,
};

const TPS: u64 = 30;
const FRAMES: u64 = 300;

/// 展示用單位：紀錄可見狀態轉換並模擬淡入淡出
struct DemoUnit {
    name: &'static str,
    position: Vec2<f32>,
    alpha: f32,
}

impl DemoUnit {
    fn new(name: &'static str, position: Vec2<f32>) -> Self {
        Self {
            name,
            position,
            alpha: 0.0,
        }
    }
}

impl FogCullable for DemoUnit {
    fn position(&self) -> Vec2<f32> {
        self.position
    }

    fn bounds(&self) -> CullBounds {
        CullBounds::from_half_extents(Vec2::new(24.0, 24.0))
    }

    fn on_visibility_changed(&mut self, visible: bool) {
        info!(
            "單位 {} {}",
            self.name,
            if visible { "進入視野" } else { "離開視野" }
        );
    }

    fn apply_visible(&mut self, visible: bool) {
        // 每幀朝目標透明度靠近，不論狀態是否轉換
        let target = if visible { 1.0 } else { 0.0 };
        self.alpha += (target - self.alpha) * 0.2;
    }
}

fn setup_logger() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn main() -> Result<(), Error> {
    setup_logger().map_err(|e| err_msg(format!("日誌初始化失敗: {}", e)))?;

    let settings = FogSettings::load("fog.toml");
    let bounds = FogBounds::from_rect(Vec2::new(-2000.0, -2000.0), Vec2::new(2000.0, 2000.0));
    let mut fog = FogOfWar::new(bounds, &settings);

    // 隨機漫步的偵察單位
    let scout = Rc::new(RefCell::new(PointViewer::new(Vec2::new(0.0, 0.0), 400.0)));
    fog.register_viewer(scout.clone());

    // 固定據點的駐守視野
    fog.register_point_viewer(Vec2::new(-1500.0, -1500.0), 300.0);

    let units = [
        Rc::new(RefCell::new(DemoUnit::new("敵方箭塔", Vec2::new(800.0, 200.0)))),
        Rc::new(RefCell::new(DemoUnit::new("敵方兵營", Vec2::new(-600.0, 900.0)))),
        Rc::new(RefCell::new(DemoUnit::new("野怪營地", Vec2::new(1500.0, -1200.0)))),
    ];
    for unit in units.iter() {
        fog.register_cullable(unit.clone());
    }

    // 開場的限時偵查術
    fog.reveal_timed(Vec2::new(1500.0, -1200.0), 500.0, 3.0);

    let dt = Duration::from_secs_f64(1.0 / TPS as f64).as_secs_f32();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for frame in 0..FRAMES {
        {
            let mut s = scout.borrow_mut();
            s.position.x = (s.position.x + rng.random_range(-60.0..60.0)).clamp(-1900.0, 1900.0);
            s.position.y = (s.position.y + rng.random_range(-60.0..60.0)).clamp(-1900.0, 1900.0);
        }

        fog.update(dt);

        if frame % TPS == 0 {
            info!(
                "第 {} 幀: 已探索比例 {:.1}%",
                frame,
                fog.snapshot().explored_ratio() * 100.0
            );
        }
    }

    let snapshot = fog.snapshot();
    let summary = serde_json::json!({
        "frame": snapshot.frame,
        "resolution": snapshot.resolution,
        "world_size": snapshot.world_size,
        "explored_ratio": snapshot.explored_ratio(),
        "viewers": fog.viewer_count(),
        "cullables": fog.cullable_count(),
    });
    info!("迷霧統計: {}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
