use std::sync::Arc;

use anyhow::{Context, Result};
use flock_sim::{FlockConfig, HostLoop, Mat4, ObstacleScene, SimulationArea, Simulator, Vec3};
use tracing::info;

const DT: f32 = 1.0 / 60.0;

/// Usage: `flock-headless [agents] [frames] [config.json]`
fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let count: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let frames: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(300);
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            FlockConfig::from_json_str(&json).with_context(|| format!("parsing config {path}"))?
        }
        None => FlockConfig::default(),
    };

    let area = SimulationArea::new(Vec3::ZERO, Vec3::splat(40.0));
    let simulator = if config.avoidance.is_some() {
        let scene = ObstacleScene::new()
            .with_sphere(Vec3::ZERO, 4.0)
            .with_box(Vec3::new(8.0, -20.0, -2.0), Vec3::new(10.0, 20.0, 2.0));
        Simulator::with_ray_caster(&config, count, area, Arc::new(scene))?
    } else {
        Simulator::new(&config, count, area)?
    };

    let mut host = HostLoop::new(simulator, area);
    let mut centroid = Vec3::ZERO;
    let mut sink = |transforms: &[Mat4]| {
        let sum: Vec3 = transforms.iter().map(|t| t.w_axis.truncate()).sum();
        centroid = sum / transforms.len().max(1) as f32;
    };

    for frame in 0..frames {
        host.tick(&mut sink, DT)?;
        if frame % 60 == 0 {
            let stats = host.simulator().stats();
            info!(
                frame = stats.frame,
                neighbor_pairs = stats.neighbor_pairs,
                ray_hits = stats.ray_hits,
                elapsed = ?stats.elapsed,
                "flock progress"
            );
        }
    }

    info!(?centroid, "flock centroid after final tick");
    host.shutdown()?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
