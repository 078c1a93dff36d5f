//! Spatial-hash accelerated 3-D boids with a pipelined, data-parallel frame.
//!
//! [`Simulator`] owns every per-agent buffer. A frame clears and rebuilds the
//! [`SpatialHashGrid`], computes cohesion/separation/alignment steering,
//! optionally casts avoidance rays, then integrates motion and writes one
//! render transform per agent.

pub mod avoidance;
pub mod config;
pub mod coverage;
pub mod error;
pub mod grid;
pub mod host;
pub mod integrate;
pub mod math;
pub mod pipeline;
pub mod simulator;
pub mod state;
pub mod steer;

use wasm_bindgen::prelude::*;

pub use avoidance::{Obstacle, ObstacleScene, RayCaster, RayHit, RayQuery};
pub use config::{AvoidanceConfig, BehaviorProfile, BehaviorRule, FlockConfig, NeighborSearch};
pub use error::{FlockError, Result};
pub use glam::{IVec3, Mat4, Vec3};
pub use grid::SpatialHashGrid;
pub use host::{HostLoop, InstanceSink};
pub use pipeline::{FramePlan, Stage};
pub use simulator::{FrameStats, Simulator};
pub use state::{AgentState, SimulationArea};

/// Browser-facing handle. Frames run inline since wasm has no worker pool
/// here.
#[wasm_bindgen]
pub struct Sim {
    simulator: Simulator,
    area: SimulationArea,
}

#[wasm_bindgen]
impl Sim {
    #[wasm_bindgen(constructor)]
    pub fn new(
        count: usize,
        seed: u32,
        extent_x: f32,
        extent_y: f32,
        extent_z: f32,
    ) -> std::result::Result<Sim, JsError> {
        let config = FlockConfig {
            seed: Some(u64::from(seed)),
            ..FlockConfig::default()
        };
        let area = SimulationArea::new(Vec3::ZERO, Vec3::new(extent_x, extent_y, extent_z));
        let simulator = Simulator::new(&config, count, area).map_err(to_js_error)?;
        Ok(Sim { simulator, area })
    }

    pub fn step(&mut self, dt: f32) -> std::result::Result<(), JsError> {
        self.simulator
            .step(self.area, dt)
            .map(|_| ())
            .map_err(to_js_error)
    }

    pub fn set_bounds(&mut self, extent_x: f32, extent_y: f32, extent_z: f32) {
        self.area.extent = Vec3::new(extent_x, extent_y, extent_z);
    }

    pub fn count(&self) -> usize {
        self.simulator.agent_count()
    }

    /// Column-major 4x4 matrix per agent, ready for an instance buffer.
    pub fn transforms(&self) -> Vec<f32> {
        self.simulator
            .transform_floats()
            .map(<[f32]>::to_vec)
            .unwrap_or_default()
    }

    /// `x, y, z` per agent.
    pub fn positions(&self) -> Vec<f32> {
        self.simulator
            .agents()
            .map(|agents| {
                agents
                    .iter()
                    .flat_map(|agent| agent.position.to_array())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn to_js_error(err: FlockError) -> JsError {
    JsError::new(&err.to_string())
}
