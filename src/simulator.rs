use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use glam::Mat4;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::avoidance::RayCaster;
use crate::config::{BehaviorProfile, FlockConfig};
use crate::error::{FlockError, Result};
use crate::integrate::agent_transform;
use crate::pipeline::{run_frame, FrameBuffers, FrameContext, FramePlan, FrameReport};
use crate::state::{AgentState, BoidStore, SimulationArea};

type FrameOutcome = std::thread::Result<(Box<FrameBuffers>, FrameReport)>;

enum FrameState {
    /// No work in flight; the simulator owns every buffer.
    Idle(Box<FrameBuffers>),
    /// The buffers travel with the scheduled frame and come back through the
    /// channel, so nothing can touch or free them until `complete` joins.
    Computing(Receiver<FrameOutcome>),
    Poisoned,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Frames completed so far.
    pub frame: u64,
    pub neighbor_pairs: usize,
    pub ray_hits: usize,
    pub elapsed: Duration,
}

impl FrameStats {
    fn record(&mut self, report: &FrameReport) {
        self.frame += 1;
        self.neighbor_pairs = report.neighbor_pairs;
        self.ray_hits = report.ray_hits;
        self.elapsed = report.stage_timings.iter().map(|(_, t)| *t).sum();
    }
}

/// Owns all per-agent buffers and drives the frame pipeline.
///
/// Host loop per tick: [`complete`](Self::complete), consume the transforms,
/// then [`execute`](Self::execute) the next frame so it overlaps rendering.
pub struct Simulator {
    profile: BehaviorProfile,
    plan: Arc<FramePlan>,
    ray_caster: Option<Arc<dyn RayCaster>>,
    agent_count: usize,
    state: FrameState,
    stats: FrameStats,
}

impl Simulator {
    /// Scatters `count` agents inside `area`. Seeds from the config, or from
    /// OS entropy when no seed is configured.
    pub fn new(config: &FlockConfig, count: usize, area: SimulationArea) -> Result<Self> {
        Self::build(config, count, area, None)
    }

    /// Obstacle-avoidance variant. `config.avoidance` must be set.
    pub fn with_ray_caster(
        config: &FlockConfig,
        count: usize,
        area: SimulationArea,
        ray_caster: Arc<dyn RayCaster>,
    ) -> Result<Self> {
        Self::build(config, count, area, Some(ray_caster))
    }

    /// Starts from explicit agent states instead of a random scatter.
    pub fn from_agents(
        config: &FlockConfig,
        agents: Vec<AgentState>,
        ray_caster: Option<Arc<dyn RayCaster>>,
    ) -> Result<Self> {
        Self::assemble(config, BoidStore::from_agents(agents), ray_caster)
    }

    fn build(
        config: &FlockConfig,
        count: usize,
        area: SimulationArea,
        ray_caster: Option<Arc<dyn RayCaster>>,
    ) -> Result<Self> {
        let seed = match config.seed {
            Some(seed) => seed,
            None => getrandom::u64().map_err(|e| FlockError::Entropy(e.to_string()))?,
        };

        let mut store = BoidStore::new(count);
        store.scatter(area, config.initial_speed, &mut SmallRng::seed_from_u64(seed));
        debug!(seed, count, "scattered initial agents");

        Self::assemble(config, store, ray_caster)
    }

    fn assemble(
        config: &FlockConfig,
        store: BoidStore,
        ray_caster: Option<Arc<dyn RayCaster>>,
    ) -> Result<Self> {
        config.validate()?;
        if store.is_empty() {
            return Err(FlockError::ZeroAgents);
        }
        match (config.avoidance.is_some(), ray_caster.is_some()) {
            (true, false) => {
                return Err(FlockError::InvalidConfig(
                    "avoidance is configured but no ray caster was supplied".to_string(),
                ))
            }
            (false, true) => {
                return Err(FlockError::InvalidConfig(
                    "a ray caster was supplied without avoidance settings".to_string(),
                ))
            }
            _ => {}
        }

        let profile = BehaviorProfile::from_config(config);
        let plan = FramePlan::new(profile.neighbor_search, profile.avoidance.is_some());
        let agent_count = store.len();

        let mut buffers = FrameBuffers::new(store, &profile);
        for (transform, agent) in buffers.transforms.iter_mut().zip(buffers.store.agents()) {
            *transform = agent_transform(agent, profile.instance_scale);
        }

        info!(
            agents = agent_count,
            grid_scale = profile.grid_scale,
            stages = ?plan.order(),
            "boids simulator ready"
        );

        Ok(Self {
            profile,
            plan: Arc::new(plan),
            ray_caster,
            agent_count,
            state: FrameState::Idle(Box::new(buffers)),
            stats: FrameStats::default(),
        })
    }

    /// Schedules one frame on the worker pool and returns immediately.
    /// A frame still in flight is joined first.
    pub fn execute(&mut self, area: SimulationArea, dt: f32) -> Result<()> {
        if matches!(self.state, FrameState::Computing(_)) {
            debug!("execute called with a frame in flight, joining it first");
            self.complete()?;
        }

        let mut buffers = match std::mem::replace(&mut self.state, FrameState::Poisoned) {
            FrameState::Idle(buffers) => buffers,
            FrameState::Poisoned => return Err(FlockError::Poisoned),
            FrameState::Computing(_) => unreachable!("in-flight frame was joined above"),
        };

        let plan = Arc::clone(&self.plan);
        let context = self.frame_context(area, dt);
        let (sender, receiver) = mpsc::sync_channel(1);

        rayon::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let report = run_frame(&plan, &mut buffers, &context);
                (buffers, report)
            }));
            // The receiver only disappears if the simulator was leaked.
            let _ = sender.send(outcome);
        });

        self.state = FrameState::Computing(receiver);
        Ok(())
    }

    /// Blocks until the scheduled frame finishes and returns the transforms.
    /// Without a frame in flight this is a no-op returning the same buffer.
    pub fn complete(&mut self) -> Result<&[Mat4]> {
        if let FrameState::Computing(receiver) = &self.state {
            let outcome = receiver.recv().map_err(|_| FlockError::FramePanicked);
            self.finish_frame(outcome.and_then(|outcome| outcome.map_err(|_| FlockError::FramePanicked)))?;
        }

        match &self.state {
            FrameState::Idle(buffers) => Ok(&buffers.transforms),
            FrameState::Poisoned => Err(FlockError::Poisoned),
            FrameState::Computing(_) => unreachable!("frame was joined above"),
        }
    }

    /// Like [`complete`](Self::complete) but gives up after `timeout`.
    /// Returns `false` while the frame is still running.
    pub fn complete_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let outcome = match &self.state {
            FrameState::Idle(_) => return Ok(true),
            FrameState::Poisoned => return Err(FlockError::Poisoned),
            FrameState::Computing(receiver) => match receiver.recv_timeout(timeout) {
                Ok(outcome) => outcome.map_err(|_| FlockError::FramePanicked),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(?timeout, "frame still computing after timeout");
                    return Ok(false);
                }
                Err(RecvTimeoutError::Disconnected) => Err(FlockError::FramePanicked),
            },
        };

        self.finish_frame(outcome)?;
        Ok(true)
    }

    /// Runs one frame on the calling thread. Any frame in flight is joined
    /// first.
    pub fn step(&mut self, area: SimulationArea, dt: f32) -> Result<&[Mat4]> {
        self.complete()?;
        let context = self.frame_context(area, dt);

        let FrameState::Idle(buffers) = &mut self.state else {
            return Err(FlockError::Poisoned);
        };
        let report = run_frame(&self.plan, buffers, &context);
        self.stats.record(&report);
        debug!(
            frame = self.stats.frame,
            neighbor_pairs = report.neighbor_pairs,
            "frame stepped inline"
        );

        self.transforms().ok_or(FlockError::Poisoned)
    }

    /// Joins any in-flight frame, then releases every buffer.
    pub fn dispose(mut self) -> Result<()> {
        let joined = self.complete().map(|_| ());
        info!(frames = self.stats.frame, "boids simulator disposed");
        joined
    }

    pub fn is_computing(&self) -> bool {
        matches!(self.state, FrameState::Computing(_))
    }

    /// Latest transforms, or `None` while a frame is in flight.
    pub fn transforms(&self) -> Option<&[Mat4]> {
        match &self.state {
            FrameState::Idle(buffers) => Some(&buffers.transforms),
            _ => None,
        }
    }

    /// Transforms flattened to 16 column-major floats per agent.
    pub fn transform_floats(&self) -> Option<&[f32]> {
        self.transforms().map(bytemuck::cast_slice)
    }

    pub fn agents(&self) -> Option<&[AgentState]> {
        match &self.state {
            FrameState::Idle(buffers) => Some(buffers.store.agents()),
            _ => None,
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count
    }

    pub fn profile(&self) -> &BehaviorProfile {
        &self.profile
    }

    pub fn plan(&self) -> &FramePlan {
        &self.plan
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    fn frame_context(&self, area: SimulationArea, dt: f32) -> FrameContext {
        FrameContext {
            profile: self.profile,
            area,
            dt,
            ray_caster: self.ray_caster.clone(),
        }
    }

    fn finish_frame(&mut self, outcome: Result<(Box<FrameBuffers>, FrameReport)>) -> Result<()> {
        match outcome {
            Ok((buffers, report)) => {
                self.stats.record(&report);
                debug!(
                    frame = self.stats.frame,
                    neighbor_pairs = report.neighbor_pairs,
                    ray_hits = report.ray_hits,
                    elapsed = ?self.stats.elapsed,
                    "frame completed"
                );
                self.state = FrameState::Idle(buffers);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "frame failed, simulator poisoned");
                self.state = FrameState::Poisoned;
                Err(err)
            }
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        // Drain before release: the worker still owns the buffers.
        if let FrameState::Computing(receiver) = &self.state {
            let _ = receiver.recv();
        }
    }
}
