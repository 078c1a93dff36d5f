use std::sync::Arc;
use std::time::Duration;

use glam::{Mat4, Vec3};
use tracing::trace;
use web_time::Instant;

use crate::avoidance::{build_ray_queries, RayCaster, RayHit, RayQuery};
use crate::config::{BehaviorProfile, NeighborSearch};
use crate::error::{FlockError, Result};
use crate::grid::SpatialHashGrid;
use crate::integrate::{integrate_all, IntegrationParams};
use crate::state::{BoidStore, SimulationArea};
use crate::steer::compute_steer_forces;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    ClearGrid,
    BuildGrid,
    SteerForce,
    PrepareRays,
    CastRays,
    Integrate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageNode {
    pub stage: Stage,
    pub depends_on: Vec<Stage>,
}

impl StageNode {
    pub fn new(stage: Stage, depends_on: &[Stage]) -> Self {
        Self {
            stage,
            depends_on: depends_on.to_vec(),
        }
    }
}

/// Per-frame task graph. Each stage runs only after every stage it depends
/// on has finished for all agents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    nodes: Vec<StageNode>,
    order: Vec<Stage>,
}

impl FramePlan {
    pub fn new(search: NeighborSearch, avoidance: bool) -> Self {
        let mut nodes = Vec::with_capacity(6);
        let mut integrate_after = Vec::with_capacity(2);

        if search == NeighborSearch::Grid {
            nodes.push(StageNode::new(Stage::ClearGrid, &[]));
            nodes.push(StageNode::new(Stage::BuildGrid, &[Stage::ClearGrid]));
            nodes.push(StageNode::new(Stage::SteerForce, &[Stage::BuildGrid]));
        } else {
            nodes.push(StageNode::new(Stage::SteerForce, &[]));
        }
        integrate_after.push(Stage::SteerForce);

        if avoidance {
            nodes.push(StageNode::new(Stage::PrepareRays, &[]));
            nodes.push(StageNode::new(Stage::CastRays, &[Stage::PrepareRays]));
            integrate_after.push(Stage::CastRays);
        }

        nodes.push(StageNode::new(Stage::Integrate, &integrate_after));

        // The built-in graphs are acyclic, so ordering cannot fail.
        let order = topological_order(&nodes).unwrap_or_default();
        Self { nodes, order }
    }

    pub fn from_nodes(nodes: Vec<StageNode>) -> Result<Self> {
        let order = topological_order(&nodes)?;
        Ok(Self { nodes, order })
    }

    /// Execution order; every stage appears after its dependencies.
    pub fn order(&self) -> &[Stage] {
        &self.order
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.nodes.iter().any(|node| node.stage == stage)
    }

    pub fn dependencies(&self, stage: Stage) -> &[Stage] {
        self.nodes
            .iter()
            .find(|node| node.stage == stage)
            .map(|node| node.depends_on.as_slice())
            .unwrap_or(&[])
    }
}

/// Kahn's algorithm, picking ready stages in declaration order.
fn topological_order(nodes: &[StageNode]) -> Result<Vec<Stage>> {
    for (i, node) in nodes.iter().enumerate() {
        if nodes[..i].iter().any(|other| other.stage == node.stage) {
            return Err(FlockError::InvalidConfig(format!(
                "stage {:?} declared twice",
                node.stage
            )));
        }
        for dependency in &node.depends_on {
            if !nodes.iter().any(|other| other.stage == *dependency) {
                return Err(FlockError::InvalidConfig(format!(
                    "stage {:?} depends on missing stage {dependency:?}",
                    node.stage
                )));
            }
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut scheduled = vec![false; nodes.len()];

    while order.len() < nodes.len() {
        let ready = nodes.iter().enumerate().find(|(i, node)| {
            !scheduled[*i] && node.depends_on.iter().all(|dep| order.contains(dep))
        });

        match ready {
            Some((i, node)) => {
                scheduled[i] = true;
                order.push(node.stage);
            }
            None => {
                return Err(FlockError::InvalidConfig(
                    "stage dependencies form a cycle".to_string(),
                ))
            }
        }
    }

    Ok(order)
}

/// Every buffer a frame touches, allocated once for a fixed population.
pub struct FrameBuffers {
    pub store: BoidStore,
    pub forces: Vec<Vec3>,
    pub transforms: Vec<Mat4>,
    pub grid: Option<SpatialHashGrid>,
    pub queries: Vec<RayQuery>,
    pub hits: Vec<Option<RayHit>>,
}

impl FrameBuffers {
    pub fn new(store: BoidStore, profile: &BehaviorProfile) -> Self {
        let count = store.len();
        let grid = (profile.neighbor_search == NeighborSearch::Grid)
            .then(|| SpatialHashGrid::new(count, profile.grid_scale));
        let ray_slots = if profile.avoidance.is_some() { count } else { 0 };

        Self {
            store,
            forces: vec![Vec3::ZERO; count],
            transforms: vec![Mat4::IDENTITY; count],
            grid,
            queries: vec![RayQuery::default(); ray_slots],
            hits: vec![None; ray_slots],
        }
    }
}

/// Read-only inputs shared by every stage of one frame.
#[derive(Clone)]
pub struct FrameContext {
    pub profile: BehaviorProfile,
    pub area: SimulationArea,
    pub dt: f32,
    pub ray_caster: Option<Arc<dyn RayCaster>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub neighbor_pairs: usize,
    pub ray_hits: usize,
    pub stage_timings: Vec<(Stage, Duration)>,
}

/// Runs `plan` over `buffers`. Stages are data-parallel internally and
/// strictly sequential with respect to each other.
pub fn run_frame(plan: &FramePlan, buffers: &mut FrameBuffers, context: &FrameContext) -> FrameReport {
    let mut report = FrameReport::default();

    for &stage in plan.order() {
        let started = Instant::now();
        run_stage(stage, buffers, context, &mut report);
        let elapsed = started.elapsed();
        trace!(?stage, ?elapsed, "stage finished");
        report.stage_timings.push((stage, elapsed));
    }

    report
}

fn run_stage(stage: Stage, buffers: &mut FrameBuffers, context: &FrameContext, report: &mut FrameReport) {
    let profile = &context.profile;

    match stage {
        Stage::ClearGrid => {
            if let Some(grid) = buffers.grid.as_mut() {
                grid.clear();
            }
        }
        Stage::BuildGrid => {
            if let Some(grid) = buffers.grid.as_mut() {
                grid.build(buffers.store.agents());
            }
        }
        Stage::SteerForce => {
            report.neighbor_pairs = compute_steer_forces(
                buffers.store.agents(),
                buffers.grid.as_ref(),
                profile,
                &mut buffers.forces,
            );
        }
        Stage::PrepareRays => {
            if let Some(avoidance) = profile.avoidance {
                build_ray_queries(
                    buffers.store.agents(),
                    avoidance.ray_distance,
                    &mut buffers.queries,
                );
            }
        }
        Stage::CastRays => match context.ray_caster.as_deref() {
            Some(caster) => {
                // Backends may leave misses untouched.
                buffers.hits.fill(None);
                caster.cast(&buffers.queries, &mut buffers.hits);
                report.ray_hits = buffers.hits.iter().filter(|hit| hit.is_some()).count();
            }
            None => buffers.hits.fill(None),
        },
        Stage::Integrate => {
            let params = IntegrationParams {
                area: context.area,
                dt: context.dt,
                boundary_avoid_weight: profile.boundary_avoid_weight,
                max_speed: profile.max_speed,
                instance_scale: profile.instance_scale,
                avoid_rotation_velocity: profile
                    .avoidance
                    .map_or(0.0, |avoidance| avoidance.avoid_rotation_velocity),
            };
            let hits = (!buffers.hits.is_empty()).then_some(buffers.hits.as_slice());
            integrate_all(
                buffers.store.agents_mut(),
                &buffers.forces,
                hits,
                &mut buffers.transforms,
                &params,
            );
        }
    }
}
