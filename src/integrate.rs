use glam::{EulerRot, Mat4, Quat, Vec3};
use rayon::prelude::*;

use crate::avoidance::RayHit;
use crate::math::{heading_angles, limit, rotate_about_axis};
use crate::state::{AgentState, SimulationArea};

const FALLBACK_AXIS: Vec3 = Vec3::Y;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegrationParams {
    pub area: SimulationArea,
    pub dt: f32,
    pub boundary_avoid_weight: f32,
    pub max_speed: f32,
    pub instance_scale: Vec3,
    pub avoid_rotation_velocity: f32,
}

/// Unit push back inside on every axis where `position` has left the area.
pub fn boundary_force(position: Vec3, area: &SimulationArea) -> Vec3 {
    let min = area.center - area.half_extent();
    let max = area.center + area.half_extent();
    let mut push = Vec3::ZERO;

    for axis in 0..3 {
        if position[axis] < min[axis] {
            push[axis] += 1.0;
        }
        if position[axis] > max[axis] {
            push[axis] -= 1.0;
        }
    }

    push
}

/// Turns `velocity` away from a surface with normal `hit_normal`. Only a
/// zero-length or non-finite axis (heading parallel to the normal, or no
/// heading at all) falls back to +Y.
pub fn steer_off_surface(velocity: Vec3, hit_normal: Vec3, angle_radians: f32) -> Vec3 {
    let forward = velocity.normalize_or_zero();
    let axis = forward
        .cross(hit_normal)
        .try_normalize()
        .unwrap_or(FALLBACK_AXIS);
    rotate_about_axis(velocity, axis, angle_radians)
}

/// Orientation (local +Z along the velocity), position and scale for rendering.
pub fn agent_transform(agent: &AgentState, instance_scale: Vec3) -> Mat4 {
    let (yaw, pitch) = heading_angles(agent.velocity);
    let rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);
    Mat4::from_scale_rotation_translation(instance_scale, rotation, agent.position)
}

/// Advances one agent by `params.dt` and returns its render transform.
pub fn integrate_agent(
    agent: &mut AgentState,
    steer: Vec3,
    hit: Option<RayHit>,
    params: &IntegrationParams,
) -> Mat4 {
    let force = steer + boundary_force(agent.position, &params.area) * params.boundary_avoid_weight;
    let mut velocity = agent.velocity + force * params.dt;

    if let Some(hit) = hit {
        velocity = steer_off_surface(
            velocity,
            hit.normal,
            params.avoid_rotation_velocity * params.dt,
        );
    }

    agent.velocity = limit(velocity, params.max_speed);
    agent.position += agent.velocity * params.dt;

    agent_transform(agent, params.instance_scale)
}

/// Integration stage. The only writer of agent state and transforms.
pub fn integrate_all(
    agents: &mut [AgentState],
    forces: &[Vec3],
    hits: Option<&[Option<RayHit>]>,
    transforms: &mut [Mat4],
    params: &IntegrationParams,
) {
    assert_eq!(agents.len(), forces.len());
    assert_eq!(agents.len(), transforms.len());
    if let Some(hits) = hits {
        assert_eq!(agents.len(), hits.len());
    }

    agents
        .par_iter_mut()
        .zip(transforms.par_iter_mut())
        .enumerate()
        .for_each(|(i, (agent, transform))| {
            let hit = hits.and_then(|hits| hits[i]);
            *transform = integrate_agent(agent, forces[i], hit, params);
        });
}
