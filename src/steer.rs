use glam::Vec3;
use rayon::prelude::*;

use crate::config::{BehaviorProfile, BehaviorRule};
use crate::grid::SpatialHashGrid;
use crate::math::limit;
use crate::state::AgentState;

/// Running sums for cohesion, separation and alignment around one agent.
/// Accumulation is order-insensitive, so cell iteration order does not matter.
#[derive(Clone, Copy, Debug, Default)]
struct FlockingSums {
    cohesion_positions: Vec3,
    cohesion_count: u32,
    separation_repulse: Vec3,
    separation_count: u32,
    alignment_velocities: Vec3,
    alignment_count: u32,
}

impl FlockingSums {
    /// Folds `other` into the sums. Returns whether any behavior accepted it.
    #[inline]
    fn observe(
        &mut self,
        own: &AgentState,
        heading: Option<Vec3>,
        other: &AgentState,
        profile: &BehaviorProfile,
    ) -> bool {
        let to_target = other.position - own.position;
        let Some(direction) = to_target.try_normalize() else {
            // Coincident agents have no direction to steer along.
            return false;
        };
        let distance_sq = to_target.length_squared();
        let dot = heading.map_or(1.0, |forward| forward.dot(direction));
        let mut accepted = false;

        if profile.cohesion.accepts(distance_sq, dot) {
            self.cohesion_positions += other.position;
            self.cohesion_count += 1;
            accepted = true;
        }

        if profile.separation.accepts(distance_sq, dot) {
            self.separation_repulse += -direction / distance_sq.sqrt();
            self.separation_count += 1;
            accepted = true;
        }

        if profile.alignment.accepts(distance_sq, dot) {
            self.alignment_velocities += other.velocity;
            self.alignment_count += 1;
            accepted = true;
        }

        accepted
    }

    fn finish(&self, own: &AgentState, profile: &BehaviorProfile) -> Vec3 {
        let cohesion = if self.cohesion_count > 0 {
            let center = self.cohesion_positions / self.cohesion_count as f32;
            steer_towards(center - own.position, own.velocity, profile)
        } else {
            Vec3::ZERO
        };

        let separation = if self.separation_count > 0 {
            let repulse = self.separation_repulse / self.separation_count as f32;
            steer_towards(repulse, own.velocity, profile)
        } else {
            Vec3::ZERO
        };

        let alignment = if self.alignment_count > 0 {
            let heading = self.alignment_velocities / self.alignment_count as f32;
            steer_towards(heading, own.velocity, profile)
        } else {
            Vec3::ZERO
        };

        weighted(cohesion, &profile.cohesion)
            + weighted(separation, &profile.separation)
            + weighted(alignment, &profile.alignment)
    }
}

fn steer_towards(direction: Vec3, velocity: Vec3, profile: &BehaviorProfile) -> Vec3 {
    let desired = direction.normalize_or_zero() * profile.max_speed;
    limit(desired - velocity, profile.max_steer_force)
}

#[inline]
fn weighted(steer: Vec3, rule: &BehaviorRule) -> Vec3 {
    steer * rule.weight
}

/// Steering force for agent `i` from the 27 cells around it. Returns the
/// force and how many neighbors any behavior accepted.
pub fn steer_force_from_grid(
    i: usize,
    agents: &[AgentState],
    grid: &SpatialHashGrid,
    profile: &BehaviorProfile,
) -> (Vec3, usize) {
    let own = &agents[i];
    let heading = own.velocity.try_normalize();
    let mut sums = FlockingSums::default();
    let mut accepted = 0usize;

    grid.for_each_in_neighborhood(own.position, |j| {
        if j != i && sums.observe(own, heading, &agents[j], profile) {
            accepted += 1;
        }
    });

    (sums.finish(own, profile), accepted)
}

/// Same as [`steer_force_from_grid`] but scans the whole population.
pub fn steer_force_all_pairs(
    i: usize,
    agents: &[AgentState],
    profile: &BehaviorProfile,
) -> (Vec3, usize) {
    let own = &agents[i];
    let heading = own.velocity.try_normalize();
    let mut sums = FlockingSums::default();
    let mut accepted = 0usize;

    for (j, other) in agents.iter().enumerate() {
        if j != i && sums.observe(own, heading, other, profile) {
            accepted += 1;
        }
    }

    (sums.finish(own, profile), accepted)
}

/// Writes one steering force per agent. With `grid == None` every pair is
/// examined. Returns the total number of accepted neighbor pairs.
pub fn compute_steer_forces(
    agents: &[AgentState],
    grid: Option<&SpatialHashGrid>,
    profile: &BehaviorProfile,
    forces: &mut [Vec3],
) -> usize {
    assert_eq!(agents.len(), forces.len());

    forces
        .par_iter_mut()
        .enumerate()
        .map(|(i, force)| {
            let (steer, accepted) = match grid {
                Some(grid) => steer_force_from_grid(i, agents, grid, profile),
                None => steer_force_all_pairs(i, agents, profile),
            };
            *force = steer;
            accepted
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::{compute_steer_forces, steer_force_all_pairs, steer_force_from_grid};
    use crate::config::{BehaviorProfile, FlockConfig};
    use crate::grid::SpatialHashGrid;
    use crate::state::AgentState;
    use glam::Vec3;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn profile(config: FlockConfig) -> BehaviorProfile {
        BehaviorProfile::from_config(&config)
    }

    fn grid_for(agents: &[AgentState], profile: &BehaviorProfile) -> SpatialHashGrid {
        let mut grid = SpatialHashGrid::new(agents.len(), profile.grid_scale);
        grid.rebuild(agents);
        grid
    }

    #[test]
    fn isolated_agent_feels_no_force() {
        let profile = profile(FlockConfig::default());
        let agents = vec![
            AgentState::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)),
            AgentState::new(Vec3::splat(50.0), Vec3::new(0.0, 1.0, 0.0)),
        ];
        let grid = grid_for(&agents, &profile);

        let (force, accepted) = steer_force_from_grid(0, &agents, &grid, &profile);
        assert_eq!(force, Vec3::ZERO);
        assert_eq!(accepted, 0);
    }

    #[test]
    fn symmetric_pair_separates_along_joining_line() {
        let profile = profile(FlockConfig {
            cohesion_weight: 0.0,
            separation_weight: 1.0,
            alignment_weight: 0.0,
            ..FlockConfig::default()
        });
        let agents = vec![
            AgentState::new(Vec3::new(-0.25, 0.0, 0.0), Vec3::ZERO),
            AgentState::new(Vec3::new(0.25, 0.0, 0.0), Vec3::ZERO),
        ];
        let grid = grid_for(&agents, &profile);

        let (left, _) = steer_force_from_grid(0, &agents, &grid, &profile);
        let (right, _) = steer_force_from_grid(1, &agents, &grid, &profile);

        assert!((left + right).length() < 1.0e-6);
        assert!(left.x < 0.0 && right.x > 0.0);
        assert!(left.y.abs() < 1.0e-6 && left.z.abs() < 1.0e-6);
        assert!((left.length() - profile.max_steer_force).abs() < 1.0e-5);
    }

    #[test]
    fn symmetric_pair_cohesion_pulls_together() {
        let profile = profile(FlockConfig {
            cohesion_weight: 1.0,
            separation_weight: 0.0,
            alignment_weight: 0.0,
            ..FlockConfig::default()
        });
        let agents = vec![
            AgentState::new(Vec3::new(0.0, -0.5, 0.0), Vec3::ZERO),
            AgentState::new(Vec3::new(0.0, 0.5, 0.0), Vec3::ZERO),
        ];

        let (bottom, _) = steer_force_all_pairs(0, &agents, &profile);
        let (top, _) = steer_force_all_pairs(1, &agents, &profile);
        assert!(bottom.y > 0.0 && top.y < 0.0);
        assert!((bottom + top).length() < 1.0e-6);
    }

    #[test]
    fn view_cone_hides_agents_behind() {
        let profile = profile(FlockConfig {
            cohesion_view_angle_deg: 90.0,
            separation_view_angle_deg: 90.0,
            alignment_view_angle_deg: 90.0,
            ..FlockConfig::default()
        });
        let agents = vec![
            AgentState::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)),
            AgentState::new(Vec3::new(0.0, 0.0, -0.5), Vec3::new(0.0, 0.0, 1.0)),
        ];

        let (force, accepted) = steer_force_all_pairs(0, &agents, &profile);
        assert_eq!(accepted, 0);
        assert_eq!(force, Vec3::ZERO);

        let (_, accepted) = steer_force_all_pairs(1, &agents, &profile);
        assert_eq!(accepted, 1);
    }

    #[test]
    fn coincident_agents_do_not_produce_nan() {
        let profile = profile(FlockConfig::default());
        let agents = vec![
            AgentState::new(Vec3::ONE, Vec3::ZERO),
            AgentState::new(Vec3::ONE, Vec3::ZERO),
        ];
        let (force, accepted) = steer_force_all_pairs(0, &agents, &profile);
        assert!(force.is_finite());
        assert_eq!(accepted, 0);
    }

    #[test]
    fn grid_and_all_pairs_agree() {
        let profile = profile(FlockConfig::default());
        let mut rng = SmallRng::seed_from_u64(11);
        let agents: Vec<AgentState> = (0..400)
            .map(|_| {
                AgentState::new(
                    Vec3::new(
                        rng.gen_range(-8.0..8.0),
                        rng.gen_range(-8.0..8.0),
                        rng.gen_range(-8.0..8.0),
                    ),
                    Vec3::new(
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                    ),
                )
            })
            .collect();
        let grid = grid_for(&agents, &profile);

        let mut via_grid = vec![Vec3::ZERO; agents.len()];
        let mut via_pairs = vec![Vec3::ZERO; agents.len()];
        let grid_pairs = compute_steer_forces(&agents, Some(&grid), &profile, &mut via_grid);
        let all_pairs = compute_steer_forces(&agents, None, &profile, &mut via_pairs);

        assert_eq!(grid_pairs, all_pairs);
        for (a, b) in via_grid.iter().zip(&via_pairs) {
            assert!((*a - *b).length() < 1.0e-4);
        }
    }
}
