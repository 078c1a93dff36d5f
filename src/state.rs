use std::f32::consts::TAU;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rand::Rng;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AgentState {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl AgentState {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }
}

/// Axis-aligned simulation volume. `extent` is the full edge length per axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationArea {
    pub center: Vec3,
    pub extent: Vec3,
}

impl SimulationArea {
    pub fn new(center: Vec3, extent: Vec3) -> Self {
        Self { center, extent }
    }

    pub fn half_extent(&self) -> Vec3 {
        self.extent * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let offset = (point - self.center).abs();
        offset.cmple(self.half_extent()).all()
    }
}

impl Default for SimulationArea {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::splat(20.0))
    }
}

/// Flat per-agent state, sized once for a fixed population.
#[derive(Clone, Debug)]
pub struct BoidStore {
    agents: Vec<AgentState>,
}

impl BoidStore {
    pub fn new(count: usize) -> Self {
        Self {
            agents: vec![AgentState::default(); count],
        }
    }

    pub fn from_agents(agents: Vec<AgentState>) -> Self {
        Self { agents }
    }

    /// Places every agent uniformly inside `area` with `speed` along a random
    /// heading.
    pub fn scatter<R: Rng>(&mut self, area: SimulationArea, speed: f32, rng: &mut R) {
        let half = area.half_extent();
        for agent in &mut self.agents {
            let offset = Vec3::new(
                sample_symmetric(rng, half.x),
                sample_symmetric(rng, half.y),
                sample_symmetric(rng, half.z),
            );
            agent.position = area.center + offset;
            agent.velocity = random_unit_vector(rng) * speed;
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [AgentState] {
        &mut self.agents
    }
}

fn sample_symmetric<R: Rng>(rng: &mut R, half: f32) -> f32 {
    if half <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-half..=half)
}

fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let azimuth: f32 = rng.gen_range(0.0..TAU);
    let ring = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(ring * azimuth.cos(), ring * azimuth.sin(), z)
}

#[cfg(test)]
mod tests {
    use super::{BoidStore, SimulationArea};
    use glam::Vec3;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn scatter_keeps_agents_inside_area_at_initial_speed() {
        let area = SimulationArea::new(Vec3::new(5.0, -2.0, 1.0), Vec3::new(10.0, 4.0, 6.0));
        let mut store = BoidStore::new(500);
        let mut rng = SmallRng::seed_from_u64(7);
        store.scatter(area, 3.0, &mut rng);

        for agent in store.agents() {
            assert!(area.contains(agent.position));
            assert!((agent.velocity.length() - 3.0).abs() < 1.0e-4);
        }
    }

    #[test]
    fn scatter_is_reproducible_per_seed() {
        let area = SimulationArea::default();
        let mut a = BoidStore::new(32);
        let mut b = BoidStore::new(32);
        a.scatter(area, 1.0, &mut SmallRng::seed_from_u64(99));
        b.scatter(area, 1.0, &mut SmallRng::seed_from_u64(99));
        assert_eq!(a.agents(), b.agents());
    }

    #[test]
    fn flat_area_axis_collapses_to_center() {
        let area = SimulationArea::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 4.0));
        let mut store = BoidStore::new(16);
        store.scatter(area, 1.0, &mut SmallRng::seed_from_u64(3));
        assert!(store.agents().iter().all(|a| a.position.y == 0.0));
    }
}
