use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::math::cell_index;
use crate::state::AgentState;

const INVALID_INDEX: u32 = u32::MAX;
const SHARD_COUNT: usize = 64;
const MIN_CELL_SCALE: f32 = 1.0e-6;

/// Multi-map from integer cell coordinate to the agents inside it.
///
/// Each cell keeps the index of its most recently inserted agent as the list
/// head; `next[agent]` links to the agent inserted before it. Inserts write
/// heads into sharded maps, so they only contend when two cells hash to the
/// same shard. [`seal`](Self::seal) then moves the heads into one plain map
/// that queries read without locking. An agent owns its `next` slot and is
/// inserted at most once between clears.
pub struct SpatialHashGrid {
    cell_scale: f32,
    shards: Vec<Mutex<HashMap<IVec3, u32>>>,
    cells: HashMap<IVec3, u32>,
    next: Vec<AtomicU32>,
}

impl SpatialHashGrid {
    pub fn new(capacity: usize, cell_scale: f32) -> Self {
        let per_shard = capacity / SHARD_COUNT + 1;
        Self {
            cell_scale: cell_scale.max(MIN_CELL_SCALE),
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::with_capacity(per_shard)))
                .collect(),
            cells: HashMap::with_capacity(capacity),
            next: (0..capacity).map(|_| AtomicU32::new(INVALID_INDEX)).collect(),
        }
    }

    pub fn cell_scale(&self) -> f32 {
        self.cell_scale
    }

    pub fn capacity(&self) -> usize {
        self.next.len()
    }

    /// Drops every cell entry. Map capacity is retained for the next build.
    pub fn clear(&mut self) {
        for shard in &mut self.shards {
            shard
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        self.cells.clear();
    }

    /// Registers `agent` in `cell`. Safe to call from many threads at once as
    /// long as each agent is inserted by exactly one caller. Not visible to
    /// queries until the next [`seal`](Self::seal).
    pub fn insert(&self, cell: IVec3, agent: usize) {
        let agent_index = agent as u32;
        let mut heads = self.lock_shard(cell);
        let previous = heads
            .insert(cell, agent_index)
            .or_else(|| self.cells.get(&cell).copied())
            .unwrap_or(INVALID_INDEX);
        self.next[agent].store(previous, Ordering::Relaxed);
    }

    /// Publishes pending inserts to the lock-free read side.
    pub fn seal(&mut self) {
        for shard in &mut self.shards {
            let pending = shard.get_mut().unwrap_or_else(PoisonError::into_inner);
            self.cells.extend(pending.drain());
        }
    }

    /// Parallel fan-out: every agent files itself under the cell of its
    /// current position, then the heads are sealed for reading.
    pub fn build(&mut self, agents: &[AgentState]) {
        assert!(
            agents.len() <= self.capacity(),
            "grid sized for {} agents, got {}",
            self.capacity(),
            agents.len()
        );

        let cell_scale = self.cell_scale;
        let grid = &*self;
        agents.par_iter().enumerate().for_each(|(i, agent)| {
            grid.insert(cell_index(agent.position, cell_scale), i);
        });
        self.seal();
    }

    pub fn rebuild(&mut self, agents: &[AgentState]) {
        self.clear();
        self.build(agents);
    }

    /// Agents registered in exactly `cell` as of the last seal, in no
    /// particular order.
    pub fn query_cell(&self, cell: IVec3) -> CellAgents<'_> {
        let head = self.cells.get(&cell).copied().unwrap_or(INVALID_INDEX);
        CellAgents {
            next: &self.next,
            cursor: head,
        }
    }

    /// Visits every agent in the 3x3x3 block of cells around `position`.
    pub fn for_each_in_neighborhood<F>(&self, position: Vec3, mut visit: F)
    where
        F: FnMut(usize),
    {
        let center = cell_index(position, self.cell_scale);
        for x in center.x - 1..=center.x + 1 {
            for y in center.y - 1..=center.y + 1 {
                for z in center.z - 1..=center.z + 1 {
                    for agent in self.query_cell(IVec3::new(x, y, z)) {
                        visit(agent);
                    }
                }
            }
        }
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    fn lock_shard(&self, cell: IVec3) -> MutexGuard<'_, HashMap<IVec3, u32>> {
        self.shards[shard_of(cell)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CellAgents<'a> {
    next: &'a [AtomicU32],
    cursor: u32,
}

impl Iterator for CellAgents<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cursor == INVALID_INDEX {
            return None;
        }
        let current = self.cursor as usize;
        self.cursor = self.next[current].load(Ordering::Relaxed);
        Some(current)
    }
}

fn shard_of(cell: IVec3) -> usize {
    let hash = (cell.x as u32).wrapping_mul(73_856_093)
        ^ (cell.y as u32).wrapping_mul(19_349_663)
        ^ (cell.z as u32).wrapping_mul(83_492_791);
    hash as usize % SHARD_COUNT
}

#[cfg(test)]
mod tests {
    use super::SpatialHashGrid;
    use crate::state::AgentState;
    use glam::{IVec3, Vec3};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rayon::prelude::*;

    fn agents_at(points: &[Vec3]) -> Vec<AgentState> {
        points
            .iter()
            .map(|&p| AgentState::new(p, Vec3::ZERO))
            .collect()
    }

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    #[test]
    fn query_returns_agents_of_exact_cell() {
        let agents = agents_at(&[
            Vec3::new(0.2, 0.2, 0.2),
            Vec3::new(0.8, 0.1, 0.5),
            Vec3::new(1.2, 0.2, 0.2),
            Vec3::new(-0.1, 0.2, 0.2),
        ]);
        let mut grid = SpatialHashGrid::new(agents.len(), 1.0);
        grid.rebuild(&agents);

        assert_eq!(sorted(grid.query_cell(IVec3::ZERO).collect()), vec![0, 1]);
        assert_eq!(sorted(grid.query_cell(IVec3::new(1, 0, 0)).collect()), vec![2]);
        assert_eq!(sorted(grid.query_cell(IVec3::new(-1, 0, 0)).collect()), vec![3]);
        assert_eq!(grid.query_cell(IVec3::new(5, 5, 5)).count(), 0);
        assert_eq!(grid.occupied_cells(), 3);
    }

    #[test]
    fn clear_drops_stale_entries() {
        let mut grid = SpatialHashGrid::new(2, 1.0);
        grid.rebuild(&agents_at(&[Vec3::ZERO, Vec3::splat(3.5)]));
        grid.rebuild(&agents_at(&[Vec3::splat(3.5), Vec3::splat(3.5)]));

        assert_eq!(grid.query_cell(IVec3::ZERO).count(), 0);
        assert_eq!(sorted(grid.query_cell(IVec3::splat(3)).collect()), vec![0, 1]);

        grid.clear();
        assert_eq!(grid.occupied_cells(), 0);
    }

    #[test]
    fn concurrent_inserts_into_one_cell_keep_every_agent() {
        let count = 10_000;
        let mut grid = SpatialHashGrid::new(count, 1.0);
        (0..count)
            .into_par_iter()
            .for_each(|i| grid.insert(IVec3::new(2, -3, 4), i));
        assert_eq!(grid.query_cell(IVec3::new(2, -3, 4)).count(), 0);
        grid.seal();

        let found = sorted(grid.query_cell(IVec3::new(2, -3, 4)).collect());
        assert_eq!(found, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn inserts_after_seal_extend_existing_cells() {
        let mut grid = SpatialHashGrid::new(3, 1.0);
        grid.insert(IVec3::ONE, 0);
        grid.seal();
        grid.insert(IVec3::ONE, 1);
        grid.insert(IVec3::ONE, 2);
        grid.seal();

        assert_eq!(sorted(grid.query_cell(IVec3::ONE).collect()), vec![0, 1, 2]);
        assert_eq!(grid.occupied_cells(), 1);
    }

    #[test]
    fn far_away_agents_are_still_found() {
        let agents = agents_at(&[
            Vec3::new(1.0e10, 0.0, 0.0),
            Vec3::new(1.0e10, 0.5, 0.0),
            Vec3::new(-1.0e10, 0.0, 0.0),
        ]);
        let mut grid = SpatialHashGrid::new(agents.len(), 1.0);
        grid.rebuild(&agents);

        let mut near_positive = Vec::new();
        grid.for_each_in_neighborhood(agents[0].position, |j| near_positive.push(j));
        assert_eq!(sorted(near_positive), vec![0, 1]);

        let mut near_negative = Vec::new();
        grid.for_each_in_neighborhood(agents[2].position, |j| near_negative.push(j));
        assert_eq!(near_negative, vec![2]);
    }

    #[test]
    fn neighborhood_scan_matches_brute_force() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let points: Vec<Vec3> = (0..800)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-6.0..6.0),
                    rng.gen_range(-6.0..6.0),
                    rng.gen_range(-6.0..6.0),
                )
            })
            .collect();
        let agents = agents_at(&points);

        for (radius, cell_scale) in [(1.0_f32, 1.0_f32), (0.6, 1.0), (1.5, 2.25)] {
            let mut grid = SpatialHashGrid::new(agents.len(), cell_scale);
            grid.rebuild(&agents);
            let radius_sq = radius * radius;

            for (i, origin) in points.iter().enumerate() {
                let mut via_grid = Vec::new();
                grid.for_each_in_neighborhood(*origin, |j| {
                    if j != i && points[j].distance_squared(*origin) <= radius_sq {
                        via_grid.push(j);
                    }
                });

                let brute: Vec<usize> = (0..points.len())
                    .filter(|&j| j != i && points[j].distance_squared(*origin) <= radius_sq)
                    .collect();

                assert_eq!(sorted(via_grid), brute, "agent {i} radius {radius}");
            }
        }
    }
}
