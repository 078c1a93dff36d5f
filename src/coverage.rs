//! How many cells of the 3x3x3 query block a neighbor sphere actually reaches.
//! Used to sanity-check the grid cell scale, not on the frame path.

use glam::{IVec3, Vec3};
use rand::Rng;

use crate::math::{cell_index, cell_sphere_overlap};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverageStats {
    pub samples: usize,
    pub average: f32,
    pub median: f32,
}

/// Cells in the block around `center`'s cell that a sphere of radius
/// `cell_scale` at `center` overlaps.
pub fn overlapping_cells(center: Vec3, cell_scale: f32) -> usize {
    let home = cell_index(center, cell_scale);
    let mut count = 0;

    for x in -1..=1 {
        for y in -1..=1 {
            for z in -1..=1 {
                if cell_sphere_overlap(center, home + IVec3::new(x, y, z), cell_scale) {
                    count += 1;
                }
            }
        }
    }

    count
}

/// Samples sphere centers uniformly inside one cell and summarizes the
/// overlap counts. Returns `None` for zero samples.
pub fn sample_coverage<R: Rng>(cell_scale: f32, samples: usize, rng: &mut R) -> Option<CoverageStats> {
    if samples == 0 || cell_scale <= 0.0 {
        return None;
    }

    let mut counts: Vec<usize> = (0..samples)
        .map(|_| {
            let center = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()) * cell_scale;
            overlapping_cells(center, cell_scale)
        })
        .collect();
    counts.sort_unstable();

    let average = counts.iter().sum::<usize>() as f32 / samples as f32;
    let mid = samples / 2;
    let median = if samples % 2 == 0 {
        (counts[mid - 1] + counts[mid]) as f32 / 2.0
    } else {
        counts[mid] as f32
    };

    Some(CoverageStats {
        samples,
        average,
        median,
    })
}

#[cfg(test)]
mod tests {
    use super::{overlapping_cells, sample_coverage};
    use glam::Vec3;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn cell_center_reaches_whole_block() {
        // Farthest block corner is sqrt(0.75) away, inside a unit radius.
        assert_eq!(overlapping_cells(Vec3::splat(0.5), 1.0), 27);
    }

    #[test]
    fn corner_point_misses_cells_two_steps_away() {
        // From the origin, cells with two or more axes at +1 are over a unit
        // away: 8 cells touch the corner, 12 more share a face with them.
        assert_eq!(overlapping_cells(Vec3::ZERO, 1.0), 20);
    }

    #[test]
    fn sampled_statistics_stay_within_block() {
        let mut rng = SmallRng::seed_from_u64(42);
        let stats = sample_coverage(2.0, 101, &mut rng).expect("samples > 0");

        assert_eq!(stats.samples, 101);
        assert!(stats.average >= 7.0 && stats.average <= 27.0);
        assert!(stats.median >= 7.0 && stats.median <= 27.0);
    }

    #[test]
    fn zero_samples_yield_nothing() {
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(sample_coverage(1.0, 0, &mut rng).is_none());
    }
}
