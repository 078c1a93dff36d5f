use glam::Vec3;
use rayon::prelude::*;

use crate::state::AgentState;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RayQuery {
    pub origin: Vec3,
    /// Unit length, or zero for an agent without a heading.
    pub direction: Vec3,
    pub max_distance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub normal: Vec3,
}

/// Batched ray-intersection backend. `hits` is index-aligned with `queries`
/// and arrives filled with `None`; a backend only needs to write its hits.
pub trait RayCaster: Send + Sync {
    fn cast(&self, queries: &[RayQuery], hits: &mut [Option<RayHit>]);
}

/// One ray per agent from its position along its heading.
pub fn build_ray_queries(agents: &[AgentState], max_distance: f32, queries: &mut [RayQuery]) {
    assert_eq!(agents.len(), queries.len());

    queries
        .par_iter_mut()
        .zip(agents.par_iter())
        .for_each(|(query, agent)| {
            *query = RayQuery {
                origin: agent.position,
                direction: agent.velocity.normalize_or_zero(),
                max_distance,
            };
        });
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Obstacle {
    Sphere { center: Vec3, radius: f32 },
    Box { min: Vec3, max: Vec3 },
}

impl Obstacle {
    /// Entry hit along the ray. Rays starting inside the obstacle miss it.
    fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        match *self {
            Obstacle::Sphere { center, radius } => intersect_sphere(origin, direction, center, radius),
            Obstacle::Box { min, max } => intersect_box(origin, direction, min, max),
        }
    }
}

/// Software ray caster over a flat list of spheres and axis-aligned boxes.
#[derive(Clone, Debug, Default)]
pub struct ObstacleScene {
    obstacles: Vec<Obstacle>,
}

impl ObstacleScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sphere(mut self, center: Vec3, radius: f32) -> Self {
        self.obstacles.push(Obstacle::Sphere { center, radius });
        self
    }

    pub fn with_box(mut self, min: Vec3, max: Vec3) -> Self {
        self.obstacles.push(Obstacle::Box {
            min: min.min(max),
            max: min.max(max),
        });
        self
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn raycast(&self, query: &RayQuery) -> Option<RayHit> {
        if query.direction == Vec3::ZERO {
            return None;
        }

        self.obstacles
            .iter()
            .filter_map(|obstacle| obstacle.intersect(query.origin, query.direction))
            .filter(|hit| hit.distance <= query.max_distance)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

impl RayCaster for ObstacleScene {
    fn cast(&self, queries: &[RayQuery], hits: &mut [Option<RayHit>]) {
        assert_eq!(queries.len(), hits.len());

        hits.par_iter_mut()
            .zip(queries.par_iter())
            .for_each(|(hit, query)| *hit = self.raycast(query));
    }
}

fn intersect_sphere(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<RayHit> {
    let to_origin = origin - center;
    let c = to_origin.length_squared() - radius * radius;
    if c <= 0.0 {
        return None;
    }

    let b = to_origin.dot(direction);
    let discriminant = b * b - c;
    if b > 0.0 || discriminant < 0.0 {
        return None;
    }

    let distance = -b - discriminant.sqrt();
    let point = origin + direction * distance;
    Some(RayHit {
        distance,
        normal: (point - center).normalize_or_zero(),
    })
}

fn intersect_box(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<RayHit> {
    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    let mut normal = Vec3::ZERO;

    for axis in 0..3 {
        let o = origin[axis];
        let d = direction[axis];
        if d == 0.0 {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }

        let inv = 1.0 / d;
        let mut t0 = (min[axis] - o) * inv;
        let mut t1 = (max[axis] - o) * inv;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }

        if t0 > t_near {
            t_near = t0;
            normal = Vec3::ZERO;
            normal[axis] = -d.signum();
        }
        t_far = t_far.min(t1);
        if t_near > t_far {
            return None;
        }
    }

    if t_near < 0.0 {
        return None;
    }

    Some(RayHit {
        distance: t_near,
        normal,
    })
}
