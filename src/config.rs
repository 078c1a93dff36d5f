use std::f32::consts::PI;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{FlockError, Result};

pub const MIN_VIEW_ANGLE_DEG: f32 = 0.0;
pub const MAX_VIEW_ANGLE_DEG: f32 = 360.0;

/// How the steering stage finds candidate neighbors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSearch {
    /// 3x3x3 cell scan over the spatial hash grid.
    #[default]
    Grid,
    /// Every agent against every other agent, no grid.
    AllPairs,
}

/// Settings for the ray-cast obstacle avoidance variant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    pub ray_distance: f32,
    /// Radians per second the heading turns away from a hit surface.
    pub avoid_rotation_velocity: f32,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            ray_distance: 3.0,
            avoid_rotation_velocity: 4.0,
        }
    }
}

/// Per-simulation settings, loaded once before construction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockConfig {
    pub cohesion_weight: f32,
    pub cohesion_radius: f32,
    pub cohesion_view_angle_deg: f32,
    pub separation_weight: f32,
    pub separation_radius: f32,
    pub separation_view_angle_deg: f32,
    pub alignment_weight: f32,
    pub alignment_radius: f32,
    pub alignment_view_angle_deg: f32,
    pub boundary_avoid_weight: f32,
    pub instance_scale: Vec3,
    pub max_speed: f32,
    pub max_steer_force: f32,
    pub initial_speed: f32,
    pub neighbor_search: NeighborSearch,
    pub avoidance: Option<AvoidanceConfig>,
    pub seed: Option<u64>,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            cohesion_weight: 1.0,
            cohesion_radius: 2.0,
            cohesion_view_angle_deg: 270.0,
            separation_weight: 1.5,
            separation_radius: 1.0,
            separation_view_angle_deg: 270.0,
            alignment_weight: 1.0,
            alignment_radius: 2.0,
            alignment_view_angle_deg: 270.0,
            boundary_avoid_weight: 3.0,
            instance_scale: Vec3::new(0.2, 0.2, 0.4),
            max_speed: 5.0,
            max_steer_force: 0.5,
            initial_speed: 2.0,
            neighbor_search: NeighborSearch::Grid,
            avoidance: None,
            seed: None,
        }
    }
}

impl FlockConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let behaviors = [
            ("cohesion", self.cohesion_weight, self.cohesion_radius, self.cohesion_view_angle_deg),
            (
                "separation",
                self.separation_weight,
                self.separation_radius,
                self.separation_view_angle_deg,
            ),
            (
                "alignment",
                self.alignment_weight,
                self.alignment_radius,
                self.alignment_view_angle_deg,
            ),
        ];

        for (name, weight, radius, angle) in behaviors {
            require_finite(weight, name, "weight")?;
            require_non_negative(radius, name, "radius")?;
            if !(MIN_VIEW_ANGLE_DEG..=MAX_VIEW_ANGLE_DEG).contains(&angle) {
                return Err(FlockError::InvalidConfig(format!(
                    "{name} view angle {angle} must be within [{MIN_VIEW_ANGLE_DEG}, {MAX_VIEW_ANGLE_DEG}] degrees"
                )));
            }
        }

        if self.grid_scale() <= 0.0 {
            return Err(FlockError::InvalidConfig(
                "at least one behavior radius must be positive".to_string(),
            ));
        }

        require_finite(self.boundary_avoid_weight, "boundary", "weight")?;
        require_non_negative(self.max_speed, "agent", "max speed")?;
        require_non_negative(self.max_steer_force, "agent", "max steer force")?;
        require_non_negative(self.initial_speed, "agent", "initial speed")?;
        if !self.instance_scale.is_finite() {
            return Err(FlockError::InvalidConfig(
                "instance scale must be finite".to_string(),
            ));
        }

        if let Some(avoidance) = self.avoidance {
            require_non_negative(avoidance.ray_distance, "avoidance", "ray distance")?;
            require_finite(
                avoidance.avoid_rotation_velocity,
                "avoidance",
                "rotation velocity",
            )?;
        }

        Ok(())
    }

    /// Cell edge of the spatial hash: the widest behavior radius, so a 3x3x3
    /// block around an agent covers every radius.
    pub fn grid_scale(&self) -> f32 {
        self.cohesion_radius
            .max(self.separation_radius)
            .max(self.alignment_radius)
    }
}

/// Radius and view-cone filter for one of the three flocking behaviors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BehaviorRule {
    pub weight: f32,
    pub radius_sq: f32,
    pub view_dot: f32,
}

impl BehaviorRule {
    fn new(weight: f32, radius: f32, view_angle_deg: f32) -> Self {
        Self {
            weight,
            radius_sq: radius * radius,
            view_dot: view_dot(view_angle_deg),
        }
    }

    #[inline]
    pub fn accepts(&self, distance_sq: f32, dot: f32) -> bool {
        distance_sq <= self.radius_sq && dot >= self.view_dot
    }
}

/// Derived, immutable per-simulation parameters used on the hot path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BehaviorProfile {
    pub cohesion: BehaviorRule,
    pub separation: BehaviorRule,
    pub alignment: BehaviorRule,
    pub boundary_avoid_weight: f32,
    pub max_speed: f32,
    pub max_steer_force: f32,
    pub initial_speed: f32,
    pub instance_scale: Vec3,
    pub grid_scale: f32,
    pub neighbor_search: NeighborSearch,
    pub avoidance: Option<AvoidanceConfig>,
}

impl BehaviorProfile {
    pub fn from_config(config: &FlockConfig) -> Self {
        Self {
            cohesion: BehaviorRule::new(
                config.cohesion_weight,
                config.cohesion_radius,
                config.cohesion_view_angle_deg,
            ),
            separation: BehaviorRule::new(
                config.separation_weight,
                config.separation_radius,
                config.separation_view_angle_deg,
            ),
            alignment: BehaviorRule::new(
                config.alignment_weight,
                config.alignment_radius,
                config.alignment_view_angle_deg,
            ),
            boundary_avoid_weight: config.boundary_avoid_weight,
            max_speed: config.max_speed,
            max_steer_force: config.max_steer_force,
            initial_speed: config.initial_speed,
            instance_scale: config.instance_scale,
            grid_scale: config.grid_scale(),
            neighbor_search: config.neighbor_search,
            avoidance: config.avoidance,
        }
    }
}

/// Converts a configured view angle to the minimum forward dot product.
///
/// The angle is divided by 360 rather than 180: the configured value is the
/// full cone width, so 360 degrees maps to `cos(PI) == -1` (no restriction).
pub fn view_dot(view_angle_deg: f32) -> f32 {
    (view_angle_deg * PI / 360.0).cos()
}

fn require_finite(value: f32, owner: &str, field: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FlockError::InvalidConfig(format!(
            "{owner} {field} must be finite, got {value}"
        )))
    }
}

fn require_non_negative(value: f32, owner: &str, field: &str) -> Result<()> {
    require_finite(value, owner, field)?;
    if value < 0.0 {
        return Err(FlockError::InvalidConfig(format!(
            "{owner} {field} must not be negative, got {value}"
        )));
    }
    Ok(())
}
