use glam::{IVec3, Quat, Vec3};

const PITCH_EPSILON: f32 = 1.0e-8;
const MIN_CELL: i32 = i32::MIN + 1;
const MAX_CELL: i32 = i32::MAX - 1;

/// Clamps the magnitude of `v` to `max`, leaving shorter vectors untouched.
pub fn limit(v: Vec3, max: f32) -> Vec3 {
    if max <= 0.0 {
        return Vec3::ZERO;
    }

    let mag_sq = v.length_squared();
    if mag_sq <= max * max {
        return v;
    }

    v * (max / mag_sq.sqrt())
}

/// Cell coordinate containing `position`. Floors per axis, so `-0.1` with a
/// scale of `1.0` lands in cell `-1`.
///
/// Indices are clamped one short of the `i32` range so the neighbor block
/// `index ± 1` never overflows; far-off agents share the outermost cells.
pub fn cell_index(position: Vec3, cell_scale: f32) -> IVec3 {
    (position / cell_scale)
        .floor()
        .as_ivec3()
        .clamp(IVec3::splat(MIN_CELL), IVec3::splat(MAX_CELL))
}

/// True when the cell box at `cell` lies within `cell_scale` of `point`.
pub fn cell_sphere_overlap(point: Vec3, cell: IVec3, cell_scale: f32) -> bool {
    let cell_min = cell.as_vec3() * cell_scale;
    let cell_max = cell_min + Vec3::splat(cell_scale);
    let closest = point.clamp(cell_min, cell_max);

    point.distance_squared(closest) <= cell_scale * cell_scale
}

/// Rotates `v` around `axis` by `angle_radians`. The axis must not be zero.
pub fn rotate_about_axis(v: Vec3, axis: Vec3, angle_radians: f32) -> Vec3 {
    Quat::from_axis_angle(axis.normalize(), angle_radians) * v
}

/// Yaw around +Y and pitch around +X that point local +Z along `velocity`.
/// A stationary agent yields `(0.0, 0.0)` rather than NaN.
pub fn heading_angles(velocity: Vec3) -> (f32, f32) {
    let yaw = velocity.x.atan2(velocity.z);
    let sin_pitch = (velocity.y / (velocity.length() + PITCH_EPSILON)).clamp(-1.0, 1.0);
    (yaw, -sin_pitch.asin())
}
