//! Per-texel flocking kernels.
//!
//! These are the CPU forms of the two compute kernels in
//! `assets/shaders/flock_compute.wgsl`. Both read the previous state of
//! whole textures and produce one output texel, so they map one-to-one onto
//! a GPU invocation. Keep the two in step when changing either.

use std::f32::consts::TAU;

use bevy::prelude::*;
use bevy::render::render_resource::ShaderType;

use crate::config::ControlParameters;

/// Distances below this are treated as "same bird" and skipped
pub const KERNEL_EPSILON: f32 = 1e-4;

/// Uniform block shared by both kernels.
///
/// Field order matches `FlockUniforms` in the compute shader.
#[derive(ShaderType, Debug, Default, Clone, Copy, PartialEq)]
pub struct KernelUniforms {
    /// Predator in normalized pointer space; scaled by `bounds` in the kernel
    pub predator: Vec3,
    pub time: f32,
    pub delta: f32,
    pub separation_distance: f32,
    pub alignment_distance: f32,
    pub cohesion_distance: f32,
    pub freedom_factor: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    pub bounds: f32,
    pub speed_limit: f32,
    pub predator_radius: f32,
    pub predator_strength: f32,
    pub predator_speed_boost: f32,
    pub wall_margin: f32,
    pub wall_strength: f32,
}

impl KernelUniforms {
    pub fn new(controls: &ControlParameters, bounds: f32) -> Self {
        Self {
            predator: Vec3::ZERO,
            time: 0.0,
            delta: 0.0,
            separation_distance: controls.separation_distance,
            alignment_distance: controls.alignment_distance,
            cohesion_distance: controls.cohesion_distance,
            freedom_factor: controls.freedom_factor,
            separation_weight: controls.separation_weight,
            alignment_weight: controls.alignment_weight,
            cohesion_weight: controls.cohesion_weight,
            bounds,
            speed_limit: controls.speed_limit,
            predator_radius: controls.predator_radius,
            predator_strength: controls.predator_strength,
            predator_speed_boost: controls.predator_speed_boost,
            wall_margin: controls.wall_margin,
            wall_strength: controls.wall_strength,
        }
    }

    /// Upper bound on speed after any velocity pass
    pub fn max_speed_fleeing(&self) -> f32 {
        self.speed_limit + self.predator_speed_boost
    }
}

#[inline]
fn safe_normalize(v: Vec3) -> Vec3 {
    let length = v.length();
    if length > KERNEL_EPSILON {
        v / length
    } else {
        Vec3::ZERO
    }
}

/// Repulsion from the predator. Returns the velocity change and whether the
/// bird is fleeing.
pub fn predator_response(position: Vec3, uniforms: &KernelUniforms) -> (Vec3, bool) {
    let mut dir = uniforms.predator * uniforms.bounds - position;
    dir.z = 0.0;
    let dist = dir.length();
    if dist >= uniforms.predator_radius {
        return (Vec3::ZERO, false);
    }

    let radius_sq = uniforms.predator_radius * uniforms.predator_radius;
    // Negative inside the radius, so the push points away from the predator
    let f = (dist * dist / radius_sq - 1.0) * uniforms.delta * uniforms.predator_strength;
    (safe_normalize(dir) * f, true)
}

/// Separation, alignment and cohesion steering for the bird at `self_index`
pub fn flocking_steer(
    self_index: usize,
    positions: &[Vec4],
    velocities: &[Vec4],
    uniforms: &KernelUniforms,
) -> Vec3 {
    let self_position = positions[self_index].truncate();

    let zone_radius = (uniforms.separation_distance
        + uniforms.alignment_distance
        + uniforms.cohesion_distance)
        .max(KERNEL_EPSILON);
    let zone_radius_sq = zone_radius * zone_radius;
    let separation_thresh = uniforms.separation_distance / zone_radius;
    let alignment_thresh =
        (uniforms.separation_distance + uniforms.alignment_distance) / zone_radius;

    let mut steer = Vec3::ZERO;
    for (other_position, other_velocity) in positions.iter().zip(velocities) {
        let dir = other_position.truncate() - self_position;
        let dist = dir.length();
        if dist < KERNEL_EPSILON {
            continue;
        }
        let dist_sq = dist * dist;
        if dist_sq > zone_radius_sq {
            continue;
        }

        let heading = dir / dist;
        let percent = dist_sq / zone_radius_sq;
        if percent < separation_thresh {
            let f = (separation_thresh / percent - 1.0) * uniforms.delta;
            steer -= heading * f * uniforms.separation_weight;
        } else if percent < alignment_thresh {
            let span = (alignment_thresh - separation_thresh).max(KERNEL_EPSILON);
            let adjusted = (percent - separation_thresh) / span;
            let f = (0.5 - (adjusted * TAU).cos() * 0.5 + 0.5) * uniforms.delta;
            steer += safe_normalize(other_velocity.truncate()) * f * uniforms.alignment_weight;
        } else {
            let span = 1.0 - alignment_thresh;
            let adjusted = if span < KERNEL_EPSILON {
                1.0
            } else {
                (percent - alignment_thresh) / span
            };
            let f = (0.5 - ((adjusted * TAU).cos() * -0.5 + 0.5)) * uniforms.delta;
            steer += heading * f * uniforms.cohesion_weight;
        }
    }
    steer
}

/// Push back toward the origin on any axis past the wall margin.
///
/// Zero for birds inside `wall_margin * bounds / 2` on every axis.
pub fn soft_wall(position: Vec3, uniforms: &KernelUniforms) -> Vec3 {
    let half = uniforms.bounds * 0.5;
    let wall_start = half * uniforms.wall_margin;
    let depth = (half - wall_start).max(KERNEL_EPSILON);

    let excess = (position.abs() - Vec3::splat(wall_start)).max(Vec3::ZERO);
    -position.signum() * (excess / depth) * uniforms.wall_strength * uniforms.delta
}

/// Next velocity of the bird at `index`
pub fn velocity_kernel(
    index: usize,
    positions: &[Vec4],
    velocities: &[Vec4],
    uniforms: &KernelUniforms,
) -> Vec4 {
    let position = positions[index].truncate();
    let mut velocity = velocities[index].truncate();
    let mut limit = uniforms.speed_limit;

    let (flee, fleeing) = predator_response(position, uniforms);
    velocity += flee;
    if fleeing {
        limit += uniforms.predator_speed_boost;
    }

    velocity += flocking_steer(index, positions, velocities, uniforms) * uniforms.freedom_factor;
    velocity += soft_wall(position, uniforms);

    let speed = velocity.length();
    if speed > limit {
        velocity *= limit / speed;
    }
    if !velocity.is_finite() {
        velocity = Vec3::ZERO;
    }
    velocity.extend(1.0)
}

/// Next position of the bird at `index`: plain Euler integration
pub fn position_kernel(
    index: usize,
    positions: &[Vec4],
    velocities: &[Vec4],
    uniforms: &KernelUniforms,
) -> Vec4 {
    let current = positions[index];
    (current.truncate() + velocities[index].truncate() * uniforms.delta).extend(current.w)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniforms(delta: f32) -> KernelUniforms {
        let mut uniforms = KernelUniforms::new(&ControlParameters::default(), 800.0);
        uniforms.delta = delta;
        // Park the predator far outside the world
        uniforms.predator = Vec3::new(100.0, 100.0, 0.0);
        uniforms
    }

    fn single(position: Vec3, velocity: Vec3) -> (Vec<Vec4>, Vec<Vec4>) {
        (vec![position.extend(1.0)], vec![velocity.extend(1.0)])
    }

    #[test]
    fn test_position_advances_by_velocity_times_delta() {
        let (positions, velocities) = single(Vec3::new(3.0, 4.0, 5.0), Vec3::X);
        let next = position_kernel(0, &positions, &velocities, &uniforms(1.0));
        assert_eq!(next.truncate(), Vec3::new(4.0, 4.0, 5.0));
        assert_eq!(next.w, 1.0);
    }

    #[test]
    fn test_extreme_velocity_clamped_in_one_pass() {
        let u = uniforms(0.016);
        let (positions, velocities) = single(Vec3::ZERO, Vec3::new(1000.0, 0.0, 0.0));
        let next = velocity_kernel(0, &positions, &velocities, &u).truncate();
        assert!(next.length() <= u.speed_limit + 1e-4);
        assert!(next.x > 0.0);
    }

    #[test]
    fn test_speed_never_exceeds_fleeing_limit() {
        let mut u = uniforms(1.0);
        u.predator = Vec3::new(0.01, 0.0, 0.0);
        let positions: Vec<Vec4> = (0..16)
            .map(|i| Vec4::new(i as f32 * 3.0 - 20.0, (i % 4) as f32, 0.0, 1.0))
            .collect();
        let velocities: Vec<Vec4> = (0..16)
            .map(|i| Vec4::new(500.0 - i as f32 * 70.0, 80.0, -300.0, 1.0))
            .collect();
        for i in 0..positions.len() {
            let next = velocity_kernel(i, &positions, &velocities, &u).truncate();
            assert!(next.length() <= u.max_speed_fleeing() + 1e-3);
            assert!(next.is_finite());
        }
    }

    #[test]
    fn test_soft_wall_pushes_back_near_boundary() {
        let u = uniforms(0.1);
        let velocity = Vec3::new(2.0, 0.0, 0.0);
        let (positions, velocities) = single(Vec3::new(400.0 - 0.01, 0.0, 0.0), velocity);
        let next = velocity_kernel(0, &positions, &velocities, &u).truncate();
        let correction = next - velocity;
        assert!(correction.x < 0.0);
        assert_eq!(correction.y, 0.0);
    }

    #[test]
    fn test_soft_wall_inactive_inside_bounds() {
        let u = uniforms(0.1);
        let velocity = Vec3::new(2.0, 0.0, 0.0);
        let (positions, velocities) = single(Vec3::new(10.0, -50.0, 100.0), velocity);
        let next = velocity_kernel(0, &positions, &velocities, &u).truncate();
        assert_eq!(next, velocity);
    }

    #[test]
    fn test_predator_repels_nearby_bird() {
        let mut u = uniforms(0.1);
        // Predator sits 50 units along +x from the bird
        u.predator = Vec3::new(50.0 / u.bounds, 0.0, 0.0);
        let (positions, velocities) = single(Vec3::ZERO, Vec3::ZERO);
        let next = velocity_kernel(0, &positions, &velocities, &u).truncate();
        assert!(next.x < 0.0);
    }

    #[test]
    fn test_distant_predator_has_no_effect() {
        let u = uniforms(0.1);
        let velocity = Vec3::new(1.0, 1.0, 0.0);
        let (positions, velocities) = single(Vec3::ZERO, velocity);
        let (flee, fleeing) = predator_response(Vec3::ZERO, &u);
        assert_eq!(flee, Vec3::ZERO);
        assert!(!fleeing);
        let next = velocity_kernel(0, &positions, &velocities, &u).truncate();
        assert_eq!(next, velocity);
    }

    #[test]
    fn test_close_neighbours_separate() {
        let u = uniforms(0.1);
        let positions = vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(1.0, 0.0, 0.0, 1.0)];
        let velocities = vec![Vec4::ZERO, Vec4::ZERO];
        let steer = flocking_steer(0, &positions, &velocities, &u);
        assert!(steer.x < 0.0);
    }

    #[test]
    fn test_coincident_birds_stay_finite() {
        let u = uniforms(0.1);
        let positions = vec![Vec4::new(5.0, 5.0, 5.0, 1.0); 4];
        let velocities = vec![Vec4::ZERO; 4];
        let next = velocity_kernel(0, &positions, &velocities, &u);
        assert!(next.is_finite());
    }

    #[test]
    fn test_zero_freedom_ignores_neighbours() {
        let mut u = uniforms(0.1);
        u.freedom_factor = 0.0;
        let positions = vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(1.0, 0.0, 0.0, 1.0)];
        let velocities = vec![Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::ZERO];
        let next = velocity_kernel(0, &positions, &velocities, &u);
        assert_eq!(next.truncate(), Vec3::X);
    }
}
