use bevy::prelude::*;

use crate::simulation::kernels::{KernelUniforms, position_kernel, velocity_kernel};
use crate::simulation::ping_pong::PingPong;
use crate::simulation::state_textures::{InitialState, StateTexture};

/// CPU backend running the same two-kernel frame as the GPU graph.
///
/// Useful headless and as the executable definition of what the compute
/// shader must do. O(N²) per frame like the GPU version, so keep grids small.
pub struct CpuFlock {
    width: u32,
    position: PingPong<StateTexture>,
    velocity: PingPong<StateTexture>,
}

impl CpuFlock {
    pub fn new(initial: &InitialState) -> Self {
        let width = initial.position.width;
        Self {
            width,
            position: PingPong::new(initial.position.clone(), initial.position.clone()),
            velocity: PingPong::new(initial.velocity.clone(), initial.velocity.clone()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn positions(&self) -> &StateTexture {
        self.position.read()
    }

    pub fn velocities(&self) -> &StateTexture {
        self.velocity.read()
    }

    /// Advance one frame: velocity from last frame's state, then position
    /// from the fresh velocity, then publish both.
    pub fn step(&mut self, uniforms: &KernelUniforms) {
        let positions = &self.position.read().texels;
        {
            let (velocities, next_velocities) = self.velocity.split_mut();
            for (i, out) in next_velocities.texels.iter_mut().enumerate() {
                *out = velocity_kernel(i, positions, &velocities.texels, uniforms);
            }
        }

        let fresh_velocities = &self.velocity.next().texels;
        {
            let (positions, next_positions) = self.position.split_mut();
            for (i, out) in next_positions.texels.iter_mut().enumerate() {
                *out = position_kernel(i, &positions.texels, fresh_velocities, uniforms);
            }
        }

        self.position.commit();
        self.velocity.commit();
        debug!("CPU flock advanced by {:.4}", uniforms.delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlParameters, FlockConfig};

    fn uniforms(delta: f32) -> KernelUniforms {
        let mut uniforms = KernelUniforms::new(&ControlParameters::default(), 800.0);
        uniforms.delta = delta;
        uniforms.predator = Vec3::splat(100.0);
        uniforms
    }

    fn lone_bird(position: Vec3, velocity: Vec3) -> InitialState {
        InitialState {
            position: StateTexture::from_texels(1, vec![position.extend(1.0)]),
            velocity: StateTexture::from_texels(1, vec![velocity.extend(1.0)]),
        }
    }

    #[test]
    fn test_position_integrates_fresh_velocity() {
        // Starts too fast; the velocity pass clamps before the position pass reads it
        let mut flock = CpuFlock::new(&lone_bird(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)));
        let u = uniforms(1.0);
        flock.step(&u);

        let velocity = flock.velocities().texels[0].truncate();
        let position = flock.positions().texels[0].truncate();
        assert!((velocity.length() - u.speed_limit).abs() < 1e-4);
        assert_eq!(position, velocity);
    }

    #[test]
    fn test_unit_velocity_moves_one_unit() {
        let mut flock = CpuFlock::new(&lone_bird(Vec3::ZERO, Vec3::X));
        flock.step(&uniforms(1.0));
        assert_eq!(flock.positions().texels[0].truncate(), Vec3::X);
        flock.step(&uniforms(1.0));
        assert_eq!(flock.positions().texels[0].truncate(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_state_stays_finite_and_bounded() {
        let config = FlockConfig {
            width: 8,
            ..default()
        };
        let mut flock = CpuFlock::new(&InitialState::seeded(&config));
        let u = uniforms(0.016);
        for _ in 0..30 {
            flock.step(&u);
        }
        for texel in &flock.velocities().texels {
            assert!(texel.is_finite());
            assert!(texel.truncate().length() <= u.max_speed_fleeing() + 1e-3);
        }
        assert_eq!(flock.positions().len(), 64);
        assert_eq!(flock.width(), 8);
    }
}
