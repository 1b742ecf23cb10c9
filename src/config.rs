use bevy::prelude::*;

use crate::error::FlockError;

/// Initialization-time settings for the flock.
///
/// Read once when the simulation is set up. Changing this resource afterwards
/// has no effect on a running flock.
#[derive(Resource, Debug, Clone)]
pub struct FlockConfig {
    /// Side length of the square state textures; the flock holds `width * width` birds
    pub width: u32,
    /// Full edge length of the cubic world the birds are spawned in
    pub bounds: f32,
    /// Seed for the initial position/velocity distribution
    pub seed: u64,
    pub separation_distance: f32,
    pub alignment_distance: f32,
    pub cohesion_distance: f32,
    pub freedom_factor: f32,
    /// Uniform scale applied to the bird mesh after it is authored
    pub mesh_scale: f32,
    pub base_tint: Color,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            width: 32,
            bounds: 800.0,
            seed: 0x5eed_b1d5,
            separation_distance: 20.0,
            alignment_distance: 20.0,
            cohesion_distance: 20.0,
            freedom_factor: 0.75,
            mesh_scale: 0.2,
            base_tint: Color::srgb_u8(0xff, 0x22, 0x00),
        }
    }
}

impl FlockConfig {
    /// Number of birds simulated
    pub fn particle_count(&self) -> usize {
        self.width as usize * self.width as usize
    }

    pub fn half_bounds(&self) -> f32 {
        self.bounds * 0.5
    }

    pub fn validate(&self) -> Result<(), FlockError> {
        if self.width == 0 {
            return Err(FlockError::InvalidConfig(
                "texture width must be at least 1".to_string(),
            ));
        }
        // Particle indices and texel offsets are computed in u32 on the GPU
        if self.width.checked_mul(self.width).is_none() {
            return Err(FlockError::InvalidConfig(format!(
                "texture width {} holds more birds than a u32 index can address",
                self.width
            )));
        }
        if !(self.bounds.is_finite() && self.bounds > 0.0) {
            return Err(FlockError::InvalidConfig(format!(
                "bounds must be positive, got {}",
                self.bounds
            )));
        }
        if !self.width.is_power_of_two() {
            warn!(
                "Flock texture width {} is not a power of two; some GPUs handle this poorly",
                self.width
            );
        }
        Ok(())
    }

    /// Reject widths the render device cannot allocate as a 2D texture
    pub fn check_texture_limit(&self, max_dimension: u32) -> Result<(), FlockError> {
        if self.width > max_dimension {
            return Err(FlockError::InvalidConfig(format!(
                "texture width {} exceeds the device limit of {}",
                self.width, max_dimension
            )));
        }
        Ok(())
    }
}

/// Knobs read by the velocity kernel every frame.
///
/// Only the frame driver writes to this. The weights and wall/predator
/// constants are exposed here so the flocking response can be tuned without
/// touching the kernels.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct ControlParameters {
    pub separation_distance: f32,
    pub alignment_distance: f32,
    pub cohesion_distance: f32,
    pub freedom_factor: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    /// Maximum bird speed after a velocity pass
    pub speed_limit: f32,
    /// Distance inside which the predator repels birds
    pub predator_radius: f32,
    pub predator_strength: f32,
    /// Extra speed allowed while fleeing the predator
    pub predator_speed_boost: f32,
    /// Fraction of the half extent where the soft wall starts pushing back
    pub wall_margin: f32,
    pub wall_strength: f32,
}

impl Default for ControlParameters {
    fn default() -> Self {
        Self {
            separation_distance: 20.0,
            alignment_distance: 20.0,
            cohesion_distance: 20.0,
            freedom_factor: 0.75,
            separation_weight: 1.0,
            alignment_weight: 1.0,
            cohesion_weight: 1.0,
            speed_limit: 9.0,
            predator_radius: 150.0,
            predator_strength: 100.0,
            predator_speed_boost: 5.0,
            wall_margin: 0.8,
            wall_strength: 5.0,
        }
    }
}

impl From<&FlockConfig> for ControlParameters {
    fn from(config: &FlockConfig) -> Self {
        Self {
            separation_distance: config.separation_distance,
            alignment_distance: config.alignment_distance,
            cohesion_distance: config.cohesion_distance,
            freedom_factor: config.freedom_factor,
            ..default()
        }
    }
}
