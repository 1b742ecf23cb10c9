//! GPU flocking birds for Bevy.
//!
//! Add [`FlockPlugin`] to an app that already has `DefaultPlugins`. The
//! plugin spawns the flock mesh at startup and advances the simulation on the
//! GPU once per frame, before the cameras render.

pub mod config;
pub mod driver;
pub mod error;
pub mod rendering;
pub mod simulation;

use bevy::prelude::*;

pub use config::{ControlParameters, FlockConfig};
pub use driver::{FlockContext, FlockMesh, PointerTracker};
pub use error::FlockError;
pub use simulation::FlockStatus;

use rendering::FlockMaterialPlugin;
use simulation::FlockComputePlugin;

/// Plugin wiring the flock into the app
#[derive(Default)]
pub struct FlockPlugin {
    pub config: FlockConfig,
}

impl Plugin for FlockPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.config.clone())
            .init_resource::<ControlParameters>()
            .init_resource::<PointerTracker>()
            .add_plugins((FlockComputePlugin, FlockMaterialPlugin))
            .add_systems(Startup, driver::setup_flock)
            .add_systems(
                PreUpdate,
                driver::watch_compute_failure.run_if(resource_exists::<FlockContext>),
            )
            .add_systems(
                Update,
                (driver::track_pointer, driver::drive_frame)
                    .chain()
                    .run_if(resource_exists::<FlockContext>),
            );
    }
}
