/// Flocking simulation state and compute passes
///
/// Birds live in two double-buffered RGBA32F textures (position, velocity).
/// Each frame the velocity kernel runs, then the position kernel, then both
/// channels swap.

pub mod compute_pipeline;
pub mod cpu_simulation;
pub mod kernels;
pub mod ping_pong;
pub mod state_textures;

pub use compute_pipeline::*;
pub use cpu_simulation::*;
pub use kernels::*;
pub use ping_pong::*;
pub use state_textures::*;
