/// Rendering of the flock
///
/// A static mesh whose vertices look their bird up in the state textures.

pub mod geometry;
pub mod material;

pub use geometry::*;
pub use material::*;
