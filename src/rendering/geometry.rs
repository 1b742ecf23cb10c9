use bevy::prelude::*;
use bevy::render::mesh::MeshVertexAttribute;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::{PrimitiveTopology, VertexFormat};

use crate::simulation::state_textures::reference_of;

/// Texture lookup coordinate of the bird a vertex belongs to
pub const ATTRIBUTE_REFERENCE: MeshVertexAttribute =
    MeshVertexAttribute::new("FlockReference", 0x0f10_c4e5_0001, VertexFormat::Float32x2);

/// Vertex role within its bird, 0..9
pub const ATTRIBUTE_BIRD_VERTEX: MeshVertexAttribute =
    MeshVertexAttribute::new("FlockBirdVertex", 0x0f10_c4e5_0002, VertexFormat::Float32);

pub const TRIANGLES_PER_BIRD: usize = 3;
pub const VERTICES_PER_BIRD: usize = TRIANGLES_PER_BIRD * 3;

const WING_SPAN: f32 = 20.0;

/// Local-space model of one bird: body, left wing, right wing
const BIRD_MODEL: [[f32; 3]; VERTICES_PER_BIRD] = [
    // Body
    [0.0, 0.0, -20.0],
    [0.0, 4.0, -20.0],
    [0.0, 0.0, 30.0],
    // Left wing
    [0.0, 0.0, -15.0],
    [-WING_SPAN, 0.0, 0.0],
    [0.0, 0.0, 15.0],
    // Right wing
    [0.0, 0.0, 15.0],
    [WING_SPAN, 0.0, 0.0],
    [0.0, 0.0, -15.0],
];

/// Colour of bird `index` out of `count`: a grey ramp from #444444 to #aaaaaa
pub fn bird_color(index: usize, count: usize) -> LinearRgba {
    let ramp = index as f32 / count.max(1) as f32 * 0x66_6666 as f32;
    let hex = (0x44_4444 as f32 + ramp).floor() as u32;
    let [r, g, b] = [(hex >> 16) as u8, (hex >> 8) as u8, hex as u8];
    Color::srgb_u8(r, g, b).to_linear()
}

/// Vertex data for the whole flock, built once.
///
/// Positions never encode where a bird is; each vertex only carries the
/// texel its bird lives in, and the vertex shader looks the state up.
#[derive(Debug, Clone)]
pub struct FlockGeometry {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub references: Vec<[f32; 2]>,
    pub roles: Vec<f32>,
}

impl FlockGeometry {
    pub fn new(width: u32) -> Self {
        let birds = width as usize * width as usize;
        let vertex_count = birds * VERTICES_PER_BIRD;

        let mut geometry = Self {
            positions: Vec::with_capacity(vertex_count),
            colors: Vec::with_capacity(vertex_count),
            references: Vec::with_capacity(vertex_count),
            roles: Vec::with_capacity(vertex_count),
        };

        for bird in 0..birds {
            let reference = reference_of(bird, width).to_array();
            let color = bird_color(bird, birds);
            let color = [color.red, color.green, color.blue, 1.0];

            for (role, vertex) in BIRD_MODEL.iter().enumerate() {
                geometry.positions.push(*vertex);
                geometry.colors.push(color);
                geometry.references.push(reference);
                geometry.roles.push(role as f32);
            }
        }
        geometry
    }

    /// Scale the authored model uniformly
    pub fn scaled(mut self, factor: f32) -> Self {
        for position in &mut self.positions {
            for component in position.iter_mut() {
                *component *= factor;
            }
        }
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn into_mesh(self) -> Mesh {
        Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::RENDER_WORLD)
            .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, self.positions)
            .with_inserted_attribute(Mesh::ATTRIBUTE_COLOR, self.colors)
            .with_inserted_attribute(ATTRIBUTE_REFERENCE, self.references)
            .with_inserted_attribute(ATTRIBUTE_BIRD_VERTEX, self.roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_nine_vertices_share_one_reference() {
        let geometry = FlockGeometry::new(4);
        assert_eq!(geometry.vertex_count(), 16 * VERTICES_PER_BIRD);

        for bird in geometry.references.chunks(VERTICES_PER_BIRD) {
            assert!(bird.iter().all(|r| *r == bird[0]));
        }
    }

    #[test]
    fn test_references_cover_grid_once() {
        let width = 32;
        let geometry = FlockGeometry::new(width);
        let texels: Vec<(u32, u32)> = geometry
            .references
            .iter()
            .step_by(VERTICES_PER_BIRD)
            .map(|r| {
                (
                    (r[0] * width as f32).round() as u32,
                    (r[1] * width as f32).round() as u32,
                )
            })
            .collect();
        let unique: HashSet<_> = texels.iter().copied().collect();

        assert_eq!(texels.len(), (width * width) as usize);
        assert_eq!(unique.len(), texels.len());
        assert!(unique.iter().all(|&(x, y)| x < width && y < width));
    }

    #[test]
    fn test_roles_cycle_per_bird() {
        let geometry = FlockGeometry::new(2);
        for (i, role) in geometry.roles.iter().enumerate() {
            assert_eq!(*role, (i % VERTICES_PER_BIRD) as f32);
        }
    }

    #[test]
    fn test_scale_applies_to_model() {
        let geometry = FlockGeometry::new(1).scaled(0.2);
        assert_eq!(geometry.positions[2], [0.0, 0.0, 6.0]);
        assert_eq!(geometry.positions[4], [-4.0, 0.0, 0.0]);
        // Lookup coordinates are untouched by scaling
        assert_eq!(geometry.references[0], [0.0, 0.0]);
    }

    #[test]
    fn test_colour_ramp_brightens_with_index() {
        let first = bird_color(0, 1024);
        let last = bird_color(1023, 1024);
        assert!(last.red > first.red);
        assert_eq!(first.red, first.green);
    }
}
