use bevy::asset::weak_handle;
use bevy::pbr::{MaterialPipeline, MaterialPipelineKey};
use bevy::prelude::*;
use bevy::reflect::TypePath;
use bevy::render::mesh::MeshVertexBufferLayoutRef;
use bevy::render::render_resource::{
    AsBindGroup, RenderPipelineDescriptor, ShaderRef, ShaderType, SpecializedMeshPipelineError,
};

use crate::rendering::geometry::{ATTRIBUTE_BIRD_VERTEX, ATTRIBUTE_REFERENCE};

pub const FLOCK_RENDER_SHADER_HANDLE: Handle<Shader> =
    weak_handle!("c3a9e1d4-7f25-4b60-8e1a-5d0c2b9f6a47");

/// Uniform block of the bird shader
#[derive(ShaderType, Debug, Clone, Copy)]
pub struct FlockMaterialParams {
    pub tint: LinearRgba,
    /// Seconds since the flock started
    pub time: f32,
    pub flap_amplitude: f32,
    /// Wing beats in radians per second
    pub flap_rate: f32,
}

impl Default for FlockMaterialParams {
    fn default() -> Self {
        Self {
            tint: LinearRgba::WHITE,
            time: 0.0,
            flap_amplitude: 5.0,
            flap_rate: 12.0,
        }
    }
}

/// Material that places every bird vertex from the state textures.
///
/// The texture handles are re-pointed every frame at the channels'
/// current buffers by the frame driver.
#[derive(Asset, TypePath, AsBindGroup, Debug, Clone)]
pub struct FlockMaterial {
    #[uniform(0)]
    pub params: FlockMaterialParams,

    #[texture(1, sample_type = "float", filterable = false)]
    #[sampler(2, sampler_type = "non_filtering")]
    pub position_texture: Handle<Image>,

    #[texture(3, sample_type = "float", filterable = false)]
    #[sampler(4, sampler_type = "non_filtering")]
    pub velocity_texture: Handle<Image>,
}

impl Material for FlockMaterial {
    fn vertex_shader() -> ShaderRef {
        FLOCK_RENDER_SHADER_HANDLE.into()
    }

    fn fragment_shader() -> ShaderRef {
        FLOCK_RENDER_SHADER_HANDLE.into()
    }

    fn specialize(
        _pipeline: &MaterialPipeline<Self>,
        descriptor: &mut RenderPipelineDescriptor,
        layout: &MeshVertexBufferLayoutRef,
        _key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        let vertex_layout = layout.0.get_layout(&[
            Mesh::ATTRIBUTE_POSITION.at_shader_location(0),
            Mesh::ATTRIBUTE_COLOR.at_shader_location(1),
            ATTRIBUTE_REFERENCE.at_shader_location(2),
            ATTRIBUTE_BIRD_VERTEX.at_shader_location(3),
        ])?;
        descriptor.vertex.buffers = vec![vertex_layout];
        // Wings are single triangles seen from both sides
        descriptor.primitive.cull_mode = None;
        Ok(())
    }
}

/// Plugin for the bird material and its shader
pub struct FlockMaterialPlugin;

impl Plugin for FlockMaterialPlugin {
    fn build(&self, app: &mut App) {
        let mut shaders = app.world_mut().resource_mut::<Assets<Shader>>();
        shaders.insert(
            &FLOCK_RENDER_SHADER_HANDLE,
            Shader::from_wgsl(
                include_str!("../../assets/shaders/flock_render.wgsl"),
                "shaders/flock_render.wgsl",
            ),
        );

        app.add_plugins(MaterialPlugin::<FlockMaterial>::default());
    }
}
