use std::sync::{Arc, Mutex};

use bevy::asset::weak_handle;
use bevy::prelude::*;
use bevy::render::extract_resource::{ExtractResource, ExtractResourcePlugin};
use bevy::render::render_asset::RenderAssets;
use bevy::render::render_graph::{self, RenderGraph, RenderLabel};
use bevy::render::render_resource::*;
use bevy::render::renderer::{RenderAdapter, RenderContext, RenderDevice, RenderQueue};
use bevy::render::texture::GpuImage;
use bevy::render::{Render, RenderApp, RenderSet};

use crate::error::FlockError;
use crate::simulation::kernels::KernelUniforms;
use crate::simulation::ping_pong::ChannelFrame;
use crate::simulation::state_textures::STATE_TEXTURE_FORMAT;

/// Must match `@workgroup_size` in the compute shader
pub const WORKGROUP_SIZE: u32 = 8;

pub const FLOCK_COMPUTE_SHADER_HANDLE: Handle<Shader> =
    weak_handle!("6b1f3c7e-2a9d-4e58-9c0b-1d7f4a2e8b35");

/// Whether the compute backend came up. Decided once when the plugin
/// finishes building.
#[derive(Resource, Debug, Clone, PartialEq)]
pub enum FlockStatus {
    Ready,
    Disabled(FlockError),
}

impl FlockStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, FlockStatus::Ready)
    }
}

impl From<Result<(), FlockError>> for FlockStatus {
    fn from(result: Result<(), FlockError>) -> Self {
        match result {
            Ok(()) => FlockStatus::Ready,
            Err(err) => FlockStatus::Disabled(err),
        }
    }
}

/// Pipeline failure raised in the render world, read back by the main world.
///
/// Both worlds hold a clone of the same slot. Only the first report is kept.
#[derive(Resource, Debug, Clone, Default)]
pub struct ComputeFailure(Arc<Mutex<Option<FlockError>>>);

impl ComputeFailure {
    pub fn report(&self, err: FlockError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(err);
        }
    }

    /// Take the pending failure, if any
    pub fn take(&self) -> Option<FlockError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Everything the render world needs to run one simulation step.
///
/// Captured by the frame driver before it commits the channels, so
/// `source` is last frame's state and `target` the buffer being filled.
#[derive(Resource, Clone, ExtractResource)]
pub struct FlockComputeFrame {
    pub width: u32,
    pub position: ChannelFrame<Handle<Image>>,
    pub velocity: ChannelFrame<Handle<Image>>,
    pub uniforms: KernelUniforms,
}

/// Check the adapter can run the kernels on RGBA32F textures
pub fn check_compute_support(
    downlevel: DownlevelFlags,
    allowed_usages: TextureUsages,
) -> Result<(), FlockError> {
    if !downlevel.contains(DownlevelFlags::COMPUTE_SHADERS) {
        return Err(FlockError::ComputeShadersUnsupported);
    }
    if !allowed_usages.contains(TextureUsages::STORAGE_BINDING) {
        return Err(FlockError::StorageFormatUnsupported {
            format: "Rgba32Float",
            usage: "storage texture",
        });
    }
    if !allowed_usages.contains(TextureUsages::TEXTURE_BINDING) {
        return Err(FlockError::StorageFormatUnsupported {
            format: "Rgba32Float",
            usage: "sampled texture",
        });
    }
    Ok(())
}

/// Plugin for the GPU flocking compute passes
pub struct FlockComputePlugin;

impl Plugin for FlockComputePlugin {
    fn build(&self, app: &mut App) {
        let mut shaders = app.world_mut().resource_mut::<Assets<Shader>>();
        shaders.insert(
            &FLOCK_COMPUTE_SHADER_HANDLE,
            Shader::from_wgsl(
                include_str!("../../assets/shaders/flock_compute.wgsl"),
                "shaders/flock_compute.wgsl",
            ),
        );

        let failure = ComputeFailure::default();
        app.insert_resource(failure.clone())
            .add_plugins(ExtractResourcePlugin::<FlockComputeFrame>::default());

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app.insert_resource(failure).add_systems(
            Render,
            prepare_flock_bind_groups.in_set(RenderSet::PrepareBindGroups),
        );

        // Simulate before the cameras draw so they sample this frame's state
        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        render_graph.add_node(FlockComputeLabel, FlockComputeNode::default());
        render_graph.add_node_edge(FlockComputeLabel, bevy::render::graph::CameraDriverLabel);
    }

    fn finish(&self, app: &mut App) {
        let support = match app.get_sub_app_mut(RenderApp) {
            None => Err(FlockError::RendererUnavailable),
            Some(render_app) => {
                let adapter = render_app.world().resource::<RenderAdapter>();
                let support = check_compute_support(
                    adapter.get_downlevel_capabilities().flags,
                    adapter
                        .get_texture_format_features(STATE_TEXTURE_FORMAT)
                        .allowed_usages,
                );
                if support.is_ok() {
                    render_app
                        .init_resource::<FlockComputePipeline>()
                        .init_resource::<FlockUniformBuffer>();
                }
                support
            }
        };

        if let Err(err) = &support {
            error!("Flock simulation disabled: {}", err);
        }
        app.insert_resource(FlockStatus::from(support));
    }
}

/// Bind group layout and the two queued kernel pipelines
#[derive(Resource)]
struct FlockComputePipeline {
    bind_group_layout: BindGroupLayout,
    velocity_pipeline: CachedComputePipelineId,
    position_pipeline: CachedComputePipelineId,
}

impl FromWorld for FlockComputePipeline {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();

        // Both kernels share one layout: two state inputs, one output, uniforms
        let bind_group_layout = render_device.create_bind_group_layout(
            "flock_compute_bind_group_layout",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::COMPUTE,
                (
                    // Position input
                    texture_2d_unfilterable(),
                    // Velocity input
                    texture_2d_unfilterable(),
                    // Output channel
                    texture_storage_2d(STATE_TEXTURE_FORMAT, StorageTextureAccess::WriteOnly),
                    uniform_buffer::<KernelUniforms>(false),
                ),
            ),
        );

        let pipeline_cache = world.resource::<PipelineCache>();
        let queue_kernel = |label: &'static str, entry_point: &'static str| {
            pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(label.into()),
                layout: vec![bind_group_layout.clone()],
                push_constant_ranges: vec![],
                shader: FLOCK_COMPUTE_SHADER_HANDLE,
                shader_defs: vec![],
                entry_point: entry_point.into(),
                zero_initialize_workgroup_memory: false,
            })
        };
        let velocity_pipeline = queue_kernel("flock_velocity_pipeline", "update_velocity");
        let position_pipeline = queue_kernel("flock_position_pipeline", "update_position");

        info!("Flock compute pipelines queued");

        Self {
            bind_group_layout,
            velocity_pipeline,
            position_pipeline,
        }
    }
}

/// Kernel uniforms, rewritten in place every frame
#[derive(Resource)]
struct FlockUniformBuffer(UniformBuffer<KernelUniforms>);

impl Default for FlockUniformBuffer {
    fn default() -> Self {
        let mut buffer = UniformBuffer::default();
        buffer.set_label(Some("flock_uniform_buffer"));
        Self(buffer)
    }
}

/// Per-frame bind groups, one per kernel
#[derive(Resource)]
struct FlockBindGroups {
    velocity: BindGroup,
    position: BindGroup,
    workgroups: u32,
}

fn prepare_flock_bind_groups(
    mut commands: Commands,
    pipeline: Option<Res<FlockComputePipeline>>,
    frame: Option<Res<FlockComputeFrame>>,
    uniforms: Option<ResMut<FlockUniformBuffer>>,
    gpu_images: Res<RenderAssets<GpuImage>>,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
) {
    let (Some(pipeline), Some(frame), Some(mut uniforms)) = (pipeline, frame, uniforms) else {
        return;
    };

    // Images may still be uploading on the first frames
    let (Some(position_in), Some(position_out), Some(velocity_in), Some(velocity_out)) = (
        gpu_images.get(&frame.position.source),
        gpu_images.get(&frame.position.target),
        gpu_images.get(&frame.velocity.source),
        gpu_images.get(&frame.velocity.target),
    ) else {
        commands.remove_resource::<FlockBindGroups>();
        return;
    };

    uniforms.0.set(frame.uniforms);
    uniforms.0.write_buffer(&render_device, &render_queue);

    // Velocity kernel: last frame's positions and velocities -> next velocity
    let velocity = render_device.create_bind_group(
        "flock_velocity_bind_group",
        &pipeline.bind_group_layout,
        &BindGroupEntries::sequential((
            &position_in.texture_view,
            &velocity_in.texture_view,
            &velocity_out.texture_view,
            &uniforms.0,
        )),
    );

    // Position kernel: last frame's positions and the fresh velocity -> next position
    let position = render_device.create_bind_group(
        "flock_position_bind_group",
        &pipeline.bind_group_layout,
        &BindGroupEntries::sequential((
            &position_in.texture_view,
            &velocity_out.texture_view,
            &position_out.texture_view,
            &uniforms.0,
        )),
    );

    commands.insert_resource(FlockBindGroups {
        velocity,
        position,
        workgroups: frame.width.div_ceil(WORKGROUP_SIZE),
    });
}

/// Label for the flock compute node
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
struct FlockComputeLabel;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum FlockComputeState {
    #[default]
    Loading,
    Ready,
    Failed,
}

/// Compute node that dispatches the velocity kernel then the position kernel
#[derive(Default)]
struct FlockComputeNode {
    state: FlockComputeState,
}

impl render_graph::Node for FlockComputeNode {
    fn update(&mut self, world: &mut World) {
        if self.state != FlockComputeState::Loading {
            return;
        }
        let Some(pipeline) = world.get_resource::<FlockComputePipeline>() else {
            return;
        };
        let pipeline_cache = world.resource::<PipelineCache>();

        let velocity = pipeline_cache.get_compute_pipeline_state(pipeline.velocity_pipeline);
        let position = pipeline_cache.get_compute_pipeline_state(pipeline.position_pipeline);
        let failed = match (velocity, position) {
            (CachedPipelineState::Ok(_), CachedPipelineState::Ok(_)) => {
                self.state = FlockComputeState::Ready;
                info!("Flock compute pipelines ready");
                None
            }
            (CachedPipelineState::Err(err), _) => Some(FlockError::PipelineFailed {
                kernel: "velocity",
                reason: err.to_string(),
            }),
            (_, CachedPipelineState::Err(err)) => Some(FlockError::PipelineFailed {
                kernel: "position",
                reason: err.to_string(),
            }),
            _ => None,
        };

        if let Some(err) = failed {
            self.state = FlockComputeState::Failed;
            error!("{}", err);
            if let Some(failure) = world.get_resource::<ComputeFailure>() {
                failure.report(err);
            }
        }
    }

    fn run<'w>(
        &self,
        _graph: &mut render_graph::RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        world: &'w World,
    ) -> Result<(), render_graph::NodeRunError> {
        if self.state != FlockComputeState::Ready {
            return Ok(());
        }
        let Some(bind_groups) = world.get_resource::<FlockBindGroups>() else {
            return Ok(());
        };
        let pipeline = world.resource::<FlockComputePipeline>();
        let pipeline_cache = world.resource::<PipelineCache>();

        let (Some(velocity_pipeline), Some(position_pipeline)) = (
            pipeline_cache.get_compute_pipeline(pipeline.velocity_pipeline),
            pipeline_cache.get_compute_pipeline(pipeline.position_pipeline),
        ) else {
            return Ok(());
        };

        let encoder = render_context.command_encoder();

        // Separate passes so the position kernel sees the finished velocity texture
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("flock_velocity_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(velocity_pipeline);
            pass.set_bind_group(0, &bind_groups.velocity, &[]);
            pass.dispatch_workgroups(bind_groups.workgroups, bind_groups.workgroups, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("flock_position_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(position_pipeline);
            pass.set_bind_group(0, &bind_groups.position, &[]);
            pass.dispatch_workgroups(bind_groups.workgroups, bind_groups.workgroups, 1);
        }

        Ok(())
    }
}

fn texture_2d_unfilterable() -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: u32::MAX, // Sequential layout will assign this
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn texture_storage_2d(format: TextureFormat, access: StorageTextureAccess) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: u32::MAX,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::StorageTexture {
            access,
            format,
            view_dimension: TextureViewDimension::D2,
        },
        count: None,
    }
}

fn uniform_buffer<T: ShaderType>(has_dynamic_offset: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: u32::MAX,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: Some(T::min_size()),
        },
        count: None,
    }
}
