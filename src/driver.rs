use bevy::pbr::NotShadowCaster;
use bevy::prelude::*;
use bevy::render::renderer::RenderDevice;
use bevy::render::view::NoFrustumCulling;
use bevy::window::{CursorMoved, PrimaryWindow};

use crate::config::{ControlParameters, FlockConfig};
use crate::rendering::{FlockGeometry, FlockMaterial, FlockMaterialParams};
use crate::simulation::{
    ComputeFailure, FlockComputeFrame, FlockStatus, InitialState, KernelUniforms,
    StateTexturePool,
};

/// Largest simulation step, in seconds, handed to the kernels
pub const MAX_FRAME_DELTA: f32 = 1.0;

/// Pointer offset used when no move happened this frame: far enough that
/// the predator is out of range of every bird
pub const POINTER_SENTINEL: f32 = 10_000.0;

/// Wall-clock bookkeeping for the simulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    last: f64,
    elapsed: f32,
}

impl FrameClock {
    pub fn new(start: f64) -> Self {
        Self {
            last: start,
            elapsed: 0.0,
        }
    }

    /// Record the current wall time and return the step to simulate,
    /// clamped to [`MAX_FRAME_DELTA`] so a stall cannot blow up integration
    pub fn advance(&mut self, now: f64) -> f32 {
        let delta = ((now - self.last).max(0.0) as f32).min(MAX_FRAME_DELTA);
        self.last = now;
        self.elapsed += delta;
        delta
    }

    /// Simulated seconds so far
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}

/// Latest pointer sample, as an offset from the viewport centre.
///
/// Consumed once per frame; an untouched pointer reads as the sentinel, so
/// the predator only exists on frames where the pointer moved.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct PointerTracker {
    offset: Vec2,
}

impl Default for PointerTracker {
    fn default() -> Self {
        Self {
            offset: Vec2::splat(POINTER_SENTINEL),
        }
    }
}

impl PointerTracker {
    pub fn record(&mut self, cursor: Vec2, half_extent: Vec2) {
        self.offset = cursor - half_extent;
    }

    /// Normalized predator position (about [-0.5, 0.5] on screen, y up).
    /// Resets the sample to the sentinel.
    pub fn take_predator(&mut self, half_extent: Vec2) -> Vec3 {
        let half_extent = half_extent.max(Vec2::ONE);
        let predator = Vec3::new(
            0.5 * self.offset.x / half_extent.x,
            -0.5 * self.offset.y / half_extent.y,
            0.0,
        );
        self.offset = Vec2::splat(POINTER_SENTINEL);
        predator
    }
}

/// The simulation context owned by the frame driver
#[derive(Resource)]
pub struct FlockContext {
    pub textures: StateTexturePool,
    pub clock: FrameClock,
    pub uniforms: KernelUniforms,
    pub material: Handle<FlockMaterial>,
}

impl FlockContext {
    /// One tick: time, predator, compute frame, swap.
    ///
    /// Returns the frame the compute graph must run. After this call the
    /// channels' current buffers are the ones that frame writes.
    pub fn tick(
        &mut self,
        now: f64,
        predator: Vec3,
        controls: &ControlParameters,
    ) -> FlockComputeFrame {
        let delta = self.clock.advance(now);

        let bounds = self.uniforms.bounds;
        self.uniforms = KernelUniforms {
            predator,
            time: self.clock.elapsed(),
            delta,
            ..KernelUniforms::new(controls, bounds)
        };

        let frame = FlockComputeFrame {
            width: self.textures.width,
            position: self.textures.position.frame(),
            velocity: self.textures.velocity.frame(),
            uniforms: self.uniforms,
        };
        // Swaps even on frames the compute node skips (pipelines still
        // compiling, images not uploaded). Both slots are seeded with the same
        // state, so the renderer then shows the initial flock either way.
        self.textures.commit();
        frame
    }
}

/// Marker for the flock mesh entity
#[derive(Component)]
pub struct FlockMesh;

/// Create the state textures, the bird mesh and the simulation context
pub fn setup_flock(
    mut commands: Commands,
    config: Res<FlockConfig>,
    status: Res<FlockStatus>,
    render_device: Option<Res<RenderDevice>>,
    time: Res<Time<Real>>,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<FlockMaterial>>,
) {
    if let FlockStatus::Disabled(err) = &*status {
        warn!("Skipping flock setup: {}", err);
        return;
    }
    let checked = config.validate().and_then(|()| match &render_device {
        Some(device) => config.check_texture_limit(device.limits().max_texture_dimension_2d),
        None => Ok(()),
    });
    if let Err(err) = checked {
        error!("Flock simulation disabled: {}", err);
        commands.insert_resource(FlockStatus::Disabled(err));
        return;
    }

    let initial = InitialState::seeded(&config);
    let textures = StateTexturePool::new(&initial, &mut images);

    let material = materials.add(FlockMaterial {
        params: FlockMaterialParams {
            tint: config.base_tint.to_linear(),
            ..default()
        },
        position_texture: textures.position.read().clone(),
        velocity_texture: textures.velocity.read().clone(),
    });

    let geometry = FlockGeometry::new(config.width).scaled(config.mesh_scale);
    let vertex_count = geometry.vertex_count();

    commands.spawn((
        Mesh3d(meshes.add(geometry.into_mesh())),
        MeshMaterial3d(material.clone()),
        Transform::IDENTITY,
        // Bird positions come from textures, so the mesh AABB means nothing
        NoFrustumCulling,
        NotShadowCaster,
        FlockMesh,
    ));

    let controls = ControlParameters::from(&*config);
    commands.insert_resource(FlockContext {
        textures,
        clock: FrameClock::new(time.elapsed_secs_f64()),
        uniforms: KernelUniforms::new(&controls, config.bounds),
        material,
    });
    commands.insert_resource(controls);

    info!(
        "Flock initialized: {} birds ({}x{} state textures), {} vertices, bounds {}",
        config.particle_count(),
        config.width,
        config.width,
        vertex_count,
        config.bounds
    );
    debug!("Flock controls: {:?}", controls);
}

/// Stop driving the flock once the render world reports a dead pipeline
pub fn watch_compute_failure(mut commands: Commands, failure: Res<ComputeFailure>) {
    if let Some(err) = failure.take() {
        warn!("Stopping flock simulation: {}", err);
        commands.remove_resource::<FlockContext>();
        commands.insert_resource(FlockStatus::Disabled(err));
    }
}

/// Keep the most recent pointer sample of this frame
pub fn track_pointer(
    mut cursor_moved: EventReader<CursorMoved>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut pointer: ResMut<PointerTracker>,
) {
    let Ok(window) = windows.single() else {
        cursor_moved.clear();
        return;
    };
    if let Some(event) = cursor_moved.read().last() {
        pointer.record(event.position, window.size() * 0.5);
    }
}

/// Per-frame sequencing: time and predator uniforms, compute frame, then
/// point the material at the freshly written textures
pub fn drive_frame(
    mut commands: Commands,
    time: Res<Time<Real>>,
    controls: Res<ControlParameters>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut pointer: ResMut<PointerTracker>,
    mut context: ResMut<FlockContext>,
    mut materials: ResMut<Assets<FlockMaterial>>,
) {
    let half_extent = windows
        .single()
        .map(|window| window.size() * 0.5)
        .unwrap_or(Vec2::ONE);
    let predator = pointer.take_predator(half_extent);

    let frame = context.tick(time.elapsed_secs_f64(), predator, &controls);
    commands.insert_resource(frame);

    if let Some(material) = materials.get_mut(&context.material) {
        material.position_texture = context.textures.position.read().clone();
        material.velocity_texture = context.textures.velocity.read().clone();
        material.params.time = context.clock.elapsed();
    }
}
