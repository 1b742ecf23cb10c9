use bevy::image::{ImageAddressMode, ImageFilterMode, ImageSampler, ImageSamplerDescriptor};
use bevy::prelude::*;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FlockConfig;
use crate::simulation::ping_pong::PingPong;

/// Texel format of both state channels: xyz = vector, w = unused flag slot
pub const STATE_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

/// Bytes per RGBA32F texel
const TEXEL_SIZE: usize = 16;

/// Half range of the initial per-axis velocity
const INITIAL_SPEED_RANGE: f32 = 5.0;

/// Texel coordinates of particle `index` in a `width`-wide grid
#[inline]
pub fn texel_of(index: usize, width: u32) -> UVec2 {
    let width = width as usize;
    UVec2::new((index % width) as u32, (index / width) as u32)
}

/// Normalized lookup coordinate of particle `index`, as stored in the mesh
#[inline]
pub fn reference_of(index: usize, width: u32) -> Vec2 {
    texel_of(index, width).as_vec2() / width as f32
}

/// CPU copy of one square RGBA32F state texture.
///
/// Only used to author the initial contents and by the CPU reference
/// backend; the GPU copy is authoritative once uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTexture {
    pub width: u32,
    pub texels: Vec<Vec4>,
}

impl StateTexture {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            texels: vec![Vec4::ZERO; width as usize * width as usize],
        }
    }

    pub fn from_texels(width: u32, texels: Vec<Vec4>) -> Self {
        debug_assert_eq!(texels.len(), width as usize * width as usize);
        Self { width, texels }
    }

    /// Random positions in `[-bounds/2, bounds/2]` per axis, w = 1
    pub fn seeded_positions(width: u32, bounds: f32, rng: &mut impl Rng) -> Self {
        let half = bounds * 0.5;
        Self::filled_with(width, |_| {
            Vec3::new(
                rng.r#gen::<f32>() * bounds - half,
                rng.r#gen::<f32>() * bounds - half,
                rng.r#gen::<f32>() * bounds - half,
            )
        })
    }

    /// Random velocities in `[-5, 5]` per axis, w = 1
    pub fn seeded_velocities(width: u32, rng: &mut impl Rng) -> Self {
        let scale = INITIAL_SPEED_RANGE * 2.0;
        Self::filled_with(width, |_| {
            Vec3::new(
                (rng.r#gen::<f32>() - 0.5) * scale,
                (rng.r#gen::<f32>() - 0.5) * scale,
                (rng.r#gen::<f32>() - 0.5) * scale,
            )
        })
    }

    fn filled_with(width: u32, mut value: impl FnMut(usize) -> Vec3) -> Self {
        let texels = (0..width as usize * width as usize)
            .map(|i| value(i).extend(1.0))
            .collect();
        Self { width, texels }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.texels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.texels.is_empty()
    }

    /// Little-endian RGBA32F bytes, row-major
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.texels.len() * TEXEL_SIZE);
        for texel in &self.texels {
            for component in texel.to_array() {
                bytes.extend_from_slice(&component.to_le_bytes());
            }
        }
        bytes
    }

    /// Build a GPU image usable both as compute output and render input
    pub fn to_image(&self) -> Image {
        let mut image = Image::new(
            Extent3d {
                width: self.width,
                height: self.width,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            self.to_bytes(),
            STATE_TEXTURE_FORMAT,
            RenderAssetUsages::RENDER_WORLD,
        );
        image.texture_descriptor.usage = TextureUsages::STORAGE_BINDING
            | TextureUsages::TEXTURE_BINDING
            | TextureUsages::COPY_DST;

        // Neighbour lookups wrap around so the grid behaves as a torus
        image.sampler = ImageSampler::Descriptor(ImageSamplerDescriptor {
            address_mode_u: ImageAddressMode::Repeat,
            address_mode_v: ImageAddressMode::Repeat,
            address_mode_w: ImageAddressMode::Repeat,
            mag_filter: ImageFilterMode::Nearest,
            min_filter: ImageFilterMode::Nearest,
            mipmap_filter: ImageFilterMode::Nearest,
            ..default()
        });
        image
    }
}

/// Initial contents of both channels
#[derive(Debug, Clone)]
pub struct InitialState {
    pub position: StateTexture,
    pub velocity: StateTexture,
}

impl InitialState {
    pub fn seeded(config: &FlockConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let position = StateTexture::seeded_positions(config.width, config.bounds, &mut rng);
        let velocity = StateTexture::seeded_velocities(config.width, &mut rng);
        Self { position, velocity }
    }
}

/// GPU-resident ping/pong pairs for both channels
#[derive(Debug, Clone)]
pub struct StateTexturePool {
    pub width: u32,
    pub position: PingPong<Handle<Image>>,
    pub velocity: PingPong<Handle<Image>>,
}

impl StateTexturePool {
    /// Upload the seeded state into both slots of each channel.
    ///
    /// Both slots start identical, so a frame where the compute pass could
    /// not run yet still exposes valid state to the renderer.
    pub fn new(initial: &InitialState, images: &mut Assets<Image>) -> Self {
        let mut pair = |texture: &StateTexture| {
            PingPong::new(images.add(texture.to_image()), images.add(texture.to_image()))
        };
        let position = pair(&initial.position);
        let velocity = pair(&initial.velocity);
        Self {
            width: initial.position.width,
            position,
            velocity,
        }
    }

    /// Publish this frame's writes on both channels at once
    pub fn commit(&mut self) {
        self.position.commit();
        self.velocity.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_mapping() {
        assert_eq!(texel_of(0, 32), UVec2::new(0, 0));
        assert_eq!(texel_of(33, 32), UVec2::new(1, 1));
        assert_eq!(texel_of(1023, 32), UVec2::new(31, 31));
        assert_eq!(reference_of(33, 32), Vec2::new(1.0 / 32.0, 1.0 / 32.0));
    }

    #[test]
    fn test_initial_state_within_bounds() {
        let config = FlockConfig::default();
        let state = InitialState::seeded(&config);
        let half = config.half_bounds();

        assert_eq!(state.position.len(), config.particle_count());
        assert_eq!(state.velocity.len(), config.particle_count());

        for texel in &state.position.texels {
            assert!(texel.truncate().abs().max_element() <= half);
            assert_eq!(texel.w, 1.0);
        }
        for texel in &state.velocity.texels {
            assert!(texel.truncate().abs().max_element() <= 5.0);
            assert_eq!(texel.w, 1.0);
        }
    }

    #[test]
    fn test_seed_is_deterministic() {
        let config = FlockConfig::default();
        let a = InitialState::seeded(&config);
        let b = InitialState::seeded(&config);
        assert_eq!(a.position, b.position);

        let other = InitialState::seeded(&FlockConfig {
            seed: config.seed + 1,
            ..default()
        });
        assert_ne!(a.position, other.position);
    }

    #[test]
    fn test_byte_layout() {
        let texture = StateTexture::from_texels(1, vec![Vec4::new(1.0, 2.0, 3.0, 4.0)]);
        let bytes = texture.to_bytes();
        assert_eq!(bytes.len(), TEXEL_SIZE);
        assert_eq!(&bytes[4..8], &2.0f32.to_le_bytes());
    }

    #[test]
    fn test_image_is_storage_capable() {
        let image = StateTexture::new(8).to_image();
        let usage = image.texture_descriptor.usage;
        assert!(usage.contains(TextureUsages::STORAGE_BINDING));
        assert!(usage.contains(TextureUsages::TEXTURE_BINDING));
        assert_eq!(image.texture_descriptor.format, STATE_TEXTURE_FORMAT);
    }
}
