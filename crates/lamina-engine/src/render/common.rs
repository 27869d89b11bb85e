//! Shared GPU types and utilities used by the sprite and render-target passes.

use bytemuck::{Pod, Zeroable};

use crate::coords::{Aabb, CameraTransform};
use crate::error::{RenderError, RenderResult};

/// Format of every off-screen layer target.
pub(crate) const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Refuses a texture the device cannot create (`max_texture_dimension_2d`).
pub(crate) fn check_texture_size(what: &str, width: u32, height: u32, max_dimension: u32) -> RenderResult<()> {
    if width > max_dimension || height > max_dimension {
        return Err(RenderError::BackendUnavailable(format!(
            "{what} of {width}x{height} exceeds the device limit of {max_dimension} pixels"
        )));
    }
    Ok(())
}

// ── blend ─────────────────────────────────────────────────────────────────

pub(crate) fn premul_alpha_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

// ── uniforms ──────────────────────────────────────────────────────────────

/// Camera block of the sprite vertex shader.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub(crate) struct CameraUniform {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
    pub target_size: [f32; 2],
    pub resolution: f32,
    pub _pad: f32, // 16-byte alignment
}

impl CameraUniform {
    pub(crate) fn new(transform: &CameraTransform, width: u32, height: u32) -> Self {
        Self {
            scale: [transform.scale.x, transform.scale.y],
            translate: [transform.translate.x, transform.translate.y],
            target_size: [width.max(1) as f32, height.max(1) as f32],
            resolution: transform.resolution,
            _pad: 0.0,
        }
    }
}

/// Parameter block of the full-screen passes (`LaminaParams` in WGSL).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub(crate) struct PassParams {
    /// Size of one source texel in UV units.
    pub texel: [f32; 2],
    pub opacity: f32,
    pub blur: f32,
}

impl PassParams {
    pub(crate) fn sampling(width: u32, height: u32) -> Self {
        Self {
            texel: [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32],
            opacity: 1.0,
            blur: 0.0,
        }
    }
}

/// Minimum binding size of a uniform block type.
///
/// Every block here is a non-empty `Pod` struct, so the size is never zero.
pub(crate) fn ubo_min_binding_size<T: Pod>() -> Option<std::num::NonZeroU64> {
    std::num::NonZeroU64::new(std::mem::size_of::<T>() as u64)
}

// ── quad vertex ───────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    pub pos: [f32; 2], // 0..1
}

impl QuadVertex {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

pub(crate) const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { pos: [0.0, 0.0] },
    QuadVertex { pos: [1.0, 0.0] },
    QuadVertex { pos: [1.0, 1.0] },
    QuadVertex { pos: [0.0, 1.0] },
];

pub(crate) const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

// ── scissor rect ──────────────────────────────────────────────────────────

/// Converts a canvas-pixel clip rect to scissor arguments, clamped to the
/// target.
///
/// Returns `None` for a zero-area result (the pass should skip its draws).
pub(crate) fn clip_to_scissor(clip: Aabb, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(width);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(height);
    let x = clamp_x(clip.min_x);
    let y = clamp_y(clip.min_y);
    let w = clamp_x(clip.max_x).saturating_sub(x);
    let h = clamp_y(clip.max_y).saturating_sub(y);
    if w == 0 || h == 0 { None } else { Some((x, y, w, h)) }
}

// ── bind group layouts ────────────────────────────────────────────────────

pub(crate) fn uniform_layout<T: Pod>(
    device: &wgpu::Device,
    label: &str,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: ubo_min_binding_size::<T>(),
            },
            count: None,
        }],
    })
}

/// Texture at binding 0, sampler at binding 1.
pub(crate) fn texture_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

pub(crate) fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(view) },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
        ],
    })
}

pub(crate) fn create_sampler(device: &wgpu::Device, smooth: bool) -> wgpu::Sampler {
    let filter = if smooth { wgpu::FilterMode::Linear } else { wgpu::FilterMode::Nearest };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(if smooth { "lamina linear sampler" } else { "lamina nearest sampler" }),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

pub(crate) fn primitive_state() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scissor_is_clamped_and_rounded() {
        assert_eq!(clip_to_scissor(Aabb::new(-4.0, 2.0, 10.0, 8.0), 8, 8), Some((0, 2, 8, 6)));
        assert_eq!(clip_to_scissor(Aabb::new(9.0, 0.0, 12.0, 4.0), 8, 8), None);
        assert_eq!(clip_to_scissor(Aabb::new(1.0001, 1.0, 2.9999, 3.0), 8, 8), Some((1, 1, 2, 2)));
    }

    #[test]
    fn textures_past_the_device_limit_are_refused() {
        assert!(check_texture_size("main target", 2048, 2048, 2048).is_ok());
        let err = check_texture_size("main target", 2049, 16, 2048).unwrap_err();
        assert!(matches!(err, RenderError::BackendUnavailable(_)));
        assert!(err.to_string().contains("2049x16"));
        assert!(check_texture_size("sprite texture", 1, 8193, 8192).is_err());
    }

    #[test]
    fn uniform_blocks_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<CameraUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<PassParams>() % 16, 0);
    }
}
