//! Off-screen targets of a GPU layer and the blur/composite passes between them.
//!
//! main (full size) → quarter (downsample) → blur_h → blur_v, then main (and
//! the blurred copy) are composited onto the destination.

use std::rc::Rc;

use crate::error::RenderResult;

use super::common::{
    check_texture_size, create_sampler, primitive_state, texture_bind_group, texture_layout,
    uniform_layout, PassParams, TARGET_FORMAT,
};
use super::programs::{BlendMode, PixelShaderId, ProgramCache, ProgramKey, VertexShaderId};
use super::shader::{self, ShaderStage, PASS_FRAGMENTS, USER_ENTRY_POINT};

/// Size of the downsample and blur targets.
pub fn quarter_size(width: u32, height: u32) -> (u32, u32) {
    ((width / 4).max(1), (height / 4).max(1))
}

/// Shader used to put the main target onto the destination.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompositeProgram {
    PostProcess,
    /// Main and blurred targets mixed by the blur amount.
    Blend,
    /// Main target scaled by opacity.
    Composite,
    Default,
}

/// Where the layer's post-process shader stands at composite time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PostProcessState {
    None,
    Ready,
    /// Installed but unusable; the layer composites plainly.
    Failed,
}

/// Picks the composite shader, highest priority first.
pub fn select_composite_program(post: PostProcessState, blur: f32, opacity: f32) -> CompositeProgram {
    match post {
        PostProcessState::Ready => return CompositeProgram::PostProcess,
        PostProcessState::Failed => return CompositeProgram::Default,
        PostProcessState::None => {}
    }
    if blur > 0.0 {
        CompositeProgram::Blend
    } else if opacity != 1.0 {
        CompositeProgram::Composite
    } else {
        CompositeProgram::Default
    }
}

#[inline]
pub fn needs_blur_pass(blur: f32, always_update_blur: bool) -> bool {
    blur > 0.0 || always_update_blur
}

/// Per-frame inputs of [`RenderTargetPipeline::composite`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CompositeSettings {
    pub opacity: f32,
    pub blur: f32,
    pub always_update_blur: bool,
    pub smoothing: bool,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self { opacity: 1.0, blur: 0.0, always_update_blur: false, smoothing: false }
    }
}

struct Target {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    nearest: wgpu::BindGroup,
    linear: wgpu::BindGroup,
    width: u32,
    height: u32,
}

impl Target {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        samplers: (&wgpu::Sampler, &wgpu::Sampler),
        label: &str,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        check_texture_size(label, width, height, device.limits().max_texture_dimension_2d)?;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let nearest = texture_bind_group(device, layout, label, &view, samplers.0);
        let linear = texture_bind_group(device, layout, label, &view, samplers.1);
        Ok(Self { texture, view, nearest, linear, width, height })
    }

    fn bind_group(&self, smooth: bool) -> &wgpu::BindGroup {
        if smooth { &self.linear } else { &self.nearest }
    }
}

struct ParamsSlot {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl ParamsSlot {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<PassParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() }],
        });
        Self { buffer, bind_group }
    }

    fn write(&self, queue: &wgpu::Queue, params: PassParams) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&params));
    }
}

struct PostProcess {
    id: u64,
    source: String,
}

/// Render targets of one GPU layer.
pub struct RenderTargetPipeline {
    texture_bgl: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    nearest: wgpu::Sampler,
    linear: wgpu::Sampler,

    main: Target,
    quarter: Target,
    blur_h: Target,
    blur_v: Target,

    downsample_params: ParamsSlot,
    blur_h_params: ParamsSlot,
    blur_v_params: ParamsSlot,
    composite_params: ParamsSlot,

    pass_module: Option<wgpu::ShaderModule>,
    post: Option<PostProcess>,
}

impl RenderTargetPipeline {
    pub(crate) fn new(device: &wgpu::Device, width: u32, height: u32) -> RenderResult<Self> {
        let params_bgl =
            uniform_layout::<PassParams>(device, "lamina pass params bgl", wgpu::ShaderStages::FRAGMENT);
        let texture_bgl = texture_layout(device, "lamina pass texture bgl");
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lamina pass pipeline layout"),
            bind_group_layouts: &[&params_bgl, &texture_bgl, &texture_bgl],
            immediate_size: 0,
        });
        let nearest = create_sampler(device, false);
        let linear = create_sampler(device, true);

        let (width, height) = (width.max(1), height.max(1));
        let (qw, qh) = quarter_size(width, height);
        let samplers = (&nearest, &linear);
        let main = Target::new(device, &texture_bgl, samplers, "lamina main target", width, height)?;
        let quarter = Target::new(device, &texture_bgl, samplers, "lamina quarter target", qw, qh)?;
        let blur_h = Target::new(device, &texture_bgl, samplers, "lamina blur h target", qw, qh)?;
        let blur_v = Target::new(device, &texture_bgl, samplers, "lamina blur v target", qw, qh)?;

        Ok(Self {
            downsample_params: ParamsSlot::new(device, &params_bgl, "lamina downsample params"),
            blur_h_params: ParamsSlot::new(device, &params_bgl, "lamina blur h params"),
            blur_v_params: ParamsSlot::new(device, &params_bgl, "lamina blur v params"),
            composite_params: ParamsSlot::new(device, &params_bgl, "lamina composite params"),
            texture_bgl,
            layout,
            nearest,
            linear,
            main,
            quarter,
            blur_h,
            blur_v,
            pass_module: None,
            post: None,
        })
    }

    /// Recreates the targets when the size changes; their contents are lost.
    ///
    /// `Ok(true)` when they were recreated. On error the old targets stay.
    pub(crate) fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> RenderResult<bool> {
        let (width, height) = (width.max(1), height.max(1));
        if (self.main.width, self.main.height) == (width, height) {
            return Ok(false);
        }
        let (qw, qh) = quarter_size(width, height);
        let samplers = (&self.nearest, &self.linear);
        let bgl = &self.texture_bgl;
        let main = Target::new(device, bgl, samplers, "lamina main target", width, height)?;
        self.quarter = Target::new(device, bgl, samplers, "lamina quarter target", qw, qh)?;
        self.blur_h = Target::new(device, bgl, samplers, "lamina blur h target", qw, qh)?;
        self.blur_v = Target::new(device, bgl, samplers, "lamina blur v target", qw, qh)?;
        self.main = main;
        log::debug!("render targets resized to {width}x{height}");
        Ok(true)
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.main.width, self.main.height)
    }

    #[inline]
    pub(crate) fn main_view(&self) -> &wgpu::TextureView {
        &self.main.view
    }

    #[inline]
    pub(crate) fn main_texture(&self) -> &wgpu::Texture {
        &self.main.texture
    }

    /// Replaces the post-process shader; `id` must be new for every source.
    pub(crate) fn set_post_process(&mut self, programs: &mut ProgramCache, id: u64, source: Option<String>) {
        if let Some(old) = self.post.take() {
            programs.evict_pixel_shader(PixelShaderId::PostProcess(old.id));
        }
        self.post = source.map(|source| PostProcess { id, source });
    }

    pub(crate) fn has_post_process(&self) -> bool {
        self.post.is_some()
    }

    /// Drops cached GPU objects that belong to a lost device.
    pub(crate) fn forget_programs(&mut self) {
        self.pass_module = None;
    }

    fn builtin_module(&mut self, device: &wgpu::Device) -> RenderResult<wgpu::ShaderModule> {
        if let Some(module) = &self.pass_module {
            return Ok(module.clone());
        }
        let source = shader::assemble(PASS_FRAGMENTS, ShaderStage::Pass);
        let module = shader::create_module(device, "lamina passes", &source)?;
        self.pass_module = Some(module.clone());
        Ok(module)
    }

    fn program(
        &mut self,
        device: &wgpu::Device,
        programs: &mut ProgramCache,
        pixel: PixelShaderId,
        blend: BlendMode,
        format: wgpu::TextureFormat,
    ) -> Option<Rc<wgpu::RenderPipeline>> {
        let key = ProgramKey { vertex: VertexShaderId::Fullscreen, pixel, blend, format };
        if let Some(cached) = programs.cached(&key) {
            return cached;
        }

        if let PixelShaderId::PostProcess(id) = pixel {
            let post = self.post.as_ref().filter(|p| p.id == id)?;
            let layout = &self.layout;
            return programs.get_or_create(key, || {
                let label = format!("post-process {id}");
                let source =
                    shader::validate_fragment(&label, &post.source, ShaderStage::Pass, USER_ENTRY_POINT)?;
                let module = shader::create_module(device, &label, &source)?;
                build_pass_pipeline(device, layout, &module, &label, USER_ENTRY_POINT, blend, format)
            });
        }

        let entry = match pixel {
            PixelShaderId::Downsample => "fs_downsample",
            PixelShaderId::BlurHorizontal => "fs_blur_h",
            PixelShaderId::BlurVertical => "fs_blur_v",
            PixelShaderId::Blend => "fs_blend",
            PixelShaderId::Composite => "fs_composite",
            PixelShaderId::Default => "fs_default",
            _ => return None,
        };
        let module = self.builtin_module(device);
        let layout = &self.layout;
        programs.get_or_create(key, || {
            build_pass_pipeline(device, layout, &module?, entry, entry, blend, format)
        })
    }

    /// Downsample, then blur horizontally and vertically into `blur_v`.
    pub(crate) fn run_blur(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        programs: &mut ProgramCache,
    ) -> bool {
        let replace = BlendMode::Replace;
        let (Some(down), Some(blur_h), Some(blur_v)) = (
            self.program(device, programs, PixelShaderId::Downsample, replace, TARGET_FORMAT),
            self.program(device, programs, PixelShaderId::BlurHorizontal, replace, TARGET_FORMAT),
            self.program(device, programs, PixelShaderId::BlurVertical, replace, TARGET_FORMAT),
        ) else {
            return false;
        };

        self.downsample_params
            .write(queue, PassParams::sampling(self.main.width, self.main.height));
        let quarter = PassParams::sampling(self.quarter.width, self.quarter.height);
        self.blur_h_params.write(queue, quarter);
        self.blur_v_params.write(queue, quarter);

        // Group 2 is always bound; it must never be the pass's own attachment.
        fullscreen_pass(
            encoder,
            "lamina downsample pass",
            &self.quarter.view,
            &down,
            &self.downsample_params.bind_group,
            self.main.bind_group(true),
            self.blur_v.bind_group(true),
        );
        fullscreen_pass(
            encoder,
            "lamina blur h pass",
            &self.blur_h.view,
            &blur_h,
            &self.blur_h_params.bind_group,
            self.quarter.bind_group(true),
            self.blur_v.bind_group(true),
        );
        fullscreen_pass(
            encoder,
            "lamina blur v pass",
            &self.blur_v.view,
            &blur_v,
            &self.blur_v_params.bind_group,
            self.blur_h.bind_group(true),
            self.quarter.bind_group(true),
        );
        true
    }

    /// Blurs when needed and draws the main target onto `dest` with
    /// premultiplied source-over.
    ///
    /// Returns the program that was used, `None` when not even the default
    /// program is available.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn composite(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        programs: &mut ProgramCache,
        dest: &wgpu::TextureView,
        dest_format: wgpu::TextureFormat,
        settings: CompositeSettings,
    ) -> Option<CompositeProgram> {
        if needs_blur_pass(settings.blur, settings.always_update_blur) {
            self.run_blur(device, queue, encoder, programs);
        }

        let over = BlendMode::Over;
        let post = match self.post.as_ref().map(|p| p.id) {
            Some(id) => self.program(device, programs, PixelShaderId::PostProcess(id), over, dest_format),
            None => None,
        };
        let state = match (&self.post, &post) {
            (None, _) => PostProcessState::None,
            (Some(_), Some(_)) => PostProcessState::Ready,
            (Some(_), None) => PostProcessState::Failed,
        };

        let mut choice = select_composite_program(state, settings.blur, settings.opacity);
        let pixel = match choice {
            CompositeProgram::PostProcess => None,
            CompositeProgram::Blend => Some(PixelShaderId::Blend),
            CompositeProgram::Composite => Some(PixelShaderId::Composite),
            CompositeProgram::Default => Some(PixelShaderId::Default),
        };
        let mut pipeline = match pixel {
            Some(pixel) => self.program(device, programs, pixel, over, dest_format),
            None => post,
        };
        if pipeline.is_none() && choice != CompositeProgram::Default {
            choice = CompositeProgram::Default;
            pipeline = self.program(device, programs, PixelShaderId::Default, over, dest_format);
        }
        let pipeline = pipeline?;

        let mut params = PassParams::sampling(self.main.width, self.main.height);
        params.opacity = settings.opacity;
        params.blur = settings.blur;
        self.composite_params.write(queue, params);

        fullscreen_pass(
            encoder,
            "lamina composite pass",
            dest,
            &pipeline,
            &self.composite_params.bind_group,
            self.main.bind_group(settings.smoothing),
            self.blur_v.bind_group(true),
        );
        Some(choice)
    }
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    params: &wgpu::BindGroup,
    main: &wgpu::BindGroup,
    blur: &wgpu::BindGroup,
) {
    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });
    rpass.set_pipeline(pipeline);
    rpass.set_bind_group(0, params, &[]);
    rpass.set_bind_group(1, main, &[]);
    rpass.set_bind_group(2, blur, &[]);
    rpass.draw(0..3, 0..1);
}

fn build_pass_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    label: &str,
    entry_point: &str,
    blend: BlendMode,
    format: wgpu::TextureFormat,
) -> RenderResult<wgpu::RenderPipeline> {
    shader::create_pipeline(
        device,
        &wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_fullscreen"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: blend.state(),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: primitive_state(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_targets_never_collapse() {
        assert_eq!(quarter_size(800, 600), (200, 150));
        assert_eq!(quarter_size(802, 3), (200, 1));
        assert_eq!(quarter_size(1, 1), (1, 1));
    }

    #[test]
    fn composite_priority() {
        use CompositeProgram::*;
        assert_eq!(select_composite_program(PostProcessState::Ready, 0.5, 0.5), PostProcess);
        assert_eq!(select_composite_program(PostProcessState::None, 0.5, 0.5), Blend);
        assert_eq!(select_composite_program(PostProcessState::None, 0.0, 0.5), Composite);
        assert_eq!(select_composite_program(PostProcessState::None, 0.0, 1.0), Default);
    }

    #[test]
    fn failed_post_process_composites_plainly() {
        for (blur, opacity) in [(0.0, 1.0), (0.5, 1.0), (0.0, 0.3), (0.7, 0.2)] {
            assert_eq!(
                select_composite_program(PostProcessState::Failed, blur, opacity),
                CompositeProgram::Default,
                "blur {blur} opacity {opacity}"
            );
        }
    }

    #[test]
    fn blur_pass_runs_when_blurred_or_forced() {
        assert!(needs_blur_pass(0.25, false));
        assert!(needs_blur_pass(0.0, true));
        assert!(!needs_blur_pass(0.0, false));
    }
}
