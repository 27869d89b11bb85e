use std::rc::Rc;

use anyhow::Context;

use crate::coords::{Aabb, CameraTransform};
use crate::device::{read_texture_rgba8, GpuContext};
use crate::error::{RenderError, RenderResult};
use crate::paint::Color;
use crate::raster::TextureSet;
use crate::sprite::{ShaderId, TextureId};

use super::common::check_texture_size;
use super::programs::ProgramCache;
use super::sprites::{GpuRecorder, ReplayTarget, SpriteRenderer};
use super::targets::{CompositeProgram, CompositeSettings, RenderTargetPipeline};
use super::textures::{BoundTextureState, TextureStore};

/// Everything a layer needs to draw through a GPU context.
///
/// Sprites are recorded into [`GpuRecorder`] during the frame and replayed
/// into the layer's main target by [`GpuLayerBackend::render`]; the main
/// target is then composited onto a destination.
pub struct GpuLayerBackend {
    ctx: Rc<GpuContext>,
    programs: ProgramCache,
    textures: TextureStore,
    bound: BoundTextureState,
    sprites: SpriteRenderer,
    targets: RenderTargetPipeline,
    recorder: GpuRecorder,
}

impl GpuLayerBackend {
    pub fn new(ctx: Rc<GpuContext>, width: u32, height: u32) -> RenderResult<Self> {
        if ctx.is_lost() {
            return Err(RenderError::BackendUnavailable("GPU device is lost".to_owned()));
        }
        let device = ctx.device();
        let (sprites, texture_bgl) = SpriteRenderer::new(device);
        let textures = TextureStore::new(device, ctx.queue(), texture_bgl);
        let targets = RenderTargetPipeline::new(device, width, height)?;

        Ok(Self {
            programs: ProgramCache::new(),
            textures,
            bound: BoundTextureState::new(),
            sprites,
            targets,
            recorder: GpuRecorder::new(),
            ctx,
        })
    }

    #[inline]
    pub fn context(&self) -> &Rc<GpuContext> {
        &self.ctx
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.ctx.is_lost()
    }

    /// `Ok(true)` when the targets were recreated (and their contents lost).
    ///
    /// Fails for a size the device cannot allocate; the old targets stay.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<bool> {
        self.targets.resize(self.ctx.device(), width, height)
    }

    /// Whether a texture of this size can be uploaded.
    pub fn check_texture_size(&self, width: u32, height: u32) -> RenderResult<()> {
        check_texture_size("texture", width, height, self.ctx.max_texture_dimension())
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        self.targets.size()
    }

    /// Empty recorder for the coming frame.
    pub fn begin_frame(&mut self) -> &mut GpuRecorder {
        self.recorder.clear();
        &mut self.recorder
    }

    /// Clears `clip` (canvas pixels) in the main target and replays the
    /// recorded sprites into it. Returns the draw calls issued.
    pub fn render(
        &mut self,
        images: &TextureSet,
        clip: Aabb,
        clear_color: Color,
        transform: CameraTransform,
        smoothing: bool,
    ) -> usize {
        let device = self.ctx.device();
        let queue = self.ctx.queue();
        let (width, height) = self.targets.size();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lamina layer encoder"),
        });
        let target = ReplayTarget {
            view: self.targets.main_view(),
            width,
            height,
            clip,
            clear_color,
            transform,
            smoothing,
        };
        let draw_calls = self.sprites.replay(
            device,
            queue,
            &mut encoder,
            &target,
            &self.recorder,
            &mut self.programs,
            &mut self.textures,
            images,
            &mut self.bound,
        );
        queue.submit(Some(encoder.finish()));
        draw_calls
    }

    /// Composites the main target onto `dest` in its own submission.
    pub fn composite(
        &mut self,
        dest: &wgpu::TextureView,
        dest_format: wgpu::TextureFormat,
        settings: CompositeSettings,
    ) -> Option<CompositeProgram> {
        let mut encoder = self.ctx.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lamina composite encoder"),
        });
        let used = self.composite_with(&mut encoder, dest, dest_format, settings);
        self.ctx.queue().submit(Some(encoder.finish()));
        used
    }

    /// Records the composite into a caller-owned encoder.
    pub fn composite_with(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dest: &wgpu::TextureView,
        dest_format: wgpu::TextureFormat,
        settings: CompositeSettings,
    ) -> Option<CompositeProgram> {
        self.targets.composite(
            self.ctx.device(),
            self.ctx.queue(),
            encoder,
            &mut self.programs,
            dest,
            dest_format,
            settings,
        )
    }

    pub fn set_sprite_shader(&mut self, id: ShaderId, source: Option<String>) {
        self.sprites.set_custom_shader(&mut self.programs, id, source);
    }

    /// Installs (or removes) the post-process shader.
    ///
    /// The source is compiled on the next composite; a failure is logged once
    /// and the default composite is used instead.
    pub fn set_post_process(&mut self, source: Option<String>) {
        let id = self.ctx.next_id();
        self.targets.set_post_process(&mut self.programs, id, source);
    }

    #[inline]
    pub fn has_post_process(&self) -> bool {
        self.targets.has_post_process()
    }

    /// Drops the GPU copy of `id`.
    pub fn forget_texture(&mut self, id: TextureId) {
        self.textures.forget(id);
        self.bound.invalidate_texture(id);
    }

    #[inline]
    pub fn resident_textures(&self) -> usize {
        self.textures.resident_count()
    }

    /// Evicts every cached program.
    pub fn evict_programs(&mut self) {
        self.programs.evict_all();
        self.targets.forget_programs();
        self.bound.invalidate();
    }

    /// Reads the main target back as premultiplied RGBA8.
    pub fn read_main_rgba8(&self) -> anyhow::Result<Vec<u8>> {
        read_texture_rgba8(self.ctx.device(), self.ctx.queue(), self.targets.main_texture())
            .context("reading back the layer target")
    }
}
