use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::batch::BatchSink;
use crate::coords::{Aabb, CameraTransform};
use crate::drawable::{Canvas, Drawable};
use crate::error::RenderResult;
use crate::paint::Color;
use crate::raster::TextureSet;
use crate::sprite::{ShaderId, Sprite, SpriteInstance, TextureId};

use super::common::{
    clip_to_scissor, primitive_state, texture_layout, uniform_layout, CameraUniform, QuadVertex,
    QUAD_INDICES, QUAD_VERTICES, TARGET_FORMAT,
};
use super::programs::{BlendMode, PixelShaderId, ProgramCache, ProgramKey, VertexShaderId};
use super::shader::{self, ShaderStage, SPRITE_FRAGMENT, USER_ENTRY_POINT};
use super::textures::{BoundTextureState, TextureSlot, TextureStore};

/// One recorded GPU draw; instances index into [`GpuRecorder::instances`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum GpuCommand {
    Sprite {
        texture: Option<TextureId>,
        shader: Option<ShaderId>,
        instance: u32,
    },
    Batch {
        texture: TextureId,
        first: u32,
        count: u32,
    },
}

/// Collects a frame's sprites before they are replayed on the GPU.
///
/// Implements [`Canvas`] for immediate drawables and [`BatchSink`] for the
/// batcher, so both paths end up in one instance buffer upload.
#[derive(Debug, Default)]
pub struct GpuRecorder {
    commands: Vec<GpuCommand>,
    instances: Vec<SpriteInstance>,
    touched: Vec<TextureId>,
}

impl GpuRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.instances.clear();
        self.touched.clear();
    }

    #[inline]
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    #[inline]
    pub fn instances(&self) -> &[SpriteInstance] {
        &self.instances
    }

    #[inline]
    pub fn touched(&self) -> &[TextureId] {
        &self.touched
    }

    fn push_instance(&mut self, instance: SpriteInstance) -> u32 {
        self.instances.push(instance);
        (self.instances.len() - 1) as u32
    }
}

impl Canvas for GpuRecorder {
    fn draw_sprite(&mut self, sprite: &Sprite) {
        let instance = self.push_instance(sprite.instance);
        self.commands.push(GpuCommand::Sprite {
            texture: sprite.texture,
            shader: sprite.shader,
            instance,
        });
    }
}

impl BatchSink for GpuRecorder {
    fn draw_drawable(&mut self, drawable: &dyn Drawable) {
        drawable.draw(self);
    }

    fn draw_sprite(&mut self, sprite: &Sprite) {
        Canvas::draw_sprite(self, sprite);
    }

    fn draw_batch(&mut self, texture: TextureId, instances: &[SpriteInstance]) {
        let first = self.instances.len() as u32;
        self.instances.extend_from_slice(instances);
        self.commands.push(GpuCommand::Batch {
            texture,
            first,
            count: instances.len() as u32,
        });
    }

    fn touch_texture(&mut self, texture: TextureId) {
        self.touched.push(texture);
    }
}

/// Where and how a recording is replayed.
pub(crate) struct ReplayTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// Canvas-pixel region to clear and repaint.
    pub clip: Aabb,
    pub clear_color: Color,
    pub transform: CameraTransform,
    pub smoothing: bool,
}

/// Instanced sprite renderer.
///
/// Geometry is in world space; the vertex shader applies the camera
/// transform and maps canvas pixels to NDC.
pub struct SpriteRenderer {
    layout: wgpu::PipelineLayout,
    camera_ubo: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,

    quad_vbo: wgpu::Buffer,
    quad_ibo: wgpu::Buffer,

    instance_vbo: Option<wgpu::Buffer>,
    instance_capacity: usize,

    custom_sources: HashMap<ShaderId, String>,
    warned_custom: bool,
}

impl SpriteRenderer {
    pub(crate) fn new(device: &wgpu::Device) -> (Self, wgpu::BindGroupLayout) {
        let camera_bgl =
            uniform_layout::<CameraUniform>(device, "lamina sprite camera bgl", wgpu::ShaderStages::VERTEX);
        let texture_bgl = texture_layout(device, "lamina sprite texture bgl");

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lamina sprite pipeline layout"),
            bind_group_layouts: &[&camera_bgl, &texture_bgl],
            immediate_size: 0,
        });

        let camera_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lamina sprite camera ubo"),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lamina sprite camera bind group"),
            layout: &camera_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_ubo.as_entire_binding(),
            }],
        });

        let quad_vbo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lamina quad vbo"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let quad_ibo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lamina quad ibo"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let renderer = Self {
            layout,
            camera_ubo,
            camera_bind_group,
            quad_vbo,
            quad_ibo,
            instance_vbo: None,
            instance_capacity: 0,
            custom_sources: HashMap::new(),
            warned_custom: false,
        };
        (renderer, texture_bgl)
    }

    /// Registers (or replaces) a custom sprite pixel shader.
    pub(crate) fn set_custom_shader(&mut self, programs: &mut ProgramCache, id: ShaderId, source: Option<String>) {
        programs.evict_pixel_shader(PixelShaderId::CustomSprite(id));
        match source {
            Some(src) => {
                self.custom_sources.insert(id, src);
            }
            None => {
                self.custom_sources.remove(&id);
            }
        }
    }

    fn program(
        &mut self,
        device: &wgpu::Device,
        programs: &mut ProgramCache,
        pixel: PixelShaderId,
        blend: BlendMode,
    ) -> Option<std::rc::Rc<wgpu::RenderPipeline>> {
        let key = ProgramKey { vertex: VertexShaderId::Sprite, pixel, blend, format: TARGET_FORMAT };
        let (label, fragment) = match pixel {
            PixelShaderId::CustomSprite(id) => match self.custom_sources.get(&id) {
                Some(src) => (format!("sprite shader {}", id.0), src.as_str()),
                None => {
                    if !self.warned_custom {
                        log::warn!("custom sprite shader {id:?} is not registered; using the default");
                        self.warned_custom = true;
                    }
                    return None;
                }
            },
            _ => ("sprite".to_owned(), SPRITE_FRAGMENT),
        };
        let layout = &self.layout;
        programs.get_or_create(key, || build_sprite_pipeline(device, layout, &label, fragment, blend))
    }

    fn ensure_instance_capacity(&mut self, device: &wgpu::Device, needed: usize) {
        if needed <= self.instance_capacity && self.instance_vbo.is_some() {
            return;
        }
        let capacity = needed.next_power_of_two().max(64);
        self.instance_vbo = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lamina sprite instance vbo"),
            size: (capacity * std::mem::size_of::<SpriteInstance>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.instance_capacity = capacity;
    }

    /// Clears `target.clip` and replays `recorder` into it.
    ///
    /// Returns the number of draw calls issued, the clear included.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn replay(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &ReplayTarget<'_>,
        recorder: &GpuRecorder,
        programs: &mut ProgramCache,
        textures: &mut TextureStore,
        images: &TextureSet,
        bound: &mut BoundTextureState,
    ) -> usize {
        let Some((sx, sy, sw, sh)) = clip_to_scissor(target.clip, target.width, target.height) else {
            return 0;
        };

        // Resolve programs and textures before the pass borrows anything.
        let Some(default_over) = self.program(device, programs, PixelShaderId::Sprite, BlendMode::Over) else {
            return 0;
        };
        let Some(replace) = self.program(device, programs, PixelShaderId::Sprite, BlendMode::Replace) else {
            return 0;
        };

        let mut custom = HashMap::new();
        for cmd in recorder.commands() {
            match *cmd {
                GpuCommand::Sprite { texture, shader, .. } => {
                    if let Some(id) = shader {
                        if !custom.contains_key(&id) {
                            let p = self.program(device, programs, PixelShaderId::CustomSprite(id), BlendMode::Over);
                            custom.insert(id, p);
                        }
                    }
                    if let Some(t) = texture {
                        textures.ensure(device, queue, images, t, target.smoothing);
                    }
                }
                GpuCommand::Batch { texture, .. } => {
                    textures.ensure(device, queue, images, texture, target.smoothing);
                }
            }
        }
        for t in recorder.touched() {
            textures.ensure(device, queue, images, *t, target.smoothing);
        }

        // The clear quad goes last in the buffer and covers the whole canvas;
        // the scissor limits it to the clip.
        let world = target.transform.canvas_to_world_box(Aabb::new(
            0.0,
            0.0,
            target.width as f32,
            target.height as f32,
        ));
        let clear_quad = SpriteInstance::new(world.min(), world.size()).with_tint(target.clear_color);
        let clear_index = recorder.instances().len() as u32;

        self.ensure_instance_capacity(device, recorder.instances().len() + 1);
        let Some(instance_vbo) = self.instance_vbo.as_ref() else { return 0 };
        queue.write_buffer(instance_vbo, 0, bytemuck::cast_slice(recorder.instances()));
        queue.write_buffer(
            instance_vbo,
            (clear_index as usize * std::mem::size_of::<SpriteInstance>()) as u64,
            bytemuck::bytes_of(&clear_quad),
        );
        queue.write_buffer(
            &self.camera_ubo,
            0,
            bytemuck::bytes_of(&CameraUniform::new(&target.transform, target.width, target.height)),
        );

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("lamina sprite pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        bound.invalidate();
        rpass.set_scissor_rect(sx, sy, sw, sh);
        rpass.set_bind_group(0, &self.camera_bind_group, &[]);
        rpass.set_vertex_buffer(0, self.quad_vbo.slice(..));
        rpass.set_vertex_buffer(1, instance_vbo.slice(..));
        rpass.set_index_buffer(self.quad_ibo.slice(..), wgpu::IndexFormat::Uint16);

        let mut draw_calls = 0;
        let bind = |rpass: &mut wgpu::RenderPass<'_>, bound: &mut BoundTextureState, slot| {
            let Some(group) = textures.bind_group(slot) else { return false };
            if bound.bind(slot) {
                rpass.set_bind_group(1, group, &[]);
            }
            true
        };

        rpass.set_pipeline(&replace);
        if bind(&mut rpass, bound, TextureSlot::White) {
            rpass.draw_indexed(0..6, 0, clear_index..clear_index + 1);
            draw_calls += 1;
        }

        rpass.set_pipeline(&default_over);
        let mut on_default = true;
        for cmd in recorder.commands() {
            let (slot, pipeline, range) = match *cmd {
                GpuCommand::Sprite { texture, shader, instance } => {
                    let slot = texture.map_or(TextureSlot::White, TextureSlot::Texture);
                    let pipeline = shader.and_then(|id| custom.get(&id).cloned().flatten());
                    (slot, pipeline, instance..instance + 1)
                }
                GpuCommand::Batch { texture, first, count } => {
                    (TextureSlot::Texture(texture), None, first..first + count)
                }
            };

            match &pipeline {
                Some(p) => {
                    rpass.set_pipeline(p);
                    on_default = false;
                }
                None if !on_default => {
                    rpass.set_pipeline(&default_over);
                    on_default = true;
                }
                None => {}
            }
            if bind(&mut rpass, bound, slot) {
                rpass.draw_indexed(0..6, 0, range);
                draw_calls += 1;
            }
        }
        draw_calls
    }
}

fn build_sprite_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    label: &str,
    fragment: &str,
    blend: BlendMode,
) -> RenderResult<wgpu::RenderPipeline> {
    let source = shader::validate_fragment(label, fragment, ShaderStage::Sprite, USER_ENTRY_POINT)?;
    let module = shader::create_module(device, label, &source)?;
    shader::create_pipeline(
        device,
        &wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_sprite"),
                compilation_options: Default::default(),
                buffers: &[QuadVertex::layout(), SpriteInstance::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some(USER_ENTRY_POINT),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
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
