//! Sprite data shared by drawables, the batcher and both backends.

use bytemuck::{Pod, Zeroable};

use crate::coords::{Aabb, OrientedBox, Vec2};
use crate::drawable::{Canvas, Drawable};
use crate::paint::Color;

/// Handle of a texture registered with a layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Handle of a custom sprite pixel shader registered with a GPU layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Per-quad data, in world space.
///
/// This is also the GPU instance layout: a batch uploads these verbatim.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SpriteInstance {
    /// Top-left corner before rotation.
    pub position: [f32; 2],
    pub size: [f32; 2],
    /// Texture sub-rectangle `[u0, v0, u1, v1]`, normalised.
    pub frame: [f32; 4],
    /// Rotation in radians about the quad center, then alpha.
    pub rotation_alpha: [f32; 2],
    /// Premultiplied tint.
    pub tint: [f32; 4],
}

impl SpriteInstance {
    pub const FULL_FRAME: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    const ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        1 => Float32x2, // position
        2 => Float32x2, // size
        3 => Float32x4, // frame
        4 => Float32x2, // rotation, alpha
        5 => Float32x4  // tint
    ];

    pub fn new(position: Vec2, size: Vec2) -> Self {
        Self {
            position: [position.x, position.y],
            size: [size.x, size.y],
            frame: Self::FULL_FRAME,
            rotation_alpha: [0.0, 1.0],
            tint: Color::white().to_array(),
        }
    }

    #[must_use]
    pub fn with_frame(mut self, frame: [f32; 4]) -> Self {
        self.frame = frame;
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.rotation_alpha[0] = radians;
        self
    }

    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.rotation_alpha[1] = alpha;
        self
    }

    #[must_use]
    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint.to_array();
        self
    }

    #[inline]
    pub fn rotation(&self) -> f32 {
        self.rotation_alpha[0]
    }

    #[inline]
    pub fn alpha(&self) -> f32 {
        self.rotation_alpha[1]
    }

    #[inline]
    pub fn tint_color(&self) -> Color {
        Color::from_premul(self.tint[0], self.tint[1], self.tint[2], self.tint[3])
    }

    pub fn oriented_box(&self) -> OrientedBox {
        let size = Vec2::new(self.size[0], self.size[1]);
        let center = Vec2::new(self.position[0], self.position[1]) + size * 0.5;
        OrientedBox::from_rotation(center, size, self.rotation())
    }

    /// Axis-aligned bounds including rotation.
    pub fn bounds(&self) -> Aabb {
        if self.rotation() == 0.0 {
            Aabb::from_origin_size(
                Vec2::new(self.position[0], self.position[1]),
                Vec2::new(self.size[0], self.size[1]),
            )
        } else {
            self.oriented_box().bounds()
        }
    }

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

/// One textured (or solid, when `texture` is `None`) quad.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sprite {
    pub texture: Option<TextureId>,
    pub instance: SpriteInstance,
    /// Custom pixel shader; `None` is the default sprite shader.
    pub shader: Option<ShaderId>,
}

impl Sprite {
    pub fn textured(texture: TextureId, instance: SpriteInstance) -> Self {
        Self { texture: Some(texture), instance, shader: None }
    }

    pub fn solid(rect: Aabb, color: Color) -> Self {
        Self {
            texture: None,
            instance: SpriteInstance::new(rect.min(), rect.size()).with_tint(color),
            shader: None,
        }
    }
}

/// Ready-made drawable for a single sprite.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteDrawable {
    pub texture: Option<TextureId>,
    pub instance: SpriteInstance,
    pub shader: Option<ShaderId>,
    pub visible: bool,
    pub always_draw: bool,
    pub sort_point: Vec2,
}

impl SpriteDrawable {
    pub fn new(texture: Option<TextureId>, position: Vec2, size: Vec2) -> Self {
        Self {
            texture,
            instance: SpriteInstance::new(position, size),
            shader: None,
            visible: true,
            always_draw: false,
            sort_point: Vec2::new(0.5, 1.0),
        }
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.instance.position = [position.x, position.y];
    }

    pub fn translate(&mut self, d: Vec2) {
        self.instance.position[0] += d.x;
        self.instance.position[1] += d.y;
    }
}

impl Drawable for SpriteDrawable {
    fn bounding_box(&self) -> Aabb {
        self.instance.bounds()
    }

    fn oriented_box(&self) -> Option<OrientedBox> {
        (self.instance.rotation() != 0.0).then(|| self.instance.oriented_box())
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn is_always_drawing(&self) -> bool {
        self.always_draw
    }

    fn position(&self) -> Vec2 {
        Vec2::new(self.instance.position[0], self.instance.position[1])
    }

    fn size(&self) -> Vec2 {
        Vec2::new(self.instance.size[0], self.instance.size[1])
    }

    fn sort_point(&self) -> Vec2 {
        self.sort_point
    }

    fn draw(&self, canvas: &mut dyn Canvas) {
        canvas.draw_sprite(&Sprite {
            texture: self.texture,
            instance: self.instance,
            shader: self.shader,
        });
    }

    fn image_used_in_draw(&self) -> Option<TextureId> {
        self.texture
    }

    fn batch_instance(&self) -> Option<SpriteInstance> {
        self.texture.map(|_| self.instance)
    }

    fn uses_custom_shader(&self) -> bool {
        self.shader.is_some()
    }
}
