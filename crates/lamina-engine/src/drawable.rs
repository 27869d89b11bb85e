//! The interface a layer consumes from scene objects.

use std::cell::RefCell;
use std::rc::Rc;

use crate::coords::{Aabb, OrientedBox, Vec2};
use crate::paint::Color;
use crate::sprite::{Sprite, SpriteInstance, TextureId};

/// Shared handle to a drawable.
///
/// Layers never own drawables; they keep a `Weak` and must be told about
/// additions, moves and removals.
pub type DrawableRef = Rc<RefCell<dyn Drawable>>;

/// Something a layer can paint.
///
/// Geometry is in world space. Everything a layer needs for culling, sorting
/// and batching is queried through this trait once per frame.
pub trait Drawable {
    fn bounding_box(&self) -> Aabb;

    /// Tighter bounds when the object is rotated.
    fn oriented_box(&self) -> Option<OrientedBox> {
        None
    }

    fn is_visible(&self) -> bool {
        true
    }

    /// Drawn every frame, visible or not.
    fn is_always_drawing(&self) -> bool {
        false
    }

    fn position(&self) -> Vec2 {
        self.bounding_box().min()
    }

    fn size(&self) -> Vec2 {
        self.bounding_box().size()
    }

    /// Normalised anchor of the built-in sort key.
    fn sort_point(&self) -> Vec2 {
        Vec2::new(0.5, 1.0)
    }

    /// Immediate draw.
    fn draw(&self, canvas: &mut dyn Canvas);

    fn image_used_in_draw(&self) -> Option<TextureId> {
        None
    }

    /// Batched draw: the single quad this object contributes to a batch.
    fn batch_instance(&self) -> Option<SpriteInstance> {
        None
    }

    fn uses_custom_shader(&self) -> bool {
        false
    }

    fn uses_batchable_draw(&self) -> bool {
        !self.uses_custom_shader()
            && self.image_used_in_draw().is_some()
            && self.batch_instance().is_some()
    }
}

/// Backend-neutral drawing surface handed to [`Drawable::draw`].
pub trait Canvas {
    fn draw_sprite(&mut self, sprite: &Sprite);

    fn fill_rect(&mut self, rect: Aabb, color: Color) {
        self.draw_sprite(&Sprite::solid(rect, color));
    }
}

/// Solid rectangle; handy for backgrounds and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RectDrawable {
    pub rect: Aabb,
    pub color: Color,
    pub visible: bool,
}

impl RectDrawable {
    pub fn new(rect: Aabb, color: Color) -> Self {
        Self { rect, color, visible: true }
    }
}

impl Drawable for RectDrawable {
    fn bounding_box(&self) -> Aabb {
        self.rect
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn draw(&self, canvas: &mut dyn Canvas) {
        canvas.fill_rect(self.rect, self.color);
    }
}
