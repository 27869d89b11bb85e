use crate::coords::{CameraTransform, OrientedBox};
use crate::drawable::Canvas;
use crate::sprite::{Sprite, TextureId};

use super::{RasterSurface, TextureSet};

/// [`Canvas`] that rasterizes world-space sprites onto a [`RasterSurface`].
pub struct RasterCanvas<'a> {
    surface: &'a mut RasterSurface,
    textures: &'a TextureSet,
    transform: CameraTransform,
    smoothing: bool,
    missing: Vec<TextureId>,
    sprites: usize,
}

impl<'a> RasterCanvas<'a> {
    pub fn new(
        surface: &'a mut RasterSurface,
        textures: &'a TextureSet,
        transform: CameraTransform,
        smoothing: bool,
    ) -> Self {
        Self { surface, textures, transform, smoothing, missing: Vec::new(), sprites: 0 }
    }

    /// Textures referenced this pass that are not registered.
    #[inline]
    pub fn missing_textures(&self) -> &[TextureId] {
        &self.missing
    }

    /// Sprites rasterized so far.
    #[inline]
    pub fn sprite_count(&self) -> usize {
        self.sprites
    }
}

impl Canvas for RasterCanvas<'_> {
    fn draw_sprite(&mut self, sprite: &Sprite) {
        let image = match sprite.texture {
            Some(id) => match self.textures.get(id) {
                Some(img) => Some(img.as_ref()),
                None => {
                    // Missing textures render as blank.
                    if !self.missing.contains(&id) {
                        self.missing.push(id);
                    }
                    return;
                }
            },
            None => None,
        };

        let world = sprite.instance.oriented_box();
        let quad = OrientedBox::new(
            self.transform.world_to_canvas(world.center),
            self.transform.world_to_canvas_dir(world.half_x),
            self.transform.world_to_canvas_dir(world.half_y),
        );
        self.surface.draw_quad(
            &quad,
            sprite.instance.frame,
            image,
            sprite.instance.tint_color(),
            sprite.instance.alpha(),
            self.smoothing,
        );
        self.sprites += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{Aabb, Vec2};
    use crate::paint::Color;

    #[test]
    fn transform_maps_world_to_canvas() {
        let mut surface = RasterSurface::new(20, 20);
        let textures = TextureSet::new();
        // Zoom 2, resolution 1: world [0, 2) lands on canvas [10, 14).
        let transform = CameraTransform::new(Vec2::splat(2.0), Vec2::new(10.0, 10.0), 1.0);
        let mut canvas = RasterCanvas::new(&mut surface, &textures, transform, false);
        canvas.fill_rect(Aabb::new(0.0, 0.0, 2.0, 2.0), Color::white());
        assert_eq!(canvas.sprite_count(), 1);
        drop(canvas);

        assert_eq!(surface.pixel(10, 10), Color::white());
        assert_eq!(surface.pixel(13, 13), Color::white());
        assert_eq!(surface.pixel(14, 13), Color::transparent());
        assert_eq!(surface.pixel(9, 10), Color::transparent());
    }

    #[test]
    fn missing_texture_draws_nothing() {
        let mut surface = RasterSurface::new(4, 4);
        let textures = TextureSet::new();
        let mut canvas =
            RasterCanvas::new(&mut surface, &textures, CameraTransform::default(), false);
        let sprite = Sprite::textured(
            TextureId(9),
            crate::sprite::SpriteInstance::new(Vec2::zero(), Vec2::splat(4.0)),
        );
        canvas.draw_sprite(&sprite);
        canvas.draw_sprite(&sprite);
        assert_eq!(canvas.missing_textures(), &[TextureId(9)]);
        assert_eq!(canvas.sprite_count(), 0);
        drop(canvas);
        assert!(surface.pixels().iter().all(|p| *p == Color::transparent()));
    }
}
