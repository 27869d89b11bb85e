use super::{Aabb, Vec2};

/// Camera as seen by the world: the world point shown at the screen center and
/// a zoom factor.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

impl Camera {
    #[inline]
    pub const fn new(x: f32, y: f32, zoom: f32) -> Self {
        Self { x, y, zoom }
    }

    /// Scale/translate that centers the camera on a screen of `screen_size`.
    pub fn to_transform(self, screen_size: Vec2, resolution: f32) -> CameraTransform {
        let scale = Vec2::splat(self.zoom);
        let translate = screen_size * 0.5 - Vec2::new(self.x, self.y) * self.zoom;
        CameraTransform { scale, translate, resolution }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.zoom.is_finite()
    }
}

/// World ↔ screen ↔ canvas mapping for one layer.
///
/// - screen = world * scale + translate (logical pixels)
/// - canvas = screen * resolution (physical pixels of the layer surface)
///
/// All functions are pure; they never touch layer state.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraTransform {
    pub scale: Vec2,
    pub translate: Vec2,
    pub resolution: f32,
}

impl Default for CameraTransform {
    fn default() -> Self {
        Self {
            scale: Vec2::splat(1.0),
            translate: Vec2::zero(),
            resolution: 1.0,
        }
    }
}

impl CameraTransform {
    #[inline]
    pub const fn new(scale: Vec2, translate: Vec2, resolution: f32) -> Self {
        Self { scale, translate, resolution }
    }

    /// Finite with non-zero scale and resolution.
    pub fn is_invertible(&self) -> bool {
        self.scale.is_finite()
            && self.translate.is_finite()
            && self.resolution.is_finite()
            && self.scale.x != 0.0
            && self.scale.y != 0.0
            && self.resolution > 0.0
    }

    // ── points ────────────────────────────────────────────────────────────

    #[inline]
    pub fn world_to_screen(&self, p: Vec2) -> Vec2 {
        p.scale(self.scale) + self.translate
    }

    #[inline]
    pub fn screen_to_world(&self, p: Vec2) -> Vec2 {
        let d = p - self.translate;
        Vec2::new(d.x / self.scale.x, d.y / self.scale.y)
    }

    #[inline]
    pub fn world_to_canvas(&self, p: Vec2) -> Vec2 {
        self.world_to_screen(p) * self.resolution
    }

    #[inline]
    pub fn canvas_to_world(&self, p: Vec2) -> Vec2 {
        self.screen_to_world(p / self.resolution)
    }

    // ── directions (translation-free) ─────────────────────────────────────

    #[inline]
    pub fn world_to_screen_dir(&self, d: Vec2) -> Vec2 {
        d.scale(self.scale)
    }

    #[inline]
    pub fn screen_to_world_dir(&self, d: Vec2) -> Vec2 {
        Vec2::new(d.x / self.scale.x, d.y / self.scale.y)
    }

    #[inline]
    pub fn world_to_canvas_dir(&self, d: Vec2) -> Vec2 {
        self.world_to_screen_dir(d) * self.resolution
    }

    #[inline]
    pub fn canvas_to_world_dir(&self, d: Vec2) -> Vec2 {
        self.screen_to_world_dir(d / self.resolution)
    }

    // ── boxes ─────────────────────────────────────────────────────────────
    //
    // Negative scales flip an axis; the result is re-ordered so min <= max.

    pub fn world_to_screen_box(&self, b: Aabb) -> Aabb {
        Aabb::from_corners(self.world_to_screen(b.min()), self.world_to_screen(b.max()))
    }

    pub fn screen_to_world_box(&self, b: Aabb) -> Aabb {
        Aabb::from_corners(self.screen_to_world(b.min()), self.screen_to_world(b.max()))
    }

    pub fn world_to_canvas_box(&self, b: Aabb) -> Aabb {
        Aabb::from_corners(self.world_to_canvas(b.min()), self.world_to_canvas(b.max()))
    }

    pub fn canvas_to_world_box(&self, b: Aabb) -> Aabb {
        Aabb::from_corners(self.canvas_to_world(b.min()), self.canvas_to_world(b.max()))
    }
}
