use core::ops::Range;

use crate::coords::{Aabb, OrientedBox, Vec2};
use crate::paint::Color;

use super::RasterImage;

/// CPU drawing surface in canvas pixels.
///
/// Pixels are premultiplied linear RGBA. A pixel is covered by a shape when
/// its center is inside the shape (half-open on the max edges), so adjacent
/// shapes never double-cover and a clip rectangle on whole pixels separates
/// redrawn pixels from untouched ones exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSurface {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
    clip: [u32; 4], // x0, y0, x1, y1
}

/// Pixel indices whose centers lie in `[min, max)`, limited to `lo..hi`.
fn covered(min: f32, max: f32, lo: u32, hi: u32) -> Range<u32> {
    if !(min < max) {
        return 0..0;
    }
    let start = (min - 0.5).ceil().max(lo as f32);
    let end = (max - 0.5).ceil().min(hi as f32);
    if end <= start {
        0..0
    } else {
        start as u32..end as u32
    }
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            pixels: vec![Color::transparent(); width as usize * height as usize],
            clip: [0, 0, width, height],
        }
    }

    /// Reallocates (contents are lost) when the size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if width == self.width && height == self.height {
            return;
        }
        *self = Self::new(width, height);
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(0.0, 0.0, self.width as f32, self.height as f32)
    }

    #[inline]
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Restricts every following operation to the pixels covered by `clip`.
    ///
    /// `None` removes the clip.
    pub fn set_clip(&mut self, clip: Option<Aabb>) {
        self.clip = match clip {
            None => [0, 0, self.width, self.height],
            Some(r) => {
                let xs = covered(r.min_x, r.max_x, 0, self.width);
                let ys = covered(r.min_y, r.max_y, 0, self.height);
                [xs.start, ys.start, xs.end.max(xs.start), ys.end.max(ys.start)]
            }
        };
    }

    /// Current clip in canvas pixels.
    pub fn clip(&self) -> Aabb {
        let [x0, y0, x1, y1] = self.clip;
        Aabb::new(x0 as f32, y0 as f32, x1 as f32, y1 as f32)
    }

    fn spans(&self, r: Aabb) -> (Range<u32>, Range<u32>) {
        let [x0, y0, x1, y1] = self.clip;
        (covered(r.min_x, r.max_x, x0, x1), covered(r.min_y, r.max_y, y0, y1))
    }

    /// Replaces the clipped pixels of `rect` with `color`.
    pub fn clear_rect(&mut self, rect: Aabb, color: Color) {
        let (xs, ys) = self.spans(rect);
        for y in ys {
            let row = (y * self.width) as usize;
            for x in xs.clone() {
                self.pixels[row + x as usize] = color;
            }
        }
    }

    /// Clears everything inside the clip.
    pub fn clear(&mut self, color: Color) {
        self.clear_rect(self.bounds(), color);
    }

    /// Source-over fill.
    pub fn fill_rect(&mut self, rect: Aabb, color: Color) {
        let (xs, ys) = self.spans(rect);
        for y in ys {
            let row = (y * self.width) as usize;
            for x in xs.clone() {
                let dst = &mut self.pixels[row + x as usize];
                *dst = color.over(*dst);
            }
        }
    }

    /// Draws a possibly rotated quad given in canvas pixels.
    ///
    /// `frame` is the texture sub-rectangle `[u0, v0, u1, v1]`. Without an image
    /// the quad is filled with `tint`.
    pub fn draw_quad(
        &mut self,
        quad: &OrientedBox,
        frame: [f32; 4],
        image: Option<&RasterImage>,
        tint: Color,
        alpha: f32,
        smooth: bool,
    ) {
        let hx = quad.half_x;
        let hy = quad.half_y;
        let det = hx.x * hy.y - hy.x * hx.y;
        if det == 0.0 || !det.is_finite() {
            return;
        }

        let (xs, ys) = self.spans(quad.bounds());
        for y in ys {
            let row = (y * self.width) as usize;
            for x in xs.clone() {
                let d = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - quad.center;
                // Solve d = s * hx + t * hy; (s, t) in [-1, 1) inside the quad.
                let s = (d.x * hy.y - hy.x * d.y) / det;
                let t = (hx.x * d.y - d.x * hx.y) / det;
                let u = (s + 1.0) * 0.5;
                let v = (t + 1.0) * 0.5;
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }

                let src = match image {
                    Some(img) => {
                        let tu = frame[0] + (frame[2] - frame[0]) * u;
                        let tv = frame[1] + (frame[3] - frame[1]) * v;
                        img.sample(tu, tv, smooth).modulate(tint)
                    }
                    None => tint,
                }
                .scaled(alpha);

                let dst = &mut self.pixels[row + x as usize];
                *dst = src.over(*dst);
            }
        }
    }

    /// Draws `src` (same size) over this surface at `opacity`, inside the clip.
    pub fn composite_from(&mut self, src: &RasterSurface, opacity: f32) {
        if src.width != self.width || src.height != self.height {
            log::warn!(
                "composite size mismatch: {}x{} onto {}x{}; skipped",
                src.width,
                src.height,
                self.width,
                self.height
            );
            return;
        }
        let [x0, y0, x1, y1] = self.clip;
        for y in y0..y1 {
            let row = (y * self.width) as usize;
            for x in x0..x1 {
                let i = row + x as usize;
                self.pixels[i] = src.pixels[i].scaled(opacity).over(self.pixels[i]);
            }
        }
    }

    /// Straight-alpha RGBA bytes, e.g. for writing a PNG.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|c| c.to_rgba8()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::from_premul(1.0, 0.0, 0.0, 1.0);

    fn count(s: &RasterSurface, c: Color) -> usize {
        s.pixels().iter().filter(|p| **p == c).count()
    }

    #[test]
    fn fill_covers_pixel_centers_only() {
        let mut s = RasterSurface::new(8, 8);
        s.fill_rect(Aabb::new(1.0, 1.0, 3.0, 4.0), RED);
        assert_eq!(count(&s, RED), 6);
        // Half-pixel edges: centers at 1.5 and 2.5 are inside [1.2, 2.6).
        let mut s = RasterSurface::new(8, 8);
        s.fill_rect(Aabb::new(1.2, 0.0, 2.6, 1.0), RED);
        assert_eq!(s.pixel(1, 0), RED);
        assert_eq!(s.pixel(2, 0), RED);
        assert_eq!(s.pixel(3, 0), Color::transparent());
    }

    #[test]
    fn clip_limits_writes() {
        let mut s = RasterSurface::new(8, 8);
        s.set_clip(Some(Aabb::new(2.0, 2.0, 4.0, 4.0)));
        s.clear(RED);
        assert_eq!(count(&s, RED), 4);
        s.set_clip(None);
        assert_eq!(s.clip(), s.bounds());
    }

    #[test]
    fn axis_aligned_quad_matches_fill() {
        let rect = Aabb::new(1.0, 2.0, 6.0, 5.0);
        let mut a = RasterSurface::new(8, 8);
        a.fill_rect(rect, RED);
        let mut b = RasterSurface::new(8, 8);
        let quad = OrientedBox::from_rotation(rect.center(), rect.size(), 0.0);
        b.draw_quad(&quad, [0.0, 0.0, 1.0, 1.0], None, RED, 1.0, false);
        assert_eq!(a, b);
    }

    #[test]
    fn rotated_quad_stays_inside_its_bounds() {
        let mut s = RasterSurface::new(16, 16);
        let quad = OrientedBox::from_rotation(Vec2::new(8.0, 8.0), Vec2::new(8.0, 2.0), 0.7);
        s.draw_quad(&quad, [0.0, 0.0, 1.0, 1.0], None, RED, 1.0, false);
        let b = quad.bounds();
        for y in 0..16 {
            for x in 0..16 {
                if s.pixel(x, y) == RED {
                    assert!(b.contains_point(Vec2::new(x as f32 + 0.5, y as f32 + 0.5)));
                }
            }
        }
        assert!(count(&s, RED) > 8);
    }

    #[test]
    fn alpha_and_opacity_scale_premultiplied() {
        let mut s = RasterSurface::new(1, 1);
        let quad = OrientedBox::from_rotation(Vec2::new(0.5, 0.5), Vec2::new(1.0, 1.0), 0.0);
        s.draw_quad(&quad, [0.0, 0.0, 1.0, 1.0], None, RED, 0.5, false);
        assert_eq!(s.pixel(0, 0), Color::from_premul(0.5, 0.0, 0.0, 0.5));

        let mut dst = RasterSurface::new(1, 1);
        dst.composite_from(&s, 0.5);
        assert_eq!(dst.pixel(0, 0), Color::from_premul(0.25, 0.0, 0.0, 0.25));
    }

    #[test]
    fn textured_quad_samples_frame() {
        let img = RasterImage::new(2, 1, vec![Color::black(), RED]).unwrap();
        let mut s = RasterSurface::new(2, 2);
        let quad = OrientedBox::from_rotation(Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0), 0.0);
        // Right half of the texture only.
        s.draw_quad(&quad, [0.5, 0.0, 1.0, 1.0], Some(&img), Color::white(), 1.0, false);
        assert_eq!(count(&s, RED), 4);
    }
}
