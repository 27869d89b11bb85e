use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{RenderError, RenderResult};
use crate::paint::Color;
use crate::sprite::TextureId;

/// Decoded texture, premultiplied.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    texels: Vec<Color>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, texels: Vec<Color>) -> RenderResult<Self> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || texels.len() != expected {
            return Err(RenderError::InvalidGeometry {
                what: "raster image".to_owned(),
                detail: format!("{width}x{height} needs {expected} texels, got {}", texels.len()),
            });
        }
        Ok(Self { width, height, texels })
    }

    /// From straight-alpha RGBA bytes, row-major, top row first.
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> RenderResult<Self> {
        if bytes.len() % 4 != 0 {
            return Err(RenderError::InvalidGeometry {
                what: "raster image".to_owned(),
                detail: format!("{} bytes is not a whole number of RGBA texels", bytes.len()),
            });
        }
        let texels = bytes
            .chunks_exact(4)
            .map(|c| Color::from_rgba8([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(width, height, texels)
    }

    /// 1x1 image.
    pub fn single(color: Color) -> Self {
        Self { width: 1, height: 1, texels: vec![color] }
    }

    pub fn solid(width: u32, height: u32, color: Color) -> RenderResult<Self> {
        Self::new(width, height, vec![color; width as usize * height as usize])
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
    pub fn texels(&self) -> &[Color] {
        &self.texels
    }

    /// Texel at `(x, y)`, clamped to the edge.
    #[inline]
    pub fn texel(&self, x: i64, y: i64) -> Color {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.texels[y * self.width as usize + x]
    }

    /// Premultiplied RGBA bytes for GPU upload.
    pub fn to_premul_rgba8(&self) -> Vec<u8> {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        self.texels
            .iter()
            .flat_map(|c| [q(c.r), q(c.g), q(c.b), q(c.a)])
            .collect()
    }

    /// Samples at normalised `(u, v)`; bilinear when `smooth`.
    pub fn sample(&self, u: f32, v: f32, smooth: bool) -> Color {
        let x = u * self.width as f32;
        let y = v * self.height as f32;
        if !smooth {
            return self.texel(x.floor() as i64, y.floor() as i64);
        }

        // Texel centers sit at half-integers.
        let x = x - 0.5;
        let y = y - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// Textures registered with a layer, shared by both backends.
#[derive(Debug, Default, Clone)]
pub struct TextureSet {
    images: HashMap<TextureId, Rc<RasterImage>>,
    generation: u64,
}

impl TextureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when an existing texture was replaced.
    pub fn insert(&mut self, id: TextureId, image: RasterImage) -> bool {
        self.generation += 1;
        self.images.insert(id, Rc::new(image)).is_some()
    }

    pub fn remove(&mut self, id: TextureId) -> bool {
        self.generation += 1;
        self.images.remove(&id).is_some()
    }

    #[inline]
    pub fn get(&self, id: TextureId) -> Option<&Rc<RasterImage>> {
        self.images.get(&id)
    }

    #[inline]
    pub fn contains(&self, id: TextureId) -> bool {
        self.images.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &Rc<RasterImage>)> {
        self.images.iter().map(|(id, image)| (*id, image))
    }

    /// Bumped on every insert or removal.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> RasterImage {
        RasterImage::new(
            2,
            1,
            vec![Color::black(), Color::white()],
        )
        .unwrap()
    }

    #[test]
    fn size_mismatch_is_rejected() {
        assert!(RasterImage::new(2, 2, vec![Color::white(); 3]).is_err());
        assert!(RasterImage::new(0, 0, Vec::new()).is_err());
        assert!(RasterImage::from_rgba8(1, 1, &[0, 0, 0]).is_err());
    }

    #[test]
    fn nearest_picks_containing_texel() {
        let img = checker();
        assert_eq!(img.sample(0.25, 0.5, false), Color::black());
        assert_eq!(img.sample(0.75, 0.5, false), Color::white());
        // Clamped, never out of bounds.
        assert_eq!(img.sample(1.0, 1.0, false), Color::white());
    }

    #[test]
    fn bilinear_blends_between_centers() {
        let img = checker();
        let mid = img.sample(0.5, 0.5, true);
        assert!((mid.r - 0.5).abs() < 1e-6);
        assert_eq!(img.sample(0.25, 0.5, true), Color::black());
    }

    #[test]
    fn rgba8_is_premultiplied() {
        let img = RasterImage::from_rgba8(1, 1, &[255, 0, 0, 128]).unwrap();
        let c = img.texel(0, 0);
        assert!((c.r - c.a).abs() < 1e-6);
        assert_eq!(img.to_premul_rgba8(), vec![128, 0, 0, 128]);
    }

    #[test]
    fn set_tracks_replacement() {
        let mut set = TextureSet::new();
        assert!(!set.insert(TextureId(1), checker()));
        assert!(set.insert(TextureId(1), checker()));
        assert_eq!(set.generation(), 2);
        assert!(set.remove(TextureId(1)));
        assert!(!set.contains(TextureId(1)));
    }
}
