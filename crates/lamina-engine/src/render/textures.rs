use std::collections::HashMap;
use std::rc::Rc;

use crate::paint::Color;
use crate::raster::{RasterImage, TextureSet};
use crate::sprite::TextureId;

use super::common::{check_texture_size, create_sampler, texture_bind_group, TARGET_FORMAT};

/// What is bound at the sprite texture slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TextureSlot {
    /// 1x1 white texel used by solid quads.
    White,
    Texture(TextureId),
}

/// Texture bound at the sprite texture slot of the current render pass.
///
/// Threaded through replay so redundant binds are skipped. A new render pass
/// starts with nothing bound, and unregistering a texture must forget it.
#[derive(Debug, Default, Clone)]
pub struct BoundTextureState {
    current: Option<TextureSlot>,
    binds: usize,
}

impl BoundTextureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `slot` as bound; `false` when it already was.
    pub fn bind(&mut self, slot: TextureSlot) -> bool {
        if self.current == Some(slot) {
            return false;
        }
        self.current = Some(slot);
        self.binds += 1;
        true
    }

    #[inline]
    pub fn current(&self) -> Option<TextureSlot> {
        self.current
    }

    /// Forgets the binding (new pass, or the bound texture went away).
    #[inline]
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    pub fn invalidate_texture(&mut self, id: TextureId) {
        if self.current == Some(TextureSlot::Texture(id)) {
            self.current = None;
        }
    }

    /// Bind calls actually issued.
    #[inline]
    pub fn bind_count(&self) -> usize {
        self.binds
    }
}

struct ResidentTexture {
    /// The image this upload came from; a re-registered image is a new `Rc`.
    source: Rc<RasterImage>,
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    smooth: bool,
}

/// GPU copies of registered textures, uploaded on first use.
pub struct TextureStore {
    layout: wgpu::BindGroupLayout,
    nearest: wgpu::Sampler,
    linear: wgpu::Sampler,
    resident: HashMap<TextureId, ResidentTexture>,
    white: ResidentTexture,
    warned_missing: bool,
    warned_oversized: bool,
}

fn upload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &RasterImage,
) -> (wgpu::Texture, wgpu::TextureView) {
    let size = wgpu::Extent3d {
        width: image.width(),
        height: image.height(),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &image.to_premul_rgba8(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(image.width() * 4),
            rows_per_image: Some(image.height()),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

impl TextureStore {
    pub(crate) fn new(device: &wgpu::Device, queue: &wgpu::Queue, layout: wgpu::BindGroupLayout) -> Self {
        let nearest = create_sampler(device, false);
        let linear = create_sampler(device, true);

        let white_image = Rc::new(RasterImage::single(Color::white()));
        let (texture, view) = upload(device, queue, "lamina white texture", &white_image);
        let bind_group = texture_bind_group(device, &layout, "lamina white bind group", &view, &nearest);
        let white = ResidentTexture {
            source: white_image,
            _texture: texture,
            view,
            bind_group,
            smooth: false,
        };

        Self {
            layout,
            nearest,
            linear,
            resident: HashMap::new(),
            white,
            warned_missing: false,
            warned_oversized: false,
        }
    }

    /// Makes `id` resident and sampled per `smooth`.
    ///
    /// Returns `false` when it is not registered or too large for the
    /// device; the caller skips the draw.
    pub(crate) fn ensure(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        images: &TextureSet,
        id: TextureId,
        smooth: bool,
    ) -> bool {
        let Some(image) = images.get(id) else {
            if !self.warned_missing {
                log::warn!("texture {id:?} is not registered; drawing nothing for it");
                self.warned_missing = true;
            }
            self.resident.remove(&id);
            return false;
        };

        let stale = match self.resident.get(&id) {
            Some(r) => !Rc::ptr_eq(&r.source, image),
            None => true,
        };
        if stale {
            let limit = device.limits().max_texture_dimension_2d;
            if let Err(err) = check_texture_size("sprite texture", image.width(), image.height(), limit) {
                if !self.warned_oversized {
                    log::warn!("texture {id:?} not uploaded: {err}");
                    self.warned_oversized = true;
                }
                self.resident.remove(&id);
                return false;
            }
            log::debug!("uploading texture {id:?} ({}x{})", image.width(), image.height());
            let (texture, view) = upload(device, queue, "lamina sprite texture", image);
            let sampler = if smooth { &self.linear } else { &self.nearest };
            let bind_group =
                texture_bind_group(device, &self.layout, "lamina sprite bind group", &view, sampler);
            self.resident.insert(
                id,
                ResidentTexture { source: Rc::clone(image), _texture: texture, view, bind_group, smooth },
            );
            return true;
        }

        if let Some(r) = self.resident.get_mut(&id) {
            if r.smooth != smooth {
                let sampler = if smooth { &self.linear } else { &self.nearest };
                r.bind_group =
                    texture_bind_group(device, &self.layout, "lamina sprite bind group", &r.view, sampler);
                r.smooth = smooth;
            }
        }
        true
    }

    pub(crate) fn bind_group(&self, slot: TextureSlot) -> Option<&wgpu::BindGroup> {
        match slot {
            TextureSlot::White => Some(&self.white.bind_group),
            TextureSlot::Texture(id) => self.resident.get(&id).map(|r| &r.bind_group),
        }
    }

    pub(crate) fn forget(&mut self, id: TextureId) {
        self.resident.remove(&id);
    }

    #[inline]
    pub(crate) fn resident_count(&self) -> usize {
        self.resident.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_binds_are_skipped() {
        let mut state = BoundTextureState::new();
        assert!(state.bind(TextureSlot::Texture(TextureId(1))));
        assert!(!state.bind(TextureSlot::Texture(TextureId(1))));
        assert!(state.bind(TextureSlot::White));
        assert!(state.bind(TextureSlot::Texture(TextureId(1))));
        assert_eq!(state.bind_count(), 3);
    }

    #[test]
    fn invalidation_forces_rebind() {
        let mut state = BoundTextureState::new();
        state.bind(TextureSlot::Texture(TextureId(2)));
        state.invalidate_texture(TextureId(3));
        assert_eq!(state.current(), Some(TextureSlot::Texture(TextureId(2))));
        state.invalidate_texture(TextureId(2));
        assert!(state.bind(TextureSlot::Texture(TextureId(2))));
        state.invalidate();
        assert!(state.bind(TextureSlot::Texture(TextureId(2))));
    }
}
