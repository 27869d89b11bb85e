use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RenderResult;
use crate::sprite::ShaderId;

/// Vertex stage of a program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexShaderId {
    /// Instanced quads in world space.
    Sprite,
    /// One triangle covering the target.
    Fullscreen,
}

/// Fragment stage of a program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PixelShaderId {
    Sprite,
    /// User sprite shader registered under this id.
    CustomSprite(ShaderId),
    Downsample,
    BlurHorizontal,
    BlurVertical,
    Blend,
    Composite,
    Default,
    /// User post-process shader; the number changes with every new source.
    PostProcess(u64),
}

/// Blend state baked into a pipeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendMode {
    /// Premultiplied source-over.
    Over,
    /// Overwrite the destination.
    Replace,
}

impl BlendMode {
    pub(crate) fn state(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Over => Some(super::common::premul_alpha_blend()),
            BlendMode::Replace => Some(wgpu::BlendState::REPLACE),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ProgramKey {
    pub vertex: VertexShaderId,
    pub pixel: PixelShaderId,
    pub blend: BlendMode,
    pub format: wgpu::TextureFormat,
}

/// Compiled pipelines of one GPU context.
///
/// A failed build is cached as `None` (the "no program" sentinel) so a broken
/// shader is reported once instead of every frame; callers fall back to a
/// default program. Everything is dropped on context loss.
#[derive(Debug)]
pub struct ProgramCache<P = wgpu::RenderPipeline> {
    programs: HashMap<ProgramKey, Option<Rc<P>>>,
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self { programs: HashMap::new() }
    }
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached program for `key`, building it with `create` on first use.
    pub fn get_or_create<F>(&mut self, key: ProgramKey, create: F) -> Option<Rc<P>>
    where
        F: FnOnce() -> RenderResult<P>,
    {
        if let Some(entry) = self.programs.get(&key) {
            return entry.clone();
        }
        let entry = match create() {
            Ok(program) => Some(Rc::new(program)),
            Err(err) => {
                log::error!("{err}");
                None
            }
        };
        self.programs.insert(key, entry.clone());
        entry
    }

    /// The cached outcome for `key`, without building.
    pub fn cached(&self, key: &ProgramKey) -> Option<Option<Rc<P>>> {
        self.programs.get(key).cloned()
    }

    /// `Some(ok)` when `key` was already attempted.
    pub fn status(&self, key: &ProgramKey) -> Option<bool> {
        self.programs.get(key).map(Option::is_some)
    }

    /// Drops every program using `pixel`.
    pub fn evict_pixel_shader(&mut self, pixel: PixelShaderId) {
        self.programs.retain(|key, _| key.pixel != pixel);
    }

    pub fn evict_all(&mut self) {
        if !self.programs.is_empty() {
            log::debug!("evicting {} cached programs", self.programs.len());
        }
        self.programs.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    fn key(pixel: PixelShaderId) -> ProgramKey {
        ProgramKey {
            vertex: VertexShaderId::Fullscreen,
            pixel,
            blend: BlendMode::Over,
            format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    #[test]
    fn programs_are_built_once() {
        let mut cache: ProgramCache<u32> = ProgramCache::new();
        let mut builds = 0;
        for _ in 0..3 {
            let p = cache.get_or_create(key(PixelShaderId::Default), || {
                builds += 1;
                Ok(7)
            });
            assert_eq!(p.as_deref(), Some(&7));
        }
        assert_eq!(builds, 1);
    }

    #[test]
    fn failures_are_cached_as_no_program() {
        let mut cache: ProgramCache<u32> = ProgramCache::new();
        let k = key(PixelShaderId::PostProcess(1));
        let fail = || {
            Err(RenderError::ShaderCompile { label: "post".into(), message: "bad".into() })
        };
        assert!(cache.get_or_create(k, fail).is_none());
        assert_eq!(cache.status(&k), Some(false));
        assert!(cache.get_or_create(k, || Ok(1)).is_none());
    }

    #[test]
    fn eviction_by_pixel_shader_and_all() {
        let mut cache: ProgramCache<u32> = ProgramCache::new();
        cache.get_or_create(key(PixelShaderId::Default), || Ok(1));
        cache.get_or_create(key(PixelShaderId::Blend), || Ok(2));
        cache.evict_pixel_shader(PixelShaderId::Blend);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.status(&key(PixelShaderId::Blend)), None);
        cache.evict_all();
        assert!(cache.is_empty());
    }
}
