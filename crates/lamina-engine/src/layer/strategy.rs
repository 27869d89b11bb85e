use crate::error::RenderResult;
use crate::raster::RasterSurface;
use crate::render::GpuLayerBackend;

use super::RenderMode;

/// The draw path a layer is currently using.
pub enum DrawStrategy {
    Raster(RasterSurface),
    Gpu(Box<GpuLayerBackend>),
}

impl DrawStrategy {
    /// Builds the strategy for `mode` at canvas size `width` x `height`.
    pub fn new(mode: &RenderMode, width: u32, height: u32) -> RenderResult<Self> {
        match mode {
            RenderMode::Raster => Ok(DrawStrategy::Raster(RasterSurface::new(width, height))),
            RenderMode::Gpu(ctx) => {
                let backend = GpuLayerBackend::new(ctx.clone(), width, height)?;
                Ok(DrawStrategy::Gpu(Box::new(backend)))
            }
        }
    }

    #[inline]
    pub fn is_gpu(&self) -> bool {
        matches!(self, DrawStrategy::Gpu(_))
    }

    /// Resizes the surface or the GPU targets. A GPU error leaves the old
    /// targets in place.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        match self {
            DrawStrategy::Raster(surface) => surface.resize(width, height),
            DrawStrategy::Gpu(backend) => {
                backend.resize(width, height)?;
            }
        }
        Ok(())
    }

    #[inline]
    pub fn surface(&self) -> Option<&RasterSurface> {
        match self {
            DrawStrategy::Raster(surface) => Some(surface),
            DrawStrategy::Gpu(_) => None,
        }
    }

    #[inline]
    pub fn gpu(&self) -> Option<&GpuLayerBackend> {
        match self {
            DrawStrategy::Raster(_) => None,
            DrawStrategy::Gpu(backend) => Some(backend),
        }
    }

    #[inline]
    pub fn gpu_mut(&mut self) -> Option<&mut GpuLayerBackend> {
        match self {
            DrawStrategy::Raster(_) => None,
            DrawStrategy::Gpu(backend) => Some(backend),
        }
    }
}
