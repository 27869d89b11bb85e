use std::fmt;
use std::rc::Rc;

use crate::batch::BatchConfig;
use crate::device::GpuContext;
use crate::paint::Color;
use crate::sort::SortMode;
use crate::spatial::QuadTreeConfig;

/// Backend a layer draws through.
#[derive(Clone, Default)]
pub enum RenderMode {
    /// CPU raster surface.
    #[default]
    Raster,
    /// Off-screen targets on a shared GPU context.
    Gpu(Rc<GpuContext>),
}

impl RenderMode {
    #[inline]
    pub fn is_gpu(&self) -> bool {
        matches!(self, RenderMode::Gpu(_))
    }
}

impl fmt::Debug for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Raster => f.write_str("Raster"),
            RenderMode::Gpu(ctx) => write!(f, "Gpu({})", ctx.adapter_info().name),
        }
    }
}

/// Layer construction parameters.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    pub render_mode: RenderMode,
    /// Cull through the quadtree; `false` redraws everything every frame.
    pub use_index: bool,
    pub sort_mode: SortMode,
    pub batch: BatchConfig,
    pub index: QuadTreeConfig,
    /// Color the redrawn region is cleared to before drawing.
    pub clear_color: Color,
    /// Bilinear texture sampling.
    pub smoothing: bool,
    /// Canvas pixels per screen pixel.
    pub resolution_factor: f32,
    pub opacity: f32,
    /// Blur amount in `0..=1`; GPU only.
    pub blur: f32,
    /// Keep the blurred copy current even while `blur` is zero.
    pub always_update_blur: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Raster,
            use_index: true,
            sort_mode: SortMode::None,
            batch: BatchConfig::default(),
            index: QuadTreeConfig::default(),
            clear_color: Color::transparent(),
            smoothing: false,
            resolution_factor: 1.0,
            opacity: 1.0,
            blur: 0.0,
            always_update_blur: false,
        }
    }
}
