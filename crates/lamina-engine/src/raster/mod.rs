//! CPU raster backend.
//!
//! Used when a layer runs in raster mode, when the GPU is unavailable, and by
//! tests that compare pixels.

mod canvas;
mod image;
mod surface;

pub use canvas::RasterCanvas;
pub use image::{RasterImage, TextureSet};
pub use surface::RasterSurface;
