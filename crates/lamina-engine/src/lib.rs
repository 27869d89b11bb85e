//! Lamina engine crate.
//!
//! Incremental 2D layer rendering: drawables are culled through a quadtree,
//! only the dirty part of a layer is repainted, and each layer draws through
//! either a CPU raster surface or a wgpu context before being composited.

pub mod device;
pub mod logging;
pub mod coords;
pub mod paint;
pub mod error;

pub mod spatial;
pub mod dirty;
pub mod sort;
pub mod batch;
pub mod drawable;
pub mod sprite;

pub mod raster;
pub mod render;
pub mod layer;

pub use coords::{Aabb, Camera, CameraTransform, Vec2};
pub use drawable::{Canvas, Drawable, DrawableRef};
pub use error::{RenderError, RenderResult};
pub use layer::{DrawableKey, FrameStats, Layer, LayerConfig, LayerStack, RenderMode};
pub use paint::Color;
pub use sort::SortMode;
pub use sprite::{ShaderId, Sprite, SpriteDrawable, SpriteInstance, TextureId};
