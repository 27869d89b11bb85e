//! Layers: the public face of the renderer.
//!
//! A [`Layer`] tracks drawables it does not own, repaints only what changed,
//! and draws through either a CPU raster surface or a GPU context. A
//! [`LayerStack`] composites several layers onto one destination.

mod config;
#[allow(clippy::module_inception)]
mod layer;
mod stack;
mod stats;
mod strategy;

pub use config::{LayerConfig, RenderMode};
pub use layer::{DrawableKey, Layer};
pub use stack::LayerStack;
pub use stats::FrameStats;
pub use strategy::DrawStrategy;
