//! Color model shared by both backends (linear premultiplied alpha).

pub mod color;

pub use color::Color;
