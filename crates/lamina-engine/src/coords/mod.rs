//! Geometry types shared by the index, the dirty-region tracker and both backends.
//!
//! Spaces:
//! - world: where drawables live
//! - screen: logical pixels after the camera transform (origin top-left, +Y down)
//! - canvas: physical pixels of a layer surface (screen * resolution factor)

mod aabb;
mod obb;
mod transform;
mod vec2;

pub use aabb::Aabb;
pub use obb::OrientedBox;
pub use transform::{Camera, CameraTransform};
pub use vec2::Vec2;
