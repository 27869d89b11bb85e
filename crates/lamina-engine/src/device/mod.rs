//! GPU device management.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue without a window
//! - tracking device loss so caches can be evicted
//! - reading textures back for tests, screenshots and the demo binary

mod context;
mod init;
mod readback;

pub use context::GpuContext;
pub use init::GpuContextInit;
pub use readback::{read_texture_rgba8, unpremultiply_rgba8};
