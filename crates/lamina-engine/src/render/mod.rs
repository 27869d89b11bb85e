//! GPU rendering subsystem.
//!
//! A GPU layer records sprites, replays them instanced into its main target,
//! and composites that target (optionally blurred or post-processed) onto a
//! destination texture.
//!
//! Convention:
//! - sprite geometry is in world space; the vertex shader applies the camera
//!   and maps canvas pixels (top-left origin, +Y down) to NDC.
//! - every color is premultiplied.

mod common;
mod gpu;
mod programs;
mod shader;
mod sprites;
mod targets;
mod textures;

pub use gpu::GpuLayerBackend;
pub use programs::{BlendMode, PixelShaderId, ProgramCache, ProgramKey, VertexShaderId};
pub use shader::{assemble, validate_fragment, ShaderStage, USER_ENTRY_POINT};
pub use sprites::{GpuCommand, GpuRecorder};
pub use targets::{
    needs_blur_pass, quarter_size, select_composite_program, CompositeProgram, CompositeSettings,
    PostProcessState,
};
pub use textures::{BoundTextureState, TextureSlot};
