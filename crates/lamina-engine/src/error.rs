use thiserror::Error;

/// Failures raised inside the renderer.
///
/// None of these cross the `Layer` boundary: the layer logs them and degrades
/// (skips the frame, falls back to the default shader, or switches to raster).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid geometry in {what}: {detail}")]
    InvalidGeometry { what: String, detail: String },

    #[error("shader `{label}` failed to compile:\n{message}")]
    ShaderCompile { label: String, message: String },

    #[error("GPU backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("device error: {0}")]
    Device(#[from] anyhow::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;
