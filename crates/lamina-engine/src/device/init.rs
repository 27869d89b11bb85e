/// Initialization parameters for a headless GPU context.
///
/// Keep this structure minimal. Add configuration flags only when a concrete
/// platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuContextInit {
    /// Adapter preference.
    pub power_preference: wgpu::PowerPreference,

    /// Accept a software adapter (e.g. for CI without a GPU).
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Format of the destination layers composite onto.
    ///
    /// Off-screen layer targets always use `Rgba8Unorm`.
    pub target_format: wgpu::TextureFormat,
}

impl Default for GpuContextInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            target_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}
