//! WGSL assembly and validation.
//!
//! User shaders are fragment sources; the engine's declarations (bindings,
//! vertex stage) are appended after them, so line numbers in diagnostics are
//! the user's own.

use crate::error::{RenderError, RenderResult};

pub(crate) const SPRITE_PRELUDE: &str = include_str!("shaders/sprite_prelude.wgsl");
pub(crate) const SPRITE_FRAGMENT: &str = include_str!("shaders/sprite.wgsl");
pub(crate) const PASS_PRELUDE: &str = include_str!("shaders/pass_prelude.wgsl");
pub(crate) const PASS_FRAGMENTS: &str = include_str!("shaders/passes.wgsl");

/// Fragment entry point user shaders must define.
pub const USER_ENTRY_POINT: &str = "fs_main";

/// Which set of engine declarations a fragment source is compiled against.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShaderStage {
    /// Sprite shaders: `LaminaSpriteOut` input, `lamina_texture`/`lamina_sampler`.
    Sprite,
    /// Post-process shaders: `LaminaPassOut` input, `lamina_main`, `lamina_blur`,
    /// `lamina_params`.
    Pass,
}

impl ShaderStage {
    fn prelude(self) -> &'static str {
        match self {
            ShaderStage::Sprite => SPRITE_PRELUDE,
            ShaderStage::Pass => PASS_PRELUDE,
        }
    }
}

/// User source followed by the engine prelude.
pub fn assemble(fragment: &str, stage: ShaderStage) -> String {
    let mut source = String::with_capacity(fragment.len() + stage.prelude().len() + 1);
    source.push_str(fragment);
    if !fragment.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(stage.prelude());
    source
}

/// Parses and validates `fragment` against `stage`.
///
/// On success returns the assembled module source. Errors carry naga's
/// annotated report with line numbers of `fragment`.
pub fn validate_fragment(
    label: &str,
    fragment: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> RenderResult<String> {
    let source = assemble(fragment, stage);
    let compile_error = |message: String| RenderError::ShaderCompile {
        label: label.to_owned(),
        message,
    };

    let module = naga::front::wgsl::parse_str(&source)
        .map_err(|e| compile_error(e.emit_to_string_with_path(&source, label)))?;

    let has_entry = module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Fragment);
    if !has_entry {
        return Err(compile_error(format!("missing `@fragment fn {entry_point}`")));
    }

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    );
    validator
        .validate(&module)
        .map_err(|e| compile_error(e.emit_to_string_with_path(&source, label)))?;

    Ok(source)
}

/// Creates a shader module, turning wgpu validation errors into
/// [`RenderError::ShaderCompile`] instead of the uncaptured-error handler.
pub(crate) fn create_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> RenderResult<wgpu::ShaderModule> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match pollster::block_on(scope.pop()) {
        None => Ok(module),
        Some(err) => Err(RenderError::ShaderCompile {
            label: label.to_owned(),
            message: err.to_string(),
        }),
    }
}

/// Creates a render pipeline inside a validation error scope.
pub(crate) fn create_pipeline(
    device: &wgpu::Device,
    desc: &wgpu::RenderPipelineDescriptor<'_>,
) -> RenderResult<wgpu::RenderPipeline> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(desc);
    match pollster::block_on(scope.pop()) {
        None => Ok(pipeline),
        Some(err) => Err(RenderError::ShaderCompile {
            label: desc.label.unwrap_or("pipeline").to_owned(),
            message: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(label: &str, source: &str) -> naga::Module {
        naga::front::wgsl::parse_str(source).unwrap_or_else(|error| {
            panic!("WGSL parse failed for {label}: {}", error.emit_to_string(source))
        })
    }

    #[test]
    fn bundled_shaders_parse_and_validate() {
        let sprite = validate_fragment("sprite", SPRITE_FRAGMENT, ShaderStage::Sprite, "fs_main");
        assert!(sprite.is_ok(), "{sprite:?}");

        let passes = assemble(PASS_FRAGMENTS, ShaderStage::Pass);
        let module = parse("passes", &passes);
        for entry in [
            "vs_fullscreen",
            "fs_downsample",
            "fs_blur_h",
            "fs_blur_v",
            "fs_blend",
            "fs_composite",
            "fs_default",
        ] {
            assert!(module.entry_points.iter().any(|ep| ep.name == entry), "{entry}");
        }
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        );
        validator.validate(&module).unwrap();
    }

    #[test]
    fn user_post_process_compiles() {
        let src = "\
@fragment
fn fs_main(in: LaminaPassOut) -> @location(0) vec4<f32> {
    let c = lamina_sample_main(in.uv);
    return vec4<f32>(c.a - c.rgb, c.a) * lamina_params.opacity;
}
";
        validate_fragment("invert", src, ShaderStage::Pass, USER_ENTRY_POINT).unwrap();
    }

    #[test]
    fn errors_report_user_line_numbers() {
        let src = "\
// line 1
@fragment
fn fs_main(in: LaminaPassOut) -> @location(0) vec4<f32> {
    return undefined_thing;
}
";
        let err = validate_fragment("broken", src, ShaderStage::Pass, USER_ENTRY_POINT)
            .unwrap_err()
            .to_string();
        assert!(err.contains("broken"), "{err}");
        assert!(err.contains(":4:"), "{err}");
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let src = "fn helper() -> f32 { return 1.0; }\n";
        let err = validate_fragment("empty", src, ShaderStage::Pass, USER_ENTRY_POINT);
        assert!(matches!(err, Err(RenderError::ShaderCompile { .. })));
    }
}
