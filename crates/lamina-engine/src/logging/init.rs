use std::sync::Once;

use log::LevelFilter;

/// Crates whose info output drowns the renderer's own messages.
const NOISY_GPU_CRATES: [&str; 4] = ["wgpu_core", "wgpu_hal", "naga", "wgpu"];

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax, e.g.
/// "lamina_engine=debug,wgpu=warn". When it is `None`, `RUST_LOG` is used,
/// and failing that the levels below.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    /// Level for everything outside the GPU stack.
    pub level: LevelFilter,
    /// Level for `lamina_engine` itself. Per-frame stats are logged at `debug`,
    /// dirty-region expansion at `trace`.
    pub renderer_level: LevelFilter,
    /// Level for wgpu and naga.
    pub gpu_level: LevelFilter,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            level: LevelFilter::Info,
            renderer_level: LevelFilter::Info,
            gpu_level: LevelFilter::Warn,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

impl LoggingConfig {
    /// Frame-by-frame renderer output.
    pub fn verbose() -> Self {
        Self { renderer_level: LevelFilter::Debug, ..Self::default() }
    }
}

fn builder(config: &LoggingConfig) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    if let Some(filter) = &config.env_filter {
        builder.parse_filters(filter);
    } else if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    } else {
        builder.filter_level(config.level);
        builder.filter_module("lamina_engine", config.renderer_level);
        for name in NOISY_GPU_CRATES {
            builder.filter_module(name, config.gpu_level);
        }
    }
    builder.write_style(config.write_style);
    builder
}

static INIT: Once = Once::new();

/// Installs `env_logger` as the global logger; later calls are ignored.
///
/// A host that already installed a logger keeps it.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        if builder(&config).try_init().is_err() {
            return;
        }
        log::debug!(
            "logging initialized (renderer {}, gpu {})",
            config.renderer_level,
            config.gpu_level
        );
    });
}

/// Logger for unit tests: output is captured per test and shown on failure.
pub fn init_test_logging() {
    let config = LoggingConfig { renderer_level: LevelFilter::Trace, ..LoggingConfig::default() };
    // Every test calls this; only the first one wins.
    let _ = builder(&config).is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins_and_init_is_repeatable() {
        let config = LoggingConfig {
            env_filter: Some("lamina_engine=trace".to_owned()),
            ..LoggingConfig::default()
        };
        init_logging(config.clone());
        init_logging(config);
        init_test_logging();
        log::trace!("still alive");
    }

    #[test]
    fn verbose_only_raises_the_renderer() {
        let verbose = LoggingConfig::verbose();
        assert_eq!(verbose.renderer_level, LevelFilter::Debug);
        assert_eq!(verbose.gpu_level, LevelFilter::Warn);
        assert_eq!(verbose.level, LevelFilter::Info);
    }
}
