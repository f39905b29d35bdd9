//! Logger setup.
//!
//! The crate itself only talks to the `log` facade. Applications and tests that
//! want to see the output call [`init_logging`] once at startup.

use std::sync::Once;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `env_logger` filter syntax, e.g. `"info"` or `"flow_scene=debug,wgpu=warn"`.
    /// Falls back to `RUST_LOG`, then to `info`.
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

static INIT: Once = Once::new();

/// Install `env_logger` as the global logger. Later calls are ignored, and so
/// is an already installed logger from elsewhere.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        match config.env_filter.or_else(|| std::env::var("RUST_LOG").ok()) {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => {
                builder.filter_level(log::LevelFilter::Info);
            }
        }
        builder.write_style(config.write_style);
        if let Err(e) = builder.try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        }
        log::debug!("logging initialized");
    });
}
