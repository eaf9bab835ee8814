//! urg-tool support: configuration and logging

mod config;

pub use config::{CaptureMode, ToolConfig, ENV_PREFIX};

use tracing_subscriber::FmtSubscriber;

/// Initialize logging; output goes to stderr so stdout carries only scans
pub fn init_logging(config: &ToolConfig) {
    let builder = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())
            .expect("Failed to set tracing subscriber");
    } else {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("Failed to set tracing subscriber");
    }
}
