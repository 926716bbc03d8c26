//! Tracing initialisation

use std::sync::Once;

use clap::ValueEnum;
use tracing_subscriber::{prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber once; later calls are no-ops.
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init(log_format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = build_env_filter();
        match log_format {
            LogFormat::Text => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .compact()
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(fmt_layer).init();
            }
            LogFormat::Json => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .json()
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(fmt_layer).init();
            }
        }
    });
}

/// Per-test subscriber that writes through the test harness's capture
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter())
        .with_test_writer()
        .try_init();
}
