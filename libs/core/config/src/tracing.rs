use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre for binaries.
///
/// Shows the file:line of the failure and hides the environment section,
/// which would otherwise print API keys. Safe to call multiple times.
pub fn install_color_eyre() {
    // Already installed is fine, keep the first hook
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing for the given environment.
///
/// - **Production**: flattened JSON events on stderr, `warn` unless `RUST_LOG` says otherwise
/// - **Development**: pretty output on stderr, `info` unless `RUST_LOG` says otherwise
///
/// Both include [`tracing_error::ErrorLayer`] so eyre reports carry span traces.
/// A second call is a no-op.
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    // RUST_LOG wins over the per-environment default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new("info,domain_knowledge=debug")
        }
    });

    // stdout carries command output, so every layer writes to stderr
    let result = if is_production {
        // One JSON object per line for log shippers
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        // Human-readable output for local runs
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!("Tracing initialized. Environment: {:?}", environment),
        // Tests and re-entrant callers may initialize more than once
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}
