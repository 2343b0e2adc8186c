//! Logging setup.
//!
//! Logs go to stderr so that stdout carries only the marshalled build graph.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default level for a `-v` count: 0 → warn, 1 → info, 2 → debug, more → trace.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` directives are honoured on top of the level chosen by
/// `verbosity`.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init(verbosity: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .try_init()?;

    tracing::debug!("Observability initialized");

    Ok(())
}
