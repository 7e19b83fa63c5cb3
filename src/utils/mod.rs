pub mod error;

pub use error::{DopplerError, Result};

/// Install a `tracing_subscriber` with the crate's default filter.
///
/// Harnesses embedding the core may install their own subscriber instead;
/// this is a convenience for the smoke binary and for tests.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("doppler_core=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
