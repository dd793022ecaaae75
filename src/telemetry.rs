//! Tracing subscriber setup

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "backup_engine=info";

static INIT: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default `backup_engine=info`).
///
/// Safe to call more than once; only the first call has any effect, and an
/// already installed global subscriber is left in place.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init();
    });
}
