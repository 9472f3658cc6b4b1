//! Tracing subscriber setup.
//!
//! The provider runs as a plugin whose stderr is collected by the host, so
//! logs are emitted as JSON lines.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,tenantform_provider=debug,tenantform_client=info";

static TEST_INIT: Once = Once::new();

/// Install the JSON subscriber. `RUST_LOG` wins over `filter`; `None` falls
/// back to [`DEFAULT_FILTER`]. Returns `false` if a subscriber was already
/// installed.
pub fn init_logging(filter: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));
    tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// Initialize logging for tests (once). Silent unless `RUST_LOG` is set.
pub fn init_test_logging() {
    TEST_INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}
