//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the global subscriber, writing to stderr.
///
/// Reads per-target levels from `FAIRSIM_LOG` (e.g. `fairsim=debug`), falling
/// back to `fairsim=info`, or `fairsim=warn` when `quiet` is set. Only the
/// first call has any effect.
pub fn init_tracing(quiet: bool) {
    INIT.call_once(|| {
        let fallback = if quiet { "fairsim=warn" } else { "fairsim=info" };
        let filter =
            EnvFilter::try_from_env("FAIRSIM_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .init();
    });
}
