//! Opt-in tracing for plugin development.
//!
//! The library never installs a global subscriber on its own; it only
//! emits spans and events. When diagnosing a stuck handshake, a dropped
//! packet or a call that never settles, turn the firehose on with e.g.
//!
//! ```text
//! RUST_LOG=splonebox=debug,splonebox_proto=trace cargo run
//! ```
//!
//! and call [`init_tracing`] once at startup. The integration test
//! harness does this for every mock-core session.

use tracing_subscriber::EnvFilter;

/// Targets shown when `RUST_LOG` is not set: problems only, from the two
/// splonebox crates.
const QUIET_FILTER: &str = "splonebox=warn,splonebox_proto=warn";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Falls back to the quiet warn-level filter when the variable is unset
/// or invalid. Calling this twice, or when another global subscriber is
/// already installed, is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(QUIET_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
