//! Log capture for tests.

use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness.
///
/// Honors `RUST_LOG`, defaulting to `warn`. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
