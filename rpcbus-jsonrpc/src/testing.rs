//! Helpers shared by the unit and integration tests.
//!
//! Only compiled for tests.  Integration tests pull this file in by path, so it must not depend on
//! anything else in the crate.

/// Send `tracing` output to the test harness, filtered by `RUST_LOG` if it's set.
///
/// Safe to call from every test; only the first call does anything.
pub fn init_test_logging() {
    use std::sync::OnceLock;

    const DEFAULT_LOG_FILTER: &str = "rpcbus_jsonrpc=debug";
    static INIT_LOGGING: OnceLock<()> = OnceLock::new();

    INIT_LOGGING.get_or_init(|| {
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
            .with_test_writer()
            .try_init()
            .unwrap()
    });
}
