//! Logging setup. `CODEXCORE_DEBUG=1` turns on debug output; `RUST_LOG`
//! overrides either default.
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static ENABLED: OnceLock<bool> = OnceLock::new();
static INSTALLED: OnceLock<()> = OnceLock::new();

pub fn is_enabled() -> bool {
    *ENABLED.get_or_init(|| std::env::var("CODEXCORE_DEBUG").ok().as_deref() == Some("1"))
}

/// Install the global fmt subscriber on stderr. Later calls do nothing.
pub fn init_logging() {
    INSTALLED.get_or_init(|| {
        let default = if is_enabled() { "codexcore=debug" } else { "codexcore=warn" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        // another subscriber may already be installed by an embedding host
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}
