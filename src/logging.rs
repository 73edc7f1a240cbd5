//! Console logging for hosts and tests.
//!
//! The library only emits `tracing` events; installing a subscriber is left to the
//! host. `init_tracing` is a convenience for hosts without one and for tests. It
//! honours `MEMBER_QUERY_LOG`, then `RUST_LOG`, and defaults to `warn`.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub const LOG_ENV: &str = "MEMBER_QUERY_LOG";

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Safe to call more than once; an already installed subscriber is kept.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let level = log_level();
        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::new(&level));

        if tracing_subscriber::registry().with(console_layer).try_init().is_err() {
            tracing::debug!("tracing subscriber already installed, keeping it");
        } else {
            tracing::debug!(level = %level, "console logging initialized");
        }
    });
}

fn log_level() -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|_| "warn".to_string())
}
