//! Tracing bootstrap for hosts that do not install their own subscriber.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,chatlink=info";

/// Install a global fmt subscriber.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `CHATLINK_LOG`
/// 3) internal default filter
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(filter) = env::var("CHATLINK_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
