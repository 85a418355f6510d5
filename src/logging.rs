//! Subscriber setup for the CLI and embedding apps. The library itself only
//! emits `tracing` events under the `satchel` target.

use tracing_subscriber::{fmt, EnvFilter};

/// Wallet events at info, dependencies (electrum client, rustls) at warn.
pub const DEFAULT_FILTER: &str = "warn,satchel=info";

/// Filter from `SATCHEL_LOG`, then `RUST_LOG`, then [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    ["SATCHEL_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a stderr subscriber, JSON lines when `SATCHEL_LOG_JSON=1`.
/// Returns false if a global subscriber was already set.
pub fn init_logging() -> bool {
    let json = std::env::var("SATCHEL_LOG_JSON").is_ok_and(|value| value == "1");
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.compact().try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        init_logging();
        assert!(!init_logging());
    }
}
