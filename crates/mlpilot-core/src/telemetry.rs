//! Log subscriber setup for the `mlpilot` binary.
//!
//! Filtering comes from `MLPILOT_LOG`, then `RUST_LOG`. Without either, the
//! mlpilot crates log at the requested level and dependencies (HTTP stack,
//! runtime) only at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding `EnvFilter` directives for mlpilot.
pub const LOG_ENV: &str = "MLPILOT_LOG";

const CRATES: [&str; 4] = ["mlpilot", "mlpilot_core", "ml_platform", "platform_client"];

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(CRATES.iter().map(|krate| format!("{}={}", krate, level)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Configured directives win when they parse; otherwise the defaults apply.
fn build_filter(configured: Option<String>, level: Level) -> EnvFilter {
    configured
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Only the first call in a process has an
/// effect.
///
/// JSON lines carry the event target so aggregated logs can be split by
/// crate; the human format leaves it out.
pub fn init_tracing(json: bool, level: Level) {
    let configured = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok());
    let filter = build_filter(configured, level);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_quiet_dependencies() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("warn,"));
        for krate in CRATES {
            assert!(directives.contains(&format!("{}=debug", krate)));
        }
    }

    #[test]
    fn configured_directives_replace_defaults() {
        let configured = Some("platform_client=trace".to_string());
        let filter = build_filter(configured, Level::INFO).to_string();
        assert!(filter.contains("platform_client=trace"));
        assert!(!filter.contains("mlpilot_core"));

        let filter = build_filter(None, Level::INFO).to_string();
        assert!(filter.contains("mlpilot_core=info"));
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
