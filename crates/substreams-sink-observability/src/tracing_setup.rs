//! Tracing / logging initialisation helpers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: IndexMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: IndexMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `verbose` raises the sink crates to `debug`; everything else stays at `info`.
    pub fn for_sink(verbose: bool, json: bool) -> Self {
        let level = if verbose { "debug" } else { "info" };
        let components = [
            "substreams-sink-core",
            "substreams-sink-cursor",
            "substreams-sink-observability",
            "substreams-sink-runtime",
            "substreams-sink",
        ]
        .into_iter()
        .map(|c| (c.to_string(), level.to_string()))
        .collect();
        Self {
            level: "info".into(),
            components,
            json,
        }
    }

    /// EnvFilter directive string, e.g. `info,substreams_sink_core=debug`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Initialise tracing with the given log config.
/// Should be called once at application startup. `RUST_LOG`, when set,
/// replaces the configured directives.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(LogConfig::default().directives(), "info");
    }

    #[test]
    fn verbose_raises_sink_crates() {
        let directives = LogConfig::for_sink(true, false).directives();
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("substreams_sink_runtime=debug"));
        assert!(directives.contains("substreams_sink=debug"));

        let quiet = LogConfig::for_sink(false, false).directives();
        assert!(!quiet.contains("debug"));
    }
}
