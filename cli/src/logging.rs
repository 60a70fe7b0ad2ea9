//! Tracing initialisation for the CLI.

use std::collections::HashMap;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Per-crate overrides, e.g. `relayrpc-tcp` → `debug`.
    pub components: HashMap<String, String>,
    /// JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Add a `component=level` override, as given on the command line.
    pub fn add_component(&mut self, spec: &str) -> anyhow::Result<()> {
        match spec.split_once('=') {
            Some((component, level)) if !component.is_empty() && !level.is_empty() => {
                self.components.insert(component.to_string(), level.to_string());
                Ok(())
            }
            _ => anyhow::bail!("--log-component expects <crate>=<level>, got '{spec}'"),
        }
    }

    /// `warn,relayrpc_tcp=debug`
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `config` when set.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

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
