use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

/// Log output settings for applications embedding the drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `plclink_s7=debug`.
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "LogConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default = "LogConfig::default_ansi")]
    pub ansi: bool,
}

impl LogConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_ansi() -> bool {
        true
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            with_target: false,
            ansi: Self::default_ansi(),
        }
    }
}

/// Install a global fmt subscriber. Returns `false` if one was already
/// installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"level":"plclink_s7=debug"}"#).unwrap();
        assert_eq!(config.level, "plclink_s7=debug");
        assert!(!config.with_target);
        assert!(config.ansi);
        assert_eq!(serde_json::from_str::<LogConfig>("{}").unwrap(), LogConfig::default());
    }

    #[test]
    fn second_install_is_rejected() {
        let config = LogConfig {
            ansi: false,
            ..Default::default()
        };
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
