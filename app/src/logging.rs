//! Logging bootstrap: env-driven level/format, compact or JSON, written to stderr.
//!
//! 日志初始化：`PF_LOG_LEVEL` / `PF_LOG_FORMAT` 控制级别与格式；stdout 只留给命令输出。

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGING_CONFIG: OnceLock<LoggingConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `pf_core=debug,info`.
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let format = match get("PF_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        let level = get("PF_LOG_LEVEL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        Self { format, level }
    }

    /// CLI flags win over the environment.
    pub fn with_overrides(mut self, level: Option<&str>, format: Option<&str>) -> Self {
        if let Some(level) = level {
            self.level = level.to_string();
        }
        match format {
            Some("json") => self.format = LogFormat::Json,
            Some("compact") => self.format = LogFormat::Compact,
            _ => {}
        }
        self
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    if LOGGING_CONFIG.set(config.clone()).is_err() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow::anyhow!("invalid log level `{}`: {e}", config.level))?;
    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?;

    tracing::debug!(format = ?config.format, level = %config.level, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_then_flags() {
        let env = HashMap::from([("PF_LOG_FORMAT", "json"), ("PF_LOG_LEVEL", "debug")]);
        let cfg = LoggingConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");

        let cfg = cfg.with_overrides(Some("warn"), Some("compact"));
        assert_eq!(cfg.format, LogFormat::Compact);
        assert_eq!(cfg.level, "warn");
    }

    #[test]
    fn defaults() {
        let cfg = LoggingConfig::from_lookup(|_| None);
        assert_eq!(cfg.format, LogFormat::Compact);
        assert_eq!(cfg.level, "info");
    }
}
