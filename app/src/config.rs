//! App configuration: `pforge.yaml` (or JSON) plus env overrides.
//!
//! 配置文件可选；缺省时使用内置默认值。环境变量 `PF_DATA_DIR` / `PF_RELAY_PREFIX` 覆盖文件内容。

use anyhow::{Context, Result};
use pf_config::GenerationOptions;
use pf_core::RefreshOptions;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["pforge.yaml", "pforge.json"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<dataDir>/ruleset`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set_dir: Option<PathBuf>,
    /// Prepended to GitHub-hosted rule-set URLs, e.g. `https://ghproxy.example`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_prefix: Option<String>,
    /// JSON/YAML list of nodes available to `useAllAvailableOutbounds`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<PathBuf>,
    pub refresh: RefreshConfig,
    pub cores: CoreConfig,
    pub generation: GenerationOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            rule_set_dir: None,
            relay_prefix: None,
            nodes: None,
            refresh: RefreshConfig::default(),
            cores: CoreConfig::default(),
            generation: GenerationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
    pub concurrency: usize,
    #[serde(serialize_with = "ser_duration", deserialize_with = "de_duration")]
    pub timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Proxy-core binaries used to check generated artifacts. Unset means no check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mihomo: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub singbox: Option<PathBuf>,
}

fn ser_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*d).to_string())
}

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Raw::deserialize(d)? {
        Raw::Secs(s) => Ok(Duration::from_secs(s)),
        Raw::Text(t) => humantime::parse_duration(&t).map_err(serde::de::Error::custom),
    }
}

impl AppConfig {
    /// Load `path`, or the first default file present in the working directory,
    /// or built-in defaults. Env overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let found = match path {
            Some(p) => Some(p.to_path_buf()),
            None => DEFAULT_CONFIG_FILES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file()),
        };
        let mut cfg = match found {
            Some(p) => {
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::parse(&p, &text)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        crate::cli::parse_doc(path, text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = get("PF_DATA_DIR").filter(|s| !s.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = get("PF_RELAY_PREFIX") {
            self.relay_prefix = Some(prefix).filter(|s| !s.is_empty());
        }
    }

    pub fn rule_set_dir(&self) -> PathBuf {
        self.rule_set_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("ruleset"))
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            concurrency: self.refresh.concurrency.max(1),
            timeout: self.refresh.timeout,
            dir: self.rule_set_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_with_humantime_timeout() {
        let text = r#"
dataDir: /var/lib/pforge
relayPrefix: https://relay.example
refresh:
  concurrency: 3
  timeout: 90s
cores:
  singbox: /usr/bin/sing-box
generation:
  mihomo:
    mixedPort: 7897
"#;
        let cfg = AppConfig::parse(Path::new("pforge.yaml"), text).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/pforge"));
        assert_eq!(cfg.refresh.timeout, Duration::from_secs(90));
        assert_eq!(cfg.refresh.concurrency, 3);
        assert_eq!(cfg.cores.singbox, Some(PathBuf::from("/usr/bin/sing-box")));
        assert_eq!(cfg.generation.mihomo.mixed_port, 7897);
        assert_eq!(cfg.rule_set_dir(), PathBuf::from("/var/lib/pforge/ruleset"));
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(|k| match k {
            "PF_DATA_DIR" => Some("/tmp/pf".into()),
            "PF_RELAY_PREFIX" => Some("https://r.example".into()),
            _ => None,
        });
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/pf"));
        assert_eq!(cfg.relay_prefix.as_deref(), Some("https://r.example"));
        assert_eq!(cfg.refresh_options().timeout, Duration::from_secs(300));
    }

    #[test]
    fn numeric_timeout_is_seconds() {
        let cfg =
            AppConfig::parse(Path::new("pforge.json"), r#"{"refresh": {"timeout": 12}}"#).unwrap();
        assert_eq!(cfg.refresh.timeout, Duration::from_secs(12));
        assert_eq!(cfg.refresh.concurrency, 5);
    }
}
