//! pf-types: cross-crate stable contracts (engine kinds, issue codes, shared errors, ports).
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub mod errors;
pub mod ports;

pub use errors::{FetchError, GenerationError};

/// Target proxy-core grammar.
///
/// 目标内核配置语法：A = mihomo (YAML)，B = sing-box (JSON)。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Engine A: YAML document with flat rule lines.
    Mihomo,
    /// Engine B: JSON document with logical rule trees.
    #[serde(rename = "singbox")]
    SingBox,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Mihomo, EngineKind::SingBox];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Mihomo => "mihomo",
            EngineKind::SingBox => "singbox",
        }
    }

    /// File name the rendered artifact is written to.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            EngineKind::Mihomo => "config.yaml",
            EngineKind::SingBox => "config.json",
        }
    }
}

impl Display for EngineKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mihomo" | "clash" | "a" => Ok(EngineKind::Mihomo),
            "singbox" | "sing-box" | "b" => Ok(EngineKind::SingBox),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// Stable validation codes surfaced to callers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ValidationCode {
    UnknownReference,
    DuplicateTag,
    CyclicGroupReference,
    MissingTerminalMatchRule,
    UnsupportedConditionForEngine,
    InvalidValue,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        use ValidationCode::*;
        match self {
            UnknownReference => "UnknownReference",
            DuplicateTag => "DuplicateTag",
            CyclicGroupReference => "CyclicGroupReference",
            MissingTerminalMatchRule => "MissingTerminalMatchRule",
            UnsupportedConditionForEngine => "UnsupportedConditionForEngine",
            InvalidValue => "InvalidValue",
        }
    }
}

impl Display for ValidationCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation finding. `ptr` locates the offending value, e.g. `/rules/3/target`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub ptr: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationError {
    pub fn new(code: ValidationCode, ptr: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            code,
            ptr: ptr.into(),
            msg: msg.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.ptr, self.msg)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

/// Non-fatal generation finding (e.g. an unused rule-set).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub ptr: String,
    pub msg: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    UnusedRuleSet,
    DowngradedGroupKind,
    DroppedMember,
    DroppedMetadata,
}

impl Warning {
    pub fn new(kind: WarningKind, ptr: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind,
            ptr: ptr.into(),
            msg: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_serialization() {
        let j = serde_json::to_string(&EngineKind::SingBox).unwrap();
        assert_eq!(j, r#""singbox""#);
        let k: EngineKind = serde_json::from_str(r#""mihomo""#).unwrap();
        assert_eq!(k, EngineKind::Mihomo);
    }

    #[test]
    fn engine_kind_from_str_aliases() {
        assert_eq!("sing-box".parse::<EngineKind>().unwrap(), EngineKind::SingBox);
        assert_eq!("Clash".parse::<EngineKind>().unwrap(), EngineKind::Mihomo);
        assert!("v2ray".parse::<EngineKind>().is_err());
    }

    #[test]
    fn validation_code_is_stable() {
        let j = serde_json::to_string(&ValidationCode::UnknownReference).unwrap();
        assert_eq!(j, r#""UnknownReference""#);
        assert_eq!(
            ValidationCode::CyclicGroupReference.to_string(),
            "CyclicGroupReference"
        );
    }

    #[test]
    fn validation_error_display_includes_hint() {
        let e = ValidationError::new(ValidationCode::DuplicateTag, "/groups/1/tag", "dup `proxy`")
            .with_hint("rename one of the groups");
        let s = e.to_string();
        assert!(s.starts_with("[DuplicateTag] /groups/1/tag"));
        assert!(s.contains("hint: rename"));
    }
}
