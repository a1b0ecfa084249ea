//! Engine-agnostic policy model: proxy groups, ordered rules and rule-sets.
//!
//! 策略模型：与内核无关，两个适配器都只从这里派生配置。
use serde::{Deserialize, Serialize};

/// Reserved member/target: connect directly.
pub const DIRECT: &str = "DIRECT";
/// Reserved member/target: drop the connection.
pub const REJECT: &str = "REJECT";
/// Alias of [`REJECT`].
pub const BLOCK: &str = "block";
/// Reserved rule target (sing-box only): hand the connection to the DNS hijacker.
pub const HIJACK_DNS: &str = "HIJACK-DNS";

/// Reserved references that never name a group.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sentinel {
    Direct,
    Reject,
    HijackDns,
}

impl Sentinel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            DIRECT => Some(Sentinel::Direct),
            REJECT | BLOCK => Some(Sentinel::Reject),
            HIJACK_DNS => Some(Sentinel::HijackDns),
            _ => None,
        }
    }

    /// Usable inside `members` (hijack is a rule action only).
    pub fn is_member(&self) -> bool {
        !matches!(self, Sentinel::HijackDns)
    }
}

/// True when `tag` collides with a reserved name in any casing
/// (`direct` would shadow the sing-box builtin outbound).
pub fn is_reserved_tag(tag: &str) -> bool {
    [DIRECT, REJECT, BLOCK, HIJACK_DNS]
        .iter()
        .any(|r| r.eq_ignore_ascii_case(tag))
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn default_true() -> bool {
    true
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    Selector,
    Urltest,
    Fallback,
    LoadBalance,
    Direct,
    Block,
}

impl GroupKind {
    /// Kinds that carry a member list.
    pub fn has_members(&self) -> bool {
        !matches!(self, GroupKind::Direct | GroupKind::Block)
    }

    /// Kinds that probe members (test url / interval / tolerance / filter).
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            GroupKind::Urltest | GroupKind::Fallback | GroupKind::LoadBalance
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGroup {
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    pub kind: GroupKind,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, rename = "testURL", skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
    /// Probe interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_interval: Option<u64>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_filter: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_all_available_outbounds: bool,
    /// With `useAllAvailableOutbounds`, only expand to manually added nodes.
    #[serde(default, skip_serializing_if = "is_false")]
    pub manual_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub lazy: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_member: Option<String>,
}

impl ProxyGroup {
    pub fn new(tag: impl Into<String>, kind: GroupKind) -> Self {
        Self {
            tag: tag.into(),
            display_name: String::new(),
            description: String::new(),
            icon: String::new(),
            kind,
            members: Vec::new(),
            enabled: true,
            test_url: None,
            test_interval: None,
            tolerance: None,
            member_filter: None,
            use_all_available_outbounds: false,
            manual_only: false,
            lazy: false,
            hidden: false,
            default_member: None,
        }
    }

    pub fn selector<I, S>(tag: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(tag, GroupKind::Selector).with_members(members)
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn named(mut self, display_name: &str, icon: &str, description: &str) -> Self {
        self.display_name = display_name.to_string();
        self.icon = icon.to_string();
        self.description = description.to_string();
        self
    }

    pub fn probe(mut self, url: &str, interval_secs: u64, tolerance: Option<u32>) -> Self {
        self.test_url = Some(url.to_string());
        self.test_interval = Some(interval_secs);
        self.tolerance = tolerance;
        self
    }

    pub fn use_all(mut self, filter: Option<&str>) -> Self {
        self.use_all_available_outbounds = true;
        self.member_filter = filter.map(str::to_string);
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    DomainExact,
    DomainSuffix,
    DomainKeyword,
    IpCidr,
    GeoIp,
    RuleSetReference,
    Protocol,
    Port,
    LogicalAnd,
    LogicalOr,
    MatchAll,
}

impl ConditionKind {
    pub fn is_logical(&self) -> bool {
        matches!(self, ConditionKind::LogicalAnd | ConditionKind::LogicalOr)
    }

    /// `no-resolve` only means something for IP-based matching.
    pub fn supports_no_resolve(&self) -> bool {
        matches!(
            self,
            ConditionKind::IpCidr | ConditionKind::GeoIp | ConditionKind::RuleSetReference
        )
    }

    pub fn needs_payload(&self) -> bool {
        !self.is_logical() && !matches!(self, ConditionKind::MatchAll)
    }
}

/// A match condition. Logical kinds hold children in `rules`; leaves hold `payload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "conditionKind")]
    pub kind: ConditionKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Condition>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
}

impl Condition {
    pub fn leaf(kind: ConditionKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            rules: Vec::new(),
            invert: false,
        }
    }

    pub fn any(rules: Vec<Condition>) -> Self {
        Self {
            kind: ConditionKind::LogicalOr,
            payload: String::new(),
            rules,
            invert: false,
        }
    }

    pub fn all(rules: Vec<Condition>) -> Self {
        Self {
            kind: ConditionKind::LogicalAnd,
            payload: String::new(),
            rules,
            invert: false,
        }
    }

    /// Visit this condition and every nested child, depth first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Condition)) {
        f(self);
        for c in &self.rules {
            c.walk(f);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(flatten)]
    pub condition: Condition,
    pub target: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_resolve: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Rule {
    pub fn new(kind: ConditionKind, payload: impl Into<String>, target: impl Into<String>) -> Self {
        Self::when(Condition::leaf(kind, payload), target)
    }

    pub fn when(condition: Condition, target: impl Into<String>) -> Self {
        Self {
            condition,
            target: target.into(),
            no_resolve: false,
            description: String::new(),
        }
    }

    pub fn match_all(target: impl Into<String>) -> Self {
        Self::new(ConditionKind::MatchAll, "", target)
    }

    pub fn no_resolve(mut self) -> Self {
        self.no_resolve = true;
        self
    }

    pub fn describe(mut self, d: &str) -> Self {
        self.description = d.to_string();
        self
    }

    pub fn is_match_all(&self) -> bool {
        self.condition.kind == ConditionKind::MatchAll
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetFormat {
    Binary,
    Source,
}

/// Provider behaviour for mihomo; sing-box infers it from the rule-set content.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    #[default]
    Domain,
    Ipcidr,
    Classical,
}

impl Behavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Domain => "domain",
            Behavior::Ipcidr => "ipcidr",
            Behavior::Classical => "classical",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub tag: String,
    pub source_kind: SourceKind,
    pub format: RuleSetFormat,
    #[serde(default)]
    pub behavior: Behavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_via: Option<String>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl RuleSet {
    pub fn remote(tag: impl Into<String>, url: impl Into<String>, format: RuleSetFormat) -> Self {
        Self {
            tag: tag.into(),
            source_kind: SourceKind::Remote,
            format,
            behavior: Behavior::Domain,
            url: Some(url.into()),
            local_path: None,
            download_via: None,
            refresh_interval: None,
            description: String::new(),
        }
    }

    pub fn local(tag: impl Into<String>, path: impl Into<String>, format: RuleSetFormat) -> Self {
        Self {
            tag: tag.into(),
            source_kind: SourceKind::Local,
            format,
            behavior: Behavior::Domain,
            url: None,
            local_path: Some(path.into()),
            download_via: None,
            refresh_interval: None,
            description: String::new(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.source_kind == SourceKind::Remote
    }
}

/// One engine's editable policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub groups: Vec<ProxyGroup>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub rule_sets: Vec<RuleSet>,
}

impl Template {
    pub fn group(&self, tag: &str) -> Option<&ProxyGroup> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    pub fn rule_set(&self, tag: &str) -> Option<&RuleSet> {
        self.rule_sets.iter().find(|r| r.tag == tag)
    }

    /// The terminal match-all rule, if it is where it must be.
    pub fn terminal_rule(&self) -> Option<&Rule> {
        self.rules.last().filter(|r| r.is_match_all())
    }

    /// Rule-set tags referenced anywhere in the rule list.
    pub fn referenced_rule_sets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for r in &self.rules {
            r.condition.walk(&mut |c| {
                if c.kind == ConditionKind::RuleSetReference && !out.contains(&c.payload.as_str()) {
                    out.push(c.payload.as_str());
                }
            });
        }
        out
    }
}
