//! Structural validation of a [`Template`].
//!
//! Exhaustive: every violation found in one pass is returned, callers present them together.
//! 校验不是 fail-fast：一次收集全部问题。

use crate::model::{
    is_reserved_tag, Condition, ConditionKind, GroupKind, Rule, Sentinel, SourceKind, Template,
};
use pf_types::{EngineKind, ValidationCode, ValidationError};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Engine-independent checks: unique tags, resolvable references, terminal match-all, no cycles.
pub fn validate(t: &Template) -> Vec<ValidationError> {
    let mut v = Validator::new(t);
    v.check_groups();
    v.check_cycles();
    v.check_rules();
    v.check_rule_sets();
    v.errors
}

/// [`validate`] plus the constructs `engine` can not express.
pub fn validate_for(t: &Template, engine: EngineKind) -> Vec<ValidationError> {
    let mut errors = validate(t);
    errors.extend(engine_constraints(t, engine));
    errors
}

/// `Ok(())` when [`validate_for`] finds nothing.
pub fn ensure_valid(t: &Template, engine: EngineKind) -> Result<(), Vec<ValidationError>> {
    let errors = validate_for(t, engine);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct Validator<'a> {
    t: &'a Template,
    /// Group tag -> enabled, first occurrence wins.
    groups: HashMap<&'a str, bool>,
    rule_sets: HashSet<&'a str>,
    errors: Vec<ValidationError>,
}

impl<'a> Validator<'a> {
    fn new(t: &'a Template) -> Self {
        let mut groups = HashMap::new();
        for g in &t.groups {
            groups.entry(g.tag.as_str()).or_insert(g.enabled);
        }
        let rule_sets = t.rule_sets.iter().map(|r| r.tag.as_str()).collect();
        Self {
            t,
            groups,
            rule_sets,
            errors: Vec::new(),
        }
    }

    fn push(&mut self, code: ValidationCode, ptr: String, msg: String) {
        self.errors.push(ValidationError::new(code, ptr, msg));
    }

    fn check_groups(&mut self) {
        let t = self.t;
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, g) in t.groups.iter().enumerate() {
            let ptr = format!("/groups/{i}");
            if g.tag.trim().is_empty() {
                self.push(
                    ValidationCode::InvalidValue,
                    format!("{ptr}/tag"),
                    "group tag is empty".into(),
                );
            } else if is_reserved_tag(&g.tag) {
                self.push(
                    ValidationCode::InvalidValue,
                    format!("{ptr}/tag"),
                    format!("`{}` is a reserved name", g.tag),
                );
            } else if !seen.insert(g.tag.as_str()) {
                self.errors.push(
                    ValidationError::new(
                        ValidationCode::DuplicateTag,
                        format!("{ptr}/tag"),
                        format!("duplicate group tag `{}`", g.tag),
                    )
                    .with_hint("group tags must be unique within a template"),
                );
            }

            if let Some(filter) = &g.member_filter {
                if !matches!(g.kind, GroupKind::Urltest | GroupKind::Fallback) {
                    self.push(
                        ValidationCode::InvalidValue,
                        format!("{ptr}/memberFilter"),
                        format!("memberFilter is only valid on urltest/fallback groups, `{}` is not", g.tag),
                    );
                } else if let Err(e) = regex::Regex::new(filter) {
                    self.push(
                        ValidationCode::InvalidValue,
                        format!("{ptr}/memberFilter"),
                        format!("invalid regex: {e}"),
                    );
                }
            }

            if !g.kind.has_members() {
                continue;
            }
            if g.use_all_available_outbounds {
                if g.default_member.is_some() {
                    self.errors.push(
                        ValidationError::new(
                            ValidationCode::InvalidValue,
                            format!("{ptr}/defaultMember"),
                            format!("`{}` takes its members from the node list", g.tag),
                        )
                        .with_hint("defaultMember needs an explicit member list"),
                    );
                }
                continue;
            }
            if g.members.is_empty() {
                self.errors.push(
                    ValidationError::new(
                        ValidationCode::InvalidValue,
                        format!("{ptr}/members"),
                        format!("`{}` has no members", g.tag),
                    )
                    .with_hint("add members or set useAllAvailableOutbounds"),
                );
            }
            for (j, m) in g.members.iter().enumerate() {
                self.check_member(m, format!("{ptr}/members/{j}"));
            }
            if let Some(d) = &g.default_member {
                if !g.members.iter().any(|m| m == d) {
                    self.push(
                        ValidationCode::UnknownReference,
                        format!("{ptr}/defaultMember"),
                        format!("default member `{d}` is not a member of `{}`", g.tag),
                    );
                } else if self.groups.get(d.as_str()) == Some(&false) {
                    self.errors.push(
                        ValidationError::new(
                            ValidationCode::UnknownReference,
                            format!("{ptr}/defaultMember"),
                            format!("default member `{d}` is a disabled group"),
                        )
                        .with_hint("disabled members are left out of the generated group"),
                    );
                }
            }
        }
    }

    fn check_member(&mut self, m: &str, ptr: String) {
        match Sentinel::parse(m) {
            Some(s) if s.is_member() => {}
            Some(_) => self.push(
                ValidationCode::InvalidValue,
                ptr,
                format!("`{m}` can only be used as a rule target"),
            ),
            None if self.groups.contains_key(m) => {}
            None => self.errors.push(
                ValidationError::new(
                    ValidationCode::UnknownReference,
                    ptr,
                    format!("unknown member `{m}`"),
                )
                .with_hint("members must name a group or DIRECT/REJECT"),
            ),
        }
    }

    /// Depth-first search over member edges; each back edge is one cycle.
    fn check_cycles(&mut self) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let index: HashMap<&str, usize> = self
            .t
            .groups
            .iter()
            .enumerate()
            .rev()
            .map(|(i, g)| (g.tag.as_str(), i))
            .collect();
        let edges: Vec<Vec<(usize, usize)>> = self
            .t
            .groups
            .iter()
            .map(|g| {
                if g.use_all_available_outbounds || !g.kind.has_members() {
                    return Vec::new();
                }
                g.members
                    .iter()
                    .enumerate()
                    .filter_map(|(j, m)| index.get(m.as_str()).map(|&to| (j, to)))
                    .collect()
            })
            .collect();

        let mut marks = vec![Mark::White; self.t.groups.len()];
        let mut found = Vec::new();
        for start in 0..self.t.groups.len() {
            if marks[start] != Mark::White {
                continue;
            }
            // (node, next edge index); the stack doubles as the current path
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Grey;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if top.1 < edges[node].len() {
                    let (member_idx, to) = edges[node][top.1];
                    top.1 += 1;
                    match marks[to] {
                        Mark::White => {
                            marks[to] = Mark::Grey;
                            stack.push((to, 0));
                        }
                        Mark::Grey => {
                            let from = stack.iter().position(|(n, _)| *n == to).unwrap_or(0);
                            let mut path: Vec<&str> = stack[from..]
                                .iter()
                                .map(|(n, _)| self.t.groups[*n].tag.as_str())
                                .collect();
                            path.push(self.t.groups[to].tag.as_str());
                            found.push((node, member_idx, path.join(" -> ")));
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        for (node, member_idx, path) in found {
            self.errors.push(
                ValidationError::new(
                    ValidationCode::CyclicGroupReference,
                    format!("/groups/{node}/members/{member_idx}"),
                    format!("group reference cycle: {path}"),
                )
                .with_hint("neither engine defines behaviour for a reference cycle"),
            );
        }
    }

    fn check_rules(&mut self) {
        let t = self.t;
        let last = t.rules.len().saturating_sub(1);
        let mut match_all_seen = false;
        for (i, rule) in t.rules.iter().enumerate() {
            let ptr = format!("/rules/{i}");
            self.check_target(rule, &ptr);
            self.check_condition(&rule.condition, &ptr, true);

            if rule.is_match_all() {
                if match_all_seen {
                    self.push(
                        ValidationCode::MissingTerminalMatchRule,
                        ptr,
                        "more than one match-all rule".into(),
                    );
                } else if i != last {
                    self.errors.push(
                        ValidationError::new(
                            ValidationCode::MissingTerminalMatchRule,
                            ptr,
                            format!("match-all rule at position {i} is not the last rule"),
                        )
                        .with_hint("rules after a match-all can never be reached"),
                    );
                }
                match_all_seen = true;
            }
        }
    }

    fn check_target(&mut self, rule: &Rule, ptr: &str) {
        let target = rule.target.as_str();
        if target.is_empty() {
            self.push(
                ValidationCode::InvalidValue,
                format!("{ptr}/target"),
                "rule target is empty".into(),
            );
            return;
        }
        if Sentinel::parse(target).is_some() {
            return;
        }
        match self.groups.get(target) {
            Some(true) => {}
            Some(false) => self.errors.push(
                ValidationError::new(
                    ValidationCode::UnknownReference,
                    format!("{ptr}/target"),
                    format!("target `{target}` is a disabled group"),
                )
                .with_hint("enable the group or point the rule elsewhere"),
            ),
            None => self.push(
                ValidationCode::UnknownReference,
                format!("{ptr}/target"),
                format!("unknown target `{target}`"),
            ),
        }
    }

    fn check_condition(&mut self, c: &Condition, ptr: &str, top: bool) {
        if c.kind.is_logical() {
            if c.rules.is_empty() {
                self.push(
                    ValidationCode::InvalidValue,
                    format!("{ptr}/rules"),
                    "logical condition has no children".into(),
                );
            }
            for (j, child) in c.rules.iter().enumerate() {
                self.check_condition(child, &format!("{ptr}/rules/{j}"), false);
            }
            return;
        }
        if !c.rules.is_empty() {
            self.push(
                ValidationCode::InvalidValue,
                format!("{ptr}/rules"),
                "only logical conditions may have children".into(),
            );
        }
        if c.kind == ConditionKind::MatchAll {
            if !top {
                self.push(
                    ValidationCode::InvalidValue,
                    ptr.to_string(),
                    "match-all can not be nested in a logical condition".into(),
                );
            }
            return;
        }

        let payload = c.payload.trim();
        let pptr = format!("{ptr}/payload");
        if payload.is_empty() {
            self.push(ValidationCode::InvalidValue, pptr, "payload is empty".into());
            return;
        }
        match c.kind {
            ConditionKind::RuleSetReference if !self.rule_sets.contains(payload) => {
                self.errors.push(
                    ValidationError::new(
                        ValidationCode::UnknownReference,
                        pptr,
                        format!("unknown rule-set `{payload}`"),
                    )
                    .with_hint("declare the rule-set or remove the rule"),
                );
            }
            ConditionKind::IpCidr if !is_cidr(payload) => {
                self.push(
                    ValidationCode::InvalidValue,
                    pptr,
                    format!("`{payload}` is not an IP CIDR"),
                );
            }
            ConditionKind::Port if parse_port(payload).is_none() => {
                self.push(
                    ValidationCode::InvalidValue,
                    pptr,
                    format!("`{payload}` is not a port or port range"),
                );
            }
            _ => {}
        }
    }

    fn check_rule_sets(&mut self) {
        let t = self.t;
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, rs) in t.rule_sets.iter().enumerate() {
            let ptr = format!("/ruleSets/{i}");
            if rs.tag.trim().is_empty() {
                self.push(
                    ValidationCode::InvalidValue,
                    format!("{ptr}/tag"),
                    "rule-set tag is empty".into(),
                );
            } else if !seen.insert(rs.tag.as_str()) {
                self.push(
                    ValidationCode::DuplicateTag,
                    format!("{ptr}/tag"),
                    format!("duplicate rule-set tag `{}`", rs.tag),
                );
            }
            match rs.source_kind {
                SourceKind::Remote if rs.url.as_deref().map_or(true, str::is_empty) => self.push(
                    ValidationCode::InvalidValue,
                    format!("{ptr}/url"),
                    "remote rule-set needs a url".into(),
                ),
                SourceKind::Local if rs.local_path.as_deref().map_or(true, str::is_empty) => self
                    .push(
                        ValidationCode::InvalidValue,
                        format!("{ptr}/localPath"),
                        "local rule-set needs a localPath".into(),
                    ),
                _ => {}
            }
            if let Some(via) = &rs.download_via {
                let ok = match Sentinel::parse(via) {
                    Some(Sentinel::Direct) => true,
                    Some(_) => false,
                    None => self.groups.get(via.as_str()) == Some(&true),
                };
                if !ok {
                    self.push(
                        ValidationCode::UnknownReference,
                        format!("{ptr}/downloadVia"),
                        format!("download detour `{via}` is not an enabled group or DIRECT"),
                    );
                }
            }
        }
    }
}

fn engine_constraints(t: &Template, engine: EngineKind) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (i, rule) in t.rules.iter().enumerate() {
        let ptr = format!("/rules/{i}");
        match engine {
            EngineKind::Mihomo => {
                let kind = rule.condition.kind;
                if kind.is_logical() || matches!(kind, ConditionKind::Protocol | ConditionKind::Port)
                {
                    errors.push(
                        ValidationError::new(
                            ValidationCode::UnsupportedConditionForEngine,
                            ptr.clone(),
                            format!("mihomo has no {kind:?} condition"),
                        )
                        .with_hint("split the rule or use a rule-set"),
                    );
                }
                if rule.condition.invert {
                    errors.push(ValidationError::new(
                        ValidationCode::UnsupportedConditionForEngine,
                        ptr.clone(),
                        "mihomo rules can not be inverted",
                    ));
                }
                if Sentinel::parse(&rule.target) == Some(Sentinel::HijackDns) {
                    errors.push(ValidationError::new(
                        ValidationCode::UnsupportedConditionForEngine,
                        format!("{ptr}/target"),
                        "HIJACK-DNS is a sing-box action",
                    ));
                }
            }
            EngineKind::SingBox => {
                if rule.is_match_all() && Sentinel::parse(&rule.target) == Some(Sentinel::HijackDns)
                {
                    errors.push(ValidationError::new(
                        ValidationCode::UnsupportedConditionForEngine,
                        format!("{ptr}/target"),
                        "the final outbound can not be an action",
                    ));
                }
            }
        }
    }
    errors
}

/// Accepts `addr/prefix` with a prefix that fits the address family.
pub fn is_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().map_or(false, |p| p <= max)
}

/// A single port, or an inclusive range written `a-b` or `a:b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

pub fn parse_port(s: &str) -> Option<PortSpec> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once(['-', ':']) {
        let (a, b) = (a.trim().parse::<u16>().ok()?, b.trim().parse::<u16>().ok()?);
        return (a <= b).then_some(PortSpec::Range(a, b));
    }
    s.parse::<u16>().ok().map(PortSpec::Single)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProxyGroup, RuleSet, RuleSetFormat};

    fn base() -> Template {
        Template {
            groups: vec![
                ProxyGroup::selector("proxy", ["auto", "DIRECT"]),
                ProxyGroup::new("auto", GroupKind::Urltest).use_all(None),
            ],
            rules: vec![
                Rule::new(ConditionKind::DomainSuffix, "example.com", "proxy"),
                Rule::match_all("proxy"),
            ],
            rule_sets: vec![],
        }
    }

    fn codes(errors: &[ValidationError]) -> Vec<ValidationCode> {
        errors.iter().map(|e| e.code).collect()
    }

    #[test]
    fn valid_template_passes() {
        assert!(validate(&base()).is_empty());
        assert!(ensure_valid(&base(), EngineKind::Mihomo).is_ok());
    }

    #[test]
    fn duplicate_group_tag() {
        let mut t = base();
        t.groups.push(ProxyGroup::selector("proxy", ["DIRECT"]));
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::DuplicateTag]);
        assert_eq!(errors[0].ptr, "/groups/2/tag");
    }

    #[test]
    fn unknown_rule_target_and_member() {
        let mut t = base();
        t.rules[0].target = "nowhere".into();
        t.groups[0].members.push("ghost".into());
        let errors = validate(&t);
        assert_eq!(
            codes(&errors),
            vec![ValidationCode::UnknownReference, ValidationCode::UnknownReference]
        );
        assert_eq!(errors[0].ptr, "/groups/0/members/2");
        assert_eq!(errors[1].ptr, "/rules/0/target");
    }

    #[test]
    fn misplaced_and_duplicate_match_all() {
        let mut t = base();
        t.rules.insert(0, Rule::match_all("DIRECT"));
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::MissingTerminalMatchRule; 2]);
        assert_eq!(errors[0].ptr, "/rules/0");
        assert_eq!(errors[1].ptr, "/rules/2");
    }

    #[test]
    fn detects_cycles() {
        let mut t = base();
        t.groups.push(ProxyGroup::selector("a", ["b"]));
        t.groups.push(ProxyGroup::selector("b", ["c", "DIRECT"]));
        t.groups.push(ProxyGroup::selector("c", ["a"]));
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::CyclicGroupReference]);
        assert!(errors[0].msg.contains("a -> b -> c -> a"), "{}", errors[0].msg);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut t = base();
        t.groups[0].members.push("proxy".into());
        assert_eq!(codes(&validate(&t)), vec![ValidationCode::CyclicGroupReference]);
    }

    #[test]
    fn collects_everything_in_one_pass() {
        let mut t = base();
        t.groups.push(ProxyGroup::selector("proxy", ["DIRECT"]));
        t.rules[0] = Rule::new(ConditionKind::RuleSetReference, "ads", "missing");
        t.rules.insert(0, Rule::match_all("proxy"));
        let errors = validate(&t);
        assert!(errors.len() >= 4, "{errors:?}");
    }

    #[test]
    fn rule_set_checks() {
        let mut t = base();
        t.rule_sets.push(RuleSet::remote("ads", "https://x/ads.srs", RuleSetFormat::Binary));
        t.rule_sets.push(RuleSet::local("ads", "/tmp/ads.json", RuleSetFormat::Source));
        let mut broken = RuleSet::remote("cn", "", RuleSetFormat::Binary);
        broken.download_via = Some("nope".into());
        t.rule_sets.push(broken);
        let errors = validate(&t);
        assert_eq!(
            codes(&errors),
            vec![
                ValidationCode::DuplicateTag,
                ValidationCode::InvalidValue,
                ValidationCode::UnknownReference
            ]
        );
    }

    #[test]
    fn disabled_group_can_not_be_a_target() {
        let mut t = base();
        t.groups.push({
            let mut g = ProxyGroup::selector("off", ["DIRECT"]);
            g.enabled = false;
            g
        });
        t.rules.insert(0, Rule::new(ConditionKind::DomainExact, "a.com", "off"));
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::UnknownReference]);
        assert!(errors[0].msg.contains("disabled"));
    }

    #[test]
    fn default_member_checks() {
        let mut t = base();
        t.groups[1] = ProxyGroup::new("auto", GroupKind::Selector).use_all(None);
        t.groups[1].default_member = Some("ghost".into());
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::InvalidValue]);
        assert_eq!(errors[0].ptr, "/groups/1/defaultMember");

        let mut t = base();
        t.groups.push({
            let mut g = ProxyGroup::selector("off", ["DIRECT"]);
            g.enabled = false;
            g
        });
        t.groups[0].members.push("off".into());
        assert!(validate(&t).is_empty());
        t.groups[0].default_member = Some("off".into());
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::UnknownReference]);
        assert_eq!(errors[0].ptr, "/groups/0/defaultMember");

        t.groups[0].default_member = Some("DIRECT".into());
        assert!(validate(&t).is_empty());
    }

    #[test]
    fn member_filter_rules() {
        let mut t = base();
        t.groups[1].member_filter = Some("(?i)hk(".into());
        t.groups[0].member_filter = Some("hk".into());
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::InvalidValue; 2]);
    }

    #[test]
    fn selector_without_members() {
        let mut t = base();
        t.groups.push(ProxyGroup::new("empty", GroupKind::Selector));
        t.groups.push(ProxyGroup::new("blackhole", GroupKind::Block));
        let errors = validate(&t);
        assert_eq!(codes(&errors), vec![ValidationCode::InvalidValue]);
        assert_eq!(errors[0].ptr, "/groups/2/members");
    }

    #[test]
    fn mihomo_rejects_logical_conditions() {
        let mut t = base();
        t.rules.insert(
            0,
            Rule::when(
                Condition::any(vec![
                    Condition::leaf(ConditionKind::Port, "53"),
                    Condition::leaf(ConditionKind::Protocol, "dns"),
                ]),
                "HIJACK-DNS",
            ),
        );
        assert!(validate(&t).is_empty());
        assert!(validate_for(&t, EngineKind::SingBox).is_empty());
        let errors = validate_for(&t, EngineKind::Mihomo);
        assert_eq!(
            codes(&errors),
            vec![ValidationCode::UnsupportedConditionForEngine; 2]
        );
    }

    #[test]
    fn payload_shapes() {
        assert!(is_cidr("10.0.0.0/8"));
        assert!(is_cidr("fc00::/7"));
        assert!(!is_cidr("10.0.0.0/33"));
        assert!(!is_cidr("example.com"));
        assert_eq!(parse_port("53"), Some(PortSpec::Single(53)));
        assert_eq!(parse_port("1000:2000"), Some(PortSpec::Range(1000, 2000)));
        assert_eq!(parse_port("2000-1000"), None);
    }
}
