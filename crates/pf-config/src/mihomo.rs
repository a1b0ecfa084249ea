//! Engine A: mihomo (Clash.Meta) YAML.
//!
//! Rules are flat `KIND,payload,target[,no-resolve]` lines emitted in model order;
//! rule-sets become `rule-providers`.

use crate::adapter::{unused_rule_sets, Compiled, EngineAdapter};
use crate::model::{
    Behavior, ConditionKind, GroupKind, ProxyGroup, Rule, RuleSet, RuleSetFormat, Sentinel,
    SourceKind, Template, REJECT,
};
use crate::options::{GenerationOptions, MihomoOptions};
use crate::resolve::{check_node_tags, resolve_members};
use pf_types::ports::Node;
use pf_types::{EngineKind, GenerationError, Warning, WarningKind};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

fn is_false(b: &bool) -> bool {
    !*b
}

/// The subset of a mihomo config this crate reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MihomoDocument {
    /// Ports, mode, controller, dns ... kept as an ordered map.
    #[serde(flatten)]
    pub general: Mapping,
    #[serde(default)]
    pub proxies: Vec<Mapping>,
    #[serde(default)]
    pub proxy_groups: Vec<MihomoGroup>,
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub rule_providers: Mapping,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MihomoGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_all_proxies: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub lazy: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleProvider {
    #[serde(rename = "type")]
    pub kind: String,
    pub behavior: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

pub struct Mihomo;

impl EngineAdapter for Mihomo {
    const ENGINE: EngineKind = EngineKind::Mihomo;
    type Document = MihomoDocument;

    fn compile(
        t: &Template,
        nodes: &[Node],
        opts: &GenerationOptions,
    ) -> Result<Compiled<MihomoDocument>, GenerationError> {
        to_document(t, nodes, &opts.mihomo)
    }

    fn decompile(doc: &MihomoDocument) -> Result<Template, GenerationError> {
        from_document(doc)
    }

    fn encode(doc: &MihomoDocument) -> Result<String, GenerationError> {
        serde_yaml::to_string(doc).map_err(|e| GenerationError::Serialize(e.to_string()))
    }

    fn decode(text: &str) -> Result<MihomoDocument, GenerationError> {
        serde_yaml::from_str(text).map_err(|e| GenerationError::Parse(e.to_string()))
    }
}

/// Policy model -> mihomo document.
pub fn to_document(
    t: &Template,
    nodes: &[Node],
    opts: &MihomoOptions,
) -> Result<Compiled<MihomoDocument>, GenerationError> {
    check_node_tags(t, nodes)?;
    let mut warnings = Vec::new();

    let mut proxy_groups = Vec::new();
    for (i, g) in t.groups.iter().enumerate().filter(|(_, g)| g.enabled) {
        proxy_groups.push(compile_group(t, i, g, nodes, &mut warnings));
    }

    let mut rules = Vec::with_capacity(t.rules.len());
    for (i, r) in t.rules.iter().enumerate() {
        rules.push(rule_line(r, &format!("/rules/{i}"))?);
    }

    let mut rule_providers = Mapping::new();
    for rs in &t.rule_sets {
        let provider = compile_provider(rs);
        let value =
            serde_yaml::to_value(&provider).map_err(|e| GenerationError::Serialize(e.to_string()))?;
        rule_providers.insert(Value::String(rs.tag.clone()), value);
    }
    warnings.extend(unused_rule_sets(t, &[]));

    let proxies = nodes
        .iter()
        .map(node_proxy)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Compiled {
        document: MihomoDocument {
            general: general_section(opts),
            proxies,
            proxy_groups,
            rule_providers,
            rules,
        },
        warnings,
    })
}

fn general_section(o: &MihomoOptions) -> Mapping {
    let mut m = Mapping::new();
    let mut put = |k: &str, v: Value| {
        m.insert(Value::String(k.to_string()), v);
    };
    put("mixed-port", Value::from(o.mixed_port));
    if let Some(port) = o.tproxy_port {
        put("tproxy-port", Value::from(port));
    }
    put("allow-lan", Value::from(o.allow_lan));
    put("mode", Value::from(o.mode.as_str()));
    put("log-level", Value::from(o.log_level.as_str()));
    put("ipv6", Value::from(o.ipv6));
    put("external-controller", Value::from(o.external_controller.as_str()));
    if !o.secret.is_empty() {
        put("secret", Value::from(o.secret.as_str()));
    }
    put("unified-delay", Value::from(o.unified_delay));
    put("tcp-concurrent", Value::from(o.tcp_concurrent));
    put("find-process-mode", Value::from(o.find_process_mode.as_str()));
    put(
        "global-client-fingerprint",
        Value::from(o.global_client_fingerprint.as_str()),
    );

    let mut dns = Mapping::new();
    dns.insert("enable".into(), Value::from(o.dns.enable));
    dns.insert("listen".into(), Value::from(o.dns.listen.as_str()));
    dns.insert("ipv6".into(), Value::from(o.ipv6));
    dns.insert(
        "enhanced-mode".into(),
        Value::from(o.dns.enhanced_mode.as_str()),
    );
    if o.dns.enhanced_mode == "fake-ip" {
        dns.insert("fake-ip-range".into(), Value::from("198.18.0.1/16"));
    }
    dns.insert(
        "nameserver".into(),
        Value::Sequence(o.dns.nameservers.iter().map(|s| Value::from(s.as_str())).collect()),
    );
    if !o.dns.fallback.is_empty() {
        dns.insert(
            "fallback".into(),
            Value::Sequence(o.dns.fallback.iter().map(|s| Value::from(s.as_str())).collect()),
        );
    }
    put("dns", Value::Mapping(dns));
    m
}

fn node_proxy(n: &Node) -> Result<Mapping, GenerationError> {
    let mut m = Mapping::new();
    m.insert("name".into(), Value::from(n.tag.as_str()));
    for (k, v) in &n.outbound {
        if k == "name" || k == "tag" {
            continue;
        }
        let v = serde_yaml::to_value(v).map_err(|e| GenerationError::Serialize(e.to_string()))?;
        m.insert(Value::String(k.clone()), v);
    }
    Ok(m)
}

fn group_type(kind: GroupKind) -> &'static str {
    match kind {
        GroupKind::Selector => "select",
        GroupKind::Urltest => "url-test",
        GroupKind::Fallback => "fallback",
        GroupKind::LoadBalance => "load-balance",
        GroupKind::Direct => "direct",
        GroupKind::Block => "block",
    }
}

fn compile_group(
    t: &Template,
    idx: usize,
    g: &ProxyGroup,
    nodes: &[Node],
    warnings: &mut Vec<Warning>,
) -> MihomoGroup {
    let mut out = MihomoGroup {
        name: g.tag.clone(),
        kind: group_type(g.kind).to_string(),
        proxies: Vec::new(),
        include_all_proxies: false,
        filter: None,
        url: None,
        interval: None,
        tolerance: None,
        lazy: false,
        hidden: g.hidden,
        icon: (!g.icon.is_empty()).then(|| g.icon.clone()),
    };
    if !g.kind.has_members() {
        return out;
    }

    // explicit list: native include-all-proxies has no fallback for an empty match
    out.proxies = resolve_members(t, idx, g, nodes, warnings)
        .into_iter()
        .map(|m| match Sentinel::parse(&m) {
            Some(Sentinel::Reject) => REJECT.to_string(),
            _ => m,
        })
        .collect();

    if g.kind.is_probing() {
        out.url = g.test_url.clone();
        out.interval = g.test_interval;
        out.lazy = g.lazy;
        if g.kind == GroupKind::Urltest {
            out.tolerance = g.tolerance;
        }
    }
    if g.default_member.is_some() {
        warnings.push(Warning::new(
            WarningKind::DroppedMetadata,
            format!("/groups/{idx}/defaultMember"),
            "mihomo selects the first member; defaultMember is ignored",
        ));
    }
    out
}

fn rule_keyword(kind: ConditionKind, payload: &str) -> Option<&'static str> {
    Some(match kind {
        ConditionKind::DomainExact => "DOMAIN",
        ConditionKind::DomainSuffix => "DOMAIN-SUFFIX",
        ConditionKind::DomainKeyword => "DOMAIN-KEYWORD",
        ConditionKind::IpCidr if payload.contains(':') => "IP-CIDR6",
        ConditionKind::IpCidr => "IP-CIDR",
        ConditionKind::GeoIp => "GEOIP",
        ConditionKind::RuleSetReference => "RULE-SET",
        ConditionKind::MatchAll => "MATCH",
        ConditionKind::Protocol
        | ConditionKind::Port
        | ConditionKind::LogicalAnd
        | ConditionKind::LogicalOr => return None,
    })
}

/// One rule line. Logical, protocol and port conditions have no mihomo form.
pub fn rule_line(r: &Rule, ptr: &str) -> Result<String, GenerationError> {
    let c = &r.condition;
    let target = match Sentinel::parse(&r.target) {
        Some(Sentinel::Reject) => REJECT,
        Some(Sentinel::HijackDns) => {
            return Err(GenerationError::unsupported(
                format!("{ptr}/target"),
                "HIJACK-DNS has no mihomo equivalent",
            ))
        }
        _ => r.target.as_str(),
    };
    if c.invert {
        return Err(GenerationError::unsupported(ptr, "mihomo rules can not be inverted"));
    }
    let payload = c.payload.trim();
    let Some(keyword) = rule_keyword(c.kind, payload) else {
        return Err(GenerationError::unsupported(
            ptr,
            format!("mihomo has no {:?} condition", c.kind),
        ));
    };
    if c.kind == ConditionKind::MatchAll {
        return Ok(format!("{keyword},{target}"));
    }
    let mut line = format!("{keyword},{payload},{target}");
    if r.no_resolve && c.kind.supports_no_resolve() {
        line.push_str(",no-resolve");
    }
    Ok(line)
}

fn compile_provider(rs: &RuleSet) -> RuleProvider {
    RuleProvider {
        kind: match rs.source_kind {
            SourceKind::Remote => "http",
            SourceKind::Local => "file",
        }
        .to_string(),
        behavior: rs.behavior.as_str().to_string(),
        format: Some(
            match rs.format {
                RuleSetFormat::Binary => "mrs",
                RuleSetFormat::Source => "yaml",
            }
            .to_string(),
        ),
        url: rs.url.clone().filter(|_| rs.is_remote()),
        path: rs.local_path.clone(),
        interval: rs.refresh_interval.filter(|_| rs.is_remote()),
        proxy: rs.download_via.clone(),
    }
}

/// mihomo document -> policy model.
///
/// Presentation metadata (display names, descriptions) and the manual-only
/// restriction have no mihomo form and come back empty.
pub fn from_document(doc: &MihomoDocument) -> Result<Template, GenerationError> {
    let node_names: HashSet<&str> = doc
        .proxies
        .iter()
        .filter_map(|p| p.get("name").and_then(Value::as_str))
        .collect();

    let mut groups = Vec::with_capacity(doc.proxy_groups.len());
    for mg in &doc.proxy_groups {
        groups.push(decompile_group(mg, &node_names)?);
    }

    let mut rules = Vec::with_capacity(doc.rules.len());
    for line in &doc.rules {
        rules.push(parse_rule_line(line)?);
    }

    let mut rule_sets = Vec::with_capacity(doc.rule_providers.len());
    for (k, v) in &doc.rule_providers {
        let tag = k
            .as_str()
            .ok_or_else(|| GenerationError::Parse("rule-provider key is not a string".into()))?;
        let p: RuleProvider = serde_yaml::from_value(v.clone())
            .map_err(|e| GenerationError::Parse(format!("rule-provider `{tag}`: {e}")))?;
        rule_sets.push(decompile_provider(tag, &p)?);
    }

    Ok(Template {
        groups,
        rules,
        rule_sets,
    })
}

fn decompile_group(
    mg: &MihomoGroup,
    node_names: &HashSet<&str>,
) -> Result<ProxyGroup, GenerationError> {
    let kind = match mg.kind.as_str() {
        "select" => GroupKind::Selector,
        "url-test" => GroupKind::Urltest,
        "fallback" => GroupKind::Fallback,
        "load-balance" => GroupKind::LoadBalance,
        "direct" => GroupKind::Direct,
        "block" => GroupKind::Block,
        other => {
            return Err(GenerationError::Parse(format!(
                "group `{}` has unsupported type `{other}`",
                mg.name
            )))
        }
    };
    let mut g = ProxyGroup::new(mg.name.clone(), kind);
    g.icon = mg.icon.clone().unwrap_or_default();
    g.hidden = mg.hidden;
    g.lazy = mg.lazy;
    g.test_url = mg.url.clone();
    g.test_interval = mg.interval;
    g.tolerance = mg.tolerance;

    if mg.include_all_proxies {
        g.use_all_available_outbounds = true;
        g.member_filter = mg.filter.clone();
    } else {
        let (nodes, refs): (Vec<&String>, Vec<&String>) = mg
            .proxies
            .iter()
            .partition(|p| node_names.contains(p.as_str()));
        g.members = refs.into_iter().cloned().collect();
        // an explicitly resolved node list reads back as "all nodes"
        if g.members.is_empty() && !nodes.is_empty() {
            g.use_all_available_outbounds = true;
        }
    }
    Ok(g)
}

/// Parse one `KIND,payload,target[,no-resolve]` line.
pub fn parse_rule_line(line: &str) -> Result<Rule, GenerationError> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let bad = || GenerationError::Parse(format!("malformed rule `{line}`"));
    let keyword = parts.first().map(|s| s.to_ascii_uppercase()).ok_or_else(bad)?;
    if keyword == "MATCH" {
        let target = parts.get(1).filter(|s| !s.is_empty()).ok_or_else(bad)?;
        return Ok(Rule::match_all(*target));
    }
    if parts.len() < 3 {
        return Err(bad());
    }
    let kind = match keyword.as_str() {
        "DOMAIN" => ConditionKind::DomainExact,
        "DOMAIN-SUFFIX" => ConditionKind::DomainSuffix,
        "DOMAIN-KEYWORD" => ConditionKind::DomainKeyword,
        "IP-CIDR" | "IP-CIDR6" => ConditionKind::IpCidr,
        "GEOIP" => ConditionKind::GeoIp,
        "RULE-SET" => ConditionKind::RuleSetReference,
        _ => {
            return Err(GenerationError::Parse(format!(
                "unsupported rule type `{keyword}` in `{line}`"
            )))
        }
    };
    let mut rule = Rule::new(kind, parts[1], parts[2]);
    rule.no_resolve = parts[3..].iter().any(|p| p.eq_ignore_ascii_case("no-resolve"));
    Ok(rule)
}

fn decompile_provider(tag: &str, p: &RuleProvider) -> Result<RuleSet, GenerationError> {
    let source_kind = match p.kind.as_str() {
        "http" => SourceKind::Remote,
        "file" => SourceKind::Local,
        other => {
            return Err(GenerationError::Parse(format!(
                "rule-provider `{tag}` has unsupported type `{other}`"
            )))
        }
    };
    let behavior = match p.behavior.as_str() {
        "domain" => Behavior::Domain,
        "ipcidr" => Behavior::Ipcidr,
        "classical" => Behavior::Classical,
        other => {
            return Err(GenerationError::Parse(format!(
                "rule-provider `{tag}` has unsupported behavior `{other}`"
            )))
        }
    };
    let format = match p.format.as_deref() {
        Some("mrs") => RuleSetFormat::Binary,
        _ => RuleSetFormat::Source,
    };
    Ok(RuleSet {
        tag: tag.to_string(),
        source_kind,
        format,
        behavior,
        url: p.url.clone(),
        local_path: p.path.clone(),
        download_via: p.proxy.clone(),
        refresh_interval: p.interval,
        description: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Condition;

    #[test]
    fn rule_lines() {
        let r = Rule::new(ConditionKind::IpCidr, "10.0.0.0/8", "DIRECT").no_resolve();
        assert_eq!(rule_line(&r, "/rules/0").unwrap(), "IP-CIDR,10.0.0.0/8,DIRECT,no-resolve");
        let r = Rule::new(ConditionKind::IpCidr, "fc00::/7", "block");
        assert_eq!(rule_line(&r, "/rules/0").unwrap(), "IP-CIDR6,fc00::/7,REJECT");
        let r = Rule::new(ConditionKind::DomainSuffix, "example.com", "proxy").no_resolve();
        assert_eq!(rule_line(&r, "/rules/0").unwrap(), "DOMAIN-SUFFIX,example.com,proxy");
        assert_eq!(rule_line(&Rule::match_all("proxy"), "/rules/1").unwrap(), "MATCH,proxy");
    }

    #[test]
    fn logical_rule_is_unsupported() {
        let r = Rule::when(
            Condition::any(vec![Condition::leaf(ConditionKind::Port, "53")]),
            "DIRECT",
        );
        let err = rule_line(&r, "/rules/4").unwrap_err();
        assert!(matches!(err, GenerationError::Unsupported { ref ptr, .. } if ptr == "/rules/4"));
    }

    #[test]
    fn parse_lines() {
        let r = parse_rule_line("GEOIP,CN,DIRECT,no-resolve").unwrap();
        assert_eq!(r.condition.kind, ConditionKind::GeoIp);
        assert_eq!(r.condition.payload, "CN");
        assert!(r.no_resolve);
        let r = parse_rule_line("MATCH,final").unwrap();
        assert!(r.is_match_all());
        assert_eq!(r.target, "final");
        assert!(parse_rule_line("PROCESS-NAME,curl,DIRECT").is_err());
        assert!(parse_rule_line("DOMAIN,a.com").is_err());
    }

    #[test]
    fn general_section_is_ordered() {
        let m = general_section(&MihomoOptions::default());
        let keys: Vec<&str> = m.iter().filter_map(|(k, _)| k.as_str()).take(3).collect();
        assert_eq!(keys, vec!["mixed-port", "allow-lan", "mode"]);
    }

    #[test]
    fn provider_mapping() {
        let mut rs = RuleSet::remote("ads", "https://x/ads.mrs", RuleSetFormat::Binary);
        rs.refresh_interval = Some(86400);
        rs.download_via = Some("proxy".into());
        let p = compile_provider(&rs);
        assert_eq!(p.kind, "http");
        assert_eq!(p.format.as_deref(), Some("mrs"));
        assert_eq!(p.proxy.as_deref(), Some("proxy"));
        let back = decompile_provider("ads", &p).unwrap();
        assert_eq!(back, rs);
    }
}
