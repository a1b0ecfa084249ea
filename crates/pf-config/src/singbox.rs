//! Engine B: sing-box JSON.
//!
//! - urltest / fallback (and load-balance, with a warning) share the `urltest` outbound.
//! - use-all groups are resolved to concrete node tags here.
//! - the match-all rule becomes `route.final`, never a rule entry.
//! - rule-sets are declared in `route.rule_set`, apart from the rules.
//!
//! 逻辑规则（and/or）编译为 `{type: logical, mode, rules}` 规则树。

use crate::adapter::{unused_rule_sets, Compiled, EngineAdapter};
use crate::model::{
    Behavior, Condition, ConditionKind, GroupKind, ProxyGroup, Rule, RuleSet, RuleSetFormat,
    Sentinel, SourceKind, Template, DIRECT, REJECT,
};
use crate::options::{GenerationOptions, SingBoxMode, SingBoxOptions};
use crate::resolve::{check_node_tags, resolve_members};
use crate::validator::{parse_port, PortSpec};
use pf_types::ports::Node;
use pf_types::{EngineKind, GenerationError, Warning, WarningKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// Tag of the builtin direct outbound.
pub const OUT_DIRECT: &str = "direct";
/// Tag of the builtin block outbound.
pub const OUT_BLOCK: &str = "block";

const GEOIP_BASE: &str = "https://raw.githubusercontent.com/SagerNet/sing-geoip/rule-set";

fn is_false(b: &bool) -> bool {
    !*b
}

/// A list that sing-box accepts either as one scalar or as an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listable<T>(pub Vec<T>);

impl<T> Default for Listable<T> {
    fn default() -> Self {
        Listable(Vec::new())
    }
}

impl<T> Listable<T> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for Listable<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [one] => one.serialize(s),
            many => many.serialize(s),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Listable<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany<T> {
            Many(Vec<T>),
            One(T),
        }
        Ok(match OneOrMany::<T>::deserialize(d)? {
            OneOrMany::Many(v) => Listable(v),
            OneOrMany::One(x) => Listable(vec![x]),
        })
    }
}

/// Route rule, default or logical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SbRule {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<SbRule>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub inbound: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_suffix: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_keyword: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub ip_cidr: Listable<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ip_is_private: bool,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub port: Listable<u16>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub port_range: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub protocol: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub rule_set: Listable<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbRuleSet {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_detour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SbRoute {
    #[serde(default)]
    pub rules: Vec<SbRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<SbRuleSet>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_outbound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_detect_interface: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_domain_resolver: Option<Value>,
}

/// The subset of a sing-box config this crate reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingBoxDocument {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub log: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub dns: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbounds: Vec<Value>,
    #[serde(default)]
    pub outbounds: Vec<Map<String, Value>>,
    #[serde(default)]
    pub route: SbRoute,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub experimental: Value,
}

pub struct SingBox;

impl EngineAdapter for SingBox {
    const ENGINE: EngineKind = EngineKind::SingBox;
    type Document = SingBoxDocument;

    fn compile(
        t: &Template,
        nodes: &[Node],
        opts: &GenerationOptions,
    ) -> Result<Compiled<SingBoxDocument>, GenerationError> {
        to_document(t, nodes, &opts.singbox)
    }

    fn decompile(doc: &SingBoxDocument) -> Result<Template, GenerationError> {
        from_document(doc)
    }

    fn encode(doc: &SingBoxDocument) -> Result<String, GenerationError> {
        serde_json::to_string_pretty(doc).map_err(|e| GenerationError::Serialize(e.to_string()))
    }

    fn decode(text: &str) -> Result<SingBoxDocument, GenerationError> {
        serde_json::from_str(text).map_err(|e| GenerationError::Parse(e.to_string()))
    }
}

/// Seconds -> sing-box duration string (`300` -> `5m`, `86400` -> `1d`).
pub fn format_interval(secs: u64) -> String {
    if secs == 0 {
        return "0s".into();
    }
    let mut out = String::new();
    let mut rest = secs;
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if rest >= size {
            out.push_str(&format!("{}{unit}", rest / size));
            rest %= size;
        }
    }
    out
}

/// sing-box duration string -> seconds.
pub fn parse_interval(s: &str) -> Option<u64> {
    humantime::parse_duration(s.trim())
        .ok()
        .map(|d: Duration| d.as_secs())
}

fn geoip_tag(code: &str) -> String {
    format!("geoip-{}", code.trim().to_ascii_lowercase())
}

fn geoip_url(tag: &str) -> String {
    format!("{GEOIP_BASE}/{tag}.srs")
}

fn is_private_geoip(code: &str) -> bool {
    code.eq_ignore_ascii_case("lan") || code.eq_ignore_ascii_case("private")
}

/// Member/outbound reference -> sing-box outbound tag.
fn outbound_ref(m: &str) -> String {
    match Sentinel::parse(m) {
        Some(Sentinel::Direct) => OUT_DIRECT.to_string(),
        Some(Sentinel::Reject) => OUT_BLOCK.to_string(),
        _ => m.to_string(),
    }
}

/// sing-box outbound tag -> model reference.
fn model_ref(tag: &str) -> String {
    match tag {
        OUT_DIRECT => DIRECT.to_string(),
        OUT_BLOCK => REJECT.to_string(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Ctx {
    /// geoip-* rule-sets referenced by geo-ip conditions, in first-use order.
    geoip: Vec<String>,
}

/// Which rule field a leaf condition lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Domain,
    DomainSuffix,
    DomainKeyword,
    IpCidr,
    IpIsPrivate,
    Port,
    PortRange,
    Protocol,
    RuleSet,
}

fn field_of(c: &Condition) -> Option<Field> {
    let p = c.payload.trim();
    Some(match c.kind {
        ConditionKind::DomainExact => Field::Domain,
        ConditionKind::DomainSuffix => Field::DomainSuffix,
        ConditionKind::DomainKeyword => Field::DomainKeyword,
        ConditionKind::IpCidr => Field::IpCidr,
        ConditionKind::GeoIp if is_private_geoip(p) => Field::IpIsPrivate,
        ConditionKind::GeoIp | ConditionKind::RuleSetReference => Field::RuleSet,
        ConditionKind::Protocol => Field::Protocol,
        ConditionKind::Port => match parse_port(p)? {
            PortSpec::Single(_) => Field::Port,
            PortSpec::Range(..) => Field::PortRange,
        },
        ConditionKind::LogicalAnd | ConditionKind::LogicalOr | ConditionKind::MatchAll => {
            return None
        }
    })
}

fn set_leaf(r: &mut SbRule, c: &Condition, ptr: &str, ctx: &mut Ctx) -> Result<(), GenerationError> {
    let p = c.payload.trim();
    let field = field_of(c).ok_or_else(|| {
        GenerationError::unsupported(ptr, format!("{:?} `{p}` is not a leaf condition", c.kind))
    })?;
    match field {
        Field::Domain => r.domain.0.push(p.to_string()),
        Field::DomainSuffix => r.domain_suffix.0.push(p.to_string()),
        Field::DomainKeyword => r.domain_keyword.0.push(p.to_string()),
        Field::IpCidr => r.ip_cidr.0.push(p.to_string()),
        Field::IpIsPrivate => r.ip_is_private = true,
        Field::Protocol => r.protocol.0.push(p.to_ascii_lowercase()),
        Field::RuleSet if c.kind == ConditionKind::GeoIp => {
            let tag = geoip_tag(p);
            if !ctx.geoip.contains(&tag) {
                ctx.geoip.push(tag.clone());
            }
            r.rule_set.0.push(tag);
        }
        Field::RuleSet => r.rule_set.0.push(p.to_string()),
        Field::Port | Field::PortRange => match parse_port(p) {
            Some(PortSpec::Single(port)) => r.port.0.push(port),
            Some(PortSpec::Range(a, b)) => r.port_range.0.push(format!("{a}:{b}")),
            None => {
                return Err(GenerationError::unsupported(
                    format!("{ptr}/payload"),
                    format!("`{p}` is not a port"),
                ))
            }
        },
    }
    Ok(())
}

/// An OR over non-inverted leaves of one field collapses into a single flat rule.
fn mergeable_or(c: &Condition) -> bool {
    if c.kind != ConditionKind::LogicalOr || c.rules.is_empty() {
        return false;
    }
    let mut fields = c.rules.iter().map(|ch| {
        if ch.invert || !ch.rules.is_empty() {
            None
        } else {
            field_of(ch)
        }
    });
    let Some(Some(first)) = fields.next() else {
        return false;
    };
    first != Field::IpIsPrivate && fields.all(|f| f == Some(first))
}

fn compile_condition(c: &Condition, ptr: &str, ctx: &mut Ctx) -> Result<SbRule, GenerationError> {
    let mut r = SbRule::default();
    if mergeable_or(c) {
        for (j, ch) in c.rules.iter().enumerate() {
            set_leaf(&mut r, ch, &format!("{ptr}/rules/{j}"), ctx)?;
        }
    } else if c.kind.is_logical() {
        r.kind = Some("logical".into());
        r.mode = Some(if c.kind == ConditionKind::LogicalAnd { "and" } else { "or" }.into());
        for (j, ch) in c.rules.iter().enumerate() {
            r.rules.push(compile_condition(ch, &format!("{ptr}/rules/{j}"), ctx)?);
        }
    } else if c.kind == ConditionKind::MatchAll {
        return Err(GenerationError::unsupported(
            ptr,
            "match-all can only be the terminal rule",
        ));
    } else {
        set_leaf(&mut r, c, ptr, ctx)?;
    }
    r.invert = c.invert;
    Ok(r)
}

fn apply_target(r: &mut SbRule, target: &str) {
    match Sentinel::parse(target) {
        Some(Sentinel::Direct) => r.outbound = Some(OUT_DIRECT.into()),
        Some(Sentinel::Reject) => r.action = Some("reject".into()),
        Some(Sentinel::HijackDns) => r.action = Some("hijack-dns".into()),
        None => r.outbound = Some(target.to_string()),
    }
}

/// Compile one non-terminal rule.
pub fn compile_rule(rule: &Rule, ptr: &str) -> Result<SbRule, GenerationError> {
    let mut ctx = Ctx::default();
    let mut r = compile_condition(&rule.condition, ptr, &mut ctx)?;
    apply_target(&mut r, &rule.target);
    Ok(r)
}

fn compile_group(
    t: &Template,
    idx: usize,
    g: &ProxyGroup,
    nodes: &[Node],
    warnings: &mut Vec<Warning>,
) -> Map<String, Value> {
    let mut m = Map::new();
    let kind = match g.kind {
        GroupKind::Selector => "selector",
        GroupKind::Urltest | GroupKind::Fallback => "urltest",
        GroupKind::LoadBalance => {
            warnings.push(Warning::new(
                WarningKind::DowngradedGroupKind,
                format!("/groups/{idx}/kind"),
                format!("sing-box has no load-balance; `{}` compiles to urltest", g.tag),
            ));
            "urltest"
        }
        GroupKind::Direct => "direct",
        GroupKind::Block => "block",
    };
    m.insert("type".into(), json!(kind));
    m.insert("tag".into(), json!(g.tag));
    if !g.kind.has_members() {
        return m;
    }

    let members: Vec<String> = resolve_members(t, idx, g, nodes, warnings)
        .iter()
        .map(|s| outbound_ref(s))
        .collect();
    m.insert("outbounds".into(), json!(members));

    if g.kind.is_probing() {
        if let Some(url) = &g.test_url {
            m.insert("url".into(), json!(url));
        }
        if let Some(secs) = g.test_interval {
            m.insert("interval".into(), json!(format_interval(secs)));
        }
        if let Some(tol) = g.tolerance {
            m.insert("tolerance".into(), json!(tol));
        }
    } else if let Some(d) = &g.default_member {
        let d = outbound_ref(d);
        if members.contains(&d) {
            m.insert("default".into(), json!(d));
        } else {
            warnings.push(Warning::new(
                WarningKind::DroppedMetadata,
                format!("/groups/{idx}/defaultMember"),
                format!("`{d}` is not among the resolved members of `{}`", g.tag),
            ));
        }
    }
    m
}

fn node_outbound(n: &Node) -> Map<String, Value> {
    let mut m = Map::new();
    if let Some(kind) = n.outbound.get("type") {
        m.insert("type".into(), kind.clone());
    }
    m.insert("tag".into(), json!(n.tag));
    for (k, v) in &n.outbound {
        if matches!(k.as_str(), "type" | "tag" | "name") {
            continue;
        }
        m.insert(k.clone(), v.clone());
    }
    m
}

fn compile_rule_set(rs: &RuleSet) -> SbRuleSet {
    let remote = rs.is_remote();
    SbRuleSet {
        tag: rs.tag.clone(),
        kind: if remote { "remote" } else { "local" }.into(),
        format: match rs.format {
            RuleSetFormat::Binary => "binary",
            RuleSetFormat::Source => "source",
        }
        .into(),
        url: rs.url.clone().filter(|_| remote),
        path: rs.local_path.clone().filter(|_| !remote),
        download_detour: rs.download_via.as_deref().filter(|_| remote).map(outbound_ref),
        update_interval: rs.refresh_interval.filter(|_| remote).map(format_interval),
    }
}

fn synthesized_geoip(tag: &str) -> SbRuleSet {
    SbRuleSet {
        tag: tag.to_string(),
        kind: "remote".into(),
        format: "binary".into(),
        url: Some(geoip_url(tag)),
        path: None,
        download_detour: None,
        update_interval: Some("1d".into()),
    }
}

/// Policy model -> sing-box document.
pub fn to_document(
    t: &Template,
    nodes: &[Node],
    opts: &SingBoxOptions,
) -> Result<Compiled<SingBoxDocument>, GenerationError> {
    check_node_tags(t, nodes)?;
    let mut warnings = Vec::new();
    let mut ctx = Ctx::default();

    let mut outbounds: Vec<Map<String, Value>> = t
        .groups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.enabled)
        .map(|(i, g)| compile_group(t, i, g, nodes, &mut warnings))
        .collect();
    outbounds.extend(nodes.iter().map(node_outbound));
    outbounds.push(builtin(OUT_DIRECT, "direct"));
    outbounds.push(builtin(OUT_BLOCK, "block"));

    let mut rules = Vec::with_capacity(t.rules.len() + 1);
    if opts.sniff {
        rules.push(SbRule {
            inbound: Listable(inbound_tags(opts)),
            action: Some("sniff".into()),
            ..Default::default()
        });
    }
    let mut final_outbound = None;
    for (i, rule) in t.rules.iter().enumerate() {
        let ptr = format!("/rules/{i}");
        if rule.is_match_all() {
            if Sentinel::parse(&rule.target) == Some(Sentinel::HijackDns) {
                return Err(GenerationError::unsupported(
                    format!("{ptr}/target"),
                    "the final outbound can not be an action",
                ));
            }
            final_outbound = Some(outbound_ref(&rule.target));
            continue;
        }
        let mut r = compile_condition(&rule.condition, &ptr, &mut ctx)?;
        apply_target(&mut r, &rule.target);
        rules.push(r);
    }

    let mut rule_set: Vec<SbRuleSet> = t.rule_sets.iter().map(compile_rule_set).collect();
    for tag in &ctx.geoip {
        if t.rule_set(tag).is_none() {
            rule_set.push(synthesized_geoip(tag));
        }
    }
    warnings.extend(unused_rule_sets(t, &ctx.geoip));

    let tun = opts.mode == SingBoxMode::Tun;
    let route = SbRoute {
        rules,
        rule_set,
        final_outbound,
        auto_detect_interface: Some(true).filter(|_| tun),
        default_domain_resolver: Some(json!({ "server": "local" })),
    };

    Ok(Compiled {
        document: SingBoxDocument {
            log: json!({ "level": opts.log_level, "timestamp": true }),
            dns: dns_section(opts),
            inbounds: inbounds(opts),
            outbounds,
            route,
            experimental: json!({
                "clash_api": {
                    "external_controller": opts.clash_api_addr,
                    "secret": opts.clash_api_secret,
                    "default_mode": "rule"
                },
                "cache_file": { "enabled": true, "store_fakeip": opts.fake_ip }
            }),
        },
        warnings,
    })
}

fn builtin(tag: &str, kind: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("type".into(), json!(kind));
    m.insert("tag".into(), json!(tag));
    m
}

fn inbound_tags(opts: &SingBoxOptions) -> Vec<String> {
    match opts.mode {
        SingBoxMode::Tun => vec!["tun-in".into(), "mixed-in".into()],
        SingBoxMode::System => vec!["mixed-in".into()],
    }
}

fn inbounds(opts: &SingBoxOptions) -> Vec<Value> {
    let mixed = json!({
        "type": "mixed",
        "tag": "mixed-in",
        "listen": "127.0.0.1",
        "listen_port": opts.mixed_port,
        "set_system_proxy": opts.mode == SingBoxMode::System
    });
    match opts.mode {
        SingBoxMode::Tun => vec![
            json!({
                "type": "tun",
                "tag": "tun-in",
                "address": ["172.19.0.1/30", "fdfe:dcba:9876::1/126"],
                "mtu": opts.tun_mtu,
                "auto_route": true,
                "strict_route": true,
                "stack": opts.tun_stack
            }),
            mixed,
        ],
        SingBoxMode::System => vec![mixed],
    }
}

fn dns_section(opts: &SingBoxOptions) -> Value {
    let mut servers = vec![
        json!({ "type": "https", "tag": "proxy-dns", "server": "8.8.8.8" }),
        json!({ "type": "udp", "tag": "local", "server": "223.5.5.5" }),
    ];
    let mut rules = Vec::new();
    if opts.fake_ip {
        servers.push(json!({
            "type": "fakeip",
            "tag": "fakeip",
            "inet4_range": "198.18.0.0/15",
            "inet6_range": "fc00::/18"
        }));
        rules.push(json!({ "query_type": ["A", "AAAA"], "server": "fakeip" }));
    }
    json!({
        "servers": servers,
        "rules": rules,
        "final": "proxy-dns",
        "strategy": opts.dns_strategy
    })
}

/// sing-box document -> policy model.
///
/// Node outbounds are not part of the model: groups made only of nodes read back as
/// use-all groups, and `fallback` reads back as `urltest`.
pub fn from_document(doc: &SingBoxDocument) -> Result<Template, GenerationError> {
    let node_tags: HashSet<&str> = doc
        .outbounds
        .iter()
        .filter(|o| {
            let kind = o.get("type").and_then(Value::as_str).unwrap_or_default();
            !matches!(kind, "selector" | "urltest" | "direct" | "block" | "dns")
        })
        .filter_map(|o| o.get("tag").and_then(Value::as_str))
        .collect();

    let mut groups = Vec::new();
    for o in &doc.outbounds {
        if let Some(g) = decompile_group(o, &node_tags)? {
            groups.push(g);
        }
    }

    // geoip-* declarations identical to the ones compile synthesizes came from geo-ip rules
    let synthesized: HashSet<&str> = doc
        .route
        .rule_set
        .iter()
        .filter(|rs| {
            rs.tag.starts_with("geoip-") && rs.url.as_deref() == Some(geoip_url(&rs.tag).as_str())
        })
        .map(|rs| rs.tag.as_str())
        .collect();

    let mut rules = Vec::new();
    for (i, r) in doc.route.rules.iter().enumerate() {
        if r.action.as_deref() == Some("sniff") {
            continue;
        }
        let ptr = format!("/route/rules/{i}");
        let condition = decompile_condition(r, &synthesized, &ptr)?;
        let target = match (r.action.as_deref(), r.outbound.as_deref()) {
            (Some("reject"), _) => REJECT.to_string(),
            (Some("hijack-dns"), _) => crate::model::HIJACK_DNS.to_string(),
            (None | Some("route"), Some(out)) => model_ref(out),
            (action, _) => {
                return Err(GenerationError::Parse(format!(
                    "{ptr}: unsupported action {action:?}"
                )))
            }
        };
        rules.push(Rule::when(condition, target));
    }
    if let Some(f) = &doc.route.final_outbound {
        rules.push(Rule::match_all(model_ref(f)));
    }

    let mut rule_sets = Vec::new();
    for rs in &doc.route.rule_set {
        if synthesized.contains(rs.tag.as_str()) {
            continue;
        }
        rule_sets.push(decompile_rule_set(rs)?);
    }

    Ok(Template {
        groups,
        rules,
        rule_sets,
    })
}

fn decompile_group(
    o: &Map<String, Value>,
    node_tags: &HashSet<&str>,
) -> Result<Option<ProxyGroup>, GenerationError> {
    let kind = o.get("type").and_then(Value::as_str).unwrap_or_default();
    let tag = o.get("tag").and_then(Value::as_str).unwrap_or_default();
    let kind = match (kind, tag) {
        ("direct", OUT_DIRECT) | ("block", OUT_BLOCK) => return Ok(None),
        ("selector", _) => GroupKind::Selector,
        ("urltest", _) => GroupKind::Urltest,
        ("direct", _) => GroupKind::Direct,
        ("block", _) => GroupKind::Block,
        _ => return Ok(None),
    };
    if tag.is_empty() {
        return Err(GenerationError::Parse("outbound without tag".into()));
    }
    let mut g = ProxyGroup::new(tag, kind);
    if !kind.has_members() {
        return Ok(Some(g));
    }

    let outs: Vec<&str> = o
        .get("outbounds")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let (nodes, refs): (Vec<&str>, Vec<&str>) =
        outs.into_iter().partition(|m| node_tags.contains(m));
    g.members = refs.into_iter().map(model_ref).collect();
    if g.members.is_empty() && !nodes.is_empty() {
        g.use_all_available_outbounds = true;
    }

    g.test_url = o.get("url").and_then(Value::as_str).map(str::to_string);
    g.test_interval = o.get("interval").and_then(Value::as_str).and_then(parse_interval);
    g.tolerance = o
        .get("tolerance")
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok());
    g.default_member = o
        .get("default")
        .and_then(Value::as_str)
        .filter(|d| !node_tags.contains(d))
        .map(model_ref);
    Ok(Some(g))
}

fn decompile_condition(
    r: &SbRule,
    synthesized: &HashSet<&str>,
    ptr: &str,
) -> Result<Condition, GenerationError> {
    let mut cond = if r.kind.as_deref() == Some("logical") {
        let children = r
            .rules
            .iter()
            .enumerate()
            .map(|(j, ch)| decompile_condition(ch, synthesized, &format!("{ptr}/rules/{j}")))
            .collect::<Result<Vec<_>, _>>()?;
        match r.mode.as_deref() {
            Some("and") => Condition::all(children),
            Some("or") | None => Condition::any(children),
            Some(other) => {
                return Err(GenerationError::Parse(format!("{ptr}: unknown mode `{other}`")))
            }
        }
    } else {
        // sing-box ORs within a group and ANDs the groups: destination, port, protocol
        let leaves = |kind: ConditionKind, values: &[String]| {
            values
                .iter()
                .map(|v| Condition::leaf(kind, v.clone()))
                .collect::<Vec<_>>()
        };
        let mut destination = leaves(ConditionKind::DomainExact, &r.domain.0);
        destination.extend(leaves(ConditionKind::DomainSuffix, &r.domain_suffix.0));
        destination.extend(leaves(ConditionKind::DomainKeyword, &r.domain_keyword.0));
        destination.extend(leaves(ConditionKind::IpCidr, &r.ip_cidr.0));
        if r.ip_is_private {
            destination.push(Condition::leaf(ConditionKind::GeoIp, "LAN"));
        }
        destination.extend(r.rule_set.0.iter().map(|tag| match tag.strip_prefix("geoip-") {
            Some(code) if synthesized.contains(tag.as_str()) => {
                Condition::leaf(ConditionKind::GeoIp, code.to_ascii_uppercase())
            }
            _ => Condition::leaf(ConditionKind::RuleSetReference, tag.clone()),
        }));
        let ports: Vec<String> = r.port.0.iter().map(u16::to_string).collect();
        let mut port = leaves(ConditionKind::Port, &ports);
        port.extend(leaves(ConditionKind::Port, &r.port_range.0));
        let protocol = leaves(ConditionKind::Protocol, &r.protocol.0);

        let mut groups: Vec<Condition> = [destination, port, protocol]
            .into_iter()
            .filter(|g| !g.is_empty())
            .map(|mut g| {
                if g.len() == 1 {
                    g.remove(0)
                } else {
                    Condition::any(g)
                }
            })
            .collect();
        match groups.len() {
            0 => {
                return Err(GenerationError::Parse(format!(
                    "{ptr}: rule has no supported condition"
                )))
            }
            1 => groups.remove(0),
            _ => Condition::all(groups),
        }
    };
    cond.invert = r.invert;
    Ok(cond)
}

fn decompile_rule_set(rs: &SbRuleSet) -> Result<RuleSet, GenerationError> {
    let source_kind = match rs.kind.as_str() {
        "remote" => SourceKind::Remote,
        "local" => SourceKind::Local,
        other => {
            return Err(GenerationError::Parse(format!(
                "rule-set `{}` has unsupported type `{other}`",
                rs.tag
            )))
        }
    };
    let format = match rs.format.as_str() {
        "binary" => RuleSetFormat::Binary,
        _ => RuleSetFormat::Source,
    };
    Ok(RuleSet {
        tag: rs.tag.clone(),
        source_kind,
        format,
        behavior: if rs.tag.starts_with("geoip-") {
            Behavior::Ipcidr
        } else {
            Behavior::Domain
        },
        url: rs.url.clone(),
        local_path: rs.path.clone(),
        download_via: rs.download_detour.as_deref().map(model_ref),
        refresh_interval: rs.update_interval.as_deref().and_then(parse_interval),
        description: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(kind: ConditionKind, p: &str) -> Condition {
        Condition::leaf(kind, p)
    }

    #[test]
    fn dns_hijack_compiles_to_logical_or() {
        let rule = Rule::when(
            Condition::any(vec![
                leaf(ConditionKind::Port, "53"),
                leaf(ConditionKind::Protocol, "dns"),
            ]),
            "HIJACK-DNS",
        );
        let r = compile_rule(&rule, "/rules/0").unwrap();
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({
                "type": "logical",
                "mode": "or",
                "rules": [{"port": 53}, {"protocol": "dns"}],
                "action": "hijack-dns"
            })
        );
    }

    #[test]
    fn same_field_or_collapses() {
        let rule = Rule::when(
            Condition::any(vec![
                leaf(ConditionKind::RuleSetReference, "geosite-openai"),
                leaf(ConditionKind::RuleSetReference, "geosite-anthropic"),
            ]),
            "ai",
        );
        let r = compile_rule(&rule, "/rules/0").unwrap();
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"rule_set": ["geosite-openai", "geosite-anthropic"], "outbound": "ai"})
        );
    }

    #[test]
    fn and_with_invert() {
        let mut inner = leaf(ConditionKind::DomainSuffix, "cn");
        inner.invert = true;
        let rule = Rule::when(
            Condition::all(vec![inner, leaf(ConditionKind::Port, "443")]),
            "REJECT",
        );
        let r = compile_rule(&rule, "/rules/0").unwrap();
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({
                "type": "logical",
                "mode": "and",
                "rules": [{"domain_suffix": "cn", "invert": true}, {"port": 443}],
                "action": "reject"
            })
        );
    }

    #[test]
    fn geoip_targets() {
        let r = compile_rule(&Rule::new(ConditionKind::GeoIp, "LAN", "DIRECT"), "/r").unwrap();
        assert!(r.ip_is_private);
        assert_eq!(r.outbound.as_deref(), Some("direct"));
        let r = compile_rule(&Rule::new(ConditionKind::GeoIp, "CN", "DIRECT"), "/r").unwrap();
        assert_eq!(r.rule_set.0, vec!["geoip-cn"]);
    }

    #[test]
    fn port_range() {
        let r = compile_rule(&Rule::new(ConditionKind::Port, "1000-2000", "DIRECT"), "/r").unwrap();
        assert_eq!(r.port_range.0, vec!["1000:2000"]);
    }

    #[test]
    fn intervals() {
        assert_eq!(format_interval(300), "5m");
        assert_eq!(format_interval(86_400), "1d");
        assert_eq!(format_interval(5_400), "1h30m");
        assert_eq!(parse_interval("5m"), Some(300));
        assert_eq!(parse_interval("1d"), Some(86_400));
        assert_eq!(parse_interval("1h30m"), Some(5_400));
    }

    #[test]
    fn listable_accepts_scalar_and_array() {
        let r: SbRule =
            serde_json::from_value(json!({"domain": "a.com", "port": [80, 443]})).unwrap();
        assert_eq!(r.domain.0, vec!["a.com"]);
        assert_eq!(r.port.0, vec![80, 443]);
    }

    #[test]
    fn default_outside_resolved_members_is_dropped() {
        let mut off = ProxyGroup::selector("off", ["DIRECT"]);
        off.enabled = false;
        let mut sel = ProxyGroup::selector("sel", ["off", "DIRECT"]);
        sel.default_member = Some("off".into());
        let t = Template {
            groups: vec![sel.clone(), off],
            ..Default::default()
        };
        let mut w = Vec::new();
        let m = compile_group(&t, 0, &sel, &[], &mut w);
        assert_eq!(m["outbounds"], json!(["direct"]));
        assert!(m.get("default").is_none());
        assert!(w.iter().any(|w| w.kind == WarningKind::DroppedMetadata
            && w.ptr == "/groups/0/defaultMember"));

        sel.default_member = Some("DIRECT".into());
        let m = compile_group(&t, 0, &sel, &[], &mut Vec::new());
        assert_eq!(m["default"], json!("direct"));
    }

    #[test]
    fn decompile_flat_rule_groups_fields() {
        let r: SbRule = serde_json::from_value(
            json!({"domain_suffix": ["a.com", "b.com"], "port": 443, "outbound": "proxy"}),
        )
        .unwrap();
        let c = decompile_condition(&r, &HashSet::new(), "/r").unwrap();
        assert_eq!(c.kind, ConditionKind::LogicalAnd);
        assert_eq!(c.rules[0].kind, ConditionKind::LogicalOr);
        assert_eq!(c.rules[1], leaf(ConditionKind::Port, "443"));
    }

    #[test]
    fn decompile_destination_fields_are_ored() {
        let r: SbRule = serde_json::from_value(
            json!({"domain_suffix": "example.com", "ip_cidr": "10.0.0.0/8", "outbound": "direct"}),
        )
        .unwrap();
        let c = decompile_condition(&r, &HashSet::new(), "/r").unwrap();
        assert_eq!(c.kind, ConditionKind::LogicalOr);
        assert_eq!(
            c.rules,
            vec![
                leaf(ConditionKind::DomainSuffix, "example.com"),
                leaf(ConditionKind::IpCidr, "10.0.0.0/8"),
            ]
        );

        let r: SbRule = serde_json::from_value(json!({
            "domain": "a.com",
            "rule_set": "ads",
            "port_range": "1000:2000",
            "port": 53,
            "protocol": "dns",
            "outbound": "proxy"
        }))
        .unwrap();
        let c = decompile_condition(&r, &HashSet::new(), "/r").unwrap();
        assert_eq!(c.kind, ConditionKind::LogicalAnd);
        assert_eq!(c.rules.len(), 3);
        assert_eq!(
            c.rules[0].rules,
            vec![
                leaf(ConditionKind::DomainExact, "a.com"),
                leaf(ConditionKind::RuleSetReference, "ads"),
            ]
        );
        assert_eq!(
            c.rules[1].rules,
            vec![
                leaf(ConditionKind::Port, "53"),
                leaf(ConditionKind::Port, "1000:2000"),
            ]
        );
        assert_eq!(c.rules[2], leaf(ConditionKind::Protocol, "dns"));
    }
}
