//! Built-in templates. `*-default` doubles as the engine's factory default.
//!
//! 默认模板：地区测速组 + 手动节点组 + 服务分流组 + 规则集 + 兜底规则。

use crate::model::{
    Behavior, Condition, ConditionKind, GroupKind, ProxyGroup, Rule, RuleSet, RuleSetFormat,
    Template, DIRECT, HIJACK_DNS, REJECT,
};
use once_cell::sync::Lazy;
use pf_types::EngineKind;

const PROBE_URL: &str = "https://www.gstatic.com/generate_204";
const PROBE_INTERVAL: u64 = 300;
const DAY: u64 = 86_400;

const META_GEO: &str = "https://testingcf.jsdelivr.net/gh/MetaCubeX/meta-rules-dat@meta/geo";
const META_AI: &str =
    "https://testingcf.jsdelivr.net/gh/QuixoticHeart/rule-set@ruleset/meta/domain/ai.mrs";
const SAGER_GEOSITE: &str = "https://raw.githubusercontent.com/SagerNet/sing-geosite/rule-set";

// group tags shared by both default presets
const AUTO: &str = "自动选择";
const FALLBACK: &str = "故障转移";
const PROXY: &str = "节点选择";
const DOMESTIC: &str = "全球直连";
const ADS: &str = "广告拦截";
const AI: &str = "AI服务";
const GAMING: &str = "游戏平台";
const MEDIA: &str = "国外媒体";
const SOCIAL: &str = "社交媒体";
const GOOGLE: &str = "谷歌服务";
const GITHUB: &str = "GitHub";
const MICROSOFT: &str = "微软服务";
const APPLE: &str = "苹果服务";
const BILIBILI: &str = "哔哩哔哩";
const FINAL: &str = "漏网之鱼";
const HK: &str = "香港节点";
const TW: &str = "台湾节点";
const JP: &str = "日本节点";
const SG: &str = "新加坡节点";
const US: &str = "美国节点";
const MANUAL: &str = "手动节点";
const OTHERS: &str = "其他节点";

/// (tag, icon, node-name filter)
const REGIONS: [(&str, &str, &str); 5] = [
    (HK, "🇭🇰", "(?i)香港|沪港|呼港|中港|HKT|HKBN|HGC|WTT|CMI|穗港|广港|京港|🇭🇰|HK|Hongkong|Hong Kong|HongKong|HONG KONG"),
    (TW, "🇹🇼", "(?i)台湾|台灣|臺灣|台北|台中|新北|彰化|CHT|HINET|🇹🇼|TW|Taiwan|TAIWAN"),
    (JP, "🇯🇵", "(?i)日本|东京|東京|大阪|埼玉|京日|苏日|沪日|广日|上日|穗日|川日|中日|泉日|杭日|深日|🇯🇵|JP|Japan|JAPAN"),
    (SG, "🇸🇬", "(?i)新加坡|狮城|獅城|沪新|京新|泉新|穗新|深新|杭新|广新|廣新|滬新|🇸🇬|SG|Singapore|SINGAPORE"),
    (US, "🇺🇸", "(?i)美国|美國|京美|硅谷|凤凰城|洛杉矶|西雅图|圣何塞|芝加哥|哥伦布|纽约|广美|🇺🇸|US|USA|America|United States"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetInfo {
    pub id: &'static str,
    pub engine: EngineKind,
    pub description: &'static str,
}

pub const PRESETS: [PresetInfo; 4] = [
    PresetInfo {
        id: "mihomo-default",
        engine: EngineKind::Mihomo,
        description: "region url-test groups, service selectors, MetaCubeX rule providers",
    },
    PresetInfo {
        id: "mihomo-minimal",
        engine: EngineKind::Mihomo,
        description: "one selector over one url-test group, LAN/CN direct",
    },
    PresetInfo {
        id: "singbox-default",
        engine: EngineKind::SingBox,
        description: "region groups, service selectors, SagerNet rule-sets, DNS hijack",
    },
    PresetInfo {
        id: "singbox-minimal",
        engine: EngineKind::SingBox,
        description: "DNS hijack, LAN/CN direct, everything else proxied",
    },
];

static MIHOMO_DEFAULT: Lazy<Template> = Lazy::new(mihomo_default);
static SINGBOX_DEFAULT: Lazy<Template> = Lazy::new(singbox_default);

pub fn presets() -> &'static [PresetInfo] {
    &PRESETS
}

/// Look up a preset by id.
pub fn preset(id: &str) -> Option<(EngineKind, Template)> {
    let info = PRESETS.iter().find(|p| p.id == id)?;
    let t = match info.id {
        "mihomo-default" => MIHOMO_DEFAULT.clone(),
        "mihomo-minimal" => mihomo_minimal(),
        "singbox-default" => SINGBOX_DEFAULT.clone(),
        _ => singbox_minimal(),
    };
    Some((info.engine, t))
}

/// Factory template for `engine`.
pub fn default_template(engine: EngineKind) -> Template {
    match engine {
        EngineKind::Mihomo => MIHOMO_DEFAULT.clone(),
        EngineKind::SingBox => SINGBOX_DEFAULT.clone(),
    }
}

fn select(tag: &str, icon: &str, desc: &str, members: &[&str]) -> ProxyGroup {
    ProxyGroup::selector(tag, members.iter().copied()).named(tag, icon, desc)
}

fn region_groups() -> Vec<ProxyGroup> {
    REGIONS
        .iter()
        .map(|(tag, icon, filter)| {
            let mut g = ProxyGroup::new(*tag, GroupKind::Urltest)
                .named(tag, icon, &format!("{tag}自动选择"))
                .probe(PROBE_URL, PROBE_INTERVAL, Some(50))
                .use_all(Some(filter));
            g.lazy = true;
            g
        })
        .collect()
}

fn manual_and_others() -> [ProxyGroup; 2] {
    let mut manual = ProxyGroup::new(MANUAL, GroupKind::Selector)
        .named(MANUAL, "✋", "手动添加的节点")
        .use_all(None);
    manual.manual_only = true;
    let others = ProxyGroup::new(OTHERS, GroupKind::Selector)
        .named(OTHERS, "🌍", "其他地区节点")
        .use_all(None);
    [manual, others]
}

fn auto_group() -> ProxyGroup {
    let mut g = ProxyGroup::new(AUTO, GroupKind::Urltest)
        .named(AUTO, "⚡", "自动测速选择延迟最低的节点")
        .probe(PROBE_URL, PROBE_INTERVAL, Some(50))
        .use_all(None);
    g.lazy = true;
    g
}

fn fallback_group(kind: GroupKind) -> ProxyGroup {
    let mut g = ProxyGroup::new(FALLBACK, kind)
        .named(FALLBACK, "🛡️", "按顺序检测节点可用性")
        .with_members([HK, TW, JP, SG, US])
        .probe(PROBE_URL, PROBE_INTERVAL, None);
    g.lazy = true;
    g
}

fn service_groups() -> Vec<ProxyGroup> {
    vec![
        select(PROXY, "🚀", "所有分流的默认出口", &[AUTO, FALLBACK, HK, TW, JP, SG, US, MANUAL, OTHERS, DIRECT]),
        select(DOMESTIC, "🎯", "国内网站、私有网络直接连接", &[DIRECT, PROXY]),
        {
            let mut g = select(ADS, "🚫", "拦截广告、隐私追踪", &[REJECT, DIRECT]);
            g.default_member = Some(REJECT.to_string());
            g
        },
        select(AI, "🤖", "ChatGPT、Claude、Gemini 等 AI 服务", &[PROXY, US, JP, SG, TW, MANUAL, AUTO]),
        select(GAMING, "🎮", "Steam、Epic 等游戏平台", &[PROXY, DIRECT, HK, TW, JP, MANUAL]),
        select(MEDIA, "📺", "YouTube、Netflix、Spotify 等", &[PROXY, HK, TW, JP, SG, US, MANUAL, AUTO]),
        select(SOCIAL, "👥", "Telegram、Twitter、Facebook 等", &[PROXY, HK, TW, SG, US, MANUAL, AUTO]),
        select(GOOGLE, "🔍", "Google 搜索、Gmail 等", &[PROXY, HK, TW, JP, US, MANUAL, AUTO]),
        select(GITHUB, "💻", "GitHub 代码托管平台", &[PROXY, DIRECT, MANUAL, AUTO]),
        select(MICROSOFT, "🪟", "Microsoft 365、OneDrive 等", &[DIRECT, PROXY, HK, US, MANUAL]),
        select(APPLE, "🍎", "App Store、iCloud 等", &[DIRECT, PROXY, US, MANUAL]),
        select(BILIBILI, "📺", "港澳台番剧解锁", &[DIRECT, HK, TW, MANUAL]),
        select(FINAL, "🌐", "未匹配到任何规则的流量", &[PROXY, AUTO, MANUAL, DIRECT]),
    ]
}

fn rule_set_ref(tag: &str, target: &str) -> Rule {
    Rule::new(ConditionKind::RuleSetReference, tag, target)
}

fn any_rule_set(tags: &[&str], target: &str) -> Rule {
    Rule::when(
        Condition::any(
            tags.iter()
                .map(|t| Condition::leaf(ConditionKind::RuleSetReference, *t))
                .collect(),
        ),
        target,
    )
}

fn dns_hijack() -> Rule {
    Rule::when(
        Condition::any(vec![
            Condition::leaf(ConditionKind::Port, "53"),
            Condition::leaf(ConditionKind::Protocol, "dns"),
        ]),
        HIJACK_DNS,
    )
    .describe("DNS 劫持")
}

fn lan_and_cn(target: &str) -> [Rule; 2] {
    [
        Rule::new(ConditionKind::GeoIp, "LAN", target)
            .no_resolve()
            .describe("局域网直连"),
        Rule::new(ConditionKind::GeoIp, "CN", target)
            .no_resolve()
            .describe("国内 IP 直连"),
    ]
}

fn meta_provider(name: &str, geo: &str, behavior: Behavior, desc: &str) -> RuleSet {
    let dir = match behavior {
        Behavior::Ipcidr => "geoip",
        _ => "geosite",
    };
    meta_provider_at(name, &format!("{META_GEO}/{dir}/{geo}.mrs"), behavior, desc)
}

fn meta_provider_at(name: &str, url: &str, behavior: Behavior, desc: &str) -> RuleSet {
    let mut rs = RuleSet::remote(name, url, RuleSetFormat::Binary);
    rs.behavior = behavior;
    rs.refresh_interval = Some(DAY);
    rs.description = desc.to_string();
    rs
}

fn mihomo_default() -> Template {
    let mut groups = vec![select(
        "GLOBAL",
        "🌐",
        "全局代理模式默认出口",
        &[PROXY, AUTO, FALLBACK, HK, TW, JP, SG, US, MANUAL, OTHERS, DIRECT],
    )];
    groups.push(auto_group());
    groups.push(fallback_group(GroupKind::Fallback));
    groups.extend(service_groups());
    groups.extend(region_groups());
    groups.extend(manual_and_others());

    use Behavior::{Domain, Ipcidr};
    let rule_sets = vec![
        meta_provider("private-domain", "private", Domain, "私有网络域名"),
        meta_provider("private-ip", "private", Ipcidr, "私有网络 IP"),
        meta_provider("ads-domain", "category-ads-all", Domain, "广告域名"),
        meta_provider_at("ai-domain", META_AI, Domain, "AI 平台域名"),
        meta_provider("telegram-domain", "telegram", Domain, "Telegram 域名"),
        meta_provider("telegram-ip", "telegram", Ipcidr, "Telegram IP"),
        meta_provider("twitter-domain", "twitter", Domain, "Twitter/X 域名"),
        meta_provider("youtube-domain", "youtube", Domain, "YouTube 域名"),
        meta_provider("netflix-domain", "netflix", Domain, "Netflix 域名"),
        meta_provider("bilibili-domain", "bilibili", Domain, "哔哩哔哩域名"),
        meta_provider("google-domain", "google", Domain, "Google 域名"),
        meta_provider("google-ip", "google", Ipcidr, "Google IP"),
        meta_provider("github-domain", "github", Domain, "GitHub 域名"),
        meta_provider("microsoft-domain", "microsoft", Domain, "Microsoft 域名"),
        meta_provider("apple-domain", "apple", Domain, "Apple 域名"),
        meta_provider("steam-domain", "steam", Domain, "Steam 域名"),
        meta_provider("cn-domain", "cn", Domain, "国内域名"),
        meta_provider("geolocation-!cn", "geolocation-!cn", Domain, "国外域名"),
    ];

    let mut rules = vec![
        rule_set_ref("private-domain", DOMESTIC),
        rule_set_ref("private-ip", DOMESTIC).no_resolve(),
        rule_set_ref("ads-domain", ADS),
        rule_set_ref("ai-domain", AI),
        rule_set_ref("telegram-domain", SOCIAL),
        rule_set_ref("telegram-ip", SOCIAL).no_resolve(),
        rule_set_ref("twitter-domain", SOCIAL),
        rule_set_ref("youtube-domain", MEDIA),
        rule_set_ref("netflix-domain", MEDIA),
        rule_set_ref("bilibili-domain", BILIBILI),
        rule_set_ref("google-domain", GOOGLE),
        rule_set_ref("google-ip", GOOGLE).no_resolve(),
        rule_set_ref("github-domain", GITHUB),
        rule_set_ref("microsoft-domain", MICROSOFT),
        rule_set_ref("apple-domain", APPLE),
        rule_set_ref("steam-domain", GAMING),
        rule_set_ref("cn-domain", DOMESTIC),
        rule_set_ref("geolocation-!cn", PROXY),
    ];
    rules.extend(lan_and_cn(DOMESTIC));
    rules.push(Rule::match_all(FINAL).describe("未匹配规则走漏网之鱼"));

    Template {
        groups,
        rules,
        rule_sets,
    }
}

fn mihomo_minimal() -> Template {
    let mut auto = ProxyGroup::new("auto", GroupKind::Urltest)
        .named(AUTO, "⚡", "")
        .probe(PROBE_URL, PROBE_INTERVAL, Some(50))
        .use_all(None);
    auto.lazy = true;
    let mut rules = lan_and_cn(DIRECT).to_vec();
    rules.push(Rule::match_all("proxy"));
    Template {
        groups: vec![
            ProxyGroup::selector("proxy", ["auto", DIRECT]).named(PROXY, "🚀", ""),
            auto,
        ],
        rules,
        rule_sets: Vec::new(),
    }
}

fn sager(name: &str) -> RuleSet {
    let mut rs = RuleSet::remote(
        format!("geosite-{name}"),
        format!("{SAGER_GEOSITE}/geosite-{name}.srs"),
        RuleSetFormat::Binary,
    );
    rs.refresh_interval = Some(DAY);
    rs
}

fn singbox_default() -> Template {
    let mut groups = vec![auto_group(), fallback_group(GroupKind::Urltest)];
    groups.extend(service_groups());
    groups.extend(region_groups());
    groups.extend(manual_and_others());

    let rule_sets = [
        "category-ads-all",
        "openai",
        "anthropic",
        "google-gemini",
        "cursor",
        "category-ai-!cn",
        "steam",
        "epicgames",
        "youtube",
        "netflix",
        "spotify",
        "disney",
        "telegram",
        "twitter",
        "facebook",
        "instagram",
        "google",
        "github",
        "microsoft",
        "apple",
        "bilibili",
        "cn",
        "geolocation-!cn",
    ]
    .into_iter()
    .map(sager)
    .collect();

    let rules = vec![
        dns_hijack(),
        rule_set_ref("geosite-category-ads-all", ADS),
        Rule::new(ConditionKind::GeoIp, "LAN", DIRECT).describe("私有 IP 直连"),
        rule_set_ref("geosite-cn", DIRECT),
        any_rule_set(
            &[
                "geosite-openai",
                "geosite-anthropic",
                "geosite-google-gemini",
                "geosite-cursor",
                "geosite-category-ai-!cn",
            ],
            AI,
        ),
        any_rule_set(&["geosite-steam", "geosite-epicgames"], GAMING),
        any_rule_set(
            &["geosite-youtube", "geosite-netflix", "geosite-spotify", "geosite-disney"],
            MEDIA,
        ),
        any_rule_set(
            &["geosite-telegram", "geosite-twitter", "geosite-facebook", "geosite-instagram"],
            SOCIAL,
        ),
        rule_set_ref("geosite-google", GOOGLE),
        rule_set_ref("geosite-github", GITHUB),
        rule_set_ref("geosite-microsoft", MICROSOFT),
        rule_set_ref("geosite-apple", APPLE),
        rule_set_ref("geosite-bilibili", BILIBILI),
        Rule::new(ConditionKind::GeoIp, "CN", DIRECT).describe("国内 IP 直连"),
        rule_set_ref("geosite-geolocation-!cn", FINAL),
        Rule::match_all(FINAL),
    ];

    Template {
        groups,
        rules,
        rule_sets,
    }
}

fn singbox_minimal() -> Template {
    let mut t = mihomo_minimal();
    t.rules.insert(0, dns_hijack());
    t.rules
        .iter_mut()
        .for_each(|r| r.no_resolve = false);
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate_for;

    #[test]
    fn every_preset_is_valid_for_its_engine() {
        for info in presets() {
            let (engine, t) = preset(info.id).unwrap();
            assert_eq!(engine, info.engine);
            let errors = validate_for(&t, engine);
            assert!(errors.is_empty(), "{}: {errors:?}", info.id);
            assert!(t.terminal_rule().is_some(), "{}", info.id);
        }
        assert!(preset("nope").is_none());
    }

    #[test]
    fn defaults_equal_default_presets() {
        assert_eq!(
            default_template(EngineKind::Mihomo),
            preset("mihomo-default").unwrap().1
        );
        assert_eq!(
            default_template(EngineKind::SingBox),
            preset("singbox-default").unwrap().1
        );
    }

    #[test]
    fn singbox_default_starts_with_dns_hijack() {
        let t = default_template(EngineKind::SingBox);
        assert_eq!(t.rules[0].target, HIJACK_DNS);
        assert_eq!(t.rules[0].condition.kind, ConditionKind::LogicalOr);
    }

    #[test]
    fn region_groups_filter_nodes() {
        let t = default_template(EngineKind::Mihomo);
        let hk = t.group(HK).unwrap();
        assert!(hk.use_all_available_outbounds);
        assert!(hk.member_filter.as_deref().unwrap().contains("HK"));
        assert!(t.group(MANUAL).unwrap().manual_only);
    }
}
