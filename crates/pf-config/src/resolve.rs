//! Generation-time member resolution shared by both adapters.

use crate::model::{is_reserved_tag, ProxyGroup, Template, DIRECT};
use pf_types::ports::Node;
use pf_types::{GenerationError, Warning, WarningKind};
use regex::Regex;
use std::collections::HashSet;

/// Node tags share one namespace with enabled groups and the builtin outbounds.
pub fn check_node_tags(t: &Template, nodes: &[Node]) -> Result<(), GenerationError> {
    let mut seen: HashSet<&str> = t
        .groups
        .iter()
        .filter(|g| g.enabled)
        .map(|g| g.tag.as_str())
        .collect();
    for (i, n) in nodes.iter().enumerate() {
        if is_reserved_tag(&n.tag) {
            return Err(GenerationError::unsupported(
                format!("/nodes/{i}/tag"),
                format!("node `{}` uses a reserved outbound name", n.tag),
            ));
        }
        if !seen.insert(n.tag.as_str()) {
            return Err(GenerationError::unsupported(
                format!("/nodes/{i}/tag"),
                format!("node `{}` collides with a group or another node", n.tag),
            ));
        }
    }
    Ok(())
}

/// Concrete member list for `g`; never empty for member-bearing kinds.
///
/// - `useAllAvailableOutbounds` expands to node tags (manual nodes only with `manualOnly`),
///   narrowed by `memberFilter`; a filter that matches nothing keeps every node.
/// - members pointing at disabled groups are dropped.
/// - an empty result becomes `[DIRECT]`.
pub fn resolve_members(
    t: &Template,
    idx: usize,
    g: &ProxyGroup,
    nodes: &[Node],
    warnings: &mut Vec<Warning>,
) -> Vec<String> {
    if !g.kind.has_members() {
        return Vec::new();
    }
    let mut out: Vec<String> = if g.use_all_available_outbounds {
        expand_nodes(g, nodes)
    } else {
        g.members
            .iter()
            .filter(|m| match t.group(m) {
                Some(target) if !target.enabled => {
                    warnings.push(Warning::new(
                        WarningKind::DroppedMember,
                        format!("/groups/{idx}/members"),
                        format!("`{m}` is disabled and left out of `{}`", g.tag),
                    ));
                    false
                }
                _ => true,
            })
            .cloned()
            .collect()
    };
    if out.is_empty() {
        out.push(DIRECT.to_string());
    }
    out
}

/// Node tags selected by a use-all group.
pub fn expand_nodes(g: &ProxyGroup, nodes: &[Node]) -> Vec<String> {
    let pool: Vec<&Node> = nodes.iter().filter(|n| !g.manual_only || n.manual).collect();
    let all = || pool.iter().map(|n| n.tag.clone()).collect::<Vec<_>>();
    let Some(filter) = g.member_filter.as_deref().filter(|f| !f.is_empty()) else {
        return all();
    };
    // validated upstream; an uncompilable filter behaves like no filter
    let Ok(re) = Regex::new(filter) else {
        return all();
    };
    let matched: Vec<String> = pool
        .iter()
        .filter(|n| re.is_match(&n.tag))
        .map(|n| n.tag.clone())
        .collect();
    if matched.is_empty() {
        all()
    } else {
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroupKind;

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("HK 01"),
            Node::new("JP 01"),
            Node::new("my-vps").manual(),
        ]
    }

    #[test]
    fn filter_narrows_and_falls_back() {
        let g = ProxyGroup::new("hk", GroupKind::Urltest).use_all(Some("(?i)hk"));
        assert_eq!(expand_nodes(&g, &nodes()), vec!["HK 01"]);
        let g = ProxyGroup::new("us", GroupKind::Urltest).use_all(Some("US"));
        assert_eq!(expand_nodes(&g, &nodes()).len(), 3);
    }

    #[test]
    fn manual_only_and_empty_default() {
        let mut g = ProxyGroup::new("manual", GroupKind::Selector).use_all(None);
        g.manual_only = true;
        assert_eq!(expand_nodes(&g, &nodes()), vec!["my-vps"]);
        let t = Template::default();
        let mut w = Vec::new();
        assert_eq!(resolve_members(&t, 0, &g, &[], &mut w), vec!["DIRECT"]);
    }

    #[test]
    fn node_tags_must_not_collide() {
        let mut off = ProxyGroup::selector("off", ["DIRECT"]);
        off.enabled = false;
        let t = Template {
            groups: vec![ProxyGroup::selector("proxy", ["DIRECT"]), off],
            ..Default::default()
        };
        assert!(check_node_tags(&t, &nodes()).is_ok());
        // a disabled group is not emitted, so its tag is free
        assert!(check_node_tags(&t, &[Node::new("off")]).is_ok());

        for bad in [
            vec![Node::new("proxy")],
            vec![Node::new("direct")],
            vec![Node::new("REJECT")],
            vec![Node::new("HK 01"), Node::new("HK 01")],
        ] {
            match check_node_tags(&t, &bad) {
                Err(GenerationError::Unsupported { ptr, .. }) => {
                    assert_eq!(ptr, format!("/nodes/{}/tag", bad.len() - 1))
                }
                other => panic!("expected Unsupported, got {other:?}"),
            }
        }
    }

    #[test]
    fn disabled_members_are_dropped() {
        let mut off = ProxyGroup::selector("off", ["DIRECT"]);
        off.enabled = false;
        let proxy = ProxyGroup::selector("proxy", ["off"]);
        let t = Template {
            groups: vec![proxy.clone(), off],
            ..Default::default()
        };
        let mut w = Vec::new();
        assert_eq!(resolve_members(&t, 0, &proxy, &[], &mut w), vec!["DIRECT"]);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].kind, WarningKind::DroppedMember);
    }
}
