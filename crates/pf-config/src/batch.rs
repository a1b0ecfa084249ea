//! Batch authoring: one rule whose payload lists many values, one per line.

use crate::model::{Condition, ConditionKind, Rule};

fn splits(kind: ConditionKind) -> bool {
    !kind.is_logical() && !matches!(kind, ConditionKind::RuleSetReference | ConditionKind::MatchAll)
}

/// Expand a multi-line payload into one rule per line.
///
/// Blank lines and `#` comments are dropped. Rule-set references, match-all and logical
/// rules come back unchanged. A payload with nothing but comments becomes one rule with an
/// empty payload, which validation rejects.
pub fn expand_batch(rule: &Rule) -> Vec<Rule> {
    let c = &rule.condition;
    if !splits(c.kind) || !c.payload.contains('\n') {
        return vec![rule.clone()];
    }
    let with_payload = |payload: &str| Rule {
        condition: Condition {
            payload: payload.to_string(),
            ..c.clone()
        },
        ..rule.clone()
    };
    let out: Vec<Rule> = c
        .payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(with_payload)
        .collect();
    if out.is_empty() {
        vec![with_payload("")]
    } else {
        out
    }
}

/// [`expand_batch`] over a whole rule list, order preserved.
pub fn expand_all(rules: &[Rule]) -> Vec<Rule> {
    rules.iter().flat_map(expand_batch).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_and_skips_comments() {
        let r = Rule::new(
            ConditionKind::DomainSuffix,
            "google.com\n\n  # search\n youtube.com \r\ngmail.com",
            "proxy",
        )
        .no_resolve();
        let out = expand_batch(&r);
        let payloads: Vec<&str> = out.iter().map(|r| r.condition.payload.as_str()).collect();
        assert_eq!(payloads, vec!["google.com", "youtube.com", "gmail.com"]);
        assert!(out.iter().all(|r| r.target == "proxy" && r.no_resolve));
    }

    #[test]
    fn comment_only_payload_is_kept_empty() {
        let r = Rule::new(ConditionKind::DomainSuffix, "\n# x\n  ", "proxy");
        let out = expand_all(&[r, Rule::match_all("proxy")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].condition.payload, "");
        assert_eq!(out[0].target, "proxy");
    }

    #[test]
    fn rule_set_and_match_all_are_kept() {
        let r = Rule::new(ConditionKind::RuleSetReference, "a\nb", "proxy");
        assert_eq!(expand_batch(&r), vec![r.clone()]);
        let m = Rule::match_all("proxy");
        assert_eq!(expand_all(&[r.clone(), m.clone()]), vec![r, m]);
    }
}
