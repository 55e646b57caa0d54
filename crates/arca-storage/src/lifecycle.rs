//! Bucket tiering policy documents.
//!
//! Providers only accept the whole lifecycle document, so a policy change is
//! fetch existing rules, merge by rule id, write everything back.

use serde::{Deserialize, Serialize};

/// Request header some S3-compatible providers need to reach an external tiering target.
pub const TIERING_INFO_HEADER: &str = "x-gmt-tieringinfo";

pub const DEFAULT_TIER_TARGET: &str = "GLACIER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieringRule {
    pub id: String,
    /// Filter prefix. `None` applies the rule bucket-wide.
    pub prefix: Option<String>,
    pub transition_storage_class: Option<String>,
    pub transition_days: Option<i32>,
    pub enabled: bool,
}

impl TieringRule {
    /// Immediate transition of everything under `prefix`. The rule id is the prefix.
    pub fn immediate_transition(prefix: &str, tier_target: &str) -> Self {
        Self {
            id: prefix.to_string(),
            prefix: Some(prefix.to_string()),
            transition_storage_class: Some(tier_target.to_string()),
            transition_days: Some(0),
            enabled: true,
        }
    }

    pub fn has_active_transition(&self) -> bool {
        self.enabled && self.transition_storage_class.is_some()
    }

    pub fn applies_to(&self, path: &str) -> bool {
        match self.prefix.as_deref().map(|p| p.trim_start_matches('/')) {
            None | Some("") => true,
            Some(prefix) => path.trim_start_matches('/').starts_with(prefix),
        }
    }
}

/// External tiering target announced to the provider on policy writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieringEndpoint {
    pub protocol: String,
    pub endpoint: String,
    pub bucket: String,
}

impl TieringEndpoint {
    /// Header value: `urlencode(protocol|EndPoint:urlencode(endpoint),TieringBucket:bucket)`.
    pub fn header_value(&self) -> String {
        let info = format!(
            "{}|EndPoint:{},TieringBucket:{}",
            self.protocol,
            urlencoding::encode(&self.endpoint),
            self.bucket
        );
        urlencoding::encode(&info).into_owned()
    }
}

/// Replaces any rule with the same id, keeps the others in order.
pub fn merge_rule(existing: Vec<TieringRule>, rule: TieringRule) -> Vec<TieringRule> {
    let mut merged: Vec<TieringRule> = existing.into_iter().filter(|r| r.id != rule.id).collect();
    merged.push(rule);
    merged
}

pub fn policy_applies(rules: &[TieringRule], path: &str) -> bool {
    rules
        .iter()
        .any(|rule| rule.has_active_transition() && rule.applies_to(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merging_same_prefix_keeps_one_rule() {
        let first = merge_rule(vec![], TieringRule::immediate_transition("proj/a", "GLACIER"));
        let second = merge_rule(
            first.clone(),
            TieringRule::immediate_transition("proj/a", "GLACIER"),
        );
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn merging_other_prefix_preserves_existing_rules() {
        let rules = merge_rule(
            vec![TieringRule::immediate_transition("proj/a", "GLACIER")],
            TieringRule::immediate_transition("proj/b", "DEEP_ARCHIVE"),
        );
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "proj/a");
    }

    #[test]
    fn policy_applies_to_prefixed_and_bucket_wide_rules() {
        let rules = vec![TieringRule::immediate_transition("proj/a", "GLACIER")];
        assert!(policy_applies(&rules, "/proj/a/file.bin"));
        assert!(!policy_applies(&rules, "/proj/b/file.bin"));

        let bucket_wide = vec![TieringRule {
            prefix: None,
            ..TieringRule::immediate_transition("all", "GLACIER")
        }];
        assert!(policy_applies(&bucket_wide, "anything"));
    }

    #[test]
    fn disabled_or_expiration_only_rules_do_not_count() {
        let disabled = TieringRule {
            enabled: false,
            ..TieringRule::immediate_transition("proj", "GLACIER")
        };
        let no_transition = TieringRule {
            transition_storage_class: None,
            ..TieringRule::immediate_transition("proj", "GLACIER")
        };
        assert!(!policy_applies(&[disabled, no_transition], "proj/x"));
    }

    #[test]
    fn tiering_header_is_double_encoded() {
        let endpoint = TieringEndpoint {
            protocol: "s3".to_string(),
            endpoint: "https://tier.example.org".to_string(),
            bucket: "cold".to_string(),
        };
        assert_eq!(
            endpoint.header_value(),
            "s3%7CEndPoint%3Ahttps%253A%252F%252Ftier.example.org%2CTieringBucket%3Acold"
        );
    }
}
