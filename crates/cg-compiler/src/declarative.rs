//! Declarative rule compilation
//!
//! Browsers without blocking request interception enforce the whitelist with
//! dynamic allow-rules: one rule per whitelisted domain, allowing every
//! filtered resource type whose request is initiated by that domain. This is
//! coarser than the imperative filter but it is all the declarative API can
//! express.

use serde::{Deserialize, Serialize};

use cg_core::types::RequestType;
use cg_core::whitelist::Whitelist;

/// Priority of whitelist allow-rules.
pub const ALLOW_RULE_PRIORITY: u32 = 1;

/// A dynamic rule as understood by the declarative request API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeRule {
    pub id: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub action: RuleAction,
    #[serde(default)]
    pub condition: RuleCondition,
}

fn default_priority() -> u32 {
    ALLOW_RULE_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: RuleActionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleActionType {
    Allow,
    Block,
    /// Any action this crate never installs
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initiator_domains: Vec<String>,
}

/// A single atomic replacement of the dynamic rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub add_rules: Vec<DeclarativeRule>,
    pub remove_rule_ids: Vec<u32>,
}

/// Session counter for rule ids. Starts at 1; reset only when the whitelist
/// is reloaded.
#[derive(Debug, Clone)]
pub struct RuleIdAllocator {
    next: u32,
}

impl Default for RuleIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl RuleIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }

    pub fn reset(&mut self) {
        self.next = 1;
    }
}

/// The allow-rule for one whitelisted domain.
pub fn allow_rule(id: u32, domain: &str) -> DeclarativeRule {
    DeclarativeRule {
        id,
        priority: ALLOW_RULE_PRIORITY,
        action: RuleAction {
            kind: RuleActionType::Allow,
        },
        condition: RuleCondition {
            url_filter: Some("*".to_string()),
            resource_types: RequestType::ALLOW_RULE
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            initiator_domains: vec![domain.to_string()],
        },
    }
}

/// One allow-rule per whitelisted domain, ids drawn from `ids`.
pub fn compile_allow_rules(whitelist: &Whitelist, ids: &mut RuleIdAllocator) -> Vec<DeclarativeRule> {
    whitelist
        .iter()
        .map(|domain| allow_rule(ids.next_id(), domain))
        .collect()
}

/// Replace every installed rule with freshly compiled whitelist rules.
pub fn build_update(
    installed_ids: impl IntoIterator<Item = u32>,
    whitelist: &Whitelist,
    ids: &mut RuleIdAllocator,
) -> RuleUpdate {
    RuleUpdate {
        remove_rule_ids: installed_ids.into_iter().collect(),
        add_rules: compile_allow_rules(whitelist, ids),
    }
}
