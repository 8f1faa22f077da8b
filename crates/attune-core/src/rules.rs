//! Adaptation rule types.
//!
//! A rule is a prioritized condition/action pair that conditionally
//! transforms prompt content. Rules are owned by a session's state (loaded
//! once at session creation) and applied in strictly descending priority
//! order — HIGHER priority runs first. This is deliberately the opposite
//! convention from pipeline stages (`attune-runtime`), where lower priority
//! runs first; both orderings are distinct external contracts and must not
//! be unified.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an action does to the running content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Substitute content at the target.
    Modify,
    /// Concatenate content at the target.
    Append,
    /// Substitute content at the target (alias of modify in effect).
    Replace,
    /// Remove or narrow content at the target.
    Filter,
}

impl ActionKind {
    /// Stable string form (matches the serialized representation).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modify => "modify",
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Filter => "filter",
        }
    }
}

/// The transformation half of a rule.
///
/// `target` addressing is an external contract with the rule author. This
/// engine supports literal key targets: `modify`/`replace` substitute the
/// `{{target}}` placeholder (falling back to a literal substring replace),
/// `append` concatenates after the target (or at the end), and `filter`
/// removes the target substring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    /// Action discriminator.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Literal target the action addresses.
    pub target: String,
    /// Literal replacement/concatenation value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Template resolved against the evaluation context
    /// (`{{path}}` placeholders). Used when `value` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// A prioritized condition/action pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationRule {
    /// Rule identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Boolean condition over the assembled context.
    ///
    /// Grammar is an implementation-defined extension point. Supported:
    /// empty / `"always"` (true), `"key"` (presence, dot paths allowed),
    /// `"key=literal"` (string equality). Anything else is treated as a
    /// rule-local error: logged and skipped, never fatal.
    pub condition: String,
    /// Transformation applied when the condition holds.
    pub action: RuleAction,
    /// Priority — HIGHER runs first. Ties preserve original order.
    pub priority: i32,
    /// Inactive rules are ignored entirely.
    pub is_active: bool,
}

impl AdaptationRule {
    /// Convenience constructor for an always-active rule.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: impl Into<String>,
        action: RuleAction,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition: condition.into(),
            action,
            priority,
            is_active: true,
        }
    }
}
