//! Adaptation rule engine.
//!
//! Applies a session's prioritized rule set against assembled context to
//! transform prompt content. Ordering contract: active rules run in
//! strictly DESCENDING priority order (higher first), ties preserving
//! original order — the stable sort is a required invariant. Note this is
//! the opposite convention from pipeline stages, where lower priority runs
//! first; both are external contracts and stay as-is.
//!
//! Rules are isolated from each other: a rule whose condition or action
//! fails is logged and skipped, never aborting the pass.

use serde_json::Value;
use tracing::{debug, warn};

use attune_core::rules::{ActionKind, AdaptationRule, RuleAction};

/// Result of one rule pass.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleOutcome {
    /// Transformed content.
    pub content: String,
    /// Number of rules whose condition held and whose action ran.
    pub rules_applied: usize,
}

/// Stateless rule evaluator.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdaptationRuleEngine;

impl AdaptationRuleEngine {
    /// Create an engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Apply `rules` to `content` under `context`.
    ///
    /// Filters to active rules, sorts descending by priority (stable),
    /// and applies each whose condition holds. Per-rule failures are
    /// logged at warn and skipped.
    #[must_use]
    pub fn apply(&self, content: &str, context: &Value, rules: &[AdaptationRule]) -> RuleOutcome {
        let mut ordered: Vec<&AdaptationRule> = rules.iter().filter(|r| r.is_active).collect();
        // Stable sort: equal priorities keep their original relative order.
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut current = content.to_string();
        let mut applied = 0;

        for rule in ordered {
            match evaluate_condition(&rule.condition, context) {
                Ok(false) => {
                    debug!(rule_id = %rule.id, "rule condition false, skipping");
                }
                Ok(true) => match apply_action(&current, &rule.action, context) {
                    Ok(next) => {
                        current = next;
                        applied += 1;
                    }
                    Err(reason) => {
                        warn!(rule_id = %rule.id, rule = %rule.name, %reason, "rule action failed, skipping");
                    }
                },
                Err(reason) => {
                    warn!(rule_id = %rule.id, rule = %rule.name, %reason, "rule condition failed, skipping");
                }
            }
        }

        RuleOutcome {
            content: current,
            rules_applied: applied,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Condition evaluation
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluate a rule condition against the context.
///
/// Supported grammar (implementation-defined extension point):
/// - `""` / `"always"` / `"*"` — unconditionally true
/// - `"path"` — true when the dot-path resolves to a non-null value
/// - `"path=literal"` — string equality against the resolved value
///
/// Anything else (boolean operators, comparisons) is rejected so the rule
/// gets skipped instead of silently misfiring.
fn evaluate_condition(condition: &str, context: &Value) -> Result<bool, String> {
    let trimmed = condition.trim();
    if trimmed.is_empty() || trimmed == "always" || trimmed == "*" {
        return Ok(true);
    }
    if trimmed.contains("&&") || trimmed.contains("||") || trimmed.contains('<') || trimmed.contains('>') {
        return Err(format!("unsupported condition operator in '{trimmed}'"));
    }

    if let Some((path, literal)) = trimmed.split_once('=') {
        let path = path.trim();
        if path.is_empty() {
            return Err("empty path in equality condition".into());
        }
        return Ok(lookup_path(context, path)
            .is_some_and(|v| value_as_string(v) == literal.trim()));
    }

    Ok(lookup_path(context, trimmed).is_some_and(|v| !v.is_null()))
}

/// Resolve a dot-path against nested JSON objects.
fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// String form used for equality checks and template substitution.
fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action application
// ─────────────────────────────────────────────────────────────────────────────

/// Apply one action to the running content.
///
/// Target addressing is literal: `modify`/`replace` substitute the
/// `{{target}}` placeholder when present, falling back to a literal
/// substring replace; `append` inserts after the first occurrence of the
/// target (or at the end); `filter` removes the target.
fn apply_action(content: &str, action: &RuleAction, context: &Value) -> Result<String, String> {
    let placeholder = format!("{{{{{}}}}}", action.target);

    match action.kind {
        ActionKind::Modify | ActionKind::Replace => {
            if action.target.is_empty() {
                return Err("modify/replace requires a target".into());
            }
            let value = resolve_value(action, context)?;
            if content.contains(&placeholder) {
                Ok(content.replace(&placeholder, &value))
            } else if content.contains(&action.target) {
                Ok(content.replace(&action.target, &value))
            } else {
                // Condition held but the target is absent from this
                // content; treated as an applied no-op.
                Ok(content.to_string())
            }
        }
        ActionKind::Append => {
            let value = resolve_value(action, context)?;
            if !action.target.is_empty() {
                if let Some(pos) = content.find(&action.target) {
                    let insert_at = pos + action.target.len();
                    let mut out = String::with_capacity(content.len() + value.len());
                    out.push_str(&content[..insert_at]);
                    out.push_str(&value);
                    out.push_str(&content[insert_at..]);
                    return Ok(out);
                }
            }
            Ok(format!("{content}{value}"))
        }
        ActionKind::Filter => {
            if action.target.is_empty() {
                return Err("filter requires a target".into());
            }
            Ok(content.replace(&placeholder, "").replace(&action.target, ""))
        }
    }
}

/// Resolve the action's value: literal `value` wins, else the template is
/// expanded against the context.
fn resolve_value(action: &RuleAction, context: &Value) -> Result<String, String> {
    if let Some(value) = &action.value {
        return Ok(value_as_string(value));
    }
    if let Some(template) = &action.template {
        return expand_template(template, context);
    }
    Err("action has neither value nor template".into())
}

/// Expand `{{path}}` placeholders from the context. An unresolvable path
/// is an error so the rule gets skipped rather than emitting garbage.
fn expand_template(template: &str, context: &Value) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err("unterminated '{{' in template".into());
        };
        let path = after[..end].trim();
        let value = lookup_path(context, path)
            .ok_or_else(|| format!("template path '{path}' not found in context"))?;
        out.push_str(&value_as_string(value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
