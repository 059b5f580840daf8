//! Attribute processor configuration.

use crate::models::{AttributeValue, SignalKind};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Placeholder written by `redact` and `redact_pattern` when none is configured.
pub const DEFAULT_PLACEHOLDER: &str = "[REDACTED]";

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

/// A single attribute action.
///
/// ```json
/// { "action": "upsert", "key": "deployment.environment", "value": "prod" }
/// { "action": "redact_pattern", "pattern": "builtin:email" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AttributeAction {
    /// Sets `key` to `value`, overwriting any existing value.
    Upsert {
        /// Attribute key.
        key: String,
        /// New value.
        value: AttributeValue,
    },
    /// Sets `key` to `value` only when the key is absent.
    Insert {
        /// Attribute key.
        key: String,
        /// New value.
        value: AttributeValue,
    },
    /// Removes `key`.
    Delete {
        /// Attribute key.
        key: String,
    },
    /// Replaces the value of `key` with its SHA-256 digest.
    Hash {
        /// Attribute key.
        key: String,
    },
    /// Replaces the value of `key` with a placeholder.
    Redact {
        /// Attribute key.
        key: String,
        /// Replacement text.
        #[serde(default = "default_placeholder")]
        placeholder: String,
    },
    /// Replaces every match of `pattern` inside string values.
    RedactPattern {
        /// Regular expression, or `builtin:<name>` for a bundled pattern.
        pattern: String,
        /// Replacement text.
        #[serde(default = "default_placeholder")]
        placeholder: String,
    },
}

impl AttributeAction {
    /// Action name as written in configuration.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::Hash { .. } => "hash",
            Self::Redact { .. } => "redact",
            Self::RedactPattern { .. } => "redact_pattern",
        }
    }
}

/// An action plus the signal kinds it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_rule"))]
pub struct AttributeRule {
    /// The action.
    #[serde(flatten)]
    pub action: AttributeAction,
    /// Signal kinds the action applies to. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<SignalKind>,
}

impl AttributeRule {
    /// Creates a rule that applies to every signal kind.
    #[must_use]
    pub fn new(action: AttributeAction) -> Self {
        Self {
            action,
            signals: Vec::new(),
        }
    }

    /// Restricts the rule to the given signal kinds.
    #[must_use]
    pub fn for_signals(mut self, signals: impl IntoIterator<Item = SignalKind>) -> Self {
        self.signals = signals.into_iter().collect();
        self
    }

    /// Returns true if the rule applies to records of `kind`.
    #[must_use]
    pub fn applies_to(&self, kind: SignalKind) -> bool {
        self.signals.is_empty() || self.signals.contains(&kind)
    }
}

fn validate_rule(rule: &AttributeRule) -> Result<(), ValidationError> {
    let key = match &rule.action {
        AttributeAction::Upsert { key, .. }
        | AttributeAction::Insert { key, .. }
        | AttributeAction::Delete { key }
        | AttributeAction::Hash { key }
        | AttributeAction::Redact { key, .. } => key,
        AttributeAction::RedactPattern { pattern, .. } => pattern,
    };
    if key.is_empty() {
        return Err(ValidationError::new("empty_key")
            .with_message("attribute actions need a non-empty key or pattern".into()));
    }
    Ok(())
}

/// Ordered list of attribute actions for one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Actions, applied in order.
    #[validate(nested)]
    pub actions: Vec<AttributeRule>,
}
