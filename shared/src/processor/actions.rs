//! Compiled attribute actions.

use super::patterns::{compile_pattern, PatternError};
use crate::config::AttributeAction;
use crate::models::{AttributeValue, Attributes};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Prefix of values produced by the `hash` action.
pub const HASH_PREFIX: &str = "sha256:";

/// An action ready to run against an attribute map.
#[derive(Debug, Clone)]
pub enum CompiledAction {
    /// Insert or overwrite.
    Upsert {
        /// Attribute key.
        key: String,
        /// New value.
        value: AttributeValue,
    },
    /// Insert when absent.
    Insert {
        /// Attribute key.
        key: String,
        /// New value.
        value: AttributeValue,
    },
    /// Remove.
    Delete {
        /// Attribute key.
        key: String,
    },
    /// Replace with a SHA-256 digest.
    Hash {
        /// Attribute key.
        key: String,
    },
    /// Replace with a placeholder.
    Redact {
        /// Attribute key.
        key: String,
        /// Replacement.
        placeholder: String,
    },
    /// Replace pattern matches inside string values.
    RedactPattern {
        /// Compiled pattern.
        regex: Regex,
        /// Replacement.
        placeholder: String,
    },
}

/// Whether an action changed the attribute map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResult {
    /// The map was modified.
    Changed,
    /// Nothing to do.
    Unchanged,
}

impl CompiledAction {
    /// Compiles a configured action.
    ///
    /// # Errors
    ///
    /// Returns an error if a `redact_pattern` pattern does not compile, or if
    /// its placeholder would itself match the pattern.
    pub fn compile(action: &AttributeAction) -> Result<Self, PatternError> {
        Ok(match action {
            AttributeAction::Upsert { key, value } => Self::Upsert {
                key: key.clone(),
                value: value.clone(),
            },
            AttributeAction::Insert { key, value } => Self::Insert {
                key: key.clone(),
                value: value.clone(),
            },
            AttributeAction::Delete { key } => Self::Delete { key: key.clone() },
            AttributeAction::Hash { key } => Self::Hash { key: key.clone() },
            AttributeAction::Redact { key, placeholder } => Self::Redact {
                key: key.clone(),
                placeholder: placeholder.clone(),
            },
            AttributeAction::RedactPattern {
                pattern,
                placeholder,
            } => {
                let regex = compile_pattern(pattern)?;
                if regex.is_match(placeholder) {
                    return Err(PatternError::PlaceholderMatches(placeholder.clone()));
                }
                Self::RedactPattern {
                    regex,
                    placeholder: placeholder.clone(),
                }
            }
        })
    }

    /// Applies the action to `attributes`.
    pub fn apply(&self, attributes: &mut Attributes) -> ActionResult {
        let changed = match self {
            Self::Upsert { key, value } => {
                if attributes.get(key) == Some(value) {
                    false
                } else {
                    attributes.insert(key.clone(), value.clone());
                    true
                }
            }
            Self::Insert { key, value } => {
                if attributes.contains_key(key) {
                    false
                } else {
                    attributes.insert(key.clone(), value.clone());
                    true
                }
            }
            Self::Delete { key } => attributes.remove(key).is_some(),
            Self::Hash { key } => match attributes.get_mut(key) {
                Some(value) if !is_hashed(value) => {
                    *value = AttributeValue::String(hash_value(value));
                    true
                }
                _ => false,
            },
            Self::Redact { key, placeholder } => match attributes.get_mut(key) {
                Some(value) if value.as_str() != Some(placeholder.as_str()) => {
                    *value = AttributeValue::String(placeholder.clone());
                    true
                }
                _ => false,
            },
            Self::RedactPattern { regex, placeholder } => attributes
                .values_mut()
                .fold(false, |changed, value| {
                    redact_matches(value, regex, placeholder) || changed
                }),
        };
        if changed {
            ActionResult::Changed
        } else {
            ActionResult::Unchanged
        }
    }
}

fn is_hashed(value: &AttributeValue) -> bool {
    value.as_str().is_some_and(|s| {
        s.strip_prefix(HASH_PREFIX)
            .is_some_and(|digest| digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
    })
}

/// SHA-256 of the value's string form (raw bytes for byte values).
fn hash_value(value: &AttributeValue) -> String {
    let digest = match value {
        AttributeValue::Bytes(bytes) => Sha256::digest(bytes),
        other => Sha256::digest(other.to_str_lossy().as_bytes()),
    };
    format!("{HASH_PREFIX}{}", hex::encode(digest))
}

/// Replaces matches in string values, descending into arrays and maps.
fn redact_matches(value: &mut AttributeValue, regex: &Regex, placeholder: &str) -> bool {
    match value {
        AttributeValue::String(s) => {
            if !regex.is_match(s) {
                return false;
            }
            let replaced = regex.replace_all(s, regex::NoExpand(placeholder)).into_owned();
            *s = replaced;
            true
        }
        AttributeValue::Array(values) => values
            .iter_mut()
            .fold(false, |changed, v| redact_matches(v, regex, placeholder) || changed),
        AttributeValue::Map(map) => map
            .values_mut()
            .fold(false, |changed, v| redact_matches(v, regex, placeholder) || changed),
        _ => false,
    }
}
