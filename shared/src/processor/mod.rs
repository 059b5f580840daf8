//! Attribute processor.
//!
//! Runs the configured attribute actions, in order, over the record-level
//! attributes of every admitted record before it reaches the batcher. The
//! shared resource is never modified.
//!
//! # Example
//!
//! ```
//! use shared::config::{AttributeAction, AttributeRule, ProcessorConfig};
//! use shared::models::{Attributes, SignalKind};
//! use shared::processor::AttributeProcessor;
//!
//! let processor = AttributeProcessor::new(&ProcessorConfig {
//!     actions: vec![AttributeRule::new(AttributeAction::Redact {
//!         key: "password".to_string(),
//!         placeholder: "[REDACTED]".to_string(),
//!     })],
//! })
//! .unwrap();
//!
//! let mut attrs = Attributes::new().with("password", "hunter2");
//! processor.apply(SignalKind::Logs, &mut attrs);
//! assert_eq!(attrs.get("password").and_then(|v| v.as_str()), Some("[REDACTED]"));
//! ```

pub mod actions;
pub mod patterns;

pub use actions::{ActionResult, CompiledAction};
pub use patterns::PatternError;

use crate::config::ProcessorConfig;
use crate::models::{Attributes, Record, SignalKind};

#[derive(Debug, Clone)]
struct Step {
    action: CompiledAction,
    signals: Vec<SignalKind>,
}

impl Step {
    fn applies_to(&self, kind: SignalKind) -> bool {
        self.signals.is_empty() || self.signals.contains(&kind)
    }
}

/// Number of attribute maps touched by a processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Records whose attributes changed.
    pub records_modified: usize,
}

/// Ordered list of compiled attribute actions.
#[derive(Debug, Clone, Default)]
pub struct AttributeProcessor {
    steps: Vec<Step>,
}

impl AttributeProcessor {
    /// Compiles the configured actions.
    ///
    /// # Errors
    ///
    /// Returns an error if any `redact_pattern` action is invalid.
    pub fn new(config: &ProcessorConfig) -> Result<Self, PatternError> {
        let steps = config
            .actions
            .iter()
            .map(|rule| {
                Ok(Step {
                    action: CompiledAction::compile(&rule.action)?,
                    signals: rule.signals.clone(),
                })
            })
            .collect::<Result<Vec<_>, PatternError>>()?;
        Ok(Self { steps })
    }

    /// Returns true if no actions are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Applies every action that targets `kind` to one attribute map.
    ///
    /// Returns true if the map changed.
    pub fn apply(&self, kind: SignalKind, attributes: &mut Attributes) -> bool {
        self.steps
            .iter()
            .filter(|step| step.applies_to(kind))
            .fold(false, |changed, step| {
                step.action.apply(attributes) == ActionResult::Changed || changed
            })
    }

    /// Processes a slice of records in place.
    pub fn process(&self, kind: SignalKind, records: &mut [Record]) -> ProcessStats {
        let mut stats = ProcessStats::default();
        if self.steps.is_empty() {
            return stats;
        }
        for record in records.iter_mut() {
            if self.apply(kind, &mut record.attributes) {
                stats.records_modified += 1;
            }
        }
        stats
    }
}
