//! Mutable record of one retry execution.

use std::collections::HashMap;

use crate::core::{FailedComponent, TransportError};

/// Meta-info key under which the failed component's description is stored.
pub const FAILED_COMPONENT_KEY: &str = "failed_component";

/// Status, last failure and metadata of one retry execution.
///
/// Work run under a retry template receives the context and must call
/// [`RetryContext::set_ok`] on success; returning without doing so counts as a
/// failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    description: String,
    ok: bool,
    attempts: u32,
    last_failure: Option<TransportError>,
    meta_info: HashMap<String, String>,
    failed_component: Option<FailedComponent>,
}

impl RetryContext {
    /// Creates a context for work with the given description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ok: false,
            attempts: 0,
            last_failure: None,
            meta_info: HashMap::new(),
            failed_component: None,
        }
    }

    /// Description of the retried work.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Marks the current attempt as successful.
    pub fn set_ok(&mut self) {
        self.ok = true;
        self.last_failure = None;
    }

    /// Records a failed attempt.
    ///
    /// A connect-class failure attributed to a component also records the
    /// component, so the next execution can target it.
    pub fn set_failed(&mut self, failure: TransportError) {
        self.ok = false;
        if let Some(component) = failure.failed_component() {
            self.set_failed_component(component.clone());
        }
        self.last_failure = Some(failure);
    }

    /// Whether the work completed successfully.
    pub const fn is_ok(&self) -> bool {
        self.ok
    }

    /// Number of attempts made so far.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.ok = false;
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// The failure of the most recent attempt.
    pub fn last_failure(&self) -> Option<&TransportError> {
        self.last_failure.as_ref()
    }

    /// The component a previous failure was attributed to.
    pub fn failed_component(&self) -> Option<&FailedComponent> {
        self.failed_component.as_ref()
    }

    /// Records the component that triggered this execution.
    pub fn set_failed_component(&mut self, component: FailedComponent) {
        self.meta_info
            .insert(FAILED_COMPONENT_KEY.to_string(), component.to_string());
        self.failed_component = Some(component);
    }

    /// Forgets the failed component once it has been dealt with.
    pub fn clear_failed_component(&mut self) -> Option<FailedComponent> {
        self.meta_info.remove(FAILED_COMPONENT_KEY);
        self.failed_component.take()
    }

    /// Free-form metadata.
    pub fn meta_info(&self) -> &HashMap<String, String> {
        &self.meta_info
    }

    /// Adds free-form metadata.
    pub fn add_meta_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta_info.insert(key.into(), value.into());
    }
}
