//! Readiness conditions
//!
//! A resource's status carries one [`Condition`] per condition type. Sub-logic
//! only ever sets sub-conditions; the aggregate [`READY`] condition is derived
//! from them by [`Conditions::aggregate_ready`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Aggregate readiness of the whole resource
pub const READY: &str = "Ready";

/// The identity API registration exists and is ready
pub const KEYSTONE_API_READY: &str = "KeystoneAPIReady";

/// An authenticated admin client for the identity service could be obtained
pub const ADMIN_SERVICE_CLIENT_READY: &str = "AdminServiceClientReady";

/// The remote endpoint set matches the declared endpoint set
pub const ENDPOINTS_READY: &str = "KeystoneServiceOSEndpointsReady";

/// Mirrors the readiness of the owning service registration
pub const KEYSTONE_SERVICE_READY: &str = "KeystoneServiceReady";

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason for a condition's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    /// Nothing observed yet
    Init,
    /// Waiting on something outside this resource
    Requested,
    /// Done
    Ready,
    /// Failed
    Error,
}

/// How bad a non-true condition is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
    #[default]
    #[serde(rename = "")]
    None,
}

impl Severity {
    fn is_none(&self) -> bool {
        *self == Severity::None
    }

    fn rank(self) -> u8 {
        match self {
            Severity::Error => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
            Severity::None => 3,
        }
    }
}

/// A named health signal attached to a resource's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a [`Conditions`] collection
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Severity::is_none")]
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A `True` condition
    pub fn new_true(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            reason: Reason::Ready,
            severity: Severity::None,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// A `False` condition
    pub fn new_false(
        type_: impl Into<String>,
        reason: Reason,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::False,
            reason,
            severity,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// An `Unknown` condition
    pub fn new_unknown(type_: impl Into<String>, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::Unknown,
            reason,
            severity: Severity::None,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Ordering used to pick the most relevant non-ready condition:
    /// `False` before `Unknown` before `True`, then by severity, then the
    /// most recent transition, then by type for determinism.
    fn priority(&self, other: &Self) -> Ordering {
        let status_rank = |s: ConditionStatus| match s {
            ConditionStatus::False => 0u8,
            ConditionStatus::Unknown => 1,
            ConditionStatus::True => 2,
        };

        status_rank(self.status)
            .cmp(&status_rank(other.status))
            .then(self.severity.rank().cmp(&other.severity.rank()))
            .then(other.last_transition_time.cmp(&self.last_transition_time))
            .then(self.type_.cmp(&other.type_))
    }
}

/// The condition collection of a resource status
///
/// Holds at most one condition per type. `Ready` is kept first, the rest in
/// type order, so serialized status is stable across passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// Initialize `Ready` and the given sub-condition types to
    /// `Unknown/Init`, leaving already present types untouched.
    pub fn init(&mut self, sub_conditions: &[(&str, &str)]) {
        if self.get(READY).is_none() {
            self.set(Condition::new_unknown(READY, Reason::Init, "Setup started"));
        }
        for (type_, message) in sub_conditions {
            if self.get(type_).is_none() {
                self.set(Condition::new_unknown(*type_, Reason::Init, *message));
            }
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// The transition time of an existing condition is kept when its status
    /// does not change.
    pub fn set(&mut self, mut condition: Condition) {
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.0.push(condition);
        }

        self.0.sort_by(|a, b| match (a.type_ == READY, b.type_ == READY) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.type_.cmp(&b.type_),
        });
    }

    pub fn mark_true(&mut self, type_: &str, message: impl Into<String>) {
        self.set(Condition::new_true(type_, message));
    }

    pub fn mark_false(
        &mut self,
        type_: &str,
        reason: Reason,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.set(Condition::new_false(type_, reason, severity, message));
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: Reason, message: impl Into<String>) {
        self.set(Condition::new_unknown(type_, reason, message));
    }

    /// Whether every condition except `Ready` is `True`
    pub fn all_sub_conditions_true(&self) -> bool {
        self.0
            .iter()
            .filter(|c| c.type_ != READY)
            .all(Condition::is_true)
    }

    /// Project this collection onto a single condition of type `target`.
    ///
    /// When every sub-condition is true the result is true; otherwise it
    /// copies status, reason, severity and message of the most relevant
    /// non-true sub-condition. Returns `None` for an empty collection.
    pub fn mirror(&self, target: &str) -> Option<Condition> {
        if self.0.is_empty() {
            return None;
        }

        let worst = self
            .0
            .iter()
            .filter(|c| c.type_ != READY && !c.is_true())
            .min_by(|a, b| a.priority(b));

        let source = match worst {
            Some(c) => c,
            None => match self.get(READY) {
                Some(ready) if !self.0.iter().any(|c| c.type_ != READY) => ready,
                _ => {
                    let mut done = Condition::new_true(target, "Setup complete");
                    if let Some(ready) = self.get(READY).filter(|c| c.is_true()) {
                        done.message = ready.message.clone();
                        done.last_transition_time = ready.last_transition_time;
                    }
                    return Some(done);
                }
            },
        };

        Some(Condition {
            type_: target.to_string(),
            ..source.clone()
        })
    }

    /// Recompute `Ready` from the sub-conditions
    pub fn aggregate_ready(&mut self) {
        if self.all_sub_conditions_true() {
            self.mark_true(READY, "Setup complete");
            return;
        }

        self.mark_unknown(READY, Reason::Init, "Setup started");
        if let Some(mirrored) = self.mirror(READY) {
            self.set(mirrored);
        }
    }
}

impl<'a> IntoIterator for &'a Conditions {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
