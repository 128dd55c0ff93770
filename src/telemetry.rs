//! Structured telemetry for protocol violations and broken invariants.
//!
//! Instead of logging ad hoc, the crate reports problems as structured
//! [`Violation`] records that can be:
//!
//! - Logged via tracing (the default, [`TracingObserver`])
//! - Collected programmatically for testing ([`CollectingObserver`])
//! - Sent to custom observers (metrics, alerting, etc.)
//!
//! A session forwards its violations to the observer configured through
//! [`SessionBuilder::with_observer`](crate::SessionBuilder::with_observer).
//!
//! # Example
//!
//! ```
//! use lockstep_sync::telemetry::CollectingObserver;
//! use lockstep_sync::{SessionBuilder, Slot};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let mut session = SessionBuilder::new()
//!     .with_num_players(2)
//!     .with_local_slot(Slot::new(0))
//!     .with_observer(observer.clone())
//!     .build()
//!     .unwrap();
//!
//! // A packet without a trailing NUL byte is dropped and reported.
//! let packet = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
//! assert!(session.handle_packet(&packet).is_err());
//! assert_eq!(observer.len(), 1);
//! ```

use crate::Cycle;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity of a violation.
///
/// Severities are ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Unexpected but recoverable; the offending input was discarded.
    Warning,
    /// Serious issue; behavior may be degraded.
    Error,
    /// A core invariant is broken; state may be corrupted.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of violations, one per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Input history misuse or corruption.
    ///
    /// Examples:
    /// - Access to a compacted cycle
    /// - Compaction with an under-filled remote history
    History,
    /// A remote slot's confirmed cycle was asked to move backwards.
    Confirmation,
    /// A packet from a peer was malformed or addressed incorrectly.
    NetworkProtocol,
    /// Local and remote state checksums disagree.
    ChecksumMismatch,
    /// A session was built from a configuration that failed validation.
    Configuration,
    /// A runtime invariant check failed.
    ///
    /// Only checked in debug builds or when the `paranoid` feature is enabled.
    Invariant,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Confirmation => "confirmation",
            Self::NetworkProtocol => "network_protocol",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::Configuration => "configuration",
            Self::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializes `Option<Cycle>` as an integer or `null`.
mod cycle_serializer {
    use crate::Cycle;
    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(cycle: &Option<Cycle>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match cycle {
            None => serializer.serialize_none(),
            Some(c) if c.is_null() => serializer.serialize_none(),
            Some(c) => serializer.serialize_i32(c.as_i32()),
        }
    }
}

/// A recorded violation.
///
/// ```
/// use lockstep_sync::telemetry::{Violation, ViolationKind, ViolationSeverity};
/// use lockstep_sync::Cycle;
///
/// let violation = Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::ChecksumMismatch,
///     "desync",
///     "codec.rs:1",
/// )
/// .with_cycle(Cycle::new(99))
/// .with_context("slot", "1");
/// assert!(violation.to_string().contains("cycle=99"));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The subsystem where the violation occurred.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// The simulation cycle concerned, if any.
    #[serde(serialize_with = "cycle_serializer::serialize")]
    pub cycle: Option<Cycle>,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            cycle: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the cycle concerned.
    #[must_use]
    pub fn with_cycle(mut self, cycle: Cycle) -> Self {
        self.cycle = Some(cycle);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Serializes this violation to a pretty-printed JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json_pretty(&self) -> Option<String> {
        serde_json::to_string_pretty(self).ok()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(cycle) = self.cycle {
            write!(f, ", cycle={cycle}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Observes violations.
///
/// Implementations should return quickly; they are called on the simulation thread.
pub trait ViolationObserver: Send + Sync {
    /// Called when a violation is detected.
    fn on_violation(&self, violation: &Violation);
}

/// Default observer: logs violations through `tracing`.
///
/// `Warning` maps to `tracing::warn!`, `Error` and `Critical` to `tracing::error!`.
/// Severity, kind, location, cycle and context are emitted as structured fields.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn format_cycle(cycle: Option<Cycle>) -> String {
        match cycle {
            Some(c) if !c.is_null() => c.as_i32().to_string(),
            _ => "null".to_owned(),
        }
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let cycle_str = Self::format_cycle(violation.cycle);

        let context_str = if violation.context.is_empty() {
            "{}".to_owned()
        } else {
            let pairs: Vec<String> = violation
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        };

        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(
                    severity,
                    kind,
                    location,
                    cycle = %cycle_str,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
            ViolationSeverity::Error | ViolationSeverity::Critical => {
                tracing::error!(
                    severity,
                    kind,
                    location,
                    cycle = %cycle_str,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
        }
    }
}

/// Observer that collects violations, mostly for tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty violation list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected violations.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Returns the number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns true if no violations have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Checks if any violation of the specified kind has been collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Returns all violations matching the specified kind.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Clears all collected violations.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Forwards violations to several observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn ViolationObserver>) {
        self.observers.push(observer);
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &Violation) {
        for observer in &self.observers {
            observer.on_violation(violation);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Reports a violation to an optional observer, falling back to [`TracingObserver`].
pub fn report_to_observer(observer: Option<&Arc<dyn ViolationObserver>>, violation: &Violation) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation through [`TracingObserver`], tagging it with the call site.
///
/// ```
/// use lockstep_sync::{report_violation, telemetry::{ViolationKind, ViolationSeverity}};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::History,
///     "cycle {} already compacted", 3);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Reports a violation through an `Option<Arc<dyn ViolationObserver>>`.
///
/// Falls back to [`TracingObserver`] when the observer is `None`.
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $violation:expr) => {{
        $crate::telemetry::report_to_observer($observer.as_ref(), &$violation);
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// Result of a failed invariant check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    /// Name of the type whose invariant was violated.
    pub type_name: &'static str,
    /// Description of the violated invariant.
    pub invariant: String,
    /// Additional diagnostic context.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Adds additional details to the violation.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Types that maintain internal invariants.
pub trait InvariantChecker {
    /// Returns `Ok(())` if all invariants hold, or the first broken one.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Checks invariants in debug builds (or with the `paranoid` feature) and reports failures.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($expr:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{}",
                violation
            );
        }
    }};

    ($expr:expr, $context:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} [context: {}]",
                violation,
                $context
            );
        }
    }};
}

/// No-op version for release builds without `paranoid` feature.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($expr:expr) => {{}};
    ($expr:expr, $context:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn test_violation_kind_as_str() {
        assert_eq!(ViolationKind::History.as_str(), "history");
        assert_eq!(ViolationKind::NetworkProtocol.as_str(), "network_protocol");
        assert_eq!(ViolationKind::ChecksumMismatch.to_string(), "checksum_mismatch");
    }

    #[test]
    fn test_violation_display_includes_cycle_and_context() {
        let violation = Violation::new(
            ViolationSeverity::Error,
            ViolationKind::NetworkProtocol,
            "bad packet",
            "codec.rs:10",
        )
        .with_cycle(Cycle::new(7))
        .with_context("slot", "1");
        let text = violation.to_string();
        assert!(text.starts_with("[error/network_protocol] bad packet"));
        assert!(text.contains("cycle=7"));
        assert!(text.contains("slot"));
    }

    #[test]
    fn test_collecting_observer() {
        let observer = CollectingObserver::new();
        assert!(observer.is_empty());
        observer.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::History,
            "first",
            "test.rs:1",
        ));
        observer.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::ChecksumMismatch,
            "second",
            "test.rs:2",
        ));
        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::History));
        assert_eq!(
            observer
                .violations_of_kind(ViolationKind::ChecksumMismatch)
                .len(),
            1
        );
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn test_composite_forwards_to_all() {
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());
        let mut composite = CompositeObserver::new();
        composite.add(first.clone());
        composite.add(second.clone());
        composite.on_violation(&Violation::new(
            ViolationSeverity::Critical,
            ViolationKind::Invariant,
            "broken",
            "test.rs:3",
        ));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_report_to_observer_prefers_given_observer() {
        let collecting = Arc::new(CollectingObserver::new());
        let observer: Arc<dyn ViolationObserver> = collecting.clone();
        let violation = Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::Configuration,
            "config",
            "test.rs:4",
        );
        report_to_observer(Some(&observer), &violation);
        report_to_observer(None, &violation);
        assert_eq!(collecting.len(), 1);
    }

    #[test]
    fn test_invariant_violation_display() {
        let violation =
            InvariantViolation::new("HistoryStore", "slot lengths diverge").with_details("slot=2");
        assert_eq!(
            violation.to_string(),
            "HistoryStore: slot lengths diverge (slot=2)"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_violation_to_json() {
        let violation = Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::ChecksumMismatch,
            "desync",
            "test.rs:5",
        )
        .with_cycle(Cycle::new(42));
        let json = violation.to_json().unwrap();
        assert!(json.contains(r#""severity":"warning""#));
        assert!(json.contains(r#""cycle":42"#));
    }
}
