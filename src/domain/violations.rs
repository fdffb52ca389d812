//! Core domain models for layering violations and check results
//!
//! Architecture: Rich Domain Models - Violations are entities with behavior, not just data
//! - A Violation names the offending unit, the referenced unit and the rule it breaks
//! - CheckReport acts as an aggregate root managing violations, warnings and counters
//! - "Nothing was checked" is a distinct outcome, never folded into "conformant"

use crate::domain::units::ReferenceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Severity levels for layering violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational findings
    Info,
    /// Findings that should be addressed but don't fail the check
    Warning,
    /// Findings that fail the check
    Error,
}

impl Severity {
    /// Whether this severity level should cause the check to fail
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Convert to string for display
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A disallowed direct reference from a restricted layer into a forbidden one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Rule that was broken
    pub rule_id: String,
    pub severity: Severity,
    /// Unit making the reference
    pub offending_unit: String,
    /// Group the offending unit belongs to
    pub offending_group: String,
    /// Unit being referenced
    pub referenced_unit: String,
    /// Group the referenced unit belongs to
    pub referenced_group: String,
    /// Kind of the earliest reference to the referenced unit
    pub reference_kind: ReferenceKind,
    /// Every distinct way the offending unit references it, sorted
    #[serde(default)]
    pub reference_kinds: Vec<ReferenceKind>,
    /// Source file of the offending unit, when known
    pub file_path: Option<PathBuf>,
    /// Line (1-indexed) of the reference, or of the offending unit
    pub line_number: Option<u32>,
    /// The rule's reason, shown to whoever has to fix it
    pub message: String,
    /// When this violation was detected
    pub detected_at: DateTime<Utc>,
}

impl Violation {
    /// Create a new violation
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        offending_unit: impl Into<String>,
        referenced_unit: impl Into<String>,
        reference_kind: ReferenceKind,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            offending_unit: offending_unit.into(),
            offending_group: String::new(),
            referenced_unit: referenced_unit.into(),
            referenced_group: String::new(),
            reference_kind,
            reference_kinds: vec![reference_kind],
            file_path: None,
            line_number: None,
            message: String::new(),
            detected_at: Utc::now(),
        }
    }

    /// Record which groups both ends fell into
    pub fn with_groups(mut self, offending: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.offending_group = offending.into();
        self.referenced_group = referenced.into();
        self
    }

    /// Set file and line position
    pub fn with_location(mut self, file: Option<PathBuf>, line: Option<u32>) -> Self {
        self.file_path = file;
        self.line_number = line;
        self
    }

    /// Record all reference kinds behind this pair; the primary kind is always kept
    pub fn with_reference_kinds(mut self, kinds: impl IntoIterator<Item = ReferenceKind>) -> Self {
        self.reference_kinds = kinds.into_iter().chain([self.reference_kind]).collect();
        self.reference_kinds.sort();
        self.reference_kinds.dedup();
        self
    }

    /// Reference kinds joined for display, e.g. `field, parameter`
    pub fn kinds_display(&self) -> String {
        self.reference_kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Whether this violation is blocking
    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }

    /// The (offending, referenced) pair identifying this violation
    pub fn pair(&self) -> (&str, &str) {
        (&self.offending_unit, &self.referenced_unit)
    }

    /// Location as `file:line`, if any part is known
    pub fn location(&self) -> Option<String> {
        match (&self.file_path, self.line_number) {
            (Some(file), Some(line)) => Some(format!("{}:{line}", file.display())),
            (Some(file), None) => Some(file.display().to_string()),
            (None, Some(line)) => Some(format!("line {line}")),
            (None, None) => None,
        }
    }

    /// Format violation for display
    pub fn format_display(&self) -> String {
        let location = self.location().map(|l| format!(" ({l})")).unwrap_or_default();

        format!(
            "{} -> {} [{}] via {}{}: {}",
            self.offending_unit,
            self.referenced_unit,
            self.severity.as_str(),
            self.kinds_display(),
            location,
            self.message
        )
    }
}

/// Configuration-level findings that are not violations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckWarning {
    /// The snapshot contained no units at all
    EmptySnapshot { root: String },
    /// Units exist, but none under the configured root namespace
    RootMatchesNothing { root: String, units: usize },
    /// A configured group matched no unit in scope
    EmptyGroup { group: String },
    /// A source file could not be parsed and was left out
    UnparsedFile { file: PathBuf, message: String },
}

impl CheckWarning {
    /// Whether this warning means the check had nothing to look at
    pub fn voids_check(&self) -> bool {
        matches!(self, Self::EmptySnapshot { .. } | Self::RootMatchesNothing { .. })
    }

    pub fn format_display(&self) -> String {
        match self {
            Self::EmptySnapshot { root } => {
                format!("Snapshot for root namespace '{root}' contains no units; nothing was checked")
            }
            Self::RootMatchesNothing { root, units } => format!(
                "Root namespace '{root}' matches none of the {units} units in the snapshot; nothing was checked"
            ),
            Self::EmptyGroup { group } => format!("Group '{group}' matches no unit in scope"),
            Self::UnparsedFile { file, message } => {
                format!("Skipped unparseable file {}: {message}", file.display())
            }
        }
    }
}

/// Overall outcome of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Units were checked and no blocking violation was found
    Conformant,
    /// At least one blocking violation was found
    NonConformant,
    /// The snapshot had no units in scope
    NothingChecked,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conformant => "conformant",
            Self::NonConformant => "non_conformant",
            Self::NothingChecked => "nothing_checked",
        }
    }
}

/// Summary statistics for a check report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckSummary {
    /// Units in the snapshot, before scoping
    pub total_units: usize,
    /// Units under the root namespace and admitted by the test policy
    pub units_in_scope: usize,
    /// Units left out because they are test code
    pub test_units_excluded: usize,
    /// Units that belong to a rule's source groups
    pub units_checked: usize,
    /// References inspected on checked units
    pub references_inspected: usize,
    /// Number of violations by severity level
    pub violations_by_severity: ViolationCounts,
    /// Total execution time in milliseconds
    pub execution_time_ms: u64,
    /// Timestamp when the check was performed
    pub checked_at: DateTime<Utc>,
}

/// Count of violations by severity level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl ViolationCounts {
    /// Total number of violations across all severities
    pub fn total(&self) -> usize {
        self.error + self.warning + self.info
    }

    /// Whether there are any blocking violations
    pub fn has_blocking(&self) -> bool {
        self.error > 0
    }

    /// Add a violation to the counts
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Complete result of one check: violations, warnings and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub root: String,
    /// All violations found, in stable order once sorted
    pub violations: Vec<Violation>,
    pub warnings: Vec<CheckWarning>,
    pub summary: CheckSummary,
    /// Fingerprint of the snapshot that was checked
    pub snapshot_fingerprint: Option<String>,
    /// Fingerprint of the configuration used
    pub config_fingerprint: Option<String>,
}

impl CheckReport {
    /// Create a new empty report
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            violations: Vec::new(),
            warnings: Vec::new(),
            summary: CheckSummary {
                checked_at: Utc::now(),
                ..Default::default()
            },
            snapshot_fingerprint: None,
            config_fingerprint: None,
        }
    }

    /// Add a violation to the report
    pub fn add_violation(&mut self, violation: Violation) {
        self.summary.violations_by_severity.add(violation.severity);
        self.violations.push(violation);
    }

    pub fn add_warning(&mut self, warning: CheckWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Whether the report contains any violations
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Whether the report contains blocking violations (errors)
    pub fn has_errors(&self) -> bool {
        self.summary.violations_by_severity.has_blocking()
    }

    /// Whether any unit was actually checked
    pub fn checked_anything(&self) -> bool {
        !self.warnings.iter().any(CheckWarning::voids_check)
    }

    pub fn status(&self) -> CheckStatus {
        if !self.checked_anything() {
            CheckStatus::NothingChecked
        } else if self.has_errors() {
            CheckStatus::NonConformant
        } else {
            CheckStatus::Conformant
        }
    }

    /// Conformant means something was checked and nothing blocking was found
    pub fn is_conformant(&self) -> bool {
        self.status() == CheckStatus::Conformant
    }

    /// Get violations of a specific severity
    pub fn violations_by_severity(&self, severity: Severity) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |v| v.severity == severity)
    }

    /// Set the execution time
    pub fn set_execution_time(&mut self, duration_ms: u64) {
        self.summary.execution_time_ms = duration_ms;
    }

    pub fn set_snapshot_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.snapshot_fingerprint = Some(fingerprint.into());
    }

    /// Set the configuration fingerprint
    pub fn set_config_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.config_fingerprint = Some(fingerprint.into());
    }

    /// Sort violations by offending unit, referenced unit, then rule for stable output
    pub fn sort_violations(&mut self) {
        self.violations.sort_by(|a, b| {
            a.offending_unit
                .cmp(&b.offending_unit)
                .then_with(|| a.referenced_unit.cmp(&b.referenced_unit))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
                .then_with(|| a.reference_kind.cmp(&b.reference_kind))
        });
    }

    /// Human-readable enumeration of every violation, one per line
    pub fn violation_listing(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("  - {}", v.format_display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Error types that can occur while configuring or running a check
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// Configuration is invalid, incomplete or self-contradictory
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// File could not be read or accessed
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Namespace or path pattern is malformed
    #[error("Pattern error: {message}")]
    Pattern { message: String },

    /// Source file could not be parsed
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// Snapshot could not be loaded or written
    #[error("Snapshot error: {message}")]
    Snapshot { message: String },

    /// A check found blocking violations
    #[error("Layering check failed with {count} violation(s):\n{details}")]
    NonConformant { count: usize, details: String },

    /// A check had no units in scope
    #[error("Layering check did not run: {message}")]
    NothingChecked { message: String },
}

impl LayerError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a pattern error
    pub fn pattern(message: impl Into<String>) -> Self {
        Self::Pattern {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create a snapshot error
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }
}

/// Result type for Layer Guard operations
pub type LayerResult<T> = Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(offending: &str, referenced: &str) -> Violation {
        Violation::new(
            "no_web",
            Severity::Error,
            offending,
            referenced,
            ReferenceKind::Field,
        )
    }

    #[test]
    fn test_violation_creation() {
        let violation = sample("shop::service::OrderService", "shop::web::OrderController")
            .with_groups("service", "web")
            .with_location(Some(PathBuf::from("src/service.rs")), Some(12))
            .with_message("Services should not depend on web layer");

        assert_eq!(violation.pair(), ("shop::service::OrderService", "shop::web::OrderController"));
        assert_eq!(violation.location().as_deref(), Some("src/service.rs:12"));
        assert!(violation.is_blocking());
        assert!(violation.format_display().contains("via field"));
    }

    #[test]
    fn test_report_status() {
        let mut report = CheckReport::new("shop");
        assert_eq!(report.status(), CheckStatus::Conformant);

        report.add_violation(sample("shop::service::A", "shop::web::B"));
        assert_eq!(report.status(), CheckStatus::NonConformant);
        assert!(!report.is_conformant());
    }

    #[test]
    fn test_nothing_checked_is_not_conformant() {
        let mut report = CheckReport::new("shop");
        report.add_warning(CheckWarning::EmptySnapshot { root: "shop".to_string() });

        assert_eq!(report.status(), CheckStatus::NothingChecked);
        assert!(!report.is_conformant());
        assert!(!report.checked_anything());
    }

    #[test]
    fn test_non_voiding_warnings_keep_status() {
        let mut report = CheckReport::new("shop");
        report.add_warning(CheckWarning::EmptyGroup { group: "web".to_string() });
        report.add_warning(CheckWarning::EmptyGroup { group: "web".to_string() });

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.status(), CheckStatus::Conformant);
    }

    #[test]
    fn test_sort_violations() {
        let mut report = CheckReport::new("shop");
        report.add_violation(sample("shop::service::B", "shop::web::X"));
        report.add_violation(sample("shop::repository::A", "shop::web::Y"));
        report.add_violation(sample("shop::repository::A", "shop::web::X"));
        report.sort_violations();

        let pairs: Vec<_> = report.violations.iter().map(Violation::pair).collect();
        assert_eq!(
            pairs,
            vec![
                ("shop::repository::A", "shop::web::X"),
                ("shop::repository::A", "shop::web::Y"),
                ("shop::service::B", "shop::web::X"),
            ]
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Error.is_blocking());
        assert!(!Severity::Warning.is_blocking());
    }
}
