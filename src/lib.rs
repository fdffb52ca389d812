//! Layer Guard - Static layering checks for Rust code bases
//!
//! Architecture: Clean Architecture - Library interface serves as the application layer
//! - Pure domain logic separated from parsing and output concerns
//! - Snapshots are built by a source scanner or loaded from JSON, then checked
//! - Harness API turns a non-conformant check into a failing test

pub mod analyzer;
pub mod config;
pub mod domain;
pub mod patterns;
pub mod report;

// Re-export main types for convenient access
pub use domain::units::{
    CodeUnit, NamespacePath, Reference, ReferenceKind, Snapshot, TestCodePolicy, UnitKind,
};
pub use domain::violations::{
    CheckReport, CheckStatus, CheckSummary, CheckWarning, LayerError, LayerResult, Severity,
    Violation,
};

pub use config::{ConfigBuilder, GroupConfig, LayerConfig, LayerRule};

pub use analyzer::{LayerDependencyChecker, RuleStats, ScanOptions, ScanOutcome, SnapshotSource};

pub use patterns::{NamespacePattern, PackageGroup};

pub use report::{OutputFormat, ReportFormatter, ReportOptions};

use std::path::Path;

/// Main entry point: builds snapshots and checks them against the configured rules
pub struct LayerGuard {
    checker: LayerDependencyChecker,
    report_formatter: ReportFormatter,
}

impl LayerGuard {
    /// Create a guard with the given configuration
    pub fn new_with_config(config: LayerConfig) -> LayerResult<Self> {
        let checker = LayerDependencyChecker::new(config)?;
        Ok(Self { checker, report_formatter: ReportFormatter::default() })
    }

    /// Create a guard with the default rule for `root`
    pub fn with_defaults(root: impl Into<String>, test_code: TestCodePolicy) -> LayerResult<Self> {
        Self::new_with_config(LayerConfig::with_defaults(root, test_code))
    }

    /// Create a guard loading configuration from file
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> LayerResult<Self> {
        let config = LayerConfig::load_from_file(path)?;
        Self::new_with_config(config)
    }

    /// Set custom report formatter
    pub fn with_report_formatter(mut self, formatter: ReportFormatter) -> Self {
        self.report_formatter = formatter;
        self
    }

    pub fn checker(&self) -> &LayerDependencyChecker {
        &self.checker
    }

    /// Build the dependency snapshot for a crate directory, source file or JSON snapshot
    pub fn build_snapshot<P: AsRef<Path>>(
        &self,
        path: P,
        options: &ScanOptions,
    ) -> LayerResult<ScanOutcome> {
        self.checker.build_snapshot(path.as_ref(), options)
    }

    /// Scan `path` and check the resulting snapshot
    pub fn check_source<P: AsRef<Path>>(
        &self,
        path: P,
        options: &ScanOptions,
    ) -> LayerResult<CheckReport> {
        let outcome = self.build_snapshot(path, options)?;
        Ok(self.checker.check_outcome(&outcome))
    }

    /// Check an already built snapshot
    pub fn check_snapshot(&self, snapshot: &Snapshot) -> CheckReport {
        self.checker.check(snapshot)
    }

    /// Load a JSON snapshot and check it
    pub fn check_snapshot_file<P: AsRef<Path>>(&self, path: P) -> LayerResult<CheckReport> {
        let snapshot = Snapshot::load_from_file(path)?;
        Ok(self.checker.check(&snapshot))
    }

    /// Format a check report for output
    pub fn format_report(&self, report: &CheckReport, format: OutputFormat) -> LayerResult<String> {
        self.report_formatter.format_report(report, format)
    }

    /// Get rule statistics
    pub fn rule_stats(&self) -> RuleStats {
        self.checker.rule_stats()
    }
}

/// Convenience function to check a crate directory with the default rule
pub fn check_crate<P: AsRef<Path>>(
    crate_dir: P,
    root: &str,
    test_code: TestCodePolicy,
) -> LayerResult<CheckReport> {
    let guard = LayerGuard::with_defaults(root, test_code)?;
    guard.check_source(crate_dir, &ScanOptions::default())
}

/// Test harness integration
///
/// These functions run a check and return an error unless the code base was
/// actually checked and found conformant, so a `#[test]` can simply `?` them.
pub mod harness {
    use super::*;

    /// Scan a crate directory and fail on any blocking violation or an empty check
    pub fn assert_layering<P: AsRef<Path>>(crate_dir: P, config: LayerConfig) -> LayerResult<CheckReport> {
        let guard = LayerGuard::new_with_config(config)?;
        let options = ScanOptions { fail_fast: true, ..Default::default() };
        enforce(guard.check_source(crate_dir, &options)?)
    }

    /// Check a prepared snapshot and fail on any blocking violation or an empty check
    pub fn assert_snapshot(snapshot: &Snapshot, config: LayerConfig) -> LayerResult<CheckReport> {
        let guard = LayerGuard::new_with_config(config)?;
        enforce(guard.check_snapshot(snapshot))
    }

    /// Turn a report's status into a result
    pub fn enforce(report: CheckReport) -> LayerResult<CheckReport> {
        match report.status() {
            CheckStatus::Conformant => Ok(report),
            CheckStatus::NonConformant => Err(LayerError::NonConformant {
                count: report.summary.violations_by_severity.error,
                details: report.violation_listing(),
            }),
            CheckStatus::NothingChecked => Err(LayerError::NothingChecked {
                message: report
                    .warnings
                    .iter()
                    .filter(|w| w.voids_check())
                    .map(CheckWarning::format_display)
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn layered_crate(service_body: &str) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write(root, "src/lib.rs", "pub mod repository;\npub mod service;\npub mod web;\n");
        write(root, "src/repository.rs", "pub struct OrderRepository;\n");
        write(root, "src/web.rs", "pub struct OrderController;\n");
        write(root, "src/service.rs", service_body);

        temp_dir
    }

    #[test]
    fn test_guard_creation() {
        let guard = LayerGuard::with_defaults("shop", TestCodePolicy::Exclude).unwrap();
        let stats = guard.rule_stats();

        assert_eq!(stats.enabled_rules, 1);
        assert_eq!(stats.groups, 3);
    }

    #[test]
    fn test_clean_crate_passes_harness() {
        let temp_dir = layered_crate(
            "use crate::repository::OrderRepository;\n\npub struct OrderService {\n    repo: OrderRepository,\n}\n",
        );

        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        let report = harness::assert_layering(temp_dir.path(), config).unwrap();

        assert!(report.is_conformant());
        assert!(report.summary.units_checked > 0);
    }

    #[test]
    fn test_violating_crate_fails_harness() {
        let temp_dir = layered_crate(
            "use crate::web::OrderController;\n\npub struct OrderService {\n    controller: OrderController,\n}\n",
        );

        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        let err = harness::assert_layering(temp_dir.path(), config).unwrap_err();

        match err {
            LayerError::NonConformant { count, details } => {
                assert_eq!(count, 2);
                assert!(details.contains("shop::service::OrderService -> shop::web::OrderController"));
                assert!(details.contains("shop::service -> shop::web::OrderController"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_field_and_parameter_of_one_type_are_one_violation() {
        let temp_dir = layered_crate(
            "pub struct OrderService {\n    controller: crate::web::OrderController,\n}\n\nimpl OrderService {\n    pub fn set(&mut self, controller: crate::web::OrderController) {\n        self.controller = controller;\n    }\n}\n",
        );

        let report = check_crate(temp_dir.path(), "shop", TestCodePolicy::Exclude).unwrap();

        assert_eq!(report.violations.len(), 1);
        let violation = &report.violations[0];
        assert_eq!(violation.pair(), ("shop::service::OrderService", "shop::web::OrderController"));
        assert_eq!(violation.reference_kinds, vec![ReferenceKind::Field, ReferenceKind::Parameter]);
        assert_eq!(violation.line_number, Some(2));
    }

    #[test]
    fn test_test_only_reference_follows_policy() {
        let temp_dir = layered_crate(
            "pub struct OrderService;\n\n#[cfg(test)]\nmod tests {\n    #[test]\n    fn renders() {\n        let _ = crate::web::OrderController;\n    }\n}\n",
        );

        let excluded = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        assert!(harness::assert_layering(temp_dir.path(), excluded).is_ok());

        let included = LayerConfig::with_defaults("shop", TestCodePolicy::Include);
        assert!(matches!(
            harness::assert_layering(temp_dir.path(), included),
            Err(LayerError::NonConformant { .. })
        ));
    }

    #[test]
    fn test_empty_crate_is_not_a_pass() {
        let temp_dir = TempDir::new().unwrap();
        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);

        let result = harness::assert_layering(temp_dir.path(), config);
        assert!(matches!(result, Err(LayerError::NothingChecked { .. })));
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let temp_dir = layered_crate("pub fn render() -> crate::web::OrderController {\n    crate::web::OrderController\n}\n");
        let guard = LayerGuard::with_defaults("shop", TestCodePolicy::Exclude).unwrap();

        let outcome = guard.build_snapshot(temp_dir.path(), &ScanOptions::default()).unwrap();
        let snapshot_path = temp_dir.path().join("snapshot.json");
        fs::write(&snapshot_path, outcome.snapshot.to_json().unwrap()).unwrap();

        let from_source = guard.check_snapshot(&outcome.snapshot);
        let from_file = guard.check_snapshot_file(&snapshot_path).unwrap();

        // Return type and body usage of one unit make a single violation
        assert_eq!(from_source.violations.len(), 1);
        assert_eq!(
            from_source.violations[0].reference_kinds,
            vec![ReferenceKind::ReturnType, ReferenceKind::Usage]
        );
        assert_eq!(from_source.snapshot_fingerprint, from_file.snapshot_fingerprint);
        assert_eq!(
            from_source.violations.iter().map(|v| v.pair()).collect::<Vec<_>>(),
            from_file.violations.iter().map(|v| v.pair()).collect::<Vec<_>>()
        );

        // The JSON file can stand in for the crate directory
        let via_build = guard.check_source(&snapshot_path, &ScanOptions::default()).unwrap();
        assert_eq!(via_build.violations.len(), 1);
    }

    #[test]
    fn test_assert_snapshot() {
        let snapshot = Snapshot::new(
            "shop",
            vec![
                CodeUnit::new("shop::repository::OrderRepository", UnitKind::Struct)
                    .references_to("shop::web::OrderController", ReferenceKind::Parameter),
                CodeUnit::new("shop::web::OrderController", UnitKind::Struct),
            ],
        );
        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);

        let err = harness::assert_snapshot(&snapshot, config).unwrap_err();
        assert!(err.to_string().contains("1 violation(s)"));
    }

    #[test]
    fn test_report_formatting() {
        let temp_dir = layered_crate("pub struct OrderService(crate::web::OrderController);\n");
        let report = check_crate(temp_dir.path(), "shop", TestCodePolicy::Exclude).unwrap();

        let guard = LayerGuard::with_defaults("shop", TestCodePolicy::Exclude)
            .unwrap()
            .with_report_formatter(ReportFormatter::new(ReportOptions {
                use_colors: false,
                ..Default::default()
            }));

        let human = guard.format_report(&report, OutputFormat::Human).unwrap();
        assert!(human.contains("Layering Violations Found"));

        let json = guard.format_report(&report, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["status"], "non_conformant");
    }
}
