//! Layer dependency checking over a dependency snapshot
//!
//! CDD Principle: Domain Services - The checker evaluates layering rules against a Snapshot
//! - Compiles groups and rules once, rejecting overlapping groups at construction
//! - Scopes units by root namespace and test-code policy before any rule runs
//! - Produces a deterministic, sorted CheckReport without touching the snapshot

pub mod rust;

use crate::analyzer::rust::RustSourceScanner;
use crate::config::{LayerConfig, LayerRule};
use crate::domain::units::{CodeUnit, NamespacePath, Reference, Snapshot, TestCodePolicy};
use crate::domain::violations::{
    CheckReport, CheckWarning, LayerError, LayerResult, Severity, Violation,
};
use crate::patterns::{PackageGroup, PathFilter};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;

/// Options for customizing snapshot construction from source
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Whether to parse files in parallel
    pub parallel: bool,
    /// Whether an unparseable file aborts the scan
    pub fail_fast: bool,
    /// Additional paths to exclude (temporary)
    pub exclude_patterns: Vec<String>,
    /// Whether to ignore .layerguardignore files
    pub ignore_ignore_files: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            fail_fast: false,
            exclude_patterns: Vec::new(),
            ignore_ignore_files: false,
        }
    }
}

/// A snapshot together with the findings made while building it
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub snapshot: Snapshot,
    /// Files that scanned with problems, e.g. parse failures
    pub warnings: Vec<CheckWarning>,
    pub files_scanned: usize,
}

/// Trait for anything that can produce a dependency snapshot from a path
pub trait SnapshotSource {
    /// Build a snapshot rooted at `root` from `path`
    fn build_snapshot(&self, path: &Path, root: &str, options: &ScanOptions)
        -> LayerResult<ScanOutcome>;

    /// Check if this source understands the given path
    fn handles_path(&self, path: &Path) -> bool;
}

/// Reads a snapshot previously exported as JSON
#[derive(Debug, Default)]
pub struct JsonSnapshotFile;

impl SnapshotSource for JsonSnapshotFile {
    fn build_snapshot(
        &self,
        path: &Path,
        root: &str,
        _options: &ScanOptions,
    ) -> LayerResult<ScanOutcome> {
        let snapshot = Snapshot::load_from_file(path)?;
        if snapshot.root != root {
            tracing::warn!(
                "Snapshot {} was built for root '{}', checking against '{}'",
                path.display(),
                snapshot.root,
                root
            );
        }

        Ok(ScanOutcome { snapshot, warnings: Vec::new(), files_scanned: 1 })
    }

    fn handles_path(&self, path: &Path) -> bool {
        path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    id: String,
    severity: Severity,
    because: String,
    sources: Vec<String>,
    forbidden: Vec<String>,
}

impl From<&LayerRule> for CompiledRule {
    fn from(rule: &LayerRule) -> Self {
        Self {
            id: rule.id.clone(),
            severity: rule.severity,
            because: rule.because.clone(),
            sources: rule.sources.clone(),
            forbidden: rule.forbidden.clone(),
        }
    }
}

/// Checks that units in restricted groups never reference units in forbidden groups
pub struct LayerDependencyChecker {
    config: LayerConfig,
    root: NamespacePath,
    groups: BTreeMap<String, PackageGroup>,
    rules: Vec<CompiledRule>,
}

impl LayerDependencyChecker {
    /// Create a checker, validating the configuration first
    pub fn new(config: LayerConfig) -> LayerResult<Self> {
        config.validate()?;

        let groups = config.compile_groups()?;
        let rules = config.enabled_rules().map(CompiledRule::from).collect();

        Ok(Self {
            root: NamespacePath::parse(&config.root),
            config,
            groups,
            rules,
        })
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn test_code(&self) -> TestCodePolicy {
        self.config.test_code
    }

    /// Name of the first group in `names` claiming `namespace`
    fn group_of<'a>(&self, names: &'a [String], namespace: &NamespacePath) -> Option<&'a str> {
        names
            .iter()
            .find(|name| self.groups.get(*name).is_some_and(|g| g.matches(namespace)))
            .map(String::as_str)
    }

    /// Run every enabled rule over `snapshot`
    pub fn check(&self, snapshot: &Snapshot) -> CheckReport {
        let start_time = Instant::now();
        let mut report = CheckReport::new(self.config.root.clone());
        report.set_config_fingerprint(self.config.fingerprint());
        report.set_snapshot_fingerprint(snapshot.fingerprint());
        report.summary.total_units = snapshot.len();

        if snapshot.is_empty() {
            tracing::warn!("Snapshot for '{}' contains no units", self.config.root);
            report.add_warning(CheckWarning::EmptySnapshot { root: self.config.root.clone() });
            report.set_execution_time(start_time.elapsed().as_millis() as u64);
            return report;
        }

        let under_root = snapshot.units_under(&self.root).count();

        if under_root == 0 {
            tracing::warn!(
                "No unit of {} lives under root namespace '{}'",
                snapshot.len(),
                self.config.root
            );
            report.add_warning(CheckWarning::RootMatchesNothing {
                root: self.config.root.clone(),
                units: snapshot.len(),
            });
            report.set_execution_time(start_time.elapsed().as_millis() as u64);
            return report;
        }

        let in_scope: Vec<&CodeUnit> =
            snapshot.units_in_scope(&self.root, self.config.test_code).collect();

        report.summary.units_in_scope = in_scope.len();
        report.summary.test_units_excluded = under_root - in_scope.len();

        self.warn_about_empty_groups(&in_scope, &mut report);

        let index: HashMap<&str, &CodeUnit> = snapshot.index();
        let mut checked_units: BTreeSet<&str> = BTreeSet::new();

        for rule in &self.rules {
            for unit in &in_scope {
                let Some(source_group) = self.group_of(&rule.sources, &unit.namespace) else {
                    continue;
                };

                if checked_units.insert(unit.name.as_str()) {
                    report.summary.references_inspected += unit.references.len();
                }

                for violation in self.check_unit(rule, source_group, unit, &index) {
                    report.add_violation(violation);
                }
            }
        }

        report.summary.units_checked = checked_units.len();
        report.sort_violations();
        report.set_execution_time(start_time.elapsed().as_millis() as u64);

        tracing::info!(
            "Checked {} of {} units under '{}': {} violation(s)",
            report.summary.units_checked,
            report.summary.total_units,
            self.config.root,
            report.violations.len()
        );

        report
    }

    /// Direct references from one source unit into the rule's forbidden groups.
    ///
    /// One violation per referenced unit, however many ways it is referenced.
    fn check_unit(
        &self,
        rule: &CompiledRule,
        source_group: &str,
        unit: &CodeUnit,
        index: &HashMap<&str, &CodeUnit>,
    ) -> Vec<Violation> {
        let mut by_target: BTreeMap<&str, Vec<&Reference>> = BTreeMap::new();
        for reference in &unit.references {
            if reference.target != unit.name {
                by_target.entry(reference.target.as_str()).or_default().push(reference);
            }
        }

        let mut violations = Vec::new();

        for (target, references) in by_target {
            let target_namespace = match index.get(target) {
                // Excluded test code is not part of the checked graph
                Some(target) if !self.config.test_code.admits(target) => continue,
                Some(target) => target.namespace.clone(),
                None => NamespacePath::enclosing(target),
            };

            let Some(forbidden_group) = self.group_of(&rule.forbidden, &target_namespace) else {
                continue;
            };

            // Earliest known line locates the violation
            let Some(primary) = references
                .iter()
                .min_by_key(|r| (r.line.is_none(), r.line, r.kind))
            else {
                continue;
            };

            tracing::debug!(
                "{} ({}) -> {} ({}) breaks '{}' via {} reference(s)",
                unit.name,
                source_group,
                target,
                forbidden_group,
                rule.id,
                references.len()
            );

            violations.push(
                Violation::new(rule.id.clone(), rule.severity, unit.name.clone(), target, primary.kind)
                    .with_reference_kinds(references.iter().map(|r| r.kind))
                    .with_groups(source_group, forbidden_group)
                    .with_location(unit.file.clone(), primary.line.or(unit.line))
                    .with_message(rule.because.clone()),
            );
        }

        violations
    }

    fn warn_about_empty_groups(&self, in_scope: &[&CodeUnit], report: &mut CheckReport) {
        let used: BTreeSet<&str> = self
            .rules
            .iter()
            .flat_map(|rule| rule.sources.iter().chain(&rule.forbidden))
            .map(String::as_str)
            .collect();

        for name in used {
            let Some(group) = self.groups.get(name) else {
                continue;
            };
            if !in_scope.iter().any(|unit| group.matches(&unit.namespace)) {
                tracing::debug!("Group '{}' matches no unit in scope", name);
                report.add_warning(CheckWarning::EmptyGroup { group: name.to_string() });
            }
        }
    }

    /// Check a snapshot and attach the warnings collected while building it
    pub fn check_outcome(&self, outcome: &ScanOutcome) -> CheckReport {
        let mut report = self.check(&outcome.snapshot);
        for warning in &outcome.warnings {
            report.add_warning(warning.clone());
        }
        report
    }

    /// Get configuration fingerprint for report metadata
    pub fn config_fingerprint(&self) -> String {
        self.config.fingerprint()
    }

    /// Get statistics about the configured rules and groups
    pub fn rule_stats(&self) -> RuleStats {
        let mut stats = RuleStats {
            groups: self.groups.len(),
            patterns: self.groups.values().map(|g| g.patterns().len()).sum(),
            ..Default::default()
        };

        for rule in &self.config.rules {
            if rule.enabled {
                stats.enabled_rules += 1;
                match rule.severity {
                    Severity::Error => stats.error_rules += 1,
                    Severity::Warning => stats.warning_rules += 1,
                    Severity::Info => stats.info_rules += 1,
                }
            } else {
                stats.disabled_rules += 1;
            }
        }

        stats
    }

    /// Which groups claim a namespace, for the `explain` command
    pub fn groups_matching(&self, namespace: &NamespacePath) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, group)| group.matches(namespace))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Path filter from configuration plus the per-run exclusions in `options`
    pub fn path_filter(&self, options: &ScanOptions) -> LayerResult<PathFilter> {
        let ignore_file = match self.config.paths.ignore_file.as_deref() {
            Some("") | None => None,
            Some(name) => Some(name.to_string()),
        };

        let mut filter = PathFilter::new(self.config.paths.patterns.clone(), ignore_file)
            .map_err(|e| LayerError::config(format!("Failed to create path filter: {e}")))?;
        for pattern in &options.exclude_patterns {
            filter.add_pattern(pattern)?;
        }

        if options.ignore_ignore_files {
            filter = filter.without_ignore_files();
        }
        Ok(filter)
    }

    /// Build a snapshot for `path` under the configured root
    ///
    /// A `.json` file is loaded as an exported snapshot; anything else is scanned as Rust source.
    pub fn build_snapshot(&self, path: &Path, options: &ScanOptions) -> LayerResult<ScanOutcome> {
        if !path.exists() {
            return Err(LayerError::config(format!("Path does not exist: {}", path.display())));
        }

        let json = JsonSnapshotFile;
        let source: Box<dyn SnapshotSource> = if json.handles_path(path) {
            Box::new(json)
        } else {
            Box::new(RustSourceScanner::new(self.path_filter(options)?))
        };

        source.build_snapshot(path, &self.config.root, options)
    }
}

/// Statistics about configured rules
#[derive(Debug, Default)]
pub struct RuleStats {
    pub enabled_rules: usize,
    pub disabled_rules: usize,
    pub error_rules: usize,
    pub warning_rules: usize,
    pub info_rules: usize,
    pub groups: usize,
    pub patterns: usize,
}

impl RuleStats {
    pub fn total_rules(&self) -> usize {
        self.enabled_rules + self.disabled_rules
    }
}
