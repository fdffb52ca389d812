//! Report generation with multiple output formats
//!
//! CDD Principle: Anti-Corruption Layer - Formatters translate domain objects to external formats
//! - CheckReport (domain) is converted to various external representations
//! - Each formatter encapsulates the rules for its specific output format
//! - "Nothing checked" is rendered as its own outcome in every format

use crate::domain::violations::{
    CheckReport, CheckStatus, LayerError, LayerResult, Severity, Violation,
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;

/// Supported output formats for check reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable format with colors and context
    Human,
    /// JSON format for programmatic consumption
    Json,
    /// JUnit XML format for CI/CD integration
    Junit,
    /// SARIF format for code scanning tools
    Sarif,
    /// GitHub Actions format for workflow integration
    GitHub,
}

impl OutputFormat {
    /// Get all available format names
    pub fn all_formats() -> &'static [&'static str] {
        &["human", "json", "junit", "sarif", "github"]
    }
}

impl FromStr for OutputFormat {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "junit" => Ok(Self::Junit),
            "sarif" => Ok(Self::Sarif),
            "github" => Ok(Self::GitHub),
            other => Err(LayerError::config(format!(
                "Unknown output format '{}'. Available: {}",
                other,
                Self::all_formats().join(", ")
            ))),
        }
    }
}

/// Options for customizing report output
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Whether to use colored output (for human format)
    pub use_colors: bool,
    /// Whether to show the reference kind and groups under each violation
    pub show_context: bool,
    /// Maximum number of violations to include
    pub max_violations: Option<usize>,
    /// Minimum severity level to include
    pub min_severity: Option<Severity>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            use_colors: true,
            show_context: true,
            max_violations: None,
            min_severity: None,
        }
    }
}

/// Main report formatter that dispatches to specific formatters
#[derive(Debug, Clone, Default)]
pub struct ReportFormatter {
    options: ReportOptions,
}

/// Violations selected for output, plus how many were cut by `max_violations`
struct Selection<'a> {
    violations: Vec<&'a Violation>,
    truncated: usize,
}

impl ReportFormatter {
    /// Create a new report formatter with options
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    /// Format a check report in the specified format
    pub fn format_report(&self, report: &CheckReport, format: OutputFormat) -> LayerResult<String> {
        let selection = self.select_violations(&report.violations);

        match format {
            OutputFormat::Human => Ok(self.format_human(report, &selection)),
            OutputFormat::Json => self.format_json(report, &selection),
            OutputFormat::Junit => Ok(self.format_junit(report, &selection)),
            OutputFormat::Sarif => self.format_sarif(report, &selection),
            OutputFormat::GitHub => Ok(self.format_github(report, &selection)),
        }
    }

    /// Write a formatted report to a writer
    pub fn write_report<W: Write>(
        &self,
        report: &CheckReport,
        format: OutputFormat,
        mut writer: W,
    ) -> LayerResult<()> {
        let formatted = self.format_report(report, format)?;
        writer.write_all(formatted.as_bytes())?;
        Ok(())
    }

    /// Filter violations based on report options
    fn select_violations<'a>(&self, violations: &'a [Violation]) -> Selection<'a> {
        let mut selected: Vec<&Violation> = violations
            .iter()
            .filter(|v| self.options.min_severity.map_or(true, |min| v.severity >= min))
            .collect();

        let mut truncated = 0;
        if let Some(max) = self.options.max_violations {
            truncated = selected.len().saturating_sub(max);
            selected.truncate(max);
        }

        Selection { violations: selected, truncated }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.options.use_colors {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    /// Format report in human-readable format
    fn format_human(&self, report: &CheckReport, selection: &Selection<'_>) -> String {
        let mut output = String::new();

        match report.status() {
            CheckStatus::NothingChecked => {
                output.push_str(&format!("⚠️  {}\n\n", self.paint("33", "Nothing was checked")));
            }
            _ if selection.violations.is_empty() => {
                output.push_str(&format!("✅ {}\n\n", self.paint("32", "No layering violations found")));
            }
            status => {
                let (icon, color) = match status {
                    CheckStatus::NonConformant => ("❌", "31"),
                    _ => ("⚠️ ", "33"),
                };
                output.push_str(&format!("{} {}\n\n", icon, self.paint(color, "Layering Violations Found")));
                self.push_violations(&mut output, &selection.violations);
            }
        }

        if selection.truncated > 0 {
            output.push_str(&format!("  ... and {} more violation(s) not shown\n\n", selection.truncated));
        }

        for warning in &report.warnings {
            output.push_str(&format!("⚠️  {}\n", self.paint("33", &warning.format_display())));
        }
        if !report.warnings.is_empty() {
            output.push('\n');
        }

        output.push_str(&self.format_summary(report));
        output
    }

    fn push_violations(&self, output: &mut String, violations: &[&Violation]) {
        // Group violations by file
        let mut by_file: BTreeMap<String, Vec<&Violation>> = BTreeMap::new();
        for violation in violations {
            let file = violation
                .file_path
                .as_ref()
                .map(|f| f.display().to_string())
                .unwrap_or_else(|| "<unknown location>".to_string());
            by_file.entry(file).or_default().push(violation);
        }

        for (file, file_violations) in by_file {
            output.push_str(&format!("📁 {file}\n"));

            for violation in file_violations {
                let severity_color = match violation.severity {
                    Severity::Error => "31",
                    Severity::Warning => "33",
                    Severity::Info => "36",
                };
                let position = violation
                    .line_number
                    .map(|line| line.to_string())
                    .unwrap_or_else(|| "?".to_string());

                output.push_str(&format!(
                    "  {} [{}] {} -> {}\n",
                    self.paint("2", &format!("{}:{}", position, violation.rule_id)),
                    self.paint(severity_color, violation.severity.as_str()),
                    violation.offending_unit,
                    violation.referenced_unit
                ));

                if self.options.show_context {
                    output.push_str(&format!(
                        "    {}\n",
                        self.paint(
                            "2",
                            &format!(
                                "│ {} reference, {} -> {}",
                                violation.kinds_display(),
                                violation.offending_group,
                                violation.referenced_group
                            )
                        )
                    ));
                }

                output.push_str(&format!("    {}\n\n", self.paint("32", &format!("💡 {}", violation.message))));
            }
        }
    }

    /// Format report in JSON format
    fn format_json(&self, report: &CheckReport, selection: &Selection<'_>) -> LayerResult<String> {
        let json_violations: Vec<JsonValue> = selection
            .violations
            .iter()
            .map(|v| {
                serde_json::json!({
                    "rule_id": v.rule_id,
                    "severity": v.severity.as_str(),
                    "offending_unit": v.offending_unit,
                    "offending_group": v.offending_group,
                    "referenced_unit": v.referenced_unit,
                    "referenced_group": v.referenced_group,
                    "reference_kind": v.reference_kind.as_str(),
                    "reference_kinds": v.reference_kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                    "file_path": v.file_path.as_ref().map(|f| f.display().to_string()),
                    "line_number": v.line_number,
                    "message": v.message,
                    "detected_at": v.detected_at.to_rfc3339()
                })
            })
            .collect();

        let warnings = serde_json::to_value(&report.warnings)
            .map_err(|e| LayerError::config(format!("JSON serialization failed: {e}")))?;

        let json_report = serde_json::json!({
            "root": report.root,
            "status": report.status().as_str(),
            "violations": json_violations,
            "truncated": selection.truncated,
            "warnings": warnings,
            "summary": {
                "total_units": report.summary.total_units,
                "units_in_scope": report.summary.units_in_scope,
                "test_units_excluded": report.summary.test_units_excluded,
                "units_checked": report.summary.units_checked,
                "references_inspected": report.summary.references_inspected,
                "violations_by_severity": {
                    "error": report.summary.violations_by_severity.error,
                    "warning": report.summary.violations_by_severity.warning,
                    "info": report.summary.violations_by_severity.info
                },
                "execution_time_ms": report.summary.execution_time_ms,
                "checked_at": report.summary.checked_at.to_rfc3339()
            },
            "snapshot_fingerprint": report.snapshot_fingerprint,
            "config_fingerprint": report.config_fingerprint
        });

        serde_json::to_string_pretty(&json_report)
            .map_err(|e| LayerError::config(format!("JSON serialization failed: {e}")))
    }

    /// Format report in JUnit XML format
    fn format_junit(&self, report: &CheckReport, selection: &Selection<'_>) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        let nothing_checked = report.status() == CheckStatus::NothingChecked;
        let total_tests = selection.violations.len().max(1);
        let failures = selection.violations.iter().filter(|v| v.is_blocking()).count();
        let errors = usize::from(nothing_checked);
        let execution_time = (report.summary.execution_time_ms as f64) / 1000.0;

        xml.push_str(&format!(
            "<testsuite name=\"layer-guard\" tests=\"{total_tests}\" failures=\"{failures}\" errors=\"{errors}\" time=\"{execution_time:.3}\">\n"
        ));

        if selection.violations.is_empty() {
            xml.push_str(&format!("  <testcase classname=\"layering\" name=\"{}\">\n", escape_xml(&report.root)));
            if nothing_checked {
                let message = report
                    .warnings
                    .iter()
                    .find(|w| w.voids_check())
                    .map(|w| w.format_display())
                    .unwrap_or_else(|| "Nothing was checked".to_string());
                xml.push_str(&format!("    <error message=\"{}\"/>\n", escape_xml(&message)));
            }
            xml.push_str("  </testcase>\n");
        }

        for violation in &selection.violations {
            xml.push_str(&format!(
                "  <testcase classname=\"{}\" name=\"{}\">\n",
                escape_xml(&violation.rule_id),
                escape_xml(&format!("{} -> {}", violation.offending_unit, violation.referenced_unit))
            ));

            if violation.is_blocking() {
                xml.push_str(&format!("    <failure message=\"{}\">\n", escape_xml(&violation.message)));
                if let Some(location) = violation.location() {
                    xml.push_str(&format!("      Location: {}\n", escape_xml(&location)));
                }
                xml.push_str(&format!("      Reference: {}\n", violation.kinds_display()));
                xml.push_str("    </failure>\n");
            }

            xml.push_str("  </testcase>\n");
        }

        xml.push_str("</testsuite>\n");
        xml
    }

    /// Format report in SARIF format
    fn format_sarif(&self, _report: &CheckReport, selection: &Selection<'_>) -> LayerResult<String> {
        let sarif_results: Vec<JsonValue> = selection
            .violations
            .iter()
            .map(|v| {
                let level = match v.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                    Severity::Info => "note",
                };

                let mut location = serde_json::json!({
                    "logicalLocations": [{
                        "fullyQualifiedName": v.offending_unit,
                        "kind": "type"
                    }]
                });
                if let Some(file) = &v.file_path {
                    location["physicalLocation"] = serde_json::json!({
                        "artifactLocation": {
                            "uri": file.display().to_string().replace('\\', "/")
                        },
                        "region": {
                            "startLine": v.line_number.unwrap_or(1)
                        }
                    });
                }

                serde_json::json!({
                    "ruleId": v.rule_id,
                    "level": level,
                    "message": {
                        "text": format!(
                            "{} references {} ({}): {}",
                            v.offending_unit,
                            v.referenced_unit,
                            v.kinds_display(),
                            v.message
                        )
                    },
                    "locations": [location]
                })
            })
            .collect();

        let sarif_report = serde_json::json!({
            "version": "2.1.0",
            "$schema": "https://json.schemastore.org/sarif-2.1.0.json",
            "runs": [{
                "tool": {
                    "driver": {
                        "name": "layer-guard",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                },
                "results": sarif_results
            }]
        });

        serde_json::to_string_pretty(&sarif_report)
            .map_err(|e| LayerError::config(format!("SARIF serialization failed: {e}")))
    }

    /// Format report for GitHub Actions
    fn format_github(&self, report: &CheckReport, selection: &Selection<'_>) -> String {
        let mut output = String::new();

        for violation in &selection.violations {
            let level = match violation.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Info => "notice",
            };

            let mut properties = Vec::new();
            if let Some(file) = &violation.file_path {
                properties.push(format!("file={}", file.display()));
            }
            if let Some(line) = violation.line_number {
                properties.push(format!("line={line}"));
            }
            properties.push(format!("title={}", violation.rule_id));

            output.push_str(&format!(
                "::{} {}::{} -> {}: {}\n",
                level,
                properties.join(","),
                violation.offending_unit,
                violation.referenced_unit,
                violation.message
            ));
        }

        for warning in &report.warnings {
            output.push_str(&format!("::warning title=layer-guard::{}\n", warning.format_display()));
        }

        output
    }

    /// Format the summary section
    fn format_summary(&self, report: &CheckReport) -> String {
        let counts = &report.summary.violations_by_severity;
        let execution_time = (report.summary.execution_time_ms as f64) / 1000.0;

        let mut parts = Vec::new();
        if counts.error > 0 {
            parts.push(self.paint("31", &format!("{} error{}", counts.error, plural(counts.error))));
        }
        if counts.warning > 0 {
            parts.push(self.paint("33", &format!("{} warning{}", counts.warning, plural(counts.warning))));
        }
        if counts.info > 0 {
            parts.push(self.paint("36", &format!("{} info", counts.info)));
        }
        if parts.is_empty() {
            parts.push(self.paint("32", "0 violations"));
        }

        format!(
            "📊 {} {} in {} of {} units ({:.1}s), status: {}\n",
            self.paint("1", "Summary:"),
            parts.join(", "),
            report.summary.units_checked,
            report.summary.total_units,
            execution_time,
            report.status().as_str()
        )
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
