//! Configuration loading and management for Layer Guard
//!
//! Architecture: Anti-Corruption Layer - Configuration translates external YAML formats
//! - Raw YAML structures are converted to clean domain objects
//! - The default layering rule is embedded in the domain, not infrastructure
//! - Validation rejects contradictory setups before any analysis runs

use crate::domain::units::TestCodePolicy;
use crate::domain::violations::{LayerError, LayerResult, Severity};
use crate::patterns::path_filter::DEFAULT_IGNORE_FILE;
use crate::patterns::{is_identifier, PackageGroup};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Configuration file names looked up in the working directory
pub const DEFAULT_CONFIG_FILES: &[&str] =
    &["layer_guard.yaml", "layer_guard.yml", ".layer_guard.yaml"];

/// Id of the rule shipped by default
pub const DEFAULT_RULE_ID: &str = "services_and_repositories_must_not_depend_on_web";

/// Main configuration structure for Layer Guard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Configuration format version
    pub version: String,
    /// Root namespace all checked units live under
    pub root: String,
    /// Whether test code takes part in the check. Deliberately has no default.
    pub test_code: TestCodePolicy,
    /// Source file filtering
    #[serde(default)]
    pub paths: PathConfig,
    /// Named namespace groups, e.g. `service`, `repository`, `web`
    pub groups: BTreeMap<String, GroupConfig>,
    /// Dependency direction rules over those groups
    pub rules: Vec<LayerRule>,
}

/// Source file filtering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Include/exclude patterns (gitignore-style), relative to the scanned root
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Optional per-directory ignore file name
    #[serde(default)]
    pub ignore_file: Option<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["target/".to_string(), "**/*.generated.rs".to_string()],
            ignore_file: Some(DEFAULT_IGNORE_FILE.to_string()),
        }
    }
}

/// One named group of namespaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Namespace patterns; a namespace matching any of them is in the group
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A forbidden dependency direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRule {
    /// Unique identifier for this rule
    pub id: String,
    /// Groups whose units are restricted
    pub sources: Vec<String>,
    /// Groups those units must not reference
    pub forbidden: Vec<String>,
    /// Reason shown with every violation
    pub because: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl LayerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LayerResult<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            LayerError::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            LayerError::config(format!(
                "Failed to parse config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from string content
    pub fn load_from_str(content: &str) -> LayerResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| LayerError::config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Look for one of the default config files in `dir`
    pub fn discover<P: AsRef<Path>>(dir: P) -> LayerResult<Option<Self>> {
        for name in DEFAULT_CONFIG_FILES {
            let candidate = dir.as_ref().join(name);
            if candidate.is_file() {
                tracing::debug!("Using configuration {}", candidate.display());
                return Self::load_from_file(candidate).map(Some);
            }
        }
        Ok(None)
    }

    /// Default configuration: one rule keeping service and repository code off the web layer.
    ///
    /// Test scoping has to be chosen by the caller.
    pub fn with_defaults(root: impl Into<String>, test_code: TestCodePolicy) -> Self {
        Self {
            version: "1.0".to_string(),
            root: root.into(),
            test_code,
            paths: PathConfig::default(),
            groups: Self::default_groups(),
            rules: vec![LayerRule {
                id: DEFAULT_RULE_ID.to_string(),
                sources: vec!["service".to_string(), "repository".to_string()],
                forbidden: vec!["web".to_string()],
                because: "Services and repositories should not depend on web layer".to_string(),
                severity: Severity::Error,
                enabled: true,
            }],
        }
    }

    fn default_groups() -> BTreeMap<String, GroupConfig> {
        let group = |pattern: &str, description: &str| GroupConfig {
            patterns: vec![pattern.to_string()],
            description: Some(description.to_string()),
        };

        BTreeMap::from([
            ("service".to_string(), group("crate::service..", "Business services")),
            ("repository".to_string(), group("crate::repository..", "Persistence access")),
            ("web".to_string(), group("crate::web..", "HTTP controllers and web adapters")),
        ])
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> LayerResult<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            return Err(LayerError::config(format!(
                "Unsupported configuration version: {}. Supported versions: 1.0",
                self.version
            )));
        }

        if self.root.split("::").any(|segment| !is_identifier(segment)) {
            return Err(LayerError::config(format!(
                "Root namespace '{}' is not a valid path",
                self.root
            )));
        }

        // Compiles every pattern and rejects empty groups
        let groups = self.compile_groups()?;

        if self.rules.iter().all(|r| !r.enabled) {
            return Err(LayerError::config("No enabled rules configured"));
        }

        let mut seen_ids = HashSet::new();
        for rule in &self.rules {
            if !seen_ids.insert(rule.id.as_str()) {
                return Err(LayerError::config(format!("Duplicate rule ID '{}'", rule.id)));
            }

            if rule.sources.is_empty() || rule.forbidden.is_empty() {
                return Err(LayerError::config(format!(
                    "Rule '{}' needs at least one source group and one forbidden group",
                    rule.id
                )));
            }

            for group in rule.sources.iter().chain(&rule.forbidden) {
                if !groups.contains_key(group) {
                    return Err(LayerError::config(format!(
                        "Rule '{}' refers to unknown group '{}'",
                        rule.id, group
                    )));
                }
            }

            if rule.enabled {
                Self::reject_overlap(rule, &groups)?;
            }
        }

        Ok(())
    }

    /// A namespace may not be both restricted and forbidden by the same rule
    fn reject_overlap(rule: &LayerRule, groups: &BTreeMap<String, PackageGroup>) -> LayerResult<()> {
        for source in &rule.sources {
            for forbidden in &rule.forbidden {
                let (Some(left), Some(right)) = (groups.get(source), groups.get(forbidden)) else {
                    continue;
                };

                if let Some(overlap) = left.overlap_with(right) {
                    return Err(LayerError::config(format!(
                        "Rule '{}': groups '{}' ('{}') and '{}' ('{}') overlap, e.g. namespace '{}' belongs to both",
                        rule.id,
                        source,
                        overlap.left_pattern,
                        forbidden,
                        overlap.right_pattern,
                        overlap.example
                    )));
                }
            }
        }

        Ok(())
    }

    /// Compile every configured group against the root namespace
    pub fn compile_groups(&self) -> LayerResult<BTreeMap<String, PackageGroup>> {
        self.groups
            .iter()
            .map(|(name, group)| {
                PackageGroup::new(name.clone(), &group.patterns, &self.root)
                    .map(|compiled| (name.clone(), compiled))
            })
            .collect()
    }

    /// Get all enabled rules
    pub fn enabled_rules(&self) -> impl Iterator<Item = &LayerRule> {
        self.rules.iter().filter(|rule| rule.enabled)
    }

    pub fn find_rule(&self, id: &str) -> Option<&LayerRule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    /// Convert to JSON for serialization
    pub fn to_json(&self) -> LayerResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LayerError::config(format!("Failed to serialize config: {e}")))
    }

    /// Convert to YAML, the on-disk format
    pub fn to_yaml(&self) -> LayerResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LayerError::config(format!("Failed to serialize config: {e}")))
    }

    /// Create a fingerprint of the configuration for report metadata
    pub fn fingerprint(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();

        self.version.hash(&mut hasher);
        self.root.hash(&mut hasher);
        self.test_code.hash(&mut hasher);
        self.paths.patterns.hash(&mut hasher);
        self.paths.ignore_file.hash(&mut hasher);

        // BTreeMap iteration is already ordered
        for (name, group) in &self.groups {
            name.hash(&mut hasher);
            group.patterns.hash(&mut hasher);
        }

        let mut sorted_rules: Vec<_> = self.rules.iter().collect();
        sorted_rules.sort_by(|a, b| a.id.cmp(&b.id));

        for rule in sorted_rules {
            rule.id.hash(&mut hasher);
            rule.sources.hash(&mut hasher);
            rule.forbidden.hash(&mut hasher);
            rule.severity.hash(&mut hasher);
            rule.enabled.hash(&mut hasher);
        }

        format!("{:x}", hasher.finish())
    }
}

fn default_true() -> bool {
    true
}

fn default_severity() -> Severity {
    Severity::Error
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: LayerConfig,
}

impl ConfigBuilder {
    /// Start from the default rule set
    pub fn new(root: impl Into<String>, test_code: TestCodePolicy) -> Self {
        Self { config: LayerConfig::with_defaults(root, test_code) }
    }

    /// Replace a group's patterns, creating the group if needed
    pub fn group(mut self, name: impl Into<String>, patterns: &[&str]) -> Self {
        self.config.groups.insert(
            name.into(),
            GroupConfig {
                patterns: patterns.iter().map(|p| p.to_string()).collect(),
                description: None,
            },
        );
        self
    }

    /// Add a rule
    pub fn rule(mut self, rule: LayerRule) -> Self {
        self.config.rules.push(rule);
        self
    }

    /// Add a path pattern
    pub fn add_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.paths.patterns.push(pattern.into());
        self
    }

    /// Set the ignore file name
    pub fn ignore_file(mut self, filename: impl Into<String>) -> Self {
        self.config.paths.ignore_file = Some(filename.into());
        self
    }

    /// Build the final configuration
    pub fn build(self) -> LayerResult<LayerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
version: "1.0"
root: shop
test_code: exclude
groups:
  service:
    patterns: ["crate::service.."]
  repository:
    patterns: ["crate::repository.."]
  web:
    patterns: ["crate::web.."]
rules:
  - id: no_web
    sources: [service, repository]
    forbidden: [web]
    because: Services and repositories should not depend on web layer
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        config.validate().unwrap();

        assert_eq!(config.enabled_rules().count(), 1);
        assert!(config.find_rule(DEFAULT_RULE_ID).is_some());
        assert_eq!(config.groups.len(), 3);
    }

    #[test]
    fn test_load_from_str() {
        let config = LayerConfig::load_from_str(MINIMAL).unwrap();

        assert_eq!(config.root, "shop");
        assert_eq!(config.test_code, TestCodePolicy::Exclude);
        assert_eq!(config.rules[0].severity, Severity::Error);
        assert!(config.rules[0].enabled);
        assert!(config.paths.patterns.contains(&"target/".to_string()));
    }

    #[test]
    fn test_test_code_is_required() {
        let without = MINIMAL.replace("test_code: exclude\n", "");
        let err = LayerConfig::load_from_str(&without).unwrap_err();

        assert!(err.to_string().contains("test_code"));
    }

    #[test]
    fn test_overlapping_groups_rejected() {
        let overlapping = MINIMAL.replace(r#"["crate::web.."]"#, r#"["..web.."]"#);
        let err = LayerConfig::load_from_str(&overlapping).unwrap_err();

        assert!(matches!(err, LayerError::Configuration { .. }));
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_overlap_ignored_for_disabled_rule() {
        let config = ConfigBuilder::new("shop", TestCodePolicy::Exclude)
            .group("api", &["crate::service::api.."])
            .rule(LayerRule {
                id: "disabled".to_string(),
                sources: vec!["service".to_string()],
                forbidden: vec!["api".to_string()],
                because: "n/a".to_string(),
                severity: Severity::Error,
                enabled: false,
            })
            .build();

        assert!(config.is_ok());
    }

    #[test]
    fn test_unknown_group_and_empty_group_rejected() {
        let unknown = MINIMAL.replace("forbidden: [web]", "forbidden: [controllers]");
        assert!(LayerConfig::load_from_str(&unknown).is_err());

        let empty = MINIMAL.replace(r#"["crate::web.."]"#, "[]");
        assert!(LayerConfig::load_from_str(&empty).is_err());
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let rule = LayerRule {
            id: DEFAULT_RULE_ID.to_string(),
            sources: vec!["service".to_string()],
            forbidden: vec!["web".to_string()],
            because: "dup".to_string(),
            severity: Severity::Warning,
            enabled: true,
        };

        let result = ConfigBuilder::new("shop", TestCodePolicy::Include).rule(rule).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_version_and_root() {
        let mut config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        config.version = "2.0".to_string();
        assert!(config.validate().is_err());

        let config = LayerConfig::with_defaults("my-shop", TestCodePolicy::Exclude);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_and_yaml_round_trip() {
        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        let reloaded = LayerConfig::load_from_str(&config.to_yaml().unwrap()).unwrap();

        assert_eq!(config.fingerprint(), reloaded.fingerprint());

        let include = LayerConfig::with_defaults("shop", TestCodePolicy::Include);
        assert_ne!(config.fingerprint(), include.fingerprint());
    }

    #[test]
    fn test_discover() -> LayerResult<()> {
        let temp_dir = TempDir::new()?;
        assert!(LayerConfig::discover(temp_dir.path())?.is_none());

        fs::write(temp_dir.path().join("layer_guard.yaml"), MINIMAL)?;
        let found = LayerConfig::discover(temp_dir.path())?;
        assert_eq!(found.map(|c| c.root), Some("shop".to_string()));

        Ok(())
    }
}
