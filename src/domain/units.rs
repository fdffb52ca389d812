//! Code units and the dependency snapshot they form
//!
//! Architecture: Rich Domain Models - a Snapshot is the immutable graph a check runs over
//! - Nodes are CodeUnits identified by fully-qualified name and namespace path
//! - Edges are direct References recorded on the unit that makes them
//! - Snapshots are built fresh per run and fingerprinted for reproducibility

use crate::domain::violations::{LayerError, LayerResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Separator between namespace segments
pub const SEGMENT_SEPARATOR: &str = "::";

/// Ordered sequence of namespace segments, e.g. `shop::service::orders`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespacePath(Vec<String>);

impl NamespacePath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parse a `::`-separated path, ignoring empty segments
    pub fn parse(path: &str) -> Self {
        Self(
            path.split(SEGMENT_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Namespace of a unit known only by name: everything but the last segment
    pub fn enclosing(name: &str) -> Self {
        let mut path = Self::parse(name);
        path.0.pop();
        path
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` equals `prefix` or lies underneath it
    pub fn starts_with(&self, prefix: &NamespacePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Append a segment, returning the child path
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Parent path, or `None` at the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(SEGMENT_SEPARATOR))
    }
}

/// What kind of program unit a CodeUnit stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Module,
    Struct,
    Enum,
    Union,
    Trait,
    Function,
    TypeAlias,
    Const,
    Static,
    Macro,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Union => "union",
            Self::Trait => "trait",
            Self::Function => "function",
            Self::TypeAlias => "type_alias",
            Self::Const => "const",
            Self::Static => "static",
            Self::Macro => "macro",
        }
    }
}

/// How a unit refers to another one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// `use` declaration
    Import,
    /// Implemented trait or supertrait
    Supertype,
    /// Field, const or static type
    Field,
    /// Function parameter type
    Parameter,
    /// Function return type
    ReturnType,
    /// Any other type or path usage, including function bodies and bounds
    Usage,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Supertype => "supertype",
            Self::Field => "field",
            Self::Parameter => "parameter",
            Self::ReturnType => "return_type",
            Self::Usage => "usage",
        }
    }
}

/// A direct, outbound reference from one unit to another
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Fully-qualified name of the referenced unit
    pub target: String,
    /// How the reference is made
    pub kind: ReferenceKind,
    /// Source line of the reference (1-indexed) when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Reference {
    pub fn new(target: impl Into<String>, kind: ReferenceKind) -> Self {
        Self { target: target.into(), kind, line: None }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// One program unit: a module or a named item inside one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Fully-qualified name, segments joined with `::`
    pub name: String,
    /// Namespace the unit resides in (a module's own path for module units)
    #[serde(default)]
    pub namespace: NamespacePath,
    pub kind: UnitKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Whether the unit only exists for tests
    #[serde(default)]
    pub is_test: bool,
    /// Outbound references, sorted and free of duplicates
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl CodeUnit {
    /// Create an item unit; the namespace is derived from the name
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        let name = name.into();
        let namespace = match kind {
            UnitKind::Module => NamespacePath::parse(&name),
            _ => NamespacePath::enclosing(&name),
        };

        Self { name, namespace, kind, file: None, line: None, is_test: false, references: Vec::new() }
    }

    pub fn with_location(mut self, file: impl Into<PathBuf>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn marked_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    /// Add a reference, keeping the list sorted and unique per target and kind.
    /// The first line recorded for a (target, kind) pair wins.
    pub fn add_reference(&mut self, reference: Reference) {
        if reference.target == self.name {
            return;
        }
        if self.references.iter().any(|r| r.target == reference.target && r.kind == reference.kind) {
            return;
        }
        if let Err(pos) = self.references.binary_search(&reference) {
            self.references.insert(pos, reference);
        }
    }

    pub fn references_to(mut self, target: impl Into<String>, kind: ReferenceKind) -> Self {
        self.add_reference(Reference::new(target, kind));
        self
    }

    /// Distinct names of every referenced unit
    pub fn referenced_names(&self) -> BTreeSet<&str> {
        self.references.iter().map(|r| r.target.as_str()).collect()
    }
}

/// Whether test-only code takes part in a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCodePolicy {
    Exclude,
    Include,
}

impl TestCodePolicy {
    pub fn admits(self, unit: &CodeUnit) -> bool {
        match self {
            Self::Exclude => !unit.is_test,
            Self::Include => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::Include => "include",
        }
    }
}

/// A read-only dependency graph over the units of one root namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Root namespace every unit is expected to live under
    pub root: String,
    pub units: Vec<CodeUnit>,
}

impl Snapshot {
    /// Build a snapshot, ordering units by name
    pub fn new(root: impl Into<String>, mut units: Vec<CodeUnit>) -> Self {
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Self { root: root.into(), units }
    }

    pub fn empty(root: impl Into<String>) -> Self {
        Self::new(root, Vec::new())
    }

    /// Load a snapshot from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LayerResult<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            LayerError::snapshot(format!(
                "Failed to read snapshot '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::load_from_str(&contents).map_err(|e| {
            LayerError::snapshot(format!("Invalid snapshot '{}': {}", path.as_ref().display(), e))
        })
    }

    /// Load a snapshot from JSON text
    pub fn load_from_str(content: &str) -> LayerResult<Self> {
        let raw: Self = serde_json::from_str(content)
            .map_err(|e| LayerError::snapshot(format!("Failed to parse snapshot: {e}")))?;

        let mut units = Vec::with_capacity(raw.units.len());
        for mut unit in raw.units {
            if unit.namespace.is_empty() {
                unit.namespace = CodeUnit::new(unit.name.clone(), unit.kind).namespace;
            }

            // Earliest line first, so it is the one kept per (target, kind)
            let mut references = std::mem::take(&mut unit.references);
            references.sort_by_key(|r| r.line.unwrap_or(u32::MAX));
            for reference in references {
                unit.add_reference(reference);
            }
            units.push(unit);
        }

        let snapshot = Self::new(raw.root, units);
        if let Some(pair) = snapshot.units.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(LayerError::snapshot(format!(
                "Unit '{}' appears more than once",
                pair[0].name
            )));
        }
        Ok(snapshot)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> LayerResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LayerError::snapshot(format!("Failed to serialize snapshot: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Root namespace as a path
    pub fn root_path(&self) -> NamespacePath {
        NamespacePath::parse(&self.root)
    }

    /// Units living under `root`
    pub fn units_under<'a>(&'a self, root: &'a NamespacePath) -> impl Iterator<Item = &'a CodeUnit> {
        self.units.iter().filter(move |unit| unit.namespace.starts_with(root))
    }

    /// Units living under `root` and admitted by the test policy
    pub fn units_in_scope<'a>(
        &'a self,
        root: &'a NamespacePath,
        policy: TestCodePolicy,
    ) -> impl Iterator<Item = &'a CodeUnit> {
        self.units_under(root).filter(move |unit| policy.admits(unit))
    }

    /// Name lookup over all units
    pub fn index(&self) -> HashMap<&str, &CodeUnit> {
        self.units.iter().map(|u| (u.name.as_str(), u)).collect()
    }

    pub fn find(&self, name: &str) -> Option<&CodeUnit> {
        self.units
            .binary_search_by(|u| u.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.units[i])
    }

    /// Total number of outbound references
    pub fn reference_count(&self) -> usize {
        self.units.iter().map(|u| u.references.len()).sum()
    }

    /// Stable SHA-256 digest of the snapshot content
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.root.as_bytes());

        for unit in &self.units {
            hasher.update([0u8]);
            hasher.update(unit.name.as_bytes());
            hasher.update(unit.kind.as_str().as_bytes());
            for segment in unit.namespace.segments() {
                hasher.update([2u8]);
                hasher.update(segment.as_bytes());
            }
            hasher.update([u8::from(unit.is_test)]);
            for reference in &unit.references {
                hasher.update([1u8]);
                hasher.update(reference.target.as_bytes());
                hasher.update(reference.kind.as_str().as_bytes());
            }
        }

        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_path_parsing() {
        let path = NamespacePath::parse("shop::service::orders");
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "shop::service::orders");
        assert!(path.starts_with(&NamespacePath::parse("shop::service")));
        assert!(!path.starts_with(&NamespacePath::parse("shop::web")));
        assert_eq!(path.parent(), Some(NamespacePath::parse("shop::service")));
    }

    #[test]
    fn test_unit_namespace_derivation() {
        let item = CodeUnit::new("shop::service::OrderService", UnitKind::Struct);
        assert_eq!(item.namespace.to_string(), "shop::service");

        let module = CodeUnit::new("shop::service", UnitKind::Module);
        assert_eq!(module.namespace.to_string(), "shop::service");
    }

    #[test]
    fn test_references_are_sorted_and_unique() {
        let mut unit = CodeUnit::new("shop::service::OrderService", UnitKind::Struct);
        unit.add_reference(Reference::new("shop::web::Z", ReferenceKind::Field));
        unit.add_reference(Reference::new("shop::repository::A", ReferenceKind::Field));
        unit.add_reference(Reference::new("shop::web::Z", ReferenceKind::Field));
        unit.add_reference(Reference::new("shop::service::OrderService", ReferenceKind::Usage));

        assert_eq!(unit.references.len(), 2);
        assert_eq!(unit.references[0].target, "shop::repository::A");
    }

    #[test]
    fn test_snapshot_json_and_lookup() {
        let json = r#"{
            "root": "shop",
            "units": [
                {"name": "shop::web::OrderController", "kind": "struct"},
                {"name": "shop::service::OrderService", "namespace": ["shop", "service"], "kind": "struct",
                 "references": [{"target": "shop::web::OrderController", "kind": "field"}]}
            ]
        }"#;

        let snapshot = Snapshot::load_from_str(json).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.units[0].name, "shop::service::OrderService");
        assert!(snapshot.find("shop::web::OrderController").is_some());
        assert!(snapshot.find("shop::web::Missing").is_none());
        assert_eq!(snapshot.reference_count(), 1);
        assert_eq!(snapshot.units[1].namespace.to_string(), "shop::web");
    }

    #[test]
    fn test_scope_respects_root_and_tests() {
        let snapshot = Snapshot::new(
            "shop",
            vec![
                CodeUnit::new("shop::service::A", UnitKind::Struct),
                CodeUnit::new("shop::service::tests::B", UnitKind::Function).marked_test(true),
                CodeUnit::new("other::C", UnitKind::Struct),
            ],
        );

        let root = snapshot.root_path();
        assert_eq!(snapshot.units_under(&root).count(), 2);
        assert_eq!(snapshot.units_in_scope(&root, TestCodePolicy::Exclude).count(), 1);
        assert_eq!(snapshot.units_in_scope(&root, TestCodePolicy::Include).count(), 2);
    }

    #[test]
    fn test_json_references_collapse_per_target_and_kind() {
        let json = r#"{
            "root": "shop",
            "units": [
                {"name": "shop::service::S", "kind": "struct", "references": [
                    {"target": "shop::web::W", "kind": "usage", "line": 7},
                    {"target": "shop::web::W", "kind": "usage", "line": 3},
                    {"target": "shop::web::W", "kind": "field", "line": 2}
                ]}
            ]
        }"#;

        let snapshot = Snapshot::load_from_str(json).unwrap();
        let references = &snapshot.units[0].references;

        assert_eq!(references.len(), 2);
        let usage = references.iter().find(|r| r.kind == ReferenceKind::Usage).unwrap();
        assert_eq!(usage.line, Some(3));
    }

    #[test]
    fn test_json_duplicate_unit_names_rejected() {
        let json = r#"{
            "root": "shop",
            "units": [
                {"name": "shop::web::W", "kind": "struct"},
                {"name": "shop::web::W", "kind": "enum"}
            ]
        }"#;

        let err = Snapshot::load_from_str(json).unwrap_err();
        assert!(matches!(err, LayerError::Snapshot { .. }));
        assert!(err.to_string().contains("shop::web::W"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let build = || {
            Snapshot::new(
                "shop",
                vec![CodeUnit::new("shop::service::A", UnitKind::Struct)
                    .references_to("shop::web::B", ReferenceKind::Usage)],
            )
        };

        assert_eq!(build().fingerprint(), build().fingerprint());
        assert_ne!(build().fingerprint(), Snapshot::empty("shop").fingerprint());

        let mut moved = build();
        moved.units[0].namespace = NamespacePath::parse("shop::web");
        assert_ne!(build().fingerprint(), moved.fingerprint());
    }
}
