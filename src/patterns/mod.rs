//! Namespace patterns and the package groups built from them
//!
//! Architectural Principle: Value Objects - Patterns are parsed once and matched many times
//! - `..` stands for any number of segments, `*` for exactly one
//! - A leading `crate` segment is bound to the configured root namespace
//! - Two patterns can be intersected exactly, so overlapping groups are caught at setup

pub mod path_filter;

use crate::domain::units::{NamespacePath, SEGMENT_SEPARATOR};
use crate::domain::violations::{LayerError, LayerResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub use path_filter::PathFilter;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^(r#)?[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Placeholder used when a wildcard has to be spelled out in an example namespace
const WILDCARD_EXAMPLE: &str = "_";

/// Whether `segment` is a valid namespace segment
pub fn is_identifier(segment: &str) -> bool {
    IDENTIFIER.is_match(segment)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    /// `*`
    Any,
    /// `..`
    AnySequence,
}

impl Segment {
    fn accepts_same_segment_as(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            _ => true,
        }
    }

    fn consumes_and_advances(&self) -> bool {
        !matches!(self, Segment::AnySequence)
    }
}

/// A compiled namespace pattern such as `shop::service..` or `..web..`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePattern {
    original: String,
    segments: Vec<Segment>,
}

impl NamespacePattern {
    /// Parse a pattern, binding a leading `crate` segment to `root`
    pub fn parse(pattern: &str, root: &str) -> LayerResult<Self> {
        let original = pattern.trim().to_string();
        if original.is_empty() {
            return Err(LayerError::pattern("Namespace pattern must not be empty"));
        }

        let normalized = original.replace("..", "::..::");
        let mut segments: Vec<Segment> = Vec::new();

        for token in normalized.split(SEGMENT_SEPARATOR).filter(|t| !t.is_empty()) {
            let segment = match token {
                ".." => Segment::AnySequence,
                "*" => Segment::Any,
                literal if is_identifier(literal) => Segment::Literal(literal.to_string()),
                other => {
                    return Err(LayerError::pattern(format!(
                        "Invalid segment '{other}' in namespace pattern '{original}'"
                    )))
                }
            };

            // Adjacent `..` collapse into one
            if segment == Segment::AnySequence && segments.last() == Some(&Segment::AnySequence) {
                continue;
            }
            segments.push(segment);
        }

        if segments.is_empty() {
            return Err(LayerError::pattern(format!(
                "Namespace pattern '{original}' has no segments"
            )));
        }

        if segments.first() == Some(&Segment::Literal("crate".to_string())) {
            let root_path = NamespacePath::parse(root);
            if root_path.is_empty() {
                return Err(LayerError::pattern(format!(
                    "Pattern '{original}' starts with 'crate' but no root namespace is configured"
                )));
            }
            segments.splice(
                0..1,
                root_path.segments().iter().cloned().map(Segment::Literal),
            );
        }

        Ok(Self { original, segments })
    }

    /// The pattern as written in configuration
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Whether `namespace` matches this pattern
    pub fn matches(&self, namespace: &NamespacePath) -> bool {
        let path = namespace.segments();
        let pattern = &self.segments;

        // reachable[j]: pattern prefix of length i matches path prefix of length j
        let mut reachable = vec![false; path.len() + 1];
        reachable[0] = true;

        for segment in pattern {
            let mut next = vec![false; path.len() + 1];
            for j in 0..=path.len() {
                match segment {
                    Segment::AnySequence => {
                        next[j] = reachable[j] || (j > 0 && next[j - 1]);
                    }
                    Segment::Any => {
                        next[j] = j > 0 && reachable[j - 1];
                    }
                    Segment::Literal(lit) => {
                        next[j] = j > 0 && reachable[j - 1] && path[j - 1] == *lit;
                    }
                }
            }
            reachable = next;
        }

        reachable[path.len()]
    }

    /// An example namespace matched by both patterns, if one exists
    pub fn common_namespace(&self, other: &NamespacePattern) -> Option<NamespacePath> {
        let a = &self.segments;
        let b = &other.segments;

        // Breadth-first search over the product of both pattern automata
        let mut came_from: HashMap<(usize, usize), Option<((usize, usize), Option<String>)>> =
            HashMap::new();
        let mut queue = VecDeque::new();
        came_from.insert((0, 0), None);
        queue.push_back((0usize, 0usize));

        while let Some(state @ (i, j)) = queue.pop_front() {
            if i == a.len() && j == b.len() {
                return Some(Self::trace_witness(&came_from, state));
            }

            let mut moves: Vec<((usize, usize), Option<String>)> = Vec::new();

            if a.get(i) == Some(&Segment::AnySequence) {
                moves.push(((i + 1, j), None));
            }
            if b.get(j) == Some(&Segment::AnySequence) {
                moves.push(((i, j + 1), None));
            }
            if let (Some(x), Some(y)) = (a.get(i), b.get(j)) {
                if x.accepts_same_segment_as(y) {
                    let next_i = if x.consumes_and_advances() { i + 1 } else { i };
                    let next_j = if y.consumes_and_advances() { j + 1 } else { j };
                    let spelled = match (x, y) {
                        (Segment::Literal(lit), _) | (_, Segment::Literal(lit)) => lit.clone(),
                        _ => WILDCARD_EXAMPLE.to_string(),
                    };
                    moves.push(((next_i, next_j), Some(spelled)));
                }
            }

            for (next, segment) in moves {
                if !came_from.contains_key(&next) {
                    came_from.insert(next, Some((state, segment)));
                    queue.push_back(next);
                }
            }
        }

        None
    }

    /// Whether some namespace matches both patterns
    pub fn overlaps(&self, other: &NamespacePattern) -> bool {
        self.common_namespace(other).is_some()
    }

    fn trace_witness(
        came_from: &HashMap<(usize, usize), Option<((usize, usize), Option<String>)>>,
        end: (usize, usize),
    ) -> NamespacePath {
        let mut segments = Vec::new();
        let mut current = end;

        while let Some(Some((previous, segment))) = came_from.get(&current) {
            if let Some(segment) = segment {
                segments.push(segment.clone());
            }
            current = *previous;
        }

        segments.reverse();
        NamespacePath::new(segments)
    }
}

impl fmt::Display for NamespacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Where two groups collide: one pattern from each and a namespace both accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOverlap {
    pub left_pattern: String,
    pub right_pattern: String,
    pub example: NamespacePath,
}

/// A named predicate over namespaces, e.g. the `service` layer
#[derive(Debug, Clone)]
pub struct PackageGroup {
    name: String,
    patterns: Vec<NamespacePattern>,
}

impl PackageGroup {
    /// Compile a group from its pattern strings
    pub fn new(name: impl Into<String>, patterns: &[String], root: &str) -> LayerResult<Self> {
        let name = name.into();
        if patterns.is_empty() {
            return Err(LayerError::config(format!("Group '{name}' has no namespace patterns")));
        }

        let patterns = patterns
            .iter()
            .map(|p| {
                NamespacePattern::parse(p, root).map_err(|e| {
                    LayerError::config(format!("Group '{name}': {e}"))
                })
            })
            .collect::<LayerResult<Vec<_>>>()?;

        Ok(Self { name, patterns })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[NamespacePattern] {
        &self.patterns
    }

    /// Whether `namespace` belongs to this group
    pub fn matches(&self, namespace: &NamespacePath) -> bool {
        self.patterns.iter().any(|p| p.matches(namespace))
    }

    /// First pair of patterns through which both groups can claim one namespace
    pub fn overlap_with(&self, other: &PackageGroup) -> Option<GroupOverlap> {
        self.patterns.iter().find_map(|left| {
            other.patterns.iter().find_map(|right| {
                left.common_namespace(right).map(|example| GroupOverlap {
                    left_pattern: left.to_string(),
                    right_pattern: right.to_string(),
                    example,
                })
            })
        })
    }
}
