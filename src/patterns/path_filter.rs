//! Path filtering using .gitignore-style patterns
//!
//! Architectural Principle: Service Layer - PathFilter decides which source files feed a snapshot
//! - Encapsulates the rules for include/exclude pattern evaluation
//! - Patterns are matched against paths relative to the scanned root
//! - Handles .layerguardignore file discovery and parsing

use crate::domain::violations::{LayerError, LayerResult};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default name of per-directory ignore files
pub const DEFAULT_IGNORE_FILE: &str = ".layerguardignore";

/// Manages path filtering using .gitignore-style patterns
#[derive(Debug, Clone)]
pub struct PathFilter {
    /// Include/exclude patterns
    patterns: Vec<FilterPattern>,
    /// Whether to process ignore files
    process_ignore_files: bool,
    /// Name of ignore files to process
    ignore_filename: String,
}

/// A single path filter pattern
#[derive(Debug, Clone)]
struct FilterPattern {
    pattern: glob::Pattern,
    /// Whether this is an include pattern (starts with !)
    is_include: bool,
    /// Original pattern string, without the `!`
    original: String,
}

impl FilterPattern {
    fn parse(raw: &str) -> LayerResult<Self> {
        let (is_include, pattern_str) = match raw.strip_prefix('!') {
            Some(stripped) => (true, stripped.to_string()),
            None => (false, raw.to_string()),
        };

        let glob_source = pattern_str.trim_start_matches('/').trim_end_matches('/');
        let pattern = glob::Pattern::new(glob_source)
            .map_err(|e| LayerError::pattern(format!("Invalid pattern '{pattern_str}': {e}")))?;

        Ok(Self { pattern, is_include, original: pattern_str })
    }

    /// Check if the pattern matches a relative path using .gitignore-style rules
    fn matches(&self, relative: &Path) -> bool {
        let path_str = relative.to_string_lossy().replace('\\', "/");

        if self.original.ends_with('/') {
            // Directory pattern: matches anything underneath a matching directory
            let mut prefix = PathBuf::new();
            for component in relative.components() {
                prefix.push(component);
                if self.matches_dir_component(&prefix) {
                    return true;
                }
            }
            return false;
        }

        if self.original.contains('/') {
            self.pattern.matches(&path_str)
        } else {
            // No slash: match the file name only
            relative
                .file_name()
                .map(|name| self.pattern.matches(&name.to_string_lossy()))
                .unwrap_or(false)
        }
    }

    fn matches_dir_component(&self, prefix: &Path) -> bool {
        let prefix_str = prefix.to_string_lossy().replace('\\', "/");
        if self.original.trim_end_matches('/').contains('/') {
            self.pattern.matches(&prefix_str)
        } else {
            prefix
                .file_name()
                .map(|name| self.pattern.matches(&name.to_string_lossy()))
                .unwrap_or(false)
        }
    }
}

impl PathFilter {
    /// Create a new path filter with the given patterns
    pub fn new(patterns: Vec<String>, ignore_filename: Option<String>) -> LayerResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| FilterPattern::parse(p))
            .collect::<LayerResult<Vec<_>>>()?;

        Ok(Self {
            patterns,
            process_ignore_files: ignore_filename.is_some(),
            ignore_filename: ignore_filename.unwrap_or_else(|| DEFAULT_IGNORE_FILE.to_string()),
        })
    }

    /// Create a default path filter with sensible exclusions
    pub fn with_defaults() -> LayerResult<Self> {
        Self::new(
            vec![
                "target/".to_string(),
                "**/*.generated.rs".to_string(),
            ],
            Some(DEFAULT_IGNORE_FILE.to_string()),
        )
    }

    /// Stop reading ignore files
    pub fn without_ignore_files(mut self) -> Self {
        self.process_ignore_files = false;
        self
    }

    /// Check a path, given relative to the scanned root
    pub fn should_analyze<P: AsRef<Path>>(&self, relative: P) -> bool {
        let relative = relative.as_ref();
        let mut should_include = true;

        // Apply patterns in order (like .gitignore)
        for pattern in &self.patterns {
            if pattern.matches(relative) {
                should_include = pattern.is_include;
            }
        }

        should_include
    }

    /// Check if a file below `root` is ignored by ignore files between it and `root`
    fn is_ignored_by_files(&self, root: &Path, path: &Path) -> LayerResult<bool> {
        let mut current_dir = path.parent();
        let mut is_ignored = false;

        while let Some(dir) = current_dir {
            let ignore_file = dir.join(&self.ignore_filename);

            if ignore_file.is_file() {
                let patterns = self.load_ignore_file(&ignore_file)?;

                if let Ok(relative_path) = path.strip_prefix(dir) {
                    for pattern in patterns {
                        if pattern.matches(relative_path) {
                            is_ignored = !pattern.is_include;
                        }
                    }
                }
            }

            if dir == root {
                break;
            }
            current_dir = dir.parent();
        }

        Ok(is_ignored)
    }

    /// Load patterns from an ignore file
    fn load_ignore_file(&self, path: &Path) -> LayerResult<Vec<FilterPattern>> {
        let content = fs::read_to_string(path).map_err(|e| {
            LayerError::config(format!("Failed to read ignore file '{}': {}", path.display(), e))
        })?;

        let mut patterns = Vec::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match FilterPattern::parse(line) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => {
                    // Skip invalid patterns instead of failing the whole scan
                    tracing::warn!("Invalid pattern '{}' in {}: {}", line, path.display(), e);
                }
            }
        }

        Ok(patterns)
    }

    /// Get all files under `root` with the given extension that should be analyzed
    pub fn find_files<P: AsRef<Path>>(&self, root: P, extension: &str) -> LayerResult<Vec<PathBuf>> {
        let root = root.as_ref();
        let mut files = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path);
            if !self.should_analyze(relative) {
                tracing::debug!("Excluded by path pattern: {}", relative.display());
                continue;
            }
            if self.process_ignore_files && self.is_ignored_by_files(root, path)? {
                tracing::debug!("Excluded by {}: {}", self.ignore_filename, relative.display());
                continue;
            }

            files.push(path.to_path_buf());
        }

        Ok(files)
    }

    /// Add a pattern to the filter
    pub fn add_pattern(&mut self, pattern: &str) -> LayerResult<()> {
        self.patterns.push(FilterPattern::parse(pattern)?);
        Ok(())
    }

    /// Describe which patterns match a path, for troubleshooting
    pub fn debug_patterns<P: AsRef<Path>>(&self, relative: P) -> Vec<String> {
        let relative = relative.as_ref();

        self.patterns
            .iter()
            .enumerate()
            .map(|(i, pattern)| {
                let prefix = if pattern.is_include { "!" } else { "" };
                let verdict = if pattern.matches(relative) { "MATCH" } else { "no match" };
                format!("Pattern {}: {}{} -> {}", i, prefix, pattern.original, verdict)
            })
            .collect()
    }
}
