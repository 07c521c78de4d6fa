//! File filtering for watch events.
//!
//! Filters run on every raw event before it reaches the debouncer. A path
//! that does not pass never gets a timer, so non-matching paths are ignored
//! entirely.
//!
//! # Examples
//!
//! ```
//! use cg_watcher::{FileFilter, ExtensionFilter};
//! use camino::Utf8Path;
//!
//! let filter = ExtensionFilter::new(&["json", "db"]);
//!
//! assert!(filter.should_process(Utf8Path::new("/data/orders.json")));
//! assert!(!filter.should_process(Utf8Path::new("/data/orders.json.swp")));
//! ```

use camino::Utf8Path;
use ignore::Match;
use ignore::overrides::{Override, OverrideBuilder};
use smallvec::SmallVec;

use crate::error::WatchError;

/// A filter for determining which file events to process.
///
/// Filters must be [`Send`] and [`Sync`] and `'static` because they move into
/// the watcher's background task.
///
/// # Examples
///
/// ```
/// use cg_watcher::FileFilter;
/// use camino::Utf8Path;
///
/// struct NoSwapFiles;
///
/// impl FileFilter for NoSwapFiles {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         path.extension() != Some("swp")
///     }
/// }
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if events for `path` should be debounced and emitted.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts all files.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// A filter built from gitignore-style glob patterns.
///
/// Patterns are matched relative to the watch root. A plain pattern selects
/// paths and a `!`-prefixed pattern excludes them. With no selecting pattern,
/// every path not explicitly excluded passes.
///
/// # Examples
///
/// ```
/// use cg_watcher::{FileFilter, PatternFilter};
/// use camino::Utf8Path;
///
/// let filter = PatternFilter::new("/data", &["*.json", "!tmp/**"]).unwrap();
/// assert!(filter.should_process(Utf8Path::new("/data/orders/1.json")));
/// assert!(!filter.should_process(Utf8Path::new("/data/tmp/2.json")));
/// assert!(!filter.should_process(Utf8Path::new("/data/notes.txt")));
/// ```
#[derive(Debug, Clone)]
pub struct PatternFilter {
    matcher: Override,
}

impl PatternFilter {
    /// Compiles `patterns` relative to `root`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidPattern`] for the first glob that fails to compile.
    pub fn new<S: AsRef<str>>(
        root: impl AsRef<Utf8Path>,
        patterns: &[S],
    ) -> Result<Self, WatchError> {
        let mut builder = OverrideBuilder::new(root.as_ref().as_std_path());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder
                .add(pattern)
                .map_err(|source| WatchError::invalid_pattern(pattern, source))?;
        }
        let matcher = builder.build().map_err(|source| {
            let joined = patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<&str>>()
                .join(", ");
            WatchError::invalid_pattern(joined, source)
        })?;
        Ok(Self { matcher })
    }

    /// Returns `true` if no patterns were given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }
}

impl FileFilter for PatternFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        // Removed paths cannot be stat'ed, so everything is matched as a file.
        match self.matcher.matched(path.as_std_path(), false) {
            Match::Whitelist(_) => true,
            Match::Ignore(_) => false,
            Match::None => self.matcher.num_whitelists() == 0,
        }
    }
}

/// A filter based on file extensions.
///
/// # Examples
///
/// ```
/// use cg_watcher::{FileFilter, ExtensionFilter};
/// use camino::Utf8Path;
///
/// let filter = ExtensionFilter::new(&["json", "csv"]);
/// assert!(filter.should_process(Utf8Path::new("data/a.json")));
/// assert!(!filter.should_process(Utf8Path::new("data/a.lock")));
/// ```
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: SmallVec<[String; 8]>,
}

impl ExtensionFilter {
    /// Creates a new extension filter. Extensions are given without the dot.
    #[must_use]
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl FileFilter for ExtensionFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        path.extension()
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

/// A composite filter that combines multiple filters with AND logic.
///
/// # Examples
///
/// ```
/// use cg_watcher::{CompositeFilter, ExtensionFilter, FileFilter};
/// use camino::Utf8Path;
///
/// struct NoBackups;
/// impl FileFilter for NoBackups {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         !path.as_str().contains("/backup/")
///     }
/// }
///
/// let filter = CompositeFilter::new()
///     .and(ExtensionFilter::new(&["json"]))
///     .and(NoBackups);
///
/// assert!(filter.should_process(Utf8Path::new("/data/a.json")));
/// assert!(!filter.should_process(Utf8Path::new("/data/backup/a.json")));
/// ```
#[derive(Default)]
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileFilter>>,
}

impl CompositeFilter {
    /// Creates a new empty composite filter, which accepts all files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter to the composite.
    #[must_use]
    pub fn and<F: FileFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FileFilter for CompositeFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_filter() {
        let filter = AcceptAllFilter;
        assert!(filter.should_process(Utf8Path::new("anything.txt")));
        assert!(filter.should_process(Utf8Path::new("")));
    }

    #[test]
    fn test_pattern_filter_matches_at_any_depth() {
        let filter = PatternFilter::new("/data", &["*.json"]).unwrap();

        assert!(filter.should_process(Utf8Path::new("/data/a.json")));
        assert!(filter.should_process(Utf8Path::new("/data/deep/nested/b.json")));
        assert!(!filter.should_process(Utf8Path::new("/data/a.txt")));
    }

    #[test]
    fn test_pattern_filter_negation() {
        let filter = PatternFilter::new("/data", &["*.json", "!secret.json"]).unwrap();

        assert!(filter.should_process(Utf8Path::new("/data/public.json")));
        assert!(!filter.should_process(Utf8Path::new("/data/secret.json")));
    }

    #[test]
    fn test_pattern_filter_only_exclusions() {
        let filter = PatternFilter::new("/data", &["!*.tmp"]).unwrap();

        assert!(filter.should_process(Utf8Path::new("/data/a.json")));
        assert!(!filter.should_process(Utf8Path::new("/data/a.tmp")));
    }

    #[test]
    fn test_pattern_filter_empty_accepts_everything() {
        let none: [&str; 0] = [];
        let filter = PatternFilter::new("/data", &none).unwrap();

        assert!(filter.is_empty());
        assert!(filter.should_process(Utf8Path::new("/data/anything")));
    }

    #[test]
    fn test_pattern_filter_rejects_bad_glob() {
        let err = PatternFilter::new("/data", &["ok.json", "a["]).unwrap_err();
        assert!(matches!(err, WatchError::InvalidPattern { ref pattern, .. } if pattern == "a["));
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::new(&["json", "csv"]);

        assert!(filter.should_process(Utf8Path::new("data/a.json")));
        assert!(filter.should_process(Utf8Path::new("data/a.csv")));
        assert!(!filter.should_process(Utf8Path::new("data/a.jsonl")));
        assert!(!filter.should_process(Utf8Path::new("data/json")));
    }

    #[test]
    fn test_composite_filter_empty() {
        let filter = CompositeFilter::new();
        assert!(filter.should_process(Utf8Path::new("anything")));
    }

    #[test]
    fn test_composite_filter_and() {
        let filter = CompositeFilter::new()
            .and(ExtensionFilter::new(&["json"]))
            .and(PatternFilter::new("/data", &["!archive/**"]).unwrap());

        assert!(filter.should_process(Utf8Path::new("/data/a.json")));
        assert!(!filter.should_process(Utf8Path::new("/data/archive/a.json")));
        assert!(!filter.should_process(Utf8Path::new("/data/a.csv")));
    }
}
