//! Event types for file change notifications.
//!
//! # Event Flow
//!
//! ```text
//! File System Change
//!        │
//!        ▼
//!   notify raw event ──► ChangeKind (per path)
//!        │
//!        ▼
//!   Debouncer (per-path timer, kinds merged)
//!        │
//!        ▼
//!   WatchEvent::Changed(ChangeEvent) ──► consumer
//! ```

use camino::Utf8PathBuf;
use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The file was created.
    Add,
    /// The file's contents or metadata changed.
    Change,
    /// The file was removed.
    Unlink,
}

impl ChangeKind {
    /// Returns the wire name (`add`, `change`, `unlink`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }

    /// Folds a later kind observed inside the same debounce window into this one.
    ///
    /// # Examples
    ///
    /// ```
    /// use cg_watcher::ChangeKind;
    ///
    /// assert_eq!(ChangeKind::Add.merge(ChangeKind::Change), ChangeKind::Add);
    /// assert_eq!(ChangeKind::Unlink.merge(ChangeKind::Add), ChangeKind::Change);
    /// assert_eq!(ChangeKind::Add.merge(ChangeKind::Unlink), ChangeKind::Unlink);
    /// ```
    #[must_use]
    pub const fn merge(self, later: Self) -> Self {
        match (self, later) {
            (_, Self::Unlink) => Self::Unlink,
            (Self::Add, Self::Change) => Self::Add,
            (Self::Unlink, Self::Add) => Self::Change,
            (_, later) => later,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A debounced change to a single path.
///
/// # Examples
///
/// ```
/// use cg_watcher::{ChangeEvent, ChangeKind};
/// use camino::Utf8PathBuf;
///
/// let event = ChangeEvent::new(Utf8PathBuf::from("/data/orders.json"), ChangeKind::Change);
/// assert_eq!(event.file_name(), Some("orders.json"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Absolute path of the file that changed.
    pub path: Utf8PathBuf,
    /// Merged kind of every raw event seen in the window.
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Creates a change event.
    #[must_use]
    pub const fn new(path: Utf8PathBuf, kind: ChangeKind) -> Self {
        Self { path, kind }
    }

    /// Returns the file name component of the path.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }
}

/// An item on the watcher's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A debounced change to a matching path.
    Changed(ChangeEvent),
    /// A non-fatal error from the watch layer. Watching continues.
    Diagnostic(String),
}

impl WatchEvent {
    /// Returns the change, if this is one.
    #[must_use]
    pub const fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            Self::Changed(event) => Some(event),
            Self::Diagnostic(_) => None,
        }
    }
}

/// Per-path kinds extracted from one raw event.
pub(crate) type RawChanges = SmallVec<[(std::path::PathBuf, ChangeKind); 2]>;

/// Maps a raw notify event onto per-path change kinds.
///
/// Access events and backend-specific noise yield nothing. A rename reported
/// with both paths becomes `unlink` for the source and `add` for the target.
pub(crate) fn classify(event: &notify::Event) -> RawChanges {
    let uniform = |kind: ChangeKind| -> RawChanges {
        event
            .paths
            .iter()
            .map(|path| (path.clone(), kind))
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => uniform(ChangeKind::Add),
        EventKind::Remove(_) => uniform(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => uniform(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => uniform(ChangeKind::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = SmallVec::new();
            if let [from, to, ..] = event.paths.as_slice() {
                out.push((from.clone(), ChangeKind::Unlink));
                out.push((to.clone(), ChangeKind::Add));
            }
            out
        }
        // Backends that cannot tell which side of a rename they saw.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.exists() {
                    ChangeKind::Add
                } else {
                    ChangeKind::Unlink
                };
                (path.clone(), kind)
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any => uniform(ChangeKind::Change),
        EventKind::Access(_) | EventKind::Other => SmallVec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::path::PathBuf;

    fn raw(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |event, path| {
                event.add_path(PathBuf::from(path))
            })
    }

    #[test]
    fn test_merge_rules() {
        use ChangeKind::{Add, Change, Unlink};

        assert_eq!(Add.merge(Change), Add);
        assert_eq!(Unlink.merge(Add), Change);
        assert_eq!(Change.merge(Unlink), Unlink);
        assert_eq!(Add.merge(Unlink), Unlink);
        assert_eq!(Change.merge(Change), Change);
        assert_eq!(Change.merge(Add), Add);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ChangeKind::Unlink).unwrap(), "\"unlink\"");
        assert_eq!(ChangeKind::Add.to_string(), "add");
    }

    #[test]
    fn test_classify_basic_kinds() {
        let created = classify(&raw(EventKind::Create(CreateKind::File), &["/d/a"]));
        assert_eq!(created.as_slice(), &[(PathBuf::from("/d/a"), ChangeKind::Add)]);

        let modified = classify(&raw(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/d/a"],
        ));
        assert_eq!(modified[0].1, ChangeKind::Change);

        let removed = classify(&raw(EventKind::Remove(RemoveKind::File), &["/d/a"]));
        assert_eq!(removed[0].1, ChangeKind::Unlink);
    }

    #[test]
    fn test_classify_rename_both() {
        let renamed = classify(&raw(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/old", "/d/new"],
        ));
        assert_eq!(
            renamed.as_slice(),
            &[
                (PathBuf::from("/d/old"), ChangeKind::Unlink),
                (PathBuf::from("/d/new"), ChangeKind::Add),
            ]
        );
    }

    #[test]
    fn test_classify_ignores_access() {
        let accessed = classify(&raw(EventKind::Access(AccessKind::Any), &["/d/a"]));
        assert!(accessed.is_empty());
    }

    #[test]
    fn test_watch_event_as_change() {
        let change = WatchEvent::Changed(ChangeEvent::new("/d/a".into(), ChangeKind::Add));
        assert!(change.as_change().is_some());
        assert!(WatchEvent::Diagnostic("boom".to_owned()).as_change().is_none());
    }
}
