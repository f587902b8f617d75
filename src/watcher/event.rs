//! Normalized event types.
//!
//! `RawNotification` is what the source adapter hands to the dispatcher.
//! `FileEvent` is what listeners see.

use std::fmt;
use std::path::{Path, PathBuf};

/// Semantic kind of a file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Deleted,
    Modified,
    Renamed,
}

impl EventKind {
    /// All kinds, in table order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::Deleted,
        EventKind::Modified,
        EventKind::Renamed,
    ];

    /// Slot of this kind in per-kind tables.
    pub(crate) fn index(self) -> usize {
        match self {
            EventKind::Created => 0,
            EventKind::Deleted => 1,
            EventKind::Modified => 2,
            EventKind::Renamed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Deleted => "deleted",
            EventKind::Modified => "modified",
            EventKind::Renamed => "renamed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized change, as delivered to listeners.
///
/// Only `renamed` events carry an old path. Fields are private so the
/// pairing of kind and old path cannot be broken after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    kind: EventKind,
    path: PathBuf,
    old_path: Option<PathBuf>,
}

impl FileEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::single(EventKind::Created, path.into())
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::single(EventKind::Deleted, path.into())
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::single(EventKind::Modified, path.into())
    }

    /// A rename from `old_path` to `path`.
    pub fn renamed(old_path: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Renamed,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }

    fn single(kind: EventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            old_path: None,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The affected path. For renames, the new path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The previous path of a renamed entry; `None` for every other kind.
    pub fn old_path(&self) -> Option<&Path> {
        self.old_path.as_deref()
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(
                f,
                "{} {} => {}",
                self.kind,
                old.display(),
                self.path.display()
            ),
            None => write!(f, "{} {}", self.kind, self.path.display()),
        }
    }
}

/// Kind of a raw notification after backend quirks are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKind {
    Created,
    Deleted,
    Modified,
    Renamed { from: PathBuf },
}

/// A single change reported by the watch source, before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub kind: RawKind,
    pub path: PathBuf,
}

impl RawNotification {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RawKind::Created,
            path: path.into(),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RawKind::Deleted,
            path: path.into(),
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RawKind::Modified,
            path: path.into(),
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: RawKind::Renamed { from: from.into() },
            path: to.into(),
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self.kind {
            RawKind::Created => EventKind::Created,
            RawKind::Deleted => EventKind::Deleted,
            RawKind::Modified => EventKind::Modified,
            RawKind::Renamed { .. } => EventKind::Renamed,
        }
    }

    /// Classify into the listener-facing event.
    pub fn into_event(self) -> FileEvent {
        match self.kind {
            RawKind::Created => FileEvent::created(self.path),
            RawKind::Deleted => FileEvent::deleted(self.path),
            RawKind::Modified => FileEvent::modified(self.path),
            RawKind::Renamed { from } => FileEvent::renamed(from, self.path),
        }
    }
}
