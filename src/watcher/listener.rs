//! Listener trait and registration tokens.

use std::fmt;
use std::num::NonZeroU64;
use std::path::Path;

use super::error::WatchError;
use super::event::FileEvent;

/// Trait for subscribers that receive normalized file events.
///
/// Any `Fn(&FileEvent) -> anyhow::Result<()>` closure is a listener. An
/// `Err` return (or a panic) is reported as a listener failure and does not
/// stop delivery to other listeners.
pub trait Listener: Send + Sync {
    /// Name used when reporting failures. Unnamed listeners are reported by id.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Handle one event.
    fn on_event(&self, event: &FileEvent) -> anyhow::Result<()>;
}

impl<F> Listener for F
where
    F: Fn(&FileEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &FileEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// A listener with a name for failure reports.
pub struct Named<L> {
    name: String,
    inner: L,
}

/// Attach a name to a listener.
pub fn named<L: Listener>(name: impl Into<String>, listener: L) -> Named<L> {
    Named {
        name: name.into(),
        inner: listener,
    }
}

impl<L: Listener> Listener for Named<L> {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn on_event(&self, event: &FileEvent) -> anyhow::Result<()> {
        self.inner.on_event(event)
    }
}

/// Adapts a two-path closure into a listener for renamed events.
pub(crate) struct RenameListener<F>(pub(crate) F);

impl<F> Listener for RenameListener<F>
where
    F: Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &FileEvent) -> anyhow::Result<()> {
        match event.old_path() {
            Some(old) => (self.0)(old, event.path()),
            None => Ok(()),
        }
    }
}

/// Callback for the failure side channel.
pub type ErrorListener = dyn Fn(&WatchError) + Send + Sync;

/// Token returned by every registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(NonZeroU64);

impl ListenerId {
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub(crate) fn from_raw(value: NonZeroU64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}
