//! Single-directory watcher with per-kind listener dispatch.
//!
//! A [`WatchSession`] owns one native watcher for one directory. Native
//! events are normalized by the source adapter and fanned out by the
//! [`Dispatcher`] to the listeners registered for each [`EventKind`].
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher
//!         | (crossbeam channel)
//!         v
//! delivery thread
//!   - SourceAdapter (kind mapping, rename pairing, name filter)
//!   - gate: delivery only while started
//!         |
//!         v
//! Dispatcher
//!   +----------+----------+----------+
//!   |          |          |          |
//! created   deleted   modified   renamed     (+ error listeners)
//! ```

mod dispatcher;
mod error;
mod event;
mod listener;
mod rename;
mod session;
mod source;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{WatchError, WatchResult};
pub use event::{EventKind, FileEvent, RawKind, RawNotification};
pub use listener::{ErrorListener, Listener, ListenerId, Named, named};
pub use session::{SessionState, WatchSession, WatchSessionBuilder};
pub use source::SourceAdapter;
