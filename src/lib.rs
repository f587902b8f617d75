//! Watch one directory and dispatch normalized file events to listeners.
//!
//! ```no_run
//! use dirwatch::{EventKind, WatchSession};
//!
//! # fn main() -> Result<(), dirwatch::WatchError> {
//! let mut session = WatchSession::new("/srv/inbox")?;
//! session.on(EventKind::Created, |event| {
//!     println!("new file: {}", event.path().display());
//!     Ok(())
//! });
//! session.start()?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{
    DispatchReport, Dispatcher, EventKind, FileEvent, Listener, ListenerId, SessionState,
    WatchError, WatchResult, WatchSession, WatchSessionBuilder,
};
