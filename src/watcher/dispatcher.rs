//! Registration table and fan-out of normalized events.

use std::any::Any;
use std::num::NonZeroU64;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::WatchError;
use super::event::{EventKind, FileEvent, RawNotification};
use super::listener::{ErrorListener, Listener, ListenerId, RenameListener};

struct Entry {
    id: ListenerId,
    listener: Arc<dyn Listener>,
}

struct ErrorEntry {
    id: ListenerId,
    listener: Arc<ErrorListener>,
}

struct Registry {
    next_id: NonZeroU64,
    /// Listeners per kind, in registration order.
    by_kind: [Vec<Entry>; 4],
    errors: Vec<ErrorEntry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            next_id: NonZeroU64::MIN,
            by_kind: Default::default(),
            errors: Vec::new(),
        }
    }
}

impl Registry {
    fn next_id(&mut self) -> ListenerId {
        let id = ListenerId::from_raw(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }
}

/// Outcome of dispatching one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: EventKind,
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Classifies raw notifications and invokes the listeners registered for
/// each kind.
///
/// The table lock is held only while registering or taking a snapshot, so
/// listeners may register or remove listeners from inside a callback. A
/// removal made during dispatch takes effect from the next notification.
#[derive(Default)]
pub struct Dispatcher {
    registry: Mutex<Registry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&FileEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, listener)
    }

    /// Register a closure that receives the old and new path of each rename.
    pub fn on_renamed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Renamed, RenameListener(listener))
    }

    /// Register any [`Listener`] implementation for one event kind.
    pub fn subscribe(&self, kind: EventKind, listener: impl Listener + 'static) -> ListenerId {
        let mut registry = self.registry.lock();
        let id = registry.next_id();
        registry.by_kind[kind.index()].push(Entry {
            id,
            listener: Arc::new(listener),
        });
        crate::debug_event!("dispatch", "registered", "{id} for {kind}");
        id
    }

    /// Register a callback for listener failures and watch source failures.
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id();
        registry.errors.push(ErrorEntry {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a listener of any kind. Returns `false` if the id is unknown.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();

        for entries in registry.by_kind.iter_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                crate::debug_event!("dispatch", "removed", "{id}");
                return true;
            }
        }

        if let Some(pos) = registry.errors.iter().position(|e| e.id == id) {
            registry.errors.remove(pos);
            return true;
        }

        false
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.lock().by_kind[kind.index()].len()
    }

    /// Number of registered error listeners.
    pub fn error_listener_count(&self) -> usize {
        self.registry.lock().errors.len()
    }

    /// Classify one raw notification and deliver it to every listener of its
    /// kind, in registration order.
    ///
    /// A listener that fails is reported through the error side channel and
    /// the remaining listeners still run.
    pub fn handle(&self, raw: RawNotification) -> DispatchReport {
        let event = raw.into_event();
        let kind = event.kind();

        let listeners: Vec<(ListenerId, Arc<dyn Listener>)> = {
            let registry = self.registry.lock();
            registry.by_kind[kind.index()]
                .iter()
                .map(|e| (e.id, Arc::clone(&e.listener)))
                .collect()
        };

        let mut report = DispatchReport {
            kind,
            delivered: 0,
            failed: 0,
        };

        for (id, listener) in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));

            let reason = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            report.failed += 1;
            let error = WatchError::ListenerFailed {
                listener: listener
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| id.to_string()),
                kind,
                path: event.path().to_path_buf(),
                reason,
            };
            tracing::error!("[dispatch] {error}");
            self.report(&error);
        }

        crate::debug_event!(
            "dispatch",
            kind,
            "{} ({} delivered, {} failed)",
            event.path().display(),
            report.delivered,
            report.failed
        );

        report
    }

    /// Forward an error to every error listener.
    pub fn report(&self, error: &WatchError) {
        let listeners: Vec<Arc<ErrorListener>> = self
            .registry
            .lock()
            .errors
            .iter()
            .map(|e| Arc::clone(&e.listener))
            .collect();

        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(error))) {
                tracing::warn!(
                    "[dispatch] error listener panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::listener::named;
    use std::path::PathBuf;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(
        log: &Log,
        tag: &'static str,
    ) -> impl Fn(&FileEvent) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event: &FileEvent| {
            log.lock().push(format!("{tag}:{}", event.path().display()));
            Ok(())
        }
    }

    #[test]
    fn test_invocations_per_kind() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();

        dispatcher.on(EventKind::Created, recorder(&log, "c1"));
        dispatcher.on(EventKind::Created, recorder(&log, "c2"));
        dispatcher.on(EventKind::Deleted, recorder(&log, "d1"));

        dispatcher.handle(RawNotification::created("/w/a"));
        dispatcher.handle(RawNotification::created("/w/b"));
        dispatcher.handle(RawNotification::deleted("/w/a"));
        dispatcher.handle(RawNotification::modified("/w/a"));

        let log = log.lock();
        // 2 created x 2 listeners + 1 deleted x 1 listener
        assert_eq!(log.len(), 5);
        assert_eq!(log.iter().filter(|l| l.starts_with('c')).count(), 4);
        assert_eq!(log.iter().filter(|l| l.starts_with("d1:/w/a")).count(), 1);
    }

    #[test]
    fn test_registration_order_is_dispatch_order() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();

        dispatcher.on(EventKind::Modified, recorder(&log, "L1"));
        dispatcher.on(EventKind::Modified, recorder(&log, "L2"));
        dispatcher.on(EventKind::Modified, recorder(&log, "L3"));

        dispatcher.handle(RawNotification::modified("/w/x"));

        assert_eq!(*log.lock(), vec!["L1:/w/x", "L2:/w/x", "L3:/w/x"]);
    }

    #[test]
    fn test_empty_listener_set_is_silent() {
        let dispatcher = Dispatcher::new();
        let report = dispatcher.handle(RawNotification::deleted("/w/gone"));
        assert_eq!(
            report,
            DispatchReport {
                kind: EventKind::Deleted,
                delivered: 0,
                failed: 0,
            }
        );
    }

    #[test]
    fn test_renamed_listeners_get_both_paths() {
        let dispatcher = Dispatcher::new();
        let pairs: Arc<Mutex<Vec<(PathBuf, PathBuf)>>> = Arc::default();
        let events: Arc<Mutex<Vec<FileEvent>>> = Arc::default();

        let sink = Arc::clone(&pairs);
        dispatcher.on_renamed(move |old, new| {
            sink.lock().push((old.to_path_buf(), new.to_path_buf()));
            Ok(())
        });
        let sink = Arc::clone(&events);
        dispatcher.on(EventKind::Renamed, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });

        dispatcher.handle(RawNotification::renamed("/w/a.txt", "/w/b.txt"));

        assert_eq!(
            *pairs.lock(),
            vec![(PathBuf::from("/w/a.txt"), PathBuf::from("/w/b.txt"))]
        );
        assert_eq!(
            *events.lock(),
            vec![FileEvent::renamed("/w/a.txt", "/w/b.txt")]
        );
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();
        let errors: Arc<Mutex<Vec<WatchError>>> = Arc::default();

        dispatcher.on(EventKind::Created, recorder(&log, "first"));
        dispatcher.subscribe(
            EventKind::Created,
            named("broken", |_: &FileEvent| -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }),
        );
        dispatcher.on(EventKind::Created, |_| panic!("listener bug"));
        dispatcher.on(EventKind::Created, recorder(&log, "last"));

        let sink = Arc::clone(&errors);
        dispatcher.on_error(move |e| sink.lock().push(e.clone()));

        let report = dispatcher.handle(RawNotification::created("/w/a"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 2);

        // Subsequent events still flow
        dispatcher.handle(RawNotification::created("/w/b"));

        assert_eq!(
            *log.lock(),
            vec!["first:/w/a", "last:/w/a", "first:/w/b", "last:/w/b"]
        );

        let errors = errors.lock();
        assert_eq!(errors.len(), 4);
        match &errors[0] {
            WatchError::ListenerFailed {
                listener,
                kind,
                path,
                reason,
            } => {
                assert_eq!(listener, "broken");
                assert_eq!(*kind, EventKind::Created);
                assert_eq!(path, Path::new("/w/a"));
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match &errors[1] {
            WatchError::ListenerFailed { reason, .. } => {
                assert!(reason.contains("listener bug"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_panicking_error_listener_does_not_escape() {
        let dispatcher = Dispatcher::new();
        dispatcher.on(EventKind::Created, |_| anyhow::bail!("nope"));
        dispatcher.on_error(|_| panic!("error listener bug"));

        let report = dispatcher.handle(RawNotification::created("/w/a"));
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();

        let keep = dispatcher.on(EventKind::Created, recorder(&log, "keep"));
        let drop = dispatcher.on(EventKind::Created, recorder(&log, "drop"));
        let err = dispatcher.on_error(|_| {});

        assert!(dispatcher.off(drop));
        assert!(!dispatcher.off(drop));
        assert!(dispatcher.off(err));
        assert_ne!(keep, drop);
        assert_eq!(dispatcher.listener_count(EventKind::Created), 1);
        assert_eq!(dispatcher.error_listener_count(), 0);

        dispatcher.handle(RawNotification::created("/w/a"));
        assert_eq!(*log.lock(), vec!["keep:/w/a"]);
    }

    #[test]
    fn test_listener_may_register_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log: Log = Arc::default();

        let inner = Arc::clone(&dispatcher);
        let inner_log = Arc::clone(&log);
        dispatcher.on(EventKind::Created, move |_| {
            inner.on(EventKind::Created, recorder(&inner_log, "late"));
            Ok(())
        });

        // The late listener joins from the next event on
        dispatcher.handle(RawNotification::created("/w/a"));
        assert!(log.lock().is_empty());

        dispatcher.handle(RawNotification::created("/w/b"));
        assert_eq!(*log.lock(), vec!["late:/w/b"]);
    }
}
