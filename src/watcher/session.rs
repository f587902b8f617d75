//! Watch session binding one directory to a dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::config::{Settings, WatchConfig};

use super::dispatcher::Dispatcher;
use super::error::{WatchError, WatchResult};
use super::event::{EventKind, FileEvent, RawNotification};
use super::listener::ListenerId;
use super::source::SourceAdapter;

/// Lifecycle state of a [`WatchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Native handle acquired, no events flow yet.
    Created,
    /// Events flow to listeners.
    Started,
    /// Events are suppressed; `start` resumes delivery.
    Stopped,
    /// The watch source failed. Events are suppressed; `start` retries.
    Failed,
}

/// State shared between the session owner and the delivery thread.
struct Shared {
    root: PathBuf,
    dispatcher: Arc<Dispatcher>,
    /// Delivery gate.
    running: AtomicBool,
    /// Bumped on every start so the delivery thread drops stale rename state.
    epoch: AtomicU64,
    state: Mutex<SessionState>,
    /// Held by the delivery thread while it dispatches one batch.
    in_flight: Mutex<()>,
}

impl Shared {
    fn deliver(&self, batch: Vec<RawNotification>) {
        if batch.is_empty() {
            return;
        }

        let _in_flight = self.in_flight.lock();
        for raw in batch {
            if !self.running.load(Ordering::Acquire) {
                crate::debug_event!("session", "suppressed", "{}", raw.path.display());
                continue;
            }
            let report = self.dispatcher.handle(raw);
            if report.failed > 0 {
                crate::debug_event!(
                    "session",
                    "listener failures",
                    "{} of {} {} listeners failed",
                    report.failed,
                    report.failed + report.delivered,
                    report.kind
                );
            }
        }
    }

    fn fail(&self, error: WatchError) {
        if !self.running.swap(false, Ordering::AcqRel) {
            tracing::warn!("[session] watch source error while stopped: {error}");
            return;
        }

        *self.state.lock() = SessionState::Failed;
        tracing::error!("[session] {error}");
        self.dispatcher.report(&error);
    }
}

/// Why the delivery thread woke up.
enum Wake {
    Native(notify::Result<Event>),
    Tick,
    Exit,
}

/// Delivery thread: drains native events, normalizes them and dispatches.
struct Pump {
    shared: Arc<Shared>,
    adapter: SourceAdapter,
    tick: Duration,
    epoch: u64,
}

impl Pump {
    fn run(mut self, events: Receiver<notify::Result<Event>>, shutdown: Receiver<()>) {
        crate::debug_event!("session", "delivery thread started");

        loop {
            match self.wait(&events, &shutdown) {
                Wake::Native(res) => self.on_native(res),
                Wake::Tick => {}
                Wake::Exit => break,
            }

            if self.shared.running.load(Ordering::Acquire) {
                self.sync_epoch();
                let expired = self.adapter.expire(Instant::now());
                self.shared.deliver(expired);
            } else if self.adapter.has_pending() {
                self.adapter.reset();
            }
        }

        crate::debug_event!("session", "delivery thread stopped");
    }

    /// Block until the next native event. Wakes every tick only while
    /// rename halves wait for expiry.
    fn wait(&self, events: &Receiver<notify::Result<Event>>, shutdown: &Receiver<()>) -> Wake {
        if self.adapter.has_pending() {
            select! {
                // Disconnected: native watcher dropped
                recv(events) -> msg => msg.map_or(Wake::Exit, Wake::Native),
                recv(shutdown) -> _ => Wake::Exit,
                default(self.tick) => Wake::Tick,
            }
        } else {
            select! {
                recv(events) -> msg => msg.map_or(Wake::Exit, Wake::Native),
                recv(shutdown) -> _ => Wake::Exit,
            }
        }
    }

    fn on_native(&mut self, res: notify::Result<Event>) {
        // Gate before epoch: start publishes the epoch before opening the gate
        if !self.shared.running.load(Ordering::Acquire) {
            tracing::trace!("[session] dropping native event while stopped");
            return;
        }
        self.sync_epoch();

        match res {
            Ok(event) => match self.adapter.process(event, Instant::now()) {
                Ok(batch) => self.shared.deliver(batch),
                Err(error) => {
                    self.adapter.reset();
                    self.shared.fail(error);
                }
            },
            Err(e) => {
                self.adapter.reset();
                self.shared
                    .fail(WatchError::source(self.shared.root.clone(), &e));
            }
        }
    }

    fn sync_epoch(&mut self) {
        let current = self.shared.epoch.load(Ordering::Acquire);
        if current != self.epoch {
            self.adapter.reset();
            self.epoch = current;
        }
    }
}

/// Watches one directory and delivers normalized events to listeners.
///
/// Construction acquires the native watcher and starts the delivery thread,
/// but no OS watch is registered until [`start`](Self::start). Stopping
/// removes the OS watch and keeps the native handle for a later `start`.
/// Dropping the session releases everything.
///
/// Events are delivered on the session's delivery thread, one at a time, in
/// the order the OS reports them. The event queue is unbounded, which suits
/// low-volume directories only.
pub struct WatchSession {
    shared: Arc<Shared>,
    watcher: RecommendedWatcher,
    /// Dropping the sender tells the delivery thread to exit.
    shutdown: Option<Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Create a session for `directory` with default watch settings.
    pub fn new(directory: impl Into<PathBuf>) -> WatchResult<Self> {
        Self::builder().directory(directory).build()
    }

    /// Create a builder for configuring the session.
    pub fn builder() -> WatchSessionBuilder {
        WatchSessionBuilder::new()
    }

    /// Create a session from loaded settings.
    pub fn from_settings(settings: &Settings) -> WatchResult<Self> {
        let mut builder = Self::builder().watch_config(settings.watch.clone());
        if let Some(dir) = &settings.directory {
            builder = builder.directory(dir.clone());
        }
        builder.build()
    }

    /// Enable delivery. A no-op when already started.
    pub fn start(&mut self) -> WatchResult<()> {
        if self.state() == SessionState::Started {
            return Ok(());
        }

        let root = self.shared.root.clone();
        if !root.is_dir() {
            return Err(WatchError::Configuration {
                path: root,
                reason: "directory no longer exists".to_string(),
            });
        }

        self.watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::configuration(root.clone(), e))?;

        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.running.store(true, Ordering::Release);
        *self.shared.state.lock() = SessionState::Started;

        crate::log_event!("session", "started", "{}", root.display());
        Ok(())
    }

    /// Disable delivery. A no-op unless started or failed.
    ///
    /// When called from any thread other than the delivery thread, returns
    /// only after a dispatch already in progress has finished, so no
    /// listener runs after `stop` returns.
    pub fn stop(&mut self) {
        if matches!(
            self.state(),
            SessionState::Created | SessionState::Stopped
        ) {
            return;
        }

        self.shared.running.store(false, Ordering::Release);
        if !self.on_delivery_thread() {
            drop(self.shared.in_flight.lock());
        }

        if let Err(e) = self.watcher.unwatch(&self.shared.root) {
            crate::debug_event!("session", "unwatch failed", "{e}");
        }

        *self.shared.state.lock() = SessionState::Stopped;
        crate::log_event!("session", "stopped", "{}", self.shared.root.display());
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The watched directory, in canonical absolute form.
    pub fn directory(&self) -> &Path {
        &self.shared.root
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Register a listener for one event kind. See [`Dispatcher::on`].
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&FileEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.on(kind, listener)
    }

    /// Register a rename listener. See [`Dispatcher::on_renamed`].
    pub fn on_renamed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_renamed(listener)
    }

    /// Register an error listener. See [`Dispatcher::on_error`].
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_error(listener)
    }

    /// Remove a listener. See [`Dispatcher::off`].
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.off(id)
    }

    fn on_delivery_thread(&self) -> bool {
        self.pump
            .as_ref()
            .map(|h| h.thread().id())
            .is_some_and(|id: ThreadId| id == thread::current().id())
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        drop(self.shutdown.take());

        if self.on_delivery_thread() {
            return;
        }
        if let Some(handle) = self.pump.take() {
            if handle.join().is_err() {
                tracing::error!("[session] delivery thread panicked");
            }
        }
    }
}

/// Builder for constructing a [`WatchSession`].
pub struct WatchSessionBuilder {
    directory: Option<PathBuf>,
    watch: WatchConfig,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl WatchSessionBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            directory: None,
            watch: WatchConfig::default(),
            dispatcher: None,
        }
    }

    /// Set the directory to watch.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = Some(path.into());
        self
    }

    /// Set filter, metadata policy and timing.
    pub fn watch_config(mut self, config: WatchConfig) -> Self {
        self.watch = config;
        self
    }

    /// Use an existing dispatcher, e.g. one with listeners already registered.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate the directory, acquire the native watcher and start the
    /// delivery thread.
    pub fn build(self) -> WatchResult<WatchSession> {
        let directory = self.directory.ok_or_else(|| WatchError::Configuration {
            path: PathBuf::new(),
            reason: "no directory configured".to_string(),
        })?;

        let root = validate_directory(&directory)?;
        let adapter = SourceAdapter::new(root.clone(), &self.watch)?;

        let shared = Arc::new(Shared {
            root: root.clone(),
            dispatcher: self.dispatcher.unwrap_or_default(),
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            state: Mutex::new(SessionState::Created),
            in_flight: Mutex::new(()),
        });

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver gone means the session is shutting down
            let _ = event_tx.send(res);
        })
        .map_err(|e| WatchError::configuration(root.clone(), e))?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let pump = Pump {
            shared: Arc::clone(&shared),
            adapter,
            tick: Duration::from_millis(self.watch.tick_ms.max(1)),
            epoch: 0,
        };
        let handle = thread::Builder::new()
            .name("dirwatch-delivery".to_string())
            .spawn(move || pump.run(event_rx, shutdown_rx))
            .map_err(|e| WatchError::Configuration {
                path: root.clone(),
                reason: format!("failed to spawn delivery thread: {e}"),
            })?;

        crate::debug_event!("session", "created", "{}", root.display());

        Ok(WatchSession {
            shared,
            watcher,
            shutdown: Some(shutdown_tx),
            pump: Some(handle),
        })
    }
}

impl Default for WatchSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that `path` is an existing directory and return its canonical form.
fn validate_directory(path: &Path) -> WatchResult<PathBuf> {
    let configuration = |reason: String| WatchError::Configuration {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => configuration("directory does not exist".to_string()),
        _ => configuration(e.to_string()),
    })?;

    if !metadata.is_dir() {
        return Err(configuration("not a directory".to_string()));
    }

    path.canonicalize().map_err(|e| configuration(e.to_string()))
}
