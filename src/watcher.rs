use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use log::{Level, debug, log, warn};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::events::{EventMask, FileEvent, WatchId};
use crate::fs::FileKind;

#[derive(Debug, Clone)]
pub struct FileEventsConfig {
    pub recursive: bool,
    pub poll_interval: Duration,
    pub dispatch_tick: Duration,
    pub verbose: bool,
}

impl Default for FileEventsConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            poll_interval: Duration::from_secs(2),
            dispatch_tick: Duration::from_millis(100),
            verbose: false,
        }
    }
}

#[derive(Debug)]
pub enum FileEventsError {
    /// The handle has been closed.
    Closed,
    PathNotFound(PathBuf),
    Io { path: PathBuf, source: io::Error },
    UnknownWatch(WatchId),
    /// Events are delivered to a callback, there is no queue to poll.
    CallbackDelivery,
    Notify(notify::Error),
    ThreadSpawn(io::Error),
}

impl fmt::Display for FileEventsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileEventsError::Closed => f.write_str("file event system is closed"),
            FileEventsError::PathNotFound(path) => {
                write!(f, "path does not exist: {}", path.display())
            }
            FileEventsError::Io { path, source } => {
                write!(f, "failed to resolve {}: {source}", path.display())
            }
            FileEventsError::UnknownWatch(id) => write!(f, "no watch registered as {id}"),
            FileEventsError::CallbackDelivery => {
                f.write_str("events are delivered to a callback and cannot be polled")
            }
            FileEventsError::Notify(err) => write!(f, "watcher error: {err}"),
            FileEventsError::ThreadSpawn(err) => {
                write!(f, "failed to spawn dispatch thread: {err}")
            }
        }
    }
}

impl std::error::Error for FileEventsError {}

impl From<notify::Error> for FileEventsError {
    fn from(value: notify::Error) -> Self {
        FileEventsError::Notify(value)
    }
}

#[derive(Debug, Clone)]
struct WatchEntry {
    path: PathBuf,
    mask: EventMask,
}

impl WatchEntry {
    fn covers(&self, path: &Path, recursive: bool) -> bool {
        if recursive {
            path.starts_with(&self.path)
        } else {
            path == self.path || path.parent() == Some(self.path.as_path())
        }
    }
}

#[derive(Debug, Default)]
struct WatchTable {
    counter: u64,
    entries: BTreeMap<WatchId, WatchEntry>,
}

impl WatchTable {
    fn find_path(&self, path: &Path) -> Option<WatchId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.path == path)
            .map(|(id, _)| *id)
    }

    fn insert(&mut self, path: PathBuf, mask: EventMask) -> WatchId {
        self.counter += 1;
        let id = WatchId(self.counter);
        self.entries.insert(id, WatchEntry { path, mask });
        id
    }

    fn matching(&self, path: &Path, flags: EventMask, recursive: bool) -> Option<WatchId> {
        self.entries
            .iter()
            .find(|(_, entry)| {
                entry.covers(path, recursive) && entry.mask.intersects(flags.changes())
            })
            .map(|(id, _)| *id)
    }

    /// Paths that need their own OS registration. A recursive registration
    /// already covers every entry below it, and registering a nested path
    /// again would share and later tear down the parent's kernel watches.
    fn os_roots(&self, recursive: bool) -> BTreeSet<PathBuf> {
        self.entries
            .values()
            .filter(|entry| {
                !recursive
                    || !self.entries.values().any(|other| {
                        other.path != entry.path && entry.path.starts_with(&other.path)
                    })
            })
            .map(|entry| entry.path.clone())
            .collect()
    }
}

fn lock(table: &Mutex<WatchTable>) -> MutexGuard<'_, WatchTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

type Callback = Box<dyn FnMut(&FileEvent) + Send>;

enum Sink {
    Queue(Sender<FileEvent>),
    Callback(Callback),
}

impl Sink {
    fn deliver(&mut self, event: FileEvent) {
        match self {
            Sink::Queue(tx) => {
                let _ = tx.send(event);
            }
            Sink::Callback(callback) => callback(&event),
        }
    }
}

/// Handle to one file event session.
///
/// Events are matched against the registered watches on a dedicated dispatch
/// thread and either queued for polling ([`FileEventSystem::init`]) or passed
/// to a callback ([`FileEventSystem::with_callback`]). Closing the handle
/// joins that thread, so no event is observed once `close` returns.
pub struct FileEventSystem {
    config: FileEventsConfig,
    watcher: Option<RecommendedWatcher>,
    table: Arc<Mutex<WatchTable>>,
    shutdown: Arc<AtomicBool>,
    dispatch: Option<thread::JoinHandle<()>>,
    events: Option<Receiver<FileEvent>>,
    registered: BTreeSet<PathBuf>,
}

impl FileEventSystem {
    /// Opens a session whose events are queued for [`FileEventSystem::recv_timeout`]
    /// and [`FileEventSystem::try_recv`]. The queue is unbounded: events pile
    /// up in memory until they are received or the handle is closed.
    pub fn init(config: FileEventsConfig) -> Result<Self, FileEventsError> {
        let (event_tx, event_rx) = unbounded();
        let mut system = Self::start(config, Sink::Queue(event_tx))?;
        system.events = Some(event_rx);
        Ok(system)
    }

    /// Opens a session that invokes `callback` for each event. The callback
    /// runs on the dispatch thread, never on the caller's.
    pub fn with_callback<F>(config: FileEventsConfig, callback: F) -> Result<Self, FileEventsError>
    where
        F: FnMut(&FileEvent) + Send + 'static,
    {
        Self::start(config, Sink::Callback(Box::new(callback)))
    }

    fn start(config: FileEventsConfig, sink: Sink) -> Result<Self, FileEventsError> {
        let (raw_tx, raw_rx) = unbounded();
        let watcher = RecommendedWatcher::new(
            move |event: Result<Event, notify::Error>| {
                let _ = raw_tx.send(event);
            },
            Config::default()
                .with_poll_interval(config.poll_interval)
                .with_compare_contents(false),
        )?;

        let table = Arc::new(Mutex::new(WatchTable::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let table_clone = table.clone();
        let shutdown_clone = shutdown.clone();
        let config_clone = config.clone();

        let dispatch = thread::Builder::new()
            .name("fileevents-dispatch".into())
            .spawn(move || {
                run_dispatch_loop(&raw_rx, &table_clone, &shutdown_clone, sink, &config_clone)
            })
            .map_err(FileEventsError::ThreadSpawn)?;

        debug!("fileevents opened recursive={}", config.recursive);

        Ok(Self {
            config,
            watcher: Some(watcher),
            table,
            shutdown,
            dispatch: Some(dispatch),
            events: None,
            registered: BTreeSet::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.watcher.is_some()
    }

    /// Registers `path` for the change kinds in `mask`. A mask without change
    /// bits selects [`EventMask::ALL`]. Watching an already registered path
    /// updates its mask and returns the existing id.
    pub fn add_watch(
        &mut self,
        path: impl AsRef<Path>,
        mask: EventMask,
    ) -> Result<WatchId, FileEventsError> {
        let watcher = self.watcher.as_mut().ok_or(FileEventsError::Closed)?;
        let requested = path.as_ref();
        let path = requested.canonicalize().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => FileEventsError::PathNotFound(requested.to_path_buf()),
            _ => FileEventsError::Io {
                path: requested.to_path_buf(),
                source: err,
            },
        })?;
        let mask = if mask.changes().is_empty() {
            EventMask::ALL
        } else {
            mask
        };

        let mut table = lock(&self.table);
        if let Some(id) = table.find_path(&path) {
            if let Some(entry) = table.entries.get_mut(&id) {
                entry.mask = mask;
            }
            debug!("fileevents updated watch {id} path={} mask={mask}", path.display());
            return Ok(id);
        }

        let id = table.insert(path.clone(), mask);
        let recursive = self.config.recursive;
        if let Err(err) = sync_registrations(watcher, &mut self.registered, &table, recursive) {
            table.entries.remove(&id);
            if let Err(restore) =
                sync_registrations(watcher, &mut self.registered, &table, recursive)
            {
                warn!("fileevents failed to restore registrations: {restore}");
            }
            return Err(err);
        }

        debug!("fileevents watching {id} path={} mask={mask}", path.display());
        Ok(id)
    }

    pub fn remove_watch(&mut self, id: WatchId) -> Result<(), FileEventsError> {
        let watcher = self.watcher.as_mut().ok_or(FileEventsError::Closed)?;
        let mut table = lock(&self.table);
        let entry = table
            .entries
            .remove(&id)
            .ok_or(FileEventsError::UnknownWatch(id))?;
        sync_registrations(watcher, &mut self.registered, &table, self.config.recursive)?;
        debug!("fileevents removed watch {id} path={}", entry.path.display());
        Ok(())
    }

    pub fn watches(&self) -> Vec<(WatchId, PathBuf, EventMask)> {
        lock(&self.table)
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.path.clone(), entry.mask))
            .collect()
    }

    /// Waits up to `timeout` for the next queued event. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<FileEvent>, FileEventsError> {
        match self.queue()?.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FileEventsError::Closed),
        }
    }

    pub fn try_recv(&self) -> Result<Option<FileEvent>, FileEventsError> {
        match self.queue()?.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(FileEventsError::Closed),
        }
    }

    fn queue(&self) -> Result<&Receiver<FileEvent>, FileEventsError> {
        if !self.is_open() {
            return Err(FileEventsError::Closed);
        }
        self.events.as_ref().ok_or(FileEventsError::CallbackDelivery)
    }

    /// Stops delivery and releases the watcher. Returns once the dispatch
    /// thread has exited; queued events that were never received are dropped.
    pub fn close(&mut self) {
        let Some(watcher) = self.watcher.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        drop(watcher);

        if let Some(handle) = self.dispatch.take() {
            if handle.join().is_err() {
                warn!("fileevents dispatch thread panicked");
            }
        }

        if let Some(events) = self.events.take() {
            let dropped = events.try_iter().count();
            if dropped > 0 {
                debug!("fileevents dropped {dropped} undelivered events");
            }
        }

        lock(&self.table).entries.clear();
        self.registered.clear();
        debug!("fileevents closed");
    }
}

impl Drop for FileEventSystem {
    fn drop(&mut self) {
        self.close();
    }
}

/// Brings the OS registrations in line with the watch table. Stale
/// registrations go first so a recursive unwatch cannot remove kernel watches
/// that a new registration just installed.
fn sync_registrations(
    watcher: &mut RecommendedWatcher,
    registered: &mut BTreeSet<PathBuf>,
    table: &WatchTable,
    recursive: bool,
) -> Result<(), FileEventsError> {
    let desired = table.os_roots(recursive);
    let stale: Vec<PathBuf> = registered.difference(&desired).cloned().collect();
    for path in stale {
        registered.remove(&path);
        if let Err(err) = watcher.unwatch(&path) {
            warn!("fileevents failed to unwatch {}: {err}", path.display());
        }
    }

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    let missing: Vec<PathBuf> = desired.difference(registered).cloned().collect();
    for path in missing {
        watcher.watch(&path, mode)?;
        registered.insert(path);
    }
    Ok(())
}

fn run_dispatch_loop(
    raw_rx: &Receiver<Result<Event, notify::Error>>,
    table: &Mutex<WatchTable>,
    shutdown: &AtomicBool,
    mut sink: Sink,
    config: &FileEventsConfig,
) {
    let level = if config.verbose {
        Level::Debug
    } else {
        Level::Trace
    };

    while !shutdown.load(Ordering::SeqCst) {
        let event = match raw_rx.recv_timeout(config.dispatch_tick) {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => {
                warn!("fileevents watcher error: {err}");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for path in &event.paths {
            let Some(flags) = change_flags(&event.kind, path) else {
                continue;
            };
            let Some(watch) = lock(table).matching(path, flags, config.recursive) else {
                continue;
            };
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            log!(level, "fileevents {} {flags} ({watch})", path.display());
            sink.deliver(FileEvent::new(path.clone(), flags, watch));
        }
    }
}

fn change_flags(kind: &EventKind, path: &Path) -> Option<EventMask> {
    let (change, entry) = match kind {
        EventKind::Create(create) => (
            EventMask::CREATED,
            match create {
                CreateKind::File => Some(FileKind::File),
                CreateKind::Folder => Some(FileKind::Directory),
                _ => FileKind::of(path),
            },
        ),
        EventKind::Remove(remove) => (
            EventMask::REMOVED,
            match remove {
                RemoveKind::File => Some(FileKind::File),
                RemoveKind::Folder => Some(FileKind::Directory),
                _ => None,
            },
        ),
        // Paired renames also arrive as separate From/To events.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return None,
        EventKind::Modify(ModifyKind::Name(_)) => (EventMask::RENAMED, FileKind::of(path)),
        EventKind::Modify(ModifyKind::Metadata(_)) => (EventMask::ATTRIBUTE, FileKind::of(path)),
        EventKind::Modify(_) => (EventMask::MODIFIED, FileKind::of(path)),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
    };
    Some(entry.map_or(change, |kind| change | EventMask::from(kind)))
}
