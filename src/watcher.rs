//! [`TreeWatcher`] facade and its builder.
//!
//! The watcher is driven in one of two ways:
//! - simple mode: the caller calls [`TreeWatcher::pump`] in its own loop and
//!   listeners run on that thread;
//! - service mode: [`TreeWatcher::start`] moves the raw source onto a producer
//!   thread and listeners run on the consumer thread until
//!   [`TreeWatcher::stop`].

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

use crate::BufferConfig;
use crate::BufferedInterpreter;
use crate::Error;
use crate::EventListener;
use crate::EventMask;
use crate::EventSink;
use crate::MonitorService;
use crate::MoveInterpreter;
use crate::RawEventSource;
use crate::RawWatcher;
use crate::RecursiveWatchManager;
use crate::Result;
use crate::ServiceConfig;
use crate::ServiceError;
use crate::SourcePoll;
use crate::StatsSnapshot;
use crate::WatchHandle;
use crate::WatcherConfig;

/// Assembles a [`TreeWatcher`] from a primitive, its event source and a
/// [`WatcherConfig`].
pub struct TreeWatcherBuilder<W: RawWatcher> {
    config: WatcherConfig,
    primitive: Arc<W>,
    source: Box<dyn RawEventSource>,
}

impl<W: RawWatcher> TreeWatcherBuilder<W> {
    /// Builder with configuration loaded from the file and environment.
    pub fn new(
        primitive: Arc<W>,
        source: impl RawEventSource,
    ) -> Result<Self> {
        Ok(Self::from_config(WatcherConfig::new()?, primitive, source))
    }

    pub fn from_config(
        config: WatcherConfig,
        primitive: Arc<W>,
        source: impl RawEventSource,
    ) -> Self {
        Self {
            config,
            primitive,
            source: Box::new(source),
        }
    }

    /// Replaces the entire configuration
    pub fn config(
        mut self,
        config: WatcherConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn buffer(
        mut self,
        buffer: BufferConfig,
    ) -> Self {
        self.config.buffer = buffer;
        self
    }

    pub fn service(
        mut self,
        service: ServiceConfig,
    ) -> Self {
        self.config.service = service;
        self
    }

    /// Validates the configuration and wires manager, interpreter, optional
    /// delay buffer and delivery service together.
    pub fn build(self) -> Result<TreeWatcher<W>> {
        let config = self.config.validate()?;

        let manager = Arc::new(RecursiveWatchManager::new(
            self.primitive,
            config.service.error_report_capacity,
        ));
        let interpreter = MoveInterpreter::new(
            manager.clone(),
            config.buffer.suppress_source_events_on_move,
        );

        let (sink, buffered): (Arc<dyn EventSink>, _) = if config.buffer.enabled {
            let buffered = Arc::new(BufferedInterpreter::new(interpreter, &config.buffer));
            let sink: Arc<dyn EventSink> = buffered.clone();
            (sink, Some(buffered))
        } else {
            let sink: Arc<dyn EventSink> = Arc::new(interpreter);
            (sink, None)
        };
        let service = MonitorService::new(sink.clone(), manager.stats().clone(), &config.service);

        debug!(?config, "tree watcher built");
        Ok(TreeWatcher {
            config,
            manager,
            sink,
            buffered,
            service,
            mode: Mutex::new(Mode::Manual(self.source)),
        })
    }
}

#[cfg(target_os = "linux")]
impl TreeWatcherBuilder<crate::InotifyWatcher> {
    /// Builder over a fresh inotify instance, configured from file and environment.
    pub fn inotify() -> Result<Self> {
        let (watcher, source) = crate::InotifyWatcher::new()?;
        Self::new(Arc::new(watcher), source)
    }
}

enum Mode {
    /// Simple mode; the source is still ours
    Manual(Box<dyn RawEventSource>),
    Service,
    Stopped,
}

/// Recursive directory watcher: the public face of the engine.
pub struct TreeWatcher<W: RawWatcher> {
    config: WatcherConfig,
    manager: Arc<RecursiveWatchManager<W>>,
    sink: Arc<dyn EventSink>,
    buffered: Option<Arc<BufferedInterpreter<W>>>,
    service: MonitorService,
    mode: Mutex<Mode>,
}

impl<W: RawWatcher> TreeWatcher<W> {
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<RecursiveWatchManager<W>> {
        &self.manager
    }

    /// Watch `path` and everything below it, reporting `mask` to listeners.
    pub fn watch_tree(
        &self,
        path: impl AsRef<Path>,
        mask: EventMask,
    ) -> Result<WatchHandle> {
        let root = self.manager.watch_tree(path.as_ref(), mask)?;
        info!(%root, path = ?path.as_ref(), "watching tree");
        Ok(root)
    }

    pub fn unwatch_tree(
        &self,
        root: WatchHandle,
    ) -> Result<()> {
        self.manager.unwatch_tree(root)
    }

    pub fn add_listener(
        &self,
        root: WatchHandle,
        listener: Arc<dyn EventListener>,
    ) -> Result<()> {
        self.manager.add_listener(root, listener)
    }

    pub fn add_listener_with_mask(
        &self,
        root: WatchHandle,
        listener: Arc<dyn EventListener>,
        mask: EventMask,
    ) -> Result<()> {
        self.manager.add_listener_with_mask(root, listener, mask)
    }

    pub fn remove_listener(
        &self,
        root: WatchHandle,
        listener: &Arc<dyn EventListener>,
    ) -> Result<bool> {
        self.manager.remove_listener(root, listener)
    }

    pub fn resolve_handle(
        &self,
        path: impl AsRef<Path>,
    ) -> Option<WatchHandle> {
        self.manager.resolve_handle(path)
    }

    pub fn watched_paths(
        &self,
        root: WatchHandle,
    ) -> Result<Vec<PathBuf>> {
        self.manager.watched_paths(root)
    }

    /// Poll the raw source once and process what it returned on this thread.
    ///
    /// Returns how many raw events were read, or `None` once the source is
    /// closed. Fails while the delivery service owns the source.
    pub fn pump(
        &self,
        timeout: Duration,
    ) -> Result<Option<usize>> {
        let mut mode = self.mode.lock();
        let source = match &mut *mode {
            Mode::Manual(source) => source,
            Mode::Service => return Err(ServiceError::AlreadyRunning.into()),
            Mode::Stopped => return Err(ServiceError::Stopped.into()),
        };

        let batch = match source.poll_events(timeout) {
            Ok(SourcePoll::Events(batch)) => batch,
            Ok(SourcePoll::Timeout) => Vec::new(),
            Ok(SourcePoll::Closed) => return Ok(None),
            Err(e) => return Err(ServiceError::SourceFailed(e).into()),
        };

        let count = batch.len();
        let stats = self.manager.stats();
        for event in batch {
            stats.record_arrival(Instant::now());
            self.sink.accept(event);
        }
        if let Some(buffered) = &self.buffered {
            buffered.release_due();
        }
        Ok(Some(count))
    }

    /// Switch to service mode: producer and consumer threads take over.
    pub fn start(&self) -> Result<()> {
        let mut mode = self.mode.lock();
        let source = match std::mem::replace(&mut *mode, Mode::Stopped) {
            Mode::Manual(source) => source,
            Mode::Service => {
                *mode = Mode::Service;
                return Err(ServiceError::AlreadyRunning.into());
            }
            Mode::Stopped => return Err(ServiceError::Stopped.into()),
        };

        match self.service.start_or_return(source) {
            Ok(()) => {
                *mode = Mode::Service;
                Ok(())
            }
            Err((e, source)) => {
                // Still usable in simple mode, or for another start
                *mode = Mode::Manual(source);
                Err(e)
            }
        }
    }

    /// Stop delivering. Buffered events are flushed or discarded as
    /// configured; no listener runs after this returns.
    pub fn stop(&self) -> Result<()> {
        let mut mode = self.mode.lock();
        match std::mem::replace(&mut *mode, Mode::Stopped) {
            Mode::Service => self.service.stop()?,
            Mode::Manual(_) => self.sink.stop(),
            Mode::Stopped => return Err(ServiceError::NotRunning.into()),
        }
        info!(stats = ?self.stats(), "tree watcher stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.manager.stats().snapshot()
    }

    /// Events held back by the delay buffer
    pub fn pending(&self) -> usize {
        self.buffered.as_ref().map_or(0, |b| b.pending())
    }

    /// Failures from background work; see [`RecursiveWatchManager::errors`].
    pub fn errors(&self) -> Receiver<Error> {
        self.manager.errors()
    }
}
