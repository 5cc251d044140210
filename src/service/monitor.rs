//! Delivery pipeline
//!
//! ```text
//! producer thread:  source.poll_events() -> try_send(queue) ---full---> sink.overflow()
//!                                              |
//! consumer thread:  queue.recv() -> sink.accept() -> graph update + listeners
//! ```
//!
//! The producer never blocks on the consumer: an event that finds the queue
//! full is reported as an overflow instead of being queued.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::select;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TryRecvError;
use crossbeam_channel::TrySendError;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::constants::CONSUMER_THREAD_NAME;
use crate::constants::PRODUCER_THREAD_NAME;
use crate::DeliveryStats;
use crate::Error;
use crate::EventSink;
use crate::RawEvent;
use crate::RawEventSource;
use crate::Result;
use crate::ServiceConfig;
use crate::ServiceError;
use crate::SourcePoll;
use crate::StatsSnapshot;

struct Worker {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(
        name: &'static str,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || body(shutdown_rx))
            .map_err(|source| ServiceError::ThreadSpawn { name, source })?;
        Ok(Self {
            shutdown_tx,
            handle,
        })
    }

    fn shutdown(
        self,
        name: &'static str,
    ) {
        let _ = self.shutdown_tx.send(());
        if self.handle.join().is_err() {
            warn!(thread = name, "worker thread panicked");
        }
    }
}

struct Workers {
    producer: Worker,
    consumer: Worker,
}

/// Runs the raw source on a producer thread and the sink on a consumer
/// thread, connected by a bounded queue.
pub struct MonitorService {
    sink: Arc<dyn EventSink>,
    stats: Arc<DeliveryStats>,
    queue_capacity: usize,
    poll_interval: Duration,
    workers: Mutex<Option<Workers>>,
}

impl MonitorService {
    pub fn new(
        sink: Arc<dyn EventSink>,
        stats: Arc<DeliveryStats>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            sink,
            stats,
            queue_capacity: config.queue_capacity.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            workers: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Start the sink, then the consumer and producer threads.
    ///
    /// The service can be started again after [`stop`](Self::stop), with a
    /// fresh source.
    pub fn start(
        &self,
        source: Box<dyn RawEventSource>,
    ) -> Result<()> {
        self.start_or_return(source).map_err(|(e, _)| e)
    }

    /// [`start`](Self::start), handing the source back when nothing was started.
    pub(crate) fn start_or_return(
        &self,
        source: Box<dyn RawEventSource>,
    ) -> std::result::Result<(), (Error, Box<dyn RawEventSource>)> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Err((ServiceError::AlreadyRunning.into(), source));
        }

        if let Err(e) = self.sink.start() {
            return Err((e, source));
        }
        let (queue_tx, queue_rx) = bounded::<RawEvent>(self.queue_capacity);

        let sink = self.sink.clone();
        let consumer = match Worker::spawn(CONSUMER_THREAD_NAME, move |shutdown_rx| {
            consume(sink, queue_rx, shutdown_rx)
        }) {
            Ok(worker) => worker,
            Err(e) => {
                self.sink.stop();
                return Err((e, source));
            }
        };

        // The producer is handed over once its thread exists, so a failed
        // spawn leaves the source with the caller
        let (handoff_tx, handoff_rx) = bounded::<Producer>(1);
        let producer = match Worker::spawn(PRODUCER_THREAD_NAME, move |shutdown_rx| {
            if let Ok(producer) = handoff_rx.recv() {
                producer.run(shutdown_rx);
            }
        }) {
            Ok(worker) => worker,
            Err(e) => {
                consumer.shutdown(CONSUMER_THREAD_NAME);
                self.sink.stop();
                return Err((e, source));
            }
        };
        let _ = handoff_tx.send(Producer {
            source,
            queue: queue_tx,
            sink: self.sink.clone(),
            stats: self.stats.clone(),
            poll_interval: self.poll_interval,
        });

        debug!(
            queue_capacity = self.queue_capacity,
            poll_interval = ?self.poll_interval,
            "delivery service started"
        );
        *workers = Some(Workers { producer, consumer });
        Ok(())
    }

    /// Stop producing, dispatch what is already queued, then stop the sink.
    ///
    /// Once this returns nothing is dispatched any more.
    pub fn stop(&self) -> Result<()> {
        let Some(workers) = self.workers.lock().take() else {
            return Err(ServiceError::NotRunning.into());
        };

        workers.producer.shutdown(PRODUCER_THREAD_NAME);
        workers.consumer.shutdown(CONSUMER_THREAD_NAME);
        self.sink.stop();
        debug!(stats = ?self.stats.snapshot(), "delivery service stopped");
        Ok(())
    }
}

impl Drop for MonitorService {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

struct Producer {
    source: Box<dyn RawEventSource>,
    queue: Sender<RawEvent>,
    sink: Arc<dyn EventSink>,
    stats: Arc<DeliveryStats>,
    poll_interval: Duration,
}

impl Producer {
    fn run(
        mut self,
        shutdown_rx: Receiver<()>,
    ) {
        debug!("producer started");
        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }

            match self.source.poll_events(self.poll_interval) {
                Ok(SourcePoll::Events(batch)) => {
                    if !self.enqueue(batch) {
                        break;
                    }
                }
                Ok(SourcePoll::Timeout) => {}
                Ok(SourcePoll::Closed) => {
                    debug!("raw event source closed");
                    break;
                }
                Err(e) => {
                    warn!("raw event source failed: {}", e);
                    self.sink.report(ServiceError::SourceFailed(e).into());
                    break;
                }
            }
        }
        debug!("producer stopped");
    }

    /// False once the consumer is gone.
    fn enqueue(
        &self,
        batch: Vec<RawEvent>,
    ) -> bool {
        for event in batch {
            self.stats.record_arrival(Instant::now());
            match self.queue.try_send(event) {
                Ok(()) => self.stats.record_queue_depth(self.queue.len()),
                Err(TrySendError::Full(event)) => self.sink.overflow(&event),
                Err(TrySendError::Disconnected(_)) => {
                    warn!("delivery queue closed, producer exiting");
                    return false;
                }
            }
        }
        true
    }
}

fn consume(
    sink: Arc<dyn EventSink>,
    queue: Receiver<RawEvent>,
    shutdown_rx: Receiver<()>,
) {
    debug!("consumer started");
    loop {
        select! {
            recv(queue) -> event => match event {
                Ok(event) => sink.accept(event),
                // Producer exited on its own
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                let mut drained = 0;
                for event in queue.try_iter() {
                    sink.accept(event);
                    drained += 1;
                }
                trace!(drained, "delivery queue drained on shutdown");
                break;
            }
        }
    }
    debug!("consumer stopped");
}
