use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::DelayBuffer;
use crate::constants::DELAY_TIMER_THREAD_NAME;
use crate::BufferConfig;
use crate::CoalescedEvent;
use crate::Error;
use crate::EventSink;
use crate::MoveInterpreter;
use crate::RawEvent;
use crate::RawWatcher;
use crate::Result;
use crate::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not started: arrivals are drained on arrival only
    Idle,
    Running,
    Stopped,
}

struct BufferState {
    buffer: DelayBuffer,
    phase: Phase,
}

/// Lock order: `dispatch` before `state`. `state` is never held across a
/// listener callback.
struct Shared<W: RawWatcher> {
    interpreter: MoveInterpreter<W>,
    state: Mutex<BufferState>,
    dispatch: Mutex<()>,
    flush_on_stop: bool,
}

struct Timer {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// [`MoveInterpreter`] behind a [`DelayBuffer`].
///
/// The arrival path and the timer thread drain and dispatch under one
/// dispatch lock, so deliveries never overtake each other. The buffer itself
/// is only locked while draining, so listeners may query [`pending`].
///
/// [`pending`]: BufferedInterpreter::pending
pub struct BufferedInterpreter<W: RawWatcher> {
    shared: Arc<Shared<W>>,
    timer: Mutex<Option<Timer>>,
}

impl<W: RawWatcher> Shared<W> {
    fn dispatch(
        &self,
        released: Vec<CoalescedEvent>,
    ) {
        for event in released {
            self.interpreter.process(event);
        }
    }

    fn tick(&self) {
        let _dispatching = self.dispatch.lock();
        let released = {
            let mut state = self.state.lock();
            let released = state.buffer.drain_due(Instant::now());
            if !released.is_empty() {
                trace!(released = released.len(), pending = state.buffer.len(), "delay buffer tick");
            }
            released
        };
        self.dispatch(released);
    }
}

impl<W: RawWatcher> BufferedInterpreter<W> {
    pub fn new(
        interpreter: MoveInterpreter<W>,
        config: &BufferConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                interpreter,
                state: Mutex::new(BufferState {
                    buffer: DelayBuffer::new(config.delay()),
                    phase: Phase::Idle,
                }),
                dispatch: Mutex::new(()),
                flush_on_stop: config.flush_on_stop,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn interpreter(&self) -> &MoveInterpreter<W> {
        &self.shared.interpreter
    }

    /// Events waiting for their window to close
    pub fn pending(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Dispatch whatever became due, without waiting for a new arrival.
    ///
    /// The timer thread does this once started; before that, callers
    /// pumping the source by hand do.
    pub fn release_due(&self) {
        self.shared.tick();
    }

    pub fn accept(
        &self,
        event: RawEvent,
    ) {
        {
            let mut state = self.shared.state.lock();
            if state.phase == Phase::Stopped {
                warn!(handle = %event.handle, mask = %event.mask, "event arrived after stop, dropped");
                return;
            }
            state.buffer.push(event, Instant::now());
        }
        self.shared.tick();
    }

    /// Spawn the timer thread that releases events once they are due.
    pub fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Err(ServiceError::AlreadyRunning.into());
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let shared = self.shared.clone();
        let interval = shared.state.lock().buffer.delay();

        let handle = std::thread::Builder::new()
            .name(DELAY_TIMER_THREAD_NAME.into())
            .spawn(move || {
                debug!(?interval, "delay timer started");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => shared.tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("delay timer stopped");
            })
            .map_err(|source| ServiceError::ThreadSpawn {
                name: "delay timer",
                source,
            })?;

        self.shared.state.lock().phase = Phase::Running;
        *timer = Some(Timer { shutdown_tx, handle });
        Ok(())
    }

    /// Stop the timer, then flush or discard what is still buffered.
    ///
    /// Nothing is dispatched once this returns; later arrivals are dropped.
    pub fn stop(&self) {
        if let Some(timer) = self.timer.lock().take() {
            let _ = timer.shutdown_tx.send(());
            if timer.handle.join().is_err() {
                warn!("delay timer thread panicked");
            }
        }

        let _dispatching = self.shared.dispatch.lock();
        let remaining = {
            let mut state = self.shared.state.lock();
            state.phase = Phase::Stopped;
            state.buffer.drain_all()
        };
        if remaining.is_empty() {
            return;
        }
        if self.shared.flush_on_stop {
            debug!(flushed = remaining.len(), "delay buffer flushed on stop");
            self.shared.dispatch(remaining);
        } else {
            warn!(discarded = remaining.len(), "delay buffer discarded on stop");
        }
    }
}

impl<W: RawWatcher> EventSink for BufferedInterpreter<W> {
    fn accept(
        &self,
        event: RawEvent,
    ) {
        BufferedInterpreter::accept(self, event)
    }

    fn overflow(
        &self,
        dropped: &RawEvent,
    ) {
        self.shared.interpreter.overflow(dropped)
    }

    fn start(&self) -> Result<()> {
        BufferedInterpreter::start(self)
    }

    fn stop(&self) {
        BufferedInterpreter::stop(self)
    }

    fn report(
        &self,
        err: Error,
    ) {
        self.shared.interpreter.report(err)
    }
}
