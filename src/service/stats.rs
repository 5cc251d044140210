use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

const UNSET_MIN: u64 = u64::MAX;

/// Live delivery statistics, updated lock-free from the producer and
/// consumer threads.
///
/// Timestamps are kept as nanoseconds since `epoch`; a stored zero means
/// "no sample yet".
#[derive(Debug)]
pub struct DeliveryStats {
    epoch: Instant,
    delivered: AtomicU64,
    overflows: AtomicU64,
    largest_queue_depth: AtomicUsize,
    last_arrival: AtomicU64,
    min_interarrival: AtomicU64,
    max_interarrival: AtomicU64,
    min_service: AtomicU64,
    max_service: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Listener invocations for events
    pub delivered: u64,
    /// Overflow notifications raised, one per lost event or kernel overflow
    pub overflows: u64,
    pub largest_queue_depth: usize,
    pub last_arrival: Option<Instant>,
    pub min_interarrival: Option<Duration>,
    pub max_interarrival: Option<Duration>,
    /// Fastest single listener callback
    pub min_service_time: Option<Duration>,
    /// Slowest single listener callback
    pub max_service_time: Option<Duration>,
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            delivered: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            largest_queue_depth: AtomicUsize::new(0),
            last_arrival: AtomicU64::new(0),
            min_interarrival: AtomicU64::new(UNSET_MIN),
            max_interarrival: AtomicU64::new(0),
            min_service: AtomicU64::new(UNSET_MIN),
            max_service: AtomicU64::new(0),
        }
    }

    fn stamp(
        &self,
        at: Instant,
    ) -> u64 {
        // +1 keeps zero free as the unset marker
        at.saturating_duration_since(self.epoch).as_nanos() as u64 + 1
    }

    /// An event came off the raw primitive at `at`.
    pub fn record_arrival(
        &self,
        at: Instant,
    ) {
        let now = self.stamp(at);
        let previous = self.last_arrival.swap(now, Ordering::AcqRel);
        if previous != 0 && now >= previous {
            let gap = now - previous;
            self.min_interarrival.fetch_min(gap, Ordering::Relaxed);
            self.max_interarrival.fetch_max(gap, Ordering::Relaxed);
        }
    }

    pub fn record_queue_depth(
        &self,
        depth: usize,
    ) {
        self.largest_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    /// One listener callback finished after `elapsed`.
    pub fn record_service(
        &self,
        elapsed: Duration,
    ) {
        let nanos = elapsed.as_nanos() as u64;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.min_service.fetch_min(nanos, Ordering::Relaxed);
        self.max_service.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_arrival.load(Ordering::Acquire);
        let min_or_none = |v: u64| (v != UNSET_MIN).then(|| Duration::from_nanos(v));
        let delivered = self.delivered.load(Ordering::Relaxed);
        let arrivals_seen = self.min_interarrival.load(Ordering::Relaxed) != UNSET_MIN;

        StatsSnapshot {
            delivered,
            overflows: self.overflows.load(Ordering::Relaxed),
            largest_queue_depth: self.largest_queue_depth.load(Ordering::Relaxed),
            last_arrival: (last != 0).then(|| self.epoch + Duration::from_nanos(last - 1)),
            min_interarrival: min_or_none(self.min_interarrival.load(Ordering::Relaxed)),
            max_interarrival: arrivals_seen
                .then(|| Duration::from_nanos(self.max_interarrival.load(Ordering::Relaxed))),
            min_service_time: min_or_none(self.min_service.load(Ordering::Relaxed)),
            max_service_time: (delivered > 0)
                .then(|| Duration::from_nanos(self.max_service.load(Ordering::Relaxed))),
        }
    }
}
