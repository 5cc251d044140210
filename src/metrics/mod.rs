//! Prometheus collectors for the watch engine.
//!
//! Advisory only: nothing in the engine reads these back. Exposition is left
//! to the embedding application via [`gather_text`].


use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;

pub(crate) const OVERFLOW_DELIVERY_QUEUE: &str = "delivery_queue";
pub(crate) const OVERFLOW_PRIMITIVE: &str = "primitive";

lazy_static! {
    pub static ref EVENTS_DELIVERED: IntCounter = IntCounter::new(
        "events_delivered_total",
        "Listener invocations for filesystem events"
    )
    .expect("metric can not be created");

    pub static ref QUEUE_OVERFLOWS: IntCounterVec = IntCounterVec::new(
        Opts::new("queue_overflows_total", "Overflow notifications by origin"),
        &["source"]
    )
    .expect("metric can not be created");

    pub static ref RECONCILE_FAILURES: IntCounter = IntCounter::new(
        "reconcile_failures_total",
        "Events whose subtree maintenance step was abandoned"
    )
    .expect("metric can not be created");

    pub static ref ERROR_REPORTS_DROPPED: IntCounter = IntCounter::new(
        "error_reports_dropped_total",
        "Error reports discarded because the error channel was full"
    )
    .expect("metric can not be created");

    pub static ref REGISTRATION_FAILURES: IntCounter = IntCounter::new(
        "registration_failures_total",
        "Directories the raw primitive refused to watch"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHES: IntGauge = IntGauge::new(
        "active_watches",
        "Raw watches currently held in the watch graph"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("treewatch".to_string()), None)
            .expect("registry can be created");
        register_custom_metrics(&registry);
        registry
    };
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(EVENTS_DELIVERED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(QUEUE_OVERFLOWS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RECONCILE_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ERROR_REPORTS_DROPPED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REGISTRATION_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_WATCHES.clone()))
        .expect("collector can be registered");
}

/// Render every collector in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode treewatch metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        warn!("treewatch metrics could not be from_utf8'd: {}", e);
        String::new()
    })
}
