//! Prometheus counters of the watch loops.
//!
//! Counters live in [`REGISTRY`]; the embedding process registers them once
//! with [`register_custom_metrics`] and exposes [`gather_metrics`] wherever it
//! serves metrics.

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref EVENTS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_dispatched", "Events routed from a database cursor to a task queue"),
        &["db", "task"]
    )
    .expect("metric can not be created");

    pub static ref EVENTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_dropped", "Events dropped by a task before batching"),
        &["db", "task", "reason"]
    )
    .expect("metric can not be created");

    pub static ref BATCHES_HANDLED: IntCounterVec = IntCounterVec::new(
        Opts::new("batches_handled", "Handler batches by outcome"),
        &["db", "task", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref HANDLER_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("handler_retries", "Batches the handler asked to retry"),
        &["db", "task"]
    )
    .expect("metric can not be created");

    pub static ref TOKEN_COMMIT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("token_commit_failures", "Failed token store writes"),
        &["db", "task"]
    )
    .expect("metric can not be created");

    pub static ref REWATCHES: IntCounterVec = IntCounterVec::new(
        Opts::new("rewatches", "Database cursors reopened by reason"),
        &["db", "reason"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub fn register_custom_metrics(registry: &Registry) {
    let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
        Box::new(EVENTS_DISPATCHED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
        Box::new(BATCHES_HANDLED.clone()),
        Box::new(HANDLER_RETRIES.clone()),
        Box::new(TOKEN_COMMIT_FAILURES.clone()),
        Box::new(REWATCHES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {:?}", e);
        }
    }
}

/// Text exposition of every metric in [`REGISTRY`].
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            warn!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
