//! Consumer sink interface.
//!
//! The feed client pushes every normalized update into a fixed, ordered set
//! of sinks. Sinks own their state and their own change notification; the
//! client never reads them back.

use crate::price::PriceUpdate;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A consumer of normalized price updates.
///
/// Called synchronously on the feed's session task, once per decoded event.
/// Implementations must not block.
pub trait PriceSink: Send + Sync {
    /// Apply one normalized update.
    fn apply_price_update(&self, update: &PriceUpdate);

    /// Short name used in logs.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Ordered set of sinks an update is fanned out to.
///
/// Registration order is delivery order.
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn PriceSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sink. Later sinks receive each update after earlier ones.
    pub fn with(mut self, sink: Arc<dyn PriceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver one update to every sink, in registration order.
    ///
    /// A sink that panics is logged and skipped; later sinks still receive
    /// the update.
    pub fn publish(&self, update: &PriceUpdate) {
        for sink in &self.sinks {
            let delivered = catch_unwind(AssertUnwindSafe(|| sink.apply_price_update(update)));
            if let Err(payload) = delivered {
                error!(
                    sink = sink.name(),
                    instrument = %update.instrument_id,
                    panic = panic_message(payload.as_ref()),
                    "Price sink panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

impl fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sinks.iter().map(|s| s.name().to_string()))
            .finish()
    }
}
