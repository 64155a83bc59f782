//! Shared helpers for feed client integration tests.

pub mod mock_venue;

#[allow(unused_imports)]
pub use mock_venue::{MockVenue, VenueFrame};

use paper_core::{PriceSink, PriceUpdate};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Delivery log shared by several recording sinks.
pub type Journal = Arc<Mutex<Vec<(&'static str, PriceUpdate)>>>;

/// Sink that appends every update to a shared journal.
pub struct RecordingSink {
    label: &'static str,
    journal: Journal,
}

impl RecordingSink {
    pub fn new(label: &'static str, journal: Journal) -> Self {
        Self { label, journal }
    }
}

impl PriceSink for RecordingSink {
    fn apply_price_update(&self, update: &PriceUpdate) {
        self.journal
            .lock()
            .unwrap()
            .push((self.label, update.clone()));
    }

    fn name(&self) -> &str {
        self.label
    }
}
