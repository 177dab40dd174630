//! In-memory event reporter.

use std::sync::Mutex;

use crate::domain::BootEvent;
use crate::reporter::EventReporter;

/// Collects every reported event in order.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<BootEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events reported so far.
    pub fn events(&self) -> Vec<BootEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventReporter for MemoryReporter {
    fn report(&self, event: &BootEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
