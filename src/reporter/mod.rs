//! Reporting module for boot events.
//!
//! The DHCP and TFTP services hand every `BootEvent` to an `EventReporter`.
//! `LogReporter` writes them through `tracing`; `MemoryReporter` keeps them
//! for inspection.

mod log_reporter;
mod memory_reporter;

pub use log_reporter::LogReporter;
pub use memory_reporter::MemoryReporter;

use crate::domain::BootEvent;

/// Sink for boot events.
///
/// Implementations are shared across request threads, so they must be
/// `Send + Sync` and must not block for long.
pub trait EventReporter: Send + Sync {
    /// Report a boot event.
    fn report(&self, event: &BootEvent);
}
