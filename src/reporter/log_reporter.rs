//! `tracing`-backed event reporter.

use tracing::{error, info, warn};

use crate::domain::BootEvent;
use crate::reporter::EventReporter;

/// Reports boot events as structured log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl EventReporter for LogReporter {
    fn report(&self, event: &BootEvent) {
        match event {
            BootEvent::Offered { mac, xid, ip } => {
                info!(%mac, ip = %ip, "DHCP OFFER (XID: {:#010x})", xid);
            }
            BootEvent::Acknowledged { mac, xid, ip } => {
                info!(%mac, ip = %ip, "DHCP ACK (XID: {:#010x})", xid);
            }
            BootEvent::DhcpIgnored { mac, message_type } => match message_type {
                Some(t) => info!(%mac, "DHCP message type {} ignored", t),
                None => info!(%mac, "DHCP packet without message type ignored"),
            },
            BootEvent::LeaseExhausted { mac } => {
                error!(%mac, "No address left in DHCP range, request dropped");
            }
            BootEvent::DeliveryFailed { mac, message_type } => {
                error!(%mac, "Failed to deliver DHCP {} to any broadcast address", message_type);
            }
            BootEvent::TransferStarted { peer, path } => {
                info!(%peer, "TFTP: sending {}", path);
            }
            BootEvent::TransferCompleted {
                peer,
                path,
                bytes,
                blocks,
            } => {
                info!(%peer, "TFTP: transfer complete: {} ({} bytes, {} blocks)", path, bytes, blocks);
            }
            BootEvent::FileNotFound { peer, path } => {
                warn!(%peer, "TFTP: file not found: {}", path);
            }
            BootEvent::PathRejected { peer, path } => {
                warn!(%peer, "TFTP: rejected path traversal: {}", path);
            }
            BootEvent::RetriesExhausted {
                peer,
                path,
                block,
                attempts,
            } => {
                warn!(
                    %peer,
                    "TFTP: abandoned {} at block {} after {} attempts without ACK",
                    path, block, attempts
                );
            }
            BootEvent::TransferAborted {
                peer,
                path,
                code,
                message,
            } => {
                warn!(%peer, "TFTP: client aborted {} (error {}: {})", path, code, message);
            }
            BootEvent::WriteRejected { peer } => {
                warn!(%peer, "TFTP: write request denied (read-only server)");
            }
        }
    }
}
