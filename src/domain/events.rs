//! Observable protocol events.

use std::net::{Ipv4Addr, SocketAddr};

use macaddr::MacAddr6;

use super::DhcpMessageType;

/// Something worth reporting that happened while serving a client.
///
/// Every terminal outcome of a DHCP exchange or a TFTP transfer maps to
/// exactly one event, including the ones that send nothing on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    /// An OFFER was built for a DISCOVER.
    Offered {
        mac: MacAddr6,
        xid: u32,
        ip: Ipv4Addr,
    },
    /// An ACK was built for a REQUEST.
    Acknowledged {
        mac: MacAddr6,
        xid: u32,
        ip: Ipv4Addr,
    },
    /// A DHCP message that gets no reply (missing or unsupported type).
    DhcpIgnored {
        mac: MacAddr6,
        message_type: Option<u8>,
    },
    /// No address left in the configured range.
    LeaseExhausted { mac: MacAddr6 },
    /// Every broadcast destination refused the reply.
    DeliveryFailed {
        mac: MacAddr6,
        message_type: DhcpMessageType,
    },
    TransferStarted { peer: SocketAddr, path: String },
    TransferCompleted {
        peer: SocketAddr,
        path: String,
        bytes: u64,
        blocks: u32,
    },
    FileNotFound { peer: SocketAddr, path: String },
    /// Path contained a parent-directory segment; nothing was sent back.
    PathRejected { peer: SocketAddr, path: String },
    /// The peer stopped acknowledging; the transfer was abandoned.
    RetriesExhausted {
        peer: SocketAddr,
        path: String,
        block: u16,
        attempts: u32,
    },
    /// The peer aborted the transfer with an ERROR packet.
    TransferAborted {
        peer: SocketAddr,
        path: String,
        code: u16,
        message: String,
    },
    WriteRejected { peer: SocketAddr },
}
