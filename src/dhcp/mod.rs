//! DHCP server module.
//!
//! Assigns addresses from the lease allocator and hands PXE clients their
//! boot parameters (DISCOVER → OFFER, REQUEST → ACK).

mod server;

pub use server::{
    broadcast_targets, deliver, DatagramSink, DhcpConfig, DhcpServer, DHCP_CLIENT_PORT,
    DHCP_SERVER_PORT, LEASE_TIME_SECS,
};
