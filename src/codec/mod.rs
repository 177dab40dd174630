//! DHCP wire codec.
//!
//! Converts between raw UDP payloads and `BootPacket` (RFC 2131 layout).

mod dhcp_codec;

pub use dhcp_codec::{decode, encode, DHCP_MAGIC_COOKIE, HEADER_LEN, PACKET_LEN};
