//! Domain models for PXE boot serving.
//!
//! Core types shared by the codec, the DHCP responder and the TFTP
//! engine. Nothing here touches sockets or the filesystem.

mod dhcp;
mod events;
mod pxe;

pub use dhcp::{
    option_codes, BootPacket, DhcpMessageType, BOOTREPLY, BOOTREQUEST, FILE_LEN, SNAME_LEN,
};
pub use events::BootEvent;
pub use pxe::PxeClientArch;
