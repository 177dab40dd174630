//! pxeboot - PXE boot server
//!
//! Lets diskless machines boot over the network: DHCP hands out an address
//! plus the boot file name, TFTP serves the bootloader and HTTP serves the
//! larger artifacts it fetches afterwards.

pub mod codec;
pub mod config;
pub mod dhcp;
pub mod domain;
pub mod error;
pub mod http;
pub mod lease;
pub mod reporter;
pub mod tftp;
pub mod utils;

pub use config::ServerConfig;
pub use dhcp::{DhcpConfig, DhcpServer};
pub use domain::{BootEvent, BootPacket, DhcpMessageType, PxeClientArch};
pub use error::{ConfigError, EncodeError, HttpError, LeaseError, ParseError};
pub use http::HttpServer;
pub use lease::LeaseAllocator;
pub use reporter::{EventReporter, LogReporter, MemoryReporter};
pub use tftp::{TftpServer, TransferConfig};
