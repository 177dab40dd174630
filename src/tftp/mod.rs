//! TFTP server module.
//!
//! Serves PXE boot files read-only over RFC 1350.

pub mod packet;
mod server;

pub use server::{handle_read_request, TftpServer, TransferConfig, TFTP_PORT};
