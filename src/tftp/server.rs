//! TFTP server implementation.
//!
//! Read-only RFC 1350 server for PXE boot files. Each read request is
//! served from its own ephemeral socket on its own thread, in lock-step
//! 512-byte blocks.

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use super::packet::{
    self, TftpPacket, BLOCK_SIZE, ERROR_ACCESS_VIOLATION, ERROR_FILE_NOT_FOUND,
};
use crate::domain::BootEvent;
use crate::reporter::EventReporter;
use crate::utils::sanitize_path;

/// Well-known TFTP port.
pub const TFTP_PORT: u16 = 69;

/// Retransmission policy for a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// How long to wait for the ACK of one DATA send.
    pub timeout: Duration,
    /// Sends of the same block before the transfer is abandoned.
    pub max_attempts: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// TFTP server for serving boot files.
pub struct TftpServer {
    root: PathBuf,
    bind_addr: SocketAddr,
    transfer: TransferConfig,
    reporter: Arc<dyn EventReporter>,
    running: Arc<AtomicBool>,
}

impl TftpServer {
    /// Create a new TFTP server serving `root`.
    pub fn new(
        root: impl AsRef<Path>,
        bind_addr: SocketAddr,
        reporter: Arc<dyn EventReporter>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bind_addr,
            transfer: TransferConfig::default(),
            reporter,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Get a handle to stop the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn bind(&self) -> Result<UdpSocket> {
        UdpSocket::bind(self.bind_addr)
            .with_context(|| format!("Failed to bind TFTP socket to {}", self.bind_addr))
    }

    /// Receive loop on an already-bound listening socket.
    pub fn serve(&self, socket: UdpSocket) -> Result<()> {
        socket
            .set_read_timeout(Some(Duration::from_secs(1)))
            .context("Failed to set socket timeout")?;

        let local = socket.local_addr().unwrap_or(self.bind_addr);
        info!("TFTP server listening on {}", local);
        info!("Serving files from: {}", self.root.display());

        self.running.store(true, Ordering::SeqCst);

        let mut buf = [0u8; 1500];

        while self.running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    if len < 4 {
                        continue;
                    }
                    self.dispatch(&socket, &buf[..len], peer);
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    error!("TFTP receive error: {}", e);
                }
            }
        }

        info!("TFTP server stopped");
        Ok(())
    }

    fn dispatch(&self, socket: &UdpSocket, datagram: &[u8], peer: SocketAddr) {
        match packet::parse(datagram) {
            Some(TftpPacket::ReadRequest { filename, mode }) => {
                debug!("TFTP: RRQ {} ({}) from {}", filename, mode, peer);

                let root = self.root.clone();
                let transfer = self.transfer;
                let reporter = self.reporter.clone();

                thread::spawn(move || {
                    if let Err(e) =
                        handle_read_request(&root, &filename, peer, &transfer, reporter.as_ref())
                    {
                        error!("TFTP transfer error for {}: {:#}", peer, e);
                    }
                });
            }
            Some(TftpPacket::WriteRequest { filename }) => {
                debug!("Write request for {} from {} denied (read-only server)", filename, peer);
                send_error(socket, peer, ERROR_ACCESS_VIOLATION, "Write not supported");
                self.reporter.report(&BootEvent::WriteRejected { peer });
            }
            _ => {
                debug!(
                    "Ignoring opcode {} from {}",
                    u16::from_be_bytes([datagram[0], datagram[1]]),
                    peer
                );
            }
        }
    }
}

/// Serve one read request to `peer`.
///
/// Protocol outcomes (missing file, rejected path, client abort, retry
/// exhaustion) are reported as events and return `Ok`. Only local socket
/// and file I/O failures surface as errors.
pub fn handle_read_request(
    root: &Path,
    filename: &str,
    peer: SocketAddr,
    transfer: &TransferConfig,
    reporter: &dyn EventReporter,
) -> Result<()> {
    let Some(relative) = sanitize_path(filename) else {
        debug!("TFTP: rejected path {:?} from {}", filename, peer);
        reporter.report(&BootEvent::PathRejected {
            peer,
            path: filename.to_string(),
        });
        return Ok(());
    };

    let full_path = root.join(&relative);
    let file = match open_regular_file(&full_path) {
        Ok(file) => file,
        Err(e) => {
            debug!(
                "TFTP: File not found: {} (looked in {}): {}",
                filename,
                full_path.display(),
                e
            );
            let socket = ephemeral_socket(peer)?;
            send_error(
                &socket,
                peer,
                ERROR_FILE_NOT_FOUND,
                &format!("File not found: {}", filename),
            );
            reporter.report(&BootEvent::FileNotFound {
                peer,
                path: filename.to_string(),
            });
            return Ok(());
        }
    };

    let socket = ephemeral_socket(peer)?;

    debug!("TFTP: {} requesting {}", peer, relative.display());
    reporter.report(&BootEvent::TransferStarted {
        peer,
        path: filename.to_string(),
    });

    let session = Session {
        socket,
        peer,
        path: filename.to_string(),
        transfer: *transfer,
    };
    session.send_file(file, reporter)
}

fn open_regular_file(path: &Path) -> io::Result<File> {
    let file = File::open(path)?;
    if !file.metadata()?.is_file() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
    }
    Ok(file)
}

/// Bind a fresh socket on an OS-chosen port, same family as the peer.
fn ephemeral_socket(peer: SocketAddr) -> Result<UdpSocket> {
    let unspecified: IpAddr = match peer {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    UdpSocket::bind(SocketAddr::new(unspecified, 0)).context("Failed to bind transfer socket")
}

fn send_error(socket: &UdpSocket, peer: SocketAddr, code: u16, message: &str) {
    if let Err(e) = socket.send_to(&packet::build_error(code, message), peer) {
        debug!("TFTP: failed to send error to {}: {}", peer, e);
    }
}

/// What arrived while waiting for an ACK.
enum AckWait {
    Acked,
    Mismatched,
    TimedOut,
    Aborted { code: u16, message: String },
}

struct Session {
    socket: UdpSocket,
    peer: SocketAddr,
    path: String,
    transfer: TransferConfig,
}

impl Session {
    fn send_file(&self, mut file: File, reporter: &dyn EventReporter) -> Result<()> {
        let mut block: u16 = 1;
        let mut blocks: u32 = 0;
        let mut total: u64 = 0;
        let mut buf = [0u8; BLOCK_SIZE];

        loop {
            let len = read_block(&mut file, &mut buf)
                .with_context(|| format!("Failed to read {}", self.path))?;
            let data = packet::build_data(block, &buf[..len]);

            let mut attempts = 0;
            loop {
                if attempts == self.transfer.max_attempts {
                    debug!(
                        "TFTP: {} gave up on block {} of {} after {} attempts",
                        self.peer, block, self.path, attempts
                    );
                    reporter.report(&BootEvent::RetriesExhausted {
                        peer: self.peer,
                        path: self.path.clone(),
                        block,
                        attempts,
                    });
                    return Ok(());
                }

                attempts += 1;
                self.socket
                    .send_to(&data, self.peer)
                    .with_context(|| format!("Failed to send block {} to {}", block, self.peer))?;

                match self.await_ack(block)? {
                    AckWait::Acked => break,
                    AckWait::Mismatched => {
                        debug!("TFTP: unexpected reply for block {}, resending", block);
                    }
                    AckWait::TimedOut => {
                        debug!("TFTP: Retry {} for block {}", attempts, block);
                    }
                    AckWait::Aborted { code, message } => {
                        debug!(
                            "TFTP: {} aborted {} with error {}: {}",
                            self.peer, self.path, code, message
                        );
                        reporter.report(&BootEvent::TransferAborted {
                            peer: self.peer,
                            path: self.path.clone(),
                            code,
                            message,
                        });
                        return Ok(());
                    }
                }
            }

            blocks += 1;
            total += len as u64;

            if len < BLOCK_SIZE {
                debug!("TFTP: Transfer complete: {} ({} bytes)", self.path, total);
                reporter.report(&BootEvent::TransferCompleted {
                    peer: self.peer,
                    path: self.path.clone(),
                    bytes: total,
                    blocks,
                });
                return Ok(());
            }

            block = block.wrapping_add(1);
        }
    }

    /// Wait up to one timeout period for a reply from the peer. Datagrams
    /// from any other address are dropped without restarting the clock.
    fn await_ack(&self, expected: u16) -> Result<AckWait> {
        let deadline = Instant::now() + self.transfer.timeout;
        let mut buf = [0u8; 1500];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(AckWait::TimedOut);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            match self.socket.recv_from(&mut buf) {
                Ok((_, from)) if from != self.peer => {
                    debug!("TFTP: dropping datagram from stranger {}", from);
                }
                Ok((len, _)) => {
                    return Ok(match packet::parse(&buf[..len]) {
                        Some(TftpPacket::Ack { block }) if block == expected => AckWait::Acked,
                        Some(TftpPacket::Error { code, message }) => {
                            AckWait::Aborted { code, message }
                        }
                        _ => AckWait::Mismatched,
                    });
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(AckWait::TimedOut);
                }
                Err(e) => return Err(e).context("ACK receive error"),
            }
        }
    }
}

/// Fill `buf` from the file, returning fewer bytes only at end of file.
fn read_block(file: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
