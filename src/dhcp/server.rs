//! DHCP server implementation.
//!
//! Listens for DISCOVER and REQUEST messages and answers each one on its own
//! thread with an OFFER or ACK carrying the leased address and the PXE boot
//! parameters. Replies are always broadcast: the client has no address yet.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use macaddr::MacAddr6;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::domain::{option_codes, BootEvent, BootPacket, DhcpMessageType, PxeClientArch, BOOTREPLY};
use crate::error::{EncodeError, LeaseError};
use crate::lease::LeaseAllocator;
use crate::reporter::EventReporter;
use crate::utils;

/// DHCP ports
pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Lease time advertised in option 51.
pub const LEASE_TIME_SECS: u32 = 3600;

/// Settings the responder needs at runtime.
#[derive(Debug, Clone)]
pub struct DhcpConfig {
    /// Interface the listening socket is pinned to (empty = any).
    pub interface: String,
    /// Address to listen on.
    pub bind_addr: SocketAddrV4,
    /// Destination port for replies.
    pub client_port: u16,
    /// Our own address: server identifier, router, DNS and next-server.
    pub server_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    /// Boot file handed to every client.
    pub boot_file: String,
    /// TFTP server name (option 66 and the `sname` header field).
    pub tftp_server: String,
}

impl DhcpConfig {
    pub fn new(
        interface: impl Into<String>,
        server_ip: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        boot_file: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            bind_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT),
            client_port: DHCP_CLIENT_PORT,
            server_ip,
            subnet_mask,
            boot_file: boot_file.into(),
            tftp_server: server_ip.to_string(),
        }
    }

    /// Directed broadcast address of the server's subnet.
    pub fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.server_ip) | !u32::from(self.subnet_mask))
    }
}

/// Anything a reply datagram can be sent through.
pub trait DatagramSink {
    fn send_datagram(&self, buf: &[u8], dest: SocketAddrV4) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, buf: &[u8], dest: SocketAddrV4) -> io::Result<usize> {
        self.send_to(buf, dest)
    }
}

/// Reply destinations in the order they are tried.
pub fn broadcast_targets(config: &DhcpConfig) -> Vec<SocketAddrV4> {
    let subnet = SocketAddrV4::new(config.subnet_broadcast(), config.client_port);
    let global = SocketAddrV4::new(Ipv4Addr::BROADCAST, config.client_port);

    if subnet == global {
        vec![global]
    } else {
        vec![subnet, global]
    }
}

/// Send `buf` to the first destination that accepts it.
///
/// Returns the destination used, or the last send error.
pub fn deliver(
    sink: &dyn DatagramSink,
    buf: &[u8],
    targets: &[SocketAddrV4],
) -> io::Result<SocketAddrV4> {
    let mut last_err = io::Error::new(io::ErrorKind::InvalidInput, "no broadcast destination");

    for &target in targets {
        match sink.send_datagram(buf, target) {
            Ok(_) => return Ok(target),
            Err(e) => {
                warn!("DHCP send to {} failed: {}", target, e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}

/// DHCP server for PXE clients.
#[derive(Clone)]
pub struct DhcpServer {
    config: Arc<DhcpConfig>,
    leases: Arc<LeaseAllocator>,
    reporter: Arc<dyn EventReporter>,
    running: Arc<AtomicBool>,
}

impl DhcpServer {
    pub fn new(
        config: DhcpConfig,
        leases: Arc<LeaseAllocator>,
        reporter: Arc<dyn EventReporter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            leases,
            reporter,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle to stop the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Create the listening socket with broadcast enabled.
    pub fn bind(&self) -> Result<UdpSocket> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create DHCP socket")?;

        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;

        if !self.config.interface.is_empty() {
            if let Err(e) = utils::bind_to_device(&socket, &self.config.interface) {
                warn!(
                    "Could not pin DHCP socket to {}: {} (listening on all interfaces)",
                    self.config.interface, e
                );
            }
        }

        socket
            .bind(&SocketAddr::V4(self.config.bind_addr).into())
            .with_context(|| format!("Failed to bind DHCP socket to {}", self.config.bind_addr))?;

        Ok(socket.into())
    }

    /// Run the receive loop on an already bound socket.
    ///
    /// This runs in a loop until the running flag is cleared.
    pub fn serve(&self, socket: UdpSocket) -> Result<()> {
        socket
            .set_read_timeout(Some(Duration::from_secs(1)))
            .context("Failed to set socket timeout")?;

        let local = socket.local_addr().context("Failed to read DHCP socket address")?;
        info!(
            "DHCP server listening on {} (interface {}, server {})",
            local, self.config.interface, self.config.server_ip
        );
        info!("Boot file: {}", self.config.boot_file);

        let socket = Arc::new(socket);
        self.running.store(true, Ordering::SeqCst);

        let mut buf = [0u8; 1500];

        while self.running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => self.dispatch(&socket, &buf[..len], from),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    error!("DHCP receive error: {}", e);
                }
            }
        }

        info!("DHCP server stopped");
        Ok(())
    }

    /// Decode a datagram and hand DISCOVER/REQUEST to a worker thread.
    fn dispatch(&self, socket: &Arc<UdpSocket>, data: &[u8], from: SocketAddr) {
        let request = match codec::decode(data) {
            Ok(p) => p,
            Err(e) => {
                debug!("Dropping malformed DHCP packet from {}: {}", from, e);
                return;
            }
        };

        if !request.is_request() {
            return;
        }

        match request.message_type() {
            Some(DhcpMessageType::Discover) | Some(DhcpMessageType::Request) => {
                let server = self.clone();
                let socket = Arc::clone(socket);
                thread::spawn(move || server.handle_request(socket.as_ref(), &request));
            }
            _ => {
                self.reporter.report(&BootEvent::DhcpIgnored {
                    mac: request.chaddr,
                    message_type: request.raw_message_type(),
                });
            }
        }
    }

    /// Answer one decoded request, sending the reply through `sink`.
    pub fn handle_request(&self, sink: &dyn DatagramSink, request: &BootPacket) {
        let mac = request.chaddr;

        let Some((reply_type, reply)) = self.respond(request) else {
            return;
        };

        let bytes = match codec::encode(&reply) {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to encode DHCP {} for {}: {}", reply_type, mac, e);
                return;
            }
        };

        match deliver(sink, &bytes, &broadcast_targets(&self.config)) {
            Ok(dest) => debug!("DHCP {} for {} sent to {}", reply_type, mac, dest),
            Err(_) => self.reporter.report(&BootEvent::DeliveryFailed {
                mac,
                message_type: reply_type,
            }),
        }
    }

    /// Compute the reply for a request without sending it.
    ///
    /// Returns `None` for messages that get no reply: anything other than
    /// DISCOVER and REQUEST, or a client that cannot be given an address.
    pub fn respond(&self, request: &BootPacket) -> Option<(DhcpMessageType, BootPacket)> {
        let mac = request.chaddr;

        let reply_type = match request.message_type() {
            Some(DhcpMessageType::Discover) => {
                info!("DHCP DISCOVER from {} (XID: {:#010x})", mac, request.xid);
                DhcpMessageType::Offer
            }
            Some(DhcpMessageType::Request) => {
                info!("DHCP REQUEST from {} (XID: {:#010x})", mac, request.xid);
                DhcpMessageType::Ack
            }
            _ => {
                self.reporter.report(&BootEvent::DhcpIgnored {
                    mac,
                    message_type: request.raw_message_type(),
                });
                return None;
            }
        };

        let ip = match self.leases.allocate(mac) {
            Ok(ip) => ip,
            Err(e) => {
                self.lease_failed(mac, e);
                return None;
            }
        };

        if reply_type == DhcpMessageType::Ack {
            if let Some(requested) = request.requested_ip() {
                if requested != ip {
                    info!("{} requested {}, keeping lease {}", mac, requested, ip);
                }
            }
        }

        self.log_client_arch(request);

        let reply = match self.build_reply(request, reply_type, ip) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to build DHCP {} for {}: {}", reply_type, mac, e);
                return None;
            }
        };

        let event = match reply_type {
            DhcpMessageType::Offer => BootEvent::Offered {
                mac,
                xid: request.xid,
                ip,
            },
            _ => BootEvent::Acknowledged {
                mac,
                xid: request.xid,
                ip,
            },
        };
        self.reporter.report(&event);

        Some((reply_type, reply))
    }

    /// Build an OFFER or ACK for `request` assigning `ip`.
    pub fn build_reply(
        &self,
        request: &BootPacket,
        msg_type: DhcpMessageType,
        ip: Ipv4Addr,
    ) -> Result<BootPacket, EncodeError> {
        let config = &self.config;
        let server = config.server_ip.octets();

        let mut reply = BootPacket {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            xid: request.xid,
            flags: request.flags,
            yiaddr: ip,
            siaddr: config.server_ip,
            chaddr: request.chaddr,
            ..Default::default()
        };

        reply.set_boot_file(&config.boot_file)?;
        reply.set_server_name(&config.tftp_server)?;

        reply.set_message_type(msg_type);
        reply.set_option(option_codes::SERVER_ID, server.to_vec());
        reply.set_option(option_codes::SUBNET_MASK, config.subnet_mask.octets().to_vec());
        reply.set_option(option_codes::ROUTER, server.to_vec());
        reply.set_option(option_codes::DNS_SERVER, server.to_vec());
        reply.set_option(
            option_codes::BROADCAST_ADDRESS,
            config.subnet_broadcast().octets().to_vec(),
        );
        reply.set_option(option_codes::LEASE_TIME, LEASE_TIME_SECS.to_be_bytes().to_vec());
        reply.set_option(option_codes::BOOTFILE_NAME, config.boot_file.as_bytes().to_vec());
        reply.set_option(
            option_codes::TFTP_SERVER_NAME,
            config.tftp_server.as_bytes().to_vec(),
        );

        Ok(reply)
    }

    /// Only an exhausted range is a client-visible outcome. Anything else is
    /// a server fault and the request is dropped.
    fn lease_failed(&self, mac: MacAddr6, err: LeaseError) {
        match err {
            LeaseError::RangeExhausted { .. } => {
                self.reporter.report(&BootEvent::LeaseExhausted { mac });
            }
            other => error!("Lease allocation for {} failed: {}", mac, other),
        }
    }

    /// Option 93 is logged only; every client gets the configured boot file.
    fn log_client_arch(&self, request: &BootPacket) {
        let Some(code) = request.client_arch() else {
            return;
        };

        let arch = PxeClientArch::from_u16(code);
        let firmware = if arch.is_efi() { "UEFI" } else { "BIOS" };
        info!(
            "Client {} is {} ({}, arch={}), boot file: {}",
            request.chaddr, firmware, arch, code, self.config.boot_file
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::reporter::MemoryReporter;

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, last)
    }

    fn config() -> DhcpConfig {
        DhcpConfig::new(
            "eth0",
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(255, 255, 255, 0),
            "bootx64.efi",
        )
    }

    fn server_with(
        start: Ipv4Addr,
        end: Ipv4Addr,
    ) -> (DhcpServer, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        let leases = Arc::new(LeaseAllocator::new(start, end).unwrap());
        let server = DhcpServer::new(config(), leases, reporter.clone());
        (server, reporter)
    }

    fn server() -> (DhcpServer, Arc<MemoryReporter>) {
        server_with(Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::new(10, 0, 0, 200))
    }

    fn request(msg_type: u8, mac: MacAddr6) -> BootPacket {
        let mut packet = BootPacket {
            xid: 0x12345678,
            flags: 0x8000,
            chaddr: mac,
            ..Default::default()
        };
        packet.set_option(option_codes::MESSAGE_TYPE, vec![msg_type]);
        packet
    }

    /// Records every send and fails for the listed destinations.
    #[derive(Default)]
    struct ScriptedSink {
        failing: Vec<SocketAddrV4>,
        sent: Mutex<Vec<(SocketAddrV4, Vec<u8>)>>,
    }

    impl DatagramSink for ScriptedSink {
        fn send_datagram(&self, buf: &[u8], dest: SocketAddrV4) -> io::Result<usize> {
            self.sent.lock().unwrap().push((dest, buf.to_vec()));
            if self.failing.contains(&dest) {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"))
            } else {
                Ok(buf.len())
            }
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn test_discover_gets_offer_with_boot_parameters() {
            let (server, _) = server();
            let (reply_type, reply) = server.respond(&request(1, mac(1))).unwrap();

            assert_eq!(reply_type, DhcpMessageType::Offer);
            assert_eq!(reply.op, BOOTREPLY);
            assert_eq!(reply.xid, 0x12345678);
            assert_eq!(reply.flags, 0x8000);
            assert_eq!(reply.chaddr, mac(1));
            assert_eq!(reply.yiaddr, Ipv4Addr::new(10, 0, 0, 100));
            assert_eq!(reply.siaddr, Ipv4Addr::new(10, 0, 0, 1));
            assert_eq!(reply.message_type(), Some(DhcpMessageType::Offer));

            let opt = |code: u8| reply.options.get(&code).cloned().unwrap();
            assert_eq!(opt(option_codes::SERVER_ID), vec![10, 0, 0, 1]);
            assert_eq!(opt(option_codes::SUBNET_MASK), vec![255, 255, 255, 0]);
            assert_eq!(opt(option_codes::ROUTER), vec![10, 0, 0, 1]);
            assert_eq!(opt(option_codes::DNS_SERVER), vec![10, 0, 0, 1]);
            assert_eq!(opt(option_codes::BROADCAST_ADDRESS), vec![10, 0, 0, 255]);
            assert_eq!(opt(option_codes::LEASE_TIME), vec![0, 0, 0x0e, 0x10]);
            assert_eq!(opt(option_codes::BOOTFILE_NAME), b"bootx64.efi".to_vec());
            assert_eq!(opt(option_codes::TFTP_SERVER_NAME), b"10.0.0.1".to_vec());
            assert_eq!(reply.boot_file(), "bootx64.efi");
            assert_eq!(reply.server_name(), "10.0.0.1");
        }

        #[test]
        fn test_request_after_discover_acks_same_address() {
            let (server, reporter) = server();
            let (_, offer) = server.respond(&request(1, mac(1))).unwrap();
            let (ack_type, ack) = server.respond(&request(3, mac(1))).unwrap();

            assert_eq!(ack_type, DhcpMessageType::Ack);
            assert_eq!(ack.message_type(), Some(DhcpMessageType::Ack));
            assert_eq!(ack.yiaddr, offer.yiaddr);

            let events = reporter.events();
            assert!(matches!(events[0], BootEvent::Offered { .. }));
            assert!(matches!(events[1], BootEvent::Acknowledged { ip, .. } if ip == offer.yiaddr));
        }

        #[test]
        fn test_request_without_discover_allocates() {
            let (server, _) = server();
            let (_, ack) = server.respond(&request(3, mac(5))).unwrap();
            assert_eq!(ack.yiaddr, Ipv4Addr::new(10, 0, 0, 100));
        }

        #[test]
        fn test_second_client_gets_next_address() {
            let (server, _) = server();
            server.respond(&request(1, mac(1))).unwrap();
            let (_, offer) = server.respond(&request(1, mac(2))).unwrap();
            assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 101));
        }

        #[test]
        fn test_requested_ip_does_not_override_lease() {
            let (server, _) = server();
            let mut req = request(3, mac(1));
            req.set_option(option_codes::REQUESTED_IP, vec![10, 0, 0, 150]);
            let (_, ack) = server.respond(&req).unwrap();
            assert_eq!(ack.yiaddr, Ipv4Addr::new(10, 0, 0, 100));
        }

        #[test]
        fn test_client_arch_does_not_change_boot_file() {
            let (server, _) = server();
            for arch in [0u16, 7, 9] {
                let mut req = request(1, mac(arch as u8));
                req.set_option(option_codes::CLIENT_ARCH, arch.to_be_bytes().to_vec());
                let (_, offer) = server.respond(&req).unwrap();
                assert_eq!(offer.boot_file(), "bootx64.efi");
            }
        }

        #[test]
        fn test_other_message_types_are_ignored() {
            let (server, reporter) = server();
            // RELEASE, INFORM, unknown
            for t in [7u8, 8, 42] {
                assert!(server.respond(&request(t, mac(1))).is_none());
            }
            assert!(server.leases.is_empty());
            assert_eq!(
                reporter.events()[2],
                BootEvent::DhcpIgnored {
                    mac: mac(1),
                    message_type: Some(42)
                }
            );
        }

        #[test]
        fn test_missing_message_type_is_ignored() {
            let (server, reporter) = server();
            let packet = BootPacket {
                chaddr: mac(1),
                ..Default::default()
            };
            assert!(server.respond(&packet).is_none());
            assert_eq!(
                reporter.events(),
                vec![BootEvent::DhcpIgnored {
                    mac: mac(1),
                    message_type: None
                }]
            );
        }

        #[test]
        fn test_exhausted_range_sends_nothing() {
            let (server, reporter) =
                server_with(Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::new(10, 0, 0, 100));
            assert!(server.respond(&request(1, mac(1))).is_some());
            assert!(server.respond(&request(1, mac(2))).is_none());
            assert_eq!(
                reporter.events().last(),
                Some(&BootEvent::LeaseExhausted { mac: mac(2) })
            );
        }

        #[test]
        fn test_other_lease_errors_are_not_reported_as_exhaustion() {
            let (server, reporter) = server();
            server.lease_failed(
                mac(3),
                LeaseError::InvalidRange {
                    start: Ipv4Addr::new(10, 0, 0, 200),
                    end: Ipv4Addr::new(10, 0, 0, 100),
                },
            );
            assert!(reporter.events().is_empty());

            server.lease_failed(
                mac(3),
                LeaseError::RangeExhausted {
                    start: Ipv4Addr::new(10, 0, 0, 100),
                    end: Ipv4Addr::new(10, 0, 0, 200),
                },
            );
            assert_eq!(
                reporter.events(),
                vec![BootEvent::LeaseExhausted { mac: mac(3) }]
            );
        }

        #[test]
        fn test_reply_encodes_within_packet() {
            let (server, _) = server();
            let (_, reply) = server.respond(&request(1, mac(1))).unwrap();
            let bytes = codec::encode(&reply).unwrap();
            assert_eq!(bytes.len(), codec::PACKET_LEN);
            assert_eq!(codec::decode(&bytes).unwrap(), reply);
        }
    }

    mod delivery_tests {
        use super::*;

        #[test]
        fn test_subnet_broadcast_address() {
            assert_eq!(config().subnet_broadcast(), Ipv4Addr::new(10, 0, 0, 255));

            let mut wide = config();
            wide.subnet_mask = Ipv4Addr::new(255, 255, 0, 0);
            assert_eq!(wide.subnet_broadcast(), Ipv4Addr::new(10, 0, 255, 255));
        }

        #[test]
        fn test_targets_subnet_first_then_global() {
            assert_eq!(
                broadcast_targets(&config()),
                vec![
                    SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 255), 68),
                    SocketAddrV4::new(Ipv4Addr::BROADCAST, 68),
                ]
            );
        }

        #[test]
        fn test_targets_deduplicated_for_zero_mask() {
            let mut cfg = config();
            cfg.subnet_mask = Ipv4Addr::UNSPECIFIED;
            assert_eq!(
                broadcast_targets(&cfg),
                vec![SocketAddrV4::new(Ipv4Addr::BROADCAST, 68)]
            );
        }

        #[test]
        fn test_deliver_stops_at_first_success() {
            let sink = ScriptedSink::default();
            let targets = broadcast_targets(&config());
            let used = deliver(&sink, b"reply", &targets).unwrap();
            assert_eq!(used, targets[0]);
            assert_eq!(sink.sent.lock().unwrap().len(), 1);
        }

        #[test]
        fn test_deliver_falls_back_to_global_broadcast() {
            let targets = broadcast_targets(&config());
            let sink = ScriptedSink {
                failing: vec![targets[0]],
                ..Default::default()
            };
            let used = deliver(&sink, b"reply", &targets).unwrap();
            assert_eq!(used, SocketAddrV4::new(Ipv4Addr::BROADCAST, 68));
            assert_eq!(sink.sent.lock().unwrap().len(), 2);
        }

        #[test]
        fn test_handle_request_reports_double_failure() {
            let (server, reporter) = server();
            let targets = broadcast_targets(&server.config);
            let sink = ScriptedSink {
                failing: targets.clone(),
                ..Default::default()
            };

            server.handle_request(&sink, &request(1, mac(1)));

            assert_eq!(sink.sent.lock().unwrap().len(), 2);
            assert_eq!(
                reporter.events().last(),
                Some(&BootEvent::DeliveryFailed {
                    mac: mac(1),
                    message_type: DhcpMessageType::Offer
                })
            );
        }

        #[test]
        fn test_handle_request_sends_encoded_offer() {
            let (server, _) = server();
            let sink = ScriptedSink::default();

            server.handle_request(&sink, &request(1, mac(1)));

            let sent = sink.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            let (dest, bytes) = &sent[0];
            assert_eq!(dest.port(), DHCP_CLIENT_PORT);
            let offer = codec::decode(bytes).unwrap();
            assert_eq!(offer.message_type(), Some(DhcpMessageType::Offer));
            assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 100));
        }
    }
}
