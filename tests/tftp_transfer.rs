//! TFTP server driven over loopback UDP through its listening socket.

use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pxeboot::tftp::packet::{self, TftpPacket, BLOCK_SIZE};
use pxeboot::{BootEvent, MemoryReporter, TftpServer, TransferConfig};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    server_addr: SocketAddr,
    reporter: Arc<MemoryReporter>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(MemoryReporter::new());

        let server = TftpServer::new(
            dir.path(),
            "127.0.0.1:0".parse().unwrap(),
            reporter.clone(),
        )
        .with_transfer_config(TransferConfig {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
        });
        let running = server.running_flag();

        let socket = server.bind().unwrap();
        let server_addr = socket.local_addr().unwrap();
        let handle = thread::spawn(move || server.serve(socket).unwrap());

        let deadline = Instant::now() + Duration::from_secs(3);
        while !running.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "server did not start");
            thread::sleep(Duration::from_millis(10));
        }

        Self {
            dir,
            server_addr,
            reporter,
            running,
            handle: Some(handle),
        }
    }

    fn write_file(&self, name: &str, contents: &[u8]) {
        fs::write(self.dir.path().join(name), contents).unwrap();
    }

    fn client(&self) -> UdpSocket {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client
    }

    fn wait_for(&self, cond: impl Fn(&[BootEvent]) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond(&self.reporter.events()) {
            assert!(Instant::now() < deadline, "event not reported in time");
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn recv(client: &UdpSocket) -> Option<(TftpPacket, SocketAddr)> {
    let mut buf = [0u8; 1500];
    let (len, from) = client.recv_from(&mut buf).ok()?;
    Some((packet::parse(&buf[..len])?, from))
}

/// Fetch `name`, acknowledging every block. Returns the file and the
/// (block, length) sequence seen.
fn fetch(client: &UdpSocket, server: SocketAddr, name: &str) -> (Vec<u8>, Vec<(u16, usize)>) {
    client
        .send_to(&packet::build_read_request(name, "octet"), server)
        .unwrap();

    let mut contents = Vec::new();
    let mut blocks = Vec::new();
    loop {
        let (pkt, from) = recv(client).expect("transfer stalled");
        let TftpPacket::Data { block, payload } = pkt else {
            panic!("expected DATA, got {:?}", pkt);
        };
        assert_ne!(from, server, "DATA must come from the transfer socket");
        client.send_to(&packet::build_ack(block), from).unwrap();

        blocks.push((block, payload.len()));
        let last = payload.len() < BLOCK_SIZE;
        contents.extend(payload);
        if last {
            return (contents, blocks);
        }
    }
}

#[test]
fn rrq_downloads_whole_file() {
    let h = Harness::start();
    let data: Vec<u8> = (0..1300u32).map(|i| (i * 7 % 256) as u8).collect();
    h.write_file("bootx64.efi", &data);

    let client = h.client();
    let (contents, blocks) = fetch(&client, h.server_addr, "bootx64.efi");

    assert_eq!(contents, data);
    assert_eq!(blocks, vec![(1, 512), (2, 512), (3, 276)]);
    h.wait_for(|events| {
        events.iter().any(|e| {
            matches!(e, BootEvent::TransferCompleted { bytes: 1300, blocks: 3, .. })
        })
    });
}

#[test]
fn exact_multiple_ends_with_empty_block() {
    let h = Harness::start();
    h.write_file("pxelinux.0", &[0x5a; 512]);

    let client = h.client();
    let (_, blocks) = fetch(&client, h.server_addr, "pxelinux.0");
    assert_eq!(blocks, vec![(1, 512), (2, 0)]);
}

#[test]
fn missing_file_gets_single_not_found() {
    let h = Harness::start();
    let client = h.client();
    client
        .send_to(
            &packet::build_read_request("missing.efi", "octet"),
            h.server_addr,
        )
        .unwrap();

    let (pkt, _) = recv(&client).expect("no ERROR received");
    assert_eq!(
        pkt,
        TftpPacket::Error {
            code: 1,
            message: "File not found: missing.efi".to_string()
        }
    );

    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    assert!(recv(&client).is_none());
}

#[test]
fn traversal_is_dropped_silently() {
    let h = Harness::start();
    let client = h.client();
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    client
        .send_to(
            &packet::build_read_request("../../etc/passwd", "octet"),
            h.server_addr,
        )
        .unwrap();

    assert!(recv(&client).is_none());
    h.wait_for(|events| {
        events
            .iter()
            .any(|e| matches!(e, BootEvent::PathRejected { path, .. } if path == "../../etc/passwd"))
    });
}

#[test]
fn write_request_is_refused() {
    let h = Harness::start();
    let client = h.client();
    let mut wrq = packet::build_read_request("upload.bin", "octet");
    wrq[1] = packet::OPCODE_WRQ as u8;
    client.send_to(&wrq, h.server_addr).unwrap();

    let (pkt, from) = recv(&client).expect("no ERROR received");
    assert_eq!(from, h.server_addr);
    assert_eq!(
        pkt,
        TftpPacket::Error {
            code: 2,
            message: "Write not supported".to_string()
        }
    );
    assert!(!h.dir.path().join("upload.bin").exists());
    h.wait_for(|events| {
        events
            .iter()
            .any(|e| matches!(e, BootEvent::WriteRejected { .. }))
    });
}

#[test]
fn stray_packets_are_ignored() {
    let h = Harness::start();
    h.write_file("grub.cfg", b"set timeout=5\n");
    let client = h.client();
    client
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();

    client.send_to(&[0, 1], h.server_addr).unwrap();
    client.send_to(&packet::build_ack(1), h.server_addr).unwrap();
    client.send_to(&[0, 9, 0, 0], h.server_addr).unwrap();
    assert!(recv(&client).is_none());

    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let (contents, _) = fetch(&client, h.server_addr, "grub.cfg");
    assert_eq!(contents, b"set timeout=5\n");
}

#[test]
fn silent_client_exhausts_retries() {
    let h = Harness::start();
    h.write_file("kernel", &[1; 100]);
    let client = h.client();
    client
        .send_to(&packet::build_read_request("kernel", "octet"), h.server_addr)
        .unwrap();

    let mut copies = 0;
    client
        .set_read_timeout(Some(Duration::from_millis(600)))
        .unwrap();
    while let Some((pkt, _)) = recv(&client) {
        assert!(matches!(pkt, TftpPacket::Data { block: 1, .. }));
        copies += 1;
    }

    assert_eq!(copies, 3);
    h.wait_for(|events| {
        events.iter().any(|e| {
            matches!(e, BootEvent::RetriesExhausted { block: 1, attempts: 3, .. })
        })
    });
}

#[test]
fn concurrent_transfers_are_independent() {
    let h = Harness::start();
    h.write_file("a.bin", &[b'a'; 2000]);
    h.write_file("b.bin", &[b'b'; 700]);

    let server = h.server_addr;
    let first = thread::spawn(move || {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        fetch(&client, server, "a.bin").0
    });
    let second = thread::spawn(move || {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        fetch(&client, server, "b.bin").0
    });

    assert_eq!(first.join().unwrap(), vec![b'a'; 2000]);
    assert_eq!(second.join().unwrap(), vec![b'b'; 700]);
}
