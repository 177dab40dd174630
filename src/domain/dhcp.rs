//! DHCP packet domain models.
//!
//! `BootPacket` mirrors the BOOTP header field by field and keeps the
//! options as raw bytes keyed by code. Wire encoding lives in `codec`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use crate::error::EncodeError;

/// BOOTP operation codes.
pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Length of the fixed `sname` region.
pub const SNAME_LEN: usize = 64;
/// Length of the fixed `file` region.
pub const FILE_LEN: usize = 128;

/// DHCP option codes
pub mod option_codes {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const TFTP_SERVER_NAME: u8 = 66;
    pub const BOOTFILE_NAME: u8 = 67;
    pub const CLIENT_ARCH: u8 = 93;
    pub const END: u8 = 255;
}

/// DHCP message types as defined in RFC 2131.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    /// Value carried in option 53.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

impl std::fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// One BOOTP/DHCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPacket {
    /// Operation: 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    /// Hardware type (1 = Ethernet)
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    /// Client IP address (if already known)
    pub ciaddr: Ipv4Addr,
    /// 'Your' IP address (assigned by server)
    pub yiaddr: Ipv4Addr,
    /// Next server IP address
    pub siaddr: Ipv4Addr,
    /// Relay agent IP address
    pub giaddr: Ipv4Addr,
    /// Client hardware address
    pub chaddr: MacAddr6,
    pub sname: [u8; SNAME_LEN],
    pub file: [u8; FILE_LEN],
    /// Raw option values keyed by option code
    pub options: BTreeMap<u8, Vec<u8>>,
}

impl Default for BootPacket {
    fn default() -> Self {
        Self {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: MacAddr6::nil(),
            sname: [0; SNAME_LEN],
            file: [0; FILE_LEN],
            options: BTreeMap::new(),
        }
    }
}

impl BootPacket {
    /// Returns true if this is a client request (BOOTREQUEST).
    pub fn is_request(&self) -> bool {
        self.op == BOOTREQUEST
    }

    /// Get the DHCP message type from option 53.
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options
            .get(&option_codes::MESSAGE_TYPE)
            .and_then(|v| v.first())
            .and_then(|&t| DhcpMessageType::from_u8(t))
    }

    /// Raw option 53 value, including types we do not model.
    pub fn raw_message_type(&self) -> Option<u8> {
        self.options
            .get(&option_codes::MESSAGE_TYPE)
            .and_then(|v| v.first().copied())
    }

    /// Get the client architecture type (option 93).
    pub fn client_arch(&self) -> Option<u16> {
        match self.options.get(&option_codes::CLIENT_ARCH) {
            Some(v) if v.len() >= 2 => Some(u16::from_be_bytes([v[0], v[1]])),
            _ => None,
        }
    }

    /// Get the requested IP address (option 50).
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.option_ipv4(option_codes::REQUESTED_IP)
    }

    fn option_ipv4(&self, code: u8) -> Option<Ipv4Addr> {
        match self.options.get(&code) {
            Some(v) if v.len() >= 4 => Some(Ipv4Addr::new(v[0], v[1], v[2], v[3])),
            _ => None,
        }
    }

    pub fn set_option(&mut self, code: u8, value: impl Into<Vec<u8>>) {
        self.options.insert(code, value.into());
    }

    pub fn set_message_type(&mut self, msg_type: DhcpMessageType) {
        self.set_option(option_codes::MESSAGE_TYPE, vec![msg_type.as_u8()]);
    }

    /// Server host name from the fixed header.
    pub fn server_name(&self) -> String {
        null_terminated(&self.sname)
    }

    /// Boot file name from the fixed header.
    pub fn boot_file(&self) -> String {
        null_terminated(&self.file)
    }

    pub fn set_server_name(&mut self, name: &str) -> Result<(), EncodeError> {
        copy_into("sname", &mut self.sname, name.as_bytes())
    }

    pub fn set_boot_file(&mut self, name: &str) -> Result<(), EncodeError> {
        copy_into("file", &mut self.file, name.as_bytes())
    }
}

/// Copy `src` into a fixed region, zero filling the remainder.
fn copy_into(field: &'static str, dst: &mut [u8], src: &[u8]) -> Result<(), EncodeError> {
    if src.len() > dst.len() {
        return Err(EncodeError::FieldTooLong {
            field,
            len: src.len(),
            capacity: dst.len(),
        });
    }
    dst.fill(0);
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

fn null_terminated(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}
