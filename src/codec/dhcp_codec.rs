//! DHCP packet codec implementation.
//!
//! Layout (offsets into the UDP payload):
//!
//! ```text
//!   0 op | 1 htype | 2 hlen | 3 hops | 4..8 xid | 8..10 secs | 10..12 flags
//!  12..16 ciaddr | 16..20 yiaddr | 20..24 siaddr | 24..28 giaddr
//!  28..44 chaddr | 44..108 sname | 108..236 file | 236..240 magic cookie
//! 240..   options (tag, length, value), terminated by 255
//! ```

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use crate::domain::{option_codes, BootPacket, FILE_LEN, SNAME_LEN};
use crate::error::{EncodeError, ParseError};

/// DHCP magic cookie: 0x63825363
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Fixed header plus magic cookie.
pub const HEADER_LEN: usize = 240;

/// Size of every encoded reply (the datagram size all clients must accept).
pub const PACKET_LEN: usize = 576;

const CHADDR_OFFSET: usize = 28;
const SNAME_OFFSET: usize = 44;
const FILE_OFFSET: usize = SNAME_OFFSET + SNAME_LEN;
const COOKIE_OFFSET: usize = FILE_OFFSET + FILE_LEN;

/// Decode a DHCP packet from a UDP payload.
///
/// Only the header length is fatal. A missing magic cookie yields an empty
/// option map, and truncated option data ends option parsing early.
pub fn decode(data: &[u8]) -> Result<BootPacket, ParseError> {
    if data.len() < HEADER_LEN {
        return Err(ParseError::PacketTooShort {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }

    let mut sname = [0u8; SNAME_LEN];
    sname.copy_from_slice(&data[SNAME_OFFSET..FILE_OFFSET]);
    let mut file = [0u8; FILE_LEN];
    file.copy_from_slice(&data[FILE_OFFSET..COOKIE_OFFSET]);

    let options = if data[COOKIE_OFFSET..HEADER_LEN] == DHCP_MAGIC_COOKIE {
        parse_options(&data[HEADER_LEN..])
    } else {
        Default::default()
    };

    Ok(BootPacket {
        op: data[0],
        htype: data[1],
        hlen: data[2],
        hops: data[3],
        xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        secs: u16::from_be_bytes([data[8], data[9]]),
        flags: u16::from_be_bytes([data[10], data[11]]),
        ciaddr: read_ipv4(data, 12),
        yiaddr: read_ipv4(data, 16),
        siaddr: read_ipv4(data, 20),
        giaddr: read_ipv4(data, 24),
        chaddr: MacAddr6::new(
            data[CHADDR_OFFSET],
            data[CHADDR_OFFSET + 1],
            data[CHADDR_OFFSET + 2],
            data[CHADDR_OFFSET + 3],
            data[CHADDR_OFFSET + 4],
            data[CHADDR_OFFSET + 5],
        ),
        sname,
        file,
        options,
    })
}

fn read_ipv4(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

fn parse_options(data: &[u8]) -> std::collections::BTreeMap<u8, Vec<u8>> {
    let mut options = std::collections::BTreeMap::new();
    let mut offset = 0;

    while offset < data.len() {
        let code = data[offset];

        if code == option_codes::PAD {
            offset += 1;
            continue;
        }

        if code == option_codes::END {
            break;
        }

        if offset + 1 >= data.len() {
            break;
        }

        let len = data[offset + 1] as usize;
        let start = offset + 2;
        if start + len > data.len() {
            break;
        }

        options.insert(code, data[start..start + len].to_vec());
        offset = start + len;
    }

    options
}

/// Encode a packet into a `PACKET_LEN` byte datagram.
///
/// Options are written in ascending code order followed by the end tag.
pub fn encode(packet: &BootPacket) -> Result<Vec<u8>, EncodeError> {
    let mut needed = 1; // end tag
    for (&code, value) in &packet.options {
        if value.len() > u8::MAX as usize {
            return Err(EncodeError::OptionTooLong {
                code,
                len: value.len(),
            });
        }
        needed += 2 + value.len();
    }

    let available = PACKET_LEN - HEADER_LEN;
    if needed > available {
        return Err(EncodeError::OptionsOverflow { needed, available });
    }

    let mut buf = vec![0u8; PACKET_LEN];

    buf[0] = packet.op;
    buf[1] = packet.htype;
    buf[2] = packet.hlen;
    buf[3] = packet.hops;
    buf[4..8].copy_from_slice(&packet.xid.to_be_bytes());
    buf[8..10].copy_from_slice(&packet.secs.to_be_bytes());
    buf[10..12].copy_from_slice(&packet.flags.to_be_bytes());
    buf[12..16].copy_from_slice(&packet.ciaddr.octets());
    buf[16..20].copy_from_slice(&packet.yiaddr.octets());
    buf[20..24].copy_from_slice(&packet.siaddr.octets());
    buf[24..28].copy_from_slice(&packet.giaddr.octets());
    buf[CHADDR_OFFSET..CHADDR_OFFSET + 6].copy_from_slice(packet.chaddr.as_bytes());
    buf[SNAME_OFFSET..FILE_OFFSET].copy_from_slice(&packet.sname);
    buf[FILE_OFFSET..COOKIE_OFFSET].copy_from_slice(&packet.file);
    buf[COOKIE_OFFSET..HEADER_LEN].copy_from_slice(&DHCP_MAGIC_COOKIE);

    let mut offset = HEADER_LEN;
    for (&code, value) in &packet.options {
        buf[offset] = code;
        buf[offset + 1] = value.len() as u8;
        buf[offset + 2..offset + 2 + value.len()].copy_from_slice(value);
        offset += 2 + value.len();
    }
    buf[offset] = option_codes::END;

    Ok(buf)
}
