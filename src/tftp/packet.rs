//! TFTP packet formats (RFC 1350).

/// TFTP opcodes
pub const OPCODE_RRQ: u16 = 1;
pub const OPCODE_WRQ: u16 = 2;
pub const OPCODE_DATA: u16 = 3;
pub const OPCODE_ACK: u16 = 4;
pub const OPCODE_ERROR: u16 = 5;

/// TFTP error codes
pub const ERROR_FILE_NOT_FOUND: u16 = 1;
pub const ERROR_ACCESS_VIOLATION: u16 = 2;

/// Payload bytes per DATA block.
pub const BLOCK_SIZE: usize = 512;

/// A decoded TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    ReadRequest { filename: String, mode: String },
    WriteRequest { filename: String },
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
}

/// Decode a datagram. Unknown opcodes and truncated packets yield `None`.
pub fn parse(buf: &[u8]) -> Option<TftpPacket> {
    if buf.len() < 2 {
        return None;
    }

    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    let body = &buf[2..];

    match opcode {
        OPCODE_RRQ => {
            let (filename, rest) = split_cstr(body);
            let (mode, _) = split_cstr(rest);
            Some(TftpPacket::ReadRequest { filename, mode })
        }
        OPCODE_WRQ => {
            let (filename, _) = split_cstr(body);
            Some(TftpPacket::WriteRequest { filename })
        }
        OPCODE_DATA if body.len() >= 2 => Some(TftpPacket::Data {
            block: u16::from_be_bytes([body[0], body[1]]),
            payload: body[2..].to_vec(),
        }),
        OPCODE_ACK if body.len() >= 2 => Some(TftpPacket::Ack {
            block: u16::from_be_bytes([body[0], body[1]]),
        }),
        OPCODE_ERROR if body.len() >= 2 => {
            let (message, _) = split_cstr(&body[2..]);
            Some(TftpPacket::Error {
                code: u16::from_be_bytes([body[0], body[1]]),
                message,
            })
        }
        _ => None,
    }
}

/// Split off a NUL-terminated string. Without a terminator the whole
/// slice is the string.
fn split_cstr(buf: &[u8]) -> (String, &[u8]) {
    match buf.iter().position(|&b| b == 0) {
        Some(end) => (
            String::from_utf8_lossy(&buf[..end]).into_owned(),
            &buf[end + 1..],
        ),
        None => (String::from_utf8_lossy(buf).into_owned(), &[]),
    }
}

pub fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + data.len());
    packet.extend_from_slice(&OPCODE_DATA.to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet.extend_from_slice(data);
    packet
}

pub fn build_ack(block: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4);
    packet.extend_from_slice(&OPCODE_ACK.to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet
}

pub fn build_error(code: u16, message: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(5 + message.len());
    packet.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
    packet.extend_from_slice(&code.to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);
    packet
}

pub fn build_read_request(filename: &str, mode: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + filename.len() + mode.len());
    packet.extend_from_slice(&OPCODE_RRQ.to_be_bytes());
    packet.extend_from_slice(filename.as_bytes());
    packet.push(0);
    packet.extend_from_slice(mode.as_bytes());
    packet.push(0);
    packet
}
