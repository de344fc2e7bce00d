//! Wire format.
//!
//! Every packet starts with a type byte. Types at or above `0x40` are
//! handshake frames with a 24-bit length, types below are records with a
//! 16-bit length:
//!
//! ```text
//! handshake: [u8 type][u24 len][payload]
//! record:    [u8 type][u16 len][payload]
//! ```

mod alert;
mod client_hello;
mod extension;
mod server_hello;
mod signed;

pub use alert::{sanitize_peer_message, Alert, ALERT_TAG_LEN};
pub use client_hello::ClientHello;
pub use extension::{ExtensionHandler, ExtensionStage, ExtensionType, Extensions};
pub use server_hello::ServerHello;
pub use signed::SignedBlock;

use crate::buffer::Buf;

/// "SSNC"
pub const MAGIC: u32 = 0x53534E43;
pub const PROTOCOL_VERSION: u8 = 21;

pub const H_CLIENT_HELLO: u8 = 0x40;
pub const H_SERVER_HELLO: u8 = 0x41;
pub const H_FINISHED: u8 = 0x42;

pub const P_ALERT: u8 = 0x01;
pub const P_DATA: u8 = 0x30;
/// 0-RTT early data.
pub const P_PREDATA: u8 = 0x31;

pub const HANDSHAKE_HEADER_LEN: usize = 4;
pub const RECORD_HEADER_LEN: usize = 3;

/// Cipher suite slot value of a hello-retry server_hello.
pub const HELLO_RETRY: u16 = 0xFFFF;

/// Largest plaintext carried by one data record.
pub const MAX_PLAINTEXT: usize = 32767;

/// Largest record ciphertext accepted, excluding the AEAD tag.
pub const MAX_CIPHERTEXT: usize = 32768;

pub const RANDOM_LEN: usize = 32;

/// Largest handshake frame accepted.
pub const MAX_HANDSHAKE_LEN: usize = 1 << 20;

/// Whether a type byte introduces a handshake frame.
pub fn is_handshake(ty: u8) -> bool {
    ty >= 0x40
}

/// Outcome of looking at the head of an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// A whole packet is buffered.
    Complete {
        ty: u8,
        header_len: usize,
        body_len: usize,
    },
    /// This many more bytes are needed before anything can be decided.
    Partial(usize),
}

impl Packet {
    /// Header plus body length of a complete packet.
    pub fn total_len(&self) -> usize {
        match self {
            Packet::Complete {
                header_len,
                body_len,
                ..
            } => header_len + body_len,
            Packet::Partial(_) => 0,
        }
    }
}

/// Frame the packet at the head of `input` without consuming anything.
pub fn read_packet(input: &[u8]) -> Packet {
    let Some(&ty) = input.first() else {
        return Packet::Partial(RECORD_HEADER_LEN);
    };

    let (header_len, body_len) = if is_handshake(ty) {
        if input.len() < HANDSHAKE_HEADER_LEN {
            return Packet::Partial(HANDSHAKE_HEADER_LEN - input.len());
        }
        let len = u32::from_be_bytes([0, input[1], input[2], input[3]]) as usize;
        (HANDSHAKE_HEADER_LEN, len)
    } else {
        if input.len() < RECORD_HEADER_LEN {
            return Packet::Partial(RECORD_HEADER_LEN - input.len());
        }
        let len = u16::from_be_bytes([input[1], input[2]]) as usize;
        (RECORD_HEADER_LEN, len)
    };

    let total = header_len + body_len;
    if input.len() < total {
        return Packet::Partial(total - input.len());
    }

    Packet::Complete {
        ty,
        header_len,
        body_len,
    }
}

pub fn handshake_header(ty: u8, len: usize) -> [u8; HANDSHAKE_HEADER_LEN] {
    let l = (len as u32).to_be_bytes();
    [ty, l[1], l[2], l[3]]
}

pub fn record_header(ty: u8, len: usize) -> [u8; RECORD_HEADER_LEN] {
    let l = (len as u16).to_be_bytes();
    [ty, l[0], l[1]]
}

/// Append a complete handshake frame.
pub fn write_handshake(out: &mut Buf, ty: u8, body: &[u8]) {
    out.extend_from_slice(&handshake_header(ty, body.len()));
    out.extend_from_slice(body);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frames_handshake_and_record() {
        let mut buf = Buf::new();
        write_handshake(&mut buf, H_FINISHED, &[1, 2, 3]);
        assert_eq!(&*buf, &[0x42, 0, 0, 3, 1, 2, 3]);
        assert_eq!(
            read_packet(&buf),
            Packet::Complete {
                ty: H_FINISHED,
                header_len: 4,
                body_len: 3
            }
        );

        let rec = [P_DATA, 0, 2, 9, 9];
        assert_eq!(read_packet(&rec).total_len(), 5);
    }

    #[test]
    fn partial_reports_missing_bytes() {
        assert_eq!(read_packet(&[]), Packet::Partial(3));
        assert_eq!(read_packet(&[H_CLIENT_HELLO, 0]), Packet::Partial(2));
        assert_eq!(read_packet(&[P_DATA, 0]), Packet::Partial(1));
        assert_eq!(read_packet(&[P_DATA, 0, 10, 1]), Packet::Partial(9));
        assert_eq!(read_packet(&[H_SERVER_HELLO, 0, 1, 0]), Packet::Partial(256));
    }
}
