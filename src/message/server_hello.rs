use nom::bytes::complete::take;
use nom::combinator::rest;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::{HELLO_RETRY, RANDOM_LEN};
use crate::buffer::Buf;

/// Server reply to a client_hello.
///
/// ```text
/// version(1) ‖ random(32) ‖ u16 suite ‖ u16 len ‖ public ‖ encrypted
/// ```
///
/// The head (everything up to and including the public value) is in the
/// clear and is the AAD of the encrypted tail. The tail decrypts to a
/// [`SignedBlock`](super::SignedBlock).
///
/// A hello-retry has `0xFFFF` in the suite slot, the u32 mask of the
/// server's key exchange groups in the public slot and no tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello<'a> {
    pub version: u8,
    pub random: [u8; RANDOM_LEN],
    pub cipher_suite: u16,
    pub public_key: &'a [u8],
    pub encrypted: &'a [u8],
}

impl<'a> ServerHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ServerHello<'a>> {
        let (input, version) = be_u8(input)?;
        let (input, random_slice) = take(RANDOM_LEN)(input)?;
        let (input, cipher_suite) = be_u16(input)?;
        let (input, public_len) = be_u16(input)?;
        let (input, public_key) = take(public_len)(input)?;
        let (input, encrypted) = rest(input)?;

        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(random_slice);

        Ok((
            input,
            ServerHello {
                version,
                random,
                cipher_suite,
                public_key,
                encrypted,
            },
        ))
    }

    pub fn is_hello_retry(&self) -> bool {
        self.cipher_suite == HELLO_RETRY
    }

    /// Key exchange mask carried by a hello-retry.
    pub fn retry_mask(&self) -> Option<u32> {
        if !self.is_hello_retry() {
            return None;
        }
        let bytes: [u8; 4] = self.public_key.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn head_len(&self) -> usize {
        1 + RANDOM_LEN + 2 + 2 + self.public_key.len()
    }

    /// Write the clear head, without the encrypted tail.
    pub fn serialize_head(&self, output: &mut Buf) {
        output.push(self.version);
        output.extend_from_slice(&self.random);
        output.extend_from_slice(&self.cipher_suite.to_be_bytes());
        output.extend_from_slice(&(self.public_key.len() as u16).to_be_bytes());
        output.extend_from_slice(self.public_key);
    }
}
