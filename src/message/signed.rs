use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use super::Extensions;
use crate::buffer::Buf;

/// An extension block followed by a signature or MAC over it:
/// `extensions ‖ u16 len ‖ signature`.
///
/// This is the plaintext of both the server_hello tail and the client
/// Finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock<'a> {
    pub extensions: Extensions,
    /// The extension block as it was on the wire, length prefix included.
    pub ext_raw: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> SignedBlock<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], SignedBlock<'a>> {
        let start = input;
        let (input, extensions) = Extensions::parse(input)?;
        let ext_raw = &start[..start.len() - input.len()];
        let (input, sig_len) = be_u16(input)?;
        let (input, signature) = take(sig_len)(input)?;

        Ok((
            input,
            SignedBlock {
                extensions,
                ext_raw,
                signature,
            },
        ))
    }

    /// Write `ext_raw ‖ u16 len ‖ signature`.
    pub fn serialize(ext_raw: &[u8], signature: &[u8], output: &mut Buf) {
        output.extend_from_slice(ext_raw);
        output.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        output.extend_from_slice(signature);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::ExtensionType;

    #[test]
    fn keeps_raw_extensions() {
        let mut ext = Extensions::new();
        ext.insert(ExtensionType::PreSharedCertificate, 7u32.to_be_bytes().to_vec());
        let mut raw = Buf::new();
        ext.serialize(&mut raw).unwrap();

        let mut buf = Buf::new();
        SignedBlock::serialize(&raw, &[5; 40], &mut buf);

        let (rest, block) = SignedBlock::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(block.ext_raw, &raw[..]);
        assert_eq!(block.signature, &[5; 40]);
        assert_eq!(block.extensions, ext);
    }

    #[test]
    fn short_signature() {
        let buf = [0, 0, 0, 10, 1, 2];
        assert!(SignedBlock::parse(&buf).is_err());
    }
}
