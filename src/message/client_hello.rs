use nom::bytes::complete::take;
use nom::multi::count;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;

use super::{Extensions, RANDOM_LEN};
use crate::buffer::Buf;

/// First handshake message, sent in the clear.
///
/// ```text
/// magic(4) ‖ version(1) ‖ random(32) ‖ u16 n ‖ u16 × n ‖ u32 kx mask
///   ‖ u8 kx id ‖ u16 len ‖ public ‖ u32 cert mask ‖ extensions
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub magic: u32,
    pub version: u8,
    pub random: [u8; RANDOM_LEN],
    pub cipher_suites: Vec<u16>,
    /// Bit `n` set when key exchange id `n` is supported.
    pub supported_kx: u32,
    pub kx_id: u8,
    pub public_key: &'a [u8],
    /// Bit `n` set when certificate format id `n` is accepted.
    pub supported_formats: u32,
    pub extensions: Extensions,
}

impl<'a> ClientHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientHello<'a>> {
        let (input, magic) = be_u32(input)?;
        let (input, version) = be_u8(input)?;
        let (input, random_slice) = take(RANDOM_LEN)(input)?;
        let (input, n) = be_u16(input)?;
        let (input, cipher_suites) = count(be_u16, n as usize)(input)?;
        let (input, supported_kx) = be_u32(input)?;
        let (input, kx_id) = be_u8(input)?;
        let (input, public_len) = be_u16(input)?;
        let (input, public_key) = take(public_len)(input)?;
        let (input, supported_formats) = be_u32(input)?;
        let (input, extensions) = Extensions::parse(input)?;

        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(random_slice);

        Ok((
            input,
            ClientHello {
                magic,
                version,
                random,
                cipher_suites,
                supported_kx,
                kx_id,
                public_key,
                supported_formats,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), crate::Error> {
        output.extend_from_slice(&self.magic.to_be_bytes());
        output.push(self.version);
        output.extend_from_slice(&self.random);
        output.extend_from_slice(&(self.cipher_suites.len() as u16).to_be_bytes());
        for id in &self.cipher_suites {
            output.extend_from_slice(&id.to_be_bytes());
        }
        output.extend_from_slice(&self.supported_kx.to_be_bytes());
        output.push(self.kx_id);
        output.extend_from_slice(&(self.public_key.len() as u16).to_be_bytes());
        output.extend_from_slice(self.public_key);
        output.extend_from_slice(&self.supported_formats.to_be_bytes());
        self.extensions.serialize(output)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{ExtensionType, MAGIC, PROTOCOL_VERSION};

    #[test]
    fn parse_serialized() {
        let public = [7u8; 32];
        let mut extensions = Extensions::new();
        extensions.insert(ExtensionType::Session, Vec::new());

        let hello = ClientHello {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            random: [1; 32],
            cipher_suites: vec![3, 1],
            supported_kx: 0b1011,
            kx_id: 0,
            public_key: &public,
            supported_formats: 0b1000,
            extensions,
        };

        let mut buf = Buf::new();
        hello.serialize(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"SSNC");
        assert_eq!(buf[4], 21);

        let (rest, parsed) = ClientHello::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }

    #[test]
    fn truncated_is_error() {
        let public = [7u8; 65];
        let hello = ClientHello {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            random: [0; 32],
            cipher_suites: vec![1],
            supported_kx: 1,
            kx_id: 0,
            public_key: &public,
            supported_formats: 1,
            extensions: Extensions::new(),
        };
        let mut buf = Buf::new();
        hello.serialize(&mut buf).unwrap();

        for cut in [3, 40, 50, buf.len() - 1] {
            assert!(ClientHello::parse(&buf[..cut]).is_err(), "cut at {}", cut);
        }
    }
}
