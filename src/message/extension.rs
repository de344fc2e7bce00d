use std::collections::BTreeMap;

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::buffer::Buf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionType {
    /// Resumption id; an empty id asks for a new session.
    Session,
    /// Client: list of u32 PSC ids it holds. Server: the chosen u32 id.
    PreSharedCertificate,
    /// `u8 format ‖ encoding` from the server, or
    /// `u16 siglen ‖ sig ‖ u8 format ‖ encoding` from the client.
    Certificate,
    /// u32 mask of certificate formats the server accepts from the client.
    CertificateRequest,
    ServerName,
    ApplicationProtocol,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ExtensionType::Session,
            1 => ExtensionType::PreSharedCertificate,
            2 => ExtensionType::Certificate,
            3 => ExtensionType::CertificateRequest,
            4 => ExtensionType::ServerName,
            5 => ExtensionType::ApplicationProtocol,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::Session => 0,
            ExtensionType::PreSharedCertificate => 1,
            ExtensionType::Certificate => 2,
            ExtensionType::CertificateRequest => 3,
            ExtensionType::ServerName => 4,
            ExtensionType::ApplicationProtocol => 5,
            ExtensionType::Unknown(v) => *v,
        }
    }
}

/// Point in the handshake an [`ExtensionHandler`] runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionStage {
    /// Client building its client_hello. Nothing was received yet.
    ClientHello,
    /// Server handling a client_hello. Output rides in the server_hello.
    ServerHello,
    /// Client handling an authenticated server_hello. Output rides in the
    /// Finished.
    ClientFinished,
    /// Server handling a verified Finished. Output is dropped.
    ServerFinished,
}

/// Application extensions on top of the handshake.
///
/// `received` holds the peer entries the handshake did not consume. Entries
/// put in `out` are sent with the next message, except ids the handshake
/// already uses. An error aborts the handshake; [`Error::Protocol`] errors
/// also alert the peer.
///
/// [`Error::Protocol`]: crate::Error::Protocol
pub trait ExtensionHandler: Send + Sync {
    fn process(
        &self,
        stage: ExtensionStage,
        received: &Extensions,
        out: &mut Extensions,
    ) -> Result<(), crate::Error>;
}

/// Extension block: `u16 total ‖ (u16 id ‖ u16 len ‖ data)*`.
///
/// Receivers [`remove`](Self::remove) the entries they act upon; whatever
/// is left was not understood and is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    entries: BTreeMap<u16, Vec<u8>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ty: ExtensionType, data: impl Into<Vec<u8>>) {
        self.entries.insert(ty.as_u16(), data.into());
    }

    pub fn get(&self, ty: ExtensionType) -> Option<&[u8]> {
        self.entries.get(&ty.as_u16()).map(|v| v.as_slice())
    }

    pub fn remove(&mut self, ty: ExtensionType) -> Option<Vec<u8>> {
        self.entries.remove(&ty.as_u16())
    }

    pub fn contains(&self, ty: ExtensionType) -> bool {
        self.entries.contains_key(&ty.as_u16())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExtensionType, &[u8])> {
        self.entries
            .iter()
            .map(|(k, v)| (ExtensionType::from_u16(*k), v.as_slice()))
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Extensions> {
        let (input, total) = be_u16(input)?;
        let (rest, mut block) = take(total)(input)?;

        let mut entries = BTreeMap::new();
        while !block.is_empty() {
            let (b, id) = be_u16(block)?;
            let (b, len) = be_u16(b)?;
            let (b, data) = take(len)(b)?;
            if entries.insert(id, data.to_vec()).is_some() {
                return Err(Err::Failure(Error::new(block, ErrorKind::Verify)));
            }
            block = b;
        }

        Ok((rest, Extensions { entries }))
    }

    /// Bytes [`serialize`](Self::serialize) will produce.
    pub fn encoded_len(&self) -> usize {
        2 + self.entries.values().map(|v| 4 + v.len()).sum::<usize>()
    }

    /// Fails when the block or an entry does not fit its u16 length.
    pub fn serialize(&self, output: &mut Buf) -> Result<(), crate::Error> {
        let too_long = |what: &str| crate::Error::internal(format!("{} too long", what));

        let body = u16::try_from(self.encoded_len() - 2).map_err(|_| too_long("extensions"))?;
        output.extend_from_slice(&body.to_be_bytes());
        for (id, data) in &self.entries {
            let len = u16::try_from(data.len())
                .map_err(|_| too_long(&format!("extension {:?}", ExtensionType::from_u16(*id))))?;
            output.extend_from_slice(&id.to_be_bytes());
            output.extend_from_slice(&len.to_be_bytes());
            output.extend_from_slice(data);
        }
        Ok(())
    }

    /// Add the entries of `other` whose ids are not taken yet.
    pub fn merge(&mut self, other: Extensions) {
        for (id, data) in other.entries {
            if self.entries.contains_key(&id) {
                debug!("Dropping extension {:?}, id in use", ExtensionType::from_u16(id));
                continue;
            }
            self.entries.insert(id, data);
        }
    }

    /// Trace whatever the receiver did not consume.
    pub fn trace_leftovers(&self, context: &str) {
        for (ty, data) in self.iter() {
            trace!("{}: ignoring extension {:?} ({} bytes)", context, ty, data.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serialize() {
        let mut ext = Extensions::new();
        ext.insert(ExtensionType::ServerName, b"example.org".to_vec());
        ext.insert(ExtensionType::Session, Vec::new());

        let mut out = Buf::new();
        ext.serialize(&mut out).unwrap();
        assert_eq!(out.len(), ext.encoded_len());
        // ordered by id: session first
        assert_eq!(&out[..6], &[0, 19, 0, 0, 0, 0]);

        let (rest, parsed) = Extensions::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
        assert_eq!(parsed.get(ExtensionType::ServerName), Some(&b"example.org"[..]));
    }

    #[test]
    fn oversized_entry_rejected() {
        let mut ext = Extensions::new();
        ext.insert(ExtensionType::Certificate, vec![0; 70_000]);
        let err = ext.serialize(&mut Buf::new()).unwrap_err();
        assert_eq!(err.code(), Some(crate::AlertCode::InternalError));

        // fits alone, not together
        let mut ext = Extensions::new();
        ext.insert(ExtensionType::Certificate, vec![0; 40_000]);
        ext.insert(ExtensionType::Unknown(0x100), vec![0; 40_000]);
        assert!(ext.serialize(&mut Buf::new()).is_err());
    }

    #[test]
    fn merge_keeps_existing() {
        let mut ext = Extensions::new();
        ext.insert(ExtensionType::Session, vec![1]);
        let mut other = Extensions::new();
        other.insert(ExtensionType::Session, vec![2]);
        other.insert(ExtensionType::Unknown(0x200), vec![3]);

        ext.merge(other);
        assert_eq!(ext.get(ExtensionType::Session), Some(&[1u8][..]));
        assert_eq!(ext.get(ExtensionType::Unknown(0x200)), Some(&[3u8][..]));
    }

    #[test]
    fn duplicate_rejected() {
        let raw = [0, 8, 0, 4, 0, 0, 0, 4, 0, 0];
        assert!(Extensions::parse(&raw).is_err());
    }

    #[test]
    fn truncated_rejected() {
        assert!(Extensions::parse(&[0, 5, 0, 4, 0, 9]).is_err());
        assert!(Extensions::parse(&[0]).is_err());
    }

    #[test]
    fn unknown_kept() {
        let raw = [0, 5, 0x12, 0x34, 0, 1, 7];
        let (_, ext) = Extensions::parse(&raw).unwrap();
        assert_eq!(ext.get(ExtensionType::Unknown(0x1234)), Some(&[7u8][..]));
    }
}
