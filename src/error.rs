use std::fmt;

use thiserror::Error;

/// Alert codes carried in `P_ALERT` records.
///
/// The numeric value is the first byte of the alert body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCode {
    /// Malformed or unexpected packet.
    IllegalPacket,
    /// AEAD authentication failed.
    CipherFault,
    /// Peer speaks another protocol version.
    VersionMismatch,
    /// Local bug or misuse (e.g. a key label derived twice).
    InternalError,
    /// A parameter failed validation (bad signature, unknown suite...).
    IllegalParam,
    /// No common suite, group, certificate format or identity.
    NegotiationFailed,
    /// A code this implementation does not know.
    Unknown(u8),
}

impl AlertCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AlertCode::IllegalPacket,
            1 => AlertCode::CipherFault,
            2 => AlertCode::VersionMismatch,
            3 => AlertCode::InternalError,
            4 => AlertCode::IllegalParam,
            5 => AlertCode::NegotiationFailed,
            _ => AlertCode::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertCode::IllegalPacket => 0,
            AlertCode::CipherFault => 1,
            AlertCode::VersionMismatch => 2,
            AlertCode::InternalError => 3,
            AlertCode::IllegalParam => 4,
            AlertCode::NegotiationFailed => 5,
            AlertCode::Unknown(v) => *v,
        }
    }
}

impl fmt::Display for AlertCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertCode::IllegalPacket => "ILLEGAL_PACKET",
            AlertCode::CipherFault => "CIPHER_FAULT",
            AlertCode::VersionMismatch => "VERSION_MISMATCH",
            AlertCode::InternalError => "INTERNAL_ERROR",
            AlertCode::IllegalParam => "ILLEGAL_PARAM",
            AlertCode::NegotiationFailed => "NEGOTIATION_FAILED",
            AlertCode::Unknown(v) => return write!(f, "UNKNOWN({})", v),
        };
        f.write_str(name)
    }
}

/// Errors raised by the engines, the registry and configuration.
///
/// Errors are `Clone` so an engine can latch the first failure and raise it
/// again on every later call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A local check failed. The peer was (best effort) sent an alert with `code`.
    #[error("{code}: {message}")]
    Protocol { code: AlertCode, message: String },

    /// The peer sent an alert.
    ///
    /// `trustable` is true when the alert carried a valid tag under the
    /// session alert key, i.e. it really came from the authenticated peer.
    #[error("peer alert {code}: {message} (trustable: {trustable})")]
    PeerAlert {
        code: AlertCode,
        message: String,
        trustable: bool,
    },

    /// The engine was closed.
    #[error("engine closed")]
    Closed,

    /// wrap/unwrap called before the handshake produced traffic keys.
    #[error("handshake not complete")]
    NotReady,

    /// An id is already taken in a registry table.
    #[error("{table} id {id} already registered")]
    AlreadyRegistered { table: &'static str, id: u16 },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Key or certificate material could not be parsed or generated.
    #[error("certificate error: {0}")]
    Certificate(String),
}

impl Error {
    pub(crate) fn protocol(code: AlertCode, message: impl Into<String>) -> Self {
        Error::Protocol {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn illegal_packet(message: impl Into<String>) -> Self {
        Self::protocol(AlertCode::IllegalPacket, message)
    }

    pub(crate) fn illegal_param(message: impl Into<String>) -> Self {
        Self::protocol(AlertCode::IllegalParam, message)
    }

    pub(crate) fn negotiation_failed(message: impl Into<String>) -> Self {
        Self::protocol(AlertCode::NegotiationFailed, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::protocol(AlertCode::InternalError, message)
    }

    /// The alert code of this error, if it maps onto one.
    ///
    /// Errors raised outside the handshake (configuration, registry) and
    /// [`Error::Closed`] have no code.
    pub fn code(&self) -> Option<AlertCode> {
        match self {
            Error::Protocol { code, .. } => Some(*code),
            Error::PeerAlert { code, .. } => Some(*code),
            Error::NotReady => Some(AlertCode::InternalError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alert_code_wire_values() {
        for v in 0..=5u8 {
            assert_eq!(AlertCode::from_u8(v).as_u8(), v);
        }
        assert_eq!(AlertCode::from_u8(77), AlertCode::Unknown(77));
        assert_eq!(AlertCode::from_u8(4), AlertCode::IllegalParam);
    }

    #[test]
    fn protocol_error_display() {
        let e = Error::illegal_param("bad signature");
        assert_eq!(e.to_string(), "ILLEGAL_PARAM: bad signature");
        assert_eq!(e.code(), Some(AlertCode::IllegalParam));
        assert_eq!(Error::Closed.code(), None);
    }
}
