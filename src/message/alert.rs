use nom::bytes::complete::take;
use nom::combinator::rest;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;
use crate::error::AlertCode;

/// HMAC-SHA256 tag length on an authenticated alert.
pub const ALERT_TAG_LEN: usize = 32;

/// Body of a `P_ALERT` record: `code ‖ u8 len ‖ msg ‖ [tag]`.
///
/// The tag is HMAC-SHA256 under the `alert` key over `code ‖ len ‖ msg`,
/// present once both sides share a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub code: AlertCode,
    pub message: String,
    pub tag: Option<[u8; ALERT_TAG_LEN]>,
}

impl Alert {
    /// Messages longer than 255 bytes are cut at a char boundary.
    pub fn new(code: AlertCode, message: &str) -> Self {
        let mut end = message.len().min(u8::MAX as usize);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        Alert {
            code,
            message: message[..end].to_string(),
            tag: None,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Alert> {
        let (input, code) = be_u8(input)?;
        let (input, len) = be_u8(input)?;
        let (input, msg) = take(len)(input)?;
        let (input, trailer) = rest(input)?;

        let tag = if trailer.len() >= ALERT_TAG_LEN {
            let mut tag = [0u8; ALERT_TAG_LEN];
            tag.copy_from_slice(&trailer[..ALERT_TAG_LEN]);
            Some(tag)
        } else {
            None
        };

        Ok((
            input,
            Alert {
                code: AlertCode::from_u8(code),
                message: String::from_utf8_lossy(msg).into_owned(),
                tag,
            },
        ))
    }

    /// The tagged part, `code ‖ len ‖ msg`.
    pub fn raw_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.message.len());
        out.push(self.code.as_u8());
        out.push(self.message.len() as u8);
        out.extend_from_slice(self.message.as_bytes());
        out
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.raw_body());
        if let Some(tag) = &self.tag {
            output.extend_from_slice(tag);
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.message.len() + self.tag.map(|_| ALERT_TAG_LEN).unwrap_or(0)
    }
}

/// Make a peer supplied message safe to log or display.
///
/// Control characters and `{ [ < $` become spaces.
pub fn sanitize_peer_message(msg: &str) -> String {
    msg.chars()
        .map(|c| match c {
            '{' | '[' | '<' | '$' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn untagged() {
        let alert = Alert::new(AlertCode::IllegalParam, "bad signature");
        let mut buf = Buf::new();
        alert.serialize(&mut buf);
        assert_eq!(buf[0], 4);
        assert_eq!(buf[1], 13);
        assert_eq!(buf.len(), alert.encoded_len());

        let (_, parsed) = Alert::parse(&buf).unwrap();
        assert_eq!(parsed, alert);
    }

    #[test]
    fn tagged() {
        let mut alert = Alert::new(AlertCode::CipherFault, "x");
        alert.tag = Some([3; 32]);
        let mut buf = Buf::new();
        alert.serialize(&mut buf);
        assert_eq!(buf.len(), 3 + 32);

        let (_, parsed) = Alert::parse(&buf).unwrap();
        assert_eq!(parsed.tag, Some([3; 32]));
        assert_eq!(&parsed.raw_body()[..], &buf[..3]);
    }

    #[test]
    fn long_message_is_cut() {
        let msg = "é".repeat(200);
        let alert = Alert::new(AlertCode::InternalError, &msg);
        assert!(alert.message.len() <= 255);
        assert_eq!(alert.message.len() % 2, 0);
    }

    #[test]
    fn sanitizes() {
        assert_eq!(
            sanitize_peer_message("a{b}[c]<d>$e\n\x07f"),
            "a b} c] d> e  f"
        );
    }
}
