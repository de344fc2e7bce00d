use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::buffer::{Buf, BufferPool, IoBuf};
use crate::crypto::{RecordCipher, TranscriptSecret, IV_LEN};
use crate::message::{self, sanitize_peer_message, Alert, Packet, ALERT_TAG_LEN};
use crate::message::{MAX_CIPHERTEXT, MAX_HANDSHAKE_LEN, MAX_PLAINTEXT, P_ALERT, P_DATA};
use crate::message::{P_PREDATA, RANDOM_LEN, RECORD_HEADER_LEN};
use crate::registry::CipherSuite;
use crate::{AlertCode, Config, Error};

/// Tag length assumed for size checks before a suite is known.
const DEFAULT_TAG_LEN: usize = 16;

/// Outcome of a call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Progress was made, call again.
    Continue,
    /// The handshake is complete, or all input was processed.
    Done,
    /// This many more input bytes are needed.
    NeedInput(usize),
    /// This many more bytes of free output space are needed.
    NeedOutput(usize),
}

/// A handshake frame that did not fit in the caller's output buffer.
struct PendingWrite {
    frame: Buf,
    /// Writing this frame completes the handshake.
    finish: bool,
}

/// Engine state shared by [`Client`](crate::Client) and [`Server`](crate::Server).
pub(crate) struct Engine {
    config: Arc<Config>,

    /// Pool of scratch buffers
    pool: BufferPool,

    is_client: bool,

    /// Client random ‖ server random. HKDF salt.
    pub(crate) random: [u8; 2 * RANDOM_LEN],

    /// The negotiated suite.
    suite: Option<CipherSuite>,

    secret: Option<TranscriptSecret>,

    /// HMAC key for alerts, derived on first use.
    alert_key: Option<Zeroizing<Vec<u8>>>,

    encoder: Option<RecordCipher>,
    decoder: Option<RecordCipher>,

    /// Client 0-RTT encoder, in use until the server has answered.
    pub(crate) pre_encoder: Option<RecordCipher>,

    pending: Option<PendingWrite>,

    /// Sticky failure.
    error: Option<Error>,

    closed: bool,
    done: bool,
}

impl Engine {
    pub fn new(config: Arc<Config>, is_client: bool) -> Self {
        Engine {
            config,
            pool: BufferPool::default(),
            is_client,
            random: [0; 2 * RANDOM_LEN],
            suite: None,
            secret: None,
            alert_key: None,
            encoder: None,
            decoder: None,
            pre_encoder: None,
            pending: None,
            error: None,
            closed: false,
            done: false,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn pop_buffer(&mut self) -> Buf {
        self.pool.pop()
    }

    pub(crate) fn push_buffer(&mut self, buf: Buf) {
        self.pool.push(buf);
    }

    /// Fill our half of the shared random.
    pub fn generate_random(&mut self) -> Result<(), Error> {
        let range = if self.is_client {
            0..RANDOM_LEN
        } else {
            RANDOM_LEN..2 * RANDOM_LEN
        };
        self.config
            .registry()
            .random()
            .fill(&mut self.random[range])
            .map_err(Error::internal)
    }

    /// Raise the latched error, or [`Error::Closed`], once terminal.
    pub fn check_usable(&self) -> Result<(), Error> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Drop all key material. The engine is terminal afterwards.
    pub fn close(&mut self) {
        if !self.closed {
            trace!("Close engine (client: {})", self.is_client);
        }
        self.secret = None;
        self.alert_key = None;
        self.encoder = None;
        self.decoder = None;
        self.pre_encoder = None;
        self.random.zeroize();
        if let Some(pending) = self.pending.take() {
            self.pool.push(pending.frame);
        }
        self.closed = true;
    }

    /// Back to a fresh engine on the same configuration.
    pub fn reset(&mut self) {
        self.close();
        self.suite = None;
        self.error = None;
        self.closed = false;
        self.done = false;
    }

    /// Latch `error` and close. A local protocol failure is reported to the
    /// peer with an alert in `out`, when there is room for it.
    pub fn fail(&mut self, out: Option<&mut IoBuf>, error: Error) -> Error {
        if let (Some(out), Error::Protocol { code, message }) = (out, &error) {
            self.send_alert(out, *code, message);
        }
        debug!("Engine failed (client: {}): {}", self.is_client, error);
        self.close();
        self.error = Some(error.clone());
        error
    }

    fn send_alert(&mut self, out: &mut IoBuf, code: AlertCode, message: &str) {
        let mut alert = Alert::new(code, message);
        if self.secret.is_some() {
            match self.alert_tag(&alert.raw_body()) {
                Ok(tag) => alert.tag = Some(tag),
                Err(e) => debug!("Alert sent untagged: {}", e),
            }
        }

        let len = alert.encoded_len();
        if out.writable_bytes() < RECORD_HEADER_LEN + len {
            debug!("No room for alert {}", code);
            return;
        }
        let mut buf = self.pool.pop();
        buf.extend_from_slice(&message::record_header(P_ALERT, len));
        alert.serialize(&mut buf);
        out.put_slice(&buf);
        self.pool.push(buf);
    }

    fn alert_tag(&mut self, body: &[u8]) -> Result<[u8; ALERT_TAG_LEN], Error> {
        if self.alert_key.is_none() {
            self.alert_key = Some(self.derive_key("alert", 32)?);
        }
        let key = self.alert_key.as_deref().map(|k| k.as_slice()).unwrap_or(&[]);
        self.config
            .registry()
            .hmac()
            .hmac_sha256(key, body)
            .map_err(Error::internal)
    }

    /// Handle an alert record body from the peer. Always terminal.
    pub fn handle_alert(&mut self, body: &[u8]) -> Error {
        let (alert, tagged_len) = match Alert::parse(body) {
            Ok((_, alert)) => {
                let len = 2 + alert_message_len(body);
                (alert, len)
            }
            Err(_) => {
                let e = Error::illegal_packet("malformed alert");
                return self.fail(None, e);
            }
        };

        let trustable = match alert.tag {
            Some(tag) if self.secret.is_some() => match self.alert_tag(&body[..tagged_len]) {
                Ok(expected) => bool::from(expected.ct_eq(&tag)),
                Err(_) => false,
            },
            _ => false,
        };

        let message = sanitize_peer_message(&alert.message);
        if trustable {
            debug!("Peer alert {}: {}", alert.code, message);
        } else {
            warn!("Untrusted peer alert {}: {}", alert.code, message);
        }

        let error = Error::PeerAlert {
            code: alert.code,
            message,
            trustable,
        };
        self.close();
        self.error = Some(error.clone());
        error
    }

    // =========================================================================
    // Key Schedule
    // =========================================================================

    /// Set the suite and extract the PRK from the key agreement secret.
    pub fn init_secret(&mut self, suite: CipherSuite, shared: &[u8]) -> Result<(), Error> {
        let hkdf = self.config.registry().hkdf();
        self.secret = Some(TranscriptSecret::new(hkdf, suite.digest, &self.random, shared)?);
        self.suite = Some(suite);
        debug!("Negotiated suite {:#06x} ({})", suite.id, suite.aead.name());
        Ok(())
    }

    pub fn derive_key(&mut self, label: &'static str, len: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
        let hkdf = self.config.registry().hkdf();
        let secret = self
            .secret
            .as_mut()
            .ok_or_else(|| Error::internal("no key agreement yet"))?;
        secret.derive(hkdf, label, len)
    }

    /// Derive a key as long as the suite digest.
    pub fn derive_mac_key(&mut self, label: &'static str) -> Result<Zeroizing<Vec<u8>>, Error> {
        let len = self.digest_len()?;
        self.derive_key(label, len)
    }

    fn digest_len(&self) -> Result<usize, Error> {
        self.suite
            .map(|s| s.digest.output_len())
            .ok_or_else(|| Error::internal("no cipher suite"))
    }

    /// Install the epoch 0 record ciphers.
    pub fn install_keys(&mut self) -> Result<(), Error> {
        let suite = self
            .suite
            .ok_or_else(|| Error::internal("no cipher suite"))?;
        let len = suite.aead.key_len() + IV_LEN;

        let c2s = self.derive_key("c2s0", len)?;
        let s2c = self.derive_key("s2c0", len)?;
        let (enc, dec) = if self.is_client { (c2s, s2c) } else { (s2c, c2s) };

        self.encoder = Some(RecordCipher::new(suite.aead, &enc).map_err(Error::internal)?);
        self.decoder = Some(RecordCipher::new(suite.aead, &dec).map_err(Error::internal)?);
        Ok(())
    }

    /// HMAC with the suite digest over the concatenation of `parts`.
    pub fn hmac(&mut self, key: &[u8], parts: &[&[u8]]) -> Result<Buf, Error> {
        let digest = self
            .suite
            .map(|s| s.digest)
            .ok_or_else(|| Error::internal("no cipher suite"))?;

        let mut data = self.pool.pop();
        for part in parts {
            data.extend_from_slice(part);
        }
        let mut out = Buf::new();
        let result = self.config.registry().hmac().hmac(digest, key, &data, &mut out);
        self.pool.push(data);
        result.map_err(Error::internal)?;
        Ok(out)
    }

    pub fn seal(&mut self, aad: &[u8], buf: &mut Buf) -> Result<(), Error> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| Error::internal("no encoder"))?;
        encoder.seal(aad, buf).map_err(Error::internal)
    }

    /// Decrypt `buf` in place and truncate it to the plaintext.
    pub fn open(&mut self, aad: &[u8], buf: &mut Buf) -> Result<(), Error> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::internal("no decoder"))?;
        let n = decoder
            .open(aad, buf)
            .map_err(|e| Error::protocol(AlertCode::CipherFault, e))?;
        buf.truncate(n);
        Ok(())
    }

    // =========================================================================
    // Handshake I/O
    // =========================================================================

    /// Frame the packet at the head of `input`, enforcing size limits as soon
    /// as the header is known.
    pub fn next_packet(&self, input: &[u8]) -> Result<Packet, Error> {
        let packet = message::read_packet(input);

        let Some(&ty) = input.first() else {
            return Ok(packet);
        };
        let header_len = if message::is_handshake(ty) {
            message::HANDSHAKE_HEADER_LEN
        } else {
            RECORD_HEADER_LEN
        };
        if input.len() < header_len {
            return Ok(packet);
        }
        let body_len = match packet {
            Packet::Complete { body_len, .. } => body_len,
            Packet::Partial(n) => input.len() + n - header_len,
        };

        if message::is_handshake(ty) {
            if body_len > MAX_HANDSHAKE_LEN {
                return Err(Error::illegal_packet("handshake too large"));
            }
        } else if body_len > MAX_CIPHERTEXT + self.tag_len() {
            return Err(Error::illegal_packet("packet too large"));
        }

        Ok(packet)
    }

    fn tag_len(&self) -> usize {
        self.decoder
            .as_ref()
            .map(|d| d.tag_len())
            .unwrap_or(DEFAULT_TAG_LEN)
    }

    /// Take the next complete packet off `input` into a pooled buffer.
    ///
    /// Returns the status to report when no complete packet is buffered.
    pub fn take_packet(&mut self, input: &mut IoBuf) -> Result<Result<(u8, Buf), Status>, Error> {
        let (ty, header_len, body_len) = match self.next_packet(input.readable())? {
            Packet::Complete {
                ty,
                header_len,
                body_len,
            } => (ty, header_len, body_len),
            Packet::Partial(n) => return Ok(Err(Status::NeedInput(n))),
        };

        let mut body = self.pool.pop();
        body.extend_from_slice(&input.readable()[header_len..header_len + body_len]);
        input.advance(header_len + body_len);
        trace!("Received packet {:#04x} ({} bytes)", ty, body_len);
        Ok(Ok((ty, body)))
    }

    /// Write a handshake frame, or keep it as the pending write when `out`
    /// lacks room.
    pub fn send_handshake(&mut self, out: &mut IoBuf, ty: u8, body: &[u8], finish: bool) -> Status {
        let mut frame = self.pool.pop();
        message::write_handshake(&mut frame, ty, body);
        trace!("Send handshake {:#04x} ({} bytes)", ty, body.len());
        self.pending = Some(PendingWrite { frame, finish });

        match self.flush_pending(out) {
            Some(status) => status,
            None if finish => Status::Done,
            None => Status::Continue,
        }
    }

    /// Write the pending frame, if any. `Some` when it still does not fit.
    pub fn flush_pending(&mut self, out: &mut IoBuf) -> Option<Status> {
        let len = self.pending.as_ref()?.frame.len();
        let room = out.writable_bytes();
        if room < len {
            return Some(Status::NeedOutput(len - room));
        }

        let pending = self.pending.take()?;
        out.put_slice(&pending.frame);
        if pending.finish {
            self.done = true;
            debug!("Handshake complete (client: {})", self.is_client);
        }
        self.pool.push(pending.frame);
        None
    }

    pub fn set_done(&mut self) {
        self.done = true;
        debug!("Handshake complete (client: {})", self.is_client);
    }

    // =========================================================================
    // Application data
    // =========================================================================

    pub fn wrap(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        self.check_usable()?;

        // handshake frames go first
        if let Some(status) = self.flush_pending(out) {
            return Ok(status);
        }

        match self.wrap_records(input, out) {
            Err(Error::NotReady) => Err(Error::NotReady),
            Err(e) => Err(self.fail(None, e)),
            ok => ok,
        }
    }

    fn wrap_records(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        let (ty, cipher) = if self.done {
            (P_DATA, self.encoder.as_mut())
        } else {
            (P_PREDATA, self.pre_encoder.as_mut())
        };
        let cipher = cipher.ok_or(Error::NotReady)?;

        while !input.is_empty() {
            let chunk = input.readable_bytes().min(MAX_PLAINTEXT);
            let body_len = chunk + cipher.tag_len();
            let record_len = RECORD_HEADER_LEN + body_len;

            let room = out.writable_bytes();
            if room < record_len {
                return Ok(Status::NeedOutput(record_len - room));
            }

            let header = message::record_header(ty, body_len);
            let mut buf = self.pool.pop();
            buf.extend_from_slice(&input.readable()[..chunk]);
            let sealed = cipher.seal(&header, &mut buf);
            if let Err(e) = sealed {
                self.pool.push(buf);
                return Err(Error::internal(e));
            }

            out.put_slice(&header);
            out.put_slice(&buf);
            input.advance(chunk);
            self.pool.push(buf);
            trace!("Wrapped record {:#04x} ({} bytes)", ty, chunk);
        }

        Ok(Status::Done)
    }

    pub fn unwrap(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        self.check_usable()?;
        if !self.done {
            return Err(Error::NotReady);
        }

        match self.unwrap_records(input, out) {
            Err(e @ Error::PeerAlert { .. }) => Err(e),
            Err(e) => Err(self.fail(None, e)),
            ok => ok,
        }
    }

    fn unwrap_records(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        loop {
            if input.is_empty() {
                return Ok(Status::Done);
            }

            let (ty, header_len, body_len) = match self.next_packet(input.readable())? {
                Packet::Complete {
                    ty,
                    header_len,
                    body_len,
                } => (ty, header_len, body_len),
                Packet::Partial(n) => return Ok(Status::NeedInput(n)),
            };

            let total = header_len + body_len;
            match ty {
                P_DATA => {}
                P_ALERT => {
                    let body = input.readable()[header_len..total].to_vec();
                    input.advance(total);
                    return Err(self.handle_alert(&body));
                }
                _ => {
                    return Err(Error::illegal_packet(format!(
                        "unexpected packet {:#04x}",
                        ty
                    )))
                }
            }

            let plain_len = body_len.saturating_sub(self.tag_len());
            let room = out.writable_bytes();
            if room < plain_len {
                return Ok(Status::NeedOutput(plain_len - room));
            }

            let mut buf = self.pool.pop();
            buf.extend_from_slice(&input.readable()[header_len..total]);
            let mut header = [0u8; RECORD_HEADER_LEN];
            header.copy_from_slice(&input.readable()[..header_len]);

            if let Err(e) = self.open(&header, &mut buf) {
                self.pool.push(buf);
                return Err(e);
            }

            out.put_slice(&buf);
            input.advance(total);
            trace!("Unwrapped record ({} bytes)", buf.len());
            self.pool.push(buf);
        }
    }
}

/// Length of the message in a well formed alert body.
fn alert_message_len(body: &[u8]) -> usize {
    body.get(1).copied().unwrap_or(0) as usize
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::rust_crypto::SUITE_AES_128_GCM_SHA256;
    use crate::crypto::TrustStore;

    fn engine_pair() -> (Engine, Engine) {
        let config = Arc::new(Config::builder().trust_store(TrustStore::new()).build().unwrap());
        let suite = *config.registry().cipher_suite(SUITE_AES_128_GCM_SHA256).unwrap();

        let mut client = Engine::new(config.clone(), true);
        let mut server = Engine::new(config, false);
        client.random = [3; 64];
        server.random = [3; 64];
        for e in [&mut client, &mut server] {
            e.init_secret(suite, b"shared").unwrap();
            e.install_keys().unwrap();
            e.set_done();
        }
        (client, server)
    }

    #[test]
    fn wrap_unwrap_large() {
        let (mut client, mut server) = engine_pair();

        let data: Vec<u8> = (0..70_000u32).map(|i| i as u8).collect();
        let mut input = IoBuf::from_slice(&data);
        let mut wire = IoBuf::with_capacity(100_000);
        assert_eq!(client.wrap(&mut input, &mut wire).unwrap(), Status::Done);
        // three records
        assert_eq!(wire.readable_bytes(), data.len() + 3 * (3 + 16));

        let mut plain = IoBuf::with_capacity(100_000);
        assert_eq!(server.unwrap(&mut wire, &mut plain).unwrap(), Status::Done);
        assert_eq!(plain.readable(), &data[..]);
    }

    #[test]
    fn wrap_needs_room_for_whole_record() {
        let (mut client, _) = engine_pair();
        let mut input = IoBuf::from_slice(b"hello");
        let mut wire = IoBuf::with_capacity(3 + 5 + 16 - 1);
        assert_eq!(client.wrap(&mut input, &mut wire).unwrap(), Status::NeedOutput(1));
        assert!(wire.is_empty());
        assert_eq!(input.readable_bytes(), 5);

        wire.set_capacity(24);
        assert_eq!(client.wrap(&mut input, &mut wire).unwrap(), Status::Done);
    }

    #[test]
    fn unwrap_leaves_record_without_room() {
        let (mut client, mut server) = engine_pair();
        let mut wire = IoBuf::with_capacity(1000);
        client.wrap(&mut IoBuf::from_slice(b"hello world"), &mut wire).unwrap();

        let mut plain = IoBuf::with_capacity(4);
        assert_eq!(server.unwrap(&mut wire, &mut plain).unwrap(), Status::NeedOutput(7));
        assert_eq!(wire.readable_bytes(), 3 + 11 + 16);

        plain.set_capacity(11);
        assert_eq!(server.unwrap(&mut wire, &mut plain).unwrap(), Status::Done);
        assert_eq!(plain.readable(), b"hello world");
    }

    #[test]
    fn partial_record_needs_input() {
        let (mut client, mut server) = engine_pair();
        let mut wire = IoBuf::with_capacity(1000);
        client.wrap(&mut IoBuf::from_slice(b"abc"), &mut wire).unwrap();
        let bytes = wire.take_readable();

        let mut partial = IoBuf::from_slice(&bytes[..10]);
        partial.set_capacity(100);
        let mut plain = IoBuf::with_capacity(100);
        assert_eq!(server.unwrap(&mut partial, &mut plain).unwrap(), Status::NeedInput(12));

        partial.put_slice(&bytes[10..]);
        assert_eq!(server.unwrap(&mut partial, &mut plain).unwrap(), Status::Done);
        assert_eq!(plain.readable(), b"abc");
    }

    #[test]
    fn bit_flip_is_cipher_fault_and_sticky() {
        let (mut client, mut server) = engine_pair();
        let mut wire = IoBuf::with_capacity(1000);
        client.wrap(&mut IoBuf::from_slice(b"abc"), &mut wire).unwrap();
        let mut bytes = wire.take_readable();
        bytes[4] ^= 0x01;

        let mut plain = IoBuf::with_capacity(100);
        let err = server
            .unwrap(&mut IoBuf::from_slice(&bytes), &mut plain)
            .unwrap_err();
        assert_eq!(err.code(), Some(AlertCode::CipherFault));

        let again = server
            .unwrap(&mut IoBuf::from_slice(&bytes), &mut plain)
            .unwrap_err();
        assert_eq!(again, err);
    }

    #[test]
    fn oversized_record_rejected() {
        let (_, mut server) = engine_pair();
        let mut bytes = vec![P_DATA, 0xFF, 0xFF];
        bytes.extend_from_slice(&[0; 10]);
        let err = server
            .unwrap(&mut IoBuf::from_slice(&bytes), &mut IoBuf::with_capacity(10))
            .unwrap_err();
        assert_eq!(err.code(), Some(AlertCode::IllegalPacket));
    }

    #[test]
    fn tagged_alert_is_trusted() {
        let (mut client, mut server) = engine_pair();
        let mut wire = IoBuf::with_capacity(1000);
        let err = client.fail(Some(&mut wire), Error::illegal_param("nope"));
        assert_eq!(client.check_usable(), Err(err));

        let mut plain = IoBuf::with_capacity(100);
        match server.unwrap(&mut wire, &mut plain) {
            Err(Error::PeerAlert {
                code,
                message,
                trustable,
            }) => {
                assert_eq!(code, AlertCode::IllegalParam);
                assert_eq!(message, "nope");
                assert!(trustable);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(server.is_closed());
    }

    #[test]
    fn forged_alert_is_untrusted() {
        let (_, mut server) = engine_pair();
        let mut alert = Alert::new(AlertCode::InternalError, "{evil}");
        alert.tag = Some([0; 32]);
        let mut bytes = message::record_header(P_ALERT, alert.encoded_len()).to_vec();
        let mut body = Buf::new();
        alert.serialize(&mut body);
        bytes.extend_from_slice(&body);

        let err = server
            .unwrap(&mut IoBuf::from_slice(&bytes), &mut IoBuf::with_capacity(10))
            .unwrap_err();
        assert_eq!(
            err,
            Error::PeerAlert {
                code: AlertCode::InternalError,
                message: " evil}".into(),
                trustable: false
            }
        );
    }

    #[test]
    fn close_then_reset() {
        let (mut client, _) = engine_pair();
        client.close();
        assert_eq!(client.check_usable(), Err(Error::Closed));
        assert_eq!(
            client.wrap(&mut IoBuf::from_slice(b"x"), &mut IoBuf::with_capacity(100)),
            Err(Error::Closed)
        );
        client.reset();
        assert!(client.check_usable().is_ok());
        assert!(!client.is_done());
    }

    #[test]
    fn pending_write_is_retried() {
        let (mut client, _) = engine_pair();
        client.reset();
        let mut out = IoBuf::with_capacity(5);
        let status = client.send_handshake(&mut out, message::H_FINISHED, &[1, 2, 3], true);
        assert_eq!(status, Status::NeedOutput(2));
        assert!(!client.is_done());

        out.set_capacity(7);
        assert_eq!(client.flush_pending(&mut out), None);
        assert!(client.is_done());
        assert_eq!(out.readable(), &[0x42, 0, 0, 3, 1, 2, 3]);
    }
}
