// MSS Server Handshake Flow:
//
// 1. Server receives client_hello (plaintext)
//    - Picks the first client suite it has configured
//    - If the client's key share is in a group we do not have, sends a
//      hello-retry with our key exchange mask, once
//    - Derives the key schedule, looks up the resumption session and sets up
//      the 0-RTT pre-decoder when allowed
//    - Picks its identity: a pre-shared certificate the client knows, else a
//      certificate in a format the client accepts
// 2. Server sends server_hello with a signed and encrypted tail.
// 3. Server consumes P_PREDATA early data records until anything else shows
//    up. Early data that fails to decrypt is dropped, never fatal.
// 4. Server receives Finished, verifies the optional client certificate and
//    the MAC over its own signature.
// 5. Handshake complete, application data flows as P_DATA records.

use std::sync::Arc;

use subtle::ConstantTimeEq;

use crate::buffer::{Buf, IoBuf};
use crate::crypto::{KeyPair, PublicKey, RecordCipher};
use crate::engine::{Engine, Status};
use crate::message::{self, ClientHello, ExtensionStage, ExtensionType, Extensions};
use crate::message::{Packet, ServerHello};
use crate::message::{SignedBlock, H_CLIENT_HELLO, H_FINISHED, H_SERVER_HELLO, HELLO_RETRY};
use crate::message::{MAGIC, PROTOCOL_VERSION, P_ALERT, P_PREDATA, RANDOM_LEN};
use crate::registry::CipherSuite;
use crate::session::{Session, SESSION_KEY_LEN};
use crate::{AlertCode, Config, Error, Switches};

const ZERO_32: [u8; 32] = [0; 32];

/// MSS server
pub struct Server {
    /// Current server state.
    state: State,

    /// Engine in common between server and client.
    engine: Engine,

    /// Our signature from server_hello, bound by the client Finished.
    server_signature: Vec<u8>,

    /// 0-RTT decoder, dropped on the first bad record.
    pre_decoder: Option<RecordCipher>,

    /// Decrypted early data not yet taken.
    early_data: Vec<u8>,

    session: Option<Session>,

    peer_key: Option<PublicKey>,

    server_name: Option<String>,

    application_protocol: Option<String>,
}

impl Server {
    pub fn new(config: Arc<Config>) -> Server {
        Server {
            state: State::ClientHello,
            engine: Engine::new(config, false),
            server_signature: Vec::new(),
            pre_decoder: None,
            early_data: Vec::new(),
            session: None,
            peer_key: None,
            server_name: None,
            application_protocol: None,
        }
    }

    /// The session granted to the client, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The authenticated client key, when clients are verified.
    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer_key.as_ref()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.engine.suite()
    }

    /// Server name the client asked for.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Application protocol the client asked for.
    pub fn application_protocol(&self) -> Option<&str> {
        self.application_protocol.as_deref()
    }

    pub fn is_handshake_done(&self) -> bool {
        self.engine.is_done()
    }

    /// Take the 0-RTT early data received so far.
    pub fn take_early_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.early_data)
    }

    /// Drive the handshake. `out` receives bytes for the client, `input`
    /// holds bytes received from it.
    pub fn handshake(&mut self, out: &mut IoBuf, input: &mut IoBuf) -> Result<Status, Error> {
        self.engine.check_usable()?;

        match self.make_progress(out, input) {
            Err(e @ Error::PeerAlert { .. }) => Err(e),
            Err(e) => Err(self.engine.fail(Some(out), e)),
            ok => ok,
        }
    }

    /// Encrypt application data from `input` into `out`.
    pub fn wrap(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        self.engine.wrap(input, out)
    }

    /// Decrypt application data from `input` into `out`.
    pub fn unwrap(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        self.engine.unwrap(input, out)
    }

    /// Wipe all key material. Further calls fail with [`Error::Closed`].
    pub fn close(&mut self) {
        self.pre_decoder = None;
        self.engine.close();
    }

    /// Start over, ready for a new client_hello.
    pub fn reset(&mut self) {
        self.close();
        self.engine.reset();
        self.state = State::ClientHello;
        self.server_signature.clear();
        self.early_data.clear();
        self.session = None;
        self.peer_key = None;
        self.server_name = None;
        self.application_protocol = None;
    }

    fn make_progress(&mut self, out: &mut IoBuf, input: &mut IoBuf) -> Result<Status, Error> {
        if let Some(status) = self.engine.flush_pending(out) {
            return Ok(status);
        }

        loop {
            let prev_state = self.state;

            let (new_state, status) = prev_state.make_progress(self, out, input)?;
            if prev_state != new_state {
                self.state = new_state;
                trace!("{:?} -> {:?}", prev_state, new_state);
            }
            if status != Status::Continue {
                return Ok(status);
            }
        }
    }

    /// Pick our identity. Returns the key to sign with, and fills in the
    /// identity extension.
    fn select_identity<'c>(
        &self,
        config: &'c Config,
        hello: &mut ClientHello,
        ext_out: &mut Extensions,
    ) -> Result<&'c KeyPair, Error> {
        let psc_only = config.switches().contains(Switches::PSC_ONLY);

        if let Some(ids) = hello.extensions.remove(ExtensionType::PreSharedCertificate) {
            for chunk in ids.chunks_exact(4) {
                let id = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                if let Some(key) = config.psc_identities().get(&id) {
                    debug!("Using pre-shared certificate {}", id);
                    ext_out.insert(ExtensionType::PreSharedCertificate, id.to_be_bytes().to_vec());
                    return Ok(key);
                }
            }
        }

        if psc_only {
            return Err(Error::negotiation_failed("pre_shared_certificate only"));
        }

        let (format_id, encoded, key) = config
            .select_certificate(hello.supported_formats)
            .ok_or_else(|| Error::negotiation_failed("no certificate for client formats"))?;

        let mut data = Vec::with_capacity(1 + encoded.len());
        data.push(format_id);
        data.extend_from_slice(&encoded);
        ext_out.insert(ExtensionType::Certificate, data);
        Ok(key)
    }

    /// `u16 siglen ‖ sig ‖ u8 format ‖ encoding` from the client Finished.
    fn verify_client_certificate(&mut self, config: &Config, data: &[u8]) -> Result<(), Error> {
        let malformed = || Error::illegal_packet("malformed client certificate");

        if data.len() < 2 {
            return Err(malformed());
        }
        let sig_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        let rest = &data[2..];
        if rest.len() < sig_len + 1 {
            return Err(malformed());
        }
        let (sig, rest) = rest.split_at(sig_len);
        let (&format_id, encoded) = rest.split_first().ok_or_else(malformed)?;

        if !config.certificate_formats().contains(&format_id) {
            return Err(Error::negotiation_failed("unsupported certificate format"));
        }
        let format = config
            .registry()
            .certificate_format(format_id)
            .ok_or_else(|| Error::negotiation_failed("unsupported certificate format"))?;
        let key = format
            .decode(encoded, config.trust_store())
            .map_err(|e| Error::illegal_param(format!("bad client certificate: {}", e)))?;

        let client_verify = self.engine.derive_mac_key("client_verify")?;
        key.verify(&client_verify, sig)
            .map_err(|_| Error::illegal_param("invalid client signature"))?;

        debug!("Client certificate {} accepted", format.name());
        self.peer_key = Some(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ClientHello,
    RetryKeyExchange,
    PreflightEndWait,
    FinishWait,
    Done,
}

impl State {
    fn make_progress(
        self,
        server: &mut Server,
        out: &mut IoBuf,
        input: &mut IoBuf,
    ) -> Result<(Self, Status), Error> {
        match self {
            State::ClientHello | State::RetryKeyExchange => {
                self.await_client_hello(server, out, input)
            }
            State::PreflightEndWait => self.await_preflight_end(server, input),
            State::FinishWait => self.await_finished(server, input),
            State::Done => Ok((self, Status::Done)),
        }
    }

    fn await_client_hello(
        self,
        server: &mut Server,
        out: &mut IoBuf,
        input: &mut IoBuf,
    ) -> Result<(Self, Status), Error> {
        let (ty, body) = match server.engine.take_packet(input)? {
            Ok(packet) => packet,
            Err(status) => return Ok((self, status)),
        };

        let result = match ty {
            H_CLIENT_HELLO => self.handle_client_hello(server, out, &body),
            P_ALERT => Err(server.engine.handle_alert(&body)),
            P_PREDATA if self == State::RetryKeyExchange => {
                trace!("Discard early data sent before hello retry");
                Ok((self, Status::Continue))
            }
            _ => Err(Error::illegal_packet("not an mss client")),
        };
        server.engine.push_buffer(body);
        result
    }

    fn handle_client_hello(
        self,
        server: &mut Server,
        out: &mut IoBuf,
        body: &[u8],
    ) -> Result<(Self, Status), Error> {
        let config = Arc::clone(server.engine.config());

        let (_, mut hello) =
            ClientHello::parse(body).map_err(|_| Error::illegal_packet("malformed client_hello"))?;

        if hello.magic != MAGIC {
            return Err(Error::illegal_packet("not an mss client"));
        }
        if hello.version != PROTOCOL_VERSION {
            return Err(Error::protocol(
                AlertCode::VersionMismatch,
                format!("client version {}", hello.version),
            ));
        }

        let suite = *hello
            .cipher_suites
            .iter()
            .find_map(|id| config.suite(*id))
            .ok_or_else(|| Error::negotiation_failed("cipher_suite"))?;

        let kx = if config.key_exchanges().contains(&hello.kx_id) {
            config.registry().key_exchange(hello.kx_id)
        } else {
            None
        };
        let Some(kx) = kx else {
            if self == State::RetryKeyExchange {
                return Err(Error::illegal_param("hello_retry"));
            }
            if hello.supported_kx & config.key_exchange_mask() == 0 {
                return Err(Error::negotiation_failed("key_exchange"));
            }
            return Ok(send_hello_retry(server, &config, out));
        };

        server.engine.random[..RANDOM_LEN].copy_from_slice(&hello.random);
        server.engine.generate_random()?;

        let key_exchange = kx
            .start_exchange(server.engine.pop_buffer())
            .map_err(|e| Error::internal(format!("key exchange start: {}", e)))?;
        let server_public = key_exchange.pub_key().to_vec();
        let mut shared = server.engine.pop_buffer();
        let completed = key_exchange.complete(hello.public_key, &mut shared);
        let secret = match completed {
            Ok(()) => server.engine.init_secret(suite, &shared),
            Err(e) => Err(Error::illegal_param(format!("key exchange: {}", e))),
        };
        server.engine.push_buffer(shared);
        secret?;

        let mut ext_out = Extensions::new();

        // 0-RTT and resumption
        if let Some(manager) = config.session_manager() {
            let requested = hello.extensions.remove(ExtensionType::Session);
            let session = requested.and_then(|id| manager.get_or_create(&id));
            if let Some(mut session) = session {
                if session.is_resumable() && config.switches().contains(Switches::ALLOW_0RTT) {
                    server.pre_decoder = session.preflight_cipher(config.registry(), &hello.random)?;
                    debug!("Accepting 0-RTT for {:?}", session);
                }
                let key = server.engine.derive_key("session", SESSION_KEY_LEN)?;
                session.set_key(&key, suite.id);
                ext_out.insert(ExtensionType::Session, session.id().to_vec());
                server.session = Some(session);
            }
        }

        let key = server.select_identity(&config, &mut hello, &mut ext_out)?;

        if config.switches().contains(Switches::VERIFY_CLIENT) {
            let mask = config.certificate_format_mask();
            ext_out.insert(ExtensionType::CertificateRequest, mask.to_be_bytes().to_vec());
        }

        if let Some(name) = hello.extensions.remove(ExtensionType::ServerName) {
            server.server_name = Some(String::from_utf8_lossy(&name).into_owned());
        }
        if let Some(alpn) = hello.extensions.remove(ExtensionType::ApplicationProtocol) {
            server.application_protocol = Some(String::from_utf8_lossy(&alpn).into_owned());
        }
        config.process_extensions(ExtensionStage::ServerHello, &hello.extensions, &mut ext_out)?;
        hello.extensions.trace_leftovers("client_hello");

        let mut server_random = [0u8; RANDOM_LEN];
        server_random.copy_from_slice(&server.engine.random[RANDOM_LEN..]);
        let mut packet = Buf::new();
        ServerHello {
            version: PROTOCOL_VERSION,
            random: server_random,
            cipher_suite: suite.id,
            public_key: &server_public,
            encrypted: &[],
        }
        .serialize_head(&mut packet);

        let mut ext_raw = Buf::new();
        ext_out.serialize(&mut ext_raw)?;

        let verify_s = server.engine.derive_mac_key("verify_s")?;
        let mac = server
            .engine
            .hmac(&verify_s, &[&ZERO_32[..], body, &packet[..], &ext_raw[..]])?;
        let signature = key.sign(&mac).map_err(Error::internal)?;

        server.engine.install_keys()?;

        let mut tail = Buf::new();
        SignedBlock::serialize(&ext_raw, &signature, &mut tail);
        server.engine.seal(&packet, &mut tail)?;
        packet.extend_from_slice(&tail);
        server.server_signature = signature;

        debug!("Send server_hello: suite {:#06x}", suite.id);
        let status = server
            .engine
            .send_handshake(out, H_SERVER_HELLO, &packet, false);
        Ok((State::PreflightEndWait, status))
    }

    fn await_preflight_end(
        self,
        server: &mut Server,
        input: &mut IoBuf,
    ) -> Result<(Self, Status), Error> {
        match server.engine.next_packet(input.readable())? {
            Packet::Partial(n) => return Ok((self, Status::NeedInput(n))),
            Packet::Complete { ty, .. } if ty != P_PREDATA => {
                server.pre_decoder = None;
                return Ok((State::FinishWait, Status::Continue));
            }
            Packet::Complete { .. } => {}
        }

        let (_, mut body) = match server.engine.take_packet(input)? {
            Ok(packet) => packet,
            Err(status) => return Ok((self, status)),
        };

        if let Some(decoder) = &mut server.pre_decoder {
            let header = message::record_header(P_PREDATA, body.len());
            match decoder.open(&header, &mut body) {
                Ok(n) => {
                    trace!("Early data ({} bytes)", n);
                    server.early_data.extend_from_slice(&body[..n]);
                }
                Err(e) => {
                    warn!("Dropping 0-RTT data: {}", e);
                    server.pre_decoder = None;
                }
            }
        } else {
            trace!("Discard early data ({} bytes)", body.len());
        }
        server.engine.push_buffer(body);

        Ok((self, Status::Continue))
    }

    fn await_finished(self, server: &mut Server, input: &mut IoBuf) -> Result<(Self, Status), Error> {
        let (ty, body) = match server.engine.take_packet(input)? {
            Ok(packet) => packet,
            Err(status) => return Ok((self, status)),
        };

        match ty {
            H_FINISHED => self.handle_finished(server, body),
            P_ALERT => {
                let e = server.engine.handle_alert(&body);
                server.engine.push_buffer(body);
                Err(e)
            }
            _ => {
                server.engine.push_buffer(body);
                Err(Error::illegal_packet("expected finished"))
            }
        }
    }

    fn handle_finished(self, server: &mut Server, mut body: Buf) -> Result<(Self, Status), Error> {
        let result = match server.engine.open(&[H_FINISHED], &mut body) {
            Ok(()) => self.verify_finished(server, &body),
            Err(e) => Err(e),
        };
        server.engine.push_buffer(body);
        result?;

        if let (Some(manager), Some(session)) =
            (server.engine.config().session_manager(), &server.session)
        {
            manager.store(session.clone());
        }
        server.engine.set_done();
        Ok((State::Done, Status::Done))
    }

    fn verify_finished(self, server: &mut Server, plain: &[u8]) -> Result<(), Error> {
        let config = Arc::clone(server.engine.config());

        let (_, block) =
            SignedBlock::parse(plain).map_err(|_| Error::illegal_packet("malformed finished"))?;
        let mut ext = block.extensions.clone();

        if config.switches().contains(Switches::VERIFY_CLIENT) {
            let cert = ext
                .remove(ExtensionType::Certificate)
                .ok_or_else(|| Error::illegal_param("client certificate missing"))?;
            server.verify_client_certificate(&config, &cert)?;
        }

        let verify_c = server.engine.derive_mac_key("verify_c")?;
        let expected = server.engine.hmac(
            &verify_c,
            &[&ZERO_32[..], &server.server_signature[..], block.ext_raw],
        )?;
        if !bool::from(expected[..].ct_eq(block.signature)) {
            return Err(Error::illegal_param("finished verification failed"));
        }

        config.process_extensions(ExtensionStage::ServerFinished, &ext, &mut Extensions::new())?;
        ext.trace_leftovers("finished");
        Ok(())
    }
}

/// Ask the client to retry with one of our groups. The mask rides in the
/// public key slot and the suite slot is 0xFFFF.
fn send_hello_retry(server: &mut Server, config: &Config, out: &mut IoBuf) -> (State, Status) {
    let mask = config.key_exchange_mask().to_be_bytes();
    let mut packet = Buf::new();
    ServerHello {
        version: PROTOCOL_VERSION,
        random: [0; RANDOM_LEN],
        cipher_suite: HELLO_RETRY,
        public_key: &mask,
        encrypted: &[],
    }
    .serialize_head(&mut packet);

    debug!("Send hello retry, groups {:#b}", config.key_exchange_mask());
    let status = server
        .engine
        .send_handshake(out, H_SERVER_HELLO, &packet, false);
    (State::RetryKeyExchange, status)
}
