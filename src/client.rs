// MSS Client Handshake Flow:
//
// 1. Client sends client_hello (plaintext): random, offered suites, supported
//    key exchange mask, one key share, accepted certificate formats, extensions.
//    With a resumable session and 0-RTT enabled, early data may follow as
//    P_PREDATA records under the session's preflight key.
// 2. Server may answer with a hello-retry (suite slot 0xFFFF) carrying its key
//    exchange mask. The client picks a common group and goes back to 1, once.
// 3. Server sends server_hello: random, suite, key share, and an encrypted tail
//    with extensions and a signature.
//    - Client derives the key schedule and the epoch 0 traffic keys
//    - Client authenticates the server by pre-shared certificate or certificate
// 4. Client sends Finished (encrypted): extensions, optional client
//    certificate, and a MAC binding the server signature.
// 5. Handshake complete, application data flows as P_DATA records.

use std::sync::Arc;

use crate::buffer::{Buf, IoBuf};
use crate::crypto::{ActiveKeyExchange, PublicKey};
use crate::engine::{Engine, Status};
use crate::message::{ClientHello, ExtensionStage, ExtensionType, Extensions};
use crate::message::{ServerHello, SignedBlock};
use crate::message::{H_CLIENT_HELLO, H_FINISHED, H_SERVER_HELLO, MAGIC, P_ALERT};
use crate::message::{PROTOCOL_VERSION, RANDOM_LEN};
use crate::registry::CipherSuite;
use crate::session::{Session, SESSION_KEY_LEN};
use crate::{AlertCode, Config, Error, Switches};

const ZERO_32: [u8; 32] = [0; 32];

/// MSS client
pub struct Client {
    /// Current client state.
    state: State,

    /// Engine in common between server and client.
    engine: Engine,

    /// Ephemeral key share of the client_hello in flight.
    key_exchange: Option<Box<dyn ActiveKeyExchange>>,

    /// Group picked from a hello-retry.
    retry_group: Option<u8>,

    /// Whether we received a hello-retry.
    hello_retry: bool,

    /// Body of the last client_hello, signed over by the server.
    client_hello: Buf,

    session: Option<Session>,

    /// Resumption outcome, applied once the Finished is written.
    session_update: Option<SessionUpdate>,

    peer_key: Option<PublicKey>,
}

enum SessionUpdate {
    Granted(Session),
    Declined,
}

impl Client {
    pub fn new(config: Arc<Config>) -> Client {
        Client {
            state: State::Initial,
            engine: Engine::new(config, true),
            key_exchange: None,
            retry_group: None,
            hello_retry: false,
            client_hello: Buf::new(),
            session: None,
            session_update: None,
            peer_key: None,
        }
    }

    /// Resume `session`, or ask for a new one with [`Session::new`].
    ///
    /// Only allowed before the handshake starts.
    pub fn set_session(&mut self, session: Session) -> Result<(), Error> {
        if self.state != State::Initial || self.engine.is_closed() {
            return Err(Error::Config(
                "session can only be set before the handshake".into(),
            ));
        }
        self.session = Some(session);
        Ok(())
    }

    /// The session, updated once the Finished is written.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The authenticated server key.
    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer_key.as_ref()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.engine.suite()
    }

    pub fn is_handshake_done(&self) -> bool {
        self.engine.is_done()
    }

    /// Drive the handshake. `out` receives bytes for the server, `input`
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
    ///
    /// Before the handshake completes this sends 0-RTT early data, which
    /// requires a resumable session and [`Switches::ALLOW_0RTT`].
    pub fn wrap(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        // may flush a pending Finished
        let result = self.engine.wrap(input, out);
        self.commit_session();
        result
    }

    /// Decrypt application data from `input` into `out`.
    pub fn unwrap(&mut self, input: &mut IoBuf, out: &mut IoBuf) -> Result<Status, Error> {
        self.engine.unwrap(input, out)
    }

    /// Wipe all key material. Further calls fail with [`Error::Closed`].
    pub fn close(&mut self) {
        self.key_exchange = None;
        self.session_update = None;
        self.engine.close();
    }

    /// Start over. The session is kept, so a reset client resumes.
    pub fn reset(&mut self) {
        self.close();
        self.engine.reset();
        self.state = State::Initial;
        self.retry_group = None;
        self.hello_retry = false;
        self.client_hello.clear();
        self.session_update = None;
        self.peer_key = None;
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

    /// Group for the key share: the retry pick, else the first offered
    /// suite's preferred group when supported, else our first group.
    fn key_exchange_group(&self) -> Result<u8, Error> {
        if let Some(group) = self.retry_group {
            return Ok(group);
        }
        let config = self.engine.config();
        let preferred = config
            .cipher_suites()
            .first()
            .and_then(|id| config.registry().cipher_suite(*id))
            .map(|s| s.key_exchange)
            .filter(|g| config.key_exchanges().contains(g));

        preferred
            .or_else(|| config.key_exchanges().first().copied())
            .ok_or_else(|| Error::internal("no key exchange configured"))
    }

    fn verify_server(&self, config: &Config, ext: &mut Extensions) -> Result<PublicKey, Error> {
        if let Some(psc) = ext.remove(ExtensionType::PreSharedCertificate) {
            if ext.contains(ExtensionType::Certificate) {
                return Err(Error::illegal_param(
                    "both certificate and pre_shared_certificate",
                ));
            }
            let id: [u8; 4] = psc
                .as_slice()
                .try_into()
                .map_err(|_| Error::illegal_packet("malformed pre_shared_certificate"))?;
            let id = u32::from_be_bytes(id);
            let key = config
                .psc_keys()
                .get(&id)
                .ok_or_else(|| Error::illegal_param("unknown pre_shared_certificate"))?;
            debug!("Server authenticated by pre-shared certificate {}", id);
            return Ok(key.clone());
        }

        if config.switches().contains(Switches::PSC_ONLY) {
            return Err(Error::negotiation_failed("pre_shared_certificate only"));
        }

        let cert = ext
            .remove(ExtensionType::Certificate)
            .ok_or_else(|| Error::illegal_param("certificate missing"))?;
        let (&format_id, encoded) = cert
            .split_first()
            .ok_or_else(|| Error::illegal_packet("empty certificate"))?;

        if !config.certificate_formats().contains(&format_id) {
            return Err(Error::negotiation_failed("unsupported certificate format"));
        }
        let format = config
            .registry()
            .certificate_format(format_id)
            .ok_or_else(|| Error::negotiation_failed("unsupported certificate format"))?;

        let key = format
            .decode(encoded, config.trust_store())
            .map_err(|e| Error::illegal_param(format!("bad certificate: {}", e)))?;
        debug!("Server certificate {} accepted", format.name());
        Ok(key)
    }

    /// `u16 siglen ‖ sig(client_verify) ‖ u8 format ‖ encoding`
    fn client_certificate(&mut self, config: &Config, mask: &[u8]) -> Result<Vec<u8>, Error> {
        let mask: [u8; 4] = mask
            .try_into()
            .map_err(|_| Error::illegal_packet("malformed certificate_request"))?;
        let mask = u32::from_be_bytes(mask);

        let (format_id, encoded, key) = config
            .select_certificate(mask)
            .ok_or_else(|| Error::negotiation_failed("no client certificate"))?;

        let client_verify = self.engine.derive_mac_key("client_verify")?;
        let sig = key.sign(&client_verify).map_err(Error::internal)?;

        let mut out = Vec::with_capacity(3 + sig.len() + encoded.len());
        out.extend_from_slice(&(sig.len() as u16).to_be_bytes());
        out.extend_from_slice(&sig);
        out.push(format_id);
        out.extend_from_slice(&encoded);
        Ok(out)
    }

    fn update_session(&mut self, granted: Option<Vec<u8>>, suite_id: u16) -> Result<(), Error> {
        let Some(session) = &self.session else {
            return Ok(());
        };

        let Some(id) = granted else {
            debug!("Resumption declined by server");
            self.session_update = Some(SessionUpdate::Declined);
            return Ok(());
        };

        let mut next = if session.id() == id.as_slice() {
            session.clone()
        } else {
            Session::with_id(id)
        };
        let key = self.engine.derive_key("session", SESSION_KEY_LEN)?;
        next.set_key(&key, suite_id);
        self.session_update = Some(SessionUpdate::Granted(next));
        Ok(())
    }

    /// Adopt the resumption outcome once the Finished went out.
    fn commit_session(&mut self) {
        if !self.engine.is_done() {
            return;
        }
        match self.session_update.take() {
            Some(SessionUpdate::Granted(session)) => {
                debug!("Session granted: {:?}", session);
                self.session = Some(session);
            }
            Some(SessionUpdate::Declined) => self.session = None,
            None => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    ServerHello,
    Done,
}

impl State {
    fn make_progress(
        self,
        client: &mut Client,
        out: &mut IoBuf,
        input: &mut IoBuf,
    ) -> Result<(Self, Status), Error> {
        match self {
            State::Initial => self.send_client_hello(client, out),
            State::ServerHello => self.await_server_hello(client, out, input),
            State::Done => {
                client.commit_session();
                Ok((self, Status::Done))
            }
        }
    }

    fn send_client_hello(self, client: &mut Client, out: &mut IoBuf) -> Result<(Self, Status), Error> {
        let config = Arc::clone(client.engine.config());
        client.engine.generate_random()?;

        let group = client.key_exchange_group()?;
        let kx = config
            .registry()
            .key_exchange(group)
            .ok_or_else(|| Error::internal("key exchange not registered"))?;
        let kx_buf = client.engine.pop_buffer();
        let key_exchange = kx
            .start_exchange(kx_buf)
            .map_err(|e| Error::internal(format!("key exchange start: {}", e)))?;

        let mut extensions = Extensions::new();
        client.engine.pre_encoder = None;
        if let Some(session) = &client.session {
            extensions.insert(ExtensionType::Session, session.id().to_vec());

            if session.is_resumable() && config.switches().contains(Switches::ALLOW_0RTT) {
                let mut client_random = [0u8; RANDOM_LEN];
                client_random.copy_from_slice(&client.engine.random[..RANDOM_LEN]);
                client.engine.pre_encoder =
                    session.preflight_cipher(config.registry(), &client_random)?;
                if client.engine.pre_encoder.is_some() {
                    debug!("0-RTT enabled");
                }
            }
        }
        if !config.psc_keys().is_empty() {
            let mut ids = Vec::with_capacity(config.psc_keys().len() * 4);
            for id in config.psc_keys().keys() {
                ids.extend_from_slice(&id.to_be_bytes());
            }
            extensions.insert(ExtensionType::PreSharedCertificate, ids);
        }
        if let Some(name) = config.server_name() {
            extensions.insert(ExtensionType::ServerName, name.as_bytes().to_vec());
        }
        if let Some(alpn) = config.application_protocol() {
            extensions.insert(ExtensionType::ApplicationProtocol, alpn.as_bytes().to_vec());
        }
        let received = Extensions::new();
        config.process_extensions(ExtensionStage::ClientHello, &received, &mut extensions)?;

        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(&client.engine.random[..RANDOM_LEN]);

        client.client_hello.clear();
        {
            let hello = ClientHello {
                magic: MAGIC,
                version: PROTOCOL_VERSION,
                random,
                cipher_suites: config.cipher_suites().to_vec(),
                supported_kx: config.key_exchange_mask(),
                kx_id: group,
                public_key: key_exchange.pub_key(),
                supported_formats: config.certificate_format_mask(),
                extensions,
            };
            hello.serialize(&mut client.client_hello)?;
        }
        client.key_exchange = Some(key_exchange);

        debug!(
            "Send client_hello: suites {:?}, group {}",
            config.cipher_suites(),
            group
        );
        let body = std::mem::take(&mut client.client_hello);
        let status = client.engine.send_handshake(out, H_CLIENT_HELLO, &body, false);
        client.client_hello = body;

        // after a successful write go straight on to wait for the answer
        Ok((State::ServerHello, status))
    }

    fn await_server_hello(
        self,
        client: &mut Client,
        out: &mut IoBuf,
        input: &mut IoBuf,
    ) -> Result<(Self, Status), Error> {
        let (ty, body) = match client.engine.take_packet(input)? {
            Ok(packet) => packet,
            Err(status) => return Ok((self, status)),
        };

        let result = match ty {
            H_SERVER_HELLO => self.handle_server_hello(client, out, &body),
            P_ALERT => Err(client.engine.handle_alert(&body)),
            _ => Err(Error::illegal_packet("not an mss server")),
        };
        client.engine.push_buffer(body);
        result
    }

    fn handle_server_hello(
        self,
        client: &mut Client,
        out: &mut IoBuf,
        body: &[u8],
    ) -> Result<(Self, Status), Error> {
        let config = Arc::clone(client.engine.config());

        let (_, hello) = ServerHello::parse(body)
            .map_err(|_| Error::illegal_packet("malformed server_hello"))?;

        if hello.version != PROTOCOL_VERSION {
            return Err(Error::protocol(
                AlertCode::VersionMismatch,
                format!("server version {}", hello.version),
            ));
        }

        if hello.is_hello_retry() {
            return self.handle_hello_retry(client, &hello);
        }

        let suite = *config
            .suite(hello.cipher_suite)
            .ok_or_else(|| Error::illegal_param("cipher suite not offered"))?;

        client.engine.random[RANDOM_LEN..].copy_from_slice(&hello.random);

        let key_exchange = client
            .key_exchange
            .take()
            .ok_or_else(|| Error::internal("no key exchange in flight"))?;
        let mut shared = client.engine.pop_buffer();
        let completed = key_exchange.complete(hello.public_key, &mut shared);
        let secret = match completed {
            Ok(()) => client.engine.init_secret(suite, &shared),
            Err(e) => Err(Error::illegal_param(format!("key exchange: {}", e))),
        };
        client.engine.push_buffer(shared);
        secret?;
        client.engine.install_keys()?;

        // encrypted tail
        let head = &body[..hello.head_len()];
        let mut tail = client.engine.pop_buffer();
        tail.extend_from_slice(hello.encrypted);
        let result = match client.engine.open(head, &mut tail) {
            Ok(()) => self.verify_server_hello(client, &config, suite, head, &tail),
            Err(e) => Err(e),
        };
        client.engine.push_buffer(tail);
        let finished = result?;

        let status = client.engine.send_handshake(out, H_FINISHED, &finished, true);
        client.commit_session();
        Ok((State::Done, status))
    }

    fn handle_hello_retry(
        self,
        client: &mut Client,
        hello: &ServerHello,
    ) -> Result<(Self, Status), Error> {
        if client.hello_retry {
            return Err(Error::illegal_param("hello_retry"));
        }
        client.hello_retry = true;

        let mask = hello
            .retry_mask()
            .ok_or_else(|| Error::illegal_packet("malformed hello_retry"))?;
        let config = client.engine.config();
        let group = config
            .key_exchanges()
            .iter()
            .copied()
            .find(|g| mask & (1 << g) != 0)
            .ok_or_else(|| Error::negotiation_failed("key_exchange"))?;

        debug!("Hello retry with group {}", group);
        client.retry_group = Some(group);
        client.key_exchange = None;
        Ok((State::Initial, Status::Continue))
    }

    /// Authenticate the decrypted server_hello tail and build the Finished
    /// message.
    fn verify_server_hello(
        self,
        client: &mut Client,
        config: &Config,
        suite: CipherSuite,
        head: &[u8],
        tail: &[u8],
    ) -> Result<Buf, Error> {
        let (_, block) =
            SignedBlock::parse(tail).map_err(|_| Error::illegal_packet("malformed server_hello"))?;
        let mut ext = block.extensions.clone();

        let key = client.verify_server(config, &mut ext)?;

        let verify_s = client.engine.derive_mac_key("verify_s")?;
        let mac = client.engine.hmac(
            &verify_s,
            &[&ZERO_32[..], &client.client_hello[..], head, block.ext_raw],
        )?;
        key.verify(&mac, block.signature)
            .map_err(|_| Error::illegal_param("invalid signature"))?;
        client.peer_key = Some(key);

        let mut fin_ext = Extensions::new();
        if let Some(mask) = ext.remove(ExtensionType::CertificateRequest) {
            let cert = client.client_certificate(config, &mask)?;
            fin_ext.insert(ExtensionType::Certificate, cert);
        }

        let granted = ext.remove(ExtensionType::Session);
        client.update_session(granted, suite.id)?;
        client.engine.pre_encoder = None;
        config.process_extensions(ExtensionStage::ClientFinished, &ext, &mut fin_ext)?;
        ext.trace_leftovers("server_hello");

        let mut fin_raw = Buf::new();
        fin_ext.serialize(&mut fin_raw)?;
        let verify_c = client.engine.derive_mac_key("verify_c")?;
        let tag = client
            .engine
            .hmac(&verify_c, &[&ZERO_32[..], block.signature, &fin_raw[..]])?;

        let mut finished = Buf::new();
        SignedBlock::serialize(&fin_raw, &tag, &mut finished);
        client.engine.seal(&[H_FINISHED], &mut finished)?;
        Ok(finished)
    }
}
