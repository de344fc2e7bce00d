//! Shared helpers for MSS integration tests.

#![allow(unused)]

use std::sync::Arc;

use mss::{Client, Config, ConfigBuilder, Error, IoBuf, KeyPair, Server, Status};

/// Capacity of each direction of a [`Link`].
pub const LINK_LEN: usize = 256 * 1024;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The two directions of an in-memory transport.
pub struct Link {
    /// Client to server.
    pub c2s: IoBuf,
    /// Server to client.
    pub s2c: IoBuf,
}

impl Link {
    pub fn new() -> Self {
        Link {
            c2s: IoBuf::with_capacity(LINK_LEN),
            s2c: IoBuf::with_capacity(LINK_LEN),
        }
    }
}

/// Server builder with an Ed25519 identity.
pub fn server_builder() -> ConfigBuilder {
    Config::builder().certificate(KeyPair::generate_ed25519())
}

pub fn server_config() -> Arc<Config> {
    Arc::new(server_builder().build().expect("server config"))
}

pub fn client_config() -> Arc<Config> {
    Arc::new(Config::builder().build().expect("client config"))
}

/// Drive both handshakes until they are complete, or one of them fails.
pub fn handshake(client: &mut Client, server: &mut Server, link: &mut Link) -> Result<(), Error> {
    for _ in 0..10 {
        client.handshake(&mut link.c2s, &mut link.s2c)?;
        server.handshake(&mut link.s2c, &mut link.c2s)?;
        if client.is_handshake_done() && server.is_handshake_done() {
            return Ok(());
        }
    }
    panic!("handshake did not converge");
}

/// Connect a fresh client/server pair.
pub fn connect(client_config: Arc<Config>, server_config: Arc<Config>) -> (Client, Server, Link) {
    let mut client = Client::new(client_config);
    let mut server = Server::new(server_config);
    let mut link = Link::new();
    handshake(&mut client, &mut server, &mut link).expect("handshake");
    (client, server, link)
}

/// Wrap `data` on the client, unwrap it on the server.
pub fn client_to_server(
    client: &mut Client,
    server: &mut Server,
    link: &mut Link,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut input = IoBuf::from_slice(data);
    assert_eq!(client.wrap(&mut input, &mut link.c2s)?, Status::Done);
    assert!(input.is_empty());

    let mut out = IoBuf::with_capacity(data.len());
    assert_eq!(server.unwrap(&mut link.c2s, &mut out)?, Status::Done);
    Ok(out.take_readable())
}

/// Wrap `data` on the server, unwrap it on the client.
pub fn server_to_client(
    client: &mut Client,
    server: &mut Server,
    link: &mut Link,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut input = IoBuf::from_slice(data);
    assert_eq!(server.wrap(&mut input, &mut link.s2c)?, Status::Done);
    assert!(input.is_empty());

    let mut out = IoBuf::with_capacity(data.len());
    assert_eq!(client.unwrap(&mut link.s2c, &mut out)?, Status::Done);
    Ok(out.take_readable())
}

/// Flip one bit in the unread bytes of `buf`, `from_end` bytes before the end.
pub fn flip_bit(buf: &mut IoBuf, from_end: usize) {
    let mut bytes = buf.take_readable();
    let i = bytes.len() - 1 - from_end;
    bytes[i] ^= 0x01;
    buf.put_slice(&bytes);
}
