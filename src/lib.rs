//! MSS (My Secure Socket) is a Sans-IO secure transport.
//!
//! A [`Client`] and a [`Server`] negotiate a cipher suite and a key exchange
//! group, authenticate the server (and optionally the client) with a
//! certificate or a pre-shared certificate, derive traffic keys and then
//! protect an application byte stream with AEAD records.
//!
//! The engines never perform I/O. The caller moves bytes between the engine
//! buffers ([`IoBuf`]) and the network, and re-invokes the engine when the
//! returned [`Status`] asks for more input or more output space.
//!
//! ```text
//!  Client                                              Server
//!
//!  client_hello
//!    random, suites, key share, extensions  -------->
//!  [P_PREDATA 0-RTT records] *              -------->
//!                                                      server_hello
//!                                            random, suite, key share
//!                                       {extensions, signature}
//!                                           <--------
//!  finished
//!  {extensions, client certificate *, tag}  -------->
//!  [application data]                       <------->  [application data]
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use mss::{Client, Config, IoBuf, KeyPair, Server, Status};
//!
//! let server_config = Arc::new(
//!     Config::builder()
//!         .certificate(KeyPair::generate_ed25519())
//!         .build()
//!         .unwrap(),
//! );
//! let client_config = Arc::new(Config::builder().build().unwrap());
//!
//! let mut client = Client::new(client_config);
//! let mut server = Server::new(server_config);
//!
//! let (mut c2s, mut s2c) = (IoBuf::with_capacity(8192), IoBuf::with_capacity(8192));
//! while !(client.is_handshake_done() && server.is_handshake_done()) {
//!     client.handshake(&mut c2s, &mut s2c).unwrap();
//!     server.handshake(&mut s2c, &mut c2s).unwrap();
//! }
//!
//! let mut plain = IoBuf::from_slice(b"hello");
//! assert_eq!(client.wrap(&mut plain, &mut c2s).unwrap(), Status::Done);
//!
//! let mut received = IoBuf::with_capacity(64);
//! server.unwrap(&mut c2s, &mut received).unwrap();
//! assert_eq!(received.readable(), b"hello");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
pub use buffer::{Buf, BufferPool, IoBuf, TmpBuf};

mod error;
pub use error::{AlertCode, Error};

mod config;
pub use config::{Config, ConfigBuilder, Switches};

pub mod certificate;
pub mod crypto;
pub use crypto::{KeyPair, PublicKey, TrustStore};

mod registry;
pub use registry::{CipherSuite, Registry};

pub mod message;
pub use message::{ExtensionHandler, ExtensionStage, Extensions};

mod session;
pub use session::{MemorySessionManager, Session, SessionManager};

mod engine;
pub use engine::Status;

mod client;
pub use client::Client;

mod server;
pub use server::Server;
