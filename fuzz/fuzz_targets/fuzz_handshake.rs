#![no_main]

//! Fuzz target for both handshake state machines.
//!
//! The first input byte picks the side: even feeds the bytes to a fresh
//! server as if they were a client_hello, odd feeds them to a client that
//! has already sent its client_hello.

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

use mss::{Client, Config, IoBuf, KeyPair, Server};

fuzz_target!(|data: &[u8]| {
    let Some((&side, data)) = data.split_first() else {
        return;
    };

    let mut out = IoBuf::with_capacity(64 * 1024);
    let mut input = IoBuf::from_slice(data);

    if side % 2 == 0 {
        let config = match Config::builder()
            .certificate(KeyPair::generate_ed25519())
            .build()
        {
            Ok(c) => Arc::new(c),
            Err(_) => return,
        };
        let mut server = Server::new(config);
        // bounded, a broken state machine must not spin
        for _ in 0..4 {
            if server.handshake(&mut out, &mut input).is_err() {
                break;
            }
        }
    } else {
        let config = match Config::builder().build() {
            Ok(c) => Arc::new(c),
            Err(_) => return,
        };
        let mut client = Client::new(config);
        if client.handshake(&mut out, &mut IoBuf::default()).is_err() {
            return;
        }
        for _ in 0..4 {
            if client.handshake(&mut out, &mut input).is_err() {
                break;
            }
        }
    }
});
