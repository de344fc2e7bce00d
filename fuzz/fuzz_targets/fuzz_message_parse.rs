#![no_main]

//! Fuzz target for the wire message parsers.

use libfuzzer_sys::fuzz_target;

use mss::message::{read_packet, Alert, ClientHello, Extensions, ServerHello, SignedBlock};

fuzz_target!(|data: &[u8]| {
    let _ = read_packet(data);
    let _ = ClientHello::parse(data);
    let _ = ServerHello::parse(data);
    let _ = SignedBlock::parse(data);
    let _ = Extensions::parse(data);

    if let Ok((_, alert)) = Alert::parse(data) {
        // a parsed alert always serializes
        let mut buf = mss::Buf::new();
        alert.serialize(&mut buf);
    }
});
