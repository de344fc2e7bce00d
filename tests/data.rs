//! Application data after the handshake.

mod common;

use mss::message::{MAX_PLAINTEXT, RECORD_HEADER_LEN};
use mss::{AlertCode, Error, IoBuf, Status};

use common::*;

#[test]
fn hello_world() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let got = client_to_server(&mut client, &mut server, &mut link, b"hello").unwrap();
    assert_eq!(got, b"hello");

    let got = server_to_client(&mut client, &mut server, &mut link, b"world").unwrap();
    assert_eq!(got, b"world");
}

#[test]
fn large_payload_is_split_into_records() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let mut input = IoBuf::from_slice(&data);
    assert_eq!(client.wrap(&mut input, &mut link.c2s).unwrap(), Status::Done);

    // four records, each with a header and a tag
    let records = data.len().div_ceil(MAX_PLAINTEXT);
    assert_eq!(records, 4);
    assert!(link.c2s.readable_bytes() > data.len() + records * RECORD_HEADER_LEN);

    let mut out = IoBuf::with_capacity(data.len());
    assert_eq!(server.unwrap(&mut link.c2s, &mut out).unwrap(), Status::Done);
    assert_eq!(out.take_readable(), data);
}

#[test]
fn many_small_messages() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    for i in 0..50u32 {
        let msg = format!("message {}", i);
        let got = client_to_server(&mut client, &mut server, &mut link, msg.as_bytes()).unwrap();
        assert_eq!(got, msg.as_bytes());
        let got = server_to_client(&mut client, &mut server, &mut link, msg.as_bytes()).unwrap();
        assert_eq!(got, msg.as_bytes());
    }
}

#[test]
fn empty_input_is_done() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let mut input = IoBuf::default();
    assert_eq!(client.wrap(&mut input, &mut link.c2s).unwrap(), Status::Done);
    assert!(link.c2s.is_empty());

    let mut out = IoBuf::with_capacity(16);
    assert_eq!(server.unwrap(&mut link.c2s, &mut out).unwrap(), Status::Done);
}

#[test]
fn unwrap_output_one_byte_short() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let mut input = IoBuf::from_slice(b"exactly sized");
    client.wrap(&mut input, &mut link.c2s).unwrap();
    let wire = link.c2s.readable_bytes();

    let mut out = IoBuf::with_capacity(12);
    assert_eq!(
        server.unwrap(&mut link.c2s, &mut out).unwrap(),
        Status::NeedOutput(1)
    );
    // nothing consumed
    assert_eq!(link.c2s.readable_bytes(), wire);
    assert!(out.is_empty());

    out.set_capacity(13);
    assert_eq!(server.unwrap(&mut link.c2s, &mut out).unwrap(), Status::Done);
    assert_eq!(out.take_readable(), b"exactly sized");
}

#[test]
fn wrap_output_one_byte_short() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let mut input = IoBuf::from_slice(b"hello");
    let mut out = IoBuf::with_capacity(0);
    let need = match client.wrap(&mut input, &mut out).unwrap() {
        Status::NeedOutput(n) => n,
        s => panic!("unexpected status: {:?}", s),
    };

    out.set_capacity(need - 1);
    assert_eq!(client.wrap(&mut input, &mut out).unwrap(), Status::NeedOutput(1));
    assert_eq!(input.readable(), b"hello");

    out.set_capacity(need);
    assert_eq!(client.wrap(&mut input, &mut out).unwrap(), Status::Done);
    assert!(input.is_empty());
    assert_eq!(out.readable_bytes(), need);

    let mut plain = IoBuf::with_capacity(5);
    server.unwrap(&mut out, &mut plain).unwrap();
    assert_eq!(plain.take_readable(), b"hello");
}

#[test]
fn partial_record_needs_input() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let mut input = IoBuf::from_slice(b"split across reads");
    client.wrap(&mut input, &mut link.c2s).unwrap();
    let wire = link.c2s.take_readable();

    let mut partial = IoBuf::with_capacity(LINK_LEN);
    partial.put_slice(&wire[..10]);
    let mut out = IoBuf::with_capacity(64);
    assert_eq!(
        server.unwrap(&mut partial, &mut out).unwrap(),
        Status::NeedInput(wire.len() - 10)
    );

    partial.put_slice(&wire[10..]);
    assert_eq!(server.unwrap(&mut partial, &mut out).unwrap(), Status::Done);
    assert_eq!(out.take_readable(), b"split across reads");
}

#[test]
fn bit_flip_is_fatal_and_sticky() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let mut input = IoBuf::from_slice(b"tamper with me");
    client.wrap(&mut input, &mut link.c2s).unwrap();
    flip_bit(&mut link.c2s, 5);

    let mut out = IoBuf::with_capacity(64);
    let err = server.unwrap(&mut link.c2s, &mut out).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::CipherFault));
    assert!(out.is_empty());

    let mut input = IoBuf::from_slice(b"more");
    assert_eq!(server.wrap(&mut input, &mut link.s2c).unwrap_err(), err);
    assert_eq!(server.unwrap(&mut link.c2s, &mut out).unwrap_err(), err);
}

#[test]
fn replayed_record_fails() {
    init_log();

    let (mut client, mut server, mut link) = connect(client_config(), server_config());

    let mut input = IoBuf::from_slice(b"once");
    client.wrap(&mut input, &mut link.c2s).unwrap();
    let wire = link.c2s.readable().to_vec();

    let mut out = IoBuf::with_capacity(64);
    server.unwrap(&mut link.c2s, &mut out).unwrap();

    let mut replay = IoBuf::from_slice(&wire);
    let err = server.unwrap(&mut replay, &mut out).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::CipherFault));
}

#[test]
fn garbage_record_type() {
    init_log();

    let (_, mut server, _) = connect(client_config(), server_config());

    let mut input = IoBuf::from_slice(&[0x22, 0x00, 0x02, 0xaa, 0xbb]);
    let mut out = IoBuf::with_capacity(64);
    let err = server.unwrap(&mut input, &mut out).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::IllegalPacket));
}

#[test]
fn peer_alert_after_handshake() {
    init_log();

    let (mut client, _server, mut link) = connect(client_config(), server_config());
    let mut out = IoBuf::with_capacity(64);

    // an alert arriving in the data stream surfaces on unwrap
    let mut alert = IoBuf::from_slice(&[0x01, 0x00, 0x03, 0x04, 0x01, b'!']);
    match client.unwrap(&mut alert, &mut out).unwrap_err() {
        Error::PeerAlert {
            code,
            message,
            trustable,
        } => {
            assert_eq!(code, AlertCode::IllegalParam);
            assert_eq!(message, "!");
            assert!(!trustable);
        }
        e => panic!("unexpected error: {:?}", e),
    }
    // latched
    assert!(client.unwrap(&mut link.s2c, &mut out).is_err());
}
