//! Server and client authentication.

mod common;

use std::sync::Arc;

use mss::certificate::generate_ca;
use mss::crypto::rust_crypto::{FORMAT_ECDSA_P256, FORMAT_ED25519, FORMAT_X509};
use mss::{AlertCode, Client, Config, Error, KeyPair, Server, Switches, TrustStore};

use common::*;

#[test]
fn raw_server_key_is_reported() {
    init_log();

    let key = KeyPair::generate_ed25519();
    let public = key.public_key().clone();
    let server_config = Arc::new(Config::builder().certificate(key).build().unwrap());

    let (client, server, _) = connect(client_config(), server_config);
    assert_eq!(client.peer_key(), Some(&public));
    assert!(server.peer_key().is_none());
}

#[test]
fn pre_shared_certificate() {
    init_log();

    let key = KeyPair::generate_p256();
    let public = key.public_key().clone();

    let client_config = Arc::new(
        Config::builder()
            .pre_shared_key(7, public.clone())
            .switches(Switches::PSC_ONLY)
            .build()
            .unwrap(),
    );
    let server_config = Arc::new(server_builder().pre_shared_identity(7, key).build().unwrap());

    let (mut client, mut server, mut link) = connect(client_config, server_config);
    assert_eq!(client.peer_key(), Some(&public));

    let got = client_to_server(&mut client, &mut server, &mut link, b"psc").unwrap();
    assert_eq!(got, b"psc");
}

#[test]
fn unknown_pre_shared_falls_back_to_certificate() {
    init_log();

    let client_config = Arc::new(
        Config::builder()
            .pre_shared_key(1, KeyPair::generate_ed25519().public_key().clone())
            .build()
            .unwrap(),
    );
    let server_config = Arc::new(
        server_builder()
            .pre_shared_identity(2, KeyPair::generate_ed25519())
            .build()
            .unwrap(),
    );

    let (client, _, _) = connect(client_config, server_config);
    assert!(client.peer_key().is_some());
}

#[test]
fn client_psc_only_rejects_certificate() {
    init_log();

    let client_config = Arc::new(
        Config::builder()
            .switches(Switches::PSC_ONLY)
            .build()
            .unwrap(),
    );
    let mut client = Client::new(client_config);
    let mut server = Server::new(server_config());
    let mut link = Link::new();

    let err = handshake(&mut client, &mut server, &mut link).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::NegotiationFailed));
    assert!(!client.is_handshake_done());
}

#[test]
fn server_psc_only_without_match() {
    init_log();

    let server_config = Arc::new(
        server_builder()
            .pre_shared_identity(3, KeyPair::generate_ed25519())
            .switches(Switches::PSC_ONLY)
            .build()
            .unwrap(),
    );
    let mut client = Client::new(client_config());
    let mut server = Server::new(server_config);
    let mut link = Link::new();

    client.handshake(&mut link.c2s, &mut link.s2c).unwrap();
    let err = server.handshake(&mut link.s2c, &mut link.c2s).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::NegotiationFailed));

    match client.handshake(&mut link.c2s, &mut link.s2c).unwrap_err() {
        Error::PeerAlert { code, .. } => assert_eq!(code, AlertCode::NegotiationFailed),
        e => panic!("unexpected error: {:?}", e),
    }
}

#[test]
fn no_certificate_in_client_formats() {
    init_log();

    // only an Ed25519 identity, client only reads P-256
    let client_config = Arc::new(
        Config::builder()
            .certificate_formats(&[FORMAT_ECDSA_P256])
            .build()
            .unwrap(),
    );
    let mut client = Client::new(client_config);
    let mut server = Server::new(server_config());
    let mut link = Link::new();

    let err = handshake(&mut client, &mut server, &mut link).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::NegotiationFailed));
}

#[test]
fn client_certificate_verified() {
    init_log();

    let client_key = KeyPair::generate_p256();
    let client_public = client_key.public_key().clone();
    let client_config = Arc::new(Config::builder().certificate(client_key).build().unwrap());
    let server_config = Arc::new(
        server_builder()
            .switches(Switches::VERIFY_CLIENT)
            .build()
            .unwrap(),
    );

    let (mut client, mut server, mut link) = connect(client_config, server_config);
    assert_eq!(server.peer_key(), Some(&client_public));

    let got = server_to_client(&mut client, &mut server, &mut link, b"authenticated").unwrap();
    assert_eq!(got, b"authenticated");
}

#[test]
fn client_without_certificate_fails() {
    init_log();

    let server_config = Arc::new(
        server_builder()
            .switches(Switches::VERIFY_CLIENT)
            .build()
            .unwrap(),
    );
    let mut client = Client::new(client_config());
    let mut server = Server::new(server_config);
    let mut link = Link::new();

    let err = handshake(&mut client, &mut server, &mut link).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::NegotiationFailed));
}

#[test]
fn x509_chain_with_trusted_ca() {
    init_log();

    let ca = generate_ca().unwrap();
    let identity = ca.issue("server.test").unwrap();

    let mut trust = TrustStore::new();
    trust.add_certificate_der(&ca.certificate).unwrap();

    let client_config = Arc::new(
        Config::builder()
            .certificate_formats(&[FORMAT_X509])
            .trust_store(trust)
            .build()
            .unwrap(),
    );
    let server_config = Arc::new(
        Config::builder()
            .certificate(identity.key_pair().unwrap())
            .certificate_formats(&[FORMAT_X509, FORMAT_ED25519])
            .build()
            .unwrap(),
    );

    let (mut client, mut server, mut link) = connect(client_config, server_config);
    assert!(client.peer_key().is_some());
    let got = client_to_server(&mut client, &mut server, &mut link, b"x509").unwrap();
    assert_eq!(got, b"x509");
}

#[test]
fn x509_chain_untrusted() {
    init_log();

    let ca = generate_ca().unwrap();
    let identity = ca.issue("server.test").unwrap();

    let client_config = Arc::new(
        Config::builder()
            .certificate_formats(&[FORMAT_X509])
            .trust_store(TrustStore::new())
            .build()
            .unwrap(),
    );
    let server_config = Arc::new(
        Config::builder()
            .certificate(identity.key_pair().unwrap())
            .certificate_formats(&[FORMAT_X509])
            .build()
            .unwrap(),
    );

    let mut client = Client::new(client_config);
    let mut server = Server::new(server_config);
    let mut link = Link::new();

    let err = handshake(&mut client, &mut server, &mut link).unwrap_err();
    assert_eq!(err.code(), Some(AlertCode::IllegalParam));
}
