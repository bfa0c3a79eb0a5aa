// Tunnel server startup tests

use std::io::Write;
use tempfile::NamedTempFile;

use meshtunnel_core::identity::load_secret_key;
use meshtunnel_core::{TunnelConfig, TunnelServer};

fn key_file() -> NamedTempFile {
    let key_pair = rcgen::KeyPair::generate(&rcgen::PKCS_ED25519).unwrap();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(key_pair.serialize_pem().as_bytes()).unwrap();
    file
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plain_relay_advertises_its_identity() {
    let key = key_file();
    let mut config = TunnelConfig::test();
    config.server.listen_port = 0;
    config.server.advertise_addresses = vec!["203.0.113.7".parse().unwrap()];
    config.security.private_key_file = key.path().to_path_buf();

    let server = TunnelServer::start(&config).await.unwrap();
    let expected_id = load_secret_key(key.path()).unwrap().public();
    let port = server.relay_addr().port();

    assert_eq!(server.node_id(), expected_id);
    assert!(port != 0);

    let advertised: Vec<(String, Option<u16>)> = server
        .advertised()
        .iter()
        .map(|a| (a.url.host_str().unwrap_or_default().to_string(), a.url.port()))
        .collect();
    assert!(advertised.contains(&("127.0.0.1".to_string(), Some(port))));
    assert!(advertised.contains(&("203.0.113.7".to_string(), Some(port))));
    assert!(server.advertised().iter().all(|a| a.url.scheme() == "http"));
    assert!(server.advertised().iter().all(|a| a.node_id == expected_id));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tls_relay_without_certificates_fails_to_start() {
    let key = key_file();
    let mut config = TunnelConfig::test();
    config.server.listen_port = 0;
    config.security.tls_enabled = true;
    config.security.private_key_file = key.path().to_path_buf();
    config.security.cert_file = "/definitely/not/here.crt".into();

    let err = TunnelServer::start(&config).await.err().unwrap();
    assert!(err.is_fatal());
}
