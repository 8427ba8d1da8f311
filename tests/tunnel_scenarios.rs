//! End-to-end scenario coverage against the full tunnel stack, driven
//! through the router the way a real DNS listener would call it.

use rsa::Oaep;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use zonecaster::codec;
use zonecaster::config::TunnelConfig;
use zonecaster::crypto::aead_key_from;
use zonecaster::router::handle_query;
use zonecaster::tunnel::Tunnel;

async fn test_tunnel() -> Tunnel {
    let mut config = TunnelConfig::default();
    config.apex_domain = "tunnel.example".to_string();
    config.session_idle_timeout = Duration::from_millis(1);
    config.reasm_idle_timeout = Duration::from_millis(1);
    Tunnel::new(config).await.unwrap()
}

#[tokio::test]
async fn scenario_s1_domain_key_fetch_reconstructs_cert_pem() {
    let tunnel = test_tunnel().await;
    let answer = handle_query(&tunnel, "_ffff.implant01._domainkey.tunnel.example").await;
    assert_eq!(answer.len(), 1);

    let mut parts = answer[0].split('.');
    let block_id = parts.next().unwrap();
    let count: usize = parts.next().unwrap().parse().unwrap();

    let chunks = tunnel.send_store.range(block_id, 0, count).await;
    let mut pem = Vec::new();
    for chunk in chunks {
        let raw = codec::decode_b64(chunk.trim_start_matches('.')).unwrap();
        pem.extend_from_slice(&raw[4..]);
    }
    assert_eq!(String::from_utf8(pem).unwrap(), tunnel.cert.cert_pem);
}

#[tokio::test]
async fn scenario_s2_session_handshake_yields_matching_session_id() {
    let tunnel = test_tunnel().await;
    let raw_key = [0x5au8; 32];
    let sealed_key = tunnel
        .cert
        .public_key()
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), &raw_key)
        .unwrap();
    let body = codec::encode_b32(&sealed_key);
    let qname = format!("_n.{body}.implant01._si.tunnel.example");

    let answer = handle_query(&tunnel, &qname).await;
    assert_eq!(answer.len(), 1);

    let key = aead_key_from(&raw_key).unwrap();
    let session_id = zonecaster::session::open_sealed_id(&answer[0], &key).unwrap();
    assert!(session_id.starts_with('_'));
    assert_eq!(session_id.len(), 9);
    assert!(tunnel.sessions.lookup(&session_id).await.is_some());
}

#[tokio::test]
async fn scenario_s5_range_retrieval_with_clipping_and_clear() {
    let tunnel = test_tunnel().await;
    let data: Vec<u8> = (0..100u8).cycle().take(400).collect();
    let (block_id, count) = tunnel.send_store.store(&data).await;
    assert_eq!(count, 3); // 400 bytes / 185-byte default chunk -> ceil(400/185) = 3

    // start(8) is past the last chunk (3): range clips to empty, not an error.
    let answer = handle_query(&tunnel, &format!("_n.8.20.{block_id}._b.tunnel.example")).await;
    assert!(answer.is_empty());

    let in_range = handle_query(&tunnel, &format!("_n.1.20.{block_id}._b.tunnel.example")).await;
    assert_eq!(in_range.len(), 2); // clipped to [1, 3)

    let cleared = handle_query(&tunnel, &format!("_n.{block_id}._cb.tunnel.example")).await;
    assert_eq!(cleared, vec!["1".to_string()]);
    let cleared_again = handle_query(&tunnel, &format!("_n.{block_id}._cb.tunnel.example")).await;
    assert_eq!(cleared_again, vec!["0".to_string()]);
}

#[tokio::test]
async fn scenario_s6_stale_session_is_rejected_after_idle_sweep() {
    let tunnel = Arc::new(test_tunnel().await);
    let raw_key = [0x7bu8; 16];
    let sealed_key = tunnel
        .cert
        .public_key()
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), &raw_key)
        .unwrap();
    let body = codec::encode_b32(&sealed_key);
    let qname = format!("_n.{body}.implant01._si.tunnel.example");
    let answer = handle_query(tunnel.as_ref(), &qname).await;
    let key = aead_key_from(&raw_key).unwrap();
    let session_id = zonecaster::session::open_sealed_id(&answer[0], &key).unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    tunnel.sessions.sweep(tunnel.config.session_idle_timeout).await;
    tunnel.reassembly.sweep(tunnel.config.reasm_idle_timeout).await;

    // `_sh` for a swept-away session must fail, not announce into limbo.
    let header_field = codec::encode_b32(b"whatever");
    let sh_query = format!("_n.{header_field}.{session_id}._sh.tunnel.example");
    let sh_answer = handle_query(tunnel.as_ref(), &sh_query).await;
    assert_eq!(sh_answer, vec!["1".to_string()]);
}
