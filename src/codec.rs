//! Label Codec (component A).
//!
//! Turns a DNS question name into an ordered list of fields below the
//! configured apex, classifies the final field against the fixed tag set,
//! and handles the two payload alphabets the rest of the tunnel uses:
//! unpadded base32 for session-bound encrypted fragments, and URL-safe
//! unpadded base64 for send-block chunks.

use crate::error::{Result, TunnelError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use data_encoding::BASE32_NOPAD;

/// The seven message types the router dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    DomainKey,
    Block,
    ClearBlock,
    SessionInit,
    SessionHeader,
    SessionMessage,
    SessionPoll,
}

impl Tag {
    fn from_field(field: &str) -> Option<Self> {
        match field.to_ascii_lowercase().as_str() {
            "_domainkey" => Some(Tag::DomainKey),
            "_b" => Some(Tag::Block),
            "_cb" => Some(Tag::ClearBlock),
            "_si" => Some(Tag::SessionInit),
            "_sh" => Some(Tag::SessionHeader),
            "s" => Some(Tag::SessionMessage),
            "_sp" => Some(Tag::SessionPoll),
            _ => None,
        }
    }

    /// Minimum number of logical fields (including the nonce, excluding the
    /// tag itself) a query of this shape must carry. See DESIGN.md for how
    /// "logical field" reconciles the strict-arity requirement in spec §4.F
    /// with payloads too large for a single 63-byte label.
    pub fn min_fields(self) -> usize {
        match self {
            Tag::DomainKey => 2,   // nonce, implant
            Tag::Block => 4,       // nonce, start, stop, block_id
            Tag::ClearBlock => 2,  // nonce, block_id
            Tag::SessionInit => 3, // nonce, sealed_key(+), implant
            Tag::SessionHeader => 3, // nonce, sealed_header(+), session_id
            Tag::SessionMessage => 4, // nonce, fragment(+), header_id, session_id
            Tag::SessionPoll => 2, // nonce, session_id
        }
    }
}

/// Strip the configured apex (case-insensitively) from a query name and
/// split what remains into ordered, non-empty fields.
///
/// Returns `None` if `name` is not a strict subdomain of `apex` (i.e. equal
/// to it, or not ending in it at all) — the caller must treat that as a
/// non-tunnel query and answer empty without touching any state.
pub fn strip_apex<'a>(name: &str, apex: &str) -> Option<Vec<String>> {
    let name = name.trim_end_matches('.');
    let apex = apex.trim_end_matches('.');

    let name_lower = name.to_ascii_lowercase();
    let apex_lower = apex.to_ascii_lowercase();

    let suffix = format!(".{apex_lower}");
    if !name_lower.ends_with(&suffix) {
        return None;
    }
    let prefix_len = name.len() - suffix.len();
    if prefix_len == 0 {
        return None;
    }

    let remainder = &name[..prefix_len];
    let fields: Vec<String> = remainder
        .split('.')
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

/// A parsed, classified query: the tag, and the fields below the apex in
/// order (nonce first, tag-carrying field excluded).
pub struct ParsedQuery {
    pub tag: Tag,
    pub fields: Vec<String>,
}

/// Classify a field list by its final field, per the fixed tag set, and
/// enforce the strict (logical) arity check. The nonce (`fields[0]`) is
/// retained but never interpreted.
pub fn classify(fields: Vec<String>) -> Result<ParsedQuery> {
    let (last, rest) = fields.split_last().ok_or(TunnelError::MalformedQuery)?;
    let tag = Tag::from_field(last).ok_or(TunnelError::UnknownTag)?;

    if rest.len() < tag.min_fields() {
        return Err(TunnelError::ArityMismatch);
    }

    Ok(ParsedQuery {
        tag,
        fields: rest.to_vec(),
    })
}

/// Join a run of fields (already known to be part of one logical token)
/// back into a single string, undoing the label-length-forced split an
/// encoder had to perform for tokens too large for one 63-byte label.
pub fn rejoin(fields: &[String]) -> String {
    fields.concat()
}

/// Decode an unpadded base32 field (case-normalized to uppercase first,
/// since encoders may have lowercased it for wire safety).
pub fn decode_b32(field: &str) -> Result<Vec<u8>> {
    BASE32_NOPAD
        .decode(field.to_ascii_uppercase().as_bytes())
        .map_err(|_| TunnelError::DecodeError)
}

/// Encode bytes as lowercase unpadded base32, safe to embed directly in a
/// DNS label.
pub fn encode_b32(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data).to_ascii_lowercase()
}

/// Decode a URL-safe unpadded base64 field (send-block chunk alphabet).
pub fn decode_b64(field: &str) -> Result<Vec<u8>> {
    B64.decode(field.as_bytes()).map_err(|_| TunnelError::DecodeError)
}

/// Encode bytes as URL-safe unpadded base64 (alphabet is DNS-label-safe:
/// `-`/`_` instead of `+`/`/`, no padding `=`).
pub fn encode_b64(data: &[u8]) -> String {
    B64.encode(data)
}
