//! Tunnel error kinds.
//!
//! Every variant here is recovered locally by the router (spec §7); none of
//! them are meant to propagate past a query handler. `TunnelError` exists so
//! internal components can return a typed `Result`, not so the DNS listener
//! can show it to a client.

/// Errors produced by the tunnel components.
///
/// None of these carry attacker-controlled input in their `Display` output —
/// handlers log the kind, never the offending bytes, so a malformed query
/// can't be echoed back in a reply or a log line.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("malformed query")]
    MalformedQuery,

    #[error("unknown tag")]
    UnknownTag,

    #[error("arity mismatch")]
    ArityMismatch,

    #[error("decode error")]
    DecodeError,

    #[error("crypto error")]
    CryptoError,

    #[error("unknown session")]
    UnknownSession,

    #[error("unknown block")]
    UnknownBlock,

    #[error("invalid sequence number")]
    InvalidSequence,

    /// Named by spec §7's error taxonomy, but [`crate::send_store::SendBlockStore::range`]
    /// never actually produces it — clipping out-of-range bounds to
    /// `[0, count)` is the documented policy, not an error. Reserved so the
    /// error surface matches the spec's nine kinds one-for-one.
    #[error("invalid range")]
    InvalidRange,
}

pub type Result<T> = std::result::Result<T, TunnelError>;
