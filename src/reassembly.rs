//! Reassembly Buffer (component D).
//!
//! Holds in-flight inbound fragments for blocks the session layer has
//! announced via `_sh`. A single lock covers both fragment accumulation
//! and the completion check-and-delete, so two fragments racing to finish
//! the same block can't both observe completion (spec §5, invariant: a
//! completing `ingest` atomically removes the entry before returning).

use crate::codec::decode_b32;
use crate::error::{Result, TunnelError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Outcome of an `ingest` call.
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Incomplete,
    Complete(Vec<u8>),
}

struct Entry {
    slots: Vec<Option<Vec<u8>>>,
    announced_at: Instant,
}

/// Server-side cache of inbound fragments, keyed by block header ID.
pub struct ReassemblyBuffer {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh sparse vector of `size` empty slots under
    /// `block_id`. Re-announcing an existing ID overwrites it — a late or
    /// replayed header truncates whatever was in flight (documented policy,
    /// spec §4.D).
    pub async fn announce(&self, block_id: &str, size: usize) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            block_id.to_string(),
            Entry {
                slots: vec![None; size],
                announced_at: Instant::now(),
            },
        );
    }

    /// Ingest one or more base32-encoded fragments of an announced block.
    /// Each fragment decodes to a 4-byte little-endian sequence number
    /// followed by its payload slice. Unannounced blocks are rejected with
    /// `UnknownBlock` — fragments never speculatively create an entry.
    pub async fn ingest(&self, block_id: &str, fragments: &[String]) -> Result<IngestOutcome> {
        // Decode and validate before touching any shared state, so a bad
        // fragment in a batch can't half-apply.
        let mut decoded = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let raw = decode_b32(fragment)?;
            if raw.len() < 4 {
                return Err(TunnelError::DecodeError);
            }
            let seq = u32::from_le_bytes(raw[..4].try_into().unwrap()) as usize;
            decoded.push((seq, raw[4..].to_vec()));
        }

        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(block_id).ok_or(TunnelError::UnknownBlock)?;

        for (seq, payload) in decoded {
            if seq >= entry.slots.len() {
                return Err(TunnelError::InvalidSequence);
            }
            entry.slots[seq] = Some(payload);
        }

        if entry.slots.iter().any(|slot| slot.is_none()) {
            return Ok(IngestOutcome::Incomplete);
        }

        // Complete: remove before returning so a racing caller sees
        // UnknownBlock rather than delivering the same plaintext twice.
        let entry = entries.remove(block_id).expect("just matched above");
        let plaintext: Vec<u8> = entry
            .slots
            .into_iter()
            .map(|slot| slot.expect("all slots verified non-empty"))
            .flatten()
            .collect();
        Ok(IngestOutcome::Complete(plaintext))
    }

    /// Remove an entry. Always idempotent.
    pub async fn discard(&self, block_id: &str) {
        self.entries.lock().await.remove(block_id);
    }

    /// Remove entries announced longer than `idle_timeout` ago and never
    /// completed.
    pub async fn sweep(&self, idle_timeout: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now.duration_since(entry.announced_at) <= idle_timeout);
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_b32;

    fn fragment(seq: u32, payload: &[u8]) -> String {
        let mut raw = Vec::with_capacity(4 + payload.len());
        raw.extend_from_slice(&seq.to_le_bytes());
        raw.extend_from_slice(payload);
        encode_b32(&raw)
    }

    #[tokio::test]
    async fn test_single_fragment_completes() {
        let buf = ReassemblyBuffer::new();
        buf.announce("blk1", 1).await;
        let outcome = buf
            .ingest("blk1", &[fragment(0, b"ping")])
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Complete(b"ping".to_vec()));
    }

    #[tokio::test]
    async fn test_second_ingest_after_completion_is_unknown_block() {
        let buf = ReassemblyBuffer::new();
        buf.announce("blk1", 1).await;
        buf.ingest("blk1", &[fragment(0, b"ping")]).await.unwrap();
        let second = buf.ingest("blk1", &[fragment(0, b"ping")]).await;
        assert!(matches!(second, Err(TunnelError::UnknownBlock)));
    }

    #[tokio::test]
    async fn test_out_of_order_two_fragment_message() {
        let buf = ReassemblyBuffer::new();
        buf.announce("blk2", 2).await;
        let first = buf.ingest("blk2", &[fragment(1, b"world")]).await.unwrap();
        assert_eq!(first, IngestOutcome::Incomplete);
        let second = buf.ingest("blk2", &[fragment(0, b"hello")]).await.unwrap();
        assert_eq!(second, IngestOutcome::Complete(b"helloworld".to_vec()));
    }

    #[tokio::test]
    async fn test_ingest_without_announce_is_unknown_block() {
        let buf = ReassemblyBuffer::new();
        let outcome = buf.ingest("nope", &[fragment(0, b"x")]).await;
        assert!(matches!(outcome, Err(TunnelError::UnknownBlock)));
    }

    #[tokio::test]
    async fn test_invalid_sequence_rejected() {
        let buf = ReassemblyBuffer::new();
        buf.announce("blk3", 1).await;
        let outcome = buf.ingest("blk3", &[fragment(5, b"x")]).await;
        assert!(matches!(outcome, Err(TunnelError::InvalidSequence)));
    }

    #[tokio::test]
    async fn test_reannounce_truncates_in_flight() {
        let buf = ReassemblyBuffer::new();
        buf.announce("blk4", 2).await;
        buf.ingest("blk4", &[fragment(0, b"a")]).await.unwrap();
        buf.announce("blk4", 1).await; // replayed/late header
        let outcome = buf.ingest("blk4", &[fragment(0, b"z")]).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Complete(b"z".to_vec()));
    }

    #[tokio::test]
    async fn test_permutation_independence() {
        let payload_parts = [b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()];
        let expected: Vec<u8> = payload_parts.concat();

        for perm in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
            let buf = ReassemblyBuffer::new();
            buf.announce("blkp", 3).await;
            let mut last = IngestOutcome::Incomplete;
            for &seq in &perm {
                last = buf
                    .ingest("blkp", &[fragment(seq as u32, &payload_parts[seq])])
                    .await
                    .unwrap();
            }
            assert_eq!(last, IngestOutcome::Complete(expected.clone()));
        }
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let buf = ReassemblyBuffer::new();
        buf.announce("blk5", 1).await;
        buf.discard("blk5").await;
        buf.discard("blk5").await;
        let outcome = buf.ingest("blk5", &[fragment(0, b"x")]).await;
        assert!(matches!(outcome, Err(TunnelError::UnknownBlock)));
    }
}
