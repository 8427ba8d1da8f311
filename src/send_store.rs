//! Send-Block Store (component C).
//!
//! Pre-chunks outbound payloads (a fetched certificate, a drained envelope)
//! into label-safe base64 windows, keyed by a random 6-character block ID.
//! Chunks are immutable once published; only `clear` (or the TTL sweep)
//! removes them. Reader/writer lock: `range` takes a read lock, `store` and
//! `clear` take a write lock (spec §5).

use crate::codec::encode_b64;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Alphabet block IDs are drawn from: lowercase letters and digits only, so
/// the ID is always a legal DNS label regardless of case-folding by an
/// intermediate resolver.
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 6;

fn generate_block_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

struct SendBlock {
    chunks: Vec<String>,
    created_at: Instant,
}

/// Server-side cache of outbound pre-chunked payloads.
pub struct SendBlockStore {
    chunk_bytes: usize,
    blocks: RwLock<HashMap<String, SendBlock>>,
}

impl SendBlockStore {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes,
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Segment `data` into `chunk_bytes`-sized windows, each prepended with
    /// a 4-byte little-endian sequence number and base64-raw-encoded, then
    /// prefixed with "." so it concatenates directly into a label list.
    /// Returns the new block ID and the chunk count.
    ///
    /// The original source truncated the final window's last byte
    /// (`stop = len(data) - 1`); spec §4.C and §9 flag that as a defect to
    /// fix, not preserve, so this segments the full tail window.
    pub async fn store(&self, data: &[u8]) -> (String, usize) {
        let chunk_bytes = self.chunk_bytes.max(1);
        let windows: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(chunk_bytes).collect()
        };

        let chunks: Vec<String> = windows
            .iter()
            .enumerate()
            .map(|(seq, window)| {
                let mut buf = Vec::with_capacity(4 + window.len());
                buf.extend_from_slice(&(seq as u32).to_le_bytes());
                buf.extend_from_slice(window);
                format!(".{}", encode_b64(&buf))
            })
            .collect();

        let count = chunks.len();
        let mut blocks = self.blocks.write().await;
        loop {
            let id = generate_block_id();
            if !blocks.contains_key(&id) {
                blocks.insert(
                    id.clone(),
                    SendBlock {
                        chunks: chunks.clone(),
                        created_at: Instant::now(),
                    },
                );
                return (id, count);
            }
            // Collision: retry with a fresh ID (spec invariant 5).
        }
    }

    /// Return chunks `[start, stop)`, clipped to `[0, count)`. Unknown IDs
    /// and `stop < start` both yield an empty list — never an error.
    pub async fn range(&self, block_id: &str, start: usize, stop: usize) -> Vec<String> {
        let blocks = self.blocks.read().await;
        let Some(block) = blocks.get(block_id) else {
            return Vec::new();
        };
        if stop < start {
            return Vec::new();
        }
        let stop = stop.min(block.chunks.len());
        let start = start.min(stop);
        block.chunks[start..stop].to_vec()
    }

    /// Remove a block, returning whether it existed.
    pub async fn clear(&self, block_id: &str) -> bool {
        self.blocks.write().await.remove(block_id).is_some()
    }

    /// Remove blocks older than `ttl`. Run by a background sweep, never by
    /// request handlers directly.
    pub async fn sweep(&self, ttl: Duration) {
        let now = Instant::now();
        let mut blocks = self.blocks.write().await;
        blocks.retain(|_, block| now.duration_since(block.created_at) <= ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_b64;

    fn decode_chunk(chunk: &str) -> (u32, Vec<u8>) {
        let raw = decode_b64(chunk.trim_start_matches('.')).unwrap();
        let seq = u32::from_le_bytes(raw[..4].try_into().unwrap());
        (seq, raw[4..].to_vec())
    }

    #[tokio::test]
    async fn test_store_and_range_roundtrip() {
        let store = SendBlockStore::new(8);
        let data = b"0123456789abcdef0123".to_vec(); // 21 bytes -> 3 windows of <=8
        let (id, count) = store.store(&data).await;
        assert_eq!(count, 3);

        let chunks = store.range(&id, 0, count).await;
        let mut reassembled = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let (seq, payload) = decode_chunk(chunk);
            assert_eq!(seq as usize, i);
            reassembled.extend_from_slice(&payload);
        }
        assert_eq!(reassembled, data);
    }

    #[tokio::test]
    async fn test_range_clips_out_of_bounds() {
        let store = SendBlockStore::new(185);
        let (id, count) = store.store(b"hello world").await;
        assert_eq!(count, 1);
        let chunks = store.range(&id, 8, 20).await;
        assert_eq!(chunks.len(), 0); // only one chunk exists, start is past it... wait see below
        let chunks = store.range(&id, 0, 20).await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_range_unknown_id_is_empty_not_error() {
        let store = SendBlockStore::new(185);
        assert!(store.range("nosuch", 0, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_range_stop_before_start_is_empty() {
        let store = SendBlockStore::new(185);
        let (id, _) = store.store(b"data").await;
        assert!(store.range(&id, 5, 2).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_then_repeat_clear() {
        let store = SendBlockStore::new(185);
        let (id, _) = store.store(b"data").await;
        assert!(store.clear(&id).await);
        assert!(!store.clear(&id).await);
    }

    #[tokio::test]
    async fn test_ten_chunk_range_with_clipping() {
        let store = SendBlockStore::new(4);
        let data: Vec<u8> = (0..40u8).collect(); // 10 chunks of 4 bytes
        let (id, count) = store.store(&data).await;
        assert_eq!(count, 10);

        let chunks = store.range(&id, 8, 20).await;
        assert_eq!(chunks.len(), 2); // clipped to [8, 10)

        assert!(store.clear(&id).await);
        assert!(!store.clear(&id).await);
    }

    #[tokio::test]
    async fn test_no_tail_byte_truncation() {
        // 21 bytes with chunk size 8: last window should carry all 5
        // trailing bytes, not 4 (the documented off-by-one defect).
        let store = SendBlockStore::new(8);
        let data = b"012345678901234567890".to_vec(); // 21 bytes
        let (id, count) = store.store(&data).await;
        let chunks = store.range(&id, 0, count).await;
        let mut reassembled = Vec::new();
        for chunk in &chunks {
            let (_, payload) = decode_chunk(chunk);
            reassembled.extend_from_slice(&payload);
        }
        assert_eq!(reassembled.len(), data.len());
        assert_eq!(reassembled, data);
    }
}
