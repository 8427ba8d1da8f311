//! The tunnel controller object.
//!
//! Owns every piece of server-side state — the RSA/cert material, the three
//! stores, and the session registry — behind one `Arc` so the listener can
//! hand a clone to every spawned query task (spec §3, §9: "construct once,
//! share via Arc").

use crate::config::TunnelConfig;
use crate::crypto::CertMaterial;
use crate::reassembly::ReassemblyBuffer;
use crate::send_store::SendBlockStore;
use crate::session::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;

pub struct Tunnel {
    pub config: TunnelConfig,
    pub apex: String,
    pub cert: CertMaterial,
    pub send_store: SendBlockStore,
    pub reassembly: ReassemblyBuffer,
    pub sessions: SessionRegistry,
}

impl Tunnel {
    /// Build the controller: generate (or, in a real deployment, load) the
    /// apex RSA keypair and wire up the three stores. RSA key generation is
    /// CPU-bound, so it runs on the blocking pool rather than stalling the
    /// async reactor.
    pub async fn new(config: TunnelConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let apex = config.normalized_apex();
        let keypair_name = config.rsa_keypair_name.clone();
        let apex_for_cert = apex.clone();

        let cert = tokio::task::spawn_blocking(move || {
            CertMaterial::generate(&keypair_name, &apex_for_cert)
        })
        .await??;

        Ok(Self {
            send_store: SendBlockStore::new(config.block_chunk_bytes),
            reassembly: ReassemblyBuffer::new(),
            sessions: SessionRegistry::new(),
            apex,
            cert,
            config,
        })
    }

    /// Spawn the two independent idle sweeps (spec §9: sessions and
    /// reassembly entries age out on separate clocks; send-blocks age out on
    /// a third). Each loop owns its own tick interval and runs for the life
    /// of the process.
    pub fn spawn_sweeps(self: &Arc<Self>) {
        let sweep_period = Duration::from_secs(30);

        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_period);
            loop {
                ticker.tick().await;
                tunnel.sessions.sweep(tunnel.config.session_idle_timeout).await;
            }
        });

        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_period);
            loop {
                ticker.tick().await;
                tunnel.reassembly.sweep(tunnel.config.reasm_idle_timeout).await;
            }
        });

        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_period);
            loop {
                ticker.tick().await;
                tunnel.send_store.sweep(tunnel.config.send_block_ttl).await;
            }
        });
    }
}
