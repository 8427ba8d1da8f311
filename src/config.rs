//! Tunnel controller configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_bind_address() -> String {
    ":53".to_string()
}

fn default_block_chunk_bytes() -> usize {
    185
}

fn default_session_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_reasm_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_send_block_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Runtime configuration for a tunnel controller.
///
/// Nothing else is runtime-tunable (spec §6); `send_block_ttl` and
/// `log_level` are the only additions over the distilled spec's config
/// table, both ambient knobs the component design implies but the
/// distillation left off the table (see SPEC_FULL.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// The DNS zone this controller is authoritative for, e.g. "tunnel.example".
    pub apex_domain: String,

    /// UDP bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Maximum raw payload bytes per send-block chunk (before encoding).
    #[serde(default = "default_block_chunk_bytes")]
    pub block_chunk_bytes: usize,

    /// How long a session may go without a check-in before it is closed.
    #[serde(with = "humantime_serde", default = "default_session_idle_timeout")]
    pub session_idle_timeout: Duration,

    /// How long an announced reassembly block may sit incomplete before
    /// being discarded.
    #[serde(with = "humantime_serde", default = "default_reasm_idle_timeout")]
    pub reasm_idle_timeout: Duration,

    /// How long a send-block may sit unclaimed before the sweep reclaims it.
    #[serde(with = "humantime_serde", default = "default_send_block_ttl")]
    pub send_block_ttl: Duration,

    /// Name under which the RSA bootstrap keypair is provisioned/cached.
    pub rsa_keypair_name: String,

    /// Overrides the `-v` CLI counter when set.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            apex_domain: "tunnel.example".to_string(),
            bind_address: default_bind_address(),
            block_chunk_bytes: default_block_chunk_bytes(),
            session_idle_timeout: default_session_idle_timeout(),
            reasm_idle_timeout: default_reasm_idle_timeout(),
            send_block_ttl: default_send_block_ttl(),
            rsa_keypair_name: "default".to_string(),
            log_level: None,
        }
    }
}

impl TunnelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.apex_domain.trim_matches('.').is_empty() {
            return Err("apex_domain must not be empty".to_string());
        }
        if self.block_chunk_bytes == 0 || self.block_chunk_bytes > 185 {
            return Err("block_chunk_bytes must be in 1..=185 (invariant 1, spec §3)".to_string());
        }
        if self.rsa_keypair_name.trim().is_empty() {
            return Err("rsa_keypair_name must not be empty".to_string());
        }
        Ok(())
    }

    /// Normalized apex, lowercased and without a trailing dot.
    pub fn normalized_apex(&self) -> String {
        self.apex_domain.trim_matches('.').to_ascii_lowercase()
    }
}
