//! Crypto Facade (component B).
//!
//! This module is the one place spec §4.B calls out as an external
//! collaborator: RSA-OAEP for the bootstrap key exchange, AES-GCM for the
//! session channel, and a self-signed RSA certificate for the `_domainkey`
//! bootstrap. Every failure here collapses to [`TunnelError::CryptoError`] —
//! callers never see which step failed, so a malformed ciphertext can't be
//! used to fingerprint the implementation.

use crate::error::{Result, TunnelError};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::{EncodePrivateKeyPem, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// RSA key size for the bootstrap keypair. 2048 bits is the floor any
/// modern RSA-OAEP deployment uses; this is not runtime-configurable.
const RSA_KEY_BITS: usize = 2048;

/// The session symmetric key, either AES-128-GCM or AES-256-GCM depending
/// on how many bytes the implant's locally-generated key happened to be.
/// Keys are stored as raw bytes and the cipher is constructed fresh for
/// each seal/open call — cheap, and avoids needing the cipher types to be
/// `Clone`/`Send`-friendly inside the session registry.
#[derive(Clone)]
pub enum SessionKey {
    Bits128([u8; 16]),
    Bits256([u8; 32]),
}

/// Adopt raw bytes as a session AEAD key. Fails if the length isn't 16 or
/// 32 bytes (spec: "128/256-bit symmetric").
pub fn aead_key_from(bytes: &[u8]) -> Result<SessionKey> {
    match bytes.len() {
        16 => {
            let mut key = [0u8; 16];
            key.copy_from_slice(bytes);
            Ok(SessionKey::Bits128(key))
        }
        32 => {
            let mut key = [0u8; 32];
            key.copy_from_slice(bytes);
            Ok(SessionKey::Bits256(key))
        }
        _ => Err(TunnelError::CryptoError),
    }
}

/// Seal plaintext under the session key. The nonce is generated internally
/// and prepended to the returned ciphertext — callers see one opaque blob.
pub fn aead_seal(key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
    match key {
        SessionKey::Bits128(k) => {
            let cipher = Aes128Gcm::new_from_slice(k).expect("key is exactly 16 bytes");
            let nonce = Aes128Gcm::generate_nonce(&mut AeadOsRng);
            let ct = cipher
                .encrypt(&nonce, plaintext)
                .expect("AES-GCM encryption of a bounded plaintext cannot fail");
            [nonce.as_slice(), &ct].concat()
        }
        SessionKey::Bits256(k) => {
            let cipher = Aes256Gcm::new_from_slice(k).expect("key is exactly 32 bytes");
            let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
            let ct = cipher
                .encrypt(&nonce, plaintext)
                .expect("AES-GCM encryption of a bounded plaintext cannot fail");
            [nonce.as_slice(), &ct].concat()
        }
    }
}

/// Open a ciphertext sealed by [`aead_seal`] under the same key.
pub fn aead_open(key: &SessionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < 12 {
        return Err(TunnelError::CryptoError);
    }
    let (nonce, body) = ciphertext.split_at(12);
    match key {
        SessionKey::Bits128(k) => {
            let cipher = Aes128Gcm::new_from_slice(k).map_err(|_| TunnelError::CryptoError)?;
            cipher
                .decrypt(nonce.into(), body)
                .map_err(|_| TunnelError::CryptoError)
        }
        SessionKey::Bits256(k) => {
            let cipher = Aes256Gcm::new_from_slice(k).map_err(|_| TunnelError::CryptoError)?;
            cipher
                .decrypt(nonce.into(), body)
                .map_err(|_| TunnelError::CryptoError)
        }
    }
}

/// The long-lived RSA bootstrap keypair for an apex, plus its self-signed
/// certificate PEM. Generated once at startup (spec: "server_cert_pem(name,
/// apex)… retrieves a long-lived RSA keypair for the apex") and cached for
/// the life of the [`crate::tunnel::Tunnel`].
pub struct CertMaterial {
    pub cert_pem: String,
    pub priv_pem: String,
    private_key: RsaPrivateKey,
}

impl CertMaterial {
    /// Generate a fresh RSA keypair and wrap it in a self-signed certificate
    /// for `apex`, named `name` in its subject.
    ///
    /// A failure here is one of the two fatal startup conditions in spec §7
    /// ("unrecoverable keypair fetch at startup") — callers should propagate
    /// it out of `main`, not retry per-query.
    pub fn generate(name: &str, apex: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|_| TunnelError::CryptoError)?;

        let priv_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|_| TunnelError::CryptoError)?
            .to_string();

        let keypair = KeyPair::from_pem(&priv_pem).map_err(|_| TunnelError::CryptoError)?;

        let mut params =
            CertificateParams::new(vec![apex.to_string()]).map_err(|_| TunnelError::CryptoError)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, format!("{name}.{apex}"));
        params.distinguished_name = dn;

        let cert = params
            .self_signed(&keypair)
            .map_err(|_| TunnelError::CryptoError)?;

        Ok(Self {
            cert_pem: cert.pem(),
            priv_pem,
            private_key,
        })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// Decrypt an RSA-OAEP(SHA-256) sealed blob — the implant's locally
    /// generated symmetric key, wrapped for bootstrap.
    pub fn rsa_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| TunnelError::CryptoError)
    }
}
