//! External cryptographic capability: RSA key exchange plus authenticated
//! encryption for the secure channel.
//!
//! The core engine treats cryptographic primitives as an external
//! collaborator; `RsaAesCrypto` is a concrete, runnable implementation
//! (RSA-OAEP key wrapping over a fresh AES-256-GCM session key) built on the
//! `rsa` and `aes-gcm` crates, following ordinary RustCrypto idioms (see
//! DESIGN.md).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{PeerError, Result};

const RSA_BITS: usize = 2048;
const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub type PublicKeyBytes = Vec<u8>;
pub type PrivateKeyBytes = Vec<u8>;

/// External cryptographic capability consumed by the secure channel.
///
/// `seal`/`open` take the session key explicitly rather than storing it on
/// `self`, keeping the capability stateless and easy to share across peers
/// (recorded as a deliberate design choice in DESIGN.md).
pub trait Crypto: Send + Sync + std::fmt::Debug {
    /// Whether this capability can perform the RSA key exchange at all. If
    /// absent, all handshake requests fail cleanly rather than panicking.
    fn can_encrypt(&self) -> bool;

    fn generate_keypair(&self) -> Result<(PublicKeyBytes, PrivateKeyBytes)>;

    /// Wrap `key_material` (an AES session key) for `peer_public`.
    fn wrap(&self, key_material: &[u8], peer_public: &PublicKeyBytes) -> Result<Vec<u8>>;

    /// Unwrap key material previously wrapped for `own_private`'s matching
    /// public key.
    fn unwrap(&self, wrapped: &[u8], own_private: &PrivateKeyBytes) -> Result<Vec<u8>>;

    /// Authenticated-encrypt `plaintext` under `session_key`.
    fn seal(&self, session_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Authenticated-decrypt `ciphertext` under `session_key`.
    fn open(&self, session_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Generate a fresh AES-256 session key to be wrapped and exchanged.
    fn generate_session_key(&self) -> Vec<u8> {
        let mut key = vec![0u8; AES_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }
}

/// RSA-OAEP + AES-256-GCM implementation of [`Crypto`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaAesCrypto;

impl Crypto for RsaAesCrypto {
    fn can_encrypt(&self) -> bool {
        true
    }

    fn generate_keypair(&self) -> Result<(PublicKeyBytes, PrivateKeyBytes)> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| PeerError::InternalError(format!("keygen failed: {e}")))?;
        let public = RsaPublicKey::from(&private);

        let public_der = public
            .to_pkcs1_der()
            .map_err(|e| PeerError::InternalError(format!("public key encode: {e}")))?
            .as_bytes()
            .to_vec();
        let private_der = private
            .to_pkcs1_der()
            .map_err(|e| PeerError::InternalError(format!("private key encode: {e}")))?
            .as_bytes()
            .to_vec();

        Ok((public_der, private_der))
    }

    fn wrap(&self, key_material: &[u8], peer_public: &PublicKeyBytes) -> Result<Vec<u8>> {
        let public = RsaPublicKey::from_pkcs1_der(peer_public)
            .map_err(|e| PeerError::InternalError(format!("bad peer public key: {e}")))?;
        let mut rng = OsRng;
        public
            .encrypt(&mut rng, Oaep::new::<Sha256>(), key_material)
            .map_err(|e| PeerError::InternalError(format!("rsa wrap failed: {e}")).into())
    }

    fn unwrap(&self, wrapped: &[u8], own_private: &PrivateKeyBytes) -> Result<Vec<u8>> {
        let private = RsaPrivateKey::from_pkcs1_der(own_private)
            .map_err(|e| PeerError::InternalError(format!("bad own private key: {e}")))?;
        private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| PeerError::InternalError(format!("rsa unwrap failed: {e}")).into())
    }

    fn seal(&self, session_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(session_key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut out = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| PeerError::InternalError(format!("seal failed: {e}")))?;
        let mut framed = nonce_bytes.to_vec();
        framed.append(&mut out);
        Ok(framed)
    }

    fn open(&self, session_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(PeerError::DecryptionFailed("frame too short".into()).into());
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(session_key));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| PeerError::DecryptionFailed(e.to_string()).into())
    }
}

/// A `Crypto` that cannot encrypt, for peers run without the capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCrypto;

impl Crypto for NullCrypto {
    fn can_encrypt(&self) -> bool {
        false
    }

    fn generate_keypair(&self) -> Result<(PublicKeyBytes, PrivateKeyBytes)> {
        Err(PeerError::EncryptionUnavailable.into())
    }

    fn wrap(&self, _key_material: &[u8], _peer_public: &PublicKeyBytes) -> Result<Vec<u8>> {
        Err(PeerError::EncryptionUnavailable.into())
    }

    fn unwrap(&self, _wrapped: &[u8], _own_private: &PrivateKeyBytes) -> Result<Vec<u8>> {
        Err(PeerError::EncryptionUnavailable.into())
    }

    fn seal(&self, _session_key: &[u8], _plaintext: &[u8]) -> Result<Vec<u8>> {
        Err(PeerError::EncryptionUnavailable.into())
    }

    fn open(&self, _session_key: &[u8], _ciphertext: &[u8]) -> Result<Vec<u8>> {
        Err(PeerError::EncryptionUnavailable.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_wrap_unwrap_roundtrip() {
        let crypto = RsaAesCrypto;
        let (pub_a, priv_a) = crypto.generate_keypair().unwrap();
        let session_key = crypto.generate_session_key();

        let wrapped = crypto.wrap(&session_key, &pub_a).unwrap();
        let recovered = crypto.unwrap(&wrapped, &priv_a).unwrap();
        assert_eq!(recovered, session_key);
    }

    #[test]
    fn aes_seal_open_roundtrip() {
        let crypto = RsaAesCrypto;
        let key = crypto.generate_session_key();
        let plaintext = br#"{"jsonrpc":"2.0","method":"PING","params":["aaaa"],"id":"0A1"}"#;

        let ciphertext = crypto.seal(&key, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let opened = crypto.open(&key, &ciphertext).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let crypto = RsaAesCrypto;
        let key = crypto.generate_session_key();
        let other_key = crypto.generate_session_key();
        let ciphertext = crypto.seal(&key, b"hello").unwrap();
        assert!(crypto.open(&other_key, &ciphertext).is_err());
    }

    #[test]
    fn null_crypto_cannot_encrypt() {
        let crypto = NullCrypto;
        assert!(!crypto.can_encrypt());
        assert!(crypto.generate_keypair().is_err());
    }
}
