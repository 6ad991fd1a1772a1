//! Secure channel state machine: `PLAIN -> KEY_SENT -> ACTIVE`, realized
//! here with the intermediate bookkeeping states needed to carry both
//! public keys and the derived session key through the handshake.
//!
//! The literal `RSA.EXCH`/`RSA.CONF` wire messages (a bare public key, then
//! a bare boolean) don't by themselves establish a shared AES session key
//! from two independently generated RSA keypairs. This implementation
//! resolves that by having the initiator generate the AES session key,
//! wrap it for the responder's public key with [`crate::crypto::Crypto::wrap`],
//! and carry the wrapped key as a second `RSA.CONF` param element
//! (`[true, wrapped_key_base64]`) -- see DESIGN.md's Open Question
//! resolutions.

use std::sync::Arc;

use base64::Engine;
use tokio::sync::Mutex;

use crate::crypto::{Crypto, PrivateKeyBytes, PublicKeyBytes};
use crate::error::{PeerError, Result};

#[derive(Debug, Clone)]
enum SecureState {
    Plain,
    /// Initiator has generated its own keypair and sent it, awaiting the
    /// peer's public key in the `RSA.EXCH` response.
    KeySent {
        own_public: PublicKeyBytes,
        own_private: PrivateKeyBytes,
    },
    /// Both own and peer public keys are known; activation is possible.
    PeerKeyKnown {
        own_private: PrivateKeyBytes,
        peer_public: PublicKeyBytes,
    },
    /// The session key has been derived locally but the ACTIVE transition
    /// has not yet been observed to complete: activation is triggered by
    /// *observed send completion*, not by construction, so a confirmation
    /// response is guaranteed to go out on the wire before the channel
    /// starts encrypting.
    PendingActivate { session_key: Vec<u8> },
    Active { session_key: Vec<u8> },
}

/// The encryption layer sitting between the codec and the transport.
pub struct SecureChannel {
    state: Mutex<SecureState>,
    crypto: Arc<dyn Crypto>,
}

impl SecureChannel {
    pub fn new(crypto: Arc<dyn Crypto>) -> Self {
        Self {
            state: Mutex::new(SecureState::Plain),
            crypto,
        }
    }

    pub fn can_encrypt(&self) -> bool {
        self.crypto.can_encrypt()
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, SecureState::Active { .. })
    }

    /// Initiator: begin the handshake, returning the own public key to send
    /// as `RSA.EXCH`'s params.
    pub async fn start_initiator_exchange(&self) -> Result<PublicKeyBytes> {
        if !self.can_encrypt() {
            return Err(PeerError::EncryptionUnavailable.into());
        }
        let (own_public, own_private) = self.crypto.generate_keypair()?;
        *self.state.lock().await = SecureState::KeySent {
            own_public: own_public.clone(),
            own_private,
        };
        Ok(own_public)
    }

    /// Initiator: the `RSA.EXCH` response carried the responder's public
    /// key; store it.
    pub async fn complete_initiator_exchange(&self, peer_public: PublicKeyBytes) -> Result<()> {
        let mut state = self.state.lock().await;
        let SecureState::KeySent { own_private, .. } = &*state else {
            return Err(PeerError::CannotActivate.into());
        };
        *state = SecureState::PeerKeyKnown {
            own_private: own_private.clone(),
            peer_public,
        };
        Ok(())
    }

    /// Responder: an inbound `RSA.EXCH` request carried the initiator's
    /// public key. If crypto is available, generate our own keypair, store
    /// the peer's key, and return our own public key for the response.
    pub async fn accept_exchange(&self, peer_public: PublicKeyBytes) -> Result<PublicKeyBytes> {
        if !self.can_encrypt() {
            return Err(PeerError::EncryptionUnavailable.into());
        }
        let (own_public, own_private) = self.crypto.generate_keypair()?;
        *self.state.lock().await = SecureState::PeerKeyKnown {
            own_private,
            peer_public,
        };
        Ok(own_public)
    }

    /// Whether the channel currently has both keys and is not yet active:
    /// the activation precondition checked on `RSA.CONF`.
    pub async fn can_activate(&self) -> bool {
        matches!(*self.state.lock().await, SecureState::PeerKeyKnown { .. })
    }

    /// Initiator: derive a fresh session key and wrap it for the peer,
    /// producing the payload to send as `RSA.CONF`'s second param.
    pub async fn prepare_confirm(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;
        let SecureState::PeerKeyKnown { peer_public, .. } = &*state else {
            return Err(PeerError::CannotActivate.into());
        };
        let session_key = self.crypto.generate_session_key();
        let wrapped = self.crypto.wrap(&session_key, peer_public)?;
        *state = SecureState::PendingActivate { session_key };
        Ok(wrapped)
    }

    /// Responder: an inbound `RSA.CONF` request carried the wrapped session
    /// key. Unwrap it and stage activation without flipping the state yet;
    /// activation must happen only after the confirmation response has been
    /// handed to the writer.
    pub async fn try_prepare_activation(&self, wrapped_key: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        let SecureState::PeerKeyKnown { own_private, .. } = &*state else {
            return Err(PeerError::CannotActivate.into());
        };
        let session_key = self.crypto.unwrap(&wrapped_key, own_private)?;
        *state = SecureState::PendingActivate { session_key };
        Ok(())
    }

    /// Flip `PendingActivate -> Active`. Called by the initiator on receipt
    /// of a truthful `RSA.CONF` response, and by the responder immediately
    /// after its confirmation response has been enqueued for sending.
    pub async fn activate_if_pending(&self) -> bool {
        let mut state = self.state.lock().await;
        if let SecureState::PendingActivate { session_key } = &*state {
            let session_key = session_key.clone();
            *state = SecureState::Active { session_key };
            true
        } else {
            false
        }
    }

    /// Encrypt an outbound frame if the channel is active; otherwise pass
    /// it through unchanged as text.
    pub async fn encode_outbound(&self, plaintext: &str) -> Result<String> {
        let state = self.state.lock().await;
        match &*state {
            SecureState::Active { session_key } => {
                let sealed = self.crypto.seal(session_key, plaintext.as_bytes())?;
                Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
            }
            _ => Ok(plaintext.to_string()),
        }
    }

    /// Decrypt an inbound frame if the channel is active; otherwise pass it
    /// through unchanged. Returns `Err` on a decryption failure, which the
    /// caller surfaces as a non-fatal per-frame event.
    pub async fn decode_inbound(&self, frame: &str) -> Result<String> {
        let state = self.state.lock().await;
        match &*state {
            SecureState::Active { session_key } => {
                let raw = base64::engine::general_purpose::STANDARD
                    .decode(frame)
                    .map_err(|e| PeerError::DecryptionFailed(e.to_string()))?;
                let opened = self.crypto.open(session_key, &raw)?;
                String::from_utf8(opened)
                    .map_err(|e| PeerError::DecryptionFailed(e.to_string()).into())
            }
            _ => Ok(frame.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaAesCrypto;

    #[tokio::test]
    async fn full_handshake_activates_both_sides() {
        let initiator = SecureChannel::new(Arc::new(RsaAesCrypto));
        let responder = SecureChannel::new(Arc::new(RsaAesCrypto));

        let init_pub = initiator.start_initiator_exchange().await.unwrap();
        let resp_pub = responder.accept_exchange(init_pub).await.unwrap();
        initiator.complete_initiator_exchange(resp_pub).await.unwrap();

        assert!(responder.can_activate().await);
        let wrapped = initiator.prepare_confirm().await.unwrap();

        responder.try_prepare_activation(wrapped).await.unwrap();
        assert!(responder.activate_if_pending().await);
        assert!(responder.is_active().await);

        assert!(initiator.activate_if_pending().await);
        assert!(initiator.is_active().await);
    }

    #[tokio::test]
    async fn encrypted_roundtrip_after_handshake() {
        let initiator = SecureChannel::new(Arc::new(RsaAesCrypto));
        let responder = SecureChannel::new(Arc::new(RsaAesCrypto));

        let init_pub = initiator.start_initiator_exchange().await.unwrap();
        let resp_pub = responder.accept_exchange(init_pub).await.unwrap();
        initiator.complete_initiator_exchange(resp_pub).await.unwrap();
        let wrapped = initiator.prepare_confirm().await.unwrap();
        responder.try_prepare_activation(wrapped).await.unwrap();
        responder.activate_if_pending().await;
        initiator.activate_if_pending().await;

        let plaintext = r#"{"jsonrpc":"2.0","method":"PING","params":["aaaa"],"id":"0A1"}"#;
        let wire = initiator.encode_outbound(plaintext).await.unwrap();
        assert_ne!(wire, plaintext, "wire bytes must not equal plaintext once active");

        let decoded = responder.decode_inbound(&wire).await.unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[tokio::test]
    async fn cannot_activate_without_peer_key() {
        let channel = SecureChannel::new(Arc::new(RsaAesCrypto));
        assert!(!channel.can_activate().await);
        assert!(channel.prepare_confirm().await.is_err());
    }

    #[tokio::test]
    async fn no_crypto_capability_fails_cleanly() {
        let channel = SecureChannel::new(Arc::new(crate::crypto::NullCrypto));
        assert!(!channel.can_encrypt());
        assert!(channel.start_initiator_exchange().await.is_err());
        assert!(channel.accept_exchange(vec![1, 2, 3]).await.is_err());
    }

    #[tokio::test]
    async fn plaintext_passthrough_before_activation() {
        let channel = SecureChannel::new(Arc::new(RsaAesCrypto));
        let line = r#"{"jsonrpc":"2.0","method":"PING"}"#;
        assert_eq!(channel.encode_outbound(line).await.unwrap(), line);
        assert_eq!(channel.decode_inbound(line).await.unwrap(), line);
    }
}
