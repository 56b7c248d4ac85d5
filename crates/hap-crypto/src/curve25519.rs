//! X25519 ephemeral key agreement for pair-verify.

use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::keys::SharedSecret;

/// Ephemeral Curve25519 key pair, consumed by [`EcdhKeyPair::diffie_hellman`].
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&static_secret);
        Self {
            public: public.to_bytes(),
            secret: *secret,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Compute the shared secret with `peer_public`.
    ///
    /// Rejects keys that are not 32 bytes and low-order points (all-zero output).
    pub fn diffie_hellman(self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: peer_public.len(),
            })?;

        if peer.iter().all(|&b| b == 0) {
            return Err(CryptoError::Encryption(
                "Invalid peer public key: all zeros".to_string(),
            ));
        }

        let static_secret = StaticSecret::from(self.secret);
        let shared = Zeroizing::new(static_secret.diffie_hellman(&PublicKey::from(peer)).to_bytes());

        if shared.iter().all(|&b| b == 0) {
            return Err(CryptoError::Encryption(
                "Weak ECDH: shared secret is all zeros (low-order point)".to_string(),
            ));
        }

        Ok(SharedSecret::new(shared.to_vec()))
    }
}
