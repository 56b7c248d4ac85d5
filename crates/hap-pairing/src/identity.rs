//! Long-term identities exchanged during pair-setup.
//!
//! The controller's [`LongTermIdentity`] holds the Ed25519 keypair (LTSK/LTPK)
//! and a device identifier. The same identifier must be used in both:
//! - pair-setup M5, when the accessory records the controller
//! - pair-verify M3, when the accessory looks the controller up again
//!
//! If the identifiers don't match, the accessory rejects pair-verify.

use hap_core::error::{ParseError, Result};
use hap_crypto::ed25519::IdentityKeyPair;
use uuid::Uuid;

/// Controller long-term identity.
#[derive(Clone)]
pub struct LongTermIdentity {
    /// Device identifier, upper-case UUID form.
    device_id: String,
    keypair: IdentityKeyPair,
}

impl LongTermIdentity {
    /// Generate a fresh keypair and a random device identifier.
    pub fn generate() -> Self {
        Self {
            device_id: Uuid::new_v4().to_string().to_uppercase(),
            keypair: IdentityKeyPair::generate(),
        }
    }

    pub fn from_parts(device_id: impl Into<String>, keypair: IdentityKeyPair) -> Self {
        Self {
            device_id: device_id.into(),
            keypair,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Identifier as sent in the `Identifier` TLV item.
    pub fn id_bytes(&self) -> &[u8] {
        self.device_id.as_bytes()
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }
}

impl std::fmt::Debug for LongTermIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermIdentity")
            .field("device_id", &self.device_id)
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// The accessory's pairing identifier and verified Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLongTermPublicKey {
    pub id: String,
    pub public_key: [u8; 32],
}

impl PeerLongTermPublicKey {
    /// Build from the raw `Identifier` and `PublicKey` items of pair-setup M6.
    pub fn from_tlv(id: &[u8], public_key: &[u8]) -> Result<Self> {
        let id = String::from_utf8(id.to_vec()).map_err(|_| {
            ParseError::InvalidFormat("accessory pairing identifier is not UTF-8".to_string())
        })?;
        let public_key: [u8; 32] = public_key.try_into().map_err(|_| {
            ParseError::InvalidValue(format!(
                "accessory LTPK must be 32 bytes, got {}",
                public_key.len()
            ))
        })?;
        Ok(Self { id, public_key })
    }

    pub fn id_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }
}

/// Long-term keys for one accessory: the identity we registered with it in
/// pair-setup and the key it answered with.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub identity: LongTermIdentity,
    pub peer: PeerLongTermPublicKey,
}
