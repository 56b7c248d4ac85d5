//! HKDF-SHA512 key derivation with the fixed HAP salt/info labels.

use hap_core::error::CryptoError;

use hkdf::Hkdf;
use sha2::Sha512;

/// A salt/info pair naming one purpose-specific derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub salt: &'static [u8],
    pub info: &'static [u8],
}

/// Per-message key for the pair-setup M5/M6 exchange.
pub const PAIR_SETUP_ENCRYPT: Label = Label {
    salt: b"Pair-Setup-Encrypt-Salt",
    info: b"Pair-Setup-Encrypt-Info",
};

/// Signing input (iOSDeviceX) for the controller's M5 signature.
pub const PAIR_SETUP_CONTROLLER_SIGN: Label = Label {
    salt: b"Pair-Setup-Controller-Sign-Salt",
    info: b"Pair-Setup-Controller-Sign-Info",
};

/// Signing input (AccessoryX) for the accessory's M6 signature.
pub const PAIR_SETUP_ACCESSORY_SIGN: Label = Label {
    salt: b"Pair-Setup-Accessory-Sign-Salt",
    info: b"Pair-Setup-Accessory-Sign-Info",
};

/// Session key protecting the pair-verify sub-messages.
pub const PAIR_VERIFY_ENCRYPT: Label = Label {
    salt: b"Pair-Verify-Encrypt-Salt",
    info: b"Pair-Verify-Encrypt-Info",
};

/// Controller to accessory traffic key.
pub const CONTROL_WRITE: Label = Label {
    salt: b"Control-Salt",
    info: b"Control-Write-Encryption-Key",
};

/// Accessory to controller traffic key.
pub const CONTROL_READ: Label = Label {
    salt: b"Control-Salt",
    info: b"Control-Read-Encryption-Key",
};

/// Derive the 32-byte key for `label`.
pub fn derive(ikm: &[u8], label: Label) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(label.salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(label.info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}
