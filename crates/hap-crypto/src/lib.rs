//! # hap-crypto
//!
//! Cryptographic building blocks for HomeKit Accessory Protocol pairing.
//!
//! This crate provides:
//! - TLV8 encoding for pairing messages
//! - SRP-6a (3072-bit) for pair-setup
//! - X25519 key agreement and Ed25519 signatures for pair-verify
//! - HKDF-SHA512 with the fixed HAP salt/info labels
//! - ChaCha20-Poly1305 for pairing sub-messages and session framing
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::SessionCipher;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use tlv::{Tlv8, TlvType};
