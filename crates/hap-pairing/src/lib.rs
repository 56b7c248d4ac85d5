//! # hap-pairing
//!
//! HomeKit Accessory Protocol pairing for controllers.
//!
//! This crate implements:
//! - Pair-setup (SRP-6a with the setup code, then long-term key exchange)
//! - Pair-verify (Curve25519 + Ed25519, producing session keys)
//! - A per-connection `PairingSession` that routes responses to either one
//! - Persistence of long-term pairing records, one per accessory

mod identity;
mod message;
mod pair_setup;
mod pair_verify;
mod session;
mod store;

#[cfg(any(test, feature = "mock"))]
pub mod mock_accessory;

pub use identity::{LongTermIdentity, Pairing, PeerLongTermPublicKey};
pub use pair_setup::{PairSetup, PairSetupOutcome, SetupStep};
pub use pair_verify::{PairVerify, VerifyStep};
pub use session::{PairingMode, PairingSession, PairingStep};
pub use store::{FilePairingStore, MemoryPairingStore, PairingRecord, PairingStore};

#[cfg(any(test, feature = "mock"))]
pub use store::MockPairingStore;
