//! HomeKit pair-verify protocol (M1-M4).
//!
//! Pair-verify establishes a fresh session on every connection using an
//! ephemeral Curve25519 exchange. Each side proves possession of the
//! long-term key the other learned during pair-setup by signing both
//! ephemeral public keys.
//!
//! The controller may hold pairings with several accessories and cannot tell
//! which one it reached until M2 names it, so the state machine takes every
//! known pairing and picks one by the accessory's identifier.

use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::nonces,
    curve25519::EcdhKeyPair,
    ed25519,
    hkdf,
    keys::{EncryptionKey, SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvType},
};
use tracing::{debug, info, warn};

use crate::identity::{Pairing, PeerLongTermPublicKey};
use crate::message::{check_response, open_sub_tlv, seal_sub_tlv};

/// What to do after feeding a response to [`PairVerify::handle_response`].
pub enum VerifyStep {
    /// Send this body to `/pair-verify`.
    Send(Vec<u8>),
    /// Both sides verified; switch the connection to these keys.
    Complete(SessionKeys),
}

/// Pair-verify state machine.
pub struct PairVerify {
    state: VerifyState,
    pairings: Vec<Pairing>,
    /// Index of the pairing whose accessory answered M2.
    matched: Option<usize>,
}

enum VerifyState {
    Initial(EcdhKeyPair),
    AwaitingM2(EcdhKeyPair),
    AwaitingM4(SharedSecret),
    Complete,
    Failed,
}

impl PairVerify {
    pub fn new(pairings: Vec<Pairing>) -> Self {
        Self::with_ephemeral(pairings, EcdhKeyPair::generate())
    }

    /// Use a caller-supplied ephemeral keypair.
    pub fn with_ephemeral(pairings: Vec<Pairing>, ephemeral: EcdhKeyPair) -> Self {
        Self {
            state: VerifyState::Initial(ephemeral),
            pairings,
            matched: None,
        }
    }

    /// The accessory that identified itself in M2, once M2 has been read.
    ///
    /// Set even when its signature is then rejected.
    pub fn peer(&self) -> Option<&PeerLongTermPublicKey> {
        self.matched.map(|index| &self.pairings[index].peer)
    }

    /// Generate M1: `{State=1, PublicKey}`.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        match std::mem::replace(&mut self.state, VerifyState::Failed) {
            VerifyState::Initial(ecdh) => {
                let m1 = Tlv8::pair_verify_m1(&ecdh.public_key());
                debug!(state = 1, "sending pair-verify M1");
                self.state = VerifyState::AwaitingM2(ecdh);
                Ok(m1.encode())
            }
            _ => Err(PairingError::InvalidState(
                "M1 can only be generated from the initial state".to_string(),
            )
            .into()),
        }
    }

    /// Feed the accessory's response to the last message sent.
    pub fn handle_response(&mut self, body: &[u8]) -> Result<VerifyStep> {
        match std::mem::replace(&mut self.state, VerifyState::Failed) {
            VerifyState::AwaitingM2(ecdh) => {
                let (m3, shared) = self.process_m2(ecdh, body)?;
                self.state = VerifyState::AwaitingM4(shared);
                Ok(VerifyStep::Send(m3))
            }
            VerifyState::AwaitingM4(shared) => {
                check_response(body, 4)?;
                let keys = SessionKeys::derive_control_keys(&shared)?;
                // `shared` is dropped (and zeroized) here.
                if let Some(peer) = self.peer() {
                    info!(peer_id = %peer.id, "pair-verify complete");
                }
                self.state = VerifyState::Complete;
                Ok(VerifyStep::Complete(keys))
            }
            other => {
                let name = state_name(&other);
                Err(PairingError::InvalidState(format!(
                    "no pair-verify response expected in state {}",
                    name
                ))
                .into())
            }
        }
    }

    pub fn state(&self) -> &'static str {
        state_name(&self.state)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, VerifyState::Complete)
    }

    /// M2 `{State=2, PublicKey, EncryptedData}` in, M3 `{State=3, EncryptedData}` out.
    fn process_m2(&mut self, ecdh: EcdhKeyPair, body: &[u8]) -> Result<(Vec<u8>, SharedSecret)> {
        let tlv = check_response(body, 2)?;
        debug!(state = 2, "received pair-verify M2");

        let own_public = ecdh.public_key();
        let peer_public = tlv.require(TlvType::PublicKey)?;
        let shared = ecdh.diffie_hellman(peer_public)?;

        let key = EncryptionKey::new(hkdf::derive(shared.as_bytes(), hkdf::PAIR_VERIFY_ENCRYPT)?);
        let inner = open_sub_tlv(key.as_bytes(), nonces::PV_MSG02, &tlv)?;
        let peer_id = inner.require(TlvType::Identifier)?;
        let signature = inner.require(TlvType::Signature)?;

        let Some(index) = self
            .pairings
            .iter()
            .position(|pairing| pairing.peer.id_bytes() == peer_id)
        else {
            warn!(
                peer_id = %String::from_utf8_lossy(peer_id),
                known = self.pairings.len(),
                "pair-verify M2 from unknown accessory"
            );
            return Err(PairingError::NotPaired.into());
        };
        self.matched = Some(index);
        let Pairing { identity, peer } = &self.pairings[index];
        debug!(peer_id = %peer.id, "accessory identified");

        // AccessoryCurvePK || AccessoryPairingID || iOSDeviceCurvePK
        let mut info = Vec::with_capacity(peer_public.len() + peer_id.len() + 32);
        info.extend_from_slice(peer_public);
        info.extend_from_slice(peer_id);
        info.extend_from_slice(&own_public);
        ed25519::verify(&peer.public_key, &info, signature)
            .map_err(|_| Error::from(PairingError::ServerSignatureInvalid))?;

        // iOSDeviceCurvePK || iOSDevicePairingID || AccessoryCurvePK
        let mut info = Vec::with_capacity(32 + identity.id_bytes().len() + peer_public.len());
        info.extend_from_slice(&own_public);
        info.extend_from_slice(identity.id_bytes());
        info.extend_from_slice(peer_public);
        let own_signature = identity.sign(&info);

        let inner = Tlv8::new()
            .with(TlvType::Identifier, identity.id_bytes().to_vec())
            .with(TlvType::Signature, own_signature.to_vec());
        let encrypted = seal_sub_tlv(key.as_bytes(), nonces::PV_MSG03, &inner)?;

        let m3 = Tlv8::new()
            .with(TlvType::State, vec![0x03])
            .with(TlvType::EncryptedData, encrypted);

        debug!(state = 3, "sending pair-verify M3");
        Ok((m3.encode(), shared))
    }
}

impl std::fmt::Debug for PairVerify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairVerify")
            .field("state", &self.state())
            .field("known_peers", &self.pairings.len())
            .field("peer_id", &self.peer().map(|peer| &peer.id))
            .finish_non_exhaustive()
    }
}

fn state_name(state: &VerifyState) -> &'static str {
    match state {
        VerifyState::Initial(_) => "initial",
        VerifyState::AwaitingM2(_) => "awaiting_m2",
        VerifyState::AwaitingM4(_) => "awaiting_m4",
        VerifyState::Complete => "complete",
        VerifyState::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LongTermIdentity;
    use crate::mock_accessory::{MockAccessory, VerifyFault};
    use hap_core::error::ProtocolError;

    /// Pairing between `identity` and `accessory`.
    fn pairing_with(identity: LongTermIdentity, accessory: &MockAccessory) -> Pairing {
        Pairing {
            identity,
            peer: PeerLongTermPublicKey {
                id: accessory.id.clone(),
                public_key: accessory.keypair.public_key(),
            },
        }
    }

    /// An accessory trusting a fresh controller identity, and that pairing.
    fn trusted_accessory(id: &str) -> (Pairing, MockAccessory) {
        let identity = LongTermIdentity::generate();
        let mut accessory = MockAccessory::paired_with(identity.id_bytes(), identity.public_key());
        accessory.id = id.to_string();
        (pairing_with(identity, &accessory), accessory)
    }

    /// A controller identity and an accessory that already trust each other.
    fn paired() -> (PairVerify, MockAccessory) {
        let (pairing, accessory) = trusted_accessory("AA:BB:CC:DD:EE:FF");
        (PairVerify::new(vec![pairing]), accessory)
    }

    fn run(verify: &mut PairVerify, accessory: &mut MockAccessory) -> Result<SessionKeys> {
        let mut request = verify.start()?;
        loop {
            let response = accessory.pair_verify(&request);
            match verify.handle_response(&response)? {
                VerifyStep::Send(next) => request = next,
                VerifyStep::Complete(keys) => return Ok(keys),
            }
        }
    }

    mod m1 {
        use super::*;

        #[test]
        fn m1_carries_ephemeral_public_key() {
            let (pairing, _) = trusted_accessory("AA:BB:CC:DD:EE:FF");
            let ephemeral = EcdhKeyPair::from_secret(&[0x42u8; 32]);
            let expected = ephemeral.public_key();
            let mut verify = PairVerify::with_ephemeral(vec![pairing], ephemeral);

            let tlv = Tlv8::parse(&verify.start().unwrap()).unwrap();
            assert_eq!(tlv.state(), Some(1));
            assert_eq!(tlv.get(TlvType::PublicKey), Some(&expected[..]));
            assert_eq!(verify.state(), "awaiting_m2");
        }

        #[test]
        fn start_twice_fails() {
            let (mut verify, _) = paired();
            verify.start().unwrap();
            assert!(matches!(
                verify.start(),
                Err(Error::Pairing(PairingError::InvalidState(_)))
            ));
            assert_eq!(verify.state(), "failed");
        }
    }

    mod m2 {
        use super::*;

        #[test]
        fn bad_accessory_signature_is_rejected() {
            let (mut verify, mut accessory) = paired();
            accessory.verify_fault = Some(VerifyFault::CorruptSignature);
            assert!(matches!(
                run(&mut verify, &mut accessory),
                Err(Error::Pairing(PairingError::ServerSignatureInvalid))
            ));
            assert_eq!(verify.state(), "failed");
        }

        #[test]
        fn signature_by_other_key_is_rejected() {
            let (mut verify, mut accessory) = paired();
            // Same identifier, different long-term key than the one stored.
            accessory.keypair = hap_crypto::ed25519::IdentityKeyPair::generate();
            assert!(matches!(
                run(&mut verify, &mut accessory),
                Err(Error::Pairing(PairingError::ServerSignatureInvalid))
            ));
        }

        #[test]
        fn unknown_accessory_identifier_is_rejected() {
            let (mut verify, mut accessory) = paired();
            accessory.verify_fault = Some(VerifyFault::WrongIdentifier);
            assert!(matches!(
                run(&mut verify, &mut accessory),
                Err(Error::Pairing(PairingError::NotPaired))
            ));
            assert!(verify.peer().is_none());
        }

        #[test]
        fn rejected_accessory_is_still_identified() {
            let (mut verify, mut accessory) = paired();
            accessory.verify_fault = Some(VerifyFault::CorruptSignature);
            assert!(run(&mut verify, &mut accessory).is_err());
            assert_eq!(verify.peer().map(|peer| peer.id.as_str()), Some("AA:BB:CC:DD:EE:FF"));
        }

        #[test]
        fn accessory_is_picked_by_m2_identifier() {
            let (lamp, _) = trusted_accessory("AA:BB:CC:DD:EE:FF");
            let (fan, mut fan_accessory) = trusted_accessory("11:22:33:44:55:66");

            // The fan only accepts an M3 signed with the identity it knows.
            let mut verify = PairVerify::new(vec![lamp.clone(), fan]);
            run(&mut verify, &mut fan_accessory).unwrap();
            assert_eq!(verify.peer().map(|peer| peer.id.as_str()), Some("11:22:33:44:55:66"));

            let mut lamp_only = PairVerify::new(vec![lamp]);
            assert!(matches!(
                run(&mut lamp_only, &mut fan_accessory),
                Err(Error::Pairing(PairingError::NotPaired))
            ));
        }

        #[test]
        fn missing_encrypted_data_fails() {
            let (mut verify, _) = paired();
            verify.start().unwrap();
            let m2 = Tlv8::new()
                .with(TlvType::State, vec![2])
                .with(TlvType::PublicKey, EcdhKeyPair::generate().public_key().to_vec())
                .encode();
            assert!(matches!(
                verify.handle_response(&m2),
                Err(Error::Pairing(PairingError::MissingTlv(0x05)))
            ));
        }

        #[test]
        fn low_order_public_key_fails() {
            let (mut verify, _) = paired();
            verify.start().unwrap();
            let m2 = Tlv8::new()
                .with(TlvType::State, vec![2])
                .with(TlvType::PublicKey, vec![0u8; 32])
                .with(TlvType::EncryptedData, vec![0u8; 40])
                .encode();
            assert!(matches!(verify.handle_response(&m2), Err(Error::Crypto(_))));
        }
    }

    mod m4 {
        use super::*;

        #[test]
        fn full_exchange_yields_matching_session_keys() {
            let (mut verify, mut accessory) = paired();
            let keys = run(&mut verify, &mut accessory).unwrap();
            assert!(verify.is_complete());

            let accessory_keys = accessory.session_keys().unwrap();
            assert_eq!(keys.write_key, accessory_keys.read_key);
            assert_eq!(keys.read_key, accessory_keys.write_key);
        }

        #[test]
        fn accessory_rejecting_controller_fails() {
            let identity = LongTermIdentity::generate();
            // The accessory knows a different controller key for this id.
            let mut accessory =
                MockAccessory::paired_with(identity.id_bytes(), LongTermIdentity::generate().public_key());
            let mut verify = PairVerify::new(vec![pairing_with(identity, &accessory)]);

            assert!(matches!(
                run(&mut verify, &mut accessory),
                Err(Error::Pairing(PairingError::Protocol(ProtocolError::Authentication)))
            ));
        }

        #[test]
        fn sessions_use_fresh_keys() {
            let (mut first, mut accessory) = paired();
            let keys1 = run(&mut first, &mut accessory).unwrap();

            let (mut second, mut accessory) = paired();
            let keys2 = run(&mut second, &mut accessory).unwrap();

            assert_ne!(keys1.write_key, keys2.write_key);
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn every_code_aborts_at_every_step() {
            for step in [2u8, 4] {
                for code in ProtocolError::ALL {
                    let (mut verify, mut accessory) = paired();
                    accessory.verify_fault = Some(VerifyFault::ErrorAt(step, code));

                    match run(&mut verify, &mut accessory) {
                        Err(Error::Pairing(PairingError::Protocol(reported))) => {
                            assert_eq!(reported, code)
                        }
                        other => panic!("step {}: unexpected {:?}", step, other.map(|_| ())),
                    }
                    assert_eq!(verify.state(), "failed");
                }
            }
        }

        #[test]
        fn unexpected_state_is_reported() {
            let (mut verify, _) = paired();
            verify.start().unwrap();
            let body = Tlv8::new().with(TlvType::State, vec![4]).encode();
            assert!(matches!(
                verify.handle_response(&body),
                Err(Error::Pairing(PairingError::UnexpectedState {
                    expected: 2,
                    actual: 4
                }))
            ));
        }
    }
}
