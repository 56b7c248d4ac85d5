//! HomeKit pair-setup protocol (M1-M6).
//!
//! SRP-6a with the accessory's setup code, followed by an encrypted exchange
//! of long-term Ed25519 public keys. Success leaves both sides holding the
//! other's LTPK for later pair-verify sessions.

use hap_core::error::{CryptoError, Error, PairingError, Result};
use hap_crypto::{
    chacha::nonces,
    ed25519,
    hkdf,
    keys::EncryptionKey,
    srp::{SrpChallenge, SrpClient, SrpProof, N_BYTES, PAIR_SETUP_IDENTITY, SALT_LEN},
    tlv::{Tlv8, TlvType},
};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::identity::{LongTermIdentity, PeerLongTermPublicKey};
use crate::message::{check_response, open_sub_tlv, seal_sub_tlv};

/// What to do after feeding a response to [`PairSetup::handle_response`].
pub enum SetupStep {
    /// Send this body to `/pair-setup`.
    Send(Vec<u8>),
    /// M6 verified; both long-term keys are now known.
    Complete(PairSetupOutcome),
}

/// Result of a successful pair-setup.
#[derive(Debug, Clone)]
pub struct PairSetupOutcome {
    pub identity: LongTermIdentity,
    pub peer: PeerLongTermPublicKey,
}

/// Pair-setup state machine.
///
/// Exchange secrets live inside the state payloads and are dropped (and
/// zeroized) the moment the machine leaves that state, on success or failure.
/// The SRP proof, and with it K, does not outlive M4: everything M6 needs is
/// derived from K before M5 is sent.
pub struct PairSetup {
    state: SetupState,
    setup_code: Zeroizing<String>,
    fixed_exponent: Option<Zeroizing<Vec<u8>>>,
}

enum SetupState {
    Initial,
    AwaitingM2 {
        srp: SrpClient,
    },
    AwaitingM4 {
        proof: SrpProof,
    },
    AwaitingM6 {
        /// AccessoryX, the HKDF input of the accessory's M6 signature.
        accessory_x: Zeroizing<[u8; 32]>,
        encrypt_key: EncryptionKey,
        identity: LongTermIdentity,
    },
    Complete,
    Failed,
}

impl PairSetup {
    pub fn new(setup_code: &str) -> Self {
        Self {
            state: SetupState::Initial,
            setup_code: Zeroizing::new(setup_code.to_string()),
            fixed_exponent: None,
        }
    }

    /// Pair-setup with a fixed SRP exponent `a`.
    ///
    /// Only for reproducing known transcripts.
    pub fn with_private_key(setup_code: &str, exponent: &[u8]) -> Self {
        Self {
            fixed_exponent: Some(Zeroizing::new(exponent.to_vec())),
            ..Self::new(setup_code)
        }
    }

    /// Generate M1: `{State=1, Method=0}`.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if !matches!(self.state, SetupState::Initial) {
            self.state = SetupState::Failed;
            return Err(PairingError::InvalidState(
                "M1 can only be generated from the initial state".to_string(),
            )
            .into());
        }

        let srp = match &self.fixed_exponent {
            Some(a) => SrpClient::with_private_key(PAIR_SETUP_IDENTITY, self.setup_code.as_bytes(), a),
            None => SrpClient::new(PAIR_SETUP_IDENTITY, self.setup_code.as_bytes()),
        };
        let srp = match srp {
            Ok(srp) => srp,
            Err(e) => {
                self.state = SetupState::Failed;
                return Err(e.into());
            }
        };

        debug!(state = 1, "sending pair-setup M1");
        self.state = SetupState::AwaitingM2 { srp };
        Ok(Tlv8::pair_setup_m1().encode())
    }

    /// Feed the accessory's response to the last message sent.
    ///
    /// Any error leaves the machine in the failed state; a new `PairSetup`
    /// is needed to retry.
    pub fn handle_response(&mut self, body: &[u8]) -> Result<SetupStep> {
        let state = std::mem::replace(&mut self.state, SetupState::Failed);
        match state {
            SetupState::AwaitingM2 { srp } => {
                let (m3, proof) = process_m2(&srp, body)?;
                self.state = SetupState::AwaitingM4 { proof };
                Ok(SetupStep::Send(m3))
            }
            SetupState::AwaitingM4 { proof } => {
                let m5 = process_m4(proof, body)?;
                self.state = SetupState::AwaitingM6 {
                    accessory_x: m5.accessory_x,
                    encrypt_key: m5.encrypt_key,
                    identity: m5.identity,
                };
                Ok(SetupStep::Send(m5.body))
            }
            SetupState::AwaitingM6 {
                accessory_x,
                encrypt_key,
                identity,
            } => {
                let peer = process_m6(&accessory_x, &encrypt_key, body)?;
                info!(peer_id = %peer.id, "pair-setup complete");
                self.state = SetupState::Complete;
                Ok(SetupStep::Complete(PairSetupOutcome { identity, peer }))
            }
            SetupState::Initial | SetupState::Complete | SetupState::Failed => {
                Err(PairingError::InvalidState(format!(
                    "no pair-setup response expected in state {}",
                    state_name(&state)
                ))
                .into())
            }
        }
    }

    pub fn state(&self) -> &'static str {
        state_name(&self.state)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, SetupState::Complete)
    }
}

impl std::fmt::Debug for PairSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairSetup")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn state_name(state: &SetupState) -> &'static str {
    match state {
        SetupState::Initial => "initial",
        SetupState::AwaitingM2 { .. } => "awaiting_m2",
        SetupState::AwaitingM4 { .. } => "awaiting_m4",
        SetupState::AwaitingM6 { .. } => "awaiting_m6",
        SetupState::Complete => "complete",
        SetupState::Failed => "failed",
    }
}

/// M2 `{State=2, Salt, PublicKey}` in, M3 `{State=3, PublicKey, Proof}` out.
fn process_m2(srp: &SrpClient, body: &[u8]) -> Result<(Vec<u8>, SrpProof)> {
    let tlv = check_response(body, 2)?;
    debug!(state = 2, "received pair-setup M2");

    let salt = tlv.require(TlvType::Salt)?;
    let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: SALT_LEN,
        actual: salt.len(),
    })?;

    // Leading zero bytes of B may be stripped; longer than N is invalid.
    let server_public_key = tlv.require(TlvType::PublicKey)?;
    if server_public_key.len() > N_BYTES {
        return Err(CryptoError::InvalidKeyLength {
            expected: N_BYTES,
            actual: server_public_key.len(),
        }
        .into());
    }

    let proof = srp.process_challenge(&SrpChallenge {
        salt,
        server_public_key: server_public_key.to_vec(),
    })?;

    let m3 = Tlv8::new()
        .with(TlvType::State, vec![0x03])
        .with(TlvType::PublicKey, srp.public_key())
        .with(TlvType::Proof, proof.client_proof.clone());

    debug!(state = 3, "sending pair-setup M3");
    Ok((m3.encode(), proof))
}

/// M5 and the keys that must survive until M6.
struct M5 {
    body: Vec<u8>,
    encrypt_key: EncryptionKey,
    accessory_x: Zeroizing<[u8; 32]>,
    identity: LongTermIdentity,
}

/// M4 `{State=4, Proof}` in, M5 `{State=5, EncryptedData}` out.
///
/// Consumes the SRP proof; K is zeroized when this returns.
fn process_m4(proof: SrpProof, body: &[u8]) -> Result<M5> {
    let tlv = check_response(body, 4)?;
    debug!(state = 4, "received pair-setup M4");

    let server_proof = tlv.require(TlvType::Proof)?;
    if !proof.verify_server_proof(server_proof) {
        return Err(PairingError::ServerProofInvalid.into());
    }

    let encrypt_key = EncryptionKey::new(hkdf::derive(
        &proof.shared_secret,
        hkdf::PAIR_SETUP_ENCRYPT,
    )?);

    let identity = LongTermIdentity::generate();
    let ios_device_x = Zeroizing::new(hkdf::derive(
        &proof.shared_secret,
        hkdf::PAIR_SETUP_CONTROLLER_SIGN,
    )?);
    let accessory_x = Zeroizing::new(hkdf::derive(
        &proof.shared_secret,
        hkdf::PAIR_SETUP_ACCESSORY_SIGN,
    )?);
    drop(proof);

    // iOSDeviceX || iOSDevicePairingID || iOSDeviceLTPK
    let mut info = Vec::with_capacity(32 + identity.id_bytes().len() + 32);
    info.extend_from_slice(ios_device_x.as_slice());
    info.extend_from_slice(identity.id_bytes());
    info.extend_from_slice(&identity.public_key());
    let signature = identity.sign(&info);

    let inner = Tlv8::new()
        .with(TlvType::Identifier, identity.id_bytes().to_vec())
        .with(TlvType::PublicKey, identity.public_key().to_vec())
        .with(TlvType::Signature, signature.to_vec());
    let encrypted = seal_sub_tlv(encrypt_key.as_bytes(), nonces::PS_MSG05, &inner)?;

    let m5 = Tlv8::new()
        .with(TlvType::State, vec![0x05])
        .with(TlvType::EncryptedData, encrypted);

    debug!(state = 5, device_id = identity.device_id(), "sending pair-setup M5");
    Ok(M5 {
        body: m5.encode(),
        encrypt_key,
        accessory_x,
        identity,
    })
}

/// M6 `{State=6, EncryptedData}` in; returns the verified accessory key.
fn process_m6(
    accessory_x: &[u8; 32],
    encrypt_key: &EncryptionKey,
    body: &[u8],
) -> Result<PeerLongTermPublicKey> {
    let tlv = check_response(body, 6)?;
    debug!(state = 6, "received pair-setup M6");

    let inner = open_sub_tlv(encrypt_key.as_bytes(), nonces::PS_MSG06, &tlv)?;
    let peer_id = inner.require(TlvType::Identifier)?;
    let peer_ltpk = inner.require(TlvType::PublicKey)?;
    let signature = inner.require(TlvType::Signature)?;

    // AccessoryX || AccessoryPairingID || AccessoryLTPK
    let mut info = Vec::with_capacity(32 + peer_id.len() + peer_ltpk.len());
    info.extend_from_slice(accessory_x.as_slice());
    info.extend_from_slice(peer_id);
    info.extend_from_slice(peer_ltpk);

    ed25519::verify(peer_ltpk, &info, signature)
        .map_err(|_| Error::from(PairingError::ServerSignatureInvalid))?;

    PeerLongTermPublicKey::from_tlv(peer_id, peer_ltpk)
}
