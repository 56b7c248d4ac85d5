//! Pairing session orchestrator.
//!
//! One `PairingSession` lives for the duration of one accessory connection.
//! It owns whichever handshake is in flight and every long-term pairing the
//! controller knows, and routes each `/pair-setup` or `/pair-verify`
//! response body to the right state machine.

use hap_core::error::{PairingError, Result};
use hap_crypto::keys::SessionKeys;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::identity::{Pairing, PeerLongTermPublicKey};
use crate::pair_setup::{PairSetup, SetupStep};
use crate::pair_verify::{PairVerify, VerifyStep};
use crate::store::PairingRecord;

/// What the session is doing right now.
#[derive(Debug)]
pub enum PairingMode {
    Idle,
    PairSetupInProgress(PairSetup),
    PairVerifyInProgress(PairVerify),
    /// Pair-verify succeeded; traffic is encrypted from here on.
    Paired,
}

/// Next action in a pairing flow.
pub enum PairingStep {
    /// Send this body to the endpoint of the running handshake.
    Send(Vec<u8>),
    /// Pair-setup finished. Persist the record; the session is Idle again.
    SetupComplete(PairingRecord),
    /// Pair-verify finished. The session is Paired.
    Verified(SessionKeys),
}

/// Per-connection pairing state.
pub struct PairingSession {
    mode: PairingMode,
    setup_code: Zeroizing<String>,
    pairings: Vec<Pairing>,
    /// Accessory named by the latest pair-setup, or by pair-verify M2.
    peer_id: Option<String>,
}

impl PairingSession {
    pub fn new(setup_code: &str) -> Self {
        Self {
            mode: PairingMode::Idle,
            setup_code: Zeroizing::new(setup_code.to_string()),
            pairings: Vec::new(),
            peer_id: None,
        }
    }

    /// Session that already knows the pairings from earlier pair-setups.
    pub fn from_records(setup_code: &str, records: &[PairingRecord]) -> Result<Self> {
        let mut session = Self::new(setup_code);
        session.pairings = records
            .iter()
            .map(PairingRecord::pairing)
            .collect::<Result<_>>()?;
        Ok(session)
    }

    pub fn mode(&self) -> &PairingMode {
        &self.mode
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.mode, PairingMode::Idle)
    }

    pub fn is_paired(&self) -> bool {
        matches!(self.mode, PairingMode::Paired)
    }

    /// Whether long-term keys for at least one accessory are available for
    /// pair-verify.
    pub fn has_pairing(&self) -> bool {
        !self.pairings.is_empty()
    }

    pub fn pairings(&self) -> &[Pairing] {
        &self.pairings
    }

    /// Identifier of the accessory on this connection, once a handshake has
    /// named it. Pair-verify sets it at M2, before the accessory's signature
    /// is checked.
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// Long-term key of the accessory on this connection.
    pub fn peer(&self) -> Option<&PeerLongTermPublicKey> {
        self.current().map(|pairing| &pairing.peer)
    }

    /// Record for the accessory on this connection.
    pub fn record(&self) -> Option<PairingRecord> {
        self.current()
            .map(|pairing| PairingRecord::new(&pairing.identity, &pairing.peer))
    }

    /// Begin pair-setup, returning M1.
    pub fn start_pair_setup(&mut self) -> Result<Vec<u8>> {
        self.start_pair_setup_with(PairSetup::new(&self.setup_code))
    }

    /// Begin pair-setup with a prepared state machine.
    pub fn start_pair_setup_with(&mut self, mut setup: PairSetup) -> Result<Vec<u8>> {
        self.require_idle("pair-setup")?;
        let m1 = setup.start()?;
        self.mode = PairingMode::PairSetupInProgress(setup);
        Ok(m1)
    }

    /// Begin pair-verify with the stored long-term keys, returning M1.
    pub fn start_pair_verify(&mut self) -> Result<Vec<u8>> {
        self.require_idle("pair-verify")?;
        if self.pairings.is_empty() {
            return Err(PairingError::NotPaired.into());
        }

        self.peer_id = None;
        let mut verify = PairVerify::new(self.pairings.clone());
        let m1 = verify.start()?;
        self.mode = PairingMode::PairVerifyInProgress(verify);
        Ok(m1)
    }

    /// Route a handshake response to the active state machine.
    ///
    /// Any error aborts the handshake and returns the session to Idle, so
    /// the caller may retry.
    pub fn handle_response(&mut self, body: &[u8]) -> Result<PairingStep> {
        match std::mem::replace(&mut self.mode, PairingMode::Idle) {
            PairingMode::PairSetupInProgress(mut setup) => match setup.handle_response(body) {
                Ok(SetupStep::Send(next)) => {
                    self.mode = PairingMode::PairSetupInProgress(setup);
                    Ok(PairingStep::Send(next))
                }
                Ok(SetupStep::Complete(outcome)) => {
                    let record = PairingRecord::new(&outcome.identity, &outcome.peer);
                    info!(
                        device_id = outcome.identity.device_id(),
                        peer_id = %outcome.peer.id,
                        "accessory paired"
                    );
                    self.pairings.retain(|pairing| pairing.peer.id != outcome.peer.id);
                    self.peer_id = Some(outcome.peer.id.clone());
                    self.pairings.push(Pairing {
                        identity: outcome.identity,
                        peer: outcome.peer,
                    });
                    Ok(PairingStep::SetupComplete(record))
                }
                Err(e) => {
                    warn!(error = %e, "pair-setup aborted");
                    Err(e)
                }
            },
            PairingMode::PairVerifyInProgress(mut verify) => {
                let result = verify.handle_response(body);
                if let Some(peer) = verify.peer() {
                    self.peer_id = Some(peer.id.clone());
                }
                match result {
                    Ok(VerifyStep::Send(next)) => {
                        self.mode = PairingMode::PairVerifyInProgress(verify);
                        Ok(PairingStep::Send(next))
                    }
                    Ok(VerifyStep::Complete(keys)) => {
                        self.mode = PairingMode::Paired;
                        Ok(PairingStep::Verified(keys))
                    }
                    Err(e) => {
                        warn!(error = %e, peer_id = ?self.peer_id, "pair-verify aborted");
                        Err(e)
                    }
                }
            }
            other => {
                let err = PairingError::InvalidState(format!(
                    "no handshake in progress ({})",
                    mode_name(&other)
                ));
                self.mode = other;
                Err(err.into())
            }
        }
    }

    /// Drop any handshake in flight and return to Idle.
    ///
    /// Long-term keys are kept; session keys held by the transport are not
    /// affected.
    pub fn reset(&mut self) {
        self.mode = PairingMode::Idle;
    }

    /// Drop the long-term pairing with one accessory so the next attempt
    /// with it has to run pair-setup. Other pairings are kept.
    pub fn forget_peer(&mut self, peer_id: &str) {
        self.mode = PairingMode::Idle;
        self.pairings.retain(|pairing| pairing.peer.id != peer_id);
        if self.peer_id.as_deref() == Some(peer_id) {
            self.peer_id = None;
        }
    }

    fn current(&self) -> Option<&Pairing> {
        let peer_id = self.peer_id.as_deref()?;
        self.pairings.iter().find(|pairing| pairing.peer.id == peer_id)
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(PairingError::InvalidState(format!(
                "cannot start {} while {}",
                what,
                mode_name(&self.mode)
            ))
            .into())
        }
    }
}

impl std::fmt::Debug for PairingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingSession")
            .field("mode", &mode_name(&self.mode))
            .field("pairings", &self.pairings.len())
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

fn mode_name(mode: &PairingMode) -> &'static str {
    match mode {
        PairingMode::Idle => "idle",
        PairingMode::PairSetupInProgress(_) => "pair-setup in progress",
        PairingMode::PairVerifyInProgress(_) => "pair-verify in progress",
        PairingMode::Paired => "paired",
    }
}
