//! Accessory side of both handshakes, for driving the controller in tests.
//!
//! Panics on malformed controller input.

use hap_core::error::ProtocolError;
use hap_crypto::chacha::{self, nonces};
use hap_crypto::curve25519::EcdhKeyPair;
use hap_crypto::ed25519::{self, IdentityKeyPair};
use hap_crypto::hkdf;
use hap_crypto::keys::{SessionKeys, SharedSecret};
use hap_crypto::srp::{SrpServer, PAIR_SETUP_IDENTITY, SALT_LEN};
use hap_crypto::tlv::{Tlv8, TlvType};

#[derive(Debug, Clone, Copy)]
pub enum SetupFault {
    /// Answer the given response state with an error item instead.
    ErrorAt(u8, ProtocolError),
    CorruptProof,
    CorruptSignature,
    GarbleM6,
}

#[derive(Debug, Clone, Copy)]
pub enum VerifyFault {
    ErrorAt(u8, ProtocolError),
    CorruptSignature,
    WrongIdentifier,
}

pub struct MockAccessory {
    pub id: String,
    pub keypair: IdentityKeyPair,
    pub setup_fault: Option<SetupFault>,
    pub verify_fault: Option<VerifyFault>,
    /// Controller identifier and LTPK recorded from M5.
    pub controller: Option<(Vec<u8>, [u8; 32])>,
    code: String,
    srp_params: Option<([u8; SALT_LEN], Vec<u8>)>,
    srp: Option<SrpServer>,
    session_key: Option<Vec<u8>>,
    verify: Option<VerifyExchange>,
    control_secret: Option<SharedSecret>,
}

struct VerifyExchange {
    own_public: [u8; 32],
    controller_public: Vec<u8>,
    shared: SharedSecret,
}

fn error_response(state: u8, code: ProtocolError) -> Vec<u8> {
    Tlv8::new()
        .with(TlvType::State, vec![state])
        .with(TlvType::Error, vec![code.code()])
        .encode()
}

impl MockAccessory {
    pub fn new(code: &str) -> Self {
        Self {
            id: "AA:BB:CC:DD:EE:FF".to_string(),
            keypair: IdentityKeyPair::generate(),
            setup_fault: None,
            verify_fault: None,
            controller: None,
            code: code.to_string(),
            srp_params: None,
            srp: None,
            session_key: None,
            verify: None,
            control_secret: None,
        }
    }

    /// Use a fixed salt and SRP exponent `b`.
    pub fn with_srp_params(code: &str, salt: [u8; SALT_LEN], b: Vec<u8>) -> Self {
        Self {
            srp_params: Some((salt, b)),
            ..Self::new(code)
        }
    }

    /// Accessory that already knows `controller` from an earlier pair-setup.
    pub fn paired_with(controller_id: &[u8], controller_ltpk: [u8; 32]) -> Self {
        let mut accessory = Self::new("111-11-111");
        accessory.controller = Some((controller_id.to_vec(), controller_ltpk));
        accessory
    }

    /// SRP session key K once M3 has been accepted.
    pub fn session_key(&self) -> Option<Vec<u8>> {
        self.session_key.clone()
    }

    /// Session keys as seen by the accessory, after pair-verify M4.
    pub fn session_keys(&self) -> Option<SessionKeys> {
        let secret = self.control_secret.as_ref()?;
        SessionKeys::derive_control_keys(secret).ok().map(|k| k.swapped())
    }

    fn setup_error(&self, state: u8) -> Option<Vec<u8>> {
        match self.setup_fault {
            Some(SetupFault::ErrorAt(at, code)) if at == state => Some(error_response(state, code)),
            _ => None,
        }
    }

    fn verify_error(&self, state: u8) -> Option<Vec<u8>> {
        match self.verify_fault {
            Some(VerifyFault::ErrorAt(at, code)) if at == state => Some(error_response(state, code)),
            _ => None,
        }
    }

    pub fn pair_setup(&mut self, request: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(request).unwrap();
        match tlv.state() {
            Some(1) => self.setup_m2(),
            Some(3) => self.setup_m4(&tlv),
            Some(5) => self.setup_m6(&tlv),
            other => panic!("unexpected pair-setup state {:?}", other),
        }
    }

    fn setup_m2(&mut self) -> Vec<u8> {
        if let Some(response) = self.setup_error(2) {
            return response;
        }
        let server = match &self.srp_params {
            Some((salt, b)) => {
                SrpServer::with_private_key(PAIR_SETUP_IDENTITY, self.code.as_bytes(), *salt, b)
            }
            None => SrpServer::new(PAIR_SETUP_IDENTITY, self.code.as_bytes(), [0x5Au8; SALT_LEN]),
        }
        .unwrap();
        let challenge = server.challenge();
        self.srp = Some(server);

        Tlv8::new()
            .with(TlvType::State, vec![2])
            .with(TlvType::Salt, challenge.salt.to_vec())
            .with(TlvType::PublicKey, challenge.server_public_key)
            .encode()
    }

    fn setup_m4(&mut self, tlv: &Tlv8) -> Vec<u8> {
        if let Some(response) = self.setup_error(4) {
            return response;
        }
        let server = self.srp.as_ref().unwrap();
        let a = tlv.get(TlvType::PublicKey).unwrap();
        let m1 = tlv.get(TlvType::Proof).unwrap();

        let Some((mut m2, k)) = server.verify_client(a, m1) else {
            return error_response(4, ProtocolError::Authentication);
        };
        self.session_key = Some(k);

        if matches!(self.setup_fault, Some(SetupFault::CorruptProof)) {
            m2[0] ^= 0x01;
        }
        Tlv8::new()
            .with(TlvType::State, vec![4])
            .with(TlvType::Proof, m2)
            .encode()
    }

    fn setup_m6(&mut self, tlv: &Tlv8) -> Vec<u8> {
        if let Some(response) = self.setup_error(6) {
            return response;
        }
        let k = self.session_key.clone().unwrap();
        let key = hkdf::derive(&k, hkdf::PAIR_SETUP_ENCRYPT).unwrap();

        let sealed = tlv.get(TlvType::EncryptedData).unwrap();
        let inner = Tlv8::parse(&chacha::open(&key, nonces::PS_MSG05, sealed).unwrap()).unwrap();
        let controller_id = inner.get(TlvType::Identifier).unwrap().to_vec();
        let controller_ltpk: [u8; 32] = inner.get(TlvType::PublicKey).unwrap().try_into().unwrap();
        let signature = inner.get(TlvType::Signature).unwrap();

        let ios_device_x = hkdf::derive(&k, hkdf::PAIR_SETUP_CONTROLLER_SIGN).unwrap();
        let info = [&ios_device_x[..], &controller_id[..], &controller_ltpk[..]].concat();
        ed25519::verify(&controller_ltpk, &info, signature).unwrap();
        self.controller = Some((controller_id, controller_ltpk));

        let accessory_x = hkdf::derive(&k, hkdf::PAIR_SETUP_ACCESSORY_SIGN).unwrap();
        let own_ltpk = self.keypair.public_key();
        let info = [&accessory_x[..], self.id.as_bytes(), &own_ltpk[..]].concat();
        let mut signature = self.keypair.sign(&info);
        if matches!(self.setup_fault, Some(SetupFault::CorruptSignature)) {
            signature[10] ^= 0x40;
        }

        let reply = Tlv8::new()
            .with(TlvType::Identifier, self.id.as_bytes().to_vec())
            .with(TlvType::PublicKey, own_ltpk.to_vec())
            .with(TlvType::Signature, signature.to_vec());
        let mut encrypted = chacha::seal(&key, nonces::PS_MSG06, &reply.encode()).unwrap();
        if matches!(self.setup_fault, Some(SetupFault::GarbleM6)) {
            encrypted[0] ^= 0xFF;
        }

        Tlv8::new()
            .with(TlvType::State, vec![6])
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }

    pub fn pair_verify(&mut self, request: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(request).unwrap();
        match tlv.state() {
            Some(1) => self.verify_m2(&tlv),
            Some(3) => self.verify_m4(&tlv),
            other => panic!("unexpected pair-verify state {:?}", other),
        }
    }

    fn verify_m2(&mut self, tlv: &Tlv8) -> Vec<u8> {
        if let Some(response) = self.verify_error(2) {
            return response;
        }
        let controller_public = tlv.get(TlvType::PublicKey).unwrap().to_vec();
        let ecdh = EcdhKeyPair::generate();
        let own_public = ecdh.public_key();
        let shared = ecdh.diffie_hellman(&controller_public).unwrap();
        let key = hkdf::derive(shared.as_bytes(), hkdf::PAIR_VERIFY_ENCRYPT).unwrap();

        let id = match self.verify_fault {
            Some(VerifyFault::WrongIdentifier) => b"11:22:33:44:55:66".to_vec(),
            _ => self.id.as_bytes().to_vec(),
        };
        let info = [&own_public[..], &id[..], &controller_public[..]].concat();
        let mut signature = self.keypair.sign(&info);
        if matches!(self.verify_fault, Some(VerifyFault::CorruptSignature)) {
            signature[0] ^= 0x01;
        }

        let inner = Tlv8::new()
            .with(TlvType::Identifier, id)
            .with(TlvType::Signature, signature.to_vec());
        let encrypted = chacha::seal(&key, nonces::PV_MSG02, &inner.encode()).unwrap();

        self.verify = Some(VerifyExchange {
            own_public,
            controller_public,
            shared,
        });

        Tlv8::new()
            .with(TlvType::State, vec![2])
            .with(TlvType::PublicKey, own_public.to_vec())
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }

    fn verify_m4(&mut self, tlv: &Tlv8) -> Vec<u8> {
        if let Some(response) = self.verify_error(4) {
            return response;
        }
        let exchange = self.verify.take().unwrap();
        let key = hkdf::derive(exchange.shared.as_bytes(), hkdf::PAIR_VERIFY_ENCRYPT).unwrap();

        let sealed = tlv.get(TlvType::EncryptedData).unwrap();
        let inner = Tlv8::parse(&chacha::open(&key, nonces::PV_MSG03, sealed).unwrap()).unwrap();
        let controller_id = inner.get(TlvType::Identifier).unwrap();
        let signature = inner.get(TlvType::Signature).unwrap();

        let (known_id, known_ltpk) = self.controller.clone().unwrap();
        if controller_id != known_id.as_slice() {
            return error_response(4, ProtocolError::Authentication);
        }
        let info = [
            &exchange.controller_public[..],
            controller_id,
            &exchange.own_public[..],
        ]
        .concat();
        if ed25519::verify(&known_ltpk, &info, signature).is_err() {
            return error_response(4, ProtocolError::Authentication);
        }

        self.control_secret = Some(exchange.shared);
        Tlv8::new().with(TlvType::State, vec![4]).encode()
    }
}
