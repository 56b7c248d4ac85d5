//! SRP-6a implementation for HomeKit pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512.

use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SRP username used by every HAP accessory.
pub const PAIR_SETUP_IDENTITY: &[u8] = b"Pair-Setup";

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Salt length sent by accessories in M2.
pub const SALT_LEN: usize = 16;

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a group parameters.
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g.
    pub g: BigUint,
}

impl SrpParams {
    /// The 3072-bit RFC 5054 group with g = 5.
    pub fn rfc5054_3072() -> Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16)
            .ok_or_else(|| CryptoError::KeyDerivation("invalid SRP prime constant".to_string()))?;
        Ok(Self {
            n,
            g: BigUint::from(5u32),
        })
    }
}

/// Client-side SRP state: the ephemeral exponent `a` and the public value `A`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: [u8; SALT_LEN],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpProof {
    /// M1, sent to the accessory.
    pub client_proof: Vec<u8>,
    /// K = H(S), the session key every later pair-setup key is derived from.
    pub shared_secret: Vec<u8>,
    /// M2 the accessory must answer with.
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    ///
    /// For HAP, identity is `Pair-Setup` and password is the setup code.
    pub fn new(identity: &[u8], password: &[u8]) -> Result<Self, CryptoError> {
        let a = OsRng.gen_biguint(256);
        Self::with_private_key(identity, password, &a.to_bytes_be())
    }

    /// Create SRP client with a fixed private exponent.
    ///
    /// Only for reproducing known transcripts; real sessions use [`SrpClient::new`].
    pub fn with_private_key(
        identity: &[u8],
        password: &[u8],
        private_key: &[u8],
    ) -> Result<Self, CryptoError> {
        let params = SrpParams::rfc5054_3072()?;
        let a = BigUint::from_bytes_be(private_key);
        let public_key = params.g.modpow(&a, &params.n);

        Ok(Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        })
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process server's challenge and generate proof.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let params = &self.params;
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if &b % &params.n == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation(
                "invalid server public key: B mod N = 0".to_string(),
            ));
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation("invalid u value: u = 0".to_string()));
        }

        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = params.g.modpow(&x, &params.n);
        let k_gx = (&k * &g_x) % &params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &params.n
        } else {
            (&b + &params.n - &k_gx) % &params.n
        };
        let exponent = (&a + &u * &x) % (&params.n - BigUint::from(1u32));
        let s = base.modpow(&exponent, &params.n);

        let shared_secret = hash_padded(&s);

        let client_proof = compute_m1(
            params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );
        let expected_server_proof = compute_m2(&self.public_key, &client_proof, &shared_secret);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }
}

impl SrpProof {
    /// Constant-time check of the accessory's M2.
    pub fn verify_server_proof(&self, proof: &[u8]) -> bool {
        proof.ct_eq(&self.expected_server_proof).into()
    }
}

/// Accessory side of the exchange.
///
/// Holds the password verifier and the ephemeral `b`. Lets a controller be
/// exercised end to end without real hardware.
#[derive(ZeroizeOnDrop)]
pub struct SrpServer {
    #[zeroize(skip)]
    params: SrpParams,
    #[zeroize(skip)]
    identity: Vec<u8>,
    #[zeroize(skip)]
    salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    verifier: BigUint,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

impl SrpServer {
    pub fn new(identity: &[u8], password: &[u8], salt: [u8; SALT_LEN]) -> Result<Self, CryptoError> {
        let b = OsRng.gen_biguint(256);
        Self::with_private_key(identity, password, salt, &b.to_bytes_be())
    }

    pub fn with_private_key(
        identity: &[u8],
        password: &[u8],
        salt: [u8; SALT_LEN],
        private_key: &[u8],
    ) -> Result<Self, CryptoError> {
        let params = SrpParams::rfc5054_3072()?;

        let x = compute_x(&salt, identity, password);
        let verifier = params.g.modpow(&x, &params.n);
        let b = BigUint::from_bytes_be(private_key);

        // B = (k*v + g^b) mod N
        let k = compute_k(&params);
        let g_b = params.g.modpow(&b, &params.n);
        let k_v = (&k * &verifier) % &params.n;
        let public_key = (&k_v + &g_b) % &params.n;

        Ok(Self {
            params,
            identity: identity.to_vec(),
            salt,
            verifier,
            private_key: private_key.to_vec(),
            public_key,
        })
    }

    pub fn challenge(&self) -> SrpChallenge {
        SrpChallenge {
            salt: self.salt,
            server_public_key: pad_to_n(&self.public_key),
        }
    }

    /// Check the controller's M1 and answer with (M2, K).
    ///
    /// Returns `None` when M1 does not match, which is how an accessory
    /// detects a wrong setup code.
    pub fn verify_client(&self, client_public: &[u8], client_proof: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let params = &self.params;
        let a = BigUint::from_bytes_be(client_public);
        if &a % &params.n == BigUint::ZERO {
            return None;
        }

        let u = compute_u(&a, &self.public_key);
        let b = BigUint::from_bytes_be(&self.private_key);

        // S = (A * v^u)^b mod N
        let v_u = self.verifier.modpow(&u, &params.n);
        let base = (&a * &v_u) % &params.n;
        let s = base.modpow(&b, &params.n);
        let session_key = hash_padded(&s);

        let expected_m1 = compute_m1(params, &self.identity, &self.salt, &a, &self.public_key, &session_key);
        if !bool::from(expected_m1.ct_eq(client_proof)) {
            return None;
        }

        let m2 = compute_m2(&a, &expected_m1, &session_key);
        Some((m2, session_key))
    }
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));
    // H(g) is over the raw generator byte, unlike k which pads g.
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Compute M2 = H(PAD(A) || M1 || K)
fn compute_m2(a: &BigUint, m1: &[u8], k: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(m1);
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// K = H(PAD(S))
fn hash_padded(s: &BigUint) -> Vec<u8> {
    Sha512::digest(pad_to_n(s)).to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
