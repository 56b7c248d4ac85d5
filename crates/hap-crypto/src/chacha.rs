//! ChaCha20-Poly1305 AEAD for pairing sub-messages and the paired session.

use hap_core::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::ZeroizeOnDrop;

/// Largest plaintext carried by one session frame.
pub const MAX_FRAME_LEN: usize = 0x400;
/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;
/// Length prefix, doubling as associated data.
pub const LEN_PREFIX: usize = 2;

/// Fixed nonce tags used inside the pairing handshakes.
pub mod nonces {
    pub const PS_MSG05: &[u8; 8] = b"PS-Msg05";
    pub const PS_MSG06: &[u8; 8] = b"PS-Msg06";
    pub const PV_MSG02: &[u8; 8] = b"PV-Msg02";
    pub const PV_MSG03: &[u8; 8] = b"PV-Msg03";
}

/// Cipher for the paired channel.
///
/// Frames are `[u16_le len][ciphertext][16-byte tag]` with AAD = len and a
/// nonce of 4 zero bytes followed by the direction's counter (u64 LE).
/// Counters start at zero and are never reset for the life of the session.
#[derive(ZeroizeOnDrop)]
pub struct SessionCipher {
    write_key: [u8; 32],
    read_key: [u8; 32],
    #[zeroize(skip)]
    write_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    read_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    encrypt_counter: u64,
    #[zeroize(skip)]
    decrypt_counter: u64,
}

impl SessionCipher {
    /// Create cipher from the controller-to-accessory (write) and
    /// accessory-to-controller (read) keys.
    pub fn new(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        let write_cipher = ChaCha20Poly1305::new(&write_key.into());
        let read_cipher = ChaCha20Poly1305::new(&read_key.into());
        Self {
            write_key,
            read_key,
            write_cipher,
            read_cipher,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    /// Encrypt plaintext into one frame per 1024-byte chunk.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let frames = (plaintext.len() + MAX_FRAME_LEN - 1) / MAX_FRAME_LEN;
        let mut out = Vec::with_capacity(plaintext.len() + frames * (LEN_PREFIX + TAG_LEN));

        for block in plaintext.chunks(MAX_FRAME_LEN) {
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = build_nonce_from_counter(self.encrypt_counter);
            let payload = Payload {
                msg: block,
                aad: &aad,
            };

            let ciphertext_with_tag = self
                .write_cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|e| CryptoError::Encryption(format!("frame encryption failed: {}", e)))?;

            out.extend_from_slice(&aad);
            out.extend_from_slice(&ciphertext_with_tag);
            self.encrypt_counter += 1;
        }

        Ok(out)
    }

    /// Decrypt one frame body (ciphertext followed by tag) of `block_len` plaintext bytes.
    ///
    /// The read counter advances only when the tag verifies.
    pub fn decrypt_block(
        &mut self,
        ciphertext_with_tag: &[u8],
        block_len: u16,
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_with_tag.len() != block_len as usize + TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "frame body is {} bytes, expected {}",
                ciphertext_with_tag.len(),
                block_len as usize + TAG_LEN
            )));
        }

        let aad = block_len.to_le_bytes();
        let nonce = build_nonce_from_counter(self.decrypt_counter);
        let payload = Payload {
            msg: ciphertext_with_tag,
            aad: &aad,
        };

        let plaintext = self
            .read_cipher
            .decrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CryptoError::DecryptionFailure {
                counter: self.decrypt_counter,
            })?;

        self.decrypt_counter += 1;
        Ok(plaintext)
    }

    /// Decrypt a buffer made of whole frames.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::with_capacity(data.len());
        let mut offset = 0;

        while offset < data.len() {
            match self.next_frame(&data[offset..])? {
                Some((consumed, plaintext)) => {
                    out.extend_from_slice(&plaintext);
                    offset += consumed;
                }
                None => {
                    return Err(CryptoError::Decryption(format!(
                        "incomplete frame at offset {}",
                        offset
                    )))
                }
            }
        }

        Ok(out)
    }

    /// Decrypt every complete frame at the front of `buffer`, draining them.
    ///
    /// A trailing partial frame stays in `buffer` until more bytes arrive.
    pub fn decrypt_available(&mut self, buffer: &mut Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::new();
        let mut offset = 0;

        while let Some((consumed, plaintext)) = self.next_frame(&buffer[offset..])? {
            out.extend_from_slice(&plaintext);
            offset += consumed;
        }

        buffer.drain(..offset);
        Ok(out)
    }

    /// Decrypt the frame at the start of `data`, if it is complete.
    fn next_frame(&mut self, data: &[u8]) -> Result<Option<(usize, Vec<u8>)>, CryptoError> {
        if data.len() < LEN_PREFIX {
            return Ok(None);
        }

        let block_len = u16::from_le_bytes([data[0], data[1]]);
        if block_len as usize > MAX_FRAME_LEN {
            return Err(CryptoError::DecryptionFailure {
                counter: self.decrypt_counter,
            });
        }

        let frame_end = LEN_PREFIX + block_len as usize + TAG_LEN;
        if data.len() < frame_end {
            return Ok(None);
        }

        let plaintext = self.decrypt_block(&data[LEN_PREFIX..frame_end], block_len)?;
        Ok(Some((frame_end, plaintext)))
    }

    /// Frames encrypted so far.
    pub fn encrypt_counter(&self) -> u64 {
        self.encrypt_counter
    }

    /// Frames successfully decrypted so far.
    pub fn decrypt_counter(&self) -> u64 {
        self.decrypt_counter
    }
}

/// Build 12-byte nonce from counter.
fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Create a 12-byte nonce from a tag like `PS-Msg05` (right-aligned, zero-padded).
pub fn nonce_from_tag(tag: &[u8; 8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(tag);
    nonce
}

/// Encrypt a pairing sub-message under a fixed nonce tag with empty AAD.
///
/// Returns ciphertext with 16-byte auth tag appended.
pub fn seal(key: &[u8; 32], tag: &[u8; 8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = nonce_from_tag(tag);

    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("sub-message encryption failed: {}", e)))
}

/// Decrypt a pairing sub-message sealed with [`seal`].
pub fn open(key: &[u8; 32], tag: &[u8; 8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "ciphertext too short (missing tag)".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = nonce_from_tag(tag);

    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| {
            CryptoError::Decryption(format!(
                "{} authentication failed",
                String::from_utf8_lossy(tag)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two ciphers with mirrored keys, as the controller and accessory hold them.
    fn pair() -> (SessionCipher, SessionCipher) {
        let c2a = [0x42u8; 32];
        let a2c = [0x24u8; 32];
        (SessionCipher::new(c2a, a2c), SessionCipher::new(a2c, c2a))
    }

    mod session_cipher {
        use super::*;

        #[test]
        fn new_starts_counters_at_zero() {
            let (cipher, _) = pair();
            assert_eq!(cipher.encrypt_counter(), 0);
            assert_eq!(cipher.decrypt_counter(), 0);
        }

        #[test]
        fn encrypt_produces_framed_output() {
            let (mut controller, _) = pair();
            let plaintext = b"hello";
            let frame = controller.encrypt(plaintext).unwrap();
            assert_eq!(frame.len(), LEN_PREFIX + plaintext.len() + TAG_LEN);
            assert_eq!(u16::from_le_bytes([frame[0], frame[1]]), 5);
        }

        #[test]
        fn roundtrip_across_chunk_boundaries() {
            for len in [0usize, 1, 1023, 1024, 1025, 2048, 3000, 5 * 1024 + 7] {
                let (mut controller, mut accessory) = pair();
                let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

                let wire = controller.encrypt(&plaintext).unwrap();
                let chunks = ((len + MAX_FRAME_LEN - 1) / MAX_FRAME_LEN) as u64;
                assert_eq!(controller.encrypt_counter(), chunks);

                let decrypted = accessory.decrypt(&wire).unwrap();
                assert_eq!(decrypted, plaintext);
                assert_eq!(accessory.decrypt_counter(), chunks);
            }
        }

        #[test]
        fn counters_advance_independently() {
            let (mut controller, mut accessory) = pair();
            let request = controller.encrypt(b"GET /accessories").unwrap();
            accessory.decrypt(&request).unwrap();

            let response = accessory.encrypt(&[0u8; 1500]).unwrap();
            controller.decrypt(&response).unwrap();

            assert_eq!(controller.encrypt_counter(), 1);
            assert_eq!(controller.decrypt_counter(), 2);
            assert_eq!(accessory.encrypt_counter(), 2);
            assert_eq!(accessory.decrypt_counter(), 1);
        }

        #[test]
        fn different_counters_produce_different_ciphertext() {
            let (mut controller, _) = pair();
            let ct1 = controller.encrypt(b"same").unwrap();
            let ct2 = controller.encrypt(b"same").unwrap();
            assert_ne!(ct1, ct2);
        }

        #[test]
        fn decrypt_fails_with_wrong_key() {
            let (mut controller, _) = pair();
            let mut stranger = SessionCipher::new([0x01u8; 32], [0x02u8; 32]);
            let wire = controller.encrypt(b"secret").unwrap();
            assert!(matches!(
                stranger.decrypt(&wire),
                Err(CryptoError::DecryptionFailure { counter: 0 })
            ));
        }

        #[test]
        fn replayed_frame_is_rejected() {
            let (mut controller, mut accessory) = pair();
            let wire = controller.encrypt(b"once").unwrap();
            accessory.decrypt(&wire).unwrap();
            assert!(matches!(
                accessory.decrypt(&wire),
                Err(CryptoError::DecryptionFailure { counter: 1 })
            ));
        }

        #[test]
        fn incomplete_frame_is_an_error() {
            let (mut controller, mut accessory) = pair();
            let wire = controller.encrypt(b"truncated").unwrap();
            let result = accessory.decrypt(&wire[..wire.len() - 1]);
            assert!(matches!(result, Err(CryptoError::Decryption(_))));
            assert_eq!(accessory.decrypt_counter(), 0);
        }

        #[test]
        fn oversized_length_prefix_is_rejected() {
            let (_, mut accessory) = pair();
            let mut bogus = vec![0x01, 0x08]; // 0x0801 > 1024
            bogus.extend(vec![0u8; 0x0801 + TAG_LEN]);
            assert!(matches!(
                accessory.decrypt(&bogus),
                Err(CryptoError::DecryptionFailure { .. })
            ));
        }
    }

    mod tampering {
        use super::*;

        #[test]
        fn every_single_bit_flip_fails_authentication() {
            let (mut controller, _) = pair();
            let wire = controller.encrypt(b"{\"characteristics\":[]}").unwrap();

            // Flip each bit of the ciphertext and tag, skipping the length prefix.
            for byte in LEN_PREFIX..wire.len() {
                for bit in 0..8 {
                    let mut tampered = wire.clone();
                    tampered[byte] ^= 1 << bit;

                    let (_, mut accessory) = pair();
                    let result = accessory.decrypt(&tampered);
                    assert_eq!(
                        result,
                        Err(CryptoError::DecryptionFailure { counter: 0 }),
                        "byte {} bit {}",
                        byte,
                        bit
                    );
                    assert_eq!(accessory.decrypt_counter(), 0);
                }
            }
        }

        #[test]
        fn tampered_second_frame_keeps_counter_at_first() {
            let (mut controller, mut accessory) = pair();
            let mut wire = controller.encrypt(&[0x55u8; 1500]).unwrap();
            let last = wire.len() - 1;
            wire[last] ^= 0x80;

            let result = accessory.decrypt(&wire);
            assert_eq!(result, Err(CryptoError::DecryptionFailure { counter: 1 }));
            assert_eq!(accessory.decrypt_counter(), 1);
        }
    }

    mod incremental {
        use super::*;

        #[test]
        fn decrypt_available_leaves_partial_frame() {
            let (mut controller, mut accessory) = pair();
            let first = controller.encrypt(b"first").unwrap();
            let second = controller.encrypt(b"second").unwrap();

            let mut buffer = first.clone();
            buffer.extend_from_slice(&second[..4]);

            let out = accessory.decrypt_available(&mut buffer).unwrap();
            assert_eq!(out, b"first");
            assert_eq!(buffer, second[..4].to_vec());

            buffer.extend_from_slice(&second[4..]);
            let out = accessory.decrypt_available(&mut buffer).unwrap();
            assert_eq!(out, b"second");
            assert!(buffer.is_empty());
            assert_eq!(accessory.decrypt_counter(), 2);
        }

        #[test]
        fn decrypt_available_byte_by_byte() {
            let (mut controller, mut accessory) = pair();
            let plaintext = vec![0x33u8; 2100];
            let wire = controller.encrypt(&plaintext).unwrap();

            let mut buffer = Vec::new();
            let mut out = Vec::new();
            for b in wire {
                buffer.push(b);
                out.extend(accessory.decrypt_available(&mut buffer).unwrap());
            }
            assert_eq!(out, plaintext);
        }
    }

    mod sub_messages {
        use super::*;

        #[test]
        fn nonce_from_tag_right_aligned() {
            let nonce = nonce_from_tag(nonces::PV_MSG02);
            assert_eq!(&nonce[0..4], &[0, 0, 0, 0]);
            assert_eq!(&nonce[4..12], b"PV-Msg02");
        }

        #[test]
        fn seal_open_roundtrip() {
            let key = [0x07u8; 32];
            let sealed = seal(&key, nonces::PS_MSG05, b"sub-tlv").unwrap();
            assert_eq!(sealed.len(), 7 + TAG_LEN);
            assert_eq!(open(&key, nonces::PS_MSG05, &sealed).unwrap(), b"sub-tlv");
        }

        #[test]
        fn open_with_wrong_tag_fails() {
            let key = [0x07u8; 32];
            let sealed = seal(&key, nonces::PS_MSG05, b"sub-tlv").unwrap();
            let result = open(&key, nonces::PS_MSG06, &sealed);
            assert!(matches!(result, Err(CryptoError::Decryption(_))));
        }

        #[test]
        fn open_rejects_short_input() {
            let result = open(&[0u8; 32], nonces::PV_MSG02, &[0u8; 15]);
            assert!(matches!(result, Err(CryptoError::Decryption(_))));
        }

        #[test]
        fn rfc8439_aead_vector() {
            // RFC 8439 section 2.8.2, with the nonce split as 4 constant bytes + 8.
            let key: [u8; 32] = hex::decode(
                "808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f",
            )
            .unwrap()
            .try_into()
            .unwrap();
            let nonce = hex::decode("070000004041424344454647").unwrap();
            let aad = hex::decode("50515253c0c1c2c3c4c5c6c7").unwrap();
            let plaintext = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.";

            let cipher = ChaCha20Poly1305::new(&key.into());
            let out = cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: plaintext,
                        aad: &aad,
                    },
                )
                .unwrap();
            assert_eq!(
                hex::encode(&out[out.len() - TAG_LEN..]),
                "1ae10b594f09e26a7e902ecbd0600691"
            );
        }
    }
}
