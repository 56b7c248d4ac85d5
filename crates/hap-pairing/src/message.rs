//! Checks and helpers shared by both handshakes.

use hap_core::error::{PairingError, Result};
use hap_crypto::chacha;
use hap_crypto::tlv::{Tlv8, TlvType};
use tracing::warn;

/// Parse a handshake response and check it against the expected state.
///
/// An `Error` item takes precedence over everything else in the message.
pub(crate) fn check_response(body: &[u8], expected_state: u8) -> Result<Tlv8> {
    let tlv = Tlv8::parse(body)?;

    if let Some(error) = tlv.protocol_error() {
        warn!(
            state = expected_state,
            error = error.name(),
            retry_delay = tlv.retry_delay(),
            "accessory reported pairing error"
        );
        return Err(PairingError::Protocol(error).into());
    }

    match tlv.state() {
        Some(actual) if actual == expected_state => Ok(tlv),
        Some(actual) => Err(PairingError::UnexpectedState {
            expected: expected_state,
            actual,
        }
        .into()),
        None => Err(PairingError::MissingTlv(TlvType::State as u8).into()),
    }
}

/// Encrypt a sub-TLV under a fixed-nonce handshake key.
pub(crate) fn seal_sub_tlv(key: &[u8; 32], nonce: &[u8; 8], inner: &Tlv8) -> Result<Vec<u8>> {
    Ok(chacha::seal(key, nonce, &inner.encode())?)
}

/// Decrypt and parse the `EncryptedData` item of a handshake response.
pub(crate) fn open_sub_tlv(key: &[u8; 32], nonce: &[u8; 8], outer: &Tlv8) -> Result<Tlv8> {
    let encrypted = outer.require(TlvType::EncryptedData)?;
    let plaintext = chacha::open(key, nonce, encrypted)?;
    Ok(Tlv8::parse(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hap_core::error::{Error, ProtocolError};

    #[test]
    fn accepts_expected_state() {
        let body = Tlv8::new().with(TlvType::State, vec![2]).encode();
        assert_eq!(check_response(&body, 2).unwrap().state(), Some(2));
    }

    #[test]
    fn error_item_wins_over_state() {
        let body = Tlv8::new()
            .with(TlvType::State, vec![4])
            .with(TlvType::Error, vec![0x02])
            .encode();
        assert!(matches!(
            check_response(&body, 4),
            Err(Error::Pairing(PairingError::Protocol(ProtocolError::Authentication)))
        ));
    }

    #[test]
    fn wrong_state_is_reported() {
        let body = Tlv8::new().with(TlvType::State, vec![6]).encode();
        assert!(matches!(
            check_response(&body, 4),
            Err(Error::Pairing(PairingError::UnexpectedState {
                expected: 4,
                actual: 6
            }))
        ));
    }

    #[test]
    fn missing_state_is_reported() {
        let body = Tlv8::new().with(TlvType::Proof, vec![1; 64]).encode();
        assert!(matches!(
            check_response(&body, 4),
            Err(Error::Pairing(PairingError::MissingTlv(0x06)))
        ));
    }

    #[test]
    fn truncated_body_is_tlv_error() {
        assert!(matches!(check_response(&[0x06, 0x05, 0x01], 2), Err(Error::Tlv(_))));
    }

    #[test]
    fn sub_tlv_roundtrip() {
        let key = [0x33u8; 32];
        let inner = Tlv8::new()
            .with(TlvType::Identifier, b"controller".to_vec())
            .with(TlvType::Signature, vec![9u8; 64]);
        let sealed = seal_sub_tlv(&key, chacha::nonces::PV_MSG03, &inner).unwrap();
        let outer = Tlv8::new().with(TlvType::EncryptedData, sealed);

        let opened = open_sub_tlv(&key, chacha::nonces::PV_MSG03, &outer).unwrap();
        assert_eq!(opened, inner);

        // Wrong nonce must not open.
        assert!(open_sub_tlv(&key, chacha::nonces::PV_MSG02, &outer).is_err());
    }
}
