//! Error types for the HAP controller.

use thiserror::Error;

/// Primary error type for all HAP operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("TLV8 decode error: {0}")]
    Tlv(#[from] TlvError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Whether the connection carrying this error has to be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::ConnectionClosed
                | Error::Crypto(CryptoError::DecryptionFailure { .. })
        )
    }
}

/// Malformed or truncated TLV8 input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("truncated header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("value for type {tag:#04x} overruns input: declared {declared} bytes, {available} available")]
    ValueOverrun {
        tag: u8,
        declared: usize,
        available: usize,
    },
}

/// Error codes an accessory reports in the `Error` TLV item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolError {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

impl ProtocolError {
    pub const ALL: [ProtocolError; 7] = [
        ProtocolError::Unknown,
        ProtocolError::Authentication,
        ProtocolError::Backoff,
        ProtocolError::MaxPeers,
        ProtocolError::MaxTries,
        ProtocolError::Unavailable,
        ProtocolError::Busy,
    ];

    /// Map a wire code to its table entry. Codes outside the table are `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => ProtocolError::Authentication,
            0x03 => ProtocolError::Backoff,
            0x04 => ProtocolError::MaxPeers,
            0x05 => ProtocolError::MaxTries,
            0x06 => ProtocolError::Unavailable,
            0x07 => ProtocolError::Busy,
            _ => ProtocolError::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolError::Unknown => "unknown",
            ProtocolError::Authentication => "authentication",
            ProtocolError::Backoff => "backoff",
            ProtocolError::MaxPeers => "max-peers",
            ProtocolError::MaxTries => "max-tries",
            ProtocolError::Unavailable => "unavailable",
            ProtocolError::Busy => "busy",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.name(), self.code())
    }
}

/// Errors during HomeKit pairing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("Server SRP proof is invalid")]
    ServerProofInvalid,

    #[error("Server signature is invalid")]
    ServerSignatureInvalid,

    #[error("Unexpected pairing state: expected {expected}, got {actual}")]
    UnexpectedState { expected: u8, actual: u8 },

    #[error("Accessory reported error: {0}")]
    Protocol(ProtocolError),

    #[error("Missing required TLV type: {0:#04x}")]
    MissingTlv(u8),

    #[error("Invalid pairing state: {0}")]
    InvalidState(String),

    #[error("No pairing established with accessory")]
    NotPaired,
}

/// Errors in the HTTP-like framing of requests and responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Missing required header: {0}")]
    MissingHeader(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Session frame {counter} failed authentication")]
    DecryptionFailure { counter: u64 },
}

/// Parsing errors for stored records and configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    mod display {
        use super::*;

        #[test]
        fn error_display_formats() {
            let pairing_err = Error::Pairing(PairingError::ServerProofInvalid);
            assert!(pairing_err.to_string().contains("Pairing error"));
            assert!(pairing_err.to_string().contains("SRP proof"));

            let tlv_err = Error::Tlv(TlvError::TruncatedHeader { offset: 3 });
            assert!(tlv_err.to_string().contains("offset 3"));

            let timeout_err = Error::Timeout;
            assert!(timeout_err.to_string().contains("timed out"));

            let state_err = PairingError::UnexpectedState {
                expected: 2,
                actual: 4,
            };
            assert_eq!(
                state_err.to_string(),
                "Unexpected pairing state: expected 2, got 4"
            );
        }

        #[test]
        fn protocol_error_display_includes_name_and_code() {
            let err = PairingError::Protocol(ProtocolError::MaxPeers);
            assert_eq!(
                err.to_string(),
                "Accessory reported error: max-peers (code 4)"
            );
        }

        #[test]
        fn decryption_failure_names_counter() {
            let err = CryptoError::DecryptionFailure { counter: 17 };
            assert!(err.to_string().contains("17"));
        }
    }

    mod protocol_codes {
        use super::*;

        #[test]
        fn table_covers_all_seven_codes() {
            for (i, err) in ProtocolError::ALL.iter().enumerate() {
                let code = (i + 1) as u8;
                assert_eq!(err.code(), code);
                assert_eq!(ProtocolError::from_code(code), *err);
            }
        }

        #[test]
        fn names_match_table() {
            let names: Vec<_> = ProtocolError::ALL.iter().map(|e| e.name()).collect();
            assert_eq!(
                names,
                vec![
                    "unknown",
                    "authentication",
                    "backoff",
                    "max-peers",
                    "max-tries",
                    "unavailable",
                    "busy"
                ]
            );
        }

        #[test]
        fn unlisted_codes_map_to_unknown() {
            assert_eq!(ProtocolError::from_code(0), ProtocolError::Unknown);
            assert_eq!(ProtocolError::from_code(8), ProtocolError::Unknown);
            assert_eq!(ProtocolError::from_code(0xFF), ProtocolError::Unknown);
        }
    }

    mod conversions {
        use super::*;

        #[test]
        fn error_source_chain() {
            use std::error::Error as StdError;

            let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "test");
            let conn_err = Error::Connection(io_err);
            assert!(conn_err.source().is_some());

            let err = Error::Pairing(PairingError::NotPaired);
            assert!(err.source().is_some());
        }

        #[test]
        fn error_conversions() {
            let err: Error = PairingError::ServerSignatureInvalid.into();
            assert!(matches!(err, Error::Pairing(_)));

            let err: Error = TlvError::TruncatedHeader { offset: 0 }.into();
            assert!(matches!(err, Error::Tlv(_)));

            let err: Error = HttpError::UnexpectedStatus(470).into();
            assert!(matches!(err, Error::Http(_)));

            let err: Error = CryptoError::DecryptionFailure { counter: 0 }.into();
            assert!(matches!(err, Error::Crypto(_)));

            let err: Error = ParseError::InvalidHex("zz".to_string()).into();
            assert!(matches!(err, Error::Parse(_)));

            let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
            let err: Error = io_err.into();
            assert!(matches!(err, Error::Connection(_)));
        }

        #[test]
        fn fatal_errors() {
            assert!(Error::from(CryptoError::DecryptionFailure { counter: 2 }).is_fatal());
            assert!(Error::ConnectionClosed.is_fatal());
            assert!(!Error::from(CryptoError::Decryption("bad".into())).is_fatal());
            assert!(!Error::from(PairingError::ServerProofInvalid).is_fatal());
            assert!(!Error::Timeout.is_fatal());
        }
    }
}
