//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are split across consecutive items of the
//! same type, terminated by an item shorter than 255 bytes (possibly empty).

use hap_core::error::{PairingError, ProtocolError, TlvError};

/// Largest value a single TLV8 item can carry.
pub const MAX_ITEM_LEN: usize = 255;

/// TLV type constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

/// A TLV8 message: ordered (type, value) pairs.
///
/// Encoding emits items in insertion order. Setting a type that is already
/// present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Consecutive items with the same type are concatenated into one value.
    pub fn parse(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(TlvError::TruncatedHeader { offset: i });
            }

            let typ = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(TlvError::ValueOverrun {
                    tag: typ,
                    declared: len,
                    available: data.len() - i,
                });
            }

            let value = &data[i..i + len];
            i += len;

            match items.last_mut() {
                Some((last, existing)) if *last == typ => existing.extend_from_slice(value),
                _ => items.push((typ, value.to_vec())),
            }
        }

        Ok(Self { items })
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.encoded_len());

        for (typ, value) in &self.items {
            if value.len() <= MAX_ITEM_LEN {
                result.push(*typ);
                result.push(value.len() as u8);
                result.extend_from_slice(value);
                continue;
            }

            let mut rest = value.as_slice();
            loop {
                let take = rest.len().min(MAX_ITEM_LEN);
                result.push(*typ);
                result.push(take as u8);
                result.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                // A full item always needs a follower so the value is closed.
                if take < MAX_ITEM_LEN {
                    break;
                }
            }
        }

        result
    }

    fn encoded_len(&self) -> usize {
        self.items
            .iter()
            .map(|(_, v)| v.len() + 2 * (v.len() / MAX_ITEM_LEN + 1))
            .sum()
    }

    /// Get value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, v)| v.as_slice())
    }

    /// Get a value the handshake cannot proceed without.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], PairingError> {
        self.get(typ).ok_or(PairingError::MissingTlv(typ as u8))
    }

    /// Set value for type.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.set_raw(typ as u8, value);
    }

    /// Set value for raw type.
    pub fn set_raw(&mut self, typ: u8, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.set(typ, value);
        self
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// Item types in wire order.
    pub fn types(&self) -> impl Iterator<Item = u8> + '_ {
        self.items.iter().map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Error code mapped through the accessory error table.
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        self.error().map(ProtocolError::from_code)
    }

    /// Get retry delay value in seconds (sent alongside `Backoff`).
    /// The value is little-endian encoded (1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }

    /// Create M1 pair-setup request.
    pub fn pair_setup_m1() -> Self {
        Self::new()
            .with(TlvType::State, vec![0x01])
            .with(TlvType::Method, vec![0x00])
    }

    /// Create M1 pair-verify request with public key.
    pub fn pair_verify_m1(public_key: &[u8; 32]) -> Self {
        Self::new()
            .with(TlvType::State, vec![0x01])
            .with(TlvType::PublicKey, public_key.to_vec())
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }

    /// Symbolic name, used when logging messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Method => "Method",
            Self::Identifier => "Identifier",
            Self::Salt => "Salt",
            Self::PublicKey => "PublicKey",
            Self::Proof => "Proof",
            Self::EncryptedData => "EncryptedData",
            Self::State => "State",
            Self::Error => "Error",
            Self::RetryDelay => "RetryDelay",
            Self::Certificate => "Certificate",
            Self::Signature => "Signature",
            Self::Permissions => "Permissions",
            Self::FragmentData => "FragmentData",
            Self::FragmentLast => "FragmentLast",
            Self::Flags => "Flags",
            Self::Separator => "Separator",
        }
    }
}

/// Lists item names and lengths, never values.
impl std::fmt::Display for Tlv8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (typ, value)) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match TlvType::from_byte(*typ) {
                Some(known) => write!(f, "{}[{}]", known.name(), value.len())?,
                None => write!(f, "{:#04x}[{}]", typ, value.len())?,
            }
        }
        write!(f, "}}")
    }
}
