//! # hap-core
//!
//! Core types and error definitions shared across the HAP controller crates.
//!
//! This crate provides:
//! - The error taxonomy, including the accessory error-code table
//! - The accessory/service/characteristic data model

pub mod accessory;
pub mod error;

pub use accessory::{
    parse_events, validate_setup_code, Accessory, AccessoryDatabase, AccessoryInfo,
    Characteristic, CharacteristicEvent, Service,
};
pub use error::{
    CryptoError, Error, HttpError, PairingError, ParseError, ProtocolError, Result, TlvError,
};
