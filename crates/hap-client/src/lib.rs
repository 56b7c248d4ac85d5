//! # hap-client
//!
//! HomeKit Accessory Protocol controller.
//!
//! Pairs with an accessory, verifies the session, then reads and writes
//! characteristics over the encrypted connection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hap_client::{store_for, ClientConfig, HapClient};
//! use serde_json::json;
//!
//! # async fn example() -> hap_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let store = store_for(&config);
//! let mut client = HapClient::connect("192.168.1.20:51826".parse().unwrap(), config, store).await?;
//!
//! client.pair().await?;
//! client.get_accessories().await?;
//! client.set_value(1, 10, json!(true)).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod events;

pub use client::{store_for, HapClient};
pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_ACCESSORIES_PATH, DEFAULT_MAX_PAIRING_ATTEMPTS,
    DEFAULT_SETUP_CODE, ENV_PAIRING_FILE, ENV_SETUP_CODE, ENV_TIMEOUT_SECS,
};
pub use events::{CallbackHandler, ClientEvent, EventHandler, NoOpHandler};

pub use hap_core::{AccessoryDatabase, CharacteristicEvent, Error, Result};
pub use hap_http::{HapTransport, Pipeline};
pub use hap_pairing::{FilePairingStore, MemoryPairingStore, PairingRecord, PairingStore};
