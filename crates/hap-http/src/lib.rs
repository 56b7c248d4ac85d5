//! # hap-http
//!
//! HTTP transport for HAP controllers.
//!
//! This crate provides:
//! - Request formatting for the pairing and characteristic endpoints
//! - An incremental response framer that also understands `EVENT/1.0` pushes
//! - A connection driver that serializes requests and applies session encryption

pub mod framer;
mod pipeline;
mod request;
mod response;
mod traits;

pub use framer::{MessageFramer, ResponseCollector, ResponseDecoder, ResponseHead};
pub use pipeline::{EventReceiver, Pipeline, DEFAULT_RESPONSE_TIMEOUT};
pub use request::{HapRequest, Method, CONTENT_TYPE_JSON, CONTENT_TYPE_TLV8};
pub use response::HapResponse;
pub use traits::HapTransport;

#[cfg(any(test, feature = "mock"))]
pub use traits::MockHapTransport;
