//! Client events and handlers.

use async_trait::async_trait;
use hap_core::CharacteristicEvent;

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Pair-setup finished and the pairing was stored.
    Paired,
    /// Pair-verify finished; the session is encrypted.
    Verified,
    PairingFailed(String),
    /// Connection ended.
    Disconnected(Option<String>),
    /// Accessory pushed a new characteristic value.
    CharacteristicChanged(CharacteristicEvent),
}

/// Handler for client events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: ClientEvent);
}

/// No-op event handler.
pub struct NoOpHandler;

#[async_trait]
impl EventHandler for NoOpHandler {
    async fn on_event(&self, _event: ClientEvent) {}
}

/// Callback-based event handler.
pub struct CallbackHandler<F>
where
    F: Fn(ClientEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(ClientEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(ClientEvent) + Send + Sync,
{
    async fn on_event(&self, event: ClientEvent) {
        (self.callback)(event);
    }
}
