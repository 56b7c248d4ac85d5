//! Traits for HAP transport abstraction.

use async_trait::async_trait;
use hap_core::error::Result;
use hap_crypto::SessionKeys;

use crate::{HapRequest, HapResponse};

/// HAP transport trait for testability.
#[async_trait]
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait HapTransport: Send + Sync {
    /// Send request and receive its response.
    async fn send(&mut self, request: HapRequest) -> Result<HapResponse>;

    /// Encrypt all later traffic with the session keys.
    async fn enable_encryption(&mut self, keys: SessionKeys) -> Result<()>;

    fn is_encrypted(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn mock_transport_returns_configured_response() {
        let mut mock = MockHapTransport::new();

        mock.expect_send().returning(|_request| {
            Box::pin(async {
                Ok(HapResponse {
                    status_code: 200,
                    status_text: "OK".to_string(),
                    headers: HashMap::new(),
                    body: b"{}".to_vec(),
                    is_event: false,
                })
            })
        });
        mock.expect_is_connected().returning(|| true);

        let response = mock
            .send(HapRequest::get_accessories("/accessories"))
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"{}");
        assert!(mock.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_can_simulate_error() {
        let mut mock = MockHapTransport::new();

        mock.expect_send()
            .returning(|_request| Box::pin(async { Err(hap_core::Error::ConnectionClosed) }));

        let result = mock.send(HapRequest::get_accessories("/")).await;
        assert!(matches!(result, Err(hap_core::Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn mock_transport_close_works() {
        let mut mock = MockHapTransport::new();

        mock.expect_close().returning(|| Box::pin(async { Ok(()) }));

        assert!(mock.close().await.is_ok());
    }
}
