//! HAP response type.

use std::collections::HashMap;

use hap_core::error::{HttpError, Result};

use crate::framer::{ResponseCollector, ResponseDecoder, ResponseHead};

/// Parsed HAP response or accessory event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Unsolicited `EVENT/1.0` push rather than a reply.
    pub is_event: bool,
}

impl HapResponse {
    pub(crate) fn from_head(head: &ResponseHead) -> Self {
        Self {
            status_code: head.status_code,
            status_text: head.status_text.clone(),
            headers: head.headers.clone(),
            body: Vec::new(),
            is_event: head.is_event,
        }
    }

    /// Parse exactly one complete message.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut decoder = ResponseDecoder::new();
        let mut collector = ResponseCollector::new();
        decoder.feed(data, &mut collector)?;

        let response = collector
            .pop()
            .ok_or_else(|| HttpError::InvalidResponse("incomplete response".to_string()))?;
        if !decoder.is_idle() || collector.completed() > 0 {
            return Err(
                HttpError::InvalidResponse("unexpected bytes after response".to_string()).into(),
            );
        }
        Ok(response)
    }

    /// Check if response indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Get header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Parse body as HAP JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(HttpError::InvalidResponse("no body to parse".to_string()).into());
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Ensure success, returning error if not.
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(HttpError::UnexpectedStatus(self.status_code).into())
        }
    }
}
