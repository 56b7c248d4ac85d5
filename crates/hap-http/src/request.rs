//! HAP request formatting.

use std::collections::HashMap;

pub const CONTENT_TYPE_TLV8: &str = "application/pairing+tlv8";
pub const CONTENT_TYPE_JSON: &str = "application/hap+json";

/// HTTP methods used by HAP controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
        }
    }
}

/// HAP request builder.
#[derive(Debug, Clone)]
pub struct HapRequest {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HapRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize to wire format.
    ///
    /// ```text
    /// METHOD PATH HTTP/1.1\r\n
    /// Host: homekit\r\n
    /// Content-Length: M\r\n  (if body present)
    /// Header: Value\r\n
    /// \r\n
    /// [body]
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\nHost: homekit\r\n", self.method.as_str(), self.path);

        if let Some(ref body) = self.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }

        // Sorted for stable output
        let mut sorted_headers: Vec<_> = self.headers.iter().collect();
        sorted_headers.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in sorted_headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        if let Some(ref body) = self.body {
            out.extend_from_slice(body);
        }
        out
    }

    pub fn pair_setup(body: Vec<u8>) -> Self {
        Self::new(Method::Post, "/pair-setup")
            .header("Content-Type", CONTENT_TYPE_TLV8)
            .body(body)
    }

    pub fn pair_verify(body: Vec<u8>) -> Self {
        Self::new(Method::Post, "/pair-verify")
            .header("Content-Type", CONTENT_TYPE_TLV8)
            .body(body)
    }

    pub fn get_accessories(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `PUT /characteristics` with a JSON body.
    pub fn put_characteristics(body: Vec<u8>) -> Self {
        Self::new(Method::Put, "/characteristics")
            .header("Content-Type", CONTENT_TYPE_JSON)
            .body(body)
    }
}
