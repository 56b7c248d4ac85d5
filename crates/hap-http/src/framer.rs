//! Incremental response framing.
//!
//! [`ResponseDecoder`] turns a byte stream (already decrypted, once the
//! session is encrypted) into framer notifications. Accessory pushes start
//! with `EVENT/1.0` instead of an HTTP version; the decoder rewrites that
//! token to `HTTP/1.1` and flags the head as an event, so events and
//! responses share one path through the framer.

use std::collections::{HashMap, VecDeque};

use hap_core::error::HttpError;
use tracing::trace;

use crate::response::HapResponse;

/// Status-line token of an unsolicited accessory push.
pub const EVENT_VERSION: &str = "EVENT/1.0";
const HTTP_VERSION: &str = "HTTP/1.1";

/// Longest header block accepted before the terminator must appear.
pub const MAX_HEAD_LEN: usize = 16 * 1024;
const MAX_CHUNK_LINE_LEN: usize = 1024;

/// Status line and headers of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    /// Arrived as `EVENT/1.0`.
    pub is_event: bool,
}

impl ResponseHead {
    /// Get header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn body_length(&self) -> Result<usize, HttpError> {
        match self.header("Content-Length") {
            Some(value) => value.trim().parse().map_err(|_| {
                HttpError::InvalidResponse(format!("invalid Content-Length: {}", value))
            }),
            None => Ok(0),
        }
    }
}

/// Receiver of decoded message pieces.
pub trait MessageFramer {
    fn on_message_begin(&mut self);

    fn on_headers_complete(&mut self, head: &ResponseHead);

    /// Body bytes, in order; may be called several times per message.
    fn on_body(&mut self, chunk: &[u8]);

    fn on_message_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailer,
}

/// Push-driven HTTP/1.1 response decoder.
#[derive(Debug)]
pub struct ResponseDecoder {
    buffer: Vec<u8>,
    state: DecodeState,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: DecodeState::Head,
        }
    }

    /// Between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Head && self.buffer.is_empty()
    }

    /// Bytes received but not yet handed to the framer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed received bytes, emitting every message piece they complete.
    pub fn feed<F: MessageFramer>(&mut self, data: &[u8], framer: &mut F) -> Result<(), HttpError> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                DecodeState::Head => {
                    let Some(end) = find(&self.buffer, b"\r\n\r\n") else {
                        if self.buffer.len() > MAX_HEAD_LEN {
                            return Err(HttpError::InvalidResponse(format!(
                                "header block exceeds {} bytes",
                                MAX_HEAD_LEN
                            )));
                        }
                        return Ok(());
                    };

                    let head = parse_head(&self.buffer[..end])?;
                    self.buffer.drain(..end + 4);
                    trace!(
                        status = head.status_code,
                        is_event = head.is_event,
                        "response head decoded"
                    );

                    framer.on_message_begin();
                    framer.on_headers_complete(&head);

                    if head.is_chunked() {
                        self.state = DecodeState::ChunkSize;
                    } else {
                        match head.body_length()? {
                            0 => framer.on_message_complete(),
                            remaining => self.state = DecodeState::Body { remaining },
                        }
                    }
                }
                DecodeState::Body { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let left = self.emit_body(remaining, framer);
                    if left > 0 {
                        self.state = DecodeState::Body { remaining: left };
                        return Ok(());
                    }
                    framer.on_message_complete();
                    self.state = DecodeState::Head;
                }
                DecodeState::ChunkSize => {
                    let Some(line) = self.take_line()? else {
                        return Ok(());
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        DecodeState::Trailer
                    } else {
                        DecodeState::ChunkData { remaining: size }
                    };
                }
                DecodeState::ChunkData { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let left = self.emit_body(remaining, framer);
                    if left > 0 {
                        self.state = DecodeState::ChunkData { remaining: left };
                        return Ok(());
                    }
                    self.state = DecodeState::ChunkDataEnd;
                }
                DecodeState::ChunkDataEnd => {
                    if self.buffer.len() < 2 {
                        return Ok(());
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(HttpError::InvalidResponse(
                            "chunk data not followed by CRLF".to_string(),
                        ));
                    }
                    self.buffer.drain(..2);
                    self.state = DecodeState::ChunkSize;
                }
                DecodeState::Trailer => {
                    let Some(line) = self.take_line()? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        framer.on_message_complete();
                        self.state = DecodeState::Head;
                    }
                }
            }
        }
    }

    /// Hand up to `remaining` buffered bytes to the framer; returns what is still owed.
    fn emit_body<F: MessageFramer>(&mut self, remaining: usize, framer: &mut F) -> usize {
        let n = remaining.min(self.buffer.len());
        framer.on_body(&self.buffer[..n]);
        self.buffer.drain(..n);
        remaining - n
    }

    fn take_line(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        match find(&self.buffer, b"\r\n") {
            Some(pos) => {
                let line = self.buffer[..pos].to_vec();
                self.buffer.drain(..pos + 2);
                Ok(Some(line))
            }
            None if self.buffer.len() > MAX_CHUNK_LINE_LEN => Err(HttpError::InvalidResponse(
                "chunk line too long".to_string(),
            )),
            None => Ok(None),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| HttpError::InvalidResponse("invalid UTF-8 in chunk size".to_string()))?;
    // Chunk extensions follow ';'
    let size = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size, 16)
        .map_err(|_| HttpError::InvalidResponse(format!("invalid chunk size: {}", size)))
}

/// Parse the header block (without the blank line).
fn parse_head(bytes: &[u8]) -> Result<ResponseHead, HttpError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| HttpError::InvalidResponse("invalid UTF-8 in headers".to_string()))?;

    let mut lines = text.split("\r\n");
    let status_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| HttpError::InvalidResponse("missing status line".to_string()))?;

    let (status_line, is_event) = match status_line.strip_prefix(EVENT_VERSION) {
        Some(rest) => (format!("{}{}", HTTP_VERSION, rest), true),
        None => (status_line.to_string(), false),
    };
    let (version, status_code, status_text) = parse_status_line(&status_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok(ResponseHead {
        version,
        status_code,
        status_text,
        headers,
        is_event,
    })
}

/// Parse status line: "HTTP/1.1 200 OK"
fn parse_status_line(line: &str) -> Result<(String, u16, String), HttpError> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(HttpError::InvalidResponse(format!("malformed status line: {}", line)));
    }

    if !parts[0].starts_with("HTTP/") {
        return Err(HttpError::InvalidResponse(format!(
            "not an HTTP response: {}",
            parts[0]
        )));
    }

    let code = parts[1]
        .parse()
        .map_err(|_| HttpError::InvalidResponse(format!("invalid status code: {}", parts[1])))?;

    let text = parts.get(2).unwrap_or(&"").to_string();

    Ok((parts[0].to_string(), code, text))
}

/// Framer that assembles whole [`HapResponse`]s.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    current: Option<HapResponse>,
    complete: VecDeque<HapResponse>,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest completed message, if any.
    pub fn pop(&mut self) -> Option<HapResponse> {
        self.complete.pop_front()
    }

    pub fn completed(&self) -> usize {
        self.complete.len()
    }
}

impl MessageFramer for ResponseCollector {
    fn on_message_begin(&mut self) {
        self.current = None;
    }

    fn on_headers_complete(&mut self, head: &ResponseHead) {
        self.current = Some(HapResponse::from_head(head));
    }

    fn on_body(&mut self, chunk: &[u8]) {
        if let Some(response) = self.current.as_mut() {
            response.body.extend_from_slice(chunk);
        }
    }

    fn on_message_complete(&mut self) {
        if let Some(response) = self.current.take() {
            self.complete.push_back(response);
        }
    }
}
