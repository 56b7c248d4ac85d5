//! Serialized request/response pipeline over one accessory connection.
//!
//! A single driver task owns the stream, the session cipher and the response
//! decoder. Callers hand it work through a queue and wait on a per-request
//! completion channel; the driver writes the next request only after the
//! previous response has been delivered. `EVENT/1.0` pushes never complete a
//! request and go to the event channel instead.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use hap_core::error::{CryptoError, Error, Result};
use hap_crypto::{SessionCipher, SessionKeys};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::framer::{ResponseCollector, ResponseDecoder};
use crate::request::HapRequest;
use crate::response::HapResponse;
use crate::traits::HapTransport;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_QUEUE_DEPTH: usize = 16;
const READ_CHUNK: usize = 4096;

/// Accessory pushes, in arrival order. Closes when the connection ends.
pub type EventReceiver = mpsc::UnboundedReceiver<HapResponse>;

enum Command {
    Exchange {
        request: Vec<u8>,
        reply: oneshot::Sender<Result<HapResponse>>,
    },
    EnableEncryption {
        keys: SessionKeys,
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a connection driver.
///
/// Dropping the handle stops the driver and closes the connection.
pub struct Pipeline {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    response_timeout: Duration,
    encrypted: bool,
}

impl Pipeline {
    /// Start a driver for `stream`.
    pub fn spawn<S>(stream: S) -> (Self, EventReceiver)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events_tx, events) = mpsc::unbounded_channel();

        let driver = Driver {
            stream,
            cipher: None,
            encrypted_input: Vec::new(),
            decoder: ResponseDecoder::new(),
            collector: ResponseCollector::new(),
            commands: command_rx,
            events: events_tx,
        };
        let task = tokio::spawn(driver.run());

        let pipeline = Self {
            commands,
            task,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            encrypted: false,
        };
        (pipeline, events)
    }

    /// Open a TCP connection to an accessory.
    pub async fn connect(addr: SocketAddr) -> Result<(Self, EventReceiver)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to accessory");
        Ok(Self::spawn(stream))
    }

    /// Upper bound on waiting for one response, including queueing.
    pub fn with_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Send `request` once every earlier request has completed, and wait for its response.
    pub async fn exchange(&self, request: &HapRequest) -> Result<HapResponse> {
        debug!(
            method = request.method.as_str(),
            path = %request.path,
            body_len = request.body.as_ref().map(|b| b.len()).unwrap_or(0),
            encrypted = self.encrypted,
            "HAP ->"
        );

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Exchange {
                request: request.serialize(),
                reply,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let response = match timeout(self.response_timeout, response).await {
            Err(_) => {
                warn!(path = %request.path, timeout = ?self.response_timeout, "response timed out");
                return Err(Error::Timeout);
            }
            // Driver stopped with the request still queued
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Ok(Ok(result)) => result?,
        };

        debug!(
            status = response.status_code,
            body_len = response.body.len(),
            "HAP <-"
        );
        Ok(response)
    }

    /// Encrypt everything after the response currently being read.
    pub async fn enable_encryption(&mut self, keys: SessionKeys) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::EnableEncryption { keys, reply })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        done.await.map_err(|_| Error::ConnectionClosed)?;
        self.encrypted = true;
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished() && !self.commands.is_closed()
    }

    /// Stop the driver and close the connection.
    pub fn shutdown(&mut self) {
        self.task.abort();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl HapTransport for Pipeline {
    async fn send(&mut self, request: HapRequest) -> Result<HapResponse> {
        self.exchange(&request).await
    }

    async fn enable_encryption(&mut self, keys: SessionKeys) -> Result<()> {
        Pipeline::enable_encryption(self, keys).await
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn is_connected(&self) -> bool {
        Pipeline::is_connected(self)
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

struct Driver<S> {
    stream: S,
    cipher: Option<SessionCipher>,
    /// Ciphertext not yet forming a whole frame.
    encrypted_input: Vec<u8>,
    decoder: ResponseDecoder,
    collector: ResponseCollector,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<HapResponse>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_CHUNK];

        let reason = loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break "pipeline handle dropped".to_string();
                    };
                    if let ControlFlow::Break(reason) = self.handle(command, &mut buf).await {
                        break reason;
                    }
                }
                read = self.stream.read(&mut buf) => match read {
                    Ok(0) => break "connection closed by accessory".to_string(),
                    Ok(n) => {
                        if let Err(e) = self.receive(&buf[..n]) {
                            break e.to_string();
                        }
                        self.dispatch_unsolicited();
                    }
                    Err(e) => break e.to_string(),
                },
            }
        };

        debug!(reason = %reason, "connection driver stopped");
    }

    async fn handle(&mut self, command: Command, buf: &mut [u8]) -> ControlFlow<String> {
        match command {
            Command::Exchange { request, reply } => {
                let result = self.exchange(&request, buf).await;
                // A failed exchange leaves the stream out of sync
                let stop = result.as_ref().err().map(|e| e.to_string());
                if reply.send(result).is_err() {
                    debug!("requester went away, response discarded");
                }
                match stop {
                    Some(reason) => ControlFlow::Break(reason),
                    None => ControlFlow::Continue(()),
                }
            }
            Command::EnableEncryption { keys, reply } => {
                if !self.decoder.is_idle() {
                    warn!(
                        buffered = self.decoder.buffered(),
                        "plaintext bytes pending when enabling encryption"
                    );
                }
                self.cipher = Some(keys.cipher());
                self.encrypted_input.clear();
                debug!("session encryption enabled");
                let _ = reply.send(());
                ControlFlow::Continue(())
            }
        }
    }

    async fn exchange(&mut self, request: &[u8], buf: &mut [u8]) -> Result<HapResponse> {
        let wire = match self.cipher.as_mut() {
            Some(cipher) => cipher.encrypt(request)?,
            None => request.to_vec(),
        };
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        trace!(wire_len = wire.len(), "request written");

        loop {
            while let Some(message) = self.collector.pop() {
                if message.is_event {
                    self.emit_event(message);
                } else {
                    return Ok(message);
                }
            }

            let n = self.stream.read(buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.receive(&buf[..n])?;
        }
    }

    /// Decrypt (when keyed) and frame newly read bytes.
    fn receive(&mut self, data: &[u8]) -> Result<()> {
        match self.cipher.as_mut() {
            Some(cipher) => {
                self.encrypted_input.extend_from_slice(data);
                let plaintext = match cipher.decrypt_available(&mut self.encrypted_input) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        if let CryptoError::DecryptionFailure { counter } = &e {
                            error!(counter = *counter, "session frame failed authentication");
                        }
                        return Err(e.into());
                    }
                };
                trace!(len = plaintext.len(), counter = cipher.decrypt_counter(), "frames decrypted");
                self.decoder.feed(&plaintext, &mut self.collector)?;
            }
            None => self.decoder.feed(data, &mut self.collector)?,
        }
        Ok(())
    }

    /// Messages that arrived with no request outstanding.
    fn dispatch_unsolicited(&mut self) {
        while let Some(message) = self.collector.pop() {
            if message.is_event {
                self.emit_event(message);
            } else {
                warn!(status = message.status_code, "discarding unsolicited response");
            }
        }
    }

    fn emit_event(&self, message: HapResponse) {
        trace!(body_len = message.body.len(), "event received");
        if self.events.send(message).is_err() {
            trace!("no event listener");
        }
    }
}
