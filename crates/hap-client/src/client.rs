//! Main HAP controller API.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use hap_core::error::{Error, HttpError, PairingError, ProtocolError, Result};
use hap_core::{parse_events, AccessoryDatabase};
use hap_http::{EventReceiver, HapRequest, HapResponse, HapTransport, Pipeline};
use hap_pairing::{FilePairingStore, MemoryPairingStore, PairingSession, PairingStep, PairingStore};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::{ClientConfig, ClientEvent, EventHandler};

/// Controller for one accessory connection.
pub struct HapClient<T: HapTransport> {
    transport: T,
    session: PairingSession,
    store: Arc<dyn PairingStore>,
    config: ClientConfig,
    database: Option<AccessoryDatabase>,
    events: Option<EventReceiver>,
    /// Events decoded by `next_event` but not yet returned.
    pending: VecDeque<ClientEvent>,
    event_handler: Option<Box<dyn EventHandler>>,
    /// The accessory on this connection has no usable stored pairing.
    setup_needed: bool,
}

/// Store selected by `config.pairing_file`.
pub fn store_for(config: &ClientConfig) -> Arc<dyn PairingStore> {
    match &config.pairing_file {
        Some(path) => Arc::new(FilePairingStore::new(path.clone())),
        None => Arc::new(MemoryPairingStore::new()),
    }
}

impl HapClient<Pipeline> {
    /// Drive an already-open accessory connection.
    pub fn from_stream<S>(stream: S, config: ClientConfig, store: Arc<dyn PairingStore>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (pipeline, events) = Pipeline::spawn(stream);
        let pipeline = pipeline.with_timeout(config.response_timeout);
        Ok(Self::new(pipeline, config, store)?.with_events(events))
    }

    /// Connect to an accessory over TCP.
    pub async fn connect(
        addr: SocketAddr,
        config: ClientConfig,
        store: Arc<dyn PairingStore>,
    ) -> Result<Self> {
        let (pipeline, events) = Pipeline::connect(addr).await?;
        let pipeline = pipeline.with_timeout(config.response_timeout);
        Ok(Self::new(pipeline, config, store)?.with_events(events))
    }
}

impl<T: HapTransport> HapClient<T> {
    /// Create a client that knows every pairing held by `store`.
    ///
    /// Which one applies is settled by pair-verify, once the accessory on
    /// the connection has named itself.
    pub fn new(transport: T, config: ClientConfig, store: Arc<dyn PairingStore>) -> Result<Self> {
        config.validate()?;
        let records = store.load_all()?;
        debug!(count = records.len(), "using stored pairings");
        let session = PairingSession::from_records(&config.setup_code, &records)?;

        Ok(Self {
            transport,
            session,
            store,
            config,
            database: None,
            events: None,
            pending: VecDeque::new(),
            event_handler: None,
            setup_needed: false,
        })
    }

    /// Attach the channel carrying accessory pushes.
    pub fn with_events(mut self, events: EventReceiver) -> Self {
        self.events = Some(events);
        self
    }

    pub fn set_event_handler(&mut self, handler: impl EventHandler + 'static) {
        self.event_handler = Some(Box::new(handler));
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &PairingSession {
        &self.session
    }

    pub fn is_paired(&self) -> bool {
        self.session.is_paired()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Last fetched accessory database.
    pub fn database(&self) -> Option<&AccessoryDatabase> {
        self.database.as_ref()
    }

    async fn emit_event(&self, event: ClientEvent) {
        if let Some(ref handler) = self.event_handler {
            handler.on_event(event).await;
        }
    }

    /// Pair (if needed) and verify, retrying up to `max_pairing_attempts`.
    ///
    /// When the accessory is not among the stored pairings, or rejects the
    /// one stored for it, pair-setup runs in the same attempt. Only the
    /// rejected accessory's record is removed from the store.
    pub async fn pair(&mut self) -> Result<()> {
        if self.session.is_paired() {
            return Ok(());
        }

        let attempts = self.config.max_pairing_attempts;
        let mut attempt = 1;
        loop {
            match self.try_pair().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() || attempt >= attempts => {
                    error!(attempt, error = %e, "failed to pair accessory");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "pairing attempt failed");
                    attempt += 1;
                }
            }
        }
    }

    async fn try_pair(&mut self) -> Result<()> {
        if self.session.has_pairing() && !self.setup_needed {
            match self.pair_verify().await {
                Ok(()) => return Ok(()),
                Err(e) if is_stale_pairing(&e) => self.drop_rejected_pairing()?,
                Err(e) => return Err(e),
            }
        }

        self.setup_needed = true;
        self.pair_setup().await?;
        self.setup_needed = false;
        self.pair_verify().await
    }

    /// Forget the pairing with the accessory that just refused pair-verify.
    ///
    /// Nothing is removed when the accessory was never identified, or is
    /// unknown to us.
    fn drop_rejected_pairing(&mut self) -> Result<()> {
        let Some(peer_id) = self.session.peer_id().map(str::to_owned) else {
            info!("accessory has no stored pairing, running pair-setup");
            return Ok(());
        };
        warn!(peer_id = %peer_id, "accessory rejected the stored pairing, removing it");
        self.session.forget_peer(&peer_id);
        self.store.remove(&peer_id)
    }

    /// Run pair-setup with the configured setup code and store the result.
    pub async fn pair_setup(&mut self) -> Result<()> {
        info!("starting pair-setup");
        let m1 = self.session.start_pair_setup()?;

        match self.run_handshake(m1, HapRequest::pair_setup).await {
            Ok(PairingStep::SetupComplete(record)) => {
                self.store.save(&record)?;
                self.emit_event(ClientEvent::Paired).await;
                Ok(())
            }
            Ok(_) => Err(PairingError::InvalidState("pair-setup ended without a pairing".to_string()).into()),
            Err(e) => {
                self.emit_event(ClientEvent::PairingFailed(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Run pair-verify and switch the connection to session encryption.
    pub async fn pair_verify(&mut self) -> Result<()> {
        info!("starting pair-verify");
        let m1 = self.session.start_pair_verify()?;

        match self.run_handshake(m1, HapRequest::pair_verify).await {
            Ok(PairingStep::Verified(keys)) => {
                if let Err(e) = self.transport.enable_encryption(keys).await {
                    self.session.reset();
                    return Err(e);
                }
                info!("pair-verify complete, session encrypted");
                self.emit_event(ClientEvent::Verified).await;
                Ok(())
            }
            Ok(_) => Err(PairingError::InvalidState("pair-verify ended without session keys".to_string()).into()),
            Err(e) => {
                self.emit_event(ClientEvent::PairingFailed(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Exchange handshake messages until the running handshake finishes.
    async fn run_handshake(
        &mut self,
        first: Vec<u8>,
        request: fn(Vec<u8>) -> HapRequest,
    ) -> Result<PairingStep> {
        let mut body = first;
        loop {
            let response = match self.transport.send(request(body)).await {
                Ok(response) => response,
                Err(e) => {
                    self.session.reset();
                    return Err(e);
                }
            };
            if let Err(e) = response.ensure_success() {
                self.session.reset();
                return Err(e);
            }

            match self.session.handle_response(&response.body)? {
                PairingStep::Send(next) => body = next,
                done => return Ok(done),
            }
        }
    }

    /// Plain `GET` of the accessories path, allowed before pairing.
    ///
    /// Returns the status code; unverified accessories answer 470.
    pub async fn probe(&mut self) -> Result<u16> {
        let request = HapRequest::get_accessories(self.config.accessories_path.clone());
        let response = self.transport.send(request).await?;
        info!(status = response.status_code, "accessory probed");
        Ok(response.status_code)
    }

    /// Fetch and cache the accessory database.
    pub async fn get_accessories(&mut self) -> Result<&AccessoryDatabase> {
        self.require_paired()?;
        let request = HapRequest::get_accessories(self.config.accessories_path.clone());
        let response = self.request(request).await?;
        let database = AccessoryDatabase::from_json(&response.body)?;

        if let Some(info) = database.info(1) {
            info!(
                name = %info.name,
                manufacturer = %info.manufacturer,
                model = %info.model,
                serial = %info.serial_number,
                firmware = %info.firmware_revision,
                "accessory information"
            );
        }
        info!(accessories = database.accessories.len(), "accessory database loaded");
        Ok(&*self.database.insert(database))
    }

    /// Write one characteristic.
    pub async fn set_value(&mut self, aid: u64, iid: u64, value: Value) -> Result<()> {
        self.require_paired()?;
        info!(aid, iid, value = %value, "set value");

        let body = json!({
            "characteristics": [{ "aid": aid, "iid": iid, "value": value.clone() }]
        });
        self.write_characteristics(&body).await?;

        if let Some(database) = self.database.as_mut() {
            database.apply_update(aid, iid, value);
        }
        Ok(())
    }

    /// Enable events on every evented characteristic of the cached database.
    ///
    /// Returns the number of characteristics subscribed.
    pub async fn subscribe(&mut self) -> Result<usize> {
        self.require_paired()?;
        let database = self.database.as_ref().ok_or_else(|| {
            PairingError::InvalidState("no accessory database, fetch accessories first".to_string())
        })?;

        let entries: Vec<Value> = database
            .evented()
            .into_iter()
            .map(|c| {
                debug!(aid = c.aid, iid = c.iid, "subscribing");
                json!({ "aid": c.aid, "iid": c.iid, "ev": true })
            })
            .collect();
        let count = entries.len();
        if count == 0 {
            info!("no evented characteristics");
            return Ok(0);
        }

        self.write_characteristics(&json!({ "characteristics": entries }))
            .await?;
        info!(count, "subscribed to events");
        Ok(count)
    }

    /// Cached value of a characteristic.
    pub fn get_value(&self, aid: u64, iid: u64) -> Result<Option<&Value>> {
        self.require_paired()?;
        Ok(self
            .database
            .as_ref()
            .and_then(|db| db.characteristic(aid, iid))
            .and_then(|c| c.value.as_ref()))
    }

    /// Short service and characteristic types of a cached characteristic.
    pub fn get_type(&self, aid: u64, iid: u64) -> Result<Option<(String, String)>> {
        self.require_paired()?;
        Ok(self
            .database
            .as_ref()
            .and_then(|db| db.types_of(aid, iid)))
    }

    /// Wait for the next accessory event.
    ///
    /// Returns `Disconnected` once when the connection ends, then `None`.
    /// Pushes that arrived during a request were already applied to the
    /// cached database and are returned here in order.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let message = self.events.as_mut()?.recv().await;
            match message {
                Some(message) => {
                    let events = self.handle_event_message(&message).await;
                    self.pending.extend(events);
                }
                None => {
                    self.events = None;
                    let event = ClientEvent::Disconnected(None);
                    self.emit_event(event.clone()).await;
                    return Some(event);
                }
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.session.reset();
        self.transport.close().await
    }

    fn require_paired(&self) -> Result<()> {
        if self.session.is_paired() {
            Ok(())
        } else {
            Err(PairingError::NotPaired.into())
        }
    }

    async fn request(&mut self, request: HapRequest) -> Result<HapResponse> {
        let result = self.transport.send(request).await;
        self.drain_events().await;

        match result {
            Ok(response) => {
                response.ensure_success()?;
                Ok(response)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.emit_event(ClientEvent::Disconnected(Some(e.to_string())))
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn write_characteristics(&mut self, body: &Value) -> Result<()> {
        let request = HapRequest::put_characteristics(serde_json::to_vec(body)?);
        let response = self.request(request).await?;

        // 207 Multi-Status carries a status per characteristic
        if response.status_code == 207 {
            let statuses: WriteStatuses = response.json()?;
            if let Some(failed) = statuses.characteristics.iter().find(|s| s.status != 0) {
                warn!(aid = failed.aid, iid = failed.iid, status = failed.status, "write rejected");
                return Err(HttpError::InvalidResponse(format!(
                    "characteristic {}.{} rejected with status {}",
                    failed.aid, failed.iid, failed.status
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Apply pushes that arrived while a request was in flight.
    async fn drain_events(&mut self) {
        loop {
            let Some(events) = self.events.as_mut() else {
                return;
            };
            match events.try_recv() {
                Ok(message) => {
                    let events = self.handle_event_message(&message).await;
                    self.pending.extend(events);
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.events = None;
                    let event = ClientEvent::Disconnected(None);
                    self.emit_event(event.clone()).await;
                    self.pending.push_back(event);
                    return;
                }
            }
        }
    }

    async fn handle_event_message(&mut self, message: &HapResponse) -> Vec<ClientEvent> {
        let updates = match parse_events(&message.body) {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "ignoring malformed event");
                return Vec::new();
            }
        };

        let mut events = Vec::with_capacity(updates.len());
        for update in updates {
            debug!(aid = update.aid, iid = update.iid, value = %update.value, "characteristic changed");
            if let Some(database) = self.database.as_mut() {
                if !database.apply_update(update.aid, update.iid, update.value.clone()) {
                    debug!(aid = update.aid, iid = update.iid, "event for unknown characteristic");
                }
            }
            let event = ClientEvent::CharacteristicChanged(update);
            self.emit_event(event.clone()).await;
            events.push(event);
        }
        events
    }
}

/// Pair-verify failures that a fresh pair-setup can cure.
fn is_stale_pairing(e: &Error) -> bool {
    matches!(
        e,
        Error::Pairing(PairingError::Protocol(ProtocolError::Authentication))
            | Error::Pairing(PairingError::NotPaired)
            | Error::Pairing(PairingError::ServerSignatureInvalid)
    )
}

#[derive(Deserialize)]
struct WriteStatuses {
    characteristics: Vec<WriteStatus>,
}

#[derive(Deserialize)]
struct WriteStatus {
    aid: u64,
    iid: u64,
    #[serde(default)]
    status: i64,
}
