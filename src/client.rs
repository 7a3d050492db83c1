//! Vantage InFusion controller client
//!
//! Owns the two TCP connections to the controller: the long-lived
//! command/event connection and the single-use configuration connection.
//! Parsed events fan out on a broadcast channel; interface-support answers
//! additionally resolve their pending correlation entries. Outbound commands
//! are serialized through a writer task that enforces the controller's
//! minimum inter-command delay.
//!
//! Transport failure is not retried here: the controller sits on a stable
//! local network, so a dropped connection is logged and surfaced as a
//! connection-state event for external supervision.

use crate::configuration::{ConfigurationAssembler, ConfigurationDecoder, Database};
use crate::error::{VantageError, VantageResult};
use crate::framer::LineFramer;
use crate::{parser, protocol, InterfaceQueryTimeout, VantageConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::time::{sleep, timeout};

/// Controller event, published in the exact order the source lines were
/// framed.
#[derive(Debug, Clone, PartialEq)]
pub enum VantageEvent {
    /// A load's level changed, or a GETLOAD reply arrived
    LoadStatusChanged { vid: u32, value: u32 },
    /// Indoor temperature reading for a thermostat object
    IndoorTemperatureChanged { vid: u32, celsius: f64 },
    /// Outdoor temperature reading for a thermostat object
    OutdoorTemperatureChanged { vid: u32, celsius: f64 },
    /// Answer to an interface-support query
    InterfaceSupportAnswer {
        vid: u32,
        interface_id: u32,
        supported: bool,
    },
    /// The configuration database is available, freshly downloaded or from
    /// cache
    ConfigurationReady(Arc<String>),
    /// No download happened this session and no cache file exists
    ConfigurationUnavailable,
    /// Control connection came up or went down
    ConnectionStateChanged(bool),
}

/// One-shot continuations waiting for interface-support answers, keyed by
/// (device VID, interface id).
type PendingMap = HashMap<(u32, u32), Vec<oneshot::Sender<bool>>>;

/// Client for a Vantage InFusion controller
pub struct VantageClient {
    config: VantageConfig,
    connected: Arc<AtomicBool>,
    interfaces: Arc<RwLock<HashMap<String, u32>>>,
    pending: Arc<Mutex<PendingMap>>,
    tx: Option<mpsc::Sender<String>>,
    event_tx: broadcast::Sender<VantageEvent>,
    /// Shutdown signal sender for the reader task
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl VantageClient {
    /// Create a new client; no connection is made until [`connect`].
    ///
    /// [`connect`]: VantageClient::connect
    pub fn new(config: VantageConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            interfaces: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            tx: None,
            event_tx,
            shutdown_tx: None,
        }
    }

    pub fn config(&self) -> &VantageConfig {
        &self.config
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<VantageEvent> {
        self.event_tx.subscribe()
    }

    /// Check if the control connection is up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Look up an interface id from the session's table.
    pub async fn interface_id(&self, interface_name: &str) -> Option<u32> {
        self.interfaces.read().await.get(interface_name).copied()
    }

    /// Establish the control connection and switch the controller into
    /// event-streaming mode.
    pub async fn connect(&mut self) -> VantageResult<()> {
        let addr = format!("{}:{}", self.config.host, self.config.command_port);
        tracing::info!("Connecting to Vantage InFusion controller at {}", addr);

        let stream = match timeout(self.config.connection_timeout(), TcpStream::connect(&addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(VantageError::ConnectionFailed(format!(
                    "Failed to connect to controller at {}: {}. Check that the controller is reachable and configured without password protection.",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(VantageError::ConnectionTimeout {
                    host: self.config.host.clone(),
                    port: self.config.command_port,
                    duration: self.config.connection_timeout(),
                });
            }
        };

        let (read_half, write_half) = stream.into_split();

        // Channel for outbound commands; the writer task serializes them and
        // enforces the inter-command throttle.
        let (tx, rx) = mpsc::channel::<String>(100);
        self.tx = Some(tx);
        tokio::spawn(Self::writer_task(
            write_half,
            rx,
            self.config.send_interval(),
        ));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let connected = self.connected.clone();
        let event_tx = self.event_tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = Self::reader_task(read_half, event_tx.clone(), pending) => {}
                _ = &mut shutdown_rx => {
                    tracing::info!("Vantage reader task received shutdown signal");
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = event_tx.send(VantageEvent::ConnectionStateChanged(false));
        });

        self.connected.store(true, Ordering::SeqCst);
        let _ = self
            .event_tx
            .send(VantageEvent::ConnectionStateChanged(true));

        // Snapshot current state, then enable unsolicited event streaming.
        for command in protocol::session_bootstrap() {
            self.send_command(&command).await?;
        }

        Ok(())
    }

    /// Writer task - sends commands to the controller, one at a time, with a
    /// fixed delay after each to respect the controller's processing rate.
    async fn writer_task<W: AsyncWrite + Unpin>(
        mut writer: W,
        mut rx: mpsc::Receiver<String>,
        interval: Duration,
    ) {
        while let Some(command) = rx.recv().await {
            tracing::debug!("controller <- {}", command.trim_end());
            if let Err(e) = writer.write_all(command.as_bytes()).await {
                tracing::error!("Vantage write error: {}", e);
                break;
            }
            sleep(interval).await;
        }
    }

    /// Reader task - frames the command stream, classifies each line and
    /// publishes the resulting events; interface-support answers also
    /// resolve their pending correlation entries.
    async fn reader_task<R: AsyncRead + Unpin>(
        mut reader: R,
        event_tx: broadcast::Sender<VantageEvent>,
        pending: Arc<Mutex<PendingMap>>,
    ) {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::info!("Vantage control connection closed (EOF)");
                    break;
                }
                Ok(n) => {
                    for line in framer.push(&buf[..n]) {
                        tracing::debug!("controller -> {}", line);
                        let Some(event) = parser::parse_line(&line) else {
                            continue;
                        };
                        if let VantageEvent::InterfaceSupportAnswer {
                            vid,
                            interface_id,
                            supported,
                        } = &event
                        {
                            let mut pending = pending.lock().await;
                            if let Some(senders) = pending.remove(&(*vid, *interface_id)) {
                                for sender in senders {
                                    let _ = sender.send(*supported);
                                }
                            }
                        }
                        let _ = event_tx.send(event);
                    }
                }
                Err(e) => {
                    tracing::error!("Vantage read error: {}", e);
                    break;
                }
            }
        }
    }

    /// Queue a raw command line for the control connection.
    pub async fn send_command(&self, command: &str) -> VantageResult<()> {
        if let Some(tx) = &self.tx {
            tx.send(command.to_string()).await.map_err(|e| {
                VantageError::ChannelClosed(format!(
                    "Failed to queue command for {}:{}: {}. The connection may have been lost.",
                    self.config.host, self.config.command_port, e
                ))
            })
        } else {
            Err(VantageError::NotConnected)
        }
    }

    /// Request the current status of a load.
    pub async fn send_get_load_status(&self, vid: u32) -> VantageResult<()> {
        self.send_command(&protocol::get_load_status(vid)).await
    }

    /// Set a load's dim level; `time` is the transition in tenths of a
    /// second.
    pub async fn send_set_dim_level(
        &self,
        vid: u32,
        level: u32,
        time: Option<u32>,
    ) -> VantageResult<()> {
        self.send_command(&protocol::set_dim_level(vid, level, time))
            .await
    }

    /// Dissolve an RGB load to an HSL color. Best-effort: the controller
    /// does not echo color state back.
    pub async fn send_set_color_hsl(
        &self,
        vid: u32,
        hue: f64,
        saturation: f64,
        luminance: f64,
        time: Option<u32>,
    ) -> VantageResult<()> {
        self.send_command(&protocol::dissolve_hsl(vid, hue, saturation, luminance, time))
            .await
    }

    /// Ask a thermostat object for the outdoor temperature; the reading
    /// arrives as an [`VantageEvent::OutdoorTemperatureChanged`] event.
    pub async fn send_query_outdoor_temperature(&self, vid: u32) -> VantageResult<()> {
        self.send_command(&protocol::get_outdoor_temperature(vid))
            .await
    }

    /// Ask whether a device supports a named interface.
    ///
    /// Resolves `false` immediately when the controller never advertised the
    /// interface this session (no wire traffic). Otherwise a correlation
    /// entry is registered for (vid, interface id) and the query is sent;
    /// a second call for the same pair while one is outstanding shares the
    /// pending entry instead of issuing another query. If no answer arrives
    /// within the configured timeout the query resolves `false`.
    pub async fn query_interface_support(
        &self,
        vid: u32,
        interface_name: &str,
    ) -> VantageResult<bool> {
        let Some(interface_id) = self.interface_id(interface_name).await else {
            tracing::debug!(
                "interface {:?} not advertised this session, VID {} resolves unsupported",
                interface_name,
                vid
            );
            return Ok(false);
        };

        let (tx, rx) = oneshot::channel();
        let already_pending = {
            let mut pending = self.pending.lock().await;
            let senders = pending.entry((vid, interface_id)).or_default();
            let existing = !senders.is_empty();
            senders.push(tx);
            existing
        };

        if !already_pending {
            if let Err(e) = self
                .send_command(&protocol::is_interface_supported(vid, interface_id))
                .await
            {
                // Take the registration back out, or a later caller for the
                // same pair would see it as outstanding and never send.
                drop(rx);
                let mut pending = self.pending.lock().await;
                if let Some(senders) = pending.get_mut(&(vid, interface_id)) {
                    senders.retain(|s| !s.is_closed());
                    if senders.is_empty() {
                        pending.remove(&(vid, interface_id));
                    }
                }
                return Err(e);
            }
        }

        match timeout(self.config.interface_query_timeout(), rx).await {
            Ok(Ok(supported)) => Ok(supported),
            // Sender dropped without an answer (disconnect); treat as
            // unsupported.
            Ok(Err(_)) => Ok(false),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                if let Some(senders) = pending.get_mut(&(vid, interface_id)) {
                    senders.retain(|s| !s.is_closed());
                    if senders.is_empty() {
                        pending.remove(&(vid, interface_id));
                    }
                }
                let timeout_err = InterfaceQueryTimeout {
                    vid,
                    interface_id,
                    waited_secs: self.config.interface_query_timeout_secs,
                };
                tracing::warn!("{}", timeout_err);
                Ok(false)
            }
        }
    }

    /// Open the configuration connection, request the interface listing and,
    /// unless a cache file already exists, the project database download.
    /// Completion is signaled by [`VantageEvent::ConfigurationReady`] or
    /// [`VantageEvent::ConfigurationUnavailable`].
    pub async fn start_configuration(&mut self) -> VantageResult<()> {
        let addr = format!("{}:{}", self.config.host, self.config.configuration_port);
        let mut stream = match timeout(self.config.connection_timeout(), TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(VantageError::ConnectionFailed(format!(
                    "Failed to connect to configuration port at {}: {}",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(VantageError::ConnectionTimeout {
                    host: self.config.host.clone(),
                    port: self.config.configuration_port,
                    duration: self.config.connection_timeout(),
                });
            }
        };

        let decoder = ConfigurationDecoder::new(self.config.cache_path.clone());
        let download_requested = !decoder.cache_exists();

        stream
            .write_all(protocol::get_interfaces().as_bytes())
            .await
            .map_err(|e| VantageError::ConnectionFailed(format!("interface listing request: {}", e)))?;
        if download_requested {
            tracing::debug!("no cache at {}, requesting download", decoder.cache_path().display());
            stream
                .write_all(protocol::download_configuration().as_bytes())
                .await
                .map_err(|e| VantageError::ConnectionFailed(format!("download request: {}", e)))?;
        } else {
            tracing::info!(
                "cache file {} exists, skipping database download",
                decoder.cache_path().display()
            );
        }

        let interfaces = self.interfaces.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(Self::configuration_task(
            stream,
            decoder,
            download_requested,
            interfaces,
            event_tx,
        ));
        Ok(())
    }

    /// Configuration reader task - assembles documents, merges interface
    /// listings into the session table and signals database completion.
    /// Single-use: the task ends once the database outcome is known.
    async fn configuration_task(
        mut stream: TcpStream,
        decoder: ConfigurationDecoder,
        download_requested: bool,
        interfaces: Arc<RwLock<HashMap<String, u32>>>,
        event_tx: broadcast::Sender<VantageEvent>,
    ) {
        let mut assembler = ConfigurationAssembler::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("Vantage configuration read error: {}", e);
                    break;
                }
            };

            // Responses may be pipelined; drain every complete document.
            let mut chunk: &[u8] = &buf[..n];
            while let Some(document) = assembler.push_chunk(chunk) {
                chunk = b"";
                let outcome = match decoder.decode(&document) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("Vantage configuration decode failed: {}", e);
                        let _ = event_tx.send(VantageEvent::ConfigurationUnavailable);
                        return;
                    }
                };

                if !outcome.interfaces.is_empty() {
                    let mut table = interfaces.write().await;
                    for (name, id) in outcome.interfaces {
                        tracing::debug!("interface {} ID {}", name, id);
                        table.insert(name, id);
                    }
                }

                match outcome.database {
                    Database::Downloaded(text) | Database::Cached(text) => {
                        let _ = event_tx.send(VantageEvent::ConfigurationReady(Arc::new(text)));
                        return;
                    }
                    Database::Unavailable if download_requested => {
                        // Expected interim state: the interface listing came
                        // back before the file download.
                        tracing::debug!("database not in this document, download still in flight");
                    }
                    Database::Unavailable => {
                        tracing::warn!(
                            "no fresh download and no cache file at {}",
                            decoder.cache_path().display()
                        );
                        let _ = event_tx.send(VantageEvent::ConfigurationUnavailable);
                        return;
                    }
                }
            }
        }
        tracing::warn!("Vantage configuration connection closed before completion");
        let _ = event_tx.send(VantageEvent::ConfigurationUnavailable);
    }

    /// Disconnect from the controller and clear all session state.
    pub async fn disconnect(&mut self) {
        tracing::info!(
            "Disconnecting from Vantage controller {}:{}",
            self.config.host,
            self.config.command_port
        );

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Dropping the sender ends the writer task.
        self.tx = None;
        self.connected.store(false, Ordering::SeqCst);

        self.interfaces.write().await.clear();
        // Dropping pending senders resolves their receivers with closure.
        self.pending.lock().await.clear();

        let _ = self
            .event_tx
            .send(VantageEvent::ConnectionStateChanged(false));
    }

    #[cfg(test)]
    pub(crate) async fn insert_interface(&self, name: &str, id: u32) {
        self.interfaces.write().await.insert(name.to_string(), id);
    }
}
