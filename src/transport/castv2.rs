//! Cast v2 transport over TLS.
//!
//! A dedicated socket worker thread owns the TLS stream:
//! - writes queued requests and fire-and-forget messages
//! - answers heartbeat `PING` and sends its own keepalive `PING`
//! - correlates responses to pending requests by `requestId`
//! - turns unsolicited receiver/media status into [`TransportEvent`]s
//!
//! The async side only enqueues work and awaits oneshot replies.

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc::{
    error::TryRecvError, unbounded_channel, UnboundedReceiver, UnboundedSender,
};
use tokio::sync::oneshot;

use super::frame::{encode_cast_frame, CastFrame, FrameReader};
use super::{CastTransport, Connection, Connector, RawReceiver, ReceiverChannel, TransportEvent};
use crate::discovery;
use crate::error::{CastError, Result};
use crate::protocol::{
    parse_media_status, parse_receiver_status, DeviceTarget, PlatformStatus, RunningApplication,
    Volume, VolumeSpec, NAMESPACE_CONNECTION, NAMESPACE_HEARTBEAT, NAMESPACE_MEDIA,
    NAMESPACE_RECEIVER,
};

const PLATFORM_RECEIVER_ID: &str = "receiver-0";
const SENDER_ID: &str = "sender-castlink";
const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(180);
const SOCKET_WRITE_TIMEOUT: Duration = Duration::from_millis(1500);
const MISSED_HEARTBEATS_BEFORE_FAILURE: u32 = 3;
const ERROR_RESPONSE_TYPES: [&str; 4] = [
    "LAUNCH_ERROR",
    "INVALID_REQUEST",
    "LOAD_FAILED",
    "LOAD_CANCELLED",
];

/// Timing knobs for the Cast v2 transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub discovery_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(6),
            request_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            discovery_timeout: Duration::from_millis(1800),
        }
    }
}

/// Opens Cast v2 TLS connections, resolving named targets over mDNS.
pub struct Castv2Connector {
    settings: TransportSettings,
}

impl Castv2Connector {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for Castv2Connector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Connection> {
        let (host, port) = if target.needs_discovery() {
            let name = target.name.clone().ok_or_else(|| {
                CastError::Connect("target has neither host nor discoverable name".to_string())
            })?;
            let device = discovery::find_device(&name, self.settings.discovery_timeout)
                .await
                .ok_or_else(|| {
                    CastError::Connect(format!("no cast device named '{}' was discovered", name))
                })?;
            (device.address, device.port)
        } else {
            (target.host.clone(), target.port)
        };

        let settings = self.settings;
        let socket_host = host.clone();
        let stream = tokio::task::spawn_blocking(move || open_socket(&socket_host, port, settings))
            .await
            .map_err(|err| CastError::Connect(format!("connect task failed: {err}")))?
            .map_err(CastError::Connect)?;

        let (event_tx, event_rx) = unbounded_channel();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let worker = SocketWorker::new(stream, outbound_rx, event_tx, settings);
        thread::Builder::new()
            .name("castlink-socket".to_string())
            .spawn(move || worker.run())
            .map_err(|err| CastError::Connect(format!("failed to spawn socket worker: {err}")))?;

        info!("Castv2: connected to {}:{}", host, port);
        let shared = Arc::new(SharedSocket {
            outbound: outbound_tx,
            next_request_id: AtomicI64::new(1),
            request_timeout: settings.request_timeout,
            closed: AtomicBool::new(false),
        });
        Ok(Connection {
            transport: Arc::new(Castv2Transport { shared }),
            events: event_rx,
            peer_address: host,
        })
    }
}

fn open_socket(
    host: &str,
    port: u16,
    settings: TransportSettings,
) -> std::result::Result<native_tls::TlsStream<TcpStream>, String> {
    let address: SocketAddr = (host, port)
        .to_socket_addrs()
        .map_err(|err| format!("failed to resolve cast target {}:{}: {err}", host, port))?
        .next()
        .ok_or_else(|| format!("cast target {}:{} did not resolve", host, port))?;
    let tcp = TcpStream::connect_timeout(&address, settings.connect_timeout)
        .map_err(|err| format!("failed to connect to cast target {}: {err}", address))?;
    tcp.set_read_timeout(Some(SOCKET_READ_TIMEOUT))
        .map_err(|err| format!("failed to set cast read timeout: {err}"))?;
    tcp.set_write_timeout(Some(SOCKET_WRITE_TIMEOUT))
        .map_err(|err| format!("failed to set cast write timeout: {err}"))?;

    // Cast devices present self-signed certificates.
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|err| format!("failed to create cast tls connector: {err}"))?;
    let mut stream = connector
        .connect(host, tcp)
        .map_err(|err| format!("failed cast tls handshake: {err}"))?;

    write_json(
        &mut stream,
        NAMESPACE_CONNECTION,
        PLATFORM_RECEIVER_ID,
        &serde_json::json!({"type": "CONNECT", "origin": {}}),
    )?;
    Ok(stream)
}

fn write_json<W: Write>(
    stream: &mut W,
    namespace: &str,
    destination_id: &str,
    payload: &Value,
) -> std::result::Result<(), String> {
    let frame = encode_cast_frame(&CastFrame {
        source_id: SENDER_ID.to_string(),
        destination_id: destination_id.to_string(),
        namespace: namespace.to_string(),
        payload_utf8: payload.to_string(),
    })?;
    stream
        .write_all(&frame)
        .map_err(|err| format!("failed to send cast frame: {err}"))
}

enum Outbound {
    Send {
        namespace: String,
        destination_id: String,
        payload: Value,
    },
    Request {
        namespace: String,
        destination_id: String,
        payload: Value,
        request_id: i64,
        reply: oneshot::Sender<Result<Value>>,
    },
    Shutdown,
}

struct SocketWorker {
    stream: native_tls::TlsStream<TcpStream>,
    frames: FrameReader,
    outbound: UnboundedReceiver<Outbound>,
    events: UnboundedSender<TransportEvent>,
    pending: HashMap<i64, oneshot::Sender<Result<Value>>>,
    heartbeat_interval: Duration,
    last_ping_sent_at: Instant,
    last_received_at: Instant,
}

enum WorkerExit {
    Shutdown,
    RemoteClosed,
    Failed(String),
}

impl SocketWorker {
    fn new(
        stream: native_tls::TlsStream<TcpStream>,
        outbound: UnboundedReceiver<Outbound>,
        events: UnboundedSender<TransportEvent>,
        settings: TransportSettings,
    ) -> Self {
        Self {
            stream,
            frames: FrameReader::new(),
            outbound,
            events,
            pending: HashMap::new(),
            heartbeat_interval: settings.heartbeat_interval,
            last_ping_sent_at: Instant::now(),
            last_received_at: Instant::now(),
        }
    }

    fn run(mut self) {
        debug!("Castv2: socket worker started");
        let exit = loop {
            if let Some(exit) = self.process_outbound() {
                break exit;
            }
            if let Some(exit) = self.pump_incoming() {
                break exit;
            }
            if let Some(exit) = self.tick_heartbeat() {
                break exit;
            }
            self.pending.retain(|_, reply| !reply.is_closed());
        };

        match exit {
            WorkerExit::Shutdown => {
                let _ = write_json(
                    &mut self.stream,
                    NAMESPACE_CONNECTION,
                    PLATFORM_RECEIVER_ID,
                    &serde_json::json!({"type": "CLOSE"}),
                );
                let _ = self.stream.shutdown();
                debug!("Castv2: socket worker shut down");
            }
            WorkerExit::RemoteClosed => {
                info!("Castv2: device closed the platform connection");
            }
            WorkerExit::Failed(err) => {
                warn!("Castv2: socket failed: {}", err);
                let _ = self.events.send(TransportEvent::Error(err));
            }
        }
        // Dropping `pending` fails every outstanding request; dropping
        // `events` signals the transport closed.
    }

    fn process_outbound(&mut self) -> Option<WorkerExit> {
        loop {
            match self.outbound.try_recv() {
                Ok(Outbound::Send {
                    namespace,
                    destination_id,
                    payload,
                }) => {
                    if let Err(err) =
                        write_json(&mut self.stream, &namespace, &destination_id, &payload)
                    {
                        return Some(WorkerExit::Failed(err));
                    }
                }
                Ok(Outbound::Request {
                    namespace,
                    destination_id,
                    payload,
                    request_id,
                    reply,
                }) => {
                    if let Err(err) =
                        write_json(&mut self.stream, &namespace, &destination_id, &payload)
                    {
                        let _ = reply.send(Err(CastError::NotConnected));
                        return Some(WorkerExit::Failed(err));
                    }
                    self.pending.insert(request_id, reply);
                }
                Ok(Outbound::Shutdown) | Err(TryRecvError::Disconnected) => {
                    return Some(WorkerExit::Shutdown)
                }
                Err(TryRecvError::Empty) => return None,
            }
        }
    }

    fn pump_incoming(&mut self) -> Option<WorkerExit> {
        let frame = match self.frames.read_frame(&mut self.stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(err) => return Some(WorkerExit::Failed(err)),
        };
        self.last_received_at = Instant::now();

        let Ok(message) = serde_json::from_str::<Value>(&frame.payload_utf8) else {
            debug!(
                "Castv2: ignoring non-JSON payload on {} from {}",
                frame.namespace, frame.source_id
            );
            return None;
        };
        let message_type = message.get("type").and_then(Value::as_str).unwrap_or("");

        match frame.namespace.as_str() {
            NAMESPACE_HEARTBEAT => {
                if message_type == "PING" {
                    if let Err(err) = write_json(
                        &mut self.stream,
                        NAMESPACE_HEARTBEAT,
                        &frame.source_id,
                        &serde_json::json!({"type": "PONG"}),
                    ) {
                        return Some(WorkerExit::Failed(err));
                    }
                }
                return None;
            }
            NAMESPACE_CONNECTION => {
                if message_type == "CLOSE" {
                    if frame.source_id == PLATFORM_RECEIVER_ID {
                        return Some(WorkerExit::RemoteClosed);
                    }
                    debug!(
                        "Castv2: application connection {} closed by device",
                        frame.source_id
                    );
                }
                return None;
            }
            _ => {}
        }

        let request_id = message
            .get("requestId")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if request_id > 0 {
            if let Some(reply) = self.pending.remove(&request_id) {
                let result = if ERROR_RESPONSE_TYPES.contains(&message_type) {
                    let reason = message
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or(message_type);
                    Err(CastError::Device(reason.to_string()))
                } else {
                    Ok(message)
                };
                let _ = reply.send(result);
                return None;
            }
        }

        match (frame.namespace.as_str(), message_type) {
            (NAMESPACE_RECEIVER, "RECEIVER_STATUS") => {
                if let Some(status) = message.get("status") {
                    let _ = self
                        .events
                        .send(TransportEvent::Status(parse_receiver_status(status)));
                }
            }
            (NAMESPACE_MEDIA, "MEDIA_STATUS") => {
                if let Some(status) = parse_media_status(&message) {
                    let _ = self.events.send(TransportEvent::MediaStatus {
                        transport_id: frame.source_id.clone(),
                        status,
                    });
                }
            }
            _ => debug!(
                "Castv2: unhandled {} message on {}",
                message_type, frame.namespace
            ),
        }
        None
    }

    fn tick_heartbeat(&mut self) -> Option<WorkerExit> {
        let deadline = self.heartbeat_interval * MISSED_HEARTBEATS_BEFORE_FAILURE;
        if self.last_received_at.elapsed() > deadline {
            return Some(WorkerExit::Failed("heartbeat timeout".to_string()));
        }
        if self.last_ping_sent_at.elapsed() >= self.heartbeat_interval {
            self.last_ping_sent_at = Instant::now();
            if let Err(err) = write_json(
                &mut self.stream,
                NAMESPACE_HEARTBEAT,
                PLATFORM_RECEIVER_ID,
                &serde_json::json!({"type": "PING"}),
            ) {
                return Some(WorkerExit::Failed(err));
            }
        }
        None
    }
}

struct SharedSocket {
    outbound: UnboundedSender<Outbound>,
    next_request_id: AtomicI64,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl SharedSocket {
    async fn request(
        &self,
        namespace: &str,
        destination_id: &str,
        mut payload: Value,
    ) -> Result<Value> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        payload["requestId"] = serde_json::json!(request_id);
        let message_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("request")
            .to_string();
        let (reply, response) = oneshot::channel();
        self.outbound
            .send(Outbound::Request {
                namespace: namespace.to_string(),
                destination_id: destination_id.to_string(),
                payload,
                request_id,
                reply,
            })
            .map_err(|_| CastError::NotConnected)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CastError::NotConnected),
            Err(_) => Err(CastError::Device(format!(
                "timed out waiting for {} response",
                message_type
            ))),
        }
    }

    fn send(&self, namespace: &str, destination_id: &str, payload: Value) -> Result<()> {
        self.outbound
            .send(Outbound::Send {
                namespace: namespace.to_string(),
                destination_id: destination_id.to_string(),
                payload,
            })
            .map_err(|_| CastError::NotConnected)
    }

    async fn receiver_status(&self, payload: Value) -> Result<PlatformStatus> {
        let response = self
            .request(NAMESPACE_RECEIVER, PLATFORM_RECEIVER_ID, payload)
            .await?;
        let status = response.get("status").ok_or_else(|| {
            CastError::Device("receiver response did not include a status".to_string())
        })?;
        Ok(parse_receiver_status(status))
    }
}

/// Cast v2 implementation of [`CastTransport`].
pub struct Castv2Transport {
    shared: Arc<SharedSocket>,
}

impl Castv2Transport {
    fn open_channel(&self, application: RunningApplication) -> Result<RawReceiver> {
        self.shared.send(
            NAMESPACE_CONNECTION,
            &application.transport_id,
            serde_json::json!({"type": "CONNECT", "origin": {}}),
        )?;
        let channel = Castv2Channel {
            shared: Arc::clone(&self.shared),
            transport_id: application.transport_id.clone(),
        };
        Ok(RawReceiver {
            application,
            channel: Arc::new(channel),
        })
    }
}

#[async_trait]
impl CastTransport for Castv2Transport {
    async fn get_app_availability(&self, app_ids: &[String]) -> Result<HashMap<String, bool>> {
        let response = self
            .shared
            .request(
                NAMESPACE_RECEIVER,
                PLATFORM_RECEIVER_ID,
                serde_json::json!({"type": "GET_APP_AVAILABILITY", "appId": app_ids}),
            )
            .await?;
        let availability = response
            .get("availability")
            .and_then(Value::as_object)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(app_id, value)| {
                        (app_id.clone(), value.as_str() == Some("APP_AVAILABLE"))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(availability)
    }

    async fn get_sessions(&self) -> Result<Vec<RunningApplication>> {
        Ok(self.get_status().await?.applications)
    }

    async fn launch(&self, app_id: &str) -> Result<RawReceiver> {
        let status = self
            .shared
            .receiver_status(serde_json::json!({"type": "LAUNCH", "appId": app_id}))
            .await?;
        let application = status.find_application(app_id).cloned().ok_or_else(|| {
            CastError::Device(format!("application {} did not start", app_id))
        })?;
        self.open_channel(application)
    }

    async fn join(&self, application: &RunningApplication) -> Result<RawReceiver> {
        self.open_channel(application.clone())
    }

    async fn get_status(&self) -> Result<PlatformStatus> {
        self.shared
            .receiver_status(serde_json::json!({"type": "GET_STATUS"}))
            .await
    }

    async fn get_volume(&self) -> Result<Volume> {
        Ok(self.get_status().await?.volume.unwrap_or_default())
    }

    async fn set_volume(&self, change: VolumeSpec) -> Result<Volume> {
        let status = self
            .shared
            .receiver_status(serde_json::json!({"type": "SET_VOLUME", "volume": change.to_json()}))
            .await?;
        Ok(status.volume.unwrap_or_default())
    }

    async fn stop(&self, session_id: &str) -> Result<PlatformStatus> {
        self.shared
            .receiver_status(serde_json::json!({"type": "STOP", "sessionId": session_id}))
            .await
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.outbound.send(Outbound::Shutdown);
    }
}

struct Castv2Channel {
    shared: Arc<SharedSocket>,
    transport_id: String,
}

#[async_trait]
impl ReceiverChannel for Castv2Channel {
    async fn request(&self, namespace: &str, payload: Value) -> Result<Value> {
        self.shared
            .request(namespace, &self.transport_id, payload)
            .await
    }

    async fn send(&self, namespace: &str, payload: Value) -> Result<()> {
        self.shared.send(namespace, &self.transport_id, payload)
    }

    async fn close(&self) {
        let _ = self.shared.send(
            NAMESPACE_CONNECTION,
            &self.transport_id,
            serde_json::json!({"type": "CLOSE"}),
        );
    }
}
