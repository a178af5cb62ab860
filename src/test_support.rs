//! In-memory fakes of the transport seams. Every call is recorded so tests
//! can assert on exactly which device operations were issued.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Notify;

use crate::error::{CastError, Result};
use crate::lock;
use crate::protocol::{
    DeviceTarget, PlatformStatus, RunningApplication, Volume, VolumeSpec, NAMESPACE_MEDIA,
};
use crate::transport::{
    CastTransport, Connection, Connector, RawReceiver, ReceiverChannel, TransportEvent,
};

pub fn media_app(app_id: &str) -> RunningApplication {
    RunningApplication {
        app_id: app_id.to_string(),
        session_id: format!("session-{}", app_id),
        transport_id: format!("transport-{}", app_id),
        display_name: app_id.to_string(),
        namespaces: vec![NAMESPACE_MEDIA.to_string()],
    }
}

pub fn plain_app(app_id: &str) -> RunningApplication {
    RunningApplication {
        namespaces: vec!["urn:x-cast:com.example.custom".to_string()],
        ..media_app(app_id)
    }
}

pub fn status_with(applications: Vec<RunningApplication>) -> PlatformStatus {
    PlatformStatus {
        applications,
        volume: Some(Volume {
            level: Some(0.5),
            muted: Some(false),
        }),
    }
}

pub fn media_status_response(session_id: i64, supported: u32, items: usize) -> Value {
    let items: Vec<Value> = (0..items)
        .map(|index| serde_json::json!({"itemId": index + 1}))
        .collect();
    serde_json::json!({
        "type": "MEDIA_STATUS",
        "status": [{
            "mediaSessionId": session_id,
            "playerState": "PLAYING",
            "currentTime": 1.0,
            "supportedMediaCommands": supported,
            "items": items
        }]
    })
}

pub fn nothing_loaded_response() -> Value {
    serde_json::json!({"type": "MEDIA_STATUS", "status": []})
}

/// Receiver channel answering every request with a scripted response.
pub struct FakeReceiverChannel {
    default_response: Mutex<Value>,
    queued: Mutex<VecDeque<Result<Value>>>,
    requests: Mutex<Vec<(String, Value)>>,
    sent: Mutex<Vec<(String, Value)>>,
    closes: AtomicUsize,
}

impl FakeReceiverChannel {
    pub fn with_response(response: Value) -> Arc<Self> {
        Arc::new(Self {
            default_response: Mutex::new(response),
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn set_response(&self, response: Value) {
        *lock(&self.default_response) = response;
    }

    /// Queues a one-off response consumed before the default.
    pub fn push_response(&self, response: Result<Value>) {
        lock(&self.queued).push_back(response);
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        lock(&self.requests).clone()
    }

    pub fn request_types(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .map(|(_, payload)| {
                payload
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiverChannel for FakeReceiverChannel {
    async fn request(&self, namespace: &str, payload: Value) -> Result<Value> {
        lock(&self.requests).push((namespace.to_string(), payload));
        if let Some(response) = lock(&self.queued).pop_front() {
            return response;
        }
        Ok(lock(&self.default_response).clone())
    }

    async fn send(&self, namespace: &str, payload: Value) -> Result<()> {
        lock(&self.sent).push((namespace.to_string(), payload));
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport backed by an in-memory platform status.
pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
    status: Mutex<PlatformStatus>,
    launch_failure: Mutex<Option<CastError>>,
    unavailable: Mutex<Vec<String>>,
    launch_gate: Mutex<Option<Arc<Notify>>>,
    status_gate: Mutex<Option<Arc<Notify>>>,
    media_response: Mutex<Value>,
    channels: Mutex<HashMap<String, Arc<FakeReceiverChannel>>>,
}

impl FakeTransport {
    pub fn new(status: PlatformStatus) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            status: Mutex::new(status),
            launch_failure: Mutex::new(None),
            unavailable: Mutex::new(Vec::new()),
            launch_gate: Mutex::new(None),
            status_gate: Mutex::new(None),
            media_response: Mutex::new(media_status_response(1, 0xff, 1)),
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn set_status(&self, status: PlatformStatus) {
        *lock(&self.status) = status;
    }

    pub fn fail_next_launch(&self, err: CastError) {
        *lock(&self.launch_failure) = Some(err);
    }

    /// Reports `app_id` as unavailable in availability queries.
    pub fn mark_unavailable(&self, app_id: &str) {
        lock(&self.unavailable).push(app_id.to_string());
    }

    /// Makes every launch wait for a `notify_one` on the returned handle.
    pub fn hold_launches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.launch_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Makes every status request wait for a `notify_one` on the returned handle.
    pub fn hold_status_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.status_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Response used by receiver channels opened after this call.
    pub fn set_media_response(&self, response: Value) {
        *lock(&self.media_response) = response;
    }

    pub fn channel(&self, transport_id: &str) -> Option<Arc<FakeReceiverChannel>> {
        lock(&self.channels).get(transport_id).cloned()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn open_channel(&self, application: RunningApplication) -> RawReceiver {
        let channel = FakeReceiverChannel::with_response(lock(&self.media_response).clone());
        lock(&self.channels).insert(application.transport_id.clone(), Arc::clone(&channel));
        RawReceiver {
            application,
            channel,
        }
    }
}

#[async_trait]
impl CastTransport for FakeTransport {
    async fn get_app_availability(&self, app_ids: &[String]) -> Result<HashMap<String, bool>> {
        self.record(format!("get_app_availability {}", app_ids.join(",")));
        let unavailable = lock(&self.unavailable);
        Ok(app_ids
            .iter()
            .map(|id| (id.clone(), !unavailable.contains(id)))
            .collect())
    }

    async fn get_sessions(&self) -> Result<Vec<RunningApplication>> {
        self.record("get_sessions".to_string());
        Ok(lock(&self.status).applications.clone())
    }

    async fn launch(&self, app_id: &str) -> Result<RawReceiver> {
        self.record(format!("launch {}", app_id));
        let gate = lock(&self.launch_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = lock(&self.launch_failure).take() {
            return Err(err);
        }
        let application = media_app(app_id);
        {
            let mut status = lock(&self.status);
            status.applications.retain(|app| app.app_id != app_id);
            status.applications.push(application.clone());
        }
        Ok(self.open_channel(application))
    }

    async fn join(&self, application: &RunningApplication) -> Result<RawReceiver> {
        self.record(format!("join {}", application.app_id));
        Ok(self.open_channel(application.clone()))
    }

    async fn get_status(&self) -> Result<PlatformStatus> {
        self.record("get_status".to_string());
        let gate = lock(&self.status_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(lock(&self.status).clone())
    }

    async fn get_volume(&self) -> Result<Volume> {
        self.record("get_volume".to_string());
        Ok(lock(&self.status).volume.unwrap_or_default())
    }

    async fn set_volume(&self, change: VolumeSpec) -> Result<Volume> {
        self.record(format!("set_volume {}", change.to_json()));
        let mut status = lock(&self.status);
        let mut volume = status.volume.unwrap_or_default();
        match change {
            VolumeSpec::Level(level) => volume.level = Some(level),
            VolumeSpec::Muted(muted) => volume.muted = Some(muted),
        }
        status.volume = Some(volume);
        Ok(volume)
    }

    async fn stop(&self, session_id: &str) -> Result<PlatformStatus> {
        self.record(format!("stop {}", session_id));
        let mut status = lock(&self.status);
        status.applications.retain(|app| app.session_id != session_id);
        Ok(status.clone())
    }

    async fn close(&self) {
        self.record("close".to_string());
    }
}

/// Connector producing [`FakeTransport`]s, with scripted failures.
pub struct FakeConnector {
    initial_status: Mutex<PlatformStatus>,
    failures: Mutex<VecDeque<CastError>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connections: Mutex<Vec<(Arc<FakeTransport>, UnboundedSender<TransportEvent>)>>,
}

impl FakeConnector {
    pub fn new(initial_status: PlatformStatus) -> Arc<Self> {
        Arc::new(Self {
            initial_status: Mutex::new(initial_status),
            failures: Mutex::new(VecDeque::new()),
            connect_gate: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next(&self, err: CastError) {
        lock(&self.failures).push_back(err);
    }

    pub fn hold_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.connect_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn last_transport(&self) -> Option<Arc<FakeTransport>> {
        lock(&self.connections)
            .last()
            .map(|(transport, _)| Arc::clone(transport))
    }

    /// Pushes an event on the most recent connection.
    pub fn emit(&self, event: TransportEvent) {
        if let Some((_, events)) = lock(&self.connections).last() {
            let _ = events.send(event);
        }
    }

    /// Drops the most recent connection's event stream, as a remote close does.
    pub fn drop_connection(&self) {
        lock(&self.connections).pop();
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let gate = lock(&self.connect_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        let transport = FakeTransport::new(lock(&self.initial_status).clone());
        let (events_tx, events_rx) = unbounded_channel();
        lock(&self.connections).push((Arc::clone(&transport), events_tx));
        Ok(Connection {
            transport,
            events: events_rx,
            peer_address: if target.host.is_empty() {
                "fake-device".to_string()
            } else {
                target.host.clone()
            },
        })
    }
}
