//! The single physical connection to a cast device.
//!
//! `DeviceLink` wraps a transport in uniform request/response operations
//! that fail with [`CastError::NotConnected`] unless the link is connected,
//! and republishes transport events as [`LinkMessage`]s tagged with the
//! connection generation. Every close bumps the generation, so events from a
//! torn-down transport can be told apart from the live one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::{CastError, Result};
use crate::lock;
use crate::protocol::{
    ConnectionState, DeviceTarget, MediaStatus, PlatformStatus, RunningApplication, Volume,
    VolumeSpec,
};
use crate::transport::{CastTransport, Connector, RawReceiver, TransportEvent};

/// Generations are unique across every link in the process.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle and status events surfaced by a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Unsolicited platform status push.
    Status(PlatformStatus),
    /// Unsolicited media status from a receiver application.
    MediaStatus {
        transport_id: String,
        status: MediaStatus,
    },
    /// Transport fault.
    Error(String),
    /// Transport torn down, remotely or locally.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkMessage {
    pub generation: u64,
    pub event: LinkEvent,
}

struct LinkState {
    connection: ConnectionState,
    transport: Option<Arc<dyn CastTransport>>,
    generation: u64,
    peer_address: Option<String>,
}

pub struct DeviceLink {
    target: DeviceTarget,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    state: Arc<Mutex<LinkState>>,
    events: UnboundedSender<LinkMessage>,
}

impl DeviceLink {
    pub fn new(
        target: DeviceTarget,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        events: UnboundedSender<LinkMessage>,
    ) -> Self {
        Self {
            target,
            connector,
            connect_timeout,
            state: Arc::new(Mutex::new(LinkState {
                connection: ConnectionState::Disconnected,
                transport: None,
                generation: next_generation(),
                peer_address: None,
            })),
            events,
        }
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.state).connection
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Whether events tagged with `generation` belong to the live connection.
    pub fn is_current(&self, generation: u64) -> bool {
        lock(&self.state).generation == generation
    }

    /// Address the transport reached, falling back to the configured target.
    pub fn device_address(&self) -> String {
        lock(&self.state)
            .peer_address
            .clone()
            .unwrap_or_else(|| self.target.to_string())
    }

    /// Establishes the transport. Only one attempt may be in flight.
    pub async fn connect(&self) -> Result<()> {
        let generation = {
            let mut state = lock(&self.state);
            match state.connection {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(CastError::Connect(
                        "a connection attempt is already in progress".to_string(),
                    ))
                }
                ConnectionState::Disconnected => {}
            }
            state.connection = ConnectionState::Connecting;
            state.generation = next_generation();
            state.generation
        };

        info!("DeviceLink: connecting to {}", self.target);
        let result =
            match tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.target))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CastError::Connect(format!(
                    "timed out after {} ms",
                    self.connect_timeout.as_millis()
                ))),
            };

        let mut state = lock(&self.state);
        if state.generation != generation {
            drop(state);
            // Closed while connecting.
            if let Ok(connection) = result {
                let transport = connection.transport;
                tokio::spawn(async move { transport.close().await });
            }
            return Err(CastError::Connect(
                "connection attempt was cancelled".to_string(),
            ));
        }
        match result {
            Ok(connection) => {
                state.connection = ConnectionState::Connected;
                state.transport = Some(connection.transport);
                state.peer_address = Some(connection.peer_address.clone());
                drop(state);
                info!("DeviceLink: connected to {}", connection.peer_address);
                self.spawn_forwarder(connection.events, generation);
                Ok(())
            }
            Err(err) => {
                state.connection = ConnectionState::Disconnected;
                drop(state);
                warn!("DeviceLink: connect to {} failed: {}", self.target, err);
                Err(err)
            }
        }
    }

    fn spawn_forwarder(&self, mut events: UnboundedReceiver<TransportEvent>, generation: u64) {
        let state = Arc::clone(&self.state);
        let sender = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if lock(&state).generation != generation {
                    return;
                }
                let event = match event {
                    TransportEvent::Status(status) => LinkEvent::Status(status),
                    TransportEvent::MediaStatus {
                        transport_id,
                        status,
                    } => LinkEvent::MediaStatus {
                        transport_id,
                        status,
                    },
                    TransportEvent::Error(cause) => LinkEvent::Error(cause),
                };
                let _ = sender.send(LinkMessage { generation, event });
            }

            let closed_while_current = {
                let mut state = lock(&state);
                if state.generation == generation
                    && state.connection == ConnectionState::Connected
                {
                    state.connection = ConnectionState::Disconnected;
                    state.transport = None;
                    true
                } else {
                    false
                }
            };
            if closed_while_current {
                debug!("DeviceLink: transport closed remotely");
                let _ = sender.send(LinkMessage {
                    generation,
                    event: LinkEvent::Closed,
                });
            }
        });
    }

    fn transport(&self) -> Result<Arc<dyn CastTransport>> {
        let state = lock(&self.state);
        match (&state.connection, &state.transport) {
            (ConnectionState::Connected, Some(transport)) => Ok(Arc::clone(transport)),
            _ => Err(CastError::NotConnected),
        }
    }

    pub async fn get_app_availability(&self, app_ids: &[String]) -> Result<HashMap<String, bool>> {
        self.transport()?.get_app_availability(app_ids).await
    }

    pub async fn get_sessions(&self) -> Result<Vec<RunningApplication>> {
        self.transport()?.get_sessions().await
    }

    pub async fn launch(&self, app_id: &str) -> Result<RawReceiver> {
        let transport = self.transport()?;
        debug!("DeviceLink: launching {}", app_id);
        transport.launch(app_id).await
    }

    pub async fn join(&self, application: &RunningApplication) -> Result<RawReceiver> {
        let transport = self.transport()?;
        debug!(
            "DeviceLink: joining {} ({})",
            application.app_id, application.session_id
        );
        transport.join(application).await
    }

    pub async fn get_status(&self) -> Result<PlatformStatus> {
        self.transport()?.get_status().await
    }

    pub async fn get_volume(&self) -> Result<Volume> {
        self.transport()?.get_volume().await
    }

    pub async fn set_volume(&self, change: VolumeSpec) -> Result<Volume> {
        self.transport()?.set_volume(change).await
    }

    /// Stops the receiver application running as `session_id`.
    pub async fn stop(&self, session_id: &str) -> Result<PlatformStatus> {
        self.transport()?.stop(session_id).await
    }

    /// Synchronously marks the link closed and hands back the transport for
    /// the caller to shut down. Returns `None` if nothing was connected.
    pub fn detach(&self) -> Option<Arc<dyn CastTransport>> {
        let (previous_generation, was_connected, transport) = {
            let mut state = lock(&self.state);
            let previous_generation = state.generation;
            let was_connected = state.connection == ConnectionState::Connected;
            state.generation = next_generation();
            state.connection = ConnectionState::Disconnected;
            (previous_generation, was_connected, state.transport.take())
        };
        if was_connected {
            debug!("DeviceLink: closing connection to {}", self.target);
            let _ = self.events.send(LinkMessage {
                generation: previous_generation,
                event: LinkEvent::Closed,
            });
        }
        transport
    }

    /// Closes the link. Closing an already-closed link is a no-op.
    pub async fn close(&self) {
        if let Some(transport) = self.detach() {
            transport.close().await;
        }
    }
}
