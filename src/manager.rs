//! Connection lifecycle manager.
//!
//! `CastManager` owns the single device link shared by every registered
//! sender. It connects on the first registration, tears the link down when
//! the last sender leaves, reconciles platform status pushes against each
//! session, and drives the reconnect supervisor. All `CastManager` and
//! `SenderHandle` methods must be called from within a Tokio runtime.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::adapters::AppCatalog;
use crate::command::CastCommand;
use crate::config::Config;
use crate::error::{CastError, Result};
use crate::link::{DeviceLink, LinkEvent, LinkMessage};
use crate::lock;
use crate::protocol::{ConnectionState, PlatformStatus, SenderNotification, StatusReport};
use crate::registry::SessionRegistry;
use crate::session::{LogicalSession, SenderId};
use crate::supervisor::{ReconnectSupervisor, SupervisorAction};
use crate::transport::castv2::Castv2Connector;
use crate::transport::Connector;

/// Per-sender registration options. Unset fields fall back to `[applications]`
/// in the configuration.
#[derive(Debug, Clone, Default)]
pub struct SenderOptions {
    /// Catalog keys or app ids this sender binds to.
    pub applications: Option<Vec<String>>,
    /// Whether the sender also joins any media-capable application.
    pub accept_generic: Option<bool>,
}

struct Core {
    config: Config,
    connector: Arc<dyn Connector>,
    catalog: AppCatalog,
    registry: SessionRegistry,
    supervisor: Mutex<ReconnectSupervisor>,
    link: Mutex<Option<Arc<DeviceLink>>>,
    platform_status: Mutex<Option<PlatformStatus>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    link_events: UnboundedSender<LinkMessage>,
}

impl Core {
    fn current_link(&self) -> Option<Arc<DeviceLink>> {
        lock(&self.link).clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.current_link()
            .map_or(ConnectionState::Disconnected, |link| link.state())
    }

    fn ensure_link(&self) -> Arc<DeviceLink> {
        let mut slot = lock(&self.link);
        if let Some(link) = slot.as_ref() {
            return Arc::clone(link);
        }
        let settings = self.config.transport_settings();
        let target = self.config.device_target();
        let timeout = if target.needs_discovery() {
            settings.connect_timeout + settings.discovery_timeout
        } else {
            settings.connect_timeout
        };
        let link = Arc::new(DeviceLink::new(
            target,
            Arc::clone(&self.connector),
            timeout,
            self.link_events.clone(),
        ));
        *slot = Some(Arc::clone(&link));
        link
    }

    fn execute(self: &Arc<Self>, action: SupervisorAction) {
        match action {
            SupervisorAction::Nothing => {}
            SupervisorAction::Connect => self.start_connect(),
            SupervisorAction::Connected => self.on_connected(),
            SupervisorAction::ArmTimer(token) => self.arm_timer(token),
            SupervisorAction::CancelTimer => self.cancel_timer(),
            SupervisorAction::Teardown { reconnect } => {
                self.teardown();
                if let Some(token) = reconnect {
                    self.arm_timer(token);
                }
            }
        }
    }

    fn start_connect(self: &Arc<Self>) {
        let link = self.ensure_link();
        self.registry.broadcast_connection_state(ConnectionState::Connecting);
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let succeeded = link.connect().await.is_ok();
            let action =
                lock(&core.supervisor).on_connect_result(succeeded, !core.registry.is_empty());
            core.execute(action);
        });
    }

    fn on_connected(&self) {
        self.registry
            .broadcast_connection_state(ConnectionState::Connected);
        let Some(link) = self.current_link() else {
            return;
        };
        let generation = link.generation();
        let events = self.link_events.clone();
        tokio::spawn(async move {
            match link.get_status().await {
                Ok(status) => {
                    let _ = events.send(LinkMessage {
                        generation,
                        event: LinkEvent::Status(status),
                    });
                }
                Err(err) => warn!("CastManager: initial status request failed: {}", err),
            }
        });
    }

    fn arm_timer(self: &Arc<Self>, token: u64) {
        let delay = self.config.reconnect_delay();
        let core = Arc::downgrade(self);
        debug!("CastManager: reconnecting in {} ms", delay.as_millis());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(core) = core.upgrade() else {
                return;
            };
            let action = lock(&core.supervisor).on_timer_fired(token, !core.registry.is_empty());
            core.execute(action);
        });
        if let Some(previous) = lock(&self.reconnect_timer).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = lock(&self.reconnect_timer).take() {
            timer.abort();
        }
    }

    /// Closes the link and unbinds every session. The link object itself is
    /// dropped only when no sender remains.
    fn teardown(&self) {
        let link = {
            let mut slot = lock(&self.link);
            if self.registry.is_empty() {
                slot.take()
            } else {
                slot.clone()
            }
        };
        if let Some(transport) = link.and_then(|link| link.detach()) {
            tokio::spawn(async move { transport.close().await });
        }
        *lock(&self.platform_status) = None;

        for session in self.registry.snapshot() {
            if let Some(receiver) = session.release_binding() {
                tokio::spawn(async move { session.finish_unbind(receiver).await });
            }
        }
        self.registry
            .broadcast_connection_state(ConnectionState::Disconnected);
    }

    async fn handle_link_message(self: &Arc<Self>, message: LinkMessage) {
        let Some(link) = self.current_link() else {
            return;
        };
        if !link.is_current(message.generation) {
            debug!(
                "CastManager: ignoring event from closed connection {}",
                message.generation
            );
            return;
        }
        match message.event {
            LinkEvent::Status(status) => self.apply_status(&link, status).await,
            LinkEvent::MediaStatus {
                transport_id,
                status,
            } => {
                for session in self.registry.snapshot() {
                    session.forward_media_status(&transport_id, &status);
                }
            }
            LinkEvent::Error(cause) => {
                warn!("CastManager: connection error: {}", cause);
                let action = lock(&self.supervisor).on_link_lost(!self.registry.is_empty());
                self.execute(action);
            }
            LinkEvent::Closed => {
                info!("CastManager: connection closed by device");
                let action = lock(&self.supervisor).on_link_lost(!self.registry.is_empty());
                self.execute(action);
            }
        }
    }

    async fn apply_status(&self, link: &DeviceLink, status: PlatformStatus) {
        *lock(&self.platform_status) = Some(status.clone());
        self.registry.broadcast_status(&link.device_address(), &status);
        for session in self.registry.snapshot() {
            session.reconcile(link, &status).await;
        }
    }

    fn deregister(self: &Arc<Self>, id: SenderId) {
        let Some(session) = self.registry.deregister(id) else {
            return;
        };
        info!("CastManager: deregistered sender {}", id);
        if let Some(receiver) = session.detach() {
            tokio::spawn(async move { receiver.close().await });
        }
        if self.registry.is_empty() {
            let action = lock(&self.supervisor).on_registry_empty();
            self.execute(action);
        }
    }
}

async fn run_event_loop(core: Weak<Core>, mut events: UnboundedReceiver<LinkMessage>) {
    while let Some(message) = events.recv().await {
        let Some(core) = core.upgrade() else {
            break;
        };
        core.handle_link_message(message).await;
    }
    debug!("CastManager: event loop stopped");
}

pub struct CastManager {
    core: Arc<Core>,
    event_loop: JoinHandle<()>,
}

impl CastManager {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let catalog = AppCatalog::builtin(&config.tts);
        let (link_events, events) = unbounded_channel();
        let core = Arc::new(Core {
            config,
            connector,
            catalog,
            registry: SessionRegistry::new(),
            supervisor: Mutex::new(ReconnectSupervisor::new()),
            link: Mutex::new(None),
            platform_status: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            link_events,
        });
        let event_loop = tokio::spawn(run_event_loop(Arc::downgrade(&core), events));
        Self { core, event_loop }
    }

    /// Manager talking Cast v2 over TLS with the configured timeouts.
    pub fn with_castv2(config: Config) -> Self {
        let connector = Arc::new(Castv2Connector::new(config.transport_settings()));
        Self::new(config, connector)
    }

    /// Registers a sender. The first registration starts connecting.
    pub fn register(&self, options: SenderOptions) -> SenderHandle {
        let core = &self.core;
        let keys = options
            .applications
            .unwrap_or_else(|| core.config.applications.supported.clone());
        let accept_generic = options
            .accept_generic
            .unwrap_or(core.config.applications.accept_generic);
        let descriptors = core.catalog.select(&keys);
        if descriptors.is_empty() && !accept_generic {
            warn!("CastManager: sender registered without any receiver application");
        }

        let (notifications_tx, notifications) = unbounded_channel();
        let session = Arc::new(LogicalSession::new(
            descriptors,
            accept_generic.then(|| core.catalog.generic().clone()),
            notifications_tx,
        ));
        session.notify(SenderNotification::ConnectionState {
            state: core.connection_state(),
        });
        core.registry.register(Arc::clone(&session));
        info!("CastManager: registered sender {}", session.id());

        let action = lock(&core.supervisor).on_registered();
        core.execute(action);

        let cached = lock(&core.platform_status).clone();
        if let (Some(link), Some(status)) = (core.current_link(), cached) {
            if link.state() == ConnectionState::Connected {
                session.notify(SenderNotification::PlatformStatus {
                    device: link.device_address(),
                    status: status.clone(),
                });
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.reconcile(&link, &status).await });
            }
        }

        SenderHandle {
            id: session.id(),
            session,
            core: Arc::clone(core),
            notifications,
        }
    }

    /// Removes a sender. Unknown ids are ignored.
    pub fn deregister(&self, id: SenderId) {
        self.core.deregister(id);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection_state()
    }

    /// Last platform status reported by the connected device.
    pub fn platform_status(&self) -> Option<PlatformStatus> {
        lock(&self.core.platform_status).clone()
    }

    pub fn sender_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Stops reconnection permanently, deregisters every sender, and closes
    /// the link.
    pub async fn shutdown(&self) {
        info!("CastManager: shutting down");
        let core = &self.core;
        lock(&core.supervisor).shutdown();
        core.cancel_timer();

        for session in core.registry.drain() {
            if let Some(receiver) = session.detach() {
                receiver.close().await;
            }
            session.notify(SenderNotification::ConnectionState {
                state: ConnectionState::Disconnected,
            });
        }
        let link = lock(&core.link).take();
        if let Some(link) = link {
            link.close().await;
        }
        *lock(&core.platform_status) = None;
    }
}

impl Drop for CastManager {
    fn drop(&mut self) {
        self.core.cancel_timer();
        self.event_loop.abort();
    }
}

/// A registered sender: dispatches commands and receives notifications.
pub struct SenderHandle {
    id: SenderId,
    session: Arc<LogicalSession>,
    core: Arc<Core>,
    notifications: UnboundedReceiver<SenderNotification>,
}

impl SenderHandle {
    pub fn id(&self) -> SenderId {
        self.id
    }

    /// Parses and executes one command payload. Malformed payloads fail
    /// before any transport call.
    pub async fn dispatch(&self, payload: &Value) -> Result<StatusReport> {
        let command = CastCommand::from_payload(payload)?;
        if self.core.registry.get(self.id).is_none() {
            return Err(CastError::NotConnected);
        }
        let link = self.core.current_link().ok_or(CastError::NotConnected)?;
        self.session.dispatch(&link, command).await
    }

    /// Waits for the next notification. Returns `None` once the sender is
    /// deregistered and every queued notification has been read.
    pub async fn next_notification(&mut self) -> Option<SenderNotification> {
        self.notifications.recv().await
    }

    pub fn try_next_notification(&mut self) -> Option<SenderNotification> {
        self.notifications.try_recv().ok()
    }

    /// Waits up to `timeout` for the next notification.
    pub async fn next_notification_within(
        &mut self,
        timeout: Duration,
    ) -> Option<SenderNotification> {
        tokio::time::timeout(timeout, self.notifications.recv())
            .await
            .ok()
            .flatten()
    }
}
