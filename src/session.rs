//! Per-sender binding state and command dispatch.
//!
//! A `LogicalSession` is bound to at most one receiver application. The
//! binding only changes through unjoin followed by join or launch, and a
//! launch guard keeps command-initiated launches and reconciler joins from
//! racing each other for the same session.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use uuid::Uuid;

use crate::adapters::media::MediaCapabilities;
use crate::adapters::{ApplicationDescriptor, BoundReceiver, MediaSupport, DEFAULT_MEDIA_KEY};
use crate::command::{AppCommand, CastCommand, MediaCommand, PlatformCommand};
use crate::error::{CastError, Result};
use crate::link::DeviceLink;
use crate::lock;
use crate::protocol::{
    MediaStatus, PlatformStatus, SenderNotification, StatusReport, VolumeSpec,
    DEFAULT_MEDIA_RECEIVER_APP_ID,
};
use crate::reconciler::{plan, ReconcileAction, SessionView};
use crate::transport::RawReceiver;

pub type SenderId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchOrigin {
    Command,
    Reconcile,
}

/// Result of the most recent launch or join, published when it settles.
/// `Ok` also covers attempts that ended without a binding; waiters then
/// re-evaluate against the current state.
#[derive(Debug, Clone)]
struct LaunchOutcome {
    origin: LaunchOrigin,
    app_id: String,
    result: std::result::Result<(), CastError>,
}

#[derive(Clone)]
struct Binding {
    descriptor: ApplicationDescriptor,
    receiver: Arc<BoundReceiver>,
}

struct SessionState {
    binding: Option<Binding>,
    launching: Option<LaunchOrigin>,
    /// Bumped whenever the binding is released, so a launch that settles
    /// after a teardown knows its receiver is stale.
    epoch: u64,
    detached: bool,
}

/// What an app command does next, decided under the state lock.
enum AppStep<'a> {
    Wait,
    Forward(Binding),
    Launch {
        guard: LaunchGuard<'a>,
        previous: Option<Binding>,
    },
}

/// Ownership of the launch guard for one launch or join in flight.
///
/// Settled explicitly through [`LaunchGuard::fail`], [`LaunchGuard::bind`] or
/// [`LaunchGuard::release`]. Dropping it unsettled, as happens when the
/// owning future is cancelled, clears the guard and invalidates the attempt.
struct LaunchGuard<'a> {
    session: &'a LogicalSession,
    origin: LaunchOrigin,
    app_id: String,
    epoch: u64,
    armed: bool,
}

impl<'a> LaunchGuard<'a> {
    /// Sets the guard and takes the current binding out of `state`. Must be
    /// called with the session's state lock held.
    fn acquire(
        session: &'a LogicalSession,
        state: &mut SessionState,
        origin: LaunchOrigin,
        app_id: &str,
    ) -> (Self, Option<Binding>) {
        state.launching = Some(origin);
        let previous = state.binding.take();
        if previous.is_some() {
            state.epoch += 1;
        }
        let guard = Self {
            session,
            origin,
            app_id: app_id.to_string(),
            epoch: state.epoch,
            armed: true,
        };
        (guard, previous)
    }

    fn publish(&self, result: std::result::Result<(), CastError>) {
        self.session.settled.send_replace(Some(LaunchOutcome {
            origin: self.origin,
            app_id: self.app_id.clone(),
            result,
        }));
    }

    /// Clears the guard and hands `err` to every waiter.
    fn fail(mut self, err: CastError) {
        self.armed = false;
        let mut state = lock(&self.session.state);
        state.launching = None;
        self.publish(Err(err));
    }

    /// Clears the guard without binding anything.
    fn release(mut self) {
        self.armed = false;
        let mut state = lock(&self.session.state);
        state.launching = None;
        self.publish(Ok(()));
    }

    /// Installs a freshly launched or joined receiver, unless the session was
    /// released or detached while the call was in flight.
    async fn bind(
        mut self,
        descriptor: &ApplicationDescriptor,
        receiver: &Arc<BoundReceiver>,
    ) -> Result<()> {
        let session = self.session;
        let bound = {
            let mut state = lock(&session.state);
            self.armed = false;
            state.launching = None;
            let bound = !state.detached && state.epoch == self.epoch;
            if bound {
                state.binding = Some(Binding {
                    descriptor: descriptor.clone(),
                    receiver: Arc::clone(receiver),
                });
            }
            self.publish(if bound {
                Ok(())
            } else {
                Err(CastError::NotConnected)
            });
            bound
        };

        let app_id = receiver.application.app_id.clone();
        if !bound {
            debug!("Session {}: discarding {} bound after release", session.id, app_id);
            receiver.close().await;
            return Err(CastError::NotConnected);
        }
        info!(
            "Session {}: bound to {} ({})",
            session.id, descriptor.key, receiver.application.session_id
        );
        session.notify(SenderNotification::ReceiverBound {
            app_id,
            session_id: receiver.application.session_id.clone(),
        });
        Ok(())
    }
}

impl Drop for LaunchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            "Session {}: launch of {} abandoned before it settled",
            self.session.id, self.app_id
        );
        let mut state = lock(&self.session.state);
        state.launching = None;
        // A receiver from the abandoned attempt must never be installed.
        state.epoch += 1;
        self.publish(Ok(()));
    }
}

/// The firmware of the default media receiver under-reports the queue
/// navigation bits when more than one item is queued. Queue navigation is
/// allowed through in exactly that case.
pub fn queue_navigation_bypass(app_id: &str, status: &MediaStatus) -> bool {
    app_id.eq_ignore_ascii_case(DEFAULT_MEDIA_RECEIVER_APP_ID) && status.queued_item_count() > 1
}

pub struct LogicalSession {
    id: SenderId,
    descriptors: Vec<ApplicationDescriptor>,
    generic: Option<ApplicationDescriptor>,
    state: Mutex<SessionState>,
    settled: watch::Sender<Option<LaunchOutcome>>,
    notifications: UnboundedSender<SenderNotification>,
}

impl LogicalSession {
    /// Creates an unbound session. `generic` is set when the session accepts
    /// any media-capable receiver in addition to `descriptors`.
    pub fn new(
        descriptors: Vec<ApplicationDescriptor>,
        generic: Option<ApplicationDescriptor>,
        notifications: UnboundedSender<SenderNotification>,
    ) -> Self {
        let (settled, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            descriptors,
            generic,
            state: Mutex::new(SessionState {
                binding: None,
                launching: None,
                epoch: 0,
                detached: false,
            }),
            settled,
            notifications,
        }
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn descriptors(&self) -> &[ApplicationDescriptor] {
        &self.descriptors
    }

    /// App id of the bound receiver application, if any.
    pub fn bound_app_id(&self) -> Option<String> {
        lock(&self.state)
            .binding
            .as_ref()
            .map(|binding| binding.receiver.application.app_id.clone())
    }

    pub fn is_launching(&self) -> bool {
        lock(&self.state).launching.is_some()
    }

    pub fn notify(&self, notification: SenderNotification) {
        // The sender may already be gone.
        let _ = self.notifications.send(notification);
    }

    pub async fn dispatch(&self, link: &DeviceLink, command: CastCommand) -> Result<StatusReport> {
        debug!("Session {}: dispatching {}", self.id, command.kind());
        let result = match command {
            CastCommand::Platform(command) => self.dispatch_platform(link, command).await,
            CastCommand::Media(command) => self.dispatch_media(command).await,
            CastCommand::App(command) => self.dispatch_app(link, &command).await,
        };
        if let Err(err) = &result {
            debug!("Session {}: command failed: {}", self.id, err);
        }
        result
    }

    async fn dispatch_platform(
        &self,
        link: &DeviceLink,
        command: PlatformCommand,
    ) -> Result<StatusReport> {
        let status = match command {
            PlatformCommand::Close => match self.settled_binding().await? {
                Some(binding) => {
                    let session_id = binding.receiver.application.session_id.clone();
                    info!("Session {}: stopping {}", self.id, session_id);
                    let status = link.stop(&session_id).await?;
                    self.unjoin_receiver(&binding.receiver).await;
                    status
                }
                None => link.get_status().await?,
            },
            PlatformCommand::GetVolume => {
                link.get_volume().await?;
                link.get_status().await?
            }
            PlatformCommand::GetCastStatus => link.get_status().await?,
            PlatformCommand::Mute => {
                link.set_volume(VolumeSpec::Muted(true)).await?;
                link.get_status().await?
            }
            PlatformCommand::Unmute => {
                link.set_volume(VolumeSpec::Muted(false)).await?;
                link.get_status().await?
            }
            PlatformCommand::Volume(percent) => {
                link.set_volume(VolumeSpec::Level(f64::from(percent) / 100.0))
                    .await?;
                link.get_status().await?
            }
        };
        Ok(StatusReport::Platform(status))
    }

    async fn dispatch_media(&self, command: MediaCommand) -> Result<StatusReport> {
        let Some(binding) = self.settled_binding().await? else {
            return match command {
                MediaCommand::GetStatus => Ok(StatusReport::None),
                _ => Err(CastError::NoActiveReceiver),
            };
        };
        match binding.descriptor.adapter.media_support() {
            MediaSupport::None => return Err(CastError::UnsupportedReceiver),
            MediaSupport::WithoutQueue
                if matches!(command, MediaCommand::QueueNext | MediaCommand::QueuePrev) =>
            {
                return Err(CastError::UnsupportedReceiver)
            }
            _ => {}
        }
        let media = binding.receiver.media()?;

        let Some(current) = media.get_status().await? else {
            return match command {
                MediaCommand::GetStatus => Ok(StatusReport::None),
                _ => Err(CastError::NotPlaying),
            };
        };
        let capabilities = MediaCapabilities::of(&current);
        let session_id = current.media_session_id;
        let bypass = queue_navigation_bypass(&binding.receiver.application.app_id, &current);
        let queue_allowed = |bit: u32| capabilities.contains(bit) || bypass;

        let updated = match command {
            MediaCommand::GetStatus => return Ok(StatusReport::Media(current)),
            MediaCommand::Play => media.play(session_id).await?,
            MediaCommand::Stop => media.stop(session_id).await?,
            MediaCommand::Pause if capabilities.contains(MediaCapabilities::PAUSE) => {
                media.pause(session_id).await?
            }
            MediaCommand::Seek(time) if capabilities.contains(MediaCapabilities::SEEK) => {
                media.seek(session_id, time).await?
            }
            MediaCommand::QueueNext if queue_allowed(MediaCapabilities::QUEUE_NEXT) => {
                media.queue_jump(session_id, 1).await?
            }
            MediaCommand::QueuePrev if queue_allowed(MediaCapabilities::QUEUE_PREV) => {
                media.queue_jump(session_id, -1).await?
            }
            _ => {
                debug!(
                    "Session {}: receiver does not advertise {:?}, skipping",
                    self.id, command
                );
                return Ok(StatusReport::Media(current));
            }
        };
        Ok(updated.map_or(StatusReport::None, StatusReport::Media))
    }

    fn resolve_descriptor(&self, app: Option<&str>) -> Result<ApplicationDescriptor> {
        let name = app.unwrap_or(DEFAULT_MEDIA_KEY);
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.app_id.is_some() && descriptor.matches_name(name))
            .cloned()
            .ok_or_else(|| {
                CastError::MalformedCommand(format!(
                    "application '{}' is not supported by this sender",
                    name
                ))
            })
    }

    async fn dispatch_app(&self, link: &DeviceLink, command: &AppCommand) -> Result<StatusReport> {
        let descriptor = self.resolve_descriptor(command.app.as_deref())?;
        let app_id = descriptor.app_id.clone().unwrap_or_default();

        let (guard, previous) = loop {
            let mut settled = self.settled.subscribe();
            let step = {
                let mut state = lock(&self.state);
                if state.detached {
                    return Err(CastError::NotConnected);
                }
                if state.launching.is_some() {
                    AppStep::Wait
                } else {
                    match &state.binding {
                        Some(binding)
                            if binding
                                .receiver
                                .application
                                .app_id
                                .eq_ignore_ascii_case(&app_id) =>
                        {
                            AppStep::Forward(binding.clone())
                        }
                        _ => {
                            let (guard, previous) = LaunchGuard::acquire(
                                self,
                                &mut state,
                                LaunchOrigin::Command,
                                &app_id,
                            );
                            AppStep::Launch { guard, previous }
                        }
                    }
                }
            };
            match step {
                AppStep::Wait => {
                    let _ = settled.changed().await;
                    let outcome = settled.borrow_and_update().clone();
                    if let Some(LaunchOutcome {
                        origin: LaunchOrigin::Command,
                        app_id: launched,
                        result: Err(err),
                    }) = outcome
                    {
                        if launched.eq_ignore_ascii_case(&app_id) {
                            return Err(err);
                        }
                    }
                }
                AppStep::Forward(binding) => {
                    return binding
                        .descriptor
                        .adapter
                        .send_app_command(&binding.receiver, command)
                        .await;
                }
                AppStep::Launch { guard, previous } => break (guard, previous),
            }
        };

        if let Some(previous) = previous {
            self.finish_unbind(previous.receiver).await;
        }

        let raw = match self.open_application(link, &descriptor, &app_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                guard.release();
                return Ok(StatusReport::None);
            }
            Err(err) => {
                warn!("Session {}: launch of {} failed: {}", self.id, app_id, err);
                guard.fail(err.clone());
                return Err(err);
            }
        };
        let receiver = Arc::new(descriptor.adapter.init_receiver(raw));
        guard.bind(&descriptor, &receiver).await?;
        descriptor
            .adapter
            .send_app_command(&receiver, command)
            .await
    }

    /// Joins a running session of `app_id` or launches a new one. Returns
    /// `None` when the device reports the application unavailable.
    async fn open_application(
        &self,
        link: &DeviceLink,
        descriptor: &ApplicationDescriptor,
        app_id: &str,
    ) -> Result<Option<RawReceiver>> {
        let availability = link.get_app_availability(&[app_id.to_string()]).await?;
        let available = availability
            .iter()
            .any(|(id, available)| *available && id.eq_ignore_ascii_case(app_id));
        if !available {
            info!("Session {}: {} is not available on the device", self.id, app_id);
            return Ok(None);
        }

        let running = link
            .get_sessions()
            .await?
            .into_iter()
            .find(|application| application.app_id.eq_ignore_ascii_case(app_id));
        let raw = match running {
            Some(application) => {
                info!(
                    "Session {}: joining running {} ({})",
                    self.id, descriptor.key, application.session_id
                );
                link.join(&application).await?
            }
            None => {
                info!("Session {}: launching {} ({})", self.id, descriptor.key, app_id);
                link.launch(app_id).await?
            }
        };
        Ok(Some(raw))
    }

    /// Waits for any in-flight launch to settle and returns the binding.
    async fn settled_binding(&self) -> Result<Option<Binding>> {
        loop {
            let mut settled = self.settled.subscribe();
            {
                let state = lock(&self.state);
                if state.detached {
                    return Err(CastError::NotConnected);
                }
                if state.launching.is_none() {
                    return Ok(state.binding.clone());
                }
            }
            let _ = settled.changed().await;
        }
    }

    /// Applies one platform status to this session's binding.
    pub async fn reconcile(&self, link: &DeviceLink, status: &PlatformStatus) {
        let (action, claim) = {
            let mut state = lock(&self.state);
            if state.detached {
                return;
            }
            let action = {
                let view = SessionView {
                    descriptors: &self.descriptors,
                    generic: self.generic.as_ref(),
                    bound_app_id: state
                        .binding
                        .as_ref()
                        .map(|binding| binding.receiver.application.app_id.as_str()),
                    launching: state.launching.is_some(),
                };
                plan(&view, status)
            };
            let claim = match &action {
                ReconcileAction::Join { application, .. } => Some(LaunchGuard::acquire(
                    self,
                    &mut state,
                    LaunchOrigin::Reconcile,
                    &application.app_id,
                )),
                _ => None,
            };
            (action, claim)
        };

        match action {
            ReconcileAction::Keep => {}
            ReconcileAction::Unjoin => {
                info!("Session {}: bound application is gone, unjoining", self.id);
                self.unjoin().await;
            }
            ReconcileAction::Join {
                application,
                descriptor,
            } => {
                let Some((guard, previous)) = claim else {
                    return;
                };
                if let Some(previous) = previous {
                    self.finish_unbind(previous.receiver).await;
                }

                info!(
                    "Session {}: joining {} ({})",
                    self.id, application.app_id, application.session_id
                );
                match link.join(&application).await {
                    Ok(raw) => {
                        let receiver = Arc::new(descriptor.adapter.init_receiver(raw));
                        let _ = guard.bind(&descriptor, &receiver).await;
                    }
                    Err(err) => {
                        warn!(
                            "Session {}: join of {} failed: {}",
                            self.id, application.app_id, err
                        );
                        guard.fail(err);
                    }
                }
            }
        }
    }

    /// Forwards unsolicited media status if it comes from the bound receiver.
    pub fn forward_media_status(&self, transport_id: &str, status: &MediaStatus) {
        let from_bound = lock(&self.state)
            .binding
            .as_ref()
            .is_some_and(|binding| binding.receiver.application.transport_id == transport_id);
        if from_bound {
            self.notify(SenderNotification::MediaStatus {
                status: status.clone(),
            });
        }
    }

    /// Clears the binding synchronously, invalidating any launch in flight.
    /// The caller closes the returned receiver via [`Self::finish_unbind`].
    pub fn release_binding(&self) -> Option<Arc<BoundReceiver>> {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.binding.take().map(|binding| binding.receiver)
    }

    /// Closes a released receiver, then tells the sender it is unbound.
    pub async fn finish_unbind(&self, receiver: Arc<BoundReceiver>) {
        receiver.close().await;
        self.notify(SenderNotification::ReceiverUnbound);
    }

    /// Releases and closes the current binding. No-op when unbound.
    pub async fn unjoin(&self) {
        if let Some(receiver) = self.release_binding() {
            self.finish_unbind(receiver).await;
        }
    }

    /// Unjoins only if `receiver` is still the bound one.
    async fn unjoin_receiver(&self, receiver: &Arc<BoundReceiver>) {
        let released = {
            let mut state = lock(&self.state);
            let still_bound = state
                .binding
                .as_ref()
                .is_some_and(|binding| Arc::ptr_eq(&binding.receiver, receiver));
            if still_bound {
                state.epoch += 1;
                state.binding.take().map(|binding| binding.receiver)
            } else {
                None
            }
        };
        if let Some(receiver) = released {
            self.finish_unbind(receiver).await;
        }
    }

    /// Marks the session deregistered. Late responses for in-flight
    /// operations are discarded. Returns the receiver to close, if bound.
    pub fn detach(&self) -> Option<Arc<BoundReceiver>> {
        let mut state = lock(&self.state);
        state.detached = true;
        state.epoch += 1;
        state.binding.take().map(|binding| binding.receiver)
    }
}
