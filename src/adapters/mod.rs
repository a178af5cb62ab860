//! Receiver adapters: per-application translation of commands into wire
//! calls, and the catalog of applications a sender may bind to.

pub mod dashcast;
pub mod default_media;
pub mod media;
pub mod media_only;
pub mod spotify;
pub mod youtube;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use crate::command::AppCommand;
use crate::config::TtsConfig;
use crate::error::{CastError, Result};
use crate::protocol::{RunningApplication, StatusReport};
use crate::transport::{RawReceiver, ReceiverChannel};
use media::MediaController;

pub const DEFAULT_MEDIA_KEY: &str = "default_media";
pub const GENERIC_KEY: &str = "generic";

/// Keys of the built-in catalog, in catalog order.
pub const BUILTIN_APPLICATION_KEYS: [&str; 9] = [
    DEFAULT_MEDIA_KEY,
    "dashcast",
    "youtube",
    "youtube_music",
    "google_play_music",
    "google_play_movies",
    "netflix",
    "spotify",
    "tunein",
];

/// How much of the generic media command set a receiver accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSupport {
    None,
    Full,
    /// Media control without QUEUE_NEXT/QUEUE_PREV.
    WithoutQueue,
}

/// A receiver handle after adapter wrapping. Owned by exactly one session.
pub struct BoundReceiver {
    pub application: RunningApplication,
    pub channel: Arc<dyn ReceiverChannel>,
    media: Option<MediaController>,
}

impl BoundReceiver {
    pub fn media(&self) -> Result<&MediaController> {
        self.media.as_ref().ok_or(CastError::UnsupportedReceiver)
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl fmt::Debug for BoundReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundReceiver")
            .field("application", &self.application)
            .field("media", &self.media.is_some())
            .finish_non_exhaustive()
    }
}

/// Interface implemented by per-application receiver adapters.
#[async_trait]
pub trait ReceiverAdapter: Send + Sync {
    fn media_support(&self) -> MediaSupport;

    /// Wraps a freshly launched or joined receiver.
    fn init_receiver(&self, raw: RawReceiver) -> BoundReceiver {
        let media = (self.media_support() != MediaSupport::None)
            .then(|| MediaController::new(Arc::clone(&raw.channel)));
        BoundReceiver {
            application: raw.application,
            channel: raw.channel,
            media,
        }
    }

    /// Executes an application-specific command. Unrecognized shapes fail
    /// with [`CastError::UnknownCommand`].
    async fn send_app_command(
        &self,
        receiver: &BoundReceiver,
        command: &AppCommand,
    ) -> Result<StatusReport>;
}

/// One application a sender may bind to.
#[derive(Clone)]
pub struct ApplicationDescriptor {
    pub key: String,
    /// `None` for the generic descriptor, which matches by media namespace.
    pub app_id: Option<String>,
    pub adapter: Arc<dyn ReceiverAdapter>,
}

impl ApplicationDescriptor {
    pub fn new(key: &str, app_id: Option<&str>, adapter: Arc<dyn ReceiverAdapter>) -> Self {
        Self {
            key: key.to_string(),
            app_id: app_id.map(ToString::to_string),
            adapter,
        }
    }

    pub fn matches_app_id(&self, app_id: &str) -> bool {
        self.app_id
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(app_id))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name) || self.matches_app_id(name)
    }
}

impl fmt::Debug for ApplicationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationDescriptor")
            .field("key", &self.key)
            .field("app_id", &self.app_id)
            .field("media_support", &self.adapter.media_support())
            .finish()
    }
}

/// Statically enumerated set of known receiver applications.
#[derive(Debug, Clone)]
pub struct AppCatalog {
    descriptors: Vec<ApplicationDescriptor>,
    generic: ApplicationDescriptor,
}

impl AppCatalog {
    pub fn new(descriptors: Vec<ApplicationDescriptor>, generic: ApplicationDescriptor) -> Self {
        Self {
            descriptors,
            generic,
        }
    }

    pub fn builtin(tts: &TtsConfig) -> Self {
        let descriptors = vec![
            ApplicationDescriptor::new(
                DEFAULT_MEDIA_KEY,
                Some(crate::protocol::DEFAULT_MEDIA_RECEIVER_APP_ID),
                Arc::new(default_media::DefaultMediaAdapter::new(tts.clone())),
            ),
            ApplicationDescriptor::new(
                "dashcast",
                Some(dashcast::DASHCAST_APP_ID),
                Arc::new(dashcast::DashCastAdapter),
            ),
            ApplicationDescriptor::new(
                "youtube",
                Some(youtube::YOUTUBE_APP_ID),
                Arc::new(youtube::YouTubeAdapter),
            ),
            ApplicationDescriptor::new(
                "youtube_music",
                Some("2DB7CC49"),
                Arc::new(media_only::MediaOnlyAdapter::full()),
            ),
            ApplicationDescriptor::new(
                "google_play_music",
                Some("2872939A"),
                Arc::new(media_only::MediaOnlyAdapter::full()),
            ),
            ApplicationDescriptor::new(
                "google_play_movies",
                Some("9381F2BD"),
                Arc::new(media_only::MediaOnlyAdapter::full()),
            ),
            ApplicationDescriptor::new(
                "netflix",
                Some("CA5E8412"),
                Arc::new(media_only::MediaOnlyAdapter::full()),
            ),
            ApplicationDescriptor::new(
                "spotify",
                Some(spotify::SPOTIFY_APP_ID),
                Arc::new(spotify::SpotifyAdapter),
            ),
            ApplicationDescriptor::new(
                "tunein",
                Some("12F05308"),
                Arc::new(media_only::MediaOnlyAdapter::without_queue()),
            ),
        ];
        let generic = ApplicationDescriptor::new(
            GENERIC_KEY,
            None,
            Arc::new(media_only::MediaOnlyAdapter::full()),
        );
        Self::new(descriptors, generic)
    }

    /// Looks up a descriptor by catalog key or application id.
    pub fn find(&self, name: &str) -> Option<&ApplicationDescriptor> {
        let name = name.trim();
        if self.generic.matches_name(name) {
            return Some(&self.generic);
        }
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.matches_name(name))
    }

    pub fn generic(&self) -> &ApplicationDescriptor {
        &self.generic
    }

    /// Descriptors for the given keys, in the given order. Unknown keys are
    /// logged and skipped.
    pub fn select(&self, keys: &[String]) -> Vec<ApplicationDescriptor> {
        let mut selected: Vec<ApplicationDescriptor> = Vec::new();
        for key in keys {
            match self.descriptors.iter().find(|d| d.matches_name(key)) {
                Some(descriptor) => {
                    if !selected.iter().any(|existing| existing.key == descriptor.key) {
                        selected.push(descriptor.clone());
                    }
                }
                None => warn!("Catalog: ignoring unknown application '{}'", key),
            }
        }
        selected
    }
}
