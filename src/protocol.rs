//! Cast domain model shared by the link, sessions, and adapters.
//!
//! This module defines the device-reported snapshots (platform and media
//! status), connection targets, and the notifications delivered to senders.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

pub const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
pub const NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// Application id of the stock media player receiver.
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

/// Default cast control port.
pub const DEFAULT_CAST_PORT: u16 = 8009;

/// Address of one cast device, immutable for a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceTarget {
    /// Host name or IP address. Empty when the device must be discovered by name.
    pub host: String,
    pub port: u16,
    /// Friendly name advertised over mDNS.
    pub name: Option<String>,
}

impl DeviceTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            name: None,
        }
    }

    /// Target that is resolved through discovery at connect time.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_CAST_PORT,
            name: Some(name.into()),
        }
    }

    pub fn needs_discovery(&self) -> bool {
        self.host.trim().is_empty()
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.needs_discovery()) {
            (Some(name), true) => write!(f, "'{}'", name),
            (Some(name), false) => write!(f, "'{}' ({}:{})", name, self.host, self.port),
            (None, _) => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Physical connection state owned by the device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One receiver application currently running on the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningApplication {
    pub app_id: String,
    pub session_id: String,
    /// Virtual connection destination for application-level messages.
    pub transport_id: String,
    pub display_name: String,
    pub namespaces: Vec<String>,
}

impl RunningApplication {
    pub fn supports_namespace(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|value| value == namespace)
    }

    /// Whether the application accepts generic media control.
    pub fn is_media_capable(&self) -> bool {
        self.supports_namespace(NAMESPACE_MEDIA)
    }
}

/// Device-wide volume snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Volume {
    pub level: Option<f64>,
    pub muted: Option<bool>,
}

/// Requested volume change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeSpec {
    /// Level in the device range `0.0..=1.0`.
    Level(f64),
    Muted(bool),
}

impl VolumeSpec {
    pub fn to_json(self) -> Value {
        match self {
            VolumeSpec::Level(level) => serde_json::json!({ "level": level.clamp(0.0, 1.0) }),
            VolumeSpec::Muted(muted) => serde_json::json!({ "muted": muted }),
        }
    }
}

/// Device-reported platform snapshot. Replaced wholesale on every push.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlatformStatus {
    pub applications: Vec<RunningApplication>,
    pub volume: Option<Volume>,
}

impl PlatformStatus {
    pub fn find_application(&self, app_id: &str) -> Option<&RunningApplication> {
        self.applications.iter().find(|app| app.app_id == app_id)
    }

    pub fn find_media_application(&self) -> Option<&RunningApplication> {
        self.applications.iter().find(|app| app.is_media_capable())
    }
}

/// Parses the `status` object of a `RECEIVER_STATUS` message.
pub fn parse_receiver_status(status: &Value) -> PlatformStatus {
    let applications = status
        .get("applications")
        .and_then(Value::as_array)
        .map(|apps| apps.iter().filter_map(parse_running_application).collect())
        .unwrap_or_default();
    let volume = status.get("volume").map(|volume| Volume {
        level: volume.get("level").and_then(Value::as_f64),
        muted: volume.get("muted").and_then(Value::as_bool),
    });
    PlatformStatus {
        applications,
        volume,
    }
}

fn parse_running_application(app: &Value) -> Option<RunningApplication> {
    let app_id = app.get("appId").and_then(Value::as_str)?.to_string();
    let session_id = app
        .get("sessionId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let transport_id = app
        .get("transportId")
        .and_then(Value::as_str)
        .unwrap_or(session_id.as_str())
        .to_string();
    let display_name = app
        .get("displayName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let namespaces = app
        .get("namespaces")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("name").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(RunningApplication {
        app_id,
        session_id,
        transport_id,
        display_name,
        namespaces,
    })
}

/// Media session snapshot reported by a media-capable receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatus {
    pub media_session_id: i64,
    pub player_state: String,
    pub idle_reason: Option<String>,
    pub current_time: f64,
    /// Capability bitmask, see [`crate::adapters::media::MediaCapabilities`].
    pub supported_media_commands: u32,
    /// Queue items, when the receiver reports a queue.
    pub items: Vec<Value>,
    #[serde(skip)]
    pub raw: Value,
}

impl MediaStatus {
    pub fn queued_item_count(&self) -> usize {
        self.items.len()
    }
}

/// Parses the first entry of a `MEDIA_STATUS` message.
///
/// Returns `None` when the message carries no media session, which means
/// nothing is loaded on the receiver.
pub fn parse_media_status(message: &Value) -> Option<MediaStatus> {
    if message.get("type").and_then(Value::as_str) != Some("MEDIA_STATUS") {
        return None;
    }
    let status = message.get("status")?.as_array()?.first()?.clone();
    Some(MediaStatus {
        media_session_id: status.get("mediaSessionId").and_then(Value::as_i64)?,
        player_state: status
            .get("playerState")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
        idle_reason: status
            .get("idleReason")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        current_time: status
            .get("currentTime")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        supported_media_commands: status
            .get("supportedMediaCommands")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        items: status
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        raw: status,
    })
}

/// Outcome of one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    /// Nothing to report (serializes as `null`).
    None,
    Platform(PlatformStatus),
    Media(MediaStatus),
    App(Value),
}

impl StatusReport {
    pub fn is_none(&self) -> bool {
        matches!(self, StatusReport::None)
    }
}

/// Asynchronous notification delivered to one registered sender.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SenderNotification {
    ConnectionState {
        state: ConnectionState,
    },
    /// Platform-wide status, tagged with the originating device address.
    PlatformStatus {
        device: String,
        status: PlatformStatus,
    },
    ReceiverBound {
        app_id: String,
        session_id: String,
    },
    ReceiverUnbound,
    MediaStatus {
        status: MediaStatus,
    },
}
