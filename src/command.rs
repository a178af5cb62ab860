//! Command payload parsing and routing.
//!
//! Payloads arrive as loosely shaped JSON objects keyed by `type`. They are
//! resolved once into a closed [`CastCommand`] before dispatch so sessions
//! never branch on raw strings.

use serde_json::Value;

use crate::error::{CastError, Result};

/// Device-wide commands, independent of any receiver binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlatformCommand {
    Close,
    GetVolume,
    GetCastStatus,
    Mute,
    Unmute,
    /// Volume in percent, validated to `0..=100`.
    Volume(u8),
}

/// Generic media commands executed against the bound receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaCommand {
    GetStatus,
    Pause,
    Play,
    /// Absolute position in seconds.
    Seek(f64),
    Stop,
    QueueNext,
    QueuePrev,
}

/// Application-specific command forwarded to a receiver adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AppCommand {
    /// Declared target application (catalog key or app id). `None` targets
    /// the default media receiver.
    pub app: Option<String>,
    /// Upper-cased command type, e.g. `MEDIA`, `TTS`, `LOAD`.
    pub kind: String,
    /// Full raw payload for the adapter to interpret.
    pub payload: Value,
}

impl AppCommand {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Routing class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRoute {
    Platform,
    Media,
    App,
}

/// Fully resolved command.
#[derive(Debug, Clone, PartialEq)]
pub enum CastCommand {
    Platform(PlatformCommand),
    Media(MediaCommand),
    App(AppCommand),
}

/// Routing table from command type to route.
pub fn route_for_type(kind: &str) -> CommandRoute {
    match kind {
        "CLOSE" | "GET_VOLUME" | "GET_CAST_STATUS" | "MUTE" | "UNMUTE" | "VOLUME" => {
            CommandRoute::Platform
        }
        "GET_STATUS" | "PAUSE" | "PLAY" | "SEEK" | "STOP" | "QUEUE_NEXT" | "QUEUE_PREV" => {
            CommandRoute::Media
        }
        _ => CommandRoute::App,
    }
}

impl CastCommand {
    /// Resolves a raw payload. Missing or non-object payloads default to
    /// `GET_CAST_STATUS`.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let Some(object) = payload.as_object() else {
            return Ok(CastCommand::Platform(PlatformCommand::GetCastStatus));
        };
        let kind = match object.get("type") {
            None | Some(Value::Null) => {
                return Ok(CastCommand::Platform(PlatformCommand::GetCastStatus))
            }
            Some(Value::String(kind)) if !kind.trim().is_empty() => {
                kind.trim().to_ascii_uppercase()
            }
            Some(other) => {
                return Err(CastError::MalformedCommand(format!(
                    "command type must be a non-empty string, got {}",
                    other
                )))
            }
        };

        match route_for_type(&kind) {
            CommandRoute::Platform => parse_platform(&kind, payload).map(CastCommand::Platform),
            CommandRoute::Media => parse_media(&kind, payload).map(CastCommand::Media),
            CommandRoute::App => {
                let app = match object.get("app") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(app)) if app.trim().is_empty() => None,
                    Some(Value::String(app)) => Some(app.trim().to_string()),
                    Some(other) => {
                        return Err(CastError::MalformedCommand(format!(
                            "app must be a string, got {}",
                            other
                        )))
                    }
                };
                Ok(CastCommand::App(AppCommand {
                    app,
                    kind,
                    payload: payload.clone(),
                }))
            }
        }
    }

    pub fn route(&self) -> CommandRoute {
        match self {
            CastCommand::Platform(_) => CommandRoute::Platform,
            CastCommand::Media(_) => CommandRoute::Media,
            CastCommand::App(_) => CommandRoute::App,
        }
    }

    /// Command type name, for logging.
    pub fn kind(&self) -> &str {
        match self {
            CastCommand::Platform(PlatformCommand::Close) => "CLOSE",
            CastCommand::Platform(PlatformCommand::GetVolume) => "GET_VOLUME",
            CastCommand::Platform(PlatformCommand::GetCastStatus) => "GET_CAST_STATUS",
            CastCommand::Platform(PlatformCommand::Mute) => "MUTE",
            CastCommand::Platform(PlatformCommand::Unmute) => "UNMUTE",
            CastCommand::Platform(PlatformCommand::Volume(_)) => "VOLUME",
            CastCommand::Media(MediaCommand::GetStatus) => "GET_STATUS",
            CastCommand::Media(MediaCommand::Pause) => "PAUSE",
            CastCommand::Media(MediaCommand::Play) => "PLAY",
            CastCommand::Media(MediaCommand::Seek(_)) => "SEEK",
            CastCommand::Media(MediaCommand::Stop) => "STOP",
            CastCommand::Media(MediaCommand::QueueNext) => "QUEUE_NEXT",
            CastCommand::Media(MediaCommand::QueuePrev) => "QUEUE_PREV",
            CastCommand::App(command) => command.kind.as_str(),
        }
    }
}

fn parse_platform(kind: &str, payload: &Value) -> Result<PlatformCommand> {
    Ok(match kind {
        "CLOSE" => PlatformCommand::Close,
        "GET_VOLUME" => PlatformCommand::GetVolume,
        "GET_CAST_STATUS" => PlatformCommand::GetCastStatus,
        "MUTE" => PlatformCommand::Mute,
        "UNMUTE" => PlatformCommand::Unmute,
        "VOLUME" => {
            let volume = payload
                .get("volume")
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    CastError::MalformedCommand("VOLUME requires a numeric volume".to_string())
                })?;
            if !(0.0..=100.0).contains(&volume) {
                return Err(CastError::MalformedCommand(format!(
                    "volume must be between 0 and 100, got {}",
                    volume
                )));
            }
            PlatformCommand::Volume(volume.round() as u8)
        }
        other => return Err(CastError::UnknownCommand(other.to_string())),
    })
}

fn parse_media(kind: &str, payload: &Value) -> Result<MediaCommand> {
    Ok(match kind {
        "GET_STATUS" => MediaCommand::GetStatus,
        "PAUSE" => MediaCommand::Pause,
        "PLAY" => MediaCommand::Play,
        "STOP" => MediaCommand::Stop,
        "QUEUE_NEXT" => MediaCommand::QueueNext,
        "QUEUE_PREV" => MediaCommand::QueuePrev,
        "SEEK" => {
            let time = payload
                .get("time")
                .and_then(Value::as_f64)
                .filter(|time| time.is_finite() && *time >= 0.0)
                .ok_or_else(|| {
                    CastError::MalformedCommand(
                        "SEEK requires a non-negative numeric time".to_string(),
                    )
                })?;
            MediaCommand::Seek(time)
        }
        other => return Err(CastError::UnknownCommand(other.to_string())),
    })
}
