//! Generic media control over `urn:x-cast:com.google.cast.media`.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::{parse_media_status, MediaStatus, NAMESPACE_MEDIA};
use crate::transport::ReceiverChannel;

/// `supportedMediaCommands` bitmask reported in media status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaCapabilities(pub u32);

impl MediaCapabilities {
    pub const PAUSE: u32 = 1;
    pub const SEEK: u32 = 2;
    pub const STREAM_VOLUME: u32 = 4;
    pub const STREAM_MUTE: u32 = 8;
    pub const SKIP_FORWARD: u32 = 16;
    pub const SKIP_BACKWARD: u32 = 32;
    pub const QUEUE_NEXT: u32 = 64;
    pub const QUEUE_PREV: u32 = 128;
    pub const QUEUE_SHUFFLE: u32 = 256;
    pub const REPEAT_ALL: u32 = 1024;
    pub const REPEAT_ONE: u32 = 2048;
    pub const REPEAT: u32 = 3072;

    pub fn of(status: &MediaStatus) -> Self {
        Self(status.supported_media_commands)
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }
}

/// Media namespace client bound to one receiver channel.
///
/// Every call returns the media status from the receiver's response, or
/// `None` when the receiver reports no media session.
#[derive(Clone)]
pub struct MediaController {
    channel: Arc<dyn ReceiverChannel>,
}

impl MediaController {
    pub fn new(channel: Arc<dyn ReceiverChannel>) -> Self {
        Self { channel }
    }

    async fn request(&self, payload: Value) -> Result<Option<MediaStatus>> {
        let response = self.channel.request(NAMESPACE_MEDIA, payload).await?;
        Ok(parse_media_status(&response))
    }

    pub async fn get_status(&self) -> Result<Option<MediaStatus>> {
        self.request(serde_json::json!({"type": "GET_STATUS"})).await
    }

    pub async fn play(&self, media_session_id: i64) -> Result<Option<MediaStatus>> {
        self.request(serde_json::json!({"type": "PLAY", "mediaSessionId": media_session_id}))
            .await
    }

    pub async fn pause(&self, media_session_id: i64) -> Result<Option<MediaStatus>> {
        self.request(serde_json::json!({"type": "PAUSE", "mediaSessionId": media_session_id}))
            .await
    }

    pub async fn stop(&self, media_session_id: i64) -> Result<Option<MediaStatus>> {
        self.request(serde_json::json!({"type": "STOP", "mediaSessionId": media_session_id}))
            .await
    }

    pub async fn seek(
        &self,
        media_session_id: i64,
        current_time: f64,
    ) -> Result<Option<MediaStatus>> {
        self.request(serde_json::json!({
            "type": "SEEK",
            "mediaSessionId": media_session_id,
            "currentTime": current_time
        }))
        .await
    }

    /// Moves the queue cursor by `jump` items (+1 next, -1 previous).
    pub async fn queue_jump(
        &self,
        media_session_id: i64,
        jump: i64,
    ) -> Result<Option<MediaStatus>> {
        self.request(serde_json::json!({
            "type": "QUEUE_UPDATE",
            "mediaSessionId": media_session_id,
            "jump": jump
        }))
        .await
    }

    /// Loads a single media object. Keys in `options` override the defaults.
    pub async fn load(&self, media: Value, options: &Value) -> Result<Option<MediaStatus>> {
        let mut payload = serde_json::json!({
            "type": "LOAD",
            "autoplay": true,
            "currentTime": 0,
            "activeTrackIds": [],
            "media": media
        });
        merge_options(&mut payload, options);
        self.request(payload).await
    }

    /// Replaces the receiver queue with `items`.
    pub async fn queue_load(
        &self,
        items: Vec<Value>,
        options: &Value,
    ) -> Result<Option<MediaStatus>> {
        let mut payload = serde_json::json!({
            "type": "QUEUE_LOAD",
            "items": items,
            "startIndex": 0,
            "repeatMode": "REPEAT_OFF"
        });
        merge_options(&mut payload, options);
        self.request(payload).await
    }
}

fn merge_options(payload: &mut Value, options: &Value) {
    let (Some(target), Some(options)) = (payload.as_object_mut(), options.as_object()) else {
        return;
    };
    for (key, value) in options {
        // Message type is fixed by the operation.
        if key != "type" {
            target.insert(key.clone(), value.clone());
        }
    }
}
