//! YouTube receiver: queues videos through the MDX screen id and the
//! YouTube lounge API.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::{BoundReceiver, MediaSupport, ReceiverAdapter};
use crate::command::AppCommand;
use crate::error::{CastError, Result};
use crate::protocol::StatusReport;

pub const YOUTUBE_APP_ID: &str = "233637DE";
pub const NAMESPACE_YOUTUBE_MDX: &str = "urn:x-cast:com.google.youtube.mdx";

const YOUTUBE_BASE_URL: &str = "https://www.youtube.com/";
const LOUNGE_TOKEN_URL: &str = "https://www.youtube.com/api/lounge/pairing/get_lounge_token_batch";
const BIND_URL: &str = "https://www.youtube.com/api/lounge/bc/bind";
const REMOTE_CONTROL_ID: &str = "12345678-9ABC-4DEF-0123-0123456789AB";

pub struct YouTubeAdapter;

#[async_trait]
impl ReceiverAdapter for YouTubeAdapter {
    fn media_support(&self) -> MediaSupport {
        MediaSupport::Full
    }

    async fn send_app_command(
        &self,
        receiver: &BoundReceiver,
        command: &AppCommand,
    ) -> Result<StatusReport> {
        let video_id = match (command.kind.as_str(), command.str_field("videoId")) {
            ("MEDIA", Some(video_id)) if !video_id.trim().is_empty() => video_id.to_string(),
            (kind, _) => return Err(CastError::UnknownCommand(kind.to_string())),
        };

        let session = receiver
            .channel
            .request(
                NAMESPACE_YOUTUBE_MDX,
                serde_json::json!({"type": "getMdxSessionStatus"}),
            )
            .await?;
        let screen_id = screen_id_from_session(&session)?;
        debug!("YouTube: queueing {} on screen {}", video_id, screen_id);

        tokio::task::spawn_blocking(move || queue_video(&screen_id, &video_id))
            .await
            .map_err(|err| CastError::Device(format!("YouTube queue task failed: {err}")))??;
        Ok(StatusReport::None)
    }
}

fn screen_id_from_session(response: &Value) -> Result<String> {
    if response.get("type").and_then(Value::as_str) == Some("INVALID_REQUEST") {
        let reason = response
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(CastError::Device(format!("Invalid request: {}", reason)));
    }
    response
        .get("data")
        .and_then(|data| data.get("screenId"))
        .and_then(Value::as_str)
        .filter(|screen_id| !screen_id.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| CastError::Device("Failed to fetch screenID".to_string()))
}

fn lounge_token_from_response(response: &Value) -> Result<String> {
    response
        .get("screens")
        .and_then(Value::as_array)
        .and_then(|screens| screens.first())
        .and_then(|screen| screen.get("loungeToken"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| CastError::Device("Lounge token request failed".to_string()))
}

/// Query parameters of the `setPlaylist` bind call.
fn bind_query(lounge_token: &str, video_id: &str) -> Vec<(&'static str, String)> {
    let params = serde_json::json!({
        "videoId": video_id,
        "currentTime": 5,
        "currentIndex": 0
    });
    vec![
        ("device", "REMOTE_CONTROL".to_string()),
        ("id", REMOTE_CONTROL_ID.to_string()),
        ("name", "Desktop&app=youtube-desktop".to_string()),
        ("mdx-version", "3".to_string()),
        ("loungeIdToken", lounge_token.to_string()),
        ("VER", "8".to_string()),
        ("v", "2".to_string()),
        ("t", "1".to_string()),
        ("ui", "1".to_string()),
        ("RID", "75956".to_string()),
        ("CVER", "1".to_string()),
        ("method", "setPlaylist".to_string()),
        ("params", params.to_string()),
        ("TYPE", String::new()),
    ]
}

fn queue_video(screen_id: &str, video_id: &str) -> Result<()> {
    let http_client = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(15))
        .timeout_write(Duration::from_secs(15))
        .build();

    let token_response: Value = http_client
        .post(LOUNGE_TOKEN_URL)
        .set("Origin", YOUTUBE_BASE_URL)
        .send_form(&[("screen_ids", screen_id)])
        .map_err(|err| CastError::Device(format!("Lounge token request failed: {err}")))?
        .into_json()
        .map_err(|err| CastError::Device(format!("Lounge token response parse failed: {err}")))?;
    let lounge_token = lounge_token_from_response(&token_response)?;

    let mut request = http_client.post(BIND_URL);
    for (key, value) in bind_query(&lounge_token, video_id) {
        request = request.query(key, &value);
    }
    request
        .send_form(&[("count", "0")])
        .map_err(|err| CastError::Device(format!("Queue request failed: {err}")))?;
    Ok(())
}
