//! Spotify receiver: loads a Spotify media object through the media
//! namespace. Account authentication is left to the device.

use async_trait::async_trait;
use serde_json::Value;

use super::{BoundReceiver, MediaSupport, ReceiverAdapter};
use crate::command::AppCommand;
use crate::error::{CastError, Result};
use crate::protocol::StatusReport;

pub const SPOTIFY_APP_ID: &str = "CC32E753";

pub struct SpotifyAdapter;

#[async_trait]
impl ReceiverAdapter for SpotifyAdapter {
    fn media_support(&self) -> MediaSupport {
        MediaSupport::Full
    }

    async fn send_app_command(
        &self,
        receiver: &BoundReceiver,
        command: &AppCommand,
    ) -> Result<StatusReport> {
        let item = match (command.kind.as_str(), command.field("media")) {
            ("MEDIA", Some(item @ Value::Object(_))) => item.clone(),
            (kind, _) => return Err(CastError::UnknownCommand(kind.to_string())),
        };
        // Spotify media carries content ids, not a url; sent as given.
        let status = receiver
            .media()?
            .load(item, &serde_json::json!({"autoplay": true}))
            .await?;
        Ok(status.map_or(StatusReport::None, StatusReport::Media))
    }
}
