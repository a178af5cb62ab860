//! Default media receiver: single media loads, queues, and text-to-speech.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{BoundReceiver, MediaSupport, ReceiverAdapter};
use crate::command::AppCommand;
use crate::config::TtsConfig;
use crate::error::{CastError, Result};
use crate::protocol::StatusReport;

const TTS_MAX_TEXT_CHARS: usize = 200;
const TTS_BASE_URL: &str = "https://translate.google.com/translate_tts";
const DEFAULT_MEDIA_IMAGE: &str = "https://nodered.org/node-red-icon.png";
const FALLBACK_CONTENT_TYPE: &str = "audio/basic";
const QUEUE_PRELOAD_SECS: u64 = 5;

pub struct DefaultMediaAdapter {
    tts: TtsConfig,
}

impl DefaultMediaAdapter {
    pub fn new(tts: TtsConfig) -> Self {
        Self { tts }
    }

    fn tts_media(&self, command: &AppCommand) -> Result<Value> {
        let text = command
            .str_field("text")
            .filter(|text| !text.is_empty())
            .ok_or_else(|| CastError::UnknownCommand("TTS without text".to_string()))?;
        if text.chars().count() > TTS_MAX_TEXT_CHARS {
            return Err(CastError::MalformedCommand(format!(
                "TTS text must be at most {} characters",
                TTS_MAX_TEXT_CHARS
            )));
        }
        let language = command
            .str_field("language")
            .filter(|language| !language.trim().is_empty())
            .unwrap_or(self.tts.language.as_str());
        let speed = command
            .field("speed")
            .and_then(Value::as_f64)
            .unwrap_or(self.tts.speed);

        let mut metadata = command
            .field("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if !metadata.get("title").is_some_and(|title| is_truthy(title)) {
            metadata.insert("title".to_string(), Value::from("tts"));
        }

        build_media_object(&serde_json::json!({
            "url": tts_url(text, language, speed),
            "contentType": "audio/mp3",
            "metadata": metadata
        }))
    }
}

#[async_trait]
impl ReceiverAdapter for DefaultMediaAdapter {
    fn media_support(&self) -> MediaSupport {
        MediaSupport::Full
    }

    async fn send_app_command(
        &self,
        receiver: &BoundReceiver,
        command: &AppCommand,
    ) -> Result<StatusReport> {
        let media = receiver.media()?;
        let status = match (command.kind.as_str(), command.field("media")) {
            ("MEDIA", Some(Value::Array(items))) if !items.is_empty() => {
                let items = build_queue_items(items)?;
                let options = command
                    .field("mediaOptions")
                    .cloned()
                    .unwrap_or_else(|| {
                        serde_json::json!({"startIndex": 0, "repeatMode": "REPEAT_OFF"})
                    });
                media.queue_load(items, &options).await?
            }
            ("MEDIA", Some(item @ Value::Object(_))) => {
                let options = command
                    .field("mediaOptions")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"autoplay": true}));
                media.load(build_media_object(item)?, &options).await?
            }
            ("TTS", _) => {
                let tts = self.tts_media(command)?;
                media
                    .load(tts, &serde_json::json!({"autoplay": true}))
                    .await?
            }
            (kind, _) => return Err(CastError::UnknownCommand(kind.to_string())),
        };
        Ok(status.map_or(StatusReport::None, StatusReport::Media))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

/// Google Translate TTS url for `text`.
pub fn tts_url(text: &str, language: &str, speed: f64) -> String {
    format!(
        "{}?ie=UTF-8&client=tw-ob&tl={}&ttsspeed={}&q={}",
        TTS_BASE_URL,
        urlencoding::encode(language),
        speed,
        urlencoding::encode(text)
    )
}

/// Builds a cast media object from a loose `{url, contentType, streamType,
/// metadata, textTrackStyle, tracks}` description.
pub fn build_media_object(media: &Value) -> Result<Value> {
    let url = media
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| CastError::MalformedCommand("media requires a url".to_string()))?;
    let file_name = file_name_from_url(url);

    let mut metadata = Map::new();
    metadata.insert("metadataType".to_string(), Value::from(0));
    metadata.insert("title".to_string(), Value::from(file_name));
    metadata.insert("subtitle".to_string(), Value::Null);
    metadata.insert(
        "images".to_string(),
        serde_json::json!([{"url": DEFAULT_MEDIA_IMAGE}]),
    );
    if let Some(supplied) = media.get("metadata").and_then(Value::as_object) {
        for (key, value) in supplied {
            metadata.insert(key.clone(), value.clone());
        }
    }

    let content_type = media
        .get("contentType")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| content_type_for(file_name).to_string());
    let stream_type = media
        .get("streamType")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .unwrap_or("BUFFERED");

    let mut object = serde_json::json!({
        "contentId": url,
        "contentType": content_type,
        "streamType": stream_type,
        "metadata": metadata
    });
    for key in ["textTrackStyle", "tracks"] {
        if let Some(value) = media.get(key).filter(|value| !value.is_null()) {
            object[key] = value.clone();
        }
    }
    Ok(object)
}

fn build_queue_items(items: &[Value]) -> Result<Vec<Value>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            Ok(serde_json::json!({
                "autoplay": true,
                "preloadTime": QUEUE_PRELOAD_SECS,
                "orderId": index,
                "activeTrackIds": [],
                "media": build_media_object(item)?
            }))
        })
        .collect()
}

fn file_name_from_url(url: &str) -> &str {
    let last_segment = url.rsplit('/').next().unwrap_or(url);
    last_segment.split('?').next().unwrap_or(last_segment)
}

/// Content type by file extension, falling back to `audio/basic`.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "3gp" => "video/3gpp",
        "aac" => "video/mp4",
        "aif" | "aiff" | "aifc" => "audio/x-aiff",
        "avi" => "video/x-msvideo",
        "au" | "snd" => "audio/basic",
        "bmp" => "image/bmp",
        "flv" => "video/x-flv",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "jpe" | "jpeg" | "jpg" => "image/jpeg",
        "m3u" => "audio/x-mpegurl",
        "m3u8" => "application/x-mpegURL",
        "m4a" => "audio/mp4",
        "mid" | "midi" | "rmi" => "audio/mid",
        "mov" | "qt" => "video/quicktime",
        "movie" => "video/x-sgi-movie",
        "mpa" => "audio/mpeg",
        "mp2" => "audio/x-mpeg",
        "mp3" => "audio/mp3",
        "mp4" => "video/mp4",
        "mjpg" | "mjpeg" => "video/x-motion-jpeg",
        "mpe" | "mpeg" | "mpg" => "video/mpeg",
        "ogg" | "ogv" => "audio/ogg",
        "png" => "image/png",
        "ra" => "audio/vnd.rn-realaudio",
        "ram" => "audio/x-pn-realaudio",
        "rpm" => "audio/x-pn-realaudio-plugin",
        "stream" => "audio/x-qt-stream",
        "svg" => "image/svg",
        "tif" | "tiff" => "image/tiff",
        "vp8" | "webm" => "video/webm",
        "wav" => "audio/vnd.wav",
        "webp" => "image/webp",
        "wmv" => "video/x-ms-wmv",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RunningApplication, NAMESPACE_MEDIA};
    use crate::test_support::FakeReceiverChannel;
    use crate::transport::RawReceiver;

    fn bound(channel: std::sync::Arc<FakeReceiverChannel>) -> BoundReceiver {
        DefaultMediaAdapter::new(TtsConfig::default()).init_receiver(RawReceiver {
            application: RunningApplication {
                app_id: "CC1AD845".to_string(),
                session_id: "session-1".to_string(),
                transport_id: "transport-1".to_string(),
                display_name: "Default Media Receiver".to_string(),
                namespaces: vec![NAMESPACE_MEDIA.to_string()],
            },
            channel,
        })
    }

    fn command(payload: Value) -> AppCommand {
        AppCommand {
            app: None,
            kind: payload["type"].as_str().unwrap_or_default().to_string(),
            payload,
        }
    }

    fn loaded_response() -> Value {
        serde_json::json!({
            "type": "MEDIA_STATUS",
            "status": [{"mediaSessionId": 1, "playerState": "BUFFERING"}]
        })
    }

    #[test]
    fn test_content_type_table_and_fallback() {
        assert_eq!(content_type_for("song.MP3"), "audio/mp3");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("image.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("stream"), "audio/x-qt-stream");
        assert_eq!(content_type_for("unknown.xyz"), "audio/basic");
    }

    #[test]
    fn test_media_object_defaults_and_metadata_merge() {
        let object = build_media_object(&serde_json::json!({
            "url": "https://example.com/music/track.flac?token=1",
            "metadata": {"artist": "Someone"}
        }))
        .expect("media object should build");
        assert_eq!(object["contentId"], "https://example.com/music/track.flac?token=1");
        assert_eq!(object["contentType"], "audio/basic");
        assert_eq!(object["streamType"], "BUFFERED");
        assert_eq!(object["metadata"]["title"], "track.flac");
        assert_eq!(object["metadata"]["metadataType"], 0);
        assert_eq!(object["metadata"]["artist"], "Someone");
        assert!(object.get("tracks").is_none());
    }

    #[test]
    fn test_media_object_requires_url() {
        assert!(matches!(
            build_media_object(&serde_json::json!({"contentType": "audio/mp3"})),
            Err(CastError::MalformedCommand(_))
        ));
    }

    #[test]
    fn test_tts_url_encodes_text() {
        assert_eq!(
            tts_url("hello world", "en", 1.0),
            format!(
                "{}?ie=UTF-8&client=tw-ob&tl=en&ttsspeed=1&q=hello%20world",
                TTS_BASE_URL
            )
        );
    }

    #[tokio::test]
    async fn test_media_array_loads_queue_with_ordered_items() {
        let channel = FakeReceiverChannel::with_response(loaded_response());
        let receiver = bound(channel.clone());
        let adapter = DefaultMediaAdapter::new(TtsConfig::default());
        let report = adapter
            .send_app_command(
                &receiver,
                &command(serde_json::json!({
                    "type": "MEDIA",
                    "media": [{"url": "http://host/a.mp3"}, {"url": "http://host/b.mp3"}]
                })),
            )
            .await
            .expect("queue load should succeed");
        assert!(matches!(report, StatusReport::Media(_)));

        let sent = channel.requests();
        assert_eq!(sent[0].1["type"], "QUEUE_LOAD");
        assert_eq!(sent[0].1["startIndex"], 0);
        assert_eq!(sent[0].1["repeatMode"], "REPEAT_OFF");
        assert_eq!(sent[0].1["items"][1]["orderId"], 1);
        assert_eq!(sent[0].1["items"][1]["preloadTime"], 5);
        assert_eq!(sent[0].1["items"][0]["media"]["contentType"], "audio/mp3");
    }

    #[tokio::test]
    async fn test_tts_rejects_long_text_without_loading() {
        let channel = FakeReceiverChannel::with_response(loaded_response());
        let receiver = bound(channel.clone());
        let adapter = DefaultMediaAdapter::new(TtsConfig::default());
        let result = adapter
            .send_app_command(
                &receiver,
                &command(serde_json::json!({"type": "TTS", "text": "x".repeat(201)})),
            )
            .await;
        assert!(matches!(result, Err(CastError::MalformedCommand(_))));
        assert!(channel.requests().is_empty());
    }

    #[tokio::test]
    async fn test_tts_loads_mp3_titled_tts() {
        let channel = FakeReceiverChannel::with_response(loaded_response());
        let receiver = bound(channel.clone());
        let adapter = DefaultMediaAdapter::new(TtsConfig {
            language: "de".to_string(),
            speed: 1.0,
        });
        adapter
            .send_app_command(
                &receiver,
                &command(serde_json::json!({"type": "TTS", "text": "Hallo"})),
            )
            .await
            .expect("tts should load");
        let sent = channel.requests();
        let media = &sent[0].1["media"];
        assert_eq!(sent[0].1["type"], "LOAD");
        assert_eq!(media["contentType"], "audio/mp3");
        assert_eq!(media["metadata"]["title"], "tts");
        assert!(media["contentId"]
            .as_str()
            .is_some_and(|url| url.contains("tl=de") && url.ends_with("q=Hallo")));
    }

    #[tokio::test]
    async fn test_unrecognized_command_is_unknown() {
        let channel = FakeReceiverChannel::with_response(loaded_response());
        let receiver = bound(channel.clone());
        let adapter = DefaultMediaAdapter::new(TtsConfig::default());
        let result = adapter
            .send_app_command(&receiver, &command(serde_json::json!({"type": "LAUNCH_ROCKET"})))
            .await;
        assert_eq!(result, Err(CastError::UnknownCommand("LAUNCH_ROCKET".to_string())));
        let result = adapter
            .send_app_command(&receiver, &command(serde_json::json!({"type": "MEDIA"})))
            .await;
        assert!(matches!(result, Err(CastError::UnknownCommand(_))));
    }
}
