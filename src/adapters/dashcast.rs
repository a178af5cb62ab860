//! DashCast receiver: displays a web page on the device.

use async_trait::async_trait;
use serde_json::Value;

use super::{BoundReceiver, MediaSupport, ReceiverAdapter};
use crate::command::AppCommand;
use crate::error::{CastError, Result};
use crate::protocol::StatusReport;

pub const DASHCAST_APP_ID: &str = "5C3F0A3C";
pub const NAMESPACE_DASHCAST: &str = "urn:x-cast:es.offd.dashcast";

pub struct DashCastAdapter;

#[async_trait]
impl ReceiverAdapter for DashCastAdapter {
    fn media_support(&self) -> MediaSupport {
        MediaSupport::None
    }

    async fn send_app_command(
        &self,
        receiver: &BoundReceiver,
        command: &AppCommand,
    ) -> Result<StatusReport> {
        let url = match (command.kind.as_str(), command.str_field("url")) {
            ("LOAD", Some(url)) if !url.trim().is_empty() => url,
            (kind, _) => return Err(CastError::UnknownCommand(kind.to_string())),
        };
        let force = command.field("force").cloned().unwrap_or(Value::Bool(false));
        let reload = command.field("reload").cloned().unwrap_or(Value::from(0));
        let response = receiver
            .channel
            .request(
                NAMESPACE_DASHCAST,
                serde_json::json!({"url": url, "force": force, "reload": reload}),
            )
            .await?;
        Ok(StatusReport::App(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunningApplication;
    use crate::test_support::FakeReceiverChannel;
    use crate::transport::RawReceiver;

    fn dashcast_receiver(channel: std::sync::Arc<FakeReceiverChannel>) -> BoundReceiver {
        DashCastAdapter.init_receiver(RawReceiver {
            application: RunningApplication {
                app_id: DASHCAST_APP_ID.to_string(),
                session_id: "dash-session".to_string(),
                transport_id: "dash-transport".to_string(),
                display_name: "DashCast".to_string(),
                namespaces: vec![NAMESPACE_DASHCAST.to_string()],
            },
            channel,
        })
    }

    fn load(payload: Value) -> AppCommand {
        AppCommand {
            app: Some("dashcast".to_string()),
            kind: "LOAD".to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_load_applies_force_and_reload_defaults() {
        let channel = FakeReceiverChannel::with_response(serde_json::json!({"ok": true}));
        let receiver = dashcast_receiver(channel.clone());
        let report = DashCastAdapter
            .send_app_command(
                &receiver,
                &load(serde_json::json!({"type": "LOAD", "url": "https://example.com"})),
            )
            .await
            .expect("load should succeed");
        assert_eq!(report, StatusReport::App(serde_json::json!({"ok": true})));

        let sent = channel.requests();
        assert_eq!(sent[0].0, NAMESPACE_DASHCAST);
        assert_eq!(
            sent[0].1,
            serde_json::json!({"url": "https://example.com", "force": false, "reload": 0})
        );
    }

    #[tokio::test]
    async fn test_load_without_url_is_unknown_command() {
        let channel = FakeReceiverChannel::with_response(serde_json::json!({}));
        let receiver = dashcast_receiver(channel.clone());
        let result = DashCastAdapter
            .send_app_command(&receiver, &load(serde_json::json!({"type": "LOAD"})))
            .await;
        assert!(matches!(result, Err(CastError::UnknownCommand(_))));
        assert!(channel.requests().is_empty());
    }

    #[test]
    fn test_dashcast_receiver_has_no_media_controller() {
        let channel = FakeReceiverChannel::with_response(serde_json::json!({}));
        let receiver = dashcast_receiver(channel);
        assert!(matches!(receiver.media(), Err(CastError::UnsupportedReceiver)));
    }
}
