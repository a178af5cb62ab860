//! Receivers controlled only through the generic media command set
//! (YouTube Music, Google Play, Netflix, TuneIn, and any joined media-capable
//! application).

use async_trait::async_trait;

use super::{BoundReceiver, MediaSupport, ReceiverAdapter};
use crate::command::AppCommand;
use crate::error::{CastError, Result};
use crate::protocol::StatusReport;

pub struct MediaOnlyAdapter {
    support: MediaSupport,
}

impl MediaOnlyAdapter {
    pub fn full() -> Self {
        Self {
            support: MediaSupport::Full,
        }
    }

    /// TuneIn does not expose queue navigation.
    pub fn without_queue() -> Self {
        Self {
            support: MediaSupport::WithoutQueue,
        }
    }
}

#[async_trait]
impl ReceiverAdapter for MediaOnlyAdapter {
    fn media_support(&self) -> MediaSupport {
        self.support
    }

    async fn send_app_command(
        &self,
        _receiver: &BoundReceiver,
        command: &AppCommand,
    ) -> Result<StatusReport> {
        Err(CastError::UnknownCommand(command.kind.clone()))
    }
}
