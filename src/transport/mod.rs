//! Device transport capability.
//!
//! The session layer talks to devices only through these traits. The Cast v2
//! TLS implementation lives in [`castv2`]; tests substitute in-memory fakes.

pub mod castv2;
pub mod frame;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;
use crate::protocol::{
    DeviceTarget, MediaStatus, PlatformStatus, RunningApplication, Volume, VolumeSpec,
};

/// Unsolicited event pushed by a connected transport. The event channel
/// closing means the transport was torn down.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(PlatformStatus),
    MediaStatus {
        transport_id: String,
        status: MediaStatus,
    },
    Error(String),
}

/// A live transport and its event stream.
pub struct Connection {
    pub transport: Arc<dyn CastTransport>,
    pub events: UnboundedReceiver<TransportEvent>,
    /// Address the transport actually reached (after discovery).
    pub peer_address: String,
}

/// Opens transports to a device target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &DeviceTarget) -> Result<Connection>;
}

/// Request/response operations against the device receiver.
#[async_trait]
pub trait CastTransport: Send + Sync {
    async fn get_app_availability(&self, app_ids: &[String]) -> Result<HashMap<String, bool>>;
    async fn get_sessions(&self) -> Result<Vec<RunningApplication>>;
    async fn launch(&self, app_id: &str) -> Result<RawReceiver>;
    async fn join(&self, application: &RunningApplication) -> Result<RawReceiver>;
    async fn get_status(&self) -> Result<PlatformStatus>;
    async fn get_volume(&self) -> Result<Volume>;
    async fn set_volume(&self, change: VolumeSpec) -> Result<Volume>;
    async fn stop(&self, session_id: &str) -> Result<PlatformStatus>;
    /// Tears the transport down. Must tolerate repeated calls.
    async fn close(&self);
}

/// Namespace-addressed message channel to one running receiver application.
#[async_trait]
pub trait ReceiverChannel: Send + Sync {
    /// Sends a request and waits for the correlated response.
    async fn request(&self, namespace: &str, payload: Value) -> Result<Value>;
    /// Sends a message without waiting for a response.
    async fn send(&self, namespace: &str, payload: Value) -> Result<()>;
    async fn close(&self);
}

/// Raw receiver handle returned by launch/join, before adapter wrapping.
#[derive(Clone)]
pub struct RawReceiver {
    pub application: RunningApplication,
    pub channel: Arc<dyn ReceiverChannel>,
}

impl std::fmt::Debug for RawReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawReceiver")
            .field("application", &self.application)
            .finish_non_exhaustive()
    }
}
