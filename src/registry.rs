//! Membership of logical senders attached to a device link.

use std::sync::{Arc, Mutex};

use crate::lock;
use crate::protocol::{ConnectionState, PlatformStatus, SenderNotification};
use crate::session::{LogicalSession, SenderId};

/// Registered sessions in registration order. Fan-out iterates a snapshot,
/// so registrations made during a broadcast never disturb it.
#[derive(Default)]
pub struct SessionRegistry {
    members: Mutex<Vec<Arc<LogicalSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Returns `true` when it is the first member.
    pub fn register(&self, session: Arc<LogicalSession>) -> bool {
        let mut members = lock(&self.members);
        members.push(session);
        members.len() == 1
    }

    /// Removes a session, returning it if it was a member.
    pub fn deregister(&self, id: SenderId) -> Option<Arc<LogicalSession>> {
        let mut members = lock(&self.members);
        let index = members.iter().position(|session| session.id() == id)?;
        Some(members.remove(index))
    }

    /// Removes every member.
    pub fn drain(&self) -> Vec<Arc<LogicalSession>> {
        std::mem::take(&mut *lock(&self.members))
    }

    pub fn get(&self, id: SenderId) -> Option<Arc<LogicalSession>> {
        lock(&self.members)
            .iter()
            .find(|session| session.id() == id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<LogicalSession>> {
        lock(&self.members).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.members).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.members).is_empty()
    }

    pub fn broadcast_connection_state(&self, state: ConnectionState) {
        for session in self.snapshot() {
            session.notify(SenderNotification::ConnectionState { state });
        }
    }

    /// Sends platform status to every member, tagged with the device address.
    pub fn broadcast_status(&self, device: &str, status: &PlatformStatus) {
        for session in self.snapshot() {
            session.notify(SenderNotification::PlatformStatus {
                device: device.to_string(),
                status: status.clone(),
            });
        }
    }
}
