//! Control-plane client for Cast devices.
//!
//! One physical connection per device is shared by any number of logical
//! senders. The [`manager::CastManager`] owns the connection lifecycle,
//! reconciles device-reported platform status against registered senders,
//! reconnects after failures, and routes commands to receiver adapters.

pub mod adapters;
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod link;
pub mod manager;
pub mod protocol;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::{Mutex, MutexGuard};

pub use error::{CastError, Result};
pub use manager::{CastManager, SenderHandle, SenderOptions};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
