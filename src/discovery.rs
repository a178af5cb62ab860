//! mDNS discovery of cast devices (`_googlecast._tcp`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use serde::Serialize;

const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";
const DISCOVERY_POLL: Duration = Duration::from_millis(250);

/// A cast device seen on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub id: String,
    /// Friendly name (`fn` TXT record).
    pub name: String,
    /// Model name (`md` TXT record).
    pub model: String,
    pub address: String,
    pub port: u16,
}

/// Browses for cast devices for `timeout`, returning them sorted by name.
pub async fn discover(timeout: Duration) -> Vec<DiscoveredDevice> {
    tokio::task::spawn_blocking(move || browse_devices(timeout, None))
        .await
        .unwrap_or_else(|err| {
            warn!("Discovery: browse task failed: {}", err);
            Vec::new()
        })
}

/// Browses until a device with the given friendly name (case-insensitive)
/// resolves, or `timeout` elapses.
pub async fn find_device(name: &str, timeout: Duration) -> Option<DiscoveredDevice> {
    let wanted = name.trim().to_string();
    let browse = move || browse_devices(timeout, Some(wanted.as_str()));
    let devices = tokio::task::spawn_blocking(browse)
        .await
        .unwrap_or_else(|err| {
            warn!("Discovery: browse task failed: {}", err);
            Vec::new()
        });
    let found = devices
        .into_iter()
        .find(|device| device.name.eq_ignore_ascii_case(name.trim()));
    match &found {
        Some(device) => info!(
            "Discovery: resolved '{}' to {}:{}",
            device.name, device.address, device.port
        ),
        None => warn!("Discovery: no device named '{}' found", name),
    }
    found
}

fn browse_devices(window: Duration, stop_on_name: Option<&str>) -> Vec<DiscoveredDevice> {
    let mdns = match ServiceDaemon::new() {
        Ok(mdns) => mdns,
        Err(err) => {
            warn!("Discovery: failed to start mDNS daemon: {}", err);
            return Vec::new();
        }
    };
    let browse_receiver = match mdns.browse(CAST_SERVICE_TYPE) {
        Ok(receiver) => receiver,
        Err(err) => {
            warn!("Discovery: failed to browse cast mDNS service: {}", err);
            let _ = mdns.shutdown();
            return Vec::new();
        }
    };

    let deadline = Instant::now() + window;
    let mut devices_by_id: HashMap<String, DiscoveredDevice> = HashMap::new();
    while Instant::now() < deadline {
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(DISCOVERY_POLL);
        let Ok(event) = browse_receiver.recv_timeout(timeout) else {
            continue;
        };
        if let ServiceEvent::ServiceResolved(service) = event {
            if let Some(device) = device_from_resolved_service(&service) {
                let matched = stop_on_name
                    .is_some_and(|name| device.name.eq_ignore_ascii_case(name));
                devices_by_id.insert(device.id.clone(), device);
                if matched {
                    break;
                }
            }
        }
    }

    if let Err(err) = mdns.stop_browse(CAST_SERVICE_TYPE) {
        debug!("Discovery: failed to stop mDNS browse cleanly: {}", err);
    }
    let _ = mdns.shutdown();

    sort_devices(devices_by_id.into_values().collect())
}

fn sort_devices(mut devices: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    devices.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    devices.dedup_by(|a, b| a.id == b.id);
    devices
}

fn instance_name_from_fullname(fullname: &str) -> String {
    let suffix = "._googlecast._tcp.local.";
    fullname
        .trim()
        .strip_suffix(suffix)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fullname)
        .trim_matches('.')
        .to_string()
}

fn txt_value(service: &mdns_sd::ResolvedService, key: &str) -> Option<String> {
    service
        .get_property_val_str(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn device_from_resolved_service(service: &mdns_sd::ResolvedService) -> Option<DiscoveredDevice> {
    let mut v4_addresses: Vec<_> = service.get_addresses_v4().iter().copied().collect();
    v4_addresses.sort();
    let address = v4_addresses.first().map(ToString::to_string)?;
    let port = service.get_port();
    let name = txt_value(service, "fn")
        .unwrap_or_else(|| instance_name_from_fullname(service.get_fullname()));
    let model = txt_value(service, "md").unwrap_or_default();
    let id = txt_value(service, "id").unwrap_or_else(|| format!("{}:{}", address, port));
    Some(DiscoveredDevice {
        id,
        name,
        model,
        address,
        port,
    })
}
