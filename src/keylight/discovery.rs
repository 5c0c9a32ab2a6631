use std::net::Ipv4Addr;

use futures::future::join_all;

use super::rest::accessory::get_accessory_info;
use crate::{
    protocols::http::HttpClient,
    settings::Settings,
    sync::{
        device::{DeviceId, DiscoveredDevice},
        runtime::{Command, ControllerHandle},
    },
};

const FALLBACK_NAME: &str = "Elgato Key Light";

/// Identifier for a device that would not tell us its hardware id.
pub fn fallback_identifier(address: &str) -> DeviceId {
    let id = match address.parse::<Ipv4Addr>() {
        Ok(ip) => ip
            .octets()
            .iter()
            .map(|octet| octet.to_string())
            .collect::<Vec<_>>()
            .join("_"),
        Err(_) => address.replace(['.', ':'], "_"),
    };

    DeviceId(format!("IP_{}", id))
}

/// Turn an address into a discovery record, asking the device for its
/// hardware id and name. An unreachable device still yields a record.
pub async fn resolve_device(
    client: &HttpClient,
    address: &str,
    port: u16,
    name: Option<&str>,
) -> DiscoveredDevice {
    let info = match get_accessory_info(client, address, port).await {
        Ok(info) => Some(info),
        Err(e) => {
            log::warn!("Could not read accessory info from {}:{}: {:?}", address, port, e);
            None
        }
    };

    let identifier = info
        .as_ref()
        .and_then(|info| info.hardware_id())
        .map(DeviceId)
        .unwrap_or_else(|| fallback_identifier(address));

    let name = name
        .map(str::to_string)
        .or_else(|| info.as_ref().and_then(|info| info.name()).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());

    DiscoveredDevice {
        identifier,
        name,
        address: address.to_string(),
        port,
    }
}

/// Resolve a device and hand it to the controller.
pub async fn announce(client: &HttpClient, handle: &ControllerHandle, address: &str, port: u16, name: Option<&str>) {
    let record = resolve_device(client, address, port, name).await;

    if let Err(e) = handle.send(Command::AddDevice(record)).await {
        log::warn!("Dropping discovered device {}: {:?}", address, e);
    }
}

/// Feed the statically configured devices to the controller, resolving them
/// concurrently.
pub fn start_static_discovery(settings: &Settings, client: &HttpClient, handle: &ControllerHandle) {
    let devices = settings.devices.clone();
    let client = client.clone();
    let handle = handle.clone();

    tokio::spawn(async move {
        let announcements = devices.iter().map(|device| {
            announce(
                &client,
                &handle,
                &device.address,
                device.port,
                device.name.as_deref(),
            )
        });

        join_all(announcements).await;
        log::debug!("Announced {} configured device(s)", devices.len());
    });
}
