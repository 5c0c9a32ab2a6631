use color_eyre::Result;
use serde::Deserialize;

use crate::protocols::http::{mk_get_request, HttpClient};

use super::device_uri;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccessoryInfo {
    pub mac_address: Option<String>,
    pub mac: Option<String>,
    pub serial_number: Option<String>,
    pub display_name: Option<String>,
    pub product_name: Option<String>,
}

impl AccessoryInfo {
    /// Stable hardware identifier, normalized to bare uppercase hex.
    pub fn hardware_id(&self) -> Option<String> {
        [&self.mac_address, &self.mac, &self.serial_number]
            .into_iter()
            .flatten()
            .map(|raw| raw.to_uppercase().replace([':', '-'], ""))
            .find(|id| !id.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.product_name.as_deref())
    }
}

pub async fn get_accessory_info(client: &HttpClient, address: &str, port: u16) -> Result<AccessoryInfo> {
    let uri = device_uri(address, port, "accessory-info")?;

    mk_get_request(client, &uri).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_mac_address_and_normalizes_it() {
        let info: AccessoryInfo = serde_json::from_str(
            r#"{"macAddress":"3c:6a:9d:14:2b:0f","serialNumber":"BW33J1A01234","displayName":""}"#,
        )
        .unwrap();

        assert_eq!(info.hardware_id().as_deref(), Some("3C6A9D142B0F"));
    }

    #[test]
    fn falls_back_to_serial_number() {
        let info: AccessoryInfo =
            serde_json::from_str(r#"{"serialNumber":"bw33-j1a","productName":"Elgato Key Light"}"#).unwrap();

        assert_eq!(info.hardware_id().as_deref(), Some("BW33J1A"));
        assert_eq!(info.name(), Some("Elgato Key Light"));
    }

    #[test]
    fn no_identifier_when_fields_missing() {
        let info = AccessoryInfo::default();
        assert_eq!(info.hardware_id(), None);
    }
}
