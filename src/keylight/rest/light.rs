use color_eyre::Result;
use eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::{
    protocols::http::{mk_get_request, mk_put_request, HttpClient},
    sync::device::LightState,
};

use super::device_uri;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LightData {
    pub on: u8,
    pub brightness: u8,
    pub temperature: u16,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LightsDocument {
    pub number_of_lights: u8,
    pub lights: Vec<LightData>,
}

impl From<LightState> for LightsDocument {
    fn from(state: LightState) -> Self {
        LightsDocument {
            number_of_lights: 1,
            lights: vec![LightData {
                on: u8::from(state.on),
                brightness: state.brightness,
                temperature: state.temperature,
            }],
        }
    }
}

impl LightsDocument {
    /// Panels expose a single light; anything past the first entry is ignored.
    pub fn first_state(&self) -> Option<LightState> {
        self.lights.first().map(|light| LightState {
            on: light.on != 0,
            brightness: light.brightness,
            temperature: light.temperature,
        })
    }
}

pub async fn get_light_state(client: &HttpClient, address: &str, port: u16) -> Result<LightState> {
    let uri = device_uri(address, port, "lights")?;
    let document: LightsDocument = mk_get_request(client, &uri).await?;

    document
        .first_state()
        .ok_or_else(|| eyre!("Device at {}:{} reported no lights", address, port))
}

pub async fn put_light_state(
    client: &HttpClient,
    address: &str,
    port: u16,
    state: LightState,
) -> Result<()> {
    let uri = device_uri(address, port, "lights")?;
    let body = LightsDocument::from(state);

    mk_put_request(client, &uri, &body).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_put_body_in_device_format() {
        let body = LightsDocument::from(LightState {
            on: true,
            brightness: 42,
            temperature: 250,
        });

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "numberOfLights": 1,
                "lights": [{ "on": 1, "brightness": 42, "temperature": 250 }]
            })
        );
    }

    #[test]
    fn reads_first_light_from_device_response() {
        let raw = r#"{"numberOfLights":1,"lights":[{"on":0,"brightness":0,"temperature":344}]}"#;
        let document: LightsDocument = serde_json::from_str(raw).unwrap();

        let state = document.first_state().unwrap();
        assert!(!state.on);
        // Hardware may report 0; only slider writes are clamped.
        assert_eq!(state.brightness, 0);
        assert_eq!(state.temperature, 344);
    }

    #[test]
    fn empty_light_list_has_no_state() {
        let document = LightsDocument {
            number_of_lights: 0,
            lights: vec![],
        };
        assert_eq!(document.first_state(), None);
    }
}
