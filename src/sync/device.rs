use std::{fmt, ops::RangeInclusive, str::FromStr};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::throttle::{Timings, UpdateThrottle};

pub const BRIGHTNESS_RANGE: RangeInclusive<u8> = 1..=100;
pub const TEMPERATURE_RANGE: RangeInclusive<u16> = 143..=344;

/// Stable hardware identifier: MAC address, serial number, or an address
/// derived fallback.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId(id.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    /// Percent, 1-100 when written by us. Hardware may report 0.
    pub brightness: u8,
    /// Device units, 143 (~7000K) to 344 (~2900K).
    pub temperature: u16,
}

impl Default for LightState {
    fn default() -> Self {
        LightState {
            on: false,
            brightness: 50,
            temperature: 200,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Power,
    Brightness,
    Temperature,
}

/// A single-attribute edit, as produced by one control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Power(bool),
    Brightness(u8),
    Temperature(u16),
}

impl Change {
    pub fn brightness(value: i64) -> Change {
        let (min, max) = (*BRIGHTNESS_RANGE.start(), *BRIGHTNESS_RANGE.end());
        Change::Brightness(value.clamp(min.into(), max.into()) as u8)
    }

    pub fn temperature(value: i64) -> Change {
        let (min, max) = (*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
        Change::Temperature(value.clamp(min.into(), max.into()) as u16)
    }

    pub fn attribute(&self) -> Attribute {
        match self {
            Change::Power(_) => Attribute::Power,
            Change::Brightness(_) => Attribute::Brightness,
            Change::Temperature(_) => Attribute::Temperature,
        }
    }
}

/// What a "copy to others" action carries over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyScope {
    Temperature,
    Brightness,
    All,
}

impl CopyScope {
    pub fn changes(&self, state: &LightState) -> Vec<Change> {
        let brightness = Change::brightness(state.brightness.into());
        let temperature = Change::Temperature(state.temperature);

        match self {
            CopyScope::Temperature => vec![temperature],
            CopyScope::Brightness => vec![brightness],
            CopyScope::All => vec![Change::Power(state.on), brightness, temperature],
        }
    }
}

impl FromStr for CopyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" | "temp" => Ok(CopyScope::Temperature),
            "brightness" => Ok(CopyScope::Brightness),
            "all" => Ok(CopyScope::All),
            other => Err(format!("unknown scope '{}'", other)),
        }
    }
}

/// Addresses a device from the outside: 1-based position or identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(usize),
    Id(String),
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty device selector".to_string());
        }

        Ok(match s.parse::<usize>() {
            Ok(index) => DeviceSelector::Index(index),
            Err(_) => DeviceSelector::Id(s.to_string()),
        })
    }
}

/// A discovery record: the shape the discovery feed hands to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub identifier: DeviceId,
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// Instants of the most recent local write per attribute.
#[derive(Clone, Copy, Debug, Default)]
struct EditStamps {
    power: Option<Instant>,
    brightness: Option<Instant>,
    temperature: Option<Instant>,
}

fn edited_since(stamp: Option<Instant>, instant: Instant) -> bool {
    stamp.is_some_and(|stamp| stamp >= instant)
}

#[derive(Debug)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub label: Option<String>,
    pub address: String,
    pub port: u16,
    pub state: LightState,
    edits: EditStamps,
    pub(super) throttle: UpdateThrottle,
}

impl Device {
    pub fn new(record: DiscoveredDevice, timings: &Timings) -> Self {
        Device {
            id: record.identifier,
            name: record.name,
            label: None,
            address: record.address,
            port: record.port,
            state: LightState::default(),
            edits: EditStamps::default(),
            throttle: UpdateThrottle::new(timings),
        }
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Local write. Brightness and temperature are clamped to the slider
    /// domain; returns whether the state actually changed.
    pub fn apply(&mut self, change: Change, now: Instant) -> bool {
        let before = self.state;

        match change {
            Change::Power(on) => {
                self.state.on = on;
                self.edits.power = Some(now);
            }
            Change::Brightness(value) => {
                self.state.brightness = value.clamp(*BRIGHTNESS_RANGE.start(), *BRIGHTNESS_RANGE.end());
                self.edits.brightness = Some(now);
            }
            Change::Temperature(value) => {
                self.state.temperature =
                    value.clamp(*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
                self.edits.temperature = Some(now);
            }
        }

        self.state != before
    }

    /// Merge state read from the device. Fields edited locally at or after
    /// `requested_at` keep their local value; the fetch is older than them.
    pub fn apply_remote(&mut self, remote: LightState, requested_at: Instant) -> bool {
        let before = self.state;

        if !edited_since(self.edits.power, requested_at) {
            self.state.on = remote.on;
        }
        if !edited_since(self.edits.brightness, requested_at) {
            self.state.brightness = remote.brightness;
        }
        if !edited_since(self.edits.temperature, requested_at) {
            self.state.temperature = remote.temperature;
        }

        self.state != before
    }

    /// Stage the current state on this device's own throttle.
    pub fn schedule_update(&mut self, now: Instant) {
        self.throttle.schedule(self.state, now);
    }
}
