use palette::Srgb;
use serde::Deserialize;
use tokio::time::Instant;

use super::{
    color::temperature_to_rgb,
    device::{Change, Device, DeviceId, LightState},
    locks::LockRegistry,
};

/// How the master power indicator combines the eligible devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum PowerSemantics {
    #[default]
    AnyOn,
    AllOn,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlowStop {
    pub color: Srgb<u8>,
    /// 0.0-1.0, from the device brightness.
    pub intensity: f32,
}

/// Blended indicator for the powered-on devices, one stop per device.
#[derive(Clone, Debug, PartialEq)]
pub struct Glow {
    pub stops: Vec<GlowStop>,
    pub average: Srgb<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MasterView {
    pub device_count: usize,
    pub power_on: bool,
    pub glow: Option<Glow>,
    /// Slider position of the master control: the first eligible device.
    pub reference: Option<LightState>,
}

/// The "all devices" control. It holds no light state of its own; every view
/// is computed from the device list.
#[derive(Debug)]
pub struct MasterAggregator {
    pub ignore_locks: bool,
    pub semantics: PowerSemantics,
}

impl MasterAggregator {
    pub fn new(ignore_locks: bool, semantics: PowerSemantics) -> Self {
        MasterAggregator {
            ignore_locks,
            semantics,
        }
    }

    pub fn is_eligible(&self, device: &Device, locks: &LockRegistry) -> bool {
        self.ignore_locks || !locks.get(&device.id)
    }

    pub fn toggle_all(&self, devices: &mut [Device], locks: &LockRegistry, on: bool, now: Instant) -> Vec<DeviceId> {
        self.apply_all(devices, locks, Change::Power(on), now)
    }

    pub fn set_all_brightness(
        &self,
        devices: &mut [Device],
        locks: &LockRegistry,
        value: i64,
        now: Instant,
    ) -> Vec<DeviceId> {
        self.apply_all(devices, locks, Change::brightness(value), now)
    }

    pub fn set_all_temperature(
        &self,
        devices: &mut [Device],
        locks: &LockRegistry,
        value: i64,
        now: Instant,
    ) -> Vec<DeviceId> {
        self.apply_all(devices, locks, Change::temperature(value), now)
    }

    /// Applies `change` to every eligible device and stages a write on each.
    /// Returns the ids that were touched.
    fn apply_all(&self, devices: &mut [Device], locks: &LockRegistry, change: Change, now: Instant) -> Vec<DeviceId> {
        let mut touched = vec![];

        for device in devices.iter_mut() {
            if !self.is_eligible(device, locks) {
                continue;
            }

            device.apply(change, now);
            device.schedule_update(now);
            touched.push(device.id.clone());
        }

        touched
    }

    pub fn view(&self, devices: &[Device], locks: &LockRegistry) -> MasterView {
        let eligible: Vec<&Device> = devices
            .iter()
            .filter(|device| self.is_eligible(device, locks))
            .collect();

        let power_on = !eligible.is_empty()
            && match self.semantics {
                PowerSemantics::AnyOn => eligible.iter().any(|device| device.state.on),
                PowerSemantics::AllOn => eligible.iter().all(|device| device.state.on),
            };

        let stops: Vec<GlowStop> = eligible
            .iter()
            .filter(|device| device.state.on)
            .map(|device| GlowStop {
                color: temperature_to_rgb(device.state.temperature),
                intensity: f32::from(device.state.brightness.min(100)) / 100.0,
            })
            .collect();

        MasterView {
            device_count: devices.len(),
            power_on,
            glow: if power_on {
                average_color(&stops).map(|average| Glow { stops, average })
            } else {
                None
            },
            reference: eligible.first().map(|device| device.state),
        }
    }
}

fn average_color(stops: &[GlowStop]) -> Option<Srgb<u8>> {
    if stops.is_empty() {
        return None;
    }

    let n = stops.len() as u32;
    let sum = stops.iter().fold((0u32, 0u32, 0u32), |(r, g, b), stop| {
        (
            r + u32::from(stop.color.red),
            g + u32::from(stop.color.green),
            b + u32::from(stop.color.blue),
        )
    });

    Some(Srgb::new((sum.0 / n) as u8, (sum.1 / n) as u8, (sum.2 / n) as u8))
}
