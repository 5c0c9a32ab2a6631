use std::{fmt, str::FromStr};

use crate::store::PreferenceStore;

use super::device::Attribute;

pub const TEMPERATURE_SYNC_KEY: &str = "temp_sync_enabled";
pub const BRIGHTNESS_SYNC_KEY: &str = "brightness_sync_enabled";
pub const ALL_SYNC_KEY: &str = "all_sync_enabled";
pub const SYNC_CONTROLS_VISIBLE_KEY: &str = "sync_controls_visible";
pub const MASTER_IGNORE_LOCKS_KEY: &str = "master_ignore_locks";

/// Which attribute edits are mirrored to the other devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    None,
    Temperature,
    Brightness,
    All,
}

/// One of the three persisted toggles that make up a [`SyncMode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncFlag {
    Temperature,
    Brightness,
    All,
}

impl FromStr for SyncFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" | "temp" => Ok(SyncFlag::Temperature),
            "brightness" => Ok(SyncFlag::Brightness),
            "all" => Ok(SyncFlag::All),
            other => Err(format!("unknown sync mode '{}'", other)),
        }
    }
}

impl SyncMode {
    pub fn matches(&self, attribute: Attribute) -> bool {
        match self {
            SyncMode::None => false,
            SyncMode::All => true,
            SyncMode::Temperature => attribute == Attribute::Temperature,
            SyncMode::Brightness => attribute == Attribute::Brightness,
        }
    }

    pub fn is_enabled(&self, flag: SyncFlag) -> bool {
        matches!(
            (self, flag),
            (SyncMode::Temperature, SyncFlag::Temperature)
                | (SyncMode::Brightness, SyncFlag::Brightness)
                | (SyncMode::All, SyncFlag::All)
        )
    }

    /// Mode after the user flips one toggle. Turning a toggle on replaces
    /// whatever was active; turning off an inactive toggle changes nothing.
    pub fn with_flag(self, flag: SyncFlag, enabled: bool) -> SyncMode {
        match (enabled, flag) {
            (true, SyncFlag::Temperature) => SyncMode::Temperature,
            (true, SyncFlag::Brightness) => SyncMode::Brightness,
            (true, SyncFlag::All) => SyncMode::All,
            (false, flag) if self.is_enabled(flag) => SyncMode::None,
            (false, _) => self,
        }
    }

    /// `(temperature, brightness, all)` as persisted.
    pub fn flags(&self) -> (bool, bool, bool) {
        (
            self.is_enabled(SyncFlag::Temperature),
            self.is_enabled(SyncFlag::Brightness),
            self.is_enabled(SyncFlag::All),
        )
    }

    /// Rebuild from persisted toggles. A store written by an older build may
    /// hold several at once; `all` wins, then temperature.
    pub fn from_flags(temperature: bool, brightness: bool, all: bool) -> SyncMode {
        if all {
            SyncMode::All
        } else if temperature {
            SyncMode::Temperature
        } else if brightness {
            SyncMode::Brightness
        } else {
            SyncMode::None
        }
    }

    pub fn load(store: &dyn PreferenceStore) -> SyncMode {
        let flag = |key| store.get_flag(key).unwrap_or(false);
        SyncMode::from_flags(flag(TEMPERATURE_SYNC_KEY), flag(BRIGHTNESS_SYNC_KEY), flag(ALL_SYNC_KEY))
    }

    pub fn persist(&self, store: &dyn PreferenceStore) {
        let (temperature, brightness, all) = self.flags();

        for (key, value) in [
            (TEMPERATURE_SYNC_KEY, temperature),
            (BRIGHTNESS_SYNC_KEY, brightness),
            (ALL_SYNC_KEY, all),
        ] {
            if let Err(e) = store.set_flag(key, value) {
                log::warn!("Failed to persist {}: {:?}", key, e);
            }
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncMode::None => "none",
            SyncMode::Temperature => "temperature",
            SyncMode::Brightness => "brightness",
            SyncMode::All => "all",
        })
    }
}
