use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::sync::{
    master::PowerSemantics,
    throttle::{Timings, TimingsBuilder},
};

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct PerformanceSettings {
    pub widget_update_interval_ms: u64,
    pub widget_min_update_spacing_ms: u64,
    pub sync_timer_interval_ms: u64,
    pub http_timeout_s: f64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            widget_update_interval_ms: 50,
            widget_min_update_spacing_ms: 100,
            sync_timer_interval_ms: 300,
            http_timeout_s: 2.0,
        }
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(default)]
pub struct AdvancedSettings {
    pub master_power_semantics: PowerSemantics,
    pub enable_debug_logging: bool,
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(default)]
pub struct StoreSettings {
    /// Location of the JSON file holding locks, labels and toggles.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct StaticDevice {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub name: Option<String>,
}

fn default_port() -> u16 {
    crate::keylight::DEFAULT_PORT
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Settings {
    pub performance: PerformanceSettings,
    pub advanced: AdvancedSettings,
    pub store: StoreSettings,
    pub devices: Vec<StaticDevice>,
}

impl Settings {
    pub fn http_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.performance.http_timeout_s.max(0.1))
            .unwrap_or_else(|_| Duration::from_secs_f64(PerformanceSettings::default().http_timeout_s))
    }

    pub fn timings(&self) -> Timings {
        let perf = &self.performance;

        TimingsBuilder::default()
            .poll_interval(Duration::from_millis(perf.widget_update_interval_ms.max(1)))
            .min_spacing(Duration::from_millis(perf.widget_min_update_spacing_ms))
            .sync_interval(Duration::from_millis(perf.sync_timer_interval_ms.max(1)))
            .build()
            .unwrap_or_default()
    }
}

pub fn read_settings() -> Result<Settings, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name("Settings").required(false))
        .add_source(config::Environment::with_prefix("KEYLIGHT").separator("__"))
        .build()?
        .try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_yield_defaults() {
        let settings = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize::<Settings>()
            .unwrap();

        assert_eq!(settings.performance.widget_update_interval_ms, 50);
        assert_eq!(settings.performance.sync_timer_interval_ms, 300);
        assert_eq!(settings.advanced.master_power_semantics, PowerSemantics::AnyOn);
        assert!(settings.devices.is_empty());
        assert_eq!(settings.http_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn unrepresentable_timeout_falls_back_to_default() {
        let mut settings = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize::<Settings>()
            .unwrap();

        settings.performance.http_timeout_s = f64::INFINITY;
        assert_eq!(settings.http_timeout(), Duration::from_secs(2));

        settings.performance.http_timeout_s = 1e300;
        assert_eq!(settings.http_timeout(), Duration::from_secs(2));

        settings.performance.http_timeout_s = -5.0;
        let floor = settings.http_timeout();
        assert!(floor > Duration::from_millis(99) && floor < Duration::from_millis(101));
    }

    #[test]
    fn devices_and_semantics_from_toml() {
        let toml = r#"
            [advanced]
            master_power_semantics = "AllOn"

            [performance]
            sync_timer_interval_ms = 500

            [[devices]]
            address = "192.168.1.20"

            [[devices]]
            address = "192.168.1.21"
            port = 9000
            name = "Desk"
        "#;

        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<Settings>()
            .unwrap();

        assert_eq!(settings.advanced.master_power_semantics, PowerSemantics::AllOn);
        assert_eq!(settings.devices.len(), 2);
        assert_eq!(settings.devices[0].port, 9123);
        assert_eq!(settings.devices[1].name.as_deref(), Some("Desk"));

        let timings = settings.timings();
        assert_eq!(timings.sync_interval, Duration::from_millis(500));
        assert_eq!(timings.poll_interval, Duration::from_millis(50));
    }
}
