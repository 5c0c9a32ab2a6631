use color_eyre::Result;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};

use crate::{
    keylight::{discovery::announce, DEFAULT_PORT},
    protocols::http::HttpClient,
    sync::{
        color::{elgato_units_to_kelvin, kelvin_to_elgato_units, percent_to_alpha, temperature_to_rgb, to_hex},
        controller::{ControllerEvent, DeviceSnapshot, Snapshot},
        device::{Change, CopyScope, DeviceSelector},
        master::MasterView,
        runtime::{Command, ControllerHandle},
        sync_mode::SyncFlag,
    },
};

const HELP: &str = "\
commands:
  list
  power <dev|all> on|off
  brightness <dev|all> <1-100>
  temperature <dev|all> <143-344>
  kelvin <dev|all> <2900-7000>
  lock <dev>
  sync temperature|brightness|all on|off
  sync once temperature|brightness|all
  copy <dev> temperature|brightness|all
  ignore-locks on|off
  controls show|hide
  rename <dev> <label>
  reset-label <dev>
  add <address> [port]
  refresh
  quit
<dev> is a 1-based index or a device id, 'all' is the master control";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Master,
    Device(DeviceSelector),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Power(Target, bool),
    Brightness(Target, i64),
    Temperature(Target, i64),
    Kelvin(Target, u32),
    Lock(DeviceSelector),
    Sync(SyncFlag, bool),
    SyncOnce(CopyScope),
    Copy(DeviceSelector, CopyScope),
    IgnoreLocks(bool),
    Controls(bool),
    Rename(DeviceSelector, String),
    ResetLabel(DeviceSelector),
    Add(String, u16),
    Refresh,
    Help,
    Quit,
}

fn on_off(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        other => Err(format!("expected on|off, got {:?}", other.unwrap_or(""))),
    }
}

fn number<T: std::str::FromStr>(word: Option<&str>) -> Result<T, String> {
    let word = word.ok_or("missing number")?;
    word.parse().map_err(|_| format!("'{}' is not a number", word))
}

fn selector(word: Option<&str>) -> Result<DeviceSelector, String> {
    word.ok_or_else(|| "missing device".to_string())?.parse()
}

fn target(word: Option<&str>) -> Result<Target, String> {
    match word {
        Some("all") => Ok(Target::Master),
        other => selector(other).map(Target::Device),
    }
}

fn scope(word: Option<&str>) -> Result<CopyScope, String> {
    word.ok_or_else(|| "missing scope".to_string())?.parse()
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb {
        "list" | "ls" => ConsoleCommand::List,
        "power" => ConsoleCommand::Power(target(words.next())?, on_off(words.next())?),
        "brightness" => ConsoleCommand::Brightness(target(words.next())?, number(words.next())?),
        "temperature" => ConsoleCommand::Temperature(target(words.next())?, number(words.next())?),
        "kelvin" => ConsoleCommand::Kelvin(target(words.next())?, number(words.next())?),
        "lock" => ConsoleCommand::Lock(selector(words.next())?),
        "sync" => match words.next() {
            Some("once") => ConsoleCommand::SyncOnce(scope(words.next())?),
            Some(flag) => ConsoleCommand::Sync(flag.parse()?, on_off(words.next())?),
            None => return Err("sync needs a mode".to_string()),
        },
        "copy" => ConsoleCommand::Copy(selector(words.next())?, scope(words.next())?),
        "ignore-locks" => ConsoleCommand::IgnoreLocks(on_off(words.next())?),
        "controls" => match words.next() {
            Some("show") => ConsoleCommand::Controls(true),
            Some("hide") => ConsoleCommand::Controls(false),
            _ => return Err("expected show|hide".to_string()),
        },
        "rename" => {
            let device = selector(words.next())?;
            let label = words.collect::<Vec<_>>().join(" ");
            if label.is_empty() {
                return Err("rename needs a label".to_string());
            }
            ConsoleCommand::Rename(device, label)
        }
        "reset-label" => ConsoleCommand::ResetLabel(selector(words.next())?),
        "add" => {
            let address = words.next().ok_or("add needs an address")?.to_string();
            let port = match words.next() {
                Some(port) => number(Some(port))?,
                None => DEFAULT_PORT,
            };
            ConsoleCommand::Add(address, port)
        }
        "refresh" => ConsoleCommand::Refresh,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };

    Ok(Some(command))
}

fn edit(target: Target, change: Change) -> Command {
    match target {
        Target::Master => Command::EditAll(change),
        Target::Device(selector) => Command::Edit(selector, change),
    }
}

impl ConsoleCommand {
    /// The controller command this maps to, for everything the controller
    /// handles directly.
    pub fn into_command(self) -> Option<Command> {
        Some(match self {
            ConsoleCommand::Power(target, on) => edit(target, Change::Power(on)),
            ConsoleCommand::Brightness(target, value) => edit(target, Change::brightness(value)),
            ConsoleCommand::Temperature(target, value) => edit(target, Change::temperature(value)),
            ConsoleCommand::Kelvin(target, kelvin) => {
                edit(target, Change::Temperature(kelvin_to_elgato_units(kelvin)))
            }
            ConsoleCommand::Lock(selector) => Command::ToggleLock(selector),
            ConsoleCommand::Sync(flag, enabled) => Command::SetSyncFlag(flag, enabled),
            ConsoleCommand::SyncOnce(scope) => Command::SyncOnce(scope),
            ConsoleCommand::Copy(selector, scope) => Command::CopyToOthers(selector, scope),
            ConsoleCommand::IgnoreLocks(ignore) => Command::SetIgnoreLocks(ignore),
            ConsoleCommand::Controls(visible) => Command::SetSyncControlsVisible(visible),
            ConsoleCommand::Rename(selector, label) => Command::Rename(selector, label),
            ConsoleCommand::ResetLabel(selector) => Command::ResetLabel(selector),
            ConsoleCommand::Refresh => Command::Refresh,
            ConsoleCommand::List | ConsoleCommand::Add(..) | ConsoleCommand::Help | ConsoleCommand::Quit => {
                return None
            }
        })
    }
}

fn format_device(device: &DeviceSnapshot) -> String {
    let state = device.state;

    format!(
        "{:>2}. {:<20} {:<14} {:>15}:{:<5} {:<3} {:>3}% {:>5}K {}{}",
        device.index,
        device.display_name(),
        device.id,
        device.address,
        device.port,
        if state.on { "on" } else { "off" },
        state.brightness,
        elgato_units_to_kelvin(state.temperature),
        to_hex(temperature_to_rgb(state.temperature)),
        if device.locked { " locked" } else { "" }
    )
}

fn format_master(master: &MasterView) -> String {
    let sliders = master
        .reference
        .map(|state| format!(" {}% {}K", state.brightness, elgato_units_to_kelvin(state.temperature)))
        .unwrap_or_default();

    let glow = master
        .glow
        .as_ref()
        .map(|glow| {
            let stops: Vec<String> = glow
                .stops
                .iter()
                .map(|stop| format!("{}{:02x}", to_hex(stop.color), percent_to_alpha(stop.intensity * 100.0)))
                .collect();
            format!(" glow {} [{}]", to_hex(glow.average), stops.join(" "))
        })
        .unwrap_or_default();

    format!(
        "master: {}{} ({} device(s)){}",
        if master.power_on { "on" } else { "off" },
        sliders,
        master.device_count,
        glow
    )
}

pub fn format_snapshot(snapshot: &Snapshot) -> String {
    let mut lines = vec![format!(
        "{} | {} | sync: {}{}",
        format_master(&snapshot.master),
        if snapshot.ignore_locks { "ignoring locks" } else { "respecting locks" },
        snapshot.sync_mode,
        if snapshot.sync_controls_visible { "" } else { " (controls hidden)" }
    )];

    lines.extend(snapshot.devices.iter().map(format_device));
    lines.join("\n")
}

fn format_event(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::DeviceAdded(device) => format!("+ {}", format_device(device)),
        ControllerEvent::DeviceUpdated(device) => format!("  {}", format_device(device)),
        ControllerEvent::LockChanged { id, locked } => {
            format!("{} {}", id, if *locked { "locked" } else { "unlocked" })
        }
        ControllerEvent::LabelChanged { id, display_name } => format!("{} is now '{}'", id, display_name),
        ControllerEvent::SyncModeChanged(mode) => format!("sync: {}", mode),
        ControllerEvent::MasterChanged(master) => format_master(master),
    }
}

/// Echo controller events to stdout as they happen.
pub fn start_event_printer(handle: &ControllerHandle) {
    let mut events = handle.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", format_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Event printer skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run_console(handle: ControllerHandle, client: HttpClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::List => println!("{}", format_snapshot(&handle.snapshot().await?)),
            ConsoleCommand::Add(address, port) => {
                let client = client.clone();
                let handle = handle.clone();
                tokio::spawn(async move { announce(&client, &handle, &address, port, None).await });
            }
            other => {
                if let Some(command) = other.into_command() {
                    handle.send(command).await?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{
        device::{DeviceId, LightState},
        master::{Glow, GlowStop},
        sync_mode::SyncMode,
    };

    fn parse(line: &str) -> ConsoleCommand {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn device_and_master_targets() {
        assert_eq!(
            parse("power 2 on"),
            ConsoleCommand::Power(Target::Device(DeviceSelector::Index(2)), true)
        );
        assert_eq!(parse("brightness all 40"), ConsoleCommand::Brightness(Target::Master, 40));
        assert_eq!(
            parse("temperature 3C6A9D142B0F 300"),
            ConsoleCommand::Temperature(Target::Device(DeviceSelector::Id("3C6A9D142B0F".to_string())), 300)
        );
    }

    #[test]
    fn sync_commands() {
        assert_eq!(parse("sync all on"), ConsoleCommand::Sync(SyncFlag::All, true));
        assert_eq!(parse("sync temp off"), ConsoleCommand::Sync(SyncFlag::Temperature, false));
        assert_eq!(parse("sync once brightness"), ConsoleCommand::SyncOnce(CopyScope::Brightness));
        assert!(parse_line("sync sideways on").is_err());
        assert!(parse_line("sync").is_err());
    }

    #[test]
    fn rename_keeps_spaces_in_label() {
        assert_eq!(
            parse("rename 1 Left  desk light"),
            ConsoleCommand::Rename(DeviceSelector::Index(1), "Left desk light".to_string())
        );
        assert!(parse_line("rename 1").is_err());
    }

    #[test]
    fn add_defaults_port() {
        assert_eq!(parse("add 10.0.0.9"), ConsoleCommand::Add("10.0.0.9".to_string(), 9123));
        assert_eq!(parse("add 10.0.0.9 9000"), ConsoleCommand::Add("10.0.0.9".to_string(), 9000));
        assert!(parse_line("add").is_err());
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse_line("brightness 1 bright").is_err());
        assert!(parse_line("power 1 maybe").is_err());
        assert!(parse_line("frobnicate").is_err());
        assert!(parse_line("controls").is_err());
    }

    #[test]
    fn kelvin_maps_to_device_units() {
        match parse("kelvin all 7000").into_command() {
            Some(Command::EditAll(change)) => assert_eq!(change, Change::Temperature(143)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn values_are_clamped_before_reaching_the_controller() {
        match parse("brightness 1 0").into_command() {
            Some(Command::Edit(DeviceSelector::Index(1), change)) => assert_eq!(change, Change::Brightness(1)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("list").into_command().is_none());
    }

    #[test]
    fn snapshot_listing() {
        let snapshot = Snapshot {
            devices: vec![DeviceSnapshot {
                index: 1,
                id: DeviceId::from("AA"),
                name: "Key Light".to_string(),
                label: Some("Desk".to_string()),
                address: "10.0.0.2".to_string(),
                port: 9123,
                state: LightState {
                    on: true,
                    brightness: 80,
                    temperature: 344,
                },
                locked: true,
            }],
            sync_mode: SyncMode::All,
            ignore_locks: true,
            sync_controls_visible: true,
            master: MasterView {
                device_count: 1,
                power_on: true,
                glow: None,
                reference: None,
            },
        };

        let listing = format_snapshot(&snapshot);
        assert!(listing.starts_with("master: on (1 device(s)) | ignoring locks | sync: all"));
        assert!(listing.contains("Desk"));
        assert!(listing.contains("2900K #ff9944 locked"));
    }

    #[test]
    fn master_line_shows_sliders_and_glow() {
        let master = MasterView {
            device_count: 2,
            power_on: true,
            glow: Some(Glow {
                stops: vec![GlowStop {
                    color: palette::Srgb::new(255, 153, 68),
                    intensity: 0.5,
                }],
                average: palette::Srgb::new(255, 153, 68),
            }),
            reference: Some(LightState {
                on: true,
                brightness: 50,
                temperature: 344,
            }),
        };

        assert_eq!(
            format_event(&ControllerEvent::MasterChanged(master)),
            "master: on 50% 2900K (2 device(s)) glow #ff9944 [#ff994480]"
        );
        assert_eq!(
            format_event(&ControllerEvent::SyncModeChanged(SyncMode::Brightness)),
            "sync: brightness"
        );
    }
}
