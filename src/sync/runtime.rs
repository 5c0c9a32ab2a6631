use color_eyre::Result;
use eyre::eyre;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};

use super::{
    controller::{Controller, ControllerEvent, Snapshot},
    device::{Change, CopyScope, DeviceSelector, DiscoveredDevice},
    sync_mode::SyncFlag,
    transport::PullResult,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum Command {
    AddDevice(DiscoveredDevice),
    Edit(DeviceSelector, Change),
    EditAll(Change),
    ToggleLock(DeviceSelector),
    SetSyncFlag(SyncFlag, bool),
    SyncOnce(CopyScope),
    CopyToOthers(DeviceSelector, CopyScope),
    SetIgnoreLocks(bool),
    SetSyncControlsVisible(bool),
    Rename(DeviceSelector, String),
    ResetLabel(DeviceSelector),
    Refresh,
    Snapshot(oneshot::Sender<Snapshot>),
}

/// Cloneable access to the controller task. The task stops once every
/// handle has been dropped.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ControllerHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| eyre!("Controller task has stopped"))
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;

        Ok(rx.await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }
}

fn handle_command(controller: &mut Controller, command: Command, now: Instant) {
    match command {
        Command::AddDevice(record) => {
            controller.add_device(record, now);
        }
        Command::Edit(selector, change) => controller.edit(&selector, change, now),
        Command::EditAll(change) => controller.edit_all(change, now),
        Command::ToggleLock(selector) => {
            controller.toggle_lock(&selector);
        }
        Command::SetSyncFlag(flag, enabled) => controller.set_sync_flag(flag, enabled),
        Command::SyncOnce(scope) => controller.sync_once(scope, now),
        Command::CopyToOthers(selector, scope) => controller.copy_to_others(&selector, scope, now),
        Command::SetIgnoreLocks(ignore_locks) => controller.set_ignore_locks(ignore_locks),
        Command::SetSyncControlsVisible(visible) => controller.set_sync_controls_visible(visible),
        Command::Rename(selector, label) => controller.rename(&selector, &label),
        Command::ResetLabel(selector) => controller.reset_label(&selector),
        Command::Refresh => controller.refresh(now),
        Command::Snapshot(reply) => {
            let _ = reply.send(controller.snapshot());
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// Run the controller on its own task. Commands, pull results and timer
/// deadlines are all handled there, one at a time.
pub fn spawn_controller(
    mut controller: Controller,
    mut pull_results: mpsc::UnboundedReceiver<PullResult>,
) -> (ControllerHandle, JoinHandle<()>) {
    let (tx, mut commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let handle = ControllerHandle {
        commands: tx,
        events: controller.event_sender(),
    };

    let task = tokio::spawn(async move {
        loop {
            let deadline = controller.next_deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => handle_command(&mut controller, command, Instant::now()),
                    None => break,
                },
                Some(result) = pull_results.recv() => controller.apply_pull(result),
                _ = sleep_until(deadline) => controller.on_timer(Instant::now()),
            }
        }

        log::debug!("Controller task stopped");
    });

    (handle, task)
}
