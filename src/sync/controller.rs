use std::sync::Arc;

use tokio::{sync::broadcast, time::Instant};

use crate::store::{ConfigStore, LabelStore, LockStore, PreferenceStore};

use super::{
    coordinator::SyncCoordinator,
    device::{Change, CopyScope, Device, DeviceId, DeviceSelector, DiscoveredDevice, LightState},
    locks::LockRegistry,
    master::{MasterAggregator, MasterView, PowerSemantics},
    sync_mode::{SyncFlag, SyncMode, MASTER_IGNORE_LOCKS_KEY, SYNC_CONTROLS_VISIBLE_KEY},
    throttle::Timings,
    transport::{Dispatcher, PullRequest, PullResult, PushRequest},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSnapshot {
    /// 1-based position, as addressed from the console.
    pub index: usize,
    pub id: DeviceId,
    pub name: String,
    pub label: Option<String>,
    pub address: String,
    pub port: u16,
    pub state: LightState,
    pub locked: bool,
}

impl DeviceSnapshot {
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub devices: Vec<DeviceSnapshot>,
    pub sync_mode: SyncMode,
    pub ignore_locks: bool,
    pub sync_controls_visible: bool,
    pub master: MasterView,
}

/// UI echoes, published in the order model mutation, propagation, master.
#[derive(Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    DeviceAdded(DeviceSnapshot),
    DeviceUpdated(DeviceSnapshot),
    LockChanged { id: DeviceId, locked: bool },
    LabelChanged { id: DeviceId, display_name: String },
    SyncModeChanged(SyncMode),
    MasterChanged(MasterView),
}

/// Owns every device model and the sync engine around them.
///
/// All methods are synchronous and take the current instant explicitly;
/// network I/O is handed to the [`Dispatcher`] and comes back through
/// [`Controller::apply_pull`].
pub struct Controller {
    devices: Vec<Device>,
    locks: LockRegistry,
    coordinator: SyncCoordinator,
    master: MasterAggregator,
    store: Arc<dyn ConfigStore>,
    dispatcher: Arc<dyn Dispatcher>,
    events: broadcast::Sender<ControllerEvent>,
    timings: Timings,
    sync_controls_visible: bool,
}

impl Controller {
    pub fn new<S>(store: Arc<S>, dispatcher: Arc<dyn Dispatcher>, timings: Timings, semantics: PowerSemantics) -> Self
    where
        S: ConfigStore + 'static,
    {
        let mode = SyncMode::load(store.as_ref());
        let ignore_locks = store.get_flag(MASTER_IGNORE_LOCKS_KEY).unwrap_or(true);
        let sync_controls_visible = store.get_flag(SYNC_CONTROLS_VISIBLE_KEY).unwrap_or(false);
        let lock_store: Arc<dyn LockStore> = store.clone();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        log::info!("Sync mode: {}, master ignores locks: {}", mode, ignore_locks);

        Controller {
            devices: vec![],
            locks: LockRegistry::new(lock_store),
            coordinator: SyncCoordinator::new(mode, timings.sync_interval),
            master: MasterAggregator::new(ignore_locks, semantics),
            store,
            dispatcher,
            events,
            timings,
            sync_controls_visible,
        }
    }

    pub fn event_sender(&self) -> broadcast::Sender<ControllerEvent> {
        self.events.clone()
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn device_snapshot(&self, index: usize) -> Option<DeviceSnapshot> {
        self.devices.get(index).map(|device| DeviceSnapshot {
            index: index + 1,
            id: device.id.clone(),
            name: device.name.clone(),
            label: device.label.clone(),
            address: device.address.clone(),
            port: device.port,
            state: device.state,
            locked: self.locks.get(&device.id),
        })
    }

    fn index_of(&self, id: &DeviceId) -> Option<usize> {
        self.devices.iter().position(|device| &device.id == id)
    }

    pub fn resolve(&self, selector: &DeviceSelector) -> Option<usize> {
        let index = match selector {
            DeviceSelector::Index(n) => n.checked_sub(1).filter(|i| *i < self.devices.len()),
            DeviceSelector::Id(id) => self
                .devices
                .iter()
                .position(|device| device.id.0.eq_ignore_ascii_case(id)),
        };

        if index.is_none() {
            log::warn!("No device matches {:?}", selector);
        }

        index
    }

    fn emit_device_updated(&self, ids: &[DeviceId]) {
        for id in ids {
            if let Some(snapshot) = self.index_of(id).and_then(|i| self.device_snapshot(i)) {
                self.emit(ControllerEvent::DeviceUpdated(snapshot));
            }
        }
    }

    fn emit_master(&self) {
        self.emit(ControllerEvent::MasterChanged(self.master_view()));
    }

    pub fn master_view(&self) -> MasterView {
        self.master.view(&self.devices, &self.locks)
    }

    /// Track a discovered device. Rediscovering a known address is a no-op.
    pub fn add_device(&mut self, record: DiscoveredDevice, now: Instant) -> Option<DeviceId> {
        if self.devices.iter().any(|device| device.address == record.address) {
            log::debug!("Already tracking {}", record.address);
            return None;
        }

        if let Some(i) = self.index_of(&record.identifier) {
            let device = &mut self.devices[i];
            log::info!("{} moved from {} to {}", device.id, device.address, record.address);
            device.address = record.address;
            device.port = record.port;
            let id = device.id.clone();
            self.emit_device_updated(&[id]);
            return None;
        }

        let mut device = Device::new(record, &self.timings);
        device.label = self.store.get_label(&device.id);
        let locked = self.locks.load(&device.id);

        log::info!(
            "Added {} ({}) at {}:{}{}",
            device.display_name(),
            device.id,
            device.address,
            device.port,
            if locked { ", locked" } else { "" }
        );

        let id = device.id.clone();
        self.devices.push(device);

        if let Some(snapshot) = self.device_snapshot(self.devices.len() - 1) {
            self.emit(ControllerEvent::DeviceAdded(snapshot));
        }
        self.emit_master();
        self.pull(self.devices.len() - 1, now);

        Some(id)
    }

    /// User edit of one device: mutate, stage its own write, mirror per the
    /// sync mode, then re-render.
    pub fn edit(&mut self, selector: &DeviceSelector, change: Change, now: Instant) {
        let Some(i) = self.resolve(selector) else {
            return;
        };

        let device = &mut self.devices[i];
        device.apply(change, now);
        device.schedule_update(now);
        let source = device.id.clone();

        let mirrored = self
            .coordinator
            .propagate(&mut self.devices, &self.locks, &source, change, now);

        if !mirrored.is_empty() {
            log::debug!("Mirrored {:?} from {} to {} device(s)", change, source, mirrored.len());
        }

        self.emit_device_updated(&[source]);
        self.emit_device_updated(&mirrored);
        self.emit_master();
    }

    /// Master control edit, fanned out to every eligible device.
    pub fn edit_all(&mut self, change: Change, now: Instant) {
        let devices = &mut self.devices;
        let touched = match change {
            Change::Power(on) => self.master.toggle_all(devices, &self.locks, on, now),
            Change::Brightness(value) => self.master.set_all_brightness(devices, &self.locks, value.into(), now),
            Change::Temperature(value) => self.master.set_all_temperature(devices, &self.locks, value.into(), now),
        };

        log::info!("Master {:?} applied to {} device(s)", change, touched.len());

        self.emit_device_updated(&touched);
        self.emit_master();
    }

    pub fn toggle_lock(&mut self, selector: &DeviceSelector) -> Option<bool> {
        let id = self.devices[self.resolve(selector)?].id.clone();
        let locked = self.locks.toggle(&id);

        log::info!("{} {}", id, if locked { "locked" } else { "unlocked" });

        self.emit(ControllerEvent::LockChanged { id, locked });
        self.emit_master();

        Some(locked)
    }

    pub fn set_sync_flag(&mut self, flag: SyncFlag, enabled: bool) {
        let mode = self.coordinator.mode.with_flag(flag, enabled);
        self.coordinator.mode = mode;
        mode.persist(self.store.as_ref());

        log::info!("Sync mode: {}", mode);
        self.emit(ControllerEvent::SyncModeChanged(mode));
    }

    /// One-shot sync: copy from the first tracked device regardless of mode.
    pub fn sync_once(&mut self, scope: CopyScope, now: Instant) {
        if self.devices.is_empty() {
            return;
        }

        self.copy_from(0, scope, now);
    }

    pub fn copy_to_others(&mut self, selector: &DeviceSelector, scope: CopyScope, now: Instant) {
        if let Some(i) = self.resolve(selector) {
            self.copy_from(i, scope, now);
        }
    }

    fn copy_from(&mut self, source: usize, scope: CopyScope, now: Instant) {
        let copied = self
            .coordinator
            .copy_to_others(&mut self.devices, &self.locks, source, scope, now);

        log::info!(
            "Copied {:?} from {} to {} device(s)",
            scope,
            self.devices[source].id,
            copied.len()
        );

        self.emit_device_updated(&copied);
        self.emit_master();
    }

    pub fn set_ignore_locks(&mut self, ignore_locks: bool) {
        self.master.ignore_locks = ignore_locks;

        if let Err(e) = self.store.set_flag(MASTER_IGNORE_LOCKS_KEY, ignore_locks) {
            log::warn!("Failed to persist {}: {:?}", MASTER_IGNORE_LOCKS_KEY, e);
        }

        log::info!("Master ignores locks: {}", ignore_locks);
        self.emit_master();
    }

    pub fn set_sync_controls_visible(&mut self, visible: bool) {
        self.sync_controls_visible = visible;

        if let Err(e) = self.store.set_flag(SYNC_CONTROLS_VISIBLE_KEY, visible) {
            log::warn!("Failed to persist {}: {:?}", SYNC_CONTROLS_VISIBLE_KEY, e);
        }
    }

    /// Give a device a custom label. Blank or unchanged labels are ignored;
    /// the label only changes once it has been stored.
    pub fn rename(&mut self, selector: &DeviceSelector, label: &str) {
        let Some(i) = self.resolve(selector) else {
            return;
        };

        let label = label.trim();
        let device = &self.devices[i];
        if label.is_empty() || label == device.display_name() {
            return;
        }

        if let Err(e) = self
            .store
            .set_label(&device.id, device.display_name(), label, &device.address)
        {
            log::warn!("Failed to save label for {}: {:?}", device.id, e);
            return;
        }

        let device = &mut self.devices[i];
        device.label = Some(label.to_string());

        log::info!("{} is now '{}'", device.id, label);
        let event = ControllerEvent::LabelChanged {
            id: device.id.clone(),
            display_name: label.to_string(),
        };
        self.emit(event);
    }

    pub fn reset_label(&mut self, selector: &DeviceSelector) {
        let Some(i) = self.resolve(selector) else {
            return;
        };

        let device = &mut self.devices[i];
        if let Err(e) = self.store.remove_label(&device.id) {
            log::warn!("Failed to reset label for {}: {:?}", device.id, e);
            return;
        }

        device.label = None;
        let event = ControllerEvent::LabelChanged {
            id: device.id.clone(),
            display_name: device.name.clone(),
        };
        self.emit(event);
    }

    fn pull(&self, index: usize, now: Instant) {
        let device = &self.devices[index];

        self.dispatcher.pull(PullRequest {
            id: device.id.clone(),
            address: device.address.clone(),
            port: device.port,
            requested_at: now,
        });
    }

    /// Re-read every device.
    pub fn refresh(&self, now: Instant) {
        for index in 0..self.devices.len() {
            self.pull(index, now);
        }
    }

    /// Merge a finished pull. Fields edited since the pull was issued keep
    /// their local value.
    pub fn apply_pull(&mut self, result: PullResult) {
        let Some(i) = self.index_of(&result.id) else {
            return;
        };

        if self.devices[i].apply_remote(result.state, result.requested_at) {
            log::debug!("{} reported {:?}", result.id, self.devices[i].state);
            self.emit_device_updated(&[result.id]);
            self.emit_master();
        }
    }

    /// Earliest instant at which [`Controller::on_timer`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.devices
            .iter()
            .filter_map(|device| device.throttle.next_tick())
            .chain(self.coordinator.next_deadline())
            .min()
    }

    /// Run every due timer: the sync batch first, so that devices it writes
    /// drop their own pending write, then each device's throttle.
    pub fn on_timer(&mut self, now: Instant) {
        let mut pushes = self.coordinator.flush_due(&mut self.devices, now);

        for device in self.devices.iter_mut() {
            if let Some(state) = device.throttle.tick(now) {
                pushes.push(PushRequest {
                    id: device.id.clone(),
                    address: device.address.clone(),
                    port: device.port,
                    state,
                });
            }
        }

        for push in pushes {
            log::debug!("Pushing {:?} to {}", push.state, push.id);
            self.dispatcher.push(push);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            devices: (0..self.devices.len())
                .filter_map(|i| self.device_snapshot(i))
                .collect(),
            sync_mode: self.coordinator.mode,
            ignore_locks: self.master.ignore_locks,
            sync_controls_visible: self.sync_controls_visible,
            master: self.master_view(),
        }
    }
}
