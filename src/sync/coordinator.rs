use std::{collections::BTreeSet, time::Duration};

use tokio::time::Instant;

use super::{
    device::{Change, CopyScope, Device, DeviceId},
    locks::LockRegistry,
    sync_mode::SyncMode,
    transport::PushRequest,
};

/// Mirrors edits across devices and batches the resulting writes.
///
/// Mirrored devices are staged in a pending set of ids and written
/// together when the shared batch timer fires, independently of each
/// device's own throttle.
#[derive(Debug)]
pub struct SyncCoordinator {
    pub mode: SyncMode,
    pending: BTreeSet<DeviceId>,
    batch_deadline: Option<Instant>,
    sync_interval: Duration,
}

impl SyncCoordinator {
    pub fn new(mode: SyncMode, sync_interval: Duration) -> Self {
        SyncCoordinator {
            mode,
            pending: BTreeSet::new(),
            batch_deadline: None,
            sync_interval,
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> &BTreeSet<DeviceId> {
        &self.pending
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.batch_deadline
    }

    /// Mirror a change made on `source` into every other unlocked device.
    /// Returns the ids of the devices that were staged.
    pub fn propagate(
        &mut self,
        devices: &mut [Device],
        locks: &LockRegistry,
        source: &DeviceId,
        change: Change,
        now: Instant,
    ) -> Vec<DeviceId> {
        if devices.len() < 2 || !self.mode.matches(change.attribute()) {
            return vec![];
        }

        let mut staged = vec![];

        for device in devices.iter_mut() {
            if &device.id == source || locks.get(&device.id) {
                continue;
            }

            device.apply(change, now);
            self.pending.insert(device.id.clone());
            staged.push(device.id.clone());
        }

        if !self.pending.is_empty() && self.batch_deadline.is_none() {
            self.batch_deadline = Some(now + self.sync_interval);
        }

        staged
    }

    /// Copy `scope` from `devices[source]` to every other unlocked device
    /// through each target's own throttle. The source's lock is not checked.
    pub fn copy_to_others(
        &self,
        devices: &mut [Device],
        locks: &LockRegistry,
        source: usize,
        scope: CopyScope,
        now: Instant,
    ) -> Vec<DeviceId> {
        let Some(reference) = devices.get(source).map(|device| device.state) else {
            return vec![];
        };
        let changes = scope.changes(&reference);
        let mut copied = vec![];

        for (i, device) in devices.iter_mut().enumerate() {
            if i == source || locks.get(&device.id) {
                continue;
            }

            for change in &changes {
                device.apply(*change, now);
            }
            device.schedule_update(now);
            copied.push(device.id.clone());
        }

        copied
    }

    /// Fire the batch timer if due: every staged device is written with its
    /// current state, then the batch is cleared and the timer stopped.
    pub fn flush_due(&mut self, devices: &mut [Device], now: Instant) -> Vec<PushRequest> {
        if !self.batch_deadline.is_some_and(|deadline| deadline <= now) {
            return vec![];
        }

        let pending = std::mem::take(&mut self.pending);
        self.batch_deadline = None;

        devices
            .iter_mut()
            .filter(|device| pending.contains(&device.id))
            .map(|device| {
                device.throttle.mark_pushed(now);

                PushRequest {
                    id: device.id.clone(),
                    address: device.address.clone(),
                    port: device.port,
                    state: device.state,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        store::MemoryStore,
        sync::{device::DiscoveredDevice, throttle::Timings},
    };

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn abc() -> Vec<Device> {
        ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Device::new(
                    DiscoveredDevice {
                        identifier: (*id).into(),
                        name: format!("Light {}", id),
                        address: format!("10.0.0.{}", i + 1),
                        port: 9123,
                    },
                    &Timings::default(),
                )
            })
            .collect()
    }

    fn locks() -> LockRegistry {
        LockRegistry::new(Arc::new(MemoryStore::default()))
    }

    fn ids(requests: &[PushRequest]) -> Vec<&str> {
        requests.iter().map(|request| request.id.0.as_str()).collect()
    }

    #[test]
    fn brightness_edit_is_mirrored_and_batched() {
        let locks = locks();
        let mut devices = abc();
        let mut coordinator = SyncCoordinator::new(SyncMode::All, ms(300));
        let t0 = Instant::now();

        devices[0].apply(Change::Brightness(80), t0);
        let staged = coordinator.propagate(&mut devices, &locks, &"A".into(), Change::Brightness(80), t0);

        assert_eq!(staged, vec![DeviceId::from("B"), DeviceId::from("C")]);
        assert_eq!(devices[1].state.brightness, 80);
        assert_eq!(devices[2].state.brightness, 80);
        assert_eq!(coordinator.next_deadline(), Some(t0 + ms(300)));

        assert!(coordinator.flush_due(&mut devices, t0 + ms(299)).is_empty());

        let pushes = coordinator.flush_due(&mut devices, t0 + ms(300));
        assert_eq!(ids(&pushes), vec!["B", "C"]);
        assert!(pushes.iter().all(|push| push.state.brightness == 80));
    }

    #[test]
    fn locked_target_is_left_alone() {
        let mut locks = locks();
        let mut devices = abc();
        locks.set(&"C".into(), true);
        let mut coordinator = SyncCoordinator::new(SyncMode::All, ms(300));
        let t0 = Instant::now();

        coordinator.propagate(&mut devices, &locks, &"A".into(), Change::Brightness(80), t0);

        assert_eq!(devices[1].state.brightness, 80);
        assert_eq!(devices[2].state.brightness, 50);
        assert!(!coordinator.pending().contains(&"C".into()));
    }

    #[test]
    fn source_is_never_touched() {
        let mut locks = locks();
        let mut devices = abc();
        locks.set(&"A".into(), true);
        let mut coordinator = SyncCoordinator::new(SyncMode::All, ms(300));

        coordinator.propagate(&mut devices, &locks, &"A".into(), Change::Temperature(300), Instant::now());

        assert_eq!(devices[0].state.temperature, 200);
        assert!(!coordinator.pending().contains(&"A".into()));
        assert_eq!(devices[1].state.temperature, 300);
    }

    #[test]
    fn unmatched_mode_and_single_device_are_no_ops() {
        let locks = locks();
        let mut devices = abc();
        let now = Instant::now();

        let mut coordinator = SyncCoordinator::new(SyncMode::Temperature, ms(300));
        assert!(coordinator
            .propagate(&mut devices, &locks, &"A".into(), Change::Brightness(80), now)
            .is_empty());

        let mut coordinator = SyncCoordinator::new(SyncMode::Brightness, ms(300));
        assert!(coordinator
            .propagate(&mut devices, &locks, &"A".into(), Change::Power(true), now)
            .is_empty());

        let mut coordinator = SyncCoordinator::new(SyncMode::All, ms(300));
        assert!(coordinator
            .propagate(&mut devices[..1], &locks, &"A".into(), Change::Brightness(80), now)
            .is_empty());

        assert_eq!(coordinator.next_deadline(), None);
        assert!(devices.iter().all(|device| device.state.brightness == 50));
    }

    #[test]
    fn repeated_changes_stage_each_device_once() {
        let locks = locks();
        let mut devices = abc();
        let mut coordinator = SyncCoordinator::new(SyncMode::All, ms(300));
        let t0 = Instant::now();

        for i in 0..20u64 {
            let now = t0 + ms(i * 5);
            coordinator.propagate(&mut devices, &locks, &"A".into(), Change::Brightness(i as u8 + 1), now);
            coordinator.propagate(&mut devices, &locks, &"A".into(), Change::Temperature(150 + i as u16), now);
        }

        assert_eq!(coordinator.pending().len(), 2);
        assert_eq!(coordinator.next_deadline(), Some(t0 + ms(300)));

        let pushes = coordinator.flush_due(&mut devices, t0 + ms(300));
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].state.brightness, 20);
        assert_eq!(pushes[0].state.temperature, 169);
    }

    #[test]
    fn batch_is_empty_and_stopped_after_firing() {
        let locks = locks();
        let mut devices = abc();
        let mut coordinator = SyncCoordinator::new(SyncMode::All, ms(300));
        let t0 = Instant::now();

        coordinator.propagate(&mut devices, &locks, &"A".into(), Change::Power(true), t0);
        devices[1].schedule_update(t0);
        coordinator.flush_due(&mut devices, t0 + ms(300));

        assert!(coordinator.pending().is_empty());
        assert_eq!(coordinator.next_deadline(), None);
        assert!(!devices[1].throttle.is_running());
        assert!(coordinator.flush_due(&mut devices, t0 + ms(900)).is_empty());
    }

    #[test]
    fn copy_ignores_mode_and_uses_device_throttles() {
        let locks = locks();
        let mut devices = abc();
        let coordinator = SyncCoordinator::new(SyncMode::None, ms(300));
        let now = Instant::now();
        devices[0].apply(Change::Temperature(300), now);

        let copied = coordinator.copy_to_others(&mut devices, &locks, 0, CopyScope::Temperature, now);

        assert_eq!(copied.len(), 2);
        assert!(devices.iter().all(|device| device.state.temperature == 300));
        assert!(devices[1].throttle.is_running() && devices[2].throttle.is_running());
        assert!(coordinator.pending().is_empty());
        assert_eq!(devices[1].state.brightness, 50);
    }

    #[test]
    fn copy_from_locked_source_still_filters_targets() {
        let mut locks = locks();
        let mut devices = abc();
        locks.set(&"B".into(), true);
        locks.set(&"C".into(), true);
        let coordinator = SyncCoordinator::new(SyncMode::None, ms(300));
        let now = Instant::now();
        devices[1].apply(Change::Brightness(10), now);

        let copied = coordinator.copy_to_others(&mut devices, &locks, 1, CopyScope::All, now);

        assert_eq!(copied, vec![DeviceId::from("A")]);
        assert_eq!(devices[0].state.brightness, 10);
        assert_eq!(devices[2].state.brightness, 50);
    }
}
