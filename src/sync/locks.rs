use std::{collections::HashMap, sync::Arc};

use crate::store::LockStore;

use super::device::DeviceId;

/// Per-device opt-out from sync, copy and master operations.
///
/// The in-memory flag is the source of truth for the session: it is loaded
/// from the store once per device and written back on every change, but a
/// failed write never reverts it.
pub struct LockRegistry {
    flags: HashMap<DeviceId, bool>,
    store: Arc<dyn LockStore>,
}

impl LockRegistry {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        LockRegistry {
            flags: HashMap::new(),
            store,
        }
    }

    /// Pull the persisted flag for a newly tracked device.
    pub fn load(&mut self, id: &DeviceId) -> bool {
        let locked = self.store.get_lock(id);
        self.flags.insert(id.clone(), locked);
        locked
    }

    pub fn get(&self, id: &DeviceId) -> bool {
        self.flags.get(id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, id: &DeviceId, locked: bool) {
        self.flags.insert(id.clone(), locked);

        if let Err(e) = self.store.set_lock(id, locked) {
            log::warn!("Failed to persist lock state for {}: {:?}", id, e);
        }
    }

    pub fn toggle(&mut self, id: &DeviceId) -> bool {
        let locked = !self.get(id);
        self.set(id, locked);
        locked
    }
}
