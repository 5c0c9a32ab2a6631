use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use color_eyre::Result;
use eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::sync::device::DeviceId;

pub trait LockStore: Send + Sync {
    fn get_lock(&self, id: &DeviceId) -> bool;
    fn set_lock(&self, id: &DeviceId, locked: bool) -> Result<()>;
}

pub trait PreferenceStore: Send + Sync {
    fn get_flag(&self, key: &str) -> Option<bool>;
    fn set_flag(&self, key: &str, value: bool) -> Result<()>;
}

pub trait LabelStore: Send + Sync {
    fn get_label(&self, id: &DeviceId) -> Option<String>;
    fn set_label(&self, id: &DeviceId, original_name: &str, label: &str, last_ip: &str) -> Result<()>;
    fn remove_label(&self, id: &DeviceId) -> Result<()>;
}

/// Everything the engine persists.
pub trait ConfigStore: LockStore + PreferenceStore + LabelStore {}

impl<T: LockStore + PreferenceStore + LabelStore> ConfigStore for T {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeviceEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ip: Option<String>,
    #[serde(default)]
    pub locked: bool,
}

impl DeviceEntry {
    fn is_empty(&self) -> bool {
        self == &DeviceEntry::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreDocument {
    pub version: String,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceEntry>,
    #[serde(default)]
    pub app_settings: BTreeMap<String, bool>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        StoreDocument {
            version: "1.0".to_string(),
            devices: BTreeMap::new(),
            app_settings: BTreeMap::new(),
        }
    }
}

impl StoreDocument {
    fn device(&self, id: &DeviceId) -> Option<&DeviceEntry> {
        self.devices.get(&id.0)
    }

    fn device_mut(&mut self, id: &DeviceId) -> &mut DeviceEntry {
        self.devices.entry(id.0.clone()).or_default()
    }

    fn prune(&mut self, id: &DeviceId) {
        if self.device(id).is_some_and(DeviceEntry::is_empty) {
            self.devices.remove(&id.0);
        }
    }
}

fn lock<'a>(document: &'a Mutex<StoreDocument>) -> std::sync::MutexGuard<'a, StoreDocument> {
    document.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// JSON file under the user's config directory. Every write is saved
/// synchronously; the previous file is kept as `.json.backup`.
pub struct JsonStore {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

pub fn default_store_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("keylight-control").join("device-labels.json"))
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> JsonStore {
        let path = path.into();
        let document = match load_document(&path) {
            Ok(Some(document)) => document,
            Ok(None) => StoreDocument::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable store {}: {:?}", path.display(), e);
                StoreDocument::default()
            }
        };

        JsonStore {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut StoreDocument)) -> Result<()> {
        let mut document = lock(&self.document);
        let mut updated = document.clone();
        f(&mut updated);
        save_document(&self.path, &updated)?;
        *document = updated;
        Ok(())
    }
}

fn load_document(path: &Path) -> Result<Option<StoreDocument>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read(path)?;
    let de = &mut serde_json::Deserializer::from_slice(&raw);
    let document: StoreDocument = serde_path_to_error::deserialize(de)?;

    Ok(Some(document))
}

fn save_document(path: &Path, document: &StoreDocument) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| eyre!("Store path {} has no parent directory", path.display()))?;
    fs::create_dir_all(dir)?;

    if path.exists() {
        fs::rename(path, path.with_extension("json.backup"))?;
    }

    let json = serde_json::to_string_pretty(document)?;
    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

impl LockStore for JsonStore {
    fn get_lock(&self, id: &DeviceId) -> bool {
        lock(&self.document).device(id).is_some_and(|entry| entry.locked)
    }

    fn set_lock(&self, id: &DeviceId, locked: bool) -> Result<()> {
        self.update(|document| {
            document.device_mut(id).locked = locked;
            document.prune(id);
        })
    }
}

impl PreferenceStore for JsonStore {
    fn get_flag(&self, key: &str) -> Option<bool> {
        lock(&self.document).app_settings.get(key).copied()
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.update(|document| {
            document.app_settings.insert(key.to_string(), value);
        })
    }
}

impl LabelStore for JsonStore {
    fn get_label(&self, id: &DeviceId) -> Option<String> {
        lock(&self.document)
            .device(id)
            .and_then(|entry| entry.custom_label.clone())
    }

    fn set_label(&self, id: &DeviceId, original_name: &str, label: &str, last_ip: &str) -> Result<()> {
        self.update(|document| {
            let entry = document.device_mut(id);
            entry.original_name = Some(original_name.to_string());
            entry.custom_label = Some(label.to_string());
            entry.last_ip = Some(last_ip.to_string());
        })
    }

    fn remove_label(&self, id: &DeviceId) -> Result<()> {
        if lock(&self.document).device(id).is_none() {
            return Ok(());
        }

        self.update(|document| {
            let entry = document.device_mut(id);
            entry.custom_label = None;
            entry.original_name = None;
            entry.last_ip = None;
            document.prune(id);
        })
    }
}

/// In-memory store for tests; `fail_writes` makes every write error out
/// after updating nothing.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<StoreDocument>,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStore {
    fn update(&self, f: impl FnOnce(&mut StoreDocument)) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(eyre!("store is read-only"));
        }
        f(&mut lock(&self.document));
        Ok(())
    }
}

#[cfg(test)]
impl LockStore for MemoryStore {
    fn get_lock(&self, id: &DeviceId) -> bool {
        lock(&self.document).device(id).is_some_and(|entry| entry.locked)
    }

    fn set_lock(&self, id: &DeviceId, locked: bool) -> Result<()> {
        self.update(|document| document.device_mut(id).locked = locked)
    }
}

#[cfg(test)]
impl PreferenceStore for MemoryStore {
    fn get_flag(&self, key: &str) -> Option<bool> {
        lock(&self.document).app_settings.get(key).copied()
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.update(|document| {
            document.app_settings.insert(key.to_string(), value);
        })
    }
}

#[cfg(test)]
impl LabelStore for MemoryStore {
    fn get_label(&self, id: &DeviceId) -> Option<String> {
        lock(&self.document)
            .device(id)
            .and_then(|entry| entry.custom_label.clone())
    }

    fn set_label(&self, id: &DeviceId, original_name: &str, label: &str, last_ip: &str) -> Result<()> {
        self.update(|document| {
            let entry = document.device_mut(id);
            entry.original_name = Some(original_name.to_string());
            entry.custom_label = Some(label.to_string());
            entry.last_ip = Some(last_ip.to_string());
        })
    }

    fn remove_label(&self, id: &DeviceId) -> Result<()> {
        self.update(|document| {
            if let Some(entry) = document.devices.get_mut(&id.0) {
                entry.custom_label = None;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("keylight-sync-{}-{}-{}", name, std::process::id(), nanos))
            .join("device-labels.json")
    }

    #[test]
    fn missing_file_starts_empty() {
        let store = JsonStore::open(scratch_path("missing"));
        let id = DeviceId::from("AA");

        assert!(!store.get_lock(&id));
        assert_eq!(store.get_flag("all_sync_enabled"), None);
        assert_eq!(store.get_label(&id), None);
    }

    #[test]
    fn writes_survive_reopen_and_keep_a_backup() {
        let path = scratch_path("reopen");
        let id = DeviceId::from("3C6A9D142B0F");

        {
            let store = JsonStore::open(&path);
            store.set_lock(&id, true).unwrap();
            store.set_flag("temp_sync_enabled", true).unwrap();
            store.set_label(&id, "Elgato Key Light", "Desk", "10.0.0.7").unwrap();
        }

        let store = JsonStore::open(&path);
        assert!(store.get_lock(&id));
        assert_eq!(store.get_flag("temp_sync_enabled"), Some(true));
        assert_eq!(store.get_label(&id).as_deref(), Some("Desk"));
        assert!(path.with_extension("json.backup").exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn removing_label_keeps_lock() {
        let path = scratch_path("labels");
        let id = DeviceId::from("AA");
        let store = JsonStore::open(&path);

        store.set_label(&id, "Key Light", "Left", "10.0.0.2").unwrap();
        store.set_lock(&id, true).unwrap();
        store.remove_label(&id).unwrap();

        assert_eq!(store.get_label(&id), None);
        assert!(store.get_lock(&id));

        store.set_lock(&id, false).unwrap();
        assert!(lock(&store.document).devices.is_empty());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn failed_save_leaves_memory_and_disk_untouched() {
        let path = scratch_path("failed-save");
        let id = DeviceId::from("AA");
        let store = JsonStore::open(&path);
        store.set_label(&id, "Key Light", "Desk", "10.0.0.2").unwrap();

        let backup = path.with_extension("json.backup");
        fs::create_dir_all(backup.join("blocked")).unwrap();

        assert!(store.set_label(&id, "Key Light", "Rejected", "10.0.0.2").is_err());
        assert_eq!(store.get_label(&id).as_deref(), Some("Desk"));

        fs::remove_dir_all(&backup).unwrap();
        store.set_lock(&id, true).unwrap();

        let reopened = JsonStore::open(&path);
        assert_eq!(reopened.get_label(&id).as_deref(), Some("Desk"));
        assert!(reopened.get_lock(&id));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let store = JsonStore::open(&path);
        assert_eq!(*lock(&store.document), StoreDocument::default());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn memory_store_can_refuse_writes() {
        let store = MemoryStore::default();
        store
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(store.set_flag("all_sync_enabled", true).is_err());
        assert_eq!(store.get_flag("all_sync_enabled"), None);
    }
}
