// ── Adapter state ──
//
// Persistent `adapter.json`: the address counter and one record per thing.
// Every mutation is a single `Storage::update`, so the file is rewritten
// (with `.bak` rotation) before the call returns.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use plexkit_storage::{Storage, StoragePaths};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;

pub const STATE_FILE: &str = "adapter.json";

/// Persisted record of one thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThingRecord {
    pub id: String,
    pub address: String,
    pub info: Option<serde_json::Value>,
    pub state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateModel {
    pub address_index: u64,
    pub things: BTreeMap<String, ThingRecord>,
}

/// Handle on the adapter state file. Clones share the store.
#[derive(Clone)]
pub struct AdapterState {
    storage: Arc<Storage<StateModel>>,
}

impl AdapterState {
    /// Open `<data_dir>/adapter.json`. A missing file starts empty.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, CoreError> {
        let storage = Storage::new(StoragePaths::state(data_dir, STATE_FILE));
        match storage.load() {
            Ok(()) => {
                debug!(path = %storage.paths().data.display(), "adapter state loaded");
            }
            Err(e) if e.is_not_found() => {
                info!(path = %storage.paths().data.display(), "no adapter state, starting empty");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            storage: Arc::new(storage),
        })
    }

    /// Allocate the next thing address. Addresses are never reused.
    pub fn acquire_address(&self) -> Result<String, CoreError> {
        let index = self.storage.update(|model| {
            model.address_index += 1;
            model.address_index
        })?;
        Ok(index.to_string())
    }

    pub fn address_index(&self) -> u64 {
        self.storage.model().address_index
    }

    pub fn records(&self) -> Vec<ThingRecord> {
        self.storage.model().things.into_values().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.storage.model().things.into_keys().collect()
    }

    pub fn record(&self, id: &str) -> Option<ThingRecord> {
        self.storage.model().things.remove(id)
    }

    /// Allocate an address and persist a new record for `id` in one save.
    pub fn create_record(&self, id: &str, info: serde_json::Value) -> Result<ThingRecord, CoreError> {
        let record = self
            .storage
            .update(|model| {
                if model.things.contains_key(id) {
                    return None;
                }
                model.address_index += 1;
                let record = ThingRecord {
                    id: id.to_owned(),
                    address: model.address_index.to_string(),
                    info: Some(info),
                    state: None,
                };
                model.things.insert(id.to_owned(), record.clone());
                Some(record)
            })
            .map_err(|e| CoreError::from(e).for_thing(id))?;

        record.ok_or_else(|| CoreError::InvalidRequest {
            message: format!("thing {id} already exists"),
        })
    }

    /// Remove the record for `id`. Returns whether one existed.
    pub fn delete_record(&self, id: &str) -> Result<bool, CoreError> {
        self.storage
            .update(|model| model.things.remove(id).is_some())
            .map_err(|e| CoreError::from(e).for_thing(id))
    }

    /// Typed handle on the record of `record.id`.
    pub fn thing_state(&self, record: &ThingRecord) -> ThingState {
        ThingState {
            id: record.id.clone(),
            address: record.address.clone(),
            storage: Arc::clone(&self.storage),
        }
    }
}

impl std::fmt::Debug for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterState")
            .field("path", &self.storage.paths().data)
            .finish_non_exhaustive()
    }
}

/// A thing's view of its own persisted record.
#[derive(Clone)]
pub struct ThingState {
    id: String,
    address: String,
    storage: Arc<Storage<StateModel>>,
}

impl ThingState {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Decode the stored descriptor. `None` if nothing was stored.
    pub fn info<T: DeserializeOwned>(&self) -> Result<Option<T>, CoreError> {
        self.read(|record| record.info.clone())
    }

    pub fn set_info<T: Serialize>(&self, info: &T) -> Result<(), CoreError> {
        let value = serde_json::to_value(info).map_err(|e| CoreError::from(e).for_thing(&self.id))?;
        self.write(|record| record.info = Some(value))
    }

    /// Decode the stored runtime state. `None` if nothing was stored.
    pub fn state<T: DeserializeOwned>(&self) -> Result<Option<T>, CoreError> {
        self.read(|record| record.state.clone())
    }

    pub fn set_state<T: Serialize>(&self, state: &T) -> Result<(), CoreError> {
        let value = serde_json::to_value(state).map_err(|e| CoreError::from(e).for_thing(&self.id))?;
        self.write(|record| record.state = Some(value))
    }

    fn read<T: DeserializeOwned>(
        &self,
        field: impl FnOnce(&ThingRecord) -> Option<serde_json::Value>,
    ) -> Result<Option<T>, CoreError> {
        let model = self.storage.model();
        let record = model
            .things
            .get(&self.id)
            .ok_or_else(|| CoreError::not_found("thing record", self.id.clone()))?;

        match field(record) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CoreError::from(e).for_thing(&self.id)),
        }
    }

    fn write(&self, f: impl FnOnce(&mut ThingRecord)) -> Result<(), CoreError> {
        let found = self
            .storage
            .update(|model| match model.things.get_mut(&self.id) {
                Some(record) => {
                    f(record);
                    true
                }
                None => false,
            })
            .map_err(|e| CoreError::from(e).for_thing(&self.id))?;

        if found {
            Ok(())
        } else {
            Err(CoreError::not_found("thing record", self.id.clone()))
        }
    }
}

impl std::fmt::Debug for ThingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingState")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
