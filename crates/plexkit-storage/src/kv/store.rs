// ── Bucketed key-value store ──

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::{now_ms, Command, Engine, EngineOptions, SyncPolicy};
use super::recovery;
use crate::error::Error;

const KEY_SEPARATOR: char = ':';

fn flat_key(bucket: &str, key: &str) -> String {
    format!("{bucket}{KEY_SEPARATOR}{key}")
}

fn bucket_prefix(bucket: &str) -> String {
    format!("{bucket}{KEY_SEPARATOR}")
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub sync_policy: SyncPolicy,
    /// Auto-compaction never runs below this file size (bytes).
    pub auto_compact_min_size: u64,
    /// Wasted share of the file, in percent, that triggers compaction.
    /// Zero disables auto-compaction.
    pub auto_compact_percentage: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("store.db"),
            sync_policy: SyncPolicy::Always,
            auto_compact_min_size: 1024 * 1024,
            auto_compact_percentage: 50,
        }
    }
}

impl StoreConfig {
    /// `<workdir>/<name>.db` with default tuning.
    pub fn new(workdir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            path: workdir.as_ref().join(format!("{name}.db")),
            ..Self::default()
        }
    }

    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            sync_policy: self.sync_policy,
            auto_compact_min_size: self.auto_compact_min_size,
            auto_compact_percentage: self.auto_compact_percentage,
        }
    }
}

// ── Database contract ────────────────────────────────────────────────

/// Raw bucketed storage. Values are opaque strings at this level;
/// [`DatabaseExt`] adds JSON encoding.
pub trait Database: Send + Sync {
    fn set_raw(
        &self,
        bucket: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), Error>;

    fn get_raw(&self, bucket: &str, key: &str) -> Result<Option<String>, Error>;

    fn delete(&self, bucket: &str, key: &str) -> Result<(), Error>;

    /// Keys in `bucket`, ascending, with the bucket prefix stripped.
    fn keys(&self, bucket: &str) -> Result<Vec<String>, Error>;

    /// Keys in `bucket` within `[from, to)`, ascending, prefix stripped.
    fn keys_between(&self, bucket: &str, from: &str, to: &str) -> Result<Vec<String>, Error>;

    /// Remove everything.
    fn reset(&self) -> Result<(), Error>;

    /// Remove every key whose bucket is `domain` or nested under it.
    fn clear_domain(&self, domain: &str) -> Result<(), Error>;
}

/// Typed JSON helpers over any [`Database`].
pub trait DatabaseExt: Database {
    fn set<T: Serialize + ?Sized>(&self, bucket: &str, key: &str, value: &T) -> Result<(), Error> {
        self.set_raw(bucket, key, serde_json::to_string(value)?, None)
    }

    fn set_with_expiry<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), Error> {
        self.set_raw(bucket, key, serde_json::to_string(value)?, Some(ttl))
    }

    /// `Ok(None)` only when the key is absent or expired.
    fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<Option<T>, Error> {
        match self.get_raw(bucket, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}

// ── Store ────────────────────────────────────────────────────────────

/// File-backed [`Database`]. Must be started before use.
pub struct Store {
    config: StoreConfig,
    engine: RwLock<Option<Engine>>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            engine: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.read().is_some()
    }

    /// Open the log, recovering it first if it is damaged.
    pub fn start(&self) -> Result<(), Error> {
        let mut slot = self.write();
        if slot.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let path = &self.config.path;
        let options = self.config.engine_options();
        let engine = match Engine::open(path, options) {
            Ok(engine) => engine,
            Err(Error::Corrupted {
                offset, reason, ..
            }) => {
                warn!(path = %path.display(), offset, %reason, "store corrupted, recovering");
                let recovered = recovery::recover(path)?;
                info!(
                    path = %path.display(),
                    keys = recovered.keys,
                    corrupted = %recovered.corrupted.display(),
                    "store recovered"
                );
                Engine::open(path, options)?
            }
            Err(e) => return Err(e),
        };

        *slot = Some(engine);
        debug!(path = %path.display(), "store started");
        Ok(())
    }

    /// Flush and close the log.
    pub fn stop(&self) -> Result<(), Error> {
        let engine = self.write().take().ok_or(Error::NotStarted)?;
        engine.close()?;
        debug!(path = %self.config.path.display(), "store stopped");
        Ok(())
    }

    /// Force a compaction.
    pub fn shrink(&self) -> Result<(), Error> {
        let mut slot = self.write();
        let engine = slot.as_mut().ok_or(Error::NotStarted)?;
        engine.compact(now_ms())
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Engine>> {
        self.engine.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Engine>> {
        self.engine.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_engine<R>(&self, f: impl FnOnce(&Engine) -> R) -> Result<R, Error> {
        let slot = self.read();
        let engine = slot.as_ref().ok_or(Error::NotStarted)?;
        Ok(f(engine))
    }

    fn execute(&self, cmd: Command) -> Result<(), Error> {
        let mut slot = self.write();
        let engine = slot.as_mut().ok_or(Error::NotStarted)?;
        engine.execute(cmd)
    }
}

impl Database for Store {
    fn set_raw(
        &self,
        bucket: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let expires_at = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now_ms().saturating_add(ttl_ms)
        });
        self.execute(Command::Set {
            key: flat_key(bucket, key),
            value,
            expires_at,
        })
    }

    fn get_raw(&self, bucket: &str, key: &str) -> Result<Option<String>, Error> {
        let key = flat_key(bucket, key);
        self.with_engine(|engine| engine.get(&key, now_ms()).map(str::to_owned))
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let key = flat_key(bucket, key);
        let mut slot = self.write();
        let engine = slot.as_mut().ok_or(Error::NotStarted)?;
        if engine.get(&key, now_ms()).is_none() {
            return Ok(());
        }
        engine.execute(Command::Del { key })
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, Error> {
        let prefix = bucket_prefix(bucket);
        self.with_engine(|engine| strip(engine.keys_with_prefix(&prefix, now_ms()), &prefix))
    }

    fn keys_between(&self, bucket: &str, from: &str, to: &str) -> Result<Vec<String>, Error> {
        let prefix = bucket_prefix(bucket);
        let (from, to) = (flat_key(bucket, from), flat_key(bucket, to));
        self.with_engine(|engine| strip(engine.keys_in_range(&from, &to, now_ms()), &prefix))
    }

    fn reset(&self) -> Result<(), Error> {
        let mut slot = self.write();
        let engine = slot.as_mut().ok_or(Error::NotStarted)?;
        engine.execute(Command::FlushDb)?;
        engine.compact(now_ms())
    }

    fn clear_domain(&self, domain: &str) -> Result<(), Error> {
        let prefix = bucket_prefix(domain);
        let mut slot = self.write();
        let engine = slot.as_mut().ok_or(Error::NotStarted)?;
        for key in engine.keys_with_prefix(&prefix, now_ms()) {
            engine.execute(Command::Del { key })?;
        }
        Ok(())
    }
}

fn strip(keys: Vec<String>, prefix: &str) -> Vec<String> {
    keys.into_iter()
        .filter_map(|k| k.strip_prefix(prefix).map(str::to_owned))
        .collect()
}

// ── Domain wrapper ───────────────────────────────────────────────────

/// Prefixes every bucket with `<domain>:`. Wrappers nest.
#[derive(Clone)]
pub struct DomainDatabase {
    domain: String,
    inner: Arc<dyn Database>,
}

impl DomainDatabase {
    pub fn new(domain: impl Into<String>, inner: Arc<dyn Database>) -> Self {
        Self {
            domain: domain.into(),
            inner,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn bucket(&self, bucket: &str) -> String {
        flat_key(&self.domain, bucket)
    }
}

impl Database for DomainDatabase {
    fn set_raw(
        &self,
        bucket: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        self.inner.set_raw(&self.bucket(bucket), key, value, ttl)
    }

    fn get_raw(&self, bucket: &str, key: &str) -> Result<Option<String>, Error> {
        self.inner.get_raw(&self.bucket(bucket), key)
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.inner.delete(&self.bucket(bucket), key)
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, Error> {
        self.inner.keys(&self.bucket(bucket))
    }

    fn keys_between(&self, bucket: &str, from: &str, to: &str) -> Result<Vec<String>, Error> {
        self.inner.keys_between(&self.bucket(bucket), from, to)
    }

    /// Remove this domain's keys only.
    fn reset(&self) -> Result<(), Error> {
        self.inner.clear_domain(&self.domain)
    }

    fn clear_domain(&self, domain: &str) -> Result<(), Error> {
        self.inner.clear_domain(&self.bucket(domain))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        celsius: f64,
    }

    fn started(dir: &Path) -> Store {
        let store = Store::new(StoreConfig::new(dir, "test"));
        store.start().unwrap();
        store
    }

    #[test]
    fn lifecycle_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(StoreConfig::new(dir.path(), "test"));

        assert!(matches!(store.get_raw("b", "k"), Err(Error::NotStarted)));
        assert!(matches!(store.stop(), Err(Error::NotStarted)));

        store.start().unwrap();
        assert!(matches!(store.start(), Err(Error::AlreadyStarted)));
        store.stop().unwrap();
        assert!(!store.is_started());
    }

    #[test]
    fn set_then_get_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path());

        let reading = Reading {
            sensor: "hall".into(),
            celsius: 21.5,
        };
        store.set("readings", "hall", &reading).unwrap();

        let got: Option<Reading> = store.get("readings", "hall").unwrap();
        assert_eq!(got, Some(reading));
        let missing: Option<Reading> = store.get("readings", "attic").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn keys_are_sorted_and_scoped_to_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path());

        for key in ["c", "a", "b"] {
            store.set("one", key, &1).unwrap();
        }
        store.set("two", "z", &1).unwrap();

        assert_eq!(store.keys("one").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.keys("two").unwrap(), vec!["z"]);
        assert_eq!(store.keys_between("one", "a", "c").unwrap(), vec!["a", "b"]);
        assert!(store.keys("three").unwrap().is_empty());
    }

    #[test]
    fn expiry_hides_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path());

        store
            .set_with_expiry("b", "gone", &"x", Duration::from_millis(1))
            .unwrap();
        store
            .set_with_expiry("b", "kept", &"y", Duration::from_secs(3600))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.get::<String>("b", "gone").unwrap(), None);
        assert_eq!(store.get::<String>("b", "kept").unwrap().as_deref(), Some("y"));
        assert_eq!(store.keys("b").unwrap(), vec!["kept"]);
    }

    #[test]
    fn delete_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path());

        store.set("b", "k1", &1).unwrap();
        store.set("b", "k2", &2).unwrap();
        store.delete("b", "k1").unwrap();
        store.delete("b", "never-set").unwrap();
        assert_eq!(store.keys("b").unwrap(), vec!["k2"]);

        store.reset().unwrap();
        assert!(store.keys("b").unwrap().is_empty());
        assert_eq!(std::fs::metadata(&store.config().path).unwrap().len(), 0);
    }

    #[test]
    fn values_survive_restart_and_shrink() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path());
        store.set("b", "k", &"v1").unwrap();
        store.set("b", "k", &"v2").unwrap();
        store.shrink().unwrap();
        store.stop().unwrap();

        let store = started(dir.path());
        assert_eq!(store.get::<String>("b", "k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn domain_wrappers_nest() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Database> = Arc::new(started(dir.path()));
        let adapter: Arc<dyn Database> = Arc::new(DomainDatabase::new("zigbee", store.clone()));
        let thing = DomainDatabase::new("thing_7", adapter.clone());

        thing.set("history", "001", &10).unwrap();
        adapter.set("history", "001", &20).unwrap();

        assert_eq!(thing.get::<i32>("history", "001").unwrap(), Some(10));
        assert_eq!(adapter.get::<i32>("history", "001").unwrap(), Some(20));
        assert_eq!(
            store.get::<i32>("zigbee:thing_7:history", "001").unwrap(),
            Some(10)
        );
        assert_eq!(thing.keys("history").unwrap(), vec!["001"]);
    }

    #[test]
    fn domain_reset_keeps_other_domains() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Database> = Arc::new(started(dir.path()));
        let zigbee: Arc<dyn Database> = Arc::new(DomainDatabase::new("zigbee", store.clone()));
        let lamp = DomainDatabase::new("lamp", zigbee.clone());
        let zwave = DomainDatabase::new("zwave", store.clone());

        lamp.set("history", "001", &1).unwrap();
        zigbee.set("config", "channel", &11).unwrap();
        zwave.set("config", "channel", &3).unwrap();
        store.set("zigbee_extra", "k", &4).unwrap();

        lamp.reset().unwrap();
        assert!(lamp.keys("history").unwrap().is_empty());
        assert_eq!(zigbee.get::<i32>("config", "channel").unwrap(), Some(11));

        zigbee.reset().unwrap();
        assert!(zigbee.keys("config").unwrap().is_empty());
        assert_eq!(zwave.get::<i32>("config", "channel").unwrap(), Some(3));
        assert_eq!(store.get::<i32>("zigbee_extra", "k").unwrap(), Some(4));
    }
}
