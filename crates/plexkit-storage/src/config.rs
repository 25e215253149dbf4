// ── JSON configuration store ──
//
// A typed model persisted as a JSON file with a rolling `.bak` copy and
// an optional read-only defaults file. Loading layers the zero model,
// the defaults, and the data file with figment's deep merge, so keys
// missing from the data file keep their default values.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use figment::providers::{Format, Json, Serialized};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Error;

const DATA_DIR: &str = "data";
const DEFAULTS_DIR: &str = "defaults";

/// Where a store keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub data: PathBuf,
    pub backup: PathBuf,
    pub defaults: Option<PathBuf>,
}

impl StoragePaths {
    /// Thingsplex layout: `<workdir>/data/<name>`, `<workdir>/data/<name>.bak`,
    /// `<workdir>/defaults/<name>`.
    pub fn thingsplex(workdir: impl AsRef<Path>, name: &str) -> Self {
        let workdir = workdir.as_ref();
        Self::canonical(workdir.join(DATA_DIR), workdir.join(DEFAULTS_DIR), name)
    }

    /// Caller-chosen data and defaults directories.
    pub fn canonical(
        data_dir: impl AsRef<Path>,
        defaults_dir: impl AsRef<Path>,
        name: &str,
    ) -> Self {
        let data = data_dir.as_ref().join(name);
        Self {
            backup: with_suffix(&data, ".bak"),
            data,
            defaults: Some(defaults_dir.as_ref().join(name)),
        }
    }

    /// State-only layout: `<data_dir>/<name>` plus backup, no defaults.
    pub fn state(data_dir: impl AsRef<Path>, name: &str) -> Self {
        let data = data_dir.as_ref().join(name);
        Self {
            backup: with_suffix(&data, ".bak"),
            data,
            defaults: None,
        }
    }
}

/// Typed JSON-backed store. Every method holds the same lock.
pub struct Storage<T> {
    paths: StoragePaths,
    model: Mutex<T>,
}

impl<T> Storage<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send,
{
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            model: Mutex::new(T::default()),
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Load defaults, then overlay the data file.
    ///
    /// Fallback chain when the data file cannot be parsed: backup, then
    /// defaults. With neither a data file nor defaults this is an error.
    pub fn load(&self) -> Result<(), Error> {
        let mut model = self.lock();
        *model = self.load_model()?;
        Ok(())
    }

    /// Persist the current model, rotating the previous file to `.bak`.
    pub fn save(&self) -> Result<(), Error> {
        let model = self.lock();
        self.write_model(&model)
    }

    /// Delete the data file and its backup, then reload defaults.
    pub fn reset(&self) -> Result<(), Error> {
        let mut model = self.lock();

        for path in [&self.paths.data, &self.paths.backup] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(path.clone())(e)),
            }
        }

        *model = match self.defaults_figment()? {
            Some(figment) => figment.extract()?,
            None => T::default(),
        };
        Ok(())
    }

    /// Snapshot of the in-memory model.
    pub fn model(&self) -> T {
        self.lock().clone()
    }

    /// Replace the in-memory model without saving.
    pub fn set_model(&self, model: T) {
        *self.lock() = model;
    }

    /// Mutate the model and save it under one lock acquisition.
    ///
    /// The in-memory model is rolled back if the save fails.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Error> {
        let mut model = self.lock();
        let previous = model.clone();
        let result = f(&mut model);

        if let Err(e) = self.write_model(&model) {
            *model = previous;
            return Err(e);
        }
        Ok(result)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, T> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_model(&self) -> Result<T, Error> {
        let defaults = self.defaults_figment()?;
        let base = defaults
            .clone()
            .unwrap_or_else(|| Figment::from(Serialized::defaults(T::default())));

        if !self.paths.data.exists() {
            return match defaults {
                Some(figment) => Ok(figment.extract()?),
                None => Err(Error::NoData {
                    data: self.paths.data.clone(),
                }),
            };
        }

        let data_err = match overlay::<T>(&base, &self.paths.data) {
            Ok(model) => return Ok(model),
            Err(e) => e,
        };
        warn!(
            path = %self.paths.data.display(),
            error = %data_err,
            "data file unreadable, trying backup"
        );

        if self.paths.backup.exists() {
            match overlay::<T>(&base, &self.paths.backup) {
                Ok(model) => return Ok(model),
                Err(e) => warn!(
                    path = %self.paths.backup.display(),
                    error = %e,
                    "backup unreadable"
                ),
            }
        }

        match defaults {
            Some(figment) => {
                warn!("falling back to defaults");
                Ok(figment.extract()?)
            }
            None => Err(data_err),
        }
    }

    /// Zero model overlaid with the defaults file, if one is configured
    /// and present.
    fn defaults_figment(&self) -> Result<Option<Figment>, Error> {
        let Some(path) = self.paths.defaults.as_ref() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let body = fs::read_to_string(path).map_err(Error::io(path))?;
        Ok(Some(
            Figment::from(Serialized::defaults(T::default())).merge(Json::string(&body)),
        ))
    }

    fn write_model(&self, model: &T) -> Result<(), Error> {
        let data = &self.paths.data;
        if let Some(dir) = data.parent() {
            create_dir(dir)?;
        }

        if data.exists() {
            let previous = fs::read(data).map_err(Error::io(data))?;
            fs::write(&self.paths.backup, previous).map_err(Error::io(&self.paths.backup))?;
        }

        let body = to_tab_indented_json(model)?;
        let tmp = with_suffix(data, ".tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(Error::io(&tmp))?;
            file.write_all(&body).map_err(Error::io(&tmp))?;
            file.sync_all().map_err(Error::io(&tmp))?;
        }
        fs::rename(&tmp, data).map_err(Error::io(data))?;

        debug!(path = %data.display(), bytes = body.len(), "saved");
        Ok(())
    }
}

fn overlay<T: DeserializeOwned>(base: &Figment, path: &Path) -> Result<T, Error> {
    let body = fs::read_to_string(path).map_err(Error::io(path))?;
    // figment treats an empty string as an empty dict; a blank file is
    // still a broken file here.
    if body.trim().is_empty() {
        return Err(Error::Corrupted {
            path: path.to_path_buf(),
            offset: 0,
            reason: "empty file".into(),
        });
    }
    Ok(base.clone().merge(Json::string(&body)).extract()?)
}

fn to_tab_indented_json<T: Serialize>(model: &T) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    model.serialize(&mut serializer)?;
    Ok(buf)
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> Result<(), Error> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o774)
        .create(dir)
        .map_err(Error::io(dir))
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(Error::io(dir))
}

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
