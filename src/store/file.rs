//! JSON file backed state store.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StateStore, StoreError};
use crate::instance::{InstanceId, InstanceRecord};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoreDocument {
    #[serde(default)]
    instances: BTreeMap<InstanceId, StoredEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredEntry {
    instance: InstanceRecord,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Stores all records in a single JSON document.
///
/// Every operation holds an in-process lock for its whole read-modify-write
/// cycle, and writes land through a temporary file renamed over the target.
#[derive(Debug)]
pub struct FileStore {
    path: Utf8PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<StoreDocument, StoreError> {
        let (parent, file_name) = split_path(&self.path)?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default());
            }
            Err(err) => return Err(io_error(parent, &err)),
        };

        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default());
            }
            Err(err) => return Err(io_error(&self.path, &err)),
        };

        if contents.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    fn persist(&self, document: &mut StoreDocument) -> Result<(), StoreError> {
        document.updated_at = Some(Utc::now());
        let encoded = serde_json::to_string_pretty(document)
            .map_err(|err| StoreError::Encode(err.to_string()))?;

        let (parent, file_name) = split_path(&self.path)?;
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;

        let temp_name = format!("{file_name}{TEMP_SUFFIX}");
        dir.write(&temp_name, encoded.as_bytes())
            .map_err(|err| io_error(&parent.join(&temp_name), &err))?;
        dir.rename(&temp_name, &dir, file_name)
            .map_err(|err| io_error(&self.path, &err))
    }
}

impl StateStore for FileStore {
    fn list_all(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let _lock = self.lock();
        let document = self.load()?;
        Ok(document
            .instances
            .into_values()
            .map(|entry| entry.instance)
            .collect())
    }

    fn get(&self, id: &InstanceId) -> Result<InstanceRecord, StoreError> {
        let _lock = self.lock();
        let mut document = self.load()?;
        document
            .instances
            .remove(id)
            .map(|entry| entry.instance)
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    fn save(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let _lock = self.lock();
        let mut document = self.load()?;
        let now = Utc::now();
        let created_at = match document.instances.get(&record.id) {
            Some(existing) if existing.instance.expires_at > record.expires_at => {
                return Err(StoreError::ExpiryRegression {
                    id: record.id.clone(),
                });
            }
            Some(existing) => existing.created_at,
            None => now,
        };
        document.instances.insert(
            record.id.clone(),
            StoredEntry {
                instance: record.clone(),
                created_at,
                updated_at: now,
            },
        );
        self.persist(&mut document)
    }

    fn update<T, E, F>(&self, id: &InstanceId, mutate: F) -> Result<T, E>
    where
        F: FnOnce(&mut InstanceRecord) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _lock = self.lock();
        let mut document = self.load()?;
        let entry = document
            .instances
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;

        let mut working = entry.instance.clone();
        let output = mutate(&mut working)?;
        if working.id != entry.instance.id {
            return Err(StoreError::IdChanged { id: id.clone() }.into());
        }
        if working.expires_at < entry.instance.expires_at {
            return Err(StoreError::ExpiryRegression { id: id.clone() }.into());
        }
        if working != entry.instance {
            entry.instance = working;
            entry.updated_at = Utc::now();
            self.persist(&mut document)?;
        }
        Ok(output)
    }

    fn delete(&self, id: &InstanceId) -> Result<(), StoreError> {
        let _lock = self.lock();
        let mut document = self.load()?;
        if document.instances.remove(id).is_none() {
            return Err(StoreError::NotFound { id: id.clone() });
        }
        self.persist(&mut document)
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), StoreError> {
    let file_name = path.file_name().ok_or_else(|| StoreError::Io {
        path: path.to_path_buf(),
        message: String::from("store path is missing a filename"),
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, file_name))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
