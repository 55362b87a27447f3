use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use serde_json::Value;
use tracing::{event, instrument, Level};

use crate::{json_file::JsonFile, Result};

/// A persistent string-keyed store of JSON values.
pub trait OptionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Option store held in memory and, optionally, written through to a JSON file on every change.
#[derive(Debug)]
pub struct Options {
    file: Option<JsonFile>,
    values: Mutex<BTreeMap<String, Value>>,
}

impl Options {
    pub fn in_memory() -> Self {
        Options {
            file: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open the options file at `path`, starting empty if it doesn't exist.
    #[instrument]
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = JsonFile::new(path);
        let values: BTreeMap<String, Value> = file.load()?;
        event!(Level::DEBUG, count = values.len(), "Loaded options");

        Ok(Options {
            file: Some(file),
            values: Mutex::new(values),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        match &self.file {
            Some(file) => file.save(values),
            None => Ok(()),
        }
    }
}

impl OptionStore for Options {
    fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.lock();
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        self.persist(&updated)?;
        *values = updated;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.lock();
        if !values.contains_key(key) {
            return Ok(());
        }

        let mut updated = values.clone();
        updated.remove(key);
        self.persist(&updated)?;
        *values = updated;
        Ok(())
    }
}
