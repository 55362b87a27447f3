use serde_json::{json, Value};
use tracing::{event, Level};

use crate::{OptionStore, Result};

pub const CONVERSION_LOG_KEY: &str = "webp_conversion_log";

/// Only the most recent entries are kept.
pub const MAX_LOG_ENTRIES: usize = 500;

/// The human-readable conversion log, stored as a single option value.
pub struct ConversionLog<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> ConversionLog<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        ConversionLog { store }
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        match self.store.get(CONVERSION_LOG_KEY) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Append entries, dropping the oldest ones past [MAX_LOG_ENTRIES].
    pub fn append<I>(&self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let mut entries = self.entries();
        let before = entries.len();
        entries.extend(lines);
        if entries.len() == before {
            return Ok(());
        }

        if entries.len() > MAX_LOG_ENTRIES {
            let overflow = entries.len() - MAX_LOG_ENTRIES;
            entries.drain(..overflow);
        }

        self.store.set(CONVERSION_LOG_KEY, json!(entries))
    }

    pub fn clear(&self) -> Result<()> {
        event!(Level::INFO, "Clearing conversion log");
        self.store.set(CONVERSION_LOG_KEY, json!([]))
    }
}
