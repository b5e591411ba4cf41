//! Event code dictionary
//!
//! Maps a qualifier+code string (e.g. `E130`) to a human-readable event type
//! and description. The dictionary is loaded once at startup and only read
//! afterwards.

use std::collections::HashMap;

use crate::error::DictionaryError;

/// A single dictionary entry
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventDictionaryEntry {
    /// Qualifier + event code, e.g. `E130`
    pub code: String,
    /// Event category, e.g. `Burglary`
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub event_type: String,
    /// Human-readable description
    #[cfg_attr(feature = "serde", serde(alias = "desc"))]
    pub description: String,
}

/// Read-only code → entry lookup
#[derive(Debug, Clone, Default)]
pub struct EventDictionary {
    entries: HashMap<String, EventDictionaryEntry>,
}

impl EventDictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dictionary from entries; later duplicates replace earlier ones
    pub fn from_entries(
        entries: impl IntoIterator<Item = EventDictionaryEntry>,
    ) -> Result<Self, DictionaryError> {
        let mut dictionary = Self::new();
        for entry in entries {
            dictionary.insert(entry)?;
        }
        Ok(dictionary)
    }

    /// Add or replace an entry
    pub fn insert(&mut self, entry: EventDictionaryEntry) -> Result<(), DictionaryError> {
        if entry.code.is_empty() || !entry.code.is_ascii() {
            return Err(DictionaryError::InvalidCode(entry.code));
        }
        self.entries.insert(entry.code.clone(), entry);
        Ok(())
    }

    /// Look up an entry by qualifier+code
    pub fn lookup(&self, code: &str) -> Option<&EventDictionaryEntry> {
        self.entries.get(code)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(feature = "serde")]
mod json {
    use std::collections::HashMap;

    use serde::Deserialize;

    use super::{EventDictionary, EventDictionaryEntry};
    use crate::error::DictionaryError;

    /// Entry shape used when the file is keyed by code
    #[derive(Deserialize)]
    struct KeyedEntry {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(alias = "desc")]
        description: String,
    }

    /// Accepted file layouts
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DictionaryFile {
        List(Vec<EventDictionaryEntry>),
        Keyed(HashMap<String, KeyedEntry>),
    }

    impl EventDictionary {
        /// Parse a dictionary from JSON
        ///
        /// Accepts either a list of `{"code", "type", "description"}` objects or
        /// an object keyed by code with `{"type", "description"}` values.
        pub fn from_json(data: &[u8]) -> Result<Self, DictionaryError> {
            match serde_json::from_slice::<DictionaryFile>(data)? {
                DictionaryFile::List(entries) => Self::from_entries(entries),
                DictionaryFile::Keyed(map) => {
                    Self::from_entries(map.into_iter().map(|(code, e)| EventDictionaryEntry {
                        code,
                        event_type: e.event_type,
                        description: e.description,
                    }))
                }
            }
        }
    }
}
