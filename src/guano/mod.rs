//! GUANO metadata: the `guan` chunk's newline-separated `key: value` text.
//!
//! Keys of the form `namespace|subkey` are nested one level. Entry order is
//! preserved exactly as read or inserted, so an unmodified block encodes
//! back to the same lines. Values must not contain a newline or `": "`;
//! such values do not survive a round trip.

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

/// Separator between a namespace and its subkey.
pub const NAMESPACE_SEPARATOR: char = '|';
const KEY_VALUE_SEPARATOR: &str = ": ";

/// Version written when a file gains a metadata block for the first time.
pub const GUANO_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("line {line} lacks the \": \" separator: {text:?}")]
    Parse { line: usize, text: String },

    #[error("metadata block is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    /// Subkey/value pairs of one namespace, in order.
    Namespace(Vec<(String, String)>),
}

/// Ordered GUANO key/value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh block carrying only `GUANO|Version`.
    pub fn versioned() -> Self {
        let mut m = Self::new();
        m.set("GUANO|Version", GUANO_VERSION);
        m
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up `key` or `namespace|subkey`.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key.split_once(NAMESPACE_SEPARATOR) {
            Some((ns, sub)) => self
                .namespace(ns)?
                .iter()
                .find(|(k, _)| k == sub)
                .map(|(_, v)| v.as_str()),
            None => match self.entry(key)? {
                MetadataValue::Text(v) => Some(v.as_str()),
                MetadataValue::Namespace(_) => None,
            },
        }
    }

    pub fn namespace(&self, name: &str) -> Option<&[(String, String)]> {
        match self.entry(name)? {
            MetadataValue::Namespace(pairs) => Some(pairs),
            MetadataValue::Text(_) => None,
        }
    }

    /// Insert or replace. Existing keys keep their position; new keys go
    /// last (or last within their namespace). A namespaced key whose
    /// namespace name is currently a plain value replaces that value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key.split_once(NAMESPACE_SEPARATOR) {
            Some((ns, sub)) => {
                let i = match self.position(ns) {
                    Some(i) => i,
                    None => {
                        self.entries.push((ns.to_owned(), MetadataValue::Namespace(Vec::new())));
                        self.entries.len() - 1
                    }
                };
                let slot = &mut self.entries[i].1;
                if let MetadataValue::Text(_) = slot {
                    *slot = MetadataValue::Namespace(Vec::new());
                }
                if let MetadataValue::Namespace(pairs) = slot {
                    match pairs.iter_mut().find(|(k, _)| k == sub) {
                        Some((_, v)) => *v = value,
                        None => pairs.push((sub.to_owned(), value)),
                    }
                }
            }
            None => match self.position(key) {
                Some(i) => self.entries[i].1 = MetadataValue::Text(value),
                None => self.entries.push((key.to_owned(), MetadataValue::Text(value))),
            },
        }
    }

    /// Remove `key` or `namespace|subkey`; an emptied namespace goes too.
    /// Removing a bare namespace name drops the whole namespace.
    pub fn remove(&mut self, key: &str) -> bool {
        match key.split_once(NAMESPACE_SEPARATOR) {
            Some((ns, sub)) => {
                let Some(i) = self.position(ns) else { return false };
                let MetadataValue::Namespace(pairs) = &mut self.entries[i].1 else { return false };
                let before = pairs.len();
                pairs.retain(|(k, _)| k != sub);
                let removed = pairs.len() != before;
                if pairs.is_empty() {
                    self.entries.remove(i);
                }
                removed
            }
            None => match self.position(key) {
                Some(i) => {
                    self.entries.remove(i);
                    true
                }
                None => false,
            },
        }
    }

    /// Serialise to the wire text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            match value {
                MetadataValue::Text(v) => push_line(&mut out, key, v),
                MetadataValue::Namespace(pairs) => {
                    for (sub, v) in pairs {
                        let full = format!("{key}{NAMESPACE_SEPARATOR}{sub}");
                        push_line(&mut out, &full, v);
                    }
                }
            }
        }
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }

    /// Parse a `guan` payload. Trailing NUL padding and CR line endings
    /// are tolerated; blank lines are skipped.
    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&bytes[..end])?;

        let mut meta = Self::new();
        for (n, line) in text.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(KEY_VALUE_SEPARATOR).ok_or_else(|| {
                MetadataError::Parse { line: n + 1, text: line.to_owned() }
            })?;
            meta.set(key, value);
        }
        Ok(meta)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    fn entry(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(KEY_VALUE_SEPARATOR);
    out.push_str(value);
    out.push('\n');
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            match value {
                MetadataValue::Text(v) => map.serialize_entry(key, v)?,
                MetadataValue::Namespace(pairs) => map.serialize_entry(key, &NamespaceMap(pairs))?,
            }
        }
        map.end()
    }
}

struct NamespaceMap<'a>(&'a [(String, String)]);

impl Serialize for NamespaceMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
