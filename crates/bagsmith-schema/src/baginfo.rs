//! Ordered multi-valued metadata, as stored in `bag-info.txt`.
//!
//! Keys keep the position of their first insertion; repeated values for the
//! same key are grouped under it. Serialization writes one `Key: value` line per
//! value in that order, so identical input always yields identical bytes.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tag holding `<octets>.<stream count>` of the payload.
pub const PAYLOAD_OXUM: &str = "Payload-Oxum";
pub const BAGGING_DATE: &str = "Bagging-Date";
pub const PROFILE_IDENTIFIER: &str = "BagIt-Profile-Identifier";

/// Whether `key` survives a `to_text`/`parse` round trip as a single tag name.
pub fn is_valid_tag_name(key: &str) -> bool {
    !key.trim().is_empty() && !key.starts_with(char::is_whitespace) && !key.contains([':', '\r', '\n'])
}

#[derive(Debug, Error)]
pub enum BagInfoError {
    #[error("failed to read bag-info: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed bag-info line {line}: '{content}'")]
    Malformed { line: usize, content: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BagInfo {
    entries: Vec<(String, Vec<String>)>,
}

impl BagInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value. A new key goes to the end; an existing key keeps its slot.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Append several values for one key.
    pub fn extend_values<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for v in values {
            self.push(key, v);
        }
    }

    /// Replace all values of `key`, keeping its position if it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => *values = vec![value],
            None => self.entries.push((key, vec![value])),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Collect the values of every key equal to `key` ignoring ASCII case.
    pub fn get_ignore_case(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .flat_map(|(_, v)| v.iter().map(String::as_str))
            .collect()
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Append everything from `other`, in `other`'s order.
    pub fn merge(&mut self, other: BagInfo) {
        for (key, values) in other.entries {
            self.extend_values(&key, values);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `bag-info.txt` content.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.entries {
            for value in values {
                out.push_str(key);
                out.push_str(": ");
                // Embedded line breaks would start a new tag on read.
                out.push_str(&value.replace(['\r', '\n'], " "));
                out.push('\n');
            }
        }
        out
    }

    /// Parse `bag-info.txt` content. Lines starting with whitespace continue
    /// the previous value.
    pub fn parse(text: &str) -> Result<Self, BagInfoError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut info = Self::new();
        let mut last: Option<(usize, usize)> = None;

        for (idx, raw) in text.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            if raw.starts_with([' ', '\t']) {
                let Some((entry, value)) = last else {
                    return Err(BagInfoError::Malformed {
                        line: idx + 1,
                        content: raw.to_owned(),
                    });
                };
                let slot = &mut info.entries[entry].1[value];
                slot.push(' ');
                slot.push_str(raw.trim());
                continue;
            }
            let Some((key, value)) = raw.split_once(':') else {
                return Err(BagInfoError::Malformed {
                    line: idx + 1,
                    content: raw.to_owned(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(BagInfoError::Malformed {
                    line: idx + 1,
                    content: raw.to_owned(),
                });
            }
            info.push(key, value.trim());
            let entry = info
                .entries
                .iter()
                .position(|(k, _)| k == key)
                .unwrap_or(info.entries.len() - 1);
            last = Some((entry, info.entries[entry].1.len() - 1));
        }
        Ok(info)
    }

    pub fn read(path: &Path) -> Result<Self, BagInfoError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

impl FromIterator<(String, String)> for BagInfo {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut info = Self::new();
        for (k, v) in iter {
            info.push(k, v);
        }
        info
    }
}

/// Serialized as a JSON object; single values become strings, repeated values arrays.
impl Serialize for BagInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, values) in &self.entries {
            if let [single] = values.as_slice() {
                map.serialize_entry(key, single)?;
            } else {
                map.serialize_entry(key, values)?;
            }
        }
        map.end()
    }
}
