//! Game enumeration tables.
//!
//! Each version ships a JSON object of named lists (characters, maps, kick
//! reasons, ...). A list may contain a single `null` placeholder, which shifts
//! the table's valid id window down by one: `["Fire", "Water", null]` accepts
//! ids `-1..=1`.
//!
//! `by_name` numbers only the non-placeholder entries, in order, so for
//! `["Fire", null, "Water"]` the name `Water` maps to `1` even though it sits
//! at list position 2.

use crate::error::{ProtocolError, Result};
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};

/// One ordered enumeration with an optional placeholder slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTable {
    by_id: Vec<Option<String>>,
    by_name: HashMap<String, i64>,
    default: i64,
}

impl EnumTable {
    pub fn new(by_id: Vec<Option<String>>) -> Self {
        let default = if by_id.iter().any(Option::is_none) { -1 } else { 0 };
        let by_name = by_id
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as i64))
            .collect();
        Self {
            by_id,
            by_name,
            default,
        }
    }

    /// Parse one `["Name", null, ...]` list; `name` only labels errors
    pub fn from_json(name: &str, list: &Json) -> Result<Self> {
        let items = list
            .as_array()
            .ok_or_else(|| ProtocolError::Schema(format!("enum `{name}` must be an array")))?;
        let mut by_id = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Json::Null => by_id.push(None),
                Json::String(s) => by_id.push(Some(s.clone())),
                other => {
                    return Err(ProtocolError::Schema(format!(
                        "enum `{name}` contains a non-string entry: {other}"
                    )))
                }
            }
        }
        Ok(Self::new(by_id))
    }

    /// Offset of the first valid id: `-1` if the list has a placeholder, else `0`
    pub fn default(&self) -> i64 {
        self.default
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// `default <= id < len + default`
    pub fn has_id(&self, id: i64) -> bool {
        id >= self.default && id < self.by_id.len() as i64 + self.default
    }

    /// Raw list entry at `index`; `Some(None)` is the placeholder
    pub fn by_id(&self, index: usize) -> Option<Option<&str>> {
        self.by_id.get(index).map(Option::as_deref)
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    pub fn entries(&self) -> &[Option<String>] {
        &self.by_id
    }
}

/// Every enumeration of one protocol version, keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumSet {
    tables: BTreeMap<String, EnumTable>,
}

impl EnumSet {
    /// Parse `{ "<table>": ["Name", null, ...], ... }`.
    pub fn from_json(json: &Json) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| ProtocolError::Schema("enum definitions must be an object".into()))?;
        let mut tables = BTreeMap::new();
        for (name, list) in object {
            tables.insert(name.clone(), EnumTable::from_json(name, list)?);
        }
        Ok(Self { tables })
    }

    pub fn get(&self, name: &str) -> Option<&EnumTable> {
        self.tables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn table(items: &[Option<&str>]) -> EnumTable {
        EnumTable::new(items.iter().map(|i| i.map(str::to_string)).collect())
    }

    #[test]
    fn test_trailing_placeholder() {
        let t = table(&[Some("Fire"), Some("Water"), None]);
        assert_eq!(t.default(), -1);
        assert!(t.has_id(-1));
        assert!(t.has_id(0));
        assert!(t.has_id(1));
        assert!(!t.has_id(2));
        assert!(!t.has_id(-2));
        assert_eq!(t.id_of("Fire"), Some(0));
        assert_eq!(t.id_of("Water"), Some(1));
    }

    #[test]
    fn test_middle_placeholder() {
        let t = table(&[Some("Fire"), None, Some("Water")]);
        assert_eq!(t.default(), -1);
        assert_eq!((-1..=1).filter(|i| t.has_id(*i)).count(), 3);
        assert!(!t.has_id(2));
        // Names count only real entries
        assert_eq!(t.id_of("Water"), Some(1));
        assert_eq!(t.by_id(1), Some(None));
        assert_eq!(t.by_id(2), Some(Some("Water")));
    }

    #[test]
    fn test_without_placeholder() {
        let t = table(&[Some("A"), Some("B")]);
        assert_eq!(t.default(), 0);
        assert!(t.has_id(0) && t.has_id(1));
        assert!(!t.has_id(-1) && !t.has_id(2));
        assert_eq!(t.id_of("missing"), None);
    }

    #[test]
    fn test_enum_set_from_json() {
        let set = EnumSet::from_json(&json!({ "maps": ["Hills", null], "chars": ["Exe"] })).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("maps").unwrap().default(), -1);
        assert!(EnumSet::from_json(&json!({ "bad": [1] })).is_err());
        assert!(EnumSet::from_json(&json!([])).is_err());
    }
}
