// src/fields.rs
//! Named values produced by one successful fetch of a source.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One field value as the host sees it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl FieldValue {
    /// Text value, or `Null` when the input is missing or blank.
    pub fn text_or_null<S: AsRef<str>>(value: Option<S>) -> Self {
        match value {
            Some(s) if !s.as_ref().trim().is_empty() => Self::Text(s.as_ref().trim().to_string()),
            _ => Self::Null,
        }
    }

    pub fn number_or_null(value: Option<f64>) -> Self {
        value.filter(|v| v.is_finite()).map_or(Self::Null, Self::Number)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

/// Insertion-ordered mapping from field name to value.
///
/// Setting an existing name replaces its value in place and keeps the
/// original position, so adapters can seed defaults and overwrite them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    entries: Vec<(String, FieldValue)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        for (k, v) in iter {
            set.set(k, v);
        }
        set
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_keeps_insertion_order_and_overwrites_in_place() {
        let mut fs = FieldSet::new()
            .with("content", "Carpe diem")
            .with("author", "Horace");
        fs.set("content", "Memento mori");

        let names: Vec<&str> = fs.names().collect();
        assert_eq!(names, vec!["content", "author"]);
        assert_eq!(fs.get("content"), Some(&FieldValue::from("Memento mori")));
    }

    #[test]
    fn blank_text_becomes_null() {
        assert_eq!(FieldValue::text_or_null(Some("   ")), FieldValue::Null);
        assert_eq!(FieldValue::text_or_null(None::<&str>), FieldValue::Null);
        assert_eq!(
            FieldValue::text_or_null(Some(" Li Bai ")),
            FieldValue::Text("Li Bai".into())
        );
    }

    #[test]
    fn serializes_as_ordered_json_object() {
        let fs = FieldSet::new()
            .with("price_92", 7.41)
            .with("province", "zhejiang")
            .with("trend", FieldValue::Null);
        let json = serde_json::to_string(&fs).unwrap();
        assert_eq!(json, r#"{"price_92":7.41,"province":"zhejiang","trend":null}"#);
    }
}
