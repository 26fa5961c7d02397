use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single episode record.
///
/// Records have no fixed schema, so the underlying storage is the raw JSON
/// object (insertion-ordered). Unknown fields and field order survive a
/// load/save round trip untouched. Typed reads go through the accessors
/// below, which apply the same defaults everywhere: an absent field never
/// errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Episode(Map<String, Value>);

impl Episode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True if the key is present, even when its value is null.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a field. Existing keys keep their position in the object.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// String value of a field, or `""` when absent, null, or not a string.
    pub fn str_field(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Textual form of a field: strings as-is, null/absent as empty,
    /// anything else as its JSON text (`120`, `true`, ...).
    pub fn display_text(&self, key: &str) -> Cow<'_, str> {
        match self.0.get(key) {
            // null reads as empty, not as the word "null", so any non-empty
            // later value beats it in the longer-text merge rule
            None | Some(Value::Null) => Cow::Borrowed(""),
            Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
            Some(other) => Cow::Owned(other.to_string()),
        }
    }

    /// Length in characters of [`display_text`](Self::display_text).
    pub fn text_len(&self, key: &str) -> usize {
        self.display_text(key).chars().count()
    }

    /// The canonical identifying URL, if present and non-empty.
    pub fn space_url(&self) -> Option<&str> {
        Some(self.str_field("space_url")).filter(|u| !u.is_empty())
    }

    pub fn title(&self) -> &str {
        self.str_field("title")
    }

    pub fn date(&self) -> &str {
        self.str_field("date")
    }

    pub fn host(&self) -> &str {
        self.str_field("host")
    }

    /// Episode type, `"unknown"` when missing.
    pub fn episode_type(&self) -> &str {
        match self.0.get("type").and_then(Value::as_str) {
            Some(t) => t,
            None => "unknown",
        }
    }

    /// Listener count if the field holds something integer-like.
    ///
    /// Numbers truncate toward zero, strings parse after trimming, booleans
    /// count as 0/1. Empty strings, lists, objects and null yield `None`.
    pub fn listener_count(&self) -> Option<i64> {
        match self.0.get("listeners")? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Listener count with parse failures coerced to 0.
    pub fn listeners(&self) -> i64 {
        self.listener_count().unwrap_or(0)
    }

    /// Contents of a list field; empty when absent or not a list.
    pub fn list_field(&self, key: &str) -> &[Value] {
        match self.0.get(key) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// Field value for a report, `"N/A"` when the key is absent.
    pub fn field_or_na(&self, key: &str) -> Value {
        self.0
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::from("N/A"))
    }

    /// Field value for a report, null when the key is absent.
    pub fn field_or_null(&self, key: &str) -> Value {
        self.0.get(key).cloned().unwrap_or(Value::Null)
    }
}

impl From<Map<String, Value>> for Episode {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One collapsed group in the merge report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedGroup {
    pub space_url: String,
    pub title: Value,
    pub count: usize,
    pub numbers: Vec<Value>,
}

/// Side-channel report written after a dedup pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub total_merged: usize,
    pub duplicates_merged: Vec<MergedGroup>,
}

/// A record present in both databases under the same `space_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapPair {
    pub space_url: String,
    #[serde(rename = "title_episodes")]
    pub title_hosted: Value,
    pub title_spoken: Value,
    #[serde(rename = "date_episodes")]
    pub date_hosted: Value,
    pub date_spoken: Value,
    #[serde(rename = "number_episodes")]
    pub number_hosted: Value,
    pub number_spoken: Value,
    #[serde(rename = "listeners_episodes")]
    pub listeners_hosted: Value,
    pub listeners_spoken: Value,
    #[serde(rename = "host_episodes")]
    pub host_hosted: Value,
    pub host_spoken: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlapReport {
    pub total_duplicates: usize,
    pub duplicates: Vec<OverlapPair>,
}

/// A record dropped from the second database because the first already has it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedEpisode {
    pub title: Value,
    pub space_url: String,
    pub date: Value,
    pub host: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovedReport {
    pub total_removed: usize,
    pub duplicates_removed: Vec<RemovedEpisode>,
}
