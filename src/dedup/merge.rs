//! Field-level merge of two records that describe the same event.
//!
//! The earlier record is the base; the later one can only replace a field
//! when it carries strictly "more" of it. List fields are unioned.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::db::models::Episode;

/// Fields where the longer text is taken to be the more complete one.
const LONGER_TEXT_FIELDS: [&str; 3] = ["title", "description", "duration"];

/// Per-database merge behaviour.
///
/// The two databases grew different rule sets (different list fields, and
/// only the hosted one has numbering collisions and a placeholder host),
/// so each carries its own.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct MergeRules {
    /// List fields merged as a sorted set union.
    pub union_fields: Vec<String>,
    /// Marker found in `number` values created by an import collision.
    /// A number without it is preferred.
    pub collision_marker: Option<String>,
    /// Generic host value that any more specific host overrides.
    pub placeholder_host: Option<String>,
}

impl MergeRules {
    /// Rules for the hosted / co-hosted database.
    pub fn hosted() -> Self {
        Self {
            union_fields: to_strings(&["guests", "topics", "cohosts", "flyers"]),
            collision_marker: Some("-S7".to_string()),
            placeholder_host: Some("BandaWeb3".to_string()),
        }
    }

    /// Rules for the Spoken database.
    pub fn spoken() -> Self {
        Self {
            union_fields: to_strings(&["guests", "topics", "speakers"]),
            collision_marker: None,
            placeholder_host: None,
        }
    }
}

fn to_strings(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

/// Merge `later` into `earlier`, returning the combined record.
pub fn merge_pair(earlier: &Episode, later: &Episode, rules: &MergeRules) -> Episode {
    let mut merged = earlier.clone();

    for field in LONGER_TEXT_FIELDS {
        if later.text_len(field) > earlier.text_len(field) {
            if let Some(v) = later.get(field) {
                merged.set(field, v.clone());
            }
        }
    }

    // Only overwrite when strictly larger: the earlier raw value (which may be
    // a numeric string) is kept otherwise.
    let later_listeners = later.listeners();
    if later_listeners > earlier.listeners() {
        merged.set("listeners", later_listeners);
    }

    if let Some(marker) = rules.collision_marker.as_deref().filter(|m| !m.is_empty()) {
        if earlier.display_text("number").contains(marker)
            && !later.display_text("number").contains(marker)
        {
            if let Some(v) = later.get("number") {
                merged.set("number", v.clone());
            }
        }
    }

    for field in &rules.union_fields {
        if earlier.contains(field) || later.contains(field) {
            let union = sorted_union(earlier.list_field(field), later.list_field(field));
            merged.set(field, Value::Array(union));
        }
    }

    if let Some(placeholder) = rules.placeholder_host.as_deref().filter(|p| !p.is_empty()) {
        let later_host = later.host();
        if !later_host.is_empty() && later_host != placeholder && earlier.host() == placeholder {
            merged.set("host", later_host);
        }
    }

    merged
}

/// Fold a whole group left to right. `None` for an empty slice.
pub fn merge_all(records: &[Episode], rules: &MergeRules) -> Option<Episode> {
    let (first, rest) = records.split_first()?;
    Some(
        rest.iter()
            .fold(first.clone(), |merged, next| merge_pair(&merged, next, rules)),
    )
}

/// Set union of two lists, sorted. Strings sort by content; any other
/// values sort after them by their JSON text.
fn sorted_union(a: &[Value], b: &[Value]) -> Vec<Value> {
    let mut items: BTreeMap<(u8, String), Value> = BTreeMap::new();
    for v in a.iter().chain(b) {
        let key = match v {
            Value::String(s) => (0, s.clone()),
            other => (1, other.to_string()),
        };
        items.entry(key).or_insert_with(|| v.clone());
    }
    items.into_values().collect()
}
