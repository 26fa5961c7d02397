pub mod models;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use thiserror::Error;

use models::Episode;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed database {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, DbError>;

/// How JSON files are written back to disk.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Spaces per indentation level.
    pub indent: usize,
    /// Write to a temp file in the same directory and rename over the target.
    /// When false the target is truncated and written in place.
    pub atomic: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            indent: 2,
            atomic: true,
        }
    }
}

/// One JSON episode database on disk.
///
/// The top-level object is kept as-is (`metadata`, `stats`, anything else)
/// and only `episodes` is lifted out for editing. A bare top-level array is
/// accepted too and saved back in the same shape.
#[derive(Debug)]
pub struct EpisodeDatabase {
    path: PathBuf,
    /// `None` when the file is a bare array of episodes.
    root: Option<Map<String, Value>>,
    pub episodes: Vec<Episode>,
}

impl EpisodeDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| DbError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&contents).map_err(|source| DbError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self::from_value(path, value)?;
        log::debug!("Loaded {} episodes from {}", db.episodes.len(), path.display());
        Ok(db)
    }

    /// Build a database from an already-parsed JSON document.
    pub fn from_value(path: &Path, value: Value) -> Result<Self> {
        let malformed = |message: String| DbError::Malformed {
            path: path.to_path_buf(),
            message,
        };

        let (root, raw_episodes) = match value {
            Value::Object(mut map) => {
                // Take the value but leave the key, so it keeps its position on save
                let raw = match map.get_mut("episodes").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => {
                        return Err(malformed(format!(
                            "`episodes` must be an array, found {}",
                            json_kind(&other)
                        )));
                    }
                };
                (Some(map), raw)
            }
            Value::Array(items) => (None, items),
            other => {
                return Err(malformed(format!(
                    "expected an object or array at top level, found {}",
                    json_kind(&other)
                )));
            }
        };

        let mut episodes = Vec::with_capacity(raw_episodes.len());
        for (i, raw) in raw_episodes.into_iter().enumerate() {
            match raw {
                Value::Object(map) => episodes.push(Episode::from(map)),
                other => {
                    return Err(malformed(format!(
                        "episode #{i} is {}, not an object",
                        json_kind(&other)
                    )));
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            root,
            episodes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file was a bare array (no room for metadata or stats).
    pub fn is_bare(&self) -> bool {
        self.root.is_none()
    }

    #[cfg(test)]
    fn metadata(&self) -> Option<&Map<String, Value>> {
        self.root.as_ref()?.get("metadata")?.as_object()
    }

    /// Refresh `metadata.total_episodes` and `metadata.last_updated`,
    /// only if the file already has a `metadata` object.
    pub fn touch_metadata(&mut self, today: &str) {
        let total = self.episodes.len();
        if let Some(meta) = self
            .root
            .as_mut()
            .and_then(|root| root.get_mut("metadata"))
            .and_then(Value::as_object_mut)
        {
            meta.insert("total_episodes".into(), Value::from(total));
            meta.insert("last_updated".into(), Value::from(today));
        }
    }

    /// Replace a top-level section such as `stats`.
    /// Returns false for bare-array files, which have nowhere to put it.
    pub fn set_section(&mut self, key: &str, value: Value) -> bool {
        match self.root.as_mut() {
            Some(root) => {
                root.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Assemble the full JSON document.
    pub fn to_value(&self) -> Value {
        let episodes: Vec<Value> = self
            .episodes
            .iter()
            .map(|ep| Value::Object(ep.as_map().clone()))
            .collect();
        match &self.root {
            Some(root) => {
                let mut root = root.clone();
                root.insert("episodes".into(), Value::Array(episodes));
                Value::Object(root)
            }
            None => Value::Array(episodes),
        }
    }

    pub fn save(&self, opts: &WriteOptions) -> Result<()> {
        write_json(&self.path, &self.to_value(), opts)?;
        log::info!("Saved {} episodes to {}", self.episodes.len(), self.path.display());
        Ok(())
    }
}

/// Pretty-print a value with the given indent. Non-ASCII text is written
/// literally, not escaped.
pub fn to_pretty_bytes<T: Serialize + ?Sized>(
    value: &T,
    indent: usize,
) -> serde_json::Result<Vec<u8>> {
    let indent_str = " ".repeat(indent);
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent_str.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Write a JSON document to `path`, overwriting whatever is there.
pub fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    opts: &WriteOptions,
) -> Result<()> {
    let bytes = to_pretty_bytes(value, opts.indent).map_err(|source| DbError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let io_err = |source: std::io::Error| DbError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err)?;

    if opts.atomic {
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
    } else {
        std::fs::write(path, &bytes).map_err(io_err)?;
    }
    log::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Today's local date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes_database.json");
        let original = "{\n  \"metadata\": {\n    \"podcast_name\": \"Banda\"\n  },\n  \"episodes\": [\n    {\n      \"title\": \"Señales\",\n      \"number\": \"001\",\n      \"zeta\": 1\n    }\n  ],\n  \"stats\": {}\n}";
        std::fs::write(&path, original).unwrap();

        let db = EpisodeDatabase::open(&path).unwrap();
        assert_eq!(db.episodes.len(), 1);
        db.save(&WriteOptions::default()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, original);
    }

    #[test]
    fn test_bare_array_round_trip() {
        let db = EpisodeDatabase::from_value(
            Path::new("x.json"),
            json!([{"title": "a"}, {"title": "b"}]),
        )
        .unwrap();
        assert!(db.is_bare());
        assert_eq!(db.episodes.len(), 2);
        assert_eq!(db.to_value(), json!([{"title": "a"}, {"title": "b"}]));
    }

    #[test]
    fn test_missing_episodes_key_is_empty() {
        let db = EpisodeDatabase::from_value(Path::new("x.json"), json!({"metadata": {}})).unwrap();
        assert!(db.episodes.is_empty());
        assert_eq!(db.to_value()["episodes"], json!([]));
    }

    #[test]
    fn test_malformed_inputs() {
        let err = EpisodeDatabase::from_value(Path::new("x.json"), json!({"episodes": 3})).unwrap_err();
        assert!(matches!(err, DbError::Malformed { .. }));

        let err = EpisodeDatabase::from_value(Path::new("x.json"), json!({"episodes": [1]})).unwrap_err();
        assert!(err.to_string().contains("episode #0"));

        let err = EpisodeDatabase::from_value(Path::new("x.json"), json!("nope")).unwrap_err();
        assert!(matches!(err, DbError::Malformed { .. }));
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EpisodeDatabase::open(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, DbError::Io { .. }));
    }

    #[test]
    fn test_open_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"episodes\": [").unwrap();
        let err = EpisodeDatabase::open(&path).unwrap_err();
        assert!(matches!(err, DbError::Json { .. }));
    }

    #[test]
    fn test_touch_metadata_only_when_present() {
        let mut db = EpisodeDatabase::from_value(
            Path::new("x.json"),
            json!({"metadata": {"total_episodes": 9}, "episodes": [{}]}),
        )
        .unwrap();
        db.touch_metadata("2025-12-07");
        let meta = db.metadata().unwrap();
        assert_eq!(meta["total_episodes"], json!(1));
        assert_eq!(meta["last_updated"], json!("2025-12-07"));

        let mut db = EpisodeDatabase::from_value(Path::new("x.json"), json!({"episodes": []})).unwrap();
        db.touch_metadata("2025-12-07");
        assert!(db.metadata().is_none());
    }

    #[test]
    fn test_set_section_on_bare_array() {
        let mut db = EpisodeDatabase::from_value(Path::new("x.json"), json!([])).unwrap();
        assert!(!db.set_section("stats", json!({})));
    }

    #[test]
    fn test_indent_and_direct_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let opts = WriteOptions { indent: 4, atomic: false };
        write_json(&path, &json!({"a": ["ñ"]}), &opts).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\n    \"a\": [\n        \"ñ\"\n    ]\n}");
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        write_json(&path, &json!({"total_merged": 0}), &WriteOptions::default()).unwrap();
        assert!(path.exists());
    }
}
