use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::db::WriteOptions;
use crate::dedup::MergeRules;

/// Which of the two episode databases an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    /// Hosted and co-hosted episodes (`episodes_database.json`).
    Hosted,
    /// Episodes from the Spoken platform (`spoken_database.json`).
    Spoken,
}

impl DatabaseKind {
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Hosted => "episodes_database.json",
            Self::Spoken => "spoken_database.json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Spoken => "spoken",
        }
    }
}

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file itself is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the databases and reports (default `./shared`).
    pub data_dir: Option<PathBuf>,
    /// Indentation for written JSON.
    pub indent: usize,
    /// Replace files via temp file + rename instead of writing in place.
    pub atomic_writes: bool,
    pub hosted: DatabaseConfig,
    pub spoken: DatabaseConfig,
    pub consolidated: ConsolidatedConfig,
    pub podcast: PodcastConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            indent: 2,
            atomic_writes: true,
            hosted: DatabaseConfig::default(),
            spoken: DatabaseConfig::default(),
            consolidated: ConsolidatedConfig::default(),
            podcast: PodcastConfig::default(),
        }
    }
}

/// Per-database settings. Relative paths resolve against `data_dir`.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    /// Where the dedup report goes (default: next to the database).
    pub report: Option<PathBuf>,
    /// Treat `.../abc/` and `.../abc` as the same space when grouping.
    pub trim_trailing_slash: bool,
    /// Replaces the built-in rule set for this database entirely.
    pub merge: Option<MergeRules>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ConsolidatedConfig {
    pub path: Option<PathBuf>,
}

/// Podcast-level fields written into the consolidated database's metadata.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PodcastConfig {
    pub name: String,
    pub description: String,
    pub host: String,
    pub language: String,
    pub categories: Vec<String>,
    pub website: String,
    pub twitter: String,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            name: "BandaWeb3 - Consolidated Database".to_string(),
            description: "Base de datos consolidada de todos los episodios de BandaWeb3 (hosted, co-hosted y spoken)".to_string(),
            host: "BandaWeb3".to_string(),
            language: "es".to_string(),
            categories: ["Technology", "Web3", "Blockchain", "Cryptocurrency"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            website: "https://bandaweb3.com".to_string(),
            twitter: "@BandaWeb3".to_string(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/podarchive/config.toml`.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path.
    /// Logs a warning if the file exists but can't be read or parsed.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "Failed to read {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<AppConfig>(contents)
    }

    /// Directory that relative database and report paths resolve against.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn database(&self, kind: DatabaseKind) -> &DatabaseConfig {
        match kind {
            DatabaseKind::Hosted => &self.hosted,
            DatabaseKind::Spoken => &self.spoken,
        }
    }

    pub fn database_path(&self, kind: DatabaseKind) -> PathBuf {
        match &self.database(kind).path {
            Some(p) => self.resolve(p),
            None => self.data_dir().join(kind.default_file_name()),
        }
    }

    pub fn report_path(&self, kind: DatabaseKind) -> PathBuf {
        match &self.database(kind).report {
            Some(p) => self.resolve(p),
            None => default_report_path(&self.database_path(kind)),
        }
    }

    /// Configured merge rules, or the built-in set for that database.
    pub fn merge_rules(&self, kind: DatabaseKind) -> MergeRules {
        match &self.database(kind).merge {
            Some(rules) => rules.clone(),
            None => match kind {
                DatabaseKind::Hosted => MergeRules::hosted(),
                DatabaseKind::Spoken => MergeRules::spoken(),
            },
        }
    }

    pub fn trim_trailing_slash(&self, kind: DatabaseKind) -> bool {
        self.database(kind).trim_trailing_slash
    }

    pub fn consolidated_path(&self) -> PathBuf {
        match &self.consolidated.path {
            Some(p) => self.resolve(p),
            None => self.data_dir().join("consolidated_database.json"),
        }
    }

    /// Cross-database overlap report (report-only reconciliation).
    pub fn overlap_report_path(&self) -> PathBuf {
        self.data_dir().join("duplicates_report.json")
    }

    /// Records pruned from the spoken database.
    pub fn removed_report_path(&self) -> PathBuf {
        self.data_dir().join("duplicates_removed_report.json")
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            indent: self.indent,
            atomic: self.atomic_writes,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Default data directory, relative to the working directory.
pub fn default_data_dir() -> PathBuf {
    PathBuf::from(crate::DEFAULT_DATA_DIR)
}

/// `shared/episodes_database.json` → `shared/episodes_duplicates_merged_report.json`
pub fn default_report_path(db_path: &Path) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "episodes".to_string());
    let base = stem.strip_suffix("_database").unwrap_or(&stem);
    let file_name = format!("{base}_duplicates_merged_report.json");
    match db_path.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(
            config.database_path(DatabaseKind::Hosted),
            PathBuf::from("shared/episodes_database.json")
        );
        assert_eq!(
            config.report_path(DatabaseKind::Spoken),
            PathBuf::from("shared/spoken_duplicates_merged_report.json")
        );
        assert_eq!(
            config.consolidated_path(),
            PathBuf::from("shared/consolidated_database.json")
        );
        assert_eq!(config.merge_rules(DatabaseKind::Hosted), MergeRules::hosted());
        assert_eq!(config.merge_rules(DatabaseKind::Spoken), MergeRules::spoken());
        assert!(config.atomic_writes);
        assert_eq!(config.write_options().indent, 2);
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
            data_dir = "/srv/podcast"
            indent = 4
            atomic_writes = false

            [hosted]
            path = "hosted.json"
            report = "/tmp/hosted_report.json"
            trim_trailing_slash = true

            [spoken.merge]
            union_fields = ["speakers"]

            [podcast]
            name = "Otro Podcast"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir(), PathBuf::from("/srv/podcast"));
        assert_eq!(
            config.database_path(DatabaseKind::Hosted),
            PathBuf::from("/srv/podcast/hosted.json")
        );
        assert_eq!(
            config.report_path(DatabaseKind::Hosted),
            PathBuf::from("/tmp/hosted_report.json")
        );
        assert!(config.trim_trailing_slash(DatabaseKind::Hosted));
        assert!(!config.trim_trailing_slash(DatabaseKind::Spoken));

        let spoken = config.merge_rules(DatabaseKind::Spoken);
        assert_eq!(spoken.union_fields, vec!["speakers".to_string()]);
        assert_eq!(spoken.collision_marker, None);

        assert_eq!(config.podcast.name, "Otro Podcast");
        assert_eq!(config.podcast.host, "BandaWeb3");
        assert!(!config.write_options().atomic);
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(AppConfig::parse("indent = \"wide\"").is_err());
    }

    #[test]
    fn test_load_from_unreadable_falls_back() {
        let config = AppConfig::load_from(Path::new("/definitely/not/here.toml"));
        assert_eq!(config.indent, 2);
    }

    #[test]
    fn test_default_report_path() {
        assert_eq!(
            default_report_path(Path::new("shared/episodes_database.json")),
            PathBuf::from("shared/episodes_duplicates_merged_report.json")
        );
        assert_eq!(
            default_report_path(Path::new("archive.json")),
            PathBuf::from("archive_duplicates_merged_report.json")
        );
    }
}
