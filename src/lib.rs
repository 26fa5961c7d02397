pub mod config;
pub mod db;
pub mod dedup;
pub mod duration;
pub mod reconcile;
pub mod stats;

/// Application name for XDG paths
pub const APP_NAME: &str = "podarchive";

/// Where the databases live when nothing else is configured, relative to
/// the working directory.
pub const DEFAULT_DATA_DIR: &str = "shared";
