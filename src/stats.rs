//! Aggregate statistics over an episode list.
//!
//! Two renderings exist: the `stats` block stored in each database, and the
//! `statistics` block of the consolidated database's metadata. They share the
//! same aggregates but average durations differently.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::db::models::Episode;
use crate::db::{EpisodeDatabase, WriteOptions};
use crate::duration::{format_hms, parse_clock_secs};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeStats {
    pub total_episodes: usize,
    /// Sum over durations in clock notation only (`HH:MM:SS` / `MM:SS`).
    pub total_duration_secs: u64,
    pub episodes_with_duration: usize,
    pub total_listeners: i64,
    pub episodes_with_listener_data: usize,
    pub breakdown_by_type: BTreeMap<String, usize>,
}

impl EpisodeStats {
    pub fn compute(episodes: &[Episode]) -> Self {
        let mut stats = Self {
            total_episodes: episodes.len(),
            ..Self::default()
        };

        for ep in episodes {
            if let Some(secs) = parse_clock_secs(ep.str_field("duration")) {
                stats.total_duration_secs = stats.total_duration_secs.saturating_add(secs);
                stats.episodes_with_duration += 1;
            }

            if let Some(listeners) = ep.listener_count() {
                stats.total_listeners = stats.total_listeners.saturating_add(listeners);
                stats.episodes_with_listener_data += 1;
            }

            *stats
                .breakdown_by_type
                .entry(ep.episode_type().to_string())
                .or_insert(0) += 1;
        }

        stats
    }

    pub fn total_duration_minutes(&self) -> f64 {
        self.total_duration_secs as f64 / 60.0
    }

    pub fn average_listeners(&self) -> f64 {
        if self.episodes_with_listener_data == 0 {
            0.0
        } else {
            self.total_listeners as f64 / self.episodes_with_listener_data as f64
        }
    }

    /// The `stats` block stored at the top of a database file.
    /// Average duration is over all episodes, not just timed ones.
    pub fn stats_block(&self, timestamp: &str) -> Value {
        let avg_minutes = if self.total_episodes == 0 {
            0.0
        } else {
            self.total_duration_minutes() / self.total_episodes as f64
        };
        json!({
            "total_episodes": self.total_episodes,
            "total_duration_hours": round_to(self.total_duration_minutes() / 60.0, 2),
            "average_duration_minutes": round_to(avg_minutes, 1),
            "total_listeners": self.total_listeners,
            "average_listeners": round_to(self.average_listeners(), 1),
            "episodes_with_listener_data": self.episodes_with_listener_data,
            "breakdown_by_type": self.breakdown_by_type,
            "last_updated": timestamp,
        })
    }

    /// The `statistics` block inside consolidated metadata.
    /// Average duration is over timed episodes only.
    pub fn consolidated_statistics(&self) -> Value {
        let avg_secs = if self.episodes_with_duration == 0 {
            0
        } else {
            self.total_duration_secs / self.episodes_with_duration as u64
        };
        json!({
            "total_episodes": self.total_episodes,
            "total_duration": format_hms(self.total_duration_secs),
            "average_duration": format_hms(avg_secs),
            "total_listeners": self.total_listeners,
            "average_listeners": round_to(self.average_listeners(), 2),
            "episodes_with_listener_data": self.episodes_with_listener_data,
            "breakdown_by_type": self.breakdown_by_type,
        })
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Recompute and store the `stats` block of a database file.
pub fn update_database_stats(path: &Path, opts: &WriteOptions) -> Result<EpisodeStats> {
    let mut database = EpisodeDatabase::open(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let stats = EpisodeStats::compute(&database.episodes);

    if database.is_bare() {
        log::warn!(
            "{} is a bare episode list; stats not stored",
            database.path().display()
        );
        return Ok(stats);
    }

    let timestamp = chrono::Local::now().to_rfc3339();
    database.set_section("stats", stats.stats_block(&timestamp));
    database
        .save(opts)
        .with_context(|| format!("Failed to save {}", database.path().display()))?;

    Ok(stats)
}
