//! Operations across the two databases.
//!
//! Each operation has its own semantics:
//!
//! * [`find_overlap`] only reports shared `space_url`s.
//! * [`prune_second`] drops from the second database every record the first
//!   already has.
//! * [`consolidate`] unions both into a new file and leaves the inputs alone.
//! * [`check_overlap`] is a fuzzy, print-only view for manual review.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::config::PodcastConfig;
use crate::db::models::{Episode, OverlapPair, OverlapReport, RemovedEpisode, RemovedReport};
use crate::db::{self, EpisodeDatabase, WriteOptions};
use crate::stats::EpisodeStats;

/// Episode type the fuzzy check looks at unless told otherwise.
pub const DEFAULT_OVERLAP_TYPE: &str = "co-hosted";

/// Minimum title similarity for a fuzzy match (exclusive).
pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.85;

/// Pair each first-database record with the first second-database record
/// sharing its exact `space_url`.
pub fn find_overlap(first: &[Episode], second: &[Episode]) -> OverlapReport {
    let mut duplicates = Vec::new();

    for ep in first {
        let Some(url) = ep.space_url() else {
            continue;
        };
        let Some(other) = second.iter().find(|s| s.space_url() == Some(url)) else {
            continue;
        };
        duplicates.push(OverlapPair {
            space_url: url.to_string(),
            title_hosted: ep.field_or_na("title"),
            title_spoken: other.field_or_na("title"),
            date_hosted: ep.field_or_na("date"),
            date_spoken: other.field_or_na("date"),
            number_hosted: ep.field_or_na("number"),
            number_spoken: other.field_or_na("number"),
            listeners_hosted: ep.field_or_na("listeners"),
            listeners_spoken: other.field_or_na("listeners"),
            host_hosted: ep.field_or_na("host"),
            host_spoken: other.field_or_na("host"),
        });
    }

    OverlapReport {
        total_duplicates: duplicates.len(),
        duplicates,
    }
}

#[derive(Debug)]
pub struct PruneOutcome {
    /// Distinct URLs in the first database.
    pub first_urls: usize,
    pub before: usize,
    /// Second-database records that survive, in their original order.
    pub kept: Vec<Episode>,
    pub removed: Vec<RemovedEpisode>,
}

impl PruneOutcome {
    pub fn report(&self) -> RemovedReport {
        RemovedReport {
            total_removed: self.removed.len(),
            duplicates_removed: self.removed.clone(),
        }
    }
}

/// Remove from `second` every record whose `space_url` also appears in `first`.
pub fn prune_second(first: &[Episode], second: Vec<Episode>) -> PruneOutcome {
    let first_urls: HashSet<&str> = first.iter().filter_map(Episode::space_url).collect();
    let before = second.len();

    let mut kept = Vec::with_capacity(second.len());
    let mut removed = Vec::new();
    for ep in second {
        match ep.space_url() {
            Some(url) if first_urls.contains(url) => {
                log::debug!("Pruning {url}");
                removed.push(RemovedEpisode {
                    title: ep.field_or_na("title"),
                    space_url: url.to_string(),
                    date: ep.field_or_na("date"),
                    host: ep.field_or_na("host"),
                });
            }
            _ => kept.push(ep),
        }
    }

    PruneOutcome {
        first_urls: first_urls.len(),
        before,
        kept,
        removed,
    }
}

#[derive(Debug)]
pub struct ConsolidateOutcome {
    /// Union of both databases, newest first.
    pub episodes: Vec<Episode>,
    /// Distinct records contributed by the first database.
    pub from_first: usize,
    pub added_from_second: usize,
    pub stats: EpisodeStats,
}

/// Key for a record in the consolidated file.
fn consolidation_key(ep: &Episode) -> String {
    match ep.space_url() {
        Some(url) => url.to_string(),
        None => format!(
            "{}_{}_{}",
            ep.display_text("date"),
            ep.display_text("title"),
            ep.display_text("number")
        ),
    }
}

/// Sort key for consolidation; anything that isn't `YYYY-MM-DD` sorts as 1900-01-01.
fn parsed_date(ep: &Episode) -> NaiveDate {
    let fallback = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN);
    NaiveDate::parse_from_str(ep.date(), "%Y-%m-%d").unwrap_or(fallback)
}

/// Union both databases, first database winning on shared keys.
///
/// Within the first database a repeated `space_url` replaces the earlier
/// record but keeps its slot; repeated URL-less keys keep the earlier one.
pub fn consolidate(first: &[Episode], second: &[Episode]) -> ConsolidateOutcome {
    let mut episodes: Vec<Episode> = Vec::with_capacity(first.len() + second.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for ep in first {
        let key = consolidation_key(ep);
        match index.get(&key) {
            Some(&i) if ep.space_url().is_some() => episodes[i] = ep.clone(),
            Some(_) => {}
            None => {
                index.insert(key, episodes.len());
                episodes.push(ep.clone());
            }
        }
    }
    let from_first = episodes.len();

    let mut added_from_second = 0;
    for ep in second {
        let key = consolidation_key(ep);
        if index.contains_key(&key) {
            continue;
        }
        index.insert(key, episodes.len());
        episodes.push(ep.clone());
        added_from_second += 1;
    }

    episodes.sort_by(|a, b| parsed_date(b).cmp(&parsed_date(a)));
    let stats = EpisodeStats::compute(&episodes);

    ConsolidateOutcome {
        episodes,
        from_first,
        added_from_second,
        stats,
    }
}

/// The full consolidated file: podcast metadata, statistics, episodes.
pub fn consolidated_document(
    outcome: &ConsolidateOutcome,
    podcast: &PodcastConfig,
    today: &str,
) -> Value {
    json!({
        "metadata": {
            "podcast_name": podcast.name,
            "description": podcast.description,
            "host": podcast.host,
            "language": podcast.language,
            "categories": podcast.categories,
            "website": podcast.website,
            "twitter": podcast.twitter,
            "last_updated": today,
            "total_episodes": outcome.episodes.len(),
            "statistics": outcome.stats.consolidated_statistics(),
        },
        "episodes": outcome.episodes,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchReason {
    SpaceUrl,
    Title(f64),
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpaceUrl => write!(f, "Space URL Match"),
            Self::Title(ratio) => write!(f, "Title Match ({ratio:.2})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlapMatch {
    pub reason: MatchReason,
    pub first_title: String,
    pub first_date: String,
    pub second_title: String,
    pub second_date: String,
}

impl OverlapMatch {
    fn new(reason: MatchReason, first: &Episode, second: &Episode) -> Self {
        Self {
            reason,
            first_title: first.display_text("title").into_owned(),
            first_date: first.display_text("date").into_owned(),
            second_title: second.display_text("title").into_owned(),
            second_date: second.display_text("date").into_owned(),
        }
    }
}

/// `2 * matches / (len_a + len_b)` over characters, matches taken from a
/// longest-common-subsequence diff.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    f64::from(similar::TextDiff::from_chars(a, b).ratio())
}

fn loose_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// Fuzzy overlap between `first` (optionally filtered by `type`) and `second`.
///
/// A record matches on its whitespace- and slash-trimmed URL first. Failing
/// that, it matches the first `second` record whose title similarity is
/// strictly above `threshold`. Empty titles never match by title.
pub fn check_overlap(
    first: &[Episode],
    second: &[Episode],
    type_filter: Option<&str>,
    threshold: f64,
) -> Vec<OverlapMatch> {
    // Later records win a shared URL
    let mut second_by_url: HashMap<&str, &Episode> = HashMap::new();
    for ep in second {
        if let Some(url) = ep.space_url() {
            second_by_url.insert(loose_url(url), ep);
        }
    }

    let candidates = first
        .iter()
        .filter(|ep| type_filter.is_none_or(|t| ep.str_field("type") == t));

    let mut matches = Vec::new();
    for ep in candidates {
        if let Some(other) = ep
            .space_url()
            .and_then(|url| second_by_url.get(loose_url(url)))
        {
            matches.push(OverlapMatch::new(MatchReason::SpaceUrl, ep, other));
            continue;
        }

        let title = ep.title();
        if title.is_empty() {
            continue;
        }
        for other in second {
            if other.title().is_empty() {
                continue;
            }
            let ratio = title_similarity(title, other.title());
            if ratio > threshold {
                matches.push(OverlapMatch::new(MatchReason::Title(ratio), ep, other));
                break;
            }
        }
    }

    matches
}

fn load(path: &Path) -> Result<EpisodeDatabase> {
    EpisodeDatabase::open(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Write the shared-URL report. Neither database is touched.
pub fn write_overlap_report(
    first_path: &Path,
    second_path: &Path,
    report_path: &Path,
    opts: &WriteOptions,
) -> Result<OverlapReport> {
    let first = load(first_path)?;
    let second = load(second_path)?;

    let report = find_overlap(&first.episodes, &second.episodes);
    log::info!("{} records share a space_url", report.total_duplicates);

    db::write_json(report_path, &report, opts)
        .with_context(|| format!("Failed to write report {}", report_path.display()))?;
    Ok(report)
}

/// Prune the second database against the first and write the removal report.
/// With `dry_run` nothing is written.
pub fn prune_database(
    first_path: &Path,
    second_path: &Path,
    report_path: &Path,
    dry_run: bool,
    opts: &WriteOptions,
) -> Result<PruneOutcome> {
    let first = load(first_path)?;
    let mut second = load(second_path)?;

    let episodes = std::mem::take(&mut second.episodes);
    let outcome = prune_second(&first.episodes, episodes);
    log::info!(
        "{}: {} episodes before, {} after",
        second_path.display(),
        outcome.before,
        outcome.kept.len()
    );

    if dry_run {
        return Ok(outcome);
    }

    second.episodes = outcome.kept.clone();
    second.touch_metadata(&db::today());
    second
        .save(opts)
        .with_context(|| format!("Failed to save {}", second_path.display()))?;

    db::write_json(report_path, &outcome.report(), opts)
        .with_context(|| format!("Failed to write report {}", report_path.display()))?;

    Ok(outcome)
}

/// Consolidate both databases into `out_path`.
pub fn consolidate_databases(
    first_path: &Path,
    second_path: &Path,
    out_path: &Path,
    podcast: &PodcastConfig,
    opts: &WriteOptions,
) -> Result<ConsolidateOutcome> {
    let first = load(first_path)?;
    let second = load(second_path)?;

    let outcome = consolidate(&first.episodes, &second.episodes);
    let document = consolidated_document(&outcome, podcast, &db::today());

    db::write_json(out_path, &document, opts)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    log::info!(
        "Consolidated {} episodes into {}",
        outcome.episodes.len(),
        out_path.display()
    );
    Ok(outcome)
}

pub struct OverlapCheck {
    pub first_total: usize,
    /// First-database records that passed the type filter.
    pub candidates: usize,
    pub second_total: usize,
    pub matches: Vec<OverlapMatch>,
}

pub fn check_overlap_files(
    first_path: &Path,
    second_path: &Path,
    type_filter: Option<&str>,
    threshold: f64,
) -> Result<OverlapCheck> {
    let first = load(first_path)?;
    let second = load(second_path)?;

    let candidates = first
        .episodes
        .iter()
        .filter(|ep| type_filter.is_none_or(|t| ep.str_field("type") == t))
        .count();

    Ok(OverlapCheck {
        first_total: first.episodes.len(),
        candidates,
        second_total: second.episodes.len(),
        matches: check_overlap(&first.episodes, &second.episodes, type_filter, threshold),
    })
}
