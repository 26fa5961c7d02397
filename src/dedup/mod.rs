pub mod merge;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::db::models::{Episode, MergeReport, MergedGroup};
use crate::db::{self, EpisodeDatabase, WriteOptions};

pub use merge::{merge_all, merge_pair, MergeRules};

/// Records partitioned by `space_url`.
///
/// Groups keep first-occurrence order, and records inside a group keep
/// input order. Records without a URL are never grouped with each other.
#[derive(Debug, Default)]
pub struct EpisodeGroups {
    groups: Vec<(String, Vec<Episode>)>,
    index: HashMap<String, usize>,
    pub without_url: Vec<Episode>,
}

impl EpisodeGroups {
    /// Number of distinct URLs.
    pub fn url_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of URLs shared by more than one record.
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().filter(|(_, eps)| eps.len() > 1).count()
    }

    pub fn into_parts(self) -> (Vec<(String, Vec<Episode>)>, Vec<Episode>) {
        (self.groups, self.without_url)
    }
}

/// Grouping key for a URL. Only a trailing slash is ever normalized.
pub fn group_key(space_url: &str, trim_trailing_slash: bool) -> &str {
    if trim_trailing_slash {
        space_url.trim_end_matches('/')
    } else {
        space_url
    }
}

pub fn group_by_space_url(episodes: Vec<Episode>, trim_trailing_slash: bool) -> EpisodeGroups {
    let mut out = EpisodeGroups::default();
    for ep in episodes {
        let key = ep
            .space_url()
            .map(|url| group_key(url, trim_trailing_slash).to_string())
            .filter(|k| !k.is_empty());
        match key {
            Some(key) => match out.index.get(&key) {
                Some(&i) => out.groups[i].1.push(ep),
                None => {
                    out.index.insert(key.clone(), out.groups.len());
                    out.groups.push((key, vec![ep]));
                }
            },
            None => out.without_url.push(ep),
        }
    }
    out
}

/// A group that was collapsed, with the records it came from.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub space_url: String,
    pub members: Vec<Episode>,
    pub merged: Episode,
}

#[derive(Debug)]
pub struct DedupOutcome {
    pub before: usize,
    /// Final record list, sorted newest first.
    pub episodes: Vec<Episode>,
    pub duplicates: Vec<DuplicateGroup>,
}

impl DedupOutcome {
    pub fn after(&self) -> usize {
        self.episodes.len()
    }

    pub fn report(&self) -> MergeReport {
        let duplicates_merged: Vec<MergedGroup> = self
            .duplicates
            .iter()
            .map(|g| MergedGroup {
                space_url: g.space_url.clone(),
                title: g.merged.field_or_null("title"),
                count: g.members.len(),
                numbers: g.members.iter().map(|m| m.field_or_null("number")).collect(),
            })
            .collect();
        MergeReport {
            total_merged: duplicates_merged.len(),
            duplicates_merged,
        }
    }
}

/// Group, merge, and sort one database's records.
pub fn dedupe_episodes(
    episodes: Vec<Episode>,
    rules: &MergeRules,
    trim_trailing_slash: bool,
) -> DedupOutcome {
    let before = episodes.len();
    let grouped = group_by_space_url(episodes, trim_trailing_slash);
    log::debug!(
        "{} distinct URLs ({} shared), {} records without a URL",
        grouped.url_count(),
        grouped.duplicate_count(),
        grouped.without_url.len()
    );
    let (groups, without_url) = grouped.into_parts();

    let mut unique = Vec::with_capacity(groups.len() + without_url.len());
    let mut duplicates = Vec::new();

    for (space_url, members) in groups {
        if members.len() == 1 {
            unique.extend(members);
            continue;
        }
        let Some(merged) = merge_all(&members, rules) else {
            continue;
        };
        log::info!(
            "Merging {} duplicates: {}",
            members.len(),
            members[0].display_text("title")
        );
        unique.push(merged.clone());
        duplicates.push(DuplicateGroup {
            space_url,
            members,
            merged,
        });
    }

    unique.extend(without_url);
    sort_by_date_desc(&mut unique);

    DedupOutcome {
        before,
        episodes: unique,
        duplicates,
    }
}

/// Stable sort, newest first. Plain string comparison on `date`; records
/// without a date end up last.
pub fn sort_by_date_desc(episodes: &mut [Episode]) {
    episodes.sort_by(|a, b| b.date().cmp(a.date()));
}

/// Deduplicate a database file in place and write the merge report.
/// With `dry_run` nothing is written.
pub fn dedupe_database(
    path: &Path,
    report_path: &Path,
    rules: &MergeRules,
    trim_trailing_slash: bool,
    dry_run: bool,
    opts: &WriteOptions,
) -> Result<DedupOutcome> {
    let mut database = EpisodeDatabase::open(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let episodes = std::mem::take(&mut database.episodes);
    let outcome = dedupe_episodes(episodes, rules, trim_trailing_slash);
    log::info!(
        "{}: {} episodes before, {} after, {} groups merged",
        path.display(),
        outcome.before,
        outcome.after(),
        outcome.duplicates.len()
    );

    if dry_run {
        return Ok(outcome);
    }

    database.episodes = outcome.episodes.clone();
    database.touch_metadata(&db::today());
    database
        .save(opts)
        .with_context(|| format!("Failed to save {}", path.display()))?;

    db::write_json(report_path, &outcome.report(), opts)
        .with_context(|| format!("Failed to write report {}", report_path.display()))?;

    Ok(outcome)
}

/// Rewrite a database sorted newest first. Returns the record count.
pub fn sort_database(path: &Path, opts: &WriteOptions) -> Result<usize> {
    let mut database = EpisodeDatabase::open(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    sort_by_date_desc(&mut database.episodes);
    database
        .save(opts)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    Ok(database.episodes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn make_episode(v: Value) -> Episode {
        serde_json::from_value(v).unwrap()
    }

    fn make_ep(url: &str, title: &str, date: &str) -> Episode {
        make_episode(json!({"space_url": url, "title": title, "date": date}))
    }

    fn sample() -> Vec<Episode> {
        vec![
            make_episode(json!({"number": "001", "space_url": "u1", "title": "One", "date": "2024-01-05", "listeners": 10})),
            make_episode(json!({"number": "002", "space_url": "u2", "title": "Two", "date": "2024-02-01"})),
            make_episode(json!({"number": "003", "title": "No url", "date": ""})),
            make_episode(json!({"number": "001-S7", "space_url": "u1", "title": "One, longer", "date": "2024-01-05", "listeners": 40})),
            make_episode(json!({"number": "004", "title": "No url", "date": "2024-03-01"})),
            make_episode(json!({"number": "005", "space_url": "u3", "title": "Three", "date": "2023-12-31"})),
            make_episode(json!({"number": "006", "space_url": "u1", "title": "1", "date": "2024-01-05"})),
        ]
    }

    #[test]
    fn test_grouping_preserves_order() {
        let groups = group_by_space_url(sample(), false);
        assert_eq!(groups.duplicate_count(), 1);
        assert_eq!(groups.url_count(), 3);

        let (groups, without_url) = groups.into_parts();
        let urls: Vec<&str> = groups.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(urls, vec!["u1", "u2", "u3"]);

        let u1: Vec<&str> = groups[0].1.iter().map(|e| e.str_field("number")).collect();
        assert_eq!(u1, vec!["001", "001-S7", "006"]);

        assert_eq!(without_url.len(), 2);
    }

    #[test]
    fn test_url_less_records_never_grouped() {
        let eps = vec![
            make_ep("", "Same", "2024-01-01"),
            make_ep("", "Same", "2024-01-01"),
        ];
        let outcome = dedupe_episodes(eps, &MergeRules::hosted(), false);
        assert_eq!(outcome.after(), 2);
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn test_exact_url_match_only() {
        let eps = vec![
            make_ep("https://x.com/i/spaces/abc", "Same title", "2024-01-01"),
            make_ep("https://x.com/i/spaces/xyz", "Same title", "2024-01-01"),
            make_ep("https://X.com/i/spaces/abc", "Same title", "2024-01-01"),
            make_ep("https://x.com/i/spaces/abc?s=20", "Same title", "2024-01-01"),
        ];
        let outcome = dedupe_episodes(eps, &MergeRules::hosted(), false);
        assert_eq!(outcome.after(), 4);
        assert_eq!(outcome.report().total_merged, 0);
    }

    #[test]
    fn test_trailing_slash_trim_is_optional() {
        let eps = || {
            vec![
                make_ep("https://x.com/i/spaces/abc/", "a", "2024-01-01"),
                make_ep("https://x.com/i/spaces/abc", "b", "2024-01-01"),
            ]
        };
        assert_eq!(dedupe_episodes(eps(), &MergeRules::hosted(), false).after(), 2);

        let outcome = dedupe_episodes(eps(), &MergeRules::hosted(), true);
        assert_eq!(outcome.after(), 1);
        assert_eq!(outcome.duplicates[0].space_url, "https://x.com/i/spaces/abc");
        // Records themselves are not rewritten
        assert_eq!(
            outcome.episodes[0].space_url(),
            Some("https://x.com/i/spaces/abc/")
        );
    }

    #[test]
    fn test_dedupe_merges_and_reports() {
        let outcome = dedupe_episodes(sample(), &MergeRules::hosted(), false);
        assert_eq!(outcome.before, 7);
        assert_eq!(outcome.after(), 5);

        let report = outcome.report();
        assert_eq!(report.total_merged, 1);
        let group = &report.duplicates_merged[0];
        assert_eq!(group.space_url, "u1");
        assert_eq!(group.title, json!("One, longer"));
        assert_eq!(group.count, 3);
        assert_eq!(group.numbers, vec![json!("001"), json!("001-S7"), json!("006")]);

        let merged = outcome.episodes.iter().find(|e| e.space_url() == Some("u1")).unwrap();
        assert_eq!(merged.listeners(), 40);
        assert_eq!(merged.str_field("number"), "001");
    }

    #[test]
    fn test_report_completeness() {
        let eps = vec![
            make_ep("a", "1", "2024-01-01"),
            make_ep("a", "2", "2024-01-01"),
            make_ep("b", "3", "2024-01-01"),
            make_ep("c", "4", "2024-01-01"),
            make_ep("c", "5", "2024-01-01"),
            make_ep("c", "6", "2024-01-01"),
            make_ep("", "7", "2024-01-01"),
        ];
        let expected = group_by_space_url(eps.clone(), false).duplicate_count();
        let outcome = dedupe_episodes(eps, &MergeRules::spoken(), false);
        assert_eq!(outcome.report().total_merged, expected);
        assert_eq!(expected, 2);
    }

    #[test]
    fn test_sort_descending_empty_last() {
        let outcome = dedupe_episodes(sample(), &MergeRules::hosted(), false);
        let dates: Vec<&str> = outcome.episodes.iter().map(|e| e.date()).collect();
        assert_eq!(dates, vec!["2024-03-01", "2024-02-01", "2024-01-05", "2023-12-31", ""]);
        for pair in dates.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_sort_is_stable() {
        let mut eps = vec![
            make_ep("a", "first", "2024-01-01"),
            make_ep("b", "second", "2024-01-01"),
            make_episode(json!({"title": "undated-1"})),
            make_ep("c", "third", "2024-01-01"),
            make_episode(json!({"title": "undated-2", "date": null})),
        ];
        sort_by_date_desc(&mut eps);
        let titles: Vec<&str> = eps.iter().map(|e| e.title()).collect();
        assert_eq!(titles, vec!["first", "second", "third", "undated-1", "undated-2"]);
    }

    #[test]
    fn test_singleton_passthrough_unchanged() {
        let original = make_episode(json!({
            "zeta": true,
            "space_url": "only-one",
            "title": "Solo",
            "listeners": "17",
            "guests": ["b", "a"],
            "date": "2024-05-05"
        }));
        let before = serde_json::to_string(&original).unwrap();

        let mut eps = sample();
        eps.push(original.clone());
        let outcome = dedupe_episodes(eps, &MergeRules::hosted(), false);
        let after = outcome
            .episodes
            .iter()
            .find(|e| e.space_url() == Some("only-one"))
            .unwrap();
        assert_eq!(serde_json::to_string(after).unwrap(), before);
    }

    #[test]
    fn test_idempotent() {
        let rules = MergeRules::hosted();
        let once = dedupe_episodes(sample(), &rules, false);
        let twice = dedupe_episodes(once.episodes.clone(), &rules, false);
        assert!(twice.duplicates.is_empty());
        assert_eq!(twice.episodes, once.episodes);
    }

    #[test]
    fn test_example_no_match() {
        let eps = vec![
            make_episode(json!({"space_url": "https://x.com/i/spaces/abc", "title": "Ep X"})),
            make_episode(json!({"space_url": "https://x.com/i/spaces/xyz", "title": "Ep X"})),
        ];
        let outcome = dedupe_episodes(eps, &MergeRules::hosted(), false);
        assert_eq!(outcome.after(), 2);
    }

    #[test]
    fn test_dedupe_database_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes_database.json");
        let report_path = dir.path().join("episodes_duplicates_merged_report.json");
        let doc = json!({
            "metadata": {"podcast_name": "Banda", "total_episodes": 7},
            "episodes": sample(),
        });
        std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

        let opts = WriteOptions::default();
        let outcome = dedupe_database(&path, &report_path, &MergeRules::hosted(), false, false, &opts).unwrap();
        assert_eq!(outcome.after(), 5);

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["episodes"].as_array().unwrap().len(), 5);
        assert_eq!(written["metadata"]["total_episodes"], json!(5));
        assert_eq!(written["metadata"]["podcast_name"], json!("Banda"));

        let report: MergeReport =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(report.total_merged, 1);
        assert_eq!(report.duplicates_merged[0].count, 3);
    }

    #[test]
    fn test_dedupe_database_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spoken_database.json");
        let report_path = dir.path().join("report.json");
        let contents = serde_json::to_string(&json!({"episodes": sample()})).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let outcome = dedupe_database(
            &path,
            &report_path,
            &MergeRules::spoken(),
            false,
            true,
            &WriteOptions::default(),
        )
        .unwrap();
        assert_eq!(outcome.duplicates.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
        assert!(!report_path.exists());
    }

    #[test]
    fn test_sort_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spoken_database.json");
        let doc = json!({"episodes": [
            {"title": "old", "date": "2023-01-01"},
            {"title": "none"},
            {"title": "new", "date": "2025-01-01"}
        ]});
        std::fs::write(&path, doc.to_string()).unwrap();

        let count = sort_database(&path, &WriteOptions { indent: 4, atomic: true }).unwrap();
        assert_eq!(count, 3);
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let titles: Vec<&str> = written["episodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["new", "old", "none"]);
    }
}
