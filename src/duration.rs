use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::db::{EpisodeDatabase, WriteOptions};

static HOURS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:hours|hour|hrs|hr|h)").unwrap());

// "m" alone counts, but not the "m" of "ms"
static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:minutes|minute|mins|min|m)\b").unwrap());

static SECONDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:seconds|second|secs|sec|s)\b").unwrap());

/// Parse strict clock notation: `HH:MM:SS` or `MM:SS`, integer parts only.
pub fn parse_clock_secs(raw: &str) -> Option<u64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let nums: Vec<u64> = parts
        .iter()
        .map(|p| p.trim().parse::<u64>().ok())
        .collect::<Option<_>>()?;
    match nums.as_slice() {
        [h, m, s] => hms_secs(*h, *m, *s),
        [m, s] => hms_secs(0, *m, *s),
        _ => None,
    }
}

/// `None` when the total doesn't fit in a `u64`.
fn hms_secs(h: u64, m: u64, s: u64) -> Option<u64> {
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

/// Parse a free-form duration into seconds. Returns 0 when nothing parses.
///
/// Handles clock notation (`1:2:3`, `45:10`, fractional seconds truncated),
/// unit words (`"1 hour 30 min"`, `"1h30m"`, `"45 sec"`) and a bare number,
/// which is read as minutes.
pub fn parse_duration_secs(raw: &str) -> u64 {
    let d = raw.trim().to_lowercase();
    if d.is_empty() {
        return 0;
    }

    if d.contains(':') {
        let parts: Vec<&str> = d.split(':').collect();
        let clock = match parts.as_slice() {
            [h, m, s] => parse_int(h)
                .zip(parse_int(m))
                .zip(parse_secs(s))
                .and_then(|((h, m), s)| hms_secs(h, m, s)),
            [m, s] => parse_int(m).zip(parse_secs(s)).and_then(|(m, s)| hms_secs(0, m, s)),
            _ => None,
        };
        match clock {
            Some(secs) => return secs,
            None if matches!(parts.len(), 2 | 3) => return 0,
            None => {}
        }
    }

    let h = first_number(&HOURS_RE, &d);
    let m = first_number(&MINUTES_RE, &d);
    let s = first_number(&SECONDS_RE, &d);
    if h > 0 || m > 0 || s > 0 {
        return hms_secs(h, m, s).unwrap_or(0);
    }

    if d.chars().all(|c| c.is_ascii_digit()) {
        return d
            .parse::<u64>()
            .ok()
            .and_then(|mins| mins.checked_mul(60))
            .unwrap_or(0);
    }

    0
}

fn first_number(re: &Regex, text: &str) -> u64 {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn parse_int(s: &str) -> Option<u64> {
    s.trim().parse().ok()
}

fn parse_secs(s: &str) -> Option<u64> {
    let f: f64 = s.trim().parse().ok()?;
    (f.is_finite() && f >= 0.0).then(|| f.trunc() as u64)
}

/// `5405` → `"01:30:05"`
pub fn format_hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Rewrite a duration as `HH:MM:SS`. `None` when it doesn't parse, so
/// the caller keeps the original text. A literal `"0"` is a real zero.
pub fn normalize_duration(raw: &str) -> Option<String> {
    let secs = parse_duration_secs(raw);
    if secs == 0 && raw != "0" {
        return None;
    }
    Some(format_hms(secs))
}

/// One rewritten duration.
#[derive(Debug, Clone)]
pub struct DurationChange {
    pub number: String,
    pub title: String,
    pub from: String,
    pub to: String,
}

pub struct NormalizeResult {
    pub examined: usize,
    pub changes: Vec<DurationChange>,
}

/// Normalize every string or integer `duration` in a database.
pub fn normalize_database(
    path: &Path,
    dry_run: bool,
    opts: &WriteOptions,
) -> Result<NormalizeResult> {
    let mut database = EpisodeDatabase::open(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let mut result = NormalizeResult {
        examined: 0,
        changes: Vec::new(),
    };

    for ep in &mut database.episodes {
        let raw = match ep.get("duration") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        result.examined += 1;

        let Some(normalized) = normalize_duration(&raw) else {
            log::debug!("Leaving unparseable duration {raw:?} as is");
            continue;
        };
        // Integers are always rewritten to the string form
        if normalized == raw && ep.get("duration").is_some_and(Value::is_string) {
            continue;
        }

        result.changes.push(DurationChange {
            number: ep.display_text("number").into_owned(),
            title: ep.title().to_string(),
            from: raw,
            to: normalized.clone(),
        });
        ep.set("duration", normalized);
    }

    if !dry_run && !result.changes.is_empty() {
        database
            .save(opts)
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }

    Ok(result)
}
