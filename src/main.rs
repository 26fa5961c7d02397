use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use podarchive::config::{AppConfig, DatabaseKind};
use podarchive::dedup::DuplicateGroup;
use podarchive::reconcile::{DEFAULT_OVERLAP_TYPE, DEFAULT_TITLE_THRESHOLD};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "podarchive", version, about = "Podcast episode database maintenance")]
struct Cli {
    /// Path to a config file (default: ~/.config/podarchive/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the databases and reports
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DatabaseName {
    /// Hosted and co-hosted episodes
    #[value(alias = "episodes")]
    Hosted,
    /// Spoken platform episodes
    Spoken,
}

impl From<DatabaseName> for DatabaseKind {
    fn from(name: DatabaseName) -> Self {
        match name {
            DatabaseName::Hosted => DatabaseKind::Hosted,
            DatabaseName::Spoken => DatabaseKind::Spoken,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge records sharing a space_url within one database
    Dedup {
        #[arg(value_enum)]
        database: DatabaseName,

        /// Show the duplicate groups without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Report records present in both databases (writes duplicates_report.json)
    Overlap,

    /// Remove from the spoken database every record the hosted one already has
    Prune {
        /// Show what would be removed without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Union both databases into the consolidated database
    Consolidate,

    /// Fuzzy overlap check by URL and title similarity (prints only)
    CheckOverlap {
        /// Only check hosted-database records of this type
        #[arg(long = "type", default_value = DEFAULT_OVERLAP_TYPE)]
        episode_type: String,

        /// Check every hosted-database record regardless of type
        #[arg(long, conflicts_with = "episode_type")]
        all_types: bool,

        /// Title similarity needed for a match (0.0 - 1.0, exclusive)
        #[arg(long, default_value_t = DEFAULT_TITLE_THRESHOLD)]
        threshold: f64,
    },

    /// Rewrite a database sorted by date, newest first
    Sort {
        #[arg(value_enum)]
        database: DatabaseName,
    },

    /// Recompute and store the stats block (both databases if none given)
    Stats {
        #[arg(value_enum)]
        database: Option<DatabaseName>,
    },

    /// Rewrite free-form durations as HH:MM:SS
    NormalizeDurations {
        #[arg(value_enum)]
        database: DatabaseName,

        /// Show the changes without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    // Resolve data directory: CLI > config > ./shared
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    log::info!("Data directory: {}", config.data_dir().display());

    let opts = config.write_options();

    match cli.command {
        Commands::Dedup { database, dry_run } => {
            let kind = DatabaseKind::from(database);
            let path = config.database_path(kind);
            let report_path = config.report_path(kind);

            if dry_run {
                println!("DRY RUN — no changes will be written");
                println!();
            }
            let outcome = podarchive::dedup::dedupe_database(
                &path,
                &report_path,
                &config.merge_rules(kind),
                config.trim_trailing_slash(kind),
                dry_run,
                &opts,
            )
            .context("Dedup failed")?;

            if dry_run {
                for group in &outcome.duplicates {
                    print_group(group);
                }
            }

            println!(
                "Dedup complete ({}): {} episodes before, {} after, {} groups merged",
                kind.label(),
                outcome.before,
                outcome.after(),
                outcome.duplicates.len()
            );
            if dry_run {
                if !outcome.duplicates.is_empty() {
                    println!("(dry run — re-run without --dry-run to apply)");
                }
            } else {
                println!("Report saved to {}", report_path.display());
            }
        }

        Commands::Overlap => {
            let report_path = config.overlap_report_path();
            let report = podarchive::reconcile::write_overlap_report(
                &config.database_path(DatabaseKind::Hosted),
                &config.database_path(DatabaseKind::Spoken),
                &report_path,
                &opts,
            )
            .context("Overlap report failed")?;

            if report.duplicates.is_empty() {
                println!("No records shared between the two databases.");
            }
            for (i, pair) in report.duplicates.iter().enumerate() {
                println!("{}", "-".repeat(80));
                println!("Duplicate #{}: {}", i + 1, pair.space_url);
                println!(
                    "  hosted: {} | {} | {} | host {} | listeners {}",
                    text(&pair.number_hosted),
                    text(&pair.title_hosted),
                    text(&pair.date_hosted),
                    text(&pair.host_hosted),
                    text(&pair.listeners_hosted),
                );
                println!(
                    "  spoken: {} | {} | {} | host {} | listeners {}",
                    text(&pair.number_spoken),
                    text(&pair.title_spoken),
                    text(&pair.date_spoken),
                    text(&pair.host_spoken),
                    text(&pair.listeners_spoken),
                );
            }
            println!();
            println!(
                "Overlap complete: {} shared records. Report saved to {}",
                report.total_duplicates,
                report_path.display()
            );
        }

        Commands::Prune { dry_run } => {
            if dry_run {
                println!("DRY RUN — no changes will be written");
                println!();
            }
            let outcome = podarchive::reconcile::prune_database(
                &config.database_path(DatabaseKind::Hosted),
                &config.database_path(DatabaseKind::Spoken),
                &config.removed_report_path(),
                dry_run,
                &opts,
            )
            .context("Prune failed")?;

            for (i, removed) in outcome.removed.iter().take(10).enumerate() {
                println!("{}. {}", i + 1, text(&removed.title));
                println!("   Host: {} | Date: {}", text(&removed.host), text(&removed.date));
                println!("   URL: {}", removed.space_url);
            }
            if outcome.removed.len() > 10 {
                println!("... and {} more.", outcome.removed.len() - 10);
            }
            println!();
            println!(
                "Prune complete: {} hosted URLs, spoken {} before, {} after, {} removed",
                outcome.first_urls,
                outcome.before,
                outcome.kept.len(),
                outcome.removed.len()
            );
            if dry_run && !outcome.removed.is_empty() {
                println!("(dry run — re-run without --dry-run to apply)");
            }
        }

        Commands::Consolidate => {
            let out_path = config.consolidated_path();
            let outcome = podarchive::reconcile::consolidate_databases(
                &config.database_path(DatabaseKind::Hosted),
                &config.database_path(DatabaseKind::Spoken),
                &out_path,
                &config.podcast,
                &opts,
            )
            .context("Consolidation failed")?;

            let stats = &outcome.stats;
            println!(
                "Consolidate complete: {} from hosted, {} added from spoken, {} total",
                outcome.from_first,
                outcome.added_from_second,
                outcome.episodes.len()
            );
            println!(
                "Listeners: {} total, {:.2} average over {} episodes",
                stats.total_listeners,
                stats.average_listeners(),
                stats.episodes_with_listener_data
            );
            print_breakdown(&stats.breakdown_by_type);
            println!("Saved to {}", out_path.display());
        }

        Commands::CheckOverlap { episode_type, all_types, threshold } => {
            let type_filter = if all_types { None } else { Some(episode_type.as_str()) };
            let check = podarchive::reconcile::check_overlap_files(
                &config.database_path(DatabaseKind::Hosted),
                &config.database_path(DatabaseKind::Spoken),
                type_filter,
                threshold,
            )
            .context("Overlap check failed")?;

            println!("Loaded {} spoken episodes.", check.second_total);
            println!(
                "Checking {} {} episodes (from {} in the hosted database).",
                check.candidates,
                type_filter.unwrap_or("hosted-database"),
                check.first_total
            );
            println!("{}", "-".repeat(60));

            if check.matches.is_empty() {
                println!("No overlaps found.");
                return Ok(());
            }

            println!("Found {} potential overlaps:", check.matches.len());
            println!();
            for m in &check.matches {
                println!("[{}]", m.reason);
                println!("  Hosted: {} ({})", m.first_title, m.first_date);
                println!("  Spoken: {} ({})", m.second_title, m.second_date);
                println!("{}", "-".repeat(40));
            }
        }

        Commands::Sort { database } => {
            let kind = DatabaseKind::from(database);
            let path = config.database_path(kind);
            let count = podarchive::dedup::sort_database(&path, &opts).context("Sort failed")?;
            println!("Sort complete: {} episodes in {}", count, path.display());
        }

        Commands::Stats { database } => {
            let kinds = match database {
                Some(name) => vec![DatabaseKind::from(name)],
                None => vec![DatabaseKind::Hosted, DatabaseKind::Spoken],
            };
            for kind in kinds {
                let path = config.database_path(kind);
                let stats = podarchive::stats::update_database_stats(&path, &opts)
                    .with_context(|| format!("Failed to update stats for {}", kind.label()))?;

                println!("{} ({})", kind.label(), path.display());
                println!("  Episodes:        {}", stats.total_episodes);
                println!(
                    "  Total duration:  {:.1} hours",
                    stats.total_duration_minutes() / 60.0
                );
                println!(
                    "  Listeners:       {} ({:.1} avg over {})",
                    stats.total_listeners,
                    stats.average_listeners(),
                    stats.episodes_with_listener_data
                );
                print_breakdown(&stats.breakdown_by_type);
                println!();
            }
        }

        Commands::NormalizeDurations { database, dry_run } => {
            let kind = DatabaseKind::from(database);
            let path = config.database_path(kind);
            if dry_run {
                println!("DRY RUN — no changes will be written");
                println!();
            }
            let result = podarchive::duration::normalize_database(&path, dry_run, &opts)
                .context("Duration normalization failed")?;

            for change in &result.changes {
                println!(
                    "{:<8} {:<40} {:>12} -> {}",
                    change.number,
                    truncate(&change.title, 40),
                    change.from,
                    change.to
                );
            }
            println!(
                "Normalize complete: {} durations examined, {} rewritten",
                result.examined,
                result.changes.len()
            );
            if dry_run && !result.changes.is_empty() {
                println!("(dry run — re-run without --dry-run to apply)");
            }
        }
    }

    Ok(())
}

/// Print one duplicate group: its members, then the merged result.
fn print_group(group: &DuplicateGroup) {
    println!("{}", group.space_url);
    for member in &group.members {
        println!(
            "  {:<10} {:<10} {:>6}  {}",
            member.display_text("number"),
            member.date(),
            member.listeners(),
            truncate(member.title(), 50)
        );
    }
    println!(
        "  => {:<7} {:<10} {:>6}  {}",
        group.merged.display_text("number"),
        group.merged.date(),
        group.merged.listeners(),
        truncate(group.merged.title(), 50)
    );
    println!();
}

/// Print episode counts per type, largest first.
fn print_breakdown(breakdown: &std::collections::BTreeMap<String, usize>) {
    let mut types: Vec<(&String, &usize)> = breakdown.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1));
    for (episode_type, count) in types {
        println!("  {:<16} {}", episode_type, count);
    }
}

/// Report values as plain text (strings unquoted).
fn text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate long titles on a char boundary.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}
