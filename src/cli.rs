//! CLI argument parsing and report output.
use anyhow::{Context, Result};
use clap::Parser;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::application::bootstrap::default_workspace_root;
use crate::application::reconcile::EntryOutcome;
use crate::application::sync_day::{DayArg, DayReport, SyncOverrides, run_sync};
use crate::infrastructure::toggl_client::format_instant;

#[derive(Parser, Debug)]
#[command(
    name = "marvin-timesync",
    version,
    about = "Copies time tracked on Amazing Marvin tasks into Toggl Track"
)]
pub struct Cli {
    /// today, yesterday or YYYY-MM-DD
    #[arg(default_value = "today")]
    pub day: DayArg,
    /// Report what would be created without writing anything
    #[arg(long)]
    pub dry_run: bool,
    /// Directory holding config/ and state/
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
    /// Category path to sync, e.g. "Work" or "Work/Clients"
    #[arg(short = 'c', long)]
    pub category: Option<String>,
}

/// Runs one sync and prints the per-entry report.
pub async fn run(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => default_workspace_root()?,
    };
    let report = run_sync(
        &root,
        cli.day,
        SyncOverrides {
            category: cli.category,
            dry_run: cli.dry_run,
        },
    )
    .await
    .with_context(|| format!("sync failed for workspace {}", root.display()))?;

    print!("{}", render_report(&report));
    Ok(())
}

fn render_report(day: &DayReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}) {} - {}",
        day.day,
        day.category.title,
        format_instant(day.window.start()),
        format_instant(day.window.end())
    );

    for entry in &day.report.entries {
        let state = match &entry.outcome {
            EntryOutcome::Created { id } => format!("created #{id}"),
            EntryOutcome::CreateFailed { cause } => format!("FAILED: {cause}"),
            EntryOutcome::Matched { .. } => "matched".to_string(),
            EntryOutcome::Conflict {
                existing_description,
                ..
            } => format!(
                "conflict with \"{}\"",
                existing_description.as_deref().unwrap_or("")
            ),
            EntryOutcome::Planned => "would create".to_string(),
        };
        let _ = writeln!(
            out,
            "  {} - {}  {}  [{}]",
            format_instant(entry.wanted.start),
            format_instant(entry.wanted.stop),
            entry.wanted.description,
            state
        );
    }

    for rejected in &day.rejected {
        let _ = writeln!(
            out,
            "  skipped task {} ({}): {}",
            rejected.id,
            rejected.title.as_deref().unwrap_or(""),
            rejected.reason
        );
    }

    let summary = day.report.summary();
    let _ = writeln!(
        out,
        "created {}, failed {}, matched {}, conflicts {}, planned {}",
        summary.created, summary.failed, summary.matched, summary.conflicts, summary.planned
    );
    out
}
