use crate::application::time_entries::TimeEntryRepository;
use crate::domain::interval::Interval;
use crate::domain::models::{DomainError, Task, WantedTimeEntry};
use crate::infrastructure::toggl_client::{AppendOutcome, ExistingTimeEntry, TimeTrackerClient};
use chrono::SubsecRound;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What happened to one wanted entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryOutcome {
    Created { id: i64 },
    CreateFailed { cause: String },
    Matched { existing_id: i64 },
    Conflict {
        existing_id: i64,
        existing_description: Option<String>,
    },
    /// Would have been created; dry run.
    Planned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEntry {
    pub wanted: WantedTimeEntry,
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub failed: usize,
    pub matched: usize,
    pub conflicts: usize,
    pub planned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub entries: Vec<ReconciledEntry>,
}

impl ReconcileReport {
    pub fn summary(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for entry in &self.entries {
            match entry.outcome {
                EntryOutcome::Created { .. } => summary.created += 1,
                EntryOutcome::CreateFailed { .. } => summary.failed += 1,
                EntryOutcome::Matched { .. } => summary.matched += 1,
                EntryOutcome::Conflict { .. } => summary.conflicts += 1,
                EntryOutcome::Planned => summary.planned += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub create_concurrency: usize,
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            create_concurrency: 2,
            dry_run: false,
        }
    }
}

/// Decision for one wanted entry before any write happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    Matched { existing_id: i64 },
    Conflict {
        existing_id: i64,
        existing_description: Option<String>,
    },
}

/// One wanted entry per clipped interval, in task order and then in the
/// order the intervals were recorded. Bounds are cut to whole seconds.
pub fn build_wanted(
    tasks: &[Task],
    window: &Interval,
) -> Result<Vec<WantedTimeEntry>, DomainError> {
    let mut wanted = Vec::new();
    for task in tasks {
        for interval in task.clipped_intervals_overlapping(window)? {
            wanted.push(WantedTimeEntry {
                description: task.title.clone(),
                start: interval.start().trunc_subsecs(0),
                stop: interval.end().trunc_subsecs(0),
            });
        }
    }
    Ok(wanted)
}

/// Matches wanted entries against existing ones on the exact start instant.
/// Stop and duration are not compared.
pub fn plan(wanted: &[WantedTimeEntry], existing: &[ExistingTimeEntry]) -> Vec<Decision> {
    let by_start: HashMap<i64, &ExistingTimeEntry> = existing
        .iter()
        .map(|entry| (entry.start.timestamp_millis(), entry))
        .collect();

    wanted
        .iter()
        .map(|entry| match by_start.get(&entry.start.timestamp_millis()) {
            None => Decision::Create,
            Some(found) if found.description.as_deref() == Some(entry.description.as_str()) => {
                Decision::Matched {
                    existing_id: found.id,
                }
            }
            Some(found) => Decision::Conflict {
                existing_id: found.id,
                existing_description: found.description.clone(),
            },
        })
        .collect()
}

/// Creates every wanted entry that has no existing entry at its start.
/// Existing entries are never modified. A failed create is reported and the
/// remaining creates still run.
pub async fn reconcile<C>(
    repository: Arc<TimeEntryRepository<C>>,
    wanted: Vec<WantedTimeEntry>,
    existing: &[ExistingTimeEntry],
    options: ReconcileOptions,
) -> ReconcileReport
where
    C: TimeTrackerClient + 'static,
{
    let decisions = plan(&wanted, existing);
    let mut outcomes: Vec<Option<EntryOutcome>> = vec![None; wanted.len()];
    let mut create_tasks: JoinSet<(usize, EntryOutcome)> = JoinSet::new();
    let concurrency = options.create_concurrency.max(1);

    for (index, (entry, decision)) in wanted.iter().zip(decisions).enumerate() {
        match decision {
            Decision::Matched { existing_id } => {
                outcomes[index] = Some(EntryOutcome::Matched { existing_id });
            }
            Decision::Conflict {
                existing_id,
                existing_description,
            } => {
                outcomes[index] = Some(EntryOutcome::Conflict {
                    existing_id,
                    existing_description,
                });
            }
            Decision::Create if options.dry_run => {
                outcomes[index] = Some(EntryOutcome::Planned);
            }
            Decision::Create => {
                let repository = Arc::clone(&repository);
                let entry = entry.clone();
                create_tasks.spawn(async move { (index, create_one(&repository, &entry).await) });

                if create_tasks.len() >= concurrency {
                    collect_created_entry(&mut create_tasks, &mut outcomes).await;
                }
            }
        }
    }

    while !create_tasks.is_empty() {
        collect_created_entry(&mut create_tasks, &mut outcomes).await;
    }

    let entries: Vec<ReconciledEntry> = wanted
        .into_iter()
        .zip(outcomes)
        .map(|(wanted, outcome)| ReconciledEntry {
            wanted,
            outcome: outcome.unwrap_or_else(|| EntryOutcome::CreateFailed {
                cause: "create task did not complete".to_string(),
            }),
        })
        .collect();

    // Creates finish in any order; the log follows wanted order.
    for entry in &entries {
        log_outcome(entry);
    }
    ReconcileReport { entries }
}

async fn create_one<C>(repository: &TimeEntryRepository<C>, entry: &WantedTimeEntry) -> EntryOutcome
where
    C: TimeTrackerClient,
{
    match repository.append(entry).await {
        Ok(AppendOutcome::Created(created)) => EntryOutcome::Created { id: created.id },
        Ok(AppendOutcome::Rejected(body)) => EntryOutcome::CreateFailed {
            cause: format!("rejected: {body}"),
        },
        Err(cause) => EntryOutcome::CreateFailed {
            cause: cause.to_string(),
        },
    }
}

fn log_outcome(entry: &ReconciledEntry) {
    let wanted = &entry.wanted;
    match &entry.outcome {
        EntryOutcome::Created { id } => {
            info!(
                description = %wanted.description,
                start = %wanted.start,
                stop = %wanted.stop,
                id,
                "created"
            );
        }
        EntryOutcome::CreateFailed { cause } => {
            error!(
                description = %wanted.description,
                start = %wanted.start,
                error = %cause,
                "failed to create entry"
            );
        }
        EntryOutcome::Matched { existing_id } => {
            info!(
                description = %wanted.description,
                start = %wanted.start,
                existing_id,
                "matched"
            );
        }
        EntryOutcome::Conflict {
            existing_id,
            existing_description,
        } => {
            warn!(
                description = %wanted.description,
                existing = existing_description.as_deref().unwrap_or(""),
                existing_id,
                start = %wanted.start,
                "existing entry at this start has a different description"
            );
        }
        EntryOutcome::Planned => {
            info!(
                description = %wanted.description,
                start = %wanted.start,
                stop = %wanted.stop,
                "would create"
            );
        }
    }
}

async fn collect_created_entry(
    create_tasks: &mut JoinSet<(usize, EntryOutcome)>,
    outcomes: &mut [Option<EntryOutcome>],
) {
    let Some(join_result) = create_tasks.join_next().await else {
        return;
    };
    match join_result {
        Ok((index, outcome)) => {
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
        }
        Err(join_error) => error!(error = %join_error, "create task failed to join"),
    }
}
