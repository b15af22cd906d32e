use crate::application::bootstrap::bootstrap_workspace;
use crate::application::reconcile::{
    ReconcileOptions, ReconcileReport, build_wanted, reconcile,
};
use crate::application::task_store::{RejectedTask, TaskStore};
use crate::application::time_entries::{TimeEntryRepository, select_workspace};
use crate::domain::interval::Interval;
use crate::domain::models::TaskGroup;
use crate::infrastructure::config::{
    TimeZoneSetting, load_app_config, load_marvin_credentials_from_env, load_toggl_token_from_env,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mirror_gate::MirrorGate;
use crate::infrastructure::mirror_store::{MirrorStore, SqliteMirrorStore};
use crate::infrastructure::replication::{CouchReplicationSource, replicate};
use crate::infrastructure::toggl_client::{ReqwestTogglClient, TimeTrackerClient};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Day selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayArg {
    Today,
    Yesterday,
    Date(NaiveDate),
}

impl DayArg {
    pub fn resolve(self, today: NaiveDate) -> Result<NaiveDate, InfraError> {
        match self {
            Self::Today => Ok(today),
            Self::Yesterday => today
                .pred_opt()
                .ok_or_else(|| InfraError::InvalidConfig(format!("no day before {today}"))),
            Self::Date(date) => Ok(date),
        }
    }
}

impl FromStr for DayArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("today") {
            return Ok(Self::Today);
        }
        if value.eq_ignore_ascii_case("yesterday") {
            return Ok(Self::Yesterday);
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Self::Date)
            .map_err(|_| format!("expected today, yesterday or YYYY-MM-DD, got '{value}'"))
    }
}

/// Current calendar date in the configured zone.
pub fn today_in(timezone: TimeZoneSetting) -> NaiveDate {
    match timezone {
        TimeZoneSetting::Local => Local::now().date_naive(),
        TimeZoneSetting::Named(zone) => Utc::now().with_timezone(&zone).date_naive(),
    }
}

/// `[start of day, start of next day)` in the configured zone, so DST days
/// are 23 or 25 hours long.
pub fn day_window(day: NaiveDate, timezone: TimeZoneSetting) -> Result<Interval, InfraError> {
    let next = day
        .succ_opt()
        .ok_or_else(|| InfraError::InvalidConfig(format!("no day after {day}")))?;
    let (start, end) = match timezone {
        TimeZoneSetting::Local => (start_of_day(&Local, day)?, start_of_day(&Local, next)?),
        TimeZoneSetting::Named(zone) => (start_of_day(&zone, day)?, start_of_day(&zone, next)?),
    };
    Ok(Interval::new(start, end)?)
}

fn start_of_day<Z: TimeZone>(zone: &Z, day: NaiveDate) -> Result<DateTime<Utc>, InfraError> {
    let midnight = day.and_time(NaiveTime::MIN);
    // Some zones skip midnight on DST changes; the day then starts an hour later.
    zone.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(midnight + TimeDelta::hours(1))).earliest())
        .map(|start| start.with_timezone(&Utc))
        .ok_or_else(|| InfraError::InvalidConfig(format!("cannot find the start of {day}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOverrides {
    pub category: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct DayReport {
    pub day: NaiveDate,
    pub window: Interval,
    pub category: TaskGroup,
    pub rejected: Vec<RejectedTask>,
    pub report: ReconcileReport,
}

/// Fetches existing entries and selects tasks concurrently, then reconciles.
/// Category lookup and mirror failures end the run before any write.
pub async fn sync_window<C>(
    task_store: &TaskStore,
    repository: Arc<TimeEntryRepository<C>>,
    category_path: &str,
    window: Interval,
    options: ReconcileOptions,
) -> Result<(TaskGroup, Vec<RejectedTask>, ReconcileReport), InfraError>
where
    C: TimeTrackerClient + 'static,
{
    let select_tasks = async {
        let group = task_store.resolve_path(&TaskGroup::root(), category_path).await?;
        let selection = task_store.tasks_overlapping(&group, &window).await?;
        Ok::<_, InfraError>((group, selection))
    };
    let (existing, (group, selection)) =
        tokio::try_join!(repository.fetch(&window), select_tasks)?;
    info!(
        category = %group.title,
        workspace_id = repository.workspace_id(),
        tasks = selection.tasks.len(),
        rejected = selection.rejected.len(),
        existing = existing.len(),
        "selected tasks"
    );

    for task in &selection.tasks {
        let spent = task.time_spent(&window)?;
        info!(task = %task.title, minutes = spent.num_minutes(), "time spent");
    }

    let wanted = build_wanted(&selection.tasks, &window)?;
    let report = reconcile(repository, wanted, &existing, options).await;
    Ok((group, selection.rejected, report))
}

/// One full run for `day` against the workspace rooted at `workspace_root`.
pub async fn run_sync(
    workspace_root: &Path,
    day: DayArg,
    overrides: SyncOverrides,
) -> Result<DayReport, InfraError> {
    let bootstrap = bootstrap_workspace(workspace_root)?;
    let config = load_app_config(&bootstrap.config_dir)?;
    let marvin_credentials = load_marvin_credentials_from_env(&bootstrap.config_dir)?;
    let toggl_token = load_toggl_token_from_env(&bootstrap.config_dir)?;

    let day = day.resolve(today_in(config.timezone))?;
    let window = day_window(day, config.timezone)?;
    let category_path = overrides.category.unwrap_or(config.category);
    info!(
        %day,
        start = %window.start(),
        end = %window.end(),
        category = %category_path,
        "syncing day"
    );

    let store: Arc<dyn MirrorStore> =
        Arc::new(SqliteMirrorStore::open(&bootstrap.database_path)?);
    let (publisher, gate) = MirrorGate::channel();
    let source = CouchReplicationSource::new(marvin_credentials);
    let replication = tokio::spawn(async move { replicate(&source, store, publisher).await });

    let client = Arc::new(ReqwestTogglClient::new(toggl_token)?);
    let configured_workspace = config.workspace_id;
    let options = ReconcileOptions {
        create_concurrency: config.create_concurrency,
        dry_run: overrides.dry_run,
    };
    let outcome = async move {
        let workspace_id = select_workspace(client.as_ref(), configured_workspace).await?;
        let repository = Arc::new(TimeEntryRepository::new(client, workspace_id));
        sync_window(&TaskStore::new(gate), repository, &category_path, window, options).await
    }
    .await;

    if outcome.is_err() {
        replication.abort();
    }
    let (category, rejected, report) = outcome?;
    Ok(DayReport {
        day,
        window,
        category,
        rejected,
        report,
    })
}
