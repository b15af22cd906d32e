use crate::domain::interval::Interval;
use crate::domain::models::WantedTimeEntry;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::toggl_client::{
    AppendOutcome, ExistingTimeEntry, NewTimeEntry, TimeEntriesQuery, TimeTrackerClient,
};
use std::sync::Arc;
use tracing::debug;

/// Provenance tag stamped on every entry this tool creates.
pub const CREATED_WITH: &str = "marvin-timesync";

/// Configured workspace if set, otherwise the user's only workspace.
pub async fn select_workspace<C>(client: &C, configured: Option<i64>) -> Result<i64, InfraError>
where
    C: TimeTrackerClient + ?Sized,
{
    if let Some(workspace_id) = configured {
        return Ok(workspace_id);
    }
    let workspaces = client.list_workspaces().await?;
    match workspaces.as_slice() {
        [only] => {
            debug!(workspace_id = only.id, name = %only.name, "using only workspace");
            Ok(only.id)
        }
        other => Err(InfraError::AmbiguousWorkspace(other.len())),
    }
}

pub struct TimeEntryRepository<C>
where
    C: TimeTrackerClient,
{
    client: Arc<C>,
    workspace_id: i64,
}

impl<C> TimeEntryRepository<C>
where
    C: TimeTrackerClient,
{
    pub fn new(client: Arc<C>, workspace_id: i64) -> Self {
        Self {
            client,
            workspace_id,
        }
    }

    pub fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    /// Entries the time tracker reports for `window`, as returned.
    pub async fn fetch(&self, window: &Interval) -> Result<Vec<ExistingTimeEntry>, InfraError> {
        self.client
            .list_time_entries(&TimeEntriesQuery {
                start_date: window.start(),
                end_date: window.end(),
            })
            .await
    }

    /// Creates exactly one entry. No deduplication happens here.
    pub async fn append(&self, entry: &WantedTimeEntry) -> Result<AppendOutcome, InfraError> {
        let request = NewTimeEntry::new(
            self.workspace_id,
            entry.description.as_str(),
            entry.start,
            Some(entry.stop),
            CREATED_WITH,
        );
        self.client.create_time_entry(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::toggl_client::Workspace;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        workspaces: Vec<Workspace>,
        queries: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
        created: Mutex<Vec<NewTimeEntry>>,
    }

    #[async_trait]
    impl TimeTrackerClient for RecordingClient {
        async fn list_workspaces(&self) -> Result<Vec<Workspace>, InfraError> {
            Ok(self.workspaces.clone())
        }

        async fn list_time_entries(
            &self,
            query: &TimeEntriesQuery,
        ) -> Result<Vec<ExistingTimeEntry>, InfraError> {
            self.queries
                .lock()
                .expect("queries lock poisoned")
                .push((query.start_date, query.end_date));
            Ok(Vec::new())
        }

        async fn create_time_entry(
            &self,
            entry: &NewTimeEntry,
        ) -> Result<AppendOutcome, InfraError> {
            self.created
                .lock()
                .expect("created lock poisoned")
                .push(entry.clone());
            Ok(AppendOutcome::Rejected(serde_json::json!("not stored")))
        }
    }

    fn workspace(id: i64) -> Workspace {
        Workspace {
            id,
            name: format!("ws-{id}"),
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn configured_workspace_wins_without_a_request() {
        let client = RecordingClient::default();
        assert_eq!(select_workspace(&client, Some(99)).await.expect("workspace"), 99);
    }

    #[tokio::test]
    async fn single_workspace_is_selected() {
        let client = RecordingClient {
            workspaces: vec![workspace(7)],
            ..RecordingClient::default()
        };
        assert_eq!(select_workspace(&client, None).await.expect("workspace"), 7);
    }

    #[tokio::test]
    async fn several_workspaces_need_configuration() {
        let client = RecordingClient {
            workspaces: vec![workspace(7), workspace(8)],
            ..RecordingClient::default()
        };
        assert!(matches!(
            select_workspace(&client, None).await,
            Err(InfraError::AmbiguousWorkspace(2))
        ));
    }

    #[tokio::test]
    async fn fetch_queries_the_window_bounds() {
        let client = Arc::new(RecordingClient::default());
        let repository = TimeEntryRepository::new(Arc::clone(&client), 7);
        let window = Interval::new(
            fixed_time("2023-05-04T00:00:00Z"),
            fixed_time("2023-05-05T00:00:00Z"),
        )
        .expect("window");

        repository.fetch(&window).await.expect("fetch");
        let queries = client.queries.lock().expect("queries lock poisoned");
        assert_eq!(queries.as_slice(), &[(window.start(), window.end())]);
    }

    #[tokio::test]
    async fn append_stamps_workspace_and_provenance() {
        let client = Arc::new(RecordingClient::default());
        let repository = TimeEntryRepository::new(Arc::clone(&client), 7);
        let wanted = WantedTimeEntry {
            description: "Write spec".to_string(),
            start: fixed_time("2023-05-04T10:00:00Z"),
            stop: fixed_time("2023-05-04T10:30:00Z"),
        };

        let outcome = repository.append(&wanted).await.expect("append");
        assert!(matches!(outcome, AppendOutcome::Rejected(_)));

        let created = client.created.lock().expect("created lock poisoned");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].workspace_id, 7);
        assert_eq!(created[0].created_with, CREATED_WITH);
        assert_eq!(created[0].start, "2023-05-04T10:00:00Z");
        assert_eq!(created[0].duration, Some(1800));
    }
}
