use crate::domain::interval::Interval;
use crate::domain::models::{RawCategory, RawTask, Task, TaskGroup};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mirror_gate::MirrorGate;
use crate::infrastructure::mirror_store::{DocKind, MirrorDocument, Selector};
use tracing::warn;

/// Task that could not be used because its stored data is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTask {
    pub id: String,
    pub title: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSelection {
    pub tasks: Vec<Task>,
    pub rejected: Vec<RejectedTask>,
}

/// Read access to categories and tasks in the local mirror. Every query waits
/// for the mirror's readiness gate first.
#[derive(Debug, Clone)]
pub struct TaskStore {
    gate: MirrorGate,
}

impl TaskStore {
    pub fn new(gate: MirrorGate) -> Self {
        Self { gate }
    }

    /// Waits for the mirror, then runs the query on the blocking pool.
    async fn find(&self, selector: Selector) -> Result<Vec<MirrorDocument>, InfraError> {
        let store = self.gate.ready().await?;
        tokio::task::spawn_blocking(move || store.find(&selector))
            .await
            .map_err(|error| InfraError::SyncFailed(format!("mirror query task failed: {error}")))?
    }

    /// First category or project directly under `parent` titled `name`,
    /// by ascending document id.
    pub async fn resolve_category(
        &self,
        parent: &TaskGroup,
        name: &str,
    ) -> Result<TaskGroup, InfraError> {
        let selector = Selector::children(DocKind::Categories, parent.id.as_str()).with_title(name);
        let Some(document) = self.find(selector).await?.into_iter().next() else {
            return Err(InfraError::CategoryNotFound(name.to_string()));
        };
        let raw: RawCategory = serde_json::from_value(document.body)?;
        Ok(TaskGroup::from(raw))
    }

    /// Walks a `/`-separated category path starting at `parent`.
    pub async fn resolve_path(
        &self,
        parent: &TaskGroup,
        path: &str,
    ) -> Result<TaskGroup, InfraError> {
        let mut current = parent.clone();
        let mut walked = Vec::new();
        for name in path.split('/').map(str::trim).filter(|name| !name.is_empty()) {
            walked.push(name);
            current = match self.resolve_category(&current, name).await {
                Err(InfraError::CategoryNotFound(_)) => {
                    return Err(InfraError::CategoryNotFound(walked.join("/")));
                }
                other => other?,
            };
        }
        if walked.is_empty() {
            return Err(InfraError::InvalidConfig(
                "category path must not be empty".to_string(),
            ));
        }
        Ok(current)
    }

    /// Every task filed directly under `group`, scheduled or not.
    pub async fn tasks_of(&self, group: &TaskGroup) -> Result<TaskSelection, InfraError> {
        let documents = self
            .find(Selector::children(DocKind::Tasks, group.id.as_str()))
            .await?;

        let mut selection = TaskSelection::default();
        for document in documents {
            let id = document.id.clone();
            let title = document.title.clone();
            match serde_json::from_value::<RawTask>(document.body) {
                Ok(raw) => selection.tasks.push(Task::from(raw)),
                Err(error) => selection.rejected.push(RejectedTask {
                    id,
                    title,
                    reason: error.to_string(),
                }),
            }
        }
        Ok(selection)
    }

    /// Tasks under `group` with at least one worked interval overlapping `window`.
    pub async fn tasks_overlapping(
        &self,
        group: &TaskGroup,
        window: &Interval,
    ) -> Result<TaskSelection, InfraError> {
        let all = self.tasks_of(group).await?;
        let mut selection = TaskSelection {
            tasks: Vec::new(),
            rejected: all.rejected,
        };

        for task in all.tasks {
            match task.has_time_in(window) {
                Ok(true) => selection.tasks.push(task),
                Ok(false) => {}
                Err(error) => selection.rejected.push(RejectedTask {
                    id: task.id.clone(),
                    title: Some(task.title.clone()),
                    reason: error.to_string(),
                }),
            }
        }

        for rejected in &selection.rejected {
            warn!(
                task_id = %rejected.id,
                title = rejected.title.as_deref().unwrap_or(""),
                reason = %rejected.reason,
                "skipping task with malformed time data"
            );
        }
        Ok(selection)
    }
}
