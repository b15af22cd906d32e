use crate::domain::interval::millis_to_utc;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Id of the top of the category tree. It has no stored record.
pub const ROOT_GROUP_ID: &str = "root";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("interval ends before it starts: {start} > {end}")]
    InvertedInterval { start: String, end: String },
    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),
    #[error("task {task_id} has an odd number of time stamps ({len})")]
    OddTimeList { task_id: String, len: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Category,
    Project,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskGroup {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub kind: GroupKind,
}

impl TaskGroup {
    pub fn root() -> Self {
        Self {
            id: ROOT_GROUP_ID.to_string(),
            title: ROOT_GROUP_ID.to_string(),
            parent_id: None,
            kind: GroupKind::Category,
        }
    }
}

impl From<RawCategory> for TaskGroup {
    fn from(raw: RawCategory) -> Self {
        let kind = match raw.kind.as_deref() {
            Some("project") => GroupKind::Project,
            _ => GroupKind::Category,
        };
        Self {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            parent_id: raw.parent_id,
            kind,
        }
    }
}

/// Category or project record as stored by the task service.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCategory {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Task record as stored by the task service. Only the fields used for time
/// reconciliation are read; everything else in the document is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTask {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub day: Option<String>,
    #[serde(rename = "dueDate", default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(rename = "doneAt", default)]
    pub done_at: Option<i64>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub times: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub day: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub done: bool,
    pub done_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    /// Flattened start/stop pairs in epoch milliseconds.
    pub times: Vec<i64>,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        Self {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            parent_id: raw.parent_id,
            day: raw
                .day
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            due_date: raw
                .due_date
                .as_deref()
                .and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()),
            done: raw.done.unwrap_or(false),
            done_at: raw.done_at.and_then(|value| millis_to_utc(value).ok()),
            created_at: raw.created_at.and_then(|value| millis_to_utc(value).ok()),
            times: raw.times.unwrap_or_default(),
        }
    }
}

/// Time entry that should exist in the time tracker for one worked interval.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WantedTimeEntry {
    pub description: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}
