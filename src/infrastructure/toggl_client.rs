use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

const TOGGL_API_BASE: &str = "https://api.track.toggl.com/api/v9/";

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Workspace {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ExistingTimeEntry {
    pub id: i64,
    pub workspace_id: i64,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub at: Option<String>,
    #[serde(default)]
    pub server_deleted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NewTimeEntry {
    pub workspace_id: i64,
    pub description: String,
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub created_with: String,
}

impl NewTimeEntry {
    pub fn new(
        workspace_id: i64,
        description: impl Into<String>,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
        created_with: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            description: description.into(),
            start: format_instant(start),
            stop: stop.map(format_instant),
            duration: stop.map(|stop| stop.timestamp() - start.timestamp()),
            created_with: created_with.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeEntriesQuery {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Result of a create call. The API answers validation problems with HTTP 422
/// and a JSON body; that body is handed back instead of being treated as a
/// transport failure.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Created(ExistingTimeEntry),
    Rejected(serde_json::Value),
}

#[async_trait]
pub trait TimeTrackerClient: Send + Sync {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, InfraError>;

    async fn list_time_entries(
        &self,
        query: &TimeEntriesQuery,
    ) -> Result<Vec<ExistingTimeEntry>, InfraError>;

    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<AppendOutcome, InfraError>;
}

/// RFC 3339 in UTC at whole seconds, the precision the time tracker stores.
pub fn format_instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone)]
pub struct ReqwestTogglClient {
    client: Client,
    api_token: String,
    base_url: Url,
}

#[derive(Debug, PartialEq)]
enum ApiResponse<T> {
    Success(T),
    Unprocessable(serde_json::Value),
}

impl<T> ApiResponse<T> {
    /// For calls where a 422 has no structured meaning.
    fn into_success(self) -> Result<T, InfraError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Unprocessable(body) => Err(InfraError::Http {
                status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                body: body.to_string(),
            }),
        }
    }
}

/// Sorts a response body into success, a 422 answer, or an error.
/// A 422 body that is not JSON is kept as a trimmed string.
fn classify_response<T>(
    status: StatusCode,
    body: &str,
    context: &str,
) -> Result<ApiResponse<T>, InfraError>
where
    T: DeserializeOwned,
{
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        let parsed = serde_json::from_str(body)
            .unwrap_or_else(|_| serde_json::Value::String(body.trim().to_string()));
        return Ok(ApiResponse::Unprocessable(parsed));
    }
    if !status.is_success() {
        return Err(InfraError::http(status, body));
    }

    let parsed = serde_json::from_str(body).map_err(|error| {
        InfraError::Network(format!("invalid {context} payload: {error}; body={body}"))
    })?;
    Ok(ApiResponse::Success(parsed))
}

impl ReqwestTogglClient {
    pub fn new(api_token: impl Into<String>) -> Result<Self, InfraError> {
        let base_url = Url::parse(TOGGL_API_BASE).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid toggl api base url: {error}"))
        })?;
        Self::with_base_url(api_token, base_url)
    }

    pub fn with_base_url(api_token: impl Into<String>, base_url: Url) -> Result<Self, InfraError> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(InfraError::Credential(
                "toggl api token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            api_token: api_token.trim().to_string(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("toggl api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn read_response<T>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<ApiResponse<T>, InfraError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading {context} response: {error}"))
        })?;
        classify_response(status, &body, context)
    }

    async fn get<T>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        context: &str,
    ) -> Result<T, InfraError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .get(self.endpoint(segments)?)
            .basic_auth(&self.api_token, Some("api_token"))
            .query(query)
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while fetching {context}: {error}"))
            })?;

        Self::read_response(response, context).await?.into_success()
    }
}

#[async_trait]
impl TimeTrackerClient for ReqwestTogglClient {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, InfraError> {
        self.get(&["me", "workspaces"], &[], "workspaces").await
    }

    async fn list_time_entries(
        &self,
        query: &TimeEntriesQuery,
    ) -> Result<Vec<ExistingTimeEntry>, InfraError> {
        let entries: Option<Vec<ExistingTimeEntry>> = self
            .get(
                &["me", "time_entries"],
                &[
                    ("start_date", format_instant(query.start_date)),
                    ("end_date", format_instant(query.end_date)),
                ],
                "time entries",
            )
            .await?;
        Ok(entries.unwrap_or_default())
    }

    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<AppendOutcome, InfraError> {
        let workspace_id = entry.workspace_id.to_string();
        let endpoint = self.endpoint(&["workspaces", &workspace_id, "time_entries"])?;
        let response = self
            .client
            .post(endpoint)
            .basic_auth(&self.api_token, Some("api_token"))
            .json(entry)
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while creating time entry: {error}"))
            })?;

        Ok(match Self::read_response(response, "time entry create").await? {
            ApiResponse::Success(created) => AppendOutcome::Created(created),
            ApiResponse::Unprocessable(body) => AppendOutcome::Rejected(body),
        })
    }
}
