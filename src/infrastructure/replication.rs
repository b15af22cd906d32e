use crate::infrastructure::config::MarvinCredentials;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mirror_gate::MirrorPublisher;
use crate::infrastructure::mirror_store::{MirrorDocument, MirrorStore, ReplicationState};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

/// Remote document database the local mirror is copied from.
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    async fn fetch_documents(&self) -> Result<Vec<MirrorDocument>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct CouchReplicationSource {
    client: Client,
    credentials: MarvinCredentials,
}

#[derive(Debug, serde::Deserialize)]
struct AllDocsResponse {
    #[serde(default)]
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, serde::Deserialize)]
struct AllDocsRow {
    doc: Option<serde_json::Value>,
}

impl CouchReplicationSource {
    pub fn new(credentials: MarvinCredentials) -> Self {
        Self {
            client: Client::new(),
            credentials,
        }
    }

    fn all_docs_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.credentials.sync_server).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid sync server url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("sync server URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push(&self.credentials.sync_database);
            segments.push("_all_docs");
        }
        url.query_pairs_mut().append_pair("include_docs", "true");
        Ok(url)
    }
}

#[async_trait]
impl ReplicationSource for CouchReplicationSource {
    async fn fetch_documents(&self) -> Result<Vec<MirrorDocument>, InfraError> {
        let endpoint = self.all_docs_endpoint()?;
        let response = self
            .client
            .get(endpoint)
            .basic_auth(&self.credentials.sync_user, Some(&self.credentials.sync_password))
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while replicating: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading replication response: {error}"))
        })?;

        if !status.is_success() {
            return Err(InfraError::http(status, &body));
        }

        let parsed: AllDocsResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .filter_map(MirrorDocument::from_json)
            .collect())
    }
}

/// Copies every document from `source` into `store`, then opens the gate.
/// Any failure fails the gate instead; a partially written mirror is never published.
pub async fn replicate<S>(source: &S, store: Arc<dyn MirrorStore>, publisher: MirrorPublisher)
where
    S: ReplicationSource + ?Sized,
{
    info!("syncing local mirror");
    let result = match source.fetch_documents().await {
        Ok(documents) => write_mirror(Arc::clone(&store), documents).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(state) => {
            info!(
                documents = state.document_count,
                replicated_at = %state.last_replicated_at,
                "sync complete"
            );
            publisher.ready(store);
        }
        Err(cause) => {
            error!(error = %cause, "local mirror sync failed");
            publisher.fail(cause.to_string());
        }
    }
}

/// SQLite writes block, so they run on the blocking pool.
async fn write_mirror(
    store: Arc<dyn MirrorStore>,
    documents: Vec<MirrorDocument>,
) -> Result<ReplicationState, InfraError> {
    tokio::task::spawn_blocking(move || {
        store.replace_all(&documents, Utc::now())?;
        store.replication_state()?.ok_or_else(|| {
            InfraError::SyncFailed("mirror has no replication record after writing".to_string())
        })
    })
    .await
    .map_err(|error| InfraError::SyncFailed(format!("mirror write task failed: {error}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mirror_gate::MirrorGate;
    use crate::infrastructure::mirror_store::{DocKind, InMemoryMirrorStore, Selector};
    use chrono::DateTime;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    /// Wraps a store and records which thread wrote to it.
    #[derive(Default)]
    struct ThreadRecordingStore {
        inner: InMemoryMirrorStore,
        writer_thread: Mutex<Option<ThreadId>>,
    }

    impl MirrorStore for ThreadRecordingStore {
        fn replace_all(
            &self,
            documents: &[MirrorDocument],
            replicated_at: DateTime<Utc>,
        ) -> Result<(), InfraError> {
            self.writer_thread
                .lock()
                .expect("thread lock poisoned")
                .replace(thread::current().id());
            self.inner.replace_all(documents, replicated_at)
        }

        fn find(&self, selector: &Selector) -> Result<Vec<MirrorDocument>, InfraError> {
            self.inner.find(selector)
        }

        fn replication_state(&self) -> Result<Option<ReplicationState>, InfraError> {
            self.inner.replication_state()
        }
    }

    struct FakeSource {
        response: Mutex<Option<Result<Vec<MirrorDocument>, InfraError>>>,
    }

    impl FakeSource {
        fn new(response: Result<Vec<MirrorDocument>, InfraError>) -> Self {
            Self {
                response: Mutex::new(Some(response)),
            }
        }
    }

    #[async_trait]
    impl ReplicationSource for FakeSource {
        async fn fetch_documents(&self) -> Result<Vec<MirrorDocument>, InfraError> {
            self.response
                .lock()
                .expect("fake source lock poisoned")
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn credentials(server: &str) -> MarvinCredentials {
        MarvinCredentials {
            sync_server: server.to_string(),
            sync_database: "u-abc".to_string(),
            sync_user: "user".to_string(),
            sync_password: "secret".to_string(),
        }
    }

    #[test]
    fn all_docs_endpoint_appends_database() {
        let source = CouchReplicationSource::new(credentials("https://sync.example.com/"));
        let endpoint = source.all_docs_endpoint().expect("endpoint");
        assert_eq!(
            endpoint.as_str(),
            "https://sync.example.com/u-abc/_all_docs?include_docs=true"
        );
    }

    #[test]
    fn all_docs_response_skips_rows_without_documents() {
        let parsed: AllDocsResponse = serde_json::from_value(serde_json::json!({
            "total_rows": 3,
            "rows": [
                {"id": "a", "doc": {"_id": "a", "db": "Tasks", "parentId": "root"}},
                {"id": "b", "error": "not_found"},
                {"id": "_design/x", "doc": {"_id": "_design/x"}}
            ]
        }))
        .expect("parse all docs");
        let documents: Vec<MirrorDocument> = parsed
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .filter_map(MirrorDocument::from_json)
            .collect();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, "a");
    }

    #[tokio::test]
    async fn successful_replication_opens_gate() {
        let source = FakeSource::new(Ok(vec![
            MirrorDocument::from_json(serde_json::json!({
                "_id": "1", "db": "Categories", "parentId": "root", "title": "Work"
            }))
            .expect("document"),
        ]));
        let (publisher, gate) = MirrorGate::channel();
        replicate(&source, Arc::new(InMemoryMirrorStore::default()), publisher).await;

        let store = gate.ready().await.expect("gate open");
        let found = store
            .find(&Selector::children(DocKind::Categories, "root"))
            .expect("query mirror");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn failed_replication_fails_gate() {
        let source = FakeSource::new(Err(InfraError::Http {
            status: 401,
            body: "unauthorized".to_string(),
        }));
        let (publisher, gate) = MirrorGate::channel();
        replicate(&source, Arc::new(InMemoryMirrorStore::default()), publisher).await;

        match gate.ready().await {
            Err(InfraError::SyncFailed(cause)) => assert!(cause.contains("401")),
            other => panic!("expected sync failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn mirror_is_written_off_the_async_thread() {
        let source = FakeSource::new(Ok(vec![
            MirrorDocument::from_json(serde_json::json!({
                "_id": "t-1", "db": "Tasks", "parentId": "1", "title": "Write spec"
            }))
            .expect("document"),
        ]));
        let store = Arc::new(ThreadRecordingStore::default());
        let (publisher, gate) = MirrorGate::channel();
        replicate(&source, Arc::clone(&store) as Arc<dyn MirrorStore>, publisher).await;

        gate.ready().await.expect("gate open");
        let writer = store
            .writer_thread
            .lock()
            .expect("thread lock poisoned")
            .expect("mirror written");
        assert_ne!(writer, thread::current().id());
        let state = store
            .replication_state()
            .expect("read state")
            .expect("state exists");
        assert_eq!(state.document_count, 1);
    }
}
