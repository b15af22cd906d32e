use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// `db` field of a replicated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Tasks,
    Categories,
}

impl DocKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "Tasks",
            Self::Categories => "Categories",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorDocument {
    pub id: String,
    pub db: Option<String>,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub body: serde_json::Value,
}

impl MirrorDocument {
    /// Lifts the indexed fields out of a raw document. Design documents and
    /// documents without an id are skipped.
    pub fn from_json(body: serde_json::Value) -> Option<Self> {
        let id = body
            .get("_id")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.starts_with("_design/"))?
            .to_string();
        let field = |name: &str| {
            body.get(name)
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned)
        };
        Some(Self {
            id,
            db: field("db"),
            parent_id: field("parentId"),
            title: field("title"),
            body,
        })
    }

    fn matches(&self, selector: &Selector) -> bool {
        self.db.as_deref() == Some(selector.kind.as_str())
            && self.parent_id.as_deref() == Some(selector.parent_id.as_str())
            && selector
                .title
                .as_deref()
                .is_none_or(|title| self.title.as_deref() == Some(title))
    }
}

/// Equality selector over `{db, parentId, title?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub kind: DocKind,
    pub parent_id: String,
    pub title: Option<String>,
}

impl Selector {
    pub fn children(kind: DocKind, parent_id: impl Into<String>) -> Self {
        Self {
            kind,
            parent_id: parent_id.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationState {
    pub document_count: usize,
    pub last_replicated_at: DateTime<Utc>,
}

/// Local copy of the task service's documents. Query results are ordered by
/// ascending document id.
pub trait MirrorStore: Send + Sync {
    fn replace_all(
        &self,
        documents: &[MirrorDocument],
        replicated_at: DateTime<Utc>,
    ) -> Result<(), InfraError>;
    fn find(&self, selector: &Selector) -> Result<Vec<MirrorDocument>, InfraError>;
    fn replication_state(&self) -> Result<Option<ReplicationState>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteMirrorStore {
    db_path: PathBuf,
}

impl SqliteMirrorStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store.connect()?.execute_batch(SCHEMA_SQL)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl MirrorStore for SqliteMirrorStore {
    fn replace_all(
        &self,
        documents: &[MirrorDocument],
        replicated_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        transaction.execute("DELETE FROM documents", [])?;
        {
            let mut insert = transaction.prepare(
                "INSERT INTO documents (id, db, parent_id, title, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   db = excluded.db,
                   parent_id = excluded.parent_id,
                   title = excluded.title,
                   body = excluded.body",
            )?;
            for document in documents {
                insert.execute(params![
                    document.id,
                    document.db,
                    document.parent_id,
                    document.title,
                    serde_json::to_string(&document.body)?,
                ])?;
            }
        }
        transaction.execute(
            "INSERT INTO replication_state (id, document_count, last_replicated_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
               document_count = excluded.document_count,
               last_replicated_at = excluded.last_replicated_at",
            params![documents.len() as i64, replicated_at.to_rfc3339()],
        )?;
        transaction.commit()?;
        Ok(())
    }

    fn find(&self, selector: &Selector) -> Result<Vec<MirrorDocument>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, db, parent_id, title, body FROM documents
             WHERE db = ?1 AND parent_id = ?2 AND (?3 IS NULL OR title = ?3)
             ORDER BY id ASC",
        )?;
        let rows = statement.query_map(
            params![
                selector.kind.as_str(),
                selector.parent_id,
                selector.title
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, db, parent_id, title, body) = row?;
            documents.push(MirrorDocument {
                id,
                db,
                parent_id,
                title,
                body: serde_json::from_str(&body)?,
            });
        }
        Ok(documents)
    }

    fn replication_state(&self) -> Result<Option<ReplicationState>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(i64, String)> = connection
            .query_row(
                "SELECT document_count, last_replicated_at FROM replication_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((document_count, last_replicated_at_raw)) = row else {
            return Ok(None);
        };
        let last_replicated_at = DateTime::parse_from_rfc3339(&last_replicated_at_raw)
            .map_err(|error| {
                InfraError::InvalidConfig(format!(
                    "invalid replication_state.last_replicated_at '{last_replicated_at_raw}': {error}"
                ))
            })?
            .with_timezone(&Utc);

        Ok(Some(ReplicationState {
            document_count: usize::try_from(document_count).unwrap_or_default(),
            last_replicated_at,
        }))
    }
}

/// Documents keyed by id, plus a parent id index standing in for child lists.
#[derive(Debug, Default)]
struct Arena {
    documents: BTreeMap<String, MirrorDocument>,
    children: HashMap<String, BTreeSet<String>>,
    state: Option<ReplicationState>,
}

#[derive(Debug, Default)]
pub struct InMemoryMirrorStore {
    arena: Mutex<Arena>,
}

impl InMemoryMirrorStore {
    pub fn with_documents(documents: Vec<MirrorDocument>) -> Result<Self, InfraError> {
        let store = Self::default();
        store.replace_all(&documents, Utc::now())?;
        Ok(store)
    }
}

impl MirrorStore for InMemoryMirrorStore {
    fn replace_all(
        &self,
        documents: &[MirrorDocument],
        replicated_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut arena = self
            .arena
            .lock()
            .map_err(|error| InfraError::SyncFailed(format!("mirror lock poisoned: {error}")))?;
        arena.documents.clear();
        arena.children.clear();
        for document in documents {
            if let Some(parent_id) = document.parent_id.as_ref() {
                arena
                    .children
                    .entry(parent_id.clone())
                    .or_default()
                    .insert(document.id.clone());
            }
            arena.documents.insert(document.id.clone(), document.clone());
        }
        arena.state = Some(ReplicationState {
            document_count: arena.documents.len(),
            last_replicated_at: replicated_at,
        });
        Ok(())
    }

    fn find(&self, selector: &Selector) -> Result<Vec<MirrorDocument>, InfraError> {
        let arena = self
            .arena
            .lock()
            .map_err(|error| InfraError::SyncFailed(format!("mirror lock poisoned: {error}")))?;
        let Some(child_ids) = arena.children.get(&selector.parent_id) else {
            return Ok(Vec::new());
        };
        Ok(child_ids
            .iter()
            .filter_map(|id| arena.documents.get(id))
            .filter(|document| document.matches(selector))
            .cloned()
            .collect())
    }

    fn replication_state(&self) -> Result<Option<ReplicationState>, InfraError> {
        let arena = self
            .arena
            .lock()
            .map_err(|error| InfraError::SyncFailed(format!("mirror lock poisoned: {error}")))?;
        Ok(arena.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "timesync-mirror-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            Self { dir }
        }

        fn store(&self) -> SqliteMirrorStore {
            SqliteMirrorStore::open(self.dir.join("mirror.sqlite")).expect("open mirror")
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn document(body: serde_json::Value) -> MirrorDocument {
        MirrorDocument::from_json(body).expect("document with id")
    }

    fn sample_documents() -> Vec<MirrorDocument> {
        vec![
            document(serde_json::json!({"_id": "2", "db": "Categories", "parentId": "root", "title": "Home", "type": "category"})),
            document(serde_json::json!({"_id": "1", "db": "Categories", "parentId": "root", "title": "Work", "type": "category"})),
            document(serde_json::json!({"_id": "t-2", "db": "Tasks", "parentId": "1", "title": "Review", "times": []})),
            document(serde_json::json!({"_id": "t-1", "db": "Tasks", "parentId": "1", "title": "Write spec", "times": [1000, 5000]})),
            document(serde_json::json!({"_id": "t-3", "db": "Tasks", "parentId": "2", "title": "Laundry"})),
        ]
    }

    fn ids(documents: &[MirrorDocument]) -> Vec<&str> {
        documents.iter().map(|document| document.id.as_str()).collect()
    }

    fn assert_store_queries(store: &dyn MirrorStore) {
        let categories = store
            .find(&Selector::children(DocKind::Categories, "root"))
            .expect("find categories");
        assert_eq!(ids(&categories), vec!["1", "2"]);

        let work = store
            .find(&Selector::children(DocKind::Categories, "root").with_title("Work"))
            .expect("find work");
        assert_eq!(ids(&work), vec!["1"]);

        let tasks = store
            .find(&Selector::children(DocKind::Tasks, "1"))
            .expect("find tasks");
        assert_eq!(ids(&tasks), vec!["t-1", "t-2"]);
        assert_eq!(tasks[0].body["times"], serde_json::json!([1000, 5000]));

        let none = store
            .find(&Selector::children(DocKind::Tasks, "missing"))
            .expect("find nothing");
        assert!(none.is_empty());
    }

    #[test]
    fn design_documents_are_skipped() {
        assert!(MirrorDocument::from_json(serde_json::json!({"_id": "_design/idx"})).is_none());
        assert!(MirrorDocument::from_json(serde_json::json!({"title": "no id"})).is_none());
    }

    #[test]
    fn sqlite_store_answers_selector_queries() {
        let database = TempDatabase::new();
        let store = database.store();
        store
            .replace_all(&sample_documents(), Utc::now())
            .expect("replace documents");
        assert_store_queries(&store);
    }

    #[test]
    fn in_memory_store_answers_selector_queries() {
        let store = InMemoryMirrorStore::with_documents(sample_documents()).expect("seed store");
        assert_store_queries(&store);
    }

    #[test]
    fn replace_all_drops_stale_documents_and_records_state() {
        let database = TempDatabase::new();
        let store = database.store();
        assert!(store.replication_state().expect("read state").is_none());

        store
            .replace_all(&sample_documents(), Utc::now())
            .expect("first replication");
        let replicated_at = DateTime::parse_from_rfc3339("2026-02-16T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        store
            .replace_all(&sample_documents()[..2], replicated_at)
            .expect("second replication");

        let tasks = store
            .find(&Selector::children(DocKind::Tasks, "1"))
            .expect("find tasks");
        assert!(tasks.is_empty());

        let state = store.replication_state().expect("read state").expect("state exists");
        assert_eq!(state.document_count, 2);
        assert_eq!(state.last_replicated_at, replicated_at);
    }
}
