//! SQLite-backed record storage with FTS5 full-text search.

mod fts;
mod records;

pub use fts::{DateOrder, KeywordQuery};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::DossierError;

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY when the host overlaps calls to the same user.
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const MIN_TITLE_LEN: usize = 3;
const MAX_TITLE_LEN: usize = 200;
const MAX_SUBTITLE_LEN: usize = 500;
const MAX_NARRATIVE_LEN: usize = 2000;
const MAX_LIST_ITEMS: usize = 20;
const MAX_LIST_ITEM_LEN: usize = 200;

/// What a record is about. Closed set; free-text classification happens
/// once at the tool boundary, never inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Profile,
    Contact,
    Preference,
    Schedule,
    Task,
    Decision,
    Insight,
    Context,
    Goal,
    Chat,
    Feedback,
    Personal,
}

impl MemoryType {
    pub const ALL: [MemoryType; 12] = [
        MemoryType::Profile,
        MemoryType::Contact,
        MemoryType::Preference,
        MemoryType::Schedule,
        MemoryType::Task,
        MemoryType::Decision,
        MemoryType::Insight,
        MemoryType::Context,
        MemoryType::Goal,
        MemoryType::Chat,
        MemoryType::Feedback,
        MemoryType::Personal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Profile => "profile",
            MemoryType::Contact => "contact",
            MemoryType::Preference => "preference",
            MemoryType::Schedule => "schedule",
            MemoryType::Task => "task",
            MemoryType::Decision => "decision",
            MemoryType::Insight => "insight",
            MemoryType::Context => "context",
            MemoryType::Goal => "goal",
            MemoryType::Chat => "chat",
            MemoryType::Feedback => "feedback",
            MemoryType::Personal => "personal",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = DossierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| DossierError::InvalidType(s.to_string()))
    }
}

/// How the record entered the store: stated by the user, learned from
/// conversation, or inferred by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Explicit,
    #[default]
    Learned,
    Inferred,
}

impl MemorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            MemorySource::Explicit => "explicit",
            MemorySource::Learned => "learned",
            MemorySource::Inferred => "inferred",
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = DossierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "explicit" => Ok(MemorySource::Explicit),
            "learned" => Ok(MemorySource::Learned),
            "inferred" => Ok(MemorySource::Inferred),
            _ => Err(DossierError::InvalidSource(s.to_string())),
        }
    }
}

pub const DEFAULT_CONFIDENCE: f64 = 0.7;

/// A durable fact learned about the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub confidence: f64,
    pub source: MemorySource,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// When the real-world event happened, as opposed to when we learned it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<i64>,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: i64,
    #[serde(default)]
    pub archived: bool,
}

impl MemoryRecord {
    /// Ordering key: the event time when known, else the ingestion time.
    pub fn effective_time(&self) -> i64 {
        self.occurred_at.unwrap_or(self.created_at)
    }
}

/// Input for creating a record. Id and timestamps are assigned by the store.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct NewMemory {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: Option<MemoryType>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<MemorySource>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub project: Option<String>,
    pub occurred_at: Option<i64>,
}

impl NewMemory {
    pub fn new(title: impl Into<String>, kind: MemoryType) -> Self {
        Self {
            title: title.into(),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn subtitle(mut self, s: impl Into<String>) -> Self {
        self.subtitle = Some(s.into());
        self
    }

    pub fn narrative(mut self, n: impl Into<String>) -> Self {
        self.narrative = Some(n.into());
        self
    }

    pub fn confidence(mut self, c: f64) -> Self {
        self.confidence = Some(c);
        self
    }

    pub fn source(mut self, s: MemorySource) -> Self {
        self.source = Some(s);
        self
    }

    pub fn facts(mut self, f: Vec<String>) -> Self {
        self.facts = f;
        self
    }

    pub fn concepts(mut self, c: Vec<String>) -> Self {
        self.concepts = c;
        self
    }

    pub fn entities(mut self, e: Vec<String>) -> Self {
        self.entities = e;
        self
    }

    pub fn project(mut self, p: impl Into<String>) -> Self {
        self.project = Some(p.into());
        self
    }

    pub fn occurred_at(mut self, ts: i64) -> Self {
        self.occurred_at = Some(ts);
        self
    }
}

/// Field-level partial update. Absent fields are left untouched.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<MemoryType>,
    pub confidence: Option<f64>,
    pub source: Option<MemorySource>,
    pub facts: Option<Vec<String>>,
    pub concepts: Option<Vec<String>>,
    pub entities: Option<Vec<String>>,
    pub project: Option<String>,
    pub occurred_at: Option<i64>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.subtitle.is_none()
            && self.narrative.is_none()
            && self.kind.is_none()
            && self.confidence.is_none()
            && self.source.is_none()
            && self.facts.is_none()
            && self.concepts.is_none()
            && self.entities.is_none()
            && self.project.is_none()
            && self.occurred_at.is_none()
    }
}

/// Compact search-index row: the whole of disclosure Layer 1.
#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Effective time: occurred_at when present, else created_at.
    pub timestamp: i64,
    pub confidence: f64,
}

impl From<&MemoryRecord> for IndexEntry {
    fn from(rec: &MemoryRecord) -> Self {
        IndexEntry {
            id: rec.id.clone(),
            title: rec.title.clone(),
            kind: rec.kind,
            project: rec.project.clone(),
            timestamp: rec.effective_time(),
            confidence: rec.confidence,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    pub by_kind: std::collections::HashMap<String, usize>,
}

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub active: usize,
    pub fts_indexed: usize,
    pub orphan_fts: usize,
    pub missing_fts: usize,
    pub ok: bool,
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

pub(crate) fn new_record_id() -> String {
    format!("mem_{}", uuid::Uuid::new_v4().simple())
}

fn validate_title(title: &str) -> Result<(), DossierError> {
    let n = title.trim().chars().count();
    if n < MIN_TITLE_LEN {
        return Err(DossierError::Validation(format!(
            "title too short (min {MIN_TITLE_LEN} chars)"
        )));
    }
    if n > MAX_TITLE_LEN {
        return Err(DossierError::Validation(format!(
            "title too long (max {MAX_TITLE_LEN} chars)"
        )));
    }
    Ok(())
}

fn validate_list(name: &str, items: &[String]) -> Result<(), DossierError> {
    if items.len() > MAX_LIST_ITEMS {
        return Err(DossierError::Validation(format!(
            "too many {name} (max {MAX_LIST_ITEMS})"
        )));
    }
    if let Some(item) = items.iter().find(|i| i.chars().count() > MAX_LIST_ITEM_LEN) {
        return Err(DossierError::Validation(format!(
            "{name} entry '{}' too long (max {MAX_LIST_ITEM_LEN} chars)",
            crate::util::truncate_chars(item, 40)
        )));
    }
    Ok(())
}

pub(crate) fn validate_confidence(c: f64) -> Result<(), DossierError> {
    if !c.is_finite() || !(0.0..=1.0).contains(&c) {
        return Err(DossierError::ConfidenceRange(c));
    }
    Ok(())
}

pub(crate) fn validate_new(input: &NewMemory) -> Result<(), DossierError> {
    validate_title(&input.title)?;
    if let Some(ref s) = input.subtitle {
        if s.chars().count() > MAX_SUBTITLE_LEN {
            return Err(DossierError::Validation(format!(
                "subtitle too long (max {MAX_SUBTITLE_LEN} chars)"
            )));
        }
    }
    if let Some(ref n) = input.narrative {
        if n.chars().count() > MAX_NARRATIVE_LEN {
            return Err(DossierError::Validation(format!(
                "narrative too long (max {MAX_NARRATIVE_LEN} chars)"
            )));
        }
    }
    if let Some(c) = input.confidence {
        validate_confidence(c)?;
    }
    validate_list("facts", &input.facts)?;
    validate_list("concepts", &input.concepts)?;
    validate_list("entities", &input.entities)?;
    Ok(())
}

pub(crate) fn validate_patch(patch: &MemoryPatch) -> Result<(), DossierError> {
    if let Some(ref t) = patch.title {
        validate_title(t)?;
    }
    if let Some(ref s) = patch.subtitle {
        if s.chars().count() > MAX_SUBTITLE_LEN {
            return Err(DossierError::Validation(format!(
                "subtitle too long (max {MAX_SUBTITLE_LEN} chars)"
            )));
        }
    }
    if let Some(ref n) = patch.narrative {
        if n.chars().count() > MAX_NARRATIVE_LEN {
            return Err(DossierError::Validation(format!(
                "narrative too long (max {MAX_NARRATIVE_LEN} chars)"
            )));
        }
    }
    if let Some(c) = patch.confidence {
        validate_confidence(c)?;
    }
    if let Some(ref f) = patch.facts {
        validate_list("facts", f)?;
    }
    if let Some(ref c) = patch.concepts {
        validate_list("concepts", c)?;
    }
    if let Some(ref e) = patch.entities {
        validate_list("entities", e)?;
    }
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    subtitle TEXT,
    narrative TEXT,
    kind TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.7,
    source TEXT NOT NULL DEFAULT 'learned',
    facts TEXT NOT NULL DEFAULT '[]',
    concepts TEXT NOT NULL DEFAULT '[]',
    entities TEXT NOT NULL DEFAULT '[]',
    project TEXT,
    occurred_at INTEGER,
    created_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind);
CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);
CREATE INDEX IF NOT EXISTS idx_memories_archived ON memories(archived);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
"#;

// External-content-free FTS table; rows are written and deleted by the same
// code paths that write the main table, never by triggers. The index invariant
// is checked by `integrity()`.
const FTS_SCHEMA: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(\
     id UNINDEXED, title, subtitle, narrative, facts, concepts, tokenize='unicode61')";

/// SQLite-backed relational store for one user's records.
pub struct MemoryDb {
    pool: Pool<SqliteConnectionManager>,
}

impl MemoryDb {
    pub(crate) fn conn(&self) -> Result<PooledConn, DossierError> {
        self.pool
            .get()
            .map_err(|e| DossierError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a database at the given path.
    /// Pool size defaults to 8 (1 writer + 7 readers in WAL mode).
    pub fn open(path: &str) -> Result<Self, DossierError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each test gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| DossierError::Internal(format!("pool: {e}")))?;

        let conn = pool
            .get()
            .map_err(|e| DossierError::Internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(FTS_SCHEMA, [])?;
        drop(conn);

        Ok(Self { pool })
    }

    /// Database file size in bytes (via SQLite pragma).
    pub fn size_bytes(&self) -> i64 {
        self.conn()
            .and_then(|c| {
                c.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count, pragma_page_size",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| DossierError::Internal(e.to_string()))
            })
            .unwrap_or(0)
    }
}

fn column_list(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

/// Column order must match `RECORD_COLS`.
pub(crate) const RECORD_COLS: &str = "id, title, subtitle, narrative, kind, confidence, source, \
    facts, concepts, entities, project, occurred_at, created_at, last_accessed, access_count, archived";

pub(crate) fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
    let kind_raw: String = row.get(4)?;
    let source_raw: String = row.get(6)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        subtitle: row.get(2)?,
        narrative: row.get(3)?,
        kind: kind_raw.parse().unwrap_or(MemoryType::Context),
        confidence: row.get(5)?,
        source: source_raw.parse().unwrap_or_default(),
        facts: column_list(row, 7)?,
        concepts: column_list(row, 8)?,
        entities: column_list(row, 9)?,
        project: row.get(10)?,
        occurred_at: row.get(11)?,
        created_at: row.get(12)?,
        last_accessed: row.get(13)?,
        access_count: row.get(14)?,
        archived: row.get::<_, i64>(15)? != 0,
    })
}
