use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use redline_core::error::{RedlineError, Result};
use redline_core::traits::RecordStore;
use redline_core::types::{Category, ClassificationResult};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS docs (
        doc_id TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        uploaded_at TEXT NOT NULL,
        status TEXT NOT NULL,
        page_count INTEGER NOT NULL DEFAULT 0,
        image_count INTEGER NOT NULL DEFAULT 0,
        legibility_score REAL,
        source_path TEXT
    );

    CREATE TABLE IF NOT EXISTS classifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id TEXT NOT NULL,
        classified_at TEXT NOT NULL,
        final_category TEXT NOT NULL,
        secondary_tags TEXT NOT NULL,
        confidence REAL NOT NULL,
        explanation TEXT NOT NULL,
        citations TEXT NOT NULL,
        page_count INTEGER NOT NULL,
        image_count INTEGER NOT NULL,
        legibility_score REAL,
        content_safety TEXT NOT NULL,
        requires_review INTEGER NOT NULL,
        dual_llm_agreement REAL NOT NULL,
        dual_llm_disagreements TEXT,
        primary_analysis TEXT NOT NULL,
        secondary_analysis TEXT NOT NULL,
        summary TEXT NOT NULL,
        raw_signals TEXT NOT NULL,
        llm_payload TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_classifications_doc
        ON classifications(doc_id, id);";

const SELECT_CLASSIFICATION: &str = "SELECT doc_id, classified_at, final_category, secondary_tags,
        confidence, explanation, citations, page_count, image_count, legibility_score,
        content_safety, requires_review, dual_llm_agreement, dual_llm_disagreements,
        primary_analysis, secondary_analysis, summary, raw_signals, llm_payload
    FROM classifications";

/// Lifecycle state of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    Processing,
    Classified,
    Failed,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Classified => "classified",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "classified" => Self::Classified,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

/// One row of the `docs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct DocRecord {
    pub doc_id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocStatus,
    pub page_count: usize,
    pub image_count: usize,
    pub legibility_score: Option<f64>,
    pub source_path: Option<String>,
}

impl DocRecord {
    pub fn new(doc_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            filename: filename.into(),
            uploaded_at: Utc::now(),
            status: DocStatus::Processing,
            page_count: 0,
            image_count: 0,
            legibility_score: None,
            source_path: None,
        }
    }

    pub fn with_counts(mut self, page_count: usize, image_count: usize) -> Self {
        self.page_count = page_count;
        self.image_count = image_count;
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

/// SQLite-backed store for documents and their classifications.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RedlineError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Record store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| RedlineError::Database(e.to_string()))
    }

    /// Register a document, replacing any earlier row with the same id.
    pub fn insert_doc_record(&self, doc: &DocRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO docs
                (doc_id, filename, uploaded_at, status, page_count, image_count, legibility_score, source_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                doc.doc_id,
                doc.filename,
                doc.uploaded_at.to_rfc3339(),
                doc.status.as_str(),
                doc.page_count as i64,
                doc.image_count as i64,
                doc.legibility_score,
                doc.source_path,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Update a document's status. Returns false when the document is unknown.
    pub fn update_doc_status(&self, doc_id: &str, status: DocStatus) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE docs SET status = ?1 WHERE doc_id = ?2",
                params![status.as_str(), doc_id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn get_doc(&self, doc_id: &str) -> Result<Option<DocRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT doc_id, filename, uploaded_at, status, page_count, image_count, legibility_score, source_path
             FROM docs WHERE doc_id = ?1",
            params![doc_id],
            |row| {
                let uploaded_at: String = row.get(2)?;
                let status: String = row.get(3)?;
                Ok(DocRecord {
                    doc_id: row.get(0)?,
                    filename: row.get(1)?,
                    uploaded_at: parse_timestamp(&uploaded_at),
                    status: DocStatus::parse(&status),
                    page_count: row.get::<_, i64>(4)? as usize,
                    image_count: row.get::<_, i64>(5)? as usize,
                    legibility_score: row.get(6)?,
                    source_path: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    /// Latest classification for a document.
    pub fn get(&self, doc_id: &str) -> Result<Option<ClassificationResult>> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE doc_id = ?1 ORDER BY id DESC LIMIT 1", SELECT_CLASSIFICATION);
        let row = conn
            .query_row(&sql, params![doc_id], StoredRow::from_row)
            .optional()
            .map_err(db_err)?;
        row.map(StoredRow::into_result).transpose()
    }

    /// Most recent classifications, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ClassificationResult>> {
        let conn = self.lock()?;
        let sql = format!("{} ORDER BY id DESC LIMIT ?1", SELECT_CLASSIFICATION);
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], StoredRow::from_row)
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?.into_result()?);
        }
        Ok(results)
    }
}

impl RecordStore for SqliteRecordStore {
    fn save_classification<'a>(
        &'a self,
        result: &'a ClassificationResult,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let disagreements = result
                .dual_llm_disagreements
                .as_ref()
                .filter(|d| !d.is_empty())
                .map(to_json)
                .transpose()?;

            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO classifications (
                    doc_id, classified_at, final_category, secondary_tags, confidence,
                    explanation, citations, page_count, image_count, legibility_score,
                    content_safety, requires_review, dual_llm_agreement, dual_llm_disagreements,
                    primary_analysis, secondary_analysis, summary, raw_signals, llm_payload
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    result.doc_id,
                    result.classified_at.to_rfc3339(),
                    result.final_category.as_str(),
                    to_json(&result.secondary_tags)?,
                    result.confidence,
                    result.explanation,
                    to_json(&result.citations)?,
                    result.page_count as i64,
                    result.image_count as i64,
                    result.legibility_score,
                    result.content_safety,
                    result.requires_review,
                    result.dual_llm_agreement,
                    disagreements,
                    to_json(&result.primary_analysis)?,
                    to_json(&result.secondary_analysis)?,
                    to_json(&result.summary)?,
                    to_json(&result.raw_signals)?,
                    to_json(&result.llm_payload)?,
                ],
            )
            .map_err(db_err)?;

            // Documents classified without a prior upload row still get one
            tx.execute(
                "INSERT INTO docs (doc_id, filename, uploaded_at, status, page_count, image_count, legibility_score)
                 VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(doc_id) DO UPDATE SET
                    status = excluded.status,
                    page_count = excluded.page_count,
                    image_count = excluded.image_count,
                    legibility_score = COALESCE(excluded.legibility_score, docs.legibility_score)",
                params![
                    result.doc_id,
                    result.classified_at.to_rfc3339(),
                    DocStatus::Classified.as_str(),
                    result.page_count as i64,
                    result.image_count as i64,
                    result.legibility_score,
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            debug!(doc_id = %result.doc_id, category = %result.final_category, "Classification stored");
            Ok(())
        })
    }
}

/// Raw column values of one `classifications` row.
struct StoredRow {
    doc_id: String,
    classified_at: String,
    final_category: String,
    secondary_tags: String,
    confidence: f64,
    explanation: String,
    citations: String,
    page_count: i64,
    image_count: i64,
    legibility_score: Option<f64>,
    content_safety: String,
    requires_review: bool,
    dual_llm_agreement: f64,
    dual_llm_disagreements: Option<String>,
    primary_analysis: String,
    secondary_analysis: String,
    summary: String,
    raw_signals: String,
    llm_payload: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            doc_id: row.get(0)?,
            classified_at: row.get(1)?,
            final_category: row.get(2)?,
            secondary_tags: row.get(3)?,
            confidence: row.get(4)?,
            explanation: row.get(5)?,
            citations: row.get(6)?,
            page_count: row.get(7)?,
            image_count: row.get(8)?,
            legibility_score: row.get(9)?,
            content_safety: row.get(10)?,
            requires_review: row.get(11)?,
            dual_llm_agreement: row.get(12)?,
            dual_llm_disagreements: row.get(13)?,
            primary_analysis: row.get(14)?,
            secondary_analysis: row.get(15)?,
            summary: row.get(16)?,
            raw_signals: row.get(17)?,
            llm_payload: row.get(18)?,
        })
    }

    fn into_result(self) -> Result<ClassificationResult> {
        let final_category: Category = self
            .final_category
            .parse()
            .map_err(RedlineError::Database)?;
        let summary: redline_core::types::Summary = from_json(&self.summary)?;
        let dual_llm_disagreements = self
            .dual_llm_disagreements
            .as_deref()
            .map(from_json)
            .transpose()?;

        Ok(ClassificationResult {
            doc_id: self.doc_id,
            final_category,
            secondary_tags: from_json(&self.secondary_tags)?,
            confidence: self.confidence,
            explanation: self.explanation,
            page_count: self.page_count as usize,
            image_count: self.image_count as usize,
            content_safety: self.content_safety,
            citations: from_json(&self.citations)?,
            raw_signals: from_json(&self.raw_signals)?,
            llm_payload: from_json(&self.llm_payload)?,
            requires_review: self.requires_review,
            review_triggers: summary.review.triggers.clone(),
            dual_llm_agreement: self.dual_llm_agreement,
            dual_llm_disagreements,
            primary_analysis: from_json(&self.primary_analysis)?,
            secondary_analysis: from_json(&self.secondary_analysis)?,
            summary,
            legibility_score: self.legibility_score,
            classified_at: parse_timestamp(&self.classified_at),
        })
    }
}

fn db_err(e: rusqlite::Error) -> RedlineError {
    RedlineError::Database(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| RedlineError::Database(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| RedlineError::Database(e.to_string()))
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
