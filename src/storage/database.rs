//! SQLite evidence store with migrations
//!
//! Chunks live in `evidence_chunks`. An FTS5 external-content table mirrors
//! their text when full-text indexing is enabled, and the
//! `vec_cosine_distance` SQL function is registered on every pooled
//! connection when vector functions are enabled.

use super::{
    EvidenceStore, InsertOutcome, NewChunk, ProjectId, ReferenceType, ScoredChunk, StoreError,
    StoredChunk,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::LazyLock;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const VECTOR_FEATURE: &str = "vector search";
const FULL_TEXT_FEATURE: &str = "native full-text search";

static FTS_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("term pattern is valid"));

/// Backend features to enable when opening the store
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub pool_size: u32,
    /// Register `vec_cosine_distance` on every connection
    pub vector_functions: bool,
    /// Create and maintain the FTS5 index
    pub full_text: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            pool_size: 8,
            vector_functions: true,
            full_text: true,
        }
    }
}

pub struct SqliteEvidenceStore {
    pool: DbPool,
    options: StoreOptions,
}

impl SqliteEvidenceStore {
    /// Open (creating if needed) the database at `db_path` and apply migrations.
    pub fn open(db_path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let vector_functions = options.vector_functions;
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            if vector_functions {
                register_vector_functions(conn)?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(options.pool_size.max(1))
            .build(manager)
            .map_err(|e| StoreError::Connection(format!("Failed to create connection pool: {}", e)))?;

        let store = Self { pool, options };
        store.migrate()?;
        if options.full_text {
            store.ensure_full_text_index()?;
        }

        Ok(store)
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Connection(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i64 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Create the FTS5 mirror if the SQLite build has the module.
    fn ensure_full_text_index(&self) -> Result<(), StoreError> {
        let conn = self.get_conn()?;

        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE name = 'evidence_chunks_fts'",
            [],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(());
        }

        match conn.execute_batch(FULL_TEXT_SCHEMA) {
            Ok(()) => {
                // Index rows written before the mirror existed
                conn.execute(
                    "INSERT INTO evidence_chunks_fts(evidence_chunks_fts) VALUES('rebuild')",
                    [],
                )?;
                tracing::info!("Created full-text index");
                Ok(())
            }
            Err(e) => match classify(FULL_TEXT_FEATURE, e) {
                StoreError::Unsupported { message, .. } => {
                    tracing::info!("Full-text index unavailable: {}", message);
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    fn pin_dimension(
        conn: &Connection,
        project_id: ProjectId,
        dimension: usize,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let pinned: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM project_embeddings WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;

        match pinned {
            Some(expected) if expected as usize != dimension => Err(StoreError::DimensionMismatch {
                project_id,
                expected: expected as usize,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT INTO project_embeddings (project_id, dimension, model, pinned_at)
                     VALUES (?1, ?2, ?3, datetime('now'))",
                    params![project_id, dimension as i64, model],
                )?;
                Ok(())
            }
        }
    }
}

impl EvidenceStore for SqliteEvidenceStore {
    fn insert_chunk(&self, chunk: &NewChunk) -> Result<InsertOutcome, StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let embedding = chunk.embedding.as_deref().filter(|e| !e.is_empty());
        if let Some(embedding) = embedding {
            Self::pin_dimension(
                &tx,
                chunk.project_id,
                embedding.len(),
                chunk.embedding_model.as_deref(),
            )?;
        }

        let changed = tx.execute(
            "INSERT OR IGNORE INTO evidence_chunks
                (project_id, reference_type, reference_path, commit_sha, chunk_index,
                 text, token_count, embedding, content_hash, meta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                chunk.project_id,
                chunk.reference_type.as_str(),
                chunk.reference_path,
                chunk.commit_sha,
                chunk.chunk_index as i64,
                chunk.text,
                chunk.token_count as i64,
                embedding.map(encode_embedding),
                chunk.content_hash,
                chunk.meta.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        let outcome = if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted(tx.last_insert_rowid())
        };
        tx.commit()?;

        Ok(outcome)
    }

    fn chunk_exists(
        &self,
        project_id: ProjectId,
        reference_path: &str,
        chunk_index: usize,
        content_hash: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.get_conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM evidence_chunks
                WHERE project_id = ?1 AND reference_path = ?2
                  AND chunk_index = ?3 AND content_hash = ?4
            )",
            params![project_id, reference_path, chunk_index as i64, content_hash],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn query_by_vector_distance(
        &self,
        project_id: ProjectId,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if !self.options.vector_functions {
            return Err(disabled(VECTOR_FEATURE));
        }

        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT * FROM (
                SELECT {}, vec_cosine_distance(embedding, ?2) AS distance
                FROM evidence_chunks
                WHERE project_id = ?1 AND embedding IS NOT NULL
             )
             WHERE distance IS NOT NULL
             ORDER BY distance ASC, id ASC
             LIMIT ?3",
            CHUNK_COLUMNS
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| classify(VECTOR_FEATURE, e))?;
        let rows = stmt.query_map(
            params![project_id, encode_embedding(vector), k as i64],
            |row| {
                Ok(ScoredChunk {
                    chunk: chunk_from_row(row)?,
                    score: row.get("distance")?,
                })
            },
        )?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_by_native_full_text(
        &self,
        project_id: ProjectId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if !self.options.full_text {
            return Err(disabled(FULL_TEXT_FEATURE));
        }

        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let conn = self.get_conn()?;
        let columns = CHUNK_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {}, -bm25(evidence_chunks_fts) AS relevance
             FROM evidence_chunks_fts
             JOIN evidence_chunks c ON c.id = evidence_chunks_fts.rowid
             WHERE evidence_chunks_fts MATCH ?2 AND c.project_id = ?1
             ORDER BY relevance DESC, c.id ASC
             LIMIT ?3",
            columns
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| classify(FULL_TEXT_FEATURE, e))?;
        let rows = stmt.query_map(params![project_id, match_expr, k as i64], |row| {
            Ok(ScoredChunk {
                chunk: chunk_from_row(row)?,
                score: row.get("relevance")?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn scan_all_chunks(&self, project_id: ProjectId) -> Result<Vec<StoredChunk>, StoreError> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM evidence_chunks WHERE project_id = ?1 ORDER BY id ASC",
            CHUNK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], chunk_from_row)?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count_chunks(&self, project_id: ProjectId) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM evidence_chunks WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn embedding_dimension(&self, project_id: ProjectId) -> Result<Option<usize>, StoreError> {
        let conn = self.get_conn()?;
        let dimension: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM project_embeddings WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dimension.map(|d| d as usize))
    }

    fn clear_embeddings(&self, project_id: ProjectId) -> Result<usize, StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let cleared = tx.execute(
            "UPDATE evidence_chunks SET embedding = NULL
             WHERE project_id = ?1 AND embedding IS NOT NULL",
            params![project_id],
        )?;
        tx.execute(
            "DELETE FROM project_embeddings WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.commit()?;

        tracing::info!("Cleared {} embeddings for project {}", cleared, project_id);
        Ok(cleared)
    }

    fn set_embedding(
        &self,
        chunk_id: i64,
        embedding: &[f32],
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let project_id: ProjectId = tx
            .query_row(
                "SELECT project_id FROM evidence_chunks WHERE id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::ChunkNotFound(chunk_id))?;

        Self::pin_dimension(&tx, project_id, embedding.len(), model)?;
        tx.execute(
            "UPDATE evidence_chunks SET embedding = ?2 WHERE id = ?1",
            params![chunk_id, encode_embedding(embedding)],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn probe_vector_search(&self) -> Result<(), StoreError> {
        if !self.options.vector_functions {
            return Err(disabled(VECTOR_FEATURE));
        }
        let conn = self.get_conn()?;
        let probe = encode_embedding(&[1.0, 0.0]);
        conn.query_row(
            "SELECT vec_cosine_distance(?1, ?1)",
            params![probe],
            |row| row.get::<_, Option<f64>>(0),
        )
        .map_err(|e| classify(VECTOR_FEATURE, e))?;
        Ok(())
    }

    fn probe_full_text(&self) -> Result<(), StoreError> {
        if !self.options.full_text {
            return Err(disabled(FULL_TEXT_FEATURE));
        }
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT rowid FROM evidence_chunks_fts WHERE evidence_chunks_fts MATCH 'probe' LIMIT 0",
            )
            .map_err(|e| classify(FULL_TEXT_FEATURE, e))?;
        let mut rows = stmt.query([]).map_err(|e| classify(FULL_TEXT_FEATURE, e))?;
        rows.next().map_err(|e| classify(FULL_TEXT_FEATURE, e))?;
        Ok(())
    }
}

const CHUNK_COLUMNS: &str = "id, project_id, reference_type, reference_path, commit_sha, \
chunk_index, text, token_count, content_hash, meta, embedding_bytes";

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<StoredChunk> {
    let meta: Option<String> = row.get("meta")?;
    let embedding_bytes: Option<i64> = row.get("embedding_bytes")?;

    Ok(StoredChunk {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        reference_type: row.get("reference_type")?,
        reference_path: row.get("reference_path")?,
        commit_sha: row.get("commit_sha")?,
        chunk_index: row.get::<_, i64>("chunk_index")? as usize,
        text: row.get("text")?,
        token_count: row.get::<_, i64>("token_count")? as usize,
        content_hash: row.get("content_hash")?,
        meta: meta
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        embedding_dimension: embedding_bytes.map(|b| b as usize / 4),
    })
}

impl FromSql for ReferenceType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Build an FTS5 expression: each word quoted, OR-joined.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = FTS_TERM
        .find_iter(query)
        .map(|m| format!("\"{}\"", m.as_str().to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn disabled(feature: &'static str) -> StoreError {
    StoreError::Unsupported {
        feature,
        message: "disabled by configuration".to_string(),
    }
}

/// Separate "feature missing" from real failures.
///
/// SQLite reports a missing function, module or table as a generic
/// `SQLITE_ERROR` with a descriptive message.
fn classify(feature: &'static str, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ffi_err, Some(message)) = &err {
        let missing = message.contains("no such function")
            || message.contains("no such module")
            || message.contains("no such table");
        if ffi_err.code == ErrorCode::Unknown && missing {
            return StoreError::Unsupported {
                feature,
                message: message.clone(),
            };
        }
    }
    StoreError::Sqlite(err)
}

/// Little-endian f32 encoding used for the `embedding` column
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Cosine distance of two encoded vectors; `None` for mismatched lengths or zero vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn register_vector_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "vec_cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: Option<Vec<u8>> = ctx.get(0)?;
            let b: Option<Vec<u8>> = ctx.get(1)?;
            let distance = match (a, b) {
                (Some(a), Some(b)) => decode_embedding(&a)
                    .zip(decode_embedding(&b))
                    .and_then(|(a, b)| cosine_distance(&a, &b)),
                _ => None,
            };
            Ok(distance)
        },
    )
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: evidence chunks and pinned embedding dimensions
    r#"
    CREATE TABLE evidence_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        reference_type TEXT NOT NULL,
        reference_path TEXT NOT NULL,
        commit_sha TEXT,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        embedding BLOB,
        embedding_bytes INTEGER GENERATED ALWAYS AS (length(embedding)) VIRTUAL,
        content_hash TEXT NOT NULL,
        meta TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (project_id, reference_path, chunk_index, content_hash)
    );

    CREATE INDEX idx_evidence_chunks_project ON evidence_chunks(project_id);
    CREATE INDEX idx_evidence_chunks_reference ON evidence_chunks(project_id, reference_path);

    CREATE TABLE project_embeddings (
        project_id INTEGER PRIMARY KEY,
        dimension INTEGER NOT NULL,
        model TEXT,
        pinned_at TEXT NOT NULL
    );
    "#,
];

const FULL_TEXT_SCHEMA: &str = r#"
    CREATE VIRTUAL TABLE evidence_chunks_fts USING fts5(
        text,
        content = 'evidence_chunks',
        content_rowid = 'id'
    );

    CREATE TRIGGER evidence_chunks_fts_insert AFTER INSERT ON evidence_chunks BEGIN
        INSERT INTO evidence_chunks_fts(rowid, text) VALUES (new.id, new.text);
    END;

    CREATE TRIGGER evidence_chunks_fts_delete AFTER DELETE ON evidence_chunks BEGIN
        INSERT INTO evidence_chunks_fts(evidence_chunks_fts, rowid, text)
        VALUES ('delete', old.id, old.text);
    END;
"#;
