//! SQLite backend with FTS5 full-text search.
//!
//! Uses a single SQLite database file with these tables:
//! - `memories`: long-term memory records (embedding stored as an f32 LE blob)
//! - `memories_fts`: FTS5 virtual table for ranked keyword search (BM25)
//! - `conversations`: per-session turns, append-only
//! - `system_knowledge`: structured facts, unique on (domain, key)
//!
//! Triggers keep the FTS index in sync on insert/delete and on content
//! updates. Vector ranking loads candidate embeddings and scores them in
//! process; there is no vector index.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
//! comparisons order them correctly.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use opsclaw_core::conversation::{ConversationStore, ConversationTurn};
use opsclaw_core::error::MemoryError;
use opsclaw_core::knowledge::{KnowledgeBase, KnowledgeFact, rank_facts};
use opsclaw_core::memory::{
    MemoryCategory, MemoryRecord, MemoryStats, MemoryStorage, PrunePolicy, PruneReport,
    SearchFilter, query_terms,
};
use opsclaw_core::message::Role;

use crate::vector;

/// A production SQLite backend for memories, conversations and knowledge.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to ":memory:" is a separate database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        info!("SQLite storage initialized at {path}");
        Ok(storage)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run schema migrations: tables, FTS5 virtual table, triggers and indexes.
    async fn run_migrations(&self) -> Result<(), MemoryError> {
        let statements: [(&str, &str); 9] = [
            (
                "memories table",
                r#"
                CREATE TABLE IF NOT EXISTS memories (
                    iid            INTEGER PRIMARY KEY AUTOINCREMENT,
                    id             TEXT UNIQUE NOT NULL,
                    category       TEXT NOT NULL,
                    content        TEXT NOT NULL,
                    source         TEXT,
                    confidence     REAL NOT NULL DEFAULT 0.5,
                    verified       INTEGER NOT NULL DEFAULT 0,
                    expires_at     TEXT,
                    access_count   INTEGER NOT NULL DEFAULT 0,
                    last_accessed  TEXT,
                    created_at     TEXT NOT NULL,
                    updated_at     TEXT NOT NULL,
                    embedding      BLOB,
                    metadata       TEXT NOT NULL DEFAULT '{}'
                )
                "#,
            ),
            // External-content FTS5 table; content_rowid maps to memories.iid
            (
                "FTS5 table",
                r#"
                CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                    content,
                    content='memories',
                    content_rowid='iid',
                    tokenize='porter unicode61'
                )
                "#,
            ),
            (
                "insert trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
                    INSERT INTO memories_fts(rowid, content) VALUES (new.iid, new.content);
                END
                "#,
            ),
            (
                "delete trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
                    INSERT INTO memories_fts(memories_fts, rowid, content)
                    VALUES ('delete', old.iid, old.content);
                END
                "#,
            ),
            // Only content changes touch the index; access tracking does not.
            (
                "update trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE OF content ON memories BEGIN
                    INSERT INTO memories_fts(memories_fts, rowid, content)
                    VALUES ('delete', old.iid, old.content);
                    INSERT INTO memories_fts(rowid, content) VALUES (new.iid, new.content);
                END
                "#,
            ),
            (
                "category index",
                "CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category)",
            ),
            (
                "conversations table",
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id   TEXT NOT NULL,
                    role         TEXT NOT NULL,
                    content      TEXT NOT NULL,
                    channel      TEXT NOT NULL,
                    sender_id    TEXT NOT NULL,
                    sender_name  TEXT,
                    model        TEXT,
                    tool_calls   TEXT,
                    token_count  INTEGER NOT NULL DEFAULT 0,
                    created_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "conversations index",
                "CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id, id)",
            ),
            (
                "system_knowledge table",
                r#"
                CREATE TABLE IF NOT EXISTS system_knowledge (
                    domain         TEXT NOT NULL,
                    key            TEXT NOT NULL,
                    value          TEXT NOT NULL,
                    value_type     TEXT NOT NULL DEFAULT 'string',
                    source         TEXT NOT NULL,
                    last_verified  TEXT,
                    updated_at     TEXT NOT NULL,
                    PRIMARY KEY (domain, key)
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `MemoryRecord` from a SQLite row.
    fn row_to_record(row: &SqliteRow) -> Result<MemoryRecord, MemoryError> {
        let category: String = col(row, "category")?;
        let metadata: String = col(row, "metadata")?;
        let embedding: Option<Vec<u8>> = col(row, "embedding")?;
        let verified: i64 = col(row, "verified")?;
        let access_count: i64 = col(row, "access_count")?;
        let confidence: f64 = col(row, "confidence")?;

        Ok(MemoryRecord {
            id: col(row, "id")?,
            category: MemoryCategory::from_str(&category)?,
            content: col(row, "content")?,
            source: col(row, "source")?,
            confidence: confidence as f32,
            verified: verified != 0,
            expires_at: parse_opt_ts(col(row, "expires_at")?)?,
            access_count: access_count.max(0) as u64,
            last_accessed: parse_opt_ts(col(row, "last_accessed")?)?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            updated_at: parse_ts(&col::<String>(row, "updated_at")?)?,
            embedding: embedding.map(|blob| blob_to_embedding(&blob)),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        })
    }

    fn row_to_turn(row: &SqliteRow) -> Result<ConversationTurn, MemoryError> {
        let role: String = col(row, "role")?;
        let tool_calls: Option<String> = col(row, "tool_calls")?;
        let token_count: i64 = col(row, "token_count")?;

        Ok(ConversationTurn {
            session_id: col(row, "session_id")?,
            role: Role::from_str(&role).map_err(MemoryError::QueryFailed)?,
            content: col(row, "content")?,
            channel: col(row, "channel")?,
            sender_id: col(row, "sender_id")?,
            sender_name: col(row, "sender_name")?,
            model: col(row, "model")?,
            tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
            token_count: token_count.max(0) as usize,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_fact(row: &SqliteRow) -> Result<KnowledgeFact, MemoryError> {
        Ok(KnowledgeFact {
            domain: col(row, "domain")?,
            key: col(row, "key")?,
            value: col(row, "value")?,
            value_type: col(row, "value_type")?,
            source: col(row, "source")?,
            last_verified: parse_opt_ts(col(row, "last_verified")?)?,
        })
    }

    /// Build an OR-combined FTS5 query, quoting each term to prevent injection.
    fn fts_or_query(terms: &[String]) -> String {
        terms
            .iter()
            .map(|t| format!("\"{}\"*", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// Read a column, mapping decode failures to `QueryFailed`.
fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
}

/// Fixed-width timestamp so lexical order equals time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, MemoryError> {
    s.as_deref().map(parse_ts).transpose()
}

/// Serialize an embedding vector to bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn ids_json(ids: &[String]) -> Result<String, MemoryError> {
    serde_json::to_string(ids).map_err(|e| MemoryError::Storage(format!("id list: {e}")))
}

#[async_trait]
impl MemoryStorage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| MemoryError::Storage(format!("Metadata serialization: {e}")))?;
        let embedding_blob: Option<Vec<u8>> = record.embedding.as_deref().map(embedding_to_blob);

        sqlx::query(
            r#"
            INSERT INTO memories (id, category, content, source, confidence, verified, expires_at,
                                  access_count, last_accessed, created_at, updated_at, embedding, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&record.id)
        .bind(record.category.as_str())
        .bind(&record.content)
        .bind(&record.source)
        .bind(record.confidence as f64)
        .bind(record.verified as i64)
        .bind(record.expires_at.map(ts))
        .bind(record.access_count as i64)
        .bind(record.last_accessed.map(ts))
        .bind(ts(record.created_at))
        .bind(ts(record.updated_at))
        .bind(embedding_blob.as_deref())
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(id = %record.id, "Stored memory");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET by ID: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // bm25() is negative; lower = better match
        let rows = sqlx::query(
            r#"
            SELECT m.*, bm25(memories_fts) AS rank
            FROM memories_fts f
            JOIN memories m ON m.iid = f.rowid
            WHERE memories_fts MATCH ?1
              AND (m.expires_at IS NULL OR m.expires_at > ?2)
              AND (?3 IS NULL OR m.category = ?3)
            ORDER BY rank
            LIMIT ?4
            "#,
        )
        .bind(Self::fts_or_query(terms))
        .bind(ts(filter.now))
        .bind(filter.category.map(|c| c.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM memories
            WHERE embedding IS NOT NULL
              AND (expires_at IS NULL OR expires_at > ?1)
              AND (?2 IS NULL OR category = ?2)
            ORDER BY iid
            "#,
        )
        .bind(ts(filter.now))
        .bind(filter.category.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Vector scan: {e}")))?;

        let candidates = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vector::rank_by_similarity(&candidates, embedding, filter, limit))
    }

    async fn record_access(&self, ids: &[String], at: DateTime<Utc>) -> Result<(), MemoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE memories
            SET access_count = access_count + 1, last_accessed = ?1
            WHERE id IN (SELECT value FROM json_each(?2))
            "#,
        )
        .bind(ts(at))
        .bind(ids_json(ids)?)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Access tracking: {e}")))?;
        Ok(())
    }

    async fn adjust_confidence(&self, id: &str, delta: f32) -> Result<Option<f32>, MemoryError> {
        let row = sqlx::query(
            r#"
            UPDATE memories
            SET confidence = MIN(MAX(confidence + ?1, 0.0), 1.0), updated_at = ?2
            WHERE id = ?3
            RETURNING confidence
            "#,
        )
        .bind(delta as f64)
        .bind(ts(Utc::now()))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Confidence update: {e}")))?;

        row.map(|r| col::<f64>(&r, "confidence").map(|c| c as f32))
            .transpose()
    }

    async fn set_confidence(&self, id: &str, value: f32) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            "UPDATE memories SET confidence = MIN(MAX(?1, 0.0), 1.0), updated_at = ?2 WHERE id = ?3",
        )
        .bind(value as f64)
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Confidence update: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_verified(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            "UPDATE memories SET verified = 1, confidence = 1.0, updated_at = ?1 WHERE id = ?2",
        )
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Verify: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune(&self, policy: &PrunePolicy, now: DateTime<Utc>) -> Result<PruneReport, MemoryError> {
        let expired = sqlx::query("DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(ts(now))
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Prune expired: {e}")))?;

        let decayed = sqlx::query(
            r#"
            UPDATE memories
            SET confidence = MIN(MAX(confidence * ?1, 0.0), 1.0), updated_at = ?2
            WHERE verified = 0
              AND COALESCE(last_accessed, created_at) <= ?3
              AND confidence > ?4
            "#,
        )
        .bind(policy.decay_factor as f64)
        .bind(ts(now))
        .bind(ts(now - policy.decay_after))
        .bind(policy.prune_below as f64)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Decay: {e}")))?;

        let low = sqlx::query(
            "DELETE FROM memories WHERE verified = 0 AND confidence < ?1 AND created_at <= ?2",
        )
        .bind(policy.prune_below as f64)
        .bind(ts(now - policy.prune_after))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Prune low confidence: {e}")))?;

        Ok(PruneReport {
            expired_deleted: expired.rows_affected(),
            decayed: decayed.rows_affected(),
            low_confidence_deleted: low.rows_affected(),
        })
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<MemoryStats, MemoryError> {
        let now_s = ts(now);
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(verified), 0) AS verified,
                COUNT(embedding) AS with_embedding,
                COUNT(CASE WHEN expires_at IS NOT NULL AND expires_at <= ?2 THEN 1 END) AS expiring_soon,
                COALESCE(AVG(confidence), 0.0) AS avg_confidence
            FROM memories
            WHERE expires_at IS NULL OR expires_at > ?1
            "#,
        )
        .bind(&now_s)
        .bind(ts(now + Duration::days(7)))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Stats: {e}")))?;

        let expired: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(&now_s)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Stats expired: {e}")))
            .and_then(|r| col(&r, "cnt"))?;

        let category_rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) AS cnt FROM memories
            WHERE expires_at IS NULL OR expires_at > ?1
            GROUP BY category
            "#,
        )
        .bind(&now_s)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Stats by category: {e}")))?;

        let mut by_category = std::collections::BTreeMap::new();
        for r in &category_rows {
            let cnt: i64 = col(r, "cnt")?;
            by_category.insert(col::<String>(r, "category")?, cnt as u64);
        }

        let total: i64 = col(&row, "total")?;
        let verified: i64 = col(&row, "verified")?;
        let with_embedding: i64 = col(&row, "with_embedding")?;
        let expiring_soon: i64 = col(&row, "expiring_soon")?;
        let avg: f64 = col(&row, "avg_confidence")?;

        Ok(MemoryStats {
            total: total as u64,
            verified: verified as u64,
            expired: expired as u64,
            expiring_soon: expiring_soon as u64,
            with_embedding: with_embedding as u64,
            average_confidence: avg as f32,
            by_category,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStorage {
    async fn append(&self, turn: ConversationTurn) -> Result<(), MemoryError> {
        let tool_calls = turn
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| MemoryError::Storage(format!("Tool calls serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (session_id, role, content, channel, sender_id, sender_name,
                                       model, tool_calls, token_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&turn.session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.channel)
        .bind(&turn.sender_id)
        .bind(&turn.sender_name)
        .bind(&turn.model)
        .bind(tool_calls)
        .bind(turn.token_count as i64)
        .bind(ts(turn.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Turn INSERT failed: {e}")))?;
        Ok(())
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Recent turns: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }
}

#[async_trait]
impl KnowledgeBase for SqliteStorage {
    async fn upsert(&self, fact: KnowledgeFact) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO system_knowledge (domain, key, value, value_type, source, last_verified, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(domain, key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                source = excluded.source,
                last_verified = excluded.last_verified,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fact.domain)
        .bind(&fact.key)
        .bind(&fact.value)
        .bind(&fact.value_type)
        .bind(&fact.source)
        .bind(fact.last_verified.map(ts))
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Knowledge upsert: {e}")))?;
        Ok(())
    }

    async fn lookup(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeFact>, MemoryError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Candidate facts containing any term; final ranking happens in process.
        let rows = sqlx::query(
            r#"
            SELECT * FROM system_knowledge k
            WHERE EXISTS (
                SELECT 1 FROM json_each(?1) t
                WHERE instr(lower(k.key || ' ' || k.value), t.value) > 0
            )
            ORDER BY k.rowid
            "#,
        )
        .bind(ids_json(&terms)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Knowledge lookup: {e}")))?;

        let facts = rows
            .iter()
            .map(Self::row_to_fact)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rank_facts(facts, query, limit))
    }
}
