//! SQLite backend for the local store.

use super::{CachedCredential, LocalStore, MergeOutcome, Origin, RejectionOutcome};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use novaclub_sync_core::{next_watermark, MergePlan, RetryDecision, RetryPolicy};
use novaclub_sync_types::{
    DeadLetter, EntityType, QueueEntry, QueueEntryId, Record, RecordId, Timestamp, UserProfile,
};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-based local store.
///
/// Uses WAL mode so reads from the UI never wait on a sync cycle's writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(StorageError::Database)?;

        // A single connection that never recycles, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                entity_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (entity_type, record_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mutation_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT,
                enqueued_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                seq INTEGER PRIMARY KEY,
                entity_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT,
                enqueued_at TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT,
                reason TEXT NOT NULL,
                dead_lettered_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watermarks (
                entity_type TEXT PRIMARY KEY,
                watermark TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_credential (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                user TEXT NOT NULL,
                token TEXT,
                cached_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_record ON mutation_queue(entity_type, record_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }
}

async fn upsert_in(
    conn: &mut SqliteConnection,
    entity: &EntityType,
    record: &Record,
) -> StorageResult<()> {
    let data = serde_json::to_string(record).map_err(StorageError::Json)?;
    sqlx::query(
        r#"
        INSERT INTO records (entity_type, record_id, data, updated_at, deleted)
        VALUES (?1, ?2, ?3, ?4, 0)
        ON CONFLICT(entity_type, record_id) DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at,
            deleted = 0
        "#,
    )
    .bind(entity.as_str())
    .bind(record.id.as_str())
    .bind(data)
    .bind(record.updated_at.map(|ts| ts.to_string()))
    .execute(&mut *conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

async fn enqueue_in(
    conn: &mut SqliteConnection,
    entity: &EntityType,
    id: &RecordId,
    payload: Option<String>,
) -> StorageResult<QueueEntryId> {
    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO mutation_queue (entity_type, record_id, payload, enqueued_at)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING seq
        "#,
    )
    .bind(entity.as_str())
    .bind(id.as_str())
    .bind(payload)
    .bind(Timestamp::now().to_string())
    .fetch_one(&mut *conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(QueueEntryId::new(seq))
}

async fn pending_in(
    conn: &mut SqliteConnection,
    entity: &EntityType,
) -> StorageResult<BTreeSet<RecordId>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT record_id FROM mutation_queue WHERE entity_type = ?1")
            .bind(entity.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(StorageError::Database)?;
    Ok(ids.into_iter().map(RecordId::new).collect())
}

async fn watermark_in(
    conn: &mut SqliteConnection,
    entity: &EntityType,
) -> StorageResult<Option<Timestamp>> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT watermark FROM watermarks WHERE entity_type = ?1")
            .bind(entity.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(StorageError::Database)?;
    raw.map(|s| Timestamp::parse(&s).map_err(StorageError::Data))
        .transpose()
}

fn decode_record(data: &str) -> StorageResult<Record> {
    let value: Value = serde_json::from_str(data).map_err(StorageError::Json)?;
    Record::from_payload(value).map_err(StorageError::Data)
}

fn encode_payload(payload: Option<&Value>) -> StorageResult<Option<String>> {
    payload
        .map(serde_json::to_string)
        .transpose()
        .map_err(StorageError::Json)
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, entity: &EntityType, id: &RecordId) -> StorageResult<Option<Record>> {
        let data: Option<String> = sqlx::query_scalar(
            r#"
            SELECT data FROM records
            WHERE entity_type = ?1 AND record_id = ?2 AND deleted = 0
            "#,
        )
        .bind(entity.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        data.map(|d| decode_record(&d)).transpose()
    }

    async fn get_all(&self, entity: &EntityType) -> StorageResult<Vec<Record>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT data FROM records WHERE entity_type = ?1 AND deleted = 0",
        )
        .bind(entity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.iter().map(|d| decode_record(d)).collect()
    }

    async fn put(
        &self,
        entity: &EntityType,
        mut record: Record,
        origin: Origin,
    ) -> StorageResult<Record> {
        if origin == Origin::Local {
            record.updated_at = Some(Timestamp::now());
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;
        upsert_in(&mut tx, entity, &record).await?;
        if origin == Origin::Local {
            let payload = record.to_payload().map_err(StorageError::Data)?;
            let payload = encode_payload(Some(&payload))?;
            enqueue_in(&mut tx, entity, &record.id, payload).await?;
        }
        tx.commit().await.map_err(StorageError::Database)?;

        Ok(record)
    }

    async fn delete(
        &self,
        entity: &EntityType,
        id: &RecordId,
        origin: Origin,
    ) -> StorageResult<()> {
        match origin {
            Origin::Local => {
                let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;
                sqlx::query(
                    r#"
                    INSERT INTO records (entity_type, record_id, data, updated_at, deleted)
                    VALUES (?1, ?2, '{}', ?3, 1)
                    ON CONFLICT(entity_type, record_id) DO UPDATE SET
                        deleted = 1,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(entity.as_str())
                .bind(id.as_str())
                .bind(Timestamp::now().to_string())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
                enqueue_in(&mut tx, entity, id, None).await?;
                tx.commit().await.map_err(StorageError::Database)?;
            }
            Origin::Remote => {
                sqlx::query("DELETE FROM records WHERE entity_type = ?1 AND record_id = ?2")
                    .bind(entity.as_str())
                    .bind(id.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(StorageError::Database)?;
            }
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        entity: &EntityType,
        id: &RecordId,
        payload: Option<Value>,
    ) -> StorageResult<QueueEntryId> {
        let payload = encode_payload(payload.as_ref())?;
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        enqueue_in(&mut conn, entity, id, payload).await
    }

    async fn apply_remote_batch(
        &self,
        entity: &EntityType,
        records: Vec<Record>,
        watermark: Timestamp,
    ) -> StorageResult<MergeOutcome> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let pending = pending_in(&mut tx, entity).await?;
        let plan = MergePlan::build(records, &pending);
        for record in &plan.apply {
            upsert_in(&mut tx, entity, record).await?;
        }

        // Skipped records have to be pulled again; the watermark holds.
        let next = if plan.skipped.is_empty() {
            next_watermark(watermark_in(&mut tx, entity).await?, watermark)
        } else {
            None
        };
        if let Some(ts) = next {
            sqlx::query(
                r#"
                INSERT INTO watermarks (entity_type, watermark) VALUES (?1, ?2)
                ON CONFLICT(entity_type) DO UPDATE SET watermark = excluded.watermark
                "#,
            )
            .bind(entity.as_str())
            .bind(ts.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;
        }

        tx.commit().await.map_err(StorageError::Database)?;

        Ok(MergeOutcome {
            applied: plan.apply.len(),
            skipped: plan.skipped.len(),
            watermark_advanced: next.is_some(),
        })
    }

    async fn queued_entries(&self) -> StorageResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT seq, entity_type, record_id, payload, enqueued_at, attempts, last_error
            FROM mutation_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn acknowledge(&self, ids: &[QueueEntryId]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut removed = 0;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        for id in sorted {
            let row = sqlx::query_as::<_, (String, String, Option<String>)>(
                "DELETE FROM mutation_queue WHERE seq = ?1 RETURNING entity_type, record_id, payload",
            )
            .bind(id.value())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

            let Some((entity_type, record_id, payload)) = row else {
                continue;
            };
            removed += 1;

            // An acknowledged deletion erases the hidden row once nothing else is queued for it.
            if payload.is_none() {
                let remaining: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM mutation_queue WHERE entity_type = ?1 AND record_id = ?2",
                )
                .bind(&entity_type)
                .bind(&record_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(StorageError::Database)?;

                if remaining == 0 {
                    sqlx::query(
                        "DELETE FROM records WHERE entity_type = ?1 AND record_id = ?2 AND deleted = 1",
                    )
                    .bind(&entity_type)
                    .bind(&record_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(StorageError::Database)?;
                }
            }
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(removed)
    }

    async fn record_rejection(
        &self,
        id: QueueEntryId,
        reason: &str,
        policy: RetryPolicy,
    ) -> StorageResult<RejectionOutcome> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE mutation_queue SET attempts = attempts + 1, last_error = ?2
            WHERE seq = ?1
            RETURNING seq, entity_type, record_id, payload, enqueued_at, attempts, last_error
            "#,
        )
        .bind(id.value())
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        let Some(row) = row else {
            return Ok(RejectionOutcome::Missing);
        };
        let entry = QueueEntry::try_from(row)?;

        let outcome = match policy.decide(entry.attempts) {
            RetryDecision::Retry => RejectionOutcome::Requeued {
                attempts: entry.attempts,
            },
            RetryDecision::DeadLetter => {
                sqlx::query(
                    r#"
                    INSERT INTO dead_letters
                        (seq, entity_type, record_id, payload, enqueued_at, attempts, last_error,
                         reason, dead_lettered_at)
                    SELECT seq, entity_type, record_id, payload, enqueued_at, attempts, last_error,
                           ?2, ?3
                    FROM mutation_queue WHERE seq = ?1
                    "#,
                )
                .bind(id.value())
                .bind(reason)
                .bind(Timestamp::now().to_string())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;

                sqlx::query("DELETE FROM mutation_queue WHERE seq = ?1")
                    .bind(id.value())
                    .execute(&mut *tx)
                    .await
                    .map_err(StorageError::Database)?;

                RejectionOutcome::DeadLettered
            }
        };

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(outcome)
    }

    async fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT seq, entity_type, record_id, payload, enqueued_at, attempts, last_error,
                   reason, dead_lettered_at
            FROM dead_letters
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    async fn requeue_dead_letter(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntryId>> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        // The original sequence number is kept so the entry replays in its
        // original position relative to later writes.
        let inserted = sqlx::query(
            r#"
            INSERT INTO mutation_queue (seq, entity_type, record_id, payload, enqueued_at, attempts)
            SELECT seq, entity_type, record_id, payload, enqueued_at, 0
            FROM dead_letters WHERE seq = ?1
            "#,
        )
        .bind(id.value())
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        if inserted.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query("DELETE FROM dead_letters WHERE seq = ?1")
            .bind(id.value())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(Some(id))
    }

    async fn pending_record_ids(&self, entity: &EntityType) -> StorageResult<BTreeSet<RecordId>> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        pending_in(&mut conn, entity).await
    }

    async fn watermark(&self, entity: &EntityType) -> StorageResult<Option<Timestamp>> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        watermark_in(&mut conn, entity).await
    }

    async fn watermarks(&self) -> StorageResult<BTreeMap<EntityType, Timestamp>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT entity_type, watermark FROM watermarks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter()
            .map(|(entity, ts)| {
                Ok((
                    EntityType::new(&entity).map_err(StorageError::Data)?,
                    Timestamp::parse(&ts).map_err(StorageError::Data)?,
                ))
            })
            .collect()
    }

    async fn cached_credential(&self) -> StorageResult<Option<CachedCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT email, password_hash, user, token, cached_at
            FROM cached_credential WHERE slot = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(CachedCredential::try_from).transpose()
    }

    async fn save_credential(&self, credential: &CachedCredential) -> StorageResult<()> {
        let user = serde_json::to_string(&credential.user).map_err(StorageError::Json)?;
        sqlx::query(
            r#"
            INSERT INTO cached_credential (slot, email, password_hash, user, token, cached_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(slot) DO UPDATE SET
                email = excluded.email,
                password_hash = excluded.password_hash,
                user = excluded.user,
                token = excluded.token,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&credential.email)
        .bind(&credential.password_hash)
        .bind(user)
        .bind(credential.token.as_deref())
        .bind(credential.cached_at.to_string())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn clear_credential(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM cached_credential")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn set_session_token(&self, token: Option<&str>) -> StorageResult<()> {
        sqlx::query("UPDATE cached_credential SET token = ?1 WHERE slot = 1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }
}

/// Internal row type for queue queries.
#[derive(sqlx::FromRow)]
struct QueueRow {
    seq: i64,
    entity_type: String,
    record_id: String,
    payload: Option<String>,
    enqueued_at: String,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StorageError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            id: QueueEntryId::new(row.seq),
            entity_type: EntityType::new(&row.entity_type)?,
            record_id: RecordId::new(row.record_id),
            payload: row
                .payload
                .map(|p| serde_json::from_str(&p))
                .transpose()
                .map_err(StorageError::Json)?,
            enqueued_at: Timestamp::parse(&row.enqueued_at)?,
            attempts: u32::try_from(row.attempts).map_err(|_| {
                StorageError::CorruptRow(format!("queue entry {} attempts", row.seq))
            })?,
            last_error: row.last_error,
        })
    }
}

/// Internal row type for dead-letter queries.
#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    seq: i64,
    entity_type: String,
    record_id: String,
    payload: Option<String>,
    enqueued_at: String,
    attempts: i64,
    last_error: Option<String>,
    reason: String,
    dead_lettered_at: String,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = StorageError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let entry = QueueEntry::try_from(QueueRow {
            seq: row.seq,
            entity_type: row.entity_type,
            record_id: row.record_id,
            payload: row.payload,
            enqueued_at: row.enqueued_at,
            attempts: row.attempts,
            last_error: row.last_error,
        })?;
        Ok(DeadLetter {
            entry,
            reason: row.reason,
            dead_lettered_at: Timestamp::parse(&row.dead_lettered_at)?,
        })
    }
}

/// Internal row type for the credential slot.
#[derive(sqlx::FromRow)]
struct CredentialRow {
    email: String,
    password_hash: String,
    user: String,
    token: Option<String>,
    cached_at: String,
}

impl TryFrom<CredentialRow> for CachedCredential {
    type Error = StorageError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let user: UserProfile = serde_json::from_str(&row.user).map_err(StorageError::Json)?;
        Ok(CachedCredential {
            email: row.email,
            password_hash: row.password_hash,
            user,
            token: row.token,
            cached_at: Timestamp::parse(&row.cached_at)?,
        })
    }
}
