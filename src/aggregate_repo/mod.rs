// SQLite aggregate store. One table for every kind and rollup level; scalar columns are plain
// SQL, the kind-specific remainder is a versioned BLOB (see codec).
//
// Reads follow the query convention: capture_time > from AND capture_time <= to.

mod blob;
pub(crate) mod codec;

use std::path::Path;
use std::str::FromStr;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use crate::engine::AggregateRepository;
use crate::models::{AggregateKind, AggregateRecord, StoredAggregate};

pub struct SqliteAggregateRepo {
    pool: SqlitePool,
}

impl SqliteAggregateRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregates (
                series_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                rollup_level INTEGER NOT NULL,
                capture_time INTEGER NOT NULL,
                total_duration_nanos REAL NOT NULL,
                transaction_count INTEGER NOT NULL,
                error_count INTEGER,
                payload BLOB NOT NULL,
                PRIMARY KEY (series_id, kind, rollup_level, capture_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aggregates_level_time ON aggregates(rollup_level, capture_time)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upserts records at one level. Re-saving a capture time replaces the row.
    #[instrument(skip(self, records), fields(repo = "aggregates", operation = "save", kind = %T::KIND, records_count = records.len()))]
    pub async fn save<T: AggregateRecord>(
        &self,
        series_id: &str,
        rollup_level: usize,
        records: &[T],
    ) -> anyhow::Result<()> {
        let stored = records
            .iter()
            .map(AggregateRecord::to_stored)
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.save_stored(series_id, T::KIND, rollup_level, &stored)
            .await
    }

    #[instrument(skip(self, records), fields(repo = "aggregates", operation = "save_stored", records_count = records.len()))]
    pub async fn save_stored(
        &self,
        series_id: &str,
        kind: AggregateKind,
        rollup_level: usize,
        records: &[StoredAggregate],
    ) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            let count = stored_count(r.count, r.capture_time)?;
            let error_count = r
                .error_count
                .map(|c| stored_count(c, r.capture_time))
                .transpose()?;
            sqlx::query(
                "INSERT OR REPLACE INTO aggregates (series_id, kind, rollup_level, capture_time, total_duration_nanos, transaction_count, error_count, payload) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(series_id)
            .bind(kind.as_str())
            .bind(rollup_level as i64)
            .bind(r.capture_time)
            .bind(r.total_duration_nanos)
            .bind(count)
            .bind(error_count)
            .bind(&r.payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Stored rows in `(from, to]`, ascending by capture time.
    #[instrument(skip(self), fields(repo = "aggregates", operation = "read_stored"))]
    pub async fn read_stored(
        &self,
        series_id: &str,
        kind: AggregateKind,
        from: i64,
        to: i64,
        rollup_level: usize,
    ) -> anyhow::Result<Vec<StoredAggregate>> {
        let rows = sqlx::query(
            "SELECT capture_time, total_duration_nanos, transaction_count, error_count, payload
             FROM aggregates
             WHERE series_id = $1 AND kind = $2 AND rollup_level = $3
               AND capture_time > $4 AND capture_time <= $5
             ORDER BY capture_time ASC",
        )
        .bind(series_id)
        .bind(kind.as_str())
        .bind(rollup_level as i64)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_row(&row)?);
        }
        Ok(out)
    }

    pub async fn last_capture_time(
        &self,
        series_id: &str,
        kind: AggregateKind,
        rollup_level: usize,
    ) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(capture_time) FROM aggregates WHERE series_id = $1 AND kind = $2 AND rollup_level = $3",
        )
        .bind(series_id)
        .bind(kind.as_str())
        .bind(rollup_level as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Series with at least one row of `kind` at the level.
    pub async fn series_ids(
        &self,
        kind: AggregateKind,
        rollup_level: usize,
    ) -> anyhow::Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT series_id FROM aggregates WHERE kind = $1 AND rollup_level = $2 ORDER BY series_id",
        )
        .bind(kind.as_str())
        .bind(rollup_level as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Deletes rows at the level with capture_time < `before`.
    #[instrument(skip(self), fields(repo = "aggregates", operation = "prune"))]
    pub async fn prune(&self, rollup_level: usize, before: i64) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM aggregates WHERE rollup_level = $1 AND capture_time < $2")
            .bind(rollup_level as i64)
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "aggregates", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_row(row: &SqliteRow) -> anyhow::Result<StoredAggregate> {
        let capture_time: i64 = row.try_get("capture_time")?;
        let total_duration_nanos: f64 = row.try_get("total_duration_nanos")?;
        let count: i64 = row.try_get("transaction_count")?;
        let error_count: Option<i64> = row.try_get("error_count")?;
        let payload: Vec<u8> = row.try_get("payload")?;
        anyhow::ensure!(
            count >= 0 && error_count.is_none_or(|c| c >= 0),
            "negative count in row at {}",
            capture_time
        );
        Ok(StoredAggregate {
            capture_time,
            total_duration_nanos,
            count: count as u64,
            error_count: error_count.map(|c| c as u64),
            payload,
        })
    }
}

/// Counts live in signed INTEGER columns; anything past `i64::MAX` would read back negative.
fn stored_count(count: u64, capture_time: i64) -> anyhow::Result<i64> {
    i64::try_from(count)
        .map_err(|_| anyhow::anyhow!("count {} at {} exceeds the stored range", count, capture_time))
}

impl AggregateRepository for SqliteAggregateRepo {
    async fn read<T: AggregateRecord>(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        rollup_level: usize,
    ) -> anyhow::Result<Vec<T>> {
        self.read_stored(series_id, T::KIND, from, to, rollup_level)
            .await?
            .into_iter()
            .map(T::from_stored)
            .collect()
    }
}
