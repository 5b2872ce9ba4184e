/// Postgres store gateway
///
/// One physical table per logical table, all sharing the `(pk, sk)` key
/// convention with the status projection and the two index instants as
/// dedicated columns. Conditional semantics ride on `rows_affected`:
/// an `INSERT ... ON CONFLICT DO NOTHING` that touches zero rows is a
/// conflict, an `UPDATE ... WHERE status = $expected` that touches zero rows
/// is a failed precondition. TTL on idempotency rows is store-managed:
/// expired rows are invisible to reads and replaceable by writes.
use crate::store::{
    PutOutcome, ScanQuery, StoreError, StoreGateway, StoreResult, StoredRow, Table, TxnOutcome,
    UpdateOutcome, WriteItem,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row};
use tracing::info;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(to_transient)?;
        Ok(Self::new(pool))
    }

    /// Create the four tables and their worker indexes if missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for table in [Table::Reservations, Table::Orders, Table::Idempotency, Table::Outbox] {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {t} (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    status TEXT NOT NULL,
                    body JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    expires_at TIMESTAMPTZ,
                    retry_at TIMESTAMPTZ,
                    PRIMARY KEY (pk, sk)
                )
                "#,
                t = table.as_str()
            );
            sqlx::query(&ddl).execute(&self.pool).await.map_err(to_transient)?;
        }

        for ddl in [
            "CREATE INDEX IF NOT EXISTS reservations_status_expires_idx \
             ON reservations (status, expires_at)",
            "CREATE INDEX IF NOT EXISTS outbox_status_created_idx \
             ON outbox (status, created_at)",
            "CREATE INDEX IF NOT EXISTS outbox_status_retry_idx \
             ON outbox (status, retry_at)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(to_transient)?;
        }

        info!("store schema ensured");
        Ok(())
    }
}

fn to_transient(err: sqlx::Error) -> StoreError {
    StoreError::Transient(err.to_string())
}

fn row_from_pg(row: &sqlx::postgres::PgRow) -> Result<StoredRow, sqlx::Error> {
    Ok(StoredRow {
        pk: row.try_get("pk")?,
        sk: row.try_get("sk")?,
        status: row.try_get("status")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
        retry_at: row.try_get("retry_at")?,
    })
}

async fn exec_put_if_absent<'e, E>(executor: E, table: Table, row: &StoredRow) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = if table == Table::Idempotency {
        // An expired record is vacant: out-of-window replays are fresh requests.
        format!(
            r#"
            INSERT INTO {t} (pk, sk, status, body, created_at, updated_at, expires_at, retry_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pk, sk) DO UPDATE SET
                status = EXCLUDED.status,
                body = EXCLUDED.body,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at,
                retry_at = EXCLUDED.retry_at
            WHERE {t}.expires_at IS NOT NULL AND {t}.expires_at <= NOW()
            "#,
            t = table.as_str()
        )
    } else {
        format!(
            r#"
            INSERT INTO {t} (pk, sk, status, body, created_at, updated_at, expires_at, retry_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pk, sk) DO NOTHING
            "#,
            t = table.as_str()
        )
    };

    let result = sqlx::query(&sql)
        .bind(&row.pk)
        .bind(&row.sk)
        .bind(&row.status)
        .bind(&row.body)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.expires_at)
        .bind(row.retry_at)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

async fn exec_conditional_update<'e, E>(
    executor: E,
    table: Table,
    row: &StoredRow,
    expected_status: &str,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        UPDATE {t}
        SET status = $3, body = $4, updated_at = $5, expires_at = $6, retry_at = $7
        WHERE pk = $1 AND sk = $2 AND status = $8
        "#,
        t = table.as_str()
    );

    let result = sqlx::query(&sql)
        .bind(&row.pk)
        .bind(&row.sk)
        .bind(&row.status)
        .bind(&row.body)
        .bind(row.updated_at)
        .bind(row.expires_at)
        .bind(row.retry_at)
        .bind(expected_status)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl StoreGateway for PgStore {
    async fn get(&self, table: Table, pk: &str, sk: &str) -> StoreResult<Option<StoredRow>> {
        let ttl_filter = if table == Table::Idempotency {
            "AND (expires_at IS NULL OR expires_at > NOW())"
        } else {
            ""
        };
        let sql = format!(
            r#"
            SELECT pk, sk, status, body, created_at, updated_at, expires_at, retry_at
            FROM {t}
            WHERE pk = $1 AND sk = $2 {ttl}
            "#,
            t = table.as_str(),
            ttl = ttl_filter
        );

        let row = sqlx::query(&sql)
            .bind(pk)
            .bind(sk)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_transient)?;

        row.map(|r| row_from_pg(&r)).transpose().map_err(to_transient)
    }

    async fn put_if_absent(&self, table: Table, row: StoredRow) -> StoreResult<PutOutcome> {
        let affected = exec_put_if_absent(&self.pool, table, &row).await.map_err(to_transient)?;
        Ok(if affected > 0 { PutOutcome::Inserted } else { PutOutcome::Conflict })
    }

    async fn conditional_update(
        &self,
        table: Table,
        row: StoredRow,
        expected_status: &str,
    ) -> StoreResult<UpdateOutcome> {
        let affected = exec_conditional_update(&self.pool, table, &row, expected_status)
            .await
            .map_err(to_transient)?;
        Ok(if affected > 0 { UpdateOutcome::Applied } else { UpdateOutcome::PreconditionFailed })
    }

    async fn transactional_write(&self, items: Vec<WriteItem>) -> StoreResult<TxnOutcome> {
        let mut tx = self.pool.begin().await.map_err(to_transient)?;

        for item in &items {
            let affected = match item {
                WriteItem::PutIfAbsent { table, row } => {
                    exec_put_if_absent(&mut *tx, *table, row).await.map_err(to_transient)?
                }
                WriteItem::ConditionalUpdate { table, row, expected_status } => {
                    exec_conditional_update(&mut *tx, *table, row, expected_status)
                        .await
                        .map_err(to_transient)?
                }
            };
            if affected == 0 {
                tx.rollback().await.map_err(to_transient)?;
                return Ok(TxnOutcome::Aborted);
            }
        }

        tx.commit().await.map_err(to_transient)?;
        Ok(TxnOutcome::Committed)
    }

    async fn scan_by_index(
        &self,
        query: ScanQuery,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredRow>> {
        let sql = match query {
            ScanQuery::DueOutbox => {
                r#"
                SELECT pk, sk, status, body, created_at, updated_at, expires_at, retry_at
                FROM outbox
                WHERE status = 'PENDING'
                   OR (status = 'FAILED' AND retry_at IS NOT NULL AND retry_at <= $1)
                ORDER BY created_at ASC
                LIMIT $2
                "#
            }
            ScanQuery::ExpiredHolds => {
                r#"
                SELECT pk, sk, status, body, created_at, updated_at, expires_at, retry_at
                FROM reservations
                WHERE status = 'HOLD' AND expires_at IS NOT NULL AND expires_at <= $1
                ORDER BY created_at ASC
                LIMIT $2
                "#
            }
            ScanQuery::ParkedOutbox => {
                r#"
                SELECT pk, sk, status, body, created_at, updated_at, expires_at, retry_at
                FROM outbox
                WHERE status = 'FAILED' AND retry_at IS NULL
                ORDER BY created_at ASC
                LIMIT $1
                "#
            }
        };

        let query = match query {
            ScanQuery::ParkedOutbox => sqlx::query(sql).bind(limit as i64),
            _ => sqlx::query(sql).bind(now).bind(limit as i64),
        };
        let rows = query.fetch_all(&self.pool).await.map_err(to_transient)?;

        rows.iter().map(|r| row_from_pg(r).map_err(to_transient)).collect()
    }
}
