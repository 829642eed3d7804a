//! Database access layer with SQLx and SQLite
//!
//! Holds the service registry and the append-only hit/failure history.
//! Timestamps are stored as Unix milliseconds so range filters and hourly
//! bucketing stay plain integer arithmetic.

use crate::error::{AppError, Result};
use crate::models::{ChartPoint, Failure, Hit, NewService, Service};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SERVICE_COLUMNS: &str = r#"
    id, name, domain, port, service_type, method, expected_status, expected,
    check_interval, timeout, online, last_status_code, latency, created_at
"#;

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `connection_string` and apply migrations
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| AppError::Config(format!("Invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

        let db = Self { pool };
        db.migrate().await?;

        info!("Database connection pool established");
        Ok(db)
    }

    /// Private in-memory database; a single pinned connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---------------------------------------------------------------------
    // Service registry
    // ---------------------------------------------------------------------

    /// Insert a new service and return its generated id
    pub async fn create_service(&self, service: &NewService) -> Result<Uuid> {
        service.validate().map_err(AppError::InvalidRequest)?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO services (
                id, name, domain, port, service_type, method, expected_status,
                expected, check_interval, timeout, online, latency, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(id)
        .bind(&service.name)
        .bind(&service.domain)
        .bind(service.port.map(i64::from))
        .bind(service.service_type.trim().to_ascii_lowercase())
        .bind(&service.method)
        .bind(i64::from(service.expected_status))
        .bind(service.expected.as_deref())
        .bind(i64::from(service.interval))
        .bind(i64::from(service.timeout))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(service_id = %id, name = %service.name, "Service created");
        Ok(id)
    }

    /// Fetch one service by id
    pub async fn select_service(&self, id: Uuid) -> Result<Service> {
        let query = format!("SELECT {} FROM services WHERE id = ?", SERVICE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("service {}", id)))?;

        service_from_row(&row)
    }

    /// All services in creation order
    pub async fn select_all_services(&self) -> Result<Vec<Service>> {
        let query = format!(
            "SELECT {} FROM services ORDER BY created_at ASC, rowid ASC",
            SERVICE_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(service_from_row).collect()
    }

    /// Overwrite the configuration fields of a service.
    ///
    /// Status fields are left alone; they belong to the checker.
    pub async fn update_service(&self, service: &Service) -> Result<Service> {
        service.validate().map_err(AppError::InvalidRequest)?;

        let result = sqlx::query(
            r#"
            UPDATE services SET
                name = ?, domain = ?, port = ?, service_type = ?, method = ?,
                expected_status = ?, expected = ?, check_interval = ?, timeout = ?
            WHERE id = ?
            "#,
        )
        .bind(&service.name)
        .bind(&service.domain)
        .bind(service.port.map(i64::from))
        .bind(service.service_type.trim().to_ascii_lowercase())
        .bind(&service.method)
        .bind(i64::from(service.expected_status))
        .bind(service.expected.as_deref())
        .bind(i64::from(service.interval))
        .bind(i64::from(service.timeout))
        .bind(service.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("service {}", service.id)));
        }

        self.select_service(service.id).await
    }

    /// Persist the fields written by a check. Returns `false` if the service
    /// no longer exists.
    pub async fn update_service_status(&self, service: &Service) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE services SET online = ?, last_status_code = ?, latency = ?
            WHERE id = ?
            "#,
        )
        .bind(service.online)
        .bind(service.last_status_code.map(i64::from))
        .bind(service.latency)
        .bind(service.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a service together with its whole history
    pub async fn delete_service(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let hits = sqlx::query("DELETE FROM hits WHERE service_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let failures = sqlx::query("DELETE FROM failures WHERE service_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let service = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if service.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("service {}", id)));
        }

        tx.commit().await?;

        info!(
            service_id = %id,
            hits = hits.rows_affected(),
            failures = failures.rows_affected(),
            "Service deleted"
        );
        Ok(())
    }

    /// Number of services whose last check succeeded
    pub async fn count_online(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM services WHERE online = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")? as u64)
    }

    // ---------------------------------------------------------------------
    // History writes
    // ---------------------------------------------------------------------

    /// Append a hit. Returns `None` when the service has been deleted; the
    /// row is then discarded instead of resurrecting the service.
    pub async fn insert_hit(
        &self,
        service_id: Uuid,
        latency: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO hits (id, service_id, latency, created_at)
            SELECT ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM services WHERE id = ?)
            "#,
        )
        .bind(id)
        .bind(service_id)
        .bind(latency)
        .bind(at.timestamp_millis())
        .bind(service_id)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() > 0).then_some(id))
    }

    /// Append a failure. Same discard rule as [`Database::insert_hit`].
    pub async fn insert_failure(
        &self,
        service_id: Uuid,
        issue: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO failures (id, service_id, issue, created_at)
            SELECT ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM services WHERE id = ?)
            "#,
        )
        .bind(id)
        .bind(service_id)
        .bind(issue)
        .bind(at.timestamp_millis())
        .bind(service_id)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() > 0).then_some(id))
    }

    // ---------------------------------------------------------------------
    // History reads
    // ---------------------------------------------------------------------

    /// All hits, oldest first
    pub async fn hits(&self, service_id: Uuid) -> Result<Vec<Hit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, latency, created_at FROM hits
            WHERE service_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hit_from_row).collect()
    }

    /// At most `limit` hits, newest first
    pub async fn recent_hits(&self, service_id: Uuid, limit: i64) -> Result<Vec<Hit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, latency, created_at FROM hits
            WHERE service_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hit_from_row).collect()
    }

    /// All failures, oldest first
    pub async fn failures(&self, service_id: Uuid) -> Result<Vec<Failure>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, issue, created_at FROM failures
            WHERE service_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(failure_from_row).collect()
    }

    /// At most `limit` failures, newest first
    pub async fn recent_failures(&self, service_id: Uuid, limit: i64) -> Result<Vec<Failure>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, issue, created_at FROM failures
            WHERE service_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(failure_from_row).collect()
    }

    /// Hits recorded at or after `since` (all hits when `None`)
    pub async fn count_hits(&self, service_id: Uuid, since: Option<DateTime<Utc>>) -> Result<u64> {
        self.count_rows("hits", service_id, since).await
    }

    /// Failures recorded at or after `since` (all failures when `None`)
    pub async fn count_failures(
        &self,
        service_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        self.count_rows("failures", service_id, since).await
    }

    async fn count_rows(
        &self,
        table: &'static str,
        service_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let query = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE service_id = ? AND created_at >= ?",
            table
        );
        let row = sqlx::query(&query)
            .bind(service_id)
            .bind(since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }

    /// Total latency across all hits, in seconds
    pub async fn sum_latency(&self, service_id: Uuid) -> Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(latency), 0.0) AS total FROM hits WHERE service_id = ?",
        )
        .bind(service_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<f64, _>("total")?)
    }

    /// Time of the newest hit, if any
    pub async fn latest_hit_at(&self, service_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        self.edge_timestamp(
            "SELECT MAX(created_at) AS at FROM hits WHERE service_id = ? AND created_at > ?",
            service_id,
            None,
        )
        .await
    }

    /// Time of the newest failure, if any
    pub async fn latest_failure_at(&self, service_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        self.edge_timestamp(
            "SELECT MAX(created_at) AS at FROM failures WHERE service_id = ? AND created_at > ?",
            service_id,
            None,
        )
        .await
    }

    /// Time of the oldest hit at or after `after`.
    ///
    /// Inclusive so a record sharing a millisecond with `after` still counts.
    pub async fn first_hit_after(
        &self,
        service_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.edge_timestamp(
            "SELECT MIN(created_at) AS at FROM hits WHERE service_id = ? AND created_at >= ?",
            service_id,
            after,
        )
        .await
    }

    /// Time of the oldest failure at or after `after`.
    ///
    /// Inclusive so a record sharing a millisecond with `after` still counts.
    pub async fn first_failure_after(
        &self,
        service_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.edge_timestamp(
            "SELECT MIN(created_at) AS at FROM failures WHERE service_id = ? AND created_at >= ?",
            service_id,
            after,
        )
        .await
    }

    async fn edge_timestamp(
        &self,
        query: &'static str,
        service_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(query)
            .bind(service_id)
            .bind(after.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN))
            .fetch_one(&self.pool)
            .await?;

        row.try_get::<Option<i64>, _>("at")?
            .map(from_millis)
            .transpose()
    }

    /// Average hit latency per hour since `since`, oldest bucket first
    pub async fn hourly_latency(
        &self,
        service_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChartPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT
                (created_at / 3600000) * 3600000 AS bucket,
                COUNT(*) AS hits,
                AVG(latency) AS avg_latency
            FROM hits
            WHERE service_id = ? AND created_at >= ?
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )
        .bind(service_id)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ChartPoint> {
                let avg: f64 = row.try_get("avg_latency")?;
                Ok(ChartPoint {
                    bucket: from_millis(row.try_get("bucket")?)?,
                    hits: row.try_get("hits")?,
                    avg_latency_ms: avg * 1000.0,
                })
            })
            .collect()
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::DatabaseError(format!("Invalid timestamp: {}", ms)))
}

fn narrow_u16(value: i64, column: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| AppError::DatabaseError(format!("{} out of range: {}", column, value)))
}

fn narrow_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AppError::DatabaseError(format!("{} out of range: {}", column, value)))
}

/// Convert a `services` row into a Service
fn service_from_row(row: &SqliteRow) -> Result<Service> {
    Ok(Service {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        port: row
            .try_get::<Option<i64>, _>("port")?
            .map(|p| narrow_u16(p, "port"))
            .transpose()?,
        service_type: row.try_get("service_type")?,
        method: row.try_get("method")?,
        expected_status: narrow_u16(row.try_get("expected_status")?, "expected_status")?,
        expected: row.try_get("expected")?,
        interval: narrow_u32(row.try_get("check_interval")?, "check_interval")?,
        timeout: narrow_u32(row.try_get("timeout")?, "timeout")?,
        online: row.try_get("online")?,
        last_status_code: row
            .try_get::<Option<i64>, _>("last_status_code")?
            .map(|c| narrow_u16(c, "last_status_code"))
            .transpose()?,
        latency: row.try_get("latency")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn hit_from_row(row: &SqliteRow) -> Result<Hit> {
    Ok(Hit {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        latency: row.try_get("latency")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn failure_from_row(row: &SqliteRow) -> Result<Failure> {
    Ok(Failure {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        issue: row.try_get("issue")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
