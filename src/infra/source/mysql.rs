//! MySQL device source.
//!
//! Each fetch opens a single-connection pool, runs one statement and closes
//! it again. The first column of every row is taken as a device token.

use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use tracing::{debug, error};

use super::DeviceSource;
use crate::core::DispatchError;

/// Default connect and query timeout.
pub const MYSQL_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a statement against `dsn` and reads device tokens from the first
/// column. A non-empty key is the statement itself; an empty key runs the
/// configured default.
#[derive(Clone)]
pub struct MysqlSource {
    dsn: String,
    sql: String,
    timeout: Duration,
}

impl MysqlSource {
    /// Source for a `mysql://` URL with a default statement.
    pub fn new(dsn: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            sql: sql.into(),
            timeout: MYSQL_DEFAULT_TIMEOUT,
        }
    }

    /// Override the connect and query timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Statement run for an empty key.
    #[must_use]
    pub fn default_sql(&self) -> &str {
        &self.sql
    }

    /// Statement run for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] when both `key` and the
    /// default statement are empty.
    pub fn statement_for<'a>(&'a self, key: &'a str) -> Result<&'a str, DispatchError> {
        let key = key.trim();
        let sql = if key.is_empty() { self.sql.trim() } else { key };
        if sql.is_empty() {
            return Err(DispatchError::InvalidConfig("config of queue.mysql.sql is empty".into()));
        }
        Ok(sql)
    }

    async fn query(&self, sql: &str) -> Result<Vec<String>, DispatchError> {
        let unavailable = |e: sqlx::Error| {
            error!(error = %e, "mysql device query failed");
            DispatchError::SourceUnavailable(format!("mysql: {e}"))
        };
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.timeout)
            .connect(&self.dsn)
            .await
            .map_err(unavailable)?;
        let rows = tokio::time::timeout(
            self.timeout,
            sqlx::query_scalar::<_, String>(sql).fetch_all(&pool),
        )
        .await;
        pool.close().await;
        match rows {
            Ok(rows) => rows.map_err(unavailable),
            Err(_) => Err(DispatchError::SourceUnavailable(format!(
                "mysql: query timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

impl std::fmt::Debug for MysqlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The DSN usually carries credentials.
        f.debug_struct("MysqlSource")
            .field("dsn", &"<redacted>")
            .field("sql", &self.sql)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DeviceSource for MysqlSource {
    fn fetch(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        if self.dsn.is_empty() {
            return Err(DispatchError::InvalidConfig("config of queue.mysql.dsn is empty".into()));
        }
        let sql = self.statement_for(key)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::Backend(e.to_string()))?;
        let devices = runtime.block_on(self.query(sql))?;
        debug!(devices = devices.len(), "device list queried");
        Ok(devices)
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}
