//! Database access for dependency seeding, assertions and extraction.
//!
//! One operation: run a query, get the rows back as name → value maps.
//! Every invocation opens its own connection and releases it before
//! returning, on error paths included.

use crate::error::{TauonError, TauonResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Column, Connection, MySqlConnection, Row};
use tracing::{debug, instrument};

/// Connection parameters, deserialized from the environment seed's
/// `db_info` entry. The field names follow the seed file format.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub db_host: String,
    #[serde(default = "default_port")]
    pub db_port: u16,
    pub db_user: String,
    pub db_pwd: String,
    pub db_database: String,
    /// Tunnel parameters are carried for completeness; the bundled
    /// executor refuses them (see [`MySqlExecutor::new`]).
    #[serde(default)]
    pub ssh: bool,
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub ssh_pwd: Option<String>,
}

fn default_port() -> u16 {
    3306
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a query and return all rows as column → value maps.
    async fn query_all(&self, sql: &str) -> TauonResult<Vec<Map<String, Value>>>;
}

/// MySQL executor opening one connection per query.
#[derive(Debug)]
pub struct MySqlExecutor {
    config: DbConfig,
}

impl MySqlExecutor {
    /// Build an executor from connection parameters.
    ///
    /// Configurations requesting an SSH tunnel are rejected: forwarding
    /// is a deployment concern, and callers that need one supply their
    /// own [`SqlExecutor`] pointed at the forwarded port.
    pub fn new(config: DbConfig) -> TauonResult<Self> {
        if config.ssh {
            return Err(TauonError::Config(
                "ssh-tunneled database access is not handled here; \
                 point db_host at a forwarded port instead"
                    .to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.config.db_host)
            .port(self.config.db_port)
            .username(&self.config.db_user)
            .password(&self.config.db_pwd)
            .database(&self.config.db_database)
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    #[instrument(skip(self, sql))]
    async fn query_all(&self, sql: &str) -> TauonResult<Vec<Map<String, Value>>> {
        let mut conn = MySqlConnection::connect_with(&self.options()).await?;
        let result = sqlx::query(sql).fetch_all(&mut conn).await;
        // Explicit close either way so the connection never outlives
        // the call.
        let _ = conn.close().await;
        let rows = result?;

        let mapped: Vec<Map<String, Value>> = rows.iter().map(row_to_map).collect();
        debug!("query returned {} row(s): {sql}", mapped.len());
        Ok(mapped)
    }
}

/// Convert one row to a column → value map. Temporal columns stringify
/// so the result is always serializable into the variable pool.
fn row_to_map(row: &MySqlRow) -> Map<String, Value> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, index));
    }
    map
}

fn column_value(row: &MySqlRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<u64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return value
            .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return value
            .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return value
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(err) => Value::String(BASE64.encode(err.into_bytes())),
            })
            .unwrap_or(Value::Null);
    }
    Value::Null
}
