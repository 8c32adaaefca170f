//! MySQL/MariaDB backend on `mysql_async`
//!
//! One [`MySqlConnection`] wraps a single driver connection behind an async
//! mutex; statements prepared on it share that handle. Server errors keep
//! their error number so lock conflicts can be told apart from bad SQL.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Statement};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, PreparedStatement};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type SharedConn = Arc<Mutex<Option<Conn>>>;

fn to_param(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as My;
    match value {
        Value::Null => My::NULL,
        Value::Bool(b) => My::Int(i64::from(*b)),
        Value::Int64(n) => My::Int(*n),
        Value::UInt64(n) => My::UInt(*n),
        Value::Float64(n) => My::Double(*n),
        Value::String(s) => My::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => My::Bytes(b.clone()),
        Value::Date(d) => My::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => My::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => My::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000,
        ),
    }
}

fn from_driver(value: mysql_async::Value) -> Value {
    use mysql_async::Value as My;
    match value {
        My::NULL => Value::Null,
        My::Bytes(b) => String::from_utf8(b)
            .map(Value::String)
            .unwrap_or_else(|e| Value::Bytes(e.into_bytes())),
        My::Int(n) => Value::Int64(n),
        My::UInt(n) => Value::UInt64(n),
        My::Float(f) => Value::Float64(f64::from(f)),
        My::Double(d) => Value::Float64(d),
        My::Date(y, mo, d, h, mi, s, us) => {
            let Some(date) = NaiveDate::from_ymd_opt(i32::from(y), u32::from(mo), u32::from(d))
            else {
                // zero dates ('0000-00-00') have no chrono form
                return Value::String(format!("{:04}-{:02}-{:02}", y, mo, d));
            };
            if (h, mi, s, us) == (0, 0, 0, 0) {
                return Value::Date(date);
            }
            NaiveTime::from_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                .map(|time| Value::DateTime(NaiveDateTime::new(date, time)))
                .unwrap_or(Value::Null)
        }
        My::Time(neg, days, h, mi, s, us) => {
            if !neg && days == 0 {
                if let Some(t) =
                    NaiveTime::from_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                {
                    return Value::Time(t);
                }
            }
            // TIME spans -838:59:59..838:59:59
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                if neg { "-" } else { "" },
                days * 24 + u32::from(h),
                mi,
                s,
                us
            ))
        }
    }
}

fn to_rows(rows: Vec<mysql_async::Row>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let columns = row
                .columns_ref()
                .iter()
                .map(|c| c.name_str().into_owned())
                .collect();
            let values = (0..row.len())
                .map(|i| from_driver(row.as_ref(i).cloned().unwrap_or(mysql_async::Value::NULL)))
                .collect();
            Row::new(columns, values)
        })
        .collect()
}

/// Fold a driver error into [`Error`], keeping server error numbers
fn driver_error(context: &str, sql: &str, err: mysql_async::Error) -> Error {
    match err {
        mysql_async::Error::Server(server) => {
            Error::server(server.code, format!("{}: {}", context, server.message), sql)
        }
        mysql_async::Error::Io(io) => Error::connection_with_source(context.to_string(), io),
        other => Error::query_with_source(context, sql, other),
    }
}

async fn deadline<T>(
    limit: Option<Duration>,
    sql: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::timeout(format!("no reply within {:?}: {}", limit, sql)))?,
    }
}

fn closed() -> Error {
    Error::connection("connection already closed")
}

/// A live MySQL connection
pub struct MySqlConnection {
    conn: SharedConn,
    database: String,
    query_timeout: Option<Duration>,
}

impl MySqlConnection {
    /// Connect using `config`, honouring its connect deadline
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = Opts::from_url(&config.url)
            .map_err(|e| Error::config(format!("Invalid MySQL URL: {}", e)))?;
        let database = opts.db_name().unwrap_or_default().to_string();

        let limit = config.connect_timeout();
        let conn = tokio::time::timeout(limit, Conn::new(opts))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connecting to {} took longer than {:?}",
                    config.redacted_url(),
                    limit
                ))
            })?
            .map_err(|e| Error::connection_with_source("Failed to connect to MySQL", e))?;

        debug!(url = %config.redacted_url(), database = %database, "Connected to MySQL");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database,
            query_timeout: config.query_timeout(),
        })
    }

    /// Default schema from the URL path, empty when none was given
    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let params: Vec<_> = params.iter().map(to_param).collect();
        deadline(self.query_timeout, sql, async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(closed)?;
            let rows: std::result::Result<Vec<mysql_async::Row>, _> = if params.is_empty() {
                conn.query(sql).await
            } else {
                conn.exec(sql, params).await
            };
            rows.map(to_rows)
                .map_err(|e| driver_error("Failed to run query", sql, e))
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let params: Vec<_> = params.iter().map(to_param).collect();
        deadline(self.query_timeout, sql, async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(closed)?;
            conn.exec_drop(sql, params)
                .await
                .map_err(|e| driver_error("Failed to execute statement", sql, e))?;
            Ok(conn.affected_rows())
        })
        .await
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        let stmt = conn
            .prep(sql)
            .await
            .map_err(|e| driver_error("Failed to prepare statement", sql, e))?;

        Ok(Box::new(MySqlPreparedStatement {
            conn: Arc::clone(&self.conn),
            stmt,
            sql: sql.to_string(),
            query_timeout: self.query_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        conn.disconnect()
            .await
            .map_err(|e| Error::connection_with_source("Failed to close connection", e))
    }
}

/// Server-side prepared statement
pub struct MySqlPreparedStatement {
    conn: SharedConn,
    stmt: Statement,
    sql: String,
    query_timeout: Option<Duration>,
}

#[async_trait]
impl PreparedStatement for MySqlPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let params: Vec<_> = params.iter().map(to_param).collect();
        deadline(self.query_timeout, &self.sql, async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(closed)?;
            conn.exec_drop(&self.stmt, params)
                .await
                .map_err(|e| driver_error("Failed to execute prepared statement", &self.sql, e))?;
            Ok(conn.affected_rows())
        })
        .await
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        let params: Vec<_> = params.iter().map(to_param).collect();
        deadline(self.query_timeout, &self.sql, async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(closed)?;
            conn.exec(&self.stmt, params)
                .await
                .map(to_rows)
                .map_err(|e| driver_error("Failed to query prepared statement", &self.sql, e))
        })
        .await
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => conn
                .close(self.stmt.clone())
                .await
                .map_err(|e| driver_error("Failed to close statement", &self.sql, e)),
            None => Ok(()),
        }
    }
}

/// Opens [`MySqlConnection`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnectionFactory;

impl MySqlConnectionFactory {
    /// New factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MySqlConnection::connect(config).await?))
    }
}
