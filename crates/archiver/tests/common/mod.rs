//! In-memory database fake for harvester/purger tests
//!
//! Understands exactly the statements the archiver issues:
//! `DESC <table>`, the keyset `SELECT` (one or two parameters) and
//! `DELETE ... WHERE <pk> = ?`. Every statement execution is logged.

#![allow(dead_code)]

use archiver_rdbc::connection::{Connection, ConnectionConfig, ConnectionFactory, PreparedStatement};
use archiver_rdbc::security::quote_identifier;
use archiver_rdbc::types::{Row, Value};
use archiver_rdbc::error::server_code;
use archiver_rdbc::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Filter = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// One logged statement execution
#[derive(Debug, Clone)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
}

struct FakeColumn {
    name: String,
    declared_type: String,
    primary: bool,
}

struct FakeTable {
    columns: Vec<FakeColumn>,
    rows: Vec<Vec<Value>>,
    filters: Vec<(String, Filter)>,
}

impl FakeTable {
    fn pk(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary)
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<String, FakeTable>,
    log: Vec<Executed>,
    connects: usize,
    open_connections: usize,
    prepared: usize,
    closed_statements: usize,
    selects: usize,
    fail_connect: bool,
    fail_prepare: Option<String>,
    fail_select_at: Option<usize>,
    fail_delete_keys: HashSet<String>,
    cancel_on_select: Option<(usize, CancellationToken)>,
    delete_delay: Option<Duration>,
}

/// Cloneable handle; clones share one database
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<State>>,
}

/// Compare keys numerically when both are integers, byte-wise otherwise
pub fn key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => key_bytes(a).cmp(&key_bytes(b)),
    }
}

fn key_bytes(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::Bytes(raw) => Some(raw.clone()),
        other => other.as_string().map(String::into_bytes),
    }
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }

    /// `columns`: `(name, declared type, is primary)`
    pub fn create_table(&self, name: &str, columns: &[(&str, &str, bool)]) {
        let table = FakeTable {
            columns: columns
                .iter()
                .map(|(name, ty, primary)| FakeColumn {
                    name: name.to_string(),
                    declared_type: ty.to_string(),
                    primary: *primary,
                })
                .collect(),
            rows: Vec::new(),
            filters: Vec::new(),
        };
        self.state.lock().tables.insert(quote_identifier(name), table);
    }

    /// Insert a row, keeping the table sorted by primary key
    pub fn insert(&self, table: &str, values: Vec<Value>) {
        let mut state = self.state.lock();
        let t = state
            .tables
            .get_mut(&quote_identifier(table))
            .expect("unknown table");
        t.rows.push(values);
        if let Some(pk) = t.pk() {
            t.rows.sort_by(|a, b| key_cmp(&a[pk], &b[pk]));
        }
    }

    /// Evaluate `predicate` whenever a SELECT carries `(clause)`
    pub fn add_filter<F>(&self, table: &str, clause: &str, predicate: F)
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let t = state
            .tables
            .get_mut(&quote_identifier(table))
            .expect("unknown table");
        t.filters.push((format!("({})", clause), Arc::new(predicate)));
    }

    pub fn fail_connect(&self) {
        self.state.lock().fail_connect = true;
    }

    /// Fail any prepare whose SQL contains `fragment`
    pub fn fail_prepare(&self, fragment: &str) {
        self.state.lock().fail_prepare = Some(fragment.to_string());
    }

    /// Fail the `n`-th SELECT (1-based)
    pub fn fail_select_at(&self, n: usize) {
        self.state.lock().fail_select_at = Some(n);
    }

    pub fn fail_delete(&self, key: &str) {
        self.state.lock().fail_delete_keys.insert(key.to_string());
    }

    /// Cancel `token` while serving the `n`-th SELECT (1-based)
    pub fn cancel_on_select(&self, n: usize, token: CancellationToken) {
        self.state.lock().cancel_on_select = Some((n, token));
    }

    pub fn delay_deletes(&self, delay: Duration) {
        self.state.lock().delete_delay = Some(delay);
    }

    pub fn log(&self) -> Vec<Executed> {
        self.state.lock().log.clone()
    }

    pub fn select_count(&self) -> usize {
        self.state.lock().selects
    }

    /// Keys passed to DELETE, in execution order
    pub fn delete_keys(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|e| e.sql.starts_with("DELETE"))
            .filter_map(|e| e.params.first().and_then(Value::as_string))
            .collect()
    }

    /// Parameters bound to DELETE, as received
    pub fn delete_params(&self) -> Vec<Value> {
        self.log()
            .into_iter()
            .filter(|e| e.sql.starts_with("DELETE"))
            .filter_map(|e| e.params.first().cloned())
            .collect()
    }

    /// Remaining primary-key values as stored
    pub fn key_values(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock();
        let t = &state.tables[&quote_identifier(table)];
        let pk = t.pk().unwrap_or(0);
        t.rows.iter().map(|r| r[pk].clone()).collect()
    }

    /// Remaining primary-key values, in key order
    pub fn keys(&self, table: &str) -> Vec<String> {
        let state = self.state.lock();
        let t = &state.tables[&quote_identifier(table)];
        let pk = t.pk().unwrap_or(0);
        t.rows
            .iter()
            .filter_map(|r| r[pk].as_string())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    pub fn open_statements(&self) -> usize {
        let state = self.state.lock();
        state.prepared - state.closed_statements
    }

    /// Wait (bounded) until every connection and statement has been released
    pub async fn wait_released(&self) -> bool {
        for _ in 0..200 {
            if self.open_connections() == 0 && self.open_statements() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn describe(&self, sql: &str) -> Result<Vec<Row>> {
        let name = sql.trim_start_matches("DESC ").trim();
        let state = self.state.lock();
        let table = state.tables.get(name).ok_or_else(|| Error::TableNotFound {
            table: name.to_string(),
        })?;

        let names: Vec<String> = ["Field", "Type", "Null", "Key", "Default", "Extra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Ok(table
            .columns
            .iter()
            .map(|c| {
                Row::new(
                    names.clone(),
                    vec![
                        Value::String(c.name.clone()),
                        Value::Bytes(c.declared_type.clone().into_bytes()),
                        Value::String(if c.primary { "NO" } else { "YES" }.into()),
                        Value::String(if c.primary { "PRI" } else { "" }.into()),
                        Value::Null,
                        Value::String(String::new()),
                    ],
                )
            })
            .collect())
    }

    fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock();
        state.selects += 1;
        let n = state.selects;
        state.log.push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if let Some((at, token)) = &state.cancel_on_select {
            if *at == n {
                token.cancel();
            }
        }
        if state.fail_select_at == Some(n) {
            return Err(Error::query_with_sql("Lost connection to server", sql));
        }

        let table_name = table_after(sql, " FROM ")?;
        let table = state
            .tables
            .get(&table_name)
            .ok_or_else(|| Error::TableNotFound {
                table: table_name.clone(),
            })?;
        let pk = table.pk().ok_or_else(|| Error::query("no key"))?;

        let (cursor, limit) = match params {
            [limit] => (None, limit),
            [cursor, limit] => (Some(cursor), limit),
            _ => return Err(Error::query("unexpected parameter count")),
        };
        let limit = limit.as_i64().ok_or_else(|| Error::query("bad limit"))? as usize;

        let filters: Vec<&Filter> = table
            .filters
            .iter()
            .filter(|(clause, _)| sql.contains(clause.as_str()))
            .map(|(_, f)| f)
            .collect();

        let names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        Ok(table
            .rows
            .iter()
            .filter(|r| cursor.map_or(true, |c| key_cmp(&r[pk], c) == Ordering::Greater))
            .filter(|r| filters.iter().all(|f| f(r.as_slice())))
            .take(limit)
            .map(|r| Row::new(names.clone(), r.clone()))
            .collect())
    }

    async fn delete(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let delay = self.state.lock().delete_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.log.push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let key = params
            .first()
            .ok_or_else(|| Error::query("missing key parameter"))?;
        if let Some(k) = key.as_string() {
            if state.fail_delete_keys.contains(&k) {
                return Err(Error::server(
                    server_code::LOCK_WAIT_TIMEOUT,
                    "Lock wait timeout exceeded; try restarting transaction",
                    sql,
                ));
            }
        }

        let table_name = table_after(sql, "DELETE FROM ")?;
        let table = state
            .tables
            .get_mut(&table_name)
            .ok_or_else(|| Error::TableNotFound {
                table: table_name.clone(),
            })?;
        let pk = table.pk().ok_or_else(|| Error::query("no key"))?;

        let before = table.rows.len();
        table
            .rows
            .retain(|r| key_cmp(&r[pk], key) != Ordering::Equal);
        Ok((before - table.rows.len()) as u64)
    }

    async fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if sql.starts_with("DESC ") {
            self.describe(sql)
        } else if sql.starts_with("SELECT ") {
            self.select(sql, params)
        } else {
            Err(Error::query_with_sql("unsupported statement", sql))
        }
    }
}

fn table_after(sql: &str, marker: &str) -> Result<String> {
    let start = sql
        .find(marker)
        .ok_or_else(|| Error::query_with_sql("no table", sql))?
        + marker.len();
    Ok(sql[start..]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string())
}

#[async_trait]
impl ConnectionFactory for FakeDb {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(Error::connection("Connection refused"));
        }
        state.connects += 1;
        state.open_connections += 1;
        Ok(Box::new(FakeConnection { db: self.clone() }))
    }
}

struct FakeConnection {
    db: FakeDb,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.db.run(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.db.delete(sql, params).await
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let mut state = self.db.state.lock();
        if let Some(fragment) = &state.fail_prepare {
            if sql.contains(fragment.as_str()) {
                return Err(Error::query_with_sql("Prepare failed", sql));
            }
        }
        state.prepared += 1;
        Ok(Box::new(FakeStatement {
            db: self.db.clone(),
            sql: sql.to_string(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.db.state.lock().open_connections -= 1;
        Ok(())
    }
}

struct FakeStatement {
    db: FakeDb,
    sql: String,
}

#[async_trait]
impl PreparedStatement for FakeStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.db.delete(&self.sql, params).await
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        self.db.run(&self.sql, params).await
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn close(&self) -> Result<()> {
        self.db.state.lock().closed_statements += 1;
        Ok(())
    }
}

/// Table `T(id PRIMARY, name)` holding `(1,a) .. (n, ...)`
pub fn seeded(n: i64) -> FakeDb {
    let db = FakeDb::new();
    db.create_table("t", &[("id", "int(11)", true), ("name", "varchar(32)", false)]);
    for id in 1..=n {
        let name = char::from(b'a' + ((id - 1) % 26) as u8).to_string();
        db.insert("t", vec![Value::Int64(id), Value::String(name)]);
    }
    db
}
