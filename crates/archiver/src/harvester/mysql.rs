//! MySQL harvester
//!
//! Describes the table with `DESC`, then pages through it with two prepared
//! statements: one for the first window (no cursor) and one for every window
//! after it (`pk > ?`).

use super::{Delivery, HarvestStats, Harvester, RowSink, RowStream, SharedWorkerState};
use crate::error::{ArchiverError, Result};
use crate::meta::{find_primary_key, primary_key_width, ColumnDescriptor, KeyKind, Row};
use crate::registry::Module;
use crate::session::Session;
use archiver_rdbc::connection::{
    Connection, ConnectionConfig, ConnectionFactory, PreparedStatement,
};
use archiver_rdbc::mysql::MySqlConnectionFactory;
use archiver_rdbc::security::{quote_identifier, validate_table_reference, validate_where_clause};
use archiver_rdbc::types::Value;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Backend name
pub const BACKEND: &str = "mysql";

/// Build the batch query.
///
/// With `after_cursor` the query takes `(cursor, limit)`, otherwise only
/// `(limit)`.
pub fn fetch_query(
    table: &str,
    fields: &str,
    primary_key: &str,
    where_clause: Option<&str>,
    after_cursor: bool,
) -> String {
    let pk = quote_identifier(primary_key);

    let mut conditions = Vec::new();
    if let Some(clause) = where_clause {
        conditions.push(format!("({})", clause));
    }
    if after_cursor {
        conditions.push(format!("{} > ?", pk));
    }

    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    format!(
        "SELECT {} FROM {}{} ORDER BY {} ASC LIMIT ?",
        fields,
        quote_identifier(table),
        where_sql,
        pk
    )
}

/// Harvester for MySQL/MariaDB tables
pub struct MySqlHarvester {
    factory: Arc<dyn ConnectionFactory>,
    table: Option<String>,
    columns: Vec<ColumnDescriptor>,
    pk_index: Option<usize>,
    state: SharedWorkerState,
}

impl MySqlHarvester {
    /// Harvester connecting through `mysql_async`
    pub fn new() -> Self {
        Self::with_factory(Arc::new(MySqlConnectionFactory::new()))
    }

    /// Harvester connecting through a custom factory
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            table: None,
            columns: Vec::new(),
            pk_index: None,
            state: SharedWorkerState::default(),
        }
    }

    async fn describe(&self, conn: &dyn Connection, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let sql = format!("DESC {}", quote_identifier(table));
        let rows = conn
            .query(&sql, &[])
            .await
            .map_err(|e| ArchiverError::SchemaIntrospectionFailed {
                table: table.to_string(),
                source: e,
            })?;

        let columns = rows
            .iter()
            .map(ColumnDescriptor::from_describe_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|message| ArchiverError::SchemaIntrospectionFailed {
                table: table.to_string(),
                source: archiver_rdbc::Error::schema(message),
            })?;

        if columns.is_empty() {
            return Err(ArchiverError::SchemaIntrospectionFailed {
                table: table.to_string(),
                source: archiver_rdbc::Error::schema("describe returned no columns"),
            });
        }
        Ok(columns)
    }

    async fn prepare(conn: &dyn Connection, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        conn.prepare(sql)
            .await
            .map_err(|e| ArchiverError::PrepareFailed {
                statement: sql.to_string(),
                source: e,
            })
    }

    async fn setup(
        &mut self,
        conn: &dyn Connection,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<(Box<dyn PreparedStatement>, Box<dyn PreparedStatement>)> {
        let columns = self.describe(conn, table).await?;
        let Some((pk_index, pk)) = find_primary_key(&columns) else {
            let width = primary_key_width(&columns);
            if width > 1 {
                warn!(table, key_columns = width, "Composite primary keys are not supported");
            }
            return Err(ArchiverError::PrimaryKeyNotFound {
                table: table.to_string(),
            });
        };
        debug!(
            table,
            columns = columns.len(),
            primary_key = %pk.field,
            key_type = %pk.declared_type,
            "Described table"
        );

        self.columns = columns.clone();
        self.pk_index = Some(pk_index);
        let fields = self.field_list();

        let first_sql = fetch_query(table, &fields, &pk.field, where_clause, false);
        let next_sql = fetch_query(table, &fields, &pk.field, where_clause, true);

        let first = Self::prepare(conn, &first_sql).await?;
        let next = match Self::prepare(conn, &next_sql).await {
            Ok(stmt) => stmt,
            Err(e) => {
                let _ = first.close().await;
                return Err(e);
            }
        };
        Ok((first, next))
    }
}

impl Default for MySqlHarvester {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for MySqlHarvester {
    fn name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl Harvester for MySqlHarvester {
    async fn start(
        &mut self,
        session: &Session,
        source: &ConnectionConfig,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<RowStream> {
        if self.table.is_some() {
            return Err(ArchiverError::Internal(
                "harvester has already been started".into(),
            ));
        }

        validate_table_reference(table)?;
        let where_clause = where_clause.map(str::trim).filter(|c| !c.is_empty());
        if let Some(clause) = where_clause {
            validate_where_clause(clause)?;
        }

        let conn = self
            .factory
            .connect(source)
            .await
            .map_err(|e| ArchiverError::ConnectFailed {
                target: source.redacted_url(),
                source: e,
            })?;

        let (first, next) = match self.setup(conn.as_ref(), table, where_clause).await {
            Ok(statements) => statements,
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Failed to close source connection");
                }
                return Err(e);
            }
        };
        self.table = Some(table.to_string());

        let pk_index = self.pk_index.unwrap_or_default();
        let key_kind = KeyKind::from_declared_type(&self.columns[pk_index].declared_type);

        let (stream, sink) = RowStream::channel();
        let worker = FetchWorker {
            conn,
            first,
            next,
            table: table.to_string(),
            column_count: self.columns.len(),
            pk_index,
            key_kind,
            limit: session.batch_limit(),
            cancel: session.token().clone(),
            state: self.state.clone(),
        };
        info!(
            table,
            batch_limit = session.batch_limit(),
            where_clause = where_clause.unwrap_or(""),
            "Harvest started"
        );
        tokio::spawn(worker.run(sink).instrument(session.span()));

        Ok(stream)
    }

    fn table_definition(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn primary_key_index(&self) -> Option<usize> {
        self.pk_index
    }

    fn take_error(&self) -> Option<ArchiverError> {
        self.state.take_error()
    }

    fn stats(&self) -> HarvestStats {
        self.state.stats()
    }
}

/// Owns the source connection and both statements for one stream
struct FetchWorker {
    conn: Box<dyn Connection>,
    first: Box<dyn PreparedStatement>,
    next: Box<dyn PreparedStatement>,
    table: String,
    column_count: usize,
    pk_index: usize,
    key_kind: KeyKind,
    limit: usize,
    cancel: CancellationToken,
    state: SharedWorkerState,
}

impl FetchWorker {
    async fn run(self, mut sink: RowSink) {
        match self.fetch_all(&mut sink).await {
            Ok(()) => debug!(table = %self.table, "Fetch worker finished"),
            Err(e) => {
                error!(table = %self.table, error = %e, "Harvest failed");
                self.state.record_error(e);
            }
        }
        // Close the stream before releasing resources.
        drop(sink);

        for stmt in [&self.first, &self.next] {
            if let Err(e) = stmt.close().await {
                warn!(error = %e, "Failed to release fetch statement");
            }
        }
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "Failed to close source connection");
        }
    }

    async fn fetch_all(&self, sink: &mut RowSink) -> Result<()> {
        let limit = Value::UInt64(self.limit as u64);
        let mut cursor: Option<Value> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Cancelled while waiting for pull");
                    return Ok(());
                }
                pull = sink.pulls.recv() => {
                    if pull.is_none() {
                        debug!("Row stream dropped");
                        return Ok(());
                    }
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let rows = match &cursor {
                None => self.first.query(&[limit.clone()]).await,
                Some(key) => self.next.query(&[key.clone(), limit.clone()]).await,
            }
            .map_err(|e| ArchiverError::fetch(&self.table, e))?;
            self.state.batch_fetched();

            let fetched = rows.len();
            debug!(rows = fetched, cursor = ?cursor, "Fetched batch");

            for db_row in rows {
                if self.cancel.is_cancelled() {
                    debug!("Cancelled mid-batch");
                    return Ok(());
                }

                let row = Row::from_values(db_row.into_values());
                if row.len() != self.column_count {
                    return Err(ArchiverError::decode(
                        &self.table,
                        format!(
                            "row has {} values, expected {}",
                            row.len(),
                            self.column_count
                        ),
                    ));
                }
                let key = row
                    .value(self.pk_index)
                    .filter(|v| !matches!(v, Value::Null))
                    .ok_or_else(|| {
                        ArchiverError::decode(&self.table, "primary key value is NULL")
                    })?;
                cursor = Some(
                    self.key_kind
                        .cursor_value(key)
                        .map_err(|message| ArchiverError::decode(&self.table, message))?,
                );

                if sink.rows.send(Delivery::Row(row)).await.is_err() {
                    debug!("Row stream dropped");
                    return Ok(());
                }
                self.state.row_sent();
            }

            if fetched < self.limit {
                return Ok(());
            }
            if sink.rows.send(Delivery::BatchEnd).await.is_err() {
                return Ok(());
            }
        }
    }
}
