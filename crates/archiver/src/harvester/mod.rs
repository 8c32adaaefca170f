//! Harvester - schema introspection and keyset-paginated row streaming
//!
//! A harvester describes one table, resolves its single-column primary key
//! and hands out a [`RowStream`]. Rows are fetched by an independent worker
//! task in windows of `batch_limit` rows ordered by the key:
//!
//! ```text
//! consumer                      worker
//!    │ ── pull ──────────────────▶ │  SELECT ... ORDER BY pk LIMIT n
//!    │ ◀────────────── row, row ── │
//!    │ ◀──────────────── batch end │  (full batch: wait for next pull)
//!    │ ── pull ──────────────────▶ │  SELECT ... WHERE pk > last ...
//!    │ ◀──────────────────── row ── │  (short batch: worker exits)
//!    │ ◀────────────────── closed ─ │
//! ```
//!
//! The worker only queries after a pull, so exactly one batch is in flight.
//! A fetch failure closes the stream and is retained on the harvester; read
//! it with [`Harvester::take_error`] once the stream returns `None`.

pub mod mysql;

use crate::error::{ArchiverError, Result};
use crate::meta::{ColumnDescriptor, Row};
use crate::registry::Module;
use crate::session::Session;
use archiver_rdbc::connection::ConnectionConfig;
use archiver_rdbc::security::quote_identifier;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Source side of the pipeline
#[async_trait]
pub trait Harvester: Module {
    /// Connect, describe `table`, resolve its primary key and start the fetch
    /// worker.
    ///
    /// Setup failures are returned here and no stream is produced. Rows
    /// are fetched `session.batch_limit()` at a time.
    async fn start(
        &mut self,
        session: &Session,
        source: &ConnectionConfig,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<RowStream>;

    /// Columns in describe order (empty before `start`)
    fn table_definition(&self) -> &[ColumnDescriptor];

    /// Ordinal of the primary-key column
    fn primary_key_index(&self) -> Option<usize>;

    /// The primary-key column
    fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.primary_key_index()
            .and_then(|idx| self.table_definition().get(idx))
    }

    /// Column names in describe order
    fn column_names(&self) -> Vec<String> {
        self.table_definition()
            .iter()
            .map(|c| c.field.clone())
            .collect()
    }

    /// Quoted, comma-separated projection list
    fn field_list(&self) -> String {
        self.table_definition()
            .iter()
            .map(|c| quote_identifier(&c.field))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Take the error that closed the stream, if any
    fn take_error(&self) -> Option<ArchiverError>;

    /// Fetch counters
    fn stats(&self) -> HarvestStats;
}

/// Fetch counters, readable after the stream closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestStats {
    /// Batch queries issued
    pub batches: u64,
    /// Rows handed to the stream
    pub rows: u64,
}

/// State shared between a harvester and its fetch worker
#[derive(Debug, Default)]
pub(crate) struct WorkerState {
    error: Mutex<Option<ArchiverError>>,
    batches: AtomicU64,
    rows: AtomicU64,
}

impl WorkerState {
    pub(crate) fn record_error(&self, err: ArchiverError) {
        *self.error.lock() = Some(err);
    }

    pub(crate) fn take_error(&self) -> Option<ArchiverError> {
        self.error.lock().take()
    }

    pub(crate) fn batch_fetched(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn row_sent(&self) {
        self.rows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> HarvestStats {
        HarvestStats {
            batches: self.batches.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
        }
    }
}

/// Worker-to-consumer message
#[derive(Debug)]
pub(crate) enum Delivery {
    Row(Row),
    /// A full batch was delivered; the worker waits for the next pull
    BatchEnd,
}

/// Worker half of a [`RowStream`]
pub(crate) struct RowSink {
    pub(crate) rows: mpsc::Sender<Delivery>,
    pub(crate) pulls: mpsc::Receiver<()>,
}

/// Pull-driven stream of rows in primary-key order
///
/// Dropping the stream stops the worker at its next send or pull wait.
#[derive(Debug)]
pub struct RowStream {
    rows: mpsc::Receiver<Delivery>,
    pulls: mpsc::Sender<()>,
    needs_pull: bool,
}

impl RowStream {
    /// Create a connected stream/sink pair
    pub(crate) fn channel() -> (Self, RowSink) {
        let (row_tx, row_rx) = mpsc::channel(1);
        let (pull_tx, pull_rx) = mpsc::channel(1);
        (
            Self {
                rows: row_rx,
                pulls: pull_tx,
                needs_pull: true,
            },
            RowSink {
                rows: row_tx,
                pulls: pull_rx,
            },
        )
    }

    /// Next row, or `None` once the worker has finished
    pub async fn next(&mut self) -> Option<Row> {
        loop {
            if self.needs_pull {
                self.needs_pull = false;
                // A failed send means the worker is gone; recv below sees the close.
                let _ = self.pulls.send(()).await;
            }
            match self.rows.recv().await? {
                Delivery::Row(row) => return Some(row),
                Delivery::BatchEnd => self.needs_pull = true,
            }
        }
    }

    /// Adapt into a [`futures::Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Row> + Send {
        stream::unfold(self, |mut rows| async move {
            let row = rows.next().await?;
            Some((row, rows))
        })
    }
}

/// Shared pointer to worker state, held by harvester implementations
pub(crate) type SharedWorkerState = Arc<WorkerState>;
