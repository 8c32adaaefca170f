//! Purger - deletes harvested rows from the source by primary key
//!
//! [`Purger::start`] opens its own connection, prepares the single-parameter
//! delete once and hands back a [`KeyIntake`]. A worker task then deletes one
//! key at a time, in the order keys were submitted.
//!
//! A failed delete does not stop the worker: the key is recorded in the
//! [`PurgeReport`] and the next key is processed. Closing the intake lets the
//! worker drain what is queued and exit; cancelling the session stops it
//! after the delete in progress.

pub mod mysql;

use crate::error::{ArchiverError, Result};
use crate::meta::key_label;
use crate::registry::Module;
use crate::session::Session;
use archiver_rdbc::connection::{Connection, ConnectionConfig, PreparedStatement};
use archiver_rdbc::types::Value;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sink side of the pipeline
#[async_trait]
pub trait Purger: Module {
    /// Connect to `destination`, prepare `delete_statement` and start the
    /// delete worker.
    ///
    /// `delete_statement` must take exactly one positional parameter, the
    /// primary-key value.
    async fn start(
        &mut self,
        session: &Session,
        destination: &ConnectionConfig,
        delete_statement: &str,
    ) -> Result<KeyIntake>;

    /// Wait for the worker to exit and collect its report.
    ///
    /// Close the intake (or cancel the session) first, otherwise this waits
    /// for more keys.
    async fn finish(&mut self) -> Result<PurgeReport>;
}

/// A key whose delete failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedKey {
    /// Primary-key value; `0x…` hex when the key is not valid UTF-8
    pub key: String,
    /// Backend error message
    pub error: String,
    /// Lock contention or a dropped link; re-running the delete may succeed
    pub retriable: bool,
}

/// Outcome of one purge worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Deletes that executed successfully
    pub deleted: u64,
    /// Sum of rows affected by those deletes
    pub rows_affected: u64,
    /// Keys whose delete failed, in submission order
    pub failed: Vec<FailedKey>,
    /// Whether the worker stopped on cancellation rather than a closed intake
    pub cancelled: bool,
}

impl PurgeReport {
    /// Delete attempts made (successful or not)
    pub fn attempted(&self) -> u64 {
        self.deleted + self.failed.len() as u64
    }

    /// Whether every attempted delete succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entry point for primary-key values to delete
#[derive(Debug, Clone)]
pub struct KeyIntake {
    keys: mpsc::Sender<Value>,
}

impl KeyIntake {
    /// Create an intake with room for `capacity` queued keys
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { keys: tx }, rx)
    }

    /// Queue one key for deletion, waiting while the queue is full.
    ///
    /// The value is bound to the delete exactly as given, so binary keys
    /// reach the destination byte for byte.
    pub async fn submit(&self, key: impl Into<Value>) -> Result<()> {
        self.keys
            .send(key.into())
            .await
            .map_err(|_| ArchiverError::IntakeClosed)
    }

    /// Whether the worker has stopped accepting keys
    pub fn is_closed(&self) -> bool {
        self.keys.is_closed()
    }

    /// Stop accepting keys; the worker drains the queue and exits once every
    /// clone of this intake is closed or dropped
    pub fn close(self) {
        drop(self);
    }
}

/// Backend-neutral delete loop: owns the connection and statement
pub(crate) struct PurgeWorker {
    pub(crate) conn: Box<dyn Connection>,
    pub(crate) stmt: Box<dyn PreparedStatement>,
    pub(crate) keys: mpsc::Receiver<Value>,
    pub(crate) cancel: CancellationToken,
}

impl PurgeWorker {
    pub(crate) fn spawn(self, session: &Session) -> JoinHandle<PurgeReport> {
        use tracing::Instrument;
        tokio::spawn(self.run().instrument(session.span()))
    }

    async fn run(mut self) -> PurgeReport {
        let mut report = PurgeReport::default();

        loop {
            let key = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                key = self.keys.recv() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            self.delete(key, &mut report).await;
        }

        // Stop intake so late submitters see IntakeClosed.
        self.keys.close();
        let abandoned = self.keys.len();

        if let Err(e) = self.stmt.close().await {
            warn!(error = %e, "Failed to release delete statement");
        }
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "Failed to close destination connection");
        }

        info!(
            deleted = report.deleted,
            rows_affected = report.rows_affected,
            failed = report.failed.len(),
            abandoned,
            cancelled = report.cancelled,
            "Purge worker stopped"
        );
        report
    }

    async fn delete(&self, key: Value, report: &mut PurgeReport) {
        let result = self.stmt.execute(std::slice::from_ref(&key)).await;
        let key = key_label(&key);
        match result {
            Ok(affected) => {
                report.deleted += 1;
                report.rows_affected += affected;
                if affected == 0 {
                    debug!(key = %key, "Delete matched no rows");
                } else {
                    debug!(key = %key, rows_affected = affected, "Deleted");
                }
            }
            Err(e) => {
                let retriable = e.is_retriable();
                let err = ArchiverError::DeleteFailed {
                    key: key.clone(),
                    source: e,
                };
                warn!(
                    error = %err,
                    cause = %source_message(&err),
                    retriable,
                    "Delete failed, continuing"
                );
                report.failed.push(FailedKey {
                    key,
                    error: source_message(&err),
                    retriable,
                });
            }
        }
    }
}

fn source_message(err: &ArchiverError) -> String {
    std::error::Error::source(err)
        .map(ToString::to_string)
        .unwrap_or_else(|| err.to_string())
}

/// Await a spawned worker, mapping a panic to an internal error
pub(crate) async fn join_worker(handle: JoinHandle<PurgeReport>) -> Result<PurgeReport> {
    handle
        .await
        .map_err(|e| ArchiverError::Internal(format!("purge worker failed: {}", e)))
}
