//! Pipeline orchestrator
//!
//! Wires a harvester's row stream to a purger's key intake for one session.
//! The orchestrator itself only forwards: it reads the primary-key value of
//! each row by ordinal and submits it for deletion.
//!
//! Ordering of startup matters. The delete statement can only be built once
//! the harvester has resolved the primary key, but no row may be fetched
//! before the purger intake exists. The harvester's worker does not query
//! until the stream is first pulled, so the sequence is:
//!
//! 1. start the harvester (describe, resolve key, worker idle)
//! 2. start the purger with `DELETE FROM <table> WHERE <pk> = ?`
//! 3. pull rows and forward keys until the stream closes
//! 4. close the intake and wait for the purger to drain

use crate::config::ArchiverConfig;
use crate::error::{ArchiverError, Result};
use crate::harvester::Harvester;
use crate::meta::key_label;
use crate::purger::{KeyIntake, PurgeReport, Purger};
use crate::registry;
use crate::session::Session;
use archiver_rdbc::security::quote_identifier;
use archiver_rdbc::types::Value;
use tracing::{debug, error, info, warn, Instrument};

/// Build the single-parameter delete for `table` keyed on `primary_key`
pub fn delete_statement(table: &str, primary_key: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_identifier(table),
        quote_identifier(primary_key)
    )
}

/// Outcome of one session
#[derive(Debug)]
pub struct PipelineReport {
    /// Session correlation id
    pub session_id: String,
    /// Rows received from the harvester
    pub rows_harvested: u64,
    /// Keys handed to the purger (or counted, in a dry run)
    pub keys_forwarded: u64,
    /// Batch queries the harvester issued
    pub batches: u64,
    /// Purger report; `None` for a dry run
    pub purge: Option<PurgeReport>,
    /// Whether the session was cancelled before the stream finished
    pub cancelled: bool,
    /// Error that closed the row stream early
    pub harvest_error: Option<ArchiverError>,
}

impl PipelineReport {
    /// No fetch error and no failed deletes
    pub fn is_success(&self) -> bool {
        self.harvest_error.is_none() && self.purge.as_ref().map_or(true, PurgeReport::is_clean)
    }
}

/// One harvester and optionally one purger, run under a single session
pub struct Pipeline {
    harvester: Box<dyn Harvester>,
    purger: Option<Box<dyn Purger>>,
}

impl Pipeline {
    /// Harvest and purge
    pub fn new(harvester: Box<dyn Harvester>, purger: Box<dyn Purger>) -> Self {
        Self {
            harvester,
            purger: Some(purger),
        }
    }

    /// Harvest only; keys are counted and logged, nothing is deleted
    pub fn dry_run(harvester: Box<dyn Harvester>) -> Self {
        Self {
            harvester,
            purger: None,
        }
    }

    /// Resolve fresh modules for `backend` from the process-wide registries.
    ///
    /// The purger registry is only consulted when `purge` is set.
    pub fn from_registry(backend: &str, purge: bool) -> Result<Self> {
        let harvester = registry::create_harvester(backend)?;
        if purge {
            let purger = registry::create_purger(backend)?;
            Ok(Self::new(harvester, purger))
        } else {
            Ok(Self::dry_run(harvester))
        }
    }

    /// The harvester (for schema details after `run`)
    pub fn harvester(&self) -> &dyn Harvester {
        self.harvester.as_ref()
    }

    /// Whether deletes will be issued
    pub fn purges(&self) -> bool {
        self.purger.is_some()
    }

    /// Run one session to completion.
    ///
    /// Setup failures are returned as errors before any row is fetched. A
    /// fetch failure after that is reported in
    /// [`PipelineReport::harvest_error`] once the purger has drained.
    pub async fn run(&mut self, session: &Session, config: &ArchiverConfig) -> Result<PipelineReport> {
        let span = session.span();
        self.run_inner(session, config).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        session: &Session,
        config: &ArchiverConfig,
    ) -> Result<PipelineReport> {
        if let Some(purger) = &self.purger {
            if purger.name() != self.harvester.name() {
                return Err(ArchiverError::Config(format!(
                    "harvester '{}' and purger '{}' belong to different backends",
                    self.harvester.name(),
                    purger.name()
                )));
            }
        }

        let mut rows = self
            .harvester
            .start(
                session,
                &config.source_connection(),
                &config.table,
                config.where_clause(),
            )
            .await?;

        let (pk_index, pk_name) = match self.harvester.primary_key() {
            Some(pk) => (
                self.harvester.primary_key_index().unwrap_or_default(),
                pk.field.clone(),
            ),
            None => {
                return Err(ArchiverError::PrimaryKeyNotFound {
                    table: config.table.clone(),
                })
            }
        };

        let intake: Option<KeyIntake> = match self.purger.as_mut() {
            Some(purger) => {
                let statement = delete_statement(&config.table, &pk_name);
                // Dropping `rows` on error stops the idle fetch worker.
                Some(
                    purger
                        .start(session, &config.destination_connection(), &statement)
                        .await?,
                )
            }
            None => {
                info!(table = %config.table, "Dry run, harvested rows will not be deleted");
                None
            }
        };

        let mut rows_harvested = 0u64;
        let mut keys_forwarded = 0u64;
        let mut cancelled = false;
        let mut forward_error = None;

        loop {
            let row = tokio::select! {
                biased;
                _ = session.cancelled() => {
                    cancelled = true;
                    break;
                }
                row = rows.next() => row,
            };
            let Some(row) = row else { break };
            rows_harvested += 1;

            // The harvester refuses NULL keys, so a gap here is a broken stream.
            let Some(key) = row.value(pk_index).filter(|v| !matches!(v, Value::Null)) else {
                forward_error = Some(ArchiverError::Internal(format!(
                    "harvested row {} has no primary key value",
                    rows_harvested
                )));
                break;
            };

            match &intake {
                Some(intake) => {
                    if let Err(e) = intake.submit(key.clone()).await {
                        warn!(error = %e, key = %key_label(key), "Purger stopped accepting keys");
                        break;
                    }
                }
                None => debug!(key = %key_label(key), "Would delete"),
            }
            keys_forwarded += 1;
        }
        drop(rows);
        if cancelled {
            info!(rows_harvested, keys_forwarded, "Session cancelled, stopping");
        }

        let purge = match (intake, self.purger.as_mut()) {
            (Some(intake), Some(purger)) => {
                intake.close();
                Some(purger.finish().await?)
            }
            _ => None,
        };

        let harvest_error = forward_error.or_else(|| self.harvester.take_error());
        if let Some(e) = &harvest_error {
            error!(table = %config.table, error = %e, "Harvest ended early");
        }

        let report = PipelineReport {
            session_id: session.id.clone(),
            rows_harvested,
            keys_forwarded,
            batches: self.harvester.stats().batches,
            purge,
            cancelled: cancelled || session.is_cancelled(),
            harvest_error,
        };

        info!(
            table = %config.table,
            rows = report.rows_harvested,
            keys = report.keys_forwarded,
            batches = report.batches,
            deleted = report.purge.as_ref().map_or(0, |p| p.deleted),
            rows_affected = report.purge.as_ref().map_or(0, |p| p.rows_affected),
            failed = report.purge.as_ref().map_or(0, |p| p.failed.len()),
            cancelled = report.cancelled,
            "Session finished"
        );
        Ok(report)
    }
}
