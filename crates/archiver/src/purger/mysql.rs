//! MySQL purger

use super::{join_worker, KeyIntake, PurgeReport, PurgeWorker, Purger};
use crate::error::{ArchiverError, Result};
use crate::registry::Module;
use crate::session::Session;
use archiver_rdbc::connection::{ConnectionConfig, ConnectionFactory};
use archiver_rdbc::mysql::MySqlConnectionFactory;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Backend name
pub const BACKEND: &str = "mysql";

/// Purger deleting from MySQL/MariaDB tables
pub struct MySqlPurger {
    factory: Arc<dyn ConnectionFactory>,
    worker: Option<JoinHandle<PurgeReport>>,
    started: bool,
}

impl MySqlPurger {
    /// Purger connecting through `mysql_async`
    pub fn new() -> Self {
        Self::with_factory(Arc::new(MySqlConnectionFactory::new()))
    }

    /// Purger connecting through a custom factory
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            worker: None,
            started: false,
        }
    }
}

impl Default for MySqlPurger {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for MySqlPurger {
    fn name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl Purger for MySqlPurger {
    async fn start(
        &mut self,
        session: &Session,
        destination: &ConnectionConfig,
        delete_statement: &str,
    ) -> Result<KeyIntake> {
        if self.started {
            return Err(ArchiverError::Internal(
                "purger has already been started".into(),
            ));
        }
        if delete_statement.matches('?').count() != 1 {
            return Err(ArchiverError::Config(format!(
                "delete statement must take exactly one parameter: {}",
                delete_statement
            )));
        }

        let conn = self
            .factory
            .connect(destination)
            .await
            .map_err(|e| ArchiverError::ConnectFailed {
                target: destination.redacted_url(),
                source: e,
            })?;

        let stmt = match conn.prepare(delete_statement).await {
            Ok(stmt) => stmt,
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Failed to close destination connection");
                }
                return Err(ArchiverError::PrepareFailed {
                    statement: delete_statement.to_string(),
                    source: e,
                });
            }
        };

        let (intake, keys) = KeyIntake::channel(session.batch_limit());
        let worker = PurgeWorker {
            conn,
            stmt,
            keys,
            cancel: session.token().clone(),
        };
        self.worker = Some(worker.spawn(session));
        self.started = true;

        info!(
            destination = %destination.redacted_url(),
            statement = delete_statement,
            "Purge started"
        );
        Ok(intake)
    }

    async fn finish(&mut self) -> Result<PurgeReport> {
        let handle = self.worker.take().ok_or(ArchiverError::NotStarted("purger"))?;
        join_worker(handle).await
    }
}
