//! One harvest-then-purge run
//!
//! A [`Session`] is cheap to clone; clones share the same cancellation token,
//! so cancelling any of them stops every worker attached to the run.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

/// Default number of rows fetched (and keys deleted) per batch
pub const DEFAULT_BATCH_LIMIT: usize = 1000;

/// Session state shared by the harvester, purger and orchestrator
#[derive(Debug, Clone)]
pub struct Session {
    /// Correlation id, surfaced only in diagnostics
    pub id: String,
    cancel: CancellationToken,
    batch_limit: usize,
}

impl Session {
    /// New session with a fresh id and its own cancellation token.
    ///
    /// A `batch_limit` of zero is raised to one.
    pub fn new(batch_limit: usize) -> Self {
        Self::with_cancellation(batch_limit, CancellationToken::new())
    }

    /// New session driven by an existing token (e.g. the process shutdown token)
    pub fn with_cancellation(batch_limit: usize, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cancel,
            batch_limit: batch_limit.max(1),
        }
    }

    /// Rows per fetch
    #[inline]
    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// The session's cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A token cancelled together with the session, cancellable on its own
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Cancel the session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has been cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Cancel the session once `deadline` has elapsed.
    ///
    /// Must be called from within a tokio runtime. The timer task exits early
    /// if the session is cancelled first.
    pub fn cancel_after(&self, deadline: Duration) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(session = %id, ?deadline, "Session deadline reached, cancelling");
                    cancel.cancel();
                }
            }
        })
    }

    /// Span carrying the session id; workers run inside it
    pub fn span(&self) -> Span {
        tracing::info_span!("session", id = %self.id)
    }
}
