//! Concurrent project-detail aggregation.
//!
//! [`DetailAggregator`] takes a batch of [`ProjectSummary`] values and fetches
//! the full [`ProjectDetail`] for each one in its own task:
//! - At most `k` fetches are in flight under [`FanOut::Bounded`], enforced by
//!   a `tokio` semaphore acquired inside each task
//! - Outcomes flow through an `mpsc` channel to a single collector, which is
//!   the only place results are appended
//! - The call returns once every task has finished; failures are reported
//!   per project and never cancel siblings
//!
//! Output order follows completion order, not input order.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{PhylumError, Result};
use crate::model::{ProjectDetail, ProjectSummary};

/// Anything that can turn a summary into a full detail.
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, summary: &ProjectSummary) -> Result<ProjectDetail>;
}

/// Fan-out strategy.
///
/// `Unbounded` spawns every fetch at once. It is kept for callers with small
/// batches; `Bounded` is what the client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    Bounded(usize),
    Unbounded,
}

/// A fetch that did not produce a detail.
#[derive(Debug)]
pub struct DetailFailure {
    pub project_id: Uuid,
    pub project_name: String,
    pub error: PhylumError,
}

/// Everything a batch produced: `details.len() + failures.len()` equals the
/// number of summaries submitted.
#[derive(Debug, Default)]
pub struct AggregateOutcome {
    pub details: Vec<ProjectDetail>,
    pub failures: Vec<DetailFailure>,
}

impl AggregateOutcome {
    pub fn total(&self) -> usize {
        self.details.len() + self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

struct FetchOutcome {
    project_id: Uuid,
    project_name: String,
    result: Result<ProjectDetail>,
}

pub struct DetailAggregator {
    fan_out: FanOut,
}

impl DetailAggregator {
    /// # Errors
    ///
    /// [`PhylumError::Validation`] for `FanOut::Bounded(0)`, which could never
    /// make progress.
    pub fn new(fan_out: FanOut) -> Result<Self> {
        if fan_out == FanOut::Bounded(0) {
            return Err(PhylumError::Validation(
                "fan-out bound must be at least 1".to_string(),
            ));
        }
        Ok(Self { fan_out })
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    /// Fetches every summary's detail and waits for all of them.
    #[instrument(
        skip(self, source, summaries),
        fields(count = summaries.len(), fan_out = ?self.fan_out)
    )]
    pub async fn fetch_all<S>(
        &self,
        source: Arc<S>,
        summaries: Vec<ProjectSummary>,
    ) -> AggregateOutcome
    where
        S: DetailSource + ?Sized + 'static,
    {
        let total = summaries.len();
        let (semaphore, channel_capacity) = match self.fan_out {
            FanOut::Bounded(limit) => (Some(Arc::new(Semaphore::new(limit))), limit),
            FanOut::Unbounded => (None, total.max(1)),
        };
        let (tx, mut rx) = mpsc::channel::<FetchOutcome>(channel_capacity);

        info!(total, "Dispatching detail fetches");

        let mut handles = Vec::with_capacity(total);
        for summary in summaries {
            let tx = tx.clone();
            let source = Arc::clone(&source);
            let semaphore = semaphore.clone();
            let project_id = summary.id;
            let project_name = summary.name.clone();

            let handle = tokio::spawn(async move {
                let result = match acquire(semaphore).await {
                    Ok(_permit) => source.fetch_detail(&summary).await,
                    Err(e) => Err(e),
                };
                // The collector outlives every sender, so this cannot fail.
                let _ = tx
                    .send(FetchOutcome {
                        project_id: summary.id,
                        project_name: summary.name,
                        result,
                    })
                    .await;
            });
            handles.push((project_id, project_name, handle));
        }
        drop(tx);

        let mut outcome = AggregateOutcome::default();
        while let Some(fetched) = rx.recv().await {
            match fetched.result {
                Ok(detail) => outcome.details.push(detail),
                Err(error) => {
                    warn!(
                        project = %fetched.project_id,
                        name = %fetched.project_name,
                        %error,
                        "Detail fetch failed"
                    );
                    outcome.failures.push(DetailFailure {
                        project_id: fetched.project_id,
                        project_name: fetched.project_name,
                        error,
                    });
                }
            }
        }

        // A task that panicked dropped its sender without reporting.
        for (project_id, project_name, handle) in handles {
            if let Err(join_error) = handle.await {
                warn!(project = %project_id, error = %join_error, "Detail fetch task aborted");
                outcome.failures.push(DetailFailure {
                    project_id,
                    project_name,
                    error: PhylumError::TaskFailed(join_error.to_string()),
                });
            }
        }

        info!(
            succeeded = outcome.details.len(),
            failed = outcome.failures.len(),
            "Detail fetches complete"
        );
        outcome
    }
}

async fn acquire(semaphore: Option<Arc<Semaphore>>) -> Result<Option<OwnedSemaphorePermit>> {
    match semaphore {
        Some(semaphore) => semaphore
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|e| PhylumError::TaskFailed(format!("Semaphore error: {}", e))),
        None => Ok(None),
    }
}
