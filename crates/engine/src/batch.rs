//! Batch coordinator
//!
//! Fans requests out to the orchestrator, at most `max_concurrency` at a
//! time, and places each result at its request's index.

use crate::orchestrator::Orchestrator;
use futures::stream::{FuturesUnordered, StreamExt};
use selfheal_common::{Error, HealingRequest, HealingResult, HealingStatus, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Results of a batch, one per request and in request order
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<HealingResult>,
    /// First error in completion order. Other items may still have healed.
    pub first_error: Option<Error>,
}

impl BatchOutcome {
    /// `Err(first_error)` if any item errored, otherwise the results
    pub fn into_result(self) -> Result<Vec<HealingResult>> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }
}

pub async fn heal_all(
    orchestrator: Arc<Orchestrator>,
    requests: Vec<HealingRequest>,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> BatchOutcome {
    let total = requests.len();
    info!("Batch healing {} requests (concurrency {})", total, max_concurrency);

    let requests: Vec<Arc<HealingRequest>> = requests.into_iter().map(Arc::new).collect();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let mut pending = FuturesUnordered::new();
    for (index, request) in requests.iter().enumerate() {
        let orchestrator = Arc::clone(&orchestrator);
        let semaphore = Arc::clone(&semaphore);
        let request = Arc::clone(request);
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                permit = semaphore.acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
            };
            orchestrator.heal(&request, &cancel).await
        });
        pending.push(async move { (index, handle.await) });
    }

    let mut slots: Vec<Option<HealingResult>> = vec![None; total];
    let mut first_error = None;

    while let Some((index, joined)) = pending.next().await {
        let outcome = joined.unwrap_or_else(|e| Err(Error::Backend(format!("healing task failed: {}", e))));
        match outcome {
            Ok(result) => {
                debug!("Batch item {} finished: {}", index, result.status);
                slots[index] = Some(result);
            }
            Err(e) => {
                warn!("Batch item {} aborted: {}", index, e);
                slots[index] = Some(aborted(&orchestrator, &requests[index], &e));
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    let results: Vec<HealingResult> = slots
        .into_iter()
        .zip(&requests)
        .map(|(slot, request)| {
            slot.unwrap_or_else(|| aborted(&orchestrator, request, &Error::Cancelled))
        })
        .collect();

    info!(
        "Batch healing done: {} results, {} errors",
        results.len(),
        results
            .iter()
            .filter(|r| r.metadata.contains_key("aborted"))
            .count()
    );

    BatchOutcome {
        results,
        first_error,
    }
}

/// Placeholder for an item that never produced a result
fn aborted(orchestrator: &Orchestrator, request: &HealingRequest, error: &Error) -> HealingResult {
    let (failure_type, strategy) = orchestrator.plan(request);
    let mut result = HealingResult::begin(request, strategy);
    result.status = HealingStatus::Failed;
    result.explanation = format!("Healing aborted: {}", error);
    result.set_meta("failure_type", failure_type.as_str());
    result.set_meta("aborted", true);
    result
}
