// Per-call deadlines for downstream I/O.
//
// Every store, log, and collaborator call made while processing a single
// event or page is wrapped here so one slow dependency can't stall a batch.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

/// Run `fut` with a deadline. Elapsing the deadline is reported as an error
/// naming the operation, so callers can treat it like any other failure.
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("{what} timed out after {}ms", limit.as_millis()),
    }
}
