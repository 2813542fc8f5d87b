//! Log-and-continue wrapper for side effects that must never fail the caller

use crate::BusResult;
use std::future::Future;
use tracing::warn;
use uuid::Uuid;

/// Await `operation`, logging and swallowing any error
///
/// # Returns
/// * `Some(T)` if the operation succeeded
/// * `None` if it failed (already logged at `warn`)
pub async fn best_effort<T, Fut>(operation: &str, event_id: Uuid, fut: Fut) -> Option<T>
where
    Fut: Future<Output = BusResult<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                operation = %operation,
                event_id = %event_id,
                error = %e,
                "Best-effort operation failed, continuing"
            );
            None
        }
    }
}
