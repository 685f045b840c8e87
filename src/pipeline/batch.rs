use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

/// Typed failure of one batched item. Never aborts siblings.
#[derive(Debug, thiserror::Error)]
pub enum BatchError<E> {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(E),
}

/// Bounded-concurrency batch executor: the one scheduler behind both the
/// query pass and the fetch pass.
///
/// Items run in sequential batches of `concurrency`; within a batch all run
/// concurrently; batch N+1 starts only after every item of batch N resolved,
/// including the timed-out and failed ones. Results preserve item order.
/// `after_batch(completed, total)` fires between batches on the caller's
/// task, so aggregate counters and progress updates never race with workers.
pub async fn run_in_batches<I, T, E, F, Fut, B>(
    items: Vec<I>,
    concurrency: usize,
    per_item_timeout: Duration,
    run: F,
    mut after_batch: B,
) -> Vec<Result<T, BatchError<E>>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: FnMut(usize, usize),
{
    let total = items.len();
    let concurrency = concurrency.max(1);
    let mut outcomes = Vec::with_capacity(total);
    let mut pending = items.into_iter();

    loop {
        let batch: Vec<I> = pending.by_ref().take(concurrency).collect();
        if batch.is_empty() {
            break;
        }

        let in_flight = batch.into_iter().map(|item| {
            let fut = run(item);
            async move {
                match timeout(per_item_timeout, fut).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(BatchError::Failed(e)),
                    Err(_) => Err(BatchError::Timeout(per_item_timeout)),
                }
            }
        });

        outcomes.extend(join_all(in_flight).await);
        after_batch(outcomes.len(), total);
    }

    outcomes
}
