//! Fixed-width worker pool over a shared queue, one per pipeline stage

use anyhow::Result;
use astra_common::{AstraError, AstraResult};
use astra_crack::StopHandle;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::progress::ProgressTracker;

/// Run `work` over `items` with at most `width` items in flight.
///
/// `Ok(Some(_))` is collected, `Ok(None)` is a completed item with nothing to
/// report, and `Err(_)` is a partial-stage failure: logged, counted and left
/// out of the output. Output order is unspecified. Workers stop taking items
/// once `stop` is set.
pub(crate) async fn run_pool<I, O, F, Fut>(
    progress: Arc<ProgressTracker>,
    items: Vec<I>,
    width: usize,
    stop: &StopHandle,
    work: F,
) -> Result<Vec<O>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AstraResult<Option<O>>> + Send + 'static,
{
    let total = items.len();
    progress.set_total(total).await;
    if total == 0 {
        return Ok(Vec::new());
    }

    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let work = Arc::new(work);
    let (tx, mut rx) = mpsc::channel::<O>(1024);

    let width = width.max(1).min(total);
    let mut workers = Vec::with_capacity(width);
    for _ in 0..width {
        let queue = queue.clone();
        let work = work.clone();
        let progress = progress.clone();
        let stop = stop.clone();
        let tx = tx.clone();

        workers.push(tokio::spawn(async move {
            loop {
                if stop.is_stopped() {
                    break;
                }
                let next = queue.lock().await.pop_front();
                let Some(item) = next else { break };

                match work(item).await {
                    Ok(found) => {
                        progress.increment_completed().await;
                        if let Some(out) = found {
                            if tx.send(out).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        progress.increment_failed().await;
                        log_partial(progress.stage(), &err);
                    }
                }
            }
        }));
    }
    drop(tx);

    let mut collected = Vec::new();
    while let Some(out) = rx.recv().await {
        collected.push(out);
    }
    for worker in workers {
        worker.await?;
    }

    progress.log_summary().await;
    Ok(collected)
}

fn log_partial(stage: &'static str, err: &AstraError) {
    match err {
        AstraError::PartialStage { target, cause, .. } => {
            warn!(stage, target = %target, error = %cause, "Dropping target from {} output", stage);
        }
        other => warn!(stage, error = %other, "Dropping item from {} output", stage),
    }
}
