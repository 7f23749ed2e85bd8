//! Per-stage progress tracking

use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Counters for one pipeline stage. `failed` counts items that were dropped
/// from the stage output after a partial-stage failure.
pub struct ProgressTracker {
    stage: &'static str,
    counts: Mutex<StageCounts>,
}

impl ProgressTracker {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            counts: Mutex::new(StageCounts::default()),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub async fn set_total(&self, total: usize) {
        self.counts.lock().await.total = total;
    }

    pub async fn increment_completed(&self) {
        self.counts.lock().await.completed += 1;
    }

    pub async fn increment_failed(&self) {
        self.counts.lock().await.failed += 1;
    }

    pub async fn counts(&self) -> StageCounts {
        *self.counts.lock().await
    }

    pub async fn log_summary(&self) {
        let counts = self.counts().await;
        let done = counts.completed + counts.failed;
        info!(
            stage = self.stage,
            total = counts.total,
            completed = counts.completed,
            failed = counts.failed,
            "Stage {} finished {}/{}",
            self.stage,
            done,
            counts.total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_accumulate() {
        let progress = ProgressTracker::new("fingerprint");
        progress.set_total(3).await;
        progress.increment_completed().await;
        progress.increment_completed().await;
        progress.increment_failed().await;
        progress.log_summary().await;

        assert_eq!(
            progress.counts().await,
            StageCounts {
                total: 3,
                completed: 2,
                failed: 1
            }
        );
        assert_eq!(progress.stage(), "fingerprint");
    }
}
