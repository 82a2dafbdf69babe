//! Fire-and-forget AI cost-log persistence (spec.md §4.3, §9).
//!
//! Every AI call — remote or fallback — produces a cost-log entry. Writing
//! it must never slow down or fail the caller's response, so entries are
//! pushed onto a bounded channel drained by a background task. Under
//! sustained overload the queue fills; the drain task is itself bottled on
//! the oldest entry it's holding, so the *incoming* entry is what gets
//! dropped — the request never blocks waiting for space, and no task is
//! spawned per overload event. A running drop count is tracked and warned
//! on periodically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::NewAiCostLog;
use crate::repository::AiCostRepository;

const QUEUE_CAPACITY: usize = 256;
/// Re-warn every this many drops so a sustained overload doesn't spam logs.
const WARN_EVERY: u64 = 100;

pub struct CostLogger {
    sender: mpsc::Sender<NewAiCostLog>,
    dropped: Arc<AtomicU64>,
}

impl CostLogger {
    /// Spawns the background drain task and returns a handle for enqueuing.
    pub fn spawn(repo: Arc<dyn AiCostRepository>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<NewAiCostLog>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Err(e) = repo.append(entry).await {
                    tracing::warn!(error = %e, "failed to persist ai cost log entry");
                }
            }
        });

        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueues `entry`. Never blocks the caller: on a full queue, the
    /// incoming entry is dropped and a counter of total drops is bumped.
    pub fn log(&self, entry: NewAiCostLog) {
        match self.sender.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total % WARN_EVERY == 1 {
                    tracing::warn!(total_dropped = total, "ai cost log queue full, dropping entry");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("ai cost log queue closed, dropping entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AiCostLog, AiOperation, Money};
    use crate::error::AppResult;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRepo {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AiCostRepository for CountingRepo {
        async fn append(&self, _entry: NewAiCostLog) -> AppResult<AiCostLog> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(AiCostLog {
                id: 1,
                user_id: "u1".to_string(),
                operation: AiOperation::ParseExpense,
                provider: "gemini".to_string(),
                model: "gemini-1.5-flash".to_string(),
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                cost: Money::ZERO,
                currency: "USD".to_string(),
                created_at: Utc::now(),
            })
        }

        async fn get_by_user_id(&self, _user_id: &str) -> AppResult<Vec<AiCostLog>> {
            Ok(vec![])
        }

        async fn get_summary_by_day(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> AppResult<Vec<crate::repository::AiCostByDay>> {
            Ok(vec![])
        }

        async fn get_summary_by_operation(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> AppResult<Vec<crate::repository::AiCostByOperation>> {
            Ok(vec![])
        }

        async fn get_summary_by_user(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> AppResult<Vec<crate::repository::AiCostByUser>> {
            Ok(vec![])
        }
    }

    fn sample_entry() -> NewAiCostLog {
        NewAiCostLog {
            user_id: "u1".to_string(),
            operation: AiOperation::ParseExpense,
            provider: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            cost: Money::ZERO,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn logged_entry_eventually_reaches_the_repo() {
        let count = Arc::new(AtomicUsize::new(0));
        let repo = Arc::new(CountingRepo { count: count.clone() });
        let logger = CostLogger::spawn(repo);
        logger.log(sample_entry());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    struct BlockingRepo {
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl AiCostRepository for BlockingRepo {
        async fn append(&self, _entry: NewAiCostLog) -> AppResult<AiCostLog> {
            self.gate.notified().await;
            Ok(AiCostLog {
                id: 1,
                user_id: "u1".to_string(),
                operation: AiOperation::ParseExpense,
                provider: "gemini".to_string(),
                model: "gemini-1.5-flash".to_string(),
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                cost: Money::ZERO,
                currency: "USD".to_string(),
                created_at: Utc::now(),
            })
        }

        async fn get_by_user_id(&self, _user_id: &str) -> AppResult<Vec<AiCostLog>> {
            Ok(vec![])
        }

        async fn get_summary_by_day(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> AppResult<Vec<crate::repository::AiCostByDay>> {
            Ok(vec![])
        }

        async fn get_summary_by_operation(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> AppResult<Vec<crate::repository::AiCostByOperation>> {
            Ok(vec![])
        }

        async fn get_summary_by_user(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> AppResult<Vec<crate::repository::AiCostByUser>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn full_queue_drops_incoming_entry_without_blocking_or_spawning() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let repo = Arc::new(BlockingRepo { gate: gate.clone() });
        let logger = CostLogger::spawn(repo);

        // One entry is picked up by the drain task and blocks on `gate`,
        // leaving QUEUE_CAPACITY slots for the rest to fill the channel.
        for _ in 0..=QUEUE_CAPACITY {
            logger.log(sample_entry());
        }
        tokio::task::yield_now().await;

        // The overflow entry must be dropped immediately, not awaited in a
        // spawned task — `log` returning at all without deadlocking on the
        // still-blocked drain task demonstrates that.
        logger.log(sample_entry());
        assert!(logger.dropped.load(Ordering::Relaxed) >= 1);

        gate.notify_waiters();
    }
}
