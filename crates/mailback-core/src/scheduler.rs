use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::mail::MailService;
use crate::processor::MailProcessor;

pub const DEFAULT_MIN_DELAY_SECS: u64 = 45;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 120;

/// Startup failures the agent cannot recover from.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Bounds, in whole seconds, of the random pause between cycles. Both ends
/// are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: DEFAULT_MIN_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn sample_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (low, high) = if self.min_delay_secs <= self.max_delay_secs {
            (self.min_delay_secs, self.max_delay_secs)
        } else {
            (self.max_delay_secs, self.min_delay_secs)
        };
        Duration::from_secs(rng.gen_range(low..=high))
    }
}

/// Run cycles back to back, pausing a random delay after each one, until
/// `shutdown` is cancelled. A cycle in progress is allowed to finish; the
/// pause is cut short. Returns the number of cycles run.
pub async fn run_scheduler<M: MailService>(
    processor: &MailProcessor<M>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) -> u64 {
    let mut cycles: u64 = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        cycles += 1;
        let span = info_span!("mail_cycle", cycle = cycles);
        info!(parent: &span, "checking mail");
        match processor.run_cycle(Utc::now()).instrument(span.clone()).await {
            Ok(report) => info!(
                parent: &span,
                replied = report.replied,
                skipped = report.skipped,
                errors = report.errors.len(),
                "cycle finished"
            ),
            Err(err) => error!(parent: &span, error = %err, "cycle aborted"),
        }

        let delay = config.sample_delay(&mut rand::thread_rng());
        info!(delay_secs = delay.as_secs(), "next check scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    info!(cycles, "scheduler stopped");
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::mock::MockMailService;
    use crate::mail::{MailMessage, MessageHeader};
    use crate::processor::ProcessorConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn zero_delay() -> SchedulerConfig {
        SchedulerConfig {
            min_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    async fn wait_for_list_calls(mock: &MockMailService, count: usize) {
        timeout(Duration::from_secs(2), async {
            while mock.list_call_count() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler should keep cycling");
    }

    #[test]
    fn sampled_delays_stay_within_closed_range() {
        let config = SchedulerConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut saw_low = false;
        let mut saw_high = false;
        for _ in 0..5_000 {
            let secs = config.sample_delay(&mut rng).as_secs();
            assert!((45..=120).contains(&secs), "delay {secs} out of range");
            saw_low |= secs == 45;
            saw_high |= secs == 120;
        }
        assert!(saw_low && saw_high, "both bounds should be reachable");
    }

    #[test]
    fn swapped_bounds_are_tolerated() {
        let config = SchedulerConfig {
            min_delay_secs: 10,
            max_delay_secs: 5,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let secs = config.sample_delay(&mut rng).as_secs();
        assert!((5..=10).contains(&secs));
    }

    #[tokio::test]
    async fn runs_cycles_until_cancelled() {
        let mock = MockMailService::new();
        mock.add_candidate(MailMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            snippet: "hello".into(),
            label_ids: vec!["UNREAD".into()],
            headers: vec![
                MessageHeader::new("From", "a@b.com"),
                MessageHeader::new("Message-Id", "<1@mail>"),
            ],
        });
        let processor = Arc::new(MailProcessor::new(
            mock.clone(),
            ProcessorConfig::new("me@example.com", "Label_replied"),
        ));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            async move { run_scheduler(&processor, zero_delay(), shutdown).await }
        });

        wait_for_list_calls(&mock, 3).await;
        shutdown.cancel();
        let cycles = timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler stops after cancel")
            .expect("join");

        assert!(cycles >= 3);
        assert!(mock.sent().len() >= 3);
    }

    #[tokio::test]
    async fn list_failures_do_not_stop_the_loop() {
        let mock = MockMailService::new();
        mock.fail_list("backend unavailable");
        let processor = Arc::new(MailProcessor::new(
            mock.clone(),
            ProcessorConfig::new("me@example.com", "Label_replied"),
        ));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            async move { run_scheduler(&processor, zero_delay(), shutdown).await }
        });

        wait_for_list_calls(&mock, 2).await;
        shutdown.cancel();
        let cycles = handle.await.expect("join");
        assert!(cycles >= 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_delay() {
        let mock = MockMailService::new();
        let processor = MailProcessor::new(
            mock.clone(),
            ProcessorConfig::new("me@example.com", "Label_replied"),
        );
        let shutdown = CancellationToken::new();
        let config = SchedulerConfig {
            min_delay_secs: 3600,
            max_delay_secs: 3600,
        };

        let canceller = {
            let shutdown = shutdown.clone();
            let mock = mock.clone();
            async move {
                wait_for_list_calls(&mock, 1).await;
                shutdown.cancel();
            }
        };

        let (cycles, ()) = timeout(
            Duration::from_secs(2),
            futures::future::join(run_scheduler(&processor, config, shutdown.clone()), canceller),
        )
        .await
        .expect("cancel should cut the hour-long delay short");

        assert_eq!(cycles, 1);
        assert_eq!(mock.list_call_count(), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_runs_nothing() {
        let mock = MockMailService::new();
        let processor = MailProcessor::new(
            mock.clone(),
            ProcessorConfig::new("me@example.com", "Label_replied"),
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let cycles = run_scheduler(&processor, zero_delay(), shutdown).await;

        assert_eq!(cycles, 0);
        assert_eq!(mock.list_call_count(), 0);
    }
}
