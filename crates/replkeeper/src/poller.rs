//! Readiness poller
//!
//! Blocks until a replica set satisfies the stable predicate, probing on a fixed interval and
//! racing every tick against the operation context.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::types::ClusterStatus;

/// Interval between two readiness probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const OPERATION: &str = "ready";

/// Fixed-interval readiness loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoller {
    interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReadinessPoller {
    /// A poller probing every `interval`. Zero keeps the default.
    pub fn new(interval: Duration) -> Self {
        if interval.is_zero() {
            Self::default()
        } else {
            Self { interval }
        }
    }

    /// Time between probes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe until the status returned by `probe` is stable for `name`.
    ///
    /// The first probe runs immediately. Degraded observations, transient failures and
    /// "not yet initiated" replies are recorded and polling continues; any other unrecoverable
    /// failure ends the wait. When `ctx` stops, the error carries the last observation.
    pub async fn wait<F, Fut>(
        &self,
        ctx: &OperationContext,
        name: &str,
        mut probe: F,
    ) -> EngineResult<ClusterStatus>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<ClusterStatus>>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_observation: Option<String> = None;
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                biased;
                interrupt = ctx.done() => {
                    return Err(ctx.interrupted(interrupt, OPERATION, last_observation.take()));
                }
                _ = ticker.tick() => {}
            }
            tick += 1;

            let observed = tokio::select! {
                biased;
                interrupt = ctx.done() => {
                    return Err(ctx.interrupted(interrupt, OPERATION, last_observation.take()));
                }
                observed = probe() => observed,
            };

            match observed {
                Ok(status) => match status.stability(name) {
                    Ok(()) => {
                        info!(replica_set = name, tick, "Replica set is stable");
                        return Ok(status);
                    }
                    Err(detail) => {
                        debug!(replica_set = name, tick, status = %status.summary(), "Not stable yet: {detail}");
                        last_observation = Some(detail);
                    }
                },
                Err(EngineError::NotYetInitiated) => {
                    debug!(replica_set = name, tick, "Replica set not initiated yet");
                    last_observation = Some(EngineError::NotYetInitiated.to_string());
                }
                Err(err) if err.is_retryable() => {
                    warn!(replica_set = name, tick, error = %err, "Readiness probe failed, polling on");
                    last_observation = Some(err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemberRole, MemberStatus};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(roles: &[MemberRole]) -> ClusterStatus {
        ClusterStatus {
            ok: true,
            set: "rs0".into(),
            members: roles
                .iter()
                .enumerate()
                .map(|(i, role)| MemberStatus::new(format!("db{i}:27017"), role.clone(), true))
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_stable_observation() {
        let mut script = VecDeque::from([
            Err(EngineError::connection("refused")),
            Ok(status(&[MemberRole::Secondary, MemberRole::Secondary])),
            Ok(status(&[MemberRole::Primary, MemberRole::Secondary])),
        ]);
        let poller = ReadinessPoller::new(Duration::from_secs(5));
        let ctx = OperationContext::with_timeout(Duration::from_secs(60));
        let started = tokio::time::Instant::now();

        let result = poller
            .wait(&ctx, "rs0", || {
                let next = script.pop_front();
                async move { next.unwrap_or_else(|| Err(EngineError::protocol("script exhausted"))) }
            })
            .await
            .unwrap();

        assert_eq!(result.primary_count(), 1);
        // third probe, two intervals after the immediate first one
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_last_observation() {
        let poller = ReadinessPoller::new(Duration::from_secs(5));
        let ctx = OperationContext::with_timeout(Duration::from_secs(12));

        let err = poller
            .wait(&ctx, "rs0", || async {
                Ok(status(&[MemberRole::Primary, MemberRole::Primary]))
            })
            .await
            .unwrap_err();

        match err {
            EngineError::Timeout {
                operation,
                last_observation,
                ..
            } => {
                assert_eq!(operation, "ready");
                assert_eq!(last_observation.as_deref(), Some("2 primaries"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_observed_within_one_interval() {
        let poller = ReadinessPoller::new(Duration::from_secs(5));
        let ctx = OperationContext::with_timeout(Duration::from_secs(900));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = poller
            .wait(&ctx, "rs0", || async { Ok(status(&[MemberRole::Secondary])) })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(7) + poller.interval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_probe_failure_aborts() {
        let probes = Arc::new(AtomicU32::new(0));
        let poller = ReadinessPoller::default();
        let ctx = OperationContext::with_timeout(Duration::from_secs(60));

        let counter = probes.clone();
        let err = poller
            .wait(&ctx, "rs0", || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(EngineError::NotYetInitiated)
                    } else {
                        Err(EngineError::ReplicationDisabled)
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ReplicationDisabled));
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }
}
