//! Concurrent processing utilities for batch execution.
//!
//! This module provides the concurrency limiter and dispatch loop: units of
//! work are spawned onto the tokio runtime, at most `max_concurrency` at a
//! time, each inside a guarded boundary that turns a panic into an
//! [`EscalatedFailure`].

use crate::error::EscalatedFailure;
use crate::utils::{is_skipped, panic_payload_to_string};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

/// How one unit of work ended.
#[derive(Debug)]
pub(crate) enum Completion<R> {
    /// The unit ran to completion; `value` is whatever its body returned
    Finished { index: usize, value: R },

    /// The unit terminated abnormally
    Escalated(EscalatedFailure),
}

/// What a spawned unit hands back to the dispatcher.
type Settled<R> = (usize, Result<R, EscalatedFailure>);

/// Counters the dispatch loop reports back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchSummary {
    pub dispatched: usize,
    pub escalated: bool,
}

/// Manages concurrent unit execution under a fixed in-flight budget.
pub struct ConcurrentProcessor {
    max_concurrency: usize,
    stop_on_escalation: bool,
}

impl ConcurrentProcessor {
    /// Create a new concurrent processor.
    ///
    /// A bound of zero is raised to one.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            stop_on_escalation: false,
        }
    }

    /// Stop spawning new units after the first escalation.
    pub fn with_stop_on_escalation(mut self, enabled: bool) -> Self {
        self.stop_on_escalation = enabled;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `unit` over every non-skipped item.
    ///
    /// `on_complete` sees each completion exactly once, on the calling task,
    /// so it may mutate state without synchronization. Returns after every
    /// spawned unit has finished.
    pub(crate) async fn process<I, R, F, Fut, C>(
        &self,
        items: &[I],
        skip_mask: &[bool],
        unit: F,
        mut on_complete: C,
    ) -> DispatchSummary
    where
        I: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        C: FnMut(Completion<R>),
    {
        let unit = Arc::new(unit);
        let mut units: JoinSet<Settled<R>> = JoinSet::new();
        let mut summary = DispatchSummary::default();

        'dispatch: for (index, item) in items.iter().enumerate() {
            if is_skipped(skip_mask, index) {
                continue;
            }

            // A unit occupies its slot until the dispatcher has settled it,
            // so the join set length is the number of units in flight.
            while units.len() >= self.max_concurrency {
                let Some(joined) = units.join_next().await else {
                    break;
                };
                self.settle(joined, &mut summary, &mut on_complete);
            }

            if self.stop_on_escalation && summary.escalated {
                tracing::debug!(index, "escalation observed, halting dispatch");
                break 'dispatch;
            }

            self.spawn_unit(&mut units, Arc::clone(&unit), index, item.clone());
            summary.dispatched += 1;
        }

        while let Some(joined) = units.join_next().await {
            self.settle(joined, &mut summary, &mut on_complete);
        }

        summary
    }

    fn spawn_unit<I, R, F, Fut>(
        &self,
        units: &mut JoinSet<Settled<R>>,
        unit: Arc<F>,
        index: usize,
        item: I,
    ) where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        #[cfg(feature = "trace-units")]
        tracing::trace!(index, "dispatching unit");

        units.spawn(async move {
            let body = async move { (*unit)(item).await };
            let result = AssertUnwindSafe(body).catch_unwind().await.map_err(|payload| {
                EscalatedFailure::panicked(index, panic_payload_to_string(&*payload))
            });
            (index, result)
        });
    }

    fn settle<R, C>(
        &self,
        joined: Result<Settled<R>, JoinError>,
        summary: &mut DispatchSummary,
        on_complete: &mut C,
    ) where
        C: FnMut(Completion<R>),
    {
        let completion = match joined {
            Ok((index, Ok(value))) => {
                #[cfg(feature = "trace-units")]
                tracing::trace!(index, "unit finished");
                Completion::Finished { index, value }
            }
            Ok((_, Err(failure))) => Completion::Escalated(failure),
            Err(err) => Completion::Escalated(EscalatedFailure::task_lost(None, err.to_string())),
        };

        if matches!(completion, Completion::Escalated(_)) {
            summary.escalated = true;
        }
        on_complete(completion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EscalationKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_bound_is_raised() {
        let processor = ConcurrentProcessor::new(0);
        assert_eq!(processor.max_concurrency(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_bound() {
        let processor = ConcurrentProcessor::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..24).collect();

        let unit = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            move |item: usize| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    item
                }
            }
        };

        let mut finished = Vec::new();
        let summary = processor
            .process(&items, &[], unit, |completion| {
                if let Completion::Finished { index, value } = completion {
                    finished.push((index, value));
                }
            })
            .await;

        assert_eq!(summary.dispatched, 24);
        assert!(!summary.escalated);
        assert_eq!(finished.len(), 24);
        assert!(finished.iter().all(|(index, value)| index == value));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_units_reach_the_bound_together() {
        // Four units that can only finish once all four are running at once.
        let processor = ConcurrentProcessor::new(4);
        let barrier = Arc::new(tokio::sync::Barrier::new(4));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..4).collect();

        let unit = {
            let barrier = Arc::clone(&barrier);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            move |item: usize| {
                let barrier = Arc::clone(&barrier);
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    barrier.wait().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    item
                }
            }
        };

        let mut finished = Vec::new();
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            processor.process(&items, &[], unit, |completion| {
                if let Completion::Finished { index, value } = completion {
                    finished.push((index, value));
                }
            }),
        )
        .await
        .expect("units never ran four at a time");

        assert_eq!(summary.dispatched, 4);
        assert!(!summary.escalated);
        finished.sort();
        assert_eq!(finished, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_skipped_items_are_not_dispatched() {
        let processor = ConcurrentProcessor::new(2);
        let items = vec!["a", "b", "c"];
        let mut seen = Vec::new();

        let summary = processor
            .process(
                &items,
                &[true, false, true],
                |item: &'static str| async move { item },
                |completion| {
                    if let Completion::Finished { index, value } = completion {
                        seen.push((index, value));
                    }
                },
            )
            .await;

        assert_eq!(summary.dispatched, 1);
        assert_eq!(seen, vec![(1, "b")]);
    }

    #[tokio::test]
    async fn test_panic_becomes_escalation() {
        let processor = ConcurrentProcessor::new(2);
        let items: Vec<u32> = vec![1, 2, 3];
        let mut escalations = Vec::new();
        let mut finished = 0;

        let summary = processor
            .process(
                &items,
                &[],
                |item: u32| async move {
                    if item == 2 {
                        panic!("unit exploded");
                    }
                    item
                },
                |completion| match completion {
                    Completion::Finished { .. } => finished += 1,
                    Completion::Escalated(failure) => escalations.push(failure),
                },
            )
            .await;

        assert!(summary.escalated);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(finished, 2);
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].index, Some(1));
        assert_eq!(escalations[0].kind, EscalationKind::Panicked);
        assert_eq!(escalations[0].message, "unit exploded");
    }

    #[tokio::test]
    async fn test_stop_on_escalation_halts_dispatch() {
        let processor = ConcurrentProcessor::new(1).with_stop_on_escalation(true);
        let items: Vec<u32> = (0..10).collect();

        let summary = processor
            .process(
                &items,
                &[],
                |item: u32| async move {
                    if item == 0 {
                        panic!("first unit fails");
                    }
                    item
                },
                |_| {},
            )
            .await;

        assert!(summary.escalated);
        assert_eq!(summary.dispatched, 1);
    }
}
