//! Main batch executor implementation.
//!
//! `BatchExecutor` composes the dispatcher and limiter from
//! [`crate::concurrent`] with an aggregator that assembles index-aligned
//! results and applies the escalation policy.

use crate::concurrent::{Completion, ConcurrentProcessor};
use crate::context::BatchContext;
use crate::error::{EscalatedFailure, ItemFailure};
use crate::types::{BatchOutcome, BatchStats, ExecutorConfig, Transformed};
use crate::utils::{count_skipped, is_skipped};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Runs a fallible transformation over a batch with bounded concurrency.
///
/// Per-item failures are isolated and recorded at their index. A unit that
/// panics escalates the whole batch: results are discarded and every
/// non-skipped index reports the same [`EscalatedFailure`].
///
/// # Example
///
/// ```rust
/// use batch_exec_lib::{BatchContext, BatchExecutor, ExecutorConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let executor = BatchExecutor::with_config(ExecutorConfig::default().with_concurrency(4));
/// let items = vec![1u32, 2, 3, 4];
/// let skip = vec![false, true, false, false];
///
/// let outcome = executor
///     .run(&BatchContext::new(), &items, &skip, |_ctx, n: u32| async move {
///         if n == 4 {
///             Err(format!("cannot handle {}", n))
///         } else {
///             Ok(n * 10)
///         }
///     })
///     .await;
///
/// let results = outcome.results.unwrap();
/// assert_eq!(results, vec![Some(10), None, Some(30), None]);
/// assert_eq!(outcome.errors.len(), 1);
/// assert!(outcome.errors.contains_key(&3));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: ExecutorConfig,
}

impl BatchExecutor {
    /// Create an executor bounded at twice the available cores.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ExecutorConfig) {
        self.config = config;
    }

    /// Run `transform` over every item whose `skip_mask` entry is `false`.
    ///
    /// The returned outcome is index-aligned with `items`. Completes only
    /// once every dispatched unit has finished.
    pub async fn run<I, T, E, F, Fut>(
        &self,
        ctx: &BatchContext,
        items: &[I],
        skip_mask: &[bool],
        transform: F,
    ) -> BatchOutcome<T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(BatchContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run_with_config(ctx, items, skip_mask, Arc::new(()), move |ctx, item, _| {
            let pending = transform(ctx, item);
            async move { pending.await.map(Transformed::new) }
        })
        .await
    }

    /// Run a transformation that also receives per-class configuration and
    /// may return auxiliary metadata alongside its output.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared cancellation context cloned into every unit
    /// * `items` - Input batch
    /// * `skip_mask` - `true` excludes the item at that index
    /// * `class_config` - Configuration handed to every unit
    /// * `transform` - The per-item operation
    pub async fn run_with_config<I, C, T, A, E, F, Fut>(
        &self,
        ctx: &BatchContext,
        items: &[I],
        skip_mask: &[bool],
        class_config: Arc<C>,
        transform: F,
    ) -> BatchOutcome<T, E, A>
    where
        I: Clone + Send + 'static,
        C: Send + Sync + 'static,
        T: Send + 'static,
        A: Send + 'static,
        E: Send + 'static,
        F: Fn(BatchContext, I, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Transformed<T, A>, E>> + Send + 'static,
    {
        let started = Instant::now();
        let concurrency = self.config.effective_concurrency();

        if skip_mask.len() != items.len() {
            tracing::warn!(
                items = items.len(),
                skip_mask = skip_mask.len(),
                "skip mask length differs from item count; missing entries are processed"
            );
        }

        let skipped = count_skipped(skip_mask, items.len());
        tracing::debug!(
            items = items.len(),
            skipped,
            concurrency,
            "starting batch"
        );

        let processor = ConcurrentProcessor::new(concurrency)
            .with_stop_on_escalation(self.config.stop_on_escalation);

        let ctx = ctx.clone();
        let unit = move |item: I| transform(ctx.clone(), item, Arc::clone(&class_config));

        let mut aggregator = Aggregator::new(items.len());
        let summary = processor
            .process(items, skip_mask, unit, |completion| aggregator.record(completion))
            .await;

        let stats = BatchStats {
            total: items.len(),
            skipped,
            dispatched: summary.dispatched,
            ..BatchStats::default()
        };
        let outcome = aggregator.finish(skip_mask, stats, started);

        tracing::debug!(
            dispatched = outcome.stats.dispatched,
            succeeded = outcome.stats.succeeded,
            failed = outcome.stats.failed,
            escalated = outcome.is_escalated(),
            elapsed_ms = outcome.stats.elapsed.as_millis() as u64,
            "batch finished"
        );

        outcome
    }
}

/// Run a batch with the default executor configuration.
pub async fn run_batch<I, T, E, F, Fut>(
    ctx: &BatchContext,
    items: &[I],
    skip_mask: &[bool],
    transform: F,
) -> BatchOutcome<T, E>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(BatchContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    BatchExecutor::new()
        .run(ctx, items, skip_mask, transform)
        .await
}

/// Collects unit completions into pre-sized, index-addressed slots.
struct Aggregator<T, E, A> {
    results: Vec<Option<T>>,
    metadata: Vec<Option<A>>,
    errors: BTreeMap<usize, ItemFailure<E>>,
    escalation: Option<Arc<EscalatedFailure>>,
    succeeded: usize,
    failed: usize,
}

impl<T, E, A> Aggregator<T, E, A> {
    fn new(len: usize) -> Self {
        Self {
            results: std::iter::repeat_with(|| None).take(len).collect(),
            metadata: std::iter::repeat_with(|| None).take(len).collect(),
            errors: BTreeMap::new(),
            escalation: None,
            succeeded: 0,
            failed: 0,
        }
    }

    fn record(&mut self, completion: Completion<Result<Transformed<T, A>, E>>) {
        match completion {
            Completion::Finished {
                index,
                value: Ok(transformed),
            } => {
                self.results[index] = Some(transformed.output);
                self.metadata[index] = transformed.metadata;
                self.succeeded += 1;
            }
            Completion::Finished {
                index,
                value: Err(err),
            } => {
                self.errors.insert(index, ItemFailure::Item(err));
                self.failed += 1;
            }
            Completion::Escalated(failure) => {
                tracing::warn!(
                    index = ?failure.index,
                    kind = %failure.kind,
                    message = %failure.message,
                    "unit terminated abnormally"
                );
                // First escalation wins; later ones are only logged.
                if self.escalation.is_none() {
                    self.escalation = Some(Arc::new(failure));
                }
            }
        }
    }

    fn finish(
        self,
        skip_mask: &[bool],
        mut stats: BatchStats,
        started: Instant,
    ) -> BatchOutcome<T, E, A> {
        stats.succeeded = self.succeeded;
        stats.failed = self.failed;

        let Some(failure) = self.escalation else {
            stats.elapsed = started.elapsed();
            return BatchOutcome {
                results: Some(self.results),
                metadata: Some(self.metadata),
                errors: self.errors,
                stats,
            };
        };

        stats.superseded = self.errors.len();
        let errors: BTreeMap<usize, ItemFailure<E>> = (0..self.results.len())
            .filter(|index| !is_skipped(skip_mask, *index))
            .map(|index| (index, ItemFailure::Escalated(Arc::clone(&failure))))
            .collect();

        tracing::error!(
            affected = errors.len(),
            superseded = stats.superseded,
            error = %failure,
            "batch escalated; discarding all results"
        );

        stats.elapsed = started.elapsed();
        BatchOutcome {
            results: None,
            metadata: None,
            errors,
            stats,
        }
    }
}
