//! Bounded chunk pool shared by the upload and download coordinators.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use super::{ChunkOutcome, ChunkResult};
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::plan::ChunkDescriptor;
use crate::progress::ProgressCounter;

/// What a worker reports for a successful chunk.
#[derive(Debug)]
pub struct Transferred {
    pub bytes: u64,
    pub tag: Option<String>,
}

/// Per-chunk view of the file's progress counter.
///
/// Bytes re-sent by a retried attempt are not credited twice: the file
/// counter only advances once an attempt passes the furthest point any
/// earlier attempt of the same chunk reached.
pub struct ChunkProgress {
    counter: Arc<ProgressCounter>,
    credited: AtomicU64,
    attempt: AtomicU64,
}

impl ChunkProgress {
    fn new(counter: Arc<ProgressCounter>) -> Self {
        Self {
            counter,
            credited: AtomicU64::new(0),
            attempt: AtomicU64::new(0),
        }
    }

    fn begin_attempt(&self) {
        self.attempt.store(0, Ordering::Relaxed);
    }

    /// Records `bytes` moved by the current attempt.
    pub fn advance(&self, bytes: u64) {
        let reached = self.attempt.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let previous = self.credited.fetch_max(reached, Ordering::Relaxed);
        if reached > previous {
            self.counter.add(reached - previous);
        }
    }
}

/// Runs `worker` for every descriptor with at most `concurrency` in flight.
///
/// A failed chunk is retried by the pool according to `retry` when its error
/// is retryable. Once any chunk has failed for good, descriptors that have
/// not started yet are reported as [`ChunkOutcome::Skipped`]; chunks already
/// in flight run to completion. Results come back in completion order.
pub async fn run_chunks<W, Fut>(
    descriptors: &[ChunkDescriptor],
    concurrency: usize,
    retry: &RetryPolicy,
    counter: &Arc<ProgressCounter>,
    worker: W,
) -> Vec<ChunkResult>
where
    W: Fn(ChunkDescriptor, Arc<ChunkProgress>) -> Fut,
    Fut: Future<Output = Result<Transferred>>,
{
    let failed = CancellationToken::new();
    let worker = &worker;

    stream::iter(descriptors.iter().copied())
        .map(|descriptor| {
            let failed = failed.clone();
            let progress = Arc::new(ChunkProgress::new(Arc::clone(counter)));
            async move {
                if failed.is_cancelled() {
                    return ChunkResult {
                        index: descriptor.index,
                        outcome: ChunkOutcome::Skipped,
                        bytes: 0,
                        tag: None,
                    };
                }

                let mut attempt = 0;
                loop {
                    progress.begin_attempt();
                    match worker(descriptor, Arc::clone(&progress)).await {
                        Ok(done) => {
                            return ChunkResult {
                                index: descriptor.index,
                                outcome: ChunkOutcome::Success,
                                bytes: done.bytes,
                                tag: done.tag,
                            };
                        }
                        Err(e)
                            if attempt < retry.max_retries
                                && e.is_retryable()
                                && !failed.is_cancelled() =>
                        {
                            attempt += 1;
                            let delay = retry.delay_for(attempt);
                            log::warn!(
                                "Chunk {} failed ({e}), retry {attempt}/{} in {delay:?}",
                                descriptor.index,
                                retry.max_retries
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => {
                            failed.cancel();
                            return ChunkResult {
                                index: descriptor.index,
                                outcome: ChunkOutcome::Failure(e),
                                bytes: 0,
                                tag: None,
                            };
                        }
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Reduces chunk results to a file-level verdict.
///
/// Any non-successful chunk fails the whole file. On success the results are
/// returned sorted by index, and the indices are checked to be gap-free.
pub fn aggregate(mut results: Vec<ChunkResult>, planned: usize) -> Result<Vec<ChunkResult>> {
    let total = planned.max(results.len());
    let mut failed = 0;
    for result in &results {
        match &result.outcome {
            ChunkOutcome::Success => {}
            ChunkOutcome::Failure(e) => {
                failed += 1;
                log::error!("Chunk {} failed: {e}", result.index);
            }
            ChunkOutcome::Skipped => failed += 1,
        }
    }
    if failed > 0 || results.len() != planned {
        return Err(Error::PartialTransfer {
            failed: failed.max(total - results.len()),
            total,
        });
    }

    results.sort_by_key(|r| r.index);
    let contiguous = results
        .windows(2)
        .all(|pair| pair[1].index == pair[0].index + 1);
    if !contiguous {
        return Err(Error::PartialTransfer { failed: 0, total });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{plan_parts, plan_ranges};
    use crate::progress::NoProgress;
    use std::sync::atomic::AtomicUsize;

    fn counter(size: u64) -> Arc<ProgressCounter> {
        Arc::new(ProgressCounter::new("t", size, Arc::new(NoProgress)))
    }

    fn quick_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn all_chunks_succeed_and_sort() {
        let descriptors = plan_parts(10, 3);
        let counter = counter(10);
        let results = run_chunks(&descriptors, 2, &quick_retry(0), &counter, |d, p| async move {
            p.advance(d.length);
            Ok(Transferred {
                bytes: d.length,
                tag: Some(format!("tag{}", d.index)),
            })
        })
        .await;

        let sorted = aggregate(results, descriptors.len()).unwrap();
        let indices: Vec<_> = sorted.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(counter.total(), 10);
    }

    #[tokio::test]
    async fn one_failure_fails_the_file() {
        let descriptors = plan_ranges(8, 8);
        let results = run_chunks(&descriptors, 8, &quick_retry(0), &counter(8), |d, _| async move {
            if d.index == 5 {
                Err(Error::remote(400, "bad part"))
            } else {
                Ok(Transferred { bytes: 1, tag: None })
            }
        })
        .await;

        let failures = results
            .iter()
            .filter(|r| matches!(r.outcome, ChunkOutcome::Failure(_)))
            .count();
        assert_eq!(failures, 1);
        assert!(matches!(
            aggregate(results, descriptors.len()),
            Err(Error::PartialTransfer { failed, total: 8 }) if failed >= 1
        ));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried() {
        let descriptors = plan_ranges(4, 1);
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let counter = counter(4);
        let results = run_chunks(&descriptors, 1, &quick_retry(2), &counter, |d, p| async move {
            p.advance(2);
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::remote(503, "busy"))
            } else {
                p.advance(d.length - 2);
                Ok(Transferred {
                    bytes: d.length,
                    tag: None,
                })
            }
        })
        .await;

        assert!(aggregate(results, 1).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(counter.total(), 4);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let descriptors = plan_ranges(4, 1);
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let results = run_chunks(&descriptors, 1, &quick_retry(5), &counter(4), |d, _| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Transferred, _>(Error::RangeUnsupported {
                start: d.offset,
                end: d.end(),
                reason: "status 200".into(),
            })
        })
        .await;

        assert!(aggregate(results, 1).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chunks_after_a_failure_are_not_started() {
        let descriptors = plan_ranges(4, 4);
        let started = AtomicUsize::new(0);
        let started = &started;
        let results = run_chunks(&descriptors, 1, &quick_retry(0), &counter(4), |_, _| async move {
            started.fetch_add(1, Ordering::SeqCst);
            Err::<Transferred, _>(Error::remote(400, "no"))
        })
        .await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        let skipped = results
            .iter()
            .filter(|r| matches!(r.outcome, ChunkOutcome::Skipped))
            .count();
        assert_eq!(skipped, 3);
        assert!(matches!(
            aggregate(results, 4),
            Err(Error::PartialTransfer { failed: 4, total: 4 })
        ));
    }

    #[test]
    fn aggregate_rejects_gaps() {
        let results = vec![
            ChunkResult {
                index: 1,
                outcome: ChunkOutcome::Success,
                bytes: 1,
                tag: None,
            },
            ChunkResult {
                index: 3,
                outcome: ChunkOutcome::Success,
                bytes: 1,
                tag: None,
            },
        ];
        assert!(aggregate(results, 2).is_err());
    }
}
