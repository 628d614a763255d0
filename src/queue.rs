//! Serial pacing queue for outbound calls.
//!
//! Every rate-limited call passes through one logical lane, FIFO by enqueue
//! order regardless of which caller submitted it. The lane enforces a
//! minimum gap between call starts, applies extra backoff after the
//! provider throttles, and bounds each call with a timeout so a hung
//! request cannot jam the queue. A failed call frees its slot like any
//! other; the error propagates only to that call's own caller.

use crate::config::PacingConfig;
use crate::errors::GovernorError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};

enum JobStatus {
    Completed,
    Throttled,
}

struct QueuedJob {
    job: BoxFuture<'static, JobStatus>,
}

/// Handle to the pacing lane. Cheap to clone; all clones feed the same
/// serial worker.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl RequestQueue {
    /// Spawns the worker task and returns the handle.
    pub fn new(pacing: PacingConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, pacing));
        Self { tx }
    }

    /// Enqueues a call immediately. The returned future resolves with the
    /// call's own result once the lane has reached and run it.
    ///
    /// There is no cancellation: once enqueued the call will run; a caller
    /// that drops the returned future simply ignores a late result.
    pub fn run<T, F>(
        &self,
        call: F,
    ) -> impl Future<Output = Result<T, GovernorError>> + Send + 'static
    where
        T: Send + 'static,
        F: Future<Output = Result<T, GovernorError>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = async move {
            let outcome = call.await;
            let status = match &outcome {
                Err(GovernorError::Throttled { .. }) => JobStatus::Throttled,
                _ => JobStatus::Completed,
            };
            let _ = reply_tx.send(outcome);
            status
        }
        .boxed();
        let enqueued = self.tx.send(QueuedJob { job }).is_ok();

        async move {
            if !enqueued {
                return Err(GovernorError::QueueClosed);
            }
            match reply_rx.await {
                Ok(outcome) => outcome,
                // The worker dropped the job without replying: the call hit
                // the internal timeout.
                Err(_) => Err(GovernorError::Network {
                    message: "call exceeded the queue timeout".to_string(),
                }),
            }
        }
    }
}

async fn worker(mut rx: mpsc::UnboundedReceiver<QueuedJob>, pacing: PacingConfig) {
    let mut next_allowed = Instant::now();
    while let Some(queued) = rx.recv().await {
        sleep_until(next_allowed).await;
        let started = Instant::now();
        next_allowed = started + pacing.min_interval();
        match timeout(pacing.call_timeout(), queued.job).await {
            Ok(JobStatus::Completed) => {}
            Ok(JobStatus::Throttled) => {
                // Provider pushback: move the pacing anchor further out so
                // the next call waits the penalty on top of the interval.
                next_allowed = started + pacing.min_interval() + pacing.throttle_penalty();
                tracing::debug!(
                    penalty_ms = pacing.throttle_penalty_ms,
                    "provider throttled; extending pacing gap"
                );
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = pacing.call_timeout_ms,
                    "paced call timed out; freeing the queue slot"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn pacing(min_interval_ms: u64) -> PacingConfig {
        PacingConfig {
            min_interval_ms,
            throttle_penalty_ms: 5000,
            call_timeout_ms: 15_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_calls_issue_at_interval_boundaries() {
        let queue = RequestQueue::new(pacing(1000));
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        let futures: Vec<_> = (0..3)
            .map(|i| {
                let starts = starts.clone();
                queue.run(async move {
                    starts.lock().unwrap().push(Instant::now());
                    Ok::<usize, GovernorError>(i)
                })
            })
            .collect();
        let results = futures::future::join_all(futures).await;

        // FIFO: results arrive in submission order.
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), i);
        }
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        let offsets: Vec<u64> = starts
            .iter()
            .map(|s| s.duration_since(t0).as_millis() as u64)
            .collect();
        assert!(offsets[0] < 100, "first call should start immediately");
        assert!((1000..1100).contains(&offsets[1]), "got {}", offsets[1]);
        assert!((2000..2100).contains(&offsets[2]), "got {}", offsets[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_applies_penalty_to_next_call() {
        let queue = RequestQueue::new(pacing(1000));
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        let first = queue.run(async {
            Err::<(), _>(GovernorError::Throttled {
                message: "429".to_string(),
            })
        });
        let starts_clone = starts.clone();
        let second = queue.run(async move {
            starts_clone.lock().unwrap().push(Instant::now());
            Ok::<(), GovernorError>(())
        });

        assert!(matches!(
            first.await,
            Err(GovernorError::Throttled { .. })
        ));
        second.await.unwrap();

        let starts = starts.lock().unwrap();
        let offset = starts[0].duration_since(t0).as_millis() as u64;
        // min_interval + penalty = 6000ms.
        assert!((6000..6100).contains(&offset), "got {}", offset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_does_not_jam_the_queue() {
        let queue = RequestQueue::new(pacing(10));
        let first = queue.run(async {
            Err::<(), _>(GovernorError::Network {
                message: "boom".to_string(),
            })
        });
        let second = queue.run(async { Ok::<u32, GovernorError>(7) });

        assert!(matches!(first.await, Err(GovernorError::Network { .. })));
        assert_eq!(second.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_resolves_as_failure_after_timeout() {
        let queue = RequestQueue::new(PacingConfig {
            min_interval_ms: 10,
            throttle_penalty_ms: 100,
            call_timeout_ms: 2000,
        });
        let hung = queue.run(async {
            std::future::pending::<()>().await;
            Ok::<(), GovernorError>(())
        });
        let follow_up = queue.run(async { Ok::<u32, GovernorError>(1) });

        assert!(matches!(hung.await, Err(GovernorError::Network { .. })));
        // The slot freed; the next call still runs.
        assert_eq!(follow_up.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_finite_call_delays_pacing_from_start_not_end() {
        let queue = RequestQueue::new(pacing(1000));
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        let slow = queue.run(async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok::<(), GovernorError>(())
        });
        let starts_clone = starts.clone();
        let second = queue.run(async move {
            starts_clone.lock().unwrap().push(Instant::now());
            Ok::<(), GovernorError>(())
        });

        slow.await.unwrap();
        second.await.unwrap();

        // The interval is measured from the previous call's start, so the
        // 400ms of processing does not push the second call to 1400ms.
        let starts = starts.lock().unwrap();
        let offset = starts[0].duration_since(t0).as_millis() as u64;
        assert!((1000..1100).contains(&offset), "got {}", offset);
    }
}
