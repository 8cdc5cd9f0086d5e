//! Bounded worker pool running many [`RetryingFetcher::fetch`] calls.
//!
//! Jobs travel to a fixed set of scoped worker threads over a bounded
//! channel; results come back over a second channel to the calling thread,
//! which is the only writer of the result table.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use super::fetcher::{FetchOutcome, RawFetcher, RetryingFetcher};
use crate::source::FetchDescriptor;

/// Cooperative cancellation shared between the caller and the workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A job's outcome and the wall time its worker spent on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOutcome {
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
}

/// One unit of download work. `descriptor` is `None` when no scene was found.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub descriptor: Option<FetchDescriptor>,
    pub destination: PathBuf,
}

pub struct ConcurrentDownloadCoordinator<F> {
    fetcher: RetryingFetcher<F>,
    concurrency: usize,
    max_retries: u32,
    deadline: Option<Duration>,
    cancel: CancelToken,
}

impl<F: RawFetcher> ConcurrentDownloadCoordinator<F> {
    /// `concurrency` is clamped to at least one worker.
    pub fn new(fetcher: RetryingFetcher<F>, concurrency: usize, max_retries: u32) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            max_retries,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    /// Stop starting new fetches once `deadline` has elapsed since `run_all` began.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn fetcher(&self) -> &RetryingFetcher<F> {
        &self.fetcher
    }

    /// Run every job and return one outcome per key. A failing, panicking or
    /// cancelled job never affects the others.
    pub fn run_all<K>(&self, jobs: Vec<(K, FetchJob)>) -> BTreeMap<K, FetchOutcome>
    where
        K: Ord + Clone + Display + Send + Sync,
    {
        self.run_all_timed(jobs)
            .into_iter()
            .map(|(key, timed)| (key, timed.outcome))
            .collect()
    }

    /// [`run_all`](Self::run_all), keeping each job's elapsed time. Jobs that
    /// never started report zero.
    pub fn run_all_timed<K>(&self, jobs: Vec<(K, FetchJob)>) -> BTreeMap<K, TimedOutcome>
    where
        K: Ord + Clone + Display + Send + Sync,
    {
        let started = Instant::now();
        let stop_at = self.deadline.map(|d| started + d);
        let total = jobs.len();
        let (keys, work): (Vec<K>, Vec<FetchJob>) = jobs.into_iter().unzip();
        let mut slots: Vec<Option<TimedOutcome>> = vec![None; total];

        info!(
            "Starting {} downloads with {} workers",
            total,
            self.concurrency.min(total.max(1))
        );

        let should_stop = || {
            self.cancel.is_cancelled() || stop_at.is_some_and(|t| Instant::now() >= t)
        };

        thread::scope(|scope| {
            let (job_tx, job_rx) = bounded::<(usize, &FetchJob)>(self.concurrency);
            let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, TimedOutcome)>();

            for _ in 0..self.concurrency.min(total) {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let keys = &keys;
                let should_stop = &should_stop;
                scope.spawn(move || {
                    for (slot, job) in job_rx.iter() {
                        let key = &keys[slot];
                        if should_stop() {
                            debug!("Skipping {}: cancelled before start", key);
                            let skipped = TimedOutcome {
                                outcome: FetchOutcome::Cancelled,
                                elapsed: Duration::ZERO,
                            };
                            let _ = result_tx.send((slot, skipped));
                            continue;
                        }
                        let job_started = Instant::now();
                        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                            self.fetcher.fetch_until(
                                job.descriptor.as_ref(),
                                &job.destination,
                                self.max_retries,
                                should_stop,
                            )
                        }));
                        let outcome = match attempt {
                            Ok(_) if should_stop() => {
                                debug!("Discarding result of {}: cancelled in flight", key);
                                FetchOutcome::Cancelled
                            }
                            Ok(outcome) => outcome,
                            Err(payload) => {
                                let reason = panic_message(payload.as_ref());
                                warn!("Fetch for {} panicked: {}", key, reason);
                                FetchOutcome::InternalError { reason }
                            }
                        };
                        let timed = TimedOutcome {
                            outcome,
                            elapsed: job_started.elapsed(),
                        };
                        let _ = result_tx.send((slot, timed));
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for (slot, job) in work.iter().enumerate() {
                if should_stop() {
                    info!(
                        "Download phase stopped; {} jobs not scheduled",
                        total - slot
                    );
                    break;
                }
                if job_tx.send((slot, job)).is_err() {
                    break;
                }
            }
            drop(job_tx);

            for (slot, timed) in result_rx.iter() {
                info!(
                    "Job {}: {} ({:.1}s)",
                    keys[slot],
                    timed.outcome,
                    timed.elapsed.as_secs_f64()
                );
                slots[slot] = Some(timed);
            }
        });

        let outcomes: BTreeMap<K, TimedOutcome> = keys
            .into_iter()
            .zip(slots)
            .map(|(key, slot)| {
                let timed = slot.unwrap_or(TimedOutcome {
                    outcome: FetchOutcome::Cancelled,
                    elapsed: Duration::ZERO,
                });
                (key, timed)
            })
            .collect();

        let succeeded = outcomes.values().filter(|t| t.outcome.is_success()).count();
        info!(
            "Downloads finished in {:.1}s: {}/{} succeeded",
            started.elapsed().as_secs_f64(),
            succeeded,
            total
        );
        outcomes
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "fetch panicked".to_string()
    }
}
