//! Single-asset download with bounded retries.
//!
//! Bytes are written to a temporary sibling of the destination and renamed
//! into place only after the transfer completed, so a failed fetch never
//! leaves a truncated file at the destination path.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rate_limit::RateLimiter;
use crate::source::{FetchDescriptor, ProviderError};

/// Result of fetching one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success {
        local_path: PathBuf,
        bytes_written: u64,
    },
    /// The catalog had no usable scene, or the asset does not exist.
    NotFound,
    /// Rate limiting or timeouts outlasted the retry budget.
    TransientFailure { reason: String },
    PermanentFailure { reason: String },
    /// The fetch panicked or failed outside the provider error taxonomy.
    InternalError { reason: String },
    /// Not scheduled, or finished after cancellation was observed.
    Cancelled,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            FetchOutcome::Success { local_path, .. } => Some(local_path),
            _ => None,
        }
    }

    /// Short label used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::NotFound => "not_found",
            FetchOutcome::TransientFailure { .. } => "transient_failure",
            FetchOutcome::PermanentFailure { .. } => "permanent_failure",
            FetchOutcome::InternalError { .. } => "internal_error",
            FetchOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchOutcome::Success {
                local_path,
                bytes_written,
            } => write!(f, "success ({} bytes -> {:?})", bytes_written, local_path),
            FetchOutcome::TransientFailure { reason }
            | FetchOutcome::PermanentFailure { reason }
            | FetchOutcome::InternalError { reason } => write!(f, "{}: {}", self.label(), reason),
            _ => write!(f, "{}", self.label()),
        }
    }
}

/// The actual byte transfer (HTTP GET, SDK export, ...). Implementations write
/// the complete asset to `dest` and return the number of bytes written.
pub trait RawFetcher: Send + Sync {
    fn fetch(&self, descriptor: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError>;
}

impl<T: RawFetcher + ?Sized> RawFetcher for Arc<T> {
    fn fetch(&self, descriptor: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError> {
        (**self).fetch(descriptor, dest)
    }
}

impl<T: RawFetcher + ?Sized> RawFetcher for Box<T> {
    fn fetch(&self, descriptor: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError> {
        (**self).fetch(descriptor, dest)
    }
}

/// Longest single retry wait unless [`RetryingFetcher::with_max_backoff`] says otherwise.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Granularity at which a retry wait polls its stop condition.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Wraps a [`RawFetcher`] with the retry policy: rate limits and timeouts are
/// retried after a fixed backoff, everything else fails immediately.
pub struct RetryingFetcher<F> {
    raw: F,
    backoff: Duration,
    max_backoff: Duration,
    limiter: Arc<RateLimiter>,
}

impl<F: RawFetcher> RetryingFetcher<F> {
    pub fn new(raw: F, backoff: Duration) -> Self {
        Self {
            raw,
            backoff,
            max_backoff: DEFAULT_MAX_BACKOFF.max(backoff),
            limiter: Arc::new(RateLimiter::unlimited()),
        }
    }

    /// Upper bound on one retry wait, including provider `Retry-After` hints.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn raw(&self) -> &F {
        &self.raw
    }

    /// Download `descriptor` to `destination`, making at most `max_retries + 1` attempts.
    pub fn fetch(
        &self,
        descriptor: Option<&FetchDescriptor>,
        destination: &Path,
        max_retries: u32,
    ) -> FetchOutcome {
        self.fetch_until(descriptor, destination, max_retries, &|| false)
    }

    /// Like [`fetch`](Self::fetch), but gives up with [`FetchOutcome::Cancelled`]
    /// as soon as `should_stop` holds between attempts or during a retry wait.
    pub fn fetch_until(
        &self,
        descriptor: Option<&FetchDescriptor>,
        destination: &Path,
        max_retries: u32,
        should_stop: &dyn Fn() -> bool,
    ) -> FetchOutcome {
        let Some(descriptor) = descriptor else {
            return FetchOutcome::PermanentFailure {
                reason: "no image handle to fetch".to_string(),
            };
        };

        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = std::fs::create_dir_all(&parent) {
            return FetchOutcome::PermanentFailure {
                reason: format!("cannot create {:?}: {}", parent, e),
            };
        }

        let mut attempt = 0;
        loop {
            if should_stop() {
                debug!("Stopping before attempt {} on {}", attempt + 1, descriptor.url);
                return FetchOutcome::Cancelled;
            }
            attempt += 1;
            self.limiter.acquire();
            debug!(
                "Fetching {} (attempt {}/{})",
                descriptor.url,
                attempt,
                max_retries + 1
            );

            let error = match self.attempt(descriptor, &parent, destination) {
                Ok(outcome) => return outcome,
                Err(e) => e,
            };

            match error {
                ProviderError::NotFound(msg) => {
                    warn!("Asset not found: {} ({})", descriptor.url, msg);
                    return FetchOutcome::NotFound;
                }
                e if e.is_retryable() => {
                    if attempt > max_retries {
                        warn!(
                            "Giving up on {} after {} attempts: {}",
                            descriptor.url, attempt, e
                        );
                        return FetchOutcome::TransientFailure {
                            reason: format!("{} (after {} attempts)", e, attempt),
                        };
                    }
                    let wait = match &e {
                        ProviderError::RateLimited {
                            retry_after: Some(after),
                        } => self.backoff.max(*after),
                        _ => self.backoff,
                    }
                    .min(self.max_backoff);
                    warn!(
                        "{} for {}; retrying in {:?} ({} retries left)",
                        e,
                        descriptor.url,
                        wait,
                        max_retries + 1 - attempt
                    );
                    if !wait_unless(wait, should_stop) {
                        debug!("Retry wait on {} interrupted", descriptor.url);
                        return FetchOutcome::Cancelled;
                    }
                }
                e => {
                    warn!("Fetch of {} failed: {}", descriptor.url, e);
                    return FetchOutcome::PermanentFailure {
                        reason: e.to_string(),
                    };
                }
            }
        }
    }

    /// One transfer into a temp file, persisted on success. The temp file is
    /// removed when it goes out of scope on any error path.
    fn attempt(
        &self,
        descriptor: &FetchDescriptor,
        parent: &Path,
        destination: &Path,
    ) -> Result<FetchOutcome, ProviderError> {
        let stem = destination
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("download");
        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", stem))
            .suffix(".part")
            .tempfile_in(parent)?;

        let bytes_written = self.raw.fetch(descriptor, tmp.path())?;

        tmp.persist(destination).map_err(|e| ProviderError::Io(e.error.to_string()))?;
        info!("Downloaded {} ({} bytes) -> {:?}", descriptor.url, bytes_written, destination);
        Ok(FetchOutcome::Success {
            local_path: destination.to_path_buf(),
            bytes_written,
        })
    }
}

/// Sleeps for `wait` in short slices. Returns false if `should_stop` fired first.
fn wait_unless(wait: Duration, should_stop: &dyn Fn() -> bool) -> bool {
    let until = Instant::now() + wait;
    loop {
        if should_stop() {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        thread::sleep(WAIT_SLICE.min(until - now));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted fetcher: pops one response per call, repeating the last one.
    pub(crate) struct ScriptedFetcher {
        pub calls: AtomicUsize,
        script: Mutex<Vec<Result<Vec<u8>, ProviderError>>>,
    }

    impl ScriptedFetcher {
        pub(crate) fn new(script: Vec<Result<Vec<u8>, ProviderError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            }
        }
    }

    impl RawFetcher for ScriptedFetcher {
        fn fetch(&self, _d: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            };
            let body = next?;
            std::fs::write(dest, &body)?;
            Ok(body.len() as u64)
        }
    }

    /// Writes half a file, then fails.
    struct TruncatingFetcher;

    impl RawFetcher for TruncatingFetcher {
        fn fetch(&self, _d: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError> {
            std::fs::write(dest, b"II*\0partial")?;
            Err(ProviderError::Http("connection reset".into()))
        }
    }

    fn descriptor() -> FetchDescriptor {
        FetchDescriptor {
            band: Some("B04".into()),
            url: "https://example.test/B04.tif".into(),
        }
    }

    fn rate_limited() -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::RateLimited { retry_after: None })
    }

    #[test]
    fn test_missing_handle_is_permanent_and_not_attempted() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(vec![Ok(vec![1])]), Duration::ZERO);
        let outcome = fetcher.fetch(None, &dir.path().join("a.tif"), 3);
        assert!(matches!(outcome, FetchOutcome::PermanentFailure { .. }));
        assert_eq!(fetcher.raw().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retry_exhaustion_makes_budget_plus_one_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tile.tif");
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(vec![rate_limited()]), Duration::ZERO);
        let outcome = fetcher.fetch(Some(&descriptor()), &dest, 2);
        assert!(matches!(outcome, FetchOutcome::TransientFailure { .. }));
        assert_eq!(fetcher.raw().calls.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
    }

    #[test]
    fn test_recovers_after_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("tile.tif");
        let script = vec![rate_limited(), Err(ProviderError::Timeout("slow".into())), Ok(vec![7; 64])];
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(script), Duration::ZERO);
        let outcome = fetcher.fetch(Some(&descriptor()), &dest, 2);
        assert_eq!(
            outcome,
            FetchOutcome::Success {
                local_path: dest.clone(),
                bytes_written: 64
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7; 64]);
        assert_eq!(fetcher.raw().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![Err(ProviderError::Rejected("invalid bbox".into()))];
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(script), Duration::ZERO);
        let outcome = fetcher.fetch(Some(&descriptor()), &dir.path().join("a.tif"), 5);
        match outcome {
            FetchOutcome::PermanentFailure { reason } => assert!(reason.contains("invalid bbox")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(fetcher.raw().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_not_found_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![Err(ProviderError::NotFound("404".into()))];
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(script), Duration::ZERO);
        let outcome = fetcher.fetch(Some(&descriptor()), &dir.path().join("a.tif"), 5);
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[test]
    fn test_failed_fetch_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tile.tif");
        let fetcher = RetryingFetcher::new(TruncatingFetcher, Duration::ZERO);
        let outcome = fetcher.fetch(Some(&descriptor()), &dest, 0);
        assert!(matches!(outcome, FetchOutcome::PermanentFailure { .. }));
        assert!(!dest.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_retry_after_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tile.tif");
        let script = vec![
            Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(86_400)),
            }),
            Ok(vec![1; 8]),
        ];
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(script), Duration::ZERO)
            .with_max_backoff(Duration::from_millis(20));

        let started = Instant::now();
        let outcome = fetcher.fetch(Some(&descriptor()), &dest, 1);
        assert!(outcome.is_success(), "{outcome:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_interrupts_retry_wait() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tile.tif");
        let script = vec![Err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        })];
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(script), Duration::ZERO);

        let stop_at = Instant::now() + Duration::from_millis(100);
        let started = Instant::now();
        let outcome = fetcher.fetch_until(Some(&descriptor()), &dest, 1, &|| Instant::now() >= stop_at);
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2), "waited {:?}", started.elapsed());
        assert_eq!(fetcher.raw().calls.load(Ordering::SeqCst), 1);
        assert!(!dest.exists());
    }

    #[test]
    fn test_stopped_fetch_is_not_attempted() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = RetryingFetcher::new(ScriptedFetcher::new(vec![Ok(vec![1])]), Duration::ZERO);
        let outcome = fetcher.fetch_until(Some(&descriptor()), &dir.path().join("a.tif"), 3, &|| true);
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(fetcher.raw().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(FetchOutcome::TransientFailure {
            reason: "429".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "transient_failure");
        assert_eq!(json["reason"], "429");
    }
}
