//! Asset download: retry policy, request pacing and the concurrent worker pool.
pub mod coordinator;
pub mod fetcher;
pub mod http;
pub mod rate_limit;

pub use coordinator::{CancelToken, ConcurrentDownloadCoordinator, FetchJob, TimedOutcome};
pub use fetcher::{FetchOutcome, RawFetcher, RetryingFetcher};
pub use http::HttpFetcher;
pub use rate_limit::RateLimiter;
