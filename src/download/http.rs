//! Blocking HTTP transfer for signed asset URLs.
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use super::fetcher::RawFetcher;
use crate::source::{FetchDescriptor, ProviderError};

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const USER_AGENT: &str = concat!("satmosaic/", env!("CARGO_PKG_VERSION"));

/// Downloads `FetchDescriptor::url` with a plain GET and streams the body to disk.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, TLS roots, headers).
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl RawFetcher for HttpFetcher {
    fn fetch(&self, descriptor: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError> {
        debug!("GET {}", descriptor.url);
        let mut response = self
            .client
            .get(&descriptor.url)
            .send()
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(status_error(status, retry_after, &descriptor.url));
        }

        let mut file = File::create(dest)?;
        let bytes = response.copy_to(&mut file).map_err(classify_transport)?;
        file.flush()?;
        file.sync_all()?;
        Ok(bytes)
    }
}

fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Http(e.to_string())
    }
}

/// Map a non-success status onto the provider error taxonomy.
pub fn status_error(status: StatusCode, retry_after: Option<Duration>, url: &str) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            ProviderError::RateLimited { retry_after }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout(format!("HTTP {} for {}", status.as_u16(), url))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            ProviderError::NotFound(format!("HTTP {} for {}", status.as_u16(), url))
        }
        _ => ProviderError::Rejected(format!("HTTP {} for {}", status.as_u16(), url)),
    }
}

/// Only the delta-seconds form is honoured; HTTP dates fall back to the configured backoff.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::fetcher::{FetchOutcome, RetryingFetcher};
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Answers one connection per canned response, in order, then exits.
    fn serve(responses: Vec<String>) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/tiles/B04.tif", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                    line.clear();
                }
                stream.write_all(response.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
        });
        (url, handle)
    }

    fn response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    fn local_fetcher() -> HttpFetcher {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        HttpFetcher::from_client(client)
    }

    #[test]
    fn test_status_mapping() {
        let url = "https://example.test/a.tif";
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)), url),
            ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, None, url).is_retryable());
        assert!(status_error(StatusCode::GATEWAY_TIMEOUT, None, url).is_retryable());
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, None, url),
            ProviderError::NotFound(_)
        ));
        let forbidden = status_error(StatusCode::FORBIDDEN, None, url);
        assert!(!forbidden.is_retryable());
        assert!(forbidden.to_string().contains("403"));
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(parse_retry_after(" 120 "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpFetcher::with_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_streamed_body_lands_at_destination() {
        let body = "II*\0".to_string() + &"x".repeat(64 * 1024);
        let (url, server) = serve(vec![
            response("429 Too Many Requests", "Retry-After: 0\r\n", ""),
            response("200 OK", "Content-Type: image/tiff\r\n", &body),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("r00c00").join("B04.tif");
        let descriptor = FetchDescriptor {
            band: Some("B04".into()),
            url,
        };

        let fetcher = RetryingFetcher::new(local_fetcher(), Duration::ZERO);
        let outcome = fetcher.fetch(Some(&descriptor), &dest, 1);
        server.join().unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Success {
                local_path: dest.clone(),
                bytes_written: body.len() as u64,
            }
        );
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), body);
        let names: Vec<_> = std::fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("B04.tif")]);
    }

    #[test]
    fn test_missing_asset_leaves_nothing_behind() {
        let (url, server) = serve(vec![response("404 Not Found", "", "no such key")]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("B04.tif");
        let descriptor = FetchDescriptor { band: None, url };

        let outcome = RetryingFetcher::new(local_fetcher(), Duration::ZERO).fetch(Some(&descriptor), &dest, 3);
        server.join().unwrap();

        assert_eq!(outcome, FetchOutcome::NotFound);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
