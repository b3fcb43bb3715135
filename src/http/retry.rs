//! Retry policy with exponential backoff and HTTP error classification.

use reqwest::StatusCode;
use std::time::Duration;

/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Default delay before the second attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff multiplier.
pub const DEFAULT_FACTOR: u32 = 2;

/// Default upper bound of a single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff policy.
///
/// The delay after the n-th failed attempt is `base_delay * factor^(n-1)`,
/// capped at `max_delay`. Delays are therefore non-decreasing and no more than
/// `max_attempts` attempts are ever made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            factor: DEFAULT_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits; used where retries must be quick (tests, local sources).
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Attempts actually allowed; a zero setting still allows one try.
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// All delays of a run that keeps failing, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|n| self.delay_for(n)).collect()
    }
}

/// Errors that should not be retried.
#[derive(Debug)]
pub enum NonRetryableError {
    /// Rate limit exceeded (HTTP 403 with rate limit message or 429)
    RateLimitExceeded(String),
    /// HTTP 401
    AuthenticationFailed(String),
    /// HTTP 404
    NotFound(String),
    /// HTTP 403 without a rate limit message
    Forbidden(String),
    /// Other 4xx responses
    ClientError(String),
}

impl NonRetryableError {
    pub fn status(&self) -> Option<u16> {
        match self {
            NonRetryableError::AuthenticationFailed(_) => Some(401),
            NonRetryableError::NotFound(_) => Some(404),
            NonRetryableError::Forbidden(_) => Some(403),
            NonRetryableError::RateLimitExceeded(_) | NonRetryableError::ClientError(_) => None,
        }
    }
}

impl std::fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonRetryableError::RateLimitExceeded(msg) => write!(
                f,
                "Rate limit exceeded: {}. Try again later or provide a GitHub token.",
                msg
            ),
            NonRetryableError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}. Check your GitHub token.", msg)
            }
            NonRetryableError::NotFound(msg) => write!(f, "Not found: {}", msg),
            NonRetryableError::Forbidden(msg) => write!(f, "Access forbidden: {}", msg),
            NonRetryableError::ClientError(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Classifies an HTTP status; `Ok(())` means the failure is worth retrying.
pub fn classify_status(status: StatusCode, url: &str) -> Result<(), NonRetryableError> {
    match status {
        StatusCode::UNAUTHORIZED => Err(NonRetryableError::AuthenticationFailed(url.to_string())),
        StatusCode::TOO_MANY_REQUESTS => {
            Err(NonRetryableError::RateLimitExceeded(url.to_string()))
        }
        StatusCode::FORBIDDEN => Err(NonRetryableError::Forbidden(url.to_string())),
        StatusCode::NOT_FOUND => Err(NonRetryableError::NotFound(url.to_string())),
        // A range that no longer fits the remote file is fixed by restarting
        StatusCode::RANGE_NOT_SATISFIABLE => Ok(()),
        s if s.is_client_error() => Err(NonRetryableError::ClientError(format!(
            "HTTP {} from {}",
            s.as_u16(),
            url
        ))),
        _ => Ok(()),
    }
}

/// Classifies a reqwest error. Connection errors, timeouts and 5xx are retryable.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    let url = error.url().map(|u| u.to_string()).unwrap_or_default();
    match error.status() {
        Some(StatusCode::FORBIDDEN) if error.to_string().contains("rate limit") => {
            Err(NonRetryableError::RateLimitExceeded(url))
        }
        Some(status) => classify_status(status, &url),
        None => Ok(()),
    }
}

/// Converts an `error_for_status()` failure into an anyhow error, wrapping
/// non-retryable ones in [`NonRetryableError`].
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}

pub fn is_retryable(error: &anyhow::Error) -> bool {
    error.downcast_ref::<NonRetryableError>().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.factor, 2);
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_delays_grow_exponentially_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 8,
            ..RetryPolicy::default()
        };
        let secs: Vec<u64> = policy.schedule().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_delays_are_non_decreasing_and_bounded() {
        for factor in [0, 1, 2, 3, 10] {
            let policy = RetryPolicy {
                max_attempts: 40,
                base_delay: Duration::from_millis(250),
                factor,
                max_delay: Duration::from_secs(60),
            };
            let schedule = policy.schedule();
            assert_eq!(schedule.len(), 39);
            assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
            assert!(schedule.iter().all(|d| *d <= policy.max_delay));
        }
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
        assert!(policy.schedule().is_empty());
    }

    #[test]
    fn test_non_retryable_error_display() {
        let err = NonRetryableError::RateLimitExceeded("test".to_string());
        assert!(err.to_string().contains("Rate limit"));
        assert!(err.to_string().contains("token"));

        let err = NonRetryableError::NotFound("https://example.com/x.zip".to_string());
        assert!(err.to_string().contains("Not found"));
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "u").is_ok());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "u").is_ok());
        assert!(classify_status(StatusCode::RANGE_NOT_SATISFIABLE, "u").is_ok());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "u"),
            Err(NonRetryableError::NotFound(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::GONE, "u"),
            Err(NonRetryableError::ClientError(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_error_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(401)
            .create_async()
            .await;

        let response = reqwest::Client::new()
            .get(server.url())
            .send()
            .await
            .unwrap();
        let err = response.error_for_status().unwrap_err();

        assert!(matches!(
            classify_error(&err),
            Err(NonRetryableError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_check_retryable_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;

        let response = reqwest::Client::new()
            .get(server.url())
            .send()
            .await
            .unwrap();
        let err = check_retryable(response.error_for_status().unwrap_err());

        assert!(is_retryable(&err));
    }

    #[tokio::test]
    async fn test_check_retryable_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(404)
            .create_async()
            .await;

        let response = reqwest::Client::new()
            .get(server.url())
            .send()
            .await
            .unwrap();
        let err = check_retryable(response.error_for_status().unwrap_err());

        assert!(!is_retryable(&err));
    }
}
