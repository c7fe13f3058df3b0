pub mod openai;

pub use openai::{OpenAiChatModel, OpenAiEmbedder, OpenAiEndpoint};

use crate::error::ServiceError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Awaits `call`, abandoning it once `after` elapses.
pub async fn with_timeout<T, F>(service: &str, after: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            service: service.to_string(),
            after,
        }),
    }
}

pub(crate) fn status_error(service: &str, status: StatusCode, headers: &HeaderMap) -> ServiceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return ServiceError::RateLimited {
            service: service.to_string(),
            retry_after_secs,
        };
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return ServiceError::Unavailable {
            service: service.to_string(),
            details: status.to_string(),
        };
    }

    ServiceError::InvalidResponse {
        service: service.to_string(),
        details: status.to_string(),
    }
}

pub(crate) fn transport_error(service: &str, error: reqwest::Error, after: Duration) -> ServiceError {
    if error.is_timeout() {
        ServiceError::Timeout {
            service: service.to_string(),
            after,
        }
    } else if error.is_decode() {
        ServiceError::InvalidResponse {
            service: service.to_string(),
            details: error.to_string(),
        }
    } else {
        ServiceError::Unavailable {
            service: service.to_string(),
            details: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[tokio::test]
    async fn slow_calls_time_out() {
        let result: Result<(), ServiceError> = with_timeout("llm", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ServiceError::Timeout { .. })));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() -> Result<(), ServiceError> {
        let value = with_timeout("llm", Duration::from_secs(1), async { Ok(7) }).await?;
        assert_eq!(value, 7);
        Ok(())
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));

        let error = status_error("llm", StatusCode::TOO_MANY_REQUESTS, &headers);
        assert!(matches!(
            error,
            ServiceError::RateLimited {
                retry_after_secs: Some(12),
                ..
            }
        ));
        assert!(error.is_retryable());
    }

    #[test]
    fn server_errors_are_unavailable_and_client_errors_are_not() {
        let headers = HeaderMap::new();
        assert!(matches!(
            status_error("llm", StatusCode::BAD_GATEWAY, &headers),
            ServiceError::Unavailable { .. }
        ));

        let error = status_error("llm", StatusCode::UNAUTHORIZED, &headers);
        assert!(matches!(error, ServiceError::InvalidResponse { .. }));
        assert!(!error.is_retryable());
    }
}
