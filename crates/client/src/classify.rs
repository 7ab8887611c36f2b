//! Maps HTTP responses onto success or a [`NetworkError`] kind.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode, header};
use vesta_types::{ApiErrorBody, NetworkError, Result, WireResponse};

/// Classify a buffered response.
///
/// # Errors
///
/// Returns the [`NetworkError`] kind matching the status code. 4xx/5xx
/// messages come from the decoded error body when it has a known shape.
pub fn classify(response: WireResponse) -> Result<Bytes> {
    let status = response.status;
    if status.is_success() {
        return Ok(response.body);
    }

    let message = || ApiErrorBody::parse(&response.body).map(|b| b.message);

    Err(match status {
        StatusCode::UNAUTHORIZED => NetworkError::Unauthorized,
        StatusCode::FORBIDDEN => NetworkError::Forbidden,
        StatusCode::NOT_FOUND => NetworkError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => NetworkError::RateLimited {
            retry_after: retry_after(&response.headers),
        },
        s if s.is_client_error() => NetworkError::ClientError {
            status: s.as_u16(),
            message: message(),
        },
        s if s.is_server_error() => NetworkError::ServerError {
            status: s.as_u16(),
            message: message(),
        },
        s => NetworkError::Unknown(format!("unexpected status {s}")),
    })
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let secs = (at - Utc::now()).num_seconds();
    Some(u64::try_from(secs).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_returns_body() {
        let body = classify(WireResponse::new(200, "{\"ok\":true}")).unwrap();
        assert_eq!(&body[..], b"{\"ok\":true}");
        assert!(classify(WireResponse::new(204, "")).is_ok());
    }

    #[test]
    fn test_dedicated_statuses() {
        assert_eq!(
            classify(WireResponse::new(401, "")).unwrap_err(),
            NetworkError::Unauthorized
        );
        assert_eq!(
            classify(WireResponse::new(403, "")).unwrap_err(),
            NetworkError::Forbidden
        );
        assert_eq!(
            classify(WireResponse::new(404, "")).unwrap_err(),
            NetworkError::NotFound
        );
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let resp = WireResponse::new(429, "").with_header("Retry-After", "30");
        assert_eq!(
            classify(resp).unwrap_err(),
            NetworkError::RateLimited {
                retry_after: Some(30)
            }
        );
        assert_eq!(
            classify(WireResponse::new(429, "")).unwrap_err(),
            NetworkError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_retry_after_http_date_in_past_is_zero() {
        let resp =
            WireResponse::new(429, "").with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(
            classify(resp).unwrap_err(),
            NetworkError::RateLimited {
                retry_after: Some(0)
            }
        );
    }

    #[test]
    fn test_client_error_flat_and_nested_bodies_agree() {
        let flat = json!({"error": "invalid_symbol", "message": "Unknown ticker"});
        let nested = json!({"error": {"code": "invalid_symbol", "message": "Unknown ticker"}});
        let a = classify(WireResponse::new(422, flat.to_string())).unwrap_err();
        let b = classify(WireResponse::new(422, nested.to_string())).unwrap_err();
        assert_eq!(a, b);
        assert_eq!(
            a,
            NetworkError::ClientError {
                status: 422,
                message: Some("Unknown ticker".into())
            }
        );
    }

    #[test]
    fn test_server_error_without_json_body() {
        let err = classify(WireResponse::new(502, "<html>bad gateway</html>")).unwrap_err();
        assert_eq!(
            err,
            NetworkError::ServerError {
                status: 502,
                message: None
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_redirect_is_unknown() {
        assert!(matches!(
            classify(WireResponse::new(304, "")).unwrap_err(),
            NetworkError::Unknown(_)
        ));
    }
}
