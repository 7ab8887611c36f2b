//! Builds [`WireRequest`]s from endpoint descriptors.

use http::{HeaderMap, HeaderName, HeaderValue, header};
use std::sync::Arc;
use url::Url;
use vesta_config::ApiConfig;
use vesta_types::{EndpointDescriptor, NetworkError, RequestBody, Result, WireRequest};

/// A request rewrite applied to the built request, before the bearer header
/// is attached.
///
/// Interceptors run in registration order; an error aborts the request.
pub type Interceptor = Arc<dyn Fn(WireRequest) -> Result<WireRequest> + Send + Sync>;

/// Resolve `path` against the base URL and append the query parameters.
///
/// Absolute `http(s)://` paths (e.g. pagination links) are used as-is.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidUrl`] if the result does not parse.
pub fn resolve_url(base_url: &str, descriptor: &EndpointDescriptor) -> Result<Url> {
    let raw = if descriptor.path.starts_with("http://") || descriptor.path.starts_with("https://")
    {
        descriptor.path.clone()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            descriptor.path.trim_start_matches('/')
        )
    };
    let mut url = Url::parse(&raw).map_err(|e| NetworkError::InvalidUrl(format!("{raw}: {e}")))?;
    if !descriptor.query.is_empty() {
        url.query_pairs_mut().extend_pairs(descriptor.query.iter());
    }
    Ok(url)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| NetworkError::InvalidRequest(format!("invalid header value: {e}")))
}

/// Headers every request carries before descriptor overrides.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidRequest`] if the configured version or
/// platform strings are not valid header values.
pub fn default_headers(config: &ApiConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("x-app-version"),
        header_value(&config.app_version)?,
    );
    headers.insert(
        HeaderName::from_static("x-platform"),
        header_value(&config.platform)?,
    );
    headers.insert(
        header::USER_AGENT,
        header_value(&format!("vesta/{} ({})", config.app_version, config.platform))?,
    );
    Ok(headers)
}

/// Assemble the wire request for `descriptor`.
///
/// `body` overrides the descriptor's JSON body (used for multipart uploads).
///
/// # Errors
///
/// Returns [`NetworkError::InvalidUrl`] or [`NetworkError::InvalidRequest`].
pub fn build(
    config: &ApiConfig,
    descriptor: &EndpointDescriptor,
    body: Option<RequestBody>,
) -> Result<WireRequest> {
    let url = resolve_url(&config.base_url, descriptor)?;
    let mut headers = default_headers(config)?;

    for (name, value) in &descriptor.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NetworkError::InvalidRequest(format!("invalid header name {name}: {e}")))?;
        headers.insert(name, header_value(value)?);
    }

    let body = body.or_else(|| descriptor.body.clone().map(RequestBody::Bytes));
    match &body {
        Some(RequestBody::Bytes(_)) if !headers.contains_key(header::CONTENT_TYPE) => {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        // The transport writes the multipart boundary header itself.
        Some(RequestBody::Multipart(_)) => {
            headers.remove(header::CONTENT_TYPE);
        }
        _ => {}
    }

    Ok(WireRequest {
        method: descriptor.method.clone(),
        url: url.into(),
        headers,
        body,
        timeout: descriptor.timeout.unwrap_or_else(|| config.default_timeout()),
    })
}

/// Set (or replace) the `Authorization: Bearer` header.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidRequest`] if the token is not a valid
/// header value.
pub fn set_bearer(request: &mut WireRequest, token: &str) -> Result<()> {
    let mut value = header_value(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    request.headers.insert(header::AUTHORIZATION, value);
    Ok(())
}
