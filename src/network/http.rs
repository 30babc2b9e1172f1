//! Inbound request decoding and outbound response encoding

use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue, CONTENT_ENCODING};
use hyper::{HeaderMap, Request, Response, StatusCode};
use tracing::warn;

use crate::config::LimitsConfig;
use crate::storage::{header_value, is_framing_header, Headers};
use crate::{PollyError, Result};

use super::body::InboundBody;

/// Body of every failure response
pub const FAILURE_BODY: &str = "There was a failure";

/// Value forced onto the `content-encoding` of every served response
pub const IDENTITY_ENCODING: &str = "identity";

/// A fully read inbound request
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method
    pub method: String,
    /// Path including query string
    pub path: String,
    /// Headers in arrival order
    pub headers: Headers,
    /// Parsed body
    pub body: InboundBody,
    /// Arrival time
    pub received_at: DateTime<Utc>,
}

impl InboundRequest {
    /// Build a request without going through the transport
    #[must_use]
    pub fn new(method: &str, path: &str, headers: Headers, body: InboundBody) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body,
            received_at: Utc::now(),
        }
    }

    /// First value of header `name`
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Response ready to be written back to the caller
///
/// Construction strips framing headers and forces `content-encoding` to
/// `identity`, since the body is always held decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// Headers to send
    pub headers: Headers,
    /// Body to send
    pub body: Bytes,
}

impl ProxyResponse {
    /// Normalize a recorded or live response for the caller
    #[must_use]
    pub fn new(status: u16, status_text: &str, headers: &[(String, String)], body: Bytes) -> Self {
        let mut headers: Headers = headers
            .iter()
            .filter(|(name, _)| {
                !is_framing_header(name) && !name.eq_ignore_ascii_case(CONTENT_ENCODING.as_str())
            })
            .cloned()
            .collect();
        headers.push((
            CONTENT_ENCODING.as_str().to_string(),
            IDENTITY_ENCODING.to_string(),
        ));

        Self {
            status,
            status_text: status_text.to_string(),
            headers,
            body,
        }
    }

    /// First value of header `name`
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// HTTP helpers for the inbound side
pub struct HttpHandler;

impl HttpHandler {
    /// Read and parse an inbound request
    ///
    /// # Errors
    ///
    /// Returns error if the request breaks a limit or its body cannot be read
    pub async fn read_request<B>(request: Request<B>, limits: &LimitsConfig) -> Result<InboundRequest>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::validate_request(&request, limits)?;

        let (parts, body) = request.into_parts();
        let method = parts.method.as_str().to_string();
        let path = parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());
        let headers = headers_to_pairs(&parts.headers);

        let bytes = Self::read_body(body, limits.max_request_size).await?;
        let body = InboundBody::parse(header_value(&headers, "content-type"), bytes);

        Ok(InboundRequest {
            method,
            path,
            headers,
            body,
            received_at: Utc::now(),
        })
    }

    /// Check declared size and header count before reading the body
    ///
    /// # Errors
    ///
    /// Returns error if request is invalid or too large
    pub fn validate_request<B>(request: &Request<B>, limits: &LimitsConfig) -> Result<()> {
        if let Some(length) = request
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > limits.max_request_size {
                return Err(PollyError::DataTooLarge {
                    size: length,
                    limit: limits.max_request_size,
                });
            }
        }

        let header_count = request.headers().len();
        if header_count > limits.max_headers {
            return Err(PollyError::Other(format!(
                "Too many headers: {header_count}"
            )));
        }

        Ok(())
    }

    /// Read request body with size limit
    ///
    /// # Errors
    ///
    /// Returns error if body is too large or read fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match Limited::new(body, max_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(PollyError::DataTooLarge {
                    size: max_size + 1,
                    limit: max_size,
                })
            }
            Err(e) => Err(PollyError::Other(format!("Failed to read body: {e}"))),
        }
    }

    /// Encode a proxy response for hyper
    ///
    /// Headers that hyper refuses are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the status code is not a valid HTTP status
    pub fn build_response(response: &ProxyResponse) -> Result<Response<Full<Bytes>>> {
        let status = StatusCode::from_u16(response.status)
            .map_err(|e| PollyError::Other(format!("Invalid status {}: {e}", response.status)))?;

        let mut http_response = Response::new(Full::new(response.body.clone()));
        *http_response.status_mut() = status;

        let headers = http_response.headers_mut();
        for (name, value) in &response.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!("Dropping invalid response header '{}'", name),
            }
        }

        if !response.status_text.is_empty()
            && status.canonical_reason() != Some(response.status_text.as_str())
        {
            if let Ok(reason) = ReasonPhrase::try_from(response.status_text.clone()) {
                http_response.extensions_mut().insert(reason);
            }
        }

        Ok(http_response)
    }

    /// Generic failure response for a per-request error
    #[must_use]
    pub fn failure_response(error: &PollyError) -> Response<Full<Bytes>> {
        let status = match error {
            PollyError::NoMatchingExchange { .. } | PollyError::SessionExhausted { .. } => {
                StatusCode::NOT_FOUND
            }
            PollyError::Forward(_) => StatusCode::BAD_GATEWAY,
            PollyError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut response = Response::new(Full::new(Bytes::from_static(FAILURE_BODY.as_bytes())));
        *response.status_mut() = status;
        response
    }
}

/// Flatten a header map into ordered pairs, one per value
#[must_use]
pub fn headers_to_pairs(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
