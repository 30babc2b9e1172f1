//! Upstream forwarder for record mode

use std::time::{Duration, Instant};

use hyper::body::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Url};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::storage::{is_framing_header, Headers};
use crate::{PollyError, Result};

use super::http::{headers_to_pairs, InboundRequest};
use super::MAX_REDIRECTS;

/// Which upstream a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// Sandbox origin, reached with a rewritten `Host`
    Sandbox,
    /// Mock backend, reached with the inbound `Host` untouched
    MockBackend,
}

/// Full upstream response, body already decoded
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// Response headers in upstream order
    pub headers: Headers,
    /// Decoded body
    pub body: Bytes,
    /// Time from send to last body byte
    pub elapsed: Duration,
}

/// Sends inbound requests to the configured upstream
pub struct UpstreamForwarder {
    client: Client,
    upstream: UpstreamConfig,
}

impl UpstreamForwarder {
    /// Create a forwarder
    ///
    /// The client follows redirects and transparently decodes gzip, deflate
    /// and brotli bodies.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(upstream: UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| PollyError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, upstream })
    }

    /// Pick the upstream for `path`
    #[must_use]
    pub fn route(&self, path: &str) -> Upstream {
        match self.upstream.mock_backend_url {
            Some(_)
                if !self.upstream.mock_path_marker.is_empty()
                    && path.contains(&self.upstream.mock_path_marker) =>
            {
                Upstream::MockBackend
            }
            _ => Upstream::Sandbox,
        }
    }

    /// Absolute URL for `path` on `upstream`
    ///
    /// # Errors
    ///
    /// Returns error if the joined URL does not parse
    pub fn target_url(&self, upstream: Upstream, path: &str) -> Result<Url> {
        let base: &str = match upstream {
            Upstream::MockBackend => self
                .upstream
                .mock_backend_url
                .as_deref()
                .unwrap_or(&self.upstream.sandbox_url),
            Upstream::Sandbox => &self.upstream.sandbox_url,
        };

        let url = format!("{}{}", base.trim_end_matches('/'), path);
        Url::parse(&url).map_err(|e| PollyError::Forward(format!("Invalid URI '{url}': {e}")))
    }

    /// Headers to send upstream, in inbound order
    ///
    /// For the sandbox, `Host` is replaced in place (or appended when absent).
    /// Framing headers are left for the client to recompute. The inbound
    /// `accept-encoding` is dropped so the client advertises only codings it
    /// can decode.
    #[must_use]
    pub fn outbound_headers(&self, upstream: Upstream, inbound: &[(String, String)]) -> Headers {
        let mut headers: Headers = inbound
            .iter()
            .filter(|(name, _)| {
                !is_framing_header(name) && !name.eq_ignore_ascii_case(ACCEPT_ENCODING.as_str())
            })
            .cloned()
            .collect();

        if upstream == Upstream::Sandbox {
            let host = self.upstream.sandbox_host.clone();
            let mut replaced = false;
            headers.retain_mut(|(name, value)| {
                if !name.eq_ignore_ascii_case("host") {
                    return true;
                }
                if replaced {
                    return false;
                }
                value.clone_from(&host);
                replaced = true;
                true
            });
            if !replaced {
                headers.push(("host".to_string(), host));
            }
        }

        headers
    }

    /// Body to send upstream; `GET` and `HEAD` never carry one
    #[must_use]
    pub fn outbound_body(request: &InboundRequest) -> Option<Bytes> {
        if request.method.eq_ignore_ascii_case("GET") || request.method.eq_ignore_ascii_case("HEAD")
        {
            None
        } else {
            Some(request.body.to_canonical())
        }
    }

    /// Forward a request and read the whole response
    ///
    /// # Errors
    ///
    /// Returns `Forward` error on network, DNS or body read failure
    pub async fn forward(&self, request: &InboundRequest) -> Result<UpstreamResponse> {
        let upstream = self.route(&request.path);
        let url = self.target_url(upstream, &request.path)?;

        debug!("Forwarding {} to {} ({:?})", request.method, url, upstream);

        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            PollyError::Forward(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let headers = to_header_map(&self.outbound_headers(upstream, &request.headers))?;

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = Self::outbound_body(request) {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            warn!("Request failed: {e}");
            if e.is_connect() {
                PollyError::Forward(format!("Failed to connect to upstream: {e}"))
            } else {
                PollyError::Forward(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let headers = headers_to_pairs(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| PollyError::Forward(format!("Failed to read response body: {e}")))?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }
}

fn to_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PollyError::Forward(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PollyError::Forward(format!("Invalid value for header '{name}': {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}
