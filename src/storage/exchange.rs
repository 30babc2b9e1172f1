//! In-memory exchange representation

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Ordered header list; names keep whatever case they arrived with
pub type Headers = Vec<(String, String)>;

/// Headers describing message framing rather than content
pub const FRAMING_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// Captured request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: String,
    /// Path including query string
    pub path: String,
    /// Request headers in arrival order
    pub headers: Headers,
    /// When the request arrived
    pub started_at: DateTime<Utc>,
}

/// Captured response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// Response headers in upstream order
    pub headers: Headers,
    /// Decoded response body
    pub body: Vec<u8>,
}

/// One recorded request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// The inbound request
    pub request: RecordedRequest,
    /// The upstream response
    pub response: RecordedResponse,
    /// Time spent waiting on upstream
    pub elapsed: Duration,
}

impl Exchange {
    /// Whether this exchange was recorded for `method` and `path`
    ///
    /// Both are compared as opaque strings.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.request.method == method && self.request.path == path
    }
}

/// First value of `name`, compared case-insensitively
#[must_use]
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Whether `name` is a framing header
#[must_use]
pub fn is_framing_header(name: &str) -> bool {
    FRAMING_HEADERS
        .iter()
        .any(|framing| name.eq_ignore_ascii_case(framing))
}
