//! HAR-style session file format
//!
//! A session file is a JSON document holding `version`, `creator` and an
//! ordered `entries` array. Only the subset of HAR needed to replay a
//! response is written; unknown fields are ignored on read, and a document
//! wrapped in a top-level `log` object (as exported by browsers) is accepted.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::exchange::{header_value, Exchange, RecordedRequest, RecordedResponse};
use crate::{PollyError, Result};

/// Interchange format version written to session files
pub const HAR_VERSION: &str = "1.2";

/// Creator name written to session files
pub const CREATOR_NAME: &str = "Polly wants a cracker";

/// Content encoding marker for bodies that are not valid UTF-8
const BASE64_ENCODING: &str = "base64";

/// Top level of a session file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarLog {
    /// Format version
    #[serde(deserialize_with = "deserialize_version")]
    pub version: String,
    /// Producing tool
    #[serde(default)]
    pub creator: HarCreator,
    /// Recorded exchanges, in capture order
    pub entries: Vec<HarEntry>,
}

/// Producing tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarCreator {
    /// Tool name
    #[serde(default)]
    pub name: String,
    /// Tool version
    #[serde(default)]
    pub version: String,
}

impl Default for HarCreator {
    fn default() -> Self {
        Self {
            name: CREATOR_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    /// RFC 3339 arrival time
    pub started_date_time: String,
    /// Upstream round trip in milliseconds
    #[serde(default)]
    pub time: f64,
    /// Request
    pub request: HarRequest,
    /// Response
    pub response: HarResponse,
}

/// Request half of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarRequest {
    /// HTTP method
    pub method: String,
    /// Captured path, including query string
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: Vec<HarHeader>,
}

/// Response half of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    #[serde(default)]
    pub status_text: String,
    /// Response headers
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    /// Response body
    #[serde(default)]
    pub content: HarContent,
}

/// Response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    /// Body length in bytes
    #[serde(default)]
    pub size: i64,
    /// Content type of the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Body text (base64 when `encoding` says so)
    #[serde(default)]
    pub text: String,
    /// Set to `base64` for binary bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// Header pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HarFile {
    Wrapped { log: HarLog },
    Bare(HarLog),
}

fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Text(String),
        Number(f64),
    }

    Ok(match Version::deserialize(deserializer)? {
        Version::Text(text) => text,
        Version::Number(number) => number.to_string(),
    })
}

impl HarLog {
    /// Build a log from exchanges
    #[must_use]
    pub fn from_exchanges(exchanges: &[Exchange]) -> Self {
        Self {
            version: HAR_VERSION.to_string(),
            creator: HarCreator::default(),
            entries: exchanges.iter().map(HarEntry::from).collect(),
        }
    }

    /// Parse a session document
    ///
    /// # Errors
    ///
    /// Returns `Storage` error if the document is not a valid session
    pub fn parse(content: &str) -> Result<Self> {
        let file: HarFile = serde_json::from_str(content)
            .map_err(|e| PollyError::Storage(format!("Invalid session data: {e}")))?;

        Ok(match file {
            HarFile::Wrapped { log } | HarFile::Bare(log) => log,
        })
    }

    /// Serialize as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns `Storage` error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PollyError::Storage(format!("Failed to serialize session: {e}")))
    }

    /// Convert entries back into exchanges, preserving order
    ///
    /// # Errors
    ///
    /// Returns `Storage` error for the first malformed entry
    pub fn into_exchanges(self) -> Result<Vec<Exchange>> {
        self.entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                Exchange::try_from(entry)
                    .map_err(|e| PollyError::Storage(format!("entry {i}: {e}")))
            })
            .collect()
    }
}

impl From<&Exchange> for HarEntry {
    fn from(exchange: &Exchange) -> Self {
        let response = &exchange.response;
        let (text, encoding) = match std::str::from_utf8(&response.body) {
            Ok(text) => (text.to_string(), None),
            Err(_) => (
                general_purpose::STANDARD.encode(&response.body),
                Some(BASE64_ENCODING.to_string()),
            ),
        };

        Self {
            started_date_time: exchange
                .request
                .started_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            time: exchange.elapsed.as_millis() as f64,
            request: HarRequest {
                method: exchange.request.method.clone(),
                url: exchange.request.path.clone(),
                headers: to_har_headers(&exchange.request.headers),
            },
            response: HarResponse {
                status: response.status,
                status_text: response.status_text.clone(),
                headers: to_har_headers(&response.headers),
                content: HarContent {
                    size: response.body.len() as i64,
                    mime_type: header_value(&response.headers, "content-type").map(str::to_string),
                    text,
                    encoding,
                },
            },
        }
    }
}

impl TryFrom<HarEntry> for Exchange {
    type Error = PollyError;

    fn try_from(entry: HarEntry) -> Result<Self> {
        let started_at = DateTime::parse_from_rfc3339(&entry.started_date_time)
            .map_err(|e| {
                PollyError::Storage(format!(
                    "invalid startedDateTime '{}': {e}",
                    entry.started_date_time
                ))
            })?
            .with_timezone(&Utc);

        let content = entry.response.content;
        let body = match content.encoding.as_deref() {
            Some(BASE64_ENCODING) => general_purpose::STANDARD
                .decode(content.text.as_bytes())
                .map_err(|e| PollyError::Storage(format!("invalid base64 body: {e}")))?,
            _ => content.text.into_bytes(),
        };

        let elapsed = if entry.time.is_finite() && entry.time > 0.0 {
            Duration::from_millis(entry.time.round() as u64)
        } else {
            Duration::ZERO
        };

        Ok(Self {
            request: RecordedRequest {
                method: entry.request.method,
                path: entry.request.url,
                headers: from_har_headers(entry.request.headers),
                started_at,
            },
            response: RecordedResponse {
                status: entry.response.status,
                status_text: entry.response.status_text,
                headers: from_har_headers(entry.response.headers),
                body,
            },
            elapsed,
        })
    }
}

fn to_har_headers(headers: &[(String, String)]) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|(name, value)| HarHeader {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn from_har_headers(headers: Vec<HarHeader>) -> Vec<(String, String)> {
    headers.into_iter().map(|h| (h.name, h.value)).collect()
}
