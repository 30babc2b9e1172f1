//! Inbound body parsing and canonical re-serialization

use hyper::body::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

/// Parsed inbound request body
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    /// `application/json` body
    Json(Value),
    /// `application/x-www-form-urlencoded` fields in order
    Form(Vec<(String, String)>),
    /// Anything else, or a body that failed to parse
    Raw(Bytes),
}

impl Default for InboundBody {
    fn default() -> Self {
        Self::Raw(Bytes::new())
    }
}

impl InboundBody {
    /// Parse `bytes` according to `content_type`
    ///
    /// Never fails: malformed JSON or form data falls back to `Raw`.
    #[must_use]
    pub fn parse(content_type: Option<&str>, bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::Raw(bytes);
        }

        match content_type.map(mime_essence).as_deref() {
            Some(essence) if is_json(essence) => match serde_json::from_slice(&bytes) {
                Ok(value) => Self::Json(value),
                Err(e) => {
                    debug!("Malformed JSON body kept raw: {}", e);
                    Self::Raw(bytes)
                }
            },
            Some("application/x-www-form-urlencoded") => match parse_form(&bytes) {
                Some(fields) => Self::Form(fields),
                None => {
                    debug!("Malformed form body kept raw");
                    Self::Raw(bytes)
                }
            },
            _ => Self::Raw(bytes),
        }
    }

    /// Canonical textual form sent upstream
    ///
    /// JSON is re-serialized compactly with key order preserved, form fields
    /// become a flat JSON object (last value wins, bracketed keys such as
    /// `a[b]` are kept verbatim), raw bodies pass through.
    #[must_use]
    pub fn to_canonical(&self) -> Bytes {
        match self {
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Form(fields) => {
                let object: Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                Bytes::from(Value::Object(object).to_string())
            }
            Self::Raw(bytes) => bytes.clone(),
        }
    }

    /// Whether there is nothing to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Raw(bytes) if bytes.is_empty())
    }
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(essence: &str) -> bool {
    essence == "application/json" || essence.ends_with("+json")
}

fn parse_form(bytes: &[u8]) -> Option<Vec<(String, String)>> {
    let text = std::str::from_utf8(bytes).ok()?;

    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(component: &str) -> Option<String> {
    urlencoding::decode(&component.replace('+', " "))
        .ok()
        .map(std::borrow::Cow::into_owned)
}
