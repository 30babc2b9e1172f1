//! Session storage backed by HAR files

mod exchange;
mod har;
mod store;

pub use exchange::{
    header_value, is_framing_header, Exchange, Headers, RecordedRequest, RecordedResponse,
    FRAMING_HEADERS,
};
pub use har::{
    HarContent, HarCreator, HarEntry, HarHeader, HarLog, HarRequest, HarResponse, CREATOR_NAME,
    HAR_VERSION,
};
pub use store::{session_path, validate_session_name, Session, SessionStore};

/// File extension of session files
pub const SESSION_EXTENSION: &str = "har";
