//! Proxy integration for recording and replay

mod http;

pub use http::HttpProxy;

use crate::config::Mode;

/// Proxy mode determines behavior
impl Mode {
    /// Check if mode is Record
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Mode::Record)
    }

    /// Check if mode is Replay
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_predicates() {
        assert!(Mode::Record.is_record());
        assert!(!Mode::Record.is_replay());
        assert!(Mode::Replay.is_replay());
        assert!(!Mode::default().is_record());
    }
}
