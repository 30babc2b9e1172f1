//! Exchange matcher for replay mode

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::{Exchange, SessionStore};
use crate::{PollyError, Result};

use super::MatchPolicy;

/// Picks the recorded exchange answering an incoming request
///
/// Under [`MatchPolicy::Ordinal`] the cursor is claimed atomically, but two
/// concurrent requests get their slots in arrival order at the counter, not
/// in the order they were recorded. Out-of-order consumption under
/// concurrency is a known property of that policy.
pub struct ExchangeMatcher {
    store: Arc<SessionStore>,
    policy: MatchPolicy,
    cursor: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ExchangeMatcher {
    /// Create a matcher over `store`
    #[must_use]
    pub fn new(store: Arc<SessionStore>, policy: MatchPolicy) -> Self {
        Self {
            store,
            policy,
            cursor: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Active policy
    #[must_use]
    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Find and consume the exchange for `method` and `path`
    ///
    /// # Errors
    ///
    /// Returns `NoMatchingExchange` (content policy) or `SessionExhausted`
    /// (ordinal policy) when nothing is left to serve
    pub fn match_request(&self, method: &str, path: &str) -> Result<Exchange> {
        let result = match self.policy {
            MatchPolicy::Content => self.match_content(method, path),
            MatchPolicy::Ordinal => self.match_ordinal(),
        };

        match &result {
            Ok(exchange) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Replay hit: {} {} -> {}",
                    method, path, exchange.response.status
                );
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!("Replay miss: {}", e);
            }
        }

        result
    }

    fn match_content(&self, method: &str, path: &str) -> Result<Exchange> {
        self.store
            .with_session(|session| {
                let index = session.position(method, path)?;
                session.remove(index)
            })
            .ok_or_else(|| PollyError::NoMatchingExchange {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    fn match_ordinal(&self) -> Result<Exchange> {
        let cursor = self.cursor.fetch_add(1, Ordering::SeqCst);

        self.store.with_session(|session| {
            session
                .get(cursor)
                .cloned()
                .ok_or(PollyError::SessionExhausted {
                    cursor,
                    len: session.len(),
                })
        })
    }

    /// Current replay counters
    #[must_use]
    pub fn stats(&self) -> MatchStats {
        let remaining = match self.policy {
            MatchPolicy::Content => self.store.len(),
            MatchPolicy::Ordinal => self
                .store
                .len()
                .saturating_sub(self.cursor.load(Ordering::SeqCst)),
        };

        MatchStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remaining,
        }
    }
}

/// Replay counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchStats {
    /// Requests answered from the session
    pub hits: usize,
    /// Requests with nothing to serve
    pub misses: usize,
    /// Exchanges still available
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RecordedRequest, RecordedResponse};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn exchange(method: &str, path: &str, body: &str) -> Exchange {
        Exchange {
            request: RecordedRequest {
                method: method.to_string(),
                path: path.to_string(),
                headers: vec![],
                started_at: Utc::now(),
            },
            response: RecordedResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: vec![],
                body: body.as_bytes().to_vec(),
            },
            elapsed: Duration::ZERO,
        }
    }

    fn store_with(exchanges: Vec<Exchange>) -> (TempDir, Arc<SessionStore>) {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::create_empty(temp_dir.path(), "matcher");
        for e in exchanges {
            store.append(e);
        }
        (temp_dir, Arc::new(store))
    }

    #[test]
    fn test_content_match_picks_first_equal() {
        let (_dir, store) = store_with(vec![
            exchange("GET", "/users", "first"),
            exchange("POST", "/users", "created"),
            exchange("GET", "/users", "second"),
        ]);
        let matcher = ExchangeMatcher::new(store, MatchPolicy::Content);

        assert_eq!(
            matcher.match_request("POST", "/users").unwrap().response.body,
            b"created"
        );
        assert_eq!(
            matcher.match_request("GET", "/users").unwrap().response.body,
            b"first"
        );
        assert_eq!(
            matcher.match_request("GET", "/users").unwrap().response.body,
            b"second"
        );
    }

    #[test]
    fn test_content_match_is_destructive() {
        let (_dir, store) = store_with(vec![exchange("GET", "/users", "[]")]);
        let matcher = ExchangeMatcher::new(Arc::clone(&store), MatchPolicy::Content);

        assert!(matcher.match_request("GET", "/users").is_ok());
        assert!(store.is_empty());
        assert!(matches!(
            matcher.match_request("GET", "/users"),
            Err(PollyError::NoMatchingExchange { .. })
        ));
    }

    #[test]
    fn test_content_match_query_is_opaque() {
        let (_dir, store) = store_with(vec![exchange("GET", "/search?a=1&b=2", "hit")]);
        let matcher = ExchangeMatcher::new(store, MatchPolicy::Content);

        assert!(matcher.match_request("GET", "/search?b=2&a=1").is_err());
        assert!(matcher.match_request("GET", "/search").is_err());
        assert!(matcher.match_request("GET", "/search?a=1&b=2").is_ok());
    }

    #[test]
    fn test_content_match_method_must_agree() {
        let (_dir, store) = store_with(vec![exchange("DELETE", "/users/1", "")]);
        let matcher = ExchangeMatcher::new(store, MatchPolicy::Content);

        assert!(matcher.match_request("GET", "/users/1").is_err());
        assert!(matcher.match_request("DELETE", "/users/1").is_ok());
    }

    #[test]
    fn test_ordinal_match_ignores_request() {
        let (_dir, store) = store_with(vec![
            exchange("GET", "/a", "zero"),
            exchange("GET", "/b", "one"),
        ]);
        let matcher = ExchangeMatcher::new(Arc::clone(&store), MatchPolicy::Ordinal);

        assert_eq!(
            matcher.match_request("PUT", "/whatever").unwrap().response.body,
            b"zero"
        );
        assert_eq!(
            matcher.match_request("GET", "/a").unwrap().response.body,
            b"one"
        );
        assert!(matches!(
            matcher.match_request("GET", "/a"),
            Err(PollyError::SessionExhausted { cursor: 2, len: 2 })
        ));
        // Non-destructive
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ordinal_cursor_advances_on_failure() {
        let (_dir, store) = store_with(vec![exchange("GET", "/a", "zero")]);
        let matcher = ExchangeMatcher::new(store, MatchPolicy::Ordinal);

        assert!(matcher.match_request("GET", "/a").is_ok());
        assert!(matcher.match_request("GET", "/a").is_err());
        assert!(matches!(
            matcher.match_request("GET", "/a"),
            Err(PollyError::SessionExhausted { cursor: 2, .. })
        ));
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = store_with(vec![
            exchange("GET", "/a", "a"),
            exchange("GET", "/b", "b"),
        ]);
        let matcher = ExchangeMatcher::new(store, MatchPolicy::Content);

        matcher.match_request("GET", "/a").unwrap();
        let _ = matcher.match_request("GET", "/missing");

        assert_eq!(
            matcher.stats(),
            MatchStats {
                hits: 1,
                misses: 1,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_ordinal_stats_remaining() {
        let (_dir, store) = store_with(vec![exchange("GET", "/a", "a")]);
        let matcher = ExchangeMatcher::new(store, MatchPolicy::Ordinal);

        assert_eq!(matcher.stats().remaining, 1);
        matcher.match_request("GET", "/a").unwrap();
        let _ = matcher.match_request("GET", "/a");
        assert_eq!(matcher.stats().remaining, 0);
    }
}
