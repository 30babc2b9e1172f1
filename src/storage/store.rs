//! Session store: the single live session of a process

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::exchange::Exchange;
use super::har::HarLog;
use super::SESSION_EXTENSION;
use crate::{PollyError, Result};

/// A named, ordered collection of exchanges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    name: String,
    exchanges: Vec<Exchange>,
}

impl Session {
    /// Create an empty session
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exchanges: Vec::new(),
        }
    }

    /// Create a session from already captured exchanges
    #[must_use]
    pub fn with_exchanges(name: &str, exchanges: Vec<Exchange>) -> Self {
        Self {
            name: name.to_string(),
            exchanges,
        }
    }

    /// Session name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exchanges in order
    #[must_use]
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Number of pending exchanges
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Whether the session holds no exchanges
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Exchange at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Exchange> {
        self.exchanges.get(index)
    }

    /// Index of the first exchange recorded for `method` and `path`
    #[must_use]
    pub fn position(&self, method: &str, path: &str) -> Option<usize> {
        self.exchanges.iter().position(|e| e.matches(method, path))
    }

    /// Append an exchange at the end
    pub fn append(&mut self, exchange: Exchange) {
        self.exchanges.push(exchange);
    }

    /// Remove the exchange at `index`, shifting later ones down
    pub fn remove(&mut self, index: usize) -> Option<Exchange> {
        (index < self.exchanges.len()).then(|| self.exchanges.remove(index))
    }
}

/// Owner of the live session and its backing file
///
/// All mutation goes through the store's lock so the session can be shared
/// between connection tasks on a multi-threaded runtime.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    session: Mutex<Session>,
}

impl SessionStore {
    /// Load a previously persisted session
    ///
    /// # Errors
    ///
    /// Returns `Storage` error if the file is missing or not a valid session
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = session_path(dir, name);

        let content = std::fs::read_to_string(&path).map_err(|e| {
            PollyError::Storage(format!(
                "Failed to read session file {}: {e}",
                path.display()
            ))
        })?;

        let exchanges = HarLog::parse(&content)
            .and_then(HarLog::into_exchanges)
            .map_err(|e| PollyError::Storage(format!("{}: {e}", path.display())))?;

        info!(
            "Loaded session '{}': {} exchanges from {}",
            name,
            exchanges.len(),
            path.display()
        );

        Ok(Self {
            path,
            session: Mutex::new(Session::with_exchanges(name, exchanges)),
        })
    }

    /// Create an empty session; nothing touches the disk until `persist`
    #[must_use]
    pub fn create_empty(dir: &Path, name: &str) -> Self {
        Self {
            path: session_path(dir, name),
            session: Mutex::new(Session::new(name)),
        }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of exchanges currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no exchanges are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current session
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// Append a captured exchange
    pub fn append(&self, exchange: Exchange) {
        let mut session = self.lock();
        session.append(exchange);
        debug!("Captured exchange #{} in '{}'", session.len(), session.name());
    }

    /// Remove the exchange at `index`
    pub fn remove(&self, index: usize) -> Option<Exchange> {
        self.lock().remove(index)
    }

    /// Run `f` with exclusive access to the session
    ///
    /// Used where a lookup and its removal must not interleave with another
    /// request.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.lock())
    }

    /// Write the session to its backing file
    ///
    /// # Errors
    ///
    /// Returns `Storage` error if the file cannot be written
    pub fn persist(&self) -> Result<()> {
        let (json, count) = {
            let session = self.lock();
            (
                HarLog::from_exchanges(session.exchanges()).to_json()?,
                session.len(),
            )
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PollyError::Storage(format!(
                    "Failed to create session directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        std::fs::write(&self.path, json).map_err(|e| {
            PollyError::Storage(format!(
                "Failed to write session file {}: {e}",
                self.path.display()
            ))
        })?;

        info!(
            "Persisted {} exchanges to {}",
            count,
            self.path.display()
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // A panic while holding the lock cannot leave the Vec half-updated
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Path of the session file for `name` inside `dir`
#[must_use]
pub fn session_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{SESSION_EXTENSION}"))
}

/// Validate a session name
///
/// # Errors
///
/// Returns error if the name could escape the session directory
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PollyError::InvalidSessionName(
            "Session name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(PollyError::InvalidSessionName(format!(
            "Session name too long: {} > 255",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(PollyError::InvalidSessionName(
            "Session name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(PollyError::InvalidSessionName(
            "Session name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(PollyError::InvalidSessionName(
            "Session name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(PollyError::InvalidSessionName(
            "Session name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
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
                headers: vec![("accept".to_string(), "*/*".to_string())],
                started_at: Utc::now(),
            },
            response: RecordedResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: vec![("content-type".to_string(), "text/plain".to_string())],
                body: body.as_bytes().to_vec(),
            },
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_create_empty_does_no_io() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::create_empty(temp_dir.path(), "fresh");

        assert!(store.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_append_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::create_empty(temp_dir.path(), "ordered");

        for i in 0..5 {
            store.append(exchange("GET", &format!("/items/{i}"), "x"));
        }

        let session = store.snapshot();
        let paths: Vec<_> = session
            .exchanges()
            .iter()
            .map(|e| e.request.path.as_str())
            .collect();
        assert_eq!(
            paths,
            ["/items/0", "/items/1", "/items/2", "/items/3", "/items/4"]
        );
    }

    #[test]
    fn test_remove_shifts_later_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::create_empty(temp_dir.path(), "shift");
        store.append(exchange("GET", "/a", "a"));
        store.append(exchange("GET", "/b", "b"));
        store.append(exchange("GET", "/c", "c"));

        let removed = store.remove(1).unwrap();
        assert_eq!(removed.request.path, "/b");
        assert_eq!(store.snapshot().get(1).unwrap().request.path, "/c");
        assert!(store.remove(7).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_persist_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::create_empty(temp_dir.path(), "cycle");
        store.append(exchange("GET", "/users", "[]"));
        store.append(exchange("POST", "/orders", "{\"id\":1}"));
        store.persist().unwrap();

        assert!(temp_dir.path().join("cycle.har").exists());

        let loaded = SessionStore::load(temp_dir.path(), "cycle").unwrap();
        let original = store.snapshot();
        let reloaded = loaded.snapshot();
        assert_eq!(reloaded.len(), 2);
        for (a, b) in original.exchanges().iter().zip(reloaded.exchanges()) {
            assert_eq!(a.request.method, b.request.method);
            assert_eq!(a.request.path, b.request.path);
            assert_eq!(a.response, b.response);
        }
    }

    #[test]
    fn test_persist_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested").join("dir");
        let store = SessionStore::create_empty(&nested, "deep");
        store.persist().unwrap();

        assert!(nested.join("deep.har").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = SessionStore::load(temp_dir.path(), "absent");

        assert!(matches!(result, Err(PollyError::Storage(_))));
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("broken.har"), "{\"entries\": 3").unwrap();

        let result = SessionStore::load(temp_dir.path(), "broken");
        assert!(matches!(result, Err(PollyError::Storage(_))));
    }

    #[test]
    fn test_with_session_is_exclusive_scope() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::create_empty(temp_dir.path(), "scoped");
        store.append(exchange("GET", "/a", "a"));
        store.append(exchange("GET", "/a", "second"));

        let taken = store.with_session(|session| {
            let index = session.position("GET", "/a")?;
            session.remove(index)
        });

        assert_eq!(taken.unwrap().response.body, b"a");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_validate_session_name() {
        assert!(validate_session_name("demo").is_ok());
        assert!(validate_session_name("checkout-flow_2").is_ok());

        assert!(validate_session_name("").is_err());
        assert!(validate_session_name(".hidden").is_err());
        assert!(validate_session_name("a/b").is_err());
        assert!(validate_session_name("a\\b").is_err());
        assert!(validate_session_name("a..b").is_err());
        assert!(validate_session_name("a\0b").is_err());
        assert!(validate_session_name(&"x".repeat(256)).is_err());
    }
}
