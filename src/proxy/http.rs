//! HTTP proxy with recording and replay

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use tracing::{debug, error, info, warn};

use crate::config::{Config, LimitsConfig, Mode};
use crate::network::{HttpHandler, InboundRequest, ProxyResponse, UpstreamForwarder};
use crate::recording::capture;
use crate::replay::{ExchangeMatcher, MatchStats};
use crate::storage::SessionStore;
use crate::{PollyError, Result};

/// HTTP proxy that handles recording and replay
pub struct HttpProxy {
    mode: Mode,
    limits: LimitsConfig,
    store: Arc<SessionStore>,
    forwarder: Option<UpstreamForwarder>,
    matcher: Option<ExchangeMatcher>,
}

impl HttpProxy {
    /// Create a new HTTP proxy over `store`
    ///
    /// # Errors
    ///
    /// Returns error if the upstream client cannot be built
    pub fn new(config: &Config, store: Arc<SessionStore>) -> Result<Self> {
        let forwarder = if config.mode.is_record() {
            Some(UpstreamForwarder::new(config.upstream.clone())?)
        } else {
            None
        };

        let matcher = if config.mode.is_replay() {
            Some(ExchangeMatcher::new(Arc::clone(&store), config.policy))
        } else {
            None
        };

        Ok(Self {
            mode: config.mode,
            limits: config.limits.clone(),
            store,
            forwarder,
            matcher,
        })
    }

    /// Serve one HTTP request
    ///
    /// Never fails: per-request errors become a failure response.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let inbound = match HttpHandler::read_request(request, &self.limits).await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Rejected request: {}", e);
                return HttpHandler::failure_response(&e);
            }
        };

        let method = inbound.method.clone();
        let path = inbound.path.clone();

        let result = self
            .handle_inbound(inbound)
            .await
            .and_then(|response| HttpHandler::build_response(&response));

        match result {
            Ok(response) => {
                info!("{} {} -> {}", method, path, response.status().as_u16());
                response
            }
            Err(e) => {
                if e.is_per_request() {
                    warn!("{} {} failed: {}", method, path, e);
                } else {
                    error!("{} {} failed: {}", method, path, e);
                }
                HttpHandler::failure_response(&e)
            }
        }
    }

    /// Record or replay an already decoded request
    ///
    /// # Errors
    ///
    /// Returns `Forward` error in record mode, `NoMatchingExchange` or
    /// `SessionExhausted` in replay mode
    pub async fn handle_inbound(&self, request: InboundRequest) -> Result<ProxyResponse> {
        debug!("received request for {} {}", request.method, request.path);

        match self.mode {
            Mode::Record => self.handle_record(request).await,
            Mode::Replay => self.handle_replay(&request),
        }
    }

    /// Handle request in record mode
    async fn handle_record(&self, request: InboundRequest) -> Result<ProxyResponse> {
        let forwarder = self
            .forwarder
            .as_ref()
            .ok_or_else(|| PollyError::Other("Forwarder not initialized".to_string()))?;

        let upstream = forwarder.forward(&request).await?;

        self.store.append(capture(&request, &upstream));

        Ok(ProxyResponse::new(
            upstream.status,
            &upstream.status_text,
            &upstream.headers,
            upstream.body,
        ))
    }

    /// Handle request in replay mode
    fn handle_replay(&self, request: &InboundRequest) -> Result<ProxyResponse> {
        let matcher = self
            .matcher
            .as_ref()
            .ok_or_else(|| PollyError::Other("Matcher not initialized".to_string()))?;

        let exchange = matcher.match_request(&request.method, &request.path)?;
        let response = exchange.response;

        Ok(ProxyResponse::new(
            response.status,
            &response.status_text,
            &response.headers,
            Bytes::from(response.body),
        ))
    }

    /// Operating mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Inbound request limits
    #[must_use]
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Shared session store
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Replay counters (replay mode only)
    #[must_use]
    pub fn match_stats(&self) -> Option<MatchStats> {
        self.matcher.as_ref().map(ExchangeMatcher::stats)
    }
}
