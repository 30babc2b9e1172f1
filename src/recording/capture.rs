//! Exchange capture for record mode

use crate::network::{InboundRequest, UpstreamResponse};
use crate::storage::{Exchange, RecordedRequest, RecordedResponse};

/// Build the exchange to record for a forwarded request
///
/// The request is captured as it arrived, before any `Host` rewrite.
#[must_use]
pub fn capture(request: &InboundRequest, response: &UpstreamResponse) -> Exchange {
    Exchange {
        request: RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            headers: request.headers.clone(),
            started_at: request.received_at,
        },
        response: RecordedResponse {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.to_vec(),
        },
        elapsed: response.elapsed,
    }
}
