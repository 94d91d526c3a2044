//! Request-id correlation across hops.

use axum::http::HeaderMap;

use crate::telemetry::event::Event;

/// Header carrying correlation tokens on both requests and responses.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Delimiter used when joining tokens into an event identifier.
pub const TOKEN_DELIMITER: &str = ",";

/// Reads and reconciles correlation tokens for one header name.
#[derive(Debug, Clone)]
pub struct RequestIdCorrelator {
    header: &'static str,
}

impl Default for RequestIdCorrelator {
    fn default() -> Self {
        Self { header: X_REQUEST_ID }
    }
}

impl RequestIdCorrelator {
    /// Correlator bound to a custom header name.
    pub fn with_header(header: &'static str) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &'static str {
        self.header
    }

    /// Tokens found on the request, in header order.
    pub fn extract_incoming(&self, headers: &HeaderMap) -> Vec<String> {
        self.tokens(headers)
    }

    /// Reconcile the event identifier with the tokens seen on this hop.
    ///
    /// Reads the outgoing tokens from the response headers and returns them.
    /// When the event has no identifier yet and at least one token was seen,
    /// the identifier becomes all incoming then outgoing tokens joined by
    /// [`TOKEN_DELIMITER`]. No token is minted here.
    pub fn ensure_outgoing(
        &self,
        response_headers: &HeaderMap,
        incoming: &[String],
        event: &mut Event,
    ) -> Vec<String> {
        let outgoing = self.tokens(response_headers);

        if event.event_id().is_none() {
            let ids: Vec<&str> = incoming
                .iter()
                .chain(outgoing.iter())
                .map(String::as_str)
                .collect();
            if !ids.is_empty() {
                event.set_event_id(ids.join(TOKEN_DELIMITER));
            }
        }

        outgoing
    }

    fn tokens(&self, headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(self.header)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }
}
