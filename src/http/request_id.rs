//! Request-id assignment stage.
//!
//! # Responsibilities
//! - Mint a UUID v4 `x-request-id` when the client sent none
//! - Copy the request id onto the response
//!
//! # Design Decisions
//! - Installed downstream of the telemetry stage, so events see the
//!   client's tokens as incoming and the assigned id as outgoing
//! - Client-supplied ids are kept, never replaced

use axum::http::{HeaderName, HeaderValue, Request};
use axum::Router;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use uuid::Uuid;

use crate::telemetry::X_REQUEST_ID;

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MintRequestId;

impl MakeRequestId for MintRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Extension trait for `axum::`[`Router`] to assign and echo request ids.
pub trait RouterRequestIdExt<S> {
    /// Layers [`SetRequestIdLayer`] and [`PropagateRequestIdLayer`] on `x-request-id`.
    fn with_request_id(self) -> Self;
}

impl<S> RouterRequestIdExt<S> for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_request_id(self) -> Self {
        // Last layer wraps first: the id is set before it is propagated.
        self.layer(PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID)))
            .layer(SetRequestIdLayer::new(
                HeaderName::from_static(X_REQUEST_ID),
                MintRequestId,
            ))
    }
}
