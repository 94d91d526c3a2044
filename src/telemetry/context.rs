//! Request-scoped handle shared between the middleware and handlers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};

use crate::telemetry::event::FieldValue;

#[derive(Debug, Default)]
struct Annotations {
    errors: Vec<String>,
    event_id: Option<String>,
    fields: Vec<(String, FieldValue)>,
}

/// Per-request annotations collected while the handler chain runs.
///
/// Inserted into the request extensions before downstream execution.
/// Clones share state, but no state is shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    operation: Arc<str>,
    start_time: DateTime<Utc>,
    inner: Arc<Mutex<Annotations>>,
}

/// Snapshot taken by the middleware once the chain has returned.
#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub errors: Vec<String>,
    pub event_id: Option<String>,
    pub fields: Vec<(String, FieldValue)>,
}

impl RequestContext {
    pub(crate) fn new(operation: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            operation: Arc::from(operation),
            start_time,
            inner: Arc::new(Mutex::new(Annotations::default())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Annotations> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `METHOD-PATH` of the current request.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Record an error cause against the current request.
    pub fn record_error(&self, cause: impl ToString) {
        self.guard().errors.push(cause.to_string());
    }

    pub fn errors(&self) -> Vec<String> {
        self.guard().errors.clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.guard().errors.is_empty()
    }

    /// Assign the event identifier; takes precedence over correlation tokens.
    pub fn set_event_id(&self, id: impl Into<String>) {
        self.guard().event_id = Some(id.into());
    }

    /// Attach an ad-hoc field, written after the standard fields.
    pub fn add_field(&self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.guard().fields.push((name.into(), value.into()));
    }

    pub(crate) fn collect(&self) -> Collected {
        let mut guard = self.guard();
        Collected {
            errors: std::mem::take(&mut guard.errors),
            event_id: guard.event_id.take(),
            fields: std::mem::take(&mut guard.fields),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Request telemetry middleware not installed",
        ))
    }
}
