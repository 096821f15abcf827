//! Request-scoped logging handle.
//!
//! One [`RequestScope`] is created per inbound call and passed by reference down the whole
//! call chain. Events are emitted with the scope's span as their explicit parent, so every
//! line logged on behalf of a request carries its id and operation name.

use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestScope {
    request_id: Uuid,
    operation: &'static str,
    span: Span,
}

impl RequestScope {
    /// Starts a scope with a freshly generated request id.
    pub fn new(operation: &'static str) -> Self {
        Self::with_id(operation, Uuid::new_v4())
    }

    /// Starts a scope for a request id that was assigned upstream (e.g. by the gateway).
    pub fn with_id(operation: &'static str, request_id: Uuid) -> Self {
        let span = tracing::info_span!("request", %request_id, operation);
        Self {
            request_id,
            operation,
            span,
        }
    }

    /// Parses an upstream id, falling back to a fresh one when absent or malformed.
    pub fn from_header(operation: &'static str, header: Option<&str>) -> Self {
        match header.and_then(|h| Uuid::parse_str(h.trim()).ok()) {
            Some(id) => Self::with_id(operation, id),
            None => Self::new(operation),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
