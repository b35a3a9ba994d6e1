//! Request-scoped context and the process-wide application span.
//!
//! The HTTP layer scopes a [`RequestContext`] around each request; anything
//! running inside that task (handlers, the pipeline) can read it back without
//! threading ids through every call.

use std::future::Future;
use std::sync::Arc;

use tracing::Span;

use crate::init::build_sha;

/// Identifiers of the request the current task is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: Arc<str>,
    route: Arc<str>,
}

impl RequestContext {
    /// Context for `request_id` on the matched `route`.
    #[must_use]
    pub fn new(request_id: impl Into<Arc<str>>, route: impl Into<Arc<str>>) -> Self {
        Self {
            request_id: request_id.into(),
            route: route.into(),
        }
    }

    /// Value of the request's `x-request-id`.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Matched route template.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }
}

tokio::task_local! {
    static ACTIVE_REQUEST: RequestContext;
}

/// Run `fut` with `context` visible to [`current_request`].
pub async fn with_request_context<Fut, T>(context: RequestContext, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    ACTIVE_REQUEST.scope(context, fut).await
}

/// Context of the request the current task is serving, if any.
#[must_use]
pub fn current_request() -> Option<RequestContext> {
    ACTIVE_REQUEST.try_with(Clone::clone).ok()
}

/// Root span for a long-running service; instrument the top-level future with it.
#[must_use]
pub fn app_span(service: &str) -> Span {
    tracing::info_span!("app", service = %service, build_sha = %build_sha())
}
