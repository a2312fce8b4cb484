//! Composable wrappers around a handler method invocation.
//!
//! A [`MethodEntry`](crate::registry::MethodEntry) carries an ordered chain
//! of middleware. Composition is onion-shaped: the first-declared wrapper's
//! [`before`](Middleware::before) runs first and its
//! [`after`](Middleware::after) runs last. A wrapper may reject the call
//! with a [`CallError`], declare the method not-a-match with
//! [`Flow::Skip`] (candidate fallthrough), short-circuit with a complete
//! response via [`Flow::Respond`], or inject derived keyword parameters
//! into the binder input.
//!
//! ## Thread safety and side effects
//!
//! Middleware must be `Send + Sync`; one chain instance serves every
//! concurrent call to its method. `before`/`after` for a single call run
//! strictly in chain order and are never interleaved with other middleware
//! of the same call. A wrapper that performs an external side effect before
//! rejecting with `Skip` must make that effect idempotent: a sibling
//! candidate method may be tried next and will run the same chain prefix
//! again.

mod auth;
mod cache;
pub mod cors;
mod guard;
mod rate_limit;

pub use auth::{Auth, Authenticate, Credentials, Identity, authenticate_fn};
pub use cache::{HttpCache, NoHttpCache, http_cache, no_http_cache};
pub use guard::{RouteGuard, guard_fn};
pub use rate_limit::RateLimit;

use async_trait::async_trait;

use crate::error::CallError;
use crate::request::{Params, Request};
use crate::response::Response;

/// What a `before` hook decided.
#[derive(Debug)]
pub enum Flow {
    /// Proceed to the next layer (and eventually the handler).
    Continue,
    /// This method does not handle this request; try the next candidate.
    Skip,
    /// A complete response; the target method never runs.
    Respond(Response),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Runs before parameter binding. `kwargs` is the merged query/body
    /// data about to be bound; layers may inject derived values into it.
    async fn before(&self, _req: &Request, _kwargs: &mut Params) -> Result<Flow, CallError> {
        Ok(Flow::Continue)
    }

    /// Runs after the handler (or a short-circuiting layer) produced a
    /// response, in reverse declaration order.
    async fn after(&self, _req: &Request, response: Response) -> Response {
        response
    }

    /// Whether this layer is a routing predicate. Guarded entries are
    /// allowed to share a version tag; unguarded ones are not.
    fn is_guard(&self) -> bool {
        false
    }
}
