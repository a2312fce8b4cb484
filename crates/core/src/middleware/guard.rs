//! Routing predicates: conditionally claim or decline a request.
//!
//! A guard that declines produces [`Flow::Skip`], which sends the call to
//! the next candidate method for the same verb (or 405 when none is left).
//! Guards must be pure predicates over the request; they run again for
//! nothing — skipping is not an error and must leave no trace.

use async_trait::async_trait;

use crate::error::CallError;
use crate::middleware::{Flow, Middleware};
use crate::request::{Params, Request};

/// A middleware wrapping a routing predicate closure.
pub struct RouteGuard<F> {
    predicate: F,
}

/// Creates a routing predicate from a closure.
///
/// ```
/// use waypoint_core::middleware::guard_fn;
///
/// let mobile_only = guard_fn(|req| {
///     req.header("user-agent").is_some_and(|ua| ua.contains("Mobile"))
/// });
/// ```
pub fn guard_fn<F>(predicate: F) -> RouteGuard<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    RouteGuard { predicate }
}

#[async_trait]
impl<F> Middleware for RouteGuard<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    async fn before(&self, req: &Request, _kwargs: &mut Params) -> Result<Flow, CallError> {
        if (self.predicate)(req) { Ok(Flow::Continue) } else { Ok(Flow::Skip) }
    }

    fn is_guard(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_predicate_continues() {
        let guard = guard_fn(|req| req.header("x-flavor") == Some("mobile"));
        let req = Request::builder().path("/").header("x-flavor", "mobile").build();
        let flow = guard.before(&req, &mut Params::new()).await.unwrap();
        assert!(matches!(flow, Flow::Continue));
    }

    #[tokio::test]
    async fn failing_predicate_skips() {
        let guard = guard_fn(|req| req.header("x-flavor") == Some("mobile"));
        let req = Request::builder().path("/").build();
        let flow = guard.before(&req, &mut Params::new()).await.unwrap();
        assert!(matches!(flow, Flow::Skip));
        assert!(guard.is_guard());
    }
}
