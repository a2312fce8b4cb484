//! Per-request orchestration.
//!
//! One [`Call`] exists per inbound request and drives it through the
//! pipeline: resolve the class, select the version-qualified candidates,
//! run the middleware chain, bind parameters, invoke the handler, normalize
//! the outcome. Transitions are strictly sequential; any failure is
//! terminal and produces the response mapped by the error taxonomy.
//! Exactly one response leaves a call.
//!
//! Calls share nothing mutable: the only process-wide state is the
//! [`Registry`] behind an `Arc`, which is read-only after startup. A call
//! may suspend only while a handler or a middleware layer awaits I/O;
//! dropping the future cancels the call cooperatively.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use http::StatusCode;

use crate::binder::bind;
use crate::error::CallError;
use crate::middleware::{Flow, cors};
use crate::registry::Registry;
use crate::request::Request;
use crate::resolver::{Resolution, resolve};
use crate::response::Response;
use crate::version;

/// Where a call currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Created,
    Resolving,
    VersionSelecting,
    Authorizing,
    Binding,
    Invoking,
    Normalizing,
    Done,
    Failed(StatusCode),
}

/// The process-wide entry point: holds the shared registry and runs one
/// [`Call`] per request. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handles one canonical request to completion.
    pub async fn dispatch(&self, request: Request) -> Response {
        let mut call = Call::new(Arc::clone(&self.registry), request);
        call.handle().await
    }
}

/// One request's trip through the pipeline. Transient; never shared across
/// requests.
#[derive(Debug)]
pub struct Call {
    registry: Arc<Registry>,
    request: Arc<Request>,
    state: CallState,
    started: Instant,
}

impl Call {
    pub fn new(registry: Arc<Registry>, request: Request) -> Self {
        Self { registry, request: Arc::new(request), state: CallState::Created, started: Instant::now() }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Runs the pipeline to completion and produces the one response.
    pub async fn handle(&mut self) -> Response {
        if self.state != CallState::Created {
            return CallError::unexpected("call handled twice").into_response();
        }

        info!(method = %self.request.method(), path = %self.request.path(), "REQUEST");

        let registry = Arc::clone(&self.registry);
        self.state = CallState::Resolving;

        let response = match resolve(&registry, self.request.segments()) {
            Ok(resolution) => {
                let cors_enabled = resolution.class.cors();
                let mut response = match self.pipeline(&resolution).await {
                    Ok(response) => {
                        self.state = CallState::Done;
                        response
                    }
                    Err(err) => self.fail(err),
                };
                // common CORS headers apply to everything the class
                // produced, failures included
                if cors_enabled {
                    cors::apply_common_headers(&self.request, &mut response);
                }
                response
            }
            Err(err) => self.fail(err),
        };

        info!(
            status = %response.status(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "RESPONSE"
        );
        response
    }

    fn fail(&mut self, err: CallError) -> Response {
        self.state = CallState::Failed(err.status());
        warn!(%err, "call failed");
        err.into_response()
    }

    async fn pipeline(&mut self, resolution: &Resolution<'_>) -> Result<Response, CallError> {
        let class = resolution.class;
        let verb = self.request.method().clone();

        self.state = CallState::VersionSelecting;
        let tag = self.request.version(class.content_type());
        let candidates = version::select(class, &verb, tag.as_deref())?;

        self.state = CallState::Authorizing;
        let merged = self.request.merged_params()?;

        'candidates: for entry in candidates {
            let mut kwargs = merged.clone();

            for (index, layer) in entry.chain().iter().enumerate() {
                match layer.before(&self.request, &mut kwargs).await? {
                    Flow::Continue => {}
                    Flow::Skip => {
                        debug!(verb = %verb, "candidate declined by routing predicate");
                        continue 'candidates;
                    }
                    Flow::Respond(response) => {
                        self.state = CallState::Normalizing;
                        return Ok(self.unwind(&entry.chain()[..=index], response).await);
                    }
                }
            }

            self.state = CallState::Binding;
            let args = bind(entry.schema(), &resolution.remainder, &kwargs)?;

            self.state = CallState::Invoking;
            let result = entry.handler().invoke(Arc::clone(&self.request), args).await;

            self.state = CallState::Normalizing;
            let response = result?;
            return Ok(self.unwind(entry.chain(), response).await);
        }

        // every candidate's routing predicate declined
        Err(CallError::verb_not_allowed(verb, class.name()))
    }

    /// Runs the `after` hooks of the layers whose `before` ran, in reverse
    /// declaration order (onion unwinding), then enforces the 204 rule.
    async fn unwind(
        &self,
        ran: &[Arc<dyn crate::middleware::Middleware>],
        mut response: Response,
    ) -> Response {
        for layer in ran.iter().rev() {
            response = layer.after(&self.request, response).await;
        }
        response.enforce_no_content();
        response
    }
}
