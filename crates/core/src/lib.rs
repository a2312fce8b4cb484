//! Convention-based HTTP request dispatch.
//!
//! No route table is ever declared. An incoming path is resolved against a
//! namespace tree built once at startup: path segments descend through
//! [`registry::HandlerGroup`]s, the next segment (capitalization-normalized)
//! selects a [`registry::HandlerClass`] — or its `Default` fallback — and
//! whatever remains becomes positional arguments for the selected method:
//!
//! ```text
//! GET /                 -> app.Default.GET()
//! GET /foo              -> app.Foo.GET()
//! POST /foo/bar         -> app.Foo.POST("bar")
//! GET /foo/bar?baz=che  -> app.Foo.GET("bar", baz="che")
//! ```
//!
//! The method is further narrowed by the Accept header's `version`
//! parameter, wrapped by an ordered middleware chain (auth, rate limiting,
//! routing predicates, CORS), and its declared parameter schema is bound
//! from the path remainder and the merged query/body data with per-kind
//! failure reporting: every way a call can fail maps to one distinct
//! [`error::CallError`] variant and one HTTP status.
//!
//! # Example
//!
//! ```
//! use waypoint_core::binder::ParamSpec;
//! use waypoint_core::error::CallError;
//! use waypoint_core::handler::handler_fn;
//! use waypoint_core::registry::{DEFAULT_CLASS, HandlerClass, HandlerGroup, Registry, get};
//! use waypoint_core::{Dispatcher, Request};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::builder()
//!     .root(
//!         HandlerGroup::builder("app")
//!             .class(
//!                 HandlerClass::builder(DEFAULT_CLASS)
//!                     .method(get(handler_fn(|_req, _args| async {
//!                         Ok::<_, CallError>("hello world")
//!                     })))
//!                     .build()?,
//!             )
//!             .class(
//!                 HandlerClass::builder("Echo")
//!                     .method(
//!                         get(handler_fn(|_req, args: waypoint_core::binder::Args| async move {
//!                             Ok::<_, CallError>(args.pos_str(0).unwrap_or_default().to_owned())
//!                         }))
//!                         .path_param(ParamSpec::text("word")),
//!                     )
//!                     .build()?,
//!             )
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let dispatcher = Dispatcher::new(registry);
//! let response = dispatcher.dispatch(Request::builder().path("/echo/hi").build()).await;
//! assert_eq!(response.body().unwrap().as_ref(), b"\"hi\"");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`registry`]: the immutable namespace tree and its builders
//! - [`resolver`]: path-segment walk to a handler class
//! - [`version`]: Accept-header parsing and method selection
//! - [`middleware`]: the onion chain and the built-in wrappers
//! - [`binder`]: parameter schemas, coercion and validation
//! - [`call`]: the per-request state machine
//! - [`request`] / [`response`]: the canonical transport-facing types
//! - [`error`]: the failure taxonomy
//! - [`config`]: environment-supplied root ordering

pub mod binder;
pub mod call;
pub mod config;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod response;
pub mod version;

pub use binder::Args;
pub use call::{Call, CallState, Dispatcher};
pub use config::Config;
pub use error::CallError;
pub use handler::handler_fn;
pub use registry::Registry;
pub use request::{Params, Request};
pub use response::{Reply, Response};
