//! The handler-method callable and its function adapter.
//!
//! A [`MethodEntry`](crate::registry::MethodEntry) owns one boxed
//! [`MethodHandler`]. [`handler_fn`] adapts a plain async function taking
//! the request and its bound arguments, normalizing whatever the function
//! returns through [`Reply`].

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::binder::Args;
use crate::error::CallError;
use crate::request::Request;
use crate::response::{Reply, Response};

/// One callable handler method. The pipeline suspends only here: the body
/// may perform arbitrary async I/O.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn invoke(&self, req: Arc<Request>, args: Args) -> Result<Response, CallError>;
}

/// Holder adapting an async fn into a [`MethodHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Adapts `async fn(Arc<Request>, Args) -> Result<impl Reply, CallError>`
/// into a [`MethodHandler`].
pub fn handler_fn<F, Fut, R>(f: F) -> FnHandler<F>
where
    F: Fn(Arc<Request>, Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, CallError>> + Send,
    R: Reply,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut, R> MethodHandler for FnHandler<F>
where
    F: Fn(Arc<Request>, Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, CallError>> + Send,
    R: Reply,
{
    async fn invoke(&self, req: Arc<Request>, args: Args) -> Result<Response, CallError> {
        let reply = (self.f)(Arc::clone(&req), args).await?;
        Ok(reply.into_response(&req))
    }
}

/// A declared-but-unimplemented handler: answers 501 for a verb the class
/// recognizes and intends to support eventually.
pub fn unimplemented_handler() -> impl MethodHandler {
    handler_fn(|req: Arc<Request>, _args| async move {
        Err::<Response, _>(CallError::VerbNotImplemented { verb: req.method().clone() })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn request() -> Arc<Request> {
        Arc::new(Request::builder().path("/").build())
    }

    #[tokio::test]
    async fn fn_handler_normalizes_the_return_value() {
        let handler = handler_fn(|_req, _args| async { Ok::<_, CallError>("hello") });
        let response = handler.invoke(request(), Args::default()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().unwrap().as_ref(), b"\"hello\"");
    }

    #[tokio::test]
    async fn fn_handler_propagates_call_errors() {
        let handler =
            handler_fn(|_req, _args| async { Err::<Response, _>(CallError::missing_parameter("p")) });
        let err = handler.invoke(request(), Args::default()).await.unwrap_err();
        assert!(matches!(err, CallError::MissingParameter { .. }));
    }

    #[tokio::test]
    async fn unimplemented_answers_501() {
        let handler = unimplemented_handler();
        let err = handler.invoke(request(), Args::default()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn handlers_see_bound_args() {
        let handler = handler_fn(|_req, args: Args| async move {
            Ok::<_, CallError>(args.pos_str(0).unwrap_or("missing").to_owned())
        });

        // what the binder produces for one path argument
        let schema = crate::binder::ParamSchema::new().positional(crate::binder::ParamSpec::text("x"));
        let args = crate::binder::bind(&schema, &["bar".to_owned()], &crate::request::Params::new()).unwrap();

        let response = handler.invoke(request(), args).await.unwrap();
        assert_eq!(response.body().unwrap().as_ref(), b"\"bar\"");
    }
}
