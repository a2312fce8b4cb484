//! CORS support: common headers on every response of a CORS-enabled class,
//! plus the synthesized OPTIONS preflight method.
//!
//! A CORS-enabled [`HandlerClass`](crate::registry::HandlerClass) that does
//! not declare its own OPTIONS method gets one synthesized at registry
//! build time. Its schema accepts any path remainder and any keywords, so a
//! preflight never trips over the parameters of the method the browser
//! actually wants to call.

use async_trait::async_trait;
use http::StatusCode;
use serde_json::json;
use std::sync::Arc;

use crate::binder::{Args, ParamSchema};
use crate::error::CallError;
use crate::handler::handler_fn;
use crate::middleware::Middleware;
use crate::registry::{BuildError, MethodEntry, options};
use crate::request::Request;
use crate::response::Response;

/// Mirrors the request's Origin into Access-Control-Allow-Origin, the
/// common-header half of CORS. Applied to every response of a CORS-enabled
/// class, success or failure.
pub fn apply_common_headers(req: &Request, response: &mut Response) {
    if let Some(origin) = req.header("origin") {
        response.insert_header("access-control-allow-origin", origin);
    }
}

/// The same common-header behavior as a standalone middleware, for methods
/// on classes that opted out of class-wide CORS.
#[derive(Debug, Clone, Copy)]
pub struct CorsHeaders;

#[async_trait]
impl Middleware for CorsHeaders {
    async fn after(&self, req: &Request, mut response: Response) -> Response {
        apply_common_headers(req, &mut response);
        response
    }
}

/// Builds the synthesized preflight entry.
pub(crate) fn preflight_entry() -> Result<MethodEntry, BuildError> {
    options(handler_fn(preflight)).schema(ParamSchema::new().variadic().open_keywords()).build()
}

async fn preflight(req: Arc<Request>, _args: Args) -> Result<Response, CallError> {
    let bad_request =
        |message: &str| CallError::stop(StatusCode::BAD_REQUEST, Some(json!({"error": message})));

    if req.header("origin").is_none() {
        return Err(bad_request("Need Origin header"));
    }

    let mirrored = [
        ("access-control-request-headers", "access-control-allow-headers"),
        ("access-control-request-method", "access-control-allow-methods"),
    ];

    let mut response = Response::empty(StatusCode::OK);
    for (req_header, res_header) in mirrored {
        match req.header(req_header) {
            Some(value) => response.insert_header(res_header, value),
            None => return Err(bad_request(&format!("Need {req_header} header"))),
        }
    }

    response.insert_header("access-control-allow-credentials", "true");
    response.insert_header("access-control-max-age", "3600");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn preflight_request() -> Arc<Request> {
        Arc::new(
            Request::builder()
                .method(Method::OPTIONS)
                .path("/foo")
                .header("origin", "https://example.com")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "content-type")
                .build(),
        )
    }

    #[tokio::test]
    async fn preflight_mirrors_the_requested_headers() {
        let response = preflight(preflight_request(), Args::default()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("access-control-allow-methods").unwrap(), "POST");
        assert_eq!(response.headers().get("access-control-allow-headers").unwrap(), "content-type");
        assert_eq!(response.headers().get("access-control-allow-credentials").unwrap(), "true");
        assert_eq!(response.headers().get("access-control-max-age").unwrap(), "3600");
    }

    #[tokio::test]
    async fn preflight_requires_an_origin() {
        let req = Arc::new(Request::builder().method(Method::OPTIONS).path("/foo").build());
        let err = preflight(req, Args::default()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preflight_requires_the_request_method_header() {
        let req = Arc::new(
            Request::builder()
                .method(Method::OPTIONS)
                .path("/foo")
                .header("origin", "https://example.com")
                .header("access-control-request-headers", "content-type")
                .build(),
        );
        let err = preflight(req, Args::default()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn common_headers_mirror_the_origin() {
        let req = Request::builder().path("/").header("origin", "https://example.com").build();
        let mut response = Response::empty(StatusCode::OK);
        apply_common_headers(&req, &mut response);
        assert_eq!(response.headers().get("access-control-allow-origin").unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn no_origin_means_no_cors_headers() {
        let req = Request::builder().path("/").build();
        let mut response = Response::empty(StatusCode::OK);
        apply_common_headers(&req, &mut response);
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
