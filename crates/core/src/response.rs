//! Response model and handler return-value normalization.
//!
//! Handlers return plain values; the [`Reply`] trait converts them into a
//! [`Response`] (status, headers, body). The success default is a JSON body
//! with an implicit 200; an empty result becomes 204 with no Content-Type,
//! mirroring how clients expect a no-content reply to look.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::request::Request;

/// A post-response continuation: work scheduled to run after the response
/// has been flushed to the client. Experimental two-phase contract; adapters
/// that cannot support it drop the continuation with a warning.
pub type Deferred = Pin<Box<dyn Future<Output = ()> + Send + Sync + 'static>>;

/// The response produced by one dispatch: exactly one per call.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
    deferred: Option<Deferred>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("deferred", &self.deferred.is_some())
            .finish()
    }
}

impl Response {
    /// An empty response with the given status and no Content-Type.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: None, deferred: None }
    }

    /// A 200 response carrying `value` serialized as JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::json_with_status(StatusCode::OK, value)
    }

    pub fn json_with_status(status: StatusCode, value: &serde_json::Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        let mut response = Self::empty(status);
        response.insert_header(http::header::CONTENT_TYPE.as_str(), mime::APPLICATION_JSON.as_ref());
        response.body = Some(Bytes::from(body));
        response
    }

    /// A 200 plain-text response, for handlers that opt out of JSON.
    pub fn text(text: impl Into<String>) -> Self {
        let mut response = Self::empty(StatusCode::OK);
        response.insert_header(http::header::CONTENT_TYPE.as_str(), mime::TEXT_PLAIN_UTF_8.as_ref());
        response.body = Some(Bytes::from(text.into()));
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Inserts a header, replacing any previous value; silently drops
    /// invalid names or values.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) =
            (name.parse::<http::header::HeaderName>(), value.parse::<http::header::HeaderValue>())
        {
            self.headers.insert(name, value);
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    /// Attaches a continuation to run after the response is flushed.
    pub fn with_deferred<F>(mut self, deferred: F) -> Self
    where
        F: Future<Output = ()> + Send + Sync + 'static,
    {
        self.deferred = Some(Box::pin(deferred));
        self
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// Detaches the continuation, if any; called by the adapter after flush.
    pub fn take_deferred(&mut self) -> Option<Deferred> {
        self.deferred.take()
    }

    /// The 204 invariant: a no-content response carries neither a body nor
    /// a Content-Type header, whatever produced it.
    pub(crate) fn enforce_no_content(&mut self) {
        if self.status == StatusCode::NO_CONTENT {
            self.headers.remove(http::header::CONTENT_TYPE);
            self.body = None;
        }
    }
}

/// Converts handler return values into HTTP responses.
///
/// Implemented for the value shapes handlers are expected to return; a
/// pre-built [`Response`] passes through untouched.
pub trait Reply {
    fn into_response(self, req: &Request) -> Response;
}

impl Reply for Response {
    fn into_response(self, _req: &Request) -> Response {
        self
    }
}

impl Reply for serde_json::Value {
    fn into_response(self, _req: &Request) -> Response {
        match self {
            serde_json::Value::Null => Response::empty(StatusCode::NO_CONTENT),
            value => Response::json(&value),
        }
    }
}

impl Reply for String {
    fn into_response(self, _req: &Request) -> Response {
        Response::json(&serde_json::Value::String(self))
    }
}

impl Reply for &'static str {
    fn into_response(self, _req: &Request) -> Response {
        Response::json(&serde_json::Value::String(self.to_owned()))
    }
}

/// A unit result is "done, nothing to say": 204.
impl Reply for () {
    fn into_response(self, _req: &Request) -> Response {
        Response::empty(StatusCode::NO_CONTENT)
    }
}

impl<T: Reply> Reply for Option<T> {
    fn into_response(self, req: &Request) -> Response {
        match self {
            Some(value) => value.into_response(req),
            None => Response::empty(StatusCode::NO_CONTENT),
        }
    }
}

impl<T: Reply> Reply for (StatusCode, T) {
    fn into_response(self, req: &Request) -> Response {
        let (status, value) = self;
        let mut response = value.into_response(req);
        response.set_status(status);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> Request {
        Request::builder().path("/").build()
    }

    #[test]
    fn string_reply_is_json_encoded() {
        let response = "root".into_response(&req());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().unwrap().as_ref(), b"\"root\"");
        assert_eq!(response.headers().get(http::header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn unit_reply_is_no_content() {
        let response = ().into_response(&req());
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_none());
    }

    #[test]
    fn none_reply_is_no_content() {
        let response = Option::<String>::None.into_response(&req());
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn status_tuple_overrides_implicit_status() {
        let response = (StatusCode::CREATED, "made").into_response(&req());
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body().unwrap().as_ref(), b"\"made\"");
    }

    #[test]
    fn no_content_strips_content_type() {
        let mut response = Response::json(&serde_json::json!({"a": 1}));
        response.set_status(StatusCode::NO_CONTENT);
        response.enforce_no_content();
        assert!(response.headers().get(http::header::CONTENT_TYPE).is_none());
        assert!(response.body().is_none());
    }

    #[tokio::test]
    async fn deferred_detaches_and_runs() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let flag = Arc::new(AtomicBool::new(false));
        let flagged = Arc::clone(&flag);

        let mut response = Response::empty(StatusCode::OK).with_deferred(async move {
            flagged.store(true, Ordering::SeqCst);
        });

        assert!(response.has_deferred());
        response.take_deferred().unwrap().await;
        assert!(flag.load(Ordering::SeqCst));
        assert!(!response.has_deferred());
    }
}
