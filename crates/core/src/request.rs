//! The canonical request model consumed by the dispatch pipeline.
//!
//! Transport adapters translate their native request representation into a
//! [`Request`] before dispatch: the verb, the normalized path segments, the
//! query multimap, the headers and the raw body. The body is parsed into
//! key-value form lazily, at most once, when the binder (or a handler) first
//! asks for it.

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use mime::Mime;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::RwLock;
use tracing::warn;

use crate::error::CallError;
use crate::version::AcceptHeader;

/// An ordered key-value multimap for query and body parameters.
///
/// Insertion order is preserved, including repeated keys, so list-shaped
/// parameters (`tag=a&tag=b`) keep their wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    items: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.items.iter().filter(|(k, _)| k == name).map(|(_, v)| v.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|(k, _)| k == name)
    }

    /// Appends a value, keeping any existing values for the same key.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.items.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.items.retain(|(k, _)| *k != name);
        self.items.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.items.retain(|(k, _)| k != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Distinct key names, first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (k, _) in &self.items {
            if !keys.contains(&k.as_str()) {
                keys.push(k);
            }
        }
        keys
    }

    /// Merges `overlay` over `self`: keys present in `overlay` replace all
    /// of this map's values for that key, everything else is kept as-is.
    ///
    /// This is the POST-over-GET precedence rule: body values override
    /// same-named query values.
    pub fn overridden_by(&self, overlay: &Params) -> Params {
        let mut merged = Params::new();
        for (k, v) in self.iter() {
            if !overlay.contains(k) {
                merged.append(k, v);
            }
        }
        for (k, v) in overlay.iter() {
            merged.append(k, v);
        }
        merged
    }
}

impl From<Vec<(String, String)>> for Params {
    fn from(items: Vec<(String, String)>) -> Self {
        Self { items }
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// The canonical request: one per inbound call, dropped once the response
/// is produced.
///
/// Immutable except for the [`extensions`](Request::extension) slot, which
/// middleware may use to stash derived state (an authenticated identity,
/// a tenant id) for later layers and the target method.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    segments: Vec<String>,
    query: Params,
    headers: HeaderMap,
    body: Bytes,
    content_type: Option<Mime>,
    body_params: OnceCell<Params>,
    extensions: RwLock<Extensions>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The normalized path: no empty segments, no trailing-slash
    /// significance.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn query(&self) -> &Params {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string, `None` when absent or not valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// The body parsed into key-value form, at most once.
    ///
    /// `application/x-www-form-urlencoded` bodies parse pairwise; JSON
    /// object bodies flatten scalars to their string form, arrays to
    /// repeated keys and nested objects to JSON strings. An empty body
    /// yields an empty map.
    pub fn body_params(&self) -> Result<&Params, CallError> {
        self.body_params.get_or_try_init(|| parse_body(&self.body, self.content_type.as_ref()))
    }

    /// Query and body parameters merged, body values winning on collision.
    pub fn merged_params(&self) -> Result<Params, CallError> {
        Ok(self.query.overridden_by(self.body_params()?))
    }

    /// The version tag carried by the Accept header for `content_type`,
    /// e.g. `Accept: application/json;version=v2` yields `Some("v2")`.
    pub fn version(&self, content_type: &Mime) -> Option<String> {
        let accept = AcceptHeader::parse(self.header("accept")?);
        accept.version_for(content_type)
    }

    /// Stashes a derived value in the request's mutable extension slot.
    pub fn insert_extension<T: Clone + Send + Sync + 'static>(&self, value: T) {
        if let Ok(mut guard) = self.extensions.write() {
            guard.insert(value);
        }
    }

    /// Retrieves a previously stashed extension value.
    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions.read().ok().and_then(|guard| guard.get::<T>().cloned())
    }
}

/// The adapter boundary for `http`-typed transports: any server that speaks
/// `http::Request` canonicalizes through this conversion.
impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        from_parts(parts.method, &parts.uri, parts.headers, body)
    }
}

fn from_parts(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Request {
    let segments = split_segments(uri.path());
    let path = format!("/{}", segments.join("/"));
    let query = uri.query().map(parse_query).unwrap_or_default();
    let content_type =
        headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<Mime>().ok());

    Request {
        method,
        path,
        segments,
        query,
        headers,
        body,
        content_type,
        body_params: OnceCell::new(),
        extensions: RwLock::new(Extensions::new()),
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

fn parse_query(query: &str) -> Params {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(items) => Params::from(items),
        Err(e) => {
            warn!(cause = %e, "discarding unparseable query string");
            Params::new()
        }
    }
}

fn parse_body(body: &Bytes, content_type: Option<&Mime>) -> Result<Params, CallError> {
    if body.is_empty() {
        return Ok(Params::new());
    }

    match content_type {
        Some(mime) if mime.type_() == mime::APPLICATION && mime.subtype() == mime::JSON => {
            let value: serde_json::Value =
                serde_json::from_slice(body).map_err(|e| CallError::malformed_body(e.to_string()))?;
            let object = value
                .as_object()
                .ok_or_else(|| CallError::malformed_body("json body must be an object"))?;

            let mut params = Params::new();
            for (key, value) in object {
                match value {
                    serde_json::Value::Array(items) => {
                        for item in items {
                            params.append(key.as_str(), scalar_to_string(item));
                        }
                    }
                    other => params.append(key.as_str(), scalar_to_string(other)),
                }
            }
            Ok(params)
        }

        // form-urlencoded is the default body shape when nothing is declared
        _ => serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
            .map(Params::from)
            .map_err(|e| CallError::malformed_body(e.to_string())),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds a [`Request`] by hand; used by adapters without `http::Request`
/// values and throughout the test suites.
pub struct RequestBuilder {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("path_and_query", &self.path_and_query)
            .finish()
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    fn new() -> Self {
        Self { method: Method::GET, path_and_query: "/".to_owned(), headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Path with optional query string, e.g. `/foo/bar?baz=1`.
    pub fn path(mut self, path_and_query: impl Into<String>) -> Self {
        self.path_and_query = path_and_query.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (name.parse::<http::header::HeaderName>(), value.parse::<http::header::HeaderValue>())
        {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Form-urlencoded body with the matching content type.
    pub fn form(self, pairs: &[(&str, &str)]) -> Self {
        let encoded = serde_urlencoded::to_string(pairs).unwrap_or_default();
        self.header("content-type", mime::APPLICATION_WWW_FORM_URLENCODED.as_ref()).body(encoded)
    }

    /// JSON body with the matching content type.
    pub fn json(self, value: &serde_json::Value) -> Self {
        let encoded = serde_json::to_vec(value).unwrap_or_default();
        self.header("content-type", mime::APPLICATION_JSON.as_ref()).body(encoded)
    }

    pub fn build(self) -> Request {
        let uri: Uri = self.path_and_query.parse().unwrap_or_else(|_| Uri::from_static("/"));
        from_parts(self.method, &uri, self.headers, self.body)
    }
}
