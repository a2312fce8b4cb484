//! Client-side cache header middleware.

use async_trait::async_trait;

use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;

/// Marks responses cacheable for `ttl` seconds.
pub fn http_cache(ttl: u64) -> HttpCache {
    HttpCache { ttl }
}

/// Marks responses as never cacheable.
pub fn no_http_cache() -> NoHttpCache {
    NoHttpCache
}

#[derive(Debug, Clone, Copy)]
pub struct HttpCache {
    ttl: u64,
}

#[async_trait]
impl Middleware for HttpCache {
    async fn after(&self, _req: &Request, mut response: Response) -> Response {
        response.insert_header(http::header::CACHE_CONTROL.as_str(), &format!("max-age={}", self.ttl));
        response
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoHttpCache;

#[async_trait]
impl Middleware for NoHttpCache {
    async fn after(&self, _req: &Request, mut response: Response) -> Response {
        response.insert_header(http::header::CACHE_CONTROL.as_str(), "no-cache, no-store, must-revalidate");
        response.insert_header(http::header::PRAGMA.as_str(), "no-cache");
        response.insert_header(http::header::EXPIRES.as_str(), "0");
        response
    }
}
