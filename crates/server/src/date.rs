//! Date response header management.
//!
//! Formats the RFC 7231 date string once every 700ms in a background task
//! instead of on every response, and hands out the cached value.

use arc_swap::ArcSwap;
use httpdate::fmt_http_date;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub(crate) struct DateService {
    current: Arc<ArcSwap<String>>,
    handle: tokio::task::JoinHandle<()>,
}

impl DateService {
    /// Starts the refresh task; must run inside a tokio runtime.
    pub(crate) fn new() -> Self {
        let current = Arc::new(ArcSwap::new(Arc::new(fmt_http_date(SystemTime::now()))));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(700)).await;
                current_arc.store(Arc::new(fmt_http_date(SystemTime::now())));
            }
        });

        DateService { current, handle }
    }

    pub(crate) fn http_date(&self) -> Arc<String> {
        self.current.load_full()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_an_rfc7231_shaped_date() {
        let service = DateService::new();
        let date = service.http_date();
        // e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
        assert!(date.ends_with("GMT"));
        assert_eq!(date.matches(':').count(), 2);
    }
}
