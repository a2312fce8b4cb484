//! The blocking-family transport adapter: a small tokio TCP server that
//! feeds the waypoint dispatch pipeline.
//!
//! This crate owns everything the core deliberately does not: accepting
//! sockets, parsing HTTP/1.1 wire format, canonicalizing into
//! [`waypoint_core::Request`], and writing the response back. Event-loop
//! deployments that already hold `http::Request` values should skip this
//! crate and use the `From<http::Request<Bytes>>` conversion on the core
//! request type directly.
//!
//! # Example
//!
//! ```no_run
//! use waypoint_core::error::CallError;
//! use waypoint_core::handler::handler_fn;
//! use waypoint_core::registry::{DEFAULT_CLASS, HandlerClass, HandlerGroup, Registry, get};
//! use waypoint_core::Dispatcher;
//! use waypoint_server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::builder()
//!         .root(
//!             HandlerGroup::builder("app")
//!                 .class(
//!                     HandlerClass::builder(DEFAULT_CLASS)
//!                         .method(get(handler_fn(|_req, _args| async {
//!                             Ok::<_, CallError>("hello world")
//!                         })))
//!                         .build()
//!                         .unwrap(),
//!                 )
//!                 .build()
//!                 .unwrap(),
//!         )
//!         .build()
//!         .unwrap();
//!
//!     Server::builder()
//!         .address("127.0.0.1:8080")
//!         .dispatcher(Dispatcher::new(registry))
//!         .build()
//!         .unwrap()
//!         .start()
//!         .await;
//! }
//! ```
//!
//! # Limitations
//!
//! - HTTP/1.1 only, fully buffered bodies, no chunked transfer encoding
//! - No TLS (front it with a reverse proxy)
//! - Maximum request head: 8KB, maximum headers: 64
//!
//! The per-request timeout configured with
//! [`ServerBuilder::request_timeout`] is advisory and wraps the whole
//! dispatch; the handler future is dropped on expiry (cooperative
//! cancellation) and the client gets a 504.

pub mod connection;
mod date;

use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use waypoint_core::{Config, Dispatcher, Request, Response};

use crate::connection::Connection;
use crate::date::DateService;

pub struct ServerBuilder {
    dispatcher: Option<Dispatcher>,
    address: Option<String>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder").field("address", &self.address).finish()
    }
}

impl ServerBuilder {
    fn new() -> Self {
        Self { dispatcher: None, address: None, request_timeout: None }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Advisory per-request deadline enforced around the dispatch.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Takes the bind address from the environment configuration when one
    /// is set.
    pub fn config(mut self, config: &Config) -> Self {
        if let Some(host) = config.host() {
            self.address = Some(host.to_owned());
        }
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let dispatcher = self.dispatcher.ok_or(ServerBuildError::MissingDispatcher)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        Ok(Server { dispatcher, address, request_timeout: self.request_timeout, date: OnceCell::new() })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("dispatcher must be set")]
    MissingDispatcher,

    #[error("address must be set")]
    MissingAddress,
}

pub struct Server {
    dispatcher: Dispatcher,
    address: String,
    request_timeout: Option<Duration>,
    date: OnceCell<DateService>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("address", &self.address).finish()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

        info!(address = %self.address, "start listening");
        let tcp_listener = match TcpListener::bind(self.address.as_str()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        let server = Arc::new(self);
        loop {
            let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let server = Arc::clone(&server);

            tokio::spawn(async move {
                match Connection::new(tcp_stream).process(server).await {
                    Ok(()) => {
                        info!("finished process, connection shutdown");
                    }
                    Err(e) => {
                        error!("connection has error, cause {}, connection shutdown", e);
                    }
                }
            });
        }
    }

    /// Dispatches one canonical request, applying the advisory timeout.
    pub(crate) async fn respond(&self, request: Request) -> Response {
        match self.request_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, self.dispatcher.dispatch(request)).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(timeout_ms = deadline.as_millis() as u64, "request timed out");
                    Response::json_with_status(
                        http::StatusCode::GATEWAY_TIMEOUT,
                        &serde_json::json!({"error": "request timed out"}),
                    )
                }
            },
            None => self.dispatcher.dispatch(request).await,
        }
    }

    pub(crate) fn http_date(&self) -> Arc<String> {
        self.date.get_or_init(DateService::new).http_date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::error::CallError;
    use waypoint_core::handler::handler_fn;
    use waypoint_core::registry::{DEFAULT_CLASS, HandlerClass, HandlerGroup, Registry, get};

    fn dispatcher() -> Dispatcher {
        let registry = Registry::builder()
            .root(
                HandlerGroup::builder("app")
                    .class(
                        HandlerClass::builder(DEFAULT_CLASS)
                            .no_cors()
                            .method(get(handler_fn(|_req, _args| async { Ok::<_, CallError>("ok") })))
                            .build()
                            .unwrap(),
                    )
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        Dispatcher::new(registry)
    }

    #[test]
    fn build_requires_a_dispatcher_and_address() {
        assert!(matches!(
            Server::builder().address("127.0.0.1:0").build(),
            Err(ServerBuildError::MissingDispatcher)
        ));
        assert!(matches!(
            Server::builder().dispatcher(dispatcher()).build(),
            Err(ServerBuildError::MissingAddress)
        ));
        assert!(Server::builder().address("127.0.0.1:0").dispatcher(dispatcher()).build().is_ok());
    }

    #[test]
    fn config_supplies_the_address() {
        let config = Config::from_lookup(|name| match name {
            waypoint_core::config::HOST_VAR => Some("0.0.0.0:9999".to_owned()),
            _ => None,
        });

        let server = Server::builder().config(&config).dispatcher(dispatcher()).build().unwrap();
        assert_eq!(server.address, "0.0.0.0:9999");
    }

    #[tokio::test]
    async fn respond_without_timeout_dispatches() {
        let server = Server::builder().address("127.0.0.1:0").dispatcher(dispatcher()).build().unwrap();
        let response = server.respond(Request::builder().path("/").build()).await;
        assert_eq!(response.status(), http::StatusCode::OK);
    }
}
