//! Basic and Bearer authentication middleware.
//!
//! Credential verification itself is pluggable: the middleware extracts
//! credentials from the Authorization header and hands them to an
//! [`Authenticate`] implementation (a session store lookup, a token
//! introspection call — anything async). On success the resolved identity
//! is stashed in the request's extension slot as [`Identity`] and may also
//! be injected into the binder input under a configured keyword name.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::future::Future;
use std::sync::Arc;

use crate::error::CallError;
use crate::middleware::{Flow, Middleware};
use crate::request::{Params, Request};

/// Credentials extracted from the Authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// The authenticated identity, stashed in the request extension slot for
/// later middleware and the target method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub serde_json::Value);

/// Verifies extracted credentials. May perform I/O; this is one of the two
/// places a call is allowed to suspend.
#[async_trait]
pub trait Authenticate: Send + Sync {
    /// Returns the identity value on success. Returning
    /// [`CallError::AuthorizationFailed`] yields 403; any other error is
    /// folded into a 401 challenge.
    async fn authenticate(&self, credentials: Credentials) -> Result<serde_json::Value, CallError>;
}

struct AuthenticateFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Authenticate for AuthenticateFn<F>
where
    F: Fn(Credentials) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, CallError>> + Send,
{
    async fn authenticate(&self, credentials: Credentials) -> Result<serde_json::Value, CallError> {
        (self.f)(credentials).await
    }
}

/// Creates an [`Authenticate`] from an async closure over owned
/// credentials.
pub fn authenticate_fn<F, Fut>(f: F) -> impl Authenticate
where
    F: Fn(Credentials) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, CallError>> + Send,
{
    AuthenticateFn { f }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Scheme {
    Basic,
    Bearer,
}

impl Scheme {
    fn label(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Bearer => "Bearer",
        }
    }
}

/// The authentication middleware.
pub struct Auth {
    scheme: Scheme,
    realm: String,
    validator: Arc<dyn Authenticate>,
    inject: Option<String>,
}

impl Auth {
    pub fn basic(realm: impl Into<String>, validator: impl Authenticate + 'static) -> Self {
        Self { scheme: Scheme::Basic, realm: realm.into(), validator: Arc::new(validator), inject: None }
    }

    pub fn bearer(realm: impl Into<String>, validator: impl Authenticate + 'static) -> Self {
        Self { scheme: Scheme::Bearer, realm: realm.into(), validator: Arc::new(validator), inject: None }
    }

    /// Also inject the identity into the binder input under `name`, so the
    /// target method can declare it as an ordinary parameter.
    pub fn inject_as(mut self, name: impl Into<String>) -> Self {
        self.inject = Some(name.into());
        self
    }

    fn challenge(&self) -> String {
        if self.realm.is_empty() {
            self.scheme.label().to_owned()
        } else {
            format!("{} realm=\"{}\"", self.scheme.label(), self.realm)
        }
    }

    fn denied(&self, message: impl Into<String>) -> CallError {
        CallError::authentication_failed(self.challenge(), message)
    }

    fn extract(&self, req: &Request) -> Result<Credentials, CallError> {
        let header = req.header("authorization").ok_or_else(|| self.denied("credentials required"))?;
        let (scheme, rest) = header.split_once(' ').ok_or_else(|| self.denied("malformed authorization header"))?;

        if !scheme.eq_ignore_ascii_case(self.scheme.label()) {
            return Err(self.denied(format!("expected {} credentials", self.scheme.label())));
        }

        match self.scheme {
            Scheme::Bearer => Ok(Credentials::Bearer { token: rest.trim().to_owned() }),
            Scheme::Basic => {
                let decoded = BASE64.decode(rest.trim()).map_err(|_| self.denied("undecodable credentials"))?;
                let pair = String::from_utf8(decoded).map_err(|_| self.denied("undecodable credentials"))?;
                let (username, password) =
                    pair.split_once(':').ok_or_else(|| self.denied("malformed basic credentials"))?;
                Ok(Credentials::Basic { username: username.to_owned(), password: password.to_owned() })
            }
        }
    }
}

#[async_trait]
impl Middleware for Auth {
    async fn before(&self, req: &Request, kwargs: &mut Params) -> Result<Flow, CallError> {
        let credentials = self.extract(req)?;

        let identity = match self.validator.authenticate(credentials).await {
            Ok(identity) => identity,
            // authorization failures keep their 403; everything else
            // becomes a 401 challenge without leaking the cause shape
            Err(err @ CallError::AuthorizationFailed { .. }) => return Err(err),
            Err(err) => return Err(self.denied(err.to_string())),
        };

        req.insert_extension(Identity(identity.clone()));

        if let Some(name) = &self.inject {
            let value = match &identity {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            kwargs.set(name.as_str(), value);
        }

        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;

    fn token_validator() -> impl Authenticate {
        authenticate_fn(|credentials| async move {
            match credentials {
                Credentials::Bearer { token } if token == "sekret" => Ok(json!("alice")),
                Credentials::Bearer { .. } => Err(CallError::authorization_failed("unknown token")),
                other => Err(CallError::unexpected(format!("unsupported: {other:?}"))),
            }
        })
    }

    fn password_validator() -> impl Authenticate {
        authenticate_fn(|credentials| async move {
            match credentials {
                Credentials::Basic { username, password } if username == "che" && password == "open" => {
                    Ok(json!({"user": "che"}))
                }
                _ => Err(CallError::unexpected("bad password")),
            }
        })
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let auth = Auth::bearer("api", token_validator());
        let req = Request::builder().path("/").build();
        let err = auth.before(&req, &mut Params::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_bearer_token_stashes_identity() {
        let auth = Auth::bearer("api", token_validator());
        let req = Request::builder().path("/").header("authorization", "Bearer sekret").build();

        let flow = auth.before(&req, &mut Params::new()).await.unwrap();
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(req.extension::<Identity>(), Some(Identity(json!("alice"))));
    }

    #[tokio::test]
    async fn rejected_token_is_forbidden() {
        let auth = Auth::bearer("api", token_validator());
        let req = Request::builder().path("/").header("authorization", "Bearer wrong").build();
        let err = auth.before(&req, &mut Params::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn basic_credentials_decode_and_inject() {
        let auth = Auth::basic("api", password_validator()).inject_as("identity");
        // "che:open"
        let req = Request::builder().path("/").header("authorization", "Basic Y2hlOm9wZW4=").build();

        let mut kwargs = Params::new();
        auth.before(&req, &mut kwargs).await.unwrap();
        assert_eq!(kwargs.get("identity"), Some("{\"user\":\"che\"}"));
    }

    #[tokio::test]
    async fn wrong_scheme_is_challenged_with_the_realm() {
        let auth = Auth::basic("staff", password_validator());
        let req = Request::builder().path("/").header("authorization", "Bearer nope").build();
        let err = auth.before(&req, &mut Params::new()).await.unwrap_err();
        match err {
            CallError::AuthenticationFailed { realm, .. } => assert_eq!(realm, "Basic realm=\"staff\""),
            other => panic!("wrong error kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn validator_failure_never_leaks_as_500() {
        let auth = Auth::basic("api", password_validator());
        // "che:wrong"
        let req = Request::builder().path("/").header("authorization", "Basic Y2hlOndyb25n").build();
        let err = auth.before(&req, &mut Params::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
