//! The per-request failure taxonomy.
//!
//! Every way a dispatch can fail is a distinct [`CallError`] variant mapped
//! to exactly one HTTP status, carrying enough structured detail (offending
//! path, parameter name, expected type or choices) for the client to
//! self-correct. Unexpected handler failures are the one class whose detail
//! never reaches the client: they are logged server-side and answered with
//! a generic body.

use http::{Method, StatusCode};
use serde_json::json;
use std::error::Error;
use thiserror::Error;
use tracing::error;

use crate::response::Response;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no handler namespace matches /{path}")]
    NamespaceNotFound { path: String },

    #[error("no handler class for /{path}")]
    ClassNotFound { path: String },

    #[error("{verb} not supported on {class}")]
    VerbNotAllowed { verb: Method, class: String },

    #[error("{verb} is recognized but not implemented")]
    VerbNotImplemented { verb: Method },

    #[error("no {verb} handler answers to version {tag:?}")]
    VersionNotSatisfiable { verb: Method, tag: String },

    #[error("missing path argument {name}")]
    MissingPathArgument { name: String },

    #[error("{count} unexpected trailing path segment(s)")]
    UnexpectedPathSegments { count: usize },

    #[error("required param {name} was not present")]
    MissingParameter { name: String },

    #[error("param {name} with value {value:?} is not a valid {expected}")]
    CoercionFailed { name: String, value: String, expected: String },

    #[error("param {name} with value {value:?} not in choices {choices:?}")]
    OutOfChoices { name: String, value: String, choices: Vec<String> },

    #[error("param {name} size {size} is out of bounds")]
    SizeOutOfBounds { name: String, size: f64, min: Option<f64>, max: Option<f64> },

    #[error("param {name} with value {value:?} failed pattern check")]
    PatternMismatch { name: String, value: String },

    #[error("unreadable request body: {reason}")]
    MalformedBody { reason: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { realm: String, message: String },

    #[error("access denied: {message}")]
    AuthorizationFailed { message: String },

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("redirect to {location}")]
    Redirect { location: String, permanent: bool },

    /// A handler short-circuit with an explicit status and body; not a
    /// failure so much as an early exit.
    #[error("call stopped with {status}")]
    Stop { status: StatusCode, body: Option<serde_json::Value> },

    #[error("unexpected handler failure: {source}")]
    Unexpected {
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl CallError {
    pub fn namespace_not_found(path: impl Into<String>) -> Self {
        Self::NamespaceNotFound { path: path.into() }
    }

    pub fn class_not_found(path: impl Into<String>) -> Self {
        Self::ClassNotFound { path: path.into() }
    }

    pub fn verb_not_allowed(verb: Method, class: impl Into<String>) -> Self {
        Self::VerbNotAllowed { verb, class: class.into() }
    }

    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    pub fn malformed_body(reason: impl Into<String>) -> Self {
        Self::MalformedBody { reason: reason.into() }
    }

    pub fn authentication_failed(realm: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { realm: realm.into(), message: message.into() }
    }

    pub fn authorization_failed(message: impl Into<String>) -> Self {
        Self::AuthorizationFailed { message: message.into() }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect { location: location.into(), permanent: false }
    }

    pub fn stop(status: StatusCode, body: Option<serde_json::Value>) -> Self {
        Self::Stop { status, body }
    }

    pub fn unexpected<E: Into<Box<dyn Error + Send + Sync>>>(source: E) -> Self {
        Self::Unexpected { source: source.into() }
    }

    /// The one status this failure kind maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NamespaceNotFound { .. }
            | Self::ClassNotFound { .. }
            | Self::MissingPathArgument { .. }
            | Self::UnexpectedPathSegments { .. } => StatusCode::NOT_FOUND,

            Self::VerbNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::VerbNotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::VersionNotSatisfiable { .. } => StatusCode::UPGRADE_REQUIRED,

            Self::MissingParameter { .. }
            | Self::CoercionFailed { .. }
            | Self::OutOfChoices { .. }
            | Self::SizeOutOfBounds { .. }
            | Self::PatternMismatch { .. }
            | Self::MalformedBody { .. } => StatusCode::BAD_REQUEST,

            Self::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            Self::AuthorizationFailed { .. } => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::Redirect { permanent, .. } => {
                if *permanent {
                    StatusCode::MOVED_PERMANENTLY
                } else {
                    StatusCode::FOUND
                }
            }

            Self::Stop { status, .. } => *status,
            Self::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The structured JSON detail sent to the client. Unexpected failures
    /// deliberately yield a generic body.
    fn body_json(&self) -> serde_json::Value {
        match self {
            Self::NamespaceNotFound { path } | Self::ClassNotFound { path } => {
                json!({"error": self.to_string(), "path": path})
            }
            Self::VerbNotAllowed { verb, class } => {
                json!({"error": self.to_string(), "verb": verb.as_str(), "class": class})
            }
            Self::VerbNotImplemented { verb } => json!({"error": self.to_string(), "verb": verb.as_str()}),
            Self::VersionNotSatisfiable { verb, tag } => {
                json!({"error": self.to_string(), "verb": verb.as_str(), "version": tag})
            }
            Self::MissingPathArgument { name } | Self::MissingParameter { name } => {
                json!({"error": self.to_string(), "param": name})
            }
            Self::UnexpectedPathSegments { count } => json!({"error": self.to_string(), "extra_segments": count}),
            Self::CoercionFailed { name, value, expected } => {
                json!({"error": self.to_string(), "param": name, "value": value, "expected": expected})
            }
            Self::OutOfChoices { name, value, choices } => {
                json!({"error": self.to_string(), "param": name, "value": value, "choices": choices})
            }
            Self::SizeOutOfBounds { name, size, min, max } => {
                json!({"error": self.to_string(), "param": name, "size": size, "min": min, "max": max})
            }
            Self::PatternMismatch { name, value } => {
                json!({"error": self.to_string(), "param": name, "value": value})
            }
            Self::MalformedBody { reason } => json!({"error": self.to_string(), "reason": reason}),
            Self::AuthenticationFailed { .. }
            | Self::AuthorizationFailed { .. }
            | Self::RateLimitExceeded { .. }
            | Self::Redirect { .. } => json!({"error": self.to_string()}),
            Self::Stop { body, .. } => body.clone().unwrap_or(serde_json::Value::Null),
            Self::Unexpected { .. } => json!({"error": "internal server error"}),
        }
    }

    /// Renders the failure as its response. This is the single choke point
    /// for error emission: unexpected failures are logged here with their
    /// full source chain, everything else passes through untouched.
    pub fn into_response(self) -> Response {
        if let Self::Unexpected { source } = &self {
            error!(cause = %source, "handler raised unexpectedly");
        }

        let status = self.status();
        let mut response = match self.body_json() {
            serde_json::Value::Null => Response::empty(status),
            body => Response::json_with_status(status, &body),
        };

        match &self {
            Self::AuthenticationFailed { realm, .. } => {
                let value = if realm.is_empty() { "Basic".to_owned() } else { realm.clone() };
                response.insert_header(http::header::WWW_AUTHENTICATE.as_str(), &value);
            }
            Self::RateLimitExceeded { retry_after } => {
                response.insert_header(http::header::RETRY_AFTER.as_str(), &retry_after.to_string());
            }
            Self::Redirect { location, .. } => {
                response.insert_header(http::header::LOCATION.as_str(), location);
            }
            _ => {}
        }

        response.enforce_no_content();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_kind_maps_to_one_status() {
        assert_eq!(CallError::namespace_not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(CallError::class_not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(CallError::verb_not_allowed(Method::POST, "Foo").status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(CallError::VerbNotImplemented { verb: Method::PUT }.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            CallError::VersionNotSatisfiable { verb: Method::GET, tag: "v9".into() }.status(),
            StatusCode::UPGRADE_REQUIRED
        );
        assert_eq!(CallError::MissingPathArgument { name: "x".into() }.status(), StatusCode::NOT_FOUND);
        assert_eq!(CallError::UnexpectedPathSegments { count: 2 }.status(), StatusCode::NOT_FOUND);
        assert_eq!(CallError::missing_parameter("p").status(), StatusCode::BAD_REQUEST);
        assert_eq!(CallError::authentication_failed("Bearer", "nope").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(CallError::authorization_failed("nope").status(), StatusCode::FORBIDDEN);
        assert_eq!(CallError::RateLimitExceeded { retry_after: 3 }.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(CallError::unexpected("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn coercion_and_choices_are_distinct_kinds() {
        let coercion =
            CallError::CoercionFailed { name: "n".into(), value: "x".into(), expected: "integer".into() };
        let choices = CallError::OutOfChoices {
            name: "n".into(),
            value: "three".into(),
            choices: vec!["one".into(), "two".into()],
        };

        assert!(matches!(coercion, CallError::CoercionFailed { .. }));
        assert!(matches!(choices, CallError::OutOfChoices { .. }));
        assert_eq!(coercion.status(), choices.status());
    }

    #[test]
    fn unexpected_body_withholds_detail() {
        let response = CallError::unexpected("secret database string").into_response();
        let body = String::from_utf8(response.body().unwrap().to_vec()).unwrap();
        assert!(!body.contains("secret"));
        assert!(body.contains("internal server error"));
    }

    #[test]
    fn auth_failure_carries_the_realm_challenge() {
        let response = CallError::authentication_failed("Bearer", "bad token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(http::header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let response = CallError::RateLimitExceeded { retry_after: 30 }.into_response();
        assert_eq!(response.headers().get(http::header::RETRY_AFTER).unwrap(), "30");
    }

    #[test]
    fn redirect_sets_location() {
        let response = CallError::redirect("/elsewhere").into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(http::header::LOCATION).unwrap(), "/elsewhere");
    }

    #[test]
    fn structured_detail_names_the_parameter() {
        let err = CallError::OutOfChoices {
            name: "kind".into(),
            value: "three".into(),
            choices: vec!["one".into(), "two".into()],
        };
        let response = err.into_response();
        let body: serde_json::Value = serde_json::from_slice(response.body().unwrap()).unwrap();
        assert_eq!(body["param"], "kind");
        assert_eq!(body["choices"], serde_json::json!(["one", "two"]));
    }
}
