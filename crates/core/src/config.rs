//! Environment-driven configuration.
//!
//! The core consumes exactly one thing from the environment: the ordered
//! list of root namespace identifiers to search, mirroring how a search
//! path works. The server adapter additionally reads its bind address.
//!
//! ```text
//! WAYPOINT_PREFIX=app,api   # ordered root namespaces
//! WAYPOINT_HOST=0.0.0.0:8080
//! ```

use std::env;

/// Environment variable naming the ordered root namespaces.
pub const PREFIX_VAR: &str = "WAYPOINT_PREFIX";

/// Environment variable naming the bind address.
pub const HOST_VAR: &str = "WAYPOINT_HOST";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    roots: Vec<String>,
    host: Option<String>,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads configuration through an arbitrary lookup, mostly for tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let roots = lookup(PREFIX_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|root| !root.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let host = lookup(HOST_VAR).filter(|host| !host.is_empty());

        Self { roots, host }
    }

    /// The ordered root namespaces, empty when unconfigured (the registry
    /// then keeps its declaration order).
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_ordered_comma_separated_prefix() {
        let config = Config::from_lookup(|name| match name {
            PREFIX_VAR => Some("api, app ,admin".to_owned()),
            _ => None,
        });
        assert_eq!(config.roots(), &["api".to_owned(), "app".to_owned(), "admin".to_owned()]);
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(|_| None);
        assert!(config.roots().is_empty());
        assert_eq!(config.host(), None);
    }

    #[test]
    fn blank_entries_are_dropped() {
        let config = Config::from_lookup(|name| match name {
            PREFIX_VAR => Some("app,,".to_owned()),
            _ => None,
        });
        assert_eq!(config.roots(), &["app".to_owned()]);
    }

    #[test]
    fn host_comes_from_its_own_variable() {
        let config = Config::from_lookup(|name| match name {
            HOST_VAR => Some("127.0.0.1:9000".to_owned()),
            _ => None,
        });
        assert_eq!(config.host(), Some("127.0.0.1:9000"));
    }
}
