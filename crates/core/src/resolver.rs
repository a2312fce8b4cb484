//! Convention-based path resolution.
//!
//! A request path is never matched against a declared route table; it is
//! walked against the namespace tree: `GET /foo/bar/baz` descends into
//! group `foo`, selects class `Bar` (the capitalization-normalized second
//! segment), and leaves `baz` as a positional path argument. The walk is a
//! pure lookup over the startup-built [`Registry`] — no I/O, no
//! suspension, deterministic for identical inputs.

use tracing::debug;

use crate::error::CallError;
use crate::registry::{DEFAULT_CLASS, HandlerClass, HandlerGroup, Registry};

/// The outcome of a resolution: the selected class and the path segments
/// left over for parameter binding.
#[derive(Debug)]
pub struct Resolution<'r> {
    pub group: &'r HandlerGroup,
    pub class: &'r HandlerClass,
    pub remainder: Vec<String>,
}

/// Resolves `segments` to a handler class.
///
/// Roots are consulted in declaration order and the first root yielding a
/// class wins — there is no merging across roots. Within a root, descent
/// is greedy-left: each segment descends into a same-named sub-group for
/// as long as one exists (a sub-group always beats a same-named class).
/// The first non-group segment selects a class by its
/// capitalization-normalized name, consuming the segment; otherwise the
/// group's `Default` class is used and nothing further is consumed. The
/// verb plays no part here.
pub fn resolve<'r>(registry: &'r Registry, segments: &[String]) -> Result<Resolution<'r>, CallError> {
    let mut descended = false;

    for root in registry.roots() {
        let mut group = root;
        let mut consumed = 0;

        while consumed < segments.len() {
            match group.subgroup(&segments[consumed]) {
                Some(subgroup) => {
                    group = subgroup;
                    consumed += 1;
                    descended = true;
                }
                None => break,
            }
        }

        if consumed < segments.len() {
            let class_name = capitalize(&segments[consumed]);
            if let Some(class) = group.class(&class_name) {
                debug!(root = root.name(), class = class_name, "resolved by class segment");
                return Ok(Resolution { group, class, remainder: segments[consumed + 1..].to_vec() });
            }
        }

        if let Some(class) = group.class(DEFAULT_CLASS) {
            debug!(root = root.name(), group = group.name(), "resolved to Default class");
            return Ok(Resolution { group, class, remainder: segments[consumed..].to_vec() });
        }

        // nothing at this root; the next root gets a fresh walk
    }

    let path = segments.join("/");
    if descended {
        Err(CallError::class_not_found(path))
    } else {
        Err(CallError::namespace_not_found(path))
    }
}

/// Normalizes a path segment into a class identifier: first character
/// uppercased, the rest lowercased, so `foo` and `FOO` both look up `Foo`.
fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
