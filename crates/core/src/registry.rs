//! The handler namespace: an immutable tree built once at startup.
//!
//! A [`Registry`] owns an ordered list of root [`HandlerGroup`]s. Groups
//! nest arbitrarily and own named [`HandlerClass`]es; classes own
//! [`MethodEntry`]s keyed by verb and version tag. Construction is the
//! moment configuration errors surface: duplicate names, overlapping
//! version tags and invalid parameter patterns all fail the build rather
//! than a request. After [`RegistryBuilder::build`] the tree is read-only
//! and shared across calls without locking.

use http::Method;
use mime::Mime;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::binder::{ParamSchema, ParamSpec};
use crate::handler::MethodHandler;
use crate::middleware::{Middleware, cors};

/// The fallback class every group may provide: selected when no path
/// segment names a more specific class.
pub const DEFAULT_CLASS: &str = "Default";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate group {name} under {parent}")]
    DuplicateGroup { name: String, parent: String },

    #[error("duplicate class {name} in group {group}")]
    DuplicateClass { name: String, group: String },

    #[error("overlapping version tag {tag:?} for {verb} on {class}")]
    OverlappingVersions { class: String, verb: Method, tag: String },

    #[error("invalid pattern for param {param}: {reason}")]
    InvalidPattern { param: String, reason: String },

    #[error("unknown root namespace {name}")]
    UnknownRoot { name: String },

    #[error("no root namespaces configured")]
    NoRoots,
}

/// The whole namespace. Built once, then only read.
#[derive(Debug)]
pub struct Registry {
    roots: Vec<HandlerGroup>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { roots: Vec::new(), order: None }
    }

    /// Root groups in search order: the first root yielding a class wins.
    pub fn roots(&self) -> &[HandlerGroup] {
        &self.roots
    }

    /// Every addressable endpoint, for diagnostics and listings.
    pub fn endpoints(&self) -> Vec<Endpoint<'_>> {
        let mut endpoints = Vec::new();
        for root in &self.roots {
            root.collect_endpoints(&root.name, &mut endpoints);
        }
        endpoints
    }
}

/// One addressable (path, class, verb) combination.
#[derive(Debug, Clone)]
pub struct Endpoint<'r> {
    pub path: String,
    pub class: &'r str,
    pub verb: &'r Method,
    pub versions: &'r [String],
}

#[derive(Debug)]
pub struct RegistryBuilder {
    roots: Vec<HandlerGroup>,
    order: Option<Vec<String>>,
}

impl RegistryBuilder {
    pub fn root(mut self, group: HandlerGroup) -> Self {
        self.roots.push(group);
        self
    }

    /// Restricts and orders the roots by name, the way an environment
    /// variable supplies them. Roots not listed are dropped; unknown names
    /// fail the build.
    pub fn root_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<Registry, BuildError> {
        let mut roots = self.roots;

        for (index, root) in roots.iter().enumerate() {
            if roots[..index].iter().any(|other| other.name == root.name) {
                return Err(BuildError::DuplicateGroup { name: root.name.clone(), parent: "<registry>".to_owned() });
            }
        }

        if let Some(order) = self.order {
            let mut ordered = Vec::with_capacity(order.len());
            for name in order {
                let position = roots
                    .iter()
                    .position(|root| root.name == name)
                    .ok_or(BuildError::UnknownRoot { name: name.clone() })?;
                ordered.push(roots.remove(position));
            }
            roots = ordered;
        }

        if roots.is_empty() {
            return Err(BuildError::NoRoots);
        }

        Ok(Registry { roots })
    }
}

/// A namespace node reachable by one path segment.
#[derive(Debug)]
pub struct HandlerGroup {
    name: String,
    groups: Vec<HandlerGroup>,
    classes: Vec<HandlerClass>,
}

impl HandlerGroup {
    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder { name: name.into(), groups: Vec::new(), classes: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subgroup(&self, name: &str) -> Option<&HandlerGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// Case-sensitive class lookup; callers normalize the segment first.
    pub fn class(&self, name: &str) -> Option<&HandlerClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    fn collect_endpoints<'r>(&'r self, path: &str, endpoints: &mut Vec<Endpoint<'r>>) {
        for class in &self.classes {
            for entry in &class.methods {
                endpoints.push(Endpoint {
                    path: format!("/{path}"),
                    class: &class.name,
                    verb: &entry.verb,
                    versions: &entry.versions,
                });
            }
        }
        for group in &self.groups {
            group.collect_endpoints(&format!("{path}/{}", group.name), endpoints);
        }
    }
}

#[derive(Debug)]
pub struct GroupBuilder {
    name: String,
    groups: Vec<HandlerGroup>,
    classes: Vec<HandlerClass>,
}

impl GroupBuilder {
    pub fn group(mut self, group: HandlerGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn class(mut self, class: HandlerClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn build(self) -> Result<HandlerGroup, BuildError> {
        for (index, group) in self.groups.iter().enumerate() {
            if self.groups[..index].iter().any(|other| other.name == group.name) {
                return Err(BuildError::DuplicateGroup { name: group.name.clone(), parent: self.name.clone() });
            }
        }
        for (index, class) in self.classes.iter().enumerate() {
            if self.classes[..index].iter().any(|other| other.name == class.name) {
                return Err(BuildError::DuplicateClass { name: class.name.clone(), group: self.name.clone() });
            }
        }

        Ok(HandlerGroup { name: self.name, groups: self.groups, classes: self.classes })
    }
}

/// A named bundle of verb/version-tagged methods answering requests at a
/// resolved path.
#[derive(Debug)]
pub struct HandlerClass {
    name: String,
    cors: bool,
    content_type: Mime,
    methods: Vec<MethodEntry>,
}

impl HandlerClass {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            cors: true,
            content_type: mime::APPLICATION_JSON,
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cors(&self) -> bool {
        self.cors
    }

    /// The content type this class responds with; also the media type the
    /// Accept header's version parameter is matched against.
    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    pub fn methods(&self) -> &[MethodEntry] {
        &self.methods
    }
}

pub struct ClassBuilder {
    name: String,
    cors: bool,
    content_type: Mime,
    methods: Vec<MethodEntryBuilder>,
}

impl fmt::Debug for ClassBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBuilder").field("name", &self.name).field("methods", &self.methods.len()).finish()
    }
}

impl ClassBuilder {
    pub fn method(mut self, entry: MethodEntryBuilder) -> Self {
        self.methods.push(entry);
        self
    }

    /// Opts this class out of CORS: no common headers and no synthesized
    /// preflight.
    pub fn no_cors(mut self) -> Self {
        self.cors = false;
        self
    }

    pub fn content_type(mut self, content_type: Mime) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn build(self) -> Result<HandlerClass, BuildError> {
        let mut methods = Vec::with_capacity(self.methods.len());
        for builder in self.methods {
            methods.push(builder.build()?);
        }

        // overlapping version tags are a configuration error, caught here
        // rather than at request time; guarded entries are exempt because
        // their predicates discriminate at request time
        for (index, entry) in methods.iter().enumerate() {
            if entry.guarded {
                continue;
            }
            for other in methods[..index].iter().filter(|other| !other.guarded && other.verb == entry.verb) {
                for tag in entry.effective_tags() {
                    if other.effective_tags().contains(&tag) {
                        return Err(BuildError::OverlappingVersions {
                            class: self.name.clone(),
                            verb: entry.verb.clone(),
                            tag,
                        });
                    }
                }
            }
        }

        if self.cors && !methods.iter().any(|entry| entry.verb == Method::OPTIONS) {
            methods.push(cors::preflight_entry()?);
        }

        Ok(HandlerClass { name: self.name, cors: self.cors, content_type: self.content_type, methods })
    }
}

/// One callable bound to (verb, version tags, routing predicates).
pub struct MethodEntry {
    verb: Method,
    versions: Vec<String>,
    schema: ParamSchema,
    chain: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn MethodHandler>,
    guarded: bool,
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("verb", &self.verb)
            .field("versions", &self.versions)
            .field("chain", &self.chain.len())
            .field("guarded", &self.guarded)
            .finish()
    }
}

impl MethodEntry {
    pub fn verb(&self) -> &Method {
        &self.verb
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn chain(&self) -> &[Arc<dyn Middleware>] {
        &self.chain
    }

    pub fn handler(&self) -> &Arc<dyn MethodHandler> {
        &self.handler
    }

    /// Whether this entry answers the request's version tag. An entry with
    /// no declared tags is the unversioned one: it answers only requests
    /// that supplied no tag.
    pub fn answers_to(&self, tag: &str) -> bool {
        if tag.is_empty() {
            self.versions.is_empty() || self.versions.iter().any(String::is_empty)
        } else {
            self.versions.iter().any(|version| version == tag)
        }
    }

    fn effective_tags(&self) -> Vec<String> {
        if self.versions.is_empty() { vec![String::new()] } else { self.versions.clone() }
    }
}

macro_rules! method_entry {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Starts a ", stringify!($upper_case_method), " method entry for the given handler.")]
        pub fn $method<H: MethodHandler + 'static>(handler: H) -> MethodEntryBuilder {
            MethodEntryBuilder::new(Method::$upper_case_method, handler)
        }
    };
}

method_entry!(get, GET);
method_entry!(post, POST);
method_entry!(put, PUT);
method_entry!(delete, DELETE);
method_entry!(head, HEAD);
method_entry!(options, OPTIONS);
method_entry!(patch, PATCH);
method_entry!(connect, CONNECT);
method_entry!(trace, TRACE);

pub struct MethodEntryBuilder {
    verb: Method,
    versions: Vec<String>,
    schema: ParamSchema,
    chain: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn MethodHandler>,
}

impl fmt::Debug for MethodEntryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntryBuilder").field("verb", &self.verb).field("versions", &self.versions).finish()
    }
}

impl MethodEntryBuilder {
    fn new<H: MethodHandler + 'static>(verb: Method, handler: H) -> Self {
        Self { verb, versions: Vec::new(), schema: ParamSchema::new(), chain: Vec::new(), handler: Arc::new(handler) }
    }

    /// Adds a version tag this entry answers to; repeatable.
    pub fn version(mut self, tag: impl Into<String>) -> Self {
        self.versions.push(tag.into());
        self
    }

    /// Declares a positional parameter fed from the path remainder.
    pub fn path_param(mut self, spec: ParamSpec) -> Self {
        self.schema = self.schema.positional(spec);
        self
    }

    /// Declares a named parameter fed from the merged query/body data.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.schema = self.schema.named(spec);
        self
    }

    /// Accept extra trailing path segments.
    pub fn variadic(mut self) -> Self {
        self.schema = self.schema.variadic();
        self
    }

    /// Pass undeclared keys through to the handler.
    pub fn open_keywords(mut self) -> Self {
        self.schema = self.schema.open_keywords();
        self
    }

    /// Replaces the whole schema at once.
    pub fn schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Appends a middleware layer; first added runs outermost.
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.chain.push(Arc::new(middleware));
        self
    }

    pub fn build(mut self) -> Result<MethodEntry, BuildError> {
        self.schema.compile()?;
        let guarded = self.chain.iter().any(|middleware| middleware.is_guard());
        Ok(MethodEntry {
            verb: self.verb,
            versions: self.versions,
            schema: self.schema,
            chain: self.chain,
            handler: self.handler,
            guarded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::handler::handler_fn;
    use crate::middleware::guard_fn;

    fn noop() -> MethodEntryBuilder {
        get(handler_fn(|_req, _args| async { Ok::<_, CallError>("ok") }))
    }

    #[test]
    fn builds_a_tree_with_nested_groups() {
        let registry = Registry::builder()
            .root(
                HandlerGroup::builder("app")
                    .class(HandlerClass::builder(DEFAULT_CLASS).method(noop()).build().unwrap())
                    .group(
                        HandlerGroup::builder("admin")
                            .class(HandlerClass::builder("Users").method(noop()).build().unwrap())
                            .build()
                            .unwrap(),
                    )
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let app = &registry.roots()[0];
        assert_eq!(app.name(), "app");
        assert!(app.class(DEFAULT_CLASS).is_some());
        assert!(app.subgroup("admin").and_then(|admin| admin.class("Users")).is_some());
    }

    #[test]
    fn duplicate_class_names_fail_the_build() {
        let result = HandlerGroup::builder("app")
            .class(HandlerClass::builder("Foo").method(noop()).build().unwrap())
            .class(HandlerClass::builder("Foo").method(noop()).build().unwrap())
            .build();
        assert!(matches!(result, Err(BuildError::DuplicateClass { .. })));
    }

    #[test]
    fn overlapping_version_tags_are_rejected_at_build_time() {
        let result = HandlerClass::builder("Foo")
            .method(noop().version("v1"))
            .method(noop().version("v1"))
            .build();
        assert!(matches!(result, Err(BuildError::OverlappingVersions { tag, .. }) if tag == "v1"));
    }

    #[test]
    fn two_untagged_entries_overlap_on_the_empty_tag() {
        let result = HandlerClass::builder("Foo").method(noop()).method(noop()).build();
        assert!(matches!(result, Err(BuildError::OverlappingVersions { tag, .. }) if tag.is_empty()));
    }

    #[test]
    fn guarded_entries_may_share_a_tag() {
        let class = HandlerClass::builder("Foo")
            .method(noop().with(guard_fn(|req| req.header("x-flavor") == Some("a"))))
            .method(noop().with(guard_fn(|req| req.header("x-flavor") == Some("b"))))
            .build()
            .unwrap();

        let guarded: Vec<_> = class.methods().iter().filter(|entry| entry.verb() == Method::GET).collect();
        assert_eq!(guarded.len(), 2);
    }

    #[test]
    fn cors_classes_get_a_synthesized_preflight() {
        let class = HandlerClass::builder("Foo").method(noop()).build().unwrap();
        assert!(class.methods().iter().any(|entry| entry.verb() == Method::OPTIONS));

        let plain = HandlerClass::builder("Foo").no_cors().method(noop()).build().unwrap();
        assert!(!plain.methods().iter().any(|entry| entry.verb() == Method::OPTIONS));
    }

    #[test]
    fn declared_options_suppresses_the_synthesized_one() {
        let class = HandlerClass::builder("Foo")
            .method(options(handler_fn(|_req, _args| async { Ok::<_, CallError>("mine") })))
            .build()
            .unwrap();

        let options_entries: Vec<_> =
            class.methods().iter().filter(|entry| entry.verb() == Method::OPTIONS).collect();
        assert_eq!(options_entries.len(), 1);
    }

    #[test]
    fn root_order_restricts_and_orders() {
        let registry = Registry::builder()
            .root(
                HandlerGroup::builder("app")
                    .class(HandlerClass::builder(DEFAULT_CLASS).method(noop()).build().unwrap())
                    .build()
                    .unwrap(),
            )
            .root(
                HandlerGroup::builder("api")
                    .class(HandlerClass::builder(DEFAULT_CLASS).method(noop()).build().unwrap())
                    .build()
                    .unwrap(),
            )
            .root_order(["api"])
            .build()
            .unwrap();

        assert_eq!(registry.roots().len(), 1);
        assert_eq!(registry.roots()[0].name(), "api");
    }

    #[test]
    fn unknown_root_in_the_order_fails() {
        let result = Registry::builder()
            .root(
                HandlerGroup::builder("app")
                    .class(HandlerClass::builder(DEFAULT_CLASS).method(noop()).build().unwrap())
                    .build()
                    .unwrap(),
            )
            .root_order(["nope"])
            .build();
        assert!(matches!(result, Err(BuildError::UnknownRoot { .. })));
    }

    #[test]
    fn empty_registry_is_rejected() {
        assert!(matches!(Registry::builder().build(), Err(BuildError::NoRoots)));
    }

    #[test]
    fn endpoints_lists_every_combination() {
        let registry = Registry::builder()
            .root(
                HandlerGroup::builder("app")
                    .class(HandlerClass::builder(DEFAULT_CLASS).no_cors().method(noop()).build().unwrap())
                    .group(
                        HandlerGroup::builder("admin")
                            .class(
                                HandlerClass::builder("Users")
                                    .no_cors()
                                    .method(noop().version("v1"))
                                    .build()
                                    .unwrap(),
                            )
                            .build()
                            .unwrap(),
                    )
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let endpoints = registry.endpoints();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().any(|e| e.path == "/app" && e.class == DEFAULT_CLASS));
        assert!(endpoints.iter().any(|e| e.path == "/app/admin" && e.class == "Users" && e.versions == ["v1"]));
    }
}
