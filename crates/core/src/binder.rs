//! Schema-driven parameter binding.
//!
//! Every handler method declares a [`ParamSchema`]: ordered positional
//! parameters fed strictly from the path remainder, named parameters fed
//! from the merged query/body map, an optional variadic tail and an
//! open-keywords flag. [`bind`] maps a request's data onto that schema,
//! coercing raw strings through each parameter's declared [`ParamType`] and
//! reporting *which* parameter failed and *why* as a distinct error kind:
//! missing, uncoercible, out of choices, out of size bounds, or pattern
//! mismatch are never collapsed into one generic 400.

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::CallError;
use crate::registry::BuildError;
use crate::request::Params;

/// A parse-from-string capability: how a raw request value becomes a typed
/// argument.
#[derive(Clone)]
pub enum ParamType {
    /// Passed through as-is.
    Text,
    /// Parsed as a signed integer.
    Integer,
    /// Parsed as a float.
    Number,
    /// Accepts `true`/`True`/`1` and `false`/`False`/`0`.
    Boolean,
    /// A caller-supplied parse function with a label for diagnostics.
    Custom { label: &'static str, parse: Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync> },
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl ParamType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Custom { label, .. } => label,
        }
    }

    fn parse(&self, name: &str, raw: &str) -> Result<Value, CallError> {
        let failed = || CallError::CoercionFailed {
            name: name.to_owned(),
            value: raw.to_owned(),
            expected: self.label().to_owned(),
        };

        match self {
            Self::Text => Ok(Value::String(raw.to_owned())),
            Self::Integer => raw.parse::<i64>().map(Value::from).map_err(|_| failed()),
            Self::Number => raw.parse::<f64>().map(Value::from).map_err(|_| failed()),
            Self::Boolean => match raw {
                "true" | "True" | "1" => Ok(Value::Bool(true)),
                "false" | "False" | "0" => Ok(Value::Bool(false)),
                _ => Err(failed()),
            },
            Self::Custom { parse, .. } => parse(raw).map_err(|_| failed()),
        }
    }
}

/// How repeated or delimited values collect into a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListAction {
    /// Scalar: the first value wins.
    #[default]
    None,
    /// Repeated keys collect into a list (`foo=1&foo=2` ⇒ `[1, 2]`).
    Repeat,
    /// A single comma-delimited value splits (`foo=1,2,3` ⇒ `[1, 2, 3]`);
    /// more than one occurrence is an error.
    Split,
    /// Both: every occurrence splits and the results concatenate.
    RepeatSplit,
}

/// One declared parameter: name, type, and validation constraints.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    name: String,
    aliases: Vec<String>,
    dest: Option<String>,
    ty: ParamType,
    default: Option<Value>,
    required: bool,
    choices: Option<Vec<Value>>,
    min_size: Option<f64>,
    max_size: Option<f64>,
    pattern: Option<String>,
    regex: Option<Regex>,
    allow_empty: bool,
    list: ListAction,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            dest: None,
            ty,
            default: None,
            required: true,
            choices: None,
            min_size: None,
            max_size: None,
            pattern: None,
            regex: None,
            allow_empty: false,
            list: ListAction::None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key the bound value lands under: `dest` if set, else the name.
    pub fn dest(&self) -> &str {
        self.dest.as_deref().unwrap_or(&self.name)
    }

    /// Additional accepted request-side names.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Renames the parameter in the bound output.
    pub fn dest_name(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// A default value; its presence makes the parameter optional.
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    /// Optional without a default: absent means absent from the bound args.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn min_size(mut self, min: f64) -> Self {
        self.min_size = Some(min);
        self
    }

    pub fn max_size(mut self, max: f64) -> Self {
        self.max_size = Some(max);
        self
    }

    /// A regex the (string) value must match; compiled when the registry
    /// is built, so a bad pattern is a startup failure, not a 500.
    pub fn matches(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Lets empty-string values through instead of treating them as absent.
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    pub fn list(mut self, action: ListAction) -> Self {
        self.list = action;
        self
    }

    pub(crate) fn compile(&mut self) -> Result<(), BuildError> {
        if let Some(pattern) = &self.pattern
            && self.regex.is_none()
        {
            let regex = Regex::new(pattern)
                .map_err(|e| BuildError::InvalidPattern { param: self.name.clone(), reason: e.to_string() })?;
            self.regex = Some(regex);
        }
        Ok(())
    }

    fn accepted_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Coerces and validates one raw string.
    fn coerce_checked(&self, raw: &str) -> Result<Value, CallError> {
        let value = self.ty.parse(&self.name, raw)?;
        self.check_choices(&value)?;
        self.check_size(&value)?;
        self.check_pattern(&value)?;
        Ok(value)
    }

    fn check_choices(&self, value: &Value) -> Result<(), CallError> {
        let Some(choices) = &self.choices else { return Ok(()) };

        let out_of_set = |offender: &Value| CallError::OutOfChoices {
            name: self.name.clone(),
            value: display(offender),
            choices: choices.iter().map(display).collect(),
        };

        match value {
            Value::Array(items) => {
                for item in items {
                    if !choices.contains(item) {
                        return Err(out_of_set(item));
                    }
                }
                Ok(())
            }
            scalar if choices.contains(scalar) => Ok(()),
            scalar => Err(out_of_set(scalar)),
        }
    }

    fn check_size(&self, value: &Value) -> Result<(), CallError> {
        if self.min_size.is_none() && self.max_size.is_none() {
            return Ok(());
        }

        // numbers compare by magnitude, everything else by length
        let size = match value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.len() as f64,
            Value::Array(items) => items.len() as f64,
            _ => return Ok(()),
        };

        let too_small = self.min_size.is_some_and(|min| size < min);
        let too_big = self.max_size.is_some_and(|max| size > max);
        if too_small || too_big {
            return Err(CallError::SizeOutOfBounds {
                name: self.name.clone(),
                size,
                min: self.min_size,
                max: self.max_size,
            });
        }
        Ok(())
    }

    fn check_pattern(&self, value: &Value) -> Result<(), CallError> {
        let Some(regex) = &self.regex else { return Ok(()) };

        let mismatch = |offender: &str| CallError::PatternMismatch { name: self.name.clone(), value: offender.to_owned() };

        match value {
            Value::String(s) if !regex.is_match(s) => Err(mismatch(s)),
            Value::Array(items) => {
                for item in items {
                    if let Value::String(s) = item
                        && !regex.is_match(s)
                    {
                        return Err(mismatch(s));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A method's declared formal parameters.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    positional: Vec<ParamSpec>,
    named: Vec<ParamSpec>,
    variadic: bool,
    open_keywords: bool,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional parameter, fed from the path remainder.
    pub fn positional(mut self, spec: ParamSpec) -> Self {
        self.positional.push(spec);
        self
    }

    /// Appends a named parameter, fed from the merged query/body data.
    pub fn named(mut self, spec: ParamSpec) -> Self {
        self.named.push(spec);
        self
    }

    /// Accept extra trailing path segments beyond the declared positionals.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Pass undeclared keys through to the handler instead of ignoring them.
    pub fn open_keywords(mut self) -> Self {
        self.open_keywords = true;
        self
    }

    /// The minimum number of path segments the remainder must supply.
    pub fn required_segments(&self) -> usize {
        self.positional.iter().filter(|spec| spec.default.is_none()).count()
    }

    pub(crate) fn compile(&mut self) -> Result<(), BuildError> {
        for spec in self.positional.iter_mut().chain(self.named.iter_mut()) {
            spec.compile()?;
        }
        Ok(())
    }
}

/// The binder's output: ordered positional values, the variadic tail, and
/// the keyword map the handler consumes.
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    tail: Vec<Value>,
    keywords: Map<String, Value>,
}

impl Args {
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn pos(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn pos_str(&self, index: usize) -> Option<&str> {
        self.pos(index).and_then(Value::as_str)
    }

    pub fn tail(&self) -> &[Value] {
        &self.tail
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.keywords.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn keywords(&self) -> &Map<String, Value> {
        &self.keywords
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.keywords.insert(name.into(), value);
    }
}

/// Binds the path remainder and the merged key-value data onto `schema`.
///
/// Pure and non-suspending: operates only on already-available data.
pub fn bind(schema: &ParamSchema, segments: &[String], merged: &Params) -> Result<Args, CallError> {
    let mut args = Args::default();

    // positional parameters come strictly from the path remainder
    for (index, spec) in schema.positional.iter().enumerate() {
        match segments.get(index) {
            Some(segment) => args.positional.push(spec.coerce_checked(segment)?),
            None => match &spec.default {
                Some(default) => args.positional.push(default.clone()),
                None => return Err(CallError::MissingPathArgument { name: spec.name.clone() }),
            },
        }
    }

    let extra = segments.len().saturating_sub(schema.positional.len());
    if extra > 0 {
        if !schema.variadic {
            return Err(CallError::UnexpectedPathSegments { count: extra });
        }
        for segment in &segments[schema.positional.len()..] {
            args.tail.push(Value::String(segment.clone()));
        }
    }

    let mut consumed: Vec<&str> = Vec::new();
    for spec in &schema.named {
        consumed.extend(spec.accepted_names());
        match gather(spec, merged) {
            Some(raws) => args.insert(spec.dest(), collect(spec, &raws)?),
            None if spec.default.is_some() => {
                args.insert(spec.dest(), spec.default.clone().unwrap_or(Value::Null));
            }
            None if spec.required => return Err(CallError::missing_parameter(spec.name())),
            None => {}
        }
    }

    // the schema is authoritative: unknown keys are ignored unless the
    // method opted into open keywords
    if schema.open_keywords {
        for key in merged.keys() {
            if consumed.contains(&key) || args.keywords.contains_key(key) {
                continue;
            }
            let values = merged.get_all(key);
            let value = match values.len() {
                1 => Value::String(values[0].to_owned()),
                _ => Value::Array(values.into_iter().map(|v| Value::String(v.to_owned())).collect()),
            };
            args.insert(key, value);
        }
    }

    Ok(args)
}

/// The raw occurrences for a spec, empty strings filtered out unless the
/// parameter explicitly accepts them. `None` means "absent".
fn gather<'m>(spec: &ParamSpec, merged: &'m Params) -> Option<Vec<&'m str>> {
    for name in spec.accepted_names() {
        if !merged.contains(name) {
            continue;
        }
        let raws: Vec<&str> =
            merged.get_all(name).into_iter().filter(|raw| spec.allow_empty || !raw.is_empty()).collect();
        if !raws.is_empty() {
            return Some(raws);
        }
    }
    None
}

/// Applies the parameter's list action, then coerces and validates.
fn collect(spec: &ParamSpec, raws: &[&str]) -> Result<Value, CallError> {
    match spec.list {
        ListAction::None => spec.coerce_checked(raws[0]),
        ListAction::Repeat => {
            let items = raws.iter().map(|raw| spec.coerce_checked(raw)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
        ListAction::Split => {
            if raws.len() > 1 {
                return Err(CallError::CoercionFailed {
                    name: spec.name().to_owned(),
                    value: raws.join(","),
                    expected: "a single comma-delimited value".to_owned(),
                });
            }
            let items = raws[0].split(',').map(|raw| spec.coerce_checked(raw)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
        ListAction::RepeatSplit => {
            let items = raws
                .iter()
                .flat_map(|raw| raw.split(','))
                .map(|raw| spec.coerce_checked(raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
    }
}
