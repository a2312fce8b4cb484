//! Accept-header-driven version selection.
//!
//! A request opts into an API version through a parameter on its Accept
//! header (`Accept: application/json;version=v2`). [`AcceptHeader`] parses
//! the header into an ordered list of media ranges (RFC 2616 precedence:
//! quality first, then specificity, then parameter count) and
//! [`select`] narrows a handler class's methods for a verb down to the
//! candidates answering the requested tag.

use http::Method;
use mime::Mime;

use crate::error::CallError;
use crate::registry::{HandlerClass, MethodEntry};

/// A parsed Accept header: media ranges ordered most-preferred first.
#[derive(Debug, Clone)]
pub struct AcceptHeader {
    ranges: Vec<MediaRange>,
}

#[derive(Debug, Clone)]
struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
    params: Vec<(String, String)>,
}

impl MediaRange {
    fn parse(part: &str) -> Option<Self> {
        let mut pieces = part.split(';');
        let media_type = pieces.next()?.trim();
        let (kind, subtype) = media_type.split_once('/')?;

        let mut quality = 1.0f32;
        let mut params = Vec::new();
        for piece in pieces {
            let Some((key, value)) = piece.split_once('=') else { continue };
            let (key, value) = (key.trim(), value.trim());
            if key == "q" {
                quality = value.parse().unwrap_or(1.0);
            } else {
                params.push((key.to_owned(), value.to_owned()));
            }
        }

        Some(Self { kind: kind.trim().to_owned(), subtype: subtype.trim().to_owned(), quality, params })
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// RFC 2616 precedence: quality, then specificity, then verbosity.
    fn precedence(&self) -> (f32, bool, bool, usize) {
        (self.quality, self.kind != "*", self.subtype != "*", self.params.len())
    }

    fn matches(&self, mime: &Mime) -> bool {
        let kind_matches = self.kind == "*" || self.kind == mime.type_().as_str();
        let subtype_matches = self.subtype == "*" || self.subtype == mime.subtype().as_str();
        kind_matches && subtype_matches
    }
}

impl AcceptHeader {
    pub fn parse(header: &str) -> Self {
        let mut ranges: Vec<MediaRange> = header.split(',').filter_map(MediaRange::parse).collect();
        ranges.sort_by(|a, b| {
            let (aq, ak, asub, ap) = a.precedence();
            let (bq, bk, bsub, bp) = b.precedence();
            bq.total_cmp(&aq).then(bk.cmp(&ak)).then(bsub.cmp(&asub)).then(bp.cmp(&ap))
        });
        Self { ranges }
    }

    /// The version tag requested for `content_type`: the first matching
    /// media range, in precedence order, that carries a `version` param.
    pub fn version_for(&self, content_type: &Mime) -> Option<String> {
        self.ranges
            .iter()
            .filter(|range| range.matches(content_type))
            .find_map(|range| range.param("version"))
            .map(str::to_owned)
    }
}

/// Narrows `class`'s methods for `verb` to the entries answering `tag`.
///
/// Returns the candidates in declaration order — more than one only when
/// route guards discriminate between them (unguarded duplicates were
/// rejected when the registry was built). Fails with `VerbNotAllowed` when
/// the class has no method for the verb at all, and `VersionNotSatisfiable`
/// when methods exist but none answers the requested tag.
pub fn select<'c>(
    class: &'c HandlerClass,
    verb: &Method,
    tag: Option<&str>,
) -> Result<Vec<&'c MethodEntry>, CallError> {
    let for_verb: Vec<&MethodEntry> = class.methods().iter().filter(|entry| entry.verb() == verb).collect();
    if for_verb.is_empty() {
        return Err(CallError::verb_not_allowed(verb.clone(), class.name()));
    }

    let tag = tag.unwrap_or("");
    let matching: Vec<&MethodEntry> = for_verb.into_iter().filter(|entry| entry.answers_to(tag)).collect();
    if matching.is_empty() {
        return Err(CallError::VersionNotSatisfiable { verb: verb.clone(), tag: tag.to_owned() });
    }

    Ok(matching)
}
