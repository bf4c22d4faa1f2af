//! Route pattern compiler.
//!
//! A pattern such as `/add/{x:d}/{y:d}` is compiled once into an anchored regex
//! used for matching and a template used for reverse URL generation. Supported
//! placeholders:
//!
//! * `{name}` or `{name:str}` - a single path segment
//! * `{name:d}` - a (possibly negative) integer
//! * `{name:f}` - a decimal number
//! * `{name:path}` - anything, slashes included
//! * `{}` - an anonymous wildcard that captures but is not exposed
//!
//! The pattern `{}` on its own is the catch-all root wildcard and is the only
//! pattern allowed not to start with `/`.
use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::error::{RouteDeclarationError, UrlBuildError};

/// Pattern that matches every non-empty path.
pub const ROOT_WILDCARD: &str = "{}";

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(?:([a-zA-Z_][a-zA-Z0-9_]*)(?::([a-zA-Z_]+))?)?\}").expect("valid regex")
});

/// Parameters captured by a successful match, in pattern order.
pub type RawParams = Vec<(String, String)>;

/// Converter tag attached to a named placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternTag {
    Segment,
    Integer,
    Float,
    Path,
}

impl PatternTag {
    fn parse(tag: Option<&str>) -> Option<Self> {
        match tag {
            None | Some("str") | Some("w") => Some(Self::Segment),
            Some("d") | Some("int") => Some(Self::Integer),
            Some("f") | Some("float") => Some(Self::Float),
            Some("path") => Some(Self::Path),
            Some(_) => None,
        }
    }

    fn regex(self) -> &'static str {
        match self {
            Self::Segment => "[^/]+",
            Self::Integer => r"-?\d+",
            Self::Float => r"-?\d+(?:\.\d+)?",
            Self::Path => ".*",
        }
    }
}

/// A named placeholder of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternParam {
    pub name: String,
    pub tag: PatternTag,
}

#[derive(Debug, Clone)]
enum TemplatePart {
    Literal(String),
    Named(String, PatternTag),
    Anonymous,
}

/// An immutable, compiled route pattern.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
    params: Vec<PatternParam>,
    template: Vec<TemplatePart>,
}

impl CompiledPattern {
    /// Compile a route pattern, inserting a leading `/` when it is missing.
    pub fn new(pattern: &str) -> Result<Self, RouteDeclarationError> {
        let source = if pattern == ROOT_WILDCARD || pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{pattern}")
        };

        let mut regex_source = String::from("^");
        let mut params = Vec::new();
        let mut template = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = 0;

        for captures in PLACEHOLDER_RE.captures_iter(&source) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            push_literal(&source, &source[cursor..whole.start()], &mut regex_source, &mut template)?;
            cursor = whole.end();

            let Some(name) = captures.get(1).map(|m| m.as_str()) else {
                regex_source.push_str("(.+)");
                template.push(TemplatePart::Anonymous);
                continue;
            };

            let raw_tag = captures.get(2).map(|m| m.as_str());
            let tag = PatternTag::parse(raw_tag).ok_or_else(|| {
                RouteDeclarationError::UnknownConverter {
                    pattern: source.clone(),
                    param: name.to_string(),
                    tag: raw_tag.unwrap_or_default().to_string(),
                }
            })?;

            if !seen.insert(name.to_string()) {
                return Err(RouteDeclarationError::DuplicateParameter {
                    pattern: source.clone(),
                    param: name.to_string(),
                });
            }

            regex_source.push_str(&format!("(?P<{name}>{})", tag.regex()));
            params.push(PatternParam {
                name: name.to_string(),
                tag,
            });
            template.push(TemplatePart::Named(name.to_string(), tag));
        }
        push_literal(&source, &source[cursor..], &mut regex_source, &mut template)?;
        regex_source.push('$');

        let regex = Regex::new(&regex_source).map_err(|e| RouteDeclarationError::InvalidPattern {
            pattern: source.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source,
            regex,
            params,
            template,
        })
    }

    /// Recompile this pattern underneath a static prefix.
    pub fn with_prefix(&self, prefix: &str) -> Result<Self, RouteDeclarationError> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return Ok(self.clone());
        }
        if self.source == ROOT_WILDCARD {
            return Self::new(&format!("{prefix}/{ROOT_WILDCARD}"));
        }
        Self::new(&format!("{prefix}{}", self.source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn params(&self) -> &[PatternParam] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&PatternParam> {
        self.params.iter().find(|param| param.name == name)
    }

    /// Match a (percent-decoded) path, returning the named captures.
    pub fn match_path(&self, path: &str) -> Option<RawParams> {
        let captures = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .filter_map(|param| {
                    captures
                        .name(&param.name)
                        .map(|value| (param.name.clone(), value.as_str().to_string()))
                })
                .collect(),
        )
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Fill the template with `params`, percent-encoding the values.
    ///
    /// Extra parameters are ignored.
    pub fn format(&self, params: &HashMap<String, String>) -> Result<String, UrlBuildError> {
        let mut url = String::with_capacity(self.source.len());
        for part in &self.template {
            match part {
                TemplatePart::Literal(text) => url.push_str(text),
                TemplatePart::Anonymous => {
                    return Err(UrlBuildError::UnnamedPlaceholder {
                        route: self.source.clone(),
                    });
                }
                TemplatePart::Named(name, tag) => {
                    let value =
                        params
                            .get(name)
                            .ok_or_else(|| UrlBuildError::MissingParameter {
                                route: self.source.clone(),
                                param: name.clone(),
                            })?;
                    if *tag == PatternTag::Path {
                        let segments: Vec<_> =
                            value.split('/').map(urlencoding::encode).collect();
                        url.push_str(&segments.join("/"));
                    } else {
                        url.push_str(&urlencoding::encode(value));
                    }
                }
            }
        }
        Ok(url)
    }
}

fn push_literal(
    pattern: &str,
    literal: &str,
    regex_source: &mut String,
    template: &mut Vec<TemplatePart>,
) -> Result<(), RouteDeclarationError> {
    if literal.is_empty() {
        return Ok(());
    }
    if literal.contains(['{', '}']) {
        return Err(RouteDeclarationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("malformed placeholder near '{literal}'"),
        });
    }
    regex_source.push_str(&regex::escape(literal));
    template.push(TemplatePart::Literal(literal.to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_named_and_tagged_placeholders() {
        let pattern = CompiledPattern::new("/x/{a}/{b:d}").unwrap();
        assert_eq!(
            pattern.match_path("/x/5/7"),
            Some(vec![
                ("a".to_string(), "5".to_string()),
                ("b".to_string(), "7".to_string())
            ])
        );
        assert_eq!(pattern.match_path("/x/5/foo"), None);
        assert_eq!(pattern.match_path("/x/5/7/"), None);
        assert_eq!(pattern.params()[1].tag, PatternTag::Integer);
    }

    #[test]
    fn test_leading_slash_is_inserted() {
        let pattern = CompiledPattern::new("greet/{person}").unwrap();
        assert_eq!(pattern.source(), "/greet/{person}");
        assert!(pattern.is_match("/greet/ada"));
    }

    #[test]
    fn test_root_wildcard_matches_everything() {
        let pattern = CompiledPattern::new(ROOT_WILDCARD).unwrap();
        assert_eq!(pattern.source(), "{}");
        assert!(pattern.is_match("/foo/bar"));
        assert!(pattern.params().is_empty());
        assert_eq!(pattern.match_path("/anything"), Some(vec![]));
    }

    #[test]
    fn test_anonymous_placeholder_is_not_exposed() {
        let pattern = CompiledPattern::new("/files/{}/{name}").unwrap();
        assert_eq!(
            pattern.match_path("/files/a/b/report.pdf"),
            Some(vec![("name".to_string(), "report.pdf".to_string())])
        );
    }

    #[test]
    fn test_path_tag_is_greedy() {
        let pattern = CompiledPattern::new("/static/{rest:path}").unwrap();
        assert_eq!(
            pattern.match_path("/static/css/site.css"),
            Some(vec![("rest".to_string(), "css/site.css".to_string())])
        );
    }

    #[test]
    fn test_float_tag() {
        let pattern = CompiledPattern::new("/price/{amount:f}").unwrap();
        assert!(pattern.is_match("/price/2.50"));
        assert!(pattern.is_match("/price/-3"));
        assert!(!pattern.is_match("/price/2."));
    }

    #[test]
    fn test_unknown_tag_names_pattern_and_param() {
        let err = CompiledPattern::new("/users/{id:uuid}").unwrap_err();
        assert_eq!(
            err,
            RouteDeclarationError::UnknownConverter {
                pattern: "/users/{id:uuid}".to_string(),
                param: "id".to_string(),
                tag: "uuid".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_and_malformed_placeholders() {
        assert!(matches!(
            CompiledPattern::new("/{a}/{a}"),
            Err(RouteDeclarationError::DuplicateParameter { .. })
        ));
        assert!(matches!(
            CompiledPattern::new("/{a"),
            Err(RouteDeclarationError::InvalidPattern { .. })
        ));
        assert!(matches!(
            CompiledPattern::new("/{1abc}"),
            Err(RouteDeclarationError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_literals_are_escaped() {
        let pattern = CompiledPattern::new("/v1.0/items").unwrap();
        assert!(pattern.is_match("/v1.0/items"));
        assert!(!pattern.is_match("/v1x0/items"));
    }

    #[test]
    fn test_format_round_trip() {
        let pattern = CompiledPattern::new("/x/{a}/{b:d}").unwrap();
        let url = pattern.format(&params(&[("a", "5"), ("b", "7")])).unwrap();
        assert_eq!(url, "/x/5/7");
        assert_eq!(
            pattern.match_path(&url),
            Some(vec![
                ("a".to_string(), "5".to_string()),
                ("b".to_string(), "7".to_string())
            ])
        );
    }

    #[test]
    fn test_format_encodes_values() {
        let pattern = CompiledPattern::new("/greet/{person}").unwrap();
        let url = pattern.format(&params(&[("person", "Ada Lovelace")])).unwrap();
        assert_eq!(url, "/greet/Ada%20Lovelace");

        let pattern = CompiledPattern::new("/static/{rest:path}").unwrap();
        let url = pattern.format(&params(&[("rest", "css/a b.css")])).unwrap();
        assert_eq!(url, "/static/css/a%20b.css");
    }

    #[test]
    fn test_format_errors() {
        let pattern = CompiledPattern::new("/x/{a}/{b}").unwrap();
        assert_eq!(
            pattern.format(&params(&[("a", "1")])).unwrap_err(),
            UrlBuildError::MissingParameter {
                route: "/x/{a}/{b}".to_string(),
                param: "b".to_string(),
            }
        );

        let pattern = CompiledPattern::new("/files/{}").unwrap();
        assert!(matches!(
            pattern.format(&HashMap::new()),
            Err(UrlBuildError::UnnamedPlaceholder { .. })
        ));
    }

    #[test]
    fn test_with_prefix() {
        let pattern = CompiledPattern::new("/{id:d}").unwrap();
        let prefixed = pattern.with_prefix("/users/").unwrap();
        assert_eq!(prefixed.source(), "/users/{id:d}");
        assert!(prefixed.is_match("/users/3"));

        let wildcard = CompiledPattern::new(ROOT_WILDCARD).unwrap();
        assert_eq!(wildcard.with_prefix("/docs").unwrap().source(), "/docs/{}");
    }
}
