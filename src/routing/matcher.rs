//! Path pattern matching
//!
//! Patterns are literal paths with `{name}` or `{name:regex}` variables. A
//! bare variable matches one path segment; a variable with a regex matches
//! whatever the regex accepts.

use std::collections::HashMap;

use regex::Regex;

use crate::error::RouteError;

const DEFAULT_VARIABLE: &str = "[^/]+";

/// Compiled route pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
    names: Vec<String>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::Pattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };
        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let mut source = String::from("^");
        let mut names = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.char_indices();

        while let Some((start, c)) = chars.next() {
            match c {
                '{' => {
                    let end = variable_end(pattern, start).ok_or_else(|| invalid("unbalanced braces"))?;
                    let body = &pattern[start + 1..end];
                    let (name, re) = body.split_once(':').unwrap_or((body, DEFAULT_VARIABLE));
                    if name.is_empty() {
                        return Err(invalid("variable without a name"));
                    }
                    if names.iter().any(|n| n == name) {
                        return Err(invalid(&format!("duplicate variable {name}")));
                    }

                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(&format!("(?P<v{}>{re})", names.len()));
                    names.push(name.to_string());

                    // Skip the variable body
                    for (i, _) in chars.by_ref() {
                        if i == end {
                            break;
                        }
                    }
                }
                '}' => return Err(invalid("unbalanced braces")),
                _ => literal.push(c),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
            names,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Percent-decoded variable values if `path` matches the whole pattern
    ///
    /// Matching runs on the raw path, so an encoded `/` stays inside its
    /// segment.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.name(&format!("v{i}"))
                        .map(|m| (name.clone(), decode_segment(m.as_str())))
                })
                .collect(),
        )
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned())
}

/// Index of the `}` closing the variable opened at `start`; regex quantifiers
/// such as `{2,4}` nest inside it
fn variable_end(pattern: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in pattern[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_path() {
        let p = PathPattern::parse("/about").unwrap();
        assert!(p.is_match("/about"));
        assert!(!p.is_match("/about/"));
        assert!(!p.is_match("/about/team"));
        assert!(p.captures("/about").unwrap().is_empty());
    }

    #[test]
    fn test_literal_is_escaped() {
        let p = PathPattern::parse("/file.txt").unwrap();
        assert!(p.is_match("/file.txt"));
        assert!(!p.is_match("/fileXtxt"));
    }

    #[test]
    fn test_segment_variable() {
        let p = PathPattern::parse("/users/{id}/posts/{post}").unwrap();
        let vars = p.captures("/users/42/posts/hello").unwrap();
        assert_eq!(vars["id"], "42");
        assert_eq!(vars["post"], "hello");
        assert!(p.captures("/users/42/extra/posts/hello").is_none());
    }

    #[test]
    fn test_regex_variable() {
        let p = PathPattern::parse("/articles/{year:[0-9]{4}}/{slug}").unwrap();
        let vars = p.captures("/articles/2024/rust").unwrap();
        assert_eq!(vars["year"], "2024");
        assert!(p.captures("/articles/24/rust").is_none());
    }

    #[test]
    fn test_variables_are_percent_decoded() {
        let p = PathPattern::parse("/users/{name}").unwrap();
        assert_eq!(p.captures("/users/john%20doe").unwrap()["name"], "john doe");
        assert_eq!(p.captures("/users/a%2Fb").unwrap()["name"], "a/b");
        assert_eq!(p.captures("/users/bad%FF").unwrap()["name"], "bad%FF");
    }

    #[test]
    fn test_regex_may_span_segments() {
        let p = PathPattern::parse("/static/{rest:.*}").unwrap();
        assert_eq!(p.captures("/static/css/site.css").unwrap()["rest"], "css/site.css");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("no-slash").is_err());
        assert!(PathPattern::parse("/a/{id").is_err());
        assert!(PathPattern::parse("/a/id}").is_err());
        assert!(PathPattern::parse("/a/{:x}").is_err());
        assert!(PathPattern::parse("/a/{id}/{id}").is_err());
        assert!(PathPattern::parse("/a/{id:(}").is_err());
    }
}
