//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Environment filters in LDAP syntax.
//!
//! ```
//! use libprov::metadata::{Environment, Filter};
//!
//! let f = Filter::parse("(&(os=linux)(|(arch=x86_64)(arch=aarch64)))").unwrap();
//! let mut env = Environment::new();
//! env.insert("os", "linux");
//! env.insert("arch", "aarch64");
//! assert!(f.matches(&env));
//! ```

use crate::metadata::Version;
use miette::Diagnostic;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FilterError {
    #[error(transparent)]
    #[diagnostic(
        code(prov::filter_error::parser),
        help("Filters look like (&(os=linux)(arch=x86_64)).")
    )]
    ParserError(#[from] pest::error::Error<Rule>),

    #[error(transparent)]
    #[diagnostic(code(prov::filter_error::pattern))]
    Pattern(#[from] regex::Error),

    #[error("unexpected element {0} in filter")]
    #[diagnostic(code(prov::filter_error::unexpected))]
    Unexpected(String),
}

type Result<T> = std::result::Result<T, FilterError>;

#[derive(Parser)]
#[grammar = "metadata/filter.pest"]
struct FilterParser;

/// Key/value properties a filter is evaluated against, such as `os`, `ws` and `arch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    pub fn new() -> Self {
        Environment::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks a key up exactly first and then ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.0.get(key) {
            return Some(v.as_str());
        }
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Parses `key=value` pairs separated by commas. Entries without `=` are ignored.
    pub fn from_spec(spec: &str) -> Self {
        let mut env = Environment::new();
        for entry in spec.split(',') {
            if let Some((k, v)) = entry.split_once('=') {
                let k = k.trim();
                if !k.is_empty() {
                    env.insert(k, v.trim());
                }
            }
        }
        env
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Environment(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

/// Right-hand side of an equality test. `*` is a wildcard unless escaped.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    literal: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Result<Pattern> {
        let source = source.into();
        let parts = segments(&source);
        let regex = if parts.len() > 1 {
            let body: Vec<String> = parts.iter().map(|p| regex::escape(p)).collect();
            Some(Regex::new(&format!("^(?s:{})$", body.join(".*")))?)
        } else {
            None
        };
        let literal = parts.into_iter().next().unwrap_or_default();
        Ok(Pattern {
            source,
            literal,
            regex,
        })
    }

    /// The pattern as written, escapes included.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, actual: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(actual),
            None => self.literal == actual,
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl std::hash::Hash for Pattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.source.cmp(&other.source)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parsed filter expression. Values keep their escape sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, Pattern),
    Approx(String, String),
    GreaterEq(String, String),
    LessEq(String, String),
}

impl Filter {
    pub fn parse(text: &str) -> Result<Filter> {
        let pairs = FilterParser::parse(Rule::filter, text)?;
        for pair in pairs {
            if pair.as_rule() == Rule::filter {
                for inner in pair.into_inner() {
                    if inner.as_rule() != Rule::EOI {
                        return build(inner);
                    }
                }
            }
        }
        Err(FilterError::Unexpected(text.to_string()))
    }

    pub fn matches(&self, env: &Environment) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(env)),
            Filter::Or(children) => children.iter().any(|c| c.matches(env)),
            Filter::Not(child) => !child.matches(env),
            Filter::Present(key) => env.get(key).is_some(),
            Filter::Equal(key, pattern) => env
                .get(key)
                .map(|actual| pattern.matches(actual))
                .unwrap_or(false),
            Filter::Approx(key, value) => env
                .get(key)
                .map(|actual| normalize(actual) == normalize(&unescape(value)))
                .unwrap_or(false),
            Filter::GreaterEq(key, value) => env
                .get(key)
                .map(|actual| compare(actual, &unescape(value)).is_ge())
                .unwrap_or(false),
            Filter::LessEq(key, value) => env
                .get(key)
                .map(|actual| compare(actual, &unescape(value)).is_le())
                .unwrap_or(false),
        }
    }
}

fn build(pair: Pair<'_, Rule>) -> Result<Filter> {
    match pair.as_rule() {
        Rule::and => Ok(Filter::And(
            pair.into_inner().map(build).collect::<Result<Vec<_>>>()?,
        )),
        Rule::or => Ok(Filter::Or(
            pair.into_inner().map(build).collect::<Result<Vec<_>>>()?,
        )),
        Rule::not => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| FilterError::Unexpected("empty negation".to_string()))?;
            Ok(Filter::Not(Box::new(build(inner)?)))
        }
        Rule::item => {
            let mut key = String::new();
            let mut op = "";
            let mut value = String::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::key => key = part.as_str().trim().to_string(),
                    Rule::op => op = part.as_str(),
                    Rule::value => value = part.as_str().trim().to_string(),
                    other => return Err(FilterError::Unexpected(format!("{:?}", other))),
                }
            }
            Ok(match op {
                "=" if value == "*" => Filter::Present(key),
                "=" => Filter::Equal(key, Pattern::new(value)?),
                "~=" => Filter::Approx(key, value),
                ">=" => Filter::GreaterEq(key, value),
                "<=" => Filter::LessEq(key, value),
                other => return Err(FilterError::Unexpected(other.to_string())),
            })
        }
        other => Err(FilterError::Unexpected(format!("{:?}", other))),
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn compare(actual: &str, expected: &str) -> std::cmp::Ordering {
    match (Version::parse(actual), Version::parse(expected)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => actual.cmp(expected),
    }
}

/// Splits a pattern on unescaped `*` into literal segments.
fn segments(pattern: &str) -> Vec<String> {
    let mut out = vec![String::new()];
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if let Some(last) = out.last_mut() {
                        last.push(next);
                    }
                }
            }
            '*' => out.push(String::new()),
            _ => {
                if let Some(last) = out.last_mut() {
                    last.push(c);
                }
            }
        }
    }
    out
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl TryFrom<String> for Filter {
    type Error = FilterError;

    fn try_from(s: String) -> Result<Self> {
        Filter::parse(&s)
    }
}

impl From<Filter> for String {
    fn from(f: Filter) -> Self {
        f.to_string()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                write!(f, "({}", if matches!(self, Filter::And(_)) { '&' } else { '|' })?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            Filter::Not(child) => write!(f, "(!{})", child),
            Filter::Present(k) => write!(f, "({}=*)", k),
            Filter::Equal(k, v) => write!(f, "({}={})", k, v),
            Filter::Approx(k, v) => write!(f, "({}~={})", k, v),
            Filter::GreaterEq(k, v) => write!(f, "({}>={})", k, v),
            Filter::LessEq(k, v) => write!(f, "({}<={})", k, v),
        }
    }
}
