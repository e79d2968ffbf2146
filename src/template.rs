//! Mountpoint root templates
//!
//! A disk root such as `{root}/home/{username}` is parsed once into a token
//! list. Static tokens (`{root}` and anything under `vars:` in the config) are
//! substituted at parse time; dynamic tokens are resolved per request from the
//! caller's identity. An unknown token is a configuration error, not a
//! literal.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::auth::User;
use crate::error::{Result, VfsError};

/// Placeholder syntax: {name}
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Values only known once a request arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DynamicVar {
    Username,
}

impl DynamicVar {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "username" => Some(DynamicVar::Username),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DynamicVar::Username => "username",
        }
    }

    /// Value of this variable for a user
    pub fn value_for<'a>(&self, user: &'a User) -> &'a str {
        match self {
            DynamicVar::Username => &user.username,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Variable(DynamicVar),
}

/// Concrete dynamic values recovered from or applied to a template
pub type Segments = BTreeMap<DynamicVar, String>;

/// Parsed root template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTemplate {
    source: String,
    tokens: Vec<Token>,
}

impl RootTemplate {
    /// Parse a template, substituting static values immediately
    pub fn parse(source: &str, statics: &HashMap<String, String>) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut last = 0;

        for caps in TOKEN_PATTERN.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

            push_literal(&mut tokens, &source[last..whole.start()]);

            if let Some(value) = statics.get(name) {
                push_literal(&mut tokens, value);
            } else if let Some(var) = DynamicVar::from_name(name) {
                tokens.push(Token::Variable(var));
            } else {
                return Err(VfsError::Config(format!(
                    "Unknown token {{{}}} in root template '{}'",
                    name, source
                )));
            }

            last = whole.end();
        }
        push_literal(&mut tokens, &source[last..]);

        Ok(Self {
            source: source.to_string(),
            tokens,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_dynamic(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, Token::Variable(_)))
    }

    /// Resolve the real root directory for a caller
    pub fn resolve(&self, user: &User) -> Result<PathBuf> {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Variable(var) => {
                    let value = var.value_for(user);
                    if !is_single_component(value) {
                        return Err(VfsError::InvalidArgument(format!(
                            "Cannot use '{}' as {{{}}}",
                            value,
                            var.name()
                        )));
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(PathBuf::from(out))
    }

    /// Segments this user contributes to the template
    pub fn segments_for(&self, user: &User) -> Segments {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Variable(var) => Some((*var, var.value_for(user).to_string())),
                Token::Literal(_) => None,
            })
            .collect()
    }

    /// Deepest directory that does not depend on any dynamic value.
    ///
    /// This is where a recursive watcher has to be anchored.
    pub fn static_base(&self) -> PathBuf {
        let mut prefix = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => prefix.push_str(s),
                Token::Variable(_) => {
                    // Drop the partial component in front of the variable
                    if let Some(idx) = prefix.rfind('/') {
                        prefix.truncate(idx.max(1));
                    } else {
                        prefix.clear();
                    }
                    break;
                }
            }
        }
        PathBuf::from(prefix)
    }

    /// Template with each dynamic segment replaced by `*`
    pub fn wildcard(&self) -> String {
        self.tokens
            .iter()
            .map(|t| match t {
                Token::Literal(s) => s.as_str(),
                Token::Variable(_) => "*",
            })
            .collect()
    }

    /// Build a matcher that recovers dynamic values from a changed real path
    pub fn matcher(&self) -> Result<TemplateMatcher> {
        let mut pattern = String::from("^");
        let mut vars = Vec::new();
        let last = self.tokens.len().saturating_sub(1);
        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Literal(s) if i == last => {
                    pattern.push_str(&regex::escape(s.trim_end_matches('/')))
                }
                Token::Literal(s) => pattern.push_str(&regex::escape(s)),
                Token::Variable(var) => {
                    pattern.push_str("([^/]+)");
                    vars.push(*var);
                }
            }
        }
        pattern.push_str("(?:/(.*))?$");

        let regex = Regex::new(&pattern)
            .map_err(|e| VfsError::Config(format!("Bad root template '{}': {}", self.source, e)))?;
        Ok(TemplateMatcher { regex, vars })
    }
}

fn push_literal(tokens: &mut Vec<Token>, s: &str) {
    if s.is_empty() {
        return;
    }
    if let Some(Token::Literal(prev)) = tokens.last_mut() {
        prev.push_str(s);
    } else {
        tokens.push(Token::Literal(s.to_string()));
    }
}

/// Regex derived from a root template
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    regex: Regex,
    vars: Vec<DynamicVar>,
}

impl TemplateMatcher {
    /// Split a real path into dynamic segment values and the path relative
    /// to the resolved root. Returns `None` for paths outside the template.
    pub fn split(&self, real: &str) -> Option<(Segments, String)> {
        let caps = self.regex.captures(real)?;
        let mut segments = Segments::new();
        for (i, var) in self.vars.iter().enumerate() {
            let value = caps.get(i + 1)?.as_str().to_string();
            segments.insert(*var, value);
        }
        let relative = caps
            .get(self.vars.len() + 1)
            .map(|m| m.as_str())
            .unwrap_or_default();
        Some((segments, format!("/{}", relative)))
    }
}

/// A dynamic value must name exactly one ordinary directory entry
fn is_single_component(value: &str) -> bool {
    if value.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
