//! Resource URI templates.
//!
//! Supports the two RFC 6570 forms resource patterns need: `{name}` binds
//! one non-empty path segment and `{+name}` binds any non-empty remainder,
//! slashes included. Everything else is literal and must match exactly.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use regex::Regex;

use crate::{AppError, Result};

/// Compiled URI template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    raw: String,
    pattern: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Compile `raw`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` for unbalanced braces, empty or
    /// non-alphanumeric variable names, or a variable used twice.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut expr = String::from("^");
        let mut variables: Vec<String> = Vec::new();
        let mut rest = raw;

        while !rest.is_empty() {
            let Some(open) = rest.find(['{', '}']) else {
                expr.push_str(&regex::escape(rest));
                break;
            };
            if rest[open..].starts_with('}') {
                return Err(AppError::Registry(format!(
                    "unbalanced '}}' in uri template {raw}"
                )));
            }
            expr.push_str(&regex::escape(&rest[..open]));

            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                AppError::Registry(format!("unterminated variable in uri template {raw}"))
            })?;
            let spec = &after[..close];
            let (reserved, name) = match spec.strip_prefix('+') {
                Some(name) => (true, name),
                None => (false, spec),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(AppError::Registry(format!(
                    "invalid variable name {spec:?} in uri template {raw}"
                )));
            }
            if variables.iter().any(|v| v == name) {
                return Err(AppError::Registry(format!(
                    "variable {name} repeated in uri template {raw}"
                )));
            }
            variables.push(name.to_owned());
            expr.push_str(if reserved { "(.+)" } else { "([^/?#]+)" });

            rest = &after[close + 1..];
        }
        expr.push('$');

        let pattern = Regex::new(&expr)
            .map_err(|err| AppError::Registry(format!("uri template {raw}: {err}")))?;
        Ok(Self {
            raw: raw.to_owned(),
            pattern,
            variables,
        })
    }

    /// Variables bound by `uri`, or `None` when it does not fully match.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.pattern.captures(uri)?;
        Some(
            self.variables
                .iter()
                .enumerate()
                .filter_map(|(idx, name)| {
                    captures
                        .get(idx + 1)
                        .map(|m| (name.clone(), m.as_str().to_owned()))
                })
                .collect(),
        )
    }

    /// Variable names in order of appearance.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Whether the template binds any variable.
    #[must_use]
    pub fn is_template(&self) -> bool {
        !self.variables.is_empty()
    }

    /// Template source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Display for UriTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
