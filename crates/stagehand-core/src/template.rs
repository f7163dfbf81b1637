//! `{{name}}` placeholder substitution

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Variables available to templates
pub type Vars = BTreeMap<String, String>;

/// A string with `{{name}}` placeholders
///
/// Whitespace inside the braces is ignored. An opening `{{` without a
/// matching `}}` is kept as literal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The unrendered text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute every placeholder from `vars`
    ///
    /// # Errors
    /// Returns `CoreError::UndefinedVariable` for a placeholder with no value
    pub fn render(&self, vars: &Vars) -> Result<String, CoreError> {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();

        while let Some(((prefix, name), after)) = next_placeholder(rest) {
            out.push_str(prefix);
            let value = vars
                .get(name)
                .ok_or_else(|| CoreError::UndefinedVariable {
                    name: name.to_string(),
                    template: self.0.clone(),
                })?;
            out.push_str(value);
            rest = after;
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Split off the text before the next placeholder, its name, and the remainder
fn next_placeholder(input: &str) -> Option<((&str, &str), &str)> {
    let start = input.find("{{")?;
    let body = &input[start + 2..];
    let end = body.find("}}")?;
    let name = body[..end].trim();
    Some(((&input[..start], name), &body[end + 2..]))
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Template {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Template {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
