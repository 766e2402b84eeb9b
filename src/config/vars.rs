//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` and `${VAR}` substitute the variable and fail when it is unset
//! - `${VAR:-default}` falls back when VAR is unset or empty
//! - `${VAR-default}` falls back only when VAR is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<fallback>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable reference pattern is valid")
});

/// A single `$...` reference found in the config text.
#[derive(Debug, PartialEq, Eq)]
enum Reference<'a> {
    Escape,
    Variable {
        name: &'a str,
        fallback: Option<Fallback<'a>>,
    },
}

/// Fallback attached to a braced reference.
#[derive(Debug, PartialEq, Eq)]
struct Fallback<'a> {
    value: &'a str,
    /// `:-` also applies when the variable is set but empty.
    when_empty: bool,
}

impl<'a> Reference<'a> {
    fn from_captures(caps: &Captures<'a>) -> Self {
        if caps.name("escape").is_some() {
            return Reference::Escape;
        }

        let name = caps
            .name("braced")
            .or_else(|| caps.name("bare"))
            .map_or("", |m| m.as_str());
        let fallback = caps.name("fallback").map(|value| Fallback {
            value: value.as_str(),
            when_empty: caps.name("op").is_some_and(|op| op.as_str() == ":-"),
        });

        Reference::Variable { name, fallback }
    }

    fn resolve(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String, String> {
        let (name, fallback) = match self {
            Reference::Escape => return Ok("$".to_string()),
            Reference::Variable { name, fallback } => (*name, fallback),
        };

        match (lookup(name), fallback) {
            (Some(value), _) if value.contains(['\n', '\r']) => Err(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            )),
            (Some(value), Some(fb)) if value.is_empty() && fb.when_empty => {
                Ok(fb.value.to_string())
            }
            (Some(value), _) => Ok(value),
            (None, Some(fb)) => Ok(fb.value.to_string()),
            (None, None) => Err(format!("environment variable '{name}' is not set")),
        }
    }
}

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text. Unresolved references are left verbatim.
    pub text: String,
    /// Every reference that could not be resolved.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if every reference resolved.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
///
/// Errors are collected rather than short-circuited so that a config with
/// several missing variables reports all of them at once.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| env::var(name).ok())
}

fn interpolate_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = REFERENCE
        .replace_all(input, |caps: &Captures| {
            match Reference::from_captures(caps).resolve(&lookup) {
                Ok(value) => value,
                Err(message) => {
                    errors.push(message);
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_bare_and_braced_references() {
        let lookup = lookup_from(&[("BUCKET", "alerts"), ("NIGHT", "20240115")]);
        let result = interpolate_with("path: s3://$BUCKET/raw/${NIGHT}", lookup);
        assert!(result.is_ok());
        assert_eq!(result.text, "path: s3://alerts/raw/20240115");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let result = interpolate_with("a: $FIRST, b: ${SECOND}", lookup_from(&[]));
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("FIRST"));
        assert!(result.errors[1].contains("SECOND"));
        assert_eq!(result.text, "a: $FIRST, b: ${SECOND}");
    }

    #[test]
    fn test_colon_fallback_covers_empty_values() {
        let lookup = lookup_from(&[("EMPTY", "")]);
        let result = interpolate_with("v: ${EMPTY:-30}", lookup);
        assert_eq!(result.text, "v: 30");
    }

    #[test]
    fn test_plain_fallback_keeps_empty_values() {
        let lookup = lookup_from(&[("EMPTY", "")]);
        let result = interpolate_with("v: ${EMPTY-30}", lookup);
        assert_eq!(result.text, "v: ");
    }

    #[test]
    fn test_fallback_when_unset() {
        let result = interpolate_with("v: ${UNSET-30} ${UNSET:-60}", lookup_from(&[]));
        assert!(result.is_ok());
        assert_eq!(result.text, "v: 30 60");
    }

    #[test]
    fn test_set_variable_wins_over_fallback() {
        let lookup = lookup_from(&[("INTERVAL", "10")]);
        let result = interpolate_with("v: ${INTERVAL:-30}", lookup);
        assert_eq!(result.text, "v: 10");
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate_with("price: $$100", lookup_from(&[]));
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }

    #[test]
    fn test_newlines_are_rejected() {
        let lookup = lookup_from(&[("INJECT", "a\nb"), ("INJECT_CR", "a\rb")]);
        let result = interpolate_with("v: $INJECT $INJECT_CR", lookup);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.contains("newlines")));
    }

    #[test]
    fn test_process_environment_lookup() {
        let result = interpolate("no references here");
        assert!(result.is_ok());
        assert_eq!(result.text, "no references here");
    }
}
