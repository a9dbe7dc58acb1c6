//! `${NAME}` expression expansion
//!
//! Commands and environment values may reference variables with the
//! `${NAME}` syntax:
//!
//! ```rust
//! use bgstep::{EnvExpressionResolver, ExpressionResolver};
//! use std::collections::HashMap;
//!
//! let resolver = EnvExpressionResolver::new(HashMap::from([
//!     ("BUILD_NUMBER".to_string(), "42".to_string()),
//! ]));
//! assert_eq!(resolver.resolve("echo ${BUILD_NUMBER}").unwrap(), "echo 42");
//! ```
//!
//! Unknown names are left untouched, and so are references that look like
//! shell parameter expansion (`${VAR:-default}`, `${#VAR}`, `${1}`), so a
//! script can still use them. Empty or unterminated references are errors.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::traits::ExpressionResolver;
use crate::pipeline::ExpressionError;

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").expect("reference pattern is valid"));

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

static SHELL_EXPANSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z_#!][A-Za-z0-9_]*.*|[0-9]+)$").expect("shell pattern is valid")
});

/// Resolver that expands `${NAME}` from a fixed set of variables
#[derive(Debug, Clone, Default)]
pub struct EnvExpressionResolver {
    vars: HashMap<String, String>,
}

impl EnvExpressionResolver {
    /// Creates a resolver over the given variables
    #[must_use]
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Creates a resolver over the current process environment
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::new(std::env::vars().collect())
    }
}

impl ExpressionResolver for EnvExpressionResolver {
    fn resolve(&self, raw: &str) -> Result<String, ExpressionError> {
        let mut resolved = String::with_capacity(raw.len());
        let mut last = 0;

        for caps in REFERENCE.captures_iter(raw) {
            let Some(whole) = caps.get(0) else { continue };
            let name = caps.get(1).map_or("", |m| m.as_str());

            resolved.push_str(&raw[last..whole.start()]);
            if IDENTIFIER.is_match(name) {
                match self.vars.get(name) {
                    Some(value) => resolved.push_str(value),
                    None => resolved.push_str(whole.as_str()),
                }
            } else if SHELL_EXPANSION.is_match(name) {
                resolved.push_str(whole.as_str());
            } else {
                return Err(ExpressionError::Malformed {
                    offset: whole.start(),
                    fragment: whole.as_str().to_string(),
                });
            }
            last = whole.end();
        }

        let tail = &raw[last..];
        if let Some(pos) = tail.find("${") {
            return Err(ExpressionError::Malformed {
                offset: last + pos,
                fragment: tail[pos..].to_string(),
            });
        }
        resolved.push_str(tail);

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> EnvExpressionResolver {
        EnvExpressionResolver::new(HashMap::from([
            ("BUILD_NUMBER".to_string(), "123".to_string()),
            ("PROJECT".to_string(), "my-app".to_string()),
        ]))
    }

    #[test]
    fn test_expand_simple() {
        assert_eq!(resolver().resolve("echo ${BUILD_NUMBER}").unwrap(), "echo 123");
    }

    #[test]
    fn test_expand_multiple() {
        assert_eq!(
            resolver()
                .resolve("Building ${PROJECT} #${BUILD_NUMBER}")
                .unwrap(),
            "Building my-app #123"
        );
    }

    #[test]
    fn test_unknown_name_kept() {
        assert_eq!(resolver().resolve("echo ${UNKNOWN}").unwrap(), "echo ${UNKNOWN}");
    }

    #[test]
    fn test_no_references() {
        assert_eq!(resolver().resolve("echo hello world").unwrap(), "echo hello world");
        assert_eq!(resolver().resolve("").unwrap(), "");
    }

    #[test]
    fn test_shell_expansion_kept() {
        let r = resolver();
        assert_eq!(r.resolve("${PORT:-6379}").unwrap(), "${PORT:-6379}");
        assert_eq!(r.resolve("${#PROJECT}").unwrap(), "${#PROJECT}");
        assert_eq!(r.resolve("${10}").unwrap(), "${10}");
    }

    #[test]
    fn test_empty_reference_is_malformed() {
        let err = resolver().resolve("echo ${}").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::Malformed {
                offset: 5,
                fragment: "${}".to_string()
            }
        );
    }

    #[test]
    fn test_digit_led_name_is_malformed() {
        assert!(resolver().resolve("${1X}").is_err());
        assert!(resolver().resolve("${ PROJECT}").is_err());
    }

    #[test]
    fn test_unterminated_reference_is_malformed() {
        let err = resolver().resolve("echo ${PROJECT} ${BUILD").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::Malformed {
                offset: 16,
                fragment: "${BUILD".to_string()
            }
        );
    }
}
