//! Error taxonomy for the compiler, the production loader and the runtime.
//!
//! Fatal conditions are `Err` values. Non-fatal conditions (unknown imports,
//! dropped attributes, failed style transpilation, unmatched local rules) are
//! collected as [`Warning`]s on the compiled component and only become errors
//! when the strict policy is enabled.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::TemplateError;

// ═══════════════════════════════════════════════════════════════════════════════
// WARNINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    /// Invocation of an alias that is not imported, or whose target failed to compile.
    UnresolvedReference,
    /// An attribute without its value half.
    MalformedAttribute,
    /// `<default>` declaration whose key is not a `$` variable.
    InvalidDefault,
    /// The external stylesheet compiler failed or reported a diagnostic.
    StyleTranspile,
    /// A component-local rule matched nothing and was dropped.
    UnmatchedRule,
    /// `<style>` found while the style engine is disabled.
    StyleDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub kind: WarningKind,
    pub path: String,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.kind, self.path, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("could not read source '{path}': {source}")]
    UnreadableSource {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("assembled template for '{path}' does not parse: {source}")]
    TemplateParse {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("strict mode: {0}")]
    Strict(Warning),

    #[error("component '{0}' is not compiled")]
    UnknownComponent(String),

    #[error("could not write '{path}': {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub type CompileResult<T> = Result<T, CompileError>;

// ═══════════════════════════════════════════════════════════════════════════════
// PRODUCTION LOADER ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid build artifact: {0}")]
    InvalidArtifact(#[from] serde_json::Error),

    #[error("invalid component record '{path}': {source}")]
    InvalidComponent {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("invalid root record '{path}': {source}")]
    InvalidRoot {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("global handler registered for unknown component '{0}'")]
    UnknownGlobal(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("component '{0}' not found")]
    ComponentNotFound(String),

    #[error("root '{0}' not found")]
    RootNotFound(String),

    #[error("rendering '{path}' failed: {source}")]
    Execute {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("render data does not serialize: {0}")]
    Data(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_display_names_kind_and_path() {
        let w = Warning::new(WarningKind::UnresolvedReference, "a.html", "unknown import 'Card'");
        assert_eq!(
            w.to_string(),
            "[UnresolvedReference] a.html: unknown import 'Card'"
        );
    }

    #[test]
    fn test_strict_error_wraps_warning() {
        let w = Warning::new(WarningKind::UnmatchedRule, "a.html", ".x");
        let err = CompileError::Strict(w);
        assert!(err.to_string().starts_with("strict mode: [UnmatchedRule]"));
    }
}
