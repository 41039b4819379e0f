//! Template runtime
//!
//! A Go-template compatible subset executed over `serde_json::Value`. Compiled
//! components and roots are parsed into a [`Template`] once and executed per
//! request with an [`ExecContext`] carrying custom functions and the
//! per-request table of rendered global components.

mod exec;
mod funcs;
mod lexer;
mod parse;

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

pub use funcs::{escape_html, print_value, truthy, FuncFn, FuncMap};
pub use parse::{Command, Node, Operand, Pipeline};

use parse::Tree;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{0}")]
    Exec(String),

    #[error("function \"{0}\" not defined")]
    UnknownFunction(String),

    #[error("no such template \"{0}\"")]
    UnknownTemplate(String),

    #[error("exceeded maximum template depth ({0})")]
    Depth(usize),
}

/// Render-time collaborators for one execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecContext<'a> {
    pub funcs: Option<&'a FuncMap>,
    /// Rendered global components by path, read by the `global` function.
    pub globals: Option<&'a HashMap<String, String>>,
}

impl<'a> ExecContext<'a> {
    pub fn with_funcs(mut self, funcs: &'a FuncMap) -> Self {
        self.funcs = Some(funcs);
        self
    }

    pub fn with_globals(mut self, globals: &'a HashMap<String, String>) -> Self {
        self.globals = Some(globals);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Template {
    name: String,
    source: String,
    tree: Tree,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let tree = parse::parse(&source)?;
        Ok(Self {
            name: name.into(),
            source,
            tree,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Top-level nodes, for static analysis.
    pub fn nodes(&self) -> &[Node] {
        &self.tree.root
    }

    /// Names declared with `define` or `block`.
    pub fn defined(&self) -> impl Iterator<Item = &str> {
        self.tree.defines.keys().map(String::as_str)
    }

    pub fn has_defined(&self, name: &str) -> bool {
        self.tree.defines.contains_key(name)
    }

    pub fn execute(&self, data: &Value, ctx: ExecContext<'_>) -> Result<String, TemplateError> {
        exec::State::new(&self.tree, ctx, data).run(&self.tree.root, data)
    }

    /// Execute a `define`d or `block` sub-template by name.
    pub fn execute_defined(&self, name: &str, data: &Value, ctx: ExecContext<'_>) -> Result<String, TemplateError> {
        let body = self
            .tree
            .defines
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;
        exec::State::new(&self.tree, ctx, data).run(body, data)
    }
}
