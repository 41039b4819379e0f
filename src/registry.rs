//! Render-time registry.
//!
//! Holds compiled components and roots, custom template functions and the
//! handlers of global (deferred) components. Rendering a component first
//! renders every global it references, one rayon task per distinct global,
//! and exposes the results to the template through the `global` function.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::compiler::Compiler;
use crate::component::{Component, Root};
use crate::error::{LoadError, RenderError};
use crate::naming::normalize_path;
use crate::template::{ExecContext, FuncMap};

/// Produces the data of a global component for one request.
pub type GlobalHandler = Arc<dyn Fn(&RenderRequest, &Map<String, Value>) -> Value + Send + Sync>;

/// Request context handed to global handlers. Opaque to the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderRequest {
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Application values, e.g. the session user.
    pub values: Map<String, Value>,
}

impl RenderRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// Per-call options of [`Registry::write`].
#[derive(Clone)]
pub enum GlobalOption {
    /// Use `handler` for the global at `path` instead of the registered one.
    Handler { path: String, handler: GlobalHandler },
    /// Named arguments passed to every handler. Bundles merge left to right.
    Arguments(Map<String, Value>),
}

impl GlobalOption {
    pub fn handler<F>(path: &str, f: F) -> Self
    where
        F: Fn(&RenderRequest, &Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        GlobalOption::Handler {
            path: normalize_path(path),
            handler: Arc::new(f),
        }
    }

    /// Arguments from a JSON object. Other values contribute nothing.
    pub fn arguments(value: Value) -> Self {
        match value {
            Value::Object(map) => GlobalOption::Arguments(map),
            _ => GlobalOption::Arguments(Map::new()),
        }
    }
}

impl fmt::Debug for GlobalOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalOption::Handler { path, .. } => f.debug_struct("Handler").field("path", path).finish(),
            GlobalOption::Arguments(map) => f.debug_tuple("Arguments").field(map).finish(),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    pub(crate) components: HashMap<String, Arc<Component>>,
    pub(crate) roots: HashMap<String, Arc<Root>>,
    handlers: HashMap<String, GlobalHandler>,
    funcs: FuncMap,
    pub(crate) stylesheet: String,
    pub(crate) tailwind_styles: String,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut components: Vec<&String> = self.components.keys().collect();
        components.sort();
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("Registry")
            .field("components", &components)
            .field("roots", &self.roots.len())
            .field("handlers", &handlers)
            .field("funcs", &self.funcs)
            .finish()
    }
}

impl Registry {
    pub fn new(funcs: FuncMap) -> Self {
        Self {
            funcs,
            ..Self::default()
        }
    }

    /// Snapshot of everything `compiler` has compiled so far.
    pub fn from_compiler(compiler: &Compiler, funcs: FuncMap) -> Self {
        let mut registry = Self::new(funcs);
        for component in compiler.components() {
            registry.components.insert(component.path.clone(), component);
        }
        for root in compiler.roots() {
            registry.roots.insert(root.path.clone(), root);
        }
        registry.stylesheet = compiler.stylesheet();
        registry
    }

    pub fn insert_component(&mut self, component: Arc<Component>) {
        self.components.insert(component.path.clone(), component);
    }

    pub fn insert_root(&mut self, root: Arc<Root>) {
        self.roots.insert(root.path.clone(), root);
    }

    pub fn funcs_mut(&mut self) -> &mut FuncMap {
        &mut self.funcs
    }

    pub fn stylesheet(&self) -> &str {
        &self.stylesheet
    }

    pub fn tailwind_styles(&self) -> &str {
        &self.tailwind_styles
    }

    pub fn component(&self, path: &str) -> Result<&Arc<Component>, RenderError> {
        let path = normalize_path(path);
        self.components
            .get(&path)
            .ok_or(RenderError::ComponentNotFound(path))
    }

    pub fn root(&self, path: &str) -> Result<&Arc<Root>, RenderError> {
        let path = normalize_path(path);
        self.roots.get(&path).ok_or(RenderError::RootNotFound(path))
    }

    /// Register the handler of the global component at `path`.
    pub fn set_global_handler(&mut self, path: &str, handler: GlobalHandler) -> Result<(), LoadError> {
        let path = normalize_path(path);
        match self.components.get(&path) {
            Some(component) if component.global => {
                self.handlers.insert(path, handler);
                Ok(())
            }
            _ => Err(LoadError::UnknownGlobal(path)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RENDERING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Render the component at `path` with `data`.
    pub fn write(
        &self,
        path: &str,
        request: &RenderRequest,
        data: &Value,
        options: &[GlobalOption],
    ) -> Result<String, RenderError> {
        let component = self.component(path)?;
        let globals = self.render_globals(component, request, options)?;
        let ctx = ExecContext::default()
            .with_funcs(&self.funcs)
            .with_globals(&globals);

        component
            .template
            .execute(data, ctx)
            .map_err(|source| RenderError::Execute {
                path: component.path.clone(),
                source,
            })
    }

    /// [`Registry::write`] with serializable data.
    pub fn render<T: Serialize + ?Sized>(
        &self,
        path: &str,
        request: &RenderRequest,
        data: &T,
        options: &[GlobalOption],
    ) -> Result<String, RenderError> {
        let data = serde_json::to_value(data)?;
        self.write(path, request, &data, options)
    }

    /// Render the `define`d or `block` template `block` of a component.
    /// Global markers inside it render empty.
    pub fn write_template(&self, path: &str, block: &str, data: &Value) -> Result<String, RenderError> {
        let component = self.component(path)?;
        let ctx = ExecContext::default().with_funcs(&self.funcs);
        component
            .template
            .execute_defined(block, data, ctx)
            .map_err(|source| RenderError::Execute {
                path: component.path.clone(),
                source,
            })
    }

    pub fn render_template<T: Serialize + ?Sized>(
        &self,
        path: &str,
        block: &str,
        data: &T,
    ) -> Result<String, RenderError> {
        let data = serde_json::to_value(data)?;
        self.write_template(path, block, &data)
    }

    /// Render `component` and wrap it in `root` with `{Body, Data}`.
    pub fn write_root(
        &self,
        root: &str,
        component: &str,
        request: &RenderRequest,
        body_data: &Value,
        root_data: &Value,
        options: &[GlobalOption],
    ) -> Result<String, RenderError> {
        let root = self.root(root)?;
        let body = self.write(component, request, body_data, options)?;
        let data = json!({ "Body": body, "Data": root_data });

        root.template
            .execute(&data, ExecContext::default().with_funcs(&self.funcs))
            .map_err(|source| RenderError::Execute {
                path: root.path.clone(),
                source,
            })
    }

    fn render_globals(
        &self,
        component: &Component,
        request: &RenderRequest,
        options: &[GlobalOption],
    ) -> Result<HashMap<String, String>, RenderError> {
        if component.globals.is_empty() {
            return Ok(HashMap::new());
        }

        let mut arguments = Map::new();
        let mut overrides: HashMap<&str, &GlobalHandler> = HashMap::new();
        for option in options {
            match option {
                GlobalOption::Arguments(bundle) => {
                    for (key, value) in bundle {
                        arguments.insert(key.clone(), value.clone());
                    }
                }
                GlobalOption::Handler { path, handler } => {
                    overrides.insert(path.as_str(), handler);
                }
            }
        }

        component
            .globals
            .par_iter()
            .map(|path| {
                let handler = overrides
                    .get(path.as_str())
                    .copied()
                    .or_else(|| self.handlers.get(path));

                let data = match handler {
                    Some(handler) => handler(request, &arguments),
                    None => {
                        tracing::debug!(%path, "no handler for global component, rendering with empty data");
                        Value::Object(Map::new())
                    }
                };

                let rendered = self.write(path, request, &data, options)?;
                Ok((path.clone(), rendered))
            })
            .collect()
    }
}
