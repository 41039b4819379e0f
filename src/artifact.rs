//! Persisted build artifact and the production loader.
//!
//! A [`Build`] is everything the runtime needs: compiled template text per
//! component and root plus the stylesheets. The production loader parses every
//! record exactly once and never touches source files.

use std::fs;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compiler::Compiler;
use crate::component::{Component, ComponentRecord, Root, RootRecord};
use crate::error::{CompileError, CompileResult, LoadError};
use crate::naming::component_name;
use crate::registry::Registry;
use crate::style::sort_styles;
use crate::template::{FuncMap, Template};

fn default_style_prefix() -> String {
    "melt".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub components: Vec<ComponentRecord>,
    pub roots: Vec<RootRecord>,
    #[serde(default)]
    pub file_styles: String,
    /// Output of an external utility-class generator, carried through as is.
    #[serde(default)]
    pub tailwind_styles: String,
    #[serde(default = "default_style_prefix")]
    pub style_prefix: String,
}

impl Build {
    /// Snapshot a compiler. Records are ordered by path.
    pub fn from_compiler(compiler: &Compiler) -> Self {
        Self {
            components: compiler.components().iter().map(|c| c.record()).collect(),
            roots: compiler.roots().iter().map(|r| r.record()).collect(),
            file_styles: compiler.file_styles(),
            tailwind_styles: String::new(),
            style_prefix: compiler.options().style_prefix.clone(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, LoadError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn write_to(&self, path: &str) -> CompileResult<()> {
        let output = |source| CompileError::Output {
            path: path.to_string(),
            source,
        };
        let bytes = self
            .to_json()
            .map_err(|e| output(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(path, bytes).map_err(output)?;
        tracing::info!(%path, components = self.components.len(), roots = self.roots.len(), "wrote build");
        Ok(())
    }

    /// File styles followed by sorted component styles.
    pub fn stylesheet(&self) -> String {
        let all: String = self.components.iter().map(|c| c.style.as_str()).collect();
        self.file_styles.clone() + &sort_styles(&all, &self.style_prefix)
    }
}

fn component_from_record(record: ComponentRecord) -> Result<Component, LoadError> {
    let template = Template::parse(record.path.clone(), record.template).map_err(|source| {
        LoadError::InvalidComponent {
            path: record.path.clone(),
            source,
        }
    })?;

    Ok(Component {
        name: record.name,
        path: record.path,
        template,
        style: record.style,
        global: record.global,
        globals: record.globals,
        ..Component::default()
    })
}

fn root_from_record(record: RootRecord) -> Result<Root, LoadError> {
    let template = Template::parse(record.path.clone(), record.template).map_err(|source| LoadError::InvalidRoot {
        path: record.path.clone(),
        source,
    })?;

    Ok(Root {
        name: component_name(&record.path),
        path: record.path,
        template,
    })
}

impl Registry {
    /// Production loader. Any malformed record fails the whole load.
    pub fn from_build(bytes: &[u8], funcs: FuncMap) -> Result<Self, LoadError> {
        let build = Build::from_json(bytes)?;
        let stylesheet = build.stylesheet();

        let mut registry = Registry::new(funcs);
        registry.stylesheet = stylesheet;
        registry.tailwind_styles = build.tailwind_styles;

        for record in build.components {
            let component = component_from_record(record)?;
            registry.insert_component(Arc::new(component));
        }
        for record in build.roots {
            registry.insert_root(Arc::new(root_from_record(record)?));
        }

        tracing::info!(
            components = registry.components.len(),
            roots = registry.roots.len(),
            "loaded build"
        );
        Ok(registry)
    }
}
