//! # smelt
//!
//! Compiler for component markup templates. A source file is HTML with
//! `{{ … }}` template actions, capitalized invocation tags for other
//! components, and `import` / `default` / `style` block tags. Compilation
//! flattens every invocation into one executable template per component:
//!
//! 1. **Tags**: invocation tags become opaque placeholder elements.
//! 2. **Hide**: expression spans become hex tokens, and their `$` variables
//!    get the component namespace `$<Name>_`.
//! 3. **Tree**: the markup is parsed into an arena document; block tags are
//!    pulled out.
//! 4. **Style**: styles are transpiled, scoped and attached as classes.
//! 5. **Paste**: placeholders are replaced by the callee's partials template
//!    with arguments bound and partials filled.
//! 6. **Generate**: field usage per template drives a typed accessor module.
//!
//! Compiled output is rendered through a [`Registry`], either live from a
//! [`Compiler`] or loaded from a persisted [`Build`].

mod artifact;
mod codec;
mod compiler;
mod component;
mod config;
mod discovery;
mod dom;
mod error;
mod generate;
mod hide;
mod hygiene;
mod naming;
mod paste;
mod registry;
mod selector;
mod style;
mod tags;
pub mod template;
mod visitor;

pub use artifact::Build;
pub use compiler::{Compiler, FsLoader, MemoryLoader, SourceLoader};
pub use component::{Component, ComponentRecord, Root, RootRecord};
pub use config::CompileOptions;
pub use discovery::{discover, generate, generate_dir, Discovered, Generated};
pub use dom::Document;
pub use error::{CompileError, CompileResult, LoadError, RenderError, Warning, WarningKind};
pub use generate::{extract_generation_data, generate_module, GenerationData};
pub use hide::{hide_expressions, restore_expressions};
pub use hygiene::{prefix_variables, replace_variables};
pub use naming::{component_name, namespace_prefix, normalize_path};
pub use paste::{Argument, Sequence};
pub use registry::{GlobalHandler, GlobalOption, Registry, RenderRequest};
pub use style::{PlainCss, SassProcess, StyleTranspiler, TranspileError, Transpiled};
pub use tags::{rewrite_tags, Rewritten};
pub use template::{FuncMap, Template, TemplateError};
