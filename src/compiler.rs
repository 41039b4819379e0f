//! Compile pipeline, compiled-component cache and dependency table.
//!
//! One component compiles as:
//!
//! ```text
//! raw ─▶ rewrite_tags ─▶ hide_expressions($Name_) ─▶ parse_fragment
//!     ─▶ extract_blocks ─▶ build_style (local classes)
//!     ─▶ Paster (inline callees, resolved through this cache)
//!     ─▶ attach_scoped ─▶ partials template
//!     ─▶ strip markers + restore ─▶ generation data ─▶ Template::parse
//! ```
//!
//! Callees are compiled on first use and cached by normalized path, so a
//! shared dependency is read and compiled once per compiler. Each compile
//! carries the chain of paths that led to it; an import found on its own
//! chain is a cycle. Two threads missing the cache for the same path both
//! compile it and the later result replaces the earlier one.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::component::{extract_blocks, Component, Root};
use crate::config::CompileOptions;
use crate::dom::Document;
use crate::error::{CompileError, CompileResult, Warning, WarningKind};
use crate::generate::extract_generation_data;
use crate::hide;
use crate::naming::{component_name, is_root_path, namespace_prefix, normalize_path};
use crate::paste::{ComponentSource, Paster, Sequence};
use crate::style::{attach_scoped, build_style, scoped_class, sort_styles, SassProcess, StyleOutput, StyleTranspiler};
use crate::tags;
use crate::template::Template;

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE LOADERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads component sources by normalized path.
pub trait SourceLoader: Send + Sync {
    fn read(&self, path: &str) -> io::Result<String>;
}

/// Reads sources below a base directory. Normalized paths are lowercase, so a
/// miss falls back to a case-insensitive lookup one directory at a time.
#[derive(Debug, Clone)]
pub struct FsLoader {
    base: PathBuf,
}

impl FsLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn find(&self, path: &str) -> Option<PathBuf> {
        let mut current = self.base.clone();
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if part == ".." {
                current.push("..");
                continue;
            }
            let exact = current.join(part);
            if exact.exists() {
                current = exact;
                continue;
            }
            let entry = fs::read_dir(&current)
                .ok()?
                .filter_map(Result::ok)
                .find(|e| e.file_name().to_string_lossy().to_lowercase() == part)?;
            current = entry.path();
        }
        Some(current)
    }
}

impl SourceLoader for FsLoader {
    fn read(&self, path: &str) -> io::Result<String> {
        match self.find(path) {
            Some(found) => fs::read_to_string(found),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path))),
        }
    }
}

/// In-memory sources keyed by normalized path. Counts reads per path.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: RwLock<HashMap<String, String>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&self, path: &str, source: impl Into<String>) {
        self.files.write().insert(normalize_path(path), source.into());
    }

    pub fn remove(&self, path: &str) {
        self.files.write().remove(&normalize_path(path));
    }

    pub fn reads(&self, path: &str) -> usize {
        self.reads.lock().get(&normalize_path(path)).copied().unwrap_or(0)
    }
}

impl SourceLoader for MemoryLoader {
    fn read(&self, path: &str) -> io::Result<String> {
        let path = normalize_path(path);
        *self.reads.lock().entry(path.clone()).or_insert(0) += 1;
        self.files
            .read()
            .get(&path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path)))
    }
}

impl<T: SourceLoader + ?Sized> SourceLoader for Arc<T> {
    fn read(&self, path: &str) -> io::Result<String> {
        (**self).read(path)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Compiler {
    options: CompileOptions,
    loader: Box<dyn SourceLoader>,
    transpiler: Box<dyn StyleTranspiler>,
    sequence: Sequence,
    components: RwLock<HashMap<String, Arc<Component>>>,
    roots: RwLock<HashMap<String, Arc<Root>>>,
    /// Callee → callers.
    dependents: Mutex<HashMap<String, BTreeSet<String>>>,
    file_styles: RwLock<String>,
}

impl Compiler {
    /// Compiler reading from the current directory with the configured
    /// `sass` executable.
    pub fn new(options: CompileOptions) -> Self {
        let transpiler = SassProcess::new(options.sass_executable.clone());
        Self {
            options,
            loader: Box::new(FsLoader::new(".")),
            transpiler: Box::new(transpiler),
            sequence: Sequence::new(),
            components: RwLock::new(HashMap::new()),
            roots: RwLock::new(HashMap::new()),
            dependents: Mutex::new(HashMap::new()),
            file_styles: RwLock::new(String::new()),
        }
    }

    pub fn with_loader(mut self, loader: impl SourceLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_transpiler(mut self, transpiler: impl StyleTranspiler + 'static) -> Self {
        self.transpiler = Box::new(transpiler);
        self
    }

    /// Share an intermediate-variable sequence with other compilers.
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn read(&self, path: &str) -> CompileResult<String> {
        self.loader.read(path).map_err(|source| {
            tracing::error!(%path, error = %source, "could not read source");
            CompileError::UnreadableSource {
                path: path.to_string(),
                source,
            }
        })
    }

    /// Cached component, compiling it from its source on first use.
    pub fn get_component(&self, path: &str) -> CompileResult<Arc<Component>> {
        self.component_in_chain(&normalize_path(path), &[])
    }

    fn component_in_chain(&self, path: &str, chain: &[String]) -> CompileResult<Arc<Component>> {
        if let Some(component) = self.components.read().get(path) {
            return Ok(component.clone());
        }
        let raw = self.read(path)?;
        self.compile_in_chain(path, &raw, chain)
    }

    /// Read and compile `path`, replacing any cached version.
    pub fn compile(&self, path: &str) -> CompileResult<Arc<Component>> {
        let path = normalize_path(path);
        let raw = self.read(&path)?;
        self.compile_in_chain(&path, &raw, &[])
    }

    /// Compile `raw` as the component at `path` and cache the result.
    pub fn compile_source(&self, path: &str, raw: &str) -> CompileResult<Arc<Component>> {
        self.compile_in_chain(&normalize_path(path), raw, &[])
    }

    /// `chain` holds the callers whose compilation is waiting on `path`.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path, depth = chain.len()))]
    fn compile_in_chain(&self, path: &str, raw: &str, chain: &[String]) -> CompileResult<Arc<Component>> {
        let path = path.to_string();
        let mut chain = chain.to_vec();
        chain.push(path.clone());

        let name = component_name(&path);
        let prefix = namespace_prefix(&name);
        let mut warnings: Vec<Warning> = Vec::new();

        let rewritten = tags::rewrite_tags(raw, &path);
        warnings.extend(rewritten.warnings);

        let hidden = hide::hide_expressions(&rewritten.markup, &prefix);
        let blocks = extract_blocks(&path, &Document::parse_fragment(&hidden), self.options.style);
        warnings.extend(blocks.warnings);

        let mut body = Document::parse_fragment(&blocks.body);

        let style = if blocks.style.trim().is_empty() {
            StyleOutput::default()
        } else {
            build_style(
                &path,
                &name,
                &self.options.style_prefix,
                &blocks.style,
                &mut body,
                self.transpiler.as_ref(),
            )
        };
        warnings.extend(style.warnings);

        let mut paster = Paster::new(&path, &name, &blocks.imports, self, &self.sequence)
            .with_chain(&chain)
            .with_comments(self.options.component_comments);
        paster.paste_document(&mut body);
        let globals = paster.globals;
        warnings.extend(paster.warnings);

        if !style.scoped.is_empty() {
            attach_scoped(&mut body, &style.scoped, &scoped_class(&self.options.style_prefix, &name));
        }

        let partials_template = body.to_html();
        let assembled = hide::restore_expressions(&tags::strip_markers(&partials_template));
        let (generation, source) = extract_generation_data(&assembled);

        if self.options.print_render_output {
            tracing::debug!(%path, template = %source, "render output");
        }

        let template = Template::parse(path.clone(), source).map_err(|source| {
            tracing::error!(%path, error = %source, "assembled template does not parse");
            CompileError::TemplateParse {
                path: path.clone(),
                source,
            }
        })?;

        self.check_strict(&warnings)?;

        let component = Arc::new(Component {
            name,
            path: path.clone(),
            template,
            style: style.css,
            global: rewritten.global,
            globals,
            defaults: blocks.defaults,
            partials_template,
            generation,
            warnings,
        });

        tracing::info!(%path, global = component.global, "compiled component");
        self.components.write().insert(path, component.clone());
        Ok(component)
    }

    fn check_strict(&self, warnings: &[Warning]) -> CompileResult<()> {
        match warnings.first() {
            Some(first) if self.options.strict => Err(CompileError::Strict(first.clone())),
            _ => Ok(()),
        }
    }

    /// Recompile `path` in place. Failures are logged and yield `None`.
    pub fn recompile(&self, path: &str) -> Option<Arc<Component>> {
        match self.compile(path) {
            Ok(component) => Some(component),
            Err(e) => {
                tracing::error!(path = %normalize_path(path), error = %e, "recompilation failed");
                None
            }
        }
    }

    /// Recompile `path` and every component that transitively inlines it,
    /// callees before callers. Returns the paths that compiled.
    pub fn update(&self, path: &str) -> Vec<String> {
        let path = normalize_path(path);

        if is_root_path(&path) {
            return match self.compile_root(&path) {
                Ok(_) => vec![path],
                Err(e) => {
                    tracing::error!(%path, error = %e, "root recompilation failed");
                    Vec::new()
                }
            };
        }

        let affected = self.transitive_dependents(&path);
        let mut pending: Vec<String> = affected.iter().cloned().collect();
        let mut updated = Vec::new();

        while !pending.is_empty() {
            let ready = {
                let dependents = self.dependents.lock();
                pending.iter().position(|candidate| {
                    !pending.iter().any(|other| {
                        other != candidate
                            && dependents
                                .get(other)
                                .is_some_and(|callers| callers.contains(candidate))
                    })
                })
            };

            // A dependency cycle has no ready node; take them in order.
            let next = pending.remove(ready.unwrap_or(0));
            if self.recompile(&next).is_some() {
                updated.push(next);
            }
        }

        updated
    }

    fn transitive_dependents(&self, path: &str) -> BTreeSet<String> {
        let dependents = self.dependents.lock();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([path.to_string()]);

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(callers) = dependents.get(&next) {
                queue.extend(callers.iter().cloned());
            }
        }
        seen
    }

    /// Forget a component or root and its dependency edges.
    pub fn remove(&self, path: &str) {
        let path = normalize_path(path);
        self.components.write().remove(&path);
        self.roots.write().remove(&path);

        let mut dependents = self.dependents.lock();
        dependents.remove(&path);
        for callers in dependents.values_mut() {
            callers.remove(&path);
        }
        tracing::debug!(%path, "removed");
    }

    /// Components that inline `path` directly.
    pub fn dependents(&self, path: &str) -> BTreeSet<String> {
        self.dependents
            .lock()
            .get(&normalize_path(path))
            .cloned()
            .unwrap_or_default()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Roots
    // ───────────────────────────────────────────────────────────────────────────

    pub fn get_root(&self, path: &str) -> CompileResult<Arc<Root>> {
        let path = normalize_path(path);
        if let Some(root) = self.roots.read().get(&path) {
            return Ok(root.clone());
        }
        self.compile_root(&path)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(path = %path))]
    pub fn compile_root(&self, path: &str) -> CompileResult<Arc<Root>> {
        let path = normalize_path(path);
        let raw = self.read(&path)?;
        let root = Arc::new(Root::compile(&path, &raw)?);
        tracing::info!(%path, "compiled root");
        self.roots.write().insert(path, root.clone());
        Ok(root)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ───────────────────────────────────────────────────────────────────────────

    /// Compiled components ordered by path.
    pub fn components(&self) -> Vec<Arc<Component>> {
        let mut components: Vec<Arc<Component>> = self.components.read().values().cloned().collect();
        components.sort_by(|a, b| a.path.cmp(&b.path));
        components
    }

    /// Compiled roots ordered by path.
    pub fn roots(&self) -> Vec<Arc<Root>> {
        let mut roots: Vec<Arc<Root>> = self.roots.read().values().cloned().collect();
        roots.sort_by(|a, b| a.path.cmp(&b.path));
        roots
    }

    /// Transpile the configured global stylesheet. Failures are logged and
    /// leave the file styles empty.
    pub fn load_file_styles(&self) -> Vec<Warning> {
        let Some(file) = self.options.style_input_file.clone() else {
            return Vec::new();
        };
        if !self.options.style {
            return Vec::new();
        }

        match self.transpiler.transpile_file(&file) {
            Ok(transpiled) => {
                *self.file_styles.write() = transpiled.css;
                transpiled
                    .events
                    .into_iter()
                    .map(|event| {
                        tracing::warn!(path = %file, "{}", event);
                        Warning::new(WarningKind::StyleTranspile, &file, event)
                    })
                    .collect()
            }
            Err(e) => {
                tracing::error!(path = %file, error = %e, "global stylesheet failed");
                self.file_styles.write().clear();
                vec![Warning::new(WarningKind::StyleTranspile, &file, e.to_string())]
            }
        }
    }

    pub fn file_styles(&self) -> String {
        self.file_styles.read().clone()
    }

    /// Component styles in path order, sorted global → scoped → local → at-rules.
    pub fn component_styles(&self) -> String {
        let all: String = self.components().iter().map(|c| c.style.as_str()).collect();
        sort_styles(&all, &self.options.style_prefix)
    }

    /// Process-wide stylesheet: file styles then component styles.
    pub fn stylesheet(&self) -> String {
        self.file_styles() + &self.component_styles()
    }
}

impl ComponentSource for Compiler {
    fn resolve(&self, path: &str, chain: &[String]) -> Option<Arc<Component>> {
        match self.component_in_chain(&normalize_path(path), chain) {
            Ok(component) => Some(component),
            Err(e) => {
                tracing::warn!(%path, error = %e, "dependency failed to compile");
                None
            }
        }
    }

    fn add_dependency(&self, callee: &str, caller: &str) {
        self.dependents
            .lock()
            .entry(callee.to_string())
            .or_default()
            .insert(caller.to_string());
    }
}
