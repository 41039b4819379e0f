//! Discovery Module
//!
//! Recursively scans a source directory for component and root files, then
//! compiles all of them for batch generation of the accessor module and the
//! build artifact.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::artifact::Build;
use crate::compiler::{Compiler, FsLoader};
use crate::config::CompileOptions;
use crate::error::{CompileError, CompileResult, Warning};
use crate::generate::generate_module;
use crate::naming::{has_extension, is_root_path, normalize_path};

/// Stylesheets are compiled through `styleInputFile`, never as components.
const STYLE_EXTENSIONS: &[&str] = &["scss", "css"];

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Normalized paths, relative to the scanned directory, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub components: Vec<String>,
    pub roots: Vec<String>,
}

/// Find every source file below `base` with one of `extensions`.
pub fn discover(base: &Path, extensions: &[String]) -> Discovered {
    let mut discovered = Discovered::default();

    for entry in WalkDir::new(base).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let is_style = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| STYLE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if is_style {
            continue;
        }

        let relative = path.strip_prefix(base).unwrap_or(path);
        let normalized = normalize_path(&relative.to_string_lossy());
        if !has_extension(&normalized, extensions) {
            continue;
        }

        if is_root_path(&normalized) {
            discovered.roots.push(normalized);
        } else {
            discovered.components.push(normalized);
        }
    }

    discovered.components.sort();
    discovered.roots.sort();
    tracing::debug!(
        base = %base.display(),
        components = discovered.components.len(),
        roots = discovered.roots.len(),
        "discovered sources"
    );
    discovered
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Generated {
    /// Rust source of the accessor module.
    pub module: String,
    pub build: Build,
    pub warnings: Vec<Warning>,
}

/// Compile every discovered file with `compiler` and emit the accessor
/// module. When `generationOutputFile` is configured the module is written
/// there as well.
pub fn generate(compiler: &Compiler, discovered: &Discovered) -> CompileResult<Generated> {
    let mut warnings = compiler.load_file_styles();

    for path in &discovered.components {
        compiler.get_component(path)?;
    }
    for path in &discovered.roots {
        compiler.get_root(path)?;
    }

    let components = compiler.components();
    for component in &components {
        warnings.extend(component.warnings.iter().cloned());
    }

    let module = generate_module(&components, &compiler.roots());

    if let Some(output) = &compiler.options().generation_output_file {
        fs::write(output, &module).map_err(|source| CompileError::Output {
            path: output.clone(),
            source,
        })?;
        tracing::info!(path = %output, "wrote accessor module");
    }

    Ok(Generated {
        module,
        build: Build::from_compiler(compiler),
        warnings,
    })
}

/// Discover and generate everything below `base` with a filesystem-backed
/// compiler.
pub fn generate_dir(base: &Path, options: CompileOptions) -> CompileResult<(Compiler, Generated)> {
    let discovered = discover(base, &options.extensions);
    let compiler = Compiler::new(options).with_loader(FsLoader::new(base));
    let generated = generate(&compiler, &discovered)?;
    Ok((compiler, generated))
}
