//! Module loading for `import "path";`.
//!
//! A request is resolved against the directory of the importing file (or the
//! configured module root for top-level code). If the literal path does not
//! exist, the `.fc` extension is tried. Resolved paths are canonicalised so
//! the interpreter can run each file at most once.

use std::path::{Path, PathBuf};

use crate::ast::Program;
use crate::lexer::Lexer;
use crate::parser::Parser;

pub const SOURCE_EXTENSION: &str = "fc";

/// Turns an import request into a parsed program.
pub trait ModuleLoader {
    fn resolve(&self, request: &str, from_dir: &Path) -> Result<PathBuf, String>;
    fn load(&self, path: &Path) -> Result<Program, String>;
}

/// Reads modules from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl ModuleLoader for FileLoader {
    fn resolve(&self, request: &str, from_dir: &Path) -> Result<PathBuf, String> {
        let direct = from_dir.join(request);
        let candidate = if direct.is_file() {
            direct
        } else {
            let with_ext = direct.with_extension(SOURCE_EXTENSION);
            if direct.extension().is_none() && with_ext.is_file() {
                with_ext
            } else {
                return Err("file not found".to_string());
            }
        };
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve {}: {}", candidate.display(), e))
    }

    fn load(&self, path: &Path) -> Result<Program, String> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let filename = path.to_string_lossy().to_string();

        let tokens = Lexer::new(&source, &filename)
            .tokenize()
            .map_err(|e| format!("lexer error in {}", e))?;

        Parser::new(tokens, &filename)
            .parse()
            .map_err(|e| format!("parse error in {}", e))
    }
}
