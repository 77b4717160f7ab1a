//! Read magic file(s) from disk
//!
//! A path may name a single rule file or a directory of them. Several paths
//! load into one table, each file's rules appended in order.

use std::fs;
use std::path::{Path, PathBuf};

use super::ruleset::{self, CompileError, LineError};
use super::MagicTable;

/// Diagnostics for one file.
#[derive(Debug)]
pub struct FileErrors {
    pub path: PathBuf,
    pub errors: Vec<LineError>,
}

fn read_text(path: &Path) -> Result<String, CompileError> {
    let bytes = fs::read(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Regular files directly inside `dir`, sorted by name.
fn directory_files(dir: &Path) -> Result<Vec<PathBuf>, CompileError> {
    let io = |source: std::io::Error| CompileError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_file(
    path: &Path,
    table: &mut MagicTable,
    diagnostics: &mut Vec<FileErrors>,
) -> Result<(), CompileError> {
    let text = read_text(path)?;
    let (compiled, errors) = ruleset::compile(&text)?;
    for e in &errors {
        tracing::warn!("{}, {}", path.display(), e);
    }
    tracing::debug!(rules = compiled.len(), "loaded {}", path.display());
    table.append(compiled)?;
    if !errors.is_empty() {
        diagnostics.push(FileErrors {
            path: path.to_path_buf(),
            errors,
        });
    }
    Ok(())
}

/// Loads several magic files or directories into one table.
///
/// Lines that fail to compile are logged and returned per file; a file that
/// cannot be read stops the load.
pub fn from_paths<P: AsRef<Path>>(
    paths: &[P],
) -> Result<(MagicTable, Vec<FileErrors>), CompileError> {
    let mut table = MagicTable::new();
    let mut diagnostics = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            for file in directory_files(path)? {
                load_file(&file, &mut table, &mut diagnostics)?;
            }
        } else {
            load_file(path, &mut table, &mut diagnostics)?;
        }
    }

    Ok((table, diagnostics))
}

/// Loads the given magic file or directory.
pub fn from_filepath(path: &Path) -> Result<(MagicTable, Vec<FileErrors>), CompileError> {
    from_paths(&[path])
}
