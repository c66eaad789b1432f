//! Source-distribution layout:
//!
//! ```text
//! <root>/<name>/pyproject.toml
//! <root>/<name>/README.md
//! <root>/<name>/src/<name>/__init__.py
//! <root>/<name>/src/<name>/<copied sources>
//! ```

use pypack_core::{Error, PackageRequest, Result};
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{value, Array, DocumentMut, InlineTable, Item, Table};
use walkdir::WalkDir;

pub const DESCRIPTION: &str = "Auto-generated PyPI package via MCP";
pub const AUTHOR_NAME: &str = "MCP Packager";
pub const AUTHOR_EMAIL: &str = "mcp@example.com";
pub const BUILD_REQUIRES: &str = "setuptools>=61.0";
pub const BUILD_BACKEND: &str = "setuptools.build_meta";
pub const RUFF_LINE_LENGTH: i64 = 120;
pub const RUFF_SELECT: [&str; 4] = ["E", "F", "W", "I"];

/// Materialize the package tree under `root` and return the package root.
pub fn setup_package_structure(root: &Path, req: &PackageRequest) -> Result<PathBuf> {
    req.validate()?;
    let name = req.package_name.trim();
    let package_dir = root.join(name);
    let src_dir = package_dir.join("src").join(name);
    fs::create_dir_all(&src_dir).map_err(|e| scaffold_err(&src_dir, e))?;

    copy_source(&req.source_path, &src_dir)?;

    let marker = src_dir.join("__init__.py");
    if !marker.exists() {
        write(&marker, &init_marker(&req.version))?;
    }
    write(
        &package_dir.join("pyproject.toml"),
        &render_pyproject(name, &req.version, &req.min_python),
    )?;
    write(&package_dir.join("README.md"), &render_readme(name))?;

    tracing::debug!(package_dir = %package_dir.display(), "scaffolded package");
    Ok(package_dir)
}

pub fn init_marker(version: &str) -> String {
    format!("__version__ = \"{version}\"\n")
}

pub fn render_pyproject(name: &str, version: &str, min_python: &str) -> String {
    let mut doc = DocumentMut::new();

    let mut build = Table::new();
    build.insert("requires", value(Array::from_iter([BUILD_REQUIRES])));
    build.insert("build-backend", value(BUILD_BACKEND));
    doc.as_table_mut().insert("build-system", Item::Table(build));

    let mut author = InlineTable::new();
    author.insert("name", AUTHOR_NAME.into());
    author.insert("email", AUTHOR_EMAIL.into());
    let mut authors = Array::new();
    authors.push(author);

    let mut project = Table::new();
    project.insert("name", value(name));
    project.insert("version", value(version));
    project.insert("description", value(DESCRIPTION));
    project.insert("requires-python", value(format!(">={}", min_python.trim())));
    project.insert("authors", value(authors));
    doc.as_table_mut().insert("project", Item::Table(project));

    let mut ruff = Table::new();
    ruff.insert("line-length", value(RUFF_LINE_LENGTH));
    ruff.insert("select", value(Array::from_iter(RUFF_SELECT)));
    let mut tool = Table::new();
    tool.set_implicit(true);
    tool.insert("ruff", Item::Table(ruff));
    doc.as_table_mut().insert("tool", Item::Table(tool));

    doc.to_string()
}

pub fn render_readme(name: &str) -> String {
    let module = name.replace('-', "_");
    format!(
        "# {name}\n\
         \n\
         Automatically packaged via MCP server.\n\
         \n\
         ## Installation\n\
         \n\
         ```bash\n\
         pip install {name}\n\
         ```\n\
         \n\
         ## Usage\n\
         \n\
         ```python\n\
         import {module}\n\
         ```\n\
         \n\
         Your usage instructions here\n"
    )
}

fn copy_source(src: &Path, dest_dir: &Path) -> Result<()> {
    let meta =
        fs::metadata(src).map_err(|e| Error::Source(format!("{}: {e}", src.display())))?;
    if !meta.is_dir() {
        if !meta.is_file() {
            return Err(special_file(src));
        }
        let file_name = src
            .file_name()
            .ok_or_else(|| Error::Source(format!("{}: no file name", src.display())))?;
        let target = dest_dir.join(file_name);
        fs::copy(src, &target).map_err(|e| scaffold_err(&target, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| Error::Source(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Source(format!("{}: {e}", entry.path().display())))?;
        let target = dest_dir.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target).map_err(|e| scaffold_err(&target, e))?;
        } else if ft.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| scaffold_err(&target, e))?;
        } else {
            // Opening a FIFO for reading blocks until a writer appears.
            return Err(special_file(entry.path()));
        }
    }
    Ok(())
}

fn special_file(path: &Path) -> Error {
    Error::Source(format!("{}: not a regular file or directory", path.display()))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| scaffold_err(path, e))
}

fn scaffold_err(path: &Path, e: std::io::Error) -> Error {
    Error::Scaffold(format!("{}: {e}", path.display()))
}
