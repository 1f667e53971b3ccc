use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::common::config::DependencySpec;
use crate::common::error::LoadError;

/// One parsed Rust source file.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub path: PathBuf,
    /// Module path of the file, e.g. `demo::net::client`.
    pub module_path: String,
    pub source: String,
    pub file: syn::File,
    /// Integration tests, benches and examples: never instrumented with
    /// collector probes.
    pub is_test_file: bool,
    /// Set once the file has been rewritten.
    pub modified: bool,
}

/// A crate loaded from disk.
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub root: PathBuf,
    /// Crate name as written in paths (`-` replaced by `_`).
    pub package: String,
    pub units: BTreeMap<PathBuf, ParsedUnit>,
    pub other_files: Vec<PathBuf>,
}

impl SourceTree {
    /// Write every unit and every other file under `output`: rewritten units
    /// are rendered, untouched ones copied byte for byte.
    pub fn write_to(&self, output: &Path) -> Result<()> {
        for (path, unit) in &self.units {
            let target = ProjectLoader::rebase(path, &self.root, output)?;
            if unit.modified {
                ProjectLoader::create_file(&target, ProjectLoader::render_unit(&unit.file).as_bytes())?;
            } else {
                ProjectLoader::create_file(&target, unit.source.as_bytes())?;
            }
        }
        for path in &self.other_files {
            debug!("Filling output package with {}", path.display());
            let bytes = fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))?;
            let target = ProjectLoader::rebase(path, &self.root, output)?;
            ProjectLoader::create_file(&target, &bytes)?;
        }
        Ok(())
    }
}

pub struct ProjectLoader;

impl ProjectLoader {
    /// Load every `.rs` file under `root` (skipping `target/` and `.git/`).
    /// Parse failures are collected and reported together. Parsing stays on
    /// the calling thread: syntax trees are neither `Send` nor `Sync`.
    pub fn load_package(root: &Path) -> Result<SourceTree, LoadError> {
        let package = Self::package_name(root)?;
        let mut rust_files = Vec::new();
        let mut other_files = Vec::new();
        Self::collect_recursive(root, &mut rust_files, &mut other_files)?;

        let parsed: Vec<Result<ParsedUnit, (PathBuf, String)>> = rust_files
            .iter()
            .map(|path| Self::parse_unit(root, &package, path))
            .collect();

        let mut units = BTreeMap::new();
        let mut failures = Vec::new();
        for result in parsed {
            match result {
                Ok(unit) => {
                    units.insert(unit.path.clone(), unit);
                }
                Err(failure) => failures.push(failure),
            }
        }
        if !failures.is_empty() {
            failures.sort();
            return Err(LoadError::Parse { failures });
        }

        other_files.sort();
        info!("Loaded {} source file(s) from {}", units.len(), root.display());
        Ok(SourceTree {
            root: root.to_path_buf(),
            package,
            units,
            other_files,
        })
    }

    fn parse_unit(root: &Path, package: &str, path: &Path) -> Result<ParsedUnit, (PathBuf, String)> {
        let source = fs::read_to_string(path).map_err(|e| (path.to_path_buf(), e.to_string()))?;
        let file = syn::parse_file(&source).map_err(|e| {
            let at = e.span().start();
            (path.to_path_buf(), format!("{}:{}: {}", at.line, at.column, e))
        })?;
        Ok(ParsedUnit {
            path: path.to_path_buf(),
            module_path: Self::module_path_for(root, package, path),
            source,
            file,
            is_test_file: Self::is_test_file(root, path),
            modified: false,
        })
    }

    /// Crate name from `root/Cargo.toml`.
    pub fn package_name(root: &Path) -> Result<String, LoadError> {
        let manifest = root.join("Cargo.toml");
        let text = fs::read_to_string(&manifest).map_err(|source| LoadError::Io {
            path: manifest.clone(),
            source,
        })?;
        let parsed: toml::Value = toml::from_str(&text).map_err(|_| LoadError::MissingManifest {
            path: root.to_path_buf(),
        })?;
        parsed
            .get("package")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .map(|n| n.replace('-', "_"))
            .ok_or_else(|| LoadError::MissingManifest {
                path: root.to_path_buf(),
            })
    }

    /// Module path of a file by cargo's layout conventions:
    /// `src/lib.rs` and `src/main.rs` are the crate root, `src/a/b.rs` and
    /// `src/a/b/mod.rs` are `crate::a::b`; files under `tests/`, `benches/`,
    /// `examples/` and `src/bin/` are crate roots named after the file.
    pub fn module_path_for(root: &Path, package: &str, path: &Path) -> String {
        let rel = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        let stem = |s: &str| s.trim_end_matches(".rs").to_string();

        match parts.first().map(String::as_str) {
            Some("src") if parts.get(1).map(String::as_str) == Some("bin") => {
                // src/bin/tool.rs or src/bin/tool/main.rs
                parts.get(2).map(|s| stem(s)).unwrap_or_else(|| package.to_string())
            }
            Some("src") => {
                let mut segs = vec![package.to_string()];
                let inner = &parts[1..];
                for (i, part) in inner.iter().enumerate() {
                    let last = i + 1 == inner.len();
                    if !last {
                        segs.push(part.clone());
                    } else if !matches!(part.as_str(), "lib.rs" | "main.rs" | "mod.rs") {
                        segs.push(stem(part));
                    }
                }
                segs.join("::")
            }
            Some("tests") | Some("benches") | Some("examples") => match parts.len() {
                0..=1 => package.to_string(),
                2 => stem(&parts[1]),
                _ => {
                    let mut segs: Vec<String> = parts[1..parts.len() - 1].to_vec();
                    let last = &parts[parts.len() - 1];
                    if !matches!(last.as_str(), "mod.rs" | "main.rs") {
                        segs.push(stem(last));
                    }
                    segs.join("::")
                }
            },
            _ => {
                let mut segs = vec![package.to_string()];
                if let Some(last) = parts.last() {
                    segs.push(stem(last));
                }
                segs.join("::")
            }
        }
    }

    pub fn is_test_file(root: &Path, path: &Path) -> bool {
        let rel = path.strip_prefix(root).unwrap_or(path);
        matches!(
            rel.components().next(),
            Some(Component::Normal(s)) if s == "tests" || s == "benches" || s == "examples"
        )
    }

    fn collect_recursive(dir: &Path, rust: &mut Vec<PathBuf>, other: &mut Vec<PathBuf>) -> Result<(), LoadError> {
        if dir.ends_with("target") || dir.ends_with(".git") {
            return Ok(());
        }
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            if path.is_dir() {
                Self::collect_recursive(&path, rust, other)?;
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                rust.push(path);
            } else {
                other.push(path);
            }
        }
        Ok(())
    }

    /// Every `.rs` file under `root` that declares at least one test.
    pub fn find_test_paths(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let mut rust = Vec::new();
        let mut other = Vec::new();
        Self::collect_recursive(root, &mut rust, &mut other)?;
        let mut paths = Vec::new();
        for path in rust {
            let source = fs::read_to_string(&path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            if source.contains("#[test]") || source.contains("#[tokio::test]") {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Write `bytes` to `path`, creating parent directories; overwrites.
    pub fn create_file(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, bytes).with_context(|| format!("Failed to write file {}", path.display()))
    }

    pub fn render_unit(file: &syn::File) -> String {
        prettyplease::unparse(file)
    }

    /// Move `path` from under `from` to under `to`.
    pub fn rebase(path: &Path, from: &Path, to: &Path) -> Result<PathBuf> {
        let rel = path
            .strip_prefix(from)
            .with_context(|| format!("{} is not under {}", path.display(), from.display()))?;
        Ok(to.join(rel))
    }

    /// Add `dep` to `[dependencies]` of the manifest unless a dependency of
    /// that name exists. Returns whether the manifest changed.
    pub fn ensure_dependency(manifest: &Path, dep: &DependencySpec) -> Result<bool> {
        let text = fs::read_to_string(manifest)
            .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
        let mut doc: toml::Table =
            toml::from_str(&text).with_context(|| format!("Invalid manifest {}", manifest.display()))?;

        let deps = doc
            .entry("dependencies")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let deps = deps
            .as_table_mut()
            .with_context(|| format!("[dependencies] is not a table in {}", manifest.display()))?;
        if deps.contains_key(&dep.name) {
            return Ok(false);
        }

        let value = match (&dep.path, &dep.version) {
            (None, Some(version)) => toml::Value::String(version.clone()),
            (path, version) => {
                let mut inline = toml::Table::new();
                if let Some(path) = path {
                    inline.insert("path".to_string(), toml::Value::String(path.clone()));
                }
                if let Some(version) = version {
                    inline.insert("version".to_string(), toml::Value::String(version.clone()));
                }
                toml::Value::Table(inline)
            }
        };
        deps.insert(dep.name.clone(), value);

        let rendered = toml::to_string(&doc).context("Failed to render manifest")?;
        Self::create_file(manifest, rendered.as_bytes())?;
        Ok(true)
    }
}
