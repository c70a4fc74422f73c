// Module Graph Loader
//
// Follows `mod` declarations from every crate root of a package, the way the
// compiler would. A declared module without a file aborts the load.

use crate::error::{Result, ScanError};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Crate index plus module path (`["names", "queues"]` for `crate::names::queues`)
pub(crate) type ModKey = (usize, Vec<String>);

#[derive(Debug)]
pub(crate) struct CrateRoot {
    /// `lib`, `main` or `bin/<name>`
    pub name: String,
    pub file: PathBuf,
    pub is_lib: bool,
}

#[derive(Debug)]
pub(crate) struct Module {
    pub key: ModKey,
    pub file: PathBuf,
    pub items: Vec<syn::Item>,
}

#[derive(Debug, Default)]
pub(crate) struct ModuleGraph {
    pub crates: Vec<CrateRoot>,
    pub modules: Vec<Module>,
    /// Name binaries use to reach the library crate (`my_app` for package `my-app`)
    pub lib_name: Option<String>,
}

#[derive(Deserialize)]
struct Manifest {
    package: Option<ManifestPackage>,
    lib: Option<ManifestLib>,
}

#[derive(Deserialize)]
struct ManifestPackage {
    name: String,
}

#[derive(Deserialize)]
struct ManifestLib {
    name: Option<String>,
}

impl ModuleGraph {
    /// Load every crate root under `<root_dir>/src` and the modules they declare
    pub fn load(root_dir: &Path) -> Result<Self> {
        let src = root_dir.join("src");
        let mut graph = ModuleGraph {
            crates: discover_roots(&src)?,
            modules: Vec::new(),
            lib_name: None,
        };

        if graph.crates.is_empty() {
            return Err(ScanError::NoCrateRoot(root_dir.to_path_buf()));
        }
        if graph.lib_crate().is_some() {
            graph.lib_name = read_lib_name(root_dir)?;
        }

        for idx in 0..graph.crates.len() {
            let file = graph.crates[idx].file.clone();
            let child_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut visited = HashSet::new();
            graph.load_file(idx, Vec::new(), &file, &child_dir, &mut visited)?;
        }

        debug!(
            crates = graph.crates.len(),
            modules = graph.modules.len(),
            "Module graph loaded"
        );
        Ok(graph)
    }

    pub fn lib_crate(&self) -> Option<usize> {
        self.crates.iter().position(|c| c.is_lib)
    }

    fn load_file(
        &mut self,
        crate_idx: usize,
        path: Vec<String>,
        file: &Path,
        child_dir: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        if !visited.insert(file.to_path_buf()) {
            return Ok(());
        }
        let items = parse_file(file)?;
        self.load_items(crate_idx, path, file, child_dir, items, visited)
    }

    fn load_items(
        &mut self,
        crate_idx: usize,
        path: Vec<String>,
        file: &Path,
        child_dir: &Path,
        items: Vec<syn::Item>,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        let submodules: Vec<syn::ItemMod> = items
            .iter()
            .filter_map(|item| match item {
                syn::Item::Mod(m) if !is_cfg_test(&m.attrs) => Some(m.clone()),
                _ => None,
            })
            .collect();

        self.modules.push(Module {
            key: (crate_idx, path.clone()),
            file: file.to_path_buf(),
            items,
        });

        for module in submodules {
            let ident = module.ident.to_string();
            let mut child_path = path.clone();
            child_path.push(ident.clone());

            match module.content {
                Some((_, inner)) => {
                    self.load_items(
                        crate_idx,
                        child_path,
                        file,
                        &child_dir.join(&ident),
                        inner,
                        visited,
                    )?;
                }
                None => {
                    let candidates = match path_attr(&module.attrs) {
                        Some(explicit) => vec![file
                            .parent()
                            .map(|dir| dir.join(&explicit))
                            .unwrap_or_else(|| PathBuf::from(&explicit))],
                        None => vec![
                            child_dir.join(format!("{ident}.rs")),
                            child_dir.join(&ident).join("mod.rs"),
                        ],
                    };

                    let Some(found) = candidates.iter().find(|c| c.is_file()).cloned() else {
                        return Err(ScanError::MissingModule {
                            module: child_path.join("::"),
                            declared_in: file.to_path_buf(),
                            candidates,
                        });
                    };

                    self.load_file(crate_idx, child_path, &found, &child_dir.join(&ident), visited)?;
                }
            }
        }

        Ok(())
    }
}

/// Library crate name from `Cargo.toml`; `None` when there is no manifest
fn read_lib_name(root_dir: &Path) -> Result<Option<String>> {
    let path = root_dir.join("Cargo.toml");
    if !path.is_file() {
        debug!(root = %root_dir.display(), "No Cargo.toml, library paths from binaries stay unresolved");
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|source| ScanError::Io {
        path: path.clone(),
        source,
    })?;
    let manifest: Manifest = toml::from_str(&raw).map_err(|e| ScanError::Manifest {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let name = manifest
        .lib
        .and_then(|lib| lib.name)
        .or_else(|| manifest.package.map(|p| p.name));
    Ok(name.map(|n| n.replace('-', "_")))
}

fn discover_roots(src: &Path) -> Result<Vec<CrateRoot>> {
    let mut roots = Vec::new();

    let lib = src.join("lib.rs");
    if lib.is_file() {
        roots.push(CrateRoot {
            name: "lib".to_string(),
            file: lib,
            is_lib: true,
        });
    }

    let main = src.join("main.rs");
    if main.is_file() {
        roots.push(CrateRoot {
            name: "main".to_string(),
            file: main,
            is_lib: false,
        });
    }

    let bin_dir = src.join("bin");
    if bin_dir.is_dir() {
        let entries = fs::read_dir(&bin_dir).map_err(|source| ScanError::Io {
            path: bin_dir.clone(),
            source,
        })?;

        let mut bins: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ScanError::Io {
                path: bin_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "rs") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    bins.push((stem.to_string(), path.clone()));
                }
            } else if path.join("main.rs").is_file() {
                if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                    bins.push((name.to_string(), path.join("main.rs")));
                }
            }
        }
        bins.sort();

        roots.extend(bins.into_iter().map(|(name, file)| CrateRoot {
            name: format!("bin/{name}"),
            file,
            is_lib: false,
        }));
    }

    Ok(roots)
}

fn parse_file(file: &Path) -> Result<Vec<syn::Item>> {
    let source = fs::read_to_string(file).map_err(|source| ScanError::Io {
        path: file.to_path_buf(),
        source,
    })?;

    let parsed = syn::parse_file(&source).map_err(|e| {
        let start = e.span().start();
        ScanError::Parse {
            path: file.to_path_buf(),
            line: start.line,
            column: start.column + 1,
            message: e.to_string(),
        }
    })?;

    Ok(parsed.items)
}

/// `#[cfg(test)]` items never reach a deployed binary
pub(crate) fn is_cfg_test(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("cfg")
            && attr
                .parse_args::<syn::Ident>()
                .map(|ident| ident == "test")
                .unwrap_or(false)
    })
}

fn path_attr(attrs: &[syn::Attribute]) -> Option<String> {
    attrs.iter().find_map(|attr| {
        if !attr.path().is_ident("path") {
            return None;
        }
        match &attr.meta {
            syn::Meta::NameValue(nv) => match &nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(s),
                    ..
                }) => Some(s.value()),
                _ => None,
            },
            _ => None,
        }
    })
}
