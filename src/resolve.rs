//! Import specifier resolution.
//!
//! Specifiers are classified as relative project files, aliased paths or
//! package dependencies. Packages are looked up in the configured resolution
//! roots in order; the first root containing the package wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::ProjectConfig;

const SOURCE_EXTENSIONS: &[&str] = &["js", "mjs"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResolvedImport {
    Relative { path: PathBuf },
    Alias { path: PathBuf },
    Package { package: String, path: PathBuf },
}

impl ResolvedImport {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedImport::Relative { path }
            | ResolvedImport::Alias { path }
            | ResolvedImport::Package { path, .. } => path,
        }
    }

    pub fn package(&self) -> Option<&str> {
        match self {
            ResolvedImport::Package { package, .. } => Some(package),
            _ => None,
        }
    }
}

/// What a package directory declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub name: String,
    pub version: Option<String>,
    pub dir: PathBuf,
    pub entry: PathBuf,
    pub metadata: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
    module: Option<String>,
    main: Option<String>,
    metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    source_root: PathBuf,
    aliases: Vec<(String, PathBuf)>,
    roots: Vec<PathBuf>,
}

impl Resolver {
    pub fn new(project_root: &Path, project: &ProjectConfig) -> Self {
        let source_root = clean_path(&project_root.join(&project.source_root));
        let mut aliases: Vec<(String, PathBuf)> = project
            .resolve
            .alias
            .iter()
            .map(|(key, target)| (key.clone(), clean_path(&source_root.join(target))))
            .collect();
        // Longest alias first so `@app/core` wins over `@app`.
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));

        let roots = project
            .resolve
            .paths
            .iter()
            .map(|p| clean_path(&project_root.join(p)))
            .collect();

        Resolver {
            source_root,
            aliases,
            roots,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Resolves `specifier` as seen from `importer`.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Option<ResolvedImport> {
        if is_relative(specifier) {
            let base = if specifier.starts_with('/') {
                self.source_root.join(specifier.trim_start_matches('/'))
            } else {
                importer
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(specifier)
            };
            return locate_file(&clean_path(&base)).map(|path| ResolvedImport::Relative { path });
        }

        for (alias, target) in &self.aliases {
            if specifier == alias {
                return locate_file(target).map(|path| ResolvedImport::Alias { path });
            }
            if let Some(rest) = specifier.strip_prefix(&format!("{}/", alias)) {
                return locate_file(&clean_path(&target.join(rest)))
                    .map(|path| ResolvedImport::Alias { path });
            }
        }

        let (package, subpath) = split_package_specifier(specifier);
        let info = self.package(&package)?;
        let path = match subpath {
            Some(sub) => locate_file(&clean_path(&info.dir.join(sub)))?,
            None => info.entry.clone(),
        };
        Some(ResolvedImport::Package { package, path })
    }

    /// Looks a package up in the resolution roots.
    pub fn package(&self, name: &str) -> Option<PackageInfo> {
        self.roots
            .iter()
            .map(|root| root.join(name))
            .find(|dir| dir.is_dir())
            .and_then(|dir| read_package(&dir, name))
    }
}

fn read_package(dir: &Path, name: &str) -> Option<PackageInfo> {
    let manifest: PackageJson = fs::read_to_string(dir.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();

    let entry = manifest
        .module
        .as_deref()
        .or(manifest.main.as_deref())
        .and_then(|rel| locate_file(&clean_path(&dir.join(rel))))
        .or_else(|| locate_file(&dir.join("index")))?;

    let metadata = manifest
        .metadata
        .as_deref()
        .map(|rel| dir.join(rel))
        .or_else(|| Some(dir.join("metadata.json")))
        .filter(|p| p.is_file());

    Some(PackageInfo {
        name: manifest.name.unwrap_or_else(|| name.to_string()),
        version: manifest.version,
        dir: dir.to_path_buf(),
        entry,
        metadata,
    })
}

pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// `@scope/pkg/sub/file` → (`@scope/pkg`, `sub/file`).
pub fn split_package_specifier(specifier: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = specifier.split('/').collect();
    let take = if specifier.starts_with('@') { 2 } else { 1 };
    let name = parts[..take.min(parts.len())].join("/");
    let rest = parts.get(take..).map(|r| r.join("/")).filter(|r| !r.is_empty());
    (name, rest)
}

/// Tries `path`, `path.js`, `path.mjs` and `path/index.js`.
pub fn locate_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let as_str = path.to_string_lossy();
    for ext in SOURCE_EXTENSIONS {
        let candidate = PathBuf::from(format!("{}.{}", as_str, ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    SOURCE_EXTENSIONS
        .iter()
        .map(|ext| path.join(format!("index.{}", ext)))
        .find(|candidate| candidate.is_file())
}

/// Lexical path normalisation (`a/./b/../c` → `a/c`).
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Identifier a package is bound to inside generated bundles.
pub fn package_alias(package: &str) -> String {
    let mut alias: String = package
        .trim_start_matches('@')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if alias.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        alias.insert(0, '_');
    }
    if !oxc_syntax::identifier::is_identifier_name(&alias) {
        alias = format!("_{}", alias);
    }
    alias
}

/// Dotted global path used by the UMD global branch (`@loom/core` → `loom.core`).
pub fn package_global(package: &str, overrides: &HashMap<String, String>) -> String {
    if let Some(global) = overrides.get(package) {
        return global.clone();
    }
    package
        .trim_start_matches('@')
        .split('/')
        .map(|part| {
            part.split(|c: char| !c.is_ascii_alphanumeric())
                .enumerate()
                .map(|(i, word)| {
                    if i == 0 {
                        word.to_string()
                    } else {
                        let mut chars = word.chars();
                        match chars.next() {
                            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                            None => String::new(),
                        }
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(".")
}
