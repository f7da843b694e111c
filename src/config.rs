//! Project manifest (`loom.json`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;

pub const MANIFEST_FILE: &str = "loom.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    #[default]
    Application,
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BundlePattern {
    #[serde(rename = "MODULE")]
    Module,
    #[serde(rename = "UMD")]
    Umd,
}

/// `entryFile`: one file, or a `name -> file` map whose values may be globs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryFile {
    Single(String),
    Named(BTreeMap<String, String>),
}

impl Default for EntryFile {
    fn default() -> Self {
        EntryFile::Single("main.js".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    pub folder: String,
    pub entry_file: EntryFile,
    /// HTML shell copied to the output folder with script tags injected.
    pub view: Option<String>,
    pub styles: Vec<String>,
    pub scripts: Vec<String>,
    pub assets: Vec<String>,
    #[serde(rename = "assetURL")]
    pub asset_url: Option<String>,
    pub patterns: Vec<BundlePattern>,
    pub generate_meta: bool,
    pub minify: bool,
    pub source_map: bool,
    /// UMD global names for packages, overriding the derived ones.
    pub globals: HashMap<String, String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            folder: "dist".to_string(),
            entry_file: EntryFile::default(),
            view: None,
            styles: Vec::new(),
            scripts: Vec::new(),
            assets: Vec::new(),
            asset_url: None,
            patterns: vec![BundlePattern::Module, BundlePattern::Umd],
            generate_meta: true,
            minify: false,
            source_map: false,
            globals: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    /// Package lookup roots, in order.
    pub paths: Vec<String>,
    /// Specifier prefix -> path relative to the source root.
    pub alias: BTreeMap<String, String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        ResolveConfig {
            paths: vec!["node_modules".to_string()],
            alias: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub source_root: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            source_root: "src".to_string(),
            project_type: ProjectType::Application,
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
        }
    }
}

impl ProjectConfig {
    pub fn is_library(&self) -> bool {
        self.project_type == ProjectType::Library
    }

    /// Entry files as `(name, path)` pairs, globs expanded.
    ///
    /// A single entry is named after the output folder's last component.
    pub fn entries(&self, project_root: &Path) -> Result<Vec<(String, PathBuf)>, BuildError> {
        let source_root = project_root.join(&self.source_root);
        match &self.output.entry_file {
            EntryFile::Single(file) => {
                let name = Path::new(&self.output.folder)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "main".to_string());
                Ok(vec![(name, source_root.join(file))])
            }
            EntryFile::Named(map) => {
                let mut entries = Vec::new();
                for (name, pattern) in map {
                    if !is_glob(pattern) {
                        entries.push((name.clone(), source_root.join(pattern)));
                        continue;
                    }
                    let full = source_root.join(pattern);
                    let paths = glob::glob(&full.to_string_lossy()).map_err(|e| {
                        BuildError::EntryPattern {
                            pattern: pattern.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    for path in paths.flatten() {
                        if !path.is_file() {
                            continue;
                        }
                        let stem = path
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_else(|| name.clone());
                        entries.push((stem, path));
                    }
                }
                Ok(entries)
            }
        }
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub default: Option<String>,
    pub projects: BTreeMap<String, ProjectConfig>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest, BuildError> {
        if !path.is_file() {
            return Err(BuildError::ManifestNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| BuildError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The named project, or the manifest default.
    pub fn project(&self, name: Option<&str>) -> Result<(&str, &ProjectConfig), BuildError> {
        let name = name
            .or(self.default.as_deref())
            .or_else(|| self.projects.keys().next().map(String::as_str))
            .ok_or_else(|| BuildError::UnknownProject(String::new()))?;
        self.projects
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| BuildError::UnknownProject(name.to_string()))
    }
}
