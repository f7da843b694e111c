//! Build orchestration.
//!
//! A [`Compiler`] owns one project of the manifest. Each entry of the project
//! is an independent [`Target`] with its own [`Session`] (graph, registry,
//! error log); targets build in parallel. A target build runs the graph
//! traversal, module and dependency wiring, the template pass with its
//! projection drain, code generation and artifact emission through the
//! content-hash cache.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::annotation::{AnnotationDefinition, PropertyValue};
use crate::bundle::{
    application_bootstrap, chunk_dependencies, chunk_file, chunk_file_name, copy_assets,
    inject_scripts, minify, module_table, package_json, styles_js, LibraryBundle, BUNDLES_DIR,
    METADATA_FILE, PACKAGE_FILE, STYLES_FILE,
};
use crate::cache::{OutputCache, CACHE_DIR};
use crate::codegen::{generate_module, CodegenContext, GeneratedModule};
use crate::config::{BundlePattern, Manifest, ProjectConfig, MANIFEST_FILE};
use crate::error::{
    BuildError, CompilerError, ERR_EXPRESSION, ERR_PIPE_UNRESOLVED, ERR_PLACE_UNRESOLVED,
    ERR_PROVIDER_NOT_EXPORTED, ERR_QUERY_UNRESOLVED, ERR_TEMPLATE_ID, ERR_TEMPLATE_SOURCE,
    ERR_UNKNOWN_DIRECTIVE, ERR_UNKNOWN_ELEMENT,
};
use crate::graph::{path_key, FileId, Session};
use crate::resolve::{clean_path, package_global, Resolver};
use crate::template::{compile_template, drain_pending, TemplateOptions};
use crate::wiring;

const TEMPLATE_CODES: &[&str] = &[
    ERR_TEMPLATE_SOURCE,
    ERR_UNKNOWN_ELEMENT,
    ERR_UNKNOWN_DIRECTIVE,
    ERR_PIPE_UNRESOLVED,
    ERR_PLACE_UNRESOLVED,
    ERR_QUERY_UNRESOLVED,
    ERR_EXPRESSION,
];

const CODEGEN_CODES: &[&str] = &[ERR_TEMPLATE_ID, ERR_PROVIDER_NOT_EXPORTED];

/// What changed on disk, as reported by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Script or template text.
    Content,
    Style,
    Asset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub name: String,
    /// Compiled files in the module tables.
    pub files: usize,
    /// Artifacts rewritten by this run, relative to the output folder.
    pub written: Vec<String>,
    pub errors: Vec<CompilerError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub project: String,
    pub targets: Vec<TargetReport>,
}

impl BuildReport {
    pub fn error_count(&self) -> usize {
        self.targets.iter().map(|t| t.errors.len()).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TARGET
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry file of a project and everything compiled from it.
pub struct Target {
    pub name: String,
    pub entry: PathBuf,
    pub entry_id: Option<FileId>,
    pub session: Session,
    pub out_dir: PathBuf,
    config: ProjectConfig,
    project_root: PathBuf,
    source_root: PathBuf,
    cache: OutputCache,
}

impl Target {
    fn new(project_root: &Path, config: &ProjectConfig, name: String, entry: PathBuf, out_dir: PathBuf) -> Self {
        let resolver = Resolver::new(project_root, config);
        let session = Session::new(resolver, config.is_library(), config.output.globals.clone());
        let cache = OutputCache::open(&project_root.join(CACHE_DIR), &format!("{}-{}", config.output.folder, name));
        Target {
            name,
            entry: clean_path(&entry),
            entry_id: None,
            session,
            out_dir,
            config: config.clone(),
            project_root: project_root.to_path_buf(),
            source_root: project_root.join(&config.source_root),
            cache,
        }
    }

    pub fn build(&mut self) -> Result<TargetReport, BuildError> {
        if !self.entry.is_file() {
            return Err(BuildError::EntryUnresolved {
                project: self.name.clone(),
                entry: path_key(&self.entry),
            });
        }
        info!("[LOOM] building {} from {}", self.name, path_key(&self.entry));
        self.entry_id = Some(self.session.compile_entry(&self.entry));
        self.analyze();
        self.finish()
    }

    /// Wiring, styles and templates over the current graph.
    fn analyze(&mut self) {
        wiring::validate(&mut self.session.registry, &mut self.session.errors);
        self.load_styles();
        self.compile_templates();
    }

    fn finish(&mut self) -> Result<TargetReport, BuildError> {
        let written = self.emit()?;
        self.cache.save()?;
        let report = self.report(written);
        info!(
            "[LOOM] {}: {} files, {} errors, {} artifacts written",
            report.name,
            report.files,
            report.errors.len(),
            report.written.len()
        );
        Ok(report)
    }

    fn report(&self, written: Vec<String>) -> TargetReport {
        TargetReport {
            name: self.name.clone(),
            files: self.session.graph.iter().filter(|r| r.is_compiled()).count(),
            written,
            errors: self.session.errors.iter().cloned().collect(),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Templates and styles
    // ───────────────────────────────────────────────────────────────────────────

    fn local_elements(&self) -> Vec<AnnotationDefinition> {
        self.session
            .registry
            .elements
            .values()
            .filter(|d| d.external.is_none())
            .cloned()
            .collect()
    }

    fn compile_templates(&mut self) {
        let options = TemplateOptions {
            asset_url: self.config.output.asset_url.clone(),
        };
        let elements = self.local_elements();
        let session = &mut self.session;
        session.errors.clear_codes(TEMPLATE_CODES);
        session.registry.output.templates.clear();
        session.registry.output.template_paths.clear();

        for def in &elements {
            let markup = match template_source(def) {
                Ok(source) => {
                    if let Some(path) = source.path {
                        session
                            .registry
                            .output
                            .template_paths
                            .entry(path)
                            .or_default()
                            .insert(def.name.clone());
                    }
                    source.text
                }
                Err((path, err)) => {
                    if let Some(path) = path {
                        session
                            .registry
                            .output
                            .template_paths
                            .entry(path)
                            .or_default()
                            .insert(def.name.clone());
                    }
                    session.errors.push(err);
                    continue;
                }
            };
            let compiled = compile_template(&markup, def, &session.registry, &options);
            session.errors.extend(compiled.errors.iter().cloned());
            session
                .registry
                .output
                .templates
                .insert(def.name.clone(), compiled);
        }
        let resolved = drain_pending(&mut session.registry, &mut session.errors);
        debug!("[LOOM template] {} deferred projections routed", resolved);
    }

    fn load_styles(&mut self) {
        let elements = self.local_elements();
        let output = &mut self.session.registry.output;
        output.styles.clear();
        output.style_paths.clear();
        for def in &elements {
            let mut sheets = Vec::new();
            if let Some(url) = def.string_property("styleUrl") {
                let path = resource_path(def, url);
                match fs::read_to_string(&path) {
                    Ok(css) => sheets.push(css),
                    Err(e) => warn!("[LOOM] cannot read style {}: {}", path_key(&path), e),
                }
                output
                    .style_paths
                    .entry(path)
                    .or_default()
                    .insert(def.name.clone());
            }
            match def.property("styles") {
                Some(PropertyValue::String(css)) => sheets.push(css.clone()),
                Some(PropertyValue::Array(items)) => {
                    sheets.extend(items.iter().filter_map(|i| i.as_str().map(str::to_string)))
                }
                _ => {}
            }
            if !sheets.is_empty() {
                output.styles.insert(def.name.clone(), sheets.join("\n"));
            }
        }
    }

    /// Project-level stylesheets of `output.styles`.
    fn global_styles(&self) -> Vec<(String, String)> {
        let mut sheets = Vec::new();
        for file in &self.config.output.styles {
            let path = self.source_root.join(file);
            match fs::read_to_string(&path) {
                Ok(css) => sheets.push((file.clone(), css)),
                Err(e) => warn!("[LOOM] cannot read style {}: {}", path_key(&path), e),
            }
        }
        sheets
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Emission
    // ───────────────────────────────────────────────────────────────────────────

    fn generate(&mut self) -> Vec<GeneratedModule> {
        let session = &mut self.session;
        let modules: Vec<GeneratedModule> = {
            let cx = CodegenContext {
                graph: &session.graph,
                registry: &session.registry,
                library: session.library,
            };
            session
                .graph
                .iter()
                .filter(|r| r.is_compiled())
                .filter_map(|r| generate_module(r, &cx))
                .collect()
        };
        session.errors.clear_codes(CODEGEN_CODES);
        for module in &modules {
            session.errors.extend(module.errors.iter().cloned());
            session.graph.get_mut(module.id).output = Some(module.code.clone());
        }
        modules
    }

    fn emit(&mut self) -> Result<Vec<String>, BuildError> {
        let Some(entry_id) = self.entry_id else {
            return Ok(Vec::new());
        };
        let modules = self.generate();
        if self.config.is_library() {
            self.emit_library(entry_id, &modules)
        } else {
            self.emit_application(entry_id, &modules)
        }
    }

    fn write(&mut self, written: &mut Vec<String>, relative: &str, content: &str) -> Result<(), BuildError> {
        if self.cache.write_str(&self.out_dir.join(relative), content)? {
            written.push(relative.to_string());
        }
        Ok(())
    }

    /// The library's `package.json` next to its source root, when present.
    fn source_package_json(&self) -> Option<Value> {
        let dir = self.source_root.parent().unwrap_or(&self.project_root);
        let text = fs::read_to_string(dir.join(PACKAGE_FILE)).ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[LOOM] ignoring invalid {}: {}", PACKAGE_FILE, e);
                None
            }
        }
    }

    fn emit_library(&mut self, entry_id: FileId, modules: &[GeneratedModule]) -> Result<Vec<String>, BuildError> {
        let mut written = Vec::new();
        let existing = self.source_package_json();
        let package_name = existing
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(&self.name)
            .to_string();
        let version = existing
            .as_ref()
            .and_then(|p| p.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let (exports, open) = self.session.export_surface(entry_id);
        if open {
            warn!(
                "[LOOM] {} re-exports names that cannot be listed; the MODULE bundle omits them",
                self.name
            );
        }
        let table = module_table(modules);
        let global = package_global(&package_name, &self.config.output.globals);
        let registry = &self.session.registry;
        let bundle = LibraryBundle {
            name: &self.name,
            global: &global,
            table: &table,
            entry: entry_id,
            exports: &exports,
            packages: registry.global_imports.values().collect(),
        };

        let mut artifacts = Vec::new();
        for pattern in &self.config.output.patterns {
            artifacts.push((
                format!("{}/{}", BUNDLES_DIR, bundle.file_name(*pattern)),
                bundle.render(*pattern),
            ));
        }
        if self.config.output.minify && self.config.output.patterns.contains(&BundlePattern::Umd) {
            let file_name = format!("{}-umd.min.js", self.name);
            if let Some(min) = minify(&bundle.umd(), &file_name, self.config.output.source_map) {
                artifacts.push((format!("{}/{}", BUNDLES_DIR, file_name), min.code));
                if let Some(map) = min.map {
                    artifacts.push((format!("{}/{}.map", BUNDLES_DIR, file_name), map));
                }
            }
        }
        if self.config.output.generate_meta {
            let meta = registry.metadata(&package_name, version.as_deref(), &exports);
            let text = serde_json::to_string_pretty(&meta).map_err(|source| BuildError::Serialize {
                what: METADATA_FILE.to_string(),
                source,
            })?;
            artifacts.push((METADATA_FILE.to_string(), text));
        }
        let package = package_json(
            existing,
            &package_name,
            &bundle,
            &self.config.output.patterns,
            self.config.output.generate_meta,
        );
        let text = serde_json::to_string_pretty(&package).map_err(|source| BuildError::Serialize {
            what: PACKAGE_FILE.to_string(),
            source,
        })?;
        artifacts.push((PACKAGE_FILE.to_string(), text));

        for (relative, content) in artifacts {
            self.write(&mut written, &relative, &content)?;
        }
        Ok(written)
    }

    fn emit_application(&mut self, entry_id: FileId, modules: &[GeneratedModule]) -> Result<Vec<String>, BuildError> {
        let mut written = Vec::new();
        let graph = &self.session.graph;
        let main = module_table(modules.iter().filter(|m| graph.get(m.id).lazy_root.is_none()));
        let bootstrap_name = self
            .entry
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "main.js".to_string());

        let mut artifacts = vec![(bootstrap_name.clone(), application_bootstrap(&main, entry_id))];
        for root in graph.chunk_roots() {
            let table = module_table(modules.iter().filter(|m| graph.get(m.id).lazy_root == Some(root)));
            let deps = chunk_dependencies(graph, root);
            artifacts.push((chunk_file_name(root), chunk_file(root, &table, &deps)));
        }

        let mut sheets = self.global_styles();
        sheets.extend(
            self.session
                .registry
                .output
                .styles
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        artifacts.push((STYLES_FILE.to_string(), styles_js(&sheets)));

        let mut scripts: Vec<String> = Vec::new();
        for script in self.config.output.scripts.clone() {
            let path = self.source_root.join(&script);
            match fs::read_to_string(&path) {
                Ok(text) => {
                    let name = Path::new(&script)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| script.clone());
                    artifacts.push((name.clone(), text));
                    scripts.push(name);
                }
                Err(e) => warn!("[LOOM] cannot read script {}: {}", path_key(&path), e),
            }
        }
        scripts.push(STYLES_FILE.to_string());
        scripts.push(bootstrap_name);

        if let Some(view) = self.config.output.view.clone() {
            let name = Path::new(&view)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "index.html".to_string());
            if !self.out_dir.join(&name).exists() {
                let path = self.source_root.join(&view);
                let html = fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
                artifacts.push((name, inject_scripts(&html, &scripts)));
            }
        }

        for (relative, content) in artifacts {
            self.write(&mut written, &relative, &content)?;
        }
        let assets = self.config.output.assets.clone();
        copy_assets(&self.source_root, &assets, &self.out_dir, &mut self.cache)?;
        Ok(written)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Incremental
    // ───────────────────────────────────────────────────────────────────────────

    /// Whether a change of `kind` at `path` concerns this target.
    pub fn owns(&self, path: &Path, kind: ChangeKind) -> bool {
        let output = &self.session.registry.output;
        match kind {
            ChangeKind::Content => {
                self.session.graph.lookup(path).is_some() || output.template_paths.contains_key(path)
            }
            ChangeKind::Style => {
                output.style_paths.contains_key(path)
                    || self
                        .config
                        .output
                        .styles
                        .iter()
                        .any(|s| clean_path(&self.source_root.join(s)) == path)
            }
            ChangeKind::Asset => !self.config.is_library() && path.starts_with(&self.source_root),
        }
    }

    pub fn recompile(&mut self, path: &Path, kind: ChangeKind) -> Result<TargetReport, BuildError> {
        info!("[LOOM] {} changed ({:?}) in {}", path_key(path), kind, self.name);
        match kind {
            ChangeKind::Content => {
                if self.session.graph.lookup(path).is_some() {
                    self.session.recompile_file(path)?;
                }
                self.analyze();
                self.finish()
            }
            ChangeKind::Style => {
                self.load_styles();
                self.finish()
            }
            ChangeKind::Asset => {
                let assets = self.config.output.assets.clone();
                let copied = copy_assets(&self.source_root, &assets, &self.out_dir, &mut self.cache)?;
                self.cache.save()?;
                debug!("[LOOM] {} assets copied", copied);
                Ok(self.report(Vec::new()))
            }
        }
    }
}

struct TemplateText {
    text: String,
    path: Option<PathBuf>,
}

fn resource_path(def: &AnnotationDefinition, url: &str) -> PathBuf {
    let dir = Path::new(&def.file).parent().unwrap_or(Path::new(""));
    clean_path(&dir.join(url))
}

/// Inline `template` or the file named by `templateUrl`; no template at all
/// compiles as empty markup.
fn template_source(def: &AnnotationDefinition) -> Result<TemplateText, (Option<PathBuf>, CompilerError)> {
    if let Some(text) = def.string_property("template") {
        return Ok(TemplateText {
            text: text.to_string(),
            path: None,
        });
    }
    let Some(url) = def.string_property("templateUrl") else {
        return Ok(TemplateText {
            text: String::new(),
            path: None,
        });
    };
    let path = resource_path(def, url);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(TemplateText {
            text,
            path: Some(path),
        }),
        Err(e) => {
            let err = CompilerError::new(
                ERR_TEMPLATE_SOURCE,
                &format!("Cannot read template {} of {}: {}", url, def.name, e),
                &def.file,
            )
            .with_identifier(&def.name)
            .with_context(path_key(&path));
            Err((Some(path), err))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Compiler {
    pub project: String,
    pub project_root: PathBuf,
    targets: Vec<Target>,
}

impl Compiler {
    /// Loads `loom.json` from `project_root` and prepares the targets of
    /// `project` (or the manifest default).
    pub fn open(project_root: &Path, project: Option<&str>) -> Result<Self, BuildError> {
        let manifest = Manifest::load(&project_root.join(MANIFEST_FILE))?;
        let (name, config) = manifest.project(project)?;
        Self::with_config(project_root, name, config)
    }

    pub fn with_config(project_root: &Path, name: &str, config: &ProjectConfig) -> Result<Self, BuildError> {
        let project_root = clean_path(project_root);
        let entries = config.entries(&project_root)?;
        if entries.is_empty() {
            return Err(BuildError::EntryUnresolved {
                project: name.to_string(),
                entry: format!("{:?}", config.output.entry_file),
            });
        }
        let folder = project_root.join(&config.output.folder);
        let single = entries.len() == 1;
        let targets = entries
            .into_iter()
            .map(|(entry_name, entry)| {
                let out_dir = if single {
                    folder.clone()
                } else {
                    folder.join(&entry_name)
                };
                Target::new(&project_root, config, entry_name, entry, out_dir)
            })
            .collect();
        Ok(Compiler {
            project: name.to_string(),
            project_root,
            targets,
        })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Builds every target; independent targets run in parallel.
    pub fn build(&mut self) -> Result<BuildReport, BuildError> {
        let targets = self
            .targets
            .par_iter_mut()
            .map(Target::build)
            .collect::<Result<Vec<_>, _>>()?;
        let report = BuildReport {
            project: self.project.clone(),
            targets,
        };
        if report.has_errors() {
            warn!("[LOOM] {} finished with {} errors", self.project, report.error_count());
        }
        Ok(report)
    }

    /// Rebuilds the targets a changed file belongs to.
    pub fn recompile(&mut self, path: &Path, kind: ChangeKind) -> Result<BuildReport, BuildError> {
        let path = clean_path(path);
        let mut targets = Vec::new();
        for target in self.targets.iter_mut().filter(|t| t.owns(&path, kind)) {
            targets.push(target.recompile(&path, kind)?);
        }
        if targets.is_empty() {
            return Err(BuildError::UnknownFile(path));
        }
        Ok(BuildReport {
            project: self.project.clone(),
            targets,
        })
    }

    /// Names of every file the targets compiled, for a watcher.
    pub fn watched_files(&self) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();
        for target in &self.targets {
            files.extend(target.session.graph.iter().map(|r| r.path.clone()));
            let output = &target.session.registry.output;
            files.extend(output.template_paths.keys().cloned());
            files.extend(output.style_paths.keys().cloned());
        }
        files
    }
}

/// Loads the manifest and builds one project.
pub fn build_project(project_root: &Path, project: Option<&str>) -> Result<BuildReport, BuildError> {
    Compiler::open(project_root, project)?.build()
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod tests;
