//! Compilation Graph
//!
//! Files live in an arena indexed by [`FileId`]. Ids are handed out in
//! depth-first pre-order, so the module table of a build is stable as long as
//! the sources are.
//!
//! State machine per file: unvisited (absent) → `InProgress` →
//! `Compiled` | `CompiledExternal` | `Failed`. In-progress files are never
//! re-entered, which is what makes import cycles harmless.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::annotation::{AnnotationDefinition, AnnotationKind};
use crate::error::{
    BuildError, CompilerError, ErrorLog, ERR_IMPORT_NOT_EXPORTED, ERR_IMPORT_RESOLUTION,
};
use crate::extract::{extract, ExtractedFile, ImportDescriptor};
use crate::registry::{GlobalImport, LazyEntry, LibraryMetadata, Registry};
use crate::resolve::{clean_path, package_alias, package_global, ResolvedImport, Resolver};

pub type FileId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    InProgress,
    Compiled,
    /// Package file compiled into an application's module table.
    CompiledExternal,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: FileId,
    pub path: PathBuf,
    pub state: FileState,
    pub parent: Option<FileId>,
    /// Root of the lazy chunk this file was first reached from.
    pub lazy_root: Option<FileId>,
    /// Package the file belongs to (application targets only).
    pub package: Option<String>,
    pub extracted: Option<ExtractedFile>,
    pub annotations: Vec<(AnnotationKind, String)>,
    /// Target file per import descriptor; `None` for external packages.
    pub import_targets: Vec<Option<FileId>>,
    /// Resolved target per lazy-load call site.
    pub lazy_targets: Vec<Option<PathBuf>>,
    /// Generated module body, filled in by the code generator.
    pub output: Option<String>,
}

impl FileRecord {
    fn new(id: FileId, path: PathBuf, parent: Option<FileId>, lazy_root: Option<FileId>, package: Option<String>) -> Self {
        FileRecord {
            id,
            path,
            state: FileState::InProgress,
            parent,
            lazy_root,
            package,
            extracted: None,
            annotations: Vec::new(),
            import_targets: Vec::new(),
            lazy_targets: Vec::new(),
            output: None,
        }
    }

    /// Key used for error attribution and registry `file` fields.
    pub fn key(&self) -> String {
        path_key(&self.path)
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state, FileState::Compiled | FileState::CompiledExternal)
    }
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Arena of file records plus a path index.
#[derive(Debug, Clone, Default)]
pub struct FileGraph {
    records: Vec<FileRecord>,
    index: HashMap<PathBuf, FileId>,
}

impl FileGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: FileId) -> &FileRecord {
        &self.records[id]
    }

    pub fn get_mut(&mut self, id: FileId) -> &mut FileRecord {
        &mut self.records[id]
    }

    pub fn lookup(&self, path: &Path) -> Option<FileId> {
        self.index.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileRecord> {
        self.records.iter_mut()
    }

    fn push(
        &mut self,
        path: PathBuf,
        parent: Option<FileId>,
        lazy_root: Option<FileId>,
        package: Option<String>,
    ) -> FileId {
        let id = self.records.len();
        self.index.insert(path.clone(), id);
        self.records
            .push(FileRecord::new(id, path, parent, lazy_root, package));
        id
    }

    /// Puts a record back into `InProgress`, keeping its id and placement.
    fn reset(&mut self, id: FileId) {
        let record = &mut self.records[id];
        *record = FileRecord::new(
            id,
            record.path.clone(),
            record.parent,
            record.lazy_root,
            record.package.clone(),
        );
    }

    /// Files with an import resolved to `id`.
    pub fn importers_of(&self, id: FileId) -> Vec<FileId> {
        self.records
            .iter()
            .filter(|r| r.import_targets.contains(&Some(id)))
            .map(|r| r.id)
            .collect()
    }

    /// Compiled files of the main module table, in id order.
    pub fn main_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.records
            .iter()
            .filter(|r| r.lazy_root.is_none() && r.is_compiled())
    }

    /// Compiled files of one lazy chunk, in id order.
    pub fn chunk_files(&self, root: FileId) -> impl Iterator<Item = &FileRecord> {
        self.records
            .iter()
            .filter(move |r| r.lazy_root == Some(root) && r.is_compiled())
    }

    /// Roots of every lazy chunk, in id order.
    pub fn chunk_roots(&self) -> BTreeSet<FileId> {
        self.records.iter().filter_map(|r| r.lazy_root).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything one output target compiles against.
#[derive(Debug, Clone)]
pub struct Session {
    pub resolver: Resolver,
    /// Library targets bind packages as externals instead of compiling them.
    pub library: bool,
    /// UMD global overrides from the manifest.
    pub globals: HashMap<String, String>,
    pub graph: FileGraph,
    pub registry: Registry,
    pub errors: ErrorLog,
}

impl Session {
    pub fn new(resolver: Resolver, library: bool, globals: HashMap<String, String>) -> Self {
        Session {
            resolver,
            library,
            globals,
            graph: FileGraph::new(),
            registry: Registry::new(),
            errors: ErrorLog::new(),
        }
    }

    /// Compiles an entry file, everything it reaches and then its lazy chunks.
    pub fn compile_entry(&mut self, path: &Path) -> FileId {
        let id = self.compile_file(path, None, None, None);
        self.drain_lazy();
        info!(
            "[LOOM graph] {} files reached from {}",
            self.graph.len(),
            path_key(path)
        );
        id
    }

    /// Compiles `path` unless it was already visited; returns its id.
    pub fn compile_file(
        &mut self,
        path: &Path,
        parent: Option<FileId>,
        lazy_root: Option<FileId>,
        package: Option<&str>,
    ) -> FileId {
        let path = clean_path(path);
        if let Some(id) = self.graph.lookup(&path) {
            return id;
        }
        let id = self
            .graph
            .push(path, parent, lazy_root, package.map(str::to_string));
        self.compile_record(id);
        id
    }

    fn compile_record(&mut self, id: FileId) {
        let (path, package, lazy_root, parent) = {
            let r = self.graph.get(id);
            (r.path.clone(), r.package.clone(), r.lazy_root, r.parent)
        };
        let key = path_key(&path);
        let importer = parent.map(|p| self.graph.get(p).key());
        debug!("[LOOM graph] compiling {}", key);

        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                let mut err = CompilerError::new(
                    ERR_IMPORT_RESOLUTION,
                    &format!("Cannot read {}: {}", key, e),
                    &key,
                );
                if let Some(importer) = &importer {
                    err = err.with_importer(importer);
                }
                self.errors.push(err);
                self.fail(id);
                return;
            }
        };

        let mut extracted = match extract(&source, &key) {
            Ok(extracted) => extracted,
            Err(mut err) => {
                err.importer = importer.clone();
                self.errors.push(err);
                self.fail(id);
                return;
            }
        };
        self.errors.extend(std::mem::take(&mut extracted.errors));

        let mut registered = Vec::new();
        for block in &extracted.annotations {
            let def = AnnotationDefinition {
                name: block.name.clone(),
                kind: block.kind,
                properties: block.properties.clone(),
                implementation: extracted.annotation_implementation(block),
                file: key.clone(),
                module: None,
                external: package.clone(),
                exported: block.exported,
            };
            if package.is_some() {
                self.registry.register_external(def);
                registered.push((block.kind, block.name.clone()));
            } else if self.registry.register(def, &mut self.errors) {
                registered.push((block.kind, block.name.clone()));
            }
        }

        let import_count = extracted.imports.len();
        let lazy_loads = extracted.lazy_loads.clone();
        {
            let record = self.graph.get_mut(id);
            record.annotations = registered;
            record.import_targets = vec![None; import_count];
            record.extracted = Some(extracted);
        }

        for i in 0..import_count {
            let Some((specifier, requested)) = self
                .import(id, i)
                .map(|import| (import.source.clone(), import.requested_names()))
            else {
                continue;
            };
            let Some(resolved) = self.resolver.resolve(&specifier, &path) else {
                self.errors.push(
                    CompilerError::new(
                        ERR_IMPORT_RESOLUTION,
                        &format!("Cannot resolve '{}' imported by {}", specifier, key),
                        &key,
                    )
                    .with_identifier(&requested.join(", "))
                    .with_context(specifier.clone())
                    .with_hint("Check the path, the resolve.alias map and the resolve.paths roots."),
                );
                self.fail(id);
                return;
            };
            if let Some(extracted) = self.graph.get_mut(id).extracted.as_mut() {
                extracted.imports[i].resolved = Some(resolved.clone());
            }

            match &resolved {
                ResolvedImport::Package { package: pkg, path: entry } => {
                    self.register_package(pkg);
                    if self.library {
                        self.validate_package_import(id, i, pkg);
                    } else {
                        let target = self.compile_file(entry, Some(id), lazy_root, Some(pkg));
                        self.graph.get_mut(id).import_targets[i] = Some(target);
                        self.validate_import(id, i);
                    }
                }
                _ => {
                    let target =
                        self.compile_file(resolved.path(), Some(id), lazy_root, package.as_deref());
                    self.graph.get_mut(id).import_targets[i] = Some(target);
                    self.validate_import(id, i);
                }
            }
        }

        let mut lazy_targets = Vec::with_capacity(lazy_loads.len());
        for lazy in &lazy_loads {
            match self.resolver.resolve(&lazy.specifier, &path) {
                Some(resolved) => {
                    let target = clean_path(resolved.path());
                    self.registry.output.lazy.push(LazyEntry {
                        target: target.clone(),
                        importer: path.clone(),
                    });
                    lazy_targets.push(Some(target));
                }
                None => {
                    self.errors.push(
                        CompilerError::new(
                            ERR_IMPORT_RESOLUTION,
                            &format!("Cannot resolve lazy import '{}'", lazy.specifier),
                            &key,
                        )
                        .with_identifier(&lazy.specifier)
                        .with_context(lazy.specifier.clone()),
                    );
                    lazy_targets.push(None);
                }
            }
        }

        let record = self.graph.get_mut(id);
        record.lazy_targets = lazy_targets;
        record.state = if package.is_some() {
            FileState::CompiledExternal
        } else {
            FileState::Compiled
        };
        self.errors.report_file(&key);
    }

    fn import(&self, id: FileId, index: usize) -> Option<&ImportDescriptor> {
        self.graph
            .get(id)
            .extracted
            .as_ref()
            .and_then(|x| x.imports.get(index))
    }

    fn fail(&mut self, id: FileId) {
        let key = self.graph.get(id).key();
        self.registry.deregister_file(&key);
        let record = self.graph.get_mut(id);
        record.state = FileState::Failed;
        record.extracted = None;
        record.annotations.clear();
        record.import_targets.clear();
        self.errors.report_file(&key);
    }

    /// Compiles deferred imports after the main traversal.
    ///
    /// A target already in the module table (or an earlier chunk) stays where
    /// it is; a new target becomes the root of its own chunk.
    pub fn drain_lazy(&mut self) {
        let mut cursor = 0;
        while cursor < self.registry.output.lazy.len() {
            let entry = self.registry.output.lazy[cursor].clone();
            cursor += 1;
            if self.graph.lookup(&entry.target).is_some() {
                continue;
            }
            let importer = self.graph.lookup(&entry.importer);
            let root = self.graph.len();
            debug!("[LOOM graph] lazy chunk {} rooted at {}", root, path_key(&entry.target));
            self.compile_file(&entry.target, importer, Some(root), None);
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Export surface
    // ───────────────────────────────────────────────────────────────────────────

    /// Names `id` exports; `true` when the surface is open (an unresolved or
    /// package star re-export of unknown names).
    pub fn export_surface(&self, id: FileId) -> (BTreeSet<String>, bool) {
        let mut names = BTreeSet::new();
        let mut open = false;
        let mut visited = HashSet::new();
        self.collect_exports(id, &mut names, &mut open, &mut visited);
        (names, open)
    }

    fn collect_exports(
        &self,
        id: FileId,
        names: &mut BTreeSet<String>,
        open: &mut bool,
        visited: &mut HashSet<FileId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let record = self.graph.get(id);
        let Some(extracted) = &record.extracted else {
            *open = true;
            return;
        };
        for export in &extracted.exports {
            if !export.star {
                names.insert(export.exported.clone());
                continue;
            }
            let Some(import) = export.reexport_of else {
                continue;
            };
            match record.import_targets.get(import).copied().flatten() {
                Some(target) => {
                    let mut inner = BTreeSet::new();
                    self.collect_exports(target, &mut inner, open, visited);
                    inner.remove("default");
                    names.extend(inner);
                }
                None => {
                    let package = extracted.imports[import]
                        .resolved
                        .as_ref()
                        .and_then(|r| r.package())
                        .and_then(|p| self.registry.global_imports.get(p));
                    match package {
                        Some(global) => {
                            names.extend(global.exports.iter().filter(|n| *n != "default").cloned());
                            *open |= global.open_exports;
                        }
                        None => *open = true,
                    }
                }
            }
        }
    }

    fn validate_import(&mut self, importer: FileId, index: usize) {
        let Some(target) = self.graph.get(importer).import_targets[index] else {
            return;
        };
        if self.graph.get(target).state == FileState::Failed {
            return;
        }
        let requested = self
            .import(importer, index)
            .map(|import| import.requested_names())
            .unwrap_or_default();
        if requested.is_empty() {
            return;
        }
        let (names, open) = self.export_surface(target);
        if open {
            return;
        }
        let missing: Vec<String> = requested
            .into_iter()
            .filter(|n| !names.contains(n))
            .collect();
        if !missing.is_empty() {
            let target_key = self.graph.get(target).key();
            self.report_not_exported(importer, &missing, &target_key);
        }
    }

    fn validate_package_import(&mut self, importer: FileId, index: usize, package: &str) {
        let Some(global) = self.registry.global_imports.get(package) else {
            return;
        };
        let missing: Vec<String> = self
            .import(importer, index)
            .map(|import| import.requested_names())
            .unwrap_or_default()
            .into_iter()
            .filter(|n| !global.exports_name(n))
            .collect();
        if !missing.is_empty() {
            self.report_not_exported(importer, &missing, package);
        }
    }

    fn report_not_exported(&mut self, importer: FileId, missing: &[String], target: &str) {
        let key = self.graph.get(importer).key();
        let names = missing.join(", ");
        self.errors.push(
            CompilerError::new(
                ERR_IMPORT_NOT_EXPORTED,
                &format!("{} does not export {}", target, names),
                &key,
            )
            .with_identifier(&names)
            .with_context(target.to_string()),
        );
    }

    /// Re-checks every import of `importer` after one of its targets changed.
    fn revalidate_imports(&mut self, importer: FileId) {
        let key = self.graph.get(importer).key();
        self.errors
            .clear_file_codes(&key, &[ERR_IMPORT_NOT_EXPORTED]);
        let count = self.graph.get(importer).import_targets.len();
        for i in 0..count {
            if self.graph.get(importer).import_targets[i].is_some() {
                self.validate_import(importer, i);
                continue;
            }
            let package = self
                .import(importer, i)
                .and_then(|import| import.resolved.as_ref())
                .and_then(|r| r.package())
                .map(str::to_string);
            if let (true, Some(package)) = (self.library, package) {
                self.validate_package_import(importer, i, &package);
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Packages
    // ───────────────────────────────────────────────────────────────────────────

    /// Records a package in `global_imports` with its export surface.
    ///
    /// A companion `metadata.json` is read once and registers the package's
    /// definitions; without it the entry file is extracted for its exports.
    fn register_package(&mut self, name: &str) {
        if self.registry.global_imports.contains_key(name) {
            return;
        }
        let Some(info) = self.resolver.package(name) else {
            return;
        };
        let mut global = GlobalImport {
            package: name.to_string(),
            alias: package_alias(name),
            global: package_global(name, &self.globals),
            version: info.version.clone(),
            entry: info.entry.clone(),
            ..Default::default()
        };

        let metadata = info.metadata.as_ref().and_then(|path| {
            let text = fs::read_to_string(path).ok()?;
            match serde_json::from_str::<LibraryMetadata>(&text) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!("[LOOM graph] ignoring {}: {}", path_key(path), e);
                    None
                }
            }
        });

        match metadata {
            Some(meta) => {
                self.registry.register_package_metadata(name, &meta);
                global.modules = meta.modules.keys().cloned().collect();
                global.exports = meta.exports.iter().cloned().collect();
                if global.exports.is_empty() {
                    (global.exports, global.open_exports) = entry_exports(&info.entry);
                }
            }
            None => {
                (global.exports, global.open_exports) = entry_exports(&info.entry);
            }
        }

        info!(
            "[LOOM graph] package {} bound as {} ({} exports)",
            name,
            global.alias,
            global.exports.len()
        );
        self.registry.global_imports.insert(name.to_string(), global);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Incremental
    // ───────────────────────────────────────────────────────────────────────────

    /// Recompiles one file in place and re-validates the files importing it.
    pub fn recompile_file(&mut self, path: &Path) -> Result<FileId, BuildError> {
        let path = clean_path(path);
        let id = self
            .graph
            .lookup(&path)
            .ok_or_else(|| BuildError::UnknownFile(path.clone()))?;
        let key = path_key(&path);

        self.registry.deregister_file(&key);
        self.errors.clear_file(&key);
        self.registry.output.lazy.retain(|e| e.importer != path);
        self.graph.reset(id);
        self.compile_record(id);

        for importer in self.graph.importers_of(id) {
            self.revalidate_imports(importer);
        }
        self.drain_lazy();
        Ok(id)
    }
}

/// Export names of a package entry file, extracted without registering it.
fn entry_exports(entry: &Path) -> (BTreeSet<String>, bool) {
    let key = path_key(entry);
    let extracted = fs::read_to_string(entry)
        .ok()
        .and_then(|source| extract(&source, &key).ok());
    match extracted {
        Some(x) => {
            let open = x.exports.iter().any(|e| e.star);
            let names = x
                .exports
                .into_iter()
                .filter(|e| !e.star)
                .map(|e| e.exported)
                .collect();
            (names, open)
        }
        None => {
            warn!("[LOOM graph] cannot read exports of {}", key);
            (BTreeSet::new(), true)
        }
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
