//! Per-target annotation registry.
//!
//! One [`Registry`] exists per output target and is passed by `&mut` through
//! the pipeline. Services, providers and pipes share one map.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::annotation::{AnnotationDefinition, AnnotationKind, PropertyValue};
use crate::error::{CompilerError, ErrorLog, ERR_DUPLICATE_REGISTRATION, ERR_ELEMENT_SELECTOR};
use crate::selector::{MatchTarget, Selector};
use crate::template::CompiledTemplate;

/// Summary of one package dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalImport {
    pub package: String,
    /// Identifier the package is bound to inside bundles.
    pub alias: String,
    /// Dotted global path for the UMD browser branch.
    pub global: String,
    pub version: Option<String>,
    pub entry: PathBuf,
    pub exports: BTreeSet<String>,
    /// The entry re-exports something whose names are unknown.
    pub open_exports: bool,
    /// Module definitions the package exports.
    pub modules: BTreeSet<String>,
}

impl GlobalImport {
    pub fn exports_name(&self, name: &str) -> bool {
        self.open_exports || self.exports.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorEntry {
    pub text: String,
    pub selector: Selector,
    pub kind: AnnotationKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyEntry {
    pub target: PathBuf,
    pub importer: PathBuf,
}

/// Output-side state collected while a target compiles.
#[derive(Debug, Clone, Default)]
pub struct OutputState {
    /// Compiled templates keyed by element name.
    pub templates: BTreeMap<String, CompiledTemplate>,
    /// Projection slots of package elements, read from their metadata.
    pub external_slots: BTreeMap<String, Vec<Option<String>>>,
    /// Stylesheet text keyed by element name.
    pub styles: BTreeMap<String, String>,
    /// Template file → elements using it.
    pub template_paths: BTreeMap<PathBuf, BTreeSet<String>>,
    /// Style file → elements using it.
    pub style_paths: BTreeMap<PathBuf, BTreeSet<String>>,
    /// Deferred imports waiting for the main traversal to finish.
    pub lazy: Vec<LazyEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub elements: BTreeMap<String, AnnotationDefinition>,
    pub directives: BTreeMap<String, AnnotationDefinition>,
    pub services: BTreeMap<String, AnnotationDefinition>,
    pub modules: BTreeMap<String, AnnotationDefinition>,
    pub queries: Vec<SelectorEntry>,
    pub global_imports: BTreeMap<String, GlobalImport>,
    pub output: OutputState,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: AnnotationKind) -> &BTreeMap<String, AnnotationDefinition> {
        match kind {
            AnnotationKind::Element => &self.elements,
            AnnotationKind::Directive => &self.directives,
            AnnotationKind::Module => &self.modules,
            AnnotationKind::Service | AnnotationKind::Provider | AnnotationKind::Pipe => {
                &self.services
            }
        }
    }

    fn map_mut(&mut self, kind: AnnotationKind) -> &mut BTreeMap<String, AnnotationDefinition> {
        match kind {
            AnnotationKind::Element => &mut self.elements,
            AnnotationKind::Directive => &mut self.directives,
            AnnotationKind::Module => &mut self.modules,
            AnnotationKind::Service | AnnotationKind::Provider | AnnotationKind::Pipe => {
                &mut self.services
            }
        }
    }

    pub fn get(&self, kind: AnnotationKind, name: &str) -> Option<&AnnotationDefinition> {
        self.map(kind).get(name)
    }

    pub fn get_mut(&mut self, kind: AnnotationKind, name: &str) -> Option<&mut AnnotationDefinition> {
        self.map_mut(kind).get_mut(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &AnnotationDefinition> {
        self.elements
            .values()
            .chain(self.directives.values())
            .chain(self.services.values())
            .chain(self.modules.values())
    }

    /// Registers a local definition. Returns `false` when the name is taken.
    pub fn register(&mut self, def: AnnotationDefinition, errors: &mut ErrorLog) -> bool {
        if let Some(existing) = self.get(def.kind, &def.name) {
            errors.push(
                CompilerError::new(
                    ERR_DUPLICATE_REGISTRATION,
                    &format!(
                        "{} '{}' is already registered by {}",
                        def.kind, def.name, existing.file
                    ),
                    &def.file,
                )
                .with_identifier(&def.name)
                .with_hint("Rename one of the declarations."),
            );
            return false;
        }

        if def.kind.is_selectable() {
            match def.selector() {
                Some(sel) if def.kind == AnnotationKind::Element && !sel.contains('-') => {
                    errors.push(
                        CompilerError::new(
                            ERR_ELEMENT_SELECTOR,
                            &format!(
                                "Element '{}' selector '{}' must contain a hyphen",
                                def.name, sel
                            ),
                            &def.file,
                        )
                        .with_identifier(&def.name),
                    );
                }
                Some(_) => {}
                None => {
                    errors.push(
                        CompilerError::new(
                            ERR_ELEMENT_SELECTOR,
                            &format!("{} '{}' declares no selector", def.kind, def.name),
                            &def.file,
                        )
                        .with_identifier(&def.name),
                    );
                }
            }
        }

        self.index_selector(&def);
        self.map_mut(def.kind).insert(def.name.clone(), def);
        true
    }

    /// Registers a package definition; local definitions win on collision.
    pub fn register_external(&mut self, def: AnnotationDefinition) {
        if self.get(def.kind, &def.name).is_some() {
            return;
        }
        self.index_selector(&def);
        self.map_mut(def.kind).insert(def.name.clone(), def);
    }

    fn index_selector(&mut self, def: &AnnotationDefinition) {
        if !def.kind.is_selectable() {
            return;
        }
        if let Some(text) = def.selector() {
            for selector in Selector::parse_list(text) {
                self.queries.push(SelectorEntry {
                    text: text.to_string(),
                    selector,
                    kind: def.kind,
                    name: def.name.clone(),
                });
            }
        }
    }

    /// Removes every definition declared in `file`; returns their names.
    pub fn deregister_file(&mut self, file: &str) -> Vec<(AnnotationKind, String)> {
        let mut removed = Vec::new();
        for map in [
            &mut self.elements,
            &mut self.directives,
            &mut self.services,
            &mut self.modules,
        ] {
            map.retain(|name, def| {
                let local = def.external.is_none() && def.file == file;
                if local {
                    removed.push((def.kind, name.clone()));
                }
                !local
            });
        }
        self.queries
            .retain(|q| !removed.iter().any(|(k, n)| *k == q.kind && *n == q.name));
        for (kind, name) in &removed {
            if *kind == AnnotationKind::Element {
                self.output.templates.remove(name);
                self.output.styles.remove(name);
            }
        }
        removed
    }

    pub fn find_element(&self, tag: &str) -> Option<&AnnotationDefinition> {
        self.queries
            .iter()
            .find(|q| q.kind == AnnotationKind::Element && q.selector.bare_name() == Some(tag))
            .and_then(|q| self.elements.get(&q.name))
    }

    /// Directive applied by name (`:name` / `*name` in markup).
    pub fn find_directive(&self, name: &str) -> Option<&AnnotationDefinition> {
        self.queries
            .iter()
            .find(|q| q.kind == AnnotationKind::Directive && q.selector.directive_name() == Some(name))
            .and_then(|q| self.directives.get(&q.name))
    }

    /// Directives whose compound selector matches a node without a sigil.
    pub fn matching_directives(&self, target: &MatchTarget) -> Vec<&AnnotationDefinition> {
        let mut names: Vec<&str> = Vec::new();
        for q in &self.queries {
            if q.kind == AnnotationKind::Directive
                && q.selector.bare_name().is_none()
                && q.selector.matches(target)
                && !names.contains(&q.name.as_str())
            {
                names.push(&q.name);
            }
        }
        names
            .into_iter()
            .filter_map(|n| self.directives.get(n))
            .collect()
    }

    /// Pipe registered under `name` (its `name` property or function name).
    pub fn find_pipe(&self, name: &str) -> Option<&AnnotationDefinition> {
        self.services
            .values()
            .find(|d| d.kind == AnnotationKind::Pipe && d.pipe_name() == name)
    }

    /// Projection slots of an element, from its compiled template or package metadata.
    pub fn slots(&self, element: &str) -> Option<&[Option<String>]> {
        self.output
            .templates
            .get(element)
            .map(|t| t.slots.as_slice())
            .or_else(|| {
                self.output
                    .external_slots
                    .get(element)
                    .map(|s| s.as_slice())
            })
    }

    pub fn local_count(&self) -> usize {
        self.all().filter(|d| d.external.is_none()).count()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Library metadata
    // ───────────────────────────────────────────────────────────────────────────

    /// Metadata for the definitions a library exports.
    pub fn metadata(
        &self,
        name: &str,
        version: Option<&str>,
        exports: &BTreeSet<String>,
    ) -> LibraryMetadata {
        let mut meta = LibraryMetadata {
            name: name.to_string(),
            version: version.map(|v| v.to_string()),
            exports: exports.iter().cloned().collect(),
            ..Default::default()
        };
        for def in self.all() {
            if def.external.is_some() || !exports.contains(&def.name) {
                continue;
            }
            let entry = MetadataEntry {
                properties: def
                    .properties
                    .iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "template" | "templateUrl" | "styles" | "styleUrl"))
                    .cloned()
                    .collect(),
                module: def.module.clone(),
                slots: self
                    .output
                    .templates
                    .get(&def.name)
                    .map(|t| t.slots.clone())
                    .unwrap_or_default(),
                kind: def.kind,
            };
            let bucket = match def.kind {
                AnnotationKind::Element => &mut meta.elements,
                AnnotationKind::Directive => &mut meta.directives,
                AnnotationKind::Module => &mut meta.modules,
                AnnotationKind::Pipe => &mut meta.pipes,
                AnnotationKind::Service | AnnotationKind::Provider => &mut meta.services,
            };
            bucket.insert(def.name.clone(), entry);
        }
        meta
    }

    /// Registers what a package's `metadata.json` declares.
    pub fn register_package_metadata(&mut self, package: &str, meta: &LibraryMetadata) {
        for (name, entry) in meta.entries() {
            if entry.kind == AnnotationKind::Element && !entry.slots.is_empty() {
                self.output
                    .external_slots
                    .insert(name.to_string(), entry.slots.clone());
            }
            self.register_external(AnnotationDefinition {
                name: name.to_string(),
                kind: entry.kind,
                properties: entry.properties.clone(),
                implementation: String::new(),
                file: package.to_string(),
                module: entry.module.clone(),
                external: Some(package.to_string()),
                exported: true,
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub kind: AnnotationKind,
    #[serde(default)]
    pub properties: Vec<(String, PropertyValue)>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<Option<String>>,
}

/// Contents of a library's `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub modules: BTreeMap<String, MetadataEntry>,
    #[serde(default)]
    pub services: BTreeMap<String, MetadataEntry>,
    #[serde(default)]
    pub pipes: BTreeMap<String, MetadataEntry>,
    #[serde(default)]
    pub elements: BTreeMap<String, MetadataEntry>,
    #[serde(default)]
    pub directives: BTreeMap<String, MetadataEntry>,
}

impl LibraryMetadata {
    pub fn entries(&self) -> impl Iterator<Item = (&str, &MetadataEntry)> {
        self.modules
            .iter()
            .chain(self.services.iter())
            .chain(self.pipes.iter())
            .chain(self.elements.iter())
            .chain(self.directives.iter())
            .map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: AnnotationKind, name: &str, selector: Option<&str>) -> AnnotationDefinition {
        AnnotationDefinition {
            name: name.to_string(),
            kind,
            properties: selector
                .map(|s| vec![("selector".to_string(), PropertyValue::String(s.to_string()))])
                .unwrap_or_default(),
            implementation: String::new(),
            file: "src/a.js".to_string(),
            module: None,
            external: None,
            exported: true,
        }
    }

    #[test]
    fn test_duplicate_registration() {
        let mut reg = Registry::new();
        let mut errors = ErrorLog::new();
        assert!(reg.register(def(AnnotationKind::Service, "Api", None), &mut errors));
        assert!(!reg.register(def(AnnotationKind::Service, "Api", None), &mut errors));
        assert!(errors.has_code(ERR_DUPLICATE_REGISTRATION));
    }

    #[test]
    fn test_element_selector_needs_hyphen() {
        let mut reg = Registry::new();
        let mut errors = ErrorLog::new();
        assert!(reg.register(def(AnnotationKind::Element, "Card", Some("card")), &mut errors));
        assert!(errors.has_code(ERR_ELEMENT_SELECTOR));
    }

    #[test]
    fn test_lookup_by_selector() {
        let mut reg = Registry::new();
        let mut errors = ErrorLog::new();
        reg.register(def(AnnotationKind::Element, "Card", Some("app-card")), &mut errors);
        reg.register(def(AnnotationKind::Directive, "Tip", Some("[tooltip]")), &mut errors);
        reg.register(
            def(AnnotationKind::Directive, "Model", Some("input[model]")),
            &mut errors,
        );
        assert!(errors.is_empty());
        assert_eq!(reg.find_element("app-card").map(|d| d.name.as_str()), Some("Card"));
        assert_eq!(reg.find_directive("tooltip").map(|d| d.name.as_str()), Some("Tip"));
        assert!(reg.find_directive("model").is_none());

        let attrs: BTreeMap<String, String> =
            [("model".to_string(), "x".to_string())].into_iter().collect();
        let target = MatchTarget {
            tag: "input",
            ref_id: None,
            attrs: &attrs,
            directives: &[],
        };
        let found: Vec<&str> = reg
            .matching_directives(&target)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(found, vec!["Model"]);
    }

    #[test]
    fn test_deregister_file() {
        let mut reg = Registry::new();
        let mut errors = ErrorLog::new();
        reg.register(def(AnnotationKind::Element, "Card", Some("app-card")), &mut errors);
        reg.register(def(AnnotationKind::Service, "Api", None), &mut errors);
        let removed = reg.deregister_file("src/a.js");
        assert_eq!(removed.len(), 2);
        assert!(reg.find_element("app-card").is_none());
        assert!(reg.queries.is_empty());
    }

    #[test]
    fn test_metadata_round_trip_registers_externals() {
        let mut reg = Registry::new();
        let mut errors = ErrorLog::new();
        reg.register(def(AnnotationKind::Element, "Card", Some("app-card")), &mut errors);
        reg.register(def(AnnotationKind::Service, "Api", None), &mut errors);
        reg.register(def(AnnotationKind::Service, "Hidden", None), &mut errors);
        let exports: BTreeSet<String> = ["Card", "Api"].iter().map(|s| s.to_string()).collect();
        let meta = reg.metadata("ui", Some("1.0.0"), &exports);
        assert_eq!(meta.elements.len(), 1);
        assert_eq!(meta.services.len(), 1);

        let text = serde_json::to_string(&meta).unwrap();
        let parsed: LibraryMetadata = serde_json::from_str(&text).unwrap();
        let mut consumer = Registry::new();
        consumer.register_package_metadata("ui", &parsed);
        let card = consumer.find_element("app-card").unwrap();
        assert_eq!(card.external.as_deref(), Some("ui"));
        assert_eq!(consumer.local_count(), 0);
    }
}
