//! Dependency-injection and module wiring validation.
//!
//! Runs over a fully populated [`Registry`] after the graph traversal. Every
//! pass starts from scratch: module stamps on local definitions are cleared
//! and the wiring error codes are dropped before anything is re-checked.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::annotation::{AnnotationDefinition, AnnotationKind, BUILTIN_TOKENS};
use crate::error::{
    CompilerError, ErrorLog, ERR_CIRCULAR_DEPENDENCY, ERR_DI_UNRESOLVED, ERR_MODULE_CIRCULAR,
    ERR_MODULE_OWNERSHIP, ERR_MODULE_UNRESOLVED, ERR_SELECTOR_UNRESOLVED,
};
use crate::registry::Registry;

const WIRING_CODES: &[&str] = &[
    ERR_DI_UNRESOLVED,
    ERR_CIRCULAR_DEPENDENCY,
    ERR_MODULE_OWNERSHIP,
    ERR_MODULE_UNRESOLVED,
    ERR_MODULE_CIRCULAR,
    ERR_SELECTOR_UNRESOLVED,
];

/// Validates module wiring, then dependency lists.
pub fn validate(registry: &mut Registry, errors: &mut ErrorLog) {
    errors.clear_codes(WIRING_CODES);
    validate_modules(registry, errors);
    validate_dependencies(registry, errors);
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPENDENCY INJECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Tokens resolvable without a registered service of that name.
fn provided_tokens(registry: &Registry) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = BUILTIN_TOKENS.iter().map(|t| t.to_string()).collect();
    for module in registry.modules.values() {
        tokens.extend(module.provided_tokens());
    }
    for def in registry.services.values() {
        if def.kind == AnnotationKind::Provider {
            if let Some(name) = def.string_property("name") {
                tokens.insert(name.to_string());
            }
        }
    }
    tokens
}

pub fn validate_dependencies(registry: &Registry, errors: &mut ErrorLog) {
    let tokens = provided_tokens(registry);

    for def in registry.all().filter(|d| d.external.is_none()) {
        if def.kind == AnnotationKind::Module {
            continue;
        }
        for dep in def.dependencies() {
            let resolved = registry.services.contains_key(&dep.name) || tokens.contains(&dep.name);
            if resolved || dep.optional {
                continue;
            }
            errors.push(
                CompilerError::new(
                    ERR_DI_UNRESOLVED,
                    &format!(
                        "{} '{}' depends on '{}', which is not registered or provided",
                        def.kind, def.name, dep.name
                    ),
                    &def.file,
                )
                .with_identifier(&dep.name)
                .with_context(def.name.clone())
                .with_hint("Register it as a Service, provide it from a Module, or mark it optional with '?'."),
            );
        }
    }

    let graph: BTreeMap<String, Vec<String>> = registry
        .services
        .iter()
        .map(|(name, def)| {
            let deps = def
                .dependencies()
                .into_iter()
                .map(|d| d.name)
                .filter(|d| registry.services.contains_key(d))
                .collect();
            (name.clone(), deps)
        })
        .collect();

    for cycle in find_cycles(&graph) {
        let Some(first) = registry.services.get(&cycle[0]) else {
            continue;
        };
        if first.external.is_some() {
            continue;
        }
        let path = cycle_path(&cycle);
        errors.push(
            CompilerError::new(
                ERR_CIRCULAR_DEPENDENCY,
                &format!("Circular dependency: {}", path),
                &first.file,
            )
            .with_identifier(&first.name)
            .with_context(path),
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CYCLES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct CycleFinder<'g> {
    graph: &'g BTreeMap<String, Vec<String>>,
    marks: HashMap<&'g str, Mark>,
    stack: Vec<&'g str>,
    cycles: BTreeSet<Vec<String>>,
}

impl<'g> CycleFinder<'g> {
    fn visit(&mut self, node: &'g str) {
        self.marks.insert(node, Mark::Visiting);
        self.stack.push(node);
        for next in self.graph.get(node).into_iter().flatten() {
            match self.marks.get(next.as_str()) {
                Some(Mark::Visiting) => {
                    if let Some(pos) = self.stack.iter().position(|n| *n == next) {
                        let cycle: Vec<String> =
                            self.stack[pos..].iter().map(|s| s.to_string()).collect();
                        self.cycles.insert(normalize_cycle(cycle));
                    }
                }
                Some(Mark::Done) => {}
                None => self.visit(next),
            }
        }
        self.stack.pop();
        self.marks.insert(node, Mark::Done);
    }
}

/// Rotates a cycle so it starts at its smallest name; equal cycles compare equal.
fn normalize_cycle(mut cycle: Vec<String>) -> Vec<String> {
    if let Some(min) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min);
    }
    cycle
}

/// Every distinct cycle of `graph`, each reported once.
fn find_cycles(graph: &BTreeMap<String, Vec<String>>) -> BTreeSet<Vec<String>> {
    let mut finder = CycleFinder {
        graph,
        marks: HashMap::new(),
        stack: Vec::new(),
        cycles: BTreeSet::new(),
    };
    for node in graph.keys() {
        if !finder.marks.contains_key(node.as_str()) {
            finder.visit(node);
        }
    }
    finder.cycles
}

/// `A -> B -> C -> A`
fn cycle_path(cycle: &[String]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

fn ownership_error(
    module: &AnnotationDefinition,
    kind: &str,
    name: &str,
    owner: &str,
) -> CompilerError {
    CompilerError::new(
        ERR_MODULE_OWNERSHIP,
        &format!(
            "{} '{}' is already owned by module {}; {} cannot claim it",
            kind, name, owner, module.name
        ),
        &module.file,
    )
    .with_identifier(name)
    .with_context(module.name.clone())
    .with_hint("Declare it in one module and require that module instead.")
}

/// Resolves a module `selectors` entry (function name or selector text).
fn selector_target(registry: &Registry, entry: &str) -> Option<(AnnotationKind, String)> {
    if registry.elements.contains_key(entry) {
        return Some((AnnotationKind::Element, entry.to_string()));
    }
    if registry.directives.contains_key(entry) {
        return Some((AnnotationKind::Directive, entry.to_string()));
    }
    registry
        .queries
        .iter()
        .find(|q| q.text == entry || q.selector.bare_name() == Some(entry))
        .map(|q| (q.kind, q.name.clone()))
}

pub fn validate_modules(registry: &mut Registry, errors: &mut ErrorLog) {
    for map in [
        &mut registry.elements,
        &mut registry.directives,
        &mut registry.services,
    ] {
        for def in map.values_mut().filter(|d| d.external.is_none()) {
            def.module = None;
        }
    }

    let package_modules: BTreeSet<String> = registry
        .global_imports
        .values()
        .flat_map(|g| g.modules.iter().cloned())
        .collect();

    let modules: Vec<AnnotationDefinition> = registry
        .modules
        .values()
        .filter(|m| m.external.is_none())
        .cloned()
        .collect();

    for module in &modules {
        debug!("[LOOM wiring] module {}", module.name);

        for service in module.service_refs() {
            let Some(def) = registry.services.get_mut(&service) else {
                errors.push(
                    CompilerError::new(
                        ERR_DI_UNRESOLVED,
                        &format!("Module {} declares unknown service '{}'", module.name, service),
                        &module.file,
                    )
                    .with_identifier(&service)
                    .with_context(module.name.clone()),
                );
                continue;
            };
            match &def.module {
                Some(owner) if *owner != module.name => {
                    let owner = owner.clone();
                    errors.push(ownership_error(module, "Service", &service, &owner));
                }
                Some(_) => {}
                None => def.module = Some(module.name.clone()),
            }
        }

        for required in module.names("requiredModules") {
            let found = registry.modules.contains_key(&required) || package_modules.contains(&required);
            if !found {
                errors.push(
                    CompilerError::new(
                        ERR_MODULE_UNRESOLVED,
                        &format!("Module {} requires unknown module '{}'", module.name, required),
                        &module.file,
                    )
                    .with_identifier(&required)
                    .with_context(module.name.clone()),
                );
            }
        }

        for entry in module.names("selectors") {
            let Some((kind, name)) = selector_target(registry, &entry) else {
                errors.push(
                    CompilerError::new(
                        ERR_SELECTOR_UNRESOLVED,
                        &format!(
                            "Module {} declares '{}', which is not a registered element or directive",
                            module.name, entry
                        ),
                        &module.file,
                    )
                    .with_identifier(&entry)
                    .with_context(module.name.clone()),
                );
                continue;
            };
            let Some(def) = registry.get_mut(kind, &name) else {
                continue;
            };
            match &def.module {
                Some(owner) if *owner != module.name => {
                    let owner = owner.clone();
                    errors.push(ownership_error(module, kind.keyword(), &name, &owner));
                }
                Some(_) => {}
                None => def.module = Some(module.name.clone()),
            }
        }
    }

    let graph: BTreeMap<String, Vec<String>> = modules
        .iter()
        .map(|m| {
            let required = m
                .names("requiredModules")
                .into_iter()
                .filter(|r| registry.modules.get(r).is_some_and(|d| d.external.is_none()))
                .collect();
            (m.name.clone(), required)
        })
        .collect();
    for cycle in find_cycles(&graph) {
        let Some(first) = registry.modules.get(&cycle[0]) else {
            continue;
        };
        let path = cycle_path(&cycle);
        errors.push(
            CompilerError::new(
                ERR_MODULE_CIRCULAR,
                &format!("Circular required modules: {}", path),
                &first.file,
            )
            .with_identifier(&first.name)
            .with_context(path),
        );
    }
}
