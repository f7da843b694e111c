//! Codegen module for the Loom compiler
//!
//! Rewrites one compiled source file into a module-table entry of the
//! runtime loader. Imports become `__required(id, name)` lookups (or reads of
//! a package alias for library targets), exports become getters registered
//! at the top of the body, annotation calls are removed and re-attached to
//! their function as a static `annotations` object carrying the compiled
//! template.
//!
//! All rewriting happens through span edits on the original text; the file
//! is parsed once more only to find where top-level declarations end.

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::annotation::{js_key, js_string, AnnotationDefinition, AnnotationKind, PropertyValue};
use crate::error::{CompilerError, ERR_PROVIDER_NOT_EXPORTED, ERR_TEMPLATE_ID};
use crate::expression::{Expression as TemplateExpression, TextPart, CONTEXT_PARAM, EVENT_PARAM};
use crate::extract::{ExportStatement, ExtractedFile, ImportDescriptor, ImportOrigin, TextSpan};
use crate::graph::{FileGraph, FileId, FileRecord};
use crate::registry::Registry;
use crate::resolve::ResolvedImport;
use crate::template::{CompiledTemplate, TemplateNode};

/// Loader function every module body receives.
pub const REQUIRE_FN: &str = "__required";
pub const EXPORTS_PARAM: &str = "exports";

/// Annotation properties consumed at compile time and not re-emitted.
const COMPILE_TIME_PROPERTIES: &[&str] = &["template", "templateUrl", "styleUrl", "styles"];

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT/OUTPUT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// What a module body is generated against.
pub struct CodegenContext<'a> {
    pub graph: &'a FileGraph,
    pub registry: &'a Registry,
    /// Library targets read packages from their global alias.
    pub library: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedModule {
    pub id: FileId,
    /// `function (exports, __required) { ... }` table entry.
    pub code: String,
    pub errors: Vec<CompilerError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: u32,
    end: u32,
    text: String,
}

#[derive(Default)]
struct Edits {
    edits: Vec<Edit>,
}

impl Edits {
    fn replace(&mut self, span: TextSpan, text: impl Into<String>) {
        self.edits.push(Edit {
            start: span.start,
            end: span.end,
            text: text.into(),
        });
    }

    fn remove(&mut self, span: TextSpan) {
        self.replace(span, "");
    }

    fn insert(&mut self, at: u32, text: impl Into<String>) {
        self.replace(TextSpan::new(at, at), text);
    }

    /// Applies every edit. Insertions come before a replacement starting at
    /// the same offset and keep their push order; edits must not overlap.
    fn apply(mut self, source: &str) -> String {
        self.edits.sort_by_key(|e| (e.start, e.end));
        let mut out = String::with_capacity(source.len() + 256);
        let mut last = 0usize;
        for edit in self.edits {
            let start = edit.start as usize;
            if start < last {
                continue;
            }
            out.push_str(&source[last..start]);
            out.push_str(&edit.text);
            last = edit.end as usize;
        }
        out.push_str(&source[last..]);
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE REWRITING
// ═══════════════════════════════════════════════════════════════════════════════

/// Generates the table entry of a compiled file.
///
/// Failed files have nothing to generate and yield `None`.
pub fn generate_module(record: &FileRecord, cx: &CodegenContext) -> Option<GeneratedModule> {
    let extracted = record.extracted.as_ref()?;
    let mut gen = ModuleGenerator {
        record,
        extracted,
        cx,
        errors: Vec::new(),
    };
    let body = gen.body();
    Some(GeneratedModule {
        id: record.id,
        code: format!(
            "function ({}, {}) {{\n{}\n}}",
            EXPORTS_PARAM,
            REQUIRE_FN,
            body.trim_end()
        ),
        errors: gen.errors,
    })
}

struct ModuleGenerator<'g> {
    record: &'g FileRecord,
    extracted: &'g ExtractedFile,
    cx: &'g CodegenContext<'g>,
    errors: Vec<CompilerError>,
}

impl<'g> ModuleGenerator<'g> {
    fn body(&mut self) -> String {
        let extracted = self.extracted;
        let registry = self.cx.registry;
        let source = extracted.source.as_str();
        let declaration_ends = top_level_declaration_ends(source);
        let mut edits = Edits::default();
        let mut getters = Vec::new();

        for (i, import) in extracted.imports.iter().enumerate() {
            if import.origin == ImportOrigin::Import {
                edits.replace(import.span, self.import_bindings(i, import));
            }
        }

        for statement in &extracted.export_statements {
            match statement {
                ExportStatement::Declaration { span, decl_start } => {
                    edits.remove(TextSpan::new(span.start, *decl_start));
                }
                ExportStatement::Specifiers { span } => edits.remove(*span),
                ExportStatement::Star { span, import } => {
                    let target = self.module_reference(*import).unwrap_or_else(|| "{}".to_string());
                    edits.replace(
                        *span,
                        format!("{}.e({}, {});", REQUIRE_FN, EXPORTS_PARAM, target),
                    );
                }
                ExportStatement::DefaultExpression {
                    span,
                    expression,
                    identifier,
                } => {
                    match identifier.as_ref().and_then(|name| {
                        self.declaration_end(name, &declaration_ends)
                    }) {
                        Some(end) if end <= span.start || end > span.end => {
                            edits.remove(*span);
                            edits.insert(
                                end,
                                format!(
                                    "\n{}['default'] = {};",
                                    EXPORTS_PARAM,
                                    expression.slice(source)
                                ),
                            );
                        }
                        // Prefix and suffix only, so edits inside the
                        // expression (lazy loads) still apply.
                        _ => {
                            edits.replace(
                                TextSpan::new(span.start, expression.start),
                                format!("{}['default'] = ", EXPORTS_PARAM),
                            );
                            edits.replace(TextSpan::new(expression.end, span.end), ";");
                        }
                    }
                }
                ExportStatement::DefaultDeclaration {
                    span,
                    declaration,
                    name,
                } => match name {
                    Some(name) => {
                        edits.remove(TextSpan::new(span.start, declaration.start));
                        getters.push(getter("default", name));
                    }
                    None => edits.replace(
                        TextSpan::new(span.start, declaration.start),
                        format!("{}['default'] = ", EXPORTS_PARAM),
                    ),
                },
            }
        }

        for export in &extracted.exports {
            if export.star || (export.exported == "default" && export.reexport_of.is_none()) {
                continue;
            }
            let value = match export.reexport_of {
                Some(index) => {
                    let namespace = self
                        .extracted
                        .imports
                        .get(index)
                        .is_some_and(|i| i.namespace_local.is_some());
                    if namespace {
                        self.module_reference(index)
                    } else {
                        self.member_reference(index, &export.local)
                    }
                }
                None => Some(export.local.clone()),
            };
            if let Some(value) = value {
                getters.push(getter(&export.exported, &value));
            }
        }

        for (k, lazy) in extracted.lazy_loads.iter().enumerate() {
            let target = self.record.lazy_targets.get(k).cloned().flatten();
            edits.replace(lazy.span, self.lazy_reference(target.as_deref(), &lazy.specifier));
        }

        for block in &extracted.annotations {
            edits.remove(block.call_span);
            let Some(def) = registry.get(block.kind, &block.name) else {
                continue;
            };
            if def.file != self.record.key() {
                continue;
            }
            let nested: Vec<(String, String)> = extracted
                .lazy_loads
                .iter()
                .enumerate()
                .filter(|(_, l)| {
                    l.span.start >= block.call_span.start && l.span.end <= block.call_span.end
                })
                .map(|(k, l)| {
                    let target = self.record.lazy_targets.get(k).cloned().flatten();
                    (
                        l.span.slice(source).to_string(),
                        self.lazy_reference(target.as_deref(), &l.specifier),
                    )
                })
                .collect();
            let object = self.annotation_object(def, &nested);
            edits.insert(
                block.implementation_span.end,
                format!("\n{}.annotations = {};", block.name, object),
            );
        }

        let mut body = String::new();
        for g in &getters {
            body.push_str(g);
            body.push('\n');
        }
        body.push_str(&edits.apply(source));
        body
    }

    /// End offset of the top-level statement declaring `name`, moved past
    /// any annotation implementation that owns it.
    fn declaration_end(&self, name: &str, ends: &HashMap<String, u32>) -> Option<u32> {
        self.extracted
            .annotations
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.implementation_span.end)
            .or_else(|| ends.get(name).copied())
    }

    fn import_bindings(&self, index: usize, import: &ImportDescriptor) -> String {
        let Some(module) = self.module_reference(index) else {
            return String::new();
        };
        if import.is_side_effect() {
            return match self.record.import_targets.get(index).copied().flatten() {
                Some(_) => format!("{};", module),
                None => String::new(),
            };
        }
        let mut lines = Vec::new();
        if let Some(ns) = &import.namespace_local {
            lines.push(format!("var {} = {};", ns, module));
        }
        if let Some(local) = &import.default_local {
            if let Some(value) = self.member_reference(index, "default") {
                lines.push(format!("var {} = {};", local, value));
            }
        }
        for binding in &import.named {
            if let Some(value) = self.member_reference(index, &binding.imported) {
                lines.push(format!("var {} = {};", binding.local, value));
            }
        }
        lines.join(" ")
    }

    fn package_alias(&self, index: usize) -> Option<&'g str> {
        let import = self.extracted.imports.get(index)?;
        match &import.resolved {
            Some(ResolvedImport::Package { package, .. }) if self.cx.library => self
                .cx
                .registry
                .global_imports
                .get(package)
                .map(|g| g.alias.as_str()),
            _ => None,
        }
    }

    /// Expression evaluating to the whole module of import `index`.
    fn module_reference(&self, index: usize) -> Option<String> {
        if let Some(id) = self.record.import_targets.get(index).copied().flatten() {
            return Some(format!("{}({})", REQUIRE_FN, id));
        }
        self.package_alias(index).map(str::to_string)
    }

    /// Expression evaluating to export `name` of import `index`.
    fn member_reference(&self, index: usize, name: &str) -> Option<String> {
        if let Some(id) = self.record.import_targets.get(index).copied().flatten() {
            return Some(format!("{}({}, {})", REQUIRE_FN, id, single_quoted(name)));
        }
        self.package_alias(index).map(|alias| member_access(alias, name))
    }

    fn lazy_reference(&self, target: Option<&Path>, specifier: &str) -> String {
        let Some(id) = target.and_then(|t| self.cx.graph.lookup(t)) else {
            return format!(
                "Promise.reject(new Error({}))",
                js_string(&format!("Cannot load '{}'", specifier))
            );
        };
        match self.cx.graph.get(id).lazy_root {
            Some(root) if root == id => format!("{}.l({})", REQUIRE_FN, root),
            Some(root) => format!(
                "{}.l({}).then(function () {{ return {}({}); }})",
                REQUIRE_FN, root, REQUIRE_FN, id
            ),
            None => format!("Promise.resolve({}({}))", REQUIRE_FN, id),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Annotations
    // ───────────────────────────────────────────────────────────────────────────

    /// `lazy` maps `lazyload(...)` call text inside the annotation call to
    /// its loader reference.
    fn annotation_object(&mut self, def: &AnnotationDefinition, lazy: &[(String, String)]) -> String {
        let registry = self.cx.registry;
        let mut fields = vec![("kind".to_string(), single_quoted(def.kind.keyword()))];
        for (key, value) in &def.properties {
            if def.kind == AnnotationKind::Element && COMPILE_TIME_PROPERTIES.contains(&key.as_str()) {
                continue;
            }
            fields.push((js_key(key), rewrite_raw(value, lazy).to_js()));
        }
        if let Some(module) = &def.module {
            fields.push(("module".to_string(), single_quoted(module)));
        }

        if def.kind == AnnotationKind::Element {
            if let Some(compiled) = registry.output.templates.get(&def.name) {
                let providers: Vec<String> = compiled
                    .providers
                    .iter()
                    .filter_map(|name| self.provider_reference(name))
                    .collect();
                if !providers.is_empty() {
                    fields.push(("providers".to_string(), format!("[{}]", providers.join(", "))));
                }
                let (template, errors) = TemplateEmitter::new(compiled, &self.record.key()).emit();
                self.errors.extend(errors);
                fields.push(("template".to_string(), template));
            }
            // Applications collect element styles into styles.js.
            if self.cx.library {
                if let Some(css) = registry.output.styles.get(&def.name) {
                    fields.push(("style".to_string(), js_string(css)));
                }
            }
        }

        object_literal(&fields)
    }

    /// Reference to a template provider from inside this file.
    fn provider_reference(&mut self, name: &str) -> Option<String> {
        if self.extracted.declarations.contains(name) {
            return Some(name.to_string());
        }
        let registry = self.cx.registry;
        let def = registry
            .elements
            .get(name)
            .or_else(|| registry.directives.get(name))
            .or_else(|| registry.services.get(name))?;

        if let Some(package) = &def.external {
            let global = registry.global_imports.get(package)?;
            if self.cx.library {
                return Some(member_access(&global.alias, name));
            }
            let id = self.cx.graph.lookup(&global.entry)?;
            return Some(format!("{}({}, {})", REQUIRE_FN, id, single_quoted(name)));
        }
        if !def.exported {
            self.errors.push(
                CompilerError::new(
                    ERR_PROVIDER_NOT_EXPORTED,
                    &format!(
                        "{} {} is used in a template of {} but is not exported from {}",
                        def.kind,
                        name,
                        self.record.key(),
                        def.file
                    ),
                    &self.record.key(),
                )
                .with_identifier(name)
                .with_context(def.file.clone())
                .with_hint("Export the function so other modules can reference it."),
            );
            return None;
        }
        let id = self.cx.graph.lookup(Path::new(&def.file))?;
        Some(format!("{}({}, {})", REQUIRE_FN, id, single_quoted(name)))
    }
}

fn getter(exported: &str, value: &str) -> String {
    format!(
        "{}.r({}, {}, function () {{ return {}; }});",
        REQUIRE_FN,
        EXPORTS_PARAM,
        single_quoted(exported),
        value
    )
}

/// `value` with `(from, to)` substitutions applied to raw expression text.
fn rewrite_raw(value: &PropertyValue, substitutions: &[(String, String)]) -> PropertyValue {
    match value {
        PropertyValue::Raw(code) => PropertyValue::Raw(
            substitutions
                .iter()
                .fold(code.clone(), |code, (from, to)| code.replace(from.as_str(), to)),
        ),
        PropertyValue::Array(items) => {
            PropertyValue::Array(items.iter().map(|v| rewrite_raw(v, substitutions)).collect())
        }
        PropertyValue::Object(entries) => PropertyValue::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), rewrite_raw(v, substitutions)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn member_access(object: &str, name: &str) -> String {
    if oxc_syntax::identifier::is_identifier_name(name) && name != "default" {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, single_quoted(name))
    }
}

fn object_literal(fields: &[(String, String)]) -> String {
    if fields.is_empty() {
        return "{}".to_string();
    }
    let body: Vec<String> = fields.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
    format!("{{ {} }}", body.join(", "))
}

/// Top-level declared names mapped to the end of their statement.
fn top_level_declaration_ends(source: &str) -> HashMap<String, u32> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::default().with_module(true)).parse();
    let mut ends = HashMap::new();
    for stmt in &ret.program.body {
        let end = stmt.span().end;
        let declaration = match stmt {
            Statement::ExportNamedDeclaration(decl) => decl.declaration.as_ref(),
            _ => stmt.as_declaration(),
        };
        match declaration {
            Some(Declaration::VariableDeclaration(var)) => {
                for d in &var.declarations {
                    if let BindingPattern::BindingIdentifier(id) = &d.id {
                        ends.insert(id.name.to_string(), end);
                    }
                }
            }
            Some(Declaration::FunctionDeclaration(func)) => {
                if let Some(id) = &func.id {
                    ends.insert(id.name.to_string(), end);
                }
            }
            Some(Declaration::ClassDeclaration(class)) => {
                if let Some(id) = &class.id {
                    ends.insert(id.name.to_string(), end);
                }
            }
            _ => {}
        }
    }
    ends
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE EMISSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Renders a [`CompiledTemplate`] as the object literal the runtime renders.
pub struct TemplateEmitter<'t> {
    compiled: &'t CompiledTemplate,
    file: String,
    errors: Vec<CompilerError>,
}

impl<'t> TemplateEmitter<'t> {
    pub fn new(compiled: &'t CompiledTemplate, file: &str) -> Self {
        TemplateEmitter {
            compiled,
            file: file.to_string(),
            errors: Vec::new(),
        }
    }

    /// `{ nodes: [...], templates: {...} }` plus generation errors.
    pub fn emit(mut self) -> (String, Vec<CompilerError>) {
        let nodes = self.nodes(&self.compiled.nodes);
        let mut templates = Vec::new();
        for (id, nodes) in &self.compiled.templates {
            templates.push((js_key(id), self.nodes(nodes)));
        }
        let mut fields = vec![("nodes".to_string(), nodes)];
        if !templates.is_empty() {
            fields.push(("templates".to_string(), object_literal(&templates)));
        }
        (object_literal(&fields), self.errors)
    }

    fn nodes(&mut self, nodes: &[TemplateNode]) -> String {
        let items: Vec<String> = nodes.iter().map(|n| self.node(n)).collect();
        format!("[{}]", items.join(", "))
    }

    fn check_template_id(&mut self, id: &str) {
        if !self.compiled.templates.contains_key(id) {
            self.errors.push(
                CompilerError::new(
                    ERR_TEMPLATE_ID,
                    &format!("No <template #{}> in the template of {}", id, self.compiled.element),
                    &self.file,
                )
                .with_identifier(id)
                .with_context(self.compiled.element.clone()),
            );
        }
    }

    fn node(&mut self, node: &TemplateNode) -> String {
        match node {
            TemplateNode::Text(text) => {
                let literal_only = text.parts.iter().all(|p| matches!(p, TextPart::Literal(_)));
                if literal_only {
                    let joined: String = text
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            TextPart::Literal(s) => Some(s.as_str()),
                            TextPart::Expr(_) => None,
                        })
                        .collect();
                    object_literal(&[
                        ("type".into(), "'text'".into()),
                        ("text".into(), js_string(&joined)),
                    ])
                } else {
                    object_literal(&[
                        ("type".into(), "'text'".into()),
                        ("parts".into(), parts_js(&text.parts)),
                    ])
                }
            }
            TemplateNode::Fragment(fragment) => object_literal(&[
                ("type".into(), "'fragment'".into()),
                ("children".into(), self.nodes(&fragment.children)),
            ]),
            TemplateNode::StructuralPlaceholder(placeholder) => {
                self.check_template_id(&placeholder.template);
                let mut fields = vec![
                    ("type".to_string(), "'structural'".to_string()),
                    ("directive".to_string(), js_string(&placeholder.directive)),
                    ("template".to_string(), js_string(&placeholder.template)),
                ];
                if let Some(value) = &placeholder.value {
                    fields.push(("value".into(), expression_js(value)));
                }
                if let Some(else_template) = &placeholder.else_template {
                    self.check_template_id(else_template);
                    fields.push(("else".into(), js_string(else_template)));
                }
                if let Some(item) = &placeholder.item {
                    fields.push(("item".into(), js_string(item)));
                }
                if let Some(index) = &placeholder.index {
                    fields.push(("index".into(), js_string(index)));
                }
                object_literal(&fields)
            }
            TemplateNode::ProjectionSlot(slot) => {
                let mut fields = vec![("type".to_string(), "'place'".to_string())];
                if let Some(selector) = &slot.selector {
                    fields.push(("selector".into(), js_string(selector)));
                }
                if !slot.fallback.is_empty() {
                    fields.push(("children".into(), self.nodes(&slot.fallback)));
                }
                object_literal(&fields)
            }
            TemplateNode::Element(element) => {
                let mut fields = vec![
                    ("type".to_string(), "'element'".to_string()),
                    ("name".to_string(), js_string(&element.tag)),
                ];
                if let Some(name) = &element.element {
                    fields.push(("element".into(), js_string(name)));
                }
                if let Some(ref_id) = &element.ref_id {
                    fields.push(("ref".into(), js_string(ref_id)));
                }
                for (key, map) in [("attr", &element.attrs), ("data", &element.data), ("aria", &element.aria)] {
                    if !map.is_empty() {
                        let entries: Vec<(String, String)> =
                            map.iter().map(|(k, v)| (js_key(k), js_string(v))).collect();
                        fields.push((key.into(), object_literal(&entries)));
                    }
                }
                if !element.attr_bindings.is_empty() {
                    let entries: Vec<(String, String)> = element
                        .attr_bindings
                        .iter()
                        .map(|(k, parts)| (js_key(k), parts_js(parts)))
                        .collect();
                    fields.push(("attrBindings".into(), object_literal(&entries)));
                }
                if !element.props.is_empty() {
                    let entries: Vec<(String, String)> = element
                        .props
                        .iter()
                        .map(|p| (js_key(&p.name), expression_js(&p.value)))
                        .collect();
                    fields.push(("props".into(), object_literal(&entries)));
                }
                if !element.events.is_empty() {
                    let events: Vec<String> = element
                        .events
                        .iter()
                        .map(|e| {
                            let mut entry = vec![
                                ("name".to_string(), js_string(&e.name)),
                                ("handler".to_string(), handler_js(&e.handler)),
                            ];
                            if e.two_way {
                                entry.push(("twoWay".into(), "true".into()));
                            }
                            object_literal(&entry)
                        })
                        .collect();
                    fields.push(("events".into(), format!("[{}]", events.join(", "))));
                }
                if !element.directives.is_empty() {
                    let directives: Vec<String> = element
                        .directives
                        .iter()
                        .map(|d| {
                            let mut entry = vec![
                                ("name".to_string(), js_string(&d.name)),
                                ("directive".to_string(), js_string(&d.directive)),
                            ];
                            if let Some(value) = &d.value {
                                entry.push(("value".into(), expression_js(value)));
                            }
                            object_literal(&entry)
                        })
                        .collect();
                    fields.push(("directives".into(), format!("[{}]", directives.join(", "))));
                }
                if let Some(query) = &element.content_query {
                    fields.push(("contentQuery".into(), js_string(query)));
                }
                if let Some(query) = &element.view_query {
                    fields.push(("viewQuery".into(), js_string(query)));
                }
                if !element.children.is_empty() {
                    fields.push(("children".into(), self.nodes(&element.children)));
                }
                if !element.projected.is_empty() {
                    let projected: Vec<String> = element
                        .projected
                        .iter()
                        .map(|p| {
                            let slot = p.slot.as_deref().map(js_string).unwrap_or_else(|| "null".into());
                            object_literal(&[
                                ("slot".into(), slot),
                                ("children".into(), self.nodes(&p.nodes)),
                            ])
                        })
                        .collect();
                    fields.push(("projected".into(), format!("[{}]", projected.join(", "))));
                }
                object_literal(&fields)
            }
        }
    }
}

/// `function (ctx) { return code; }`, wrapped when filters or `once` apply.
pub fn expression_js(expr: &TemplateExpression) -> String {
    let accessor = format!("function ({}) {{ return {}; }}", CONTEXT_PARAM, expr.code);
    if expr.filters.is_empty() && !expr.once {
        return accessor;
    }
    let filters: Vec<String> = expr
        .filters
        .iter()
        .map(|f| {
            object_literal(&[
                ("pipe".into(), js_string(f.pipe.as_deref().unwrap_or(&f.name))),
                (
                    "args".into(),
                    format!("function ({}) {{ return [{}]; }}", CONTEXT_PARAM, f.args.join(", ")),
                ),
            ])
        })
        .collect();
    let mut fields = vec![("fn".to_string(), accessor)];
    if !filters.is_empty() {
        fields.push(("filters".into(), format!("[{}]", filters.join(", "))));
    }
    if expr.once {
        fields.push(("once".into(), "true".into()));
    }
    object_literal(&fields)
}

fn handler_js(expr: &TemplateExpression) -> String {
    format!(
        "function ({}, {}) {{ {}; }}",
        CONTEXT_PARAM,
        EVENT_PARAM,
        expr.code.trim_end().trim_end_matches(';')
    )
}

fn parts_js(parts: &[TextPart]) -> String {
    let items: Vec<String> = parts
        .iter()
        .map(|p| match p {
            TextPart::Literal(s) => js_string(s),
            TextPart::Expr(e) => expression_js(e),
        })
        .collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
#[path = "codegen_tests.rs"]
mod tests;
