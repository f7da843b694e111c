//! Template Compiler
//!
//! Turns one element's markup into a [`CompiledTemplate`]: a closed-enum node
//! tree, the named sub-template map, the providers the generated script must
//! reference and the projection slots other templates route content into.
//!
//! Attribute sigils:
//! - `*name` structural directive (`*if`, `*for`, or a registered directive)
//! - `:name` attribute directive
//! - `#name` local reference
//! - `@event` event binding, `@{prop}` two-way binding
//! - `{prop}` one-way property binding
//!
//! Content placed inside a custom element is routed into the host's `<place>`
//! slots. When the host has not been compiled yet the content stays unrouted
//! and a [`PendingProjection`] is recorded; [`drain_pending`] finishes the job
//! once every template of the target has been compiled.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::annotation::{AnnotationDefinition, QueryDefinition};
use crate::error::{
    CompilerError, ErrorLog, ERR_EXPRESSION, ERR_PIPE_UNRESOLVED, ERR_PLACE_UNRESOLVED,
    ERR_QUERY_UNRESOLVED, ERR_UNKNOWN_DIRECTIVE, ERR_UNKNOWN_ELEMENT,
};
use crate::expression::{
    compile_expression, compile_handler, tokenize_interpolation, Expression, TextPart,
};
use crate::parse::{parse_markup, MarkupElement, MarkupNode};
use crate::registry::Registry;
use crate::selector::{best_query, MatchTarget, Selector};
use crate::visitor::{walk_compiled, walk_element, TemplateVisitor};

lazy_static! {
    static ref STYLE_URL_RE: Regex =
        Regex::new(r#"url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#).unwrap();
}

pub const IF_DIRECTIVE: &str = "if";
pub const FOR_DIRECTIVE: &str = "for";

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
    Fragment(FragmentNode),
    StructuralPlaceholder(StructuralPlaceholder),
    ProjectionSlot(ProjectionSlot),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropBinding {
    pub name: String,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBinding {
    pub name: String,
    pub handler: Expression,
    pub two_way: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveBinding {
    /// Name the directive was applied by in markup.
    pub name: String,
    /// Registered directive function.
    pub directive: String,
    pub value: Option<Expression>,
}

/// Content routed into one slot of the host element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub slot: Option<String>,
    pub nodes: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    /// Registered element function for custom tags.
    pub element: Option<String>,
    pub ref_id: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub aria: BTreeMap<String, String>,
    pub attr_bindings: BTreeMap<String, Vec<TextPart>>,
    pub props: Vec<PropBinding>,
    pub events: Vec<EventBinding>,
    pub directives: Vec<DirectiveBinding>,
    pub children: Vec<TemplateNode>,
    pub projected: Vec<Projection>,
    /// `false` while projected content waits for its host to compile.
    pub routed: bool,
    /// Host content query this node was matched to.
    pub content_query: Option<String>,
    /// View query of the template owner this node was matched to.
    pub view_query: Option<String>,
}

impl ElementNode {
    /// Static attributes including the folded `data-*` / `aria-*` maps.
    pub fn match_attrs(&self) -> BTreeMap<String, String> {
        let mut all = self.attrs.clone();
        all.extend(self.data.iter().map(|(k, v)| (format!("data-{}", k), v.clone())));
        all.extend(self.aria.iter().map(|(k, v)| (format!("aria-{}", k), v.clone())));
        all
    }

    pub fn directive_names(&self) -> Vec<String> {
        self.directives.iter().map(|d| d.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentNode {
    pub children: Vec<TemplateNode>,
}

/// A structural directive; the host it wraps is stored under `template`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralPlaceholder {
    pub directive: String,
    pub template: String,
    pub value: Option<Expression>,
    pub else_template: Option<String>,
    pub item: Option<String>,
    pub index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSlot {
    pub selector: Option<String>,
    pub fallback: Vec<TemplateNode>,
}

/// Content waiting for a host element's template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProjection {
    pub host_selector: String,
    pub host: String,
    pub owner: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledTemplate {
    pub element: String,
    pub nodes: Vec<TemplateNode>,
    pub templates: BTreeMap<String, Vec<TemplateNode>>,
    pub providers: BTreeSet<String>,
    /// Projection slot selectors in declaration order (`None` = default slot).
    pub slots: Vec<Option<String>>,
    pub errors: Vec<CompilerError>,
    pub pending: Vec<PendingProjection>,
    pub has_pending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    /// Base URL relative `src` and `url(...)` references are rewritten against.
    pub asset_url: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

struct TemplateCompiler<'r> {
    registry: &'r Registry,
    def: &'r AnnotationDefinition,
    options: &'r TemplateOptions,
    templates: BTreeMap<String, Vec<TemplateNode>>,
    providers: BTreeSet<String>,
    slots: Vec<Option<String>>,
    errors: Vec<CompilerError>,
    pending: Vec<PendingProjection>,
    counter: usize,
}

/// Compiles the markup of `def` against the registry.
pub fn compile_template(
    markup: &str,
    def: &AnnotationDefinition,
    registry: &Registry,
    options: &TemplateOptions,
) -> CompiledTemplate {
    let mut compiler = TemplateCompiler {
        registry,
        def,
        options,
        templates: BTreeMap::new(),
        providers: BTreeSet::new(),
        slots: Vec::new(),
        errors: Vec::new(),
        pending: Vec::new(),
        counter: 0,
    };

    let nodes = match parse_markup(markup, &def.file) {
        Ok(markup_nodes) => compiler.compile_nodes(&markup_nodes),
        Err(err) => {
            compiler.errors.push(err.with_identifier(&def.name));
            Vec::new()
        }
    };

    let mut compiled = CompiledTemplate {
        element: def.name.clone(),
        nodes,
        templates: compiler.templates,
        providers: compiler.providers,
        slots: compiler.slots,
        has_pending: !compiler.pending.is_empty(),
        pending: compiler.pending,
        errors: compiler.errors,
    };
    resolve_view_queries(&mut compiled, &def.view_queries(), &def.file);
    compiled
}

impl<'r> TemplateCompiler<'r> {
    fn error(&mut self, code: &str, message: String) {
        self.errors.push(
            CompilerError::new(code, &message, &self.def.file)
                .with_identifier(&self.def.name)
                .with_context(format!("template of {}", self.def.name)),
        );
    }

    fn next_template_id(&mut self, directive: &str) -> String {
        let id = format!("__{}_{}", directive, self.counter);
        self.counter += 1;
        id
    }

    fn compile_nodes(&mut self, nodes: &[MarkupNode]) -> Vec<TemplateNode> {
        nodes.iter().filter_map(|n| self.compile_node(n)).collect()
    }

    fn compile_node(&mut self, node: &MarkupNode) -> Option<TemplateNode> {
        match node {
            MarkupNode::Text(text) => Some(TemplateNode::Text(TextNode {
                parts: self.interpolate(text, true),
            })),
            MarkupNode::Element(el) => self.compile_element(el),
        }
    }

    fn interpolate(&mut self, text: &str, bare_braces: bool) -> Vec<TextPart> {
        match tokenize_interpolation(text, bare_braces) {
            Ok(mut parts) => {
                for part in &mut parts {
                    if let TextPart::Expr(expr) = part {
                        self.resolve_filters(expr);
                    }
                }
                parts
            }
            Err(err) => {
                self.error(
                    ERR_EXPRESSION,
                    format!("Invalid interpolation '{}': {}", text.trim(), err.message),
                );
                vec![TextPart::Literal(text.to_string())]
            }
        }
    }

    fn expression(&mut self, text: &str) -> Option<Expression> {
        match compile_expression(text) {
            Ok(mut expr) => {
                self.resolve_filters(&mut expr);
                Some(expr)
            }
            Err(err) => {
                self.error(
                    ERR_EXPRESSION,
                    format!("Invalid expression '{}': {}", text.trim(), err.message),
                );
                None
            }
        }
    }

    fn handler(&mut self, text: &str) -> Option<Expression> {
        match compile_handler(text) {
            Ok(expr) => Some(expr),
            Err(err) => {
                self.error(
                    ERR_EXPRESSION,
                    format!("Invalid event handler '{}': {}", text.trim(), err.message),
                );
                None
            }
        }
    }

    fn resolve_filters(&mut self, expr: &mut Expression) {
        let registry = self.registry;
        for filter in &mut expr.filters {
            match registry.find_pipe(&filter.name) {
                Some(pipe) => {
                    filter.pipe = Some(pipe.name.clone());
                    self.providers.insert(pipe.name.clone());
                }
                None => {
                    let name = filter.name.clone();
                    self.error(
                        ERR_PIPE_UNRESOLVED,
                        format!("No pipe named '{}' is registered", name),
                    );
                }
            }
        }
    }

    fn compile_element(&mut self, el: &MarkupElement) -> Option<TemplateNode> {
        let structural = el
            .attrs
            .iter()
            .find(|(name, _)| name.starts_with('*'))
            .map(|(name, value)| (name[1..].to_string(), value.clone()));

        if el.tag == "template" {
            let children = self.compile_nodes(&el.children);
            let id = el
                .attrs
                .iter()
                .find(|(name, _)| name.starts_with('#'))
                .map(|(name, _)| name[1..].to_string());
            return match (structural, id) {
                (Some((name, value)), _) => Some(self.wrap_structural(
                    &name,
                    &value,
                    TemplateNode::Fragment(FragmentNode { children }),
                )),
                (None, Some(id)) => {
                    self.templates.insert(id, children);
                    None
                }
                (None, None) => Some(TemplateNode::Fragment(FragmentNode { children })),
            };
        }

        if el.tag == "place" {
            let selector = el
                .attr("selector")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            self.slots.push(selector.clone());
            return Some(TemplateNode::ProjectionSlot(ProjectionSlot {
                selector,
                fallback: self.compile_nodes(&el.children),
            }));
        }

        let mut node = ElementNode {
            tag: el.tag.clone(),
            routed: true,
            ..Default::default()
        };
        for (name, value) in &el.attrs {
            self.compile_attribute(&mut node, name, value);
        }
        self.apply_selector_directives(&mut node);

        let registry = self.registry;
        let host = if node.tag.contains('-') {
            match registry.find_element(&node.tag) {
                Some(host) => {
                    node.element = Some(host.name.clone());
                    self.providers.insert(host.name.clone());
                    Some(host)
                }
                None => {
                    let tag = node.tag.clone();
                    self.error(
                        ERR_UNKNOWN_ELEMENT,
                        format!("'{}' is not a registered element", tag),
                    );
                    None
                }
            }
        } else {
            None
        };

        let children = self.compile_nodes(&el.children);
        match host {
            Some(host) if !children.is_empty() => self.project(&mut node, host, children),
            _ => node.children = children,
        }

        let element = TemplateNode::Element(node);
        Some(match structural {
            Some((name, value)) => self.wrap_structural(&name, &value, element),
            None => element,
        })
    }

    fn compile_attribute(&mut self, node: &mut ElementNode, name: &str, value: &str) {
        if name.starts_with('*') {
            return;
        }
        if let Some(reference) = name.strip_prefix('#') {
            node.ref_id = Some(reference.to_string());
            return;
        }
        if let Some(rest) = name.strip_prefix('@') {
            if let Some(prop) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
                // Two-way: bind the property and assign `propChange` back.
                if let Some(expr) = self.expression(value) {
                    node.props.push(PropBinding {
                        name: prop.to_string(),
                        value: expr,
                    });
                }
                if let Some(handler) = self.handler(&format!("{} = $event", value.trim())) {
                    node.events.push(EventBinding {
                        name: format!("{}Change", prop),
                        handler,
                        two_way: true,
                    });
                }
            } else if let Some(handler) = self.handler(value) {
                node.events.push(EventBinding {
                    name: rest.to_string(),
                    handler,
                    two_way: false,
                });
            }
            return;
        }
        if let Some(prop) = name.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            if let Some(expr) = self.expression(value) {
                node.props.push(PropBinding {
                    name: prop.to_string(),
                    value: expr,
                });
            }
            return;
        }
        if let Some(directive) = name.strip_prefix(':') {
            let registry = self.registry;
            match registry.find_directive(directive) {
                Some(def) => {
                    let def_name = def.name.clone();
                    self.providers.insert(def_name.clone());
                    let value = if value.trim().is_empty() {
                        None
                    } else {
                        self.expression(value)
                    };
                    node.directives.push(DirectiveBinding {
                        name: directive.to_string(),
                        directive: def_name,
                        value,
                    });
                }
                None => self.error(
                    ERR_UNKNOWN_DIRECTIVE,
                    format!("'{}' is not a registered directive", directive),
                ),
            }
            return;
        }

        if value.contains("${") {
            let parts = self.interpolate(value, false);
            node.attr_bindings.insert(name.to_string(), parts);
            return;
        }
        if let Some(key) = name.strip_prefix("data-") {
            node.data.insert(key.to_string(), value.to_string());
        } else if let Some(key) = name.strip_prefix("aria-") {
            node.aria.insert(key.to_string(), value.to_string());
        } else if name == "src" {
            node.attrs
                .insert(name.to_string(), self.rewrite_asset(value));
        } else if name == "style" {
            let rewritten = STYLE_URL_RE
                .replace_all(value, |caps: &regex::Captures| {
                    format!("url({}{}{})", &caps[1], self.rewrite_asset(&caps[2]), &caps[3])
                })
                .to_string();
            node.attrs.insert(name.to_string(), rewritten);
        } else {
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    /// Directives with compound selectors (`input[model]`) apply without a sigil.
    fn apply_selector_directives(&mut self, node: &mut ElementNode) {
        let attrs = node.match_attrs();
        let applied = node.directive_names();
        let target = MatchTarget {
            tag: &node.tag,
            ref_id: node.ref_id.as_deref(),
            attrs: &attrs,
            directives: &applied,
        };
        let found: Vec<(String, Option<String>)> = self
            .registry
            .matching_directives(&target)
            .into_iter()
            .filter(|d| !node.directives.iter().any(|b| b.directive == d.name))
            .map(|d| (d.name.clone(), d.selector().map(|s| s.to_string())))
            .collect();
        for (directive, selector) in found {
            self.providers.insert(directive.clone());
            node.directives.push(DirectiveBinding {
                name: selector.unwrap_or_else(|| directive.clone()),
                directive,
                value: None,
            });
        }
    }

    fn rewrite_asset(&self, url: &str) -> String {
        let Some(base) = self.options.asset_url.as_deref() else {
            return url.to_string();
        };
        let absolute = ["/", "http:", "https:", "data:", "#", "${"]
            .iter()
            .any(|p| url.starts_with(p));
        if absolute || url.is_empty() {
            return url.to_string();
        }
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches("./")
        )
    }

    fn project(
        &mut self,
        node: &mut ElementNode,
        host: &AnnotationDefinition,
        mut content: Vec<TemplateNode>,
    ) {
        let queries = host.content_queries();
        if !queries.is_empty() {
            let mut marker = ContentQueryMarker { queries: &queries };
            marker.visit_children(&mut content);

            // Structural content keeps its hosts in sub-templates.
            let mut refs = TemplateRefs::default();
            refs.visit_children(&mut content);
            let mut seen = BTreeSet::new();
            while let Some(id) = refs.ids.pop() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(nodes) = self.templates.get_mut(&id) {
                    marker.visit_children(nodes);
                    refs.visit_children(nodes);
                }
            }
        }

        match self.registry.slots(&host.name) {
            Some(slots) => {
                node.projected = route_content(content, slots, &node.tag, &self.templates);
            }
            None if host.external.is_some() => {
                node.projected = vec![Projection {
                    slot: None,
                    nodes: content,
                }];
            }
            None => {
                node.children = content;
                node.routed = false;
                let pending = PendingProjection {
                    host_selector: node.tag.clone(),
                    host: host.name.clone(),
                    owner: self.def.name.clone(),
                    file: self.def.file.clone(),
                };
                if !self.pending.contains(&pending) {
                    self.pending.push(pending);
                }
            }
        }
    }

    fn wrap_structural(&mut self, name: &str, value: &str, host: TemplateNode) -> TemplateNode {
        let registry = self.registry;
        let template = self.next_template_id(name);
        let mut placeholder = StructuralPlaceholder {
            directive: name.to_string(),
            template: template.clone(),
            value: None,
            else_template: None,
            item: None,
            index: None,
        };

        match name {
            IF_DIRECTIVE => {
                let mut clauses = value.split(';');
                placeholder.value = self.expression(clauses.next().unwrap_or_default());
                for clause in clauses {
                    if let Some(id) = clause.trim().strip_prefix("else") {
                        placeholder.else_template = Some(id.trim().to_string());
                    }
                }
            }
            FOR_DIRECTIVE => {
                let mut clauses = value.split(';');
                let head = clauses.next().unwrap_or_default().trim();
                let head = head.strip_prefix("let ").unwrap_or(head);
                match head.split_once(" of ") {
                    Some((item, list)) => {
                        placeholder.item = Some(item.trim().to_string());
                        placeholder.value = self.expression(list);
                    }
                    None => self.error(
                        ERR_EXPRESSION,
                        format!("*for expects 'item of list', got '{}'", value.trim()),
                    ),
                }
                for clause in clauses {
                    if let Some((_, local)) = clause.trim().split_once(" as ") {
                        placeholder.index = Some(local.trim().to_string());
                    }
                }
            }
            custom => match registry.find_directive(custom) {
                Some(def) => {
                    placeholder.directive = def.name.clone();
                    self.providers.insert(def.name.clone());
                    if !value.trim().is_empty() {
                        placeholder.value = self.expression(value);
                    }
                }
                None => self.error(
                    ERR_UNKNOWN_DIRECTIVE,
                    format!("'*{}' is not a registered structural directive", custom),
                ),
            },
        }

        self.templates.insert(template, vec![host]);
        TemplateNode::StructuralPlaceholder(placeholder)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECTION AND QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Routes content nodes into the host's slots, in slot declaration order.
///
/// A structural placeholder routes by the first element of its template.
pub fn route_content(
    content: Vec<TemplateNode>,
    slots: &[Option<String>],
    host_tag: &str,
    templates: &BTreeMap<String, Vec<TemplateNode>>,
) -> Vec<Projection> {
    let parsed: Vec<Option<Vec<Selector>>> = slots
        .iter()
        .map(|s| s.as_deref().map(Selector::parse_list))
        .collect();
    let default_slot = slots.iter().position(|s| s.is_none());
    let mut buckets: Vec<Vec<TemplateNode>> = vec![Vec::new(); slots.len()];

    for node in content {
        let element = match &node {
            TemplateNode::Element(el) => Some(el),
            TemplateNode::StructuralPlaceholder(p) => templates
                .get(&p.template)
                .and_then(|nodes| first_element(nodes, templates)),
            _ => None,
        };
        let slot = match element {
            Some(el) => {
                let attrs = el.match_attrs();
                let directives = el.directive_names();
                let target = MatchTarget {
                    tag: &el.tag,
                    ref_id: el.ref_id.as_deref(),
                    attrs: &attrs,
                    directives: &directives,
                };
                parsed
                    .iter()
                    .position(|sel| {
                        sel.as_ref()
                            .is_some_and(|list| list.iter().any(|s| s.matches(&target)))
                    })
                    .or(default_slot)
            }
            None => default_slot,
        };
        match slot {
            Some(i) => buckets[i].push(node),
            None => tracing::warn!(
                "[LOOM template] <{}> has no slot for projected content; dropped",
                host_tag
            ),
        }
    }

    slots
        .iter()
        .zip(buckets)
        .filter(|(_, nodes)| !nodes.is_empty())
        .map(|(slot, nodes)| Projection {
            slot: slot.clone(),
            nodes,
        })
        .collect()
}

/// First element of a sub-template, looking through nested placeholders.
fn first_element<'t>(
    nodes: &'t [TemplateNode],
    templates: &'t BTreeMap<String, Vec<TemplateNode>>,
) -> Option<&'t ElementNode> {
    nodes.iter().find_map(|n| match n {
        TemplateNode::Element(el) => Some(el),
        TemplateNode::StructuralPlaceholder(p) => templates
            .get(&p.template)
            .and_then(|inner| first_element(inner, templates)),
        _ => None,
    })
}

fn match_query(el: &ElementNode, queries: &[QueryDefinition]) -> Option<String> {
    let attrs = el.match_attrs();
    let directives = el.directive_names();
    let target = MatchTarget {
        tag: &el.tag,
        ref_id: el.ref_id.as_deref(),
        attrs: &attrs,
        directives: &directives,
    };
    best_query(
        queries
            .iter()
            .map(|q| (q.property.as_str(), q.selector.as_str())),
        &target,
    )
    .map(|p| p.to_string())
}

struct ContentQueryMarker<'q> {
    queries: &'q [QueryDefinition],
}

impl<'q> TemplateVisitor for ContentQueryMarker<'q> {
    fn visit_element(&mut self, element: &mut ElementNode) {
        if element.content_query.is_none() {
            element.content_query = match_query(element, self.queries);
        }
        walk_element(self, element);
    }
}

/// Sub-template ids referenced by placeholders.
#[derive(Default)]
struct TemplateRefs {
    ids: Vec<String>,
}

impl TemplateVisitor for TemplateRefs {
    fn visit_structural(&mut self, placeholder: &mut StructuralPlaceholder) {
        self.ids.push(placeholder.template.clone());
        if let Some(id) = &placeholder.else_template {
            self.ids.push(id.clone());
        }
    }
}

struct ViewQueryMarker<'q> {
    queries: &'q [QueryDefinition],
    matched: BTreeSet<String>,
}

impl<'q> TemplateVisitor for ViewQueryMarker<'q> {
    fn visit_element(&mut self, element: &mut ElementNode) {
        if let Some(property) = match_query(element, self.queries) {
            self.matched.insert(property.clone());
            element.view_query = Some(property);
        }
        walk_element(self, element);
    }
}

fn resolve_view_queries(compiled: &mut CompiledTemplate, queries: &[QueryDefinition], file: &str) {
    if queries.is_empty() {
        return;
    }
    let mut marker = ViewQueryMarker {
        queries,
        matched: BTreeSet::new(),
    };
    walk_compiled(&mut marker, compiled);
    let unmatched: Vec<&QueryDefinition> = queries
        .iter()
        .filter(|q| !marker.matched.contains(&q.property))
        .collect();
    for query in unmatched {
        compiled.errors.push(
            CompilerError::new(
                ERR_QUERY_UNRESOLVED,
                &format!(
                    "View query '{}' ({}) matches nothing in the template of {}",
                    query.property, query.selector, compiled.element
                ),
                file,
            )
            .with_identifier(&query.property),
        );
    }
}

struct ProjectionRouter<'s> {
    slots: &'s BTreeMap<String, Vec<Option<String>>>,
    templates: &'s BTreeMap<String, Vec<TemplateNode>>,
}

impl<'s> TemplateVisitor for ProjectionRouter<'s> {
    fn visit_element(&mut self, element: &mut ElementNode) {
        if !element.routed {
            if let Some(slots) = element.element.as_ref().and_then(|h| self.slots.get(h)) {
                let content = std::mem::take(&mut element.children);
                element.projected = route_content(content, slots, &element.tag, self.templates);
                element.routed = true;
            }
        }
        walk_element(self, element);
    }
}

/// Routes content buffered for hosts compiled after their usage site.
///
/// Entries whose host never compiled become `E-PLACE-UNRESOLVED` errors in the
/// owning element's file.
pub fn drain_pending(registry: &mut Registry, errors: &mut ErrorLog) -> usize {
    let mut slots: BTreeMap<String, Vec<Option<String>>> = registry.output.external_slots.clone();
    for (name, compiled) in &registry.output.templates {
        slots.insert(name.clone(), compiled.slots.clone());
    }

    let mut resolved = 0;
    for compiled in registry.output.templates.values_mut() {
        if compiled.pending.is_empty() {
            continue;
        }
        let templates = compiled.templates.clone();
        let mut router = ProjectionRouter {
            slots: &slots,
            templates: &templates,
        };
        walk_compiled(&mut router, compiled);

        for entry in std::mem::take(&mut compiled.pending) {
            if slots.contains_key(&entry.host) {
                resolved += 1;
                continue;
            }
            errors.push(
                CompilerError::new(
                    ERR_PLACE_UNRESOLVED,
                    &format!(
                        "Content projected into <{}> cannot be routed: element {} has no compiled template",
                        entry.host_selector, entry.host
                    ),
                    &entry.file,
                )
                .with_identifier(&entry.owner),
            );
        }
        compiled.has_pending = false;
    }
    resolved
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
