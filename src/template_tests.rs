use super::*;
use crate::annotation::{AnnotationKind, PropertyValue};
use crate::error::ErrorLog;

fn def(kind: AnnotationKind, name: &str, props: &[(&str, PropertyValue)]) -> AnnotationDefinition {
    AnnotationDefinition {
        name: name.to_string(),
        kind,
        properties: props
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        implementation: String::new(),
        file: format!("src/{}.js", name.to_lowercase()),
        module: None,
        external: None,
        exported: true,
    }
}

fn string(value: &str) -> PropertyValue {
    PropertyValue::String(value.to_string())
}

fn strings(values: &[&str]) -> PropertyValue {
    PropertyValue::Array(values.iter().map(|v| string(v)).collect())
}

fn element(name: &str, selector: &str) -> AnnotationDefinition {
    def(AnnotationKind::Element, name, &[("selector", string(selector))])
}

fn compile(markup: &str, owner: &AnnotationDefinition, registry: &Registry) -> CompiledTemplate {
    compile_template(markup, owner, registry, &TemplateOptions::default())
}

fn root_element(compiled: &CompiledTemplate) -> &ElementNode {
    compiled
        .nodes
        .iter()
        .find_map(|n| match n {
            TemplateNode::Element(el) => Some(el),
            _ => None,
        })
        .expect("root element")
}

#[test]
fn test_text_interpolation() {
    let owner = element("App", "app-root");
    let compiled = compile("<p>Hello {name}!</p>", &owner, &Registry::new());
    assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
    let p = root_element(&compiled);
    let TemplateNode::Text(text) = &p.children[0] else {
        panic!("expected text");
    };
    assert_eq!(text.parts.len(), 3);
    match &text.parts[1] {
        TextPart::Expr(expr) => assert_eq!(expr.code, "ctx.name"),
        other => panic!("unexpected part {:?}", other),
    }
}

#[test]
fn test_attribute_sigils() {
    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<input #field {value}="name" @input="update($event)" @{checked}="done" data-role="x" title="${label}">"#,
        &owner,
        &Registry::new(),
    );
    assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
    let input = root_element(&compiled);
    assert_eq!(input.ref_id.as_deref(), Some("field"));
    assert_eq!(input.data.get("role").map(String::as_str), Some("x"));
    assert!(input.attr_bindings.contains_key("title"));

    let props: Vec<&str> = input.props.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(props, vec!["value", "checked"]);

    let change = input
        .events
        .iter()
        .find(|e| e.name == "checkedChange")
        .expect("two-way event");
    assert!(change.two_way);
    assert_eq!(change.handler.code, "ctx.done = $event");
    let input_event = input.events.iter().find(|e| e.name == "input").unwrap();
    assert_eq!(input_event.handler.code, "ctx.update($event)");
}

#[test]
fn test_structural_if_with_else_template() {
    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<div *if="ready; else loading">ok</div><template #loading><span>...</span></template>"#,
        &owner,
        &Registry::new(),
    );
    assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
    let TemplateNode::StructuralPlaceholder(ph) = &compiled.nodes[0] else {
        panic!("expected placeholder");
    };
    assert_eq!(ph.directive, "if");
    assert_eq!(ph.else_template.as_deref(), Some("loading"));
    assert_eq!(ph.value.as_ref().map(|v| v.code.as_str()), Some("ctx.ready"));
    assert!(compiled.templates.contains_key(&ph.template));
    assert!(compiled.templates.contains_key("loading"));
}

#[test]
fn test_structural_for() {
    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<li *for="item of items; index as i">{item}</li>"#,
        &owner,
        &Registry::new(),
    );
    let TemplateNode::StructuralPlaceholder(ph) = &compiled.nodes[0] else {
        panic!("expected placeholder");
    };
    assert_eq!(ph.item.as_deref(), Some("item"));
    assert_eq!(ph.index.as_deref(), Some("i"));
    assert_eq!(ph.value.as_ref().map(|v| v.code.as_str()), Some("ctx.items"));
}

#[test]
fn test_unknown_element_directive_and_pipe() {
    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<x-missing></x-missing><div :nope></div><p>{price|money}</p>"#,
        &owner,
        &Registry::new(),
    );
    let codes: Vec<&str> = compiled.errors.iter().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&ERR_UNKNOWN_ELEMENT));
    assert!(codes.contains(&ERR_UNKNOWN_DIRECTIVE));
    assert!(codes.contains(&ERR_PIPE_UNRESOLVED));
}

#[test]
fn test_providers_collected() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    registry.register(element("Card", "app-card"), &mut errors);
    registry.register(
        def(AnnotationKind::Directive, "Tip", &[("selector", string("[tooltip]"))]),
        &mut errors,
    );
    registry.register(
        def(AnnotationKind::Pipe, "Upper", &[("name", string("upper"))]),
        &mut errors,
    );
    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<app-card :tooltip="'hi'">{title|upper}</app-card>"#,
        &owner,
        &registry,
    );
    assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
    let providers: Vec<&str> = compiled.providers.iter().map(String::as_str).collect();
    assert_eq!(providers, vec!["Card", "Tip", "Upper"]);
}

#[test]
fn test_projection_routes_by_slot_selector() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    let card = element("Card", "app-card");
    registry.register(card.clone(), &mut errors);
    let card_template = compile(
        r#"<header><place selector="h1"></place></header><place></place>"#,
        &card,
        &registry,
    );
    assert_eq!(card_template.slots, vec![Some("h1".to_string()), None]);
    registry.output.templates.insert("Card".to_string(), card_template);

    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<app-card><h1>Title</h1><p>Body</p></app-card>"#,
        &owner,
        &registry,
    );
    let host = root_element(&compiled);
    assert!(host.routed);
    assert!(host.children.is_empty());
    assert_eq!(host.projected.len(), 2);
    assert_eq!(host.projected[0].slot.as_deref(), Some("h1"));
    assert_eq!(host.projected[1].slot, None);
}

#[test]
fn test_content_without_default_slot_is_dropped() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    let card = element("Card", "app-card");
    registry.register(card.clone(), &mut errors);
    let card_template = compile(r#"<place selector="h1"></place>"#, &card, &registry);
    registry.output.templates.insert("Card".to_string(), card_template);

    let owner = element("App", "app-root");
    let compiled = compile(r#"<app-card><p>lost</p></app-card>"#, &owner, &registry);
    let host = root_element(&compiled);
    assert!(host.projected.is_empty());
    assert!(compiled.errors.is_empty());
}

#[test]
fn test_pending_projection_drained_after_host_compiles() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    let card = element("Card", "app-card");
    registry.register(card.clone(), &mut errors);

    let owner = element("App", "app-root");
    let compiled = compile(r#"<app-card><p>Body</p></app-card>"#, &owner, &registry);
    assert!(compiled.has_pending);
    assert!(!root_element(&compiled).routed);
    registry.output.templates.insert("App".to_string(), compiled);

    let card_template = compile(r#"<div><place></place></div>"#, &card, &registry);
    registry.output.templates.insert("Card".to_string(), card_template);

    let resolved = drain_pending(&mut registry, &mut errors);
    assert_eq!(resolved, 1);
    assert!(errors.is_empty());
    let app = &registry.output.templates["App"];
    assert!(!app.has_pending);
    let host = root_element(app);
    assert!(host.routed);
    assert_eq!(host.projected.len(), 1);
}

#[test]
fn test_pending_projection_without_host_template_is_error() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    registry.register(element("Card", "app-card"), &mut errors);
    let owner = element("App", "app-root");
    let compiled = compile(r#"<app-card>x</app-card>"#, &owner, &registry);
    registry.output.templates.insert("App".to_string(), compiled);

    drain_pending(&mut registry, &mut errors);
    assert!(errors.has_code(ERR_PLACE_UNRESOLVED));
}

#[test]
fn test_content_query_prefers_ref_over_tag() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    let child = element("Child", "child-item");
    let host = def(
        AnnotationKind::Element,
        "Host",
        &[
            ("selector", string("host-list")),
            ("contentChildren", strings(&["items:child-item"])),
            ("contentChild", strings(&["marked:ref"])),
        ],
    );
    registry.register(child, &mut errors);
    registry.register(host.clone(), &mut errors);
    let host_template = compile("<place></place>", &host, &registry);
    registry.output.templates.insert("Host".to_string(), host_template);

    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<host-list><child-item #ref></child-item><child-item></child-item></host-list>"#,
        &owner,
        &registry,
    );
    let list = root_element(&compiled);
    let nodes = &list.projected[0].nodes;
    let queries: Vec<Option<&str>> = nodes
        .iter()
        .filter_map(|n| match n {
            TemplateNode::Element(el) => Some(el.content_query.as_deref()),
            _ => None,
        })
        .collect();
    assert_eq!(queries, vec![Some("marked"), Some("items")]);
}

#[test]
fn test_content_query_marks_structural_content() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    let child = element("Child", "child-item");
    let host = def(
        AnnotationKind::Element,
        "Host",
        &[
            ("selector", string("host-list")),
            ("contentChildren", strings(&["items:child-item"])),
        ],
    );
    registry.register(child, &mut errors);
    registry.register(host.clone(), &mut errors);
    let host_template = compile("<place></place>", &host, &registry);
    registry.output.templates.insert("Host".to_string(), host_template);

    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<host-list><child-item *for="c of list"></child-item></host-list>"#,
        &owner,
        &registry,
    );
    assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
    let list = root_element(&compiled);
    let TemplateNode::StructuralPlaceholder(ph) = &list.projected[0].nodes[0] else {
        panic!("expected placeholder");
    };
    let TemplateNode::Element(item) = &compiled.templates[&ph.template][0] else {
        panic!("expected element");
    };
    assert_eq!(item.tag, "child-item");
    assert_eq!(item.content_query.as_deref(), Some("items"));
}

#[test]
fn test_structural_content_routes_by_template_element() {
    let mut registry = Registry::new();
    let mut errors = ErrorLog::new();
    let card = element("Card", "app-card");
    registry.register(card.clone(), &mut errors);
    let card_template = compile(
        r#"<header><place selector="h1"></place></header><place></place>"#,
        &card,
        &registry,
    );
    registry.output.templates.insert("Card".to_string(), card_template);

    let owner = element("App", "app-root");
    let compiled = compile(
        r#"<app-card><h1 *if="flag">Title</h1><p>Body</p></app-card>"#,
        &owner,
        &registry,
    );
    let host = root_element(&compiled);
    assert_eq!(host.projected.len(), 2);
    assert_eq!(host.projected[0].slot.as_deref(), Some("h1"));
    assert!(matches!(
        host.projected[0].nodes[0],
        TemplateNode::StructuralPlaceholder(_)
    ));
    assert_eq!(host.projected[1].slot, None);
}

#[test]
fn test_view_query_unresolved() {
    let owner = def(
        AnnotationKind::Element,
        "App",
        &[
            ("selector", string("app-root")),
            ("viewChild", strings(&["input:#field", "missing:#nothing"])),
        ],
    );
    let compiled = compile(r#"<input #field>"#, &owner, &Registry::new());
    assert_eq!(root_element(&compiled).view_query.as_deref(), Some("input"));
    let unresolved: Vec<&str> = compiled
        .errors
        .iter()
        .filter(|e| e.code == ERR_QUERY_UNRESOLVED)
        .filter_map(|e| e.identifier.as_deref())
        .collect();
    assert_eq!(unresolved, vec!["missing"]);
}

#[test]
fn test_asset_urls_rewritten() {
    let owner = element("App", "app-root");
    let options = TemplateOptions {
        asset_url: Some("/static/".to_string()),
    };
    let compiled = compile_template(
        r#"<img src="./logo.png"><div style="background: url('bg.png')"></div><img src="/abs.png">"#,
        &owner,
        &Registry::new(),
        &options,
    );
    let attrs: Vec<&BTreeMap<String, String>> = compiled
        .nodes
        .iter()
        .filter_map(|n| match n {
            TemplateNode::Element(el) => Some(&el.attrs),
            _ => None,
        })
        .collect();
    assert_eq!(attrs[0]["src"], "/static/logo.png");
    assert_eq!(attrs[1]["style"], "background: url('/static/bg.png')");
    assert_eq!(attrs[2]["src"], "/abs.png");
}
