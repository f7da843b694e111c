use super::*;
use crate::config::ProjectConfig;
use crate::error::ERR_PROVIDER_NOT_EXPORTED;
use crate::extract::is_parsable_module;
use crate::graph::Session;
use crate::resolve::Resolver;
use crate::template::{compile_template, StructuralPlaceholder, TemplateOptions};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write(root: &Path, rel: &str, text: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    path
}

fn compile(root: &Path, entry: &str, library: bool) -> Session {
    let resolver = Resolver::new(root, &ProjectConfig::default());
    let mut session = Session::new(resolver, library, HashMap::new());
    session.compile_entry(&root.join(entry));
    session
}

fn module(session: &Session, id: FileId, library: bool) -> GeneratedModule {
    let cx = CodegenContext {
        graph: &session.graph,
        registry: &session.registry,
        library,
    };
    generate_module(session.graph.get(id), &cx).unwrap()
}

fn assert_parses(code: &str) {
    let wrapped = format!("var entry = {};", code);
    assert!(is_parsable_module(&wrapped), "generated code does not parse:\n{}", code);
}

#[test]
fn test_imports_become_loader_calls() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import lib, { helper as h } from './lib.js';\nimport * as all from './lib.js';\nexport const value = h(lib) + all.count;\n",
    );
    write(
        root,
        "src/lib.js",
        "export const count = 1;\nexport function helper(x) { return x; }\nexport default function make() { return 2; }\n",
    );
    let session = compile(root, "src/main.js", false);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let main = module(&session, 0, false);
    assert!(main.code.contains("var lib = __required(1, 'default');"));
    assert!(main.code.contains("var h = __required(1, 'helper');"));
    assert!(main.code.contains("var all = __required(1);"));
    assert!(main.code.contains("const value = h(lib) + all.count;"));
    assert!(!main.code.contains("export "));
    assert_parses(&main.code);

    let lib = module(&session, 1, false);
    let getter_pos = lib.code.find("__required.r(exports, 'count'").unwrap();
    let decl_pos = lib.code.find("const count = 1;").unwrap();
    assert!(getter_pos < decl_pos, "getters come first:\n{}", lib.code);
    assert!(lib
        .code
        .contains("__required.r(exports, 'default', function () { return make; });"));
    assert!(lib.code.contains("function make() { return 2; }"));
    assert_parses(&lib.code);
}

#[test]
fn test_default_identifier_trails_its_declaration() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "export default settings;\nconst settings = { debug: true };\n",
    );
    let session = compile(root, "src/main.js", false);
    let main = module(&session, 0, false);
    let decl = main.code.find("const settings").unwrap();
    let assign = main.code.find("exports['default'] = settings;").unwrap();
    assert!(assign > decl, "{}", main.code);
    assert_parses(&main.code);
}

#[test]
fn test_reexports() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/index.js",
        "export * from './a.js';\nexport { b as renamed } from './b.js';\n",
    );
    write(root, "src/a.js", "export const a = 1;\n");
    write(root, "src/b.js", "export const b = 2;\n");
    let session = compile(root, "src/index.js", false);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let index = module(&session, 0, false);
    assert!(index.code.contains("__required.e(exports, __required(1));"));
    assert!(index
        .code
        .contains("__required.r(exports, 'renamed', function () { return __required(2, 'b'); });"));
    assert_parses(&index.code);
}

#[test]
fn test_library_reads_package_alias() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "node_modules/@loom/core/package.json",
        r#"{ "name": "@loom/core", "module": "index.js" }"#,
    );
    write(
        root,
        "node_modules/@loom/core/index.js",
        "export function bootstrap() {}\nexport default 1;\n",
    );
    write(
        root,
        "src/main.js",
        "import core, { bootstrap } from '@loom/core';\nbootstrap(core);\n",
    );
    let session = compile(root, "src/main.js", true);
    assert!(session.errors.is_empty(), "{:?}", session.errors);
    let main = module(&session, 0, true);
    assert!(main.code.contains("var core = loom_core['default'];"));
    assert!(main.code.contains("var bootstrap = loom_core.bootstrap;"));
    assert_parses(&main.code);
}

#[test]
fn test_lazyload_targets_chunk_root() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import { now } from './now.js';\nexport function open() { return [lazyload('./page.js'), lazyload('./now.js')]; }\n",
    );
    write(root, "src/now.js", "export const now = 1;\n");
    write(root, "src/page.js", "export const page = 2;\n");
    let session = compile(root, "src/main.js", false);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let main = module(&session, 0, false);
    assert!(main.code.contains("__required.l(2)"), "{}", main.code);
    assert!(main.code.contains("Promise.resolve(__required(1))"));
    assert_parses(&main.code);
}

#[test]
fn test_annotation_object_carries_template() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import { Tip } from './tip.js';\nElement({ selector: 'app-card', template: '<p>{title}</p><app-tip></app-tip>', props: ['title'] })\nexport function Card() {}\nCard.prototype.didInit = function () {};\n",
    );
    write(
        root,
        "src/tip.js",
        "Element({ selector: 'app-tip', template: '<i>tip</i>' })\nexport function Tip() {}\n",
    );
    let mut session = compile(root, "src/main.js", false);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let card = session.registry.elements["Card"].clone();
    let compiled = compile_template(
        "<p>{title}</p><app-tip></app-tip>",
        &card,
        &session.registry,
        &TemplateOptions::default(),
    );
    session.registry.output.templates.insert("Card".into(), compiled);

    let main = module(&session, 0, false);
    assert!(main.errors.is_empty(), "{:?}", main.errors);
    assert!(!main.code.contains("Element({"));
    assert!(main
        .code
        .contains("Card.annotations = { kind: 'Element', selector: \"app-card\", props: [\"title\"]"));
    assert!(main.code.contains("providers: [Tip]"));
    assert!(main.code.contains("function (ctx) { return ctx.title; }"));
    assert!(!main.code.contains("template: \"<p>"));
    let folded = main.code.find("Card.prototype.didInit").unwrap();
    let annotations = main.code.find("Card.annotations").unwrap();
    assert!(annotations > folded);
    assert_parses(&main.code);
}

#[test]
fn test_unexported_provider_is_reported() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import './tip.js';\nElement({ selector: 'app-card', template: '<app-tip></app-tip>' })\nexport function Card() {}\n",
    );
    write(
        root,
        "src/tip.js",
        "Element({ selector: 'app-tip', template: '' })\nfunction Tip() {}\n",
    );
    let mut session = compile(root, "src/main.js", false);
    let card = session.registry.elements["Card"].clone();
    let compiled = compile_template("<app-tip></app-tip>", &card, &session.registry, &TemplateOptions::default());
    session.registry.output.templates.insert("Card".into(), compiled);

    let main = module(&session, 0, false);
    assert_eq!(main.errors.len(), 1);
    assert_eq!(main.errors[0].code, ERR_PROVIDER_NOT_EXPORTED);
    assert_eq!(main.errors[0].identifier.as_deref(), Some("Tip"));
}

#[test]
fn test_unknown_template_id() {
    let compiled = CompiledTemplate {
        element: "Card".into(),
        nodes: vec![TemplateNode::StructuralPlaceholder(StructuralPlaceholder {
            directive: "if".into(),
            template: "__if_0".into(),
            value: None,
            else_template: Some("missing".into()),
            item: None,
            index: None,
        })],
        templates: [("__if_0".to_string(), Vec::new())].into_iter().collect(),
        ..Default::default()
    };
    let (code, errors) = TemplateEmitter::new(&compiled, "src/card.js").emit();
    assert!(code.contains("else: \"missing\""));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ERR_TEMPLATE_ID);
    assert_eq!(errors[0].identifier.as_deref(), Some("missing"));
}

#[test]
fn test_default_expression_rewrites_nested_lazyload() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "export default { routes: [{ path: 'a', load: function () { return lazyload('./page.js'); } }] };\n",
    );
    write(root, "src/page.js", "export const page = 1;\n");
    let session = compile(root, "src/main.js", false);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let main = module(&session, 0, false);
    assert!(!main.code.contains("lazyload("), "{}", main.code);
    assert!(main.code.contains("exports['default'] = { routes:"));
    assert!(main.code.contains("return __required.l(1);"));
    assert_parses(&main.code);
}

#[test]
fn test_annotation_raw_values_rewrite_lazyload() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "Module({ routes: [{ path: 'a', load: function () { return lazyload('./page.js'); } }] })\nexport function AppModule() {}\n",
    );
    write(root, "src/page.js", "export const page = 1;\n");
    let session = compile(root, "src/main.js", false);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let main = module(&session, 0, false);
    assert!(!main.code.contains("lazyload("), "{}", main.code);
    assert!(main.code.contains("AppModule.annotations = { kind: 'Module'"));
    assert!(main.code.contains("return __required.l(1);"));
    assert_parses(&main.code);
}

#[test]
fn test_inline_style_only_for_libraries() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "Element({ selector: 'app-card', template: '<p>x</p>', styles: ['p { color: red; }'] })\nexport function Card() {}\n",
    );
    let mut session = compile(root, "src/main.js", false);
    let card = session.registry.elements["Card"].clone();
    let compiled = compile_template("<p>x</p>", &card, &session.registry, &TemplateOptions::default());
    session.registry.output.templates.insert("Card".into(), compiled);
    session
        .registry
        .output
        .styles
        .insert("Card".into(), "p { color: red; }".into());

    let application = module(&session, 0, false);
    assert!(!application.code.contains("style:"), "{}", application.code);
    assert!(!application.code.contains("color: red"));

    let library = module(&session, 0, true);
    assert!(library.code.contains("style: \"p { color: red; }\""), "{}", library.code);
}
