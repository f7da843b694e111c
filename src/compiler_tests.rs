use super::*;
use crate::error::ERR_TEMPLATE_SOURCE;
use crate::extract::is_parsable_module;
use crate::registry::LibraryMetadata;
use crate::static_eval::{render_template, Scope};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn write(root: &Path, rel: &str, text: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    path
}

fn library_project(root: &Path) {
    write(
        root,
        MANIFEST_FILE,
        r#"{
            "default": "ui",
            "projects": {
                "ui": {
                    "type": "library",
                    "output": { "folder": "dist/ui-kit", "entryFile": "index.js", "minify": true, "sourceMap": true }
                }
            }
        }"#,
    );
    write(root, "package.json", r#"{ "name": "ui-kit", "version": "1.2.0" }"#);
    write(
        root,
        "src/index.js",
        "export { CardModule } from './card.module.js';\nexport { Store } from './store.js';\nexport { Card } from './card.js';\n",
    );
    write(
        root,
        "src/card.module.js",
        "import { Card } from './card.js';\nimport { Store } from './store.js';\nModule({ selectors: [Card], services: [Store] })\nexport function CardModule() {}\n",
    );
    write(root, "src/store.js", "Service({})\nexport function Store() {}\n");
    write(
        root,
        "src/card.js",
        "Element({ selector: 'ui-card', template: '<p>{value}</p>', props: ['value'] })\nexport function Card() {}\n",
    );
}

fn application_project(root: &Path) {
    write(
        root,
        MANIFEST_FILE,
        r#"{
            "projects": {
                "app": {
                    "output": {
                        "folder": "www",
                        "view": "index.html",
                        "styles": ["theme.css"],
                        "assets": ["img"]
                    }
                }
            }
        }"#,
    );
    write(
        root,
        "src/index.html",
        "<html><head></head><body><app-root></app-root></body></html>\n",
    );
    write(root, "src/theme.css", "body { margin: 0; }\n");
    write(root, "src/img/logo.svg", "<svg></svg>\n");
    write(
        root,
        "src/main.js",
        "Element({ selector: 'app-root', templateUrl: './root.html', styleUrl: './root.css' })\nexport function Root() {}\nRoot.prototype.open = function () { return lazyload('./page.js'); };\n",
    );
    write(root, "src/root.html", "<h1>{title}</h1>\n");
    write(root, "src/root.css", "h1 { color: red; }\n");
    write(root, "src/page.js", "export const page = 'page';\n");
}

#[test]
fn test_library_end_to_end() {
    init_logging();
    let dir = tempdir().unwrap();
    let root = dir.path();
    library_project(root);

    let mut compiler = Compiler::open(root, None).unwrap();
    let report = compiler.build().unwrap();
    assert!(!report.has_errors(), "{:?}", report.targets[0].errors);
    assert_eq!(report.project, "ui");
    assert_eq!(report.targets[0].name, "ui-kit");

    let out = root.join("dist/ui-kit");
    let meta: LibraryMetadata =
        serde_json::from_str(&fs::read_to_string(out.join(METADATA_FILE)).unwrap()).unwrap();
    assert_eq!(meta.name, "ui-kit");
    assert_eq!(meta.version.as_deref(), Some("1.2.0"));
    assert_eq!(meta.modules.keys().collect::<Vec<_>>(), vec!["CardModule"]);
    assert_eq!(meta.services.keys().collect::<Vec<_>>(), vec!["Store"]);
    assert_eq!(meta.elements.keys().collect::<Vec<_>>(), vec!["Card"]);
    assert_eq!(meta.elements["Card"].module.as_deref(), Some("CardModule"));

    let module = fs::read_to_string(out.join("bundles/ui-kit-module.js")).unwrap();
    assert!(module.contains("export var Card = __entry.Card;"), "{}", module);
    let umd = fs::read_to_string(out.join("bundles/ui-kit-umd.js")).unwrap();
    assert!(is_parsable_module(&umd));
    assert!(out.join("bundles/ui-kit-umd.min.js").is_file());
    assert!(out.join("bundles/ui-kit-umd.min.js.map").is_file());

    let package: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(PACKAGE_FILE)).unwrap()).unwrap();
    assert_eq!(package["module"], json!("bundles/ui-kit-module.js"));
    assert_eq!(package["main"], json!("bundles/ui-kit-umd.js"));
    assert_eq!(package["version"], json!("1.2.0"));

    let target = &compiler.targets()[0];
    let mut scope = Scope::new();
    scope.insert("value".to_string(), json!("hi"));
    let html = render_template(&target.session.registry.output.templates["Card"], &scope);
    assert_eq!(html, "<p>hi</p>");
}

#[test]
fn test_unchanged_rebuild_writes_nothing() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    library_project(root);

    let first = build_project(root, Some("ui")).unwrap();
    assert!(!first.targets[0].written.is_empty());
    let second = build_project(root, Some("ui")).unwrap();
    assert!(second.targets[0].written.is_empty(), "{:?}", second.targets[0].written);
}

#[test]
fn test_application_emits_chunks_styles_and_view() {
    init_logging();
    let dir = tempdir().unwrap();
    let root = dir.path();
    application_project(root);

    let report = build_project(root, None).unwrap();
    assert!(!report.has_errors(), "{:?}", report.targets[0].errors);

    let out = root.join("www");
    let bootstrap = fs::read_to_string(out.join("main.js")).unwrap();
    assert!(bootstrap.contains("global.__loomRequired = __required;"));
    assert!(bootstrap.contains("Root.annotations"));
    assert!(!bootstrap.contains("'page'"), "lazy module leaked into main table");
    assert!(is_parsable_module(&bootstrap));

    let chunk = fs::read_to_string(out.join("chunk-1.js")).unwrap();
    assert!(chunk.starts_with("__loomRequired.c(1, {"));
    assert!(chunk.contains("'page'"));

    let styles = fs::read_to_string(out.join(STYLES_FILE)).unwrap();
    let theme = styles.find("margin: 0").unwrap();
    let element = styles.find("color: red").unwrap();
    assert!(theme < element);

    let view = fs::read_to_string(out.join("index.html")).unwrap();
    let styles_tag = view.find("<script src=\"styles.js\"></script>").unwrap();
    let main_tag = view.find("<script src=\"main.js\"></script>").unwrap();
    assert!(styles_tag < main_tag && main_tag < view.find("</body>").unwrap());

    assert!(out.join("img/logo.svg").is_file());
}

#[test]
fn test_existing_view_is_left_alone() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    application_project(root);
    write(root, "www/index.html", "custom");

    build_project(root, None).unwrap();
    assert_eq!(fs::read_to_string(root.join("www/index.html")).unwrap(), "custom");
}

#[test]
fn test_template_file_change_recompiles() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    application_project(root);
    let template = root.join("src/root.html");
    fs::remove_file(&template).unwrap();

    let mut compiler = Compiler::open(root, None).unwrap();
    let report = compiler.build().unwrap();
    let errors = &report.targets[0].errors;
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert_eq!(errors[0].code, ERR_TEMPLATE_SOURCE);
    assert!(compiler.watched_files().contains(&clean_path(&template)));

    write(root, "src/root.html", "<h2>{title}</h2>\n");
    let report = compiler.recompile(&template, ChangeKind::Content).unwrap();
    assert!(!report.has_errors(), "{:?}", report.targets[0].errors);
    assert!(report.targets[0].written.contains(&"main.js".to_string()));
    let bootstrap = fs::read_to_string(root.join("www/main.js")).unwrap();
    assert!(bootstrap.contains("\"h2\""));
}

#[test]
fn test_style_change_rewrites_styles_only() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    application_project(root);
    let mut compiler = Compiler::open(root, None).unwrap();
    compiler.build().unwrap();

    let style = write(root, "src/root.css", "h1 { color: blue; }\n");
    let report = compiler.recompile(&style, ChangeKind::Style).unwrap();
    assert_eq!(report.targets[0].written, vec![STYLES_FILE.to_string()]);
    let styles = fs::read_to_string(root.join("www").join(STYLES_FILE)).unwrap();
    assert!(styles.contains("color: blue"));
}

#[test]
fn test_script_change_recompiles_file() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    application_project(root);
    let mut compiler = Compiler::open(root, None).unwrap();
    compiler.build().unwrap();

    let page = write(root, "src/page.js", "export const page = 'changed';\n");
    let report = compiler.recompile(&page, ChangeKind::Content).unwrap();
    assert_eq!(report.targets[0].written, vec!["chunk-1.js".to_string()]);
}

#[test]
fn test_unknown_file_is_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    application_project(root);
    let mut compiler = Compiler::open(root, None).unwrap();
    compiler.build().unwrap();

    let stray = write(root, "notes.txt", "hello");
    let err = compiler.recompile(&stray, ChangeKind::Content).unwrap_err();
    assert!(matches!(err, BuildError::UnknownFile(_)));
}

#[test]
fn test_missing_entry_is_fatal() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, MANIFEST_FILE, r#"{ "projects": { "app": {} } }"#);
    let err = build_project(root, None).unwrap_err();
    assert!(matches!(err, BuildError::EntryUnresolved { .. }), "{}", err);
}

#[test]
fn test_named_entries_build_side_by_side() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        MANIFEST_FILE,
        r#"{ "projects": { "ui": { "type": "library", "output": { "entryFile": { "forms": "forms.js", "grid": "grid.js" }, "patterns": ["UMD"] } } } }"#,
    );
    write(root, "src/forms.js", "export const forms = 1;\n");
    write(root, "src/grid.js", "export const grid = 2;\n");

    let report = build_project(root, None).unwrap();
    assert_eq!(report.targets.len(), 2);
    assert!(root.join("dist/forms/bundles/forms-umd.js").is_file());
    assert!(root.join("dist/grid/bundles/grid-umd.js").is_file());
    assert!(root.join("dist/grid").join(METADATA_FILE).is_file());
}
