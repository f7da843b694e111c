use super::*;
use crate::config::ProjectConfig;
use crate::error::ERR_SYNTAX;
use tempfile::{tempdir, TempDir};

fn write(root: &Path, rel: &str, text: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    path
}

fn session(root: &Path, library: bool) -> Session {
    let resolver = Resolver::new(root, &ProjectConfig::default());
    Session::new(resolver, library, HashMap::new())
}

fn errors_with(session: &Session, code: &str) -> Vec<CompilerError> {
    session
        .errors
        .iter()
        .filter(|e| e.code == code)
        .cloned()
        .collect()
}

fn fixture() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import { helper } from './util.js';\nimport { Card } from './card.js';\nexport function main() { return helper(Card); }\n",
    );
    write(
        root,
        "src/util.js",
        "import { Card } from './card.js';\nexport function helper(x) { return x; }\n",
    );
    write(
        root,
        "src/card.js",
        "Element({ selector: 'app-card', template: '<p>{title}</p>' })\nexport function Card() {}\n",
    );
    dir
}

#[test]
fn test_ids_follow_first_seen_order() {
    let dir = fixture();
    let mut s = session(dir.path(), false);
    let entry = s.compile_entry(&dir.path().join("src/main.js"));
    assert_eq!(entry, 0);
    let order: Vec<String> = s
        .graph
        .iter()
        .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(order, vec!["main.js", "util.js", "card.js"]);
    assert!(s.graph.iter().all(|r| r.state == FileState::Compiled));
    assert!(s.errors.is_empty(), "{:?}", s.errors);
    assert!(s.registry.find_element("app-card").is_some());
}

#[test]
fn test_building_twice_is_identical() {
    let dir = fixture();
    let run = || {
        let mut s = session(dir.path(), false);
        s.compile_entry(&dir.path().join("src/main.js"));
        s.graph
            .iter()
            .map(|r| (r.id, r.key(), r.import_targets.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_cycle_is_tolerated() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/a.js", "import { b } from './b.js';\nexport const a = 1;\n");
    write(root, "src/b.js", "import { a } from './a.js';\nexport const b = 2;\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/a.js"));
    assert_eq!(s.graph.len(), 2);
    assert!(s.graph.iter().all(|r| r.state == FileState::Compiled));
    assert!(s.errors.is_empty(), "{:?}", s.errors);
}

#[test]
fn test_import_not_exported_names_exactly_the_missing() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import { a, b, c } from './lib.js';\nimport d from './lib.js';\n",
    );
    write(root, "src/lib.js", "export const a = 1;\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));

    let errs = errors_with(&s, ERR_IMPORT_NOT_EXPORTED);
    assert_eq!(errs.len(), 2);
    assert!(errs.iter().all(|e| e.file.ends_with("src/main.js")));
    assert!(errs.iter().all(|e| e.context.as_deref().is_some_and(|c| c.ends_with("lib.js"))));
    let identifiers: Vec<&str> = errs.iter().filter_map(|e| e.identifier.as_deref()).collect();
    assert_eq!(identifiers, vec!["b, c", "default"]);
}

#[test]
fn test_star_reexport_extends_surface() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/main.js", "import { x, y } from './index.js';\n");
    write(root, "src/index.js", "export * from './x.js';\nexport const y = 1;\n");
    write(root, "src/x.js", "export const x = 1;\nexport default 3;\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));
    assert!(s.errors.is_empty(), "{:?}", s.errors);

    let index = s.graph.lookup(&clean_path(&root.join("src/index.js"))).unwrap();
    let (names, open) = s.export_surface(index);
    assert!(!open);
    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["x", "y"]);
}

#[test]
fn test_unresolvable_import_fails_only_that_file() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import { ok } from './ok.js';\nimport { broken } from './broken.js';\n",
    );
    write(root, "src/ok.js", "export const ok = 1;\n");
    write(
        root,
        "src/broken.js",
        "import { nope } from './missing.js';\nService({})\nexport function Broken() {}\n",
    );
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));

    let broken = s.graph.lookup(&clean_path(&root.join("src/broken.js"))).unwrap();
    assert_eq!(s.graph.get(broken).state, FileState::Failed);
    assert!(s.registry.services.is_empty());
    let errs = errors_with(&s, ERR_IMPORT_RESOLUTION);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].identifier.as_deref(), Some("nope"));
    assert_eq!(errs[0].context.as_deref(), Some("./missing.js"));
    assert_eq!(s.graph.get(0).state, FileState::Compiled);
    // Imports of a failed file are not validated again.
    assert!(errors_with(&s, ERR_IMPORT_NOT_EXPORTED).is_empty());
}

#[test]
fn test_syntax_error_records_importer() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/main.js", "import './bad.js';\n");
    write(root, "src/bad.js", "export const = ;\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));
    let errs = errors_with(&s, ERR_SYNTAX);
    assert_eq!(errs.len(), 1);
    assert!(errs[0].importer.as_deref().is_some_and(|i| i.ends_with("main.js")));
}

#[test]
fn test_lazy_files_are_isolated_in_chunks() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/main.js",
        "import { shared } from './shared.js';\nexport function open() { return lazyload('./page.js'); }\n",
    );
    write(root, "src/shared.js", "export const shared = 1;\n");
    write(
        root,
        "src/page.js",
        "import { shared } from './shared.js';\nimport { part } from './part.js';\nexport const page = shared + part;\n",
    );
    write(root, "src/part.js", "export const part = 2;\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));
    assert!(s.errors.is_empty(), "{:?}", s.errors);

    let main: Vec<String> = s.graph.main_files().map(|r| r.key()).collect();
    assert_eq!(main.len(), 2);
    assert!(main.iter().all(|k| !k.ends_with("page.js") && !k.ends_with("part.js")));

    let roots = s.graph.chunk_roots();
    assert_eq!(roots.len(), 1);
    let root_id = *roots.iter().next().unwrap();
    let chunk: Vec<String> = s.graph.chunk_files(root_id).map(|r| r.key()).collect();
    assert_eq!(chunk.len(), 2);
    assert!(chunk[0].ends_with("page.js"));
    assert!(chunk[1].ends_with("part.js"));
    assert_eq!(
        s.graph.get(0).lazy_targets,
        vec![Some(clean_path(&root.join("src/page.js")))]
    );
}

#[test]
fn test_library_binds_packages_as_globals() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "node_modules/@loom/core/package.json",
        r#"{ "name": "@loom/core", "version": "1.2.0", "module": "index.js" }"#,
    );
    write(
        root,
        "node_modules/@loom/core/index.js",
        "export function bootstrap() {}\n",
    );
    write(
        root,
        "src/main.js",
        "import { bootstrap, missing } from '@loom/core';\n",
    );
    let mut s = session(root, true);
    s.compile_entry(&root.join("src/main.js"));

    assert_eq!(s.graph.len(), 1);
    let global = &s.registry.global_imports["@loom/core"];
    assert_eq!(global.alias, "loom_core");
    assert_eq!(global.global, "loom.core");
    assert_eq!(global.version.as_deref(), Some("1.2.0"));
    let errs = errors_with(&s, ERR_IMPORT_NOT_EXPORTED);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].identifier.as_deref(), Some("missing"));
}

#[test]
fn test_application_compiles_package_entries() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "node_modules/ui-kit/package.json",
        r#"{ "name": "ui-kit", "main": "index.js" }"#,
    );
    write(root, "node_modules/ui-kit/index.js", "export const Button = 1;\n");
    write(
        root,
        "node_modules/ui-kit/metadata.json",
        r#"{ "name": "ui-kit", "exports": ["Button"], "elements": { "Button": { "kind": "Element", "properties": [["selector", {"string": "ui-button"}]], "slots": [null] } } }"#,
    );
    write(root, "src/main.js", "import { Button } from 'ui-kit';\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));

    assert!(s.errors.is_empty(), "{:?}", s.errors);
    assert_eq!(s.graph.len(), 2);
    let external = s.graph.get(1);
    assert_eq!(external.state, FileState::CompiledExternal);
    assert_eq!(external.package.as_deref(), Some("ui-kit"));
    let button = s.registry.find_element("ui-button").unwrap();
    assert_eq!(button.external.as_deref(), Some("ui-kit"));
    assert_eq!(s.registry.slots("Button"), Some(&[None][..]));
}

#[test]
fn test_recompile_revalidates_importers() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/main.js", "import { a } from './lib.js';\n");
    let lib = write(root, "src/lib.js", "export const a = 1;\n");
    let mut s = session(root, false);
    s.compile_entry(&root.join("src/main.js"));
    assert!(s.errors.is_empty());

    fs::write(&lib, "export const b = 1;\n").unwrap();
    let id = s.recompile_file(&lib).unwrap();
    assert_eq!(id, 1);
    assert_eq!(errors_with(&s, ERR_IMPORT_NOT_EXPORTED).len(), 1);

    fs::write(&lib, "export const a = 1;\n").unwrap();
    s.recompile_file(&lib).unwrap();
    assert!(s.errors.is_empty(), "{:?}", s.errors);
}

#[test]
fn test_recompile_unknown_file() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path(), false);
    assert!(matches!(
        s.recompile_file(&dir.path().join("src/none.js")),
        Err(BuildError::UnknownFile(_))
    ));
}
