//! Bundle assembly.
//!
//! Wraps generated module bodies into the loader runtime and produces the
//! artifacts of a target: `MODULE`/`UMD` library bundles (plus an optional
//! minified UMD with a source map), application bootstraps and lazy chunks,
//! the aggregated style loader, the injected HTML shell and `package.json`.

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::annotation::js_string;
use crate::cache::OutputCache;
use crate::codegen::{GeneratedModule, REQUIRE_FN};
use crate::config::BundlePattern;
use crate::error::BuildError;
use crate::graph::{FileGraph, FileId};
use crate::registry::GlobalImport;

/// Global the application bootstrap publishes its loader under for chunks.
pub const LOADER_GLOBAL: &str = "__loomRequired";
pub const STYLES_FILE: &str = "styles.js";
pub const METADATA_FILE: &str = "metadata.json";
pub const PACKAGE_FILE: &str = "package.json";
pub const BUNDLES_DIR: &str = "bundles";

const TABLE_SLOT: &str = "__LOOM_MODULE_TABLE__";

const RUNTIME: &str = r#"var __modules = __LOOM_MODULE_TABLE__;
var __cache = {};
var __pending = {};
function __required(id, name) {
  var exports = __cache[id];
  if (!exports) {
    var factory = __modules[id];
    if (!factory) {
      throw new Error('[loom] module ' + id + ' is not loaded');
    }
    exports = __cache[id] = {};
    factory(exports, __required);
  }
  return name === undefined ? exports : exports[name];
}
__required.r = function (exports, name, get) {
  Object.defineProperty(exports, name, { enumerable: true, configurable: true, get: get });
};
__required.e = function (exports, source) {
  Object.keys(source).forEach(function (key) {
    if (key !== 'default' && !Object.prototype.hasOwnProperty.call(exports, key)) {
      __required.r(exports, key, function () { return source[key]; });
    }
  });
};
__required.base = '';
__required.c = function (chunkId, modules, deps) {
  Object.keys(modules).forEach(function (id) { __modules[id] = modules[id]; });
  var pending = __pending[chunkId];
  if (pending) {
    Promise.all(deps.map(__required.l)).then(function () {
      pending.resolve(__required(chunkId));
    }, pending.reject);
  }
};
__required.l = function (chunkId) {
  if (__modules[chunkId]) {
    return Promise.resolve(__required(chunkId));
  }
  if (!__pending[chunkId]) {
    var entry = __pending[chunkId] = {};
    entry.promise = new Promise(function (resolve, reject) {
      entry.resolve = resolve;
      entry.reject = reject;
      var script = document.createElement('script');
      script.src = __required.base + 'chunk-' + chunkId + '.js';
      script.onerror = function () {
        reject(new Error('[loom] failed to load chunk ' + chunkId));
      };
      document.head.appendChild(script);
    });
  }
  return __pending[chunkId].promise;
};"#;

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// `{ id: function (exports, __required) { ... }, ... }` in id order.
pub fn module_table<'m, I>(modules: I) -> String
where
    I: IntoIterator<Item = &'m GeneratedModule>,
{
    let mut sorted: Vec<&GeneratedModule> = modules.into_iter().collect();
    sorted.sort_by_key(|m| m.id);
    if sorted.is_empty() {
        return "{}".to_string();
    }
    let entries: Vec<String> = sorted
        .iter()
        .map(|m| format!("{}: {}", m.id, m.code))
        .collect();
    format!("{{\n{}\n}}", entries.join(",\n"))
}

/// Loader runtime over `table`.
pub fn runtime(table: &str) -> String {
    RUNTIME.replace(TABLE_SLOT, table)
}

/// Chunks that files of chunk `root` import from.
pub fn chunk_dependencies(graph: &FileGraph, root: FileId) -> BTreeSet<FileId> {
    graph
        .chunk_files(root)
        .flat_map(|r| r.import_targets.iter().flatten())
        .filter_map(|&t| graph.get(t).lazy_root)
        .filter(|&r| r != root)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIBRARY BUNDLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Inputs shared by the library bundle patterns.
pub struct LibraryBundle<'a> {
    pub name: &'a str,
    /// Dotted global the UMD browser branch assigns the library to.
    pub global: &'a str,
    pub table: &'a str,
    pub entry: FileId,
    /// Export surface of the entry file.
    pub exports: &'a BTreeSet<String>,
    pub packages: Vec<&'a GlobalImport>,
}

impl LibraryBundle<'_> {
    pub fn file_name(&self, pattern: BundlePattern) -> String {
        match pattern {
            BundlePattern::Module => format!("{}-module.js", self.name),
            BundlePattern::Umd => format!("{}-umd.js", self.name),
        }
    }

    pub fn render(&self, pattern: BundlePattern) -> String {
        match pattern {
            BundlePattern::Module => self.module(),
            BundlePattern::Umd => self.umd(),
        }
    }

    /// ES module pattern: package imports, the loader, named re-exports.
    pub fn module(&self) -> String {
        let mut out = String::new();
        for package in &self.packages {
            out.push_str(&format!(
                "import * as {} from {};\n",
                package.alias,
                js_string(&package.package)
            ));
        }
        out.push_str(&runtime(self.table));
        out.push_str(&format!("\nvar __entry = {}({});\n", REQUIRE_FN, self.entry));
        for name in self.exports {
            if name == "default" {
                out.push_str("export default __entry['default'];\n");
            } else if oxc_syntax::identifier::is_identifier_name(name) {
                out.push_str(&format!("export var {} = __entry.{};\n", name, name));
            }
        }
        out
    }

    /// Universal pattern: CommonJS, AMD and browser-global branches.
    pub fn umd(&self) -> String {
        let requires: Vec<String> = self
            .packages
            .iter()
            .map(|p| format!("require({})", js_string(&p.package)))
            .collect();
        let amd: Vec<String> = std::iter::once("'exports'".to_string())
            .chain(self.packages.iter().map(|p| js_string(&p.package)))
            .collect();
        let globals: Vec<String> = self
            .packages
            .iter()
            .map(|p| format!("global.{}", p.global))
            .collect();
        let params: Vec<&str> = std::iter::once("exports")
            .chain(self.packages.iter().map(|p| p.alias.as_str()))
            .collect();

        let with_leading = |items: &[String]| {
            items.iter().map(|i| format!(", {}", i)).collect::<String>()
        };

        format!(
            "(function (global, factory) {{\n  typeof exports === 'object' && typeof module !== 'undefined' ? factory(exports{cjs}) :\n  typeof define === 'function' && define.amd ? define([{amd}], factory) :\n  (global = typeof globalThis !== 'undefined' ? globalThis : global || self, factory({target}{globals}));\n}})(this, function ({params}) {{\n'use strict';\n{runtime}\nvar __entry = {require}({entry});\nObject.keys(__entry).forEach(function (key) {{ exports[key] = __entry[key]; }});\n}});\n",
            cjs = with_leading(&requires),
            amd = amd.join(", "),
            target = global_assignment(self.global),
            globals = with_leading(&globals),
            params = params.join(", "),
            runtime = runtime(self.table),
            require = REQUIRE_FN,
            entry = self.entry,
        )
    }
}

/// `(global.a = global.a || {}, global.a.b = {})` for `a.b`.
pub fn global_assignment(dotted: &str) -> String {
    let parts: Vec<&str> = dotted.split('.').filter(|p| !p.is_empty()).collect();
    let mut steps = Vec::new();
    for i in 0..parts.len() {
        let path = format!("global.{}", parts[..=i].join("."));
        if i + 1 == parts.len() {
            steps.push(format!("{} = {{}}", path));
        } else {
            steps.push(format!("{} = {} || {{}}", path, path));
        }
    }
    format!("({})", steps.join(", "))
}

/// Minified code plus its source map JSON.
pub struct Minified {
    pub code: String,
    pub map: Option<String>,
}

/// Whitespace-level minification of a finished bundle.
pub fn minify(code: &str, file_name: &str, source_map: bool) -> Option<Minified> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::default()).parse();
    if ret.panicked || !ret.errors.is_empty() {
        warn!(
            "[LOOM] cannot minify {}: {}",
            file_name,
            ret.errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_default()
        );
        return None;
    }
    let options = CodegenOptions {
        minify: true,
        source_map_path: source_map.then(|| PathBuf::from(file_name)),
        ..CodegenOptions::default()
    };
    let out = Codegen::new().with_options(options).build(&ret.program);
    let map = out.map.map(|m| m.to_json_string());
    let mut code = out.code;
    if map.is_some() {
        code.push_str(&format!("\n//# sourceMappingURL={}.map", file_name));
    }
    Some(Minified { code, map })
}

/// `package.json` of a library build: existing fields kept, bundle entry
/// points set, peer dependencies inferred from the package imports.
pub fn package_json(
    existing: Option<Value>,
    name: &str,
    bundle: &LibraryBundle,
    patterns: &[BundlePattern],
    generate_meta: bool,
) -> Value {
    let mut root = match existing {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    root.entry("name").or_insert_with(|| json!(name));
    for pattern in patterns {
        let key = match pattern {
            BundlePattern::Module => "module",
            BundlePattern::Umd => "main",
        };
        root.insert(
            key.to_string(),
            json!(format!("{}/{}", BUNDLES_DIR, bundle.file_name(*pattern))),
        );
    }
    if generate_meta {
        root.insert("metadata".to_string(), json!(METADATA_FILE));
    }

    let peers = root
        .entry("peerDependencies")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(peers) = peers {
        for package in &bundle.packages {
            let range = package
                .version
                .as_deref()
                .map(|v| format!("^{}", v))
                .unwrap_or_else(|| "*".to_string());
            peers.entry(package.package.clone()).or_insert(json!(range));
        }
    }
    Value::Object(root)
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Main bootstrap: the loader over the main table, then the entry module.
pub fn application_bootstrap(table: &str, entry: FileId) -> String {
    format!(
        "(function (global) {{\n'use strict';\n{runtime}\nvar current = typeof document !== 'undefined' && document.currentScript;\nif (current && current.src) {{\n  {require}.base = current.src.slice(0, current.src.lastIndexOf('/') + 1);\n}}\nglobal.{loader} = {require};\n{require}({entry});\n}})(typeof window !== 'undefined' ? window : this);\n",
        runtime = runtime(table),
        require = REQUIRE_FN,
        loader = LOADER_GLOBAL,
        entry = entry,
    )
}

/// `chunk-<root>.js` body registering its modules with the loader.
pub fn chunk_file(root: FileId, table: &str, deps: &BTreeSet<FileId>) -> String {
    let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
    format!(
        "{}.c({}, {}, [{}]);\n",
        LOADER_GLOBAL,
        root,
        table,
        deps.join(", ")
    )
}

pub fn chunk_file_name(root: FileId) -> String {
    format!("chunk-{}.js", root)
}

/// Style loader appending `(name, css)` sheets in order.
pub fn styles_js(sheets: &[(String, String)]) -> String {
    let css: Vec<String> = sheets
        .iter()
        .map(|(name, text)| format!("/* {} */\n{}", name.replace("*/", "* /"), text.trim()))
        .collect();
    format!(
        "(function () {{\n  if (typeof document === 'undefined') return;\n  var style = document.createElement('style');\n  style.setAttribute('data-loom', '');\n  style.textContent = {};\n  document.head.appendChild(style);\n}})();\n",
        js_string(&css.join("\n"))
    )
}

/// Adds `<script>` tags before `</body>`, or at the end when there is none.
pub fn inject_scripts(html: &str, scripts: &[String]) -> String {
    let tags: String = scripts
        .iter()
        .map(|s| format!("  <script src=\"{}\"></script>\n", s))
        .collect();
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], tags, &html[pos..]),
        None => format!("{}\n{}", html.trim_end(), tags),
    }
}

/// Copies asset files and folders (relative to `source_root`) into `out_dir`.
pub fn copy_assets(
    source_root: &Path,
    assets: &[String],
    out_dir: &Path,
    cache: &mut OutputCache,
) -> Result<usize, BuildError> {
    let mut written = 0;
    for asset in assets {
        let base = source_root.join(asset);
        if !base.exists() {
            warn!("[LOOM] asset {} does not exist", base.display());
            continue;
        }
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(source_root) else {
                continue;
            };
            let bytes = fs::read(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;
            if cache.write(&out_dir.join(relative), &bytes)? {
                written += 1;
            }
        }
    }
    Ok(written)
}
