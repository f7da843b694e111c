//! # Loom Compiler
//!
//! Ahead-of-time compiler for annotation-driven component applications and
//! libraries. A build walks the import graph from each entry file, registers
//! `Element`/`Directive`/`Pipe`/`Service`/`Provider`/`Module` definitions,
//! validates their dependency and module wiring, compiles element templates
//! to a render-tree literal, and rewrites every module into the
//! `function (exports, __required)` shape the loader runtime executes.
//!
//! ## Pipeline
//!
//! 1. **Extract** (`extract`): one oxc parse per file yields imports, exports,
//!    annotation blocks and `lazyload()` call sites.
//! 2. **Graph** (`graph`): resolution, export closure checks, lazy chunk
//!    assignment and package metadata loading.
//! 3. **Wiring** (`wiring`): dependency cycles, unresolved tokens and
//!    exclusive module ownership.
//! 4. **Templates** (`template`): html5ever parse, directive matching,
//!    expression qualification, projection routing and queries.
//! 5. **Codegen** (`codegen`, `bundle`): module bodies, annotation objects,
//!    library bundles or application chunks, written through a content-hash
//!    cache.
//!
//! Errors local to one file never abort the build; they are collected per
//! file and reported alongside the artifacts.

pub mod annotation;
pub mod bundle;
pub mod cache;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod expression;
pub mod extract;
pub mod graph;
pub mod parse;
pub mod registry;
pub mod resolve;
pub mod selector;
pub mod static_eval;
pub mod template;
pub mod visitor;
pub mod wiring;

#[cfg(feature = "napi")]
mod bindings;

pub use compiler::{build_project, BuildReport, ChangeKind, Compiler, Target, TargetReport};
pub use config::{Manifest, ProjectConfig};
pub use error::{BuildError, CompilerError, ErrorLog};
pub use registry::{LibraryMetadata, Registry};
pub use static_eval::render_template;
pub use template::{compile_template, CompiledTemplate, TemplateOptions};

#[cfg(feature = "napi")]
pub use bindings::{build_project_native, compile_bridge, compile_template_native};
