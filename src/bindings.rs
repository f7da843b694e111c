//! Node bindings for the build tooling.

use napi_derive::napi;
use serde_json::{json, Value};
use std::path::Path;

use crate::annotation::AnnotationDefinition;
use crate::codegen::TemplateEmitter;
use crate::compiler::{build_project, BuildReport};
use crate::registry::Registry;
use crate::template::{compile_template, TemplateOptions};

#[napi]
pub fn build_project_native(project_root: String, project: Option<String>) -> napi::Result<Value> {
    let report: BuildReport = build_project(Path::new(&project_root), project.as_deref())
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_value(&report)
        .map_err(|e| napi::Error::from_reason(format!("Cannot serialize build report: {}", e)))
}

/// Compiles one template against an empty registry, for editor previews.
/// `element` is a serialized element definition.
#[napi]
pub fn compile_template_native(
    markup: String,
    element: Value,
    asset_url: Option<String>,
) -> napi::Result<Value> {
    let def: AnnotationDefinition = serde_json::from_value(element)
        .map_err(|e| napi::Error::from_reason(format!("Invalid element definition: {}", e)))?;
    let options = TemplateOptions { asset_url };
    let compiled = compile_template(&markup, &def, &Registry::new(), &options);
    let (code, emit_errors) = TemplateEmitter::new(&compiled, &def.file).emit();
    let mut errors = compiled.errors.clone();
    errors.extend(emit_errors);
    Ok(json!({
        "code": code,
        "slots": compiled.slots,
        "errors": errors,
    }))
}

#[napi]
pub fn compile_bridge() -> String {
    format!("Loom Native Bridge {}", env!("CARGO_PKG_VERSION"))
}
