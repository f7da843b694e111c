#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_SYNTAX: &str = "E-SYNTAX";
pub const ERR_DUPLICATE_DECLARATION: &str = "E-DUPLICATE-DECLARATION";
pub const ERR_ANNOTATION_TARGET: &str = "E-ANNOTATION-TARGET";
pub const ERR_IMPORT_RESOLUTION: &str = "E-IMPORT-RESOLUTION";
pub const ERR_IMPORT_NOT_EXPORTED: &str = "E-IMPORT-NOT-EXPORTED";
pub const ERR_DUPLICATE_REGISTRATION: &str = "E-DUPLICATE-REGISTRATION";
pub const ERR_ELEMENT_SELECTOR: &str = "E-ELEMENT-SELECTOR";
pub const ERR_DI_UNRESOLVED: &str = "E-DI-UNRESOLVED";
pub const ERR_CIRCULAR_DEPENDENCY: &str = "E-CIRCULAR-DEPENDENCY";
pub const ERR_MODULE_OWNERSHIP: &str = "E-MODULE-OWNERSHIP";
pub const ERR_MODULE_UNRESOLVED: &str = "E-MODULE-UNRESOLVED";
pub const ERR_MODULE_CIRCULAR: &str = "E-MODULE-CIRCULAR";
pub const ERR_SELECTOR_UNRESOLVED: &str = "E-SELECTOR-UNRESOLVED";
pub const ERR_TEMPLATE_SOURCE: &str = "E-TEMPLATE-SOURCE";
pub const ERR_UNKNOWN_ELEMENT: &str = "E-UNKNOWN-ELEMENT";
pub const ERR_UNKNOWN_DIRECTIVE: &str = "E-UNKNOWN-DIRECTIVE";
pub const ERR_PIPE_UNRESOLVED: &str = "E-PIPE-UNRESOLVED";
pub const ERR_PLACE_UNRESOLVED: &str = "E-PLACE-UNRESOLVED";
pub const ERR_QUERY_UNRESOLVED: &str = "E-QUERY-UNRESOLVED";
pub const ERR_TEMPLATE_ID: &str = "E-TEMPLATE-ID";
pub const ERR_EXPRESSION: &str = "E-EXPRESSION";
pub const ERR_PROVIDER_NOT_EXPORTED: &str = "E-PROVIDER-NOT-EXPORTED";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_SYNTAX => "Every compiled file is syntactically valid JavaScript.",
        ERR_DUPLICATE_DECLARATION => "Top-level names are declared once per file.",
        ERR_ANNOTATION_TARGET => "Every annotation is attached to a function declaration.",
        ERR_IMPORT_RESOLUTION => "Every import specifier resolves to a file or a package.",
        ERR_IMPORT_NOT_EXPORTED => "Imported names exist in the target file's exports.",
        ERR_DUPLICATE_REGISTRATION => "One name is registered once per annotation kind.",
        ERR_ELEMENT_SELECTOR => "Element selectors follow the custom-element naming rule.",
        ERR_DI_UNRESOLVED => "Every injected dependency has a provider.",
        ERR_CIRCULAR_DEPENDENCY => "Dependency injection graphs are acyclic.",
        ERR_MODULE_OWNERSHIP => "Each service and selector belongs to exactly one module.",
        ERR_MODULE_UNRESOLVED => "Required modules are registered locally or by a package.",
        ERR_MODULE_CIRCULAR => "Required-module lists are acyclic.",
        ERR_SELECTOR_UNRESOLVED => "Module selectors name registered elements or directives.",
        ERR_TEMPLATE_SOURCE => "Element templates are readable.",
        ERR_UNKNOWN_ELEMENT => "Custom tags used in templates are registered elements.",
        ERR_UNKNOWN_DIRECTIVE => "Directives used in templates are registered.",
        ERR_PIPE_UNRESOLVED => "Template filters name registered pipes.",
        ERR_PLACE_UNRESOLVED => "Projected content is routed once the host compiles.",
        ERR_QUERY_UNRESOLVED => "View queries match a node in the element's template.",
        ERR_TEMPLATE_ID => "Structural directives reference existing templates.",
        ERR_EXPRESSION => "Template expressions are valid JavaScript expressions.",
        ERR_PROVIDER_NOT_EXPORTED => "Template providers are exported by their files.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// A file-scoped, recoverable diagnostic. The build continues past these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub importer: Option<String>,
    pub identifier: Option<String>,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: "COMPILER_ERROR".to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            importer: None,
            identifier: None,
            line: 0,
            column: 0,
            context: None,
            hints: vec![],
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_importer(mut self, importer: &str) -> Self {
        self.importer = Some(importer.to_string());
        self
    }

    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hints.push(hint.to_string());
        self
    }
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} ({}", self.code, self.message, self.file)?;
        if self.line > 0 {
            write!(f, ":{}:{}", self.line, self.column)?;
        }
        if let Some(importer) = &self.importer {
            write!(f, ", imported by {}", importer)?;
        }
        write!(f, ")")
    }
}

/// Converts a byte offset into a 1-based line/column pair.
pub fn line_col(source: &str, offset: u32) -> (u32, u32) {
    let offset = (offset as usize).min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() as u32 + 1;
    let column = match before.rfind('\n') {
        Some(nl) => (offset - nl) as u32,
        None => offset as u32 + 1,
    };
    (line, column)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-file collection of recoverable errors, keyed by the offending file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLog {
    entries: BTreeMap<String, Vec<CompilerError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompilerError) {
        let bucket = self.entries.entry(error.file.clone()).or_default();
        if !bucket.contains(&error) {
            bucket.push(error);
        }
    }

    pub fn extend<I: IntoIterator<Item = CompilerError>>(&mut self, errors: I) {
        for error in errors {
            self.push(error);
        }
    }

    pub fn for_file(&self, file: &str) -> &[CompilerError] {
        self.entries.get(file).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn clear_file(&mut self, file: &str) {
        self.entries.remove(file);
    }

    /// Drops every error carrying one of the given codes (used before a
    /// validation pass is re-run).
    pub fn clear_codes(&mut self, codes: &[&str]) {
        for bucket in self.entries.values_mut() {
            bucket.retain(|e| !codes.contains(&e.code.as_str()));
        }
        self.entries.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn clear_file_codes(&mut self, file: &str, codes: &[&str]) {
        if let Some(bucket) = self.entries.get_mut(file) {
            bucket.retain(|e| !codes.contains(&e.code.as_str()));
            if bucket.is_empty() {
                self.entries.remove(file);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompilerError> {
        self.entries.values().flatten()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.iter().any(|e| e.code == code)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emits the errors of one file through `tracing`.
    pub fn report_file(&self, file: &str) {
        for error in self.for_file(file) {
            tracing::error!("[LOOM] {}", error);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FATAL ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors that stop the whole build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("project manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("failed to parse project manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("project `{0}` is not defined in the manifest")]
    UnknownProject(String),

    #[error("project `{project}` has no resolvable entry: {entry}")]
    EntryUnresolved { project: String, entry: String },

    #[error("invalid entry pattern `{pattern}`: {reason}")]
    EntryPattern { pattern: String, reason: String },

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("file `{0}` is not part of any compiled target")]
    UnknownFile(PathBuf),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let src = "a\nbc\ndef";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 3), (2, 2));
        assert_eq!(line_col(src, 5), (3, 1));
    }

    #[test]
    fn test_error_log_dedupes_and_clears() {
        let mut log = ErrorLog::new();
        let err = CompilerError::new(ERR_DI_UNRESOLVED, "missing", "a.js");
        log.push(err.clone());
        log.push(err);
        log.push(CompilerError::new(ERR_SYNTAX, "bad", "b.js"));
        assert_eq!(log.len(), 2);

        log.clear_codes(&[ERR_DI_UNRESOLVED]);
        assert_eq!(log.len(), 1);
        assert!(log.for_file("a.js").is_empty());
        assert!(log.has_code(ERR_SYNTAX));
    }

    #[test]
    fn test_display_mentions_importer() {
        let err = CompilerError::new(ERR_IMPORT_RESOLUTION, "cannot resolve './x'", "b.js")
            .with_importer("a.js");
        let text = err.to_string();
        assert!(text.contains("E-IMPORT-RESOLUTION"));
        assert!(text.contains("imported by a.js"));
    }
}
