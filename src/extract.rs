//! Source AST Extractor
//!
//! Parses a JavaScript file with oxc and splits it into import descriptors,
//! export descriptors, annotation blocks, lazy-load call sites and the
//! top-level declarations index. Nothing here touches the filesystem.

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::annotation::{AnnotationKind, PropertyValue};
use crate::error::{
    line_col, CompilerError, ERR_ANNOTATION_TARGET, ERR_DUPLICATE_DECLARATION, ERR_SYNTAX,
};
use crate::resolve::ResolvedImport;

/// Callee that marks a deferred import.
pub const LAZYLOAD_FN: &str = "lazyload";

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: u32,
    pub end: u32,
}

impl TextSpan {
    pub fn new(start: u32, end: u32) -> Self {
        TextSpan { start, end }
    }

    pub fn slice<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start as usize..self.end as usize]
    }
}

impl From<oxc_span::Span> for TextSpan {
    fn from(span: oxc_span::Span) -> Self {
        TextSpan::new(span.start, span.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBinding {
    /// Exported name in the target (`default` for default imports).
    pub imported: String,
    pub local: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportOrigin {
    /// `import ... from`
    Import,
    /// `export { .. } from` / `export * from`
    ReExport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDescriptor {
    pub source: String,
    pub named: Vec<ImportBinding>,
    pub default_local: Option<String>,
    pub namespace_local: Option<String>,
    pub origin: ImportOrigin,
    pub span: TextSpan,
    #[serde(default)]
    pub resolved: Option<ResolvedImport>,
}

impl ImportDescriptor {
    /// Export names this import requires from its target.
    pub fn requested_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.iter().map(|b| b.imported.clone()).collect();
        if self.default_local.is_some() {
            names.push("default".to_string());
        }
        names
    }

    pub fn is_side_effect(&self) -> bool {
        self.named.is_empty() && self.default_local.is_none() && self.namespace_local.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDescriptor {
    pub local: String,
    pub exported: String,
    /// Import descriptor index for `export { x } from` / `export * from`.
    pub reexport_of: Option<usize>,
    /// `export * from` carries every name of its source.
    pub star: bool,
}

/// How an export statement is rewritten by the code generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatement {
    /// `export <declaration>`; the `export` keyword spans `[span.start, decl_start)`.
    Declaration { span: TextSpan, decl_start: u32 },
    /// `export { a, b as c }` with or without `from`; removed entirely.
    Specifiers { span: TextSpan },
    /// `export * from '...'`
    Star { span: TextSpan, import: usize },
    /// `export default <expression>`
    DefaultExpression {
        span: TextSpan,
        expression: TextSpan,
        identifier: Option<String>,
    },
    /// `export default function f() {}` / `export default class C {}`
    DefaultDeclaration {
        span: TextSpan,
        declaration: TextSpan,
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationBlock {
    pub kind: AnnotationKind,
    /// Declaring function name.
    pub name: String,
    pub properties: Vec<(String, PropertyValue)>,
    /// The `Keyword({...});` statement.
    pub call_span: TextSpan,
    /// Function declaration through the last folded assignment.
    pub implementation_span: TextSpan,
    pub exported: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LazyLoad {
    pub specifier: String,
    pub span: TextSpan,
}

/// Everything the later stages need from one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFile {
    pub source: String,
    pub imports: Vec<ImportDescriptor>,
    pub exports: Vec<ExportDescriptor>,
    pub export_statements: Vec<ExportStatement>,
    pub annotations: Vec<AnnotationBlock>,
    pub lazy_loads: Vec<LazyLoad>,
    pub declarations: BTreeSet<String>,
    /// Recoverable problems found while extracting.
    pub errors: Vec<CompilerError>,
}

impl ExtractedFile {
    pub fn annotation_implementation(&self, block: &AnnotationBlock) -> String {
        block.implementation_span.slice(&self.source).to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

fn module_source_type() -> SourceType {
    SourceType::default().with_module(true)
}

fn module_export_name(name: &ModuleExportName) -> String {
    #[allow(unreachable_patterns)]
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(s) => s.value.to_string(),
        _ => String::new(),
    }
}

/// Parse `source` and extract its module surface.
///
/// Fails with `E-SYNTAX` on malformed input and `E-DUPLICATE-DECLARATION`
/// when a top-level name is declared twice.
pub fn extract(source: &str, file_path: &str) -> Result<ExtractedFile, CompilerError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, module_source_type()).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .first()
            .map(|e| format!("{}", e))
            .unwrap_or_else(|| "unrecoverable parse failure".to_string());
        return Err(
            CompilerError::new(ERR_SYNTAX, &format!("Syntax error: {}", message), file_path)
                .with_hint("Fix the syntax error; other files continue to compile."),
        );
    }

    let program = ret.program;
    let mut out = ExtractedFile {
        source: source.to_string(),
        ..Default::default()
    };

    let mut declared = Declarations::new(file_path, source);
    let body: Vec<&Statement> = program.body.iter().collect();
    let mut i = 0;

    while i < body.len() {
        let stmt = body[i];

        if let Some((kind, call)) = annotation_call(stmt) {
            let call_span: TextSpan = stmt.span().into();
            match body.get(i + 1).and_then(|next| annotated_function(next)) {
                Some((func_name, exported)) => {
                    let impl_start = body[i + 1].span().start;
                    let mut impl_end = body[i + 1].span().end;
                    let mut j = i + 2;
                    while j < body.len() && is_static_attachment(body[j], &func_name) {
                        impl_end = body[j].span().end;
                        j += 1;
                    }

                    declared.add(&func_name, body[i + 1].span().start)?;
                    if exported {
                        out.exports.push(ExportDescriptor {
                            local: func_name.clone(),
                            exported: func_name.clone(),
                            reexport_of: None,
                            star: false,
                        });
                        if let Statement::ExportNamedDeclaration(decl) = body[i + 1] {
                            if let Some(inner) = &decl.declaration {
                                out.export_statements.push(ExportStatement::Declaration {
                                    span: decl.span.into(),
                                    decl_start: inner.span().start,
                                });
                            }
                        }
                    }

                    out.annotations.push(AnnotationBlock {
                        kind,
                        name: func_name,
                        properties: annotation_properties(call, source),
                        call_span,
                        implementation_span: TextSpan::new(impl_start, impl_end),
                        exported,
                    });
                    i = j;
                    continue;
                }
                None => {
                    let (line, column) = line_col(source, call_span.start);
                    out.errors.push(
                        CompilerError::new(
                            ERR_ANNOTATION_TARGET,
                            &format!(
                                "{} annotation must be followed by a function declaration",
                                kind
                            ),
                            file_path,
                        )
                        .at(line, column),
                    );
                }
            }
        }

        collect_statement(stmt, source, &mut out, &mut declared)?;
        i += 1;
    }

    let mut lazy = LazyLoadCollector { found: Vec::new() };
    lazy.visit_program(&program);
    out.lazy_loads = lazy.found;

    out.declarations = declared.names;
    Ok(out)
}

/// `Keyword({...});` where `Keyword` is an annotation keyword.
fn annotation_call<'s, 'a>(stmt: &'s Statement<'a>) -> Option<(AnnotationKind, &'s CallExpression<'a>)> {
    if let Statement::ExpressionStatement(expr_stmt) = stmt {
        if let Expression::CallExpression(call) = &expr_stmt.expression {
            if let Expression::Identifier(ident) = &call.callee {
                if let Some(kind) = AnnotationKind::from_keyword(ident.name.as_str()) {
                    return Some((kind, call));
                }
            }
        }
    }
    None
}

/// Function declaration (optionally exported) that an annotation attaches to.
fn annotated_function(stmt: &Statement) -> Option<(String, bool)> {
    match stmt {
        Statement::FunctionDeclaration(func) => {
            func.id.as_ref().map(|id| (id.name.to_string(), false))
        }
        Statement::ExportNamedDeclaration(decl) => match &decl.declaration {
            Some(Declaration::FunctionDeclaration(func)) => {
                func.id.as_ref().map(|id| (id.name.to_string(), true))
            }
            _ => None,
        },
        _ => None,
    }
}

/// `Fn.x = ...` or `Fn.prototype.x = ...` targeting the annotated function.
fn is_static_attachment(stmt: &Statement, func_name: &str) -> bool {
    if let Statement::ExpressionStatement(expr_stmt) = stmt {
        if let Expression::AssignmentExpression(assign) = &expr_stmt.expression {
            let object = match &assign.left {
                AssignmentTarget::StaticMemberExpression(member) => &member.object,
                AssignmentTarget::ComputedMemberExpression(member) => &member.object,
                _ => return false,
            };
            return root_identifier(object).is_some_and(|name| name == func_name);
        }
    }
    false
}

fn root_identifier<'s>(expr: &'s Expression) -> Option<&'s str> {
    match expr {
        Expression::Identifier(ident) => Some(ident.name.as_str()),
        Expression::StaticMemberExpression(member) => root_identifier(&member.object),
        Expression::ComputedMemberExpression(member) => root_identifier(&member.object),
        _ => None,
    }
}

fn annotation_properties(call: &CallExpression, source: &str) -> Vec<(String, PropertyValue)> {
    match call.arguments.first().and_then(|arg| arg.as_expression()) {
        Some(expr) => match property_value(expr, source) {
            PropertyValue::Object(entries) => entries,
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

/// Converts an object-literal value into a [`PropertyValue`] tree.
pub fn property_value(expr: &Expression, source: &str) -> PropertyValue {
    match expr {
        Expression::StringLiteral(s) => PropertyValue::String(s.value.to_string()),
        Expression::TemplateLiteral(t) if t.expressions.is_empty() => {
            let text = t
                .quasis
                .first()
                .map(|q| {
                    q.value
                        .cooked
                        .as_ref()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| q.value.raw.to_string())
                })
                .unwrap_or_default();
            PropertyValue::String(text)
        }
        Expression::NumericLiteral(n) => PropertyValue::Number(n.value),
        Expression::BooleanLiteral(b) => PropertyValue::Bool(b.value),
        Expression::NullLiteral(_) => PropertyValue::Null,
        Expression::Identifier(ident) => PropertyValue::Identifier(ident.name.to_string()),
        Expression::ArrayExpression(arr) => PropertyValue::Array(
            arr.elements
                .iter()
                .map(|el| match el.as_expression() {
                    Some(e) => property_value(e, source),
                    None => PropertyValue::Raw(TextSpan::from(el.span()).slice(source).to_string()),
                })
                .collect(),
        ),
        Expression::ObjectExpression(obj) => {
            let mut entries = Vec::new();
            for prop in &obj.properties {
                if let ObjectPropertyKind::ObjectProperty(p) = prop {
                    let key = match &p.key {
                        PropertyKey::StaticIdentifier(id) => id.name.to_string(),
                        PropertyKey::StringLiteral(s) => s.value.to_string(),
                        other => TextSpan::from(other.span()).slice(source).to_string(),
                    };
                    entries.push((key, property_value(&p.value, source)));
                }
            }
            PropertyValue::Object(entries)
        }
        other => PropertyValue::Raw(TextSpan::from(other.span()).slice(source).to_string()),
    }
}

fn collect_statement(
    stmt: &Statement,
    source: &str,
    out: &mut ExtractedFile,
    declared: &mut Declarations,
) -> Result<(), CompilerError> {
    match stmt {
        Statement::ImportDeclaration(decl) => {
            let mut descriptor = ImportDescriptor {
                source: decl.source.value.to_string(),
                named: Vec::new(),
                default_local: None,
                namespace_local: None,
                origin: ImportOrigin::Import,
                span: decl.span.into(),
                resolved: None,
            };
            if let Some(specifiers) = &decl.specifiers {
                for specifier in specifiers {
                    match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            declared.add(s.local.name.as_str(), s.span.start)?;
                            descriptor.named.push(ImportBinding {
                                imported: module_export_name(&s.imported),
                                local: s.local.name.to_string(),
                            });
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            declared.add(s.local.name.as_str(), s.span.start)?;
                            descriptor.default_local = Some(s.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            declared.add(s.local.name.as_str(), s.span.start)?;
                            descriptor.namespace_local = Some(s.local.name.to_string());
                        }
                    }
                }
            }
            out.imports.push(descriptor);
        }

        Statement::ExportNamedDeclaration(decl) => {
            if let Some(inner) = &decl.declaration {
                for name in declaration_names(inner) {
                    declared.add(&name, inner.span().start)?;
                    out.exports.push(ExportDescriptor {
                        local: name.clone(),
                        exported: name,
                        reexport_of: None,
                        star: false,
                    });
                }
                out.export_statements.push(ExportStatement::Declaration {
                    span: decl.span.into(),
                    decl_start: inner.span().start,
                });
                return Ok(());
            }

            let reexport_of = decl.source.as_ref().map(|src| {
                out.imports.push(ImportDescriptor {
                    source: src.value.to_string(),
                    named: decl
                        .specifiers
                        .iter()
                        .map(|s| {
                            let local = module_export_name(&s.local);
                            ImportBinding {
                                imported: local.clone(),
                                local,
                            }
                        })
                        .collect(),
                    default_local: None,
                    namespace_local: None,
                    origin: ImportOrigin::ReExport,
                    span: decl.span.into(),
                    resolved: None,
                });
                out.imports.len() - 1
            });

            for specifier in &decl.specifiers {
                out.exports.push(ExportDescriptor {
                    local: module_export_name(&specifier.local),
                    exported: module_export_name(&specifier.exported),
                    reexport_of,
                    star: false,
                });
            }
            out.export_statements.push(ExportStatement::Specifiers {
                span: decl.span.into(),
            });
        }

        Statement::ExportAllDeclaration(decl) => {
            out.imports.push(ImportDescriptor {
                source: decl.source.value.to_string(),
                named: Vec::new(),
                default_local: None,
                namespace_local: decl.exported.as_ref().map(module_export_name),
                origin: ImportOrigin::ReExport,
                span: decl.span.into(),
                resolved: None,
            });
            let import = out.imports.len() - 1;
            match &decl.exported {
                Some(name) => {
                    let exported = module_export_name(name);
                    out.exports.push(ExportDescriptor {
                        local: exported.clone(),
                        exported,
                        reexport_of: Some(import),
                        star: false,
                    });
                    out.export_statements.push(ExportStatement::Specifiers {
                        span: decl.span.into(),
                    });
                }
                None => {
                    out.exports.push(ExportDescriptor {
                        local: "*".to_string(),
                        exported: "*".to_string(),
                        reexport_of: Some(import),
                        star: true,
                    });
                    out.export_statements.push(ExportStatement::Star {
                        span: decl.span.into(),
                        import,
                    });
                }
            }
        }

        Statement::ExportDefaultDeclaration(decl) => {
            out.exports.push(ExportDescriptor {
                local: "default".to_string(),
                exported: "default".to_string(),
                reexport_of: None,
                star: false,
            });
            let inner_span: TextSpan = decl.declaration.span().into();
            match &decl.declaration {
                ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                    let name = func.id.as_ref().map(|id| id.name.to_string());
                    if let Some(name) = &name {
                        declared.add(name, inner_span.start)?;
                    }
                    out.export_statements.push(ExportStatement::DefaultDeclaration {
                        span: decl.span.into(),
                        declaration: inner_span,
                        name,
                    });
                }
                ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                    let name = class.id.as_ref().map(|id| id.name.to_string());
                    if let Some(name) = &name {
                        declared.add(name, inner_span.start)?;
                    }
                    out.export_statements.push(ExportStatement::DefaultDeclaration {
                        span: decl.span.into(),
                        declaration: inner_span,
                        name,
                    });
                }
                ExportDefaultDeclarationKind::Identifier(ident) => {
                    out.export_statements.push(ExportStatement::DefaultExpression {
                        span: decl.span.into(),
                        expression: inner_span,
                        identifier: Some(ident.name.to_string()),
                    });
                }
                _ => {
                    out.export_statements.push(ExportStatement::DefaultExpression {
                        span: decl.span.into(),
                        expression: inner_span,
                        identifier: None,
                    });
                }
            }
        }

        Statement::FunctionDeclaration(func) => {
            if let Some(id) = &func.id {
                declared.add(id.name.as_str(), func.span.start)?;
            }
        }

        Statement::ClassDeclaration(class) => {
            if let Some(id) = &class.id {
                declared.add(id.name.as_str(), class.span.start)?;
            }
        }

        Statement::VariableDeclaration(var) => {
            for d in &var.declarations {
                if let BindingPattern::BindingIdentifier(id) = &d.id {
                    declared.add(id.name.as_str(), d.span.start)?;
                }
            }
        }

        _ => {}
    }
    Ok(())
}

fn declaration_names(decl: &Declaration) -> Vec<String> {
    match decl {
        Declaration::VariableDeclaration(var) => var
            .declarations
            .iter()
            .filter_map(|d| match &d.id {
                BindingPattern::BindingIdentifier(id) => Some(id.name.to_string()),
                _ => None,
            })
            .collect(),
        Declaration::FunctionDeclaration(func) => {
            func.id.iter().map(|id| id.name.to_string()).collect()
        }
        Declaration::ClassDeclaration(class) => {
            class.id.iter().map(|id| id.name.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

/// Top-level declarations index.
struct Declarations<'s> {
    names: BTreeSet<String>,
    file_path: &'s str,
    source: &'s str,
}

impl<'s> Declarations<'s> {
    fn new(file_path: &'s str, source: &'s str) -> Self {
        Declarations {
            names: BTreeSet::new(),
            file_path,
            source,
        }
    }

    fn add(&mut self, name: &str, offset: u32) -> Result<(), CompilerError> {
        if !self.names.insert(name.to_string()) {
            let (line, column) = line_col(self.source, offset);
            return Err(CompilerError::new(
                ERR_DUPLICATE_DECLARATION,
                &format!("Identifier '{}' has already been declared", name),
                self.file_path,
            )
            .at(line, column)
            .with_identifier(name));
        }
        Ok(())
    }
}

struct LazyLoadCollector {
    found: Vec<LazyLoad>,
}

impl<'a> Visit<'a> for LazyLoadCollector {
    fn visit_call_expression(&mut self, expr: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &expr.callee {
            if ident.name == LAZYLOAD_FN {
                if let Some(Argument::StringLiteral(s)) = expr.arguments.first() {
                    self.found.push(LazyLoad {
                        specifier: s.value.to_string(),
                        span: expr.span.into(),
                    });
                    return;
                }
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, expr);
    }
}

/// Whether `source` parses as an ES module without errors.
pub fn is_parsable_module(source: &str) -> bool {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, module_source_type()).parse();
    !ret.panicked && ret.errors.is_empty()
}

#[cfg(test)]
#[path = "extract_tests.rs"]
mod tests;
