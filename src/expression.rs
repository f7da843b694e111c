//! Template expression compilation.
//!
//! Template expressions are evaluated against a context object. Free
//! identifiers are qualified as `ctx.<name>`; names bound inside the
//! expression (arrow parameters), `$event` and well-known globals are left
//! alone. Filters (`expr|pipe:arg`) are split off before parsing.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    ArrowFunctionExpression, BindingIdentifier, Function, IdentifierReference, ObjectProperty,
    PropertyKind,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::scope::ScopeFlags;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const CONTEXT_PARAM: &str = "ctx";
pub const EVENT_PARAM: &str = "$event";

lazy_static! {
    pub static ref TEMPLATE_GLOBALS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("Math");
        s.insert("console");
        s.insert("JSON");
        s.insert("Date");
        s.insert("String");
        s.insert("Number");
        s.insert("Boolean");
        s.insert("Array");
        s.insert("Object");
        s.insert("Promise");
        s.insert("Error");
        s.insert("undefined");
        s.insert("NaN");
        s.insert("Infinity");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("isNaN");
        s.insert("encodeURIComponent");
        s.insert("window");
        s.insert("document");
        s.insert("this");
        s.insert(CONTEXT_PARAM);
        s.insert(EVENT_PARAM);
        s
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Name used in markup.
    pub name: String,
    /// Registered pipe function, filled in by the template compiler.
    pub pipe: Option<String>,
    pub args: Vec<String>,
}

/// A compiled template expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    /// Source text without filters or one-time marker.
    pub source: String,
    /// Qualified JavaScript expression over `ctx`.
    pub code: String,
    pub filters: Vec<Filter>,
    /// `${:expr}` bindings are evaluated once.
    pub once: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionError {
    pub message: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUALIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Names bound by one function scope. Frame 0 is the expression itself.
#[derive(Default)]
struct Frame {
    parent: Option<usize>,
    bindings: HashSet<String>,
}

/// References carry the frame they were seen in; they resolve after the walk
/// so hoisted declarations bind earlier uses.
struct Qualifier {
    frames: Vec<Frame>,
    current: usize,
    references: Vec<(u32, u32, String, usize)>,
    shorthands: Vec<(u32, u32, String, usize)>,
}

impl<'a> Visit<'a> for Qualifier {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        self.references.push((
            ident.span.start,
            ident.span.end,
            ident.name.to_string(),
            self.current,
        ));
    }

    fn visit_binding_identifier(&mut self, ident: &BindingIdentifier<'a>) {
        self.frames[self.current]
            .bindings
            .insert(ident.name.to_string());
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        if let Some(id) = &func.id {
            self.visit_binding_identifier(id);
        }
        self.push_frame();
        oxc_ast_visit::walk::walk_function(self, func, flags);
        self.pop_frame();
    }

    fn visit_arrow_function_expression(&mut self, arrow: &ArrowFunctionExpression<'a>) {
        self.push_frame();
        oxc_ast_visit::walk::walk_arrow_function_expression(self, arrow);
        self.pop_frame();
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        if prop.shorthand && prop.kind == PropertyKind::Init {
            if let oxc_ast::ast::Expression::Identifier(ident) = &prop.value {
                self.shorthands.push((
                    prop.span.start,
                    prop.span.end,
                    ident.name.to_string(),
                    self.current,
                ));
                return;
            }
        }
        oxc_ast_visit::walk::walk_object_property(self, prop);
    }
}

impl Qualifier {
    fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
            current: 0,
            references: Vec::new(),
            shorthands: Vec::new(),
        }
    }

    fn push_frame(&mut self) {
        self.frames.push(Frame {
            parent: Some(self.current),
            bindings: HashSet::new(),
        });
        self.current = self.frames.len() - 1;
    }

    fn pop_frame(&mut self) {
        if let Some(parent) = self.frames[self.current].parent {
            self.current = parent;
        }
    }

    fn is_free(&self, name: &str, frame: usize) -> bool {
        if TEMPLATE_GLOBALS.contains(name) {
            return false;
        }
        let mut at = Some(frame);
        while let Some(index) = at {
            if self.frames[index].bindings.contains(name) {
                return false;
            }
            at = self.frames[index].parent;
        }
        true
    }

    /// Applies the collected replacements to `code`.
    fn rewrite(&self, code: &str, offset: u32) -> String {
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for (start, end, name, frame) in &self.references {
            if self.is_free(name, *frame) {
                edits.push((
                    (start - offset) as usize,
                    (end - offset) as usize,
                    format!("{}.{}", CONTEXT_PARAM, name),
                ));
            }
        }
        for (start, end, name, frame) in &self.shorthands {
            let value = if self.is_free(name, *frame) {
                format!("{}.{}", CONTEXT_PARAM, name)
            } else {
                name.clone()
            };
            edits.push((
                (start - offset) as usize,
                (end - offset) as usize,
                format!("{}: {}", name, value),
            ));
        }
        edits.sort_by_key(|(start, _, _)| *start);

        let mut out = String::with_capacity(code.len() + edits.len() * 4);
        let mut last = 0;
        for (start, end, text) in edits {
            out.push_str(&code[last..start]);
            out.push_str(&text);
            last = end;
        }
        out.push_str(&code[last..]);
        out
    }
}

/// Qualifies the free identifiers of a single expression.
pub fn qualify_expression(code: &str) -> Result<String, ExpressionError> {
    let allocator = Allocator::default();
    let expr = Parser::new(&allocator, code, SourceType::default())
        .parse_expression()
        .map_err(|errors| ExpressionError {
            message: errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "invalid expression".to_string()),
        })?;
    let mut q = Qualifier::new();
    q.visit_expression(&expr);
    Ok(q.rewrite(code, 0))
}

/// Qualifies an event handler, which may hold several statements.
pub fn qualify_handler(code: &str) -> Result<String, ExpressionError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::default()).parse();
    if ret.panicked || !ret.errors.is_empty() {
        return Err(ExpressionError {
            message: ret
                .errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "invalid handler".to_string()),
        });
    }
    let mut q = Qualifier::new();
    q.visit_program(&ret.program);
    Ok(q.rewrite(code, 0))
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILTERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Splits `text` on `sep` outside strings and brackets. `||` never splits.
fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' | b'`' => quote = Some(c),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'|' if sep == b'|' && bytes.get(i + 1) == Some(&b'|') => {
                i += 2;
                continue;
            }
            b'|' if sep == b'|' && i > 0 && bytes[i - 1] == b'|' => {}
            _ if c == sep && depth == 0 => {
                // `a ? b : c` is not a filter argument separator.
                if sep == b':' && text[..i].contains('?') {
                    i += 1;
                    continue;
                }
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&text[start..]);
    parts
}

/// Compiles `expr|pipe:arg` text. A leading `:` marks a one-time binding.
pub fn compile_expression(text: &str) -> Result<Expression, ExpressionError> {
    let mut text = text.trim();
    let once = text.starts_with(':');
    if once {
        text = text[1..].trim_start();
    }

    let mut segments = split_top_level(text, b'|').into_iter();
    let source = segments.next().unwrap_or_default().trim().to_string();
    if source.is_empty() {
        return Err(ExpressionError {
            message: "empty expression".to_string(),
        });
    }
    let code = qualify_expression(&source)?;

    let mut filters = Vec::new();
    for segment in segments {
        let mut pieces = split_top_level(segment, b':').into_iter();
        let name = pieces.next().unwrap_or_default().trim().to_string();
        let args = pieces
            .map(|arg| qualify_expression(arg.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        filters.push(Filter {
            name,
            pipe: None,
            args,
        });
    }

    Ok(Expression {
        source,
        code,
        filters,
        once,
    })
}

/// Compiles an event handler body.
pub fn compile_handler(text: &str) -> Result<Expression, ExpressionError> {
    let source = text.trim().to_string();
    let code = qualify_handler(&source)?;
    Ok(Expression {
        source,
        code,
        filters: Vec::new(),
        once: false,
    })
}

/// Literal/expression alternation of an interpolated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextPart {
    Literal(String),
    Expr(Expression),
}

/// Tokenizes `${...}` segments; with `bare_braces`, `{...}` counts as well.
pub fn tokenize_interpolation(
    text: &str,
    bare_braces: bool,
) -> Result<Vec<TextPart>, ExpressionError> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let open = if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            Some(i + 1)
        } else if bare_braces && bytes[i] == b'{' {
            Some(i)
        } else {
            None
        };
        let Some(open) = open else {
            i += 1;
            continue;
        };
        let Some(close) = matching_brace(text, open) else {
            i += 1;
            continue;
        };
        if i > literal_start {
            parts.push(TextPart::Literal(text[literal_start..i].to_string()));
        }
        parts.push(TextPart::Expr(compile_expression(&text[open + 1..close])?));
        i = close + 1;
        literal_start = i;
    }
    if literal_start < text.len() {
        parts.push(TextPart::Literal(text[literal_start..].to_string()));
    }
    Ok(parts)
}

fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                b'"' | b'\'' | b'`' => quote = Some(c),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

pub fn has_interpolation(text: &str, bare_braces: bool) -> bool {
    tokenize_interpolation(text, bare_braces)
        .map(|parts| parts.iter().any(|p| matches!(p, TextPart::Expr(_))))
        .unwrap_or(true)
}
