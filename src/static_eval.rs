//! Static evaluation and rendering of compiled templates.
//!
//! Evaluates qualified template expressions against a JSON scope and renders a
//! [`CompiledTemplate`] to HTML. Used for previews and tests; anything that
//! needs the runtime (events, pipes, directives) is left out of the output.

use serde_json::Value;
use std::collections::HashMap;

use crate::expression::{TextPart, CONTEXT_PARAM};
use crate::template::{
    CompiledTemplate, ElementNode, StructuralPlaceholder, TemplateNode, FOR_DIRECTIVE,
    IF_DIRECTIVE,
};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Scope values keyed by context property.
pub type Scope = HashMap<String, Value>;

/// Try to evaluate an expression to a value.
/// Returns `None` when the expression cannot be resolved statically.
pub fn static_eval(expr: &str, scope: &Scope) -> Option<Value> {
    let mut trimmed = expr.trim();
    while let Some(rest) = trimmed.strip_suffix(';') {
        trimmed = rest.trim_end();
    }
    let prefix = format!("{}.", CONTEXT_PARAM);
    let trimmed = trimmed.strip_prefix(prefix.as_str()).unwrap_or(trimmed).trim();

    if trimmed.is_empty() {
        return Some(Value::String(String::new()));
    }

    if let Some(literal) = try_parse_string_literal(trimmed) {
        return Some(Value::String(literal));
    }

    if let Ok(num) = trimmed.parse::<f64>() {
        return serde_json::Number::from_f64(num).map(Value::Number);
    }

    match trimmed {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" | "undefined" => return Some(Value::Null),
        _ => {}
    }

    if let Some(path) = parse_member_path(trimmed) {
        return lookup(&path, scope);
    }

    if let Some(resolved) = try_resolve_ternary(trimmed, scope) {
        return Some(resolved);
    }

    if let Some(resolved) = try_resolve_concatenation(trimmed, scope) {
        return Some(resolved);
    }

    if let Some(resolved) = try_resolve_template_literal(trimmed, scope) {
        return Some(resolved);
    }

    if let Some(operand) = trimmed.strip_prefix('!') {
        return static_eval(operand, scope).map(|v| Value::Bool(!truthy(&v)));
    }

    if let Some(inner) = trimmed.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return static_eval(inner, scope);
    }

    None
}

/// JavaScript truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text a value interpolates to.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn try_parse_string_literal(s: &str) -> Option<String> {
    if s.len() < 2 {
        return None;
    }
    let quoted = (s.starts_with('"') && s.ends_with('"'))
        || (s.starts_with('\'') && s.ends_with('\''));
    if quoted {
        let inner = &s[1..s.len() - 1];
        let quote = &s[..1];
        if inner.contains(quote) && !inner.contains('\\') {
            return None;
        }
        return Some(unescape_string(inner));
    }
    if s.starts_with('`') && s.ends_with('`') {
        let inner = &s[1..s.len() - 1];
        if !inner.contains("${") {
            return Some(unescape_string(inner));
        }
    }
    None
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

#[derive(Debug, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// `a.b[0].c` style paths. Returns `None` for anything else.
fn parse_member_path(s: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let bytes = s.as_bytes();
    let read_ident = |from: usize| -> usize {
        let mut j = from;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_' || bytes[j] == b'$') {
            j += 1;
        }
        j
    };

    if !bytes.first().is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_' || *c == b'$') {
        return None;
    }
    let end = read_ident(0);
    segments.push(PathSegment::Key(s[..end].to_string()));
    let mut i = end;

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let end = read_ident(i + 1);
                if end == i + 1 {
                    return None;
                }
                segments.push(PathSegment::Key(s[i + 1..end].to_string()));
                i = end;
            }
            b'[' => {
                let close = s[i..].find(']')? + i;
                let index = s[i + 1..close].trim().parse::<usize>().ok()?;
                segments.push(PathSegment::Index(index));
                i = close + 1;
            }
            _ => return None,
        }
    }
    Some(segments)
}

fn lookup(path: &[PathSegment], scope: &Scope) -> Option<Value> {
    let (first, rest) = path.split_first()?;
    let PathSegment::Key(name) = first else {
        return None;
    };
    let mut current = scope.get(name)?;
    for segment in rest {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Key(key), Value::Array(items)) if key == "length" => {
                return Some(Value::from(items.len()));
            }
            (PathSegment::Key(key), Value::String(text)) if key == "length" => {
                return Some(Value::from(text.chars().count()));
            }
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn try_resolve_ternary(expr: &str, scope: &Scope) -> Option<Value> {
    let bytes = expr.as_bytes();
    let mut depth: i32 = 0;
    let mut question_idx = None;
    let mut colon_idx = None;
    let mut nested = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'?' if depth == 0 && question_idx.is_none() => question_idx = Some(i),
            b'?' if depth == 0 => nested += 1,
            b':' if depth == 0 && question_idx.is_some() => {
                if nested == 0 {
                    colon_idx = Some(i);
                    break;
                }
                nested -= 1;
            }
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    let (q_idx, c_idx) = (question_idx?, colon_idx?);
    let condition = static_eval(&expr[..q_idx], scope)?;
    if truthy(&condition) {
        static_eval(&expr[q_idx + 1..c_idx], scope)
    } else {
        static_eval(&expr[c_idx + 1..], scope)
    }
}

fn try_resolve_concatenation(expr: &str, scope: &Scope) -> Option<Value> {
    if !expr.contains(" + ") {
        return None;
    }
    let values = expr
        .split(" + ")
        .map(|part| static_eval(part, scope))
        .collect::<Option<Vec<_>>>()?;

    if values.iter().all(Value::is_number) {
        let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
        return serde_json::Number::from_f64(sum).map(Value::Number);
    }
    Some(Value::String(values.iter().map(display).collect()))
}

fn try_resolve_template_literal(expr: &str, scope: &Scope) -> Option<Value> {
    let inner = expr.strip_prefix('`')?.strip_suffix('`')?;
    let mut result = String::new();
    let chars: Vec<char> = inner.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            let start = i + 2;
            let mut depth = 1;
            let mut end = start;
            while end < chars.len() && depth > 0 {
                match chars[end] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                end += 1;
            }
            if depth != 0 {
                return None;
            }
            let interpolation: String = chars[start..end - 1].iter().collect();
            result.push_str(&display(&static_eval(&interpolation, scope)?));
            i = end;
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }
    Some(Value::String(result))
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders a compiled template to HTML against `scope`.
///
/// Unresolvable expressions render empty. Custom elements render as plain tags
/// with their projected content inlined.
pub fn render_template(compiled: &CompiledTemplate, scope: &Scope) -> String {
    let mut out = String::new();
    let renderer = Renderer { compiled };
    renderer.render_nodes(&compiled.nodes, scope, &mut out);
    out
}

struct Renderer<'c> {
    compiled: &'c CompiledTemplate,
}

impl<'c> Renderer<'c> {
    fn render_nodes(&self, nodes: &[TemplateNode], scope: &Scope, out: &mut String) {
        for node in nodes {
            self.render_node(node, scope, out);
        }
    }

    fn render_node(&self, node: &TemplateNode, scope: &Scope, out: &mut String) {
        match node {
            TemplateNode::Element(el) => self.render_element(el, scope, out),
            TemplateNode::Text(text) => out.push_str(&escape_html(&render_parts(&text.parts, scope))),
            TemplateNode::Fragment(fragment) => self.render_nodes(&fragment.children, scope, out),
            TemplateNode::StructuralPlaceholder(ph) => self.render_structural(ph, scope, out),
            TemplateNode::ProjectionSlot(slot) => self.render_nodes(&slot.fallback, scope, out),
        }
    }

    fn render_element(&self, el: &ElementNode, scope: &Scope, out: &mut String) {
        out.push('<');
        out.push_str(&el.tag);
        for (name, value) in el.match_attrs() {
            push_attr(out, &name, &value);
        }
        for (name, parts) in &el.attr_bindings {
            push_attr(out, name, &render_parts(parts, scope));
        }
        for prop in &el.props {
            if let Some(value) = static_eval(&prop.value.code, scope) {
                if !value.is_object() && !value.is_array() {
                    push_attr(out, &prop.name, &display(&value));
                }
            }
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&el.tag.as_str()) {
            return;
        }
        self.render_nodes(&el.children, scope, out);
        for projection in &el.projected {
            self.render_nodes(&projection.nodes, scope, out);
        }
        out.push_str("</");
        out.push_str(&el.tag);
        out.push('>');
    }

    fn render_structural(&self, ph: &StructuralPlaceholder, scope: &Scope, out: &mut String) {
        let Some(body) = self.compiled.templates.get(&ph.template) else {
            return;
        };
        let value = ph
            .value
            .as_ref()
            .and_then(|v| static_eval(&v.code, scope));

        match ph.directive.as_str() {
            IF_DIRECTIVE => {
                if value.as_ref().is_some_and(truthy) {
                    self.render_nodes(body, scope, out);
                } else if let Some(alt) = ph
                    .else_template
                    .as_ref()
                    .and_then(|id| self.compiled.templates.get(id))
                {
                    self.render_nodes(alt, scope, out);
                }
            }
            FOR_DIRECTIVE => {
                let Some(Value::Array(items)) = value else {
                    return;
                };
                for (index, item) in items.into_iter().enumerate() {
                    let mut local = scope.clone();
                    if let Some(name) = &ph.item {
                        local.insert(name.clone(), item);
                    }
                    if let Some(name) = &ph.index {
                        local.insert(name.clone(), Value::from(index));
                    }
                    self.render_nodes(body, &local, out);
                }
            }
            _ => self.render_nodes(body, scope, out),
        }
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    if !value.is_empty() {
        out.push_str("=\"");
        out.push_str(&escape_html(value));
        out.push('"');
    }
}

fn render_parts(parts: &[TextPart], scope: &Scope) -> String {
    parts
        .iter()
        .map(|part| match part {
            TextPart::Literal(text) => text.clone(),
            TextPart::Expr(expr) => static_eval(&expr.code, scope)
                .map(|v| display(&v))
                .unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDefinition, AnnotationKind, PropertyValue};
    use crate::registry::Registry;
    use crate::template::{compile_template, TemplateOptions};
    use serde_json::json;

    fn scope(value: Value) -> Scope {
        value
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn render(markup: &str, data: Value) -> String {
        let owner = AnnotationDefinition {
            name: "Preview".to_string(),
            kind: AnnotationKind::Element,
            properties: vec![(
                "selector".to_string(),
                PropertyValue::String("x-preview".to_string()),
            )],
            implementation: String::new(),
            file: "src/preview.js".to_string(),
            module: None,
            external: None,
            exported: true,
        };
        let compiled =
            compile_template(markup, &owner, &Registry::new(), &TemplateOptions::default());
        assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
        render_template(&compiled, &scope(data))
    }

    #[test]
    fn test_literals_and_paths() {
        let s = scope(json!({"user": {"name": "Ada", "tags": ["a", "b"]}}));
        assert_eq!(static_eval("'x'", &s), Some(json!("x")));
        assert_eq!(static_eval("ctx.user.name", &s), Some(json!("Ada")));
        assert_eq!(static_eval("ctx.user.tags[1]", &s), Some(json!("b")));
        assert_eq!(static_eval("ctx.user.tags.length", &s), Some(json!(2)));
        assert_eq!(static_eval("ctx.missing", &s), None);
    }

    #[test]
    fn test_ternary_and_concatenation() {
        let s = scope(json!({"on": true, "name": "Ada"}));
        assert_eq!(static_eval("ctx.on ? 'yes' : 'no'", &s), Some(json!("yes")));
        assert_eq!(static_eval("!ctx.on ? 'yes' : 'no'", &s), Some(json!("no")));
        assert_eq!(static_eval("'Hi ' + ctx.name", &s), Some(json!("Hi Ada")));
        assert_eq!(static_eval("`Hi ${ctx.name}!`", &s), Some(json!("Hi Ada!")));
    }

    #[test]
    fn test_render_interpolation() {
        assert_eq!(render("<p>{value}</p>", json!({"value": "hi"})), "<p>hi</p>");
    }

    #[test]
    fn test_render_if_else_and_for() {
        let html = render(
            r#"<ul><li *for="item of items">{item}</li></ul><b *if="flag; else off">on</b><template #off><i>off</i></template>"#,
            json!({"items": ["a", "b"], "flag": false}),
        );
        assert_eq!(html, "<ul><li>a</li><li>b</li></ul><i>off</i>");
    }

    #[test]
    fn test_render_escapes_text() {
        assert_eq!(render("<p>{value}</p>", json!({"value": "<b>"})), "<p>&lt;b&gt;</p>");
    }
}
