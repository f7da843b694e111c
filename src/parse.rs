//! Markup parsing for element templates.
//!
//! html5ever does the HTML5 tree construction. Two things would not survive it
//! untouched, so a pre-pass normalises the markup first:
//!
//! * interpolations (`${...}` / `{...}` in text) may contain `<` or `>`; they are
//!   swapped for `__LOOM_EXPR_N__` placeholders and restored afterwards.
//! * binding attribute names (`{value}`, `@click`, `*if`, `#ref`, camelCase)
//!   would be lowercased; they are swapped for `loom-attr-N` names.

use html5ever::parse_document;
use tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CompilerError, ERR_TEMPLATE_SOURCE};

lazy_static! {
    static ref EXPR_PLACEHOLDER_RE: Regex = Regex::new(r"__LOOM_EXPR_(\d+)__").unwrap();
    static ref ATTR_PLACEHOLDER_RE: Regex = Regex::new(r"^loom-attr-(\d+)$").unwrap();
}

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupElement {
    pub tag: String,
    /// Attributes in source order, names with their original casing.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
}

impl MarkupElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkupNode {
    Element(MarkupElement),
    /// Text with interpolations restored to their source form.
    Text(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// NORMALISATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Normalized {
    html: String,
    expressions: HashMap<String, String>,
    attr_names: HashMap<String, String>,
}

/// Index just past the brace that closes the one at `start`, skipping string
/// and template-literal contents.
fn find_balanced_brace_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' {
            i += 2;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' | b'`' => quote = Some(c),
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn needs_attr_placeholder(name: &str) -> bool {
    !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn is_name_char(c: u8) -> bool {
    !(c.is_ascii_whitespace() || c == b'=' || c == b'>' || c == b'/')
}

fn normalize(html: &str) -> Normalized {
    let bytes = html.as_bytes();
    let mut out = Normalized::default();
    let mut i = 0;
    let mut copied_to = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if html[i..].starts_with("<!--") {
            let end = html[i..].find("-->").map(|p| i + p + 3).unwrap_or(bytes.len());
            out.html.push_str(&html[copied_to..end]);
            i = end;
            copied_to = end;
            continue;
        }

        if c == b'<' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic()) {
            out.html.push_str(&html[copied_to..i]);
            i = normalize_open_tag(html, i, &mut out);
            copied_to = i;
            continue;
        }

        let interpolation_start = if c == b'$' && bytes.get(i + 1) == Some(&b'{') {
            Some(i + 1)
        } else if c == b'{' {
            Some(i)
        } else {
            None
        };
        if let Some(brace) = interpolation_start {
            if let Some(end) = find_balanced_brace_end(html, brace) {
                out.html.push_str(&html[copied_to..i]);
                let placeholder = format!("__LOOM_EXPR_{}__", out.expressions.len());
                out.expressions
                    .insert(placeholder.clone(), html[i..end].to_string());
                out.html.push_str(&placeholder);
                i = end;
                copied_to = end;
                continue;
            }
        }

        i += 1;
    }
    out.html.push_str(&html[copied_to..]);
    out
}

/// Rewrites one opening tag starting at `start`; returns the index after it.
fn normalize_open_tag(html: &str, start: usize, out: &mut Normalized) -> usize {
    let bytes = html.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    let tag = &html[start + 1..i];
    out.html.push('<');
    out.html.push_str(tag);

    loop {
        let ws_start = i;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        out.html.push_str(&html[ws_start..i]);
        if i >= bytes.len() {
            return i;
        }
        if bytes[i] == b'>' {
            out.html.push('>');
            return i + 1;
        }
        if html[i..].starts_with("/>") {
            // html5ever ignores the self-closing flag on non-void elements.
            if VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str()) {
                out.html.push_str("/>");
            } else {
                out.html.push_str(&format!("></{}>", tag));
            }
            return i + 2;
        }

        let name_start = i;
        if bytes[i] == b'{' {
            i = find_balanced_brace_end(html, i).unwrap_or(i + 1);
        }
        while i < bytes.len() && is_name_char(bytes[i]) {
            i += 1;
        }
        if i == name_start {
            // Stray `/` or `=`; keep it and move on.
            out.html.push(bytes[i] as char);
            i += 1;
            continue;
        }
        let name = &html[name_start..i];
        if needs_attr_placeholder(name) {
            let placeholder = format!("loom-attr-{}", out.attr_names.len());
            out.attr_names.insert(placeholder.clone(), name.to_string());
            out.html.push_str(&placeholder);
        } else {
            out.html.push_str(name);
        }

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'=' {
            out.html.push('=');
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            let value_start = j;
            if j < bytes.len() && (bytes[j] == b'"' || bytes[j] == b'\'') {
                let quote = bytes[j];
                j += 1;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                j = (j + 1).min(bytes.len());
            } else {
                while j < bytes.len() && !bytes[j].is_ascii_whitespace() && bytes[j] != b'>' {
                    j += 1;
                }
            }
            out.html.push_str(&html[value_start..j]);
            i = j;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

fn restore_expressions(text: &str, expressions: &HashMap<String, String>) -> String {
    EXPR_PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures| {
            expressions
                .get(&caps[0])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn convert_children(handle: &Handle, norm: &Normalized, out: &mut Vec<MarkupNode>) {
    for child in handle.children.borrow().iter() {
        convert_node(child, norm, out);
    }
}

fn convert_node(handle: &Handle, norm: &Normalized, out: &mut Vec<MarkupNode>) {
    match &handle.data {
        NodeData::Document => convert_children(handle, norm, out),
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            // Formatting whitespace between tags carries no content.
            if text.trim().is_empty() && text.contains('\n') {
                return;
            }
            let restored = restore_expressions(&text, &norm.expressions);
            match out.last_mut() {
                Some(MarkupNode::Text(prev)) => prev.push_str(&restored),
                _ => out.push(MarkupNode::Text(restored)),
            }
        }
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let tag = name.local.to_string();
            if tag == "script" {
                return;
            }
            let attrs = attrs
                .borrow()
                .iter()
                .map(|attr| {
                    let raw = attr.name.local.to_string();
                    let name = if ATTR_PLACEHOLDER_RE.is_match(&raw) {
                        norm.attr_names.get(&raw).cloned().unwrap_or(raw)
                    } else {
                        raw
                    };
                    (name, restore_expressions(&attr.value, &norm.expressions))
                })
                .collect();

            let mut children = Vec::new();
            match template_contents.borrow().as_ref() {
                Some(contents) => convert_children(contents, norm, &mut children),
                None => convert_children(handle, norm, &mut children),
            }
            out.push(MarkupNode::Element(MarkupElement {
                tag,
                attrs,
                children,
            }));
        }
        NodeData::Doctype { .. }
        | NodeData::Comment { .. }
        | NodeData::ProcessingInstruction { .. } => {}
    }
}

/// Collects the content html5ever placed under `<html>`, `<head>` and `<body>`.
fn collect_content(handle: &Handle, norm: &Normalized, out: &mut Vec<MarkupNode>) {
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Element { name, .. }
                if matches!(&*name.local, "html" | "head" | "body") =>
            {
                collect_content(child, norm, out)
            }
            _ => convert_node(child, norm, out),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Parses template markup into a [`MarkupNode`] forest.
pub fn parse_markup(html: &str, file_path: &str) -> Result<Vec<MarkupNode>, CompilerError> {
    let norm = normalize(html);
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut norm.html.as_bytes())
        .map_err(|e| {
            CompilerError::new(
                ERR_TEMPLATE_SOURCE,
                &format!("Failed to parse template markup: {}", e),
                file_path,
            )
        })?;

    let mut nodes = Vec::new();
    collect_content(&dom.document, &norm, &mut nodes);
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &MarkupNode) -> &MarkupElement {
        match node {
            MarkupNode::Element(el) => el,
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_find_balanced_brace() {
        assert_eq!(find_balanced_brace_end("{hello}", 0), Some(7));
        assert_eq!(find_balanced_brace_end("{obj.map(x => x)}", 0), Some(17));
        assert_eq!(find_balanced_brace_end("{'with { brace'}", 0), Some(16));
        assert_eq!(find_balanced_brace_end("{open", 0), None);
    }

    #[test]
    fn test_binding_attributes_keep_their_names() {
        let nodes = parse_markup(
            r#"<input {value}="name" @{checked}="done" @click="save($event)" #field :highlight="color" *if="show">"#,
            "t.html",
        )
        .unwrap();
        let input = element(&nodes[0]);
        let names: Vec<&str> = input.attrs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["{value}", "@{checked}", "@click", "#field", ":highlight", "*if"]
        );
        assert_eq!(input.attr("@click"), Some("save($event)"));
    }

    #[test]
    fn test_interpolation_with_angle_brackets_survives() {
        let nodes = parse_markup("<p>${a < b ? 'x' : 'y'} and {count}</p>", "t.html").unwrap();
        let p = element(&nodes[0]);
        assert_eq!(
            p.children,
            vec![MarkupNode::Text("${a < b ? 'x' : 'y'} and {count}".to_string())]
        );
    }

    #[test]
    fn test_self_closing_custom_element_does_not_swallow_siblings() {
        let nodes = parse_markup("<div><app-icon name=\"x\" /><span>after</span></div>", "t.html")
            .unwrap();
        let div = element(&nodes[0]);
        assert_eq!(div.children.len(), 2);
        assert_eq!(element(&div.children[0]).tag, "app-icon");
        assert_eq!(element(&div.children[1]).tag, "span");
    }

    #[test]
    fn test_template_contents_are_children() {
        let nodes = parse_markup("<template #empty><em>none</em></template>", "t.html").unwrap();
        let tpl = element(&nodes[0]);
        assert_eq!(tpl.tag, "template");
        assert_eq!(tpl.attr("#empty"), Some(""));
        assert_eq!(element(&tpl.children[0]).tag, "em");
    }

    #[test]
    fn test_camel_case_svg_attribute() {
        let nodes = parse_markup(r#"<svg viewBox="0 0 10 10"></svg>"#, "t.html").unwrap();
        assert_eq!(element(&nodes[0]).attr("viewBox"), Some("0 0 10 10"));
    }
}
