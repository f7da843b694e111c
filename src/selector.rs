//! Compound selectors (`tag#ref.class[attr=value]`) and query matching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub tag: Option<String>,
    pub ref_id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<(String, Option<String>)>,
}

/// What a selector is matched against.
#[derive(Debug, Clone, Copy)]
pub struct MatchTarget<'a> {
    pub tag: &'a str,
    pub ref_id: Option<&'a str>,
    pub attrs: &'a BTreeMap<String, String>,
    /// Names of the directives applied to the node.
    pub directives: &'a [String],
}

impl<'a> MatchTarget<'a> {
    fn has_class(&self, class: &str) -> bool {
        self.attrs
            .get("class")
            .is_some_and(|list| list.split_whitespace().any(|c| c == class))
    }
}

impl Selector {
    /// Parses one compound selector. Returns `None` for an empty string.
    pub fn parse(text: &str) -> Option<Selector> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let mut sel = Selector::default();
        let bytes = text.as_bytes();
        let mut i = 0;

        let read_name = |from: usize| -> usize {
            let mut j = from;
            while j < bytes.len() && !matches!(bytes[j], b'#' | b'.' | b'[' | b']' | b'=') {
                j += 1;
            }
            j
        };

        if !matches!(bytes[0], b'#' | b'.' | b'[') {
            let end = read_name(0);
            sel.tag = Some(text[..end].to_string());
            i = end;
        }

        while i < bytes.len() {
            match bytes[i] {
                b'#' => {
                    let end = read_name(i + 1);
                    sel.ref_id = Some(text[i + 1..end].to_string());
                    i = end;
                }
                b'.' => {
                    let end = read_name(i + 1);
                    sel.classes.push(text[i + 1..end].to_string());
                    i = end;
                }
                b'[' => {
                    let close = text[i..].find(']').map(|p| i + p).unwrap_or(bytes.len());
                    let inner = &text[i + 1..close];
                    match inner.split_once('=') {
                        Some((name, value)) => sel.attrs.push((
                            name.trim().to_string(),
                            Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                        )),
                        None => sel.attrs.push((inner.trim().to_string(), None)),
                    }
                    i = close + 1;
                }
                _ => i += 1,
            }
        }
        Some(sel)
    }

    /// Comma-separated alternatives.
    pub fn parse_list(text: &str) -> Vec<Selector> {
        text.split(',').filter_map(Selector::parse).collect()
    }

    /// A selector made of a tag name only.
    pub fn bare_name(&self) -> Option<&str> {
        if self.ref_id.is_none() && self.classes.is_empty() && self.attrs.is_empty() {
            self.tag.as_deref()
        } else {
            None
        }
    }

    /// Name a directive selector is applied by (`:name` in markup).
    pub fn directive_name(&self) -> Option<&str> {
        if let Some(name) = self.bare_name() {
            return Some(name);
        }
        match (self.tag.as_deref(), self.attrs.as_slice()) {
            (None, [(name, None)]) if self.classes.is_empty() && self.ref_id.is_none() => {
                Some(name)
            }
            _ => None,
        }
    }

    pub fn matches(&self, target: &MatchTarget) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && !tag.eq_ignore_ascii_case(target.tag) {
                return false;
            }
        }
        if let Some(id) = &self.ref_id {
            if target.ref_id != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| target.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|(name, value)| {
            match (target.attrs.get(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, None) => target.directives.iter().any(|d| d == name),
                (None, Some(_)) => false,
            }
        })
    }
}

/// How a query selector matched a node; lower ranks win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueryRank {
    RefId,
    Tag,
    Directive,
    Attribute,
}

/// Ranks a query selector against a node: reference id, then tag name,
/// then directive name, then a compound attribute selector.
pub fn query_rank(selector: &str, target: &MatchTarget) -> Option<QueryRank> {
    let selector = selector.trim();
    let plain = selector.trim_start_matches('#');
    if target.ref_id == Some(plain) {
        return Some(QueryRank::RefId);
    }
    if selector.starts_with('#') {
        return None;
    }
    if selector.eq_ignore_ascii_case(target.tag) {
        return Some(QueryRank::Tag);
    }
    if target.directives.iter().any(|d| d == selector) {
        return Some(QueryRank::Directive);
    }
    Selector::parse_list(selector)
        .iter()
        .any(|s| s.bare_name().is_none() && s.matches(target))
        .then_some(QueryRank::Attribute)
}

/// Picks the query a node belongs to. Ties go to the first declared query.
pub fn best_query<'q, I>(queries: I, target: &MatchTarget) -> Option<&'q str>
where
    I: IntoIterator<Item = (&'q str, &'q str)>,
{
    queries
        .into_iter()
        .filter_map(|(property, selector)| query_rank(selector, target).map(|r| (r, property)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, property)| property)
}
