//! Annotation definitions.
//!
//! An annotation block (`Element({...})` followed by a function declaration)
//! becomes an [`AnnotationDefinition`]: the function name, the kind, the
//! property map taken from the object literal and the implementation code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens the runtime always provides to injectables.
pub const BUILTIN_TOKENS: &[&str] = &[
    "ElementRef",
    "ChangeDetector",
    "ViewRef",
    "TemplateRef",
    "Injector",
    "ParentRef",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnnotationKind {
    Element,
    Directive,
    Service,
    Provider,
    Pipe,
    Module,
}

impl AnnotationKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "Element" => Some(AnnotationKind::Element),
            "Directive" => Some(AnnotationKind::Directive),
            "Service" => Some(AnnotationKind::Service),
            "Provider" => Some(AnnotationKind::Provider),
            "Pipe" => Some(AnnotationKind::Pipe),
            "Module" => Some(AnnotationKind::Module),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            AnnotationKind::Element => "Element",
            AnnotationKind::Directive => "Directive",
            AnnotationKind::Service => "Service",
            AnnotationKind::Provider => "Provider",
            AnnotationKind::Pipe => "Pipe",
            AnnotationKind::Module => "Module",
        }
    }

    /// Services, providers and pipes share one registry map.
    pub fn is_injectable(&self) -> bool {
        matches!(
            self,
            AnnotationKind::Service | AnnotationKind::Provider | AnnotationKind::Pipe
        )
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self, AnnotationKind::Element | AnnotationKind::Directive)
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Value tree of an annotation's object literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Array(Vec<PropertyValue>),
    Object(Vec<(String, PropertyValue)>),
    /// Bare identifier reference such as `DataService`.
    Identifier(String),
    /// Any other expression, kept as source text.
    Raw(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Name carried by a string or an identifier reference.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Identifier(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> &[PropertyValue] {
        match self {
            PropertyValue::Array(items) => items,
            _ => &[],
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        match self {
            PropertyValue::Object(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Renders the value back to JavaScript source.
    pub fn to_js(&self) -> String {
        match self {
            PropertyValue::String(s) => js_string(s),
            PropertyValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::Null => "null".to_string(),
            PropertyValue::Array(items) => format!(
                "[{}]",
                items.iter().map(|v| v.to_js()).collect::<Vec<_>>().join(", ")
            ),
            PropertyValue::Object(entries) => {
                if entries.is_empty() {
                    return "{}".to_string();
                }
                format!(
                    "{{ {} }}",
                    entries
                        .iter()
                        .map(|(k, v)| format!("{}: {}", js_key(k), v.to_js()))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            PropertyValue::Identifier(name) => name.clone(),
            PropertyValue::Raw(code) => code.clone(),
        }
    }
}

/// Quotes a string as a JavaScript string literal.
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

pub fn js_key(key: &str) -> String {
    if oxc_syntax::identifier::is_identifier_name(key) {
        key.to_string()
    } else {
        js_string(key)
    }
}

/// One `prop:selector` query declaration (`contentChild`, `viewChildren`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub property: String,
    pub selector: String,
    pub many: bool,
}

impl QueryDefinition {
    pub fn parse(raw: &str, many: bool) -> Self {
        match raw.split_once(':') {
            Some((prop, selector)) => QueryDefinition {
                property: prop.trim().to_string(),
                selector: selector.trim().to_string(),
                many,
            },
            None => QueryDefinition {
                property: raw.trim().trim_start_matches('#').to_string(),
                selector: raw.trim().to_string(),
                many,
            },
        }
    }
}

/// A dependency-injection entry of a `DI` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDefinition {
    /// Declaring function name.
    pub name: String,
    pub kind: AnnotationKind,
    pub properties: Vec<(String, PropertyValue)>,
    /// Function declaration plus folded static assignments.
    #[serde(skip)]
    pub implementation: String,
    /// Declaring file.
    pub file: String,
    /// Owning module, stamped by the wiring pass.
    #[serde(default)]
    pub module: Option<String>,
    /// Package the definition was imported from, when it is not local.
    #[serde(default)]
    pub external: Option<String>,
    #[serde(default)]
    pub exported: bool,
}

impl AnnotationDefinition {
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn string_property(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(|v| v.as_str())
    }

    pub fn selector(&self) -> Option<&str> {
        self.string_property("selector")
    }

    /// Pipes are looked up by `name`, falling back to the function name.
    pub fn pipe_name(&self) -> &str {
        self.string_property("name").unwrap_or(&self.name)
    }

    /// Names listed in an array property; strings and identifiers both count.
    pub fn names(&self, key: &str) -> Vec<String> {
        self.property(key)
            .map(|v| {
                v.as_array()
                    .iter()
                    .filter_map(|item| item.as_name().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.names("DI")
            .into_iter()
            .map(|raw| match raw.strip_prefix('?') {
                Some(name) => Dependency {
                    name: name.to_string(),
                    optional: true,
                },
                None => Dependency {
                    name: raw,
                    optional: false,
                },
            })
            .collect()
    }

    /// Declared props as `(property, public name)` pairs; `name=alias` renames.
    pub fn props(&self) -> Vec<(String, String)> {
        self.names("props")
            .into_iter()
            .map(|raw| match raw.split_once('=') {
                Some((prop, alias)) => (prop.trim().to_string(), alias.trim().to_string()),
                None => (raw.clone(), raw),
            })
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.names("events")
            .into_iter()
            .map(|raw| raw.split(':').next().unwrap_or(&raw).trim().to_string())
            .collect()
    }

    pub fn content_queries(&self) -> Vec<QueryDefinition> {
        self.queries("contentChild", "contentChildren")
    }

    pub fn view_queries(&self) -> Vec<QueryDefinition> {
        self.queries("viewChild", "viewChildren")
    }

    fn queries(&self, single: &str, many: &str) -> Vec<QueryDefinition> {
        let mut out: Vec<QueryDefinition> = self
            .names(single)
            .iter()
            .map(|raw| QueryDefinition::parse(raw, false))
            .collect();
        out.extend(
            self.names(many)
                .iter()
                .map(|raw| QueryDefinition::parse(raw, true)),
        );
        out
    }

    /// Value providers declared inline in a module's `services` list.
    pub fn provided_tokens(&self) -> Vec<String> {
        self.property("services")
            .map(|v| {
                v.as_array()
                    .iter()
                    .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Service names of a module's `services` list (value providers excluded).
    pub fn service_refs(&self) -> Vec<String> {
        self.property("services")
            .map(|v| {
                v.as_array()
                    .iter()
                    .filter_map(|item| match item {
                        PropertyValue::Identifier(name) => Some(name.clone()),
                        PropertyValue::String(name) => Some(name.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(properties: Vec<(&str, PropertyValue)>) -> AnnotationDefinition {
        AnnotationDefinition {
            name: "CardElement".to_string(),
            kind: AnnotationKind::Element,
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            implementation: String::new(),
            file: "card.js".to_string(),
            module: None,
            external: None,
            exported: true,
        }
    }

    #[test]
    fn test_dependencies_mark_optional() {
        let def = definition(vec![(
            "DI",
            PropertyValue::Array(vec![
                PropertyValue::Identifier("DataService".into()),
                PropertyValue::String("?Logger".into()),
            ]),
        )]);
        let deps = def.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(!deps[0].optional);
        assert_eq!(deps[1].name, "Logger");
        assert!(deps[1].optional);
    }

    #[test]
    fn test_props_with_alias() {
        let def = definition(vec![(
            "props",
            PropertyValue::Array(vec![
                PropertyValue::String("value".into()),
                PropertyValue::String("label=title".into()),
            ]),
        )]);
        assert_eq!(
            def.props(),
            vec![
                ("value".to_string(), "value".to_string()),
                ("label".to_string(), "title".to_string())
            ]
        );
    }

    #[test]
    fn test_query_parse() {
        let q = QueryDefinition::parse("header:ref", false);
        assert_eq!(q.property, "header");
        assert_eq!(q.selector, "ref");
        let q = QueryDefinition::parse("#field", true);
        assert_eq!(q.property, "field");
        assert_eq!(q.selector, "#field");
    }

    #[test]
    fn test_to_js_object() {
        let value = PropertyValue::Object(vec![
            ("name".into(), PropertyValue::String("API".into())),
            ("data-x".into(), PropertyValue::Number(2.0)),
        ]);
        assert_eq!(value.to_js(), r#"{ name: "API", "data-x": 2 }"#);
    }
}
