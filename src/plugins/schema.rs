//! Schema builder
//!
//! Turns a declared callable signature (parameter names, type annotations,
//! defaults) plus its documentation string into a [`ToolDescriptor`].
//! The same input always produces the same descriptor.

use super::descriptor::{is_identifier, ParamType, ParameterDef, ToolDescriptor};
use crate::error::RegistrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Declared signature of one callable, as a plugin unit reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Callable name
    pub name: String,
    /// Documentation string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Declared parameters, in declaration order
    #[serde(default)]
    pub params: Vec<DeclaredParam>,
    /// Unit the callable is defined in; absent means the reporting unit itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defined_in: Option<String>,
    /// Declared return annotation (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

/// One declared parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredParam {
    pub name: String,
    /// Type annotation as written in the plugin source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Declared default; `Some(Value::Null)` is a real `None` default
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
}

// Distinguishes `"default": null` from a missing key.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Signature {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    /// Add a required parameter
    pub fn param(mut self, name: &str, annotation: &str) -> Self {
        self.params.push(DeclaredParam {
            name: name.to_string(),
            annotation: Some(annotation.to_string()),
            default: None,
        });
        self
    }

    /// Add an optional parameter with a default
    pub fn param_with_default(mut self, name: &str, annotation: &str, default: Value) -> Self {
        self.params.push(DeclaredParam {
            name: name.to_string(),
            annotation: Some(annotation.to_string()),
            default: Some(default),
        });
        self
    }
}

/// Build a descriptor from a declared signature
pub fn build_descriptor(sig: &Signature) -> Result<ToolDescriptor, RegistrationError> {
    if !is_identifier(&sig.name) {
        return Err(RegistrationError::InvalidName(sig.name.clone()));
    }

    let doc = parse_docstring(sig.doc.as_deref().unwrap_or_default());
    let mut seen = HashSet::new();
    let mut parameters = Vec::with_capacity(sig.params.len());

    for param in &sig.params {
        if !seen.insert(param.name.as_str()) {
            return Err(RegistrationError::DuplicateParameter {
                tool: sig.name.clone(),
                param: param.name.clone(),
            });
        }

        let documented = doc.params.get(&param.name);
        let param_type = match param.annotation.as_deref() {
            Some(annotation) => {
                map_annotation(annotation).ok_or_else(|| RegistrationError::UnsupportedType {
                    tool: sig.name.clone(),
                    param: param.name.clone(),
                    annotation: annotation.to_string(),
                })?
            }
            // Docstring types are best-effort: anything unreadable falls back to string
            None => documented
                .and_then(|d| d.type_hint.as_deref())
                .and_then(map_annotation)
                .unwrap_or(ParamType::String),
        };

        parameters.push(ParameterDef {
            name: param.name.clone(),
            param_type,
            description: documented
                .map(|d| d.description.clone())
                .unwrap_or_default(),
            required: param.default.is_none(),
            default: param.default.clone(),
        });
    }

    Ok(ToolDescriptor {
        name: sig.name.clone(),
        description: doc.summary,
        parameters,
    })
}

/// Map a declared type annotation to a type tag. `None` means unsupported.
pub fn map_annotation(annotation: &str) -> Option<ParamType> {
    let annotation = annotation.trim();
    let annotation = annotation.strip_prefix("typing.").unwrap_or(annotation);

    // `X | None`, `None | X`
    let alternatives = split_top_level(annotation, '|');
    if alternatives.len() > 1 {
        return single_non_none(&alternatives);
    }

    let (base, args) = split_generic(annotation);
    let base = base.trim().trim_start_matches('&').to_ascii_lowercase();

    match base.as_str() {
        "optional" | "option" => args.and_then(map_annotation),
        "union" => single_non_none(&split_top_level(args?, ',')),
        "" | "any" => Some(ParamType::String),
        "str" | "string" => Some(ParamType::String),
        "int" | "integer" | "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32"
        | "u64" | "usize" => Some(ParamType::Integer),
        "float" | "number" | "f32" | "f64" => Some(ParamType::Number),
        "bool" | "boolean" => Some(ParamType::Boolean),
        "dict" | "object" | "map" | "mapping" | "hashmap" | "btreemap" => {
            Some(ParamType::Object)
        }
        "list" | "array" | "tuple" | "set" | "sequence" | "vec" => Some(ParamType::Array),
        _ => None,
    }
}

fn single_non_none(alternatives: &[&str]) -> Option<ParamType> {
    let remaining: Vec<&str> = alternatives
        .iter()
        .copied()
        .filter(|a| !matches!(a.trim(), "None" | "NoneType" | "null"))
        .collect();
    match remaining.as_slice() {
        [only] => map_annotation(only),
        _ => None,
    }
}

/// `List[int]` -> ("List", Some("int")), `Vec<u8>` -> ("Vec", Some("u8"))
fn split_generic(annotation: &str) -> (&str, Option<&str>) {
    let open = annotation.find(|c| c == '[' || c == '<');
    match open {
        Some(idx) if annotation.ends_with(']') || annotation.ends_with('>') => (
            &annotation[..idx],
            Some(&annotation[idx + 1..annotation.len() - 1]),
        ),
        _ => (annotation, None),
    }
}

/// Split on `sep` outside of brackets
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, c) in s.char_indices() {
        match c {
            '[' | '<' | '(' => depth += 1,
            ']' | '>' | ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(s[start..idx].trim());
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

/// Parsed documentation string
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DocInfo {
    /// First non-empty line
    pub summary: String,
    /// Per-parameter entries from an `Args:` section
    pub params: HashMap<String, DocParam>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DocParam {
    pub type_hint: Option<String>,
    pub description: String,
}

static ARG_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\*{0,2}([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:\s*(.*)$")
        .expect("arg entry pattern is valid")
});

const ARG_HEADERS: &[&str] = &["args:", "arguments:", "parameters:", "params:"];

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Parse the summary line and a Google-style argument section
pub fn parse_docstring(doc: &str) -> DocInfo {
    let lines: Vec<&str> = doc.lines().collect();
    let summary = lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();

    let mut params: HashMap<String, DocParam> = HashMap::new();

    let header = lines
        .iter()
        .position(|l| ARG_HEADERS.contains(&l.trim().to_ascii_lowercase().as_str()));

    if let Some(header_idx) = header {
        let header_indent = indent_of(lines[header_idx]);
        let mut entry_indent: Option<usize> = None;
        let mut current: Option<String> = None;

        for line in &lines[header_idx + 1..] {
            if line.trim().is_empty() {
                continue;
            }
            let indent = indent_of(line);
            if indent <= header_indent {
                break;
            }
            let entry_level = *entry_indent.get_or_insert(indent);

            if indent == entry_level {
                if let Some(caps) = ARG_ENTRY.captures(line.trim()) {
                    let name = caps[1].to_string();
                    let type_hint = caps.get(2).map(|m| {
                        m.as_str()
                            .split(',')
                            .next()
                            .unwrap_or_default()
                            .trim()
                            .to_string()
                    });
                    params.insert(
                        name.clone(),
                        DocParam {
                            type_hint: type_hint.filter(|t| !t.is_empty()),
                            description: caps[3].trim().to_string(),
                        },
                    );
                    current = Some(name);
                    continue;
                }
            }

            if let Some(entry) = current.as_ref().and_then(|n| params.get_mut(n)) {
                if !entry.description.is_empty() {
                    entry.description.push(' ');
                }
                entry.description.push_str(line.trim());
            }
        }
    }

    DocInfo { summary, params }
}
