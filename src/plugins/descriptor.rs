//! Tool descriptor model
//!
//! Static metadata for one tool: its name, a one-line description and the
//! ordered parameter schema. Built once at load time and never mutated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Whether `name` is usable as a tool or parameter name
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Parameter type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// Parameter definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name
    pub name: String,
    /// Parameter type tag
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Description, empty when undocumented
    #[serde(default)]
    pub description: String,
    /// Whether parameter is required
    #[serde(default)]
    pub required: bool,
    /// Default value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Ordered parameters of one tool, in declaration order
pub type ParameterSchema = Vec<ParameterDef>;

/// Tool descriptor advertised to the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within a registry
    pub name: String,
    /// Leading summary line of the tool's documentation
    pub description: String,
    /// Parameter definitions
    pub parameters: ParameterSchema,
}

impl ToolDescriptor {
    /// Look up a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of the parameters the caller must supply
    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Render the parameters as a JSON-Schema object
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type.as_str()));
            if !param.description.is_empty() {
                prop.insert("description".into(), json!(param.description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self.required_parameters().collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
