//! Terraform Schema Types
//!
//! Schema and message types exchanged with Terraform over the JSON-RPC
//! plugin channel.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute type for schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Number,
    Bool,
    Set(Box<AttributeType>),
    Map(Box<AttributeType>),
}

/// Schema attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaAttribute {
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub sensitive: bool,
    /// Changing this attribute replaces the remote object
    #[serde(default)]
    pub force_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl SchemaAttribute {
    fn new(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            description: None,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            force_new: false,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(AttributeType::String)
    }

    pub fn number() -> Self {
        Self::new(AttributeType::Number)
    }

    pub fn bool() -> Self {
        Self::new(AttributeType::Bool)
    }

    pub fn set(element_type: AttributeType) -> Self {
        Self::new(AttributeType::Set(Box::new(element_type)))
    }

    pub fn map(element_type: AttributeType) -> Self {
        Self::new(AttributeType::Map(Box::new(element_type)))
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Attribute block of a provider, resource or data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaBlock {
    pub attributes: HashMap<String, SchemaAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaBlock {
    pub fn new() -> Self {
        Self {
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn with_attribute(mut self, name: &str, attr: SchemaAttribute) -> Self {
        self.attributes.insert(name.to_string(), attr);
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    /// Names of required attributes, sorted
    pub fn required_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(_, attr)| attr.required)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Names of computed attributes
    pub fn computed_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, attr)| attr.computed)
            .map(|(name, _)| name.as_str())
    }

    /// Names of attributes that force replacement when changed
    pub fn force_new_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, attr)| attr.force_new)
            .map(|(name, _)| name.as_str())
    }
}

impl Default for SchemaBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource or data source schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub version: i64,
    pub block: SchemaBlock,
}

impl ResourceSchema {
    pub fn new(version: i64, block: SchemaBlock) -> Self {
        Self { version, block }
    }
}

/// Provider schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub provider: SchemaBlock,
    pub resource_schemas: HashMap<String, ResourceSchema>,
    pub data_source_schemas: HashMap<String, ResourceSchema>,
}

impl ProviderSchema {
    pub fn new(provider: SchemaBlock) -> Self {
        Self {
            provider,
            resource_schemas: HashMap::new(),
            data_source_schemas: HashMap::new(),
        }
    }

    pub fn with_resource(mut self, name: &str, schema: ResourceSchema) -> Self {
        self.resource_schemas.insert(name.to_string(), schema);
        self
    }

    pub fn with_data_source(mut self, name: &str, schema: ResourceSchema) -> Self {
        self.data_source_schemas.insert(name.to_string(), schema);
        self
    }
}

// ============================================================================
// Plugin Protocol Messages
// ============================================================================

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

impl RpcResponse {
    pub fn success(id: i64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: i64, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
            }),
        }
    }

    /// Successful response carrying only diagnostics
    pub fn diagnostics(id: i64, diagnostics: &[Diagnostic]) -> Self {
        Self::success(id, serde_json::json!({ "diagnostics": diagnostics }))
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// Diagnostic message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<Vec<String>>,
}

impl Diagnostic {
    pub fn error(summary: &str) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.to_string(),
            detail: None,
            attribute: None,
        }
    }

    pub fn warning(summary: &str) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.to_string(),
            detail: None,
            attribute: None,
        }
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Point the diagnostic at a top-level attribute
    pub fn for_attribute(mut self, name: &str) -> Self {
        self.attribute = Some(vec![name.to_string()]);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}
