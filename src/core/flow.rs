// src/core/flow.rs
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::core::assistant::AssistantDefinition;
use crate::core::connections::Connection;

/// Tool kind declared on a flow node.
///
/// `typescript` is admitted by the graph schema but has no resolution
/// strategy in this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    Python,
    Prompt,
    Llm,
    CustomLlm,
    Typescript,
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolType::Python => "python",
            ToolType::Prompt => "prompt",
            ToolType::Llm => "llm",
            ToolType::CustomLlm => "custom_llm",
            ToolType::Typescript => "typescript",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSourceType {
    Package,
    Code,
    PackageWithPrompt,
}

impl Default for ToolSourceType {
    fn default() -> Self {
        ToolSourceType::Code
    }
}

impl fmt::Display for ToolSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolSourceType::Package => "package",
            ToolSourceType::Code => "code",
            ToolSourceType::PackageWithPrompt => "package_with_prompt",
        };
        write!(f, "{}", name)
    }
}

/// Where a node's tool implementation comes from: a registered package tool
/// (`tool`) or a source file in the flow directory (`path`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSource {
    #[serde(rename = "type", default)]
    pub source_type: ToolSourceType,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl ToolSource {
    pub fn package(tool: impl Into<String>) -> Self {
        Self {
            source_type: ToolSourceType::Package,
            tool: Some(tool.into()),
            path: None,
        }
    }

    pub fn code(path: impl Into<String>) -> Self {
        Self {
            source_type: ToolSourceType::Code,
            tool: None,
            path: Some(path.into()),
        }
    }

    pub fn package_with_prompt(tool: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_type: ToolSourceType::PackageWithPrompt,
            tool: Some(tool.into()),
            path: Some(path.into()),
        }
    }
}

/// How an input value is sourced. Only literals are coerced by the engine;
/// flow inputs and node references are bound by the executor at run time and
/// pass through resolution unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputValueType {
    Literal,
    FlowInput,
    NodeReference,
}

/// A binary image payload.
///
/// Display is the short content hash, which is what template rendering
/// interpolates in place of the raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    mime: String,
    bytes: Vec<u8>,
}

impl Image {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Decode a base64 payload tagged with its mime type.
    pub fn from_base64(mime: impl Into<String>, data: &str) -> Result<Self, base64::DecodeError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
        Ok(Self::new(mime, bytes))
    }

    /// Read an image file, inferring the mime type from the extension.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let mime = match path.extension().and_then(|e| e.to_str()) {
            Some("jpg") | Some("jpeg") => "image/jpg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("bmp") => "image/bmp",
            _ => "application/octet-stream",
        };
        let bytes = fs::read(path)?;
        Ok(Self::new(mime, bytes))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn short_hash(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({})", self.short_hash())
    }
}

/// An input value as it travels through resolution.
///
/// Graph deserialization always produces `Literal`; type coercion replaces
/// literals with concretely bound values.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowValue {
    Literal(Value),
    Connection(Connection),
    Template(String),
    Image(Image),
    Assistant(Box<AssistantDefinition>),
    List(Vec<FlowValue>),
}

impl FlowValue {
    /// Borrow the textual content of a literal string or template value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlowValue::Literal(Value::String(s)) => Some(s),
            FlowValue::Template(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FlowValue::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_connection(&self) -> Option<&Connection> {
        match self {
            FlowValue::Connection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantDefinition> {
        match self {
            FlowValue::Assistant(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for FlowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowValue::Literal(Value::String(s)) => write!(f, "{}", s),
            FlowValue::Literal(v) => write!(f, "{}", v),
            FlowValue::Connection(c) => write!(f, "{}", c),
            FlowValue::Template(s) => write!(f, "{}", s),
            FlowValue::Image(img) => write!(f, "{}", img),
            FlowValue::Assistant(a) => write!(f, "AssistantDefinition({})", a.model),
            FlowValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Serialize for FlowValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlowValue::Literal(v) => v.serialize(serializer),
            FlowValue::Template(s) => serializer.serialize_str(s),
            FlowValue::Image(img) => serializer.serialize_str(&img.to_string()),
            FlowValue::Connection(c) => serializer.serialize_str(&c.to_string()),
            FlowValue::Assistant(a) => a.serialize(serializer),
            FlowValue::List(items) => serializer.collect_seq(items),
        }
    }
}

impl<'de> Deserialize<'de> for FlowValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(FlowValue::Literal(Value::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAssignment {
    pub value: FlowValue,
    pub value_type: InputValueType,
}

impl InputAssignment {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self {
            value: FlowValue::Literal(value.into()),
            value_type: InputValueType::Literal,
        }
    }
}

/// One step in a flow graph, referencing a tool implementation and bound
/// inputs. Produced by graph deserialization; consumed read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(default)]
    pub source: Option<ToolSource>,
    #[serde(default)]
    pub inputs: IndexMap<String, InputAssignment>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, tool_type: ToolType) -> Self {
        Self {
            name: name.into(),
            tool_type,
            source: None,
            inputs: IndexMap::new(),
            connection: None,
            provider: None,
        }
    }

    pub fn with_source(mut self, source: ToolSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, assignment: InputAssignment) -> Self {
        self.inputs.insert(name.into(), assignment);
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}
