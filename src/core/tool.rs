// src/core/tool.rs
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::flow::{FlowValue, Node, ToolType};

/// Primitive axis of the coercion matrix. Connection types are not listed
/// here; they are string-named and resolved through the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Double,
    Bool,
    String,
    Secret,
    List,
    Object,
    FilePath,
    Image,
    PromptTemplate,
    AssistantDefinition,
}

impl ValueType {
    /// Resolve a declared type name. Lowercase snake_case names are value
    /// types; anything else is treated as a connection type name.
    pub fn from_type_name(name: &str) -> Option<ValueType> {
        match name {
            "int" => Some(ValueType::Int),
            "double" => Some(ValueType::Double),
            "bool" => Some(ValueType::Bool),
            "string" => Some(ValueType::String),
            "secret" => Some(ValueType::Secret),
            "list" => Some(ValueType::List),
            "object" => Some(ValueType::Object),
            "file_path" => Some(ValueType::FilePath),
            "image" => Some(ValueType::Image),
            "prompt_template" => Some(ValueType::PromptTemplate),
            "assistant_definition" => Some(ValueType::AssistantDefinition),
            _ => None,
        }
    }

    /// JSON Schema type used in provider-facing tool descriptors.
    pub fn json_type(&self) -> &'static str {
        match self {
            ValueType::Int | ValueType::Double => "number",
            ValueType::Bool => "boolean",
            ValueType::List => "array",
            ValueType::Object => "object",
            _ => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::Secret => "secret",
            ValueType::List => "list",
            ValueType::Object => "object",
            ValueType::FilePath => "file_path",
            ValueType::Image => "image",
            ValueType::PromptTemplate => "prompt_template",
            ValueType::AssistantDefinition => "assistant_definition",
        };
        write!(f, "{}", name)
    }
}

/// One declared input of a tool schema. `types` is the ordered, non-empty
/// set of acceptable type names; coercion tries them in declared order and
/// the first structurally compatible one wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
    #[serde(rename = "type")]
    pub types: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl InputDefinition {
    pub fn new<I: Into<String>>(types: impl IntoIterator<Item = I>) -> Self {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            description: None,
            required: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// The declared schema of a reusable tool implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: IndexMap<String, InputDefinition>,
}

impl Tool {
    pub fn new(name: impl Into<String>, tool_type: ToolType) -> Self {
        Self {
            name: name.into(),
            tool_type,
            description: None,
            inputs: IndexMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, definition: InputDefinition) -> Self {
        self.inputs.insert(name.into(), definition);
        self
    }
}

/// Keyword arguments handed to a resolved callable.
pub type ToolArgs = IndexMap<String, FlowValue>;

/// The executable implementation behind a resolved tool. Invocation errors
/// are the callable's own and propagate unwrapped.
pub type ToolFn = Arc<dyn Fn(&ToolArgs) -> anyhow::Result<Value> + Send + Sync>;

/// A callable paired with its resolution-time metadata.
///
/// Metadata travels with the wrapper by value, so rebinding steps (prompt
/// integration, pre-bound arguments) preserve it without mutating the
/// callable itself.
#[derive(Clone)]
pub struct BoundTool {
    func: ToolFn,
    streaming_option_parameter: Option<String>,
}

impl BoundTool {
    pub fn new(func: impl Fn(&ToolArgs) -> anyhow::Result<Value> + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(func),
            streaming_option_parameter: None,
        }
    }

    /// Name of the parameter that toggles streaming on the backing
    /// implementation, if it declares one.
    pub fn with_streaming_option(mut self, parameter: impl Into<String>) -> Self {
        self.streaming_option_parameter = Some(parameter.into());
        self
    }

    pub fn streaming_option_parameter(&self) -> Option<&str> {
        self.streaming_option_parameter.as_deref()
    }

    pub fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        (self.func)(args)
    }

    /// Return a callable with `bound` arguments baked in. Bound arguments
    /// take precedence over caller-supplied ones; metadata is preserved.
    pub fn bind(&self, bound: ToolArgs) -> BoundTool {
        let inner = self.func.clone();
        BoundTool {
            func: Arc::new(move |args: &ToolArgs| {
                let mut merged = args.clone();
                for (name, value) in &bound {
                    merged.insert(name.clone(), value.clone());
                }
                inner(&merged)
            }),
            streaming_option_parameter: self.streaming_option_parameter.clone(),
        }
    }
}

impl fmt::Debug for BoundTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTool")
            .field("streaming_option_parameter", &self.streaming_option_parameter)
            .finish_non_exhaustive()
    }
}

/// Output of resolution: the node with concretely bound inputs plus the
/// executable implementation ready to invoke.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub node: Node,
    pub callable: BoundTool,
    /// The originating tool schema; none for prompt-only tools.
    pub definition: Option<Tool>,
    /// Constructor arguments consumed by a stateful tool instance, if any.
    pub init_args: Option<ToolArgs>,
}
