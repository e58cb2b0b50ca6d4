// src/error.rs
use thiserror::Error;

/// Error kinds raised while resolving a single flow node.
///
/// Callers branch on these kinds (for example to defer connection failures
/// until first use), so each failure mode keeps its own variant instead of
/// collapsing into a generic message.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The node's source is missing, points nowhere, or cannot be read.
    #[error("{reason}")]
    InvalidSource { node: String, reason: String },

    /// The node declares a tool type this engine does not implement.
    #[error("Tool type '{0}' is not supported")]
    UnsupportedToolType(String),

    /// The (tool type, source type) combination has no resolution strategy.
    #[error("Tool source type '{0}' is not supported")]
    UnsupportedSourceType(String),

    /// A template variable collides with an already-defined input name.
    #[error("Invalid inputs {names:?} in prompt template of node '{node}'. These inputs are duplicated.")]
    DuplicateInput { node: String, names: Vec<String> },

    /// The template text is malformed.
    #[error("Template parsing failed at line {line}: {message}")]
    TemplateSyntax {
        node: String,
        line: usize,
        message: String,
    },

    #[error("{0}")]
    ConnectionNotFound(String),

    #[error("{0}")]
    InvalidConnectionType(String),

    /// A literal failed to coerce into any of the declared types.
    #[error("Failed to convert input '{input}': value '{value}' is not type {expected}")]
    ValueTypeMismatch {
        input: String,
        value: String,
        expected: String,
    },

    /// The declared type name is unknown to both the value-type matrix and
    /// the connection registry (for example a type introduced after this
    /// engine's enum was fixed).
    #[error("Value type '{0}' cannot be resolved")]
    ValueTypeUnresolved(String),

    #[error("Invalid base64 image in input '{input}': {entry}")]
    InvalidImage { input: String, entry: String },

    #[error("Failed to load assistant definition: '{path}' is not a valid path.")]
    InvalidAssistantDefinitionPath { path: String },

    #[error("Package tool not found: {0}")]
    PackageToolNotFound(String),

    /// A custom_llm package tool declares no prompt_template input.
    #[error("Invalid definition of custom_llm tool '{tool}': no input of type 'prompt_template' is declared")]
    InvalidCustomLlmTool { tool: String },

    #[error("Invalid assistant tool definition: {0}")]
    InvalidAssistantTool(String),

    /// Two tools within one assistant definition share a name. Treated as a
    /// configuration error; silently keeping the last one is disallowed.
    #[error("Duplicate assistant tool name '{0}'")]
    DuplicateToolName(String),

    #[error("Assistant tool '{0}' is not found in the invoker")]
    AssistantToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for resolution operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// The single wrapper raised at the `resolve_tool_by_node` boundary.
///
/// Carries the node name and a composed human-readable message; the original
/// error is retained as the inspectable cause.
#[derive(Debug, Error)]
#[error("Tool load failed in '{node}': {message}")]
pub struct ResolveToolError {
    node: String,
    message: String,
    #[source]
    source: ResolveError,
}

impl ResolveToolError {
    pub fn new(node: impl Into<String>, source: ResolveError) -> Self {
        Self {
            node: node.into(),
            message: source.to_string(),
            source,
        }
    }

    /// Name of the node that failed to resolve.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The composed human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The original error, for branching on its kind.
    pub fn kind(&self) -> &ResolveError {
        &self.source
    }
}
