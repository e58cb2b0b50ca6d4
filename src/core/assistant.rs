// src/core/assistant.rs
//
// Assistant tool catalog: an assistant definition carries an ordered list of
// raw tool-definition records (built-in markers and function tools). The
// invoker is built once per definition, resolves each function tool through
// the tool resolver, and exposes provider-facing descriptors plus a
// synchronous invocation entry point.

use anyhow::anyhow;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::core::flow::{InputAssignment, Node, ToolSource, ToolType};
use crate::core::resolver::ToolResolver;
use crate::core::tool::{BoundTool, ToolArgs, ValueType};
use crate::error::{ResolveError, ResolveResult};

/// An assistant definition loaded from a structured definition file.
///
/// The invoker is attached in an explicit second phase (see
/// `ToolResolver::resolve_assistant_tool`) and kept for the lifetime of the
/// definition; a second attach is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantDefinition {
    pub model: String,
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(skip)]
    invoker: Option<Arc<AssistantToolInvoker>>,
}

impl AssistantDefinition {
    pub fn new(model: impl Into<String>, instructions: impl Into<String>, tools: Vec<Value>) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            tools,
            invoker: None,
        }
    }

    /// Attach the built invoker. Memoized: an already-attached invoker wins.
    pub fn attach_invoker(&mut self, invoker: Arc<AssistantToolInvoker>) {
        if self.invoker.is_none() {
            self.invoker = Some(invoker);
        }
    }

    pub fn invoker(&self) -> Option<&Arc<AssistantToolInvoker>> {
        self.invoker.as_ref()
    }
}

impl PartialEq for AssistantDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.instructions == other.instructions
            && self.tools == other.tools
    }
}

/// A function tool record inside an assistant definition.
#[derive(Debug, Deserialize)]
struct FunctionToolRecord {
    #[serde(default)]
    tool_type: Option<ToolType>,
    source: ToolSource,
    #[serde(default)]
    predefined_inputs: IndexMap<String, Value>,
}

/// One cataloged assistant tool: a built-in marker (no callable) or a
/// resolved function tool.
#[derive(Debug, Clone)]
pub struct AssistantTool {
    pub name: String,
    pub openai_definition: Value,
    pub func: Option<BoundTool>,
    /// Inputs baked in at catalog-build time; excluded from the generated
    /// schema and not overridable at call sites.
    pub predefined_inputs: ToolArgs,
}

/// Catalog of assistant tools, immutable after construction.
#[derive(Debug)]
pub struct AssistantToolInvoker {
    tools: IndexMap<String, AssistantTool>,
}

impl AssistantToolInvoker {
    /// Build the catalog from the raw ordered tool-definition records.
    /// A single bad record fails the whole build.
    pub(crate) fn build(records: &[Value], resolver: &ToolResolver) -> ResolveResult<Self> {
        let mut tools = IndexMap::new();
        for (index, record) in records.iter().enumerate() {
            let Some(kind) = record.get("type").and_then(Value::as_str) else {
                return Err(ResolveError::InvalidAssistantTool(format!(
                    "tool #{} has no 'type' field",
                    index
                )));
            };
            let tool = if kind == "function" {
                Self::build_function_tool(record, index, resolver)?
            } else {
                // Built-in marker: the descriptor is passed through to the
                // provider unchanged and there is no backing callable.
                AssistantTool {
                    name: kind.to_string(),
                    openai_definition: json!({"type": kind}),
                    func: None,
                    predefined_inputs: IndexMap::new(),
                }
            };
            if tools.contains_key(&tool.name) {
                return Err(ResolveError::DuplicateToolName(tool.name));
            }
            debug!("Cataloged assistant tool '{}'", tool.name);
            tools.insert(tool.name.clone(), tool);
        }
        Ok(Self { tools })
    }

    fn build_function_tool(
        record: &Value,
        index: usize,
        resolver: &ToolResolver,
    ) -> ResolveResult<AssistantTool> {
        let spec: FunctionToolRecord = serde_json::from_value(record.clone()).map_err(|e| {
            ResolveError::InvalidAssistantTool(format!("tool #{}: {}", index, e))
        })?;

        let mut node = Node::new(
            format!("assistant_tool_{}", index),
            spec.tool_type.unwrap_or(ToolType::Python),
        )
        .with_source(spec.source);
        for (name, value) in &spec.predefined_inputs {
            node.inputs
                .insert(name.clone(), InputAssignment::literal(value.clone()));
        }

        let resolved = resolver
            .resolve_tool_by_node(&node, true)
            .map_err(|e| ResolveError::InvalidAssistantTool(e.to_string()))?;
        let definition = resolved.definition.ok_or_else(|| {
            ResolveError::InvalidAssistantTool(format!("tool #{} resolved without a schema", index))
        })?;

        // Predefined inputs were coerced alongside regular inputs; keep
        // their bound values for invocation-time merging.
        let predefined_inputs: ToolArgs = resolved
            .node
            .inputs
            .iter()
            .filter(|(name, _)| spec.predefined_inputs.contains_key(*name))
            .map(|(name, assignment)| (name.clone(), assignment.value.clone()))
            .collect();

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (input_name, input_def) in &definition.inputs {
            if spec.predefined_inputs.contains_key(input_name) {
                continue;
            }
            let json_type = input_def
                .types
                .first()
                .and_then(|t| ValueType::from_type_name(t))
                .map(|vt| vt.json_type())
                .unwrap_or("string");
            properties.insert(
                input_name.clone(),
                json!({
                    "description": input_def.description.clone().unwrap_or_default(),
                    "type": json_type,
                }),
            );
            if input_def.required {
                required.push(input_name.clone());
            }
        }

        let openai_definition = json!({
            "type": "function",
            "function": {
                "name": definition.name.clone(),
                "description": definition.description.clone().unwrap_or_default(),
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        });

        Ok(AssistantTool {
            name: definition.name.clone(),
            openai_definition,
            func: Some(resolved.callable),
            predefined_inputs,
        })
    }

    /// Provider-facing descriptors, in the original declaration order.
    pub fn to_descriptor_list(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| tool.openai_definition.clone())
            .collect()
    }

    /// Invoke a cataloged function tool synchronously. Predefined inputs are
    /// merged over the caller's arguments; errors from the callable itself
    /// propagate unchanged.
    pub fn invoke_tool(&self, name: &str, kwargs: ToolArgs) -> anyhow::Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ResolveError::AssistantToolNotFound(name.to_string()))?;
        let func = tool
            .func
            .as_ref()
            .ok_or_else(|| anyhow!("assistant tool '{}' has no callable", name))?;
        let mut merged = kwargs;
        for (input_name, value) in &tool.predefined_inputs {
            merged.insert(input_name.clone(), value.clone());
        }
        func.call(&merged)
    }

    pub fn tools(&self) -> &IndexMap<String, AssistantTool> {
        &self.tools
    }
}
