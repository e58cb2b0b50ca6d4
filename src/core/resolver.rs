// src/core/resolver.rs
//
// Tool Resolver — 节点到可执行工具的解析
//
// 按 (tool type × source type) 分派到四种解析策略（package / script /
// prompt / llm），并在 resolve_tool_by_node 边界把所有内部错误包装为
// 携带节点名的 ResolveToolError。

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::core::assistant::{AssistantDefinition, AssistantToolInvoker};
use crate::core::coercion::{build_descriptors, coerce_value, TypeDescriptor};
use crate::core::connections::{resolve_connection, ConnectionRecord, ConnectionRegistry};
use crate::core::flow::{FlowValue, InputValueType, Node, ToolSourceType, ToolType};
use crate::core::template;
use crate::core::tool::{InputDefinition, ResolvedTool, Tool, ToolArgs, ValueType};
use crate::error::{ResolveError, ResolveResult, ResolveToolError};
use crate::services::config::CaryaConfig;
use crate::services::source_loader::SourceLoader;
use crate::services::tool_loader::{LoadedTool, RegistryToolLoader, ToolLoader};

lazy_static! {
    /// 模板里的图片引用：![image]({{var}}) 中的 var 按 image 类型绑定
    static ref IMAGE_PLACEHOLDER_RE: Regex =
        Regex::new(r"!\[image\]\(\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}\)").unwrap();
}

/// Name of the synthesized parameter holding the prompt text on prompt
/// nodes.
const PROMPT_NODE_RESERVED: &str = "template";
/// Default prompt parameter for llm tools that do not declare one.
const DEFAULT_PROMPT_INPUT: &str = "prompt";

/// Resolves a flow node into an executable, fully-bound tool.
///
/// Construction injects the working directory and the connection table; the
/// tool loader and the connection registry default to the registry-backed
/// implementations and can be swapped per instance. The connection table is
/// only mutated by explicit override merges, which concurrent callers must
/// serialize themselves.
pub struct ToolResolver {
    working_dir: PathBuf,
    connections: IndexMap<String, ConnectionRecord>,
    connection_registry: ConnectionRegistry,
    tool_loader: Arc<dyn ToolLoader>,
    source_loader: SourceLoader,
}

impl ToolResolver {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        connections: IndexMap<String, ConnectionRecord>,
    ) -> Self {
        let working_dir = working_dir.into();
        Self {
            source_loader: SourceLoader::new(working_dir.clone()),
            working_dir,
            connections,
            connection_registry: ConnectionRegistry::builtin(),
            tool_loader: Arc::new(RegistryToolLoader::new()),
        }
    }

    /// Build a resolver from a loaded config file (working directory plus
    /// the merged connection table).
    pub fn from_config(config: &CaryaConfig) -> Self {
        let working_dir = config
            .working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(working_dir, config.connection_table())
    }

    pub fn with_tool_loader(mut self, loader: Arc<dyn ToolLoader>) -> Self {
        self.tool_loader = loader;
        self
    }

    pub fn with_connection_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.connection_registry = registry;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn connections(&self) -> &IndexMap<String, ConnectionRecord> {
        &self.connections
    }

    /// Merge per-node connection overrides into the table. The caller must
    /// serialize this against concurrent resolution on a shared table.
    pub fn merge_connection_overrides(&mut self, overrides: IndexMap<String, ConnectionRecord>) {
        for (name, record) in overrides {
            debug!("Connection '{}' overridden", name);
            self.connections.insert(name, record);
        }
    }

    /// Resolve a node into an executable tool. Every internal failure is
    /// wrapped into a single `ResolveToolError` carrying the node name; the
    /// original error stays inspectable as its cause.
    pub fn resolve_tool_by_node(
        &self,
        node: &Node,
        convert_input_types: bool,
    ) -> Result<ResolvedTool, ResolveToolError> {
        debug!("Resolving tool for node '{}' ({})", node.name, node.tool_type);
        self.dispatch(node, convert_input_types)
            .map_err(|e| ResolveToolError::new(node.name.clone(), e))
    }

    fn dispatch(&self, node: &Node, convert_input_types: bool) -> ResolveResult<ResolvedTool> {
        match node.tool_type {
            ToolType::Prompt => self.resolve_prompt_node(node),
            ToolType::Llm => self.resolve_llm_node(node, convert_input_types),
            ToolType::Python => match self.source_type(node)? {
                ToolSourceType::Package => self.resolve_package_node(node, convert_input_types),
                ToolSourceType::Code => self.resolve_script_node(node, convert_input_types),
                other => Err(ResolveError::UnsupportedSourceType(other.to_string())),
            },
            ToolType::CustomLlm => match self.source_type(node)? {
                ToolSourceType::PackageWithPrompt => {
                    let resolved = self.resolve_package_node(node, convert_input_types)?;
                    self.integrate_prompt_in_package_node(resolved)
                }
                other => Err(ResolveError::UnsupportedSourceType(other.to_string())),
            },
            ToolType::Typescript => {
                Err(ResolveError::UnsupportedToolType(node.tool_type.to_string()))
            }
        }
    }

    fn source_type(&self, node: &Node) -> ResolveResult<ToolSourceType> {
        node.source
            .as_ref()
            .map(|source| source.source_type)
            .ok_or_else(|| ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!("Node '{}' does not have source defined", node.name),
            })
    }

    // ------------------------------------------------------------------
    // 解析策略
    // ------------------------------------------------------------------

    fn resolve_prompt_node(&self, node: &Node) -> ResolveResult<ResolvedTool> {
        let content = self.source_loader.load(node)?;
        template::validate_template(&node.name, &content)?;
        let referenced = template::extract_template_inputs(&content);
        self.validate_duplicated_inputs(&node.name, &referenced, &[PROMPT_NODE_RESERVED])?;

        let node = Self::keep_referenced_inputs(node, &referenced);
        let callable = crate::core::tool::BoundTool::new(move |args: &ToolArgs| {
            Ok(Value::String(template::render_template(&content, args)))
        });
        Ok(ResolvedTool {
            node,
            callable,
            definition: None,
            init_args: None,
        })
    }

    fn resolve_llm_node(
        &self,
        node: &Node,
        convert_input_types: bool,
    ) -> ResolveResult<ResolvedTool> {
        let loaded = self.tool_loader.load_tool_for_llm_node(node)?;
        let content = self.source_loader.load(node)?;
        template::validate_template(&node.name, &content)?;
        let referenced = template::extract_template_inputs(&content);

        let prompt_key = Self::prompt_template_input(&loaded.definition)
            .unwrap_or_else(|| DEFAULT_PROMPT_INPUT.to_string());
        self.validate_duplicated_inputs(&node.name, &referenced, &[prompt_key.as_str()])?;

        let (connection_key, connection) = self.resolve_llm_connection_to_inputs(
            node,
            &loaded.definition,
            &loaded.connection_hints,
        )?;

        let mut node = Self::keep_referenced_inputs(node, &referenced);
        if convert_input_types {
            let merged = Self::merge_template_inputs(&loaded.definition, &content, &referenced);
            node = self.convert_node_literal_input_types(&node, &merged)?;
        }

        // The connection and the prompt template are synthesized keyword
        // inputs, pre-bound into the callable rather than left on the node.
        let mut bound: ToolArgs = IndexMap::new();
        bound.insert(connection_key, FlowValue::Connection(connection));
        bound.insert(prompt_key, FlowValue::Template(content));
        let callable = loaded.callable.bind(bound);

        Ok(ResolvedTool {
            node,
            callable,
            definition: Some(loaded.definition),
            init_args: None,
        })
    }

    fn resolve_script_node(
        &self,
        node: &Node,
        convert_input_types: bool,
    ) -> ResolveResult<ResolvedTool> {
        let loaded = self.tool_loader.load_tool_for_script_node(node)?;
        self.finish_loaded_node(node, loaded, convert_input_types)
    }

    fn resolve_package_node(
        &self,
        node: &Node,
        convert_input_types: bool,
    ) -> ResolveResult<ResolvedTool> {
        let loaded = self.tool_loader.load_tool_for_package_node(node)?;
        self.finish_loaded_node(node, loaded, convert_input_types)
    }

    /// Shared tail of the script/package strategies: connection synthesis
    /// for llm-typed tools, literal coercion, and init-args extraction.
    fn finish_loaded_node(
        &self,
        node: &Node,
        loaded: LoadedTool,
        convert_input_types: bool,
    ) -> ResolveResult<ResolvedTool> {
        let mut node = node.clone();

        let mut pre_bound: ToolArgs = IndexMap::new();
        if loaded.definition.tool_type == ToolType::Llm {
            let (key, connection) = self.resolve_llm_connection_to_inputs(
                &node,
                &loaded.definition,
                &loaded.connection_hints,
            )?;
            node.inputs.shift_remove(&key);
            pre_bound.insert(key, FlowValue::Connection(connection));
        }

        if convert_input_types {
            node = self.convert_node_literal_input_types(&node, &loaded.definition)?;
        }

        // Inputs consumed by the tool's constructor move out of the node.
        let mut init_args: ToolArgs = IndexMap::new();
        for name in &loaded.init_inputs {
            if let Some(assignment) = node.inputs.shift_remove(name) {
                init_args.insert(name.clone(), assignment.value);
            }
        }

        let callable = if pre_bound.is_empty() && init_args.is_empty() {
            loaded.callable
        } else {
            let mut bound = pre_bound;
            for (name, value) in &init_args {
                bound.insert(name.clone(), value.clone());
            }
            loaded.callable.bind(bound)
        };

        Ok(ResolvedTool {
            node,
            callable,
            definition: Some(loaded.definition),
            init_args: (!init_args.is_empty()).then_some(init_args),
        })
    }

    /// For custom_llm package tools: load the prompt template from the
    /// node's source and bind it as the tool's prompt_template parameter,
    /// keeping the callable (and its metadata) intact.
    fn integrate_prompt_in_package_node(
        &self,
        resolved: ResolvedTool,
    ) -> ResolveResult<ResolvedTool> {
        let definition =
            resolved
                .definition
                .as_ref()
                .ok_or_else(|| ResolveError::InvalidCustomLlmTool {
                    tool: resolved.node.name.clone(),
                })?;
        let prompt_key = Self::prompt_template_input(definition).ok_or_else(|| {
            ResolveError::InvalidCustomLlmTool {
                tool: definition.name.clone(),
            }
        })?;

        let content = self.source_loader.load(&resolved.node)?;
        template::validate_template(&resolved.node.name, &content)?;
        let referenced = template::extract_template_inputs(&content);
        self.validate_duplicated_inputs(&resolved.node.name, &referenced, &[prompt_key.as_str()])?;

        let mut node = resolved.node;
        node.inputs.insert(
            prompt_key,
            crate::core::flow::InputAssignment {
                value: FlowValue::Template(content),
                value_type: InputValueType::Literal,
            },
        );

        Ok(ResolvedTool {
            node,
            callable: resolved.callable,
            definition: resolved.definition,
            init_args: resolved.init_args,
        })
    }

    // ------------------------------------------------------------------
    // Input binding
    // ------------------------------------------------------------------

    /// Replace each literal input with a value matching one of its declared
    /// acceptable types, trying declared types in order and taking the
    /// first success. Inputs without a declared schema pass through.
    fn convert_node_literal_input_types(&self, node: &Node, tool: &Tool) -> ResolveResult<Node> {
        let mut updated = node.clone();
        for (name, assignment) in updated.inputs.iter_mut() {
            if assignment.value_type != InputValueType::Literal {
                continue;
            }
            let Some(definition) = tool.inputs.get(name) else {
                continue;
            };
            let raw = match &assignment.value {
                FlowValue::Literal(value) => value.clone(),
                // Already concretely bound in an earlier pass.
                _ => continue,
            };

            let descriptors = build_descriptors(&definition.types, &self.connection_registry)?;

            let accepted_connections: Vec<String> = descriptors
                .iter()
                .filter_map(|descriptor| match descriptor {
                    TypeDescriptor::Connection(type_name) => Some(type_name.clone()),
                    TypeDescriptor::Value(_) => None,
                })
                .collect();
            if !accepted_connections.is_empty() {
                // The literal is a connection name.
                let Some(connection_name) = raw.as_str() else {
                    return Err(ResolveError::ValueTypeMismatch {
                        input: name.clone(),
                        value: raw.to_string(),
                        expected: definition.types.join(", "),
                    });
                };
                let connection = resolve_connection(
                    &self.connection_registry,
                    &self.connections,
                    connection_name,
                    &accepted_connections,
                )?;
                assignment.value = FlowValue::Connection(connection);
                continue;
            }

            let mut converted = None;
            let mut last_error = None;
            for descriptor in &descriptors {
                let TypeDescriptor::Value(value_type) = descriptor else {
                    continue;
                };
                let attempt = if *value_type == ValueType::AssistantDefinition {
                    self.load_assistant_definition(&raw)
                } else {
                    coerce_value(name, &raw, *value_type, &self.working_dir)
                };
                match attempt {
                    Ok(value) => {
                        converted = Some(value);
                        break;
                    }
                    Err(error) => last_error = Some(error),
                }
            }
            match converted {
                Some(value) => assignment.value = value,
                None => {
                    return Err(last_error.unwrap_or_else(|| ResolveError::ValueTypeMismatch {
                        input: name.clone(),
                        value: raw.to_string(),
                        expected: definition.types.join(", "),
                    }))
                }
            }
        }
        Ok(updated)
    }

    /// Resolve the node-level connection reference into the first input key
    /// of the tool schema that accepts a connection type. The loader's
    /// parameter hints disambiguate tools whose schema does not declare one.
    fn resolve_llm_connection_to_inputs(
        &self,
        node: &Node,
        tool: &Tool,
        hints: &IndexMap<String, String>,
    ) -> ResolveResult<(String, crate::core::connections::Connection)> {
        let connection_name = node.connection.as_deref().ok_or_else(|| {
            ResolveError::ConnectionNotFound(format!(
                "Connection of LLM node '{}' is not specified",
                node.name
            ))
        })?;

        for (key, definition) in &tool.inputs {
            let accepted: Vec<String> = definition
                .types
                .iter()
                .filter(|type_name| self.connection_registry.contains(type_name))
                .cloned()
                .collect();
            if accepted.is_empty() {
                continue;
            }
            let connection = resolve_connection(
                &self.connection_registry,
                &self.connections,
                connection_name,
                &accepted,
            )?;
            return Ok((key.clone(), connection));
        }

        for (key, expected_type) in hints {
            if self.connection_registry.contains(expected_type) {
                let connection = resolve_connection(
                    &self.connection_registry,
                    &self.connections,
                    connection_name,
                    std::slice::from_ref(expected_type),
                )?;
                return Ok((key.clone(), connection));
            }
        }

        Err(ResolveError::InvalidConnectionType(format!(
            "Connection type can not be resolved for tool '{}'",
            tool.name
        )))
    }

    /// Parse an assistant-definition input: the literal is a path relative
    /// to the working directory; declared tools are resolved into the
    /// attached invoker before the value is bound.
    fn load_assistant_definition(&self, value: &Value) -> ResolveResult<FlowValue> {
        let Some(path) = value.as_str() else {
            return Err(ResolveError::InvalidAssistantDefinitionPath {
                path: value.to_string(),
            });
        };
        let full_path = self.working_dir.join(path);
        if !full_path.is_file() {
            return Err(ResolveError::InvalidAssistantDefinitionPath {
                path: path.to_string(),
            });
        }
        let content = fs::read_to_string(&full_path)?;
        let mut definition: AssistantDefinition = serde_json::from_str(&content)?;
        self.resolve_assistant_tool(&mut definition)?;
        Ok(FlowValue::Assistant(Box::new(definition)))
    }

    /// Build and attach the assistant tool invoker for a definition that
    /// declares tools. Attachment is memoized: an existing invoker is kept.
    pub fn resolve_assistant_tool(
        &self,
        definition: &mut AssistantDefinition,
    ) -> ResolveResult<()> {
        if definition.invoker().is_some() || definition.tools.is_empty() {
            return Ok(());
        }
        let invoker = AssistantToolInvoker::build(&definition.tools, self)?;
        definition.attach_invoker(Arc::new(invoker));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn validate_duplicated_inputs(
        &self,
        node_name: &str,
        template_inputs: &[String],
        reserved: &[&str],
    ) -> ResolveResult<()> {
        let duplicated: Vec<String> = template_inputs
            .iter()
            .filter(|name| reserved.contains(&name.as_str()))
            .cloned()
            .collect();
        if duplicated.is_empty() {
            Ok(())
        } else {
            Err(ResolveError::DuplicateInput {
                node: node_name.to_string(),
                names: duplicated,
            })
        }
    }

    /// Keep only the node inputs referenced by the template.
    fn keep_referenced_inputs(node: &Node, referenced: &[String]) -> Node {
        let mut node = node.clone();
        node.inputs
            .retain(|name, _| referenced.iter().any(|r| r == name));
        node
    }

    /// First tool input declaring the prompt_template type.
    fn prompt_template_input(tool: &Tool) -> Option<String> {
        tool.inputs
            .iter()
            .find(|(_, definition)| {
                definition
                    .types
                    .iter()
                    .any(|type_name| type_name == "prompt_template")
            })
            .map(|(name, _)| name.clone())
    }

    /// Extend the llm tool schema with definitions for the template
    /// variables it binds: variables referenced as `![image]({{var}})` are
    /// image-typed, the rest are strings.
    fn merge_template_inputs(tool: &Tool, content: &str, referenced: &[String]) -> Tool {
        let image_inputs: Vec<String> = IMAGE_PLACEHOLDER_RE
            .captures_iter(content)
            .map(|caps| caps[1].to_string())
            .collect();
        let mut merged = tool.clone();
        for name in referenced {
            if merged.inputs.contains_key(name) {
                continue;
            }
            let types = if image_inputs.contains(name) {
                vec!["image".to_string()]
            } else {
                vec!["string".to_string()]
            };
            merged
                .inputs
                .insert(name.clone(), InputDefinition::new(types));
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connections::ConnectionSpec;
    use crate::core::flow::{InputAssignment, ToolSource};
    use crate::core::tool::BoundTool;
    use serde_json::json;
    use tempfile::TempDir;

    fn azure_connections() -> IndexMap<String, ConnectionRecord> {
        IndexMap::from([(
            "conn_name".to_string(),
            ConnectionRecord::new("AzureOpenAIConnection")
                .with_value("api_key", "mock")
                .with_value("api_base", "mock"),
        )])
    }

    fn rendering_callable() -> BoundTool {
        BoundTool::new(|args: &ToolArgs| {
            let prompt = args
                .get("prompt")
                .and_then(FlowValue::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Value::String(template::render_template(&prompt, args)))
        })
    }

    fn llm_chat_loader() -> RegistryToolLoader {
        let mut loader = RegistryToolLoader::new();
        let tool = Tool::new("mock_chat", ToolType::Llm)
            .with_input("conn", InputDefinition::new(["AzureOpenAIConnection"]));
        loader.register_package_tool(LoadedTool::new(tool, rendering_callable()));
        loader.register_llm_provider("openai", "mock_chat");
        loader
    }

    fn script_loader() -> RegistryToolLoader {
        let mut loader = RegistryToolLoader::new();
        let tool = Tool::new("mock", ToolType::Python)
            .with_input("conn", InputDefinition::new(["AzureOpenAIConnection"]));
        loader.register_script_tool(
            "sample.py",
            LoadedTool::new(tool, rendering_callable()).with_init_inputs(["conn"]),
        );
        loader
    }

    fn bound_args(resolved: &ResolvedTool) -> ToolArgs {
        resolved
            .node
            .inputs
            .iter()
            .map(|(name, assignment)| (name.clone(), assignment.value.clone()))
            .collect()
    }

    #[test]
    fn test_dispatch_unsupported_tool_type() {
        let resolver = ToolResolver::new(".", IndexMap::new());
        let node =
            Node::new("node", ToolType::Typescript).with_source(ToolSource::code("tool.ts"));
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::UnsupportedToolType(_)));
        assert!(err.message().contains("Tool type"));
    }

    #[test]
    fn test_dispatch_unsupported_source_type() {
        let resolver = ToolResolver::new(".", IndexMap::new());

        let node = Node::new("node", ToolType::Python)
            .with_source(ToolSource::package_with_prompt("t", "p"));
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::UnsupportedSourceType(_)));
        assert!(err.message().contains("Tool source type"));

        let node = Node::new("node", ToolType::CustomLlm).with_source(ToolSource::code("t.py"));
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::UnsupportedSourceType(_)));
        assert!(err.message().contains("Tool source type"));
    }

    #[test]
    fn test_node_without_source_fails() {
        let resolver = ToolResolver::new(".", IndexMap::new());
        let node = Node::new("node", ToolType::Python);
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::InvalidSource { .. }));
        assert!(err.message().contains("node"));
    }

    #[test]
    fn test_prompt_node_without_source_path_fails() {
        let dir = TempDir::new().unwrap();
        let resolver = ToolResolver::new(dir.path(), IndexMap::new());
        let node = Node::new("node", ToolType::Prompt).with_source(ToolSource {
            source_type: ToolSourceType::Package,
            tool: None,
            path: None,
        });
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::InvalidSource { .. }));
        assert!(err.message().contains("Node source path"));
    }

    #[test]
    fn test_prompt_node_duplicated_inputs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("node.prompt"), "{{template}}").unwrap();
        let resolver = ToolResolver::new(dir.path(), IndexMap::new());
        let node =
            Node::new("node", ToolType::Prompt).with_source(ToolSource::code("node.prompt"));
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::DuplicateInput { .. }));
        assert!(err.message().contains("These inputs are duplicated"));
    }

    #[test]
    fn test_prompt_node_invalid_template() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("node.prompt"), "{{current context}}").unwrap();
        let resolver = ToolResolver::new(dir.path(), IndexMap::new());
        let node =
            Node::new("node", ToolType::Prompt).with_source(ToolSource::code("node.prompt"));
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(err.kind(), ResolveError::TemplateSyntax { .. }));
        let message = err.message();
        assert!(message.contains("Tool load failed in 'node'"));
        assert!(message.contains("line 1"));
        assert!(message.contains("got 'context'"));
    }

    #[test]
    fn test_prompt_node_binds_only_referenced_inputs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("greet.prompt"), "{{text}}![image]({{image}})").unwrap();
        let resolver = ToolResolver::new(dir.path(), azure_connections());
        let node = Node::new("greet", ToolType::Prompt)
            .with_source(ToolSource::code("greet.prompt"))
            .with_input("conn", InputAssignment::literal("conn_name"))
            .with_input("text", InputAssignment::literal("Hello World!"))
            .with_input("image", InputAssignment::literal("a picture"));
        let resolved = resolver.resolve_tool_by_node(&node, true).unwrap();
        let bound: Vec<&String> = resolved.node.inputs.keys().collect();
        assert_eq!(bound, ["text", "image"]);
        assert!(resolved.definition.is_none());

        let output = resolved.callable.call(&bound_args(&resolved)).unwrap();
        assert_eq!(output, json!("Hello World!![image](a picture)"));
    }

    #[test]
    fn test_prompt_node_resolution_is_deterministic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("greet.prompt"), "{{text}}").unwrap();
        let resolver = ToolResolver::new(dir.path(), azure_connections());
        let node = Node::new("greet", ToolType::Prompt)
            .with_source(ToolSource::code("greet.prompt"))
            .with_input("text", InputAssignment::literal("Hello World!"));
        let first = resolver.resolve_tool_by_node(&node, true).unwrap();
        let second = resolver.resolve_tool_by_node(&node, true).unwrap();
        assert_eq!(first.node, second.node);
    }

    #[test]
    fn test_convert_literal_connection_not_found() {
        let tool = Tool::new("mock", ToolType::Python)
            .with_input("conn", InputDefinition::new(["CustomConnection"]));
        let node = Node::new("mock", ToolType::Python)
            .with_input("conn", InputAssignment::literal("conn_name"));
        let resolver = ToolResolver::new(".", IndexMap::new());
        let err = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap_err();
        assert!(matches!(err, ResolveError::ConnectionNotFound(_)));
    }

    #[test]
    fn test_convert_literal_connection_type_not_matched() {
        let tool = Tool::new("mock", ToolType::Python)
            .with_input("conn", InputDefinition::new(["CustomConnection"]));
        let node = Node::new("mock", ToolType::Python)
            .with_input("conn", InputAssignment::literal("conn_name"));
        let resolver = ToolResolver::new(".", azure_connections());
        let err = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap_err();
        match err {
            ResolveError::InvalidConnectionType(message) => assert!(message.contains(
                "'AzureOpenAIConnection' is not supported, valid types ['CustomConnection']"
            )),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_convert_literal_type_mismatch() {
        let tool =
            Tool::new("mock", ToolType::Python).with_input("int_input", InputDefinition::new(["int"]));
        let node = Node::new("mock", ToolType::Python)
            .with_input("int_input", InputAssignment::literal("invalid"));
        let resolver = ToolResolver::new(".", IndexMap::new());
        let err = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap_err();
        assert!(err.to_string().contains("value 'invalid' is not type int"));
    }

    #[test]
    fn test_convert_literal_unresolved_type() {
        let tool = Tool::new("mock", ToolType::Python)
            .with_input("int_input", InputDefinition::new(["A_good_type"]));
        let node = Node::new("mock", ToolType::Python)
            .with_input("int_input", InputAssignment::literal("invalid"));
        let resolver = ToolResolver::new(".", IndexMap::new());
        let err = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap_err();
        assert!(matches!(err, ResolveError::ValueTypeUnresolved(_)));
    }

    #[test]
    fn test_convert_literal_invalid_image_in_list() {
        let tool = Tool::new("mock", ToolType::Python)
            .with_input("list_input", InputDefinition::new(["list"]));
        let node = Node::new("mock", ToolType::Python).with_input(
            "list_input",
            InputAssignment::literal(json!([{"data:image/jpg;base64": "invalid_image"}])),
        );
        let resolver = ToolResolver::new(".", IndexMap::new());
        let err = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid base64 image"));
    }

    #[test]
    fn test_convert_literal_invalid_assistant_definition_path() {
        let dir = TempDir::new().unwrap();
        let tool = Tool::new("mock", ToolType::Python).with_input(
            "assistant_definition",
            InputDefinition::new(["assistant_definition"]),
        );
        let node = Node::new("mock", ToolType::Python).with_input(
            "assistant_definition",
            InputAssignment::literal("invalid_path"),
        );
        let resolver = ToolResolver::new(dir.path(), IndexMap::new());
        let err = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Failed to load assistant definition"));
        assert!(message.contains("is not a valid path"));
    }

    #[test]
    fn test_convert_literal_strong_type_preference() {
        let mut registry = ConnectionRegistry::builtin();
        registry.register(
            ConnectionSpec::new("MyFirstCSTConnection")
                .with_base("CustomConnection")
                .with_required_fields(["api_key", "api_base"])
                .with_secret_fields(["api_key"]),
        );
        let connections = IndexMap::from([(
            "conn_name".to_string(),
            ConnectionRecord::new("CustomConnection")
                .with_value("api_key", "mock")
                .with_value("api_base", "mock"),
        )]);
        let resolver = ToolResolver::new(".", connections).with_connection_registry(registry);

        let tool = Tool::new("tool", ToolType::Python)
            .with_input("conn", InputDefinition::new(["MyFirstCSTConnection"]));
        let node = Node::new("node", ToolType::Python)
            .with_input("conn", InputAssignment::literal("conn_name"));
        let converted = resolver
            .convert_node_literal_input_types(&node, &tool)
            .unwrap();
        let connection = converted.inputs["conn"].value.as_connection().unwrap();
        assert_eq!(connection.type_name(), "MyFirstCSTConnection");
        assert_eq!(connection.get("api_base"), Some("mock"));
    }

    #[test]
    fn test_resolve_llm_connection_to_inputs() {
        let tool = Tool::new("mock", ToolType::Python)
            .with_input("conn", InputDefinition::new(["CustomConnection"]));
        let no_hints = IndexMap::new();

        // Case 1: node.connection is not specified
        let node = Node::new("mock", ToolType::Python)
            .with_input("conn", InputAssignment::literal("conn_name"));
        let resolver = ToolResolver::new(".", azure_connections());
        let err = resolver
            .resolve_llm_connection_to_inputs(&node, &tool, &no_hints)
            .unwrap_err();
        assert!(matches!(err, ResolveError::ConnectionNotFound(_)));

        // Case 2: referenced connection missing from the table
        let node = Node::new("mock", ToolType::Python)
            .with_connection("conn_name1")
            .with_input("conn", InputAssignment::literal("conn_name"));
        let resolver = ToolResolver::new(".", IndexMap::new());
        let err = resolver
            .resolve_llm_connection_to_inputs(&node, &tool, &no_hints)
            .unwrap_err();
        assert!(matches!(err, ResolveError::ConnectionNotFound(_)));

        // Case 3: no input can accept a connection
        let int_tool =
            Tool::new("mock", ToolType::Python).with_input("conn", InputDefinition::new(["int"]));
        let node = Node::new("mock", ToolType::Python)
            .with_connection("conn_name")
            .with_input("conn", InputAssignment::literal("conn_name"));
        let resolver = ToolResolver::new(".", azure_connections());
        let err = resolver
            .resolve_llm_connection_to_inputs(&node, &int_tool, &no_hints)
            .unwrap_err();
        match err {
            ResolveError::InvalidConnectionType(message) => {
                assert!(message.contains("Connection type can not be resolved for tool"))
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Case 4: stored type is outside the accepted set
        let openai_tool = Tool::new("mock", ToolType::Python)
            .with_input("conn", InputDefinition::new(["OpenAIConnection"]));
        let err = resolver
            .resolve_llm_connection_to_inputs(&node, &openai_tool, &no_hints)
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidConnectionType(_)));

        // Case 5: normal case
        let both_tool = Tool::new("mock", ToolType::Python).with_input(
            "conn",
            InputDefinition::new(["OpenAIConnection", "AzureOpenAIConnection"]),
        );
        let (key, connection) = resolver
            .resolve_llm_connection_to_inputs(&node, &both_tool, &no_hints)
            .unwrap();
        assert_eq!(key, "conn");
        assert_eq!(connection.type_name(), "AzureOpenAIConnection");
    }

    #[test]
    fn test_resolve_llm_connection_uses_loader_hints() {
        let tool = Tool::new("mock", ToolType::Python);
        let hints = IndexMap::from([(
            "connection".to_string(),
            "AzureOpenAIConnection".to_string(),
        )]);
        let node = Node::new("mock", ToolType::Python).with_connection("conn_name");
        let resolver = ToolResolver::new(".", azure_connections());
        let (key, connection) = resolver
            .resolve_llm_connection_to_inputs(&node, &tool, &hints)
            .unwrap();
        assert_eq!(key, "connection");
        assert_eq!(connection.type_name(), "AzureOpenAIConnection");
    }

    #[test]
    fn test_resolve_llm_node() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("chat.prompt"), "{{text}}![image]({{image}})").unwrap();
        std::fs::write(dir.path().join("logo.jpg"), b"fake image bytes").unwrap();

        let resolver = ToolResolver::new(dir.path(), azure_connections())
            .with_tool_loader(Arc::new(llm_chat_loader()));
        let node = Node::new("mock", ToolType::Llm)
            .with_source(ToolSource::code("chat.prompt"))
            .with_input("conn", InputAssignment::literal("conn_name"))
            .with_input("text", InputAssignment::literal("Hello World!"))
            .with_input("image", InputAssignment::literal("logo.jpg"))
            .with_connection("conn_name")
            .with_provider("openai");

        let resolved = resolver.resolve_tool_by_node(&node, true).unwrap();
        assert_eq!(resolved.node.inputs.len(), 2);
        assert!(matches!(
            resolved.node.inputs["image"].value,
            FlowValue::Image(_)
        ));

        let output = resolved.callable.call(&bound_args(&resolved)).unwrap();
        let prompt = output.as_str().unwrap();
        assert!(prompt.starts_with("Hello World!![image](Image("));
        assert!(prompt.ends_with("))"));
    }

    #[test]
    fn test_resolve_script_node() {
        let resolver = ToolResolver::new(".", azure_connections())
            .with_tool_loader(Arc::new(script_loader()));
        let node = Node::new("mock", ToolType::Python)
            .with_source(ToolSource::code("sample.py"))
            .with_input("conn", InputAssignment::literal("conn_name"))
            .with_input("prompt", InputAssignment::literal("{{text}}"))
            .with_input("text", InputAssignment::literal("Hello World!"))
            .with_connection("conn_name");

        let resolved = resolver.resolve_tool_by_node(&node, true).unwrap();
        assert_eq!(resolved.node.inputs.len(), 2);

        // The connection moved into init args, concretely typed.
        let init_args = resolved.init_args.as_ref().unwrap();
        assert_eq!(
            init_args["conn"].as_connection().unwrap().type_name(),
            "AzureOpenAIConnection"
        );

        let output = resolved.callable.call(&bound_args(&resolved)).unwrap();
        assert_eq!(output, json!("Hello World!"));
    }

    #[test]
    fn test_resolve_package_node() {
        let mut loader = RegistryToolLoader::new();
        let tool = Tool::new("render", ToolType::Python)
            .with_input("conn", InputDefinition::new(["AzureOpenAIConnection"]));
        loader.register_package_tool(
            LoadedTool::new(tool, rendering_callable()).with_init_inputs(["conn"]),
        );

        let resolver =
            ToolResolver::new(".", azure_connections()).with_tool_loader(Arc::new(loader));
        let node = Node::new("mock", ToolType::Python)
            .with_source(ToolSource::package("render"))
            .with_input("conn", InputAssignment::literal("conn_name"))
            .with_input("prompt", InputAssignment::literal("{{text}}"))
            .with_input("text", InputAssignment::literal("Hello World!"))
            .with_connection("conn_name");

        let resolved = resolver.resolve_tool_by_node(&node, true).unwrap();
        assert_eq!(resolved.node.inputs.len(), 2);
        let output = resolved.callable.call(&bound_args(&resolved)).unwrap();
        assert_eq!(output, json!("Hello World!"));
    }

    #[test]
    fn test_integrate_prompt_in_package_node() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("extension.prompt"), "{{text}}").unwrap();

        let mut loader = RegistryToolLoader::new();
        let tool = Tool::new("completion", ToolType::CustomLlm)
            .with_input("prompt", InputDefinition::new(["prompt_template"]));
        loader.register_package_tool(LoadedTool::new(
            tool,
            rendering_callable().with_streaming_option("stream_enabled"),
        ));

        let resolver =
            ToolResolver::new(dir.path(), azure_connections()).with_tool_loader(Arc::new(loader));
        let node = Node::new("mock", ToolType::CustomLlm)
            .with_source(ToolSource::package_with_prompt("completion", "extension.prompt"))
            .with_input("text", InputAssignment::literal("Hello World!"))
            .with_connection("conn_name");

        let resolved = resolver.resolve_tool_by_node(&node, true).unwrap();
        assert_eq!(
            resolved.callable.streaming_option_parameter(),
            Some("stream_enabled")
        );
        assert!(matches!(
            resolved.node.inputs["prompt"].value,
            FlowValue::Template(_)
        ));
        let output = resolved.callable.call(&bound_args(&resolved)).unwrap();
        assert_eq!(output, json!("Hello World!"));
    }

    #[test]
    fn test_custom_llm_tool_without_prompt_input_fails() {
        let mut loader = RegistryToolLoader::new();
        let tool = Tool::new("completion", ToolType::CustomLlm);
        loader.register_package_tool(LoadedTool::new(tool, rendering_callable()));

        let resolver =
            ToolResolver::new(".", azure_connections()).with_tool_loader(Arc::new(loader));
        let node = Node::new("mock", ToolType::CustomLlm)
            .with_source(ToolSource::package_with_prompt("completion", "extension.prompt"));
        let err = resolver.resolve_tool_by_node(&node, true).unwrap_err();
        assert!(matches!(
            err.kind(),
            ResolveError::InvalidCustomLlmTool { .. }
        ));
    }

    #[test]
    fn test_merge_connection_overrides() {
        let mut resolver = ToolResolver::new(".", azure_connections());
        resolver.merge_connection_overrides(IndexMap::from([(
            "conn_name".to_string(),
            ConnectionRecord::new("OpenAIConnection").with_value("api_key", "override"),
        )]));
        assert_eq!(
            resolver.connections()["conn_name"].connection_type,
            "OpenAIConnection"
        );
    }
}
