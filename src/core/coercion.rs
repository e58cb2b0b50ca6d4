// src/core/coercion.rs
//
// Literal input coercion: a declared acceptable-type list is turned into an
// ordered list of type descriptors, each tried in turn until one converts
// the raw value. Connection-typed and assistant-definition inputs need the
// resolver's context and are orchestrated there.

use serde_json::Value;
use std::path::Path;

use crate::core::connections::ConnectionRegistry;
use crate::core::flow::{FlowValue, Image};
use crate::core::tool::ValueType;
use crate::error::{ResolveError, ResolveResult};

/// One entry of the ordered acceptable-type list.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Value(ValueType),
    Connection(String),
}

/// Interpret a string-named type list. Unknown names fail as unresolved
/// rather than silently passing the value through.
pub fn build_descriptors(
    types: &[String],
    registry: &ConnectionRegistry,
) -> ResolveResult<Vec<TypeDescriptor>> {
    types
        .iter()
        .map(|name| {
            if let Some(value_type) = ValueType::from_type_name(name) {
                Ok(TypeDescriptor::Value(value_type))
            } else if registry.contains(name) {
                Ok(TypeDescriptor::Connection(name.clone()))
            } else {
                Err(ResolveError::ValueTypeUnresolved(name.clone()))
            }
        })
        .collect()
}

/// Try to convert a raw literal into the target value type.
pub fn coerce_value(
    input: &str,
    value: &Value,
    target: ValueType,
    working_dir: &Path,
) -> ResolveResult<FlowValue> {
    match target {
        ValueType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(FlowValue::Literal(value.clone())),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|n| FlowValue::Literal(Value::from(n)))
                .map_err(|_| mismatch(input, value, "int")),
            _ => Err(mismatch(input, value, "int")),
        },
        ValueType::Double => match value {
            Value::Number(_) => Ok(FlowValue::Literal(value.clone())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|n| FlowValue::Literal(Value::from(n)))
                .map_err(|_| mismatch(input, value, "double")),
            _ => Err(mismatch(input, value, "double")),
        },
        ValueType::Bool => match value {
            Value::Bool(_) => Ok(FlowValue::Literal(value.clone())),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(FlowValue::Literal(Value::Bool(true))),
                "false" => Ok(FlowValue::Literal(Value::Bool(false))),
                _ => Err(mismatch(input, value, "bool")),
            },
            _ => Err(mismatch(input, value, "bool")),
        },
        ValueType::String | ValueType::Secret => match value {
            Value::String(_) => Ok(FlowValue::Literal(value.clone())),
            Value::Number(_) | Value::Bool(_) => {
                Ok(FlowValue::Literal(Value::String(value.to_string())))
            }
            _ => Err(mismatch(input, value, &target.to_string())),
        },
        ValueType::Object => match value {
            Value::Object(_) => Ok(FlowValue::Literal(value.clone())),
            _ => Err(mismatch(input, value, "object")),
        },
        ValueType::List => match value {
            Value::Array(items) => {
                let mut converted = Vec::with_capacity(items.len());
                for item in items {
                    converted.push(coerce_list_element(input, item)?);
                }
                Ok(FlowValue::List(converted))
            }
            _ => Err(mismatch(input, value, "list")),
        },
        ValueType::Image => coerce_image(input, value, working_dir),
        ValueType::FilePath => match value {
            Value::String(_) => Ok(FlowValue::Literal(value.clone())),
            _ => Err(mismatch(input, value, "file_path")),
        },
        ValueType::PromptTemplate => match value {
            Value::String(s) => Ok(FlowValue::Template(s.clone())),
            _ => Err(mismatch(input, value, "prompt_template")),
        },
        // Assistant definitions are resolved by the tool resolver, which
        // owns the working directory and the invoker machinery.
        ValueType::AssistantDefinition => Err(ResolveError::ValueTypeUnresolved(
            "assistant_definition".to_string(),
        )),
    }
}

/// List elements that look like base64 image objects are decoded; everything
/// else passes through as a literal.
fn coerce_list_element(input: &str, item: &Value) -> ResolveResult<FlowValue> {
    match base64_image_entry(item) {
        Some((mime, data)) => Image::from_base64(mime, data)
            .map(FlowValue::Image)
            .map_err(|_| ResolveError::InvalidImage {
                input: input.to_string(),
                entry: item.to_string(),
            }),
        None => Ok(FlowValue::Literal(item.clone())),
    }
}

fn coerce_image(input: &str, value: &Value, working_dir: &Path) -> ResolveResult<FlowValue> {
    if let Some((mime, data)) = base64_image_entry(value) {
        return Image::from_base64(mime, data)
            .map(FlowValue::Image)
            .map_err(|_| ResolveError::InvalidImage {
                input: input.to_string(),
                entry: value.to_string(),
            });
    }
    if let Value::String(path) = value {
        return Image::from_file(&working_dir.join(path))
            .map(FlowValue::Image)
            .map_err(|_| mismatch(input, value, "image"));
    }
    Err(mismatch(input, value, "image"))
}

/// Recognize `{"data:image/<fmt>;base64": "<payload>"}` objects.
fn base64_image_entry(value: &Value) -> Option<(&str, &str)> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (key, data) = object.iter().next()?;
    if !key.starts_with("data:image/") || !key.ends_with(";base64") {
        return None;
    }
    let mime = key.strip_prefix("data:")?.strip_suffix(";base64")?;
    Some((mime, data.as_str()?))
}

fn mismatch(input: &str, value: &Value, expected: &str) -> ResolveError {
    let shown = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ResolveError::ValueTypeMismatch {
        input: input.to_string(),
        value: shown,
        expected: expected.to_string(),
    }
}
