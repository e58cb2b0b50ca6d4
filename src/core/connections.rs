// src/core/connections.rs
//
// Connection model: raw records injected at resolver construction, the
// registry of known connection types (including user-registered strong
// types), and the ordered matching that materializes a typed connection
// against a tool input's acceptable type list.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{ResolveError, ResolveResult};

/// A raw connection record as stored in the injected connection table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(default)]
    pub value: IndexMap<String, String>,
    /// Field names treated as secrets in addition to the ones the
    /// connection type declares.
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl ConnectionRecord {
    pub fn new(connection_type: impl Into<String>) -> Self {
        Self {
            connection_type: connection_type.into(),
            value: IndexMap::new(),
            secrets: Vec::new(),
        }
    }

    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.value.insert(field.into(), value.into());
        self
    }

    pub fn with_secret(mut self, field: impl Into<String>) -> Self {
        self.secrets.push(field.into());
        self
    }
}

/// Descriptor of a connection type known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    pub name: String,
    /// The generic base type a custom strong type derives from.
    pub base: Option<String>,
    /// Fields that must be present in a record for this type to match it.
    pub required_fields: Vec<String>,
    pub secret_fields: Vec<String>,
}

impl ConnectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            required_fields: Vec::new(),
            secret_fields: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_required_fields<I: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = I>,
    ) -> Self {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secret_fields<I: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = I>,
    ) -> Self {
        self.secret_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Registry mapping connection type name to its descriptor.
///
/// Custom strong types are registered here at startup; there is no implicit
/// discovery of caller-defined types.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    specs: IndexMap<String, ConnectionSpec>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            specs: IndexMap::new(),
        }
    }

    /// Registry pre-populated with the built-in connection types.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            ConnectionSpec::new("OpenAIConnection")
                .with_required_fields(["api_key"])
                .with_secret_fields(["api_key"]),
        );
        registry.register(
            ConnectionSpec::new("AzureOpenAIConnection")
                .with_required_fields(["api_key", "api_base"])
                .with_secret_fields(["api_key"]),
        );
        registry.register(ConnectionSpec::new("CustomConnection"));
        registry
    }

    pub fn register(&mut self, spec: ConnectionSpec) {
        debug!("Registered connection type: {}", spec.name);
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A materialized, typed connection bound to a tool input.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    type_name: String,
    fields: IndexMap<String, String>,
    secret_fields: Vec<String>,
}

impl Connection {
    fn from_record(type_name: &str, record: &ConnectionRecord, spec: &ConnectionSpec) -> Self {
        let mut secret_fields = spec.secret_fields.clone();
        for field in &record.secrets {
            if !secret_fields.contains(field) {
                secret_fields.push(field.clone());
            }
        }
        Self {
            type_name: type_name.to_string(),
            fields: record.value.clone(),
            secret_fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, (field, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if self.secret_fields.contains(field) {
                write!(f, "{}=***", field)?;
            } else {
                write!(f, "{}={}", field, value)?;
            }
        }
        write!(f, ")")
    }
}

/// Look up `name` in the connection table and materialize it against the
/// ordered `accepted` type list.
///
/// A record matches an accepted type when the type tags are equal, when the
/// stored type is a registered subtype of the accepted base, or when the
/// accepted type is a custom strong type deriving from the stored generic
/// type with all of its required fields present. The first match in declared
/// order wins, which also means an under-specified strong subtype loses to a
/// generic base type offered earlier.
pub fn resolve_connection(
    registry: &ConnectionRegistry,
    table: &IndexMap<String, ConnectionRecord>,
    name: &str,
    accepted: &[String],
) -> ResolveResult<Connection> {
    let record = table.get(name).ok_or_else(|| {
        ResolveError::ConnectionNotFound(format!(
            "Connection '{}' not found in the connection table",
            name
        ))
    })?;

    for accepted_type in accepted {
        let Some(spec) = registry.get(accepted_type) else {
            continue;
        };

        if record.connection_type == *accepted_type {
            debug!("Connection '{}' matched type '{}'", name, accepted_type);
            return Ok(Connection::from_record(accepted_type, record, spec));
        }

        // Stored type is a registered subtype of the accepted base.
        if let Some(stored_spec) = registry.get(&record.connection_type) {
            if stored_spec.base.as_deref() == Some(accepted_type.as_str()) {
                return Ok(Connection::from_record(
                    &record.connection_type,
                    record,
                    stored_spec,
                ));
            }
        }

        // Accepted type is a custom strong subtype of the stored generic
        // type; it only matches when fully specified by the record.
        if spec.base.as_deref() == Some(record.connection_type.as_str())
            && spec
                .required_fields
                .iter()
                .all(|field| record.value.contains_key(field))
        {
            debug!(
                "Connection '{}' promoted to strong type '{}'",
                name, accepted_type
            );
            return Ok(Connection::from_record(accepted_type, record, spec));
        }
    }

    let listed = accepted
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ");
    Err(ResolveError::InvalidConnectionType(format!(
        "Connection type '{}' is not supported, valid types [{}]",
        record.connection_type, listed
    )))
}
