//! Tool catalog — the typed capability table the runtime reasons over.
//!
//! Provides:
//! - Ordered registration (declaration order is the selector's tie-break)
//! - Tool lookup and invocation by fully-qualified name (`group.tool`)
//! - Validation that a tool call matches the registered schema
//! - Serialization of tools into the OpenAI function-calling format
//!
//! The catalog never introspects tool objects: everything it knows about a
//! tool is in its [`ToolDescriptor`], filled in by an explicit registration
//! step at startup.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::ToolError;
use crate::inference::types::{FunctionDefinition, ToolDefinition};

// ─── Capability ──────────────────────────────────────────────────────────────

/// A callable tool implementation.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    /// Run the tool with JSON `arguments`, returning a JSON result.
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Everything the runtime knows about one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique, fully-qualified name, e.g. `"filesystem.list_dir"`.
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
    pub capability: Arc<dyn ToolCapability>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        capability: Arc<dyn ToolCapability>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            capability,
        }
    }

    /// Convert to the OpenAI function-calling wire format.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters.clone(),
            },
        }
    }

    /// Basic structural check: arguments are an object and every field the
    /// schema lists as `required` is present. Type checks are left to the tool.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), ToolError> {
        let args_obj = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            _ => return Err(ToolError::invalid(&self.name, "arguments must be a JSON object")),
        };

        if let Some(required) = self.parameters.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                let has_field = args_obj.map(|obj| obj.contains_key(field)).unwrap_or(false);
                if !has_field {
                    return Err(ToolError::invalid(
                        &self.name,
                        format!("missing required field: '{field}'"),
                    ));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

// ─── ToolCatalog ─────────────────────────────────────────────────────────────

/// Source of catalog revision stamps, shared by every catalog in the process.
static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// Ordered set of registered tools.
///
/// `revision` is a process-unique stamp replaced on every mutation, so caches
/// derived from one catalog never match a different catalog's contents.
/// Clones share the stamp until one of them is mutated.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    revision: u64,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            revision: next_revision(),
        }
    }
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        if self.get(&descriptor.name).is_some() {
            return Err(ToolError::DuplicateTool {
                name: descriptor.name,
            });
        }
        tracing::debug!(tool = %descriptor.name, "registered tool");
        self.tools.push(descriptor);
        self.revision = next_revision();
        Ok(())
    }

    /// Remove a tool. Returns the removed descriptor, if it was registered.
    pub fn unregister(&mut self, name: &str) -> Option<ToolDescriptor> {
        let idx = self.tools.iter().position(|t| t.name == name)?;
        self.revision = next_revision();
        Some(self.tools.remove(idx))
    }

    /// Look up a tool by its fully-qualified name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Return all registered tool names, in declaration order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Validate a tool call: tool exists and arguments match schema.
    pub fn validate_tool_call(&self, name: &str, arguments: &Value) -> Result<(), ToolError> {
        self.get(name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?
            .validate_arguments(arguments)
    }

    /// Validate and invoke a tool by name.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let descriptor = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        descriptor.validate_arguments(&arguments)?;
        descriptor.capability.invoke(arguments).await
    }

    /// Serialize a subset of tools into the OpenAI function-calling format.
    pub fn to_tool_definitions(tools: &[ToolDescriptor]) -> Vec<ToolDefinition> {
        tools.iter().map(ToolDescriptor::to_definition).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolCapability for Echo {
        async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
            Ok(arguments)
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            format!("Test tool {name}"),
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
            Arc::new(Echo),
        )
    }

    #[test]
    fn test_register_preserves_declaration_order() {
        let mut catalog = ToolCatalog::new();
        catalog.register(descriptor("b.second")).unwrap();
        catalog.register(descriptor("a.first")).unwrap();
        assert_eq!(catalog.tool_names(), vec!["b.second", "a.first"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut catalog = ToolCatalog::new();
        catalog.register(descriptor("fs.read")).unwrap();
        let err = catalog.register(descriptor("fs.read")).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_revision_changes_on_mutation() {
        let mut catalog = ToolCatalog::new();
        let empty = catalog.revision();
        catalog.register(descriptor("fs.read")).unwrap();
        let registered = catalog.revision();
        assert_ne!(registered, empty);
        assert!(catalog.unregister("fs.read").is_some());
        let removed = catalog.revision();
        assert_ne!(removed, registered);
        assert_ne!(removed, empty);
        assert!(catalog.unregister("fs.read").is_none());
        assert_eq!(catalog.revision(), removed, "no-op removal keeps revision");
    }

    #[test]
    fn test_revisions_never_repeat_across_catalogs() {
        let mut a = ToolCatalog::new();
        let mut b = ToolCatalog::new();
        assert_ne!(a.revision(), b.revision());
        a.register(descriptor("email.send")).unwrap();
        b.register(descriptor("weather.forecast")).unwrap();
        assert_ne!(a.revision(), b.revision());

        let copy = a.clone();
        assert_eq!(copy.revision(), a.revision());
    }

    #[test]
    fn test_validate_missing_required_field() {
        let mut catalog = ToolCatalog::new();
        catalog.register(descriptor("fs.read")).unwrap();
        let err = catalog.validate_tool_call("fs.read", &json!({})).unwrap_err();
        assert!(err.to_string().contains("path"));
        catalog
            .validate_tool_call("fs.read", &json!({"path": "/tmp"}))
            .unwrap();
    }

    #[test]
    fn test_validate_rejects_non_object_arguments() {
        let d = descriptor("fs.read");
        assert!(d.validate_arguments(&json!("just a string")).is_err());
    }

    #[test]
    fn test_validate_unknown_tool() {
        let catalog = ToolCatalog::new();
        let err = catalog.validate_tool_call("nope", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_invoke_routes_to_capability() {
        let mut catalog = ToolCatalog::new();
        catalog.register(descriptor("fs.read")).unwrap();
        let out = catalog
            .invoke("fs.read", json!({"path": "/tmp/a"}))
            .await
            .unwrap();
        assert_eq!(out["path"], "/tmp/a");
    }

    #[test]
    fn test_to_tool_definitions() {
        let defs = ToolCatalog::to_tool_definitions(&[descriptor("fs.read")]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].r#type, "function");
        assert_eq!(defs[0].function.name, "fs.read");
    }
}
