//! The tool interface and its OpenAI-style function-calling definition.

pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::policy::ApprovalLevel;

/// Coarse capability class a tool declares. Used by the (out-of-scope)
/// sandbox policy hook to decide whether to isolate execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    ReadOnly,
    ReadWrite,
    Exec,
    Network,
}

/// A tool's static description, serialized in the OpenAI function-calling
/// wire shape: `{"type": "function", "function": {...}}`.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut outer = serializer.serialize_struct("ToolDefinition", 2)?;
        outer.serialize_field("type", "function")?;

        #[derive(Serialize)]
        struct Function<'a> {
            name: &'a str,
            description: &'a str,
            parameters: &'a Value,
        }
        outer.serialize_field(
            "function",
            &Function {
                name: &self.name,
                description: &self.description,
                parameters: &self.schema,
            },
        )?;
        outer.end()
    }
}

/// The capability interface consumed by the tool registry. Implementations
/// provide their own side effects; the engine only mediates policy,
/// approval, and audit around the call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn scopes(&self) -> &[Scope];
    fn default_policy(&self) -> ApprovalLevel;

    async fn execute(&self, args: Value, env: &Value) -> Result<String, String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema(),
        }
    }
}
