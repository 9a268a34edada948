//! Tool contract — one discrete, schema-described operation the model may
//! request.
//!
//! `safe_execute` is the containment boundary: argument validation runs
//! before the tool body, and every failure inside the body becomes a normal
//! failure result. Nothing a tool does can crash the executor loop.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// Type tag for a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn as_schema_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    /// Filled into the arguments when an optional parameter is omitted.
    pub default: Option<Value>,
    /// Closed set of accepted string values.
    pub allowed: Option<Vec<String>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            default: None,
            allowed: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn one_of<S: Into<String>>(mut self, allowed: impl IntoIterator<Item = S>) -> Self {
        self.allowed = Some(allowed.into_iter().map(Into::into).collect());
        self
    }
}

/// Result of one tool invocation.
///
/// Exactly one of success/error holds; the constructors are the only way to
/// build one, which keeps that invariant.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

impl ToolResult {
    /// A successful result carrying a data payload.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
            metadata: HashMap::new(),
        }
    }

    /// A failure result carrying an error message.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Render as observation text for the model.
    pub fn to_observation(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"unserializable tool result"}"#.to_string()
        })
    }
}

/// Validate arguments against a parameter contract.
///
/// Returns the normalized arguments (defaults filled in) or the rejection
/// message. Runs entirely before any tool body.
pub(crate) fn validate_args(
    params: &[ToolParameter],
    args: &Value,
) -> Result<Value, String> {
    let mut map = match args {
        Value::Object(m) => m.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return Err("Arguments must be a JSON object".to_string()),
    };

    for param in params {
        match map.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    return Err(format!("Missing required parameter: {}", param.name));
                }
                if let Some(ref default) = param.default {
                    map.insert(param.name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let Some(ref allowed) = param.allowed {
                    let matches = value
                        .as_str()
                        .is_some_and(|s| allowed.iter().any(|a| a == s));
                    if !matches {
                        return Err(format!(
                            "Invalid value for parameter {}: expected one of [{}]",
                            param.name,
                            allowed.join(", ")
                        ));
                    }
                }
            }
        }
    }

    Ok(Value::Object(map))
}

/// A discrete operation a language model may request.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// Ordered parameter contract.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Whether the tool only reads state.
    fn read_only(&self) -> bool {
        false
    }

    /// Whether the tool needs an authenticated collaborator.
    fn requires_auth(&self) -> bool {
        false
    }

    /// The tool body. Called only with validated, default-filled arguments.
    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError>;

    /// Descriptor offered to the model.
    fn definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in self.parameters() {
            let mut prop = serde_json::Map::new();
            prop.insert(
                "type".into(),
                Value::String(param.param_type.as_schema_str().into()),
            );
            if !param.description.is_empty() {
                prop.insert("description".into(), Value::String(param.description.clone()));
            }
            if let Some(ref allowed) = param.allowed {
                prop.insert(
                    "enum".into(),
                    Value::Array(allowed.iter().cloned().map(Value::String).collect()),
                );
            }
            if let Some(ref default) = param.default {
                prop.insert("default".into(), default.clone());
            }
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Validate, then execute, converting every failure into a result.
    ///
    /// Contract violations short-circuit without entering the tool body.
    async fn safe_execute(&self, args: Value, ctx: &AgentContext) -> ToolResult {
        let normalized = match validate_args(&self.parameters(), &args) {
            Ok(normalized) => normalized,
            Err(message) => {
                tracing::debug!(tool = self.name(), error = %message, "Tool arguments rejected");
                return ToolResult::fail(message);
            }
        };

        match self.execute(normalized, ctx).await {
            Ok(data) => ToolResult::ok(data),
            Err(e) => {
                tracing::debug!(tool = self.name(), error = %e, "Tool execution failed");
                ToolResult::fail(e.to_string())
            }
        }
    }
}

/// Pull a required string out of validated arguments.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: key.to_string(),
            reason: format!("expected string field '{key}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingTool {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "create_task"
        }
        fn description(&self) -> &str {
            "Create a task"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![
                ToolParameter::string("title").describe("Task title").required(),
                ToolParameter::string("priority")
                    .one_of(["low", "normal", "high"])
                    .with_default(serde_json::json!("normal")),
            ]
        }
        async fn execute(&self, args: Value, _ctx: &AgentContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ToolError::ExecutionFailed {
                    name: "create_task".into(),
                    reason: "backend unavailable".into(),
                });
            }
            Ok(serde_json::json!({ "created": args["title"], "priority": args["priority"] }))
        }
    }

    fn ctx() -> AgentContext {
        AgentContext::new("u1", "test")
    }

    #[tokio::test]
    async fn missing_required_rejected_before_body() {
        let tool = CountingTool::new(false);
        let result = tool.safe_execute(serde_json::json!({}), &ctx()).await;
        assert!(!result.success());
        assert_eq!(result.error(), Some("Missing required parameter: title"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn null_args_rejected_like_empty() {
        let tool = CountingTool::new(false);
        let result = tool.safe_execute(Value::Null, &ctx()).await;
        assert!(!result.success());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_enum_rejected_before_body() {
        let tool = CountingTool::new(false);
        let result = tool
            .safe_execute(
                serde_json::json!({"title": "x", "priority": "urgent"}),
                &ctx(),
            )
            .await;
        assert!(!result.success());
        assert!(result.error().unwrap().contains("priority"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn defaults_filled_for_omitted_optionals() {
        let tool = CountingTool::new(false);
        let result = tool
            .safe_execute(serde_json::json!({"title": "review code"}), &ctx())
            .await;
        assert!(result.success());
        assert_eq!(result.data().unwrap()["priority"], "normal");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execution_failure_becomes_failure_result() {
        let tool = CountingTool::new(true);
        let result = tool
            .safe_execute(serde_json::json!({"title": "x"}), &ctx())
            .await;
        assert!(!result.success());
        assert!(result.error().is_some());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn result_xor_invariant() {
        let ok = ToolResult::ok(serde_json::json!({"n": 1}));
        assert!(ok.success() && ok.error().is_none());
        let fail = ToolResult::fail("boom");
        assert!(!fail.success() && fail.error().is_some());
    }

    #[test]
    fn definition_includes_enum_and_required() {
        let tool = CountingTool::new(false);
        let def = tool.definition();
        assert_eq!(def.name, "create_task");
        assert_eq!(def.parameters["required"][0], "title");
        assert_eq!(def.parameters["properties"]["priority"]["enum"][2], "high");
    }

    #[test]
    fn non_object_args_rejected() {
        let params = vec![ToolParameter::string("x")];
        assert!(validate_args(&params, &serde_json::json!([1, 2])).is_err());
    }
}
