use crate::{ToolError, ToolInvocation, ToolKind, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_SUGGESTION_DISTANCE: usize = 3;

/// A named capability able to validate arguments and produce invocations.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;

    fn kind(&self) -> ToolKind;

    fn build(&self, arguments: Value) -> Result<Box<dyn ToolInvocation>, ToolError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Seam between the scheduler and whatever owns the tool catalogue.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Arc<dyn ToolInvocation>, ValidationError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn build_invocation(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Arc<dyn ToolInvocation>, ValidationError> {
        let Some(tool) = self.get(tool_name) else {
            return Err(ValidationError::UnknownTool {
                name: tool_name.to_string(),
                hint: suggestion_hint(tool_name, &self.names()),
            });
        };

        let invalid = |message: String| ValidationError::InvalidArguments {
            tool: tool_name.to_string(),
            message,
        };
        validate_tool_arguments(&tool.parameters(), &arguments)
            .map_err(|error| invalid(tool_error_message(error)))?;
        let invocation = tool
            .build(arguments)
            .map_err(|error| invalid(tool_error_message(error)))?;
        Ok(Arc::from(invocation))
    }
}

#[async_trait]
impl ToolResolver for ToolRegistry {
    async fn resolve(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Arc<dyn ToolInvocation>, ValidationError> {
        self.build_invocation(tool_name, arguments)
    }
}

fn tool_error_message(error: ToolError) -> String {
    match error {
        ToolError::Validation(message) | ToolError::Execution(message) => message,
        ToolError::Cancelled => "cancelled".to_string(),
    }
}

fn suggestion_hint(requested: &str, names: &[String]) -> String {
    let best = names
        .iter()
        .map(|name| (edit_distance(requested, name), name))
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance);
    match best {
        Some((_, name)) => format!("; did you mean '{name}'?"),
        None => String::new(),
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];
    for (i, a_char) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(a_char != *b_char);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b_chars.len()]
}

pub fn required_string_argument(arguments: &Value, key: &str) -> Result<String, ToolError> {
    optional_string_argument(arguments, key)?
        .ok_or_else(|| invalid(format!("missing required argument '{key}'")))
}

pub fn optional_string_argument(arguments: &Value, key: &str) -> Result<Option<String>, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(type_mismatch(key, "string", other)),
    }
}

pub fn optional_u64_argument(arguments: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| type_mismatch(key, "non-negative integer", value)),
    }
}

/// Checks `arguments` against the schema subset tools declare: an object
/// root, `required` keys, primitive property types and
/// `additionalProperties: false`.
pub fn validate_tool_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let Value::Object(arguments) = arguments else {
        return Err(invalid("tool arguments must be a JSON object"));
    };
    let Value::Object(schema) = schema else {
        return Err(invalid("tool schema root must be a JSON object"));
    };
    if schema
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|root| root != "object")
    {
        return Err(invalid("tool schema root type must be 'object'"));
    }

    let mut required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    if let Some(missing) = required.find(|key| !arguments.contains_key(*key)) {
        return Err(invalid(format!("missing required argument '{missing}'")));
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (key, value) in arguments {
        match properties.and_then(|properties| properties.get(key)) {
            None if closed => {
                return Err(invalid(format!(
                    "unexpected argument '{key}' not allowed by schema"
                )));
            }
            None => {}
            Some(property) => {
                let expected = property.get("type").and_then(Value::as_str);
                if let Some(expected) = expected.filter(|expected| !has_schema_type(expected, value))
                {
                    return Err(type_mismatch(key, expected, value));
                }
            }
        }
    }
    Ok(())
}

/// Unknown type names are accepted.
fn has_schema_type(expected: &str, value: &Value) -> bool {
    match (expected, value) {
        ("string", Value::String(_))
        | ("number", Value::Number(_))
        | ("boolean", Value::Bool(_))
        | ("array", Value::Array(_))
        | ("object", Value::Object(_))
        | ("null", Value::Null) => true,
        ("integer", Value::Number(number)) => number.is_i64() || number.is_u64(),
        ("string" | "number" | "integer" | "boolean" | "array" | "object" | "null", _) => false,
        _ => true,
    }
}

fn type_mismatch(key: &str, expected: &str, value: &Value) -> ToolError {
    invalid(format!(
        "argument '{key}' expected type '{expected}' but received '{}'",
        json_type_name(value)
    ))
}

fn invalid(message: impl Into<String>) -> ToolError {
    ToolError::Validation(message.into())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutputSink, ToolOutput};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct EchoTool {
        name: &'static str,
        description: &'static str,
    }

    struct EchoInvocation {
        arguments: Value,
    }

    #[async_trait]
    impl ToolInvocation for EchoInvocation {
        fn tool_name(&self) -> &str {
            "echo"
        }

        fn kind(&self) -> ToolKind {
            ToolKind::Think
        }

        fn arguments(&self) -> &Value {
            &self.arguments
        }

        fn description(&self) -> String {
            "echo text".to_string()
        }

        async fn execute(
            &self,
            _cancel: CancellationToken,
            _output: OutputSink,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(required_string_argument(
                &self.arguments,
                "text",
            )?))
        }
    }

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": { "type": "string" },
                    "repeat": { "type": "integer" }
                },
                "additionalProperties": false
            })
        }

        fn kind(&self) -> ToolKind {
            ToolKind::Think
        }

        fn build(&self, arguments: Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
            if arguments.get("text").and_then(Value::as_str) == Some("") {
                return Err(ToolError::Validation("text must not be empty".to_string()));
            }
            Ok(Box::new(EchoInvocation { arguments }))
        }
    }

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(EchoTool {
            name: "echo",
            description: "echo text",
        }));
        registry
    }

    #[test]
    fn tool_registry_latest_registration_wins() {
        let mut registry = echo_registry();
        registry.register(Arc::new(EchoTool {
            name: "echo",
            description: "second",
        }));

        let registered = registry
            .get("echo")
            .expect("tool should be present after replacement");
        assert_eq!(registered.description(), "second");
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn tool_registry_definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(EchoTool {
            name: "zeta",
            description: "z",
        }));
        registry.register(Arc::new(EchoTool {
            name: "alpha",
            description: "a",
        }));

        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(registry.unregister("zeta").is_some());
        assert_eq!(registry.names(), vec!["alpha".to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn resolve_unknown_tool_suggests_close_name() {
        let registry = echo_registry();
        let error = registry
            .resolve("ecoh", json!({"text": "hi"}))
            .await
            .err()
            .expect("unknown tool should fail");
        assert_eq!(
            error.to_string(),
            "tool 'ecoh' is not registered; did you mean 'echo'?"
        );

        let error = registry
            .resolve("completely_different", json!({}))
            .await
            .err()
            .expect("unknown tool should fail");
        assert_eq!(
            error.to_string(),
            "tool 'completely_different' is not registered"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn resolve_rejects_schema_violations() {
        let registry = echo_registry();
        let cases = [
            (json!({}), "missing required argument 'text'"),
            (json!({"text": 1}), "expected type 'string' but received 'number'"),
            (json!({"text": "a", "extra": true}), "unexpected argument 'extra'"),
            (json!("text"), "tool arguments must be a JSON object"),
            (json!({"text": ""}), "text must not be empty"),
        ];
        for (arguments, expected) in cases {
            let error = registry
                .resolve("echo", arguments)
                .await
                .err()
                .expect("invalid arguments should fail");
            assert!(
                error.to_string().contains(expected),
                "unexpected error: {error}"
            );
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn resolve_returns_executable_invocation() {
        let registry = echo_registry();
        let invocation = registry
            .resolve("echo", json!({"text": "hello", "repeat": 2}))
            .await
            .expect("valid arguments should resolve");
        assert_eq!(invocation.tool_name(), "echo");
        let output = invocation
            .execute(CancellationToken::new(), OutputSink::discard())
            .await
            .expect("echo should execute");
        assert_eq!(output.content, json!("hello"));
    }

    #[test]
    fn edit_distance_counts_single_edits() {
        assert_eq!(edit_distance("read_file", "read_file"), 0);
        assert_eq!(edit_distance("read_fle", "read_file"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }
}
