use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const TEMPLATE_VERSION_2017: &str = "2017-02-28";
pub const TEMPLATE_VERSION_2018: &str = "2018-05-29";
pub const SUPPORTED_TEMPLATE_VERSIONS: [&str; 2] = [TEMPLATE_VERSION_2017, TEMPLATE_VERSION_2018];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LambdaOperation {
    Invoke,
    BatchInvoke,
}

/// Request document a Lambda data source understands, as rendered by a
/// request mapping template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LambdaRequest {
    pub version: String,
    pub operation: LambdaOperation,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolverInfo {
    pub field_name: String,
    pub parent_type_name: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Everything a mapping template can reach through `$context` / `$ctx`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolverContext {
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub identity: Value,
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub info: ResolverInfo,
    #[serde(default)]
    pub stash: Map<String, Value>,
    #[serde(default)]
    pub prev: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
}

/// One field to resolve, as handed to the routing table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldRequest {
    pub type_name: String,
    pub field_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub identity: Value,
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub stash: Value,
}

impl FieldRequest {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
            arguments: Value::Null,
            source: Value::Null,
            identity: Value::Null,
            request: Value::Null,
            variables: Value::Null,
            stash: Value::Null,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_source(mut self, source: Value) -> Self {
        self.source = source;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFieldRequest {
    pub type_name: String,
    pub field_name: String,
    pub context: ResolverContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub fn normalize_field_request(
    request: FieldRequest,
) -> Result<NormalizedFieldRequest, ValidationError> {
    let type_name = request.type_name.trim().to_string();
    if type_name.is_empty() {
        return Err(ValidationError::new("typeName cannot be empty"));
    }

    let field_name = request.field_name.trim().to_string();
    if field_name.is_empty() {
        return Err(ValidationError::new("fieldName cannot be empty"));
    }

    let arguments = object_or_empty(request.arguments, "arguments")?;
    let variables = object_or_empty(request.variables, "variables")?;
    let stash = object_or_empty(request.stash, "stash")?;

    if !matches!(request.source, Value::Null | Value::Object(_)) {
        return Err(ValidationError::new("source must be a JSON object or null"));
    }

    Ok(NormalizedFieldRequest {
        context: ResolverContext {
            arguments,
            source: request.source,
            identity: request.identity,
            request: request.request,
            info: ResolverInfo {
                field_name: field_name.clone(),
                parent_type_name: type_name.clone(),
                variables,
            },
            stash,
            prev: Value::Null,
            result: Value::Null,
        },
        type_name,
        field_name,
    })
}

pub fn parse_lambda_request(rendered: &str) -> Result<LambdaRequest, ValidationError> {
    let request: LambdaRequest = serde_json::from_str(rendered)
        .map_err(|error| ValidationError::new(format!("Malformed request document: {error}")))?;

    if !SUPPORTED_TEMPLATE_VERSIONS.contains(&request.version.as_str()) {
        return Err(ValidationError::new(format!(
            "Unsupported template version '{}'",
            request.version
        )));
    }

    if request.operation == LambdaOperation::BatchInvoke && !request.payload.is_array() {
        return Err(ValidationError::new(
            "BatchInvoke payload must be a JSON array",
        ));
    }

    Ok(request)
}

fn object_or_empty(value: Value, name: &str) -> Result<Map<String, Value>, ValidationError> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::new(format!(
            "{name} must be a JSON object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn normalize_field_request_rejects_blank_type_name() {
        let error = normalize_field_request(FieldRequest::new(" ", "employees"))
            .expect_err("request should fail");
        assert_eq!(error.message(), "typeName cannot be empty");
    }

    #[test]
    fn normalize_field_request_rejects_array_arguments() {
        let request = FieldRequest::new("Query", "employees").with_arguments(json!([1, 2]));
        let error = normalize_field_request(request).expect_err("request should fail");
        assert_eq!(error.message(), "arguments must be a JSON object");
    }

    #[test]
    fn normalize_field_request_fills_resolver_info() {
        let request = FieldRequest::new(" Employee ", "employer")
            .with_source(json!({"id": "e-1", "employerId": "c-9"}));

        let normalized = normalize_field_request(request).expect("request should pass");
        assert_eq!(normalized.type_name, "Employee");
        assert_eq!(normalized.context.info.parent_type_name, "Employee");
        assert_eq!(normalized.context.info.field_name, "employer");
        assert!(normalized.context.arguments.is_empty());
        assert_eq!(normalized.context.source["employerId"], "c-9");
    }

    #[test]
    fn parse_lambda_request_rejects_unknown_version() {
        let error = parse_lambda_request(
            r#"{"version": "2099-01-01", "operation": "Invoke", "payload": {}}"#,
        )
        .expect_err("version should be rejected");
        assert_eq!(error.message(), "Unsupported template version '2099-01-01'");
    }

    #[test]
    fn parse_lambda_request_requires_array_for_batch_invoke() {
        let error = parse_lambda_request(
            r#"{"version": "2018-05-29", "operation": "BatchInvoke", "payload": {"id": 1}}"#,
        )
        .expect_err("batch payload should be an array");
        assert_eq!(error.message(), "BatchInvoke payload must be a JSON array");
    }

    #[test]
    fn parse_lambda_request_defaults_missing_payload_to_null() {
        let request =
            parse_lambda_request(r#"{"version": "2017-02-28", "operation": "Invoke"}"#)
                .expect("request should parse");
        assert_eq!(request.operation, LambdaOperation::Invoke);
        assert!(request.payload.is_null());
    }
}
