use appsync_binding_core::contract::{FieldRequest, ValidationError};
use appsync_binding_core::error::BindingError;
use appsync_binding_core::resolution::BindingTable;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::adapters::invoke::FunctionInvoker;

pub const INVOCATION_ERROR: &str = "InvocationError";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchError {
    pub error_type: String,
    pub error_message: String,
}

/// What the router hands back to the API: the field value or a typed error.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DispatchResponse {
    Data(Value),
    Error(DispatchError),
}

impl DispatchResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

pub fn handle_field_event(
    event: Value,
    table: &BindingTable,
    invoker: &dyn FunctionInvoker,
) -> DispatchResponse {
    let request = match field_request_from_event(event) {
        Ok(value) => value,
        Err(error) => return binding_error_response(&BindingError::Validation(error)),
    };

    let invocation = match table.resolve(request) {
        Ok(value) => value,
        Err(error) => return binding_error_response(&error),
    };

    let payload = match invocation.payload_bytes() {
        Ok(value) => value,
        Err(error) => return binding_error_response(&error),
    };

    let raw = match invoker.invoke(&invocation.function_id, &payload) {
        Ok(value) => value,
        Err(message) => {
            warn!(
                type_name = %invocation.type_name,
                field_name = %invocation.field_name,
                function = %invocation.function_id,
                error = %message,
                "function invocation failed"
            );
            return DispatchResponse::Error(DispatchError {
                error_type: INVOCATION_ERROR.to_string(),
                error_message: message,
            });
        }
    };

    let result = match decode_result(&raw) {
        Ok(value) => value,
        Err(error) => return binding_error_response(&BindingError::Json(error)),
    };

    match table.render_response(&invocation, result) {
        Ok(value) => {
            info!(
                type_name = %invocation.type_name,
                field_name = %invocation.field_name,
                function = %invocation.function_id,
                payload_bytes = payload.len(),
                result_bytes = raw.len(),
                "field resolved"
            );
            DispatchResponse::Data(value)
        }
        Err(error) => binding_error_response(&error),
    }
}

/// Accepts either the direct-resolver event (`info.parentTypeName`,
/// `info.fieldName`) or a flat `{typeName, fieldName, ...}` request.
pub fn field_request_from_event(event: Value) -> Result<FieldRequest, ValidationError> {
    let Value::Object(mut object) = event else {
        return Err(ValidationError::new("Field event must be a JSON object"));
    };

    let Some(info) = object.remove("info") else {
        return serde_json::from_value(Value::Object(object))
            .map_err(|error| ValidationError::new(format!("Malformed field request: {error}")));
    };

    let Value::Object(mut info) = info else {
        return Err(ValidationError::new("info must be a JSON object"));
    };
    let type_name = take_string(&mut info, "parentTypeName")?;
    let field_name = take_string(&mut info, "fieldName")?;

    let mut request = FieldRequest::new(type_name, field_name);
    request.arguments = object.remove("arguments").unwrap_or(Value::Null);
    request.source = object.remove("source").unwrap_or(Value::Null);
    request.identity = object.remove("identity").unwrap_or(Value::Null);
    request.request = object.remove("request").unwrap_or(Value::Null);
    request.stash = object.remove("stash").unwrap_or(Value::Null);
    request.variables = info.remove("variables").unwrap_or(Value::Null);
    Ok(request)
}

fn take_string(info: &mut Map<String, Value>, key: &str) -> Result<String, ValidationError> {
    match info.remove(key) {
        Some(Value::String(value)) => Ok(value),
        _ => Err(ValidationError::new(format!("info.{key} must be a string"))),
    }
}

fn decode_result(raw: &[u8]) -> Result<Value, serde_json::Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw)
}

fn binding_error_response(error: &BindingError) -> DispatchResponse {
    warn!(error_type = error.error_type(), error = %error, "field dispatch rejected");
    DispatchResponse::Error(DispatchError {
        error_type: error.error_type().to_string(),
        error_message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use appsync_binding_core::sample::appsync_example_stack;
    use serde_json::json;

    use super::*;

    struct ScriptedInvoker {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Result<Vec<u8>, String>,
    }

    impl ScriptedInvoker {
        fn replying(reply: Value) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply: Ok(reply.to_string().into_bytes()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply: Err(message.to_string()),
            }
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().expect("poisoned mutex").clone()
        }
    }

    impl FunctionInvoker for ScriptedInvoker {
        fn invoke(&self, function_id: &str, payload: &[u8]) -> Result<Vec<u8>, String> {
            let payload = serde_json::from_slice(payload).expect("payload should be JSON");
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push((function_id.to_string(), payload));
            self.reply.clone()
        }
    }

    fn sample_table() -> BindingTable {
        let stack = appsync_example_stack().expect("sample stack");
        BindingTable::from_stack(&stack).expect("binding table")
    }

    #[test]
    fn routes_direct_resolver_event_shape_to_its_function() {
        let invoker = ScriptedInvoker::replying(json!({"id": "e1", "name": "Acme"}));
        let response = handle_field_event(
            json!({
                "arguments": {},
                "source": {"id": "p1", "employerId": "e1"},
                "info": {"parentTypeName": "Employee", "fieldName": "employer", "variables": {}}
            }),
            &sample_table(),
            &invoker,
        );

        assert_eq!(
            response,
            DispatchResponse::Data(json!({"id": "e1", "name": "Acme"}))
        );
        assert_eq!(
            invoker.calls(),
            vec![(
                "EmployeerLambdaFucntion".to_string(),
                json!({"employerId": "e1"})
            )]
        );
    }

    #[test]
    fn accepts_flat_field_requests() {
        let invoker = ScriptedInvoker::replying(json!([]));
        let response = handle_field_event(
            json!({"typeName": "Query", "fieldName": "employees"}),
            &sample_table(),
            &invoker,
        );

        assert_eq!(response, DispatchResponse::Data(json!([])));
        let calls = invoker.calls();
        assert_eq!(calls[0].0, "EmployeeLambdaFucntion");
        assert_eq!(calls[0].1["info"]["parentTypeName"], "Query");
    }

    #[test]
    fn unbound_field_is_rejected_without_invoking() {
        let invoker = ScriptedInvoker::replying(Value::Null);
        let response = handle_field_event(
            json!({"typeName": "Query", "fieldName": "employers"}),
            &sample_table(),
            &invoker,
        );

        let DispatchResponse::Error(error) = response else {
            panic!("expected an error response");
        };
        assert_eq!(error.error_type, "UnboundField");
        assert!(invoker.calls().is_empty());
    }

    #[test]
    fn malformed_info_is_a_validation_error() {
        let invoker = ScriptedInvoker::replying(Value::Null);
        let response = handle_field_event(
            json!({"info": {"parentTypeName": "Query"}}),
            &sample_table(),
            &invoker,
        );

        let DispatchResponse::Error(error) = response else {
            panic!("expected an error response");
        };
        assert_eq!(error.error_type, "ValidationError");
        assert_eq!(error.error_message, "info.fieldName must be a string");
    }

    #[test]
    fn invoker_failures_surface_as_invocation_errors() {
        let invoker = ScriptedInvoker::failing("function timed out");
        let response = handle_field_event(
            json!({"typeName": "Query", "fieldName": "employees"}),
            &sample_table(),
            &invoker,
        );

        assert_eq!(
            serde_json::to_value(&response).expect("serializes"),
            json!({"errorType": "InvocationError", "errorMessage": "function timed out"})
        );
    }

    #[test]
    fn empty_function_output_is_null() {
        assert_eq!(decode_result(b"").expect("empty"), Value::Null);
        assert_eq!(decode_result(b" \n").expect("blank"), Value::Null);
        assert!(decode_result(b"{").is_err());
    }
}
