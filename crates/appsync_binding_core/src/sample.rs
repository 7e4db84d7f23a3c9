//! The employee directory stack: one API, a shared layer and three functions.

use crate::error::{BindingError, Result};
use crate::mapping_template::MappingTemplate;
use crate::stack::{
    ApiKeyConfig, AuthorizationConfig, AuthorizationMode, Code, FunctionProps, GraphqlApi,
    LayerRef, OutputValue, ResolverProps, Runtime, SchemaSource, Stack,
};

pub const SAMPLE_STACK_ID: &str = "AppsyncExampleStack";
pub const SAMPLE_SCHEMA_PATH: &str = "schema/schema.gql";
pub const SAMPLE_LAYER_PATH: &str = "lambda-layer";
pub const SAMPLE_FUNCTION_PATHS: [&str; 3] = ["lambda/query", "lambda/employeer", "lambda/employees"];

const FUNCTION_TIMEOUT_SECS: u32 = 10;

const EMPLOYER_REQUEST: &str = r#"
        {
          "version" : "2017-02-28",
          "operation": "Invoke",
          "payload": $util.toJson({"employerId" : $context.source.employerId })
        }
      "#;

const EMPLOYEES_REQUEST: &str = r#"
        {
          "version" : "2017-02-28",
          "operation": "Invoke",
          "payload": $util.toJson({"employerId" : $context.source.id })
        }
      "#;

pub fn appsync_example_stack() -> Result<Stack> {
    let mut stack = Stack::new(SAMPLE_STACK_ID);

    let layer = stack.add_layer("Layer", Code::asset(SAMPLE_LAYER_PATH))?;

    stack.add_graphql_api(GraphqlApi {
        id: "GRAPHQL_API".to_string(),
        name: "cdk-api".to_string(),
        schema: SchemaSource::File(SAMPLE_SCHEMA_PATH.into()),
        authorization: AuthorizationConfig {
            default_authorization: AuthorizationMode::api_key(ApiKeyConfig {
                description: None,
                expires_after_days: 365,
            }),
            additional_authorization_modes: Vec::new(),
        },
        xray_enabled: true,
    })?;

    stack.add_output("APIGraphQlURL", OutputValue::GraphqlUrl)?;
    stack.add_output("GraphQLAPIKey", OutputValue::ApiKey)?;

    let employee_fn = stack.add_function(
        "EmployeeLambdaFucntion",
        node_function(SAMPLE_FUNCTION_PATHS[0], &layer),
    )?;
    let employer_fn = stack.add_function(
        "EmployeerLambdaFucntion",
        node_function(SAMPLE_FUNCTION_PATHS[1], &layer),
    )?;
    let employees_fn = stack.add_function(
        "EmployeesLambdaFucntion",
        node_function(SAMPLE_FUNCTION_PATHS[2], &layer),
    )?;

    let query_source = stack.add_lambda_data_source("lamdaDataSource", &employee_fn)?;
    let employer_source = stack.add_lambda_data_source("employer", &employer_fn)?;
    let employees_source = stack.add_lambda_data_source("employees", &employees_fn)?;

    stack.create_resolver(&query_source, ResolverProps::new("Query", "employees"))?;
    stack.create_resolver(
        &employer_source,
        ResolverProps::new("Employee", "employer").with_request_mapping(template(EMPLOYER_REQUEST)?),
    )?;
    stack.create_resolver(
        &employees_source,
        ResolverProps::new("Employer", "employees")
            .with_request_mapping(template(EMPLOYEES_REQUEST)?),
    )?;

    Ok(stack)
}

fn node_function(asset: &str, layer: &LayerRef) -> FunctionProps {
    let mut props = FunctionProps::new(Runtime::Nodejs12x, Code::asset(asset), "index.handler");
    props.timeout_secs = FUNCTION_TIMEOUT_SECS;
    props.layers.push(layer.clone());
    props
}

fn template(text: &str) -> Result<MappingTemplate> {
    MappingTemplate::from_string(text).map_err(|error| {
        BindingError::InvalidConfig(format!("built-in request template does not parse: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_three_functions_behind_one_layer() {
        let stack = appsync_example_stack().expect("sample stack");
        assert_eq!(stack.functions().len(), 3);
        for function in stack.functions() {
            assert_eq!(function.runtime, Runtime::Nodejs12x);
            assert_eq!(function.timeout_secs, 10);
            assert_eq!(function.layers, vec!["Layer".to_string()]);
        }
    }

    #[test]
    fn query_resolver_is_direct_and_nested_resolvers_use_templates() {
        let stack = appsync_example_stack().expect("sample stack");
        let by_field = |type_name: &str, field_name: &str| {
            stack
                .resolvers()
                .iter()
                .find(|resolver| resolver.type_name == type_name && resolver.field_name == field_name)
                .cloned()
                .expect("resolver present")
        };

        assert!(by_field("Query", "employees").request_mapping.is_none());
        let employer = by_field("Employee", "employer")
            .request_mapping
            .expect("employer template");
        assert_eq!(employer.context_paths(), vec!["context.source.employerId"]);
        let employees = by_field("Employer", "employees")
            .request_mapping
            .expect("employees template");
        assert_eq!(employees.context_paths(), vec!["context.source.id"]);
    }

    #[test]
    fn api_key_lasts_a_year() {
        let stack = appsync_example_stack().expect("sample stack");
        let api = stack.api().expect("api declared");
        let config = api.authorization.api_key_config().expect("api key auth");
        assert_eq!(config.expires_after_days, 365);
        assert!(api.xray_enabled);
    }
}
