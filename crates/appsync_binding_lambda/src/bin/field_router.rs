use std::path::Path;

use appsync_binding_core::manifest::Manifest;
use appsync_binding_core::resolution::BindingTable;
use appsync_binding_core::sample::appsync_example_stack;
use appsync_binding_lambda::adapters::directory::FunctionDirectory;
use appsync_binding_lambda::adapters::invoke::FunctionInvoker;
use appsync_binding_lambda::handlers::dispatch::handle_field_event;
use aws_sdk_lambda::types::InvocationType;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const MANIFEST_ENV: &str = "BINDING_MANIFEST";

struct AwsLambdaFunctionInvoker {
    lambda_client: aws_sdk_lambda::Client,
    directory: FunctionDirectory,
}

impl FunctionInvoker for AwsLambdaFunctionInvoker {
    fn invoke(&self, function_id: &str, payload: &[u8]) -> Result<Vec<u8>, String> {
        let function_name = self.directory.function_name(function_id)?.to_string();
        let request_payload = payload.to_vec();
        let client = self.lambda_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .invoke()
                    .function_name(function_name.clone())
                    .invocation_type(InvocationType::RequestResponse)
                    .set_payload(Some(request_payload.into()))
                    .send()
                    .await
                    .map_err(|error| format!("failed to invoke {function_name}: {error}"))?;

                let body = output
                    .payload()
                    .map(|blob| blob.as_ref().to_vec())
                    .unwrap_or_default();
                if let Some(kind) = output.function_error() {
                    return Err(format!(
                        "{function_name} returned {kind} error: {}",
                        String::from_utf8_lossy(&body)
                    ));
                }
                Ok::<_, String>(body)
            })
        })
    }
}

struct RouterDependencies {
    table: BindingTable,
    invoker: AwsLambdaFunctionInvoker,
}

fn load_binding_table() -> Result<BindingTable, Error> {
    let stack = match std::env::var(MANIFEST_ENV) {
        Ok(path) => Manifest::load(Path::new(&path))?.into_stack()?,
        Err(_) => appsync_example_stack()?,
    };
    Ok(BindingTable::from_stack(&stack)?)
}

async fn handle_request(event: LambdaEvent<Value>, deps: &RouterDependencies) -> Result<Value, Error> {
    let response = handle_field_event(event.payload, &deps.table, &deps.invoker);
    serde_json::to_value(response)
        .map_err(|error| Error::from(format!("failed to serialize dispatch response: {error}")))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_current_span(false)
        .without_time()
        .init();

    let table = load_binding_table()?;
    let directory = FunctionDirectory::from_env().map_err(Error::from)?;
    tracing::info!(bindings = table.len(), mapped_functions = directory.len(), "field router ready");

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RouterDependencies {
        table,
        invoker: AwsLambdaFunctionInvoker {
            lambda_client: aws_sdk_lambda::Client::new(&aws_config),
            directory,
        },
    };
    let deps = &deps;

    lambda_runtime::run(service_fn(move |event| async move {
        handle_request(event, deps).await
    }))
    .await
}
