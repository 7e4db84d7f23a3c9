use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::contract::{
    normalize_field_request, parse_lambda_request, FieldRequest, LambdaRequest, ResolverContext,
};
use crate::error::{BindingError, Result};
use crate::mapping_template::MappingTemplate;
use crate::stack::Stack;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestMapping {
    /// No request template: the whole resolver context is the payload.
    Direct,
    Template(MappingTemplate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub type_name: String,
    pub field_name: String,
    pub data_source_id: String,
    pub data_source_name: String,
    pub function_id: String,
    pub request: RequestMapping,
    pub response: Option<MappingTemplate>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedInvocation {
    pub type_name: String,
    pub field_name: String,
    pub data_source: String,
    pub function_id: String,
    pub request: LambdaRequest,
    #[serde(skip)]
    pub context: ResolverContext,
}

impl ResolvedInvocation {
    /// Event body delivered to the function.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.request.payload)?)
    }
}

/// Routing table from `(type, field)` to the backend that resolves it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingTable {
    bindings: BTreeMap<(String, String), Binding>,
}

impl BindingTable {
    pub fn from_stack(stack: &Stack) -> Result<Self> {
        let mut bindings = BTreeMap::new();
        for resolver in stack.resolvers() {
            let data_source = stack
                .data_source(&resolver.data_source)
                .ok_or_else(|| BindingError::unknown("data source", resolver.data_source.clone()))?;
            if stack.function(&data_source.function).is_none() {
                return Err(BindingError::unknown("function", data_source.function.clone()));
            }

            let key = (resolver.type_name.clone(), resolver.field_name.clone());
            let binding = Binding {
                type_name: resolver.type_name.clone(),
                field_name: resolver.field_name.clone(),
                data_source_id: data_source.id.clone(),
                data_source_name: data_source.name.clone(),
                function_id: data_source.function.clone(),
                request: resolver
                    .request_mapping
                    .clone()
                    .map(RequestMapping::Template)
                    .unwrap_or(RequestMapping::Direct),
                response: resolver.response_mapping.clone(),
            };
            if bindings.insert(key, binding).is_some() {
                return Err(BindingError::DuplicateResolver {
                    type_name: resolver.type_name.clone(),
                    field_name: resolver.field_name.clone(),
                });
            }
        }
        Ok(Self { bindings })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    pub fn route(&self, type_name: &str, field_name: &str) -> Result<&Binding> {
        self.bindings
            .get(&(type_name.to_string(), field_name.to_string()))
            .ok_or_else(|| BindingError::NoResolver {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            })
    }

    pub fn resolve(&self, request: FieldRequest) -> Result<ResolvedInvocation> {
        let normalized = normalize_field_request(request)?;
        let binding = self.route(&normalized.type_name, &normalized.field_name)?;
        let request = render_request(binding, &normalized.context)?;

        debug!(
            type_name = %binding.type_name,
            field_name = %binding.field_name,
            data_source = %binding.data_source_id,
            function = %binding.function_id,
            operation = ?request.operation,
            "resolved field"
        );

        Ok(ResolvedInvocation {
            type_name: binding.type_name.clone(),
            field_name: binding.field_name.clone(),
            data_source: binding.data_source_id.clone(),
            function_id: binding.function_id.clone(),
            request,
            context: normalized.context,
        })
    }

    /// Shapes a function result into the field value. Resolvers without a
    /// response template pass the result through.
    pub fn render_response(&self, invocation: &ResolvedInvocation, result: Value) -> Result<Value> {
        let binding = self.route(&invocation.type_name, &invocation.field_name)?;
        let passthrough;
        let template = match &binding.response {
            Some(template) => template,
            None => {
                passthrough = MappingTemplate::lambda_result();
                &passthrough
            }
        };

        let mut context = invocation.context.clone();
        context.result = result;
        let rendered = render_template(binding, template, &context)?;
        serde_json::from_str(&rendered).map_err(|error| BindingError::InvalidResponse {
            type_name: binding.type_name.clone(),
            field_name: binding.field_name.clone(),
            message: error.to_string(),
        })
    }
}

/// Direct resolvers render the built-in request that forwards the whole context.
fn render_request(binding: &Binding, context: &ResolverContext) -> Result<LambdaRequest> {
    let rendered = match &binding.request {
        RequestMapping::Direct => {
            render_template(binding, &MappingTemplate::lambda_request(), context)?
        }
        RequestMapping::Template(template) => render_template(binding, template, context)?,
    };
    parse_lambda_request(&rendered).map_err(|error| BindingError::InvalidLambdaRequest {
        type_name: binding.type_name.clone(),
        field_name: binding.field_name.clone(),
        message: error.message().to_string(),
    })
}

fn render_template(
    binding: &Binding,
    template: &MappingTemplate,
    context: &ResolverContext,
) -> Result<String> {
    template
        .render(context)
        .map_err(|source| BindingError::Template {
            type_name: binding.type_name.clone(),
            field_name: binding.field_name.clone(),
            source,
        })
}
