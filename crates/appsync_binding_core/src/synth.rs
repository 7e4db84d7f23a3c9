//! Renders a [`Stack`] into a CloudFormation template.
//!
//! Synthesis is deterministic for a given stack, asset tree and clock: resources
//! are keyed by logical id in a sorted map and asset code is addressed by its
//! content fingerprint.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::assets::{stage_assets, AssetManifest};
use crate::error::{BindingError, Result};
use crate::schema::Schema;
use crate::stack::{Code, Function, GraphqlApi, LambdaDataSource, OutputValue, Resolver, Stack};

#[path = "synth/logical_id.rs"]
mod logical_id;

pub use logical_id::logical_id;

pub const DEFAULT_ASSET_BUCKET: &str = "cdk-assets-${AWS::AccountId}-${AWS::Region}";
const IAM_POLICY_VERSION: &str = "2012-10-17";
const LAMBDA_BASIC_EXECUTION_POLICY: &str =
    ":iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

#[derive(Debug, Clone)]
pub struct SynthContext {
    pub asset_root: PathBuf,
    pub now: DateTime<Utc>,
    pub asset_bucket: String,
}

impl SynthContext {
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            now: Utc::now(),
            asset_bucket: DEFAULT_ASSET_BUCKET.to_string(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    pub resources: BTreeMap<String, Resource>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub properties: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateOutput {
    pub value: Value,
}

impl Template {
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct ApiIds {
    construct: String,
    api: String,
    schema: String,
    api_key: Option<String>,
}

pub fn synthesize(stack: &Stack, context: &SynthContext) -> Result<Template> {
    let mut template = Template::default();
    if stack.is_empty() {
        return Ok(template);
    }

    let assets = stage_assets(stack, &context.asset_root)?;

    let api_ids = match stack.api() {
        Some(api) => {
            let definition = api.schema.definition(&context.asset_root)?;
            let schema = Schema::parse(&definition)?;
            stack.validate_against(&schema)?;
            Some(emit_api(&mut template, api, definition, context)?)
        }
        None => None,
    };

    for layer in stack.layers() {
        let asset = assets
            .for_construct(&layer.id)
            .ok_or_else(|| BindingError::unknown("asset", layer.id.clone()))?;
        insert_resource(
            &mut template,
            logical_id(&[layer.id.as_str(), "Resource"]),
            Resource {
                resource_type: "AWS::Lambda::LayerVersion".to_string(),
                properties: json!({
                    "Content": {
                        "S3Bucket": {"Fn::Sub": context.asset_bucket},
                        "S3Key": asset.object_key,
                    }
                }),
                depends_on: Vec::new(),
                metadata: Some(asset_metadata(&asset.source_path, "Content")),
            },
        )?;
    }

    for function in stack.functions() {
        emit_function(&mut template, function, &assets, context)?;
    }

    if let Some(ids) = &api_ids {
        for data_source in stack.data_sources() {
            emit_data_source(&mut template, ids, data_source)?;
        }
        for resolver in stack.resolvers() {
            let data_source = stack
                .data_source(&resolver.data_source)
                .ok_or_else(|| BindingError::unknown("data source", resolver.data_source.clone()))?;
            emit_resolver(&mut template, ids, data_source, resolver)?;
        }
    }

    for output in stack.outputs() {
        let value = match (&output.value, &api_ids) {
            (OutputValue::Literal(text), _) => Value::String(text.clone()),
            (OutputValue::GraphqlUrl, Some(ids)) => get_att(&ids.api, "GraphQLUrl"),
            (OutputValue::ApiKey, Some(ApiIds {
                api_key: Some(key), ..
            })) => get_att(key, "ApiKey"),
            _ => {
                return Err(BindingError::InvalidConfig(format!(
                    "output '{}' has no resource to reference",
                    output.id
                )));
            }
        };
        let output_id = logical_id(&[output.id.as_str()]);
        if output_id.is_empty() || template.outputs.contains_key(&output_id) {
            return Err(BindingError::LogicalIdCollision(output_id));
        }
        template.outputs.insert(output_id, TemplateOutput { value });
    }

    info!(
        stack = stack.id(),
        resources = template.resources.len(),
        outputs = template.outputs.len(),
        "synthesized template"
    );
    Ok(template)
}

fn emit_api(
    template: &mut Template,
    api: &GraphqlApi,
    definition: String,
    context: &SynthContext,
) -> Result<ApiIds> {
    let api_id = logical_id(&[api.id.as_str(), "Resource"]);
    let schema_id = logical_id(&[api.id.as_str(), "Schema"]);

    let mut properties = json!({
        "AuthenticationType": api.authorization.default_authorization.authorization_type.as_str(),
        "Name": api.name,
        "XrayEnabled": api.xray_enabled,
    });
    if !api.authorization.additional_authorization_modes.is_empty() {
        properties["AdditionalAuthenticationProviders"] = Value::Array(
            api.authorization
                .additional_authorization_modes
                .iter()
                .map(|mode| json!({"AuthenticationType": mode.authorization_type.as_str()}))
                .collect(),
        );
    }
    insert_resource(
        template,
        api_id.clone(),
        Resource {
            resource_type: "AWS::AppSync::GraphQLApi".to_string(),
            properties,
            depends_on: Vec::new(),
            metadata: None,
        },
    )?;

    insert_resource(
        template,
        schema_id.clone(),
        Resource {
            resource_type: "AWS::AppSync::GraphQLSchema".to_string(),
            properties: json!({
                "ApiId": get_att(&api_id, "ApiId"),
                "Definition": definition,
            }),
            depends_on: Vec::new(),
            metadata: None,
        },
    )?;

    let api_key = match api.authorization.api_key_config() {
        Some(config) => {
            let key_id = logical_id(&[api.id.as_str(), "DefaultApiKey"]);
            let expires =
                context.now + chrono::Duration::days(i64::from(config.expires_after_days));
            let mut properties = json!({
                "ApiId": get_att(&api_id, "ApiId"),
                "Expires": expires.timestamp(),
            });
            if let Some(description) = &config.description {
                properties["Description"] = Value::String(description.clone());
            }
            insert_resource(
                template,
                key_id.clone(),
                Resource {
                    resource_type: "AWS::AppSync::ApiKey".to_string(),
                    properties,
                    depends_on: vec![schema_id.clone()],
                    metadata: None,
                },
            )?;
            Some(key_id)
        }
        None => None,
    };

    Ok(ApiIds {
        construct: api.id.clone(),
        api: api_id,
        schema: schema_id,
        api_key,
    })
}

fn emit_function(
    template: &mut Template,
    function: &Function,
    assets: &AssetManifest,
    context: &SynthContext,
) -> Result<()> {
    let role_id = logical_id(&[function.id.as_str(), "ServiceRole", "Resource"]);
    let function_id = logical_id(&[function.id.as_str(), "Resource"]);

    insert_resource(
        template,
        role_id.clone(),
        Resource {
            resource_type: "AWS::IAM::Role".to_string(),
            properties: json!({
                "AssumeRolePolicyDocument": assume_role_policy("lambda.amazonaws.com"),
                "ManagedPolicyArns": [
                    {"Fn::Join": ["", ["arn:", {"Ref": "AWS::Partition"}, LAMBDA_BASIC_EXECUTION_POLICY]]}
                ],
            }),
            depends_on: Vec::new(),
            metadata: None,
        },
    )?;

    let (code, metadata) = match &function.code {
        Code::Asset(path) => {
            let asset = assets
                .for_construct(&function.id)
                .ok_or_else(|| BindingError::unknown("asset", function.id.clone()))?;
            (
                json!({
                    "S3Bucket": {"Fn::Sub": context.asset_bucket},
                    "S3Key": asset.object_key,
                }),
                Some(asset_metadata(path, "Code")),
            )
        }
        Code::Inline(source) => (json!({"ZipFile": source}), None),
    };

    let mut properties = json!({
        "Code": code,
        "Handler": function.handler,
        "Role": get_att(&role_id, "Arn"),
        "Runtime": function.runtime.as_str(),
        "Timeout": function.timeout_secs,
    });
    if !function.layers.is_empty() {
        properties["Layers"] = Value::Array(
            function
                .layers
                .iter()
                .map(|layer| reference(&logical_id(&[layer.as_str(), "Resource"])))
                .collect(),
        );
    }
    if !function.environment.is_empty() {
        properties["Environment"] = json!({"Variables": function.environment});
    }

    insert_resource(
        template,
        function_id,
        Resource {
            resource_type: "AWS::Lambda::Function".to_string(),
            properties,
            depends_on: vec![role_id],
            metadata,
        },
    )?;
    Ok(())
}

fn emit_data_source(
    template: &mut Template,
    ids: &ApiIds,
    data_source: &LambdaDataSource,
) -> Result<()> {
    let api_construct = ids.construct.as_str();
    let role_id = logical_id(&[api_construct, data_source.id.as_str(), "ServiceRole", "Resource"]);
    let policy_id = logical_id(&[
        api_construct,
        data_source.id.as_str(),
        "ServiceRole",
        "DefaultPolicy",
        "Resource",
    ]);
    let source_id = logical_id(&[api_construct, data_source.id.as_str(), "Resource"]);
    let function_arn = get_att(&logical_id(&[data_source.function.as_str(), "Resource"]), "Arn");

    insert_resource(
        template,
        role_id.clone(),
        Resource {
            resource_type: "AWS::IAM::Role".to_string(),
            properties: json!({
                "AssumeRolePolicyDocument": assume_role_policy("appsync.amazonaws.com"),
            }),
            depends_on: Vec::new(),
            metadata: None,
        },
    )?;

    insert_resource(
        template,
        policy_id.clone(),
        Resource {
            resource_type: "AWS::IAM::Policy".to_string(),
            properties: json!({
                "PolicyDocument": {
                    "Statement": [{
                        "Action": "lambda:InvokeFunction",
                        "Effect": "Allow",
                        "Resource": function_arn,
                    }],
                    "Version": IAM_POLICY_VERSION,
                },
                "PolicyName": policy_id,
                "Roles": [reference(&role_id)],
            }),
            depends_on: Vec::new(),
            metadata: None,
        },
    )?;

    insert_resource(
        template,
        source_id,
        Resource {
            resource_type: "AWS::AppSync::DataSource".to_string(),
            properties: json!({
                "ApiId": get_att(&ids.api, "ApiId"),
                "LambdaConfig": {"LambdaFunctionArn": function_arn},
                "Name": data_source.name,
                "ServiceRoleArn": get_att(&role_id, "Arn"),
                "Type": "AWS_LAMBDA",
            }),
            depends_on: Vec::new(),
            metadata: None,
        },
    )?;
    Ok(())
}

fn emit_resolver(
    template: &mut Template,
    ids: &ApiIds,
    data_source: &LambdaDataSource,
    resolver: &Resolver,
) -> Result<()> {
    let api_construct = ids.construct.as_str();
    let source_id = logical_id(&[api_construct, data_source.id.as_str(), "Resource"]);
    let resolver_id = logical_id(&[
        api_construct,
        data_source.id.as_str(),
        resolver.type_name.as_str(),
        resolver.field_name.as_str(),
        "Resolver",
        "Resource",
    ]);

    let mut properties = json!({
        "ApiId": get_att(&ids.api, "ApiId"),
        "DataSourceName": get_att(&source_id, "Name"),
        "FieldName": resolver.field_name,
        "Kind": "UNIT",
        "TypeName": resolver.type_name,
    });
    if let Some(template_text) = &resolver.request_mapping {
        properties["RequestMappingTemplate"] = Value::String(template_text.text().to_string());
    }
    if let Some(template_text) = &resolver.response_mapping {
        properties["ResponseMappingTemplate"] = Value::String(template_text.text().to_string());
    }

    insert_resource(
        template,
        resolver_id,
        Resource {
            resource_type: "AWS::AppSync::Resolver".to_string(),
            properties,
            depends_on: vec![source_id, ids.schema.clone()],
            metadata: None,
        },
    )?;
    Ok(())
}

fn insert_resource(template: &mut Template, id: String, resource: Resource) -> Result<()> {
    if template.resources.contains_key(&id) {
        return Err(BindingError::LogicalIdCollision(id));
    }
    template.resources.insert(id, resource);
    Ok(())
}

fn assume_role_policy(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": {"Service": service},
        }],
        "Version": IAM_POLICY_VERSION,
    })
}

fn asset_metadata(path: &std::path::Path, property: &str) -> Value {
    json!({
        "aws:asset:path": path.to_string_lossy(),
        "aws:asset:property": property,
    })
}

fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({"Fn::GetAtt": [logical_id, attribute]})
}

fn reference(logical_id: &str) -> Value {
    json!({"Ref": logical_id})
}
