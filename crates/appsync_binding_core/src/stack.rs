use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BindingError, Result};
use crate::mapping_template::MappingTemplate;
use crate::schema::Schema;

pub const DEFAULT_FUNCTION_TIMEOUT_SECS: u32 = 3;
pub const MAX_FUNCTION_TIMEOUT_SECS: u32 = 900;
pub const DEFAULT_API_KEY_EXPIRY_DAYS: u32 = 7;
pub const MAX_API_KEY_EXPIRY_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationType {
    ApiKey,
    AwsIam,
}

impl AuthorizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "API_KEY",
            Self::AwsIam => "AWS_IAM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_api_key_expiry_days")]
    pub expires_after_days: u32,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            description: None,
            expires_after_days: DEFAULT_API_KEY_EXPIRY_DAYS,
        }
    }
}

fn default_api_key_expiry_days() -> u32 {
    DEFAULT_API_KEY_EXPIRY_DAYS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMode {
    pub authorization_type: AuthorizationType,
    #[serde(default)]
    pub api_key_config: Option<ApiKeyConfig>,
}

impl AuthorizationMode {
    pub fn api_key(config: ApiKeyConfig) -> Self {
        Self {
            authorization_type: AuthorizationType::ApiKey,
            api_key_config: Some(config),
        }
    }

    pub fn iam() -> Self {
        Self {
            authorization_type: AuthorizationType::AwsIam,
            api_key_config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    pub default_authorization: AuthorizationMode,
    #[serde(default)]
    pub additional_authorization_modes: Vec<AuthorizationMode>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            default_authorization: AuthorizationMode::api_key(ApiKeyConfig::default()),
            additional_authorization_modes: Vec::new(),
        }
    }
}

impl AuthorizationConfig {
    /// The API key settings of whichever mode uses API keys, if any.
    pub fn api_key_config(&self) -> Option<ApiKeyConfig> {
        std::iter::once(&self.default_authorization)
            .chain(&self.additional_authorization_modes)
            .find(|mode| mode.authorization_type == AuthorizationType::ApiKey)
            .map(|mode| mode.api_key_config.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSource {
    File(PathBuf),
    Inline(String),
}

impl SchemaSource {
    pub fn definition(&self, asset_root: &Path) -> Result<String> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File(path) => {
                let full_path = asset_root.join(path);
                std::fs::read_to_string(&full_path)
                    .map_err(|error| BindingError::io(full_path, error))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlApi {
    pub id: String,
    pub name: String,
    pub schema: SchemaSource,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub xray_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Asset(PathBuf),
    Inline(String),
}

impl Code {
    pub fn asset(path: impl Into<PathBuf>) -> Self {
        Self::Asset(path.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "nodejs12.x")]
    Nodejs12x,
    #[serde(rename = "nodejs14.x")]
    Nodejs14x,
    #[serde(rename = "nodejs16.x")]
    Nodejs16x,
    #[serde(rename = "nodejs18.x")]
    Nodejs18x,
    #[serde(rename = "nodejs20.x")]
    Nodejs20x,
    #[serde(rename = "python3.9")]
    Python39,
    #[serde(rename = "python3.12")]
    Python312,
    #[serde(rename = "provided.al2")]
    ProvidedAl2,
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nodejs12x => "nodejs12.x",
            Self::Nodejs14x => "nodejs14.x",
            Self::Nodejs16x => "nodejs16.x",
            Self::Nodejs18x => "nodejs18.x",
            Self::Nodejs20x => "nodejs20.x",
            Self::Python39 => "python3.9",
            Self::Python312 => "python3.12",
            Self::ProvidedAl2 => "provided.al2",
            Self::ProvidedAl2023 => "provided.al2023",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerVersion {
    pub id: String,
    pub code: Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionProps {
    pub runtime: Runtime,
    pub code: Code,
    pub handler: String,
    pub timeout_secs: u32,
    pub layers: Vec<LayerRef>,
    pub environment: BTreeMap<String, String>,
}

impl FunctionProps {
    pub fn new(runtime: Runtime, code: Code, handler: impl Into<String>) -> Self {
        Self {
            runtime,
            code,
            handler: handler.into(),
            timeout_secs: DEFAULT_FUNCTION_TIMEOUT_SECS,
            layers: Vec::new(),
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: String,
    pub runtime: Runtime,
    pub code: Code,
    pub handler: String,
    pub timeout_secs: u32,
    pub layers: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaDataSource {
    pub id: String,
    pub name: String,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverProps {
    pub type_name: String,
    pub field_name: String,
    pub request_mapping: Option<MappingTemplate>,
    pub response_mapping: Option<MappingTemplate>,
}

impl ResolverProps {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
            request_mapping: None,
            response_mapping: None,
        }
    }

    pub fn with_request_mapping(mut self, template: MappingTemplate) -> Self {
        self.request_mapping = Some(template);
        self
    }

    pub fn with_response_mapping(mut self, template: MappingTemplate) -> Self {
        self.response_mapping = Some(template);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolver {
    pub type_name: String,
    pub field_name: String,
    pub data_source: String,
    pub request_mapping: Option<MappingTemplate>,
    pub response_mapping: Option<MappingTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputValue {
    GraphqlUrl,
    ApiKey,
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub id: String,
    pub value: OutputValue,
}

macro_rules! construct_ref {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn id(&self) -> &str {
                &self.0
            }
        }
    };
}

construct_ref!(ApiRef);
construct_ref!(LayerRef);
construct_ref!(FunctionRef);
construct_ref!(DataSourceRef);

/// Declarative description of one deployment template.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    id: String,
    api: Option<GraphqlApi>,
    layers: Vec<LayerVersion>,
    functions: Vec<Function>,
    data_sources: Vec<LambdaDataSource>,
    resolvers: Vec<Resolver>,
    outputs: Vec<Output>,
    construct_ids: BTreeSet<String>,
}

impl Stack {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api: None,
            layers: Vec::new(),
            functions: Vec::new(),
            data_sources: Vec::new(),
            resolvers: Vec::new(),
            outputs: Vec::new(),
            construct_ids: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn api(&self) -> Option<&GraphqlApi> {
        self.api.as_ref()
    }

    pub fn layers(&self) -> &[LayerVersion] {
        &self.layers
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn data_sources(&self) -> &[LambdaDataSource] {
        &self.data_sources
    }

    pub fn resolvers(&self) -> &[Resolver] {
        &self.resolvers
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn is_empty(&self) -> bool {
        self.construct_ids.is_empty()
    }

    pub fn function(&self, id: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.id == id)
    }

    pub fn data_source(&self, id: &str) -> Option<&LambdaDataSource> {
        self.data_sources.iter().find(|source| source.id == id)
    }

    pub fn layer_ref(&self, id: &str) -> Option<LayerRef> {
        self.layers
            .iter()
            .any(|layer| layer.id == id)
            .then(|| LayerRef(id.to_string()))
    }

    pub fn function_ref(&self, id: &str) -> Option<FunctionRef> {
        self.function(id).map(|_| FunctionRef(id.to_string()))
    }

    pub fn data_source_ref(&self, id: &str) -> Option<DataSourceRef> {
        self.data_source(id).map(|_| DataSourceRef(id.to_string()))
    }

    pub fn add_graphql_api(&mut self, api: GraphqlApi) -> Result<ApiRef> {
        if self.api.is_some() {
            return Err(BindingError::InvalidConfig(
                "a stack declares at most one GraphQL API".to_string(),
            ));
        }
        if api.name.trim().is_empty() {
            return Err(BindingError::InvalidConfig(
                "GraphQL API name cannot be empty".to_string(),
            ));
        }
        if let Some(config) = api.authorization.api_key_config() {
            validate_api_key_expiry(config.expires_after_days)?;
        }

        self.claim_id(&api.id)?;
        debug!(api = %api.id, name = %api.name, "declared graphql api");
        let handle = ApiRef(api.id.clone());
        self.api = Some(api);
        Ok(handle)
    }

    pub fn add_layer(&mut self, id: impl Into<String>, code: Code) -> Result<LayerRef> {
        let id = id.into();
        if matches!(code, Code::Inline(_)) {
            return Err(BindingError::InvalidConfig(format!(
                "layer '{id}' must be packaged from an asset"
            )));
        }

        self.claim_id(&id)?;
        debug!(layer = %id, "declared layer");
        self.layers.push(LayerVersion {
            id: id.clone(),
            code,
        });
        Ok(LayerRef(id))
    }

    pub fn add_function(&mut self, id: impl Into<String>, props: FunctionProps) -> Result<FunctionRef> {
        let id = id.into();
        if props.handler.trim().is_empty() {
            return Err(BindingError::InvalidConfig(format!(
                "function '{id}' handler cannot be empty"
            )));
        }
        if props.timeout_secs == 0 || props.timeout_secs > MAX_FUNCTION_TIMEOUT_SECS {
            return Err(BindingError::InvalidConfig(format!(
                "function '{id}' timeout must be between 1 and {MAX_FUNCTION_TIMEOUT_SECS} seconds"
            )));
        }
        for layer in &props.layers {
            if self.layer_ref(layer.id()).is_none() {
                return Err(BindingError::unknown("layer", layer.id()));
            }
        }

        self.claim_id(&id)?;
        debug!(function = %id, runtime = props.runtime.as_str(), "declared function");
        self.functions.push(Function {
            id: id.clone(),
            runtime: props.runtime,
            code: props.code,
            handler: props.handler,
            timeout_secs: props.timeout_secs,
            layers: props.layers.into_iter().map(|layer| layer.0).collect(),
            environment: props.environment,
        });
        Ok(FunctionRef(id))
    }

    /// Declares a Lambda data source whose name defaults to its id.
    pub fn add_lambda_data_source(
        &mut self,
        id: impl Into<String>,
        function: &FunctionRef,
    ) -> Result<DataSourceRef> {
        let id = id.into();
        let name = id.clone();
        self.add_named_lambda_data_source(id, name, function)
    }

    pub fn add_named_lambda_data_source(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        function: &FunctionRef,
    ) -> Result<DataSourceRef> {
        let id = id.into();
        let name = name.into();
        if self.api.is_none() {
            return Err(BindingError::InvalidConfig(format!(
                "data source '{id}' requires a GraphQL API"
            )));
        }
        if self.function(function.id()).is_none() {
            return Err(BindingError::unknown("function", function.id()));
        }
        if !is_valid_data_source_name(&name) {
            return Err(BindingError::InvalidConfig(format!(
                "data source name '{name}' must match [_A-Za-z][_0-9A-Za-z]*"
            )));
        }
        if self.data_sources.iter().any(|source| source.name == name) {
            return Err(BindingError::InvalidConfig(format!(
                "data source name '{name}' is already in use"
            )));
        }

        self.claim_id(&id)?;
        debug!(data_source = %id, function = function.id(), "declared lambda data source");
        self.data_sources.push(LambdaDataSource {
            id: id.clone(),
            name,
            function: function.0.clone(),
        });
        Ok(DataSourceRef(id))
    }

    pub fn create_resolver(
        &mut self,
        data_source: &DataSourceRef,
        props: ResolverProps,
    ) -> Result<()> {
        if self.data_source(data_source.id()).is_none() {
            return Err(BindingError::unknown("data source", data_source.id()));
        }

        let type_name = props.type_name.trim().to_string();
        let field_name = props.field_name.trim().to_string();
        if type_name.is_empty() || field_name.is_empty() {
            return Err(BindingError::InvalidConfig(
                "resolver type and field names cannot be empty".to_string(),
            ));
        }
        if self
            .resolvers
            .iter()
            .any(|resolver| resolver.type_name == type_name && resolver.field_name == field_name)
        {
            return Err(BindingError::DuplicateResolver {
                type_name,
                field_name,
            });
        }

        debug!(
            type_name = %type_name,
            field_name = %field_name,
            data_source = data_source.id(),
            direct = props.request_mapping.is_none(),
            "declared resolver"
        );
        self.resolvers.push(Resolver {
            type_name,
            field_name,
            data_source: data_source.0.clone(),
            request_mapping: props.request_mapping,
            response_mapping: props.response_mapping,
        });
        Ok(())
    }

    pub fn add_output(&mut self, id: impl Into<String>, value: OutputValue) -> Result<()> {
        let id = id.into();
        match (&value, &self.api) {
            (OutputValue::GraphqlUrl | OutputValue::ApiKey, None) => {
                return Err(BindingError::InvalidConfig(format!(
                    "output '{id}' references a GraphQL API that is not declared"
                )));
            }
            (OutputValue::ApiKey, Some(api)) if api.authorization.api_key_config().is_none() => {
                return Err(BindingError::InvalidConfig(format!(
                    "output '{id}' references an API key but API '{}' has no API_KEY authorization",
                    api.id
                )));
            }
            _ => {}
        }

        // Output keys are the sanitized id, so distinct ids may not collapse.
        let key = crate::synth::logical_id(&[id.as_str()]);
        if key.is_empty() {
            return Err(BindingError::InvalidConfig(format!(
                "output id '{id}' has no alphanumeric characters"
            )));
        }
        if let Some(existing) = self
            .outputs
            .iter()
            .find(|output| crate::synth::logical_id(&[output.id.as_str()]) == key)
        {
            return Err(BindingError::InvalidConfig(format!(
                "output id '{id}' collides with output '{}' as '{key}'",
                existing.id
            )));
        }

        self.claim_id(&id)?;
        self.outputs.push(Output { id, value });
        Ok(())
    }

    /// Checks that every resolver targets a field declared in the schema.
    pub fn validate_against(&self, schema: &Schema) -> Result<()> {
        for resolver in &self.resolvers {
            if schema
                .field(&resolver.type_name, &resolver.field_name)
                .is_none()
            {
                return Err(BindingError::FieldNotInSchema {
                    type_name: resolver.type_name.clone(),
                    field_name: resolver.field_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Loads the API schema (if any) and validates resolvers against it.
    pub fn validate(&self, asset_root: &Path) -> Result<Option<Schema>> {
        let Some(api) = &self.api else {
            return Ok(None);
        };
        let definition = api.schema.definition(asset_root)?;
        let schema = Schema::parse(&definition)?;
        self.validate_against(&schema)?;
        Ok(Some(schema))
    }

    fn claim_id(&mut self, id: &str) -> Result<()> {
        if id.trim().is_empty() || id.contains('/') {
            return Err(BindingError::InvalidId(id.to_string()));
        }
        if !self.construct_ids.insert(id.to_string()) {
            return Err(BindingError::DuplicateId(id.to_string()));
        }
        Ok(())
    }
}

fn validate_api_key_expiry(days: u32) -> Result<()> {
    if days == 0 || days > MAX_API_KEY_EXPIRY_DAYS {
        return Err(BindingError::InvalidConfig(format!(
            "API key expiration must be between 1 and {MAX_API_KEY_EXPIRY_DAYS} days"
        )));
    }
    Ok(())
}

fn is_valid_data_source_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
