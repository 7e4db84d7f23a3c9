//! JSON manifest form of a [`Stack`].
//!
//! Declarations reference each other by construct id. Mapping templates are
//! either inline strings or `{"file": "..."}` paths relative to the manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BindingError, Result};
use crate::mapping_template::MappingTemplate;
use crate::stack::{
    Code, FunctionProps, GraphqlApi, OutputValue, ResolverProps, Runtime, Stack,
    DEFAULT_FUNCTION_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub stack_id: String,
    #[serde(default)]
    pub api: Option<GraphqlApi>,
    #[serde(default)]
    pub layers: Vec<LayerDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceDecl>,
    #[serde(default)]
    pub resolvers: Vec<ResolverDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerDecl {
    pub id: String,
    pub code: Code,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDecl {
    pub id: String,
    pub runtime: Runtime,
    pub code: Code,
    pub handler: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u32 {
    DEFAULT_FUNCTION_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceDecl {
    pub id: String,
    /// Defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    pub function: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TemplateSource {
    Inline(String),
    File { file: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolverDecl {
    pub type_name: String,
    pub field_name: String,
    pub data_source: String,
    #[serde(default)]
    pub request_mapping: Option<TemplateSource>,
    #[serde(default)]
    pub response_mapping: Option<TemplateSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputDecl {
    pub id: String,
    pub value: OutputValue,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|error| BindingError::io(path, error))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_json(&text, base_dir).map_err(|error| match error {
            BindingError::Json(source) => BindingError::Manifest {
                path: path.to_path_buf(),
                message: source.to_string(),
            },
            other => other,
        })
    }

    pub fn from_json(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut manifest: Manifest = serde_json::from_str(text)?;
        manifest.base_dir = base_dir.into();
        Ok(manifest)
    }

    /// Directory that template file paths resolve against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Declares every construct in manifest order; the first invalid
    /// declaration aborts the build.
    pub fn into_stack(self) -> Result<Stack> {
        let mut stack = Stack::new(self.stack_id.clone());

        for layer in &self.layers {
            stack.add_layer(layer.id.clone(), layer.code.clone())?;
        }
        if let Some(api) = &self.api {
            stack.add_graphql_api(api.clone())?;
        }

        for function in &self.functions {
            let mut props =
                FunctionProps::new(function.runtime, function.code.clone(), function.handler.clone());
            props.timeout_secs = function.timeout_secs;
            props.environment = function.environment.clone();
            for layer_id in &function.layers {
                let layer = stack
                    .layer_ref(layer_id)
                    .ok_or_else(|| BindingError::unknown("layer", layer_id.clone()))?;
                props.layers.push(layer);
            }
            stack.add_function(function.id.clone(), props)?;
        }

        for source in &self.data_sources {
            let function = stack
                .function_ref(&source.function)
                .ok_or_else(|| BindingError::unknown("function", source.function.clone()))?;
            let name = source.name.clone().unwrap_or_else(|| source.id.clone());
            stack.add_named_lambda_data_source(source.id.clone(), name, &function)?;
        }

        for resolver in &self.resolvers {
            let data_source = stack
                .data_source_ref(&resolver.data_source)
                .ok_or_else(|| BindingError::unknown("data source", resolver.data_source.clone()))?;
            let mut props = ResolverProps::new(resolver.type_name.clone(), resolver.field_name.clone());
            if let Some(source) = &resolver.request_mapping {
                props = props.with_request_mapping(self.load_template(resolver, source)?);
            }
            if let Some(source) = &resolver.response_mapping {
                props = props.with_response_mapping(self.load_template(resolver, source)?);
            }
            stack.create_resolver(&data_source, props)?;
        }

        for output in &self.outputs {
            stack.add_output(output.id.clone(), output.value.clone())?;
        }

        info!(
            stack = stack.id(),
            functions = stack.functions().len(),
            resolvers = stack.resolvers().len(),
            "loaded stack manifest"
        );
        Ok(stack)
    }

    fn load_template(&self, resolver: &ResolverDecl, source: &TemplateSource) -> Result<MappingTemplate> {
        let text = match source {
            TemplateSource::Inline(text) => text.clone(),
            TemplateSource::File { file } => {
                let path = self.base_dir.join(file);
                fs::read_to_string(&path).map_err(|error| BindingError::io(path, error))?
            }
        };
        MappingTemplate::from_string(text).map_err(|source| BindingError::Template {
            type_name: resolver.type_name.clone(),
            field_name: resolver.field_name.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "stack_id": "Orders",
        "api": {
            "id": "Api",
            "name": "orders",
            "schema": {"inline": "type Query { order(id: ID!): String }"}
        },
        "functions": [
            {"id": "OrderFn", "runtime": "nodejs18.x", "code": {"asset": "lambda/order"}, "handler": "index.handler"}
        ],
        "data_sources": [{"id": "orders", "function": "OrderFn"}],
        "resolvers": [
            {"type_name": "Query", "field_name": "order", "data_source": "orders",
             "request_mapping": "{\"version\": \"2017-02-28\", \"operation\": \"Invoke\", \"payload\": $util.toJson($ctx.args)}"}
        ],
        "outputs": [{"id": "Url", "value": "graphql_url"}]
    }"#;

    #[test]
    fn builds_stack_with_defaults() {
        let stack = Manifest::from_json(MINIMAL, ".")
            .expect("manifest parses")
            .into_stack()
            .expect("stack builds");

        let function = stack.function("OrderFn").expect("function");
        assert_eq!(function.timeout_secs, DEFAULT_FUNCTION_TIMEOUT_SECS);
        assert_eq!(stack.data_source("orders").expect("source").name, "orders");
        assert!(stack.resolvers()[0].request_mapping.is_some());
        let api = stack.api().expect("api");
        assert!(api.authorization.api_key_config().is_some());
    }

    #[test]
    fn unknown_function_reference_is_rejected() {
        let text = MINIMAL.replace(r#""function": "OrderFn""#, r#""function": "Missing""#);
        let error = Manifest::from_json(&text, ".")
            .expect("manifest parses")
            .into_stack()
            .expect_err("reference should fail");
        assert!(matches!(
            error,
            BindingError::UnknownReference { kind: "function", ref id } if id == "Missing"
        ));
    }

    #[test]
    fn template_file_resolves_relative_to_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("templates")).expect("mkdir");
        fs::write(
            dir.path().join("templates/order.vtl"),
            "$util.toJson($ctx.result)",
        )
        .expect("write template");
        let text = MINIMAL.replace(
            r#""data_source": "orders","#,
            r#""data_source": "orders", "response_mapping": {"file": "templates/order.vtl"},"#,
        );
        let manifest_path = dir.path().join("stack.json");
        fs::write(&manifest_path, text).expect("write manifest");

        let manifest = Manifest::load(&manifest_path).expect("manifest loads");
        assert_eq!(manifest.base_dir(), dir.path());
        let stack = manifest.into_stack().expect("stack builds");
        let response = stack.resolvers()[0]
            .response_mapping
            .as_ref()
            .expect("response template");
        assert_eq!(response.text(), "$util.toJson($ctx.result)");
    }

    #[test]
    fn malformed_manifest_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"stack_id\": ").expect("write");
        let error = Manifest::load(&path).expect_err("load should fail");
        assert!(matches!(error, BindingError::Manifest { path: ref p, .. } if p == &path));
    }
}
