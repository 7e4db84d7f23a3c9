use std::path::PathBuf;

use thiserror::Error;

use crate::contract::ValidationError;
use crate::mapping_template::TemplateError;
use crate::schema::SchemaError;

pub type Result<T> = std::result::Result<T, BindingError>;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("construct id '{0}' must be non-empty and must not contain '/'")]
    InvalidId(String),

    #[error("construct id '{0}' is already declared in this stack")]
    DuplicateId(String),

    #[error("{kind} '{id}' is not declared in this stack")]
    UnknownReference { kind: &'static str, id: String },

    #[error("a resolver for {type_name}.{field_name} is already declared")]
    DuplicateResolver {
        type_name: String,
        field_name: String,
    },

    #[error("no resolver is bound to {type_name}.{field_name}")]
    NoResolver {
        type_name: String,
        field_name: String,
    },

    #[error("{type_name}.{field_name} is not defined in the schema")]
    FieldNotInSchema {
        type_name: String,
        field_name: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("mapping template for {type_name}.{field_name}: {source}")]
    Template {
        type_name: String,
        field_name: String,
        #[source]
        source: TemplateError,
    },

    #[error("rendered request for {type_name}.{field_name} is not a valid lambda request: {message}")]
    InvalidLambdaRequest {
        type_name: String,
        field_name: String,
        message: String,
    },

    #[error("response template for {type_name}.{field_name} did not render JSON: {message}")]
    InvalidResponse {
        type_name: String,
        field_name: String,
        message: String,
    },

    #[error("logical id '{0}' is produced by more than one construct")]
    LogicalIdCollision(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("asset '{}': {message}", path.display())]
    Asset { path: PathBuf, message: String },

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest '{}': {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BindingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        Self::UnknownReference {
            kind,
            id: id.into(),
        }
    }

    /// Stable, machine-readable category used in dispatch error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NoResolver { .. } => "UnboundField",
            Self::Validation(_) => "ValidationError",
            Self::Template { .. }
            | Self::InvalidLambdaRequest { .. }
            | Self::InvalidResponse { .. } => "MappingTemplateError",
            Self::Schema(_) | Self::FieldNotInSchema { .. } => "SchemaError",
            Self::Json(_) => "SerializationError",
            _ => "ConfigurationError",
        }
    }
}
