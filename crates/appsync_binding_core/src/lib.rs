//! Resolver binding primitives for a GraphQL API backed by Lambda functions.
//!
//! This crate owns the declarative stack model, the mapping-template subset,
//! field resolution routing and template synthesis. It intentionally excludes
//! AWS SDK and Lambda runtime concerns, which live in `appsync_binding_lambda`.

pub mod assets;
pub mod contract;
pub mod error;
pub mod manifest;
pub mod mapping_template;
pub mod resolution;
pub mod sample;
pub mod schema;
pub mod stack;
pub mod synth;

pub use error::{BindingError, Result};
