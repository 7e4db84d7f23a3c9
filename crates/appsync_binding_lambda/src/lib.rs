//! AWS-facing adapters and handlers for resolver field dispatch.
//!
//! Routing, template rendering and declarations live in
//! `appsync_binding_core`; this crate owns the function invoker boundary, the
//! physical-name directory and the Lambda entrypoint that ties them together.

pub mod adapters;
pub mod handlers;
