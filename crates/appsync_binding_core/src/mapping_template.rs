//! Request/response mapping templates.
//!
//! Templates are a small subset of the Velocity language used by resolvers:
//! literal text interleaved with `$context` references and `$util` calls. The
//! subset is enough to shape Lambda invocation payloads; control directives
//! (`#if`, `#foreach`, `#set`) are not supported. Double-quoted strings inside
//! expressions interpolate references; single-quoted strings are literal.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::contract::{ResolverContext, TEMPLATE_VERSION_2017};

#[path = "mapping_template/parser.rs"]
mod parser;
#[path = "mapping_template/render.rs"]
mod render;

/// A parsed mapping template. Keeps the original text so it can be emitted
/// verbatim into a synthesized template.
#[derive(Clone, PartialEq)]
pub struct MappingTemplate {
    text: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    Expr {
        expr: Expr,
        quiet: bool,
        source: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Reference(Reference),
    Call { method: UtilMethod, args: Vec<Expr> },
    Literal(Value),
    /// Double-quoted string containing references.
    Interpolated(Vec<Segment>),
    Map(Vec<(String, Expr)>),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reference {
    pub root: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UtilMethod {
    ToJson,
    EscapeJavaScript,
    IsNull,
    IsNullOrEmpty,
    DefaultIfNull,
}

impl UtilMethod {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "toJson" => Some(Self::ToJson),
            "escapeJavaScript" => Some(Self::EscapeJavaScript),
            "isNull" => Some(Self::IsNull),
            "isNullOrEmpty" => Some(Self::IsNullOrEmpty),
            "defaultIfNull" => Some(Self::DefaultIfNull),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::DefaultIfNull => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {offset}: {message}")]
pub struct TemplateError {
    offset: usize,
    message: String,
}

impl TemplateError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl MappingTemplate {
    pub fn from_string(text: impl Into<String>) -> Result<Self, TemplateError> {
        let text = text.into();
        let segments = parser::parse(&text)?;
        Ok(Self { text, segments })
    }

    /// Forwards the whole resolver context as the invocation payload.
    pub fn lambda_request() -> Self {
        Self::from_string(format!(
            r#"{{"version": "{TEMPLATE_VERSION_2017}", "operation": "Invoke", "payload": $util.toJson($ctx)}}"#
        ))
        .expect("built-in lambda request template parses")
    }

    /// Passes the function result through unchanged.
    pub fn lambda_result() -> Self {
        Self::from_string("$util.toJson($ctx.result)")
            .expect("built-in lambda result template parses")
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// References the template reads through `$context`, as dotted paths.
    pub fn context_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for segment in &self.segments {
            if let Segment::Expr { expr, .. } = segment {
                collect_paths(expr, &mut paths);
            }
        }
        paths.sort();
        paths.dedup();
        paths
    }

    pub fn render(&self, context: &ResolverContext) -> Result<String, TemplateError> {
        let scope = serde_json::to_value(context)
            .map_err(|error| TemplateError::new(0, format!("unserializable context: {error}")))?;
        Ok(render::render(&self.segments, &scope))
    }
}

fn collect_paths(expr: &Expr, paths: &mut Vec<String>) {
    match expr {
        Expr::Reference(reference) if render::is_context_root(&reference.root) => {
            let mut parts = vec!["context".to_string()];
            for (depth, segment) in reference.path.iter().enumerate() {
                let key = if depth == 0 {
                    render::canonical_context_key(segment)
                } else {
                    segment.as_str()
                };
                parts.push(key.to_string());
            }
            paths.push(parts.join("."));
        }
        Expr::Reference(_) | Expr::Literal(_) => {}
        Expr::Call { args, .. } | Expr::List(args) => {
            for arg in args {
                collect_paths(arg, paths);
            }
        }
        Expr::Map(entries) => {
            for (_, value) in entries {
                collect_paths(value, paths);
            }
        }
        Expr::Interpolated(segments) => {
            for segment in segments {
                if let Segment::Expr { expr, .. } = segment {
                    collect_paths(expr, paths);
                }
            }
        }
    }
}

impl fmt::Debug for MappingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MappingTemplate").field(&self.text).finish()
    }
}

impl fmt::Display for MappingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for MappingTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for MappingTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_string(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn employee_context() -> ResolverContext {
        ResolverContext {
            source: json!({"id": "e-7", "employerId": "c-1", "name": "Ada"}),
            ..Default::default()
        }
    }

    #[test]
    fn renders_payload_from_source_field() {
        let template = MappingTemplate::from_string(
            r#"{
              "version" : "2017-02-28",
              "operation": "Invoke",
              "payload": $util.toJson({"employerId" : $context.source.employerId })
            }"#,
        )
        .expect("template should parse");

        let rendered = template.render(&employee_context()).expect("render");
        let value: Value = serde_json::from_str(&rendered).expect("rendered json");
        assert_eq!(value["payload"], json!({"employerId": "c-1"}));
        assert_eq!(value["operation"], "Invoke");
    }

    #[test]
    fn double_quoted_strings_interpolate_references() {
        let template = MappingTemplate::from_string(
            r#"$util.toJson({"id": "${ctx.source.id}", "label": "emp-$ctx.source.name", "raw": '$ctx.source.id'})"#,
        )
        .expect("template should parse");

        let rendered = template.render(&employee_context()).expect("render");
        let value: Value = serde_json::from_str(&rendered).expect("rendered json");
        assert_eq!(
            value,
            json!({"id": "e-7", "label": "emp-Ada", "raw": "$ctx.source.id"})
        );
        assert_eq!(
            template.context_paths(),
            vec!["context.source.id", "context.source.name"]
        );
    }

    #[test]
    fn missing_reference_renders_its_source_text() {
        let template = MappingTemplate::from_string("id=$ctx.source.missing;").expect("parse");
        let rendered = template.render(&employee_context()).expect("render");
        assert_eq!(rendered, "id=$ctx.source.missing;");
    }

    #[test]
    fn quiet_reference_renders_nothing_when_missing() {
        let template = MappingTemplate::from_string("id=$!ctx.source.missing;").expect("parse");
        let rendered = template.render(&employee_context()).expect("render");
        assert_eq!(rendered, "id=;");
    }

    #[test]
    fn formal_reference_is_delimited_by_braces() {
        let template = MappingTemplate::from_string("${ctx.source.name}son").expect("parse");
        let rendered = template.render(&employee_context()).expect("render");
        assert_eq!(rendered, "Adason");
    }

    #[test]
    fn args_is_an_alias_for_arguments() {
        let template = MappingTemplate::from_string("$util.toJson($ctx.args.id)").expect("parse");
        let context = ResolverContext {
            arguments: json!({"id": 42}).as_object().cloned().unwrap_or_default(),
            ..Default::default()
        };
        assert_eq!(template.render(&context).expect("render"), "42");
    }

    #[test]
    fn to_json_of_missing_value_is_null() {
        let template =
            MappingTemplate::from_string(r#"$util.toJson({"a": $ctx.source.none})"#).expect("parse");
        let rendered = template.render(&employee_context()).expect("render");
        assert_eq!(rendered, r#"{"a":null}"#);
    }

    #[test]
    fn default_if_null_picks_fallback() {
        let template = MappingTemplate::from_string(
            r#"$util.toJson($util.defaultIfNull($ctx.source.none, "fallback"))"#,
        )
        .expect("parse");
        let rendered = template.render(&employee_context()).expect("render");
        assert_eq!(rendered, r#""fallback""#);
    }

    #[test]
    fn lone_dollar_is_literal_text() {
        let template = MappingTemplate::from_string("cost: $ 5 and $$").expect("parse");
        assert_eq!(
            template.render(&ResolverContext::default()).expect("render"),
            "cost: $ 5 and $$"
        );
    }

    #[test]
    fn rejects_unknown_util_method() {
        let error = MappingTemplate::from_string("$util.autoId()").expect_err("should fail");
        assert!(error.message().contains("autoId"));
    }

    #[test]
    fn rejects_unterminated_call() {
        let error =
            MappingTemplate::from_string("$util.toJson($ctx.source").expect_err("should fail");
        assert_eq!(error.offset(), 24);
    }

    #[test]
    fn lambda_request_template_forwards_context() {
        let rendered = MappingTemplate::lambda_request()
            .render(&employee_context())
            .expect("render");
        let value: Value = serde_json::from_str(&rendered).expect("rendered json");
        assert_eq!(value["payload"]["source"]["id"], "e-7");
    }

    #[test]
    fn context_paths_lists_canonical_references() {
        let template = MappingTemplate::from_string(
            r#"$util.toJson({"a": $ctx.args.id, "b": $context.source.id, "c": $ctx.args.id})"#,
        )
        .expect("parse");
        assert_eq!(
            template.context_paths(),
            vec!["context.arguments.id", "context.source.id"]
        );
    }
}
