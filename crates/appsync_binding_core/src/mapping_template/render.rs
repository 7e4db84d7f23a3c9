use serde_json::Value;

use super::{Expr, Reference, Segment, UtilMethod};

pub(super) fn render(segments: &[Segment], scope: &Value) -> String {
    let mut output = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => output.push_str(text),
            Segment::Expr {
                expr,
                quiet,
                source,
            } => match evaluate(expr, scope) {
                Some(value) if !value.is_null() => output.push_str(&display(&value)),
                _ if *quiet => {}
                _ => output.push_str(source),
            },
        }
    }
    output
}

pub(super) fn is_context_root(root: &str) -> bool {
    matches!(root, "context" | "ctx")
}

pub(super) fn canonical_context_key(segment: &str) -> &str {
    if segment == "args" {
        "arguments"
    } else {
        segment
    }
}

/// `None` means the expression is undefined, which differs from a defined
/// JSON `null` only in how plain references render.
fn evaluate(expr: &Expr, scope: &Value) -> Option<Value> {
    match expr {
        Expr::Reference(reference) => lookup(reference, scope).cloned(),
        Expr::Literal(value) => Some(value.clone()),
        Expr::Interpolated(segments) => Some(Value::String(render(segments, scope))),
        Expr::Map(entries) => Some(Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), evaluate(value, scope).unwrap_or(Value::Null)))
                .collect(),
        )),
        Expr::List(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| evaluate(item, scope).unwrap_or(Value::Null))
                .collect(),
        )),
        Expr::Call { method, args } => {
            let mut values = args
                .iter()
                .map(|arg| evaluate(arg, scope).unwrap_or(Value::Null));
            let first = values.next().unwrap_or(Value::Null);
            Some(match method {
                UtilMethod::ToJson => Value::String(first.to_string()),
                UtilMethod::EscapeJavaScript => {
                    let text = if first.is_null() {
                        String::new()
                    } else {
                        display(&first)
                    };
                    Value::String(escape_javascript(&text))
                }
                UtilMethod::IsNull => Value::Bool(first.is_null()),
                UtilMethod::IsNullOrEmpty => Value::Bool(is_null_or_empty(&first)),
                UtilMethod::DefaultIfNull => {
                    if first.is_null() {
                        values.next().unwrap_or(Value::Null)
                    } else {
                        first
                    }
                }
            })
        }
    }
}

fn lookup<'a>(reference: &Reference, scope: &'a Value) -> Option<&'a Value> {
    if !is_context_root(&reference.root) {
        return None;
    }

    let mut current = scope;
    for (depth, segment) in reference.path.iter().enumerate() {
        let key = if depth == 0 {
            canonical_context_key(segment)
        } else {
            segment.as_str()
        };
        current = match current {
            Value::Object(map) => map.get(key)?,
            _ => return None,
        };
    }
    Some(current)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_null_or_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn escape_javascript(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '/' => escaped.push_str("\\/"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other if other.is_control() => {
                escaped.push_str(&format!("\\u{:04X}", u32::from(other)));
            }
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::parser::parse;
    use super::*;

    fn render_with(template: &str, scope: Value) -> String {
        render(&parse(template).expect("parse"), &scope)
    }

    #[test]
    fn strings_render_raw_and_objects_render_as_json() {
        let scope = json!({"source": {"name": "Ada", "tags": ["a", "b"]}});
        assert_eq!(
            render_with("$ctx.source.name $ctx.source.tags", scope),
            r#"Ada ["a","b"]"#
        );
    }

    #[test]
    fn unknown_roots_render_their_source_text() {
        assert_eq!(render_with("$input.body", json!({})), "$input.body");
    }

    #[test]
    fn null_values_behave_like_missing_references() {
        let scope = json!({"source": {"id": null}});
        assert_eq!(render_with("[$ctx.source.id][$!ctx.source.id]", scope), "[$ctx.source.id][]");
    }

    #[test]
    fn escape_javascript_escapes_quotes_and_newlines() {
        let scope = json!({"arguments": {"text": "it's \"quoted\"\n"}});
        assert_eq!(
            render_with("$util.escapeJavaScript($ctx.args.text)", scope),
            r#"it\'s \"quoted\"\n"#
        );
    }

    #[test]
    fn is_null_or_empty_covers_empty_collections() {
        let scope = json!({"arguments": {"ids": []}});
        assert_eq!(render_with("$util.isNullOrEmpty($ctx.args.ids)", scope), "true");
    }

    #[test]
    fn nested_to_json_produces_escaped_string() {
        let scope = json!({"source": {"id": "x"}});
        assert_eq!(
            render_with(r#"$util.toJson($util.toJson({"id": $ctx.source.id}))"#, scope),
            r#""{\"id\":\"x\"}""#
        );
    }
}
