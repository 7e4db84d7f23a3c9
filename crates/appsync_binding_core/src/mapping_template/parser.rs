use serde_json::Value;

use super::{Expr, Reference, Segment, TemplateError, UtilMethod};

pub(super) fn parse(text: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut parser = Parser { src: text, pos: 0 };
    let mut segments = Vec::new();
    let mut literal = String::new();

    while let Some(ch) = parser.peek() {
        let rest = &text[parser.pos..];
        if rest.starts_with("##") {
            parser.pos = rest
                .find('\n')
                .map(|offset| parser.pos + offset + 1)
                .unwrap_or(text.len());
            continue;
        }

        if ch == '$' {
            let start = parser.pos;
            if let Some((expr, quiet)) = parser.template_reference()? {
                if !literal.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Expr {
                    expr,
                    quiet,
                    source: text[start..parser.pos].to_string(),
                });
                continue;
            }
            parser.pos = start + 1;
            literal.push('$');
            continue;
        }

        literal.push(ch);
        parser.pos += ch.len_utf8();
    }

    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(segments)
}

/// Double-quoted strings may embed references, as in `"id-${ctx.source.id}"`.
fn interpolated(text: String, start: usize) -> Result<Expr, TemplateError> {
    let segments = parse(&text).map_err(|error| {
        TemplateError::new(start + 1 + error.offset(), error.message().to_string())
    })?;
    if let [Segment::Text(literal)] = segments.as_slice() {
        return Ok(Expr::Literal(Value::String(literal.clone())));
    }
    if segments.is_empty() {
        return Ok(Expr::Literal(Value::String(text)));
    }
    Ok(Expr::Interpolated(segments))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(ahead)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !is_ident_start(first) {
            return None;
        }
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !is_ident_continue(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
        Some(self.src[start..self.pos].to_string())
    }

    /// Parses `$ref`, `$!ref` or `${ref}` at the cursor. Returns `None` (with
    /// the cursor untouched) when the `$` does not start a reference.
    fn template_reference(&mut self) -> Result<Option<(Expr, bool)>, TemplateError> {
        let start = self.pos;
        self.pos += 1;
        let quiet = self.eat('!');
        let formal = self.eat('{');
        let Some(root) = self.identifier() else {
            self.pos = start;
            return Ok(None);
        };

        let expr = self.reference_tail(root)?;
        if formal && !self.eat('}') {
            return Err(TemplateError::new(
                self.pos,
                "expected '}' to close formal reference",
            ));
        }
        Ok(Some((expr, quiet)))
    }

    fn reference_tail(&mut self, root: String) -> Result<Expr, TemplateError> {
        let mut path = Vec::new();

        while self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_start) {
            self.pos += 1;
            let segment_start = self.pos;
            let Some(segment) = self.identifier() else {
                break;
            };

            if self.peek() == Some('(') {
                if !is_util_root(&root) || !path.is_empty() {
                    return Err(TemplateError::new(
                        self.pos,
                        format!("method call '{segment}' is only supported on $util"),
                    ));
                }
                let method = UtilMethod::from_name(&segment).ok_or_else(|| {
                    TemplateError::new(
                        segment_start,
                        format!("unsupported $util method '{segment}'"),
                    )
                })?;
                self.pos += 1;
                let args = self.arguments()?;
                if args.len() != method.arity() {
                    return Err(TemplateError::new(
                        segment_start,
                        format!(
                            "$util.{segment} expects {} argument(s), got {}",
                            method.arity(),
                            args.len()
                        ),
                    ));
                }
                return Ok(Expr::Call { method, args });
            }

            path.push(segment);
        }

        Ok(Expr::Reference(Reference { root, path }))
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, TemplateError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.eat(')') {
            return Ok(args);
        }

        loop {
            args.push(self.expression()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(')') {
                return Ok(args);
            }
            return Err(self.unexpected("',' or ')'"));
        }
    }

    fn expression(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        match self.peek() {
            Some('$') => {
                let start = self.pos;
                self.pos += 1;
                let formal = self.eat('{');
                let root = self
                    .identifier()
                    .ok_or_else(|| TemplateError::new(start, "expected reference after '$'"))?;
                let expr = self.reference_tail(root)?;
                if formal && !self.eat('}') {
                    return Err(TemplateError::new(
                        self.pos,
                        "expected '}' to close formal reference",
                    ));
                }
                Ok(expr)
            }
            Some('{') => {
                self.pos += 1;
                self.map_literal()
            }
            Some('[') => {
                self.pos += 1;
                self.list_literal()
            }
            Some('\'') => {
                self.pos += 1;
                self.string_literal('\'').map(|text| Expr::Literal(Value::String(text)))
            }
            Some('"') => {
                let start = self.pos;
                self.pos += 1;
                let text = self.string_literal('"')?;
                interpolated(text, start)
            }
            Some(ch) if ch == '-' || ch.is_ascii_digit() => self.number_literal(),
            Some(ch) if is_ident_start(ch) => {
                let start = self.pos;
                match self.identifier().as_deref() {
                    Some("true") => Ok(Expr::Literal(Value::Bool(true))),
                    Some("false") => Ok(Expr::Literal(Value::Bool(false))),
                    Some("null") => Ok(Expr::Literal(Value::Null)),
                    Some(word) => Err(TemplateError::new(
                        start,
                        format!("unexpected word '{word}' in expression"),
                    )),
                    None => Err(TemplateError::new(start, "expected expression")),
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn map_literal(&mut self) -> Result<Expr, TemplateError> {
        let mut entries = Vec::new();
        self.skip_ws();
        if self.eat('}') {
            return Ok(Expr::Map(entries));
        }

        loop {
            self.skip_ws();
            let key = match self.peek() {
                Some(quote @ ('"' | '\'')) => {
                    self.pos += 1;
                    self.string_literal(quote)?
                }
                _ => self
                    .identifier()
                    .ok_or_else(|| self.unexpected("a map key"))?,
            };
            self.skip_ws();
            if !self.eat(':') {
                return Err(self.unexpected("':'"));
            }
            let value = self.expression()?;
            entries.push((key, value));
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat('}') {
                return Ok(Expr::Map(entries));
            }
            return Err(self.unexpected("',' or '}'"));
        }
    }

    fn list_literal(&mut self) -> Result<Expr, TemplateError> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.eat(']') {
            return Ok(Expr::List(items));
        }

        loop {
            items.push(self.expression()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(']') {
                return Ok(Expr::List(items));
            }
            return Err(self.unexpected("',' or ']'"));
        }
    }

    fn string_literal(&mut self, quote: char) -> Result<String, TemplateError> {
        let start = self.pos - 1;
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
            if ch == quote {
                return Ok(text);
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }
            let Some(escaped) = self.peek() else {
                break;
            };
            self.pos += escaped.len_utf8();
            match escaped {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '"' | '\'' | '\\' | '/' => text.push(escaped),
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
        }
        Err(TemplateError::new(start, "unterminated string literal"))
    }

    fn number_literal(&mut self) -> Result<Expr, TemplateError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !(ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | 'e' | 'E')) {
                break;
            }
            self.pos += 1;
        }
        match serde_json::from_str::<Value>(&self.src[start..self.pos]) {
            Ok(number @ Value::Number(_)) => Ok(Expr::Literal(number)),
            _ => Err(TemplateError::new(
                start,
                format!("malformed number '{}'", &self.src[start..self.pos]),
            )),
        }
    }

    fn unexpected(&self, expected: &str) -> TemplateError {
        match self.peek() {
            Some(ch) => TemplateError::new(self.pos, format!("expected {expected}, found '{ch}'")),
            None => TemplateError::new(
                self.pos,
                format!("expected {expected}, found end of template"),
            ),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn is_util_root(root: &str) -> bool {
    matches!(root, "util" | "utils")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_text_and_references() {
        let segments = parse("a $ctx.source.id b").expect("parse");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Text("a ".to_string()));
        assert_eq!(
            segments[1],
            Segment::Expr {
                expr: Expr::Reference(Reference {
                    root: "ctx".to_string(),
                    path: vec!["source".to_string(), "id".to_string()],
                }),
                quiet: false,
                source: "$ctx.source.id".to_string(),
            }
        );
        assert_eq!(segments[2], Segment::Text(" b".to_string()));
    }

    #[test]
    fn trailing_dot_is_not_part_of_reference() {
        let segments = parse("$ctx.source.id.").expect("parse");
        assert_eq!(segments[1], Segment::Text(".".to_string()));
    }

    #[test]
    fn line_comments_are_dropped() {
        let segments = parse("## payload shape\n{}").expect("parse");
        assert_eq!(segments, vec![Segment::Text("{}".to_string())]);
    }

    #[test]
    fn parses_nested_literals() {
        let segments =
            parse(r#"$util.toJson({'ids': [1, -2.5, "x\"y"], ok: true, none: null})"#)
                .expect("parse");
        let Segment::Expr {
            expr: Expr::Call { method, args },
            ..
        } = &segments[0]
        else {
            panic!("expected call segment");
        };
        assert_eq!(*method, UtilMethod::ToJson);
        let Expr::Map(entries) = &args[0] else {
            panic!("expected map literal");
        };
        let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["ids", "ok", "none"]);
        assert_eq!(
            entries[0].1,
            Expr::List(vec![
                Expr::Literal(Value::from(1)),
                Expr::Literal(Value::from(-2.5)),
                Expr::Literal(Value::from("x\"y")),
            ])
        );
    }

    #[test]
    fn rejects_method_calls_outside_util() {
        let error = parse("$ctx.args.get('id')").expect_err("should fail");
        assert!(error.message().contains("only supported on $util"));
    }

    #[test]
    fn rejects_wrong_arity() {
        let error = parse("$util.defaultIfNull($ctx.source)").expect_err("should fail");
        assert!(error.message().contains("expects 2 argument(s), got 1"));
    }

    #[test]
    fn rejects_unclosed_formal_reference() {
        let error = parse("${ctx.source.id").expect_err("should fail");
        assert!(error.message().contains("close formal reference"));
    }

    #[test]
    fn rejects_unterminated_string() {
        let error = parse(r#"$util.toJson("abc)"#).expect_err("should fail");
        assert_eq!(error.offset(), 13);
    }
}
