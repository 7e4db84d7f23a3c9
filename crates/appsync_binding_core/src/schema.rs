//! Minimal GraphQL SDL model.
//!
//! Only what binding validation needs is kept: type definitions, their fields,
//! field argument names and the root operation types. Directives and default
//! values are parsed past and discarded.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema line {line}: {message}")]
pub struct SchemaError {
    line: usize,
    message: String,
}

impl SchemaError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Input,
    Enum,
    Scalar,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub name: String,
    pub non_null: bool,
    pub list: Option<Box<TypeRef>>,
}

impl TypeRef {
    /// The innermost named type, e.g. `Employee` for `[Employee!]!`.
    pub fn named_type(&self) -> &str {
        match &self.list {
            Some(inner) => inner.named_type(),
            None => &self.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub arguments: Vec<String>,
    pub field_type: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOperationTypes {
    pub query: String,
    pub mutation: String,
    pub subscription: String,
}

impl Default for RootOperationTypes {
    fn default() -> Self {
        Self {
            query: "Query".to_string(),
            mutation: "Mutation".to_string(),
            subscription: "Subscription".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    types: BTreeMap<String, TypeDefinition>,
    roots: RootOperationTypes,
}

impl Schema {
    pub fn parse(sdl: &str) -> Result<Self, SchemaError> {
        let tokens = tokenize(sdl)?;
        let mut parser = SdlParser { tokens, pos: 0 };
        let mut schema = Schema::default();

        while !parser.at_end() {
            parser.skip_description();
            let keyword = parser.expect_name()?;
            match keyword.as_str() {
                "schema" => {
                    parser.skip_directives()?;
                    schema.roots = parser.schema_block(schema.roots)?;
                }
                "extend" => {
                    let kind_keyword = parser.expect_name()?;
                    let definition = parser.type_definition(&kind_keyword)?;
                    schema.merge(definition, true, parser.line())?;
                }
                other => {
                    let definition = parser.type_definition(other)?;
                    schema.merge(definition, false, parser.line())?;
                }
            }
        }

        Ok(schema)
    }

    pub fn object_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types
            .get(name)
            .filter(|definition| definition.kind == TypeKind::Object)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.object_type(type_name)?
            .fields
            .iter()
            .find(|field| field.name == field_name)
    }

    pub fn root_operation_types(&self) -> &RootOperationTypes {
        &self.roots
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    fn merge(
        &mut self,
        definition: TypeDefinition,
        extension: bool,
        line: usize,
    ) -> Result<(), SchemaError> {
        match self.types.get_mut(&definition.name) {
            Some(existing) if extension => {
                existing.fields.extend(definition.fields);
                Ok(())
            }
            Some(_) => Err(SchemaError::new(
                line,
                format!("type '{}' is defined more than once", definition.name),
            )),
            None => {
                self.types.insert(definition.name.clone(), definition);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Punct(char),
    Str,
}

struct SdlParser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl SdlParser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, line)| *line)
            .unwrap_or(1)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        self.pos += 1;
        token
    }

    fn eat_punct(&mut self, ch: char) -> bool {
        if self.peek() == Some(&Token::Punct(ch)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, ch: char) -> Result<(), SchemaError> {
        if self.eat_punct(ch) {
            Ok(())
        } else {
            Err(SchemaError::new(self.line(), format!("expected '{ch}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String, SchemaError> {
        let line = self.line();
        match self.next() {
            Some(Token::Name(name)) => Ok(name),
            Some(other) => Err(SchemaError::new(
                line,
                format!("expected a name, found {other:?}"),
            )),
            None => Err(SchemaError::new(line, "unexpected end of schema")),
        }
    }

    fn skip_description(&mut self) {
        while self.peek() == Some(&Token::Str) {
            self.pos += 1;
        }
    }

    fn skip_directives(&mut self) -> Result<(), SchemaError> {
        while self.eat_punct('@') {
            self.expect_name()?;
            if self.peek() == Some(&Token::Punct('(')) {
                self.skip_balanced('(', ')')?;
            }
        }
        Ok(())
    }

    fn skip_balanced(&mut self, open: char, close: char) -> Result<(), SchemaError> {
        let line = self.line();
        self.expect_punct(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.next() {
                Some(Token::Punct(ch)) if ch == open => depth += 1,
                Some(Token::Punct(ch)) if ch == close => depth -= 1,
                Some(_) => {}
                None => {
                    return Err(SchemaError::new(line, format!("unbalanced '{open}'")));
                }
            }
        }
        Ok(())
    }

    fn schema_block(
        &mut self,
        mut roots: RootOperationTypes,
    ) -> Result<RootOperationTypes, SchemaError> {
        self.expect_punct('{')?;
        while !self.eat_punct('}') {
            let operation = self.expect_name()?;
            self.expect_punct(':')?;
            let type_name = self.expect_name()?;
            match operation.as_str() {
                "query" => roots.query = type_name,
                "mutation" => roots.mutation = type_name,
                "subscription" => roots.subscription = type_name,
                other => {
                    return Err(SchemaError::new(
                        self.line(),
                        format!("unknown root operation '{other}'"),
                    ));
                }
            }
        }
        Ok(roots)
    }

    fn type_definition(&mut self, keyword: &str) -> Result<TypeDefinition, SchemaError> {
        let kind = match keyword {
            "type" => TypeKind::Object,
            "interface" => TypeKind::Interface,
            "input" => TypeKind::Input,
            "enum" => TypeKind::Enum,
            "scalar" => TypeKind::Scalar,
            "union" => TypeKind::Union,
            other => {
                return Err(SchemaError::new(
                    self.line(),
                    format!("unsupported definition '{other}'"),
                ));
            }
        };
        let name = self.expect_name()?;

        if self.peek() == Some(&Token::Name("implements".to_string())) {
            self.pos += 1;
            self.eat_punct('&');
            self.expect_name()?;
            while self.eat_punct('&') {
                self.expect_name()?;
            }
        }
        self.skip_directives()?;

        let mut fields = Vec::new();
        match kind {
            TypeKind::Object | TypeKind::Interface | TypeKind::Input => {
                if self.eat_punct('{') {
                    while !self.eat_punct('}') {
                        fields.push(self.field_definition()?);
                    }
                }
            }
            TypeKind::Enum => {
                if self.peek() == Some(&Token::Punct('{')) {
                    self.skip_balanced('{', '}')?;
                }
            }
            TypeKind::Union => {
                if self.eat_punct('=') {
                    self.eat_punct('|');
                    self.expect_name()?;
                    while self.eat_punct('|') {
                        self.expect_name()?;
                    }
                }
            }
            TypeKind::Scalar => {}
        }

        Ok(TypeDefinition { name, kind, fields })
    }

    fn field_definition(&mut self) -> Result<FieldDefinition, SchemaError> {
        self.skip_description();
        let name = self.expect_name()?;
        let mut arguments = Vec::new();
        if self.eat_punct('(') {
            while !self.eat_punct(')') {
                self.skip_description();
                arguments.push(self.expect_name()?);
                self.expect_punct(':')?;
                self.type_ref()?;
                if self.eat_punct('=') {
                    self.skip_value()?;
                }
                self.skip_directives()?;
                self.eat_punct(',');
            }
        }
        self.expect_punct(':')?;
        let field_type = self.type_ref()?;
        if self.eat_punct('=') {
            self.skip_value()?;
        }
        self.skip_directives()?;
        self.eat_punct(',');

        Ok(FieldDefinition {
            name,
            arguments,
            field_type,
        })
    }

    fn type_ref(&mut self) -> Result<TypeRef, SchemaError> {
        let mut type_ref = if self.eat_punct('[') {
            let inner = self.type_ref()?;
            self.expect_punct(']')?;
            TypeRef {
                name: String::new(),
                non_null: false,
                list: Some(Box::new(inner)),
            }
        } else {
            TypeRef {
                name: self.expect_name()?,
                non_null: false,
                list: None,
            }
        };
        type_ref.non_null = self.eat_punct('!');
        Ok(type_ref)
    }

    fn skip_value(&mut self) -> Result<(), SchemaError> {
        match self.peek() {
            Some(Token::Punct('[')) => self.skip_balanced('[', ']'),
            Some(Token::Punct('{')) => self.skip_balanced('{', '}'),
            Some(_) => {
                self.pos += 1;
                Ok(())
            }
            None => Err(SchemaError::new(self.line(), "expected a default value")),
        }
    }
}

fn tokenize(sdl: &str) -> Result<Vec<(Token, usize)>, SchemaError> {
    let mut tokens = Vec::new();
    let mut chars = sdl.chars().peekable();
    let mut line = 1usize;

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => line += 1,
            ch if ch.is_whitespace() || ch == ',' => {}
            '#' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                let start_line = line;
                let mut block = false;
                if chars.peek() == Some(&'"') {
                    chars.next();
                    if chars.peek() != Some(&'"') {
                        // `""` is an empty string.
                        tokens.push((Token::Str, start_line));
                        continue;
                    }
                    chars.next();
                    block = true;
                }
                let mut closed = false;
                let mut quotes = 0usize;
                while let Some(next) = chars.next() {
                    if next == '\n' {
                        line += 1;
                    }
                    if block {
                        quotes = if next == '"' { quotes + 1 } else { 0 };
                        if quotes == 3 {
                            closed = true;
                            break;
                        }
                    } else if next == '\\' {
                        chars.next();
                    } else if next == '"' {
                        closed = true;
                        break;
                    } else if next == '\n' {
                        break;
                    }
                }
                if !closed {
                    return Err(SchemaError::new(start_line, "unterminated string"));
                }
                tokens.push((Token::Str, start_line));
            }
            ch if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' => {
                let mut name = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_' || next == '.') {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                tokens.push((Token::Name(name), line));
            }
            '{' | '}' | '(' | ')' | '[' | ']' | ':' | '!' | '=' | '@' | '|' | '&' | '$' => {
                tokens.push((Token::Punct(ch), line));
            }
            other => {
                return Err(SchemaError::new(
                    line,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEE_SDL: &str = r#"
        # Employees and the companies they work for.
        type Query {
          employees: [Employee]
          employee(id: ID!): Employee
        }

        """
        A person on the payroll.
        """
        type Employee {
          id: ID!
          name: String
          employerId: ID!
          employer: Employer
        }

        type Employer @aws_api_key {
          "Company identifier"
          id: ID!
          name: String
          employees(limit: Int = 10, after: String): [Employee!]!
        }

        enum Role { ENGINEER MANAGER }
    "#;

    #[test]
    fn parses_types_fields_and_arguments() {
        let schema = Schema::parse(EMPLOYEE_SDL).expect("schema should parse");

        let employees = schema
            .field("Employer", "employees")
            .expect("field should exist");
        assert_eq!(employees.arguments, vec!["limit", "after"]);
        assert_eq!(employees.field_type.named_type(), "Employee");
        assert!(employees.field_type.non_null);

        assert!(schema.field("Employee", "employer").is_some());
        assert!(schema.field("Query", "employee").is_some());
        assert!(schema.field("Employee", "salary").is_none());
        assert!(schema.object_type("Role").is_none());
    }

    #[test]
    fn schema_block_overrides_root_types() {
        let schema = Schema::parse(
            "schema { query: RootQuery }\ntype RootQuery { ping: String }",
        )
        .expect("schema should parse");
        assert_eq!(schema.root_operation_types().query, "RootQuery");
        assert_eq!(schema.root_operation_types().mutation, "Mutation");
    }

    #[test]
    fn extend_type_adds_fields() {
        let schema = Schema::parse(
            "type Query { a: String }\nextend type Query { b: Int }",
        )
        .expect("schema should parse");
        assert!(schema.field("Query", "b").is_some());
    }

    #[test]
    fn rejects_duplicate_type_definitions() {
        let error = Schema::parse("type A { x: Int }\ntype A { y: Int }")
            .expect_err("duplicate should fail");
        assert!(error.message().contains("more than once"));
    }

    #[test]
    fn reports_line_of_unterminated_string() {
        let error = Schema::parse("type A {\n  \"broken\n  x: Int\n}")
            .expect_err("string should fail");
        assert_eq!(error.line(), 2);
    }
}
