use std::collections::BTreeMap;

use serde_json::Value;

pub const FUNCTION_NAMES_ENV: &str = "RESOLVER_FUNCTION_NAMES";

/// Maps construct ids to the deployed function names (or ARNs) to invoke.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionDirectory {
    names: BTreeMap<String, String>,
    passthrough: bool,
}

impl FunctionDirectory {
    /// A directory that invokes functions by their construct id.
    pub fn passthrough() -> Self {
        Self {
            names: BTreeMap::new(),
            passthrough: true,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| format!("{FUNCTION_NAMES_ENV} is not valid JSON: {error}"))?;
        let Value::Object(entries) = value else {
            return Err(format!("{FUNCTION_NAMES_ENV} must be a JSON object"));
        };

        let mut names = BTreeMap::new();
        for (function_id, name) in entries {
            match name {
                Value::String(name) if !name.trim().is_empty() => {
                    names.insert(function_id, name);
                }
                _ => {
                    return Err(format!(
                        "{FUNCTION_NAMES_ENV} entry '{function_id}' must be a non-empty string"
                    ))
                }
            }
        }

        Ok(Self {
            names,
            passthrough: false,
        })
    }

    /// Reads the directory from the environment; when unset, ids are used as names.
    pub fn from_env() -> Result<Self, String> {
        match std::env::var(FUNCTION_NAMES_ENV) {
            Ok(text) => Self::from_json(&text),
            Err(_) => Ok(Self::passthrough()),
        }
    }

    pub fn function_name<'a>(&'a self, function_id: &'a str) -> Result<&'a str, String> {
        match self.names.get(function_id) {
            Some(name) => Ok(name.as_str()),
            None if self.passthrough => Ok(function_id),
            None => Err(format!(
                "function '{function_id}' has no entry in {FUNCTION_NAMES_ENV}"
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_ids_to_deployed_names() {
        let directory = FunctionDirectory::from_json(
            r#"{"EmployeeLambdaFucntion": "arn:aws:lambda:us-east-1:123:function:employees-query"}"#,
        )
        .expect("directory should parse");

        assert_eq!(
            directory
                .function_name("EmployeeLambdaFucntion")
                .expect("mapped"),
            "arn:aws:lambda:us-east-1:123:function:employees-query"
        );
        let error = directory
            .function_name("Other")
            .expect_err("unmapped id should fail");
        assert!(error.contains("has no entry"));
    }

    #[test]
    fn passthrough_uses_the_construct_id() {
        let directory = FunctionDirectory::passthrough();
        assert_eq!(directory.function_name("Handler").expect("name"), "Handler");
        assert!(directory.is_empty());
    }

    #[test]
    fn rejects_non_string_entries() {
        let error = FunctionDirectory::from_json(r#"{"Handler": 42}"#)
            .expect_err("number should fail");
        assert!(error.contains("'Handler'"));

        let error = FunctionDirectory::from_json("[]").expect_err("array should fail");
        assert!(error.contains("must be a JSON object"));
    }
}
