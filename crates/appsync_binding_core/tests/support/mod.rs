#![allow(dead_code)]

use std::fs;
use std::path::Path;

use appsync_binding_core::sample::{
    appsync_example_stack, SAMPLE_FUNCTION_PATHS, SAMPLE_LAYER_PATH, SAMPLE_SCHEMA_PATH,
};
use appsync_binding_core::stack::Stack;
use chrono::{DateTime, TimeZone, Utc};

pub const EMPLOYEE_SCHEMA: &str = r#"
# Employee directory
type Employee {
  id: ID!
  name: String
  employerId: ID
  employer: Employer
}

type Employer {
  id: ID!
  name: String
  employees: [Employee]
}

type Query {
  employees: [Employee]
}
"#;

/// Lays out the schema and asset directories the sample stack expects.
pub fn write_sample_tree(root: &Path) {
    write(root, SAMPLE_SCHEMA_PATH, EMPLOYEE_SCHEMA);
    write(
        &root.join(SAMPLE_LAYER_PATH),
        "nodejs/directory.js",
        "module.exports = { employees: [] };",
    );
    for (index, path) in SAMPLE_FUNCTION_PATHS.iter().enumerate() {
        write(
            &root.join(path),
            "index.js",
            &format!("exports.handler = async () => {index};"),
        );
    }
}

pub fn write(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, body).expect("write fixture file");
}

pub fn sample_stack() -> Stack {
    appsync_example_stack().expect("sample stack should declare")
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}
