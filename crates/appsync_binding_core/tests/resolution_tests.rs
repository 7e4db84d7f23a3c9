mod support;

use appsync_binding_core::contract::{FieldRequest, LambdaOperation};
use appsync_binding_core::error::BindingError;
use appsync_binding_core::resolution::{BindingTable, RequestMapping};
use serde_json::json;

use support::sample_stack;

fn sample_table() -> BindingTable {
    BindingTable::from_stack(&sample_stack()).expect("binding table should build")
}

#[test]
fn every_sample_resolver_is_routed_to_its_function() {
    let table = sample_table();
    assert_eq!(table.len(), 3);

    let cases = [
        ("Query", "employees", "lamdaDataSource", "EmployeeLambdaFucntion"),
        ("Employee", "employer", "employer", "EmployeerLambdaFucntion"),
        ("Employer", "employees", "employees", "EmployeesLambdaFucntion"),
    ];
    for (type_name, field_name, data_source, function) in cases {
        let binding = table.route(type_name, field_name).expect("field is bound");
        assert_eq!(binding.data_source_name, data_source);
        assert_eq!(binding.function_id, function);
    }
}

#[test]
fn query_employees_forwards_the_whole_context() {
    let table = sample_table();
    assert!(matches!(
        table.route("Query", "employees").expect("bound").request,
        RequestMapping::Direct
    ));

    let invocation = table
        .resolve(FieldRequest::new("Query", "employees"))
        .expect("resolve");
    assert_eq!(invocation.request.operation, LambdaOperation::Invoke);
    assert_eq!(invocation.request.version, "2017-02-28");
    assert_eq!(invocation.request.payload["info"]["fieldName"], "employees");
    assert_eq!(invocation.request.payload["arguments"], json!({}));
}

#[test]
fn employee_employer_sends_only_the_employer_id() {
    let invocation = sample_table()
        .resolve(
            FieldRequest::new("Employee", "employer")
                .with_source(json!({"id": "p1", "name": "Ada", "employerId": "e1"})),
        )
        .expect("resolve");

    assert_eq!(invocation.function_id, "EmployeerLambdaFucntion");
    assert_eq!(invocation.request.payload, json!({"employerId": "e1"}));
    assert_eq!(
        invocation.payload_bytes().expect("bytes"),
        br#"{"employerId":"e1"}"#.to_vec()
    );
}

#[test]
fn employer_employees_sends_the_parent_id() {
    let invocation = sample_table()
        .resolve(
            FieldRequest::new("Employer", "employees").with_source(json!({"id": "e2", "name": "Globex"})),
        )
        .expect("resolve");

    assert_eq!(invocation.data_source, "employees");
    assert_eq!(invocation.request.payload, json!({"employerId": "e2"}));
}

#[test]
fn missing_parent_value_becomes_null() {
    let invocation = sample_table()
        .resolve(FieldRequest::new("Employee", "employer").with_source(json!({"id": "p9"})))
        .expect("resolve");
    assert_eq!(invocation.request.payload, json!({"employerId": null}));
}

#[test]
fn names_are_trimmed_before_routing() {
    let invocation = sample_table()
        .resolve(FieldRequest::new(" Query ", "employees "))
        .expect("resolve");
    assert_eq!(invocation.type_name, "Query");
    assert_eq!(invocation.field_name, "employees");
}

#[test]
fn unbound_and_malformed_requests_are_typed_errors() {
    let table = sample_table();

    let unbound = table
        .resolve(FieldRequest::new("Query", "employers"))
        .expect_err("unbound field");
    assert!(matches!(
        unbound,
        BindingError::NoResolver { ref type_name, ref field_name }
            if type_name == "Query" && field_name == "employers"
    ));

    let empty = table
        .resolve(FieldRequest::new("", "employees"))
        .expect_err("empty type name");
    assert_eq!(empty.error_type(), "ValidationError");

    let bad_arguments = table
        .resolve(FieldRequest::new("Query", "employees").with_arguments(json!([1, 2])))
        .expect_err("array arguments");
    assert!(bad_arguments.to_string().contains("arguments must be a JSON object"));
}
