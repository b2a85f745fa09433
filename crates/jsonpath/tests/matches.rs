use kawait_jsonpath::{parse, JsonPathError, MatchResult};
use serde_json::json;

fn run(expr: &str, obj: serde_json::Value) -> Result<MatchResult, JsonPathError> {
    parse(expr).expect("valid expression").matches(&obj)
}

fn found(matched: bool, found: &str) -> MatchResult {
    MatchResult { matched, found: found.to_string(), message: String::new() }
}

#[test]
fn missing_path_reports_missing() {
    let r = run("jsonpath={.foo}", json!({})).expect("ok");
    assert!(!r.matched);
    assert_eq!(r.message, "Missing {.foo}");
}

#[test]
fn existence_checks() {
    assert_eq!(run("jsonpath={ .foo }", json!({"foo": null})).expect("ok"), found(true, "null"));
    assert_eq!(run("jsonpath={ .foo }", json!({"foo": {"bar": "baz"}})).expect("ok"), found(true, r#"{"bar":"baz"}"#));
    assert_eq!(run("jsonpath={.foo}", json!({"foo": ["boo"]})).expect("ok"), found(true, r#"["boo"]"#));
    assert_eq!(run("jsonpath={.foo}", json!({"foo": "bar"})).expect("ok"), found(true, "bar"));
}

#[test]
fn equality_checks() {
    assert_eq!(run("jsonpath={.foo}=bar", json!({"foo": "bar"})).expect("ok"), found(true, "bar"));
    assert_eq!(run("jsonpath={.foo}=bar", json!({"foo": "baz"})).expect("ok"), found(false, "baz"));
    assert_eq!(run("jsonpath={.spec.replicas}=3", json!({"spec": {"replicas": 3}})).expect("ok"), found(true, "3"));
    assert_eq!(run("jsonpath={.status.ready}=true", json!({"status": {"ready": true}})).expect("ok"), found(true, "true"));
}

#[test]
fn array_elements() {
    let obj = json!({"foo": [{"ignored": "true"}, {"bar": "baz"}, {"something else": "true"}]});
    assert_eq!(run("jsonpath={.foo[*].bar}=baz", obj).expect("ok"), found(true, "baz"));

    let obj = json!({"foo": [{"bar": "not-baz"}, {"bar": "baz"}]});
    assert_eq!(run("jsonpath={.foo[1].bar}=baz", obj.clone()).expect("ok"), found(true, "baz"));
    assert_eq!(run("jsonpath={.foo[0].bar}=baz", obj).expect("ok"), found(false, "not-baz"));
}

#[test]
fn filter_against_conditions() {
    let obj = json!({"status": {"conditions": [
        {"type": "Progressing", "status": "True"},
        {"type": "Available", "status": "False"}
    ]}});
    let r = run(r#"jsonpath={.status.conditions[?(@.type=="Available")].status}=True"#, obj).expect("ok");
    assert_eq!(r, found(false, "False"));
}

#[test]
fn non_primitive_value_with_expectation_is_an_error() {
    let err = run("jsonpath={.foo}=bar", json!({"foo": ["bar"]})).unwrap_err();
    assert!(err.to_string().contains("has a non-primitive value"), "err={}", err);
}
