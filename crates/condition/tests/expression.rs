use serde_json::{json, Value};

use kawait_condition::expression::eval_condition;
use kawait_core::ResourceSnapshot;

fn status(v: Value) -> ResourceSnapshot { ResourceSnapshot::new(json!({"status": v})) }

fn phase_or() -> Value {
    json!({"operator": "or", "conditions": ["jsonpath={.status.phase}=Running", "jsonpath={.status.phase}=Succeeded"]})
}

#[test]
fn simple_strings() {
    let running = status(json!({"phase": "Running"}));
    let pending = status(json!({"phase": "Pending"}));
    let c = json!("jsonpath={.status.phase}=Running");
    assert!(eval_condition(&running, &c).expect("ok"));
    assert!(!eval_condition(&pending, &c).expect("ok"));
}

#[test]
fn arrays_and_explicit_and() {
    let both = ["jsonpath={.status.phase}=Running", "jsonpath={.status.ready}=true"];
    let ready = status(json!({"phase": "Running", "ready": "true"}));
    let unready = status(json!({"phase": "Running", "ready": "false"}));
    for c in [json!(both), json!({"operator": "and", "conditions": both})] {
        assert!(eval_condition(&ready, &c).expect("ok"), "{}", c);
        assert!(!eval_condition(&unready, &c).expect("ok"), "{}", c);
    }
}

#[test]
fn or_operator() {
    assert!(eval_condition(&status(json!({"phase": "Running"})), &phase_or()).expect("ok"));
    assert!(eval_condition(&status(json!({"phase": "Succeeded"})), &phase_or()).expect("ok"));
    assert!(!eval_condition(&status(json!({"phase": "Pending"})), &phase_or()).expect("ok"));
}

#[test]
fn nested_trees() {
    let and_or = json!({"operator": "and", "conditions": ["jsonpath={.status.initialized}=true", phase_or()]});
    assert!(eval_condition(&status(json!({"initialized": "true", "phase": "Succeeded"})), &and_or).expect("ok"));
    assert!(!eval_condition(&status(json!({"initialized": "false", "phase": "Succeeded"})), &and_or).expect("ok"));
    assert!(!eval_condition(&status(json!({"initialized": "true", "phase": "Pending"})), &and_or).expect("ok"));

    let or_and = json!({"operator": "or", "conditions": [
        "jsonpath={.status.phase}=Failed",
        {"operator": "and", "conditions": ["jsonpath={.status.initialized}=true", "jsonpath={.status.ready}=true"]}
    ]});
    let obj = status(json!({"initialized": "true", "ready": "true", "phase": "Running"}));
    assert!(eval_condition(&obj, &or_and).expect("ok"));
}

#[test]
fn unknown_operator_is_an_error() {
    let c = json!({"operator": "xor", "conditions": ["jsonpath={.status.phase}=Running", "jsonpath={.status.phase}=Succeeded"]});
    let err = eval_condition(&ResourceSnapshot::new(json!({})), &c).unwrap_err();
    assert!(err.to_string().contains("unknown operator xor"), "{}", err);
}
