mod common;

use common::*;
use procmod::config::EngineConfig;
use procmod::error::{EngineError, ErrorCategory};
use procmod::runtime::engine::ProcessEngine;
use procmod::runtime::execution::ExecutionTree;
use serde_json::{Value, json};

fn execution(id: &str, parent: Option<&str>, children: &[&str], activity: Option<&str>) -> Value {
    json!({
        "id": id,
        "process_instance_id": "pi",
        "parent": parent,
        "children": children,
        "activity_id": activity,
        "activity_instance_id": activity.map(|a| format!("{}:1", a)),
        "transition_id": null,
        "is_scope": parent.is_none(),
        "is_concurrent": parent.is_some(),
        "is_active": true,
        "super_execution": null,
        "sub_process_instance": null,
        "replaced_by": null,
    })
}

fn snapshot(executions: Vec<Value>) -> ExecutionTree {
    let mut map = serde_json::Map::new();
    for execution in executions {
        let id = execution["id"].as_str().expect("id").to_string();
        map.insert(id, execution);
    }
    serde_json::from_value(json!({
        "process_instance_id": "pi",
        "process_definition_id": "parallel:1",
        "executions": map,
    }))
    .expect("snapshot")
}

#[test]
fn test_valid_snapshot() {
    let tree = snapshot(vec![
        execution("pi", None, &["c1", "c2"], None),
        execution("c1", Some("pi"), &[], Some("taskA")),
        execution("c2", Some("pi"), &[], Some("taskB")),
    ]);
    tree.validate().expect("valid tree");

    let definition = compile(parallel_process());
    let instances = activity_instances(&definition, &tree);
    assert_eq!(instances.id, "pi");
    assert_eq!(instances.activity_instances_for("taskA")[0].id, "taskA:1");
}

#[test]
fn test_invalid_snapshots_are_rejected() {
    // 1. Concurrent scope execution
    let mut scoped = execution("c1", Some("pi"), &[], Some("taskA"));
    scoped["is_scope"] = json!(true);
    let tree = snapshot(vec![execution("pi", None, &["c1"], None), scoped]);
    let err = tree.validate().expect_err("concurrent scope");
    assert_eq!(err.category(), ErrorCategory::Invariant);

    // 2. Child missing from the arena
    let tree = snapshot(vec![execution("pi", None, &["ghost"], None)]);
    assert!(matches!(tree.validate(), Err(EngineError::InvariantViolation(_))));

    // 3. Mixed concurrent and non-concurrent children
    let mut plain = execution("c2", Some("pi"), &[], Some("taskB"));
    plain["is_concurrent"] = json!(false);
    plain["is_scope"] = json!(true);
    let tree = snapshot(vec![
        execution("pi", None, &["c1", "c2"], None),
        execution("c1", Some("pi"), &[], Some("taskA")),
        plain,
    ]);
    assert!(matches!(tree.validate(), Err(EngineError::InvariantViolation(_))));
}

#[tokio::test]
async fn test_import_validates_snapshot() {
    let engine = ProcessEngine::new(EngineConfig::default());
    engine.deploy(parallel_process()).expect("deploy");

    let tree = snapshot(vec![execution("pi", None, &["ghost"], None)]);
    let err = engine.import_process_instance(tree).await.expect_err("invalid snapshot");
    assert!(matches!(err, EngineError::InvariantViolation(_)));

    let unknown = ExecutionTree::new("unknown:1");
    let err = engine.import_process_instance(unknown).await.expect_err("unknown definition");
    assert!(matches!(err, EngineError::ProcessDefinitionNotFound(_)));

    let tree = snapshot(vec![
        execution("pi", None, &["c1", "c2"], None),
        execution("c1", Some("pi"), &[], Some("taskA")),
        execution("c2", Some("pi"), &[], Some("taskB")),
    ]);
    let pi = engine.import_process_instance(tree).await.expect("import");
    let outcome = engine
        .create_process_instance_modification(&pi)
        .cancel_activity_instance("taskA:1")
        .execute()
        .await
        .expect("modification");
    assert!(!outcome.terminated);
    let tree = engine.execution_tree(&pi).await.expect("tree");
    assert_eq!(tree.describe().expect("describe"), leaf("taskB").scope());
}

#[test]
fn test_variables_are_looked_up_through_parents() {
    let definition = compile(parallel_process());
    let mut tree = instance_at(&definition, &["taskA", "taskB"]);
    let root = tree.process_instance_id().clone();
    let task_a = execution_at(&tree, "taskA");

    tree.set_variable_local(&root, "amount", json!(10)).expect("variable");
    assert_eq!(tree.variable(&task_a, "amount"), Some(&json!(10)));

    // an existing variable is updated where it lives
    tree.set_variable(&task_a, "amount", json!(20)).expect("variable");
    assert_eq!(tree.root().expect("root").variables.get("amount"), Some(&json!(20)));
    assert!(tree.execution(&task_a).expect("taskA").variables.is_empty());
}

#[test]
fn test_tree_shape_display() {
    let shape = empty_scope()
        .child(leaf("taskA").concurrent())
        .child(leaf("taskB").concurrent());
    assert_eq!(shape.to_string(), "- [scope]\n  taskA [concurrent]\n  taskB [concurrent]\n");
}
