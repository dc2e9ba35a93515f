mod common;

use common::*;
use procmod::commands::cancellation::ActivityInstanceCancellation;
use procmod::dsl::builder::ProcessBuilder;
use procmod::runtime::context::SkipFlags;
use procmod::runtime::definition::{ProcessDefinition, ScopeId};
use procmod::runtime::mapping::{ActivityExecutionMapping, scope_of_execution};
use procmod::runtime::walker::{ActivityStackCollector, FlowScopeWalker, ScopeCollector, ScopeVisitor};

/// outer { outerStart, inner { innerStart, deepTask }, outerTask }
fn deep_definition() -> ProcessDefinition {
    compile(
        ProcessBuilder::new("deep")
            .body(|b| {
                b.start_event("start").sub_process("outer", |b| {
                    b.start_event("outerStart")
                        .sub_process("inner", |b| b.start_event("innerStart").task("deepTask"))
                        .task("outerTask")
                })
            })
            .build(),
    )
}

fn scope(definition: &ProcessDefinition, activity_id: &str) -> ScopeId {
    ScopeId::Activity(definition.find_activity(activity_id).expect("unknown activity"))
}

#[test]
fn test_walker_collects_activity_stack_innermost_first() {
    let definition = deep_definition();
    let deep_task = definition.find_activity("deepTask").expect("deepTask");
    let start = definition.activity(deep_task).flow_scope;

    let mut collector = ActivityStackCollector::new();
    let mut walker = FlowScopeWalker::new(&definition, start);
    let stopped = walker.walk_until(&mut [&mut collector as &mut dyn ScopeVisitor], |s| s == ScopeId::Process);

    assert_eq!(stopped, ScopeId::Process);
    assert_eq!(walker.current(), ScopeId::Process);
    let stack = collector.into_activity_stack();
    assert_eq!(stack, vec![
        definition.find_activity("inner").expect("inner"),
        definition.find_activity("outer").expect("outer"),
    ]);
}

#[test]
fn test_walker_does_not_visit_the_scope_it_stops_at() {
    let definition = deep_definition();
    let outer = scope(&definition, "outer");

    // 1. Stop at outer: only inner is collected
    let mut collector = ActivityStackCollector::new();
    let stopped = FlowScopeWalker::new(&definition, scope(&definition, "inner"))
        .walk_until(&mut [&mut collector as &mut dyn ScopeVisitor], |s| s == outer);
    assert_eq!(stopped, outer);
    assert_eq!(collector.into_activity_stack(), vec![definition.find_activity("inner").expect("inner")]);

    // 2. A start that already matches visits nothing
    let mut collector = ActivityStackCollector::new();
    let stopped = FlowScopeWalker::new(&definition, outer)
        .walk_until(&mut [&mut collector as &mut dyn ScopeVisitor], |s| s == outer);
    assert_eq!(stopped, outer);
    assert!(collector.into_activity_stack().is_empty());

    // 3. A condition that never holds ends after visiting the process definition
    let mut scopes = ScopeCollector::default();
    let stopped = FlowScopeWalker::new(&definition, scope(&definition, "inner"))
        .walk_until(&mut [&mut scopes as &mut dyn ScopeVisitor], |_| false);
    assert_eq!(stopped, ScopeId::Process);
    assert_eq!(scopes.into_scopes(), vec![scope(&definition, "inner"), outer, ScopeId::Process]);
}

#[test]
fn test_mapping_is_rebuilt_after_each_change() {
    // 1. The root executes taskA
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA"]);
    let root = tree.process_instance_id().clone();
    let task_a = scope(&definition, "taskA");
    let task_b = scope(&definition, "taskB");

    let before = ActivityExecutionMapping::build(&tree, &definition).expect("mapping");
    assert_eq!(before.executions(task_a), vec![&root]);
    assert_eq!(before.executions(ScopeId::Process), vec![&root]);

    // 2. Starting taskB moves taskA to a concurrent child
    let tree = start_before(&definition, tree, "taskB");
    let after = ActivityExecutionMapping::build(&tree, &definition).expect("mapping");
    let task_a_execution = execution_at(&tree, "taskA");
    assert_ne!(task_a_execution, root);
    assert_eq!(after.executions(task_a), vec![&task_a_execution]);
    assert_eq!(after.executions(task_b), vec![&execution_at(&tree, "taskB")]);
    assert_eq!(after.executions(ScopeId::Process), vec![&root]);

    // the earlier mapping still points taskA at the root, which no longer executes it
    assert!(before.contains(task_a, &root));
    assert!(!after.contains(task_a, &root));

    // 3. Cancelling taskA leaves it unmapped
    let instance = instance_id_of(&definition, &tree, "taskA");
    let cancellation = ActivityInstanceCancellation::new(&instance);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");
    let last = ActivityExecutionMapping::build(&tree, &definition).expect("mapping");
    assert!(last.executions(task_a).is_empty());
    assert_eq!(last.executions(task_b), vec![&root]);
}

#[test]
fn test_scope_instantiated_once_has_one_execution() {
    // 1. sub-process with concurrent work inside, taskX next to it
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let tree = start_before(&definition, tree, "taskB");
    let sub = scope(&definition, "sub");

    let mapping = ActivityExecutionMapping::build(&tree, &definition).expect("mapping");
    assert_eq!(mapping.executions(sub).len(), 1);
    assert_eq!(mapping.executions(ScopeId::Process).len(), 1);

    // 2. A second sub-process instance adds a second execution, one per instance
    let tree = start_before(&definition, tree, "sub");
    let mapping = ActivityExecutionMapping::build(&tree, &definition).expect("mapping");
    assert_eq!(mapping.executions(sub).len(), 2);
    assert_eq!(mapping.executions(ScopeId::Process).len(), 1);

    let instances = activity_instances(&definition, &tree);
    let subs = instances.activity_instances_for("sub");
    assert_eq!(subs.len(), 2);
    let first = mapping.execution_for_instance(&tree, &definition, subs[0]).expect("first sub");
    let second = mapping.execution_for_instance(&tree, &definition, subs[1]).expect("second sub");
    assert_ne!(first, second);
    assert!(mapping.contains(sub, &first) && mapping.contains(sub, &second));
}

#[test]
fn test_scope_of_execution() {
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let root = tree.root().expect("root").clone();
    let sub_execution = tree.execution(&execution_at(&tree, "taskA")).expect("sub execution").clone();
    let task_x = tree.execution(&execution_at(&tree, "taskX")).expect("taskX execution").clone();

    assert_eq!(scope_of_execution(&tree, &definition, &root), Some(ScopeId::Process));
    assert_eq!(scope_of_execution(&tree, &definition, &sub_execution), Some(scope(&definition, "sub")));
    // concurrent executions stand for no scope
    assert!(task_x.is_concurrent);
    assert_eq!(scope_of_execution(&tree, &definition, &task_x), None);
}

#[test]
fn test_emptied_preserved_scope_stays_mapped() {
    let definition = compile(preserving_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let sub_execution = execution_at(&tree, "taskA");
    let instance = instance_id_of(&definition, &tree, "taskA");

    let cancellation = ActivityInstanceCancellation::new(&instance);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    let mapping = ActivityExecutionMapping::build(&tree, &definition).expect("mapping");
    assert_eq!(mapping.executions(scope(&definition, "sub")), vec![&sub_execution]);
    assert!(mapping.executions(scope(&definition, "taskA")).is_empty());
    assert!(tree.is_emptied_scope(tree.execution(&sub_execution).expect("sub execution")));
}
