mod common;

use common::*;
use procmod::commands::cancellation::{
    ActivityCancellation, ActivityInstanceCancellation, ExecutionCancellation, InstanceCancellation,
    TransitionInstanceCancellation,
};
use procmod::error::EngineError;
use procmod::runtime::context::SkipFlags;
use procmod::runtime::execution::TreeShape;
use procmod::runtime::services::ActivityEventKind;

#[test]
fn test_cancel_activity_instance_compacts_tree() {
    // 1. Two concurrent tasks
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA", "taskB"]);
    let root = tree.process_instance_id().clone();
    let task_a = instance_id_of(&definition, &tree, "taskA");
    let task_b = instance_id_of(&definition, &tree, "taskB");
    let task_b_execution = execution_at(&tree, "taskB");

    // 2. Cancel taskA
    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    // 3. The root took over taskB and keeps its activity instance id
    assert_eq!(tree.describe().expect("describe"), leaf("taskB").scope());
    assert_eq!(execution_at(&tree, "taskB"), root);
    assert_eq!(instance_id_of(&definition, &tree, "taskB"), task_b);
    assert_eq!(tree.resolve_replacement(&task_b_execution, 8).expect("replacement"), root);
    tree.validate().expect("tree must stay valid");
}

#[test]
fn test_cancel_one_of_three_keeps_concurrency() {
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA", "taskB", "taskC"]);
    let task_c = instance_id_of(&definition, &tree, "taskC");

    let cancellation = ActivityInstanceCancellation::new(&task_c);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    let expected = empty_scope()
        .child(leaf("taskA").concurrent())
        .child(leaf("taskB").concurrent());
    assert_eq!(tree.describe().expect("describe"), expected);
}

#[test]
fn test_cancel_last_activity_interrupts_process_instance() {
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA"]);
    let task_a = instance_id_of(&definition, &tree, "taskA");

    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    // the root stays, empty, for the caller to decide about termination
    assert!(!tree.is_ended());
    assert_eq!(tree.describe().expect("describe"), empty_scope());
}

#[test]
fn test_cancel_activity_inside_concurrent_sub_process() {
    // 1. taskA in the sub-process, taskX next to it
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let expected = empty_scope()
        .child(TreeShape::new(None).concurrent().child(leaf("taskA").scope()))
        .child(leaf("taskX").concurrent());
    assert_eq!(tree.describe().expect("describe"), expected);
    let task_a = instance_id_of(&definition, &tree, "taskA");

    // 2. Cancelling taskA takes its sub-process along
    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    assert_eq!(tree.describe().expect("describe"), leaf("taskX").scope());
    let instances = activity_instances(&definition, &tree);
    assert!(instances.activity_instances_for("sub").is_empty());
}

#[test]
fn test_cancel_transition_instance() {
    // 1. taskB waits as a transition instance next to taskA
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["taskB", "taskA"]);
    let instances = activity_instances(&definition, &tree);
    let transitions = instances.transition_instances_for("taskB");
    assert_eq!(transitions.len(), 1);
    let transition_id = transitions[0].id.clone();

    // 2. Cancel it
    let cancellation = TransitionInstanceCancellation::new(&transition_id);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    // 3. Only taskA is left, inside the sub-process
    assert_eq!(
        tree.describe().expect("describe"),
        empty_scope().child(leaf("taskA").scope())
    );
    let instances = activity_instances(&definition, &tree);
    assert!(instances.transition_instances_for("taskB").is_empty());
}

#[test]
fn test_cancel_unknown_instances() {
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA"]);

    let cancellation = ActivityInstanceCancellation::new("taskA:missing");
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    assert!(matches!(result, Err(EngineError::ActivityInstanceNotFound(id)) if id == "taskA:missing"));

    let cancellation = TransitionInstanceCancellation::new("missing");
    let (result, _) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    assert!(matches!(result, Err(EngineError::TransitionInstanceNotFound(id)) if id == "missing"));
}

#[test]
fn test_execution_cancellation_follows_replacement() {
    // 1. Compaction makes the root replace the taskB execution
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA", "taskB"]);
    let task_a = instance_id_of(&definition, &tree, "taskA");
    let task_b_execution = execution_at(&tree, "taskB");

    // 2. Cancelling the replaced execution cancels its replacement
    let (result, tree) = run(&definition, tree, |ctx| {
        ActivityInstanceCancellation::new(&task_a).execute(ctx, SkipFlags::default())?;
        ExecutionCancellation {
            execution_id: task_b_execution.clone(),
        }
        .execute(ctx, SkipFlags::default())
    });
    result.expect("cancellation");

    assert_eq!(tree.describe().expect("describe"), empty_scope());
}

#[test]
fn test_activity_cancellation_creates_one_cancellation_per_instance() {
    // 1. Two sub-process instances
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["sub", "sub"]);
    let instances = activity_instances(&definition, &tree);
    assert_eq!(instances.activity_instances_for("sub").len(), 2);

    // 2. Expand
    let sub = ActivityCancellation {
        activity_id: "sub".to_string(),
        cancel_current_active_activity_instances: false,
    };
    let cancellations = sub.create_cancellations(&definition, &instances).expect("cancellations");
    assert_eq!(cancellations.len(), 2);
    assert!(cancellations
        .iter()
        .all(|c| matches!(c, InstanceCancellation::ActivityInstance(_))));

    // 3. Execute all of them
    let (result, tree) = run(&definition, tree, |ctx| {
        for cancellation in &cancellations {
            cancellation.execute(ctx, SkipFlags::default())?;
        }
        Ok(())
    });
    result.expect("cancellation");
    assert_eq!(tree.describe().expect("describe"), empty_scope());

    // 4. Unknown activity
    let unknown = ActivityCancellation {
        activity_id: "nope".to_string(),
        cancel_current_active_activity_instances: false,
    };
    assert!(matches!(
        unknown.create_cancellations(&definition, &instances),
        Err(EngineError::ElementNotFound { .. })
    ));
}

#[test]
fn test_activity_cancellation_covers_transition_instances() {
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["taskB"]);
    let instances = activity_instances(&definition, &tree);

    let task_b = ActivityCancellation {
        activity_id: "taskB".to_string(),
        cancel_current_active_activity_instances: false,
    };
    let cancellations = task_b.create_cancellations(&definition, &instances).expect("cancellations");
    assert_eq!(cancellations.len(), 1);
    assert!(matches!(cancellations[0], InstanceCancellation::TransitionInstance(_)));

    let (result, tree) = run(&definition, tree, |ctx| cancellations[0].execute(ctx, SkipFlags::default()));
    result.expect("cancellation");
    assert_eq!(tree.describe().expect("describe"), empty_scope());
}

#[test]
fn test_cancellation_fires_end_events() {
    let definition = compile(parallel_process());
    let tree = instance_at(&definition, &["taskA", "taskB"]);
    let task_a = instance_id_of(&definition, &tree, "taskA");

    let listener = RecordingListener::new();
    let listeners: Vec<std::sync::Arc<dyn procmod::runtime::services::ExecutionListener>> = vec![listener.clone()];
    let config = procmod::config::EngineConfig::default();
    let mut ctx = procmod::runtime::context::CommandContext::new(
        &definition,
        tree,
        &config,
        &listeners,
        &procmod::runtime::services::AllowAll,
    );
    ActivityInstanceCancellation::new(&task_a)
        .execute(&mut ctx, SkipFlags::default())
        .expect("cancellation");

    let events = listener.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ActivityEventKind::End);
    assert_eq!(events[0].activity_id, "taskA");
    assert_eq!(events[0].activity_instance_id.as_deref(), Some(task_a.as_str()));
    assert!(events[0].canceled);

    // skipped listeners see nothing
    let task_b = instance_id_of(&definition, &ctx.tree, "taskB");
    let flags = SkipFlags {
        skip_custom_listeners: true,
        ..SkipFlags::default()
    };
    ActivityInstanceCancellation::new(&task_b)
        .execute(&mut ctx, flags)
        .expect("cancellation");
    assert_eq!(listener.events().len(), 1);
}

#[test]
fn test_cancel_inside_preserved_scope_keeps_scope_instance() {
    // 1. taskA in the preserving sub-process, taskX next to it
    let definition = compile(preserving_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let sub_instance = instance_id_of(&definition, &tree, "sub");
    let task_a = instance_id_of(&definition, &tree, "taskA");
    let sub_execution = execution_at(&tree, "taskA");
    assert!(tree.execution(&sub_execution).expect("sub execution").preserve_scope);

    // 2. Cancel taskA
    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    // 3. The scope execution stays, emptied, and still stands for the sub-process instance
    let expected = empty_scope()
        .child(TreeShape::new(None).concurrent().child(empty_scope()))
        .child(leaf("taskX").concurrent());
    assert_eq!(tree.describe().expect("describe"), expected);
    tree.validate().expect("tree must stay valid");
    assert!(tree.execution(&sub_execution).is_ok());
    assert!(tree.executions_at("taskA").is_empty());

    let instances = activity_instances(&definition, &tree);
    let subs = instances.activity_instances_for("sub");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].id, sub_instance);
    assert_eq!(subs[0].execution_ids, vec![sub_execution.clone()]);
    assert!(subs[0].child_activity_instances.is_empty());
    assert_eq!(scope_execution(&definition, &tree, "sub"), sub_execution);
}

#[test]
fn test_start_in_emptied_preserved_scope_reuses_it() {
    let definition = compile(preserving_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let sub_instance = instance_id_of(&definition, &tree, "sub");
    let sub_execution = execution_at(&tree, "taskA");
    let task_a = instance_id_of(&definition, &tree, "taskA");
    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    // no second sub-process instance is created
    let tree = start_before(&definition, tree, "taskA");
    let expected = empty_scope()
        .child(TreeShape::new(None).concurrent().child(leaf("taskA").scope()))
        .child(leaf("taskX").concurrent());
    assert_eq!(tree.describe().expect("describe"), expected);
    assert_eq!(execution_at(&tree, "taskA"), sub_execution);
    assert_eq!(instance_id_of(&definition, &tree, "sub"), sub_instance);
}

#[test]
fn test_cancel_preserved_scope_instance_removes_it() {
    let definition = compile(preserving_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let task_a = instance_id_of(&definition, &tree, "taskA");
    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    // cancelling the sub-process instance itself does not keep the scope
    let sub_instance = instance_id_of(&definition, &tree, "sub");
    let cancellation = ActivityInstanceCancellation::new(&sub_instance);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    assert_eq!(tree.describe().expect("describe"), leaf("taskX").scope());
    assert!(activity_instances(&definition, &tree).activity_instances_for("sub").is_empty());
    tree.validate().expect("tree must stay valid");
}

#[test]
fn test_cancel_in_scope_without_preserve_removes_scope_execution() {
    // same shape without the flag: the sub-process goes along with taskA
    let definition = compile(nested_process());
    let tree = instance_at(&definition, &["taskA", "taskX"]);
    let sub_execution = execution_at(&tree, "taskA");
    assert!(!tree.execution(&sub_execution).expect("sub execution").preserve_scope);
    let task_a = instance_id_of(&definition, &tree, "taskA");

    let cancellation = ActivityInstanceCancellation::new(&task_a);
    let (result, tree) = run(&definition, tree, |ctx| cancellation.execute(ctx, SkipFlags::default()));
    result.expect("cancellation");

    assert!(tree.execution(&sub_execution).is_err());
    assert_eq!(tree.describe().expect("describe"), leaf("taskX").scope());
}
