#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use procmod::commands::instantiation::{InstantiationCommand, InstantiationTarget};
use procmod::compiler::core::Compiler;
use procmod::config::EngineConfig;
use procmod::dsl::Process;
use procmod::dsl::builder::ProcessBuilder;
use procmod::error::Result;
use procmod::runtime::activity_instance::ActivityInstance;
use procmod::runtime::context::{CommandContext, SkipFlags};
use procmod::runtime::definition::ProcessDefinition;
use procmod::runtime::execution::{ExecutionId, ExecutionTree, TreeShape};
use procmod::runtime::mapping::ActivityExecutionMapping;
use procmod::runtime::services::{ActivityEvent, AllowAll, ExecutionListener};

pub fn compile(process: Process) -> ProcessDefinition {
    let mut compiler = Compiler::new();
    compiler.compile(process).expect("Compilation failed")
}

/// start -> fork -> taskA | taskB | taskC -> join -> end
pub fn parallel_process() -> Process {
    ProcessBuilder::new("parallel")
        .body(|b| {
            b.start_event("start")
                .gateway("fork")
                .task("taskA")
                .task("taskB")
                .task("taskC")
                .gateway("join")
                .end_event("end")
                .connect("start", "fork")
                .connect("fork", "taskA")
                .connect("fork", "taskB")
                .connect("fork", "taskC")
                .connect("taskA", "join")
                .connect("taskB", "join")
                .connect("taskC", "join")
                .connect("join", "end")
        })
        .build()
}

/// start -> taskX -> end, plus an interrupting event sub-process espStart -> espTask
pub fn event_subprocess_process() -> Process {
    ProcessBuilder::new("esp")
        .body(|b| {
            b.start_event("start")
                .task("taskX")
                .end_event("end")
                .connect("start", "taskX")
                .connect("taskX", "end")
                .event_sub_process("eventSubProcess", true, |b| {
                    b.start_event("espStart")
                        .task("espTask")
                        .connect("espStart", "espTask")
                })
        })
        .build()
}

/// start -> taskA -> end, with a cancelling timer attached to taskA
pub fn boundary_process() -> Process {
    ProcessBuilder::new("boundary")
        .body(|b| {
            b.start_event("start")
                .task("taskA")
                .boundary_event("timer", "taskA", true)
                .task("escalate")
                .end_event("end")
                .connect("start", "taskA")
                .connect("taskA", "end")
                .connect("timer", "escalate")
        })
        .build()
}

/// start -> sub { subStart -> taskA -> taskB (async) } -> end, plus taskX at the process level
pub fn nested_process() -> Process {
    ProcessBuilder::new("nested")
        .body(|b| {
            b.start_event("start")
                .sub_process("sub", |b| {
                    b.start_event("subStart")
                        .task("taskA")
                        .task("taskB")
                        .async_before()
                        .connect("subStart", "taskA")
                        .connect("taskA", "taskB")
                })
                .task("taskX")
                .end_event("end")
                .connect("start", "sub")
                .connect("sub", "taskX")
                .connect("taskX", "end")
        })
        .build()
}

/// nested_process with a sub-process that keeps its scope execution when emptied
pub fn preserving_process() -> Process {
    ProcessBuilder::new("preserving")
        .body(|b| {
            b.start_event("start")
                .sub_process("sub", |b| {
                    b.start_event("subStart")
                        .task("taskA")
                        .task("taskB")
                        .connect("subStart", "taskA")
                        .connect("taskA", "taskB")
                })
                .preserve_scope()
                .task("taskX")
                .end_event("end")
                .connect("start", "sub")
                .connect("sub", "taskX")
                .connect("taskX", "end")
        })
        .build()
}

/// start -> beforeTask -> miTasks (x3) -> afterTask -> end
pub fn multi_instance_process(sequential: bool) -> Process {
    ProcessBuilder::new(if sequential { "sequential-mi" } else { "parallel-mi" })
        .body(|b| {
            let b = b.start_event("start").task("beforeTask").task("miTasks");
            let b = if sequential { b.sequential_multi_instance(3) } else { b.multi_instance(3) };
            b.task("afterTask")
                .end_event("end")
                .connect("start", "beforeTask")
                .connect("beforeTask", "miTasks")
                .connect("miTasks", "afterTask")
                .connect("afterTask", "end")
        })
        .build()
}

/// start -> miSubProcess { subStart -> subProcessTask } (x3) -> end
pub fn multi_instance_sub_process(sequential: bool) -> Process {
    ProcessBuilder::new("mi-sub-process")
        .body(|b| {
            let b = b.start_event("start").sub_process("miSubProcess", |b| {
                b.start_event("subStart")
                    .task("subProcessTask")
                    .connect("subStart", "subProcessTask")
            });
            let b = if sequential { b.sequential_multi_instance(3) } else { b.multi_instance(3) };
            b.end_event("end")
                .connect("start", "miSubProcess")
                .connect("miSubProcess", "end")
        })
        .build()
}

/// Runs `f` on a fresh context and hands back the tree, whatever the outcome.
pub fn run<T>(
    definition: &ProcessDefinition,
    tree: ExecutionTree,
    f: impl FnOnce(&mut CommandContext) -> Result<T>,
) -> (Result<T>, ExecutionTree) {
    let config = EngineConfig::default();
    let mut ctx = CommandContext::new(definition, tree, &config, &[], &AllowAll);
    let result = f(&mut ctx);
    let (tree, _) = ctx.into_tree();
    (result, tree)
}

pub fn start_before(definition: &ProcessDefinition, tree: ExecutionTree, activity_id: &str) -> ExecutionTree {
    let command = InstantiationCommand::new(InstantiationTarget::BeforeActivity(activity_id.to_string()));
    let (result, tree) = run(definition, tree, |ctx| command.execute(ctx, SkipFlags::default()));
    result.expect("Instantiation failed");
    tree
}

/// A fresh, unstarted instance started before each of the activities in turn.
pub fn instance_at(definition: &ProcessDefinition, activity_ids: &[&str]) -> ExecutionTree {
    let mut tree = ExecutionTree::new(&definition.id);
    for activity_id in activity_ids {
        tree = start_before(definition, tree, activity_id);
    }
    tree
}

pub fn activity_instances(definition: &ProcessDefinition, tree: &ExecutionTree) -> ActivityInstance {
    ActivityInstance::build(tree, definition)
        .expect("Failed to build activity instance tree")
        .expect("Process instance has ended")
}

pub fn instance_id_of(definition: &ProcessDefinition, tree: &ExecutionTree, activity_id: &str) -> String {
    let instances = activity_instances(definition, tree);
    let found = instances.activity_instances_for(activity_id);
    assert_eq!(found.len(), 1, "expected a single instance of {}", activity_id);
    found[0].id.clone()
}

/// The single execution standing for a scope, read from a fresh mapping.
pub fn scope_execution(definition: &ProcessDefinition, tree: &ExecutionTree, scope_id: &str) -> ExecutionId {
    let scope = definition.scope_for_activity_instance(scope_id).expect("unknown scope");
    let mapping = ActivityExecutionMapping::build(tree, definition).expect("Failed to build mapping");
    let executions = mapping.executions(scope);
    assert_eq!(executions.len(), 1, "expected a single execution for {}", scope_id);
    executions[0].clone()
}

pub fn execution_at(tree: &ExecutionTree, activity_id: &str) -> ExecutionId {
    let executions = tree.executions_at(activity_id);
    assert_eq!(executions.len(), 1, "expected a single execution at {}", activity_id);
    executions[0].id.clone()
}

pub fn leaf(activity_id: &str) -> TreeShape {
    TreeShape::new(Some(activity_id))
}

pub fn empty_scope() -> TreeShape {
    TreeShape::new(None).scope()
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().expect("listener lock poisoned").clone()
    }
}

impl ExecutionListener for RecordingListener {
    fn notify(&self, event: &ActivityEvent) {
        self.events.lock().expect("listener lock poisoned").push(event.clone());
    }
}
