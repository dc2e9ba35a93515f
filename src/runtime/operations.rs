//! Structural operations on the execution tree of a [`CommandContext`].
//!
//! Activities are wait states here: a started activity keeps its execution
//! until a command moves or removes it. Sub-processes start their initial
//! activity right away.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;
use crate::error::{EngineError, Result};
use crate::runtime::context::{CommandContext, SkipFlags};
use crate::runtime::definition::{ActivityIndex, ActivityKind, LoopCharacteristics, TargetElement};
use crate::runtime::execution::{ExecutionId, Variables};
use crate::runtime::mapping::scope_of_execution;
use crate::runtime::services::ActivityEventKind;

pub const NR_OF_INSTANCES: &str = "nrOfInstances";
pub const NR_OF_ACTIVE_INSTANCES: &str = "nrOfActiveInstances";
pub const NR_OF_COMPLETED_INSTANCES: &str = "nrOfCompletedInstances";
pub const LOOP_COUNTER: &str = "loopCounter";

/// Puts the execution on `activity` and opens a new activity instance for it.
pub(crate) fn enter_activity_instance(
    ctx: &mut CommandContext,
    execution_id: &ExecutionId,
    activity: ActivityIndex,
    flags: SkipFlags,
) -> Result<String> {
    let definition = ctx.definition;
    let activity = definition.activity(activity);
    let activity_instance_id = format!("{}:{}", activity.id, Uuid::new_v4());
    {
        let execution = ctx.tree.execution_mut(execution_id)?;
        execution.activity_id = Some(activity.id.clone());
        execution.activity_instance_id = Some(activity_instance_id.clone());
        execution.is_active = true;
        if !flags.skip_io_mappings {
            for (name, value) in &activity.inputs {
                execution.variables.insert(name.clone(), value.clone());
            }
        }
    }

    debug!(
        execution_id = %execution_id,
        activity_id = %activity.id,
        activity_instance_id = %activity_instance_id,
        "Entered activity instance"
    );
    ctx.notify(
        ActivityEventKind::Start,
        execution_id,
        &activity.id,
        Some(activity_instance_id.clone()),
        false,
        flags,
    );
    Ok(activity_instance_id)
}

/// Creates the scope execution for a scope activity below `parent`.
/// The parent keeps the activity instance id of the new scope.
fn enter_scope(
    ctx: &mut CommandContext,
    parent: &ExecutionId,
    activity: ActivityIndex,
    flags: SkipFlags,
) -> Result<ExecutionId> {
    let scope_execution = ctx.tree.create_child(parent)?;
    {
        let execution = ctx.tree.execution_mut(&scope_execution)?;
        execution.is_scope = true;
        execution.preserve_scope = ctx.definition.activity(activity).preserve_scope;
    }
    {
        let parent = ctx.tree.execution_mut(parent)?;
        parent.activity_id = None;
        parent.activity_instance_id = None;
        parent.transition_id = None;
        parent.is_active = false;
    }

    let activity_instance_id = enter_activity_instance(ctx, &scope_execution, activity, flags)?;
    ctx.tree.execution_mut(parent)?.activity_instance_id = Some(activity_instance_id);

    debug!(
        parent_id = %parent,
        execution_id = %scope_execution,
        activity_id = %ctx.definition.activity(activity).id,
        "Created scope execution"
    );
    Ok(scope_execution)
}

/// Starts `activity` on the execution and returns the execution that ends up executing it.
pub(crate) fn start_activity(
    ctx: &mut CommandContext,
    execution_id: &ExecutionId,
    activity_index: ActivityIndex,
    flags: SkipFlags,
) -> Result<ExecutionId> {
    let definition = ctx.definition;
    let activity = definition.activity(activity_index);

    if activity.async_before {
        let execution = ctx.tree.execution_mut(execution_id)?;
        execution.activity_id = Some(activity.id.clone());
        execution.activity_instance_id = None;
        execution.is_active = true;
        debug!(execution_id = %execution_id, activity_id = %activity.id, "Waiting before activity");
        return Ok(execution_id.clone());
    }

    let executing = if activity.is_scope {
        enter_scope(ctx, execution_id, activity_index, flags)?
    } else {
        ctx.tree.execution_mut(execution_id)?.transition_id = None;
        enter_activity_instance(ctx, execution_id, activity_index, flags)?;
        execution_id.clone()
    };

    match activity.kind {
        ActivityKind::SubProcess | ActivityKind::EventSubProcess => {
            if let Some(initial) = activity.initial_activity {
                return start_activity(ctx, &executing, initial, flags);
            }
        }
        ActivityKind::MultiInstanceBody => start_multi_instance_body(ctx, &executing, activity_index, flags)?,
        _ => {}
    }
    Ok(executing)
}

/// Expands a freshly entered multi-instance body: all instances at once when
/// parallel, the first one when sequential.
fn start_multi_instance_body(
    ctx: &mut CommandContext,
    body_execution: &ExecutionId,
    body: ActivityIndex,
    flags: SkipFlags,
) -> Result<()> {
    let definition = ctx.definition;
    let characteristics = loop_characteristics(ctx, body)?;
    let inner = definition.activity(body).initial_activity.ok_or_else(|| {
        EngineError::invariant(format!("multi-instance body '{}' has no inner activity", definition.activity(body).id))
    })?;

    let count = if characteristics.sequential { 1 } else { characteristics.cardinality };
    for _ in 0..count {
        let instance = add_inner_instance(ctx, body_execution, body)?;
        start_activity(ctx, &instance, inner, flags)?;
    }
    ctx.tree
        .set_variable_local(body_execution, NR_OF_INSTANCES, Value::from(characteristics.cardinality))?;

    debug!(
        execution_id = %body_execution,
        activity_id = %definition.activity(body).id,
        instances = count,
        sequential = characteristics.sequential,
        "Started multi-instance body"
    );
    Ok(())
}

fn loop_characteristics(ctx: &CommandContext, body: ActivityIndex) -> Result<LoopCharacteristics> {
    let activity = ctx.definition.activity(body);
    activity
        .multi_instance
        .ok_or_else(|| EngineError::invariant(format!("activity '{}' is not a multi-instance body", activity.id)))
}

fn local_counter(ctx: &CommandContext, execution_id: &ExecutionId, name: &str) -> Result<u64> {
    Ok(ctx
        .tree
        .execution(execution_id)?
        .variables
        .get(name)
        .and_then(Value::as_u64)
        .unwrap_or(0))
}

/// Prepares the execution for one more instance of the inner activity of a
/// multi-instance body and updates the loop counters.
///
/// A parallel body gets a new concurrent child; a sequential body runs the
/// inner activity on its own scope execution.
pub(crate) fn add_inner_instance(
    ctx: &mut CommandContext,
    body_execution: &ExecutionId,
    body: ActivityIndex,
) -> Result<ExecutionId> {
    let characteristics = loop_characteristics(ctx, body)?;
    let instances = local_counter(ctx, body_execution, NR_OF_INSTANCES)?;
    let active = local_counter(ctx, body_execution, NR_OF_ACTIVE_INSTANCES)?;
    let completed = local_counter(ctx, body_execution, NR_OF_COMPLETED_INSTANCES)?;

    let instance = if characteristics.sequential {
        body_execution.clone()
    } else {
        {
            let scope = ctx.tree.execution_mut(body_execution)?;
            scope.activity_id = None;
            scope.activity_instance_id = None;
            scope.is_active = false;
        }
        let child = ctx.tree.create_child(body_execution)?;
        ctx.tree.execution_mut(&child)?.is_concurrent = true;
        child
    };

    ctx.tree.set_variable_local(&instance, LOOP_COUNTER, Value::from(instances))?;
    ctx.tree.set_variable_local(body_execution, NR_OF_INSTANCES, Value::from(instances + 1))?;
    ctx.tree.set_variable_local(body_execution, NR_OF_ACTIVE_INSTANCES, Value::from(active + 1))?;
    ctx.tree.set_variable_local(body_execution, NR_OF_COMPLETED_INSTANCES, Value::from(completed))?;

    debug!(body_execution = %body_execution, instance = %instance, loop_counter = instances, "Added multi-instance inner instance");
    Ok(instance)
}

/// Multi-instance body a scope execution stands for, if any.
pub(crate) fn multi_instance_body_of(ctx: &CommandContext, execution_id: &ExecutionId) -> Option<ActivityIndex> {
    let execution = ctx.tree.get(execution_id)?;
    let body = scope_of_execution(&ctx.tree, ctx.definition, execution)?.activity()?;
    ctx.definition.activity(body).multi_instance.map(|_| body)
}

/// Instantiates the activity stack (outermost first) below `execution`, then the target.
///
/// `variables` are set once the innermost scope exists; `variables_local`
/// go to the execution that executes the target.
pub(crate) fn execute_activities(
    ctx: &mut CommandContext,
    execution: &ExecutionId,
    stack: &[ActivityIndex],
    target: TargetElement,
    variables: &Variables,
    variables_local: &Variables,
    flags: SkipFlags,
) -> Result<ExecutionId> {
    let definition = ctx.definition;

    let mut current = execution.clone();
    for &scope_activity in stack {
        current = enter_scope(ctx, &current, scope_activity, flags)?;
        // 从内部活动进入多实例体时只创建一个实例
        if definition.activity(scope_activity).multi_instance.is_some() {
            current = add_inner_instance(ctx, &current, scope_activity)?;
        }
    }

    for (name, value) in variables {
        ctx.tree.set_variable(&current, name, value.clone())?;
    }

    let executing = match target {
        TargetElement::Activity(activity) => start_activity(ctx, &current, activity, flags)?,
        TargetElement::Transition(transition) => {
            let transition = definition.transition(transition);
            {
                let execution = ctx.tree.execution_mut(&current)?;
                execution.activity_id = Some(definition.activity(transition.source).id.clone());
                execution.transition_id = Some(transition.id.clone());
            }
            debug!(execution_id = %current, transition_id = %transition.id, "Taking transition");
            start_activity(ctx, &current, transition.destination, flags)?
        }
    };

    for (name, value) in variables_local {
        ctx.tree.set_variable_local(&executing, name, value.clone())?;
    }
    Ok(executing)
}

/// Adds a new, empty concurrent child below a scope execution, expanding the tree first.
///
/// A scope execution that executes an activity itself hands it over to a
/// concurrent replacement; a single non-concurrent child gets wrapped in a
/// concurrent execution.
pub(crate) fn create_concurrent_execution(ctx: &mut CommandContext, scope_execution: &ExecutionId) -> Result<ExecutionId> {
    if !ctx.tree.execution(scope_execution)?.is_scope {
        return Err(EngineError::invariant(format!(
            "concurrent children can only be added to scope executions, '{}' is not one",
            scope_execution
        )));
    }

    let children = ctx.tree.live_children(scope_execution);
    if children.is_empty() {
        let replacing = ctx.tree.create_child(scope_execution)?;
        let (transition, active) = {
            let scope = ctx.tree.execution_mut(scope_execution)?;
            (scope.transition_id.take(), scope.is_active)
        };
        {
            let replacing = ctx.tree.execution_mut(&replacing)?;
            replacing.is_concurrent = true;
            replacing.transition_id = transition;
            replacing.is_active = active;
        }
        {
            let scope = ctx.tree.execution_mut(scope_execution)?;
            scope.replaced_by = Some(replacing.clone());
            scope.activity_id = None;
            scope.activity_instance_id = None;
            scope.is_active = false;
        }
        debug!(scope_execution = %scope_execution, replacing = %replacing, "Replaced scope execution by concurrent child");
    } else if children.len() == 1 && !ctx.tree.execution(&children[0])?.is_concurrent {
        let child = children[0].clone();
        let wrapper = ctx.tree.create_child(scope_execution)?;
        {
            let wrapper = ctx.tree.execution_mut(&wrapper)?;
            wrapper.is_concurrent = true;
            wrapper.activity_id = None;
            wrapper.is_active = false;
        }
        ctx.tree.move_child(&child, &wrapper)?;
        {
            let scope = ctx.tree.execution_mut(scope_execution)?;
            scope.activity_id = None;
            scope.activity_instance_id = None;
            scope.is_active = false;
        }
        debug!(scope_execution = %scope_execution, wrapper = %wrapper, "Wrapped scope child in concurrent execution");
    }

    let concurrent = ctx.tree.create_child(scope_execution)?;
    {
        let concurrent = ctx.tree.execution_mut(&concurrent)?;
        concurrent.is_concurrent = true;
        concurrent.activity_id = None;
        concurrent.activity_instance_id = None;
    }
    Ok(concurrent)
}

/// Merges a single remaining concurrent child back into its scope execution.
///
/// Parallel multi-instance bodies keep their last concurrent instance.
pub(crate) fn try_prune_last_concurrent_child(ctx: &mut CommandContext, scope_execution: &ExecutionId) -> Result<bool> {
    if multi_instance_body_of(ctx, scope_execution).is_some() {
        return Ok(false);
    }
    let children = ctx.tree.live_children(scope_execution);
    if children.len() != 1 {
        return Ok(false);
    }
    let last = ctx.tree.execution(&children[0])?.clone();
    if !last.is_concurrent {
        return Ok(false);
    }
    if last.is_scope {
        return Err(EngineError::invariant(format!(
            "concurrent execution '{}' is a scope, such trees are not supported",
            last.id
        )));
    }

    {
        let scope = ctx.tree.execution_mut(scope_execution)?;
        scope.activity_id = last.activity_id.clone();
        scope.activity_instance_id = last.activity_instance_id.clone();
        scope.transition_id = last.transition_id.clone();
        scope.is_active = last.is_active;
        scope.replaced_by = None;
        for (name, value) in &last.variables {
            scope.variables.insert(name.clone(), value.clone());
        }
    }
    for child in &last.children {
        ctx.tree.move_child(child, scope_execution)?;
    }
    ctx.tree.execution_mut(&last.id)?.replaced_by = Some(scope_execution.clone());
    ctx.tree.remove(&last.id)?;

    debug!(scope_execution = %scope_execution, pruned = %last.id, "Pruned last concurrent child");
    Ok(true)
}

fn fire_activity_end(ctx: &mut CommandContext, execution_id: &ExecutionId, flags: SkipFlags) -> Result<()> {
    let execution = ctx.tree.execution(execution_id)?;
    if let (Some(activity_id), Some(activity_instance_id)) =
        (execution.activity_id.clone(), execution.activity_instance_id.clone())
    {
        ctx.notify(ActivityEventKind::End, execution_id, &activity_id, Some(activity_instance_id), true, flags);
    }
    Ok(())
}

/// Cancels everything below the execution and its current activity, keeping the execution itself.
pub(crate) fn interrupt_in_place(
    ctx: &mut CommandContext,
    execution_id: &ExecutionId,
    reason: &str,
    flags: SkipFlags,
) -> Result<()> {
    let children = ctx.tree.execution(execution_id)?.children.clone();
    for child in &children {
        delete_cascade(ctx, child, reason, flags)?;
    }
    fire_activity_end(ctx, execution_id, flags)?;

    let execution = ctx.tree.execution_mut(execution_id)?;
    execution.activity_id = None;
    execution.activity_instance_id = None;
    execution.transition_id = None;
    execution.is_active = true;

    debug!(execution_id = %execution_id, reason = %reason, "Interrupted execution");
    Ok(())
}

/// Removes the execution and its whole subtree, innermost first.
pub(crate) fn delete_cascade(
    ctx: &mut CommandContext,
    execution_id: &ExecutionId,
    reason: &str,
    flags: SkipFlags,
) -> Result<()> {
    let mut order = Vec::new();
    collect_post_order(ctx, execution_id, &mut order)?;

    for id in &order {
        fire_activity_end(ctx, id, flags)?;
        if let Some(sub_process_instance) = ctx.tree.execution(id)?.sub_process_instance.clone() {
            ctx.record_deleted_sub_process_instance(sub_process_instance);
        }
        ctx.tree.remove(id)?;
    }

    debug!(execution_id = %execution_id, reason = %reason, removed = order.len(), "Deleted execution subtree");
    Ok(())
}

fn collect_post_order(ctx: &CommandContext, execution_id: &ExecutionId, out: &mut Vec<ExecutionId>) -> Result<()> {
    for child in &ctx.tree.execution(execution_id)?.children {
        collect_post_order(ctx, child, out)?;
    }
    out.push(execution_id.clone());
    Ok(())
}

/// Cleans up after an execution was deleted: an emptied concurrent parent is
/// removed too and the scope execution pruned.
///
/// A multi-instance body whose last instance went away is deleted as well.
pub(crate) fn handle_child_removal_in_scope(
    ctx: &mut CommandContext,
    removed: &ExecutionId,
    flags: SkipFlags,
) -> Result<()> {
    let removed = ctx
        .tree
        .get(removed)
        .cloned()
        .ok_or_else(|| EngineError::ExecutionNotFound(removed.clone()))?;

    let in_parent_scope = if removed.is_concurrent {
        removed
    } else {
        match removed.parent.as_ref().and_then(|p| ctx.tree.get(p)) {
            Some(parent) => parent.clone(),
            None => return Ok(()),
        }
    };
    if !in_parent_scope.is_concurrent {
        return Ok(());
    }

    if !in_parent_scope.is_ended {
        ctx.tree.remove(&in_parent_scope.id)?;
    }
    let scope_execution = in_parent_scope.parent.clone().ok_or_else(|| {
        EngineError::invariant(format!("concurrent execution '{}' has no parent", in_parent_scope.id))
    })?;

    if multi_instance_body_of(ctx, &scope_execution).is_some() && ctx.tree.live_children(&scope_execution).is_empty() {
        delete_cascade(ctx, &scope_execution, "Multi-instance body has no instances left", flags)?;
        return handle_child_removal_in_scope(ctx, &scope_execution, flags);
    }
    try_prune_last_concurrent_child(ctx, &scope_execution)?;
    Ok(())
}
