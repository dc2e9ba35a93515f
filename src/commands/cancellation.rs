use std::collections::HashSet;
use tracing::{debug, info};
use crate::error::{EngineError, Result};
use crate::runtime::activity_instance::{ActivityInstance, TransitionInstance};
use crate::runtime::context::{CommandContext, SkipFlags};
use crate::runtime::definition::{ProcessDefinition, ScopeId};
use crate::runtime::execution::ExecutionId;
use crate::runtime::mapping::{ActivityExecutionMapping, scope_of_execution};
use crate::runtime::operations::{delete_cascade, handle_child_removal_in_scope, interrupt_in_place};

/// How far a cancellation climbs above the execution it starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationClimb {
    /// Stop below the first parent scope execution with more than one child.
    BelowBranchPoint,
    /// Stop at the first execution that is concurrent or sits directly below a concurrent one.
    BelowConcurrentParent,
}

/// Removes the topmost execution that only exists for `source`, keeping the tree compact.
///
/// A preserve-scope execution is only emptied, unless `ends_source_scope`
/// says the scope instance of `source` itself is the thing being cancelled.
pub fn cancel_from_execution(
    ctx: &mut CommandContext,
    source: &ExecutionId,
    climb: CancellationClimb,
    ends_source_scope: bool,
    reason: &str,
    flags: SkipFlags,
) -> Result<()> {
    let mut topmost = source.clone();
    while let Some(parent_scope) = ctx.tree.parent_scope_execution(&topmost) {
        let stop = match climb {
            CancellationClimb::BelowBranchPoint => ctx.tree.live_children(&parent_scope).len() > 1,
            CancellationClimb::BelowConcurrentParent => {
                let execution = ctx.tree.execution(&topmost)?;
                let parent_is_concurrent = execution
                    .parent
                    .as_ref()
                    .and_then(|parent| ctx.tree.get(parent))
                    .map(|parent| parent.is_concurrent)
                    .unwrap_or(false);
                execution.is_concurrent || parent_is_concurrent
            }
        };
        if stop {
            break;
        }
        topmost = parent_scope;
    }

    let top = ctx.tree.execution(&topmost)?;
    debug!(source = %source, topmost = %topmost, climb = ?climb, "Resolved topmost cancellable execution");

    let keeps_scope = top.preserve_scope && !(ends_source_scope && topmost == *source);
    if top.is_process_instance() || keeps_scope {
        interrupt_in_place(ctx, &topmost, reason, flags)
    } else {
        delete_cascade(ctx, &topmost, reason, flags)?;
        handle_child_removal_in_scope(ctx, &topmost, flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInstanceCancellation {
    pub activity_instance_id: String,
}

impl ActivityInstanceCancellation {
    pub fn new(activity_instance_id: &str) -> Self {
        Self {
            activity_instance_id: activity_instance_id.to_string(),
        }
    }

    pub fn execute(&self, ctx: &mut CommandContext, flags: SkipFlags) -> Result<()> {
        let definition = ctx.definition;
        let tree = ctx.run_without_authorization(|ctx| ctx.activity_instance_tree())?;
        let instance = tree
            .as_ref()
            .and_then(|tree| tree.find_activity_instance(&self.activity_instance_id))
            .ok_or_else(|| EngineError::ActivityInstanceNotFound(self.activity_instance_id.clone()))?;

        let mapping = ActivityExecutionMapping::build(&ctx.tree, definition)?;
        let source = mapping.execution_for_instance(&ctx.tree, definition, instance)?;
        let ends_source_scope = {
            let source = ctx.tree.execution(&source)?;
            source.is_scope
                && scope_of_execution(&ctx.tree, definition, source)
                    == definition.scope_for_activity_instance(&instance.activity_id)
        };

        let reason = format!("Cancelling activity instance '{}'", self.activity_instance_id);
        cancel_from_execution(
            ctx,
            &source,
            CancellationClimb::BelowConcurrentParent,
            ends_source_scope,
            &reason,
            flags,
        )?;
        info!(
            process_instance_id = %ctx.tree.process_instance_id(),
            activity_instance_id = %self.activity_instance_id,
            "Cancelled activity instance"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionInstanceCancellation {
    pub transition_instance_id: String,
}

impl TransitionInstanceCancellation {
    pub fn new(transition_instance_id: &str) -> Self {
        Self {
            transition_instance_id: transition_instance_id.to_string(),
        }
    }

    pub fn execute(&self, ctx: &mut CommandContext, flags: SkipFlags) -> Result<()> {
        let tree = ctx.run_without_authorization(|ctx| ctx.activity_instance_tree())?;
        let execution_id = tree
            .as_ref()
            .and_then(|tree| tree.find_transition_instance(&self.transition_instance_id))
            .map(|transition| transition.execution_id.clone())
            .ok_or_else(|| EngineError::TransitionInstanceNotFound(self.transition_instance_id.clone()))?;

        let reason = format!("Cancelling transition instance '{}'", self.transition_instance_id);
        cancel_from_execution(ctx, &execution_id, CancellationClimb::BelowBranchPoint, false, &reason, flags)?;
        info!(
            process_instance_id = %ctx.tree.process_instance_id(),
            transition_instance_id = %self.transition_instance_id,
            "Cancelled transition instance"
        );
        Ok(())
    }
}

/// Cancellation starting from an execution the caller already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCancellation {
    pub execution_id: ExecutionId,
}

impl ExecutionCancellation {
    pub fn execute(&self, ctx: &mut CommandContext, flags: SkipFlags) -> Result<()> {
        let current = ctx.tree.resolve_replacement(&self.execution_id, ctx.config.max_replacement_chain)?;
        ctx.tree.execution(&current)?;
        let reason = format!("Cancelling execution '{}'", current);
        cancel_from_execution(ctx, &current, CancellationClimb::BelowBranchPoint, false, &reason, flags)
    }
}

/// One cancellation derived from an activity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceCancellation {
    ActivityInstance(ActivityInstanceCancellation),
    TransitionInstance(TransitionInstanceCancellation),
}

impl InstanceCancellation {
    pub fn execute(&self, ctx: &mut CommandContext, flags: SkipFlags) -> Result<()> {
        match self {
            InstanceCancellation::ActivityInstance(cancellation) => cancellation.execute(ctx, flags),
            InstanceCancellation::TransitionInstance(cancellation) => cancellation.execute(ctx, flags),
        }
    }
}

/// Cancels every activity and transition instance of one activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityCancellation {
    pub activity_id: String,
    /// Resolve the instances once against the tree as it was before the modification started.
    pub cancel_current_active_activity_instances: bool,
}

impl ActivityCancellation {
    /// Expands into single cancellations, searching only along the activity's flow-scope path.
    pub fn create_cancellations(
        &self,
        definition: &ProcessDefinition,
        tree: &ActivityInstance,
    ) -> Result<Vec<InstanceCancellation>> {
        let activity = definition
            .find_activity(&self.activity_id)
            .ok_or_else(|| EngineError::ElementNotFound {
                element_id: self.activity_id.clone(),
                process_definition_id: definition.id.clone(),
            })?;
        let parent_scope_ids: HashSet<&str> = definition
            .scope_chain(ScopeId::Activity(activity))
            .into_iter()
            .map(|scope| definition.scope_element_id(scope))
            .collect();

        let mut cancellations = Vec::new();
        let mut activity_instances = Vec::new();
        self.collect_activity_instances(tree, &parent_scope_ids, &mut activity_instances);
        for instance in activity_instances {
            cancellations.push(InstanceCancellation::ActivityInstance(ActivityInstanceCancellation::new(
                &instance.id,
            )));
        }

        let mut transition_instances = Vec::new();
        self.collect_transition_instances(tree, &parent_scope_ids, &mut transition_instances);
        for transition in transition_instances {
            cancellations.push(InstanceCancellation::TransitionInstance(TransitionInstanceCancellation::new(
                &transition.id,
            )));
        }
        Ok(cancellations)
    }

    fn collect_activity_instances<'t>(
        &self,
        instance: &'t ActivityInstance,
        parent_scope_ids: &HashSet<&str>,
        out: &mut Vec<&'t ActivityInstance>,
    ) {
        if !parent_scope_ids.contains(instance.activity_id.as_str()) {
            return;
        }
        if instance.activity_id == self.activity_id {
            out.push(instance);
        }
        for child in &instance.child_activity_instances {
            self.collect_activity_instances(child, parent_scope_ids, out);
        }
    }

    fn collect_transition_instances<'t>(
        &self,
        instance: &'t ActivityInstance,
        parent_scope_ids: &HashSet<&str>,
        out: &mut Vec<&'t TransitionInstance>,
    ) {
        if !parent_scope_ids.contains(instance.activity_id.as_str()) {
            return;
        }
        out.extend(
            instance
                .child_transition_instances
                .iter()
                .filter(|transition| transition.activity_id == self.activity_id),
        );
        for child in &instance.child_activity_instances {
            self.collect_transition_instances(child, parent_scope_ids, out);
        }
    }
}
