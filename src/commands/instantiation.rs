use tracing::{debug, info};
use crate::error::{EngineError, Result};
use crate::runtime::context::{CommandContext, SkipFlags};
use crate::runtime::definition::{
    ActivityIndex, ActivityStartBehavior, ProcessDefinition, ScopeId, TargetElement,
};
use crate::runtime::execution::{ExecutionId, Variables};
use crate::runtime::mapping::ActivityExecutionMapping;
use crate::runtime::operations::{
    add_inner_instance, create_concurrent_execution, delete_cascade, execute_activities, interrupt_in_place,
};
use crate::runtime::walker::{ActivityStackCollector, FlowScopeWalker, ScopeVisitor};

/// Where an instantiation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiationTarget {
    BeforeActivity(String),
    /// Takes the single outgoing transition of the activity.
    AfterActivity(String),
    Transition(String),
}

impl InstantiationTarget {
    pub fn element_id(&self) -> &str {
        match self {
            InstantiationTarget::BeforeActivity(id)
            | InstantiationTarget::AfterActivity(id)
            | InstantiationTarget::Transition(id) => id,
        }
    }
}

/// Starts an activity or transition inside a running process instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantiationCommand {
    pub target: InstantiationTarget,
    pub ancestor_activity_instance_id: Option<String>,
    pub variables: Variables,
    pub variables_local: Variables,
}

impl InstantiationCommand {
    pub fn new(target: InstantiationTarget) -> Self {
        Self {
            target,
            ancestor_activity_instance_id: None,
            variables: Variables::new(),
            variables_local: Variables::new(),
        }
    }

    /// Resolves the target against the definition once.
    pub fn resolve_target(&self, definition: &ProcessDefinition) -> Result<TargetElement> {
        let element_id = self.target.element_id();
        let not_found = || EngineError::ElementNotFound {
            element_id: element_id.to_string(),
            process_definition_id: definition.id.clone(),
        };

        match &self.target {
            InstantiationTarget::BeforeActivity(activity_id) => {
                let activity = definition.find_activity(activity_id).ok_or_else(not_found)?;
                if definition.activity(activity).compensation {
                    return Err(EngineError::UnsupportedTargetElementType {
                        element_id: activity_id.clone(),
                        reason: "activity is a compensation boundary event".to_string(),
                    });
                }
                Ok(TargetElement::Activity(activity))
            }
            InstantiationTarget::AfterActivity(activity_id) => {
                let activity = definition.find_activity(activity_id).ok_or_else(not_found)?;
                match definition.activity(activity).outgoing.as_slice() {
                    [transition] => Ok(TargetElement::Transition(*transition)),
                    [] => Err(EngineError::UnsupportedTargetElementType {
                        element_id: activity_id.clone(),
                        reason: "activity has no outgoing sequence flow to take".to_string(),
                    }),
                    _ => Err(EngineError::UnsupportedTargetElementType {
                        element_id: activity_id.clone(),
                        reason: "activity has more than one outgoing sequence flow".to_string(),
                    }),
                }
            }
            InstantiationTarget::Transition(transition_id) => {
                let transition = definition.find_transition(transition_id).ok_or_else(not_found)?;
                Ok(TargetElement::Transition(transition))
            }
        }
    }

    pub fn execute(&self, ctx: &mut CommandContext, flags: SkipFlags) -> Result<ExecutionId> {
        let definition = ctx.definition;
        if ctx.tree.is_ended() {
            return Err(EngineError::ProcessInstanceEnded(ctx.tree.process_instance_id().clone()));
        }

        // 1. Target element and its flow scope
        let target = self.resolve_target(definition)?;
        let target_flow_scope = match target {
            TargetElement::Activity(activity) => definition.activity(activity).flow_scope,
            TargetElement::Transition(transition) => {
                definition.activity(definition.transition(transition).source).flow_scope
            }
        };

        // 2. Fresh mapping
        let mapping = ActivityExecutionMapping::build(&ctx.tree, definition)?;

        // 3. Walk up to the closest instantiated scope (or the ancestor's scope)
        let mut stack_collector = ActivityStackCollector::new();
        let mut walker = FlowScopeWalker::new(definition, target_flow_scope);

        let scope_execution = match &self.ancestor_activity_instance_id {
            None => {
                let scope = walker.walk_until(&mut [&mut stack_collector as &mut dyn ScopeVisitor], |scope| {
                    !mapping.executions(scope).is_empty() || scope == ScopeId::Process
                });
                let executions = mapping.executions(scope);
                match executions.as_slice() {
                    [single] => (*single).clone(),
                    [] => {
                        return Err(EngineError::invariant(format!(
                            "no execution found for scope '{}'",
                            definition.scope_element_id(scope)
                        )));
                    }
                    _ => {
                        return Err(EngineError::AmbiguousScopeExecution {
                            element_id: self.target.element_id().to_string(),
                            scope_id: definition.scope_element_id(scope).to_string(),
                        });
                    }
                }
            }
            Some(ancestor_id) => {
                let tree = ctx.run_without_authorization(|ctx| ctx.activity_instance_tree())?;
                let ancestor = tree
                    .as_ref()
                    .and_then(|tree| tree.find_activity_instance(ancestor_id))
                    .ok_or_else(|| EngineError::ActivityInstanceNotFound(ancestor_id.clone()))?;

                let ancestor_execution = mapping.execution_for_instance(&ctx.tree, definition, ancestor)?;
                let ancestor_scope = definition
                    .scope_for_activity_instance(&ancestor.activity_id)
                    .ok_or_else(|| EngineError::ActivityInstanceNotFound(ancestor_id.clone()))?;

                let scope = walker.walk_until(&mut [&mut stack_collector as &mut dyn ScopeVisitor], |scope| {
                    (mapping.contains(scope, &ancestor_execution) && scope == ancestor_scope)
                        || scope == ScopeId::Process
                });
                if !mapping.contains(scope, &ancestor_execution) {
                    return Err(EngineError::InvalidAncestor {
                        ancestor_activity_instance_id: ancestor_id.clone(),
                        element_id: self.target.element_id().to_string(),
                    });
                }
                ancestor_execution
            }
        };

        // 4. Outermost activity first
        let mut stack = stack_collector.into_activity_stack();
        stack.reverse();

        // 5. Start behavior of the topmost activity to instantiate
        let (top_most, flow_scope) = match (stack.first(), target) {
            (Some(&top), _) => (Some(top), definition.activity(top).flow_scope),
            (None, TargetElement::Activity(activity)) => (Some(activity), definition.activity(activity).flow_scope),
            (None, TargetElement::Transition(_)) => (None, target_flow_scope),
        };

        let mut start_behavior = ActivityStartBehavior::ConcurrentInFlowScope;
        if let Some(top) = top_most {
            start_behavior = definition.activity(top).start_behavior;
            if !stack.is_empty() {
                let second_top_most = match (stack.get(1), target) {
                    (Some(&second), _) => Some(second),
                    (None, TargetElement::Activity(activity)) => Some(activity),
                    (None, TargetElement::Transition(_)) => None,
                };
                // entering the scope anywhere but its initial activity keeps it concurrent
                if definition.activity(top).initial_activity != second_top_most {
                    start_behavior = ActivityStartBehavior::ConcurrentInFlowScope;
                }
            }
        }

        debug!(
            element_id = %self.target.element_id(),
            stack = ?stack.iter().map(|a| definition.activity(*a).id.as_str()).collect::<Vec<_>>(),
            start_behavior = ?start_behavior,
            "Resolved instantiation"
        );

        // 6. Inside a running multi-instance body the start adds another inner instance
        if let Some(characteristics) = definition.loop_characteristics(flow_scope) {
            if characteristics.sequential {
                return Err(EngineError::ConcurrentInstantiationNotPossible {
                    scope_id: definition.scope_element_id(flow_scope).to_string(),
                });
            }
            let body = flow_scope
                .activity()
                .ok_or_else(|| EngineError::invariant("the process definition cannot be a multi-instance body"))?;
            let instance = add_inner_instance(ctx, &scope_execution, body)?;
            let executing = self.instantiate(ctx, &instance, &stack, target, flags)?;
            info!(
                process_instance_id = %ctx.tree.process_instance_id(),
                element_id = %self.target.element_id(),
                execution_id = %executing,
                "Instantiated element in multi-instance body"
            );
            return Ok(executing);
        }

        // 7. Interruption, cancellation or concurrent start
        let executing = match (start_behavior, top_most) {
            (ActivityStartBehavior::CancelEventScope, Some(top)) => {
                let scope_to_cancel = definition.activity(top).event_scope.unwrap_or(flow_scope);
                match self.single_execution_for_scope(definition, &mapping, scope_to_cancel)? {
                    Some(execution_to_cancel) => {
                        let parent = ctx.tree.execution(&execution_to_cancel)?.parent.clone().ok_or_else(|| {
                            EngineError::invariant("cannot cancel the process instance to start a boundary event")
                        })?;
                        let reason = format!("Cancelling activity '{}' executed.", definition.scope_element_id(scope_to_cancel));
                        delete_cascade(ctx, &execution_to_cancel, &reason, flags)?;
                        self.instantiate(ctx, &parent, &stack, target, flags)?
                    }
                    None => {
                        let flow_scope_execution = self
                            .single_execution_for_scope(definition, &mapping, flow_scope)?
                            .unwrap_or(scope_execution);
                        self.instantiate_concurrent(ctx, &flow_scope_execution, &stack, target, flags)?
                    }
                }
            }
            (ActivityStartBehavior::InterruptEventScope, Some(top)) => {
                let scope_to_cancel = definition.activity(top).event_scope.unwrap_or(flow_scope);
                match self.single_execution_for_scope(definition, &mapping, scope_to_cancel)? {
                    Some(execution_to_interrupt) => {
                        let reason = format!(
                            "Interrupting event sub process '{}' fired.",
                            definition.activity(top).id
                        );
                        interrupt_in_place(ctx, &execution_to_interrupt, &reason, flags)?;
                        self.instantiate(ctx, &execution_to_interrupt, &stack, target, flags)?
                    }
                    None => self.instantiate_concurrent(ctx, &scope_execution, &stack, target, flags)?,
                }
            }
            _ => {
                let scope = ctx.tree.execution(&scope_execution)?;
                let unused = !ctx.tree.has_children(&scope_execution) && (scope.activity_id.is_none() || scope.is_ended);
                if unused {
                    self.instantiate(ctx, &scope_execution, &stack, target, flags)?
                } else {
                    self.instantiate_concurrent(ctx, &scope_execution, &stack, target, flags)?
                }
            }
        };

        info!(
            process_instance_id = %ctx.tree.process_instance_id(),
            element_id = %self.target.element_id(),
            execution_id = %executing,
            "Instantiated element"
        );
        Ok(executing)
    }

    fn single_execution_for_scope(
        &self,
        definition: &ProcessDefinition,
        mapping: &ActivityExecutionMapping,
        scope: ScopeId,
    ) -> Result<Option<ExecutionId>> {
        let executions = mapping.executions(scope);
        match executions.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some((*single).clone())),
            _ => Err(EngineError::AmbiguousExecutionToCancel {
                element_id: self.target.element_id().to_string(),
                scope_id: definition.scope_element_id(scope).to_string(),
            }),
        }
    }

    fn instantiate(
        &self,
        ctx: &mut CommandContext,
        execution: &ExecutionId,
        stack: &[ActivityIndex],
        target: TargetElement,
        flags: SkipFlags,
    ) -> Result<ExecutionId> {
        execute_activities(ctx, execution, stack, target, &self.variables, &self.variables_local, flags)
    }

    fn instantiate_concurrent(
        &self,
        ctx: &mut CommandContext,
        scope_execution: &ExecutionId,
        stack: &[ActivityIndex],
        target: TargetElement,
        flags: SkipFlags,
    ) -> Result<ExecutionId> {
        let scope = ctx.tree.execution(scope_execution)?;
        if !ctx.tree.has_children(scope_execution) && scope.activity_id.is_none() {
            return self.instantiate(ctx, scope_execution, stack, target, flags);
        }
        let concurrent = create_concurrent_execution(ctx, scope_execution)?;
        self.instantiate(ctx, &concurrent, stack, target, flags)
    }
}
