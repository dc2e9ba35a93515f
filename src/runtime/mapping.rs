use std::collections::{BTreeSet, HashMap};
use crate::error::{EngineError, Result};
use crate::runtime::activity_instance::ActivityInstance;
use crate::runtime::definition::{ProcessDefinition, ScopeId};
use crate::runtime::execution::{Execution, ExecutionId, ExecutionTree};
use crate::runtime::walker::{
    ExecutionVisitor, ExecutionWalker, FlowScopeWalker, ScopeCollector, ScopeExecutionCollector, ScopeVisitor,
};

/// Which executions currently stand for which scope.
///
/// Derived from the execution tree on demand. Any tree mutation makes a
/// mapping stale, so commands build a new one for every instruction.
#[derive(Debug, Default)]
pub struct ActivityExecutionMapping {
    executions: HashMap<ScopeId, BTreeSet<ExecutionId>>,
}

impl ActivityExecutionMapping {
    pub fn build(tree: &ExecutionTree, definition: &ProcessDefinition) -> Result<Self> {
        let mut mapping = Self::default();

        for execution in tree.executions() {
            if !tree.is_leaf(execution) {
                continue;
            }
            match &execution.activity_id {
                Some(activity_id) => {
                    if execution.activity_instance_id.is_some() {
                        let activity = definition
                            .find_activity(activity_id)
                            .ok_or_else(|| unknown_activity(activity_id, definition))?;
                        mapping.submit(ScopeId::Activity(activity), execution.id.clone());
                    }
                    for (scope, scope_execution) in leaf_scope_executions(tree, definition, execution)? {
                        mapping.submit(scope, scope_execution);
                    }
                }
                None if execution.is_process_instance() => mapping.submit(ScopeId::Process, execution.id.clone()),
                // 被清空但保留的作用域仍然代表其作用域实例
                None if tree.is_emptied_scope(execution) => {
                    for (scope, scope_execution) in leaf_scope_executions(tree, definition, execution)? {
                        mapping.submit(scope, scope_execution);
                    }
                }
                None => {}
            }
        }
        Ok(mapping)
    }

    fn submit(&mut self, scope: ScopeId, execution: ExecutionId) {
        self.executions.entry(scope).or_default().insert(execution);
    }

    /// Executions of a scope, empty when the scope is not instantiated.
    pub fn executions(&self, scope: ScopeId) -> Vec<&ExecutionId> {
        self.executions.get(&scope).map(|set| set.iter().collect()).unwrap_or_default()
    }

    pub fn contains(&self, scope: ScopeId, execution: &ExecutionId) -> bool {
        self.executions.get(&scope).map(|set| set.contains(execution)).unwrap_or(false)
    }

    /// The single execution representing an activity instance.
    pub fn execution_for_instance(
        &self,
        tree: &ExecutionTree,
        definition: &ProcessDefinition,
        instance: &ActivityInstance,
    ) -> Result<ExecutionId> {
        let scope = definition
            .scope_for_activity_instance(&instance.activity_id)
            .ok_or_else(|| unknown_activity(&instance.activity_id, definition))?;

        // a concurrent execution listed for the instance stands in for its scope child
        let mut candidates: BTreeSet<ExecutionId> = instance.execution_ids.iter().cloned().collect();
        for id in &instance.execution_ids {
            let is_concurrent = tree.get(id).map(|e| e.is_concurrent).unwrap_or(false);
            if is_concurrent {
                if let Some(child) = tree.live_children(id).into_iter().next() {
                    candidates.insert(child);
                }
            }
        }

        let retained: Vec<&ExecutionId> = self
            .executions(scope)
            .into_iter()
            .filter(|execution| candidates.contains(*execution))
            .collect();

        match retained.as_slice() {
            [single] => Ok((*single).clone()),
            _ => Err(EngineError::AmbiguousActivityInstanceExecution {
                activity_instance_id: instance.id.clone(),
                count: retained.len(),
            }),
        }
    }
}

fn unknown_activity(activity_id: &str, definition: &ProcessDefinition) -> EngineError {
    EngineError::ElementNotFound {
        element_id: activity_id.to_string(),
        process_definition_id: definition.id.clone(),
    }
}

/// The scope a scope execution stands for, read from the activity instance id its parent keeps.
pub fn scope_of_execution(tree: &ExecutionTree, definition: &ProcessDefinition, execution: &Execution) -> Option<ScopeId> {
    if execution.is_process_instance() {
        return Some(ScopeId::Process);
    }
    if !execution.is_scope {
        return None;
    }
    let activity_instance_id = tree.scope_instance_id(&execution.id)?;
    definition.activity_of_instance(&activity_instance_id).map(ScopeId::Activity)
}

/// Pairs the scopes above a leaf's activity with the scope executions above the leaf.
///
/// An emptied scope execution starts the pairing at the scope it stands for.
pub(crate) fn leaf_scope_executions(
    tree: &ExecutionTree,
    definition: &ProcessDefinition,
    leaf: &Execution,
) -> Result<Vec<(ScopeId, ExecutionId)>> {
    let (current_scope, scope_execution) = match leaf.activity_id.as_deref() {
        Some(activity_id) => {
            let activity_index = definition
                .find_activity(activity_id)
                .ok_or_else(|| unknown_activity(activity_id, definition))?;
            let activity = definition.activity(activity_index);

            // a scope execution that entered a scope activity stands for that activity
            let represents_activity = activity.is_scope
                && leaf.is_scope
                && !leaf.is_process_instance()
                && leaf.activity_instance_id.is_some();
            let current_scope = if represents_activity {
                ScopeId::Activity(activity_index)
            } else {
                activity.flow_scope
            };

            let scope_execution = if leaf.is_scope {
                leaf.id.clone()
            } else {
                leaf.parent.clone().ok_or_else(|| {
                    EngineError::invariant(format!("non-scope execution '{}' has no parent", leaf.id))
                })?
            };
            (current_scope, scope_execution)
        }
        None if tree.is_emptied_scope(leaf) => {
            let scope = scope_of_execution(tree, definition, leaf).ok_or_else(|| {
                EngineError::invariant(format!("emptied scope execution '{}' does not resolve to a scope", leaf.id))
            })?;
            (scope, leaf.id.clone())
        }
        None => {
            return Err(EngineError::invariant(format!("leaf execution '{}' has no activity", leaf.id)));
        }
    };

    let mut execution_collector = ScopeExecutionCollector::default();
    ExecutionWalker::new(tree, scope_execution).walk_until(&mut [&mut execution_collector as &mut dyn ExecutionVisitor], |_| false);
    let scope_executions = execution_collector.into_scope_executions();

    let mut scope_collector = ScopeCollector::default();
    FlowScopeWalker::new(definition, current_scope).walk_until(&mut [&mut scope_collector as &mut dyn ScopeVisitor], |_| false);
    let scopes = scope_collector.into_scopes();

    if scopes.len() != scope_executions.len() {
        return Err(EngineError::invariant(format!(
            "execution '{}' in scope '{}' has {} scope executions for {} scopes",
            leaf.id,
            definition.scope_element_id(current_scope),
            scope_executions.len(),
            scopes.len()
        )));
    }
    Ok(scopes.into_iter().zip(scope_executions).collect())
}
