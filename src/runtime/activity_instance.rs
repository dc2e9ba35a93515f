use std::collections::HashMap;
use std::fmt;
use serde::Serialize;
use crate::error::{EngineError, Result};
use crate::runtime::definition::{ProcessDefinition, ScopeId};
use crate::runtime::execution::{ExecutionId, ExecutionTree};
use crate::runtime::mapping::leaf_scope_executions;

/// A running instance of an activity or scope, as seen from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityInstance {
    pub id: String,
    pub parent_activity_instance_id: Option<String>,
    pub activity_id: String,
    pub activity_name: Option<String>,
    pub activity_type: String,
    pub process_instance_id: ExecutionId,
    pub process_definition_id: String,
    pub execution_ids: Vec<ExecutionId>,
    pub child_activity_instances: Vec<ActivityInstance>,
    pub child_transition_instances: Vec<TransitionInstance>,
}

/// An execution waiting in front of an activity it has not entered yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionInstance {
    /// Same as the execution id.
    pub id: String,
    pub parent_activity_instance_id: String,
    pub activity_id: String,
    pub activity_name: Option<String>,
    pub activity_type: String,
    pub execution_id: ExecutionId,
    pub process_instance_id: ExecutionId,
    pub process_definition_id: String,
}

impl ActivityInstance {
    /// Derives the activity-instance tree from the execution tree; `None` once the instance ended.
    pub fn build(tree: &ExecutionTree, definition: &ProcessDefinition) -> Result<Option<ActivityInstance>> {
        if tree.is_ended() {
            return Ok(None);
        }
        let root = tree.root()?;
        let process_instance_id = root.id.clone();

        let new_instance = |id: String, parent: Option<String>, scope: ScopeId, scope_execution: &ExecutionId| {
            let mut execution_ids = vec![scope_execution.clone()];
            // concurrent executions that only wrap a scope child belong to the scope instance
            for child in tree.live_children(scope_execution) {
                if let Some(child) = tree.get(&child) {
                    if child.is_concurrent && child.activity_id.is_none() {
                        execution_ids.push(child.id.clone());
                    }
                }
            }
            ActivityInstance {
                id,
                parent_activity_instance_id: parent,
                activity_id: definition.scope_element_id(scope).to_string(),
                activity_name: definition.scope_name(scope).map(str::to_string),
                activity_type: definition.scope_type_name(scope).to_string(),
                process_instance_id: process_instance_id.clone(),
                process_definition_id: definition.id.clone(),
                execution_ids,
                child_activity_instances: Vec::new(),
                child_transition_instances: Vec::new(),
            }
        };

        let mut instances: HashMap<String, ActivityInstance> = HashMap::new();
        let mut transitions: Vec<TransitionInstance> = Vec::new();

        let root_instance = new_instance(process_instance_id.to_string(), None, ScopeId::Process, &process_instance_id);
        instances.insert(root_instance.id.clone(), root_instance);

        for leaf in tree.executions().filter(|e| tree.is_leaf(e)) {
            let own_activity = match leaf.activity_id.as_deref() {
                Some(activity_id) => Some(definition.find_activity(activity_id).ok_or_else(|| {
                    EngineError::ElementNotFound {
                        element_id: activity_id.to_string(),
                        process_definition_id: definition.id.clone(),
                    }
                })?),
                // an emptied scope execution still carries its scope instance
                None if tree.is_emptied_scope(leaf) => None,
                None => continue,
            };

            let scope_executions: HashMap<ScopeId, ExecutionId> =
                leaf_scope_executions(tree, definition, leaf)?.into_iter().collect();

            if let Some(activity_index) = own_activity {
                let activity = definition.activity(activity_index);
                let parent_id = scope_instance_id(tree, &scope_executions, activity.flow_scope)?;

                match &leaf.activity_instance_id {
                    Some(activity_instance_id) => {
                        let instance = new_instance(
                            activity_instance_id.clone(),
                            Some(parent_id),
                            ScopeId::Activity(activity_index),
                            &leaf.id,
                        );
                        instances.entry(activity_instance_id.clone()).or_insert(instance);
                    }
                    None => transitions.push(TransitionInstance {
                        id: leaf.id.to_string(),
                        parent_activity_instance_id: parent_id,
                        activity_id: activity.id.clone(),
                        activity_name: activity.name.clone(),
                        activity_type: activity.kind.type_name().to_string(),
                        execution_id: leaf.id.clone(),
                        process_instance_id: process_instance_id.clone(),
                        process_definition_id: definition.id.clone(),
                    }),
                }
            }

            for (&scope, scope_execution) in &scope_executions {
                if scope == ScopeId::Process || own_activity.map(ScopeId::Activity) == Some(scope) {
                    continue;
                }
                let id = scope_instance_id(tree, &scope_executions, scope)?;
                if instances.contains_key(&id) {
                    continue;
                }
                let flow_scope = definition.flow_scope(scope).unwrap_or(ScopeId::Process);
                let parent = scope_instance_id(tree, &scope_executions, flow_scope)?;
                instances.insert(id.clone(), new_instance(id, Some(parent), scope, scope_execution));
            }
        }

        // 挂载子实例
        let mut children: HashMap<String, Vec<ActivityInstance>> = HashMap::new();
        let mut root = None;
        for (_, instance) in instances.drain() {
            match instance.parent_activity_instance_id.clone() {
                Some(parent) => children.entry(parent).or_default().push(instance),
                None => root = Some(instance),
            }
        }
        let mut transition_children: HashMap<String, Vec<TransitionInstance>> = HashMap::new();
        for transition in transitions {
            transition_children
                .entry(transition.parent_activity_instance_id.clone())
                .or_default()
                .push(transition);
        }

        let mut root = root.ok_or_else(|| EngineError::invariant("no process instance activity instance was generated"))?;
        attach_children(&mut root, &mut children, &mut transition_children);

        if let Some(orphan) = children.keys().chain(transition_children.keys()).next() {
            return Err(EngineError::invariant(format!(
                "no parent activity instance with id '{}' generated",
                orphan
            )));
        }
        Ok(Some(root))
    }

    pub fn find_activity_instance(&self, activity_instance_id: &str) -> Option<&ActivityInstance> {
        if self.id == activity_instance_id {
            return Some(self);
        }
        self.child_activity_instances
            .iter()
            .find_map(|child| child.find_activity_instance(activity_instance_id))
    }

    pub fn find_transition_instance(&self, transition_instance_id: &str) -> Option<&TransitionInstance> {
        self.child_transition_instances
            .iter()
            .find(|transition| transition.id == transition_instance_id)
            .or_else(|| {
                self.child_activity_instances
                    .iter()
                    .find_map(|child| child.find_transition_instance(transition_instance_id))
            })
    }

    /// All activity instances of the given activity in this subtree.
    pub fn activity_instances_for(&self, activity_id: &str) -> Vec<&ActivityInstance> {
        let mut found = Vec::new();
        self.collect_activity_instances(activity_id, &mut found);
        found
    }

    fn collect_activity_instances<'a>(&'a self, activity_id: &str, found: &mut Vec<&'a ActivityInstance>) {
        if self.activity_id == activity_id {
            found.push(self);
        }
        for child in &self.child_activity_instances {
            child.collect_activity_instances(activity_id, found);
        }
    }

    /// All transition instances of the given activity in this subtree.
    pub fn transition_instances_for(&self, activity_id: &str) -> Vec<&TransitionInstance> {
        let mut found: Vec<&TransitionInstance> = self
            .child_transition_instances
            .iter()
            .filter(|transition| transition.activity_id == activity_id)
            .collect();
        for child in &self.child_activity_instances {
            found.extend(child.transition_instances_for(activity_id));
        }
        found
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(f, "{}{} => {}", indent, self.activity_id, self.id)?;
        for child in &self.child_activity_instances {
            child.write_indented(f, depth + 1)?;
        }
        for transition in &self.child_transition_instances {
            writeln!(f, "{}  {} -> (transition {})", indent, transition.activity_id, transition.id)?;
        }
        Ok(())
    }
}

impl fmt::Display for ActivityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

fn scope_instance_id(
    tree: &ExecutionTree,
    scope_executions: &HashMap<ScopeId, ExecutionId>,
    scope: ScopeId,
) -> Result<String> {
    let scope_execution = scope_executions
        .get(&scope)
        .ok_or_else(|| EngineError::invariant(format!("no scope execution for scope {:?}", scope)))?;
    tree.scope_instance_id(scope_execution).ok_or_else(|| {
        EngineError::invariant(format!(
            "scope execution '{}' has no activity instance id for its scope",
            scope_execution
        ))
    })
}

fn attach_children(
    instance: &mut ActivityInstance,
    children: &mut HashMap<String, Vec<ActivityInstance>>,
    transitions: &mut HashMap<String, Vec<TransitionInstance>>,
) {
    let mut own = children.remove(&instance.id).unwrap_or_default();
    for child in own.iter_mut() {
        attach_children(child, children, transitions);
    }
    own.sort_by(|a, b| (&a.activity_id, &a.id).cmp(&(&b.activity_id, &b.id)));
    instance.child_activity_instances = own;

    let mut own_transitions = transitions.remove(&instance.id).unwrap_or_default();
    own_transitions.sort_by(|a, b| (&a.activity_id, &a.id).cmp(&(&b.activity_id, &b.id)));
    instance.child_transition_instances = own_transitions;
}
