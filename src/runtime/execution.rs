use std::collections::{BTreeMap, HashMap};
use std::fmt;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use uuid::Uuid;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Variables = HashMap<String, Value>;

/// One node of the runtime execution tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub process_instance_id: ExecutionId,
    pub parent: Option<ExecutionId>,
    #[serde(default)]
    pub children: Vec<ExecutionId>,
    pub activity_id: Option<String>,
    pub activity_instance_id: Option<String>,
    /// Transition being taken, set while the execution waits in front of its target.
    pub transition_id: Option<String>,
    #[serde(default)]
    pub is_scope: bool,
    #[serde(default)]
    pub is_concurrent: bool,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_ended: bool,
    /// Cancelling the last activity inside keeps this execution alive.
    #[serde(default)]
    pub preserve_scope: bool,
    pub super_execution: Option<ExecutionId>,
    pub sub_process_instance: Option<ExecutionId>,
    pub replaced_by: Option<ExecutionId>,
    #[serde(default)]
    pub variables: Variables,
}

impl Execution {
    fn new(id: ExecutionId, process_instance_id: ExecutionId, parent: Option<ExecutionId>) -> Self {
        Self {
            id,
            process_instance_id,
            parent,
            children: Vec::new(),
            activity_id: None,
            activity_instance_id: None,
            transition_id: None,
            is_scope: false,
            is_concurrent: false,
            is_active: true,
            is_ended: false,
            preserve_scope: false,
            super_execution: None,
            sub_process_instance: None,
            replaced_by: None,
            variables: Variables::new(),
        }
    }

    pub fn is_process_instance(&self) -> bool {
        self.id == self.process_instance_id
    }
}

/// Arena holding every execution of one process instance, linked by id.
///
/// Removed executions stay in the arena flagged as ended until
/// [`ExecutionTree::purge_ended`], so `replaced_by` links keep resolving
/// while a command is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTree {
    process_instance_id: ExecutionId,
    process_definition_id: String,
    executions: BTreeMap<ExecutionId, Execution>,
}

impl ExecutionTree {
    /// Creates an unstarted process instance: a root scope execution without activity.
    pub fn new(process_definition_id: &str) -> Self {
        let id = ExecutionId::generate();
        let mut root = Execution::new(id.clone(), id.clone(), None);
        root.is_scope = true;

        let mut executions = BTreeMap::new();
        executions.insert(id.clone(), root);
        Self {
            process_instance_id: id,
            process_definition_id: process_definition_id.to_string(),
            executions,
        }
    }

    /// Creates an unstarted process instance called from `super_execution` of another instance.
    pub fn new_sub_process_instance(process_definition_id: &str, super_execution: ExecutionId) -> Self {
        let mut tree = Self::new(process_definition_id);
        let root_id = tree.process_instance_id.clone();
        if let Some(root) = tree.executions.get_mut(&root_id) {
            root.super_execution = Some(super_execution);
        }
        tree
    }

    pub fn process_instance_id(&self) -> &ExecutionId {
        &self.process_instance_id
    }

    pub fn process_definition_id(&self) -> &str {
        &self.process_definition_id
    }

    pub fn root(&self) -> Result<&Execution> {
        self.executions
            .get(&self.process_instance_id)
            .ok_or_else(|| EngineError::ProcessInstanceNotFound(self.process_instance_id.clone()))
    }

    pub fn is_ended(&self) -> bool {
        self.root().map(|root| root.is_ended).unwrap_or(true)
    }

    /// Looks up an execution, including removed ones.
    pub fn get(&self, id: &ExecutionId) -> Option<&Execution> {
        self.executions.get(id)
    }

    /// Looks up a live execution.
    pub fn execution(&self, id: &ExecutionId) -> Result<&Execution> {
        self.executions
            .get(id)
            .filter(|execution| !execution.is_ended)
            .ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))
    }

    pub(crate) fn execution_mut(&mut self, id: &ExecutionId) -> Result<&mut Execution> {
        self.executions
            .get_mut(id)
            .filter(|execution| !execution.is_ended)
            .ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))
    }

    /// Live executions ordered by id.
    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        self.executions.values().filter(|execution| !execution.is_ended)
    }

    /// Live executions currently positioned at the given activity.
    pub fn executions_at(&self, activity_id: &str) -> Vec<&Execution> {
        self.executions()
            .filter(|execution| execution.activity_id.as_deref() == Some(activity_id))
            .collect()
    }

    pub fn has_children(&self, id: &ExecutionId) -> bool {
        self.get(id).map(|execution| !execution.children.is_empty()).unwrap_or(false)
    }

    pub fn live_children(&self, id: &ExecutionId) -> Vec<ExecutionId> {
        match self.get(id) {
            Some(execution) => execution
                .children
                .iter()
                .filter(|child| self.get(child).map(|c| !c.is_ended).unwrap_or(false))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_leaf(&self, execution: &Execution) -> bool {
        self.live_children(&execution.id).is_empty()
    }

    /// A scope execution below the process instance that was emptied in place:
    /// no activity and no children, but its scope is still instantiated.
    pub fn is_emptied_scope(&self, execution: &Execution) -> bool {
        execution.is_scope
            && !execution.is_process_instance()
            && !execution.is_concurrent
            && execution.activity_id.is_none()
            && execution.transition_id.is_none()
            && self.is_leaf(execution)
    }

    /// The closest scope execution above `id`; `None` for the process instance.
    pub fn parent_scope_execution(&self, id: &ExecutionId) -> Option<ExecutionId> {
        let mut current = self.get(id)?.parent.clone();
        while let Some(candidate) = current {
            let execution = self.get(&candidate)?;
            if execution.is_scope {
                return Some(candidate);
            }
            current = execution.parent.clone();
        }
        None
    }

    /// Activity instance id of the scope a scope execution stands for.
    ///
    /// The process instance uses its own id; every other scope execution finds
    /// the id on its parent.
    pub fn scope_instance_id(&self, id: &ExecutionId) -> Option<String> {
        let execution = self.get(id)?;
        if execution.is_process_instance() {
            return Some(execution.id.as_str().to_string());
        }
        let parent = execution.parent.as_ref()?;
        self.get(parent)?.activity_instance_id.clone()
    }

    /// Follows `replaced_by` links to the execution that currently carries the state.
    pub fn resolve_replacement(&self, id: &ExecutionId, max_chain: usize) -> Result<ExecutionId> {
        let mut current = id.clone();
        for _ in 0..=max_chain {
            let execution = self.get(&current).ok_or_else(|| EngineError::ExecutionNotFound(current.clone()))?;
            match &execution.replaced_by {
                Some(next) => current = next.clone(),
                None => return Ok(current),
            }
        }
        Err(EngineError::invariant(format!(
            "replacement chain starting at '{}' is longer than {}",
            id, max_chain
        )))
    }

    /// Reads a variable, looking up through the parents.
    pub fn variable(&self, id: &ExecutionId, name: &str) -> Option<&Value> {
        let mut current = Some(id.clone());
        while let Some(candidate) = current {
            let execution = self.get(&candidate)?;
            if let Some(value) = execution.variables.get(name) {
                return Some(value);
            }
            current = execution.parent.clone();
        }
        None
    }

    /// Sets a variable where it is already defined, otherwise on the process instance.
    pub fn set_variable(&mut self, id: &ExecutionId, name: &str, value: Value) -> Result<()> {
        let mut current = Some(id.clone());
        while let Some(candidate) = current {
            let execution = self.execution_mut(&candidate)?;
            if let Some(slot) = execution.variables.get_mut(name) {
                *slot = value;
                return Ok(());
            }
            current = execution.parent.clone();
        }
        let root_id = self.process_instance_id.clone();
        self.execution_mut(&root_id)?.variables.insert(name.to_string(), value);
        Ok(())
    }

    pub fn set_variable_local(&mut self, id: &ExecutionId, name: &str, value: Value) -> Result<()> {
        self.execution_mut(id)?.variables.insert(name.to_string(), value);
        Ok(())
    }

    pub(crate) fn link_sub_process_instance(&mut self, execution: &ExecutionId, sub_process_instance: ExecutionId) -> Result<()> {
        self.execution_mut(execution)?.sub_process_instance = Some(sub_process_instance);
        Ok(())
    }

    /// Creates a child that starts out at the parent's activity and activity instance.
    pub(crate) fn create_child(&mut self, parent_id: &ExecutionId) -> Result<ExecutionId> {
        let id = ExecutionId::generate();
        let parent = self.execution_mut(parent_id)?;
        parent.children.push(id.clone());

        let mut child = Execution::new(id.clone(), parent.process_instance_id.clone(), Some(parent_id.clone()));
        child.activity_id = parent.activity_id.clone();
        child.activity_instance_id = parent.activity_instance_id.clone();
        self.executions.insert(id.clone(), child);
        Ok(id)
    }

    pub(crate) fn move_child(&mut self, child_id: &ExecutionId, new_parent_id: &ExecutionId) -> Result<()> {
        let old_parent = self.execution(child_id)?.parent.clone();
        if let Some(old_parent) = old_parent {
            self.execution_mut(&old_parent)?.children.retain(|c| c != child_id);
        }
        self.execution_mut(new_parent_id)?.children.push(child_id.clone());
        self.execution_mut(child_id)?.parent = Some(new_parent_id.clone());
        Ok(())
    }

    /// Detaches an execution from its parent and marks it ended, together with
    /// anything still listed below it. The parent link is kept for lookups.
    pub(crate) fn remove(&mut self, id: &ExecutionId) -> Result<()> {
        let (parent, children) = {
            let execution = self.execution_mut(id)?;
            execution.is_active = false;
            execution.is_ended = true;
            (execution.parent.clone(), std::mem::take(&mut execution.children))
        };
        if let Some(parent) = parent.and_then(|p| self.executions.get_mut(&p)) {
            parent.children.retain(|c| c != id);
        }
        for child in children {
            if let Some(child) = self.executions.get_mut(&child) {
                child.is_active = false;
                child.is_ended = true;
            }
        }
        Ok(())
    }

    /// Drops removed executions from the arena.
    pub fn purge_ended(&mut self) {
        let root_id = self.process_instance_id.clone();
        self.executions.retain(|id, execution| !execution.is_ended || *id == root_id);
    }

    /// Checks the structural invariants of the live tree.
    pub fn validate(&self) -> Result<()> {
        for execution in self.executions() {
            for child_id in &execution.children {
                let child = self.execution(child_id).map_err(|_| {
                    EngineError::invariant(format!("execution '{}' lists missing child '{}'", execution.id, child_id))
                })?;
                if child.parent.as_ref() != Some(&execution.id) {
                    return Err(EngineError::invariant(format!(
                        "child '{}' does not point back to '{}'",
                        child_id, execution.id
                    )));
                }
            }

            if execution.is_process_instance() {
                if execution.parent.is_some() || !execution.is_scope {
                    return Err(EngineError::invariant("process instance must be a parentless scope"));
                }
            } else if execution.parent.is_none() {
                return Err(EngineError::invariant(format!("execution '{}' has no parent", execution.id)));
            }

            let children = self.live_children(&execution.id);
            if execution.is_concurrent {
                if execution.is_scope {
                    return Err(EngineError::invariant(format!("concurrent execution '{}' is a scope", execution.id)));
                }
                if children.len() > 1 {
                    return Err(EngineError::invariant(format!(
                        "concurrent execution '{}' has {} children",
                        execution.id,
                        children.len()
                    )));
                }
                let parent_is_scope = execution
                    .parent
                    .as_ref()
                    .and_then(|p| self.get(p))
                    .map(|p| p.is_scope)
                    .unwrap_or(false);
                if !parent_is_scope {
                    return Err(EngineError::invariant(format!(
                        "concurrent execution '{}' is not placed under a scope execution",
                        execution.id
                    )));
                }
            } else if execution.is_scope {
                let concurrent = children
                    .iter()
                    .filter(|c| self.get(c).map(|c| c.is_concurrent).unwrap_or(false))
                    .count();
                if concurrent > 0 && concurrent != children.len() {
                    return Err(EngineError::invariant(format!(
                        "scope execution '{}' mixes concurrent and non-concurrent children",
                        execution.id
                    )));
                }
            } else {
                return Err(EngineError::invariant(format!(
                    "execution '{}' is neither scope nor concurrent",
                    execution.id
                )));
            }
        }
        Ok(())
    }

    /// Structural view of the live tree, used for assertions and printing.
    pub fn describe(&self) -> Result<TreeShape> {
        let root = self.root()?;
        Ok(self.describe_from(root))
    }

    fn describe_from(&self, execution: &Execution) -> TreeShape {
        let mut shape = TreeShape {
            activity_id: execution.activity_id.clone(),
            is_scope: execution.is_scope,
            is_concurrent: execution.is_concurrent,
            children: Vec::new(),
        };
        for child in &execution.children {
            if let Some(child) = self.get(child).filter(|c| !c.is_ended) {
                shape.children.push(self.describe_from(child));
            }
        }
        shape.children.sort();
        shape
    }
}

/// Activity and flags of an execution plus its children, ignoring ids and child order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeShape {
    pub activity_id: Option<String>,
    pub is_scope: bool,
    pub is_concurrent: bool,
    pub children: Vec<TreeShape>,
}

impl TreeShape {
    pub fn new(activity_id: Option<&str>) -> Self {
        Self {
            activity_id: activity_id.map(str::to_string),
            is_scope: false,
            is_concurrent: false,
            children: Vec::new(),
        }
    }

    pub fn scope(mut self) -> Self {
        self.is_scope = true;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.is_concurrent = true;
        self
    }

    pub fn child(mut self, child: TreeShape) -> Self {
        self.children.push(child);
        self.children.sort();
        self
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let mut flags = Vec::new();
        if self.is_scope {
            flags.push("scope");
        }
        if self.is_concurrent {
            flags.push("concurrent");
        }
        writeln!(
            f,
            "{}{} [{}]",
            "  ".repeat(depth),
            self.activity_id.as_deref().unwrap_or("-"),
            flags.join(", ")
        )?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for TreeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
