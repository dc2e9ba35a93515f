use crate::runtime::definition::{ActivityIndex, ProcessDefinition, ScopeId};
use crate::runtime::execution::{Execution, ExecutionId, ExecutionTree};

pub trait ScopeVisitor {
    fn visit(&mut self, definition: &ProcessDefinition, scope: ScopeId);
}

/// Walks from a scope upwards through its flow scopes.
pub struct FlowScopeWalker<'d> {
    definition: &'d ProcessDefinition,
    current: ScopeId,
}

impl<'d> FlowScopeWalker<'d> {
    pub fn new(definition: &'d ProcessDefinition, start: ScopeId) -> Self {
        Self { definition, current: start }
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    /// Visits scopes and moves upwards until `condition` holds or the process
    /// definition was visited. The scope the walk stops at is not visited.
    pub fn walk_until<F>(&mut self, visitors: &mut [&mut dyn ScopeVisitor], condition: F) -> ScopeId
    where
        F: Fn(ScopeId) -> bool,
    {
        while !condition(self.current) {
            for visitor in visitors.iter_mut() {
                visitor.visit(self.definition, self.current);
            }
            match self.definition.flow_scope(self.current) {
                Some(next) => self.current = next,
                None => break,
            }
        }
        self.current
    }
}

/// Collects the activities passed by a [`FlowScopeWalker`], innermost first.
#[derive(Debug, Default)]
pub struct ActivityStackCollector {
    activity_stack: Vec<ActivityIndex>,
}

impl ActivityStackCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_activity_stack(self) -> Vec<ActivityIndex> {
        self.activity_stack
    }
}

impl ScopeVisitor for ActivityStackCollector {
    fn visit(&mut self, _definition: &ProcessDefinition, scope: ScopeId) {
        if let ScopeId::Activity(activity) = scope {
            self.activity_stack.push(activity);
        }
    }
}

/// Collects every visited scope, process definition included.
#[derive(Debug, Default)]
pub struct ScopeCollector {
    scopes: Vec<ScopeId>,
}

impl ScopeCollector {
    pub fn into_scopes(self) -> Vec<ScopeId> {
        self.scopes
    }
}

impl ScopeVisitor for ScopeCollector {
    fn visit(&mut self, _definition: &ProcessDefinition, scope: ScopeId) {
        self.scopes.push(scope);
    }
}

pub trait ExecutionVisitor {
    fn visit(&mut self, execution: &Execution);
}

/// Walks from an execution to the process instance along parent links.
pub struct ExecutionWalker<'t> {
    tree: &'t ExecutionTree,
    current: Option<ExecutionId>,
}

impl<'t> ExecutionWalker<'t> {
    pub fn new(tree: &'t ExecutionTree, start: ExecutionId) -> Self {
        Self { tree, current: Some(start) }
    }

    pub fn walk_until<F>(&mut self, visitors: &mut [&mut dyn ExecutionVisitor], condition: F) -> Option<ExecutionId>
    where
        F: Fn(&Execution) -> bool,
    {
        while let Some(id) = self.current.clone() {
            let Some(execution) = self.tree.get(&id) else {
                self.current = None;
                break;
            };
            if condition(execution) {
                break;
            }
            for visitor in visitors.iter_mut() {
                visitor.visit(execution);
            }
            self.current = execution.parent.clone();
        }
        self.current.clone()
    }
}

/// Collects the scope executions passed by an [`ExecutionWalker`], innermost first.
#[derive(Debug, Default)]
pub struct ScopeExecutionCollector {
    scope_executions: Vec<ExecutionId>,
}

impl ScopeExecutionCollector {
    pub fn into_scope_executions(self) -> Vec<ExecutionId> {
        self.scope_executions
    }
}

impl ExecutionVisitor for ScopeExecutionCollector {
    fn visit(&mut self, execution: &Execution) {
        if execution.is_scope {
            self.scope_executions.push(execution.id.clone());
        }
    }
}
