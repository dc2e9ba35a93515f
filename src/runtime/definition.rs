use std::collections::HashMap;
use serde_json::Value;

pub type ActivityIndex = usize;
pub type TransitionIndex = usize;

/// Appended to an activity id to name the generated multi-instance body.
pub const MULTI_INSTANCE_BODY_SUFFIX: &str = "#multiInstanceBody";

/// A static scope: the process definition itself or a scope-capable activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeId {
    Process,
    Activity(ActivityIndex),
}

impl ScopeId {
    pub fn activity(self) -> Option<ActivityIndex> {
        match self {
            ScopeId::Process => None,
            ScopeId::Activity(index) => Some(index),
        }
    }
}

/// What an instantiation starts: an activity, or a transition into its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetElement {
    Activity(ActivityIndex),
    Transition(TransitionIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    StartEvent,
    EndEvent,
    Task,
    Gateway,
    IntermediateEvent,
    SubProcess,
    EventSubProcess,
    BoundaryEvent,
    MultiInstanceBody,
}

impl ActivityKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ActivityKind::StartEvent => "startEvent",
            ActivityKind::EndEvent => "endEvent",
            ActivityKind::Task => "task",
            ActivityKind::Gateway => "gateway",
            ActivityKind::IntermediateEvent => "intermediateEvent",
            ActivityKind::SubProcess => "subProcess",
            ActivityKind::EventSubProcess => "eventSubProcess",
            ActivityKind::BoundaryEvent => "boundaryEvent",
            ActivityKind::MultiInstanceBody => "multiInstanceBody",
        }
    }
}

/// How starting an activity affects the executions around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStartBehavior {
    Default,
    ConcurrentInFlowScope,
    /// Interrupting event sub-process: the event scope is interrupted, its execution reused.
    InterruptEventScope,
    /// Interrupting boundary event: the attached activity's execution is removed.
    CancelEventScope,
}

/// Loop settings of a multi-instance body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCharacteristics {
    pub sequential: bool,
    pub cardinality: u32,
}

/// 编译后的活动
#[derive(Debug, Clone)]
pub struct ActivityDefinition {
    pub id: String,
    pub name: Option<String>,
    pub kind: ActivityKind,
    pub flow_scope: ScopeId,
    pub event_scope: Option<ScopeId>,
    pub is_scope: bool,
    pub start_behavior: ActivityStartBehavior,
    /// Start event of a sub-process, or the inner activity of a multi-instance body.
    pub initial_activity: Option<ActivityIndex>,
    /// Set on multi-instance bodies only.
    pub multi_instance: Option<LoopCharacteristics>,
    pub preserve_scope: bool,
    pub async_before: bool,
    pub compensation: bool,
    pub inputs: HashMap<String, Value>,
    pub incoming: Vec<TransitionIndex>,
    pub outgoing: Vec<TransitionIndex>,
}

#[derive(Debug, Clone)]
pub struct TransitionDefinition {
    pub id: String,
    pub source: ActivityIndex,
    pub destination: ActivityIndex,
}

/// 编译后的流程定义
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    /// `<key>:<version>`
    pub id: String,
    pub key: String,
    pub name: Option<String>,
    pub version: u32,
    pub activities: Vec<ActivityDefinition>,
    pub transitions: Vec<TransitionDefinition>,
    pub initial_activity: Option<ActivityIndex>,
    pub(crate) activity_index: HashMap<String, ActivityIndex>,
    pub(crate) transition_index: HashMap<String, TransitionIndex>,
}

impl ProcessDefinition {
    pub fn find_activity(&self, activity_id: &str) -> Option<ActivityIndex> {
        self.activity_index.get(activity_id).copied()
    }

    pub fn find_transition(&self, transition_id: &str) -> Option<TransitionIndex> {
        self.transition_index.get(transition_id).copied()
    }

    pub fn activity(&self, index: ActivityIndex) -> &ActivityDefinition {
        &self.activities[index]
    }

    pub fn transition(&self, index: TransitionIndex) -> &TransitionDefinition {
        &self.transitions[index]
    }

    /// Parent scope of a scope; `None` for the process definition.
    pub fn flow_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        match scope {
            ScopeId::Process => None,
            ScopeId::Activity(index) => Some(self.activities[index].flow_scope),
        }
    }

    /// Activity of an activity instance id of the form `<activity id>:<suffix>`.
    pub fn activity_of_instance(&self, activity_instance_id: &str) -> Option<ActivityIndex> {
        let (activity_id, _) = activity_instance_id.rsplit_once(':')?;
        self.find_activity(activity_id)
    }

    /// Loop settings when the scope is a multi-instance body.
    pub fn loop_characteristics(&self, scope: ScopeId) -> Option<LoopCharacteristics> {
        scope.activity().and_then(|index| self.activities[index].multi_instance)
    }

    /// Id used for a scope in activity instances: the definition id for the process.
    pub fn scope_element_id(&self, scope: ScopeId) -> &str {
        match scope {
            ScopeId::Process => &self.id,
            ScopeId::Activity(index) => &self.activities[index].id,
        }
    }

    pub fn scope_name(&self, scope: ScopeId) -> Option<&str> {
        match scope {
            ScopeId::Process => self.name.as_deref(),
            ScopeId::Activity(index) => self.activities[index].name.as_deref(),
        }
    }

    pub fn scope_type_name(&self, scope: ScopeId) -> &'static str {
        match scope {
            ScopeId::Process => "processDefinition",
            ScopeId::Activity(index) => self.activities[index].kind.type_name(),
        }
    }

    /// Resolves the activity id of an activity instance back to its scope.
    pub fn scope_for_activity_instance(&self, activity_id: &str) -> Option<ScopeId> {
        if activity_id == self.id {
            Some(ScopeId::Process)
        } else {
            self.find_activity(activity_id).map(ScopeId::Activity)
        }
    }

    /// The scope itself followed by all its flow scopes, up to the process.
    pub fn scope_chain(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = vec![scope];
        let mut current = scope;
        while let Some(parent) = self.flow_scope(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }
}
