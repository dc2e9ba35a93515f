use crate::dsl::{Process, Activity, ActivityType, MultiInstance, SequenceFlow};
use serde_json::Value;

/// Collects the activities and flows of one scope. Used directly for
/// sub-process bodies and wrapped by [`ProcessBuilder`] for the process itself.
pub struct ScopeBuilder {
    activities: Vec<Activity>,
    flows: Vec<SequenceFlow>,
}

impl ScopeBuilder {
    fn new() -> Self {
        Self {
            activities: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn start_event(self, id: &str) -> Self {
        self.activity(Activity::new(id, ActivityType::StartEvent))
    }

    pub fn end_event(self, id: &str) -> Self {
        self.activity(Activity::new(id, ActivityType::EndEvent))
    }

    pub fn task(self, id: &str) -> Self {
        self.activity(Activity::new(id, ActivityType::Task))
    }

    pub fn gateway(self, id: &str) -> Self {
        self.activity(Activity::new(id, ActivityType::Gateway))
    }

    pub fn intermediate_event(self, id: &str) -> Self {
        self.activity(Activity::new(id, ActivityType::IntermediateEvent))
    }

    pub fn boundary_event(self, id: &str, attached_to: &str, cancel_activity: bool) -> Self {
        self.activity(Activity::new(
            id,
            ActivityType::BoundaryEvent {
                attached_to: attached_to.to_string(),
                cancel_activity,
                compensation: false,
            },
        ))
    }

    pub fn compensation_boundary_event(self, id: &str, attached_to: &str) -> Self {
        self.activity(Activity::new(
            id,
            ActivityType::BoundaryEvent {
                attached_to: attached_to.to_string(),
                cancel_activity: false,
                compensation: true,
            },
        ))
    }

    pub fn sub_process<F>(mut self, id: &str, body: F) -> Self
    where
        F: FnOnce(ScopeBuilder) -> ScopeBuilder,
    {
        let inner = body(ScopeBuilder::new());
        self.flows.extend(inner.flows);
        self.activity(Activity::new(id, ActivityType::SubProcess { activities: inner.activities }))
    }

    pub fn event_sub_process<F>(mut self, id: &str, interrupting: bool, body: F) -> Self
    where
        F: FnOnce(ScopeBuilder) -> ScopeBuilder,
    {
        let inner = body(ScopeBuilder::new());
        self.flows.extend(inner.flows);
        self.activity(Activity::new(
            id,
            ActivityType::EventSubProcess {
                interrupting,
                activities: inner.activities,
            },
        ))
    }

    // --- Modifiers for the most recently added activity ---

    pub fn named(mut self, name: &str) -> Self {
        if let Some(last) = self.activities.last_mut() {
            last.name = Some(name.to_string());
        }
        self
    }

    pub fn async_before(mut self) -> Self {
        if let Some(last) = self.activities.last_mut() {
            last.async_before = true;
        }
        self
    }

    pub fn scope(mut self) -> Self {
        if let Some(last) = self.activities.last_mut() {
            last.scope = true;
        }
        self
    }

    pub fn preserve_scope(mut self) -> Self {
        if let Some(last) = self.activities.last_mut() {
            last.preserve_scope = true;
        }
        self
    }

    /// Runs the activity `cardinality` times in parallel.
    pub fn multi_instance(self, cardinality: u32) -> Self {
        self.loop_characteristics(false, cardinality)
    }

    pub fn sequential_multi_instance(self, cardinality: u32) -> Self {
        self.loop_characteristics(true, cardinality)
    }

    fn loop_characteristics(mut self, sequential: bool, cardinality: u32) -> Self {
        if let Some(last) = self.activities.last_mut() {
            last.multi_instance = Some(MultiInstance { sequential, cardinality });
        }
        self
    }

    pub fn input(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(last) = self.activities.last_mut() {
            last.inputs.insert(key.to_string(), value.into());
        }
        self
    }

    /// Adds a sequence flow with the id `<source>_<target>`.
    pub fn connect(self, source: &str, target: &str) -> Self {
        let id = format!("{}_{}", source, target);
        self.connect_with_id(&id, source, target)
    }

    pub fn connect_with_id(mut self, id: &str, source: &str, target: &str) -> Self {
        self.flows.push(SequenceFlow {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        });
        self
    }
}

pub struct ProcessBuilder {
    id: String,
    name: Option<String>,
    version: u32,
    scope: ScopeBuilder,
}

impl ProcessBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            version: 1,
            scope: ScopeBuilder::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Adds activities and flows to the process scope.
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: FnOnce(ScopeBuilder) -> ScopeBuilder,
    {
        self.scope = body(self.scope);
        self
    }

    pub fn build(self) -> Process {
        Process {
            id: self.id,
            name: self.name,
            version: self.version,
            activities: self.scope.activities,
            flows: self.scope.flows,
        }
    }
}
