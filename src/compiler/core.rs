use crate::dsl::{Process, ActivityType};
use crate::runtime::definition::{
    ActivityDefinition, ActivityIndex, ActivityKind, ActivityStartBehavior, LoopCharacteristics, ProcessDefinition,
    ScopeId, TransitionDefinition,
};
use crate::compiler::expander::{ExpandedActivity, Expander};
use std::collections::HashMap;
use anyhow::{Result, anyhow};

pub struct Compiler {
    id_map: HashMap<String, ActivityIndex>,
    /// Multi-instance activity id -> its body, which takes its flows and boundary events
    bodies: HashMap<String, ActivityIndex>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            id_map: HashMap::new(),
            bodies: HashMap::new(),
        }
    }

    pub fn compile(&mut self, raw_process: Process) -> Result<ProcessDefinition> {
        self.id_map.clear();
        self.bodies.clear();

        // 0. Pass 0: Expand nested scopes
        let expander = Expander::new();
        let process = expander.expand(raw_process)?;

        // 1. Pass 1: Indexing
        for (idx, expanded) in process.activities.iter().enumerate() {
            if self.id_map.insert(expanded.activity.id.clone(), idx).is_some() {
                return Err(anyhow!("Duplicate activity ID: {}", expanded.activity.id));
            }
            if let Some(inner) = &expanded.body_of {
                self.bodies.insert(inner.clone(), idx);
            }
        }

        // 2. Pass 2: Transform
        let mut activities = Vec::with_capacity(process.activities.len());
        for expanded in &process.activities {
            activities.push(self.transform_activity(expanded)?);
        }

        // 3. Boundary events live next to the activity they are attached to
        for (idx, expanded) in process.activities.iter().enumerate() {
            if let ActivityType::BoundaryEvent { attached_to, .. } = &expanded.activity.kind {
                let attached = self.flow_node(attached_to).ok_or_else(|| {
                    anyhow!("Boundary event '{}' is attached to unknown activity '{}'", expanded.activity.id, attached_to)
                })?;
                if activities[attached].flow_scope != activities[idx].flow_scope {
                    return Err(anyhow!(
                        "Boundary event '{}' must be declared in the same scope as '{}'",
                        expanded.activity.id,
                        attached_to
                    ));
                }
                if matches!(activities[attached].kind, ActivityKind::BoundaryEvent) {
                    return Err(anyhow!("Boundary event '{}' cannot be attached to another boundary event", expanded.activity.id));
                }
                activities[attached].is_scope = true;
                activities[idx].event_scope = Some(ScopeId::Activity(attached));
            }
        }

        // 4. Sequence flows
        let mut transitions = Vec::with_capacity(process.flows.len());
        let mut transition_index = HashMap::new();
        for flow in &process.flows {
            let source = self.lookup(&flow.source, &flow.id)?;
            let destination = self.lookup(&flow.target, &flow.id)?;
            if activities[source].flow_scope != activities[destination].flow_scope {
                return Err(anyhow!(
                    "Sequence flow '{}' crosses a scope boundary ({} -> {})",
                    flow.id,
                    flow.source,
                    flow.target
                ));
            }
            let index = transitions.len();
            if transition_index.insert(flow.id.clone(), index).is_some() {
                return Err(anyhow!("Duplicate sequence flow ID: {}", flow.id));
            }
            activities[source].outgoing.push(index);
            activities[destination].incoming.push(index);
            transitions.push(TransitionDefinition {
                id: flow.id.clone(),
                source,
                destination,
            });
        }

        // 5. Initial activities
        let initial_activity = Self::first_start_event(&activities, ScopeId::Process);
        for idx in 0..activities.len() {
            match activities[idx].kind {
                ActivityKind::SubProcess => {
                    activities[idx].initial_activity = Self::first_start_event(&activities, ScopeId::Activity(idx));
                }
                ActivityKind::EventSubProcess => {
                    let start = Self::first_start_event(&activities, ScopeId::Activity(idx))
                        .ok_or_else(|| anyhow!("Event sub-process '{}' has no start event", activities[idx].id))?;
                    activities[idx].initial_activity = Some(start);
                }
                ActivityKind::MultiInstanceBody => {
                    activities[idx].initial_activity = activities.iter().position(|a| a.flow_scope == ScopeId::Activity(idx));
                }
                _ => {}
            }
        }

        Ok(ProcessDefinition {
            id: format!("{}:{}", process.id, process.version),
            key: process.id,
            name: process.name,
            version: process.version,
            activities,
            transitions,
            initial_activity,
            activity_index: self.id_map.clone(),
            transition_index,
        })
    }

    /// Element a flow or boundary event connects to: the body of a multi-instance activity.
    fn flow_node(&self, activity_id: &str) -> Option<ActivityIndex> {
        self.bodies.get(activity_id).or_else(|| self.id_map.get(activity_id)).copied()
    }

    fn lookup(&self, activity_id: &str, flow_id: &str) -> Result<ActivityIndex> {
        self.flow_node(activity_id)
            .ok_or_else(|| anyhow!("Sequence flow '{}' references unknown activity '{}'", flow_id, activity_id))
    }

    fn first_start_event(activities: &[ActivityDefinition], scope: ScopeId) -> Option<ActivityIndex> {
        activities
            .iter()
            .position(|a| a.flow_scope == scope && matches!(a.kind, ActivityKind::StartEvent))
    }

    fn transform_activity(&self, expanded: &ExpandedActivity) -> Result<ActivityDefinition> {
        let activity = &expanded.activity;
        let flow_scope = match &expanded.parent_scope {
            None => ScopeId::Process,
            Some(parent) => ScopeId::Activity(
                *self
                    .id_map
                    .get(parent)
                    .ok_or_else(|| anyhow!("Unknown parent scope '{}' of '{}'", parent, activity.id))?,
            ),
        };

        if expanded.body_of.is_some() {
            let multi_instance = activity
                .multi_instance
                .ok_or_else(|| anyhow!("Multi-instance body '{}' has no loop settings", activity.id))?;
            return Ok(ActivityDefinition {
                id: activity.id.clone(),
                name: activity.name.clone(),
                kind: ActivityKind::MultiInstanceBody,
                flow_scope,
                event_scope: None,
                is_scope: true,
                start_behavior: ActivityStartBehavior::Default,
                initial_activity: None,
                multi_instance: Some(LoopCharacteristics {
                    sequential: multi_instance.sequential,
                    cardinality: multi_instance.cardinality,
                }),
                preserve_scope: false,
                async_before: false,
                compensation: false,
                inputs: HashMap::new(),
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
        }

        let (kind, start_behavior, event_scope) = match &activity.kind {
            ActivityType::StartEvent => (ActivityKind::StartEvent, ActivityStartBehavior::Default, None),
            ActivityType::EndEvent => (ActivityKind::EndEvent, ActivityStartBehavior::Default, None),
            ActivityType::Task => (ActivityKind::Task, ActivityStartBehavior::Default, None),
            ActivityType::Gateway => (ActivityKind::Gateway, ActivityStartBehavior::Default, None),
            ActivityType::IntermediateEvent => (ActivityKind::IntermediateEvent, ActivityStartBehavior::Default, None),
            ActivityType::SubProcess { .. } => (ActivityKind::SubProcess, ActivityStartBehavior::Default, None),
            ActivityType::EventSubProcess { interrupting, .. } => {
                let behavior = if *interrupting {
                    ActivityStartBehavior::InterruptEventScope
                } else {
                    ActivityStartBehavior::ConcurrentInFlowScope
                };
                (ActivityKind::EventSubProcess, behavior, Some(flow_scope))
            }
            // event scope is resolved once every activity is indexed
            ActivityType::BoundaryEvent { cancel_activity, .. } => {
                let behavior = if *cancel_activity {
                    ActivityStartBehavior::CancelEventScope
                } else {
                    ActivityStartBehavior::ConcurrentInFlowScope
                };
                (ActivityKind::BoundaryEvent, behavior, None)
            }
        };

        let is_scope = matches!(kind, ActivityKind::SubProcess | ActivityKind::EventSubProcess)
            || activity.scope
            || activity.preserve_scope
            || !activity.inputs.is_empty();

        let compensation = matches!(activity.kind, ActivityType::BoundaryEvent { compensation: true, .. });

        Ok(ActivityDefinition {
            id: activity.id.clone(),
            name: activity.name.clone(),
            kind,
            flow_scope,
            event_scope,
            is_scope,
            start_behavior,
            initial_activity: None,
            multi_instance: None,
            preserve_scope: activity.preserve_scope,
            async_before: activity.async_before,
            compensation,
            inputs: activity.inputs.clone(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        })
    }
}
