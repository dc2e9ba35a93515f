use serde::{Deserialize, Serialize};
use crate::commands::cancellation::{
    ActivityCancellation, ActivityInstanceCancellation, TransitionInstanceCancellation,
};
use crate::commands::instantiation::{InstantiationCommand, InstantiationTarget};
use crate::runtime::execution::Variables;

/// One step of a process instance modification, as written in instruction files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModificationInstruction {
    StartBeforeActivity {
        activity_id: String,
        #[serde(default)]
        ancestor_activity_instance_id: Option<String>,
        #[serde(default)]
        variables: Variables,
        #[serde(default)]
        variables_local: Variables,
    },
    StartAfterActivity {
        activity_id: String,
        #[serde(default)]
        ancestor_activity_instance_id: Option<String>,
        #[serde(default)]
        variables: Variables,
        #[serde(default)]
        variables_local: Variables,
    },
    StartTransition {
        transition_id: String,
        #[serde(default)]
        ancestor_activity_instance_id: Option<String>,
        #[serde(default)]
        variables: Variables,
        #[serde(default)]
        variables_local: Variables,
    },
    CancelActivityInstance {
        activity_instance_id: String,
    },
    CancelTransitionInstance {
        transition_instance_id: String,
    },
    CancelAllForActivity {
        activity_id: String,
        #[serde(default)]
        cancel_current_active_activity_instances: bool,
    },
}

/// Instruction resolved to the command that carries it out.
#[derive(Debug, Clone, PartialEq)]
pub enum ModificationCommand {
    Instantiation(InstantiationCommand),
    ActivityInstanceCancellation(ActivityInstanceCancellation),
    TransitionInstanceCancellation(TransitionInstanceCancellation),
    ActivityCancellation(ActivityCancellation),
}

impl ModificationInstruction {
    pub fn start_before_activity(activity_id: &str) -> Self {
        ModificationInstruction::StartBeforeActivity {
            activity_id: activity_id.to_string(),
            ancestor_activity_instance_id: None,
            variables: Variables::new(),
            variables_local: Variables::new(),
        }
    }

    pub fn start_after_activity(activity_id: &str) -> Self {
        ModificationInstruction::StartAfterActivity {
            activity_id: activity_id.to_string(),
            ancestor_activity_instance_id: None,
            variables: Variables::new(),
            variables_local: Variables::new(),
        }
    }

    pub fn start_transition(transition_id: &str) -> Self {
        ModificationInstruction::StartTransition {
            transition_id: transition_id.to_string(),
            ancestor_activity_instance_id: None,
            variables: Variables::new(),
            variables_local: Variables::new(),
        }
    }

    pub fn cancel_activity_instance(activity_instance_id: &str) -> Self {
        ModificationInstruction::CancelActivityInstance {
            activity_instance_id: activity_instance_id.to_string(),
        }
    }

    pub fn cancel_transition_instance(transition_instance_id: &str) -> Self {
        ModificationInstruction::CancelTransitionInstance {
            transition_instance_id: transition_instance_id.to_string(),
        }
    }

    pub fn cancel_all_for_activity(activity_id: &str) -> Self {
        ModificationInstruction::CancelAllForActivity {
            activity_id: activity_id.to_string(),
            cancel_current_active_activity_instances: false,
        }
    }

    pub fn is_instantiation(&self) -> bool {
        matches!(
            self,
            ModificationInstruction::StartBeforeActivity { .. }
                | ModificationInstruction::StartAfterActivity { .. }
                | ModificationInstruction::StartTransition { .. }
        )
    }

    /// Ancestor, global and local variables of an instantiation, for in-place edits.
    pub(crate) fn instantiation_parts_mut(
        &mut self,
    ) -> Option<(&mut Option<String>, &mut Variables, &mut Variables)> {
        match self {
            ModificationInstruction::StartBeforeActivity {
                ancestor_activity_instance_id,
                variables,
                variables_local,
                ..
            }
            | ModificationInstruction::StartAfterActivity {
                ancestor_activity_instance_id,
                variables,
                variables_local,
                ..
            }
            | ModificationInstruction::StartTransition {
                ancestor_activity_instance_id,
                variables,
                variables_local,
                ..
            } => Some((ancestor_activity_instance_id, variables, variables_local)),
            _ => None,
        }
    }

    pub fn to_command(&self) -> ModificationCommand {
        let instantiation = |target: InstantiationTarget,
                             ancestor: &Option<String>,
                             variables: &Variables,
                             variables_local: &Variables| {
            let mut command = InstantiationCommand::new(target);
            command.ancestor_activity_instance_id = ancestor.clone();
            command.variables = variables.clone();
            command.variables_local = variables_local.clone();
            ModificationCommand::Instantiation(command)
        };

        match self {
            ModificationInstruction::StartBeforeActivity {
                activity_id,
                ancestor_activity_instance_id,
                variables,
                variables_local,
            } => instantiation(
                InstantiationTarget::BeforeActivity(activity_id.clone()),
                ancestor_activity_instance_id,
                variables,
                variables_local,
            ),
            ModificationInstruction::StartAfterActivity {
                activity_id,
                ancestor_activity_instance_id,
                variables,
                variables_local,
            } => instantiation(
                InstantiationTarget::AfterActivity(activity_id.clone()),
                ancestor_activity_instance_id,
                variables,
                variables_local,
            ),
            ModificationInstruction::StartTransition {
                transition_id,
                ancestor_activity_instance_id,
                variables,
                variables_local,
            } => instantiation(
                InstantiationTarget::Transition(transition_id.clone()),
                ancestor_activity_instance_id,
                variables,
                variables_local,
            ),
            ModificationInstruction::CancelActivityInstance { activity_instance_id } => {
                ModificationCommand::ActivityInstanceCancellation(ActivityInstanceCancellation::new(
                    activity_instance_id,
                ))
            }
            ModificationInstruction::CancelTransitionInstance { transition_instance_id } => {
                ModificationCommand::TransitionInstanceCancellation(TransitionInstanceCancellation::new(
                    transition_instance_id,
                ))
            }
            ModificationInstruction::CancelAllForActivity {
                activity_id,
                cancel_current_active_activity_instances,
            } => ModificationCommand::ActivityCancellation(ActivityCancellation {
                activity_id: activity_id.clone(),
                cancel_current_active_activity_instances: *cancel_current_active_activity_instances,
            }),
        }
    }
}
