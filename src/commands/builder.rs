//! Fluent builders collecting instructions for the engine.

use serde_json::Value;
use crate::commands::instruction::ModificationInstruction;
use crate::commands::modification::ModificationOutcome;
use crate::error::{EngineError, Result};
use crate::runtime::context::SkipFlags;
use crate::runtime::engine::ProcessEngine;
use crate::runtime::execution::{ExecutionId, Variables};

/// Instruction list shared by the builders.
///
/// Modifiers apply to the last instruction; a modifier that does not fit it
/// is remembered and reported when the builder executes.
#[derive(Debug, Default, Clone)]
struct InstructionList {
    instructions: Vec<ModificationInstruction>,
    invalid: Option<String>,
}

impl InstructionList {
    fn push(&mut self, instruction: ModificationInstruction) {
        self.instructions.push(instruction);
    }

    fn reject(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }

    fn ancestor(&mut self, ancestor_activity_instance_id: &str) {
        match self.instructions.last_mut().and_then(|i| i.instantiation_parts_mut()) {
            Some((ancestor, _, _)) => *ancestor = Some(ancestor_activity_instance_id.to_string()),
            None => self.reject("an ancestor can only be set on an instantiation instruction".to_string()),
        }
    }

    /// Returns false when there is no instantiation to attach the variable to.
    fn set_variable(&mut self, name: &str, value: Value, local: bool) -> bool {
        match self.instructions.last_mut().and_then(|i| i.instantiation_parts_mut()) {
            Some((_, variables, variables_local)) => {
                let target = if local { variables_local } else { variables };
                target.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    fn cancel_current_active_activity_instances(&mut self) {
        match self.instructions.last_mut() {
            Some(ModificationInstruction::CancelAllForActivity {
                cancel_current_active_activity_instances,
                ..
            }) => *cancel_current_active_activity_instances = true,
            _ => self.reject(
                "cancelling current active activity instances requires a preceding cancel-all instruction".to_string(),
            ),
        }
    }

    fn finish(self) -> Result<Vec<ModificationInstruction>> {
        match self.invalid {
            Some(message) => Err(EngineError::InvalidInstruction(message)),
            None => Ok(self.instructions),
        }
    }
}

/// Collects instructions for one running process instance.
pub struct ProcessInstanceModificationBuilder<'e> {
    engine: &'e ProcessEngine,
    process_instance_id: ExecutionId,
    instructions: InstructionList,
    flags: SkipFlags,
    annotation: Option<String>,
}

impl<'e> ProcessInstanceModificationBuilder<'e> {
    pub(crate) fn new(engine: &'e ProcessEngine, process_instance_id: ExecutionId) -> Self {
        Self {
            engine,
            process_instance_id,
            instructions: InstructionList::default(),
            flags: SkipFlags::default(),
            annotation: None,
        }
    }

    pub fn start_before_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_before_activity(activity_id));
        self
    }

    pub fn start_after_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_after_activity(activity_id));
        self
    }

    pub fn start_transition(mut self, transition_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_transition(transition_id));
        self
    }

    /// Places the last instantiation below the given activity instance.
    pub fn ancestor(mut self, ancestor_activity_instance_id: &str) -> Self {
        self.instructions.ancestor(ancestor_activity_instance_id);
        self
    }

    pub fn set_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        if !self.instructions.set_variable(name, value.into(), false) {
            self.instructions
                .reject(format!("variable '{}' needs a preceding instantiation instruction", name));
        }
        self
    }

    pub fn set_variable_local(mut self, name: &str, value: impl Into<Value>) -> Self {
        if !self.instructions.set_variable(name, value.into(), true) {
            self.instructions
                .reject(format!("local variable '{}' needs a preceding instantiation instruction", name));
        }
        self
    }

    pub fn cancel_activity_instance(mut self, activity_instance_id: &str) -> Self {
        self.instructions
            .push(ModificationInstruction::cancel_activity_instance(activity_instance_id));
        self
    }

    pub fn cancel_transition_instance(mut self, transition_instance_id: &str) -> Self {
        self.instructions
            .push(ModificationInstruction::cancel_transition_instance(transition_instance_id));
        self
    }

    pub fn cancel_all_for_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::cancel_all_for_activity(activity_id));
        self
    }

    /// Resolves the last cancel-all against the activity instances as they were when first needed.
    pub fn cancel_current_active_activity_instances(mut self) -> Self {
        self.instructions.cancel_current_active_activity_instances();
        self
    }

    pub fn skip_custom_listeners(mut self) -> Self {
        self.flags.skip_custom_listeners = true;
        self
    }

    pub fn skip_io_mappings(mut self) -> Self {
        self.flags.skip_io_mappings = true;
        self
    }

    pub fn annotation(mut self, annotation: &str) -> Self {
        self.annotation = Some(annotation.to_string());
        self
    }

    pub fn instructions(&self) -> &[ModificationInstruction] {
        &self.instructions.instructions
    }

    pub async fn execute(self) -> Result<ModificationOutcome> {
        let instructions = self.instructions.finish()?;
        self.engine
            .modify_process_instance(&self.process_instance_id, &instructions, self.flags, self.annotation)
            .await
    }
}

/// Creates a process instance that starts at arbitrary activities.
pub struct ProcessInstantiationBuilder<'e> {
    engine: &'e ProcessEngine,
    process_definition_id: String,
    instructions: InstructionList,
    variables: Variables,
    flags: SkipFlags,
}

impl<'e> ProcessInstantiationBuilder<'e> {
    pub(crate) fn new(engine: &'e ProcessEngine, process_definition_id: &str) -> Self {
        Self {
            engine,
            process_definition_id: process_definition_id.to_string(),
            instructions: InstructionList::default(),
            variables: Variables::new(),
            flags: SkipFlags::default(),
        }
    }

    pub fn start_before_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_before_activity(activity_id));
        self
    }

    pub fn start_after_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_after_activity(activity_id));
        self
    }

    pub fn start_transition(mut self, transition_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_transition(transition_id));
        self
    }

    /// Before any instruction the variable goes to the process instance, afterwards to the last instruction.
    pub fn set_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if self.instructions.instructions.is_empty() {
            self.variables.insert(name.to_string(), value);
        } else {
            self.instructions.set_variable(name, value, false);
        }
        self
    }

    pub fn set_variable_local(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if self.instructions.instructions.is_empty() {
            self.variables.insert(name.to_string(), value);
        } else {
            self.instructions.set_variable(name, value, true);
        }
        self
    }

    pub fn skip_custom_listeners(mut self) -> Self {
        self.flags.skip_custom_listeners = true;
        self
    }

    pub fn skip_io_mappings(mut self) -> Self {
        self.flags.skip_io_mappings = true;
        self
    }

    pub async fn execute(self) -> Result<ExecutionId> {
        let instructions = self.instructions.finish()?;
        self.engine
            .instantiate_process_instance(&self.process_definition_id, &instructions, &self.variables, self.flags)
            .await
    }
}

/// Instruction list applied to many process instances of one definition.
#[derive(Debug, Clone)]
pub struct ModificationBatch {
    pub process_definition_id: String,
    pub process_instance_ids: Vec<ExecutionId>,
    pub instructions: Vec<ModificationInstruction>,
    pub flags: SkipFlags,
    pub annotation: Option<String>,
}

pub struct ModificationBuilder<'e> {
    engine: &'e ProcessEngine,
    process_definition_id: String,
    process_instance_ids: Vec<ExecutionId>,
    instructions: InstructionList,
    flags: SkipFlags,
    annotation: Option<String>,
}

impl<'e> ModificationBuilder<'e> {
    pub(crate) fn new(engine: &'e ProcessEngine, process_definition_id: &str) -> Self {
        Self {
            engine,
            process_definition_id: process_definition_id.to_string(),
            process_instance_ids: Vec::new(),
            instructions: InstructionList::default(),
            flags: SkipFlags::default(),
            annotation: None,
        }
    }

    pub fn process_instance_ids(mut self, ids: &[ExecutionId]) -> Self {
        self.process_instance_ids.extend(ids.iter().cloned());
        self
    }

    pub fn start_before_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_before_activity(activity_id));
        self
    }

    pub fn start_after_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_after_activity(activity_id));
        self
    }

    pub fn start_transition(mut self, transition_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::start_transition(transition_id));
        self
    }

    pub fn cancel_all_for_activity(mut self, activity_id: &str) -> Self {
        self.instructions.push(ModificationInstruction::cancel_all_for_activity(activity_id));
        self
    }

    pub fn cancel_current_active_activity_instances(mut self) -> Self {
        self.instructions.cancel_current_active_activity_instances();
        self
    }

    pub fn skip_custom_listeners(mut self) -> Self {
        self.flags.skip_custom_listeners = true;
        self
    }

    pub fn skip_io_mappings(mut self) -> Self {
        self.flags.skip_io_mappings = true;
        self
    }

    pub fn annotation(mut self, annotation: &str) -> Self {
        self.annotation = Some(annotation.to_string());
        self
    }

    /// The batch to hand to [`ProcessEngine::modify_batch`].
    pub fn into_batch(self) -> Result<ModificationBatch> {
        if self.instructions.instructions.is_empty() && self.instructions.invalid.is_none() {
            return Err(EngineError::InvalidInstruction("modification needs at least one instruction".to_string()));
        }
        Ok(ModificationBatch {
            process_definition_id: self.process_definition_id,
            process_instance_ids: self.process_instance_ids,
            instructions: self.instructions.finish()?,
            flags: self.flags,
            annotation: self.annotation,
        })
    }

    /// Modifies the process instances one after another.
    pub async fn execute(self) -> Result<Vec<ModificationOutcome>> {
        let engine = self.engine;
        let batch = self.into_batch()?;
        engine.modify_process_instances(&batch).await
    }
}
