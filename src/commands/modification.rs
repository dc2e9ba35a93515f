use tracing::{debug, info, warn};
use crate::commands::instruction::{ModificationCommand, ModificationInstruction};
use crate::error::{EngineError, Result};
use crate::runtime::activity_instance::ActivityInstance;
use crate::runtime::context::{CommandContext, SkipFlags};
use crate::runtime::operations::delete_cascade;

/// Result of applying an instruction list to one process instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationOutcome {
    pub instructions_applied: usize,
    /// The process instance was left without work and got deleted.
    pub terminated: bool,
}

/// Applies `instructions` in order to the process instance of `ctx`.
///
/// Every instruction sees the tree left behind by the previous one. A process
/// instance left without children and activity is deleted at the end.
pub fn modify_process_instance(
    ctx: &mut CommandContext,
    instructions: &[ModificationInstruction],
    flags: SkipFlags,
) -> Result<ModificationOutcome> {
    ctx.check_update_process_instance()?;
    if ctx.tree.is_ended() {
        return Err(EngineError::ProcessInstanceEnded(ctx.tree.process_instance_id().clone()));
    }

    let instructions_applied = apply_instructions(ctx, instructions, flags)?;

    // 自动终止
    let mut terminated = false;
    if !ctx.tree.is_ended() {
        let root = ctx.tree.root()?;
        if root.children.is_empty() && root.activity_id.is_none() {
            let root_id = root.id.clone();
            warn!(process_instance_id = %root_id, "Process instance has no work left, deleting it");
            delete_cascade(ctx, &root_id, "Cancellation due to process instance modification", flags)?;
            terminated = true;
        }
    }

    info!(
        process_instance_id = %ctx.tree.process_instance_id(),
        instructions = instructions_applied,
        terminated,
        "Modified process instance"
    );
    Ok(ModificationOutcome {
        instructions_applied,
        terminated,
    })
}

/// Starts a fresh, unstarted process instance at the activities named by `instructions`.
pub fn instantiate_process_instance(
    ctx: &mut CommandContext,
    instructions: &[ModificationInstruction],
    flags: SkipFlags,
) -> Result<usize> {
    if instructions.is_empty() {
        return Err(EngineError::InvalidInstruction(
            "at least one instruction is required to start a process instance at activities".to_string(),
        ));
    }
    if let Some(instruction) = instructions.iter().find(|i| !i.is_instantiation()) {
        return Err(EngineError::InvalidInstruction(format!(
            "only instantiation instructions are allowed when starting a process instance, got {:?}",
            instruction
        )));
    }
    let applied = apply_instructions(ctx, instructions, flags)?;
    info!(
        process_instance_id = %ctx.tree.process_instance_id(),
        instructions = applied,
        "Started process instance at activities"
    );
    Ok(applied)
}

fn apply_instructions(
    ctx: &mut CommandContext,
    instructions: &[ModificationInstruction],
    flags: SkipFlags,
) -> Result<usize> {
    // built on first use by a CancelAllForActivity that cancels current instances
    let mut current_activity_instances: Option<Option<ActivityInstance>> = None;
    let mut applied = 0;

    for (index, instruction) in instructions.iter().enumerate() {
        if ctx.tree.is_ended() {
            debug!(index, "Process instance ended, skipping remaining instructions");
            break;
        }
        debug!(index, instruction = ?instruction, "Applying instruction");

        match instruction.to_command() {
            ModificationCommand::Instantiation(command) => {
                command.execute(ctx, flags)?;
            }
            ModificationCommand::ActivityInstanceCancellation(command) => command.execute(ctx, flags)?,
            ModificationCommand::TransitionInstanceCancellation(command) => command.execute(ctx, flags)?,
            ModificationCommand::ActivityCancellation(command) => {
                let tree = if command.cancel_current_active_activity_instances {
                    if current_activity_instances.is_none() {
                        current_activity_instances =
                            Some(ctx.run_without_authorization(|ctx| ctx.activity_instance_tree())?);
                    }
                    current_activity_instances.clone().flatten()
                } else {
                    ctx.run_without_authorization(|ctx| ctx.activity_instance_tree())?
                };
                if let Some(tree) = tree {
                    for cancellation in command.create_cancellations(ctx.definition, &tree)? {
                        if ctx.tree.is_ended() {
                            break;
                        }
                        cancellation.execute(ctx, flags)?;
                    }
                }
            }
        }

        if ctx.config.check_invariants && !ctx.tree.is_ended() {
            ctx.tree.validate()?;
        }
        applied += 1;
    }
    Ok(applied)
}
