use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::runtime::activity_instance::ActivityInstance;
use crate::runtime::definition::ProcessDefinition;
use crate::runtime::execution::{ExecutionId, ExecutionTree};
use crate::runtime::services::{ActivityEvent, ActivityEventKind, AuthorizationChecker, ExecutionListener};

/// Flags passed unchanged through every operation of one modification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipFlags {
    #[serde(default)]
    pub skip_custom_listeners: bool,
    #[serde(default)]
    pub skip_io_mappings: bool,
}

/// Unit of work for one process instance.
///
/// Commands mutate `tree`, a working copy. The engine commits it only when
/// the whole command succeeded.
pub struct CommandContext<'a> {
    pub definition: &'a ProcessDefinition,
    pub tree: ExecutionTree,
    pub config: &'a EngineConfig,
    listeners: &'a [Arc<dyn ExecutionListener>],
    authorization: &'a dyn AuthorizationChecker,
    authorization_suppressed: bool,
    deleted_sub_process_instances: Vec<ExecutionId>,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        definition: &'a ProcessDefinition,
        tree: ExecutionTree,
        config: &'a EngineConfig,
        listeners: &'a [Arc<dyn ExecutionListener>],
        authorization: &'a dyn AuthorizationChecker,
    ) -> Self {
        Self {
            definition,
            tree,
            config,
            listeners,
            authorization,
            authorization_suppressed: false,
            deleted_sub_process_instances: Vec::new(),
        }
    }

    /// Runs `f` with authorization checks switched off, restoring the previous state afterwards.
    pub fn run_without_authorization<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = self.authorization_suppressed;
        self.authorization_suppressed = true;
        let result = f(self);
        self.authorization_suppressed = previous;
        result
    }

    fn authorization_active(&self) -> bool {
        self.config.authorization_enabled && !self.authorization_suppressed
    }

    pub fn check_update_process_instance(&self) -> Result<()> {
        if !self.authorization_active() {
            return Ok(());
        }
        self.authorization
            .check_update_process_instance(self.tree.process_instance_id(), self.tree.process_definition_id())
    }

    pub fn check_read_process_instance(&self) -> Result<()> {
        if !self.authorization_active() {
            return Ok(());
        }
        self.authorization
            .check_read_process_instance(self.tree.process_instance_id(), self.tree.process_definition_id())
    }

    /// Builds the activity-instance tree of the working copy; `None` once the instance ended.
    pub fn activity_instance_tree(&self) -> Result<Option<ActivityInstance>> {
        self.check_read_process_instance()?;
        ActivityInstance::build(&self.tree, self.definition)
    }

    pub(crate) fn notify(
        &self,
        kind: ActivityEventKind,
        execution_id: &ExecutionId,
        activity_id: &str,
        activity_instance_id: Option<String>,
        canceled: bool,
        flags: SkipFlags,
    ) {
        if flags.skip_custom_listeners || self.listeners.is_empty() {
            return;
        }
        let event = ActivityEvent {
            kind,
            process_instance_id: self.tree.process_instance_id().clone(),
            execution_id: execution_id.clone(),
            activity_id: activity_id.to_string(),
            activity_instance_id,
            canceled,
        };
        for listener in self.listeners {
            listener.notify(&event);
        }
    }

    pub(crate) fn record_deleted_sub_process_instance(&mut self, process_instance_id: ExecutionId) {
        self.deleted_sub_process_instances.push(process_instance_id);
    }

    /// Sub-process instances whose calling execution was deleted by this command.
    pub fn deleted_sub_process_instances(&self) -> &[ExecutionId] {
        &self.deleted_sub_process_instances
    }

    pub fn into_tree(self) -> (ExecutionTree, Vec<ExecutionId>) {
        (self.tree, self.deleted_sub_process_instances)
    }
}
