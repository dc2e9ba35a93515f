use std::collections::HashMap;
use std::sync::Arc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{error, info, warn};
use serde_json::Value;
use crate::commands::builder::{ModificationBatch, ModificationBuilder, ProcessInstanceModificationBuilder, ProcessInstantiationBuilder};
use crate::commands::instruction::ModificationInstruction;
use crate::commands::modification::{ModificationOutcome, instantiate_process_instance, modify_process_instance};
use crate::compiler::core::Compiler;
use crate::config::EngineConfig;
use crate::dsl::Process;
use crate::error::{EngineError, Result};
use crate::runtime::activity_instance::ActivityInstance;
use crate::runtime::context::{CommandContext, SkipFlags};
use crate::runtime::definition::ProcessDefinition;
use crate::runtime::execution::{ExecutionId, ExecutionTree, Variables};
use crate::runtime::operations::{delete_cascade, handle_child_removal_in_scope, start_activity};
use crate::runtime::services::{
    AllowAll, AuthorizationChecker, ExecutionListener, HistoryEventProducer, InMemoryOperationLog,
    OPERATION_TYPE_MODIFY_PROCESS_INSTANCE, OperationLogEntry, OperationLogWriter, PropertyChange,
    TracingHistoryProducer,
};
use crate::runtime::storage::{InMemoryRuntimeStore, RuntimeStore};

/// Per-instance results of an asynchronous batch modification.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<(ExecutionId, ModificationOutcome)>,
    pub failed: Vec<(ExecutionId, EngineError)>,
}

/// Deployed definitions plus the runtime store, wrapping every command in
/// load, work on a copy, commit.
pub struct ProcessEngine {
    definitions: DashMap<String, Arc<ProcessDefinition>>,
    // key -> id of the latest version
    latest_by_key: DashMap<String, String>,
    store: Arc<dyn RuntimeStore>,
    config: EngineConfig,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    authorization: Arc<dyn AuthorizationChecker>,
    history: Arc<dyn HistoryEventProducer>,
    operation_log: Arc<dyn OperationLogWriter>,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            definitions: DashMap::new(),
            latest_by_key: DashMap::new(),
            store: Arc::new(InMemoryRuntimeStore::new()),
            config,
            listeners: Vec::new(),
            authorization: Arc::new(AllowAll),
            history: Arc::new(TracingHistoryProducer),
            operation_log: Arc::new(InMemoryOperationLog::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RuntimeStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_authorization(mut self, authorization: Arc<dyn AuthorizationChecker>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryEventProducer>) -> Self {
        self.history = history;
        self
    }

    pub fn with_operation_log(mut self, operation_log: Arc<dyn OperationLogWriter>) -> Self {
        self.operation_log = operation_log;
        self
    }

    pub fn register_listener(&mut self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compiles and registers a process model, returning the definition id.
    pub fn deploy(&self, process: Process) -> anyhow::Result<String> {
        let mut compiler = Compiler::new();
        let definition = compiler.compile(process)?;
        Ok(self.deploy_definition(definition))
    }

    pub fn deploy_definition(&self, definition: ProcessDefinition) -> String {
        let id = definition.id.clone();
        let is_latest = self
            .latest_by_key
            .get(&definition.key)
            .and_then(|latest| self.definitions.get(latest.value()).map(|d| d.version))
            .map(|version| version <= definition.version)
            .unwrap_or(true);
        if is_latest {
            self.latest_by_key.insert(definition.key.clone(), id.clone());
        }
        info!(process_definition_id = %id, activities = definition.activities.len(), "Deployed process definition");
        self.definitions.insert(id.clone(), Arc::new(definition));
        id
    }

    /// Looks up a definition by id, or by key for its latest version.
    pub fn process_definition(&self, id_or_key: &str) -> Result<Arc<ProcessDefinition>> {
        if let Some(definition) = self.definitions.get(id_or_key) {
            return Ok(definition.value().clone());
        }
        let latest = self
            .latest_by_key
            .get(id_or_key)
            .map(|id| id.value().clone())
            .ok_or_else(|| EngineError::ProcessDefinitionNotFound(id_or_key.to_string()))?;
        self.definitions
            .get(&latest)
            .map(|definition| definition.value().clone())
            .ok_or_else(|| EngineError::ProcessDefinitionNotFound(id_or_key.to_string()))
    }

    fn run_in_context<T>(
        &self,
        definition: &ProcessDefinition,
        tree: ExecutionTree,
        command: impl FnOnce(&mut CommandContext) -> Result<T>,
    ) -> Result<(T, ExecutionTree, Vec<ExecutionId>)> {
        let mut ctx = CommandContext::new(
            definition,
            tree,
            &self.config,
            &self.listeners,
            self.authorization.as_ref(),
        );
        let value = command(&mut ctx)?;
        let (tree, deleted_sub_process_instances) = ctx.into_tree();
        Ok((value, tree, deleted_sub_process_instances))
    }

    fn started_tree(&self, definition: &ProcessDefinition, tree: ExecutionTree, variables: &Variables) -> Result<ExecutionTree> {
        let process_instance_id = tree.process_instance_id().clone();
        let ((), tree, _) = self.run_in_context(definition, tree, |ctx| {
            let initial = definition
                .initial_activity
                .ok_or_else(|| EngineError::MissingInitialActivity(definition.id.clone()))?;
            for (name, value) in variables {
                ctx.tree.set_variable_local(&process_instance_id, name, value.clone())?;
            }
            start_activity(ctx, &process_instance_id, initial, SkipFlags::default())?;
            Ok(())
        })?;
        Ok(tree)
    }

    /// Starts a process instance at the initial activity of the definition.
    pub async fn start_process_instance(&self, definition_id: &str, variables: Variables) -> Result<ExecutionId> {
        let definition = self.process_definition(definition_id)?;
        let tree = self.started_tree(&definition, ExecutionTree::new(&definition.id), &variables)?;
        let process_instance_id = tree.process_instance_id().clone();
        self.store.insert(tree).await?;

        info!(process_instance_id = %process_instance_id, process_definition_id = %definition.id, "Started process instance");
        Ok(process_instance_id)
    }

    /// Starts a process instance called from `super_execution` of another instance.
    pub async fn start_sub_process_instance(
        &self,
        super_execution: &ExecutionId,
        definition_id: &str,
        variables: Variables,
    ) -> Result<ExecutionId> {
        let definition = self.process_definition(definition_id)?;
        let caller = self.store.load_by_execution(super_execution).await?;

        let tree = ExecutionTree::new_sub_process_instance(&definition.id, super_execution.clone());
        let tree = self.started_tree(&definition, tree, &variables)?;
        let sub_process_instance_id = tree.process_instance_id().clone();

        let mut caller_tree = caller.tree;
        caller_tree.link_sub_process_instance(super_execution, sub_process_instance_id.clone())?;
        self.store.commit(caller_tree, caller.revision).await?;
        self.store.insert(tree).await?;

        info!(
            process_instance_id = %sub_process_instance_id,
            super_execution = %super_execution,
            "Started sub process instance"
        );
        Ok(sub_process_instance_id)
    }

    /// Stores an execution tree built elsewhere, e.g. read from a snapshot.
    pub async fn import_process_instance(&self, tree: ExecutionTree) -> Result<ExecutionId> {
        self.process_definition(tree.process_definition_id())?;
        tree.validate()?;
        let process_instance_id = tree.process_instance_id().clone();
        self.store.insert(tree).await?;
        Ok(process_instance_id)
    }

    pub async fn execution_tree(&self, process_instance_id: &ExecutionId) -> Result<ExecutionTree> {
        Ok(self.store.load(process_instance_id).await?.tree)
    }

    pub async fn process_instance_ids(&self, definition_id: Option<&str>) -> Result<Vec<ExecutionId>> {
        self.store.process_instance_ids(definition_id).await
    }

    /// The activity-instance tree of a running process instance.
    pub async fn get_activity_instance(&self, process_instance_id: &ExecutionId) -> Result<Option<ActivityInstance>> {
        let stored = self.store.load(process_instance_id).await?;
        let definition = self.process_definition(stored.tree.process_definition_id())?;
        let (tree, _, _) = self.run_in_context(&definition, stored.tree, |ctx| ctx.activity_instance_tree())?;
        Ok(tree)
    }

    pub fn create_process_instance_modification(&self, process_instance_id: &ExecutionId) -> ProcessInstanceModificationBuilder<'_> {
        ProcessInstanceModificationBuilder::new(self, process_instance_id.clone())
    }

    pub fn create_process_instance(&self, definition_id: &str) -> ProcessInstantiationBuilder<'_> {
        ProcessInstantiationBuilder::new(self, definition_id)
    }

    pub fn create_modification(&self, definition_id: &str) -> ModificationBuilder<'_> {
        ModificationBuilder::new(self, definition_id)
    }

    /// Applies the instructions to one process instance and writes the operation log.
    pub async fn modify_process_instance(
        &self,
        process_instance_id: &ExecutionId,
        instructions: &[ModificationInstruction],
        flags: SkipFlags,
        annotation: Option<String>,
    ) -> Result<ModificationOutcome> {
        let (outcome, definition_id) = self.modify_one(process_instance_id, None, instructions, flags).await?;
        self.write_operation_log(Some(process_instance_id.clone()), Some(definition_id), 1, false, annotation);
        Ok(outcome)
    }

    /// Applies the instructions to every listed process instance in turn, stopping at the first failure.
    pub async fn modify_process_instances(&self, batch: &ModificationBatch) -> Result<Vec<ModificationOutcome>> {
        let definition = self.process_definition(&batch.process_definition_id)?;
        if batch.process_instance_ids.is_empty() {
            return Err(EngineError::InvalidInstruction("no process instances to modify".to_string()));
        }
        for process_instance_id in &batch.process_instance_ids {
            let stored = self.store.load(process_instance_id).await?;
            check_definition(process_instance_id, &definition.id, &stored.tree)?;
        }

        let mut outcomes = Vec::with_capacity(batch.process_instance_ids.len());
        for process_instance_id in &batch.process_instance_ids {
            let (outcome, _) = self
                .modify_one(process_instance_id, Some(&definition.id), &batch.instructions, batch.flags)
                .await?;
            outcomes.push(outcome);
        }
        self.write_operation_log(
            None,
            Some(definition.id.clone()),
            batch.process_instance_ids.len(),
            false,
            batch.annotation.clone(),
        );
        Ok(outcomes)
    }

    /// Modifies the listed process instances in parallel, each in its own unit of work.
    pub async fn modify_batch(self: &Arc<Self>, batch: ModificationBatch) -> Result<BatchReport> {
        let definition = self.process_definition(&batch.process_definition_id)?;
        let semaphore = Arc::new(Semaphore::new(self.config.batch_parallelism.max(1)));
        let instructions = Arc::new(batch.instructions);
        let mut join_set = JoinSet::new();
        // 任务 id -> 流程实例，worker 异常退出时仍能归档
        let mut workers: HashMap<task::Id, ExecutionId> = HashMap::new();

        for process_instance_id in batch.process_instance_ids.iter().cloned() {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let instructions = Arc::clone(&instructions);
            let definition_id = definition.id.clone();
            let flags = batch.flags;

            let worker_instance_id = process_instance_id.clone();
            let handle = join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = engine
                    .modify_one(&process_instance_id, Some(&definition_id), &instructions, flags)
                    .await
                    .map(|(outcome, _)| outcome);
                (process_instance_id, result)
            });
            workers.insert(handle.id(), worker_instance_id);
        }

        let mut report = BatchReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((process_instance_id, Ok(outcome))) => report.succeeded.push((process_instance_id, outcome)),
                Ok((process_instance_id, Err(err))) => {
                    error!(process_instance_id = %process_instance_id, error = %err, "Batch modification failed for process instance");
                    report.failed.push((process_instance_id, err));
                }
                Err(join_error) => match workers.remove(&join_error.id()) {
                    Some(process_instance_id) => {
                        error!(process_instance_id = %process_instance_id, error = %join_error, "Batch modification worker did not finish");
                        report.failed.push((
                            process_instance_id.clone(),
                            EngineError::BatchWorkerFailed {
                                process_instance_id,
                                reason: join_error.to_string(),
                            },
                        ));
                    }
                    None => error!(error = %join_error, "Unknown batch modification worker did not finish"),
                },
            }
        }
        report.succeeded.sort_by(|a, b| a.0.cmp(&b.0));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            process_definition_id = %definition.id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch modification finished"
        );
        self.write_operation_log(
            None,
            Some(definition.id.clone()),
            batch.process_instance_ids.len(),
            true,
            batch.annotation,
        );
        Ok(report)
    }

    /// Creates a process instance and starts it at the activities named by the instructions.
    pub async fn instantiate_process_instance(
        &self,
        definition_id: &str,
        instructions: &[ModificationInstruction],
        variables: &Variables,
        flags: SkipFlags,
    ) -> Result<ExecutionId> {
        let definition = self.process_definition(definition_id)?;
        let tree = ExecutionTree::new(&definition.id);
        let process_instance_id = tree.process_instance_id().clone();

        let (_, tree, _) = self.run_in_context(&definition, tree, |ctx| {
            for (name, value) in variables {
                ctx.tree.set_variable_local(&process_instance_id, name, value.clone())?;
            }
            instantiate_process_instance(ctx, instructions, flags)
        })?;
        self.store.insert(tree).await?;
        Ok(process_instance_id)
    }

    async fn modify_one(
        &self,
        process_instance_id: &ExecutionId,
        expected_definition: Option<&str>,
        instructions: &[ModificationInstruction],
        flags: SkipFlags,
    ) -> Result<(ModificationOutcome, String)> {
        // 1. Load
        let stored = self.store.load(process_instance_id).await?;
        if let Some(expected) = expected_definition {
            check_definition(process_instance_id, expected, &stored.tree)?;
        }
        let definition = self.process_definition(stored.tree.process_definition_id())?;
        let super_execution = stored.tree.root()?.super_execution.clone();

        // 2. Work on a copy
        let (outcome, tree, deleted_sub_process_instances) = self.run_in_context(&definition, stored.tree, |ctx| {
            modify_process_instance(ctx, instructions, flags)
        })?;

        // 3. Commit
        let ended = tree.is_ended();
        self.store.commit(tree, stored.revision).await?;
        if ended {
            self.store.remove(process_instance_id).await?;
        }
        if self.config.history_enabled {
            self.history.process_instance_updated(process_instance_id, &definition.id);
        }

        // 4. Related process instances
        self.delete_sub_process_instances(deleted_sub_process_instances, flags).await?;
        if outcome.terminated {
            if let Some(super_execution) = super_execution {
                self.propagate_termination(super_execution, flags).await?;
            }
        }
        Ok((outcome, definition.id.clone()))
    }

    async fn delete_sub_process_instances(&self, mut pending: Vec<ExecutionId>, flags: SkipFlags) -> Result<()> {
        while let Some(process_instance_id) = pending.pop() {
            let stored = match self.store.load(&process_instance_id).await {
                Ok(stored) => stored,
                Err(EngineError::ProcessInstanceNotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            let definition = self.process_definition(stored.tree.process_definition_id())?;
            let ((), tree, deleted) = self.run_in_context(&definition, stored.tree, |ctx| {
                let root = ctx.tree.process_instance_id().clone();
                delete_cascade(ctx, &root, "Deleted because the calling execution was deleted", flags)
            })?;
            self.store.commit(tree, stored.revision).await?;
            self.store.remove(&process_instance_id).await?;
            info!(process_instance_id = %process_instance_id, "Deleted sub process instance");
            pending.extend(deleted);
        }
        Ok(())
    }

    /// Removes the calling side of an auto-terminated sub process instance.
    async fn propagate_termination(&self, super_execution: ExecutionId, flags: SkipFlags) -> Result<()> {
        let mut next = Some(super_execution);
        while let Some(super_execution) = next.take() {
            let stored = self.store.load_by_execution(&super_execution).await?;
            let definition = self.process_definition(stored.tree.process_definition_id())?;

            let ((), tree, deleted) = self.run_in_context(&definition, stored.tree, |ctx| {
                ctx.tree.execution_mut(&super_execution)?.sub_process_instance = None;
                let mut topmost = super_execution.clone();
                while let Some(parent_scope) = ctx.tree.parent_scope_execution(&topmost) {
                    if ctx.tree.live_children(&parent_scope).len() > 1 {
                        break;
                    }
                    topmost = parent_scope;
                }
                delete_cascade(ctx, &topmost, "Sub process instance completed its modification without work", flags)?;
                if !ctx.tree.is_ended() {
                    handle_child_removal_in_scope(ctx, &topmost, flags)?;
                }
                Ok(())
            })?;

            let process_instance_id = tree.process_instance_id().clone();
            let ended = tree.is_ended();
            if ended {
                next = tree.root()?.super_execution.clone();
                warn!(process_instance_id = %process_instance_id, "Calling process instance has no work left, deleting it");
            }
            self.store.commit(tree, stored.revision).await?;
            if ended {
                self.store.remove(&process_instance_id).await?;
            }
            self.delete_sub_process_instances(deleted, flags).await?;
        }
        Ok(())
    }

    fn write_operation_log(
        &self,
        process_instance_id: Option<ExecutionId>,
        process_definition_id: Option<String>,
        instances: usize,
        is_async: bool,
        annotation: Option<String>,
    ) {
        self.operation_log.write(OperationLogEntry {
            operation_type: OPERATION_TYPE_MODIFY_PROCESS_INSTANCE.to_string(),
            process_instance_id,
            process_definition_id,
            property_changes: vec![
                PropertyChange::new("nrOfInstances", None, Some(Value::from(instances))),
                PropertyChange::new("async", None, Some(Value::from(is_async))),
            ],
            annotation,
        });
    }
}

fn check_definition(process_instance_id: &ExecutionId, expected: &str, tree: &ExecutionTree) -> Result<()> {
    if tree.process_definition_id() != expected {
        return Err(EngineError::ProcessDefinitionMismatch {
            process_instance_id: process_instance_id.clone(),
            expected: expected.to_string(),
            actual: tree.process_definition_id().to_string(),
        });
    }
    Ok(())
}
