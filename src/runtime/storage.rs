use async_trait::async_trait;
use dashmap::DashMap;
use crate::error::{EngineError, Result};
use crate::runtime::execution::{ExecutionId, ExecutionTree};

/// A process instance tree together with the revision it was loaded at.
#[derive(Debug, Clone)]
pub struct StoredInstance {
    pub tree: ExecutionTree,
    pub revision: u64,
}

// --- Interfaces ---

#[async_trait]
pub trait RuntimeStore: Send + Sync {
    async fn load(&self, process_instance_id: &ExecutionId) -> Result<StoredInstance>;

    /// Finds the process instance containing the execution.
    async fn load_by_execution(&self, execution_id: &ExecutionId) -> Result<StoredInstance>;

    async fn insert(&self, tree: ExecutionTree) -> Result<u64>;

    /// Replaces the stored tree if it is still at `expected_revision` and returns the new revision.
    async fn commit(&self, tree: ExecutionTree, expected_revision: u64) -> Result<u64>;

    async fn remove(&self, process_instance_id: &ExecutionId) -> Result<()>;

    /// Ids of stored process instances, optionally only those of one definition.
    async fn process_instance_ids(&self, process_definition_id: Option<&str>) -> Result<Vec<ExecutionId>>;
}

// --- In-Memory Implementation ---

pub struct InMemoryRuntimeStore {
    // Map<ProcessInstanceID, (Tree, Revision)>
    instances: DashMap<ExecutionId, StoredInstance>,
}

impl InMemoryRuntimeStore {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }
}

impl Default for InMemoryRuntimeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeStore for InMemoryRuntimeStore {
    async fn load(&self, process_instance_id: &ExecutionId) -> Result<StoredInstance> {
        self.instances
            .get(process_instance_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::ProcessInstanceNotFound(process_instance_id.clone()))
    }

    async fn load_by_execution(&self, execution_id: &ExecutionId) -> Result<StoredInstance> {
        self.instances
            .iter()
            .find(|entry| entry.value().tree.execution(execution_id).is_ok())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.clone()))
    }

    async fn insert(&self, mut tree: ExecutionTree) -> Result<u64> {
        tree.purge_ended();
        let id = tree.process_instance_id().clone();
        self.instances.insert(id, StoredInstance { tree, revision: 1 });
        Ok(1)
    }

    async fn commit(&self, mut tree: ExecutionTree, expected_revision: u64) -> Result<u64> {
        let id = tree.process_instance_id().clone();
        // the entry lock is held from the revision check to the write
        let mut entry = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| EngineError::ProcessInstanceNotFound(id.clone()))?;
        if entry.revision != expected_revision {
            return Err(EngineError::OptimisticLockingFailure {
                process_instance_id: id,
                expected: expected_revision,
                actual: entry.revision,
            });
        }
        tree.purge_ended();
        entry.tree = tree;
        entry.revision += 1;
        Ok(entry.revision)
    }

    async fn remove(&self, process_instance_id: &ExecutionId) -> Result<()> {
        self.instances
            .remove(process_instance_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::ProcessInstanceNotFound(process_instance_id.clone()))
    }

    async fn process_instance_ids(&self, process_definition_id: Option<&str>) -> Result<Vec<ExecutionId>> {
        let mut ids: Vec<ExecutionId> = self
            .instances
            .iter()
            .filter(|entry| match process_definition_id {
                Some(definition_id) => entry.value().tree.process_definition_id() == definition_id,
                None => true,
            })
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
