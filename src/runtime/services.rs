//! Collaborators the command layer talks to: listeners, authorization,
//! history and the user operation log.

use std::sync::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use crate::error::{EngineError, Result};
use crate::runtime::execution::ExecutionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityEventKind {
    Start,
    End,
}

/// Notification sent when an activity instance starts or ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEvent {
    pub kind: ActivityEventKind,
    pub process_instance_id: ExecutionId,
    pub execution_id: ExecutionId,
    pub activity_id: String,
    pub activity_instance_id: Option<String>,
    /// The instance ended because it was cancelled, not completed.
    pub canceled: bool,
}

/// Custom listener invoked on activity start and end, unless listeners are skipped.
pub trait ExecutionListener: Send + Sync {
    fn notify(&self, event: &ActivityEvent);
}

pub trait AuthorizationChecker: Send + Sync {
    fn check_update_process_instance(&self, process_instance_id: &ExecutionId, process_definition_id: &str) -> Result<()>;
    fn check_read_process_instance(&self, process_instance_id: &ExecutionId, process_definition_id: &str) -> Result<()>;
}

/// Grants every request.
pub struct AllowAll;

impl AuthorizationChecker for AllowAll {
    fn check_update_process_instance(&self, _: &ExecutionId, _: &str) -> Result<()> {
        Ok(())
    }

    fn check_read_process_instance(&self, _: &ExecutionId, _: &str) -> Result<()> {
        Ok(())
    }
}

/// Denies reads of the listed definitions while allowing updates.
pub struct DenyRead {
    pub process_definition_ids: Vec<String>,
}

impl AuthorizationChecker for DenyRead {
    fn check_update_process_instance(&self, _: &ExecutionId, _: &str) -> Result<()> {
        Ok(())
    }

    fn check_read_process_instance(&self, process_instance_id: &ExecutionId, process_definition_id: &str) -> Result<()> {
        if self.process_definition_ids.iter().any(|id| id == process_definition_id) {
            return Err(EngineError::AuthorizationFailed {
                operation: "READ".to_string(),
                resource_id: process_instance_id.to_string(),
            });
        }
        Ok(())
    }
}

pub trait HistoryEventProducer: Send + Sync {
    fn process_instance_updated(&self, process_instance_id: &ExecutionId, process_definition_id: &str);
}

/// Emits history events as tracing records.
pub struct TracingHistoryProducer;

impl HistoryEventProducer for TracingHistoryProducer {
    fn process_instance_updated(&self, process_instance_id: &ExecutionId, process_definition_id: &str) {
        debug!(
            process_instance_id = %process_instance_id,
            process_definition_id = %process_definition_id,
            "History: process instance updated"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    pub property_name: String,
    pub org_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl PropertyChange {
    pub fn new(property_name: &str, org_value: Option<Value>, new_value: Option<Value>) -> Self {
        Self {
            property_name: property_name.to_string(),
            org_value,
            new_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationLogEntry {
    pub operation_type: String,
    pub process_instance_id: Option<ExecutionId>,
    pub process_definition_id: Option<String>,
    pub property_changes: Vec<PropertyChange>,
    pub annotation: Option<String>,
}

pub const OPERATION_TYPE_MODIFY_PROCESS_INSTANCE: &str = "ModifyProcessInstance";

pub trait OperationLogWriter: Send + Sync {
    fn write(&self, entry: OperationLogEntry);
}

/// Keeps every entry in memory.
#[derive(Default)]
pub struct InMemoryOperationLog {
    entries: Mutex<Vec<OperationLogEntry>>,
}

impl InMemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OperationLogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OperationLogWriter for InMemoryOperationLog {
    fn write(&self, entry: OperationLogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
