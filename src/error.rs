//! Error types of the modification command layer.

use thiserror::Error;

use crate::runtime::execution::ExecutionId;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification of [`EngineError`], used by callers that only
/// need to know whether retrying or rephrasing a request can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request references something that does not exist or cannot be targeted.
    Request,
    /// The request cannot be resolved to a single execution.
    StructuralAmbiguity,
    /// Another unit of work changed the process instance first.
    Concurrency,
    Authorization,
    /// The execution tree is in a state the engine does not support.
    Invariant,
}

/// Errors raised while instantiating, cancelling or modifying process instances.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No deployed process definition has this id.
    #[error("process definition '{0}' not found")]
    ProcessDefinitionNotFound(String),

    /// No running process instance has this id.
    #[error("process instance '{0}' not found")]
    ProcessInstanceNotFound(ExecutionId),

    /// The process instance already ended.
    #[error("process instance '{0}' has already ended")]
    ProcessInstanceEnded(ExecutionId),

    /// An execution id does not resolve inside the process instance.
    #[error("execution '{0}' not found")]
    ExecutionNotFound(ExecutionId),

    /// The target activity or transition does not exist in the definition.
    #[error("element '{element_id}' does not exist in process definition '{process_definition_id}'")]
    ElementNotFound {
        /// Requested activity or transition id.
        element_id: String,
        /// Definition that was searched.
        process_definition_id: String,
    },

    /// The element exists but cannot be instantiated this way.
    #[error("cannot instantiate element '{element_id}': {reason}")]
    UnsupportedTargetElementType {
        /// Requested element id.
        element_id: String,
        /// Why the element was rejected.
        reason: String,
    },

    /// The definition has no initial activity to start the process with.
    #[error("process definition '{0}' has no initial activity")]
    MissingInitialActivity(String),

    /// More than one execution exists for the nearest instantiated flow scope.
    #[error("cannot start activity '{element_id}': more than one execution exists for scope '{scope_id}', specify an ancestor activity instance")]
    AmbiguousScopeExecution {
        /// Target element.
        element_id: String,
        /// Scope with several executions.
        scope_id: String,
    },

    /// More than one execution exists for the scope that has to be cancelled.
    #[error("cannot start activity '{element_id}': more than one execution to cancel exists for scope '{scope_id}'")]
    AmbiguousExecutionToCancel {
        /// Target element.
        element_id: String,
        /// Scope with several executions.
        scope_id: String,
    },

    /// An activity instance could not be resolved to exactly one execution.
    #[error("activity instance '{activity_instance_id}' resolves to {count} executions, expected exactly one")]
    AmbiguousActivityInstanceExecution {
        /// Activity instance in question.
        activity_instance_id: String,
        /// Number of matching executions.
        count: usize,
    },

    /// The activity instance does not exist in the current activity-instance tree.
    #[error("activity instance '{0}' does not exist")]
    ActivityInstanceNotFound(String),

    /// The transition instance does not exist in the current activity-instance tree.
    #[error("transition instance '{0}' does not exist")]
    TransitionInstanceNotFound(String),

    /// The scope runs its instances one after another and takes no concurrent start.
    #[error("Concurrent instantiation not possible for activities in scope {scope_id}")]
    ConcurrentInstantiationNotPossible {
        /// Sequential multi-instance body.
        scope_id: String,
    },

    /// The ancestor activity instance is not on the target's flow-scope path.
    #[error("scope execution for activity instance '{ancestor_activity_instance_id}' cannot be found in parent hierarchy of flow element '{element_id}'")]
    InvalidAncestor {
        /// Ancestor activity instance given by the caller.
        ancestor_activity_instance_id: String,
        /// Target element.
        element_id: String,
    },

    /// The instruction list is not acceptable for the requested operation.
    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),

    /// A process instance of a batch belongs to another definition.
    #[error("process instance '{process_instance_id}' belongs to process definition '{actual}' and not to '{expected}'")]
    ProcessDefinitionMismatch {
        /// Offending process instance.
        process_instance_id: ExecutionId,
        /// Definition of the batch.
        expected: String,
        /// Definition of the process instance.
        actual: String,
    },

    /// The authorization collaborator denied the operation.
    #[error("not authorized to {operation} on '{resource_id}'")]
    AuthorizationFailed {
        /// Denied operation.
        operation: String,
        /// Resource the operation was attempted on.
        resource_id: String,
    },

    /// The process instance changed since it was loaded.
    #[error("process instance '{process_instance_id}' was updated by another transaction (expected revision {expected}, found {actual})")]
    OptimisticLockingFailure {
        /// Process instance that was written concurrently.
        process_instance_id: ExecutionId,
        /// Revision the command was based on.
        expected: u64,
        /// Revision found in the store.
        actual: u64,
    },

    /// The execution tree does not satisfy a structural invariant.
    #[error("execution tree invariant violated: {0}")]
    InvariantViolation(String),

    /// The batch worker modifying this process instance panicked or was cancelled.
    #[error("batch worker for process instance '{process_instance_id}' did not finish: {reason}")]
    BatchWorkerFailed {
        /// Process instance the worker was modifying.
        process_instance_id: ExecutionId,
        /// Join error reported by the runtime.
        reason: String,
    },

    /// A snapshot could not be serialized or deserialized.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::AmbiguousScopeExecution { .. }
            | EngineError::AmbiguousExecutionToCancel { .. }
            | EngineError::AmbiguousActivityInstanceExecution { .. } => ErrorCategory::StructuralAmbiguity,
            EngineError::OptimisticLockingFailure { .. } => ErrorCategory::Concurrency,
            EngineError::AuthorizationFailed { .. } => ErrorCategory::Authorization,
            EngineError::InvariantViolation(_)
            | EngineError::Serialization(_)
            | EngineError::BatchWorkerFailed { .. } => ErrorCategory::Invariant,
            _ => ErrorCategory::Request,
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        EngineError::InvariantViolation(message.into())
    }
}
