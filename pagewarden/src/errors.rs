use thiserror::Error;

/// Failure kinds a [`crate::PageDriver`](crate::driver::PageDriver) capability
/// may report.
///
/// The first four kinds are recoverable: the engine resolves them to a skip
/// and never lets them abort a rule pass. `ConnectionLost` means the driver
/// session itself is gone and pauses the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element reference is stale: {0}")]
    ElementStale(String),

    #[error("Element is not interactable: {0}")]
    ElementNotInteractable(String),

    #[error("Driver operation timed out: {0}")]
    Timeout(String),

    #[error("Driver connection lost: {0}")]
    ConnectionLost(String),
}

impl DriverError {
    /// Whether this failure is in the swallow-and-skip category.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DriverError::ElementNotFound(_)
                | DriverError::ElementStale(_)
                | DriverError::ElementNotInteractable(_)
                | DriverError::Timeout(_)
        )
    }
}

/// Errors raised by rule evaluation and execution.
///
/// Definition errors mean the rule document itself is defective; the engine
/// surfaces them to the operator and pauses rather than retrying.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown condition operator: '{0}'")]
    UnknownOperator(String),

    #[error("flag check only allows either 'and' or 'or', not both")]
    ConflictingLogicalOperator,

    #[error("Non-numeric operand in comparison: '{observed}' {op} '{expected}'")]
    NonNumericComparison {
        observed: String,
        op: String,
        expected: String,
    },

    #[error("Non-numeric flag operand: flag '{name}' = '{current}', operand '{operand}'")]
    NonNumericFlag {
        name: String,
        current: String,
        operand: String,
    },

    #[error("Invalid wait range: start {start} is greater than stop {stop}")]
    InvalidRange { start: u64, stop: u64 },

    /// Not a definition error: the engine logs this and schedules no wait.
    #[error("Malformed wait spec: '{0}'")]
    MalformedWaitSpec(String),

    #[error("Invalid search pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Malformed rules document: {0}")]
    MalformedRules(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl EngineError {
    /// Definition errors fail the current rule pass and pause the engine.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownOperator(_)
                | EngineError::ConflictingLogicalOperator
                | EngineError::NonNumericComparison { .. }
                | EngineError::NonNumericFlag { .. }
                | EngineError::InvalidRange { .. }
                | EngineError::InvalidPattern { .. }
                | EngineError::MalformedRules(_)
        )
    }
}
