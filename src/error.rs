//! Error types for BioSIM.
//!
//! All errors are strongly typed using thiserror. The taxonomy mirrors how a
//! failure is reported to a client:
//! - validation errors are detected before any engine call and never retried
//! - resource errors cover caps, missing cache handles and coverage shortfall
//! - engine and merge errors are scoped to a single location
//! - initialization errors are fatal at startup and abandon a rotation at runtime

use thiserror::Error;

/// Validation errors that occur while checking an inbound request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("the {field} must range between {min} and {max} (got {value})")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("NaN is not accepted for parameter {field}")]
    NotANumber {
        field: String,
    },

    #[error("the number of coordinates is inconsistent: {field} has {actual} values, expected {expected}")]
    CoordinateMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("the start year ({from}) must be the same as or earlier than the end year ({to})")]
    InvalidYearRange {
        from: i32,
        to: i32,
    },

    #[error("the rep parameter must be equal to or greater than 1 (got {value})")]
    InvalidReplicates {
        value: i64,
    },

    #[error("the nb_nearest_neighbor must be an integer ranging from 1 to 35 (got {value})")]
    InvalidNearestNeighbors {
        value: i64,
    },

    #[error("the {field} parameter must be one of the following: {allowed}")]
    UnknownValue {
        field: String,
        value: String,
        allowed: String,
    },

    #[error("Model {name} does not exist")]
    UnknownModel {
        name: String,
    },

    #[error("{}", join_issues(.issues))]
    Multiple {
        issues: Vec<ValidationError>,
    },
}

fn join_issues(issues: &[ValidationError]) -> String {
    let parts: Vec<String> = issues.iter().map(ToString::to_string).collect();
    format!("Error: {}", parts.join(", "))
}

impl ValidationError {
    /// Collapses a list of issues into a single error, or `None` when empty.
    #[must_use]
    pub fn collect(mut issues: Vec<ValidationError>) -> Option<Self> {
        match issues.len() {
            0 => None,
            1 => issues.pop(),
            _ => Some(Self::Multiple { issues }),
        }
    }
}

/// Client-facing resource errors. Never silently truncated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("The maximum number of coordinates in a {kind} request is limited to {max} (got {actual})")]
    TooManyCoordinates {
        kind: String,
        max: usize,
        actual: usize,
    },

    #[error("The reference {handle} is not found in the library")]
    HandleNotFound {
        handle: String,
    },

    #[error("The references {} are not found in the library", .handles.join(" "))]
    HandlesNotFound {
        handles: Vec<String>,
    },

    #[error("Years {from}-{to} are only partially covered by the catalog (uncovered: {uncovered})")]
    IncompleteCoverage {
        from: i32,
        to: i32,
        uncovered: String,
    },
}

/// Errors reported by the opaque simulation engine for one location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{message}")]
    Status {
        message: String,
    },

    #[error("Engine panicked: {message}")]
    Panicked {
        message: String,
    },
}

/// Errors raised while stitching per-epoch results for one location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// A span carried a non-success engine status; the message replaces the data.
    #[error("{message}")]
    EngineStatus {
        message: String,
    },

    #[error("Header mismatch between spans: expected [{expected}], got [{actual}]")]
    HeaderMismatch {
        expected: String,
        actual: String,
    },

    #[error("Replicate count mismatch: expected {expected}, got {actual}")]
    ReplicateMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("The number of lines ({lines}) is incompatible with the number of replicates ({replicates})")]
    RaggedReplicates {
        lines: usize,
        replicates: usize,
    },

    #[error("Year {year} falls outside the span {lo}-{hi}")]
    YearOutOfSpan {
        year: i32,
        lo: i32,
        hi: i32,
    },

    #[error("Year value '{value}' is not an integer")]
    InvalidYear {
        value: String,
    },

    #[error("Row {row} has {actual} fields, header has {expected}")]
    MalformedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Engine reply has no header line")]
    MissingHeader,

    #[error("Spans are out of chronological order: {previous} then {next}")]
    OutOfOrder {
        previous: String,
        next: String,
    },
}

/// Engine instance or worker pool initialization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("Failed to initialize engine for {target}: {message}")]
    EngineInit {
        target: String,
        message: String,
    },

    #[error("Failed to spawn worker {worker} for {target}: {message}")]
    WorkerSpawn {
        target: String,
        worker: usize,
        message: String,
    },

    #[error("Worker handshake for {target} did not complete: {message}")]
    Handshake {
        target: String,
        message: String,
    },
}

/// Runtime execution failures of the dispatch layer itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Lock poisoned: {context}")]
    LockPoisoned {
        context: String,
    },

    #[error("Worker pool for {target} is disconnected")]
    Disconnected {
        target: String,
    },

    #[error("Worker pool for {target} returned tag {tag} outside a batch of {batch_size}")]
    TagViolation {
        target: String,
        tag: usize,
        batch_size: usize,
    },

    #[error("No engine is registered for {target}")]
    UnknownTarget {
        target: String,
    },
}

/// Configuration loading failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Io {
        path: String,
        message: String,
    },

    #[error("Failed to parse config: {message}")]
    Parse {
        message: String,
    },

    #[error("{env_name} is invalid: {message}")]
    Env {
        env_name: String,
        message: String,
    },

    #[error("Invalid configuration: {}", .issues.join("; "))]
    Invalid {
        issues: Vec<String>,
    },
}

/// Top-level error type for BioSIM.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BioSimError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Initialization error: {0}")]
    Init(#[from] InitError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl BioSimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a resource error.
    #[must_use]
    pub const fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    /// Returns true if this is an initialization error.
    #[must_use]
    pub const fn is_init(&self) -> bool {
        matches!(self, Self::Init(_))
    }

    /// Returns true if the client caused the failure (HTTP 400 class).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Resource(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Resource(_) | Self::Config(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::Disconnected { .. }),
            Self::Init(_) => true,
            Self::Engine(_) | Self::Merge(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for BioSIM operations.
pub type BioSimResult<T> = Result<T, BioSimError>;

pub(crate) fn lock_err(context: &str) -> BioSimError {
    BioSimError::Execution(ExecutionError::LockPoisoned {
        context: context.to_string(),
    })
}
