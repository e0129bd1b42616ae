use serde::{Deserialize, Serialize};
use thiserror::Error;
use ucp_core_types::{RunId, TraceId};

/// Result type alias using UcpError
pub type Result<T> = std::result::Result<T, UcpError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable `ERR_*` code. The codes appear in operation
/// results and receipts, so they are part of the exported document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Packet structure
    InvalidInput,
    ValidationFailed,
    PacketExpired,

    // Capability resolution
    UnauthorizedCapability,
    UnknownCapability,
    UnknownAction,

    // Operation execution
    DriverFailed,
    InvalidArguments,
    ArgumentResolution,
    ConditionSyntax,
    DepthExceeded,
    IterationLimit,
    Aborted,

    // Receipts
    IntegrityViolation,

    // Templates
    NotFound,
    AlreadyExists,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    ExternalService,
    Timeout,
    Concurrency,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::ValidationFailed => "ERR_VALIDATION_FAILED",
            ExErrorKind::PacketExpired => "ERR_PACKET_EXPIRED",
            ExErrorKind::UnauthorizedCapability => "ERR_UNAUTHORIZED_CAPABILITY",
            ExErrorKind::UnknownCapability => "ERR_UNKNOWN_CAPABILITY",
            ExErrorKind::UnknownAction => "ERR_UNKNOWN_ACTION",
            ExErrorKind::DriverFailed => "ERR_DRIVER_FAILED",
            ExErrorKind::InvalidArguments => "ERR_INVALID_ARGUMENTS",
            ExErrorKind::ArgumentResolution => "ERR_ARGUMENT_RESOLUTION",
            ExErrorKind::ConditionSyntax => "ERR_CONDITION_SYNTAX",
            ExErrorKind::DepthExceeded => "ERR_DEPTH_EXCEEDED",
            ExErrorKind::IterationLimit => "ERR_ITERATION_LIMIT",
            ExErrorKind::Aborted => "ERR_ABORTED",
            ExErrorKind::IntegrityViolation => "ERR_INTEGRITY_VIOLATION",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether an error of this kind may be diverted into a `catch` branch.
    ///
    /// Unauthorized capabilities and depth overflow are run-fatal; aborts
    /// stop scheduling altogether.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ExErrorKind::UnauthorizedCapability
                | ExErrorKind::DepthExceeded
                | ExErrorKind::Aborted
                | ExErrorKind::PacketExpired
        )
    }
}

/// Canonical structured error type
///
/// Carries the classification (`kind`) plus optional context describing
/// where in a run the error surfaced.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    packet_id: Option<String>,
    node_path: Option<String>,
    capability: Option<String>,
    run_id: Option<RunId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            packet_id: None,
            node_path: None,
            capability: None,
            run_id: None,
            trace_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_packet_id(mut self, id: impl Into<String>) -> Self {
        self.packet_id = Some(id.into());
        self
    }

    /// Add the location of the failing node
    pub fn with_node_path(mut self, path: impl Into<String>) -> Self {
        self.node_path = Some(path.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn packet_id(&self) -> Option<&str> {
        self.packet_id.as_deref()
    }

    pub fn node_path(&self) -> Option<&str> {
        self.node_path.as_deref()
    }

    pub fn capability(&self) -> Option<&str> {
        self.capability.as_deref()
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Project onto the compact form recorded inside operation results
    pub fn to_operation_error(&self) -> OperationError {
        OperationError {
            code: self.code().to_string(),
            message: self.message.clone(),
        }
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(path) = &self.node_path {
            write!(f, " (node: {})", path)?;
        }
        if let Some(packet_id) = &self.packet_id {
            write!(f, " (packet_id: {})", packet_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

// ========== End Error Facility ==========

/// Error as recorded in an operation result or receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ExErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A single structural defect found while validating a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// JSON-path style location, e.g. `operations[1].body`
    pub path: String,
    /// Stable defect code, e.g. `missing_field`
    pub code: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.path, self.code, self.message)
    }
}

/// Domain error taxonomy for packet execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UcpError {
    /// Packet failed structural validation
    #[error("Packet failed validation with {} error(s)", errors.len())]
    Validation { errors: Vec<ValidationError> },

    /// Operation references a capability the packet did not declare
    #[error("Capability '{capability}' is not declared by the packet (at {node_path})")]
    UnauthorizedCapability {
        capability: String,
        node_path: String,
    },

    /// Capability is declared but no driver is registered for it
    #[error("No driver registered for capability '{capability}'")]
    UnknownCapability { capability: String },

    /// Driver does not implement the requested action
    #[error("Capability '{capability}' has no action '{action}'")]
    UnknownAction { capability: String, action: String },

    /// A capability invocation failed
    #[error("{capability}.{action} failed: {message}")]
    Driver {
        capability: String,
        action: String,
        message: String,
    },

    /// Driver rejected its arguments
    #[error("Invalid arguments for {op_name}: {reason}")]
    InvalidArguments { op_name: String, reason: String },

    /// A `{{ path }}` placeholder could not be resolved
    #[error("Could not resolve '{reference}': {reason}")]
    ArgumentResolution { reference: String, reason: String },

    /// Condition expression is malformed
    #[error("Invalid condition '{expression}': {reason}")]
    ConditionSyntax { expression: String, reason: String },

    /// Operation tree nests deeper than the configured limit
    #[error("Nesting depth {limit} exceeded at {node_path}")]
    DepthExceeded { limit: usize, node_path: String },

    /// Loop resolves to more iterations than the configured limit
    #[error("Loop at {node_path} resolves to {requested} iterations (limit {limit})")]
    IterationLimit {
        node_path: String,
        requested: usize,
        limit: usize,
    },

    /// Cooperative cancellation was observed
    #[error("Execution aborted before {node_path}")]
    Aborted { node_path: String },

    /// Packet TTL elapsed before execution started
    #[error("Packet {packet_id} expired at {expired_at_ms}")]
    PacketExpired { packet_id: String, expired_at_ms: u64 },

    /// Stored hash does not match the recomputed one
    #[error("Integrity check failed for {field}: stored {stored}, computed {computed}")]
    IntegrityMismatch {
        field: String,
        stored: String,
        computed: String,
    },

    /// Template id is unknown to the repository
    #[error("Template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    /// Template id is already registered
    #[error("Template already exists: {template_id}")]
    TemplateAlreadyExists { template_id: String },

    /// Serialization error (JSON encoding/decoding)
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl UcpError {
    pub fn kind(&self) -> ExErrorKind {
        match self {
            UcpError::Validation { .. } => ExErrorKind::ValidationFailed,
            UcpError::UnauthorizedCapability { .. } => ExErrorKind::UnauthorizedCapability,
            UcpError::UnknownCapability { .. } => ExErrorKind::UnknownCapability,
            UcpError::UnknownAction { .. } => ExErrorKind::UnknownAction,
            UcpError::Driver { .. } => ExErrorKind::DriverFailed,
            UcpError::InvalidArguments { .. } => ExErrorKind::InvalidArguments,
            UcpError::ArgumentResolution { .. } => ExErrorKind::ArgumentResolution,
            UcpError::ConditionSyntax { .. } => ExErrorKind::ConditionSyntax,
            UcpError::DepthExceeded { .. } => ExErrorKind::DepthExceeded,
            UcpError::IterationLimit { .. } => ExErrorKind::IterationLimit,
            UcpError::Aborted { .. } => ExErrorKind::Aborted,
            UcpError::PacketExpired { .. } => ExErrorKind::PacketExpired,
            UcpError::IntegrityMismatch { .. } => ExErrorKind::IntegrityViolation,
            UcpError::TemplateNotFound { .. } => ExErrorKind::NotFound,
            UcpError::TemplateAlreadyExists { .. } => ExErrorKind::AlreadyExists,
            UcpError::Serialization { .. } => ExErrorKind::Serialization,
            UcpError::Internal { .. } => ExErrorKind::Internal,
        }
    }

    pub fn to_operation_error(&self) -> OperationError {
        OperationError::new(self.kind(), self.to_string())
    }
}

/// Conversion from UcpError to ExError
impl From<UcpError> for ExError {
    fn from(err: UcpError) -> Self {
        let message = err.to_string();
        let base = ExError::new(err.kind()).with_message(message);
        match err {
            UcpError::Validation { .. } => base.with_op("validate"),
            UcpError::UnauthorizedCapability {
                capability,
                node_path,
            } => base
                .with_op("resolve_capability")
                .with_capability(capability)
                .with_node_path(node_path),
            UcpError::UnknownCapability { capability } => base
                .with_op("resolve_capability")
                .with_capability(capability),
            UcpError::UnknownAction { capability, .. } => base
                .with_op("resolve_capability")
                .with_capability(capability),
            UcpError::Driver { capability, .. } => base.with_op("invoke").with_capability(capability),
            UcpError::InvalidArguments { op_name, .. } => base.with_op(op_name),
            UcpError::ArgumentResolution { .. } => base.with_op("resolve_arguments"),
            UcpError::ConditionSyntax { .. } => base.with_op("evaluate_condition"),
            UcpError::DepthExceeded { node_path, .. }
            | UcpError::IterationLimit { node_path, .. }
            | UcpError::Aborted { node_path } => base.with_node_path(node_path),
            UcpError::PacketExpired { packet_id, .. } => {
                base.with_op("check_ttl").with_packet_id(packet_id)
            }
            UcpError::IntegrityMismatch { .. } => base.with_op("verify_receipt"),
            UcpError::TemplateNotFound { .. } | UcpError::TemplateAlreadyExists { .. } => {
                base.with_op("template")
            }
            UcpError::Serialization { .. } | UcpError::Internal { .. } => base,
        }
    }
}

/// Conversion from serde_json::Error to UcpError
impl From<serde_json::Error> for UcpError {
    fn from(err: serde_json::Error) -> Self {
        UcpError::Serialization {
            message: err.to_string(),
        }
    }
}
