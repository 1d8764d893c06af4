//! Custom error types for vcable.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Transient races inside the tick engine never show up here: they are
//! absorbed as zero-filled output for one period.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EndpointIndex, SessionId};

/// Top-level error type for the resource-manager side.
#[derive(Debug, Error)]
pub enum CableError {
    // =========================================================================
    // Validation Errors - rejected before any allocation
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Resource Errors - no partial allocation performed
    // =========================================================================
    #[error("Insufficient resources: {0}")]
    Resource(#[from] ResourceError),

    // =========================================================================
    // Shared Memory Errors - fatal for the session that hit them
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // Endpoint Lifecycle Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(EndpointIndex),

    #[error("Endpoint {0} has no ring buffer allocated")]
    RingNotAllocated(EndpointIndex),

    #[error("Host rejected endpoint '{name}': {source}")]
    HostRejected {
        name: String,
        #[source]
        source: HostError,
    },

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    #[error("Buffer layout has not been configured for session {0}")]
    LayoutNotConfigured(SessionId),

    #[error("Buffer layout of session {session} is in use by {endpoints} endpoint ring(s)")]
    LayoutBusy { session: SessionId, endpoints: usize },

    #[error("Notification wait cancelled")]
    NotificationsCancelled,

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Validation errors are reported synchronously and leave no state behind.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Sample rate out of range: {rate} Hz (min: {min}, max: {max})")]
    SampleRateOutOfRange { rate: u32, min: u32, max: u32 },

    #[error("Unsupported sample depth: {bits} bits (supported: 8, 16, 24, 32)")]
    UnsupportedSampleDepth { bits: u32 },

    #[error("Channel count out of range: {channels} (min: 1, max: {max})")]
    ChannelCountOutOfRange { channels: u32, max: u32 },

    #[error("Buffer size out of range: {size} bytes (min: {min}, max: {max})")]
    BufferSizeOutOfRange { size: u64, min: u64, max: u64 },

    #[error("Frame size {frame_size} is not a whole number of {frame_bytes}-byte sample frames")]
    MisalignedFrameSize { frame_size: u32, frame_bytes: u32 },

    #[error("Duplicate endpoint name: {name}")]
    DuplicateEndpointName { name: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Resource exhaustion. The failing operation performed no allocation.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Cell bitmap exhausted: need {requested} contiguous cells, {free} free of {total}")]
    CellsExhausted {
        requested: usize,
        free: usize,
        total: usize,
    },

    #[error("All {max} endpoint register slots are in use")]
    RegisterSlotsExhausted { max: usize },

    #[error("Region too small: {required} bytes required, {available} available")]
    RegionTooSmall { required: usize, available: usize },
}

/// Lifecycle transition errors for the endpoint state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition endpoint {index} from {from} to {to}")]
    InvalidTransition {
        index: EndpointIndex,
        from: &'static str,
        to: &'static str,
    },

    #[error("Endpoint {index} is in terminal state: {state}")]
    TerminalState {
        index: EndpointIndex,
        state: &'static str,
    },

    #[error("Endpoint {index} is {state}, operation requires Active")]
    NotActive {
        index: EndpointIndex,
        state: &'static str,
    },
}

/// Shared memory errors - critical failures with no fallback.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to open shared memory region: {name} - {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Region header checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Invalid region header: {reason}")]
    InvalidHeader { reason: String },
}

/// Failure reported by the host plugin surface when confirming an endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("device rejected by host validation: {reason}")]
    Validation { reason: String },

    #[error("host out of resources: {reason}")]
    Resources { reason: String },

    #[error("device name already registered: {name}")]
    NameConflict { name: String },

    #[error("host dropped the registration without completing it")]
    Abandoned,
}

/// Result type alias using CableError.
pub type CableResult<T> = Result<T, CableError>;
