//! Error taxonomy of the dispatch protocol.
//!
//! Computational failures (division by zero, unknown operation) are not
//! errors here: they travel as [`crate::models::Status`] on an outcome.

use crate::models::{Operation, RequestId, RunTag};
use std::time::Duration;
use thiserror::Error;

/// A malformed input entry. The entry is skipped and never counted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected 3 comma-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid operand '{0}'")]
    InvalidOperand(String),

    #[error("unsupported operator '{0}' (expected one of + - * /)")]
    UnknownOperator(String),
}

/// A point-to-point call that did not complete.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error talking to {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("call to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("malformed frame from {endpoint}: {source}")]
    Codec {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{endpoint} closed the connection without replying")]
    Closed { endpoint: String },

    #[error("{endpoint} rejected the message: {reason}")]
    Rejected { endpoint: String, reason: String },
}

/// Why a single entry was not dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no operator is routed for {0}")]
    UnknownRoute(Operation),

    #[error("request {id} not delivered: {source}")]
    Transport {
        id: RequestId,
        #[source]
        source: TransportError,
    },
}

/// Inconsistent traffic observed by the aggregator. Flagged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("conflicting completion notice: kept {kept}, ignored {ignored}")]
    ConflictingCompletion { kept: u64, ignored: u64 },

    #[error("received {received} outcomes but only {expected} were dispatched")]
    ExcessOutcomes { expected: u64, received: u64 },

    #[error("duplicate outcome for request {0}")]
    DuplicateOutcome(RequestId),

    #[error("late {kind} for closed run {run}")]
    ClosedRun { run: RunTag, kind: &'static str },
}
