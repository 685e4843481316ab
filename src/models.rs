//! Protocol data models shared by every role.
//!
//! This module contains the requests, outcomes and notices exchanged
//! between the dispatcher, the operators and the aggregator, plus the
//! per-operation statistics the aggregator keeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ProtocolViolation;

/// Identifier assigned by the dispatcher, unique and increasing per run.
pub type RequestId = u64;

/// Tag a dispatcher stamps on every message of its run. Lets the
/// aggregator tell late traffic for a closed run from a new run.
pub type RunTag = u64;

/// Arithmetic operation kind.
///
/// `Unknown` is never produced by the dispatcher; it is what an operation
/// name received on the wire decodes to when no other variant matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Unknown,
}

impl Operation {
    /// Every operation kind, in counter order.
    pub const ALL: [Operation; 5] = [
        Operation::Add,
        Operation::Sub,
        Operation::Mul,
        Operation::Div,
        Operation::Unknown,
    ];

    /// Number of operation kinds, used to size per-operation counters.
    pub const COUNT: usize = Self::ALL.len();

    /// The four operations the dispatcher can route.
    pub const ROUTABLE: [Operation; 4] = [
        Operation::Add,
        Operation::Sub,
        Operation::Mul,
        Operation::Div,
    ];

    /// Position of this kind in per-operation counter tables.
    pub fn index(self) -> usize {
        match self {
            Operation::Add => 0,
            Operation::Sub => 1,
            Operation::Mul => 2,
            Operation::Div => 3,
            Operation::Unknown => 4,
        }
    }

    /// Map an input operator symbol to an operation.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Operation::Add),
            "-" => Some(Operation::Sub),
            "*" => Some(Operation::Mul),
            "/" => Some(Operation::Div),
            _ => None,
        }
    }

    /// Input/output symbol of the operation.
    pub fn symbol(self) -> &'static str {
        match self {
            Operation::Add => "+",
            Operation::Sub => "-",
            Operation::Mul => "*",
            Operation::Div => "/",
            Operation::Unknown => "?",
        }
    }

    /// Lowercase wire name.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Sub => "sub",
            Operation::Mul => "mul",
            Operation::Div => "div",
            Operation::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "Add"),
            Operation::Sub => write!(f, "Sub"),
            Operation::Mul => write!(f, "Mul"),
            Operation::Div => write!(f, "Div"),
            Operation::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<String> for Operation {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "add" => Operation::Add,
            "sub" => Operation::Sub,
            "mul" => Operation::Mul,
            "div" => Operation::Div,
            _ => Operation::Unknown,
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.name().to_string()
    }
}

/// Result status carried on every outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    DivisionByZero,
    UnknownOperation,
}

impl Status {
    pub fn is_error(self) -> bool {
        !matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::DivisionByZero => write!(f, "DIVISION_BY_ZERO"),
            Status::UnknownOperation => write!(f, "UNKNOWN_OPERATION"),
        }
    }
}

/// A single arithmetic request routed to one operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub run: RunTag,
    pub id: RequestId,
    pub operation: Operation,
    #[serde(with = "wire_float")]
    pub operand1: f64,
    #[serde(with = "wire_float")]
    pub operand2: f64,
}

impl Request {
    pub fn new(id: RequestId, operation: Operation, operand1: f64, operand2: f64) -> Self {
        Self {
            run: 0,
            id,
            operation,
            operand1,
            operand2,
        }
    }

    /// Stamp the request with its dispatcher run.
    pub fn in_run(mut self, run: RunTag) -> Self {
        self.run = run;
        self
    }
}

/// The outcome an operator produces for exactly one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub run: RunTag,
    pub request_id: RequestId,
    pub operation: Operation,
    #[serde(with = "wire_float")]
    pub operand1: f64,
    #[serde(with = "wire_float")]
    pub operand2: f64,
    #[serde(with = "wire_float")]
    pub result: f64,
    pub status: Status,
    /// Wall-clock duration of the compute step.
    pub elapsed: Duration,
}

/// Sent once by the dispatcher after its input is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    #[serde(default)]
    pub run: RunTag,
    pub total_dispatched: u64,
}

impl CompletionNotice {
    pub fn new(run: RunTag, total_dispatched: u64) -> Self {
        Self {
            run,
            total_dispatched,
        }
    }
}

/// A message carried by one point-to-point call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Request(Request),
    Outcome(Outcome),
    Completion(CompletionNotice),
}

impl Message {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Outcome(_) => "outcome",
            Message::Completion(_) => "completion",
        }
    }

    /// Dispatcher run the message belongs to.
    pub fn run(&self) -> RunTag {
        match self {
            Message::Request(request) => request.run,
            Message::Outcome(outcome) => outcome.run,
            Message::Completion(notice) => notice.run,
        }
    }
}

/// JSON has no literal for NaN or infinity; non-finite values travel as
/// the strings `"NaN"`, `"inf"` and `"-inf"`.
mod wire_float {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(WireFloat)
    }

    struct WireFloat;

    impl<'de> Visitor<'de> for WireFloat {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
            match value {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

/// Reply to a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Accepted,
    Rejected { reason: String },
}

impl Reply {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Reply::Rejected {
            reason: reason.into(),
        }
    }
}

/// Running statistics for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    /// Outcomes received.
    pub count: u64,
    /// Outcomes with a non-OK status.
    pub errors: u64,
    /// Sum of compute durations.
    pub total_elapsed: Duration,
}

/// Per-operation counters, sized by [`Operation::COUNT`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationTable {
    stats: [OperationStats; Operation::COUNT],
}

impl OperationTable {
    /// Fold one outcome into the counters for its operation.
    pub fn record(&mut self, outcome: &Outcome) {
        let entry = &mut self.stats[outcome.operation.index()];
        entry.count += 1;
        if outcome.status.is_error() {
            entry.errors += 1;
        }
        entry.total_elapsed += outcome.elapsed;
    }

    pub fn get(&self, operation: Operation) -> &OperationStats {
        &self.stats[operation.index()]
    }

    /// Iterate `(operation, stats)` pairs in counter order.
    pub fn iter(&self) -> impl Iterator<Item = (Operation, &OperationStats)> {
        Operation::ALL.iter().map(move |op| (*op, self.get(*op)))
    }
}

/// Final statistics of one completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// 1-based run counter of this aggregator instance.
    pub run: u64,
    pub expected: u64,
    pub received: u64,
    pub per_operation: OperationTable,
    pub total_elapsed: Duration,
    pub average_elapsed: Duration,
    pub violations: Vec<ProtocolViolation>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Outcomes that carried an error status.
    pub fn error_count(&self) -> u64 {
        self.per_operation.iter().map(|(_, s)| s.errors).sum()
    }
}
