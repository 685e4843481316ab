//! Aggregation state of one run.
//!
//! Owned by the aggregator actor and only mutated from its message loop.

use crate::error::ProtocolViolation;
use crate::models::{CompletionNotice, OperationTable, Outcome, RequestId, RunSummary};
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct AggregationState {
    expected: Option<u64>,
    received: u64,
    per_operation: OperationTable,
    total_elapsed: Duration,
    seen: HashSet<RequestId>,
    violations: Vec<ProtocolViolation>,
}

impl AggregationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Apply a completion notice. The first notice wins; a repeated notice
    /// with the same total is ignored, a conflicting one is flagged.
    pub fn observe_completion(&mut self, notice: CompletionNotice) -> Result<(), ProtocolViolation> {
        match self.expected {
            None => {
                self.expected = Some(notice.total_dispatched);
                Ok(())
            }
            Some(kept) if kept == notice.total_dispatched => Ok(()),
            Some(kept) => Err(self.flag(ProtocolViolation::ConflictingCompletion {
                kept,
                ignored: notice.total_dispatched,
            })),
        }
    }

    /// Count an outcome. A second outcome for the same request is flagged
    /// and left out of every counter.
    pub fn record(&mut self, outcome: &Outcome) -> Result<(), ProtocolViolation> {
        if !self.seen.insert(outcome.request_id) {
            return Err(self.flag(ProtocolViolation::DuplicateOutcome(outcome.request_id)));
        }

        self.received += 1;
        self.per_operation.record(outcome);
        self.total_elapsed += outcome.elapsed;
        Ok(())
    }

    /// The run is over once the notice has arrived and every dispatched
    /// request is accounted for.
    pub fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|expected| self.received >= expected)
    }

    /// Close the run: compute final statistics and reset to a fresh state.
    pub fn finalize(&mut self, run: u64) -> RunSummary {
        let expected = self.expected.unwrap_or(self.received);
        if self.received > expected {
            self.flag(ProtocolViolation::ExcessOutcomes {
                expected,
                received: self.received,
            });
        }

        let state = std::mem::take(self);
        let average_elapsed = if state.received == 0 {
            Duration::ZERO
        } else {
            let nanos = state.total_elapsed.as_nanos() / u128::from(state.received);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };

        RunSummary {
            run,
            expected,
            received: state.received,
            per_operation: state.per_operation,
            total_elapsed: state.total_elapsed,
            average_elapsed,
            violations: state.violations,
            finished_at: Utc::now(),
        }
    }

    fn flag(&mut self, violation: ProtocolViolation) -> ProtocolViolation {
        self.violations.push(violation.clone());
        violation
    }
}
