//! Operator: stateless compute service.
//!
//! Each operator is dedicated to one operation kind but computes whatever
//! it receives. Every request yields exactly one outcome, errors included,
//! and that outcome is forwarded to the aggregator before the request is
//! acknowledged to the dispatcher.

use crate::models::{Message, Operation, Outcome, Reply, Request, Status};
use crate::transport::{Handler, SharedEndpoint};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Compute the outcome of one request. Never fails.
pub fn compute(request: &Request) -> Outcome {
    let started = Instant::now();
    let (result, status) = evaluate(request.operation, request.operand1, request.operand2);

    Outcome {
        run: request.run,
        request_id: request.id,
        operation: request.operation,
        operand1: request.operand1,
        operand2: request.operand2,
        result,
        status,
        elapsed: started.elapsed(),
    }
}

fn evaluate(operation: Operation, a: f64, b: f64) -> (f64, Status) {
    match operation {
        Operation::Add => (a + b, Status::Ok),
        Operation::Sub => (a - b, Status::Ok),
        Operation::Mul => (a * b, Status::Ok),
        Operation::Div if b == 0.0 => (0.0, Status::DivisionByZero),
        Operation::Div => (a / b, Status::Ok),
        Operation::Unknown => (0.0, Status::UnknownOperation),
    }
}

/// Operator service bound to one operation kind.
pub struct OperatorService {
    kind: Operation,
    aggregator: SharedEndpoint,
}

impl OperatorService {
    pub fn new(kind: Operation, aggregator: SharedEndpoint) -> Self {
        Self { kind, aggregator }
    }

    pub fn kind(&self) -> Operation {
        self.kind
    }

    /// Compute `request` and forward its outcome to the aggregator.
    pub async fn process(&self, request: Request) -> Reply {
        if request.operation != self.kind {
            warn!(
                "{} operator received request {} for {}",
                self.kind, request.id, request.operation
            );
        }

        let outcome = compute(&request);
        match outcome.status {
            Status::Ok => debug!(
                "Request {}: {} {} {} = {}",
                request.id,
                request.operand1,
                request.operation.symbol(),
                request.operand2,
                outcome.result
            ),
            status => warn!("Request {} completed with {}", request.id, status),
        }

        match self.aggregator.deliver(Message::Outcome(outcome)).await {
            Ok(()) => Reply::Accepted,
            Err(e) => {
                error!("Failed to forward outcome {}: {}", request.id, e);
                Reply::rejected(format!("outcome not forwarded: {}", e))
            }
        }
    }
}

#[async_trait]
impl Handler for OperatorService {
    async fn handle(&self, message: Message) -> Reply {
        match message {
            Message::Request(request) => self.process(request).await,
            other => {
                warn!("{} operator ignoring {} message", self.kind, other.kind());
                Reply::rejected(format!("operator does not accept {}", other.kind()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompletionNotice;
    use crate::transport::testing::RecordingEndpoint;
    use std::sync::Arc;

    fn request(operation: Operation, a: f64, b: f64) -> Request {
        Request::new(1, operation, a, b)
    }

    fn forwarded(recorder: &RecordingEndpoint) -> Vec<Outcome> {
        recorder
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Outcome(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_basic_arithmetic() {
        let add = compute(&request(Operation::Add, 5.0, 3.0));
        assert_eq!(add.result, 8.0);
        assert_eq!(add.status, Status::Ok);

        assert_eq!(compute(&request(Operation::Sub, 5.0, 3.0)).result, 2.0);
        assert_eq!(compute(&request(Operation::Mul, 0.1, 3.0)).result, 0.1 * 3.0);
        assert_eq!(compute(&request(Operation::Div, 10.0, 2.0)).result, 5.0);
        assert_eq!(compute(&request(Operation::Add, 0.1, 0.2)).result, 0.1 + 0.2);
    }

    #[test]
    fn test_division_by_zero() {
        for a in [7.0, -3.5, 0.0, f64::INFINITY, f64::NAN] {
            for b in [0.0, -0.0] {
                let outcome = compute(&request(Operation::Div, a, b));
                assert_eq!(outcome.status, Status::DivisionByZero);
                assert_eq!(outcome.result, 0.0);
            }
        }
    }

    #[test]
    fn test_unknown_operation() {
        let outcome = compute(&request(Operation::Unknown, 4.0, 2.0));
        assert_eq!(outcome.status, Status::UnknownOperation);
        assert_eq!(outcome.result, 0.0);
        assert_eq!(outcome.request_id, 1);
    }

    #[test]
    fn test_special_values_propagate() {
        let nan = compute(&request(Operation::Add, f64::NAN, 1.0));
        assert!(nan.result.is_nan());
        assert_eq!(nan.status, Status::Ok);

        let inf = compute(&request(Operation::Mul, f64::INFINITY, 2.0));
        assert_eq!(inf.result, f64::INFINITY);

        let nan_div = compute(&request(Operation::Div, 1.0, f64::NAN));
        assert!(nan_div.result.is_nan());
        assert_eq!(nan_div.status, Status::Ok);
    }

    #[test]
    fn test_outcome_keeps_run_tag() {
        let outcome = compute(&Request::new(5, Operation::Sub, 3.0, 1.0).in_run(77));
        assert_eq!(outcome.run, 77);
        assert_eq!(outcome.request_id, 5);
    }

    #[tokio::test]
    async fn test_forwards_every_outcome() {
        let recorder = RecordingEndpoint::new("aggregator");
        let service = OperatorService::new(Operation::Div, recorder.clone());
        assert_eq!(service.kind(), Operation::Div);

        let reply = service.process(Request::new(3, Operation::Div, 7.0, 0.0)).await;
        assert_eq!(reply, Reply::Accepted);

        // Misrouted requests are still computed and forwarded.
        let reply = service.process(Request::new(4, Operation::Add, 1.0, 2.0)).await;
        assert_eq!(reply, Reply::Accepted);

        let outcomes = forwarded(&recorder);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].request_id, 3);
        assert_eq!(outcomes[0].status, Status::DivisionByZero);
        assert_eq!(outcomes[1].result, 3.0);
    }

    #[tokio::test]
    async fn test_rejects_when_aggregator_unreachable() {
        let recorder = RecordingEndpoint::new("aggregator");
        recorder.set_failing(true);
        let service = OperatorService::new(Operation::Add, recorder);

        let reply = service.process(Request::new(1, Operation::Add, 1.0, 1.0)).await;
        assert!(matches!(reply, Reply::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_rejects_non_request_messages() {
        let recorder = RecordingEndpoint::new("aggregator");
        let service = OperatorService::new(Operation::Add, recorder.clone());
        let reply = service
            .handle(Message::Completion(CompletionNotice::new(0, 1)))
            .await;
        assert!(matches!(reply, Reply::Rejected { .. }));
        assert!(recorder.messages().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests() {
        let recorder = RecordingEndpoint::new("aggregator");
        let service = Arc::new(OperatorService::new(Operation::Mul, recorder.clone()));

        let calls = (1..=50u64).map(|id| {
            let service = Arc::clone(&service);
            async move {
                service
                    .process(Request::new(id, Operation::Mul, id as f64, 2.0))
                    .await
            }
        });
        let replies = futures::future::join_all(calls).await;
        assert!(replies.iter().all(|r| *r == Reply::Accepted));

        let outcomes = forwarded(&recorder);
        assert_eq!(outcomes.len(), 50);
        for outcome in &outcomes {
            assert_eq!(outcome.result, outcome.request_id as f64 * 2.0);
        }
    }
}
