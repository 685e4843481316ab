//! Aggregator: the single collector of outcomes.
//!
//! All state lives in an actor task fed through a mailbox, so concurrent
//! connections from the dispatcher and the operators are serialized at
//! the point of mutation. A run ends once the completion notice has
//! arrived and every dispatched request is accounted for; the run is then
//! persisted and the state reset for the next one. Traffic tagged with
//! the run tag of a recently closed run is flagged and dropped, so it can
//! neither reopen the results file nor leak into the next run.

pub mod state;

pub use state::AggregationState;

use crate::error::ProtocolViolation;
use crate::models::{CompletionNotice, Message, Outcome, Reply, RunSummary, RunTag};
use crate::report::OutcomeStore;
use crate::transport::Handler;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounded mailbox size; senders wait when the actor falls behind.
const MAILBOX_CAPACITY: usize = 1024;

/// Number of closed run tags remembered.
const CLOSED_RUN_MEMORY: usize = 64;

enum Inbound {
    Outcome(Outcome, oneshot::Sender<Reply>),
    Completion(CompletionNotice, oneshot::Sender<Reply>),
}

impl Inbound {
    fn origin(&self) -> (RunTag, &'static str) {
        match self {
            Inbound::Outcome(outcome, _) => (outcome.run, "outcome"),
            Inbound::Completion(notice, _) => (notice.run, "completion"),
        }
    }

    fn acknowledge(self, reply: Reply) {
        let (Inbound::Outcome(_, ack) | Inbound::Completion(_, ack)) = self;
        let _ = ack.send(reply);
    }
}

/// Receiving end of the aggregator mailbox.
pub struct Mailbox {
    rx: mpsc::Receiver<Inbound>,
}

/// Cloneable front of the aggregator actor.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Inbound>,
}

impl AggregatorHandle {
    /// Hand an outcome to the actor and wait until it has been applied.
    pub async fn submit_outcome(&self, outcome: Outcome) -> Reply {
        self.submit(|ack| Inbound::Outcome(outcome, ack)).await
    }

    /// Hand a completion notice to the actor and wait until it has been applied.
    pub async fn submit_completion(&self, notice: CompletionNotice) -> Reply {
        self.submit(|ack| Inbound::Completion(notice, ack)).await
    }

    async fn submit<F>(&self, inbound: F) -> Reply
    where
        F: FnOnce(oneshot::Sender<Reply>) -> Inbound,
    {
        let (ack, reply) = oneshot::channel();
        if self.tx.send(inbound(ack)).await.is_err() {
            return Reply::rejected("aggregator stopped");
        }
        reply
            .await
            .unwrap_or_else(|_| Reply::rejected("aggregator stopped"))
    }
}

#[async_trait]
impl Handler for AggregatorHandle {
    async fn handle(&self, message: Message) -> Reply {
        match message {
            Message::Outcome(outcome) => self.submit_outcome(outcome).await,
            Message::Completion(notice) => self.submit_completion(notice).await,
            Message::Request(request) => {
                warn!("Aggregator received request {} directly", request.id);
                Reply::rejected("aggregator does not accept requests")
            }
        }
    }
}

/// Create a connected handle/mailbox pair.
pub fn mailbox() -> (AggregatorHandle, Mailbox) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    (AggregatorHandle { tx }, Mailbox { rx })
}

/// Actor owning the aggregation state and the results store.
pub struct Aggregator<S> {
    state: AggregationState,
    store: S,
    completed_runs: u64,
    current_run: Option<RunTag>,
    closed_runs: VecDeque<RunTag>,
}

impl<S: OutcomeStore> Aggregator<S> {
    pub fn new(store: S) -> Self {
        Self {
            state: AggregationState::new(),
            store,
            completed_runs: 0,
            current_run: None,
            closed_runs: VecDeque::with_capacity(CLOSED_RUN_MEMORY),
        }
    }

    /// Spawn the actor. Summaries of completed runs are published on the
    /// returned receiver; the task ends once every handle is dropped.
    pub fn spawn(self) -> (AggregatorHandle, mpsc::UnboundedReceiver<RunSummary>, JoinHandle<()>) {
        let (handle, mailbox) = mailbox();
        let (summary_tx, summary_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(mailbox, summary_tx));
        (handle, summary_rx, task)
    }

    /// Process runs until the mailbox closes.
    pub async fn run(mut self, mut mailbox: Mailbox, summaries: mpsc::UnboundedSender<RunSummary>) {
        while let Some(summary) = self.run_once(&mut mailbox).await {
            if summaries.send(summary).is_err() {
                debug!("No summary listener");
            }
        }
        info!("Aggregator mailbox closed after {} run(s)", self.completed_runs);
    }

    /// Process messages until the current run terminates.
    ///
    /// Returns `None` if the mailbox closes first.
    pub async fn run_once(&mut self, mailbox: &mut Mailbox) -> Option<RunSummary> {
        while let Some(inbound) = mailbox.rx.recv().await {
            self.apply(inbound);
            if self.state.is_complete() {
                return Some(self.finalize());
            }
        }
        None
    }

    fn apply(&mut self, inbound: Inbound) {
        let (run, kind) = inbound.origin();
        if self.closed_runs.contains(&run) {
            warn!(
                "Protocol violation: {}",
                ProtocolViolation::ClosedRun { run, kind }
            );
            inbound.acknowledge(Reply::Accepted);
            return;
        }
        self.open_run(run);

        match inbound {
            Inbound::Outcome(outcome, ack) => {
                match self.state.record(&outcome) {
                    Ok(()) => {
                        debug!(
                            "Outcome {} stored ({} received)",
                            outcome.request_id,
                            self.state.received()
                        );
                        if let Err(e) = self.store.append(&outcome) {
                            error!("Failed to persist outcome {}: {:#}", outcome.request_id, e);
                        }
                    }
                    Err(violation) => warn!("Protocol violation: {}", violation),
                }
                let _ = ack.send(Reply::Accepted);
            }
            Inbound::Completion(notice, ack) => {
                match self.state.observe_completion(notice) {
                    Ok(()) => info!(
                        "Completion notice: expecting {} outcomes, {} received so far",
                        self.state.expected().unwrap_or(notice.total_dispatched),
                        self.state.received()
                    ),
                    Err(violation) => warn!("Protocol violation: {}", violation),
                }
                let _ = ack.send(Reply::Accepted);
            }
        }
    }

    fn open_run(&mut self, run: RunTag) {
        match self.current_run {
            Some(current) if current == run => return,
            Some(current) => {
                warn!("Message tagged {} counted in open run {}", run, current);
                return;
            }
            None => {}
        }
        self.current_run = Some(run);
        info!("Run {} started (tag {})", self.completed_runs + 1, run);
        if let Err(e) = self.store.begin_run() {
            error!("Failed to open results store: {:#}", e);
        }
    }

    fn finalize(&mut self) -> RunSummary {
        self.completed_runs += 1;
        let summary = self.state.finalize(self.completed_runs);

        for violation in &summary.violations {
            if let ProtocolViolation::ExcessOutcomes { .. } = violation {
                warn!("Protocol violation: {}", violation);
            }
        }

        if let Err(e) = self.store.finish_run(&summary) {
            error!("Failed to write run summary: {:#}", e);
        }
        if let Some(run) = self.current_run.take() {
            if self.closed_runs.len() == CLOSED_RUN_MEMORY {
                self.closed_runs.pop_front();
            }
            self.closed_runs.push_back(run);
        }

        info!(
            "Run {} finalized: {} of {} outcomes received",
            summary.run, summary.received, summary.expected
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Operation, Request, Status};
    use crate::operator::compute;
    use crate::report::generator::HEADER;
    use crate::report::CsvStore;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn outcome(id: u64, operation: Operation, a: f64, b: f64) -> Outcome {
        outcome_in(0, id, operation, a, b)
    }

    fn outcome_in(run: RunTag, id: u64, operation: Operation, a: f64, b: f64) -> Outcome {
        compute(&Request::new(id, operation, a, b).in_run(run))
    }

    fn notice(total: u64) -> CompletionNotice {
        CompletionNotice::new(0, total)
    }

    fn results_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        (dir, path)
    }

    /// Data rows between the header and the blank separator line.
    fn data_rows(path: &Path) -> Vec<String> {
        let content = std::fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(HEADER));
        lines
            .take_while(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    async fn next_summary(rx: &mut mpsc::UnboundedReceiver<RunSummary>) -> RunSummary {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("run did not finish")
            .expect("aggregator stopped")
    }

    #[tokio::test]
    async fn test_scenario_with_division_by_zero() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        // Outcomes arrive out of order, the notice in the middle.
        assert_eq!(
            handle.submit_outcome(outcome(3, Operation::Div, 7.0, 0.0)).await,
            Reply::Accepted
        );
        handle.submit_completion(notice(3)).await;
        handle.submit_outcome(outcome(1, Operation::Add, 5.0, 3.0)).await;
        handle.submit_outcome(outcome(2, Operation::Div, 10.0, 2.0)).await;

        let summary = next_summary(&mut summaries).await;
        assert_eq!(summary.received, 3);
        assert_eq!(summary.expected, 3);
        assert_eq!(summary.per_operation.get(Operation::Div).count, 2);
        assert_eq!(summary.per_operation.get(Operation::Div).errors, 1);
        assert!(summary.violations.is_empty());

        let rows = data_rows(&path);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("3,7,0,/,0,DIVISION_BY_ZERO,"));
        assert!(rows[1].starts_with("1,5,3,+,8,OK,"));
        assert!(rows[2].starts_with("2,10,2,/,5,OK,"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("\nSummary\n").count(), 1);
    }

    #[tokio::test]
    async fn test_empty_run_terminates_immediately() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        handle.submit_completion(notice(0)).await;
        let summary = next_summary(&mut summaries).await;

        assert_eq!(summary.received, 0);
        assert_eq!(summary.average_elapsed, Duration::ZERO);
        assert!(data_rows(&path).is_empty());
    }

    #[tokio::test]
    async fn test_does_not_terminate_without_notice() {
        let (_dir, path) = results_path();
        let mut aggregator = Aggregator::new(CsvStore::new(&path));
        let (handle, mut mailbox) = mailbox();

        let sender = tokio::spawn(async move {
            handle.submit_outcome(outcome(1, Operation::Add, 1.0, 1.0)).await;
            handle.submit_outcome(outcome(2, Operation::Sub, 1.0, 1.0)).await;
        });

        // The handle is dropped after two outcomes; no notice ever arrives.
        assert!(aggregator.run_once(&mut mailbox).await.is_none());
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_conflicting_notice_is_flagged_not_fatal() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        handle.submit_outcome(outcome(1, Operation::Mul, 2.0, 2.0)).await;
        handle.submit_outcome(outcome(1, Operation::Mul, 2.0, 2.0)).await;
        handle.submit_completion(notice(2)).await;
        handle.submit_completion(notice(7)).await;
        handle.submit_outcome(outcome(2, Operation::Mul, 3.0, 2.0)).await;

        let summary = next_summary(&mut summaries).await;
        assert_eq!(summary.expected, 2);
        assert_eq!(summary.received, 2);
        assert_eq!(
            summary.violations,
            vec![
                ProtocolViolation::DuplicateOutcome(1),
                ProtocolViolation::ConflictingCompletion { kept: 2, ignored: 7 },
            ]
        );
        assert_eq!(data_rows(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_senders_are_all_counted() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        let mut senders = Vec::new();
        for worker in 0..4u64 {
            let handle = handle.clone();
            senders.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    let id = worker * 50 + i + 1;
                    let op = Operation::ROUTABLE[(id % 4) as usize];
                    handle.submit_outcome(outcome(id, op, id as f64, 1.0)).await;
                }
            }));
        }
        handle.submit_completion(notice(200)).await;
        for sender in senders {
            sender.await.unwrap();
        }

        let summary = next_summary(&mut summaries).await;
        assert_eq!(summary.received, 200);
        let per_op: u64 = summary.per_operation.iter().map(|(_, s)| s.count).sum();
        assert_eq!(per_op, 200);
        assert_eq!(data_rows(&path).len(), 200);
    }

    #[tokio::test]
    async fn test_state_resets_between_runs() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        for id in 1..=3 {
            handle.submit_outcome(outcome(id, Operation::Add, 1.0, 1.0)).await;
        }
        handle.submit_completion(notice(3)).await;
        let first = next_summary(&mut summaries).await;
        assert_eq!(first.run, 1);
        assert_eq!(data_rows(&path).len(), 3);

        // Ids restart in a new run and must not be taken for duplicates.
        handle.submit_outcome(outcome_in(1, 1, Operation::Sub, 5.0, 1.0)).await;
        handle.submit_completion(CompletionNotice::new(1, 1)).await;
        let second = next_summary(&mut summaries).await;

        assert_eq!(second.run, 2);
        assert_eq!(second.received, 1);
        assert!(second.violations.is_empty());
        assert_eq!(second.per_operation.get(Operation::Add).count, 0);

        let rows = data_rows(&path);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("1,5,1,-,4,OK,"));
    }

    #[tokio::test]
    async fn test_late_traffic_for_closed_run_is_dropped() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        for id in 1..=3 {
            handle.submit_outcome(outcome(id, Operation::Add, 1.0, 1.0)).await;
        }
        handle.submit_completion(notice(3)).await;
        next_summary(&mut summaries).await;
        let persisted = std::fs::read_to_string(&path).unwrap();
        assert!(persisted.contains("\nSummary\n"));

        // A repeat, an outcome the dispatcher never counted, and a repeated notice.
        let late = [
            handle.submit_outcome(outcome(3, Operation::Add, 1.0, 1.0)).await,
            handle.submit_outcome(outcome(4, Operation::Mul, 2.0, 2.0)).await,
            handle.submit_completion(notice(3)).await,
        ];
        assert!(late.iter().all(|reply| *reply == Reply::Accepted));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), persisted);

        handle.submit_outcome(outcome_in(7, 1, Operation::Sub, 3.0, 1.0)).await;
        handle.submit_outcome(outcome_in(7, 2, Operation::Sub, 3.0, 2.0)).await;
        handle.submit_completion(CompletionNotice::new(7, 2)).await;
        let next = next_summary(&mut summaries).await;

        assert_eq!(next.run, 2);
        assert_eq!(next.received, 2);
        assert!(next.violations.is_empty());
        assert_eq!(next.per_operation.get(Operation::Add).count, 0);
        assert_eq!(next.per_operation.get(Operation::Mul).count, 0);
        assert_eq!(data_rows(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_handler_rejects_requests() {
        let (_dir, path) = results_path();
        let (handle, _summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        let reply = handle
            .handle(Message::Request(Request::new(1, Operation::Add, 1.0, 1.0)))
            .await;
        assert!(matches!(reply, Reply::Rejected { .. }));

        let reply = handle
            .handle(Message::Outcome(outcome(1, Operation::Unknown, 1.0, 1.0)))
            .await;
        assert_eq!(reply, Reply::Accepted);
    }

    #[tokio::test]
    async fn test_unknown_operation_outcome_is_counted() {
        let (_dir, path) = results_path();
        let (handle, mut summaries, _task) = Aggregator::new(CsvStore::new(&path)).spawn();

        let unknown = outcome(1, Operation::Unknown, 1.0, 1.0);
        assert_eq!(unknown.status, Status::UnknownOperation);
        handle.submit_outcome(unknown).await;
        handle.submit_completion(notice(1)).await;

        let summary = next_summary(&mut summaries).await;
        assert_eq!(summary.per_operation.get(Operation::Unknown).errors, 1);
    }
}
