//! Dispatcher: turns input entries into routed requests.
//!
//! Requests are sent one at a time in increasing id order. Only requests
//! an operator acknowledged count toward the completion notice, so the
//! aggregator's termination arithmetic matches what was really delivered.

pub mod input;

pub use input::{parse_line, Entry};

use crate::error::{DispatchError, ParseError, TransportError};
use crate::models::{CompletionNotice, Message, Operation, Request, RequestId, RunTag};
use crate::routing::RoutingTable;
use crate::transport::SharedEndpoint;
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Counters kept over one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests acknowledged by an operator.
    pub dispatched: u64,
    /// Entries rejected as malformed.
    pub parse_errors: u64,
    /// Entries whose operation has no route.
    pub unrouted: u64,
    /// Requests whose delivery failed.
    pub transport_errors: u64,
}

/// Single-threaded producer of requests.
pub struct Dispatcher {
    routes: RoutingTable<SharedEndpoint>,
    aggregator: SharedEndpoint,
    run: RunTag,
    next_id: RequestId,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(routes: RoutingTable<SharedEndpoint>, aggregator: SharedEndpoint) -> Self {
        let run = fresh_run_tag();
        debug!("Starting run {}", run);
        Self {
            routes,
            aggregator,
            run,
            next_id: 1,
            stats: DispatchStats::default(),
        }
    }

    /// Tag carried by every message of this run.
    pub fn run(&self) -> RunTag {
        self.run
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Route one entry to the operator bound to its operation.
    ///
    /// An id is consumed by every delivery attempt, so a request that
    /// reached an operator but lost its acknowledgement can never share an
    /// id with a later one.
    pub async fn dispatch(&mut self, entry: &Entry) -> Result<RequestId, DispatchError> {
        let Some(operation) = Operation::from_symbol(&entry.symbol) else {
            self.stats.parse_errors += 1;
            return Err(ParseError::UnknownOperator(entry.symbol.clone()).into());
        };

        let Some(endpoint) = self.routes.route(operation) else {
            self.stats.unrouted += 1;
            return Err(DispatchError::UnknownRoute(operation));
        };

        let id = self.next_id;
        self.next_id += 1;
        let request = Request::new(id, operation, entry.operand1, entry.operand2).in_run(self.run);

        debug!("Sending request {} ({}) to {}", id, operation, endpoint.address());
        match endpoint.deliver(Message::Request(request)).await {
            Ok(()) => {
                self.stats.dispatched += 1;
                Ok(id)
            }
            Err(source) => {
                self.stats.transport_errors += 1;
                Err(DispatchError::Transport { id, source })
            }
        }
    }

    /// Parse and dispatch one input line. Blank lines yield `Ok(None)`.
    pub async fn dispatch_line(&mut self, line: &str) -> Result<Option<RequestId>, DispatchError> {
        let entry = match parse_line(line) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.parse_errors += 1;
                return Err(e.into());
            }
        };

        self.dispatch(&entry).await.map(Some)
    }

    /// Dispatch every line of a batch file.
    pub async fn run_batch(&mut self, path: &Path, show_progress: bool) -> Result<()> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        info!("Processing input file: {}", path.display());

        let lines: Vec<&str> = content.lines().collect();
        let progress = show_progress.then(|| progress_bar(lines.len() as u64));

        for (number, line) in lines.iter().enumerate() {
            if let Err(e) = self.dispatch_line(line).await {
                warn!("Line {} skipped: {}", number + 1, e);
            }
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        Ok(())
    }

    /// Read entries interactively until `exit`, `quit` or end of input.
    pub async fn run_interactive<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        println!("\n=== Interactive Mode ===");
        println!("Enter computations as: operand1,operand2,operation (+, -, *, /)");
        println!("Type 'exit' to finish");

        let mut lines = reader.lines();
        loop {
            print!("\nEnter computation: ");
            std::io::stdout().flush().context("Failed to flush stdout")?;

            let Some(line) = lines.next_line().await.context("Failed to read input")? else {
                break;
            };

            match line.trim() {
                "exit" | "quit" => break,
                _ => {}
            }

            match self.dispatch_line(&line).await {
                Ok(Some(id)) => println!("Request {} dispatched", id),
                Ok(None) => {}
                Err(DispatchError::Parse(e)) => {
                    println!("Invalid entry: {}", e);
                    println!("Example: 5,3,+ or 10,2,*");
                }
                Err(e) => {
                    warn!("{}", e);
                    println!("Not dispatched: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Send the completion notice and end the run.
    ///
    /// Consumes the dispatcher, so a run emits at most one notice.
    pub async fn finish(self) -> Result<DispatchStats, TransportError> {
        let notice = CompletionNotice::new(self.run, self.stats.dispatched);
        info!(
            "Dispatched {} requests ({} malformed, {} undelivered); notifying aggregator",
            self.stats.dispatched, self.stats.parse_errors, self.stats.transport_errors
        );

        self.aggregator.deliver(Message::Completion(notice)).await?;
        Ok(self.stats)
    }
}

/// Wall-clock nanoseconds, bumped past the previous tag so tags handed
/// out in one process never repeat.
fn fresh_run_tag() -> RunTag {
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default();
    let previous = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_default();
    now.max(previous + 1)
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lines")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}
