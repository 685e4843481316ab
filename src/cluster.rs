//! Role assembly: wiring dispatcher, operators and aggregator together,
//! either in one process or as TCP services.

use crate::aggregator::Aggregator;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::models::{Operation, RunSummary};
use crate::operator::OperatorService;
use crate::report::{CsvStore, OutcomeStore};
use crate::routing::RoutingTable;
use crate::transport::{serve, LocalEndpoint, SharedEndpoint, TcpEndpoint};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Whole cluster in one process over the in-process transport.
pub struct LocalCluster {
    dispatcher: Dispatcher,
    summaries: mpsc::UnboundedReceiver<RunSummary>,
    aggregator_task: JoinHandle<()>,
}

impl LocalCluster {
    /// Start an aggregator on `store` and one operator per routable kind.
    pub fn start<S: OutcomeStore>(store: S) -> Self {
        let (handle, summaries, aggregator_task) = Aggregator::new(store).spawn();
        let aggregator: SharedEndpoint =
            Arc::new(LocalEndpoint::new("local://aggregator", Arc::new(handle)));

        let mut routes: RoutingTable<SharedEndpoint> = RoutingTable::new();
        for operation in Operation::ROUTABLE {
            let service = OperatorService::new(operation, Arc::clone(&aggregator));
            let endpoint = LocalEndpoint::new(
                format!("local://operator/{}", operation.name()),
                Arc::new(service),
            );
            routes.insert(operation, Arc::new(endpoint));
        }

        Self {
            dispatcher: Dispatcher::new(routes, aggregator),
            summaries,
            aggregator_task,
        }
    }

    pub fn dispatcher(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Send the completion notice and wait for the aggregator to close the run.
    pub async fn finish(mut self) -> Result<(DispatchStats, RunSummary)> {
        let stats = self
            .dispatcher
            .finish()
            .await
            .context("Failed to notify the aggregator")?;
        let summary = self
            .summaries
            .recv()
            .await
            .context("Aggregator stopped before the run completed")?;

        // Every handle went away with the dispatcher and the operators.
        self.aggregator_task
            .await
            .context("Aggregator task failed")?;
        Ok((stats, summary))
    }
}

/// Build TCP endpoints for every routed address.
pub fn connect_routes(table: RoutingTable<String>, timeout: Duration) -> RoutingTable<SharedEndpoint> {
    table.map(|_, address| Arc::new(TcpEndpoint::new(address, timeout)) as SharedEndpoint)
}

/// Run the aggregator service on `listener` until `shutdown` resolves.
/// `on_summary` is called with every completed run.
pub async fn serve_aggregator<F, C>(
    listener: TcpListener,
    output: PathBuf,
    shutdown: F,
    mut on_summary: C,
) -> Result<()>
where
    F: Future<Output = ()>,
    C: FnMut(RunSummary) + Send + 'static,
{
    let store = CsvStore::new(output);
    info!("Aggregator writing results to {}", store.path().display());
    let (handle, mut summaries, _task) = Aggregator::new(store).spawn();

    tokio::spawn(async move {
        while let Some(summary) = summaries.recv().await {
            on_summary(summary);
        }
    });

    serve(listener, Arc::new(handle), shutdown).await
}

/// Run one operator service on `listener` until `shutdown` resolves.
pub async fn serve_operator<F>(
    listener: TcpListener,
    kind: Operation,
    aggregator_address: String,
    timeout: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let aggregator: SharedEndpoint = Arc::new(TcpEndpoint::new(aggregator_address, timeout));
    let service = OperatorService::new(kind, Arc::clone(&aggregator));
    info!(
        "{} operator forwarding outcomes to {}",
        service.kind(),
        aggregator.address()
    );
    serve(listener, Arc::new(service), shutdown).await
}
