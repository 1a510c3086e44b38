//! CLI entrypoint: parses configuration, connects to etcd, and either
//! bootstraps a fresh cluster (`--init`) or joins the checkin loop.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use shardkeeper::config::Cli;
use shardkeeper::store::etcd::EtcdStoreClient;
use shardkeeper::{CoordinatorError, Producer, Sink, WorkerLoop};
use shardkeeper_core::PartitionId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Reads newline-delimited `<id>` lines from stdin, one message per line.
struct StdinProducer {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl StdinProducer {
    fn new() -> Self {
        Self { lines: BufReader::new(tokio::io::stdin()).lines() }
    }
}

#[async_trait]
impl Producer for StdinProducer {
    type Payload = String;

    async fn next(&mut self) -> Option<(u64, String)> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(id) = trimmed.parse::<u64>() {
                return Some((id, line));
            }
        }
    }
}

/// Logs each delivered message. A real deployment swaps this for a sink
/// that writes into the destination system this worker is driving.
struct LoggingSink;

#[async_trait]
impl Sink for LoggingSink {
    type Payload = String;

    async fn deliver(&self, partition: PartitionId, payload: String) -> Result<(), CoordinatorError> {
        info!(%partition, %payload, "delivered");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let endpoints = cli.etcd_endpoints();
    let store = Arc::new(EtcdStoreClient::connect(&endpoints).await?);
    let config = Arc::new(cli.coordinator_config());

    if let Some(total_partitions) = cli.init {
        shardkeeper::init::init(&*store, &config, total_partitions).await?;
        info!(total_partitions, "cluster initialized");
        return Ok(());
    }

    let mut worker = WorkerLoop::new(store, config, shardkeeper_core::WorkerId::new(cli.worker_id), cli.worker_ip);
    let mut producer = StdinProducer::new();
    let sink = LoggingSink;

    let result = tokio::select! {
        result = worker.run(&mut producer, &sink) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            Ok(())
        }
    };

    if let Err(err) = result {
        error!(error = %err, "worker loop exited with an error");
        worker.shutdown().await.ok();
        return Err(err.into());
    }
    worker.shutdown().await?;
    Ok(())
}
