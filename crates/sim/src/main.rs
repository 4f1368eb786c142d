//! Load simulation for the Bulwark engine
//!
//! Submits a batch of jobs to a flaky simulated resource and reports how the
//! engine coped: retries, circuit breaker trips and the final outcome tally.

mod config;
mod resource;
mod summary;

use std::sync::Arc;

use anyhow::{Context, Result};
use bulwark_engine::{Engine, EngineConfig, Task};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SimConfig;
use crate::resource::FlakyResource;
use crate::summary::Summary;

fn init_logging() {
    // Configure via RUST_LOG or LOG_LEVEL (default: info for the bulwark crates)
    let filter = std::env::var("RUST_LOG").ok().unwrap_or_else(|| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        format!("bulwark_engine={level},bulwark_sim={level}")
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let sim = SimConfig::from_env();
    let engine_config = EngineConfig::from_env();

    info!(
        tasks = sim.tasks,
        workers = sim.workers,
        failure_rate = sim.failure_rate,
        outage_ms = sim.outage.as_millis() as u64,
        "bulwark-sim starting"
    );

    let engine = Arc::new(
        Engine::new(FlakyResource::new(&sim), engine_config)
            .context("Invalid engine configuration")?,
    );
    let mut results = engine.results().context("Results stream unavailable")?;
    let mut stats = engine.subscribe_stats();

    engine.start(sim.workers).context("Failed to start engine")?;

    let consumer = tokio::spawn(async move {
        let mut summary = Summary::default();
        while let Some(result) = results.recv().await {
            summary.record(&result);
        }
        summary
    });

    let stats_logger = tokio::spawn(async move {
        while stats.changed().await.is_ok() {
            let snapshot = stats.borrow_and_update().clone();
            info!(
                queue_depth = snapshot.queue_depth,
                busy_workers = snapshot.busy_workers,
                workers = snapshot.workers,
                circuit = %snapshot.circuit_state,
                succeeded = snapshot.succeeded,
                failed = snapshot.failed,
                retried = snapshot.retried,
                "Pool snapshot"
            );
        }
    });

    let mut producer = {
        let engine = Arc::clone(&engine);
        let tasks = sim.tasks;
        tokio::spawn(async move {
            for job in 0..tasks {
                if let Err(err) = engine.submit(Task::new(job)).await {
                    warn!(job, error = %err, "Submission refused, stopping producer");
                    break;
                }
            }
        })
    };

    tokio::select! {
        produced = &mut producer => {
            produced.context("Producer task failed")?;
            info!("All jobs submitted, draining");
            engine.drain().await.context("Drain failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            if let Err(err) = engine.stop(sim.shutdown_grace).await {
                warn!(error = %err, "Shutdown incomplete");
            }
            producer.await.context("Producer task failed")?;
        }
    }

    let summary = consumer.await.context("Result consumer failed")?;
    stats_logger.abort();

    info!(
        total = summary.total(),
        succeeded = summary.succeeded,
        exhausted = summary.exhausted,
        non_retryable = summary.non_retryable,
        cancelled = summary.cancelled,
        mean_attempts = %format!("{:.2}", summary.mean_attempts()),
        mean_elapsed_ms = summary.mean_elapsed().as_millis() as u64,
        circuit = %engine.circuit_state(),
        "Simulation complete"
    );

    Ok(())
}
