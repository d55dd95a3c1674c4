//! Runs the order producer and both consumer groups.
//!
//! Configuration comes from `PIPELINE_*` environment variables; see
//! `Settings`. `PIPELINE_ROLE` selects a single role per process, the default
//! runs all three as independent tasks. Press Ctrl+C to stop.

use order_pipeline::{
    Consumer, GroupConnector, InventoryHandler, KafkaConnector, KafkaPublisher, MemoryBroker,
    MemoryStockLedger, NotificationHandler, OrderGenerator, PipelineError, Producer, Publisher,
    Settings, ShutdownHandle, SimulatedMailer, TransportKind,
};
use std::future::Future;
use std::io;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    init_tracing(settings.log_json);

    info!(
        role = ?settings.role,
        transport = ?settings.transport,
        brokers = %settings.brokers,
        topic = %settings.topic,
        "Starting order pipeline"
    );

    let shutdown = ShutdownHandle::new();
    tokio::spawn(forward_signal(signal::ctrl_c(), shutdown.clone()));

    match settings.transport {
        TransportKind::Kafka => {
            let publisher = KafkaPublisher::new(&settings.brokers, settings.publish_timeout())?;
            let connector = KafkaConnector::new(&settings.brokers);
            run_roles(&settings, publisher, connector, shutdown).await?;
        }
        TransportKind::Memory => {
            let broker = MemoryBroker::new(settings.memory_partitions);
            run_roles(&settings, broker.clone(), broker, shutdown).await?;
        }
    }

    info!("Order pipeline shut down gracefully");
    Ok(())
}

/// Triggers `shutdown` once `signal` fires. A listener that fails to install
/// leaves the pipeline running.
async fn forward_signal<F>(signal: F, shutdown: ShutdownHandle)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Received shutdown signal (Ctrl+C)");
    shutdown.shutdown().await;
}

/// Spawns one task per enabled role and waits for all of them. A role that
/// stops with an error is logged; the others keep running.
async fn run_roles<P, C>(
    settings: &Settings,
    publisher: P,
    connector: C,
    shutdown: ShutdownHandle,
) -> anyhow::Result<()>
where
    P: Publisher + 'static,
    C: GroupConnector + Clone + 'static,
    C::Subscription: 'static,
{
    let mut tasks: JoinSet<(&'static str, Result<(), PipelineError>)> = JoinSet::new();

    if settings.role.runs_producer() {
        let producer =
            Producer::new(settings.producer_config(), publisher)?.with_shutdown(shutdown.clone());
        tasks.spawn(async move {
            producer.run(OrderGenerator::new()).await;
            ("producer", Ok(()))
        });
    }

    if settings.role.runs_inventory() {
        let consumer = Consumer::new(
            settings.inventory_config(),
            connector.clone(),
            InventoryHandler::new(MemoryStockLedger::new()),
        )?
        .with_shutdown(shutdown.clone());
        tasks.spawn(async move { ("inventory", consumer.run().await.map(|_| ())) });
    }

    if settings.role.runs_notifications() {
        let consumer = Consumer::new(
            settings.notification_config(),
            connector,
            NotificationHandler::new(SimulatedMailer::new(settings.notification_latency())),
        )?
        .with_shutdown(shutdown);
        tasks.spawn(async move { ("notifications", consumer.run().await.map(|_| ())) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((role, Ok(()))) => info!(role, "Role finished"),
            Ok((role, Err(e))) => error!(role, "Role stopped: {}", e),
            Err(e) => error!("Role task failed: {}", e),
        }
    }
    Ok(())
}
