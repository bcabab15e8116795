use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use gatesim::{
    ReadWriteCount, Simulation, SimulatorOptions, StaticWorkloadCharacteristics,
    TicketedWorkloadDriver,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let options = SimulatorOptions::parse();
    let config = options.build()?;

    let mut simulation = Simulation::new(config)?;
    simulation.setup();

    let characteristics = Arc::new(StaticWorkloadCharacteristics::new(
        ReadWriteCount {
            read: options.optimal_read_concurrency,
            write: options.optimal_write_concurrency,
        },
        Duration::from_millis(options.base_latency_ms),
        Duration::from_millis(options.base_latency_ms),
    ));
    let driver = TicketedWorkloadDriver::new(simulation.queue(), characteristics);

    simulation
        .start(driver, options.readers, options.writers)
        .await?;
    info!(
        readers = options.readers,
        writers = options.writers,
        run_seconds = options.run_seconds,
        "simulation running"
    );

    // First half at the configured shape, then swap the reader/writer mix
    // to exercise a live resize.
    let half = Duration::from_secs(options.run_seconds) / 2;
    simulation.run(half).await;
    simulation.resize(options.writers, options.readers).await?;
    simulation.run(half).await;

    if let Some(metrics) = simulation.metrics().await {
        info!(%metrics, "final workload metrics");
    }
    simulation.teardown().await;
    info!("simulation complete");
    Ok(())
}
