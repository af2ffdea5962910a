//! Prometheus metrics to InfluxDB bridge.
//!
//! Scrapes a Prometheus metrics endpoint or file on a fixed interval and
//! stores the result in an InfluxDB bucket.

use anyhow::Result;
use promflux_common::{BridgeArgs, BridgeConfig, BridgeRunner};

use promflux_bridge_influxdb::{InfluxBridgeConfig, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("promflux.json5");

    // Load configuration; an unreadable or invalid config is fatal
    let config = InfluxBridgeConfig::load(&args.config)
        .map_err(|e| anyhow::anyhow!("Could not load config {}: {}", args.config.display(), e))?;

    let mut runner = BridgeRunner::new_with_args("influxdb", config, Some(&args))
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    // Connect before the loop starts; an unreachable sink is fatal
    let mut scheduler = Scheduler::connect(runner.config())
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!(
        "InfluxDB bridge running (source: {}, interval: {:?}, server: {}, bucket: {})",
        runner.config().metrics,
        scheduler.interval(),
        scheduler.sink().base_url(),
        scheduler.sink().bucket()
    );

    let token = runner.cancellation_token();
    runner.spawn(async move {
        scheduler.run(token).await;
    });

    // Run until Ctrl+C (handles shutdown gracefully)
    runner.run().await.map_err(|e| anyhow::anyhow!("{}", e))
}
