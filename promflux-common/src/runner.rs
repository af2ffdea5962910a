//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::BridgeArgs;
use crate::config::{BridgeConfig, LoggingConfig};
use crate::error::Result;
use crate::init_tracing;

/// Time given to workers to observe cancellation before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of a metrics bridge.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Graceful shutdown on Ctrl+C or SIGTERM
///
/// # Example
///
/// ```ignore
/// use promflux_common::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///
///     let token = runner.cancellation_token();
///     runner.spawn(async move {
///         // Worker logic here, stop when `token` is cancelled
///     });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// The loaded configuration.
    config: C,
    /// Cancelled when shutdown is requested.
    token: CancellationToken,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner and initialize logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION");

        let log_config = match args.and_then(BridgeArgs::log_level_override) {
            Some(level) => LoggingConfig {
                level,
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config)?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        Ok(Self {
            name,
            config,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Token cancelled when the bridge shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a worker task.
    ///
    /// The task is awaited on shutdown and aborted if it outlives the grace period.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C or SIGTERM is received.
    ///
    /// This will:
    /// 1. Wait for a shutdown signal
    /// 2. Cancel the shared token
    /// 3. Wait for workers, aborting any that outlive the grace period
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!(bridge = %self.name, "Received shutdown signal");
            }
            _ = self.token.cancelled() => {
                tracing::info!(bridge = %self.name, "Shutdown requested");
            }
        }

        self.token.cancel();

        for mut task in self.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(bridge = %self.name, "Worker did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    }
}
