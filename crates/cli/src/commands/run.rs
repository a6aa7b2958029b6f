//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::PipelineConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::pipeline::Pipeline;
use crate::settings::resolve_config;

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let config = resolve_config(args.config.as_deref(), &args.overrides)?;

    info!(
        broker = ?config.broker.kind,
        topic = %config.broker.topic,
        storage = ?config.storage.kind,
        workers = config.workers.count,
        intake_capacity = config.intake.capacity,
        drop_on_abort = config.shutdown.drop_on_abort,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let pipeline = Pipeline::new(config);
    let signals = spawn_signal_listener(pipeline.cancel_token());

    info!("Starting pipeline...");
    let result = pipeline.run().await;
    signals.abort();

    let stats = result.context("Pipeline execution failed")?;
    let summary = stats.summary();
    observability::record_run_summary(&summary);
    info!(
        persisted = summary.persisted,
        failed = summary.failed,
        discarded = summary.discarded,
        duration_secs = summary.duration.as_secs_f64(),
        throughput = format!("{:.2}", summary.throughput()),
        "Pipeline stopped"
    );
    stats.print_summary();

    info!("Metrics consumer finished");
    Ok(())
}

/// Cancel the pipeline on the first SIGINT/SIGTERM
///
/// Later signals are logged and ignored while the shutdown protocol runs.
fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut terminate = TerminateSignal::install();
        loop {
            let signal = tokio::select! {
                received = tokio::signal::ctrl_c() => match received {
                    Ok(()) => "SIGINT",
                    Err(e) => {
                        warn!(error = %e, "Failed to listen for Ctrl+C");
                        return;
                    }
                },
                _ = terminate.recv() => "SIGTERM",
            };

            if cancel.is_cancelled() {
                warn!(signal, "Shutdown already in progress, ignoring signal");
            } else {
                info!(signal, "Received termination signal, shutting down");
                cancel.cancel();
            }
        }
    })
}

/// SIGTERM listener (never fires off unix or when installation failed)
struct TerminateSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl TerminateSignal {
    fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let inner = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    None
                }
            };
            Self { inner }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(ref mut inner) = self.inner {
            if inner.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &PipelineConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Broker:");
    println!("  Kind: {:?}", config.broker.kind);
    if let Some(ref path) = config.broker.path {
        println!("  Path: {}", path.display());
    }
    println!("  Topic: {}", config.broker.topic);
    println!("  Consumer group: {}", config.broker.consumer_group);
    println!("  Offset reset: {:?}", config.broker.auto_offset_reset);
    println!("  Ack policy: {:?}", config.broker.ack_policy);

    println!("\nPipeline:");
    println!("  Intake capacity: {}", config.intake.capacity);
    println!(
        "  Workers: {} (queue {})",
        config.workers.count, config.workers.queue_capacity
    );
    println!("  Shutdown: {:?}", config.shutdown.policy());

    println!("\nStorage:");
    println!("  Kind: {:?}", config.storage.kind);
    println!(
        "  Connections: {}..{} (acquire timeout {}ms)",
        config.storage.min_connections,
        config.storage.max_connections,
        config.storage.acquire_timeout_ms
    );

    println!();
}
