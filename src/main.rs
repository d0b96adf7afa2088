use anyhow::Result;
use sensor_etl::*;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    tracing::info!(version = version::VERSION, "{} starting", version::NAME);

    let app_config = config::AppConfig::load()?;

    let source = source_repo::SourceRepo::connect(&app_config.source.path).await?;
    source.init().await?;
    let sink = sink_repo::SinkRepo::connect(&app_config.sink.path).await?;
    sink.init().await?;
    let checkpoints = checkpoint_repo::CheckpointRepo::connect(&app_config.checkpoint.path).await?;
    checkpoints.init().await?;

    // Interrupts stop the run at the next chunk boundary; the checkpoint
    // keeps the last committed watermark so the next invocation resumes.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, stopping at next chunk boundary");
        let _ = cancel_tx.send(true);
    });

    let runner = runner::Runner::new(&source, &sink, &checkpoints, &app_config, cancel_rx);
    let result = runner.run(None).await;

    // Terminal summary as one JSON line; an external notifier picks this up.
    match serde_json::to_string(&result) {
        Ok(json) => tracing::info!(result = %json, "run finished"),
        Err(e) => tracing::warn!(error = %e, "could not serialize run result"),
    }

    if result.status != models::RunStatus::Complete {
        anyhow::bail!(
            "run failed ({} errors, {} records skipped)",
            result.errors_total,
            result.records_skipped
        );
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
