use anyhow::Context as _;
use oktabeat::beater::lifecycle::Lifecycle;
use oktabeat::beater::Oktabeat;
use oktabeat::config::{config_path_from_env, Config};
use oktabeat::logging;
use oktabeat::server::{
    create_metrics, run_health_server, shutdown_channel, ShutdownReason, SignalListener,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config errors surface on stderr through anyhow, before logging exists
    let config_path = config_path_from_env();
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let log_file = logging::init(&config.logging)?;
    info!(
        config = %config_path.display(),
        log_file = ?log_file,
        "Starting oktabeat"
    );
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    // Handlers must be in place before the readiness marker is written
    let mut signals = SignalListener::register().context("registering signal handlers")?;

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let lifecycle = Lifecycle::new();
    let metrics = create_metrics().context("creating metrics registry")?;

    let health_handle = if config.http.enabled {
        let host = config.http.host.clone();
        let port = config.http.port;
        let lifecycle = lifecycle.clone();
        let metrics = metrics.clone();
        let shutdown = shutdown_signal.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_health_server(&host, port, lifecycle, metrics, shutdown).await {
                warn!(error = %e, "Monitoring server failed");
            }
        }))
    } else {
        None
    };

    let beat = match Oktabeat::new(&config, lifecycle.clone(), Some(metrics)).await {
        Ok(beat) => beat,
        Err(e) => {
            error!(error = %e, "Failed to initialize oktabeat");
            shutdown_controller.shutdown(ShutdownReason::StartupFailed);
            return Err(e.into());
        }
    };
    let mut beat_handle = tokio::spawn(beat.run(shutdown_signal));

    let (reason, finished_early) = tokio::select! {
        signal = signals.recv() => {
            info!(signal = %signal, "Initiating graceful shutdown");
            (ShutdownReason::Signal(signal), None)
        }
        result = &mut beat_handle => (ShutdownReason::BeatExited, Some(result)),
    };

    shutdown_controller.shutdown(reason);
    let result = match finished_early {
        Some(result) => result,
        None => beat_handle.await,
    };

    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    match result {
        Ok(Ok(stats)) => {
            info!(
                published = stats.published,
                dropped = stats.dropped,
                "oktabeat shut down gracefully"
            );
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "oktabeat stopped with an error");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "oktabeat task panicked");
            Err(anyhow::anyhow!("beat task failed: {}", e))
        }
    }
}
