use crate::camera::{Camera, FramePoller};
use crate::config::Config;
use crate::display::{DisplaySurface, HighGuiWindow, Renderer};
use crate::prediction::{InferenceClient, InferencePoller};
use crate::shutdown::ShutdownSignal;
use crate::state::SharedState;

use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tokio::{signal, task::JoinHandle, time::timeout};

/// Runs the capture and inference loops in the background and the render loop
/// on the calling thread until the window is closed or the process is asked
/// to stop.
pub fn run_app(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;

    let camera = match Camera::open(&config.camera) {
        Ok(cam) => Arc::new(cam),
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };
    let client = Arc::new(InferenceClient::new(&config.inference));
    tracing::info!(endpoint = client.endpoint(), "Inference client ready");

    let window = HighGuiWindow::open(&config.display.window_title)
        .context("failed to open display window")?;

    let state = Arc::new(SharedState::new());
    let shutdown = ShutdownSignal::new();

    let workers = {
        let _guard = runtime.enter();
        let capture_handle = FramePoller::new(camera.clone(), state.clone(), &config.camera)
            .spawn(shutdown.subscribe());
        let inference_handle = InferencePoller::new(client, state.clone(), &config.inference)
            .spawn(shutdown.subscribe());

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown.");
                shutdown.trigger();
            }
        });

        vec![("capture", capture_handle), ("inference", inference_handle)]
    };

    let mut renderer = Renderer::new(state, window, config.display.get_refresh_delay());
    let render_result = renderer.run(&shutdown.subscribe());

    shutdown.trigger();
    if let Err(e) = camera.release() {
        tracing::error!("Failed to release camera: {}", e);
    }
    if let Err(e) = renderer.into_surface().close() {
        tracing::error!("Failed to close display window: {}", e);
    }

    let grace = config.get_shutdown_grace();
    runtime.block_on(join_workers(workers, grace));
    runtime.shutdown_timeout(grace);
    tracing::info!("Shutdown complete");

    render_result.context("render loop failed")
}

async fn join_workers(workers: Vec<(&'static str, JoinHandle<()>)>, grace: Duration) {
    for (name, handle) in workers {
        match timeout(grace, handle).await {
            Ok(Ok(())) => tracing::info!(worker = name, "Worker stopped"),
            Ok(Err(e)) => tracing::error!(worker = name, "Worker failed: {}", e),
            Err(_) => tracing::warn!(worker = name, "Worker did not stop within {:?}", grace),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_workers_tolerates_stuck_worker() {
        let finished = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());

        timeout(
            Duration::from_secs(1),
            join_workers(
                vec![("finished", finished), ("stuck", stuck)],
                Duration::from_millis(20),
            ),
        )
        .await
        .unwrap();
    }
}
