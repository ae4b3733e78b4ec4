//! Print every event of an event hub and checkpoint it.
use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eventhub_consumer::config::Config;
use eventhub_consumer::handler::PrintingHandler;
use eventhub_consumer::metrics::{probe_router, serve, setup_metrics_routes};
use eventhub_consumer::service;

/// Register the SIGTERM and SIGINT handlers, returning a future that
/// resolves on the first of them.
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };

        info!("Shutting down gracefully...");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the event lines, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness.register("eventhub-consumer", time::Duration::seconds(60));

    let router = setup_metrics_routes(probe_router(liveness))
        .context("failed to install the metrics recorder")?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve metrics on {}: {}", bind, e);
        }
    });

    let shutdown = shutdown_signal().context("failed to register shutdown signal handlers")?;
    let handler = Arc::new(PrintingHandler::stdout());
    service::run(&config, handler, consumer_liveness, shutdown)
        .await
        .context("event hub consumer failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_waits_for_a_signal() {
        let shutdown = shutdown_signal().expect("failed to register signal handlers");

        assert!(tokio::time::timeout(Duration::from_millis(50), shutdown)
            .await
            .is_err());
    }
}
