use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vordr::blocking::FilterList;
use vordr::config::DnsConfig;
use vordr::resolver::UdpUpstream;
use vordr::server::DnsServer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first to get runtime settings.
    let config = DnsConfig::from_env()?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    if config.worker_threads > 0 {
        runtime_builder.worker_threads(config.worker_threads);
    }

    let runtime = runtime_builder
        .enable_all()
        .thread_name("vordr-worker")
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: DnsConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vordr=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Vordr DNS forwarder starting up");
    info!(
        bind_addr = %config.bind_addr,
        upstream = %config.upstream_server,
        blocking_mode = ?config.blocking_mode,
        "configuration loaded"
    );

    let filter = Arc::new(FilterList::new());
    if config.blocking_enabled {
        if let Some(path) = &config.blocklist_path {
            if let Err(e) = filter.load_from_file(path) {
                error!(path = %path, error = %e, "failed to load blocklist");
                return Err(e.into());
            }
        }
        info!(blocked_domains = filter.len(), "filter ready");
    } else {
        info!("blocking disabled");
    }

    let upstream = Arc::new(UdpUpstream::new(config.upstream_server));
    let server = Arc::new(DnsServer::new(config.clone(), filter, upstream));

    let (shutdown_tx, _) = broadcast::channel(1);

    // Periodic cache sweep.
    let sweep_cache = Arc::clone(server.cache());
    let sweep_interval = config.cache_config.sweep_interval;
    let mut sweep_shutdown = shutdown_tx.subscribe();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => sweep_cache.clean(),
                _ = sweep_shutdown.recv() => break,
            }
        }
    });

    // Periodic statistics summary.
    let stats = Arc::clone(server.stats());
    let stats_interval = config.stats_log_interval;
    let mut stats_shutdown = shutdown_tx.subscribe();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => stats.log_summary(),
                _ = stats_shutdown.recv() => break,
            }
        }
    });

    let listener = tokio::spawn(Arc::clone(&server).run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    if shutdown_tx.send(()).is_err() {
        warn!("no tasks listening for shutdown");
    }

    let _ = listener.await;
    let _ = sweep_task.await;
    let _ = stats_task.await;

    server.stats().log_summary();
    info!("Vordr stopped");
    Ok(())
}
