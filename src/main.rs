use anyhow::Result;
use rollup_engine::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

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

    let app_config = config::AppConfig::load()?;
    let clock: Arc<dyn clock::Clock> = Arc::new(clock::SystemClock);

    let repo = Arc::new(
        aggregate_repo::SqliteAggregateRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    repo.init().await?;

    let policy = Arc::new(rollup::RollupPolicy::new(
        app_config.rollup.levels.clone(),
        app_config.rollup.min_level,
        clock.clone(),
    )?);
    let live = Arc::new(live::LiveCollector::new());
    let pool = Arc::new(worker_pool::WorkerPool::new(
        app_config.workers.max_concurrent_queries,
    ));

    let worker_config = rollup_worker::RollupWorkerConfig {
        levels: app_config.rollup.levels.clone(),
        rollup_interval_secs: app_config.rollup.rollup_interval_secs,
        rollup_delay_millis: app_config.rollup.rollup_delay_millis,
        vacuum_schedule: app_config.rollup.vacuum_schedule.clone(),
        vacuum_interval_secs: app_config.rollup.vacuum_interval_secs,
    };
    {
        let repo = repo.clone();
        let clock = clock.clone();
        let worker_config = worker_config.clone();
        pool.submit("backfill", async move {
            backfill::run_backfill(repo, clock, &worker_config)
                .await
                .map(|_| ())
        })
        .await?;
    }
    let rollup_handle = rollup_worker::spawn(repo.clone(), clock.clone(), worker_config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let flush_handle = live::spawn_flush_writer(
        live.clone(),
        repo.clone(),
        clock.clone(),
        live::FlushWriterConfig {
            flush_interval_secs: app_config.live.flush_interval_secs,
            flush_delay_millis: app_config.live.flush_delay_millis,
        },
        shutdown_rx,
    );

    let engine = engine::RollupEngine::new(
        repo.clone(),
        live.clone(),
        policy,
        app_config.chart.engine_settings(),
    );
    let charts = Arc::new(chart::ChartService::new(
        engine,
        app_config.chart.gap_multiplier,
    ));

    let app = routes::app(charts, live, pool.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Received shutdown signal");
    rollup_handle.abort();
    pool.shutdown().await;
    let _ = shutdown_tx.send(());
    let _ = flush_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
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
