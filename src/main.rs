use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use aoi_visibility_server::config::ServerConfig;
use aoi_visibility_server::demo::{CountingSink, DemoWorld};
use aoi_visibility_server::metrics::{self, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("AoI Visibility Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate()?;
    let periods = config.visibility.periods;
    info!(
        "Configuration loaded: {} Hz, periods near={} far={} ray_visible={} ray_hidden={} simple={}, max_observables={}",
        config.tick_rate,
        periods.near,
        periods.far,
        periods.raycast_visible,
        periods.raycast_invisible,
        periods.simple,
        config.visibility.max_observables
    );
    if config.visibility.debug.enabled {
        info!(
            "Ray debug enabled, reporting every {} ticks",
            config.visibility.debug.report_interval_ticks
        );
    }
    if config.visibility.lod.enabled {
        info!(
            "Replication LOD enabled, frequency steps every {} units",
            config.visibility.lod.period_increase_distance
        );
    }

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let seed: u64 = rand::random();
    info!("Demo seed: {}", seed);
    let (mut world, mut scheduler) = DemoWorld::build(config.demo, config.visibility.clone(), seed)?;
    let sender = scheduler.sender();

    let tick_rate = config.tick_rate as u64;
    let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate as f64);
    let debug_interval = config.visibility.debug.report_interval_ticks.max(1);
    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    tokio::pin!(shutdown);

    info!("Visibility loop started at {} Hz", config.tick_rate);
    let start = Instant::now();
    let mut sink = CountingSink::default();
    let mut tick_count: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                tick_count += 1;

                // One despawn/respawn per second keeps ids cycling
                if tick_count % tick_rate == 0 {
                    if let Err(e) = world.churn(&sender) {
                        warn!("Churn skipped: {}", e);
                    }
                }
                world.step();

                let report = scheduler.tick(world.transforms(), &mut sink)?;
                metrics.record_tick(&report, tick_duration);
                metrics
                    .visible_pairs
                    .store(scheduler.visible_pairs() as u64, Ordering::Relaxed);

                if report.duration > tick_duration {
                    debug!(
                        "Frame {} over budget: {:?} ({} rays)",
                        report.frame, report.duration, report.ray_casts
                    );
                }

                if scheduler.instrumentation().is_enabled() && tick_count % debug_interval == 0 {
                    match scheduler.instrumentation().segments_json() {
                        Ok(json) => metrics.set_debug_rays(json),
                        Err(e) => warn!("Failed to encode ray segments: {}", e),
                    }
                }

                // Log stats periodically (every 30 seconds)
                if tick_count % (tick_rate * 30) == 0 {
                    info!(
                        "Visibility: {}s, frame {}, {} observers, {} observables, {} visible pairs | {} rays/tick, tick {}us (p99 {}us) | +{} -{} transitions, {} frequency updates",
                        start.elapsed().as_secs(),
                        report.frame,
                        report.observers,
                        report.observables,
                        metrics.visible_pairs.load(Ordering::Relaxed),
                        report.ray_casts,
                        metrics.tick_time_us.load(Ordering::Relaxed),
                        metrics.tick_time_p99_us.load(Ordering::Relaxed),
                        sink.shown,
                        sink.hidden,
                        sink.frequency_updates
                    );
                }
            }
        }
    }

    info!(
        "Server stopped after {} ticks ({} transitions published)",
        tick_count,
        sink.shown + sink.hidden
    );

    Ok(())
}
