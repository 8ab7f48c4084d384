use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use wynn_tracker::api::WynnApi;
use wynn_tracker::config::Config;
use wynn_tracker::engine::Engine;
use wynn_tracker::fetch::HttpFetcher;
use wynn_tracker::notify::{ChannelNotifier, Notification, Notifier};
use wynn_tracker::poll::await_loops;

const CONFIG_FILE: &str = "wynn-tracker.toml";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new(CONFIG_FILE).exists() {
        Config::load(Path::new(CONFIG_FILE))?
    } else {
        Config::from_env()?
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("wynn-tracker v{} starting", env!("CARGO_PKG_VERSION"));
    if !Path::new(CONFIG_FILE).exists() {
        info!("no {} found, using env-only config", CONFIG_FILE);
    }

    let fetcher = HttpFetcher::new(&config.api)?;
    info!(
        base_url = %config.api.base_url,
        calls = config.api.calls_per_period,
        period_secs = config.api.period_secs,
        "API client ready"
    );
    let api = Arc::new(WynnApi::new(fetcher, &config.api.base_url));

    let engine = Engine::new(api, config.tracker.clone());
    engine.ensure_stores().await?;
    info!(
        tracker = %engine.tracker().path().display(),
        advanced = %engine.advanced().path().display(),
        window = %engine.window(),
        "tracker files ready"
    );

    // No chat front end here: notifications are drained into the log.
    let (sink, mut notifications) = ChannelNotifier::new();
    let sink: Arc<dyn Notifier> = Arc::new(sink);

    let autostart = &config.autostart;
    let mut handles = Vec::new();
    if let Some(secs) = autostart.player_tracker_interval_secs {
        match engine.start_player_tracker(Some(Duration::from_secs(secs)), sink.clone()) {
            Ok(h) => handles.push(h),
            Err(e) => warn!(error = %e, "player tracker not started"),
        }
    }
    for world in &autostart.worlds {
        let interval = autostart.world_interval_secs.map(Duration::from_secs);
        match engine.start_world(world, interval, sink.clone()) {
            Ok(h) => handles.push(h),
            Err(e) => warn!(world = %world, error = %e, "world tracker not started"),
        }
    }
    if let Some(secs) = autostart.compare_interval_secs {
        match engine.start_compare("local", "log", Some(Duration::from_secs(secs)), sink.clone()) {
            Ok(h) => handles.push(h),
            Err(e) => warn!(error = %e, "stat comparer not started"),
        }
    }
    info!(loops = handles.len(), "autostart done");

    let mut heartbeat = tokio::time::interval(Duration::from_secs(300));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            Some(notification) = notifications.recv() => {
                match notification {
                    Notification::Sent { handle, text } => {
                        info!(message = handle.0, "{}", text);
                    }
                    Notification::Edited { handle, text } => {
                        debug!(message = handle.0, edited = true, "{}", text);
                    }
                }
            }

            _ = heartbeat.tick() => {
                info!("{}", engine.active_summary());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down...");
                let stopped = engine.stop_all();
                info!(stopped = stopped, "poll loops signalled to stop");
                // Let in-flight cycles finish their store rewrites.
                match await_loops(handles, SHUTDOWN_GRACE).await {
                    Some(exits) => info!(loops = exits.len(), "poll loops drained"),
                    None => warn!(
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        still_running = engine.list_active().len(),
                        "poll loops did not exit in time"
                    ),
                }
                break;
            }
        }
    }

    Ok(())
}
