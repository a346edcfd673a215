mod sim;

use anyhow::Result;
use sim::{SimulatedLocalizer, SyntheticEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vps_client::codec::{ImageCodec, PngCodec};
use vps_client::transport::{HttpTransport, Transport};
use vps_config::AppConfig;
use vps_session::{HeadlessHost, Session};

/// Engine frame period.
const FRAME_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / 60);
/// Frames between heartbeat log lines.
const HEARTBEAT_FRAMES: u64 = 300;

/// Drive `session` with the synthetic engine until Ctrl-C.
async fn run<T: Transport, C: ImageCodec>(
    mut session: Session<T, C>,
    mut engine: SyntheticEngine,
) -> Result<()> {
    session.on_start(&mut HeadlessHost);

    let mut frames = tokio::time::interval(FRAME_PERIOD);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut localization = tokio::time::interval(session.localization_interval());
    localization.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut frame_count: u64 = 0;
    loop {
        tokio::select! {
            _ = frames.tick() => {
                let now = Instant::now();
                engine.advance(now);
                session.on_process_cpu(Some(engine.image()));
                session.on_update(engine.tracker());
                let anchor = session.on_render(now);

                frame_count += 1;
                if frame_count % HEARTBEAT_FRAMES == 0 {
                    let stats = session.stats();
                    debug!(
                        frames = frame_count,
                        ticks = stats.ticks,
                        accepted = stats.accepted,
                        rejected = stats.rejected,
                        snaps = stats.snaps,
                        blends = stats.blends,
                        anchor = ?anchor.map(|a| a.position),
                        "Session heartbeat"
                    );
                }
            }
            _ = localization.tick() => {
                session.on_timer();
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(?e, "Failed to listen for shutdown signal");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vps_anchor=info,vps_session=info,vps_client=info,vps_pose=info".into()
            }),
        )
        .init();

    info!("VPS anchor starting");

    let config = vps_config::load_config().unwrap_or_else(|e| {
        warn!(?e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    info!(
        maps = config.map_ids.len(),
        interval_ms = config.localization_interval_ms,
        filter = config.use_filter,
        "Config loaded"
    );

    let engine = SyntheticEngine::new();
    let codec = Arc::new(PngCodec);

    if config.developer_token.is_empty() {
        warn!("No developer token configured, using simulated localizer");
        let localizer = Arc::new(SimulatedLocalizer::new(engine.subscribe()));
        info!(origin = ?localizer.map_origin(), "Simulated map placement");
        run(Session::new(config, localizer, codec), engine).await
    } else {
        let transport = Arc::new(HttpTransport::new(config.service.base_url.clone())?);
        info!(base_url = transport.base_url(), "Using positioning service");
        run(Session::new(config, transport, codec), engine).await
    }
}
