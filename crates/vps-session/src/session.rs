use crate::host::SceneHost;
use crate::ingest::{CpuImage, FrameIngest, TrackerUpdate};
use glam::Vec3;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vps_client::codec::ImageCodec;
use vps_client::protocol::point_cloud_url;
use vps_client::transport::Transport;
use vps_client::{ClientSettings, LocalizationClient, RequestError, TickOutcome};
use vps_config::AppConfig;
use vps_pose::{
    AlignedPose, AnchorPose, BlendAction, BlendParams, CameraFrame, PoseFilter, RenderBlender,
};

/// Running totals, reported by the host heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub snaps: u64,
    pub blends: u64,
}

/// Everything that lives for one AR session.
///
/// The host drives it through the engine hooks in order: [`on_start`] once,
/// then per frame [`on_process_cpu`], [`on_update`] and [`on_render`], plus
/// [`on_timer`] every [`localization_interval`]. All hooks run on the same
/// thread; only the localization request itself runs elsewhere.
///
/// [`on_start`]: Self::on_start
/// [`on_process_cpu`]: Self::on_process_cpu
/// [`on_update`]: Self::on_update
/// [`on_render`]: Self::on_render
/// [`on_timer`]: Self::on_timer
/// [`localization_interval`]: Self::localization_interval
pub struct Session<T, C> {
    config: AppConfig,
    ingest: FrameIngest,
    client: LocalizationClient<T, C>,
    filter: PoseFilter,
    blender: RenderBlender,
    scale: Vec3,
    stats: SessionStats,
}

impl<T: Transport, C: ImageCodec> Session<T, C> {
    pub fn new(config: AppConfig, transport: Arc<T>, codec: Arc<C>) -> Self {
        let settings = ClientSettings {
            token: config.developer_token.clone(),
            map_ids: config.map_ids.clone(),
            solver_type: config.service.solver_type,
            max_scale_deviation: config.stabilizer.max_scale_deviation,
        };
        let stabilizer = &config.stabilizer;
        let params = BlendParams::new(
            stabilizer.warp_distance,
            stabilizer.warp_angle_degrees,
            stabilizer.smoothing,
        );

        Self {
            client: LocalizationClient::new(transport, codec, settings),
            ingest: FrameIngest::new(),
            filter: PoseFilter::new(),
            blender: RenderBlender::new(params),
            scale: Vec3::ONE,
            stats: SessionStats::default(),
            config,
        }
    }

    /// Set up map content on the host.
    pub fn on_start(&mut self, host: &mut dyn SceneHost) {
        tracing::info!(
            maps = ?self.config.map_ids,
            filter = self.config.use_filter,
            "Session started"
        );

        if self.config.show_point_cloud {
            let variant = self.config.point_cloud_density.endpoint();
            for &map_id in &self.config.map_ids {
                let url = point_cloud_url(
                    &self.config.service.base_url,
                    variant,
                    &self.config.developer_token,
                    map_id,
                );
                host.load_point_cloud(map_id, &url);
            }
            tracing::info!(count = self.config.map_ids.len(), variant, "Point clouds requested");
        }

        if self.config.show_axes {
            host.show_axes();
        }
    }

    pub fn on_process_cpu(&mut self, image: Option<CpuImage<'_>>) {
        self.ingest.process_cpu(image);
    }

    pub fn on_update(&mut self, update: &TrackerUpdate) {
        self.ingest.update(update);
    }

    /// Localization timer fired.
    pub fn on_timer(&mut self) -> TickOutcome {
        self.stats.ticks += 1;
        self.client.tick(self.ingest.frame())
    }

    /// Apply finished localizations and return the anchor pose to draw.
    pub fn on_render(&mut self, now: Instant) -> Option<AnchorPose> {
        while let Some(result) = self.client.try_completion() {
            self.apply(result);
        }

        if self.config.use_filter {
            match self.blender.update(&self.filter, now) {
                BlendAction::Hidden => {}
                BlendAction::Snapped => self.stats.snaps += 1,
                BlendAction::Blended { .. } => self.stats.blends += 1,
            }
            self.blender.set_scale(self.scale);
        }
        self.blender.anchor()
    }

    fn apply(&mut self, result: Result<AlignedPose, RequestError>) {
        let aligned = match result {
            Ok(aligned) => aligned,
            Err(_) => {
                self.stats.rejected += 1;
                return;
            }
        };

        self.stats.accepted += 1;
        self.scale = aligned.scale;
        if self.config.use_filter {
            self.filter.refine(&aligned.transform);
        } else {
            self.blender.place(aligned.position, aligned.rotation, aligned.scale);
        }
    }

    /// Forget every localization so far, including one still in flight.
    pub fn recenter(&mut self) {
        self.filter.reset();
        self.blender.reset();
        self.client.invalidate();
        self.scale = Vec3::ONE;
        tracing::info!(epoch = self.client.epoch(), "Re-centered");
    }

    pub fn localization_interval(&self) -> Duration {
        Duration::from_millis(self.config.localization_interval_ms)
    }

    pub fn is_localizing(&self) -> bool {
        self.client.is_in_flight()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Latest complete camera frame.
    pub fn frame(&self) -> Option<&CameraFrame> {
        self.ingest.frame()
    }

    /// Upload the current frame as a mapping capture.
    pub async fn capture(&self, run: u32, index: u32, anchor: bool) -> Result<(), RequestError> {
        let frame = self.ingest.frame().ok_or(RequestError::MissingFrame)?;
        self.client.capture(frame, run, index, anchor).await
    }
}
