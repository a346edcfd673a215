//! Stand-ins for the AR engine and the positioning service, so the session
//! can run without a device or credentials.

use glam::{Mat3, Mat4, Quat, Vec3};
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use vps_client::protocol::{split_payload, Endpoint, LocalizeRequest};
use vps_client::transport::{Transport, TransportError};
use vps_pose::ServiceConventionCorrection;
use vps_session::{CpuImage, TrackerUpdate};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
/// Rows are padded to a 64-byte boundary, like most camera drivers do.
const ROW_BYTES: u32 = 704;

/// Position noise amplitude of simulated localizations, in meters.
const NOISE: f32 = 0.02;
/// Every n-th response is displaced by [`OUTLIER_OFFSET`].
const OUTLIER_EVERY: u64 = 9;
const OUTLIER_OFFSET: f32 = 1.5;
/// Every n-th request fails to localize.
const FAILURE_EVERY: u64 = 13;

/// Camera slowly walking a small loop while looking around.
pub struct SyntheticEngine {
    started: Instant,
    pixels: Vec<u8>,
    tracker: TrackerUpdate,
    position_tx: watch::Sender<Vec3>,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        let (position_tx, _) = watch::channel(Vec3::ZERO);
        Self {
            started: Instant::now(),
            pixels: vec![0; (ROW_BYTES * HEIGHT) as usize],
            tracker: TrackerUpdate {
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                projection: Mat4::perspective_rh(
                    60f32.to_radians(),
                    WIDTH as f32 / HEIGHT as f32,
                    0.05,
                    100.0,
                ),
            },
            position_tx,
        }
    }

    /// Live camera position, for a simulated service that needs ground truth.
    pub fn subscribe(&self) -> watch::Receiver<Vec3> {
        self.position_tx.subscribe()
    }

    pub fn advance(&mut self, now: Instant) {
        let t = now.saturating_duration_since(self.started).as_secs_f32();
        self.tracker.position = Vec3::new(
            0.5 * (0.3 * t).sin(),
            1.6,
            0.5 * (0.3 * t).cos() - 0.5,
        );
        self.tracker.rotation = Quat::from_rotation_y(0.2 * (0.5 * t).sin());

        let shift = (t * 30.0) as usize;
        for (y, row) in self.pixels.chunks_mut(ROW_BYTES as usize).enumerate() {
            for (x, px) in row[..WIDTH as usize].iter_mut().enumerate() {
                *px = ((x + shift) ^ y) as u8;
            }
        }

        self.position_tx.send_replace(self.tracker.position);
    }

    pub fn image(&self) -> CpuImage<'_> {
        CpuImage {
            cols: WIDTH,
            rows: HEIGHT,
            row_bytes: ROW_BYTES,
            pixels: &self.pixels,
        }
    }

    pub fn tracker(&self) -> &TrackerUpdate {
        &self.tracker
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Positioning service answering from a known map placement.
///
/// Responses carry position noise, periodic outliers and periodic failures
/// so the filter has something to do.
pub struct SimulatedLocalizer {
    map_in_tracker: Mat4,
    camera_position: watch::Receiver<Vec3>,
    latency: Duration,
    requests: AtomicU64,
}

impl SimulatedLocalizer {
    pub fn new(camera_position: watch::Receiver<Vec3>) -> Self {
        Self {
            map_in_tracker: Mat4::from_rotation_translation(
                Quat::from_rotation_y(30f32.to_radians()),
                Vec3::new(2.0, 0.0, -3.0),
            ),
            camera_position,
            latency: Duration::from_millis(150),
            requests: AtomicU64::new(0),
        }
    }

    /// Where the anchor should settle.
    pub fn map_origin(&self) -> Vec3 {
        self.map_in_tracker.w_axis.truncate()
    }

    /// Answer for a camera seen at `camera_position` when the image was sent.
    fn localize(&self, request: &LocalizeRequest, camera_position: Vec3) -> serde_json::Value {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if n % FAILURE_EVERY == 0 {
            return json!({ "success": false, "error": "none" });
        }

        let reported = Quat::from_xyzw(request.qx, request.qy, request.qz, request.qw);
        let rotation = (reported * ServiceConventionCorrection::ROTATION.conjugate()).normalize();

        let mut rng = rand::thread_rng();
        let mut position = camera_position;
        position += Vec3::new(
            rng.gen_range(-NOISE..NOISE),
            rng.gen_range(-NOISE..NOISE),
            rng.gen_range(-NOISE..NOISE),
        );
        if n % OUTLIER_EVERY == 0 {
            position.x += OUTLIER_OFFSET;
        }

        let in_map = self.map_in_tracker.inverse() * Mat4::from_rotation_translation(rotation, position);
        let r = Mat3::from_mat4(in_map) * ServiceConventionCorrection::MATRIX;
        let p = in_map.w_axis;
        json!({
            "success": true,
            "r00": r.x_axis.x, "r01": r.y_axis.x, "r02": r.z_axis.x,
            "r10": r.x_axis.y, "r11": r.y_axis.y, "r12": r.z_axis.y,
            "r20": r.x_axis.z, "r21": r.y_axis.z, "r22": r.z_axis.z,
            "px": p.x, "py": p.y, "pz": p.z,
        })
    }
}

impl Transport for SimulatedLocalizer {
    async fn post(&self, endpoint: Endpoint, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        // Ground truth at send time, matching the tracker snapshot in the request.
        let camera_position = *self.camera_position.borrow();
        tokio::time::sleep(self.latency).await;

        let response = match endpoint {
            Endpoint::Capture => json!({ "error": "none" }),
            Endpoint::Localize => {
                let request = split_payload(&payload)
                    .ok()
                    .and_then(|(header, _)| serde_json::from_slice::<LocalizeRequest>(header).ok())
                    .ok_or(TransportError::Status(400))?;
                self.localize(&request, camera_position)
            }
        };
        Ok(response.to_string().into_bytes())
    }
}
