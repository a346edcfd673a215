use crate::filter::PoseFilter;
use crate::types::AnchorPose;
use glam::{Quat, Vec3};
use std::time::{Duration, Instant};

/// Frame period the smoothing factor is specified against.
const REFERENCE_STEP: Duration = Duration::from_nanos(1_000_000_000 / 60);
/// Elapsed time is counted in reference steps within this range.
const MIN_STEPS: f32 = 1.0;
const MAX_STEPS: f32 = 6.0;

/// Thresholds and rate for moving the anchor toward the filtered pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendParams {
    /// Squared distance at or beyond which the anchor jumps.
    pub warp_distance_sq: f32,
    /// Orientation dot product below which the anchor jumps.
    pub warp_cos_angle: f32,
    /// Fraction of the remaining gap closed per reference step.
    pub smoothing: f32,
}

impl BlendParams {
    pub fn new(warp_distance: f32, warp_angle_degrees: f32, smoothing: f32) -> Self {
        Self {
            warp_distance_sq: warp_distance * warp_distance,
            warp_cos_angle: warp_angle_degrees.to_radians().cos(),
            smoothing,
        }
    }
}

impl Default for BlendParams {
    fn default() -> Self {
        Self::new(5.0, 20.0, 0.025)
    }
}

/// What a render tick did to the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlendAction {
    /// Nothing to show yet.
    Hidden,
    /// Anchor replaced by the filtered pose.
    Snapped,
    /// Anchor moved part of the way, by `alpha`.
    Blended { alpha: f32 },
}

/// Per-step blend factor after `elapsed` wall time.
///
/// Elapsed time is expressed in 1/60 s steps clamped to `[1, 6]`, and the
/// gap is closed as if `smoothing` had been applied once per step. This keeps
/// convergence speed independent of the frame rate while bounding the jump
/// after a long hitch.
pub fn blend_alpha(elapsed: Duration, smoothing: f32) -> f32 {
    let steps = (elapsed.as_secs_f32() / REFERENCE_STEP.as_secs_f32()).clamp(MIN_STEPS, MAX_STEPS);
    1.0 - (1.0 - smoothing).powf(steps)
}

/// Drives the rendered anchor toward the filter's estimate once per frame.
pub struct RenderBlender {
    params: BlendParams,
    anchor: Option<AnchorPose>,
    last_tick: Option<Instant>,
}

impl RenderBlender {
    pub fn new(params: BlendParams) -> Self {
        Self {
            params,
            anchor: None,
            last_tick: None,
        }
    }

    /// Anchor pose to render, `None` until the first localization.
    pub fn anchor(&self) -> Option<AnchorPose> {
        self.anchor
    }

    /// Apply the scale of the latest accepted localization.
    pub fn set_scale(&mut self, scale: Vec3) {
        if let Some(anchor) = &mut self.anchor {
            anchor.scale = scale;
        }
    }

    /// Place the anchor directly, bypassing the filter.
    pub fn place(&mut self, position: Vec3, rotation: Quat, scale: Vec3) {
        self.anchor = Some(AnchorPose {
            position,
            rotation,
            scale,
        });
    }

    /// Advance one rendered frame.
    pub fn update(&mut self, filter: &PoseFilter, now: Instant) -> BlendAction {
        let elapsed = self
            .last_tick
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);

        let Some(target) = filter.state() else {
            return BlendAction::Hidden;
        };

        let current = match self.anchor {
            Some(anchor) if filter.sample_count() > 1 => anchor,
            _ => {
                let scale = self.anchor.map_or(Vec3::ONE, |a| a.scale);
                self.place(target.position, target.rotation, scale);
                return BlendAction::Snapped;
            }
        };

        // q and -q are the same orientation; compare within one hemisphere.
        let dot = current.rotation.dot(target.rotation);
        let target_rotation = if dot < 0.0 { -target.rotation } else { target.rotation };
        let cos_angle = dot.abs();
        let dist_sq = current.position.distance_squared(target.position);

        if dist_sq >= self.params.warp_distance_sq || cos_angle < self.params.warp_cos_angle {
            tracing::debug!(dist_sq, cos_angle, "Anchor re-anchored to filtered pose");
            self.place(target.position, target_rotation, current.scale);
            return BlendAction::Snapped;
        }

        let alpha = blend_alpha(elapsed, self.params.smoothing);
        self.place(
            current.position.lerp(target.position, alpha),
            current.rotation.slerp(target_rotation, alpha).normalize(),
            current.scale,
        );
        BlendAction::Blended { alpha }
    }

    /// Forget the displayed pose so the next estimate snaps.
    pub fn reset(&mut self) {
        self.anchor = None;
        self.last_tick = None;
    }
}
