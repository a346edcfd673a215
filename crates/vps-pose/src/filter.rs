use crate::history::{MeanKind, PoseHistory, PoseSample, StableMean};
use glam::{Mat3, Mat4, Quat, Vec3};

/// Stabilized map pose in tracker space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Temporal filter over accepted localizations.
///
/// Each refinement recomputes the pose from the whole history window rather
/// than merging incrementally, so an outlier stops influencing the result as
/// soon as it is evicted.
pub struct PoseFilter {
    history: PoseHistory,
    state: FilterState,
}

impl PoseFilter {
    pub fn new() -> Self {
        Self {
            history: PoseHistory::new(),
            state: FilterState::default(),
        }
    }

    /// Feed one aligned map transform and return the updated estimate.
    pub fn refine(&mut self, aligned: &Mat4) -> FilterState {
        self.history.insert(PoseSample::from_transform(aligned));

        let stable = self.history.compute_stable_mean();
        log_rejections(self.history.len(), &stable.position, "position");

        self.state.position = stable.position.value;
        match orientation_from_basis(stable.basis_x.value, stable.basis_z.value) {
            Some(rotation) => self.state.rotation = rotation,
            None => {
                tracing::debug!("Degenerate averaged basis, keeping previous orientation");
            }
        }

        tracing::trace!(
            samples = self.sample_count(),
            x = self.state.position.x,
            y = self.state.position.y,
            z = self.state.position.z,
            "Pose filter refined"
        );
        self.state
    }

    /// Discard the history without touching the last estimate.
    pub fn invalidate(&mut self) {
        self.history.clear();
    }

    /// Discard the history and return the estimate to the origin.
    pub fn reset(&mut self) {
        self.state = FilterState::default();
        self.invalidate();
        tracing::info!("Pose filter reset");
    }

    /// Number of samples in the averaging window.
    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Current estimate, or `None` before the first sample.
    pub fn state(&self) -> Option<FilterState> {
        (!self.history.is_empty()).then_some(self.state)
    }
}

impl Default for PoseFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn log_rejections(window: usize, mean: &StableMean, component: &'static str) {
    match mean.kind {
        MeanKind::Trimmed { inliers } if inliers < window => {
            tracing::debug!(component, rejected = window - inliers, window, "Outlier samples ignored");
        }
        MeanKind::Fallback => {
            tracing::debug!(component, window, "No inliers, using plain mean");
        }
        _ => {}
    }
}

/// Rebuild an orientation from averaged right (`x`) and forward (`z`) axes.
///
/// Averaged axes are neither unit length nor orthogonal, so the basis is
/// rebuilt look-at style: forward is kept, right is re-derived from the up
/// vector `z × x`. Returns `None` when the axes are zero or parallel.
pub fn orientation_from_basis(x: Vec3, z: Vec3) -> Option<Quat> {
    let x = x.normalize_or_zero();
    let z = z.normalize_or_zero();
    if x == Vec3::ZERO || z == Vec3::ZERO {
        return None;
    }

    let up = z.cross(x).normalize_or_zero();
    if up == Vec3::ZERO {
        return None;
    }

    let right = up.cross(z).normalize();
    let y = z.cross(right);
    Some(Quat::from_mat3(&Mat3::from_cols(right, y, z)).normalize())
}
