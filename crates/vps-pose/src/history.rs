use glam::{Mat4, Vec3};

/// Number of accepted localizations the filter averages over.
pub const HISTORY_CAPACITY: usize = 8;

/// One aligned localization reduced to what the filter averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub position: Vec3,
    /// First basis column (right).
    pub basis_x: Vec3,
    /// Third basis column (forward).
    pub basis_z: Vec3,
}

impl PoseSample {
    /// Extract position and basis columns from an aligned transform.
    pub fn from_transform(transform: &Mat4) -> Self {
        Self {
            position: transform.w_axis.truncate(),
            basis_x: transform.x_axis.truncate(),
            basis_z: transform.z_axis.truncate(),
        }
    }
}

/// How a [`StableMean`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeanKind {
    /// Too few samples to judge outliers; plain arithmetic mean.
    Plain,
    /// Mean of the samples no farther from the plain mean than the average.
    Trimmed { inliers: usize },
    /// No sample qualified as an inlier; plain mean used instead.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StableMean {
    pub value: Vec3,
    pub kind: MeanKind,
}

/// Outlier-rejecting mean of `samples`.
///
/// Samples whose squared distance to the arithmetic mean exceeds the mean
/// squared distance are dropped and the mean is taken again over the rest.
/// A single wild sample inflates the average distance far less than its own
/// distance, so it lands outside and is discarded.
pub fn stable_mean(samples: &[Vec3]) -> StableMean {
    let n = samples.len();
    if n == 0 {
        return StableMean {
            value: Vec3::ZERO,
            kind: MeanKind::Plain,
        };
    }

    let mean = samples.iter().copied().sum::<Vec3>() / n as f32;
    if n <= 2 {
        return StableMean {
            value: mean,
            kind: MeanKind::Plain,
        };
    }

    let spread = samples.iter().map(|p| p.distance_squared(mean)).sum::<f32>() / n as f32;

    let (sum, inliers) = samples
        .iter()
        .filter(|p| p.distance_squared(mean) <= spread)
        .fold((Vec3::ZERO, 0usize), |(sum, count), p| (sum + *p, count + 1));

    if inliers > 0 {
        StableMean {
            value: sum / inliers as f32,
            kind: MeanKind::Trimmed { inliers },
        }
    } else {
        StableMean {
            value: mean,
            kind: MeanKind::Fallback,
        }
    }
}

/// Stable means of each sample component over the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StablePose {
    pub position: StableMean,
    pub basis_x: StableMean,
    pub basis_z: StableMean,
}

/// Fixed-capacity ring of recent pose samples.
///
/// Slot `insertions % HISTORY_CAPACITY` receives the next sample, so once the
/// ring is full the oldest sample is overwritten. Until then the valid
/// samples occupy the leading slots.
pub struct PoseHistory {
    position: [Vec3; HISTORY_CAPACITY],
    basis_x: [Vec3; HISTORY_CAPACITY],
    basis_z: [Vec3; HISTORY_CAPACITY],
    insertions: u64,
}

impl PoseHistory {
    pub fn new() -> Self {
        Self {
            position: [Vec3::ZERO; HISTORY_CAPACITY],
            basis_x: [Vec3::ZERO; HISTORY_CAPACITY],
            basis_z: [Vec3::ZERO; HISTORY_CAPACITY],
            insertions: 0,
        }
    }

    pub fn insert(&mut self, sample: PoseSample) {
        let idx = (self.insertions % HISTORY_CAPACITY as u64) as usize;
        self.position[idx] = sample.position;
        self.basis_x[idx] = sample.basis_x;
        self.basis_z[idx] = sample.basis_z;
        self.insertions += 1;
    }

    /// Number of valid samples in the window.
    pub fn len(&self) -> usize {
        self.insertions.min(HISTORY_CAPACITY as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.insertions == 0
    }

    /// Total samples inserted since creation or the last [`clear`](Self::clear).
    pub fn insertions(&self) -> u64 {
        self.insertions
    }

    /// Logically discard all samples. Storage is kept.
    pub fn clear(&mut self) {
        self.insertions = 0;
    }

    /// Sample stored in window slot `idx`, if valid.
    pub fn get(&self, idx: usize) -> Option<PoseSample> {
        (idx < self.len()).then(|| PoseSample {
            position: self.position[idx],
            basis_x: self.basis_x[idx],
            basis_z: self.basis_z[idx],
        })
    }

    pub fn compute_stable_mean(&self) -> StablePose {
        let n = self.len();
        StablePose {
            position: stable_mean(&self.position[..n]),
            basis_x: stable_mean(&self.basis_x[..n]),
            basis_z: stable_mean(&self.basis_z[..n]),
        }
    }
}

impl Default for PoseHistory {
    fn default() -> Self {
        Self::new()
    }
}
