use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Developer token sent with every service request.
    pub developer_token: String,
    /// Map identifiers to localize against.
    pub map_ids: Vec<u32>,
    /// Period between localization attempts in milliseconds.
    pub localization_interval_ms: u64,
    /// Request point cloud visualizations for each map at session start.
    pub show_point_cloud: bool,
    /// Which point cloud variant to download.
    pub point_cloud_density: PointCloudDensity,
    /// Show a coordinate axes helper at the map origin.
    pub show_axes: bool,
    /// Stabilize localizations through the pose filter. When disabled each
    /// accepted localization is applied to the anchor as-is.
    pub use_filter: bool,
    /// Remote service endpoint configuration.
    pub service: ServiceConfig,
    /// Anchor stabilization tuning.
    pub stabilizer: StabilizerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            developer_token: String::new(),
            map_ids: Vec::new(),
            localization_interval_ms: 1000,
            show_point_cloud: true,
            point_cloud_density: PointCloudDensity::Dense,
            show_axes: true,
            use_filter: true,
            service: ServiceConfig::default(),
            stabilizer: StabilizerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointCloudDensity {
    Sparse,
    Dense,
}

impl PointCloudDensity {
    /// Download endpoint name for this density.
    pub fn endpoint(self) -> &'static str {
        match self {
            PointCloudDensity::Sparse => "sparse",
            PointCloudDensity::Dense => "dense",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the positioning service, with trailing slash.
    pub base_url: String,
    /// Server-side solver selector forwarded with each localize request.
    pub solver_type: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.immersal.com/".to_string(),
            solver_type: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Distance (meters) beyond which the anchor jumps instead of blending.
    pub warp_distance: f32,
    /// Orientation difference (degrees, compared as quaternion half-angle
    /// cosine) beyond which the anchor jumps instead of blending.
    pub warp_angle_degrees: f32,
    /// Per 1/60 s blend factor toward the filtered pose.
    pub smoothing: f32,
    /// Largest tolerated per-axis deviation of the aligned scale from 1.
    /// Localizations outside this band are rejected.
    pub max_scale_deviation: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            warp_distance: 5.0,
            warp_angle_degrees: 20.0,
            smoothing: 0.025,
            max_scale_deviation: 0.1,
        }
    }
}
