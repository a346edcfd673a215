//! Pose math for keeping map-anchored content registered to the tracker.
//!
//! - [`align`] re-expresses a service-reported camera pose as the map origin
//!   in tracker space.
//! - [`PoseFilter`] stabilizes a window of aligned poses with an
//!   outlier-rejecting mean.
//! - [`RenderBlender`] moves the rendered anchor toward the filtered pose
//!   every frame, snapping when the correction is too large to blend.

pub mod align;
pub mod blend;
pub mod filter;
pub mod history;
pub mod types;

pub use align::{align, AlignError, AlignedPose, ServiceConventionCorrection};
pub use blend::{blend_alpha, BlendAction, BlendParams, RenderBlender};
pub use filter::{FilterState, PoseFilter};
pub use history::{PoseHistory, PoseSample, HISTORY_CAPACITY};
pub use types::{AnchorPose, CameraFrame, Intrinsics, ServicePose};
