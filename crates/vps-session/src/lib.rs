//! Engine-facing side of VPS anchoring.
//!
//! A [`Session`] owns the frame ingest, localization client, pose filter and
//! render blender for one AR session and exposes them through the engine's
//! lifecycle hooks.

pub mod host;
pub mod ingest;
pub mod session;

pub use host::{HeadlessHost, SceneHost};
pub use ingest::{intrinsics_from_projection, CpuImage, FrameIngest, TrackerUpdate};
pub use session::{Session, SessionStats};
