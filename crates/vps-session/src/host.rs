/// Rendering-side collaborator that displays map content.
///
/// Called only from [`Session::on_start`](crate::Session::on_start); the
/// anchor pose itself is pulled from `on_render` every frame.
pub trait SceneHost {
    /// Start loading a map's point cloud from `url` under the anchor.
    fn load_point_cloud(&mut self, map_id: u32, url: &str);

    /// Show a coordinate-axes helper at the anchor origin.
    fn show_axes(&mut self);
}

/// Host that displays nothing, for headless runs.
#[derive(Debug, Default)]
pub struct HeadlessHost;

impl SceneHost for HeadlessHost {
    fn load_point_cloud(&mut self, map_id: u32, url: &str) {
        tracing::debug!(map_id, %url, "Headless host ignoring point cloud");
    }

    fn show_axes(&mut self) {}
}
