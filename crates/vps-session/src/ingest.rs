use glam::{Mat4, Quat, Vec3};
use vps_pose::{CameraFrame, Intrinsics};

/// CPU-side camera image as handed over by the engine.
///
/// Rows may be padded: each row starts `row_bytes` after the previous one
/// but only the first `cols` bytes are pixels.
#[derive(Debug, Clone, Copy)]
pub struct CpuImage<'a> {
    pub cols: u32,
    pub rows: u32,
    pub row_bytes: u32,
    pub pixels: &'a [u8],
}

impl CpuImage<'_> {
    /// Bytes needed to hold every row; the last row need not be padded.
    fn required_len(&self) -> usize {
        if self.rows == 0 {
            return 0;
        }
        (self.rows as usize - 1) * self.row_bytes as usize + self.cols as usize
    }

    fn is_valid(&self) -> bool {
        self.cols > 0
            && self.rows > 0
            && self.row_bytes >= self.cols
            && self.pixels.len() >= self.required_len()
    }
}

/// Tracker state reported with every engine update.
#[derive(Debug, Clone, Copy)]
pub struct TrackerUpdate {
    /// Camera position in tracker space.
    pub position: Vec3,
    /// Camera orientation in tracker space.
    pub rotation: Quat,
    /// Camera projection matrix.
    pub projection: Mat4,
}

/// Pinhole intrinsics of a `width` x `height` image rendered with `projection`.
pub fn intrinsics_from_projection(projection: &Mat4, width: u32, height: u32) -> Intrinsics {
    let (w, h) = (width as f32, height as f32);
    let focal = 0.5 * projection.y_axis.y * h;
    Intrinsics {
        fx: focal,
        fy: focal,
        ox: 0.5 * (projection.z_axis.x + 1.0) * w,
        oy: 0.5 * (projection.z_axis.y + 1.0) * h,
    }
}

/// Assembles [`CameraFrame`]s from the engine's image and pose callbacks.
#[derive(Default)]
pub struct FrameIngest {
    frame: CameraFrame,
    has_pose: bool,
}

impl FrameIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the latest camera image, packing padded rows.
    ///
    /// A missing or malformed image clears the pixels so no request is built
    /// from a buffer that no longer matches the pose.
    pub fn process_cpu(&mut self, image: Option<CpuImage<'_>>) {
        let frame = &mut self.frame;
        frame.pixels.clear();

        let Some(image) = image.filter(|image| image.is_valid()) else {
            frame.width = 0;
            frame.height = 0;
            tracing::trace!("Camera image unavailable");
            return;
        };

        frame.width = image.cols;
        frame.height = image.rows;
        let (cols, stride) = (image.cols as usize, image.row_bytes as usize);
        if stride == cols {
            frame.pixels.extend_from_slice(&image.pixels[..cols * image.rows as usize]);
        } else {
            for row in image.pixels.chunks(stride).take(image.rows as usize) {
                frame.pixels.extend_from_slice(&row[..cols]);
            }
        }
    }

    /// Record the camera pose and refresh intrinsics for the current image size.
    pub fn update(&mut self, update: &TrackerUpdate) {
        let frame = &mut self.frame;
        frame.position = update.position;
        frame.rotation = update.rotation;
        frame.intrinsics = intrinsics_from_projection(&update.projection, frame.width, frame.height);
        self.has_pose = true;
    }

    /// Latest complete frame, if both an image and a pose have arrived.
    pub fn frame(&self) -> Option<&CameraFrame> {
        (self.has_pose && self.frame.has_pixels()).then_some(&self.frame)
    }
}
