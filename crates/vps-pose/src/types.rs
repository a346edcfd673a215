use glam::{Mat3, Mat4, Quat, Vec3};

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    /// Principal point x.
    pub ox: f32,
    /// Principal point y.
    pub oy: f32,
}

/// Snapshot of the engine camera for one frame.
#[derive(Debug, Clone, Default)]
pub struct CameraFrame {
    /// Pixel buffer width.
    pub width: u32,
    /// Pixel buffer height.
    pub height: u32,
    /// Tightly packed 8-bit luminance, `width * height` bytes.
    pub pixels: Vec<u8>,
    pub intrinsics: Intrinsics,
    /// Camera position in tracker space.
    pub position: Vec3,
    /// Camera orientation in tracker space.
    pub rotation: Quat,
}

impl CameraFrame {
    /// Camera-to-tracker transform at the time of this frame.
    pub fn tracker_space(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    /// Whether the frame carries a usable image.
    pub fn has_pixels(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize
    }
}

/// Camera pose in map space as reported by the positioning service,
/// still in the service's axis convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServicePose {
    /// Rotation as received, `rotation.col(j)[i] == r_ij`.
    pub rotation: Mat3,
    pub position: Vec3,
}

impl ServicePose {
    /// Build from the nine row-major rotation scalars and a position.
    pub fn from_rows(r: [[f32; 3]; 3], position: Vec3) -> Self {
        Self {
            rotation: Mat3::from_cols(
                Vec3::new(r[0][0], r[1][0], r[2][0]),
                Vec3::new(r[0][1], r[1][1], r[2][1]),
                Vec3::new(r[0][2], r[1][2], r[2][2]),
            ),
            position,
        }
    }
}

/// Pose currently applied to the rendered content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for AnchorPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl AnchorPose {
    /// Model matrix for the rendering collaborator.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
