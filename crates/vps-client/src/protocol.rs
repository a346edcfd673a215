//! Wire schema of the positioning service.
//!
//! Every request body is a JSON header, a single NUL byte, then the encoded
//! image. Responses are plain JSON.

use glam::Mat3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vps_pose::{CameraFrame, ServiceConventionCorrection, ServicePose};

/// Separates the JSON header from the image payload.
const HEADER_TERMINATOR: u8 = 0;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to encode request header")]
    Encode(#[source] serde_json::Error),
    #[error("Malformed response body")]
    Decode(#[source] serde_json::Error),
    #[error("Payload has no header terminator")]
    MissingTerminator,
    #[error("Successful response is missing field `{0}`")]
    MissingField(&'static str),
}

/// Service endpoints used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Localize,
    Capture,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Localize => "localize",
            Endpoint::Capture => "capture",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapId {
    pub id: u32,
}

/// Header of a localize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizeRequest {
    pub token: String,
    pub fx: f32,
    pub fy: f32,
    pub ox: f32,
    pub oy: f32,
    /// Camera orientation in the service's axis convention.
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
    pub qw: f32,
    pub solver_type: u32,
    pub map_ids: Vec<MapId>,
}

impl LocalizeRequest {
    pub fn new(token: &str, frame: &CameraFrame, solver_type: u32, map_ids: &[u32]) -> Self {
        let q = ServiceConventionCorrection::to_service(frame.rotation);
        Self {
            token: token.to_string(),
            fx: frame.intrinsics.fx,
            fy: frame.intrinsics.fy,
            ox: frame.intrinsics.ox,
            oy: frame.intrinsics.oy,
            qx: q.x,
            qy: q.y,
            qz: q.z,
            qw: q.w,
            solver_type,
            map_ids: map_ids.iter().map(|&id| MapId { id }).collect(),
        }
    }
}

/// Header of a capture (mapping) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub token: String,
    pub run: u32,
    pub index: u32,
    pub anchor: bool,
    pub px: f32,
    pub py: f32,
    pub pz: f32,
    pub r00: f32,
    pub r01: f32,
    pub r02: f32,
    pub r10: f32,
    pub r11: f32,
    pub r12: f32,
    pub r20: f32,
    pub r21: f32,
    pub r22: f32,
    pub fx: f32,
    pub fy: f32,
    pub ox: f32,
    pub oy: f32,
}

impl CaptureRequest {
    /// Capture header for `frame`, seeding the map with the tracker pose.
    pub fn new(token: &str, frame: &CameraFrame, run: u32, index: u32, anchor: bool) -> Self {
        let r = Mat3::from_quat(ServiceConventionCorrection::to_service(frame.rotation));
        // r_ij: row i of column j.
        let (c0, c1, c2) = (r.x_axis, r.y_axis, r.z_axis);
        Self {
            token: token.to_string(),
            run,
            index,
            anchor,
            px: frame.position.x,
            py: frame.position.y,
            pz: frame.position.z,
            r00: c0.x,
            r01: c1.x,
            r02: c2.x,
            r10: c0.y,
            r11: c1.y,
            r12: c2.y,
            r20: c0.z,
            r21: c1.z,
            r22: c2.z,
            fx: frame.intrinsics.fx,
            fy: frame.intrinsics.fy,
            ox: frame.intrinsics.ox,
            oy: frame.intrinsics.oy,
        }
    }
}

/// Body of a localize response. Pose fields are absent on failure.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LocalizeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub r00: Option<f32>,
    pub r01: Option<f32>,
    pub r02: Option<f32>,
    pub r10: Option<f32>,
    pub r11: Option<f32>,
    pub r12: Option<f32>,
    pub r20: Option<f32>,
    pub r21: Option<f32>,
    pub r22: Option<f32>,
    pub px: Option<f32>,
    pub py: Option<f32>,
    pub pz: Option<f32>,
}

impl LocalizeResponse {
    /// Reported camera pose, or `None` when the service did not localize.
    ///
    /// A successful response must carry all twelve pose fields.
    pub fn pose(&self) -> Result<Option<ServicePose>, ProtocolError> {
        if !self.success {
            return Ok(None);
        }
        let rotation = [
            [
                required(self.r00, "r00")?,
                required(self.r01, "r01")?,
                required(self.r02, "r02")?,
            ],
            [
                required(self.r10, "r10")?,
                required(self.r11, "r11")?,
                required(self.r12, "r12")?,
            ],
            [
                required(self.r20, "r20")?,
                required(self.r21, "r21")?,
                required(self.r22, "r22")?,
            ],
        ];
        let position = glam::Vec3::new(
            required(self.px, "px")?,
            required(self.py, "py")?,
            required(self.pz, "pz")?,
        );
        Ok(Some(ServicePose::from_rows(rotation, position)))
    }
}

fn required(value: Option<f32>, field: &'static str) -> Result<f32, ProtocolError> {
    value.ok_or(ProtocolError::MissingField(field))
}

/// Body of a capture response.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct CaptureResponse {
    pub error: String,
}

impl CaptureResponse {
    pub fn is_success(&self) -> bool {
        self.error == "none"
    }
}

/// Serialize `header` and append the terminator and image bytes.
pub fn encode_payload<T: Serialize>(header: &T, image: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(header).map_err(ProtocolError::Encode)?;
    let mut payload = Vec::with_capacity(json.len() + 1 + image.len());
    payload.extend_from_slice(&json);
    payload.push(HEADER_TERMINATOR);
    payload.extend_from_slice(image);
    Ok(payload)
}

/// Split a request payload into its JSON header and image bytes.
///
/// JSON text never contains a raw NUL, so the first one is the terminator.
pub fn split_payload(payload: &[u8]) -> Result<(&[u8], &[u8]), ProtocolError> {
    let end = payload
        .iter()
        .position(|&b| b == HEADER_TERMINATOR)
        .ok_or(ProtocolError::MissingTerminator)?;
    Ok((&payload[..end], &payload[end + 1..]))
}

pub fn decode_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(body).map_err(ProtocolError::Decode)
}

/// Download URL of a map's point cloud. `variant` is `sparse` or `dense`.
pub fn point_cloud_url(base_url: &str, variant: &str, token: &str, map_id: u32) -> String {
    format!("{base_url}{variant}?token={token}&id={map_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use vps_pose::Intrinsics;

    fn frame(rotation: Quat) -> CameraFrame {
        CameraFrame {
            width: 2,
            height: 2,
            pixels: vec![0, 1, 2, 3],
            intrinsics: Intrinsics {
                fx: 500.0,
                fy: 500.0,
                ox: 320.0,
                oy: 240.0,
            },
            position: Vec3::new(0.5, 1.5, -2.0),
            rotation,
        }
    }

    #[test]
    fn localize_header_uses_service_field_names() {
        let request = LocalizeRequest::new("tok", &frame(Quat::IDENTITY), 1, &[67628, 42]);
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();

        assert_eq!(json["token"], "tok");
        assert_eq!(json["solverType"], 1);
        assert_eq!(json["mapIds"][0]["id"], 67628);
        assert_eq!(json["mapIds"][1]["id"], 42);
        assert_eq!(json["fx"], 500.0);
        assert_eq!(json["oy"], 240.0);
    }

    #[test]
    fn localize_orientation_carries_convention_correction() {
        let request = LocalizeRequest::new("tok", &frame(Quat::IDENTITY), 1, &[1]);
        // Identity camera becomes a half turn about X.
        assert!((request.qx.abs() - 1.0).abs() < 1e-6);
        assert!(request.qy.abs() < 1e-6);
        assert!(request.qz.abs() < 1e-6);
        assert!(request.qw.abs() < 1e-6);
    }

    #[test]
    fn capture_header_rotation_rows() {
        let request = CaptureRequest::new("tok", &frame(Quat::IDENTITY), 0, 3, false);
        assert!((request.r00 - 1.0).abs() < 1e-6);
        assert!((request.r11 + 1.0).abs() < 1e-6);
        assert!((request.r22 + 1.0).abs() < 1e-6);
        assert!(request.r01.abs() < 1e-6 && request.r12.abs() < 1e-6);
        assert_eq!(request.index, 3);
        assert_eq!(request.pz, -2.0);

        // A quarter yaw puts the camera's right axis (column 0) along -Z.
        let yawed = CaptureRequest::new(
            "tok",
            &frame(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)),
            0,
            0,
            false,
        );
        assert!((yawed.r20 + 1.0).abs() < 1e-6);
    }

    #[test]
    fn payload_layout() {
        let request = LocalizeRequest::new("tok", &frame(Quat::IDENTITY), 1, &[7]);
        // Image bytes may contain NULs themselves.
        let image = [0x89, b'P', 0x00, 0x00, 0xff];
        let payload = encode_payload(&request, &image).unwrap();

        let (header, body) = split_payload(&payload).unwrap();
        assert_eq!(body, &image);
        let decoded: LocalizeRequest = serde_json::from_slice(header).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn split_requires_terminator() {
        assert!(matches!(
            split_payload(b"{\"token\":\"x\"}"),
            Err(ProtocolError::MissingTerminator)
        ));
    }

    #[test]
    fn successful_response_yields_pose() {
        let body = br#"{"success":true,"r00":1,"r01":0,"r02":0,"r10":0,"r11":1,"r12":0,
            "r20":0,"r21":0,"r22":1,"px":1.5,"py":-2,"pz":3}"#;
        let response: LocalizeResponse = decode_response(body).unwrap();
        let pose = response.pose().unwrap().unwrap();
        assert_eq!(pose.position, Vec3::new(1.5, -2.0, 3.0));
        assert_eq!(pose.rotation, Mat3::IDENTITY);
    }

    #[test]
    fn rejected_response_has_no_pose() {
        let response: LocalizeResponse =
            decode_response(br#"{"success":false,"error":"none"}"#).unwrap();
        assert!(response.pose().unwrap().is_none());
    }

    #[test]
    fn successful_response_without_position_is_malformed() {
        let response: LocalizeResponse = decode_response(
            br#"{"success":true,"r00":1,"r01":0,"r02":0,"r10":0,"r11":-1,"r12":0,
                "r20":0,"r21":0,"r22":-1}"#,
        )
        .unwrap();
        assert!(matches!(
            response.pose(),
            Err(ProtocolError::MissingField("px"))
        ));

        let no_rotation: LocalizeResponse =
            decode_response(br#"{"success":true,"px":1,"py":2,"pz":3}"#).unwrap();
        assert!(matches!(
            no_rotation.pose(),
            Err(ProtocolError::MissingField("r00"))
        ));
    }

    #[test]
    fn garbage_response_is_decode_error() {
        let result: Result<LocalizeResponse, _> = decode_response(b"<html>502</html>");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn capture_response_status() {
        let ok: CaptureResponse = decode_response(br#"{"error":"none","path":"x"}"#).unwrap();
        assert!(ok.is_success());
        let failed: CaptureResponse = decode_response(br#"{"error":"auth"}"#).unwrap();
        assert!(!failed.is_success());
    }

    #[test]
    fn point_cloud_urls() {
        assert_eq!(
            point_cloud_url("https://api.example.com/", "dense", "abc", 12),
            "https://api.example.com/dense?token=abc&id=12"
        );
        assert_eq!(Endpoint::Localize.path(), "localize");
        assert_eq!(Endpoint::Capture.path(), "capture");
    }
}
