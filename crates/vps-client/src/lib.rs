pub mod codec;
pub mod protocol;
pub mod transport;

use codec::{CodecError, ImageCodec};
use protocol::{
    decode_response, encode_payload, CaptureRequest, CaptureResponse, Endpoint, LocalizeRequest,
    LocalizeResponse, ProtocolError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use transport::{Transport, TransportError};
use vps_pose::{align, AlignError, AlignedPose, CameraFrame};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("No camera frame available")]
    MissingFrame,
    #[error("Image encoding failed")]
    Codec(#[from] CodecError),
    #[error("Image encoder task failed: {0}")]
    EncoderTask(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Service rejected the request ({})", .reason.as_deref().unwrap_or("no reason given"))]
    Rejected { reason: Option<String> },
    #[error(transparent)]
    Align(#[from] AlignError),
    #[error("Aligned scale deviates from unit by {deviation} (limit {limit})")]
    ScaleOutOfTolerance { deviation: f32, limit: f32 },
}

/// Request parameters fixed for the lifetime of a client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub token: String,
    pub map_ids: Vec<u32>,
    pub solver_type: u32,
    /// Localizations whose aligned scale strays further than this from 1
    /// are rejected.
    pub max_scale_deviation: f32,
}

/// What a timer tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A request was issued under `epoch`.
    Issued { epoch: u64 },
    /// A request is already outstanding; nothing was done.
    InFlight,
    /// No usable camera frame yet; nothing was done.
    NoFrame,
}

/// Result of one request, tagged with the epoch it was issued under.
struct Completion {
    epoch: u64,
    result: Result<AlignedPose, RequestError>,
}

/// Clears the in-flight flag when the request task ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight client for the positioning service.
///
/// [`tick`](Self::tick) is driven by a periodic timer. It issues at most one
/// request at a time; ticks arriving while a request is outstanding are
/// dropped rather than queued, since a queued localization would only be
/// staler by the time it ran. Completed requests are collected from the
/// frame loop with [`try_completion`](Self::try_completion).
pub struct LocalizationClient<T, C> {
    transport: Arc<T>,
    codec: Arc<C>,
    settings: Arc<ClientSettings>,
    in_flight: Arc<AtomicBool>,
    epoch: u64,
    issued: u64,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<T: Transport, C: ImageCodec> LocalizationClient<T, C> {
    pub fn new(transport: Arc<T>, codec: Arc<C>, settings: ClientSettings) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            codec,
            settings: Arc::new(settings),
            in_flight: Arc::new(AtomicBool::new(false)),
            epoch: 0,
            issued: 0,
            completion_tx,
            completion_rx,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current epoch. Completions from earlier epochs are discarded.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total requests issued.
    pub fn requests_issued(&self) -> u64 {
        self.issued
    }

    /// Mark any outstanding request as stale. Its result will be dropped
    /// when it arrives; the in-flight slot is still held until it does.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        tracing::debug!(epoch = self.epoch, "Localization epoch advanced");
    }

    /// Issue a localization for `frame` unless one is already outstanding.
    ///
    /// The frame is copied before returning, so the caller may overwrite its
    /// buffer on the next engine update. Must be called within a Tokio runtime.
    pub fn tick(&mut self, frame: Option<&CameraFrame>) -> TickOutcome {
        let Some(frame) = frame.filter(|f| f.has_pixels()) else {
            tracing::trace!("No camera frame yet, skipping localization");
            return TickOutcome::NoFrame;
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("Localization already in flight, skipping tick");
            return TickOutcome::InFlight;
        }
        let guard = InFlightGuard(self.in_flight.clone());

        let snapshot = frame.clone();
        let epoch = self.epoch;
        let transport = self.transport.clone();
        let codec = self.codec.clone();
        let settings = self.settings.clone();
        let completion_tx = self.completion_tx.clone();

        self.issued += 1;
        tokio::spawn(async move {
            let result = localize_once(&*transport, codec, &settings, snapshot).await;
            // Free the slot before publishing, so a caller that observes the
            // completion can issue the next request immediately.
            drop(guard);

            match &result {
                Ok(aligned) => tracing::info!(
                    x = aligned.position.x,
                    y = aligned.position.y,
                    z = aligned.position.z,
                    "Localized"
                ),
                Err(RequestError::Rejected { reason }) => {
                    tracing::warn!(?reason, "Service could not localize image")
                }
                Err(e) => tracing::warn!(?e, "Localization attempt discarded"),
            }

            let _ = completion_tx.send(Completion { epoch, result });
        });

        TickOutcome::Issued { epoch }
    }

    /// Next finished request of the current epoch, if any, without waiting.
    pub fn try_completion(&mut self) -> Option<Result<AlignedPose, RequestError>> {
        while let Ok(completion) = self.completion_rx.try_recv() {
            if let Some(result) = self.current(completion) {
                return Some(result);
            }
        }
        None
    }

    /// Wait for the next finished request of the current epoch.
    pub async fn completion(&mut self) -> Option<Result<AlignedPose, RequestError>> {
        while let Some(completion) = self.completion_rx.recv().await {
            if let Some(result) = self.current(completion) {
                return Some(result);
            }
        }
        None
    }

    fn current(
        &self,
        completion: Completion,
    ) -> Option<Result<AlignedPose, RequestError>> {
        if completion.epoch == self.epoch {
            Some(completion.result)
        } else {
            tracing::debug!(
                issued = completion.epoch,
                current = self.epoch,
                "Discarding stale localization"
            );
            None
        }
    }

    /// Upload `frame` as a mapping capture.
    ///
    /// Independent of the localization slot; the caller decides when to capture.
    pub async fn capture(
        &self,
        frame: &CameraFrame,
        run: u32,
        index: u32,
        anchor: bool,
    ) -> Result<(), RequestError> {
        let header = CaptureRequest::new(&self.settings.token, frame, run, index, anchor);
        let image = encode_image(self.codec.clone(), frame.clone()).await?;
        let body = self
            .transport
            .post(Endpoint::Capture, encode_payload(&header, &image)?)
            .await?;

        let response: CaptureResponse = decode_response(&body)?;
        if response.is_success() {
            tracing::info!(run, index, "Image captured");
            Ok(())
        } else {
            Err(RequestError::Rejected {
                reason: Some(response.error),
            })
        }
    }
}

/// One localization round trip, from pixels to an aligned map pose.
async fn localize_once<T: Transport, C: ImageCodec>(
    transport: &T,
    codec: Arc<C>,
    settings: &ClientSettings,
    frame: CameraFrame,
) -> Result<AlignedPose, RequestError> {
    let header = LocalizeRequest::new(
        &settings.token,
        &frame,
        settings.solver_type,
        &settings.map_ids,
    );
    let tracker_space = frame.tracker_space();

    let image = encode_image(codec, frame).await?;
    let body = transport
        .post(Endpoint::Localize, encode_payload(&header, &image)?)
        .await?;

    let response: LocalizeResponse = decode_response(&body)?;
    let pose = response.pose()?.ok_or_else(|| RequestError::Rejected {
        reason: response.error.clone(),
    })?;

    let aligned = align(tracker_space, &pose)?;
    let deviation = aligned.scale_deviation();
    if deviation > settings.max_scale_deviation {
        return Err(RequestError::ScaleOutOfTolerance {
            deviation,
            limit: settings.max_scale_deviation,
        });
    }
    Ok(aligned)
}

/// Encode on the blocking pool so compression never stalls async tasks.
async fn encode_image<C: ImageCodec>(
    codec: Arc<C>,
    frame: CameraFrame,
) -> Result<Vec<u8>, RequestError> {
    let encoded = tokio::task::spawn_blocking(move || {
        codec.encode(&frame.pixels, frame.width, frame.height)
    })
    .await
    .map_err(|e| RequestError::EncoderTask(e.to_string()))?;
    Ok(encoded?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Quat, Vec3};
    use protocol::split_payload;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use vps_pose::Intrinsics;

    /// Transport that counts calls, records payloads and can hold requests
    /// open until released.
    #[derive(Default)]
    struct MockTransport {
        gated: bool,
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
        responses: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
        payloads: Mutex<Vec<(Endpoint, Vec<u8>)>>,
    }

    impl MockTransport {
        fn gated() -> Self {
            Self {
                gated: true,
                ..Self::default()
            }
        }

        fn respond(&self, response: Result<&str, TransportError>) {
            self.responses
                .lock()
                .unwrap()
                .push_back(response.map(|s| s.as_bytes().to_vec()));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockTransport {
        async fn post(
            &self,
            endpoint: Endpoint,
            payload: Vec<u8>,
        ) -> Result<Vec<u8>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push((endpoint, payload));
            self.entered.notify_one();
            if self.gated {
                self.release.notified().await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(TransportError::Unavailable("no response queued".into())))
        }
    }

    /// Sends the raw pixels as the image.
    struct RawCodec;

    impl ImageCodec for RawCodec {
        fn encode(&self, pixels: &[u8], _: u32, _: u32) -> Result<Vec<u8>, CodecError> {
            Ok(pixels.to_vec())
        }
    }

    /// Camera at the tracker origin looking down -Z; the map coincides with
    /// tracker space, so the service reports the identity in its convention.
    const IDENTITY_RESPONSE: &str = r#"{"success":true,
        "r00":1,"r01":0,"r02":0,"r10":0,"r11":-1,"r12":0,"r20":0,"r21":0,"r22":-1,
        "px":0,"py":0,"pz":0}"#;

    fn settings() -> ClientSettings {
        ClientSettings {
            token: "dev-token".into(),
            map_ids: vec![67628],
            solver_type: 1,
            max_scale_deviation: 0.1,
        }
    }

    fn frame() -> CameraFrame {
        CameraFrame {
            width: 4,
            height: 2,
            pixels: vec![10, 20, 30, 40, 50, 60, 70, 80],
            intrinsics: Intrinsics {
                fx: 400.0,
                fy: 400.0,
                ox: 2.0,
                oy: 1.0,
            },
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    fn client(transport: &Arc<MockTransport>) -> LocalizationClient<MockTransport, RawCodec> {
        LocalizationClient::new(transport.clone(), Arc::new(RawCodec), settings())
    }

    #[tokio::test]
    async fn second_tick_while_in_flight_is_a_no_op() {
        let transport = Arc::new(MockTransport::gated());
        transport.respond(Ok(IDENTITY_RESPONSE));
        transport.respond(Ok(IDENTITY_RESPONSE));
        let mut client = client(&transport);
        let frame = frame();

        assert_eq!(client.tick(Some(&frame)), TickOutcome::Issued { epoch: 0 });
        transport.entered.notified().await;
        assert_eq!(transport.calls(), 1);
        assert!(client.is_in_flight());

        assert_eq!(client.tick(Some(&frame)), TickOutcome::InFlight);
        assert_eq!(client.tick(Some(&frame)), TickOutcome::InFlight);
        tokio::task::yield_now().await;
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.requests_issued(), 1);

        transport.release.notify_one();
        let aligned = client.completion().await.unwrap().unwrap();
        assert!(aligned.transform.abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!(!client.is_in_flight());

        assert_eq!(client.tick(Some(&frame)), TickOutcome::Issued { epoch: 0 });
        transport.entered.notified().await;
        assert_eq!(transport.calls(), 2);
        transport.release.notify_one();
        assert!(client.completion().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn missing_frame_is_ignored() {
        let transport = Arc::new(MockTransport::default());
        let mut client = client(&transport);

        assert_eq!(client.tick(None), TickOutcome::NoFrame);
        let mut empty = frame();
        empty.pixels.clear();
        assert_eq!(client.tick(Some(&empty)), TickOutcome::NoFrame);

        assert_eq!(transport.calls(), 0);
        assert!(!client.is_in_flight());
    }

    #[tokio::test]
    async fn transport_failure_frees_the_slot() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Err(TransportError::Status(503)));
        transport.respond(Ok(IDENTITY_RESPONSE));
        let mut client = client(&transport);

        client.tick(Some(&frame()));
        let result = client.completion().await.unwrap();
        assert!(matches!(
            result,
            Err(RequestError::Transport(TransportError::Status(503)))
        ));
        assert!(!client.is_in_flight());

        assert_eq!(client.tick(Some(&frame())), TickOutcome::Issued { epoch: 0 });
        assert!(client.completion().await.unwrap().is_ok());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn service_rejection_is_reported() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Ok(r#"{"success":false,"error":"none"}"#));
        let mut client = client(&transport);

        client.tick(Some(&frame()));
        assert!(matches!(
            client.completion().await.unwrap(),
            Err(RequestError::Rejected { .. })
        ));
        assert!(!client.is_in_flight());
    }

    #[tokio::test]
    async fn malformed_response_is_reported() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Ok("Bad Gateway"));
        let mut client = client(&transport);

        client.tick(Some(&frame()));
        assert!(matches!(
            client.completion().await.unwrap(),
            Err(RequestError::Protocol(ProtocolError::Decode(_)))
        ));
    }

    #[tokio::test]
    async fn incomplete_pose_is_discarded() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Ok(r#"{"success":true,
            "r00":1,"r01":0,"r02":0,"r10":0,"r11":-1,"r12":0,"r20":0,"r21":0,"r22":-1}"#));
        let mut client = client(&transport);

        client.tick(Some(&frame()));
        assert!(matches!(
            client.completion().await.unwrap(),
            Err(RequestError::Protocol(ProtocolError::MissingField("px")))
        ));
        assert!(!client.is_in_flight());
    }

    #[tokio::test]
    async fn degenerate_and_scaled_poses_are_rejected() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Ok(r#"{"success":true,
            "r00":0,"r01":0,"r02":0,"r10":0,"r11":0,"r12":0,"r20":0,"r21":0,"r22":0,
            "px":1,"py":2,"pz":3}"#));
        transport.respond(Ok(r#"{"success":true,
            "r00":2,"r01":0,"r02":0,"r10":0,"r11":-2,"r12":0,"r20":0,"r21":0,"r22":-2,
            "px":0,"py":0,"pz":0}"#));
        let mut client = client(&transport);

        client.tick(Some(&frame()));
        assert!(matches!(
            client.completion().await.unwrap(),
            Err(RequestError::Align(AlignError::DegenerateTransform { .. }))
        ));

        client.tick(Some(&frame()));
        assert!(matches!(
            client.completion().await.unwrap(),
            Err(RequestError::ScaleOutOfTolerance { .. })
        ));
    }

    #[tokio::test]
    async fn request_carries_header_and_snapshot_pixels() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Ok(IDENTITY_RESPONSE));
        let mut client = client(&transport);

        let mut frame = frame();
        client.tick(Some(&frame));
        // Overwriting the engine buffer after the tick must not affect the request.
        frame.pixels.fill(0);
        client.completion().await.unwrap().unwrap();

        let payloads = transport.payloads.lock().unwrap();
        let (endpoint, payload) = &payloads[0];
        assert_eq!(*endpoint, Endpoint::Localize);

        let (header, image) = split_payload(payload).unwrap();
        assert_eq!(image, &[10, 20, 30, 40, 50, 60, 70, 80]);
        let header: serde_json::Value = serde_json::from_slice(header).unwrap();
        assert_eq!(header["token"], "dev-token");
        assert_eq!(header["mapIds"][0]["id"], 67628);
        assert_eq!(header["solverType"], 1);
    }

    #[tokio::test]
    async fn stale_completion_is_discarded() {
        let transport = Arc::new(MockTransport::gated());
        transport.respond(Ok(IDENTITY_RESPONSE));
        let mut client = client(&transport);

        assert_eq!(client.tick(Some(&frame())), TickOutcome::Issued { epoch: 0 });
        transport.entered.notified().await;
        client.invalidate();
        transport.release.notify_one();

        while client.is_in_flight() {
            tokio::task::yield_now().await;
        }
        assert!(client.try_completion().is_none());
        assert_eq!(client.epoch(), 1);
    }

    #[tokio::test]
    async fn capture_reports_service_status() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Ok(r#"{"error":"none"}"#));
        transport.respond(Ok(r#"{"error":"invalid token"}"#));
        let client = client(&transport);

        client.capture(&frame(), 0, 0, false).await.unwrap();
        let err = client.capture(&frame(), 0, 1, false).await.unwrap_err();
        assert!(matches!(err, RequestError::Rejected { reason: Some(ref r) } if r == "invalid token"));

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[0].0, Endpoint::Capture);
        let (header, _) = split_payload(&payloads[1].1).unwrap();
        let header: serde_json::Value = serde_json::from_slice(header).unwrap();
        assert_eq!(header["index"], 1);
        assert_eq!(header["anchor"], false);
    }
}
