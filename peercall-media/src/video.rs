//! Camera capture through GStreamer, encoded to VP8 inside the pipeline.

use crate::error::backend_error;
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use peercall_webrtc::{CaptureHandle, MediaAccessError, TrackKind};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const VIDEO_SOURCE_CLASS: &str = "Video/Source";
const PULL_TIMEOUT_MS: u64 = 100;
const ENCODE_PIPELINE: &str = "videoconvert ! videoscale ! videorate \
    ! video/x-raw,width=640,height=480,framerate=30/1 \
    ! vp8enc deadline=1 cpu-used=8 keyframe-max-dist=60 error-resilient=partitions \
    ! appsink name=sink max-buffers=4 drop=true sync=false";

fn gst_error(err: impl ToString) -> MediaAccessError {
    MediaAccessError::Unavailable(TrackKind::Video, err.to_string())
}

/// Maps an error posted by the camera source onto [`MediaAccessError`].
pub(crate) fn access_error(err: &gst::glib::Error) -> MediaAccessError {
    match err.kind::<gst::ResourceError>() {
        Some(gst::ResourceError::NotAuthorized) => MediaAccessError::PermissionDenied,
        Some(gst::ResourceError::NotFound) => MediaAccessError::NoDevice(TrackKind::Video),
        _ => backend_error(TrackKind::Video, err.message()),
    }
}

/// Picks `preferred_name` (substring match) among the cameras GStreamer can see, or the first one.
fn select_camera(preferred_name: Option<&str>) -> Result<gst::Device, MediaAccessError> {
    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some(VIDEO_SOURCE_CLASS), None);
    monitor.start().map_err(gst_error)?;
    let cameras: Vec<gst::Device> = monitor.devices().into_iter().collect();
    monitor.stop();

    tracing::debug!(
        cameras = ?cameras.iter().map(|camera| camera.display_name()).collect::<Vec<_>>(),
        "Enumerated cameras"
    );

    if let Some(name) = preferred_name {
        if let Some(camera) = cameras.iter().find(|camera| {
            camera
                .display_name()
                .to_lowercase()
                .contains(&name.to_lowercase())
        }) {
            return Ok(camera.clone());
        }
        tracing::warn!(%name, "Preferred camera not found, using first camera");
    }

    cameras
        .into_iter()
        .next()
        .ok_or(MediaAccessError::NoDevice(TrackKind::Video))
}

fn build_pipeline(
    camera: &gst::Device,
) -> Result<(gst::Pipeline, gst_app::AppSink), MediaAccessError> {
    let pipeline = gst::Pipeline::new();
    let source = camera.create_element(Some("source")).map_err(gst_error)?;
    let encode = gst::parse::bin_from_description(ENCODE_PIPELINE, true).map_err(gst_error)?;

    pipeline.add(&source).map_err(gst_error)?;
    pipeline.add(&encode).map_err(gst_error)?;
    source.link(&encode).map_err(gst_error)?;

    let appsink = encode
        .by_name("sink")
        .ok_or_else(|| gst_error("appsink not found"))?
        .downcast::<gst_app::AppSink>()
        .map_err(|_| gst_error("appsink type mismatch"))?;

    Ok((pipeline, appsink))
}

/// Returns the error the pipeline posted while failing to start, if any.
fn pipeline_error(pipeline: &gst::Pipeline) -> Option<MediaAccessError> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => {
            tracing::debug!(error = %err.error(), debug = ?err.debug(), "Camera pipeline error");
            Some(access_error(&err.error()))
        }
        _ => None,
    }
}

/// Starts the camera on a dedicated thread that pulls encoded VP8 frames into `frames_tx`.
#[instrument(level = "debug", skip(frames_tx), err)]
pub(crate) async fn start(
    preferred_camera: Option<String>,
    frames_tx: mpsc::Sender<Bytes>,
) -> Result<CaptureHandle, MediaAccessError> {
    gst::init().map_err(gst_error)?;

    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_cancel = cancel.clone();
    std::thread::Builder::new()
        .name("peercall-video-capture".to_string())
        .spawn(move || {
            run_capture(preferred_camera.as_deref(), frames_tx, thread_cancel, ready_tx);
        })
        .map_err(gst_error)?;

    ready_rx
        .await
        .map_err(|_| gst_error("capture thread exited before starting"))??;

    tracing::info!("Video capture started");
    Ok(CaptureHandle::new(TrackKind::Video, cancel))
}

fn run_capture(
    preferred_camera: Option<&str>,
    frames_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    ready_tx: oneshot::Sender<Result<(), MediaAccessError>>,
) {
    let (pipeline, appsink) = match open_pipeline(preferred_camera) {
        Ok(opened) => opened,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if ready_tx.send(Ok(())).is_err() {
        tracing::debug!("Capture start was abandoned");
        let _ = pipeline.set_state(gst::State::Null);
        return;
    }

    while !cancel.is_cancelled() && !frames_tx.is_closed() {
        let Some(sample) = appsink.try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        else {
            if appsink.is_eos() {
                tracing::warn!("Camera stream ended");
                break;
            }
            if let Some(err) = pipeline_error(&pipeline) {
                tracing::error!(%err, "Camera pipeline failed");
                break;
            }
            continue;
        };

        let Some(buffer) = sample.buffer() else {
            continue;
        };
        match buffer.map_readable() {
            Ok(map) => {
                if let Err(err) = frames_tx.try_send(Bytes::copy_from_slice(map.as_slice())) {
                    tracing::trace!(?err, "Dropped encoded video frame");
                }
            }
            Err(err) => tracing::warn!(?err, "Failed to map video buffer"),
        }
    }

    if let Err(err) = pipeline.set_state(gst::State::Null) {
        tracing::warn!(?err, "Failed to stop camera pipeline");
    }
    tracing::info!("Video capture stopped");
}

fn open_pipeline(
    preferred_camera: Option<&str>,
) -> Result<(gst::Pipeline, gst_app::AppSink), MediaAccessError> {
    let camera = select_camera(preferred_camera)?;
    tracing::debug!(camera = %camera.display_name(), "Opening camera");

    let (pipeline, appsink) = build_pipeline(&camera)?;
    if let Err(err) = pipeline.set_state(gst::State::Playing) {
        let access_error = pipeline_error(&pipeline).unwrap_or_else(|| gst_error(err));
        let _ = pipeline.set_state(gst::State::Null);
        return Err(access_error);
    }
    Ok((pipeline, appsink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resource_errors() {
        assert_eq!(
            access_error(&gst::glib::Error::new(
                gst::ResourceError::NotAuthorized,
                "Not authorized to access camera"
            )),
            MediaAccessError::PermissionDenied
        );
        assert_eq!(
            access_error(&gst::glib::Error::new(
                gst::ResourceError::NotFound,
                "Device '/dev/video0' does not exist."
            )),
            MediaAccessError::NoDevice(TrackKind::Video)
        );
        assert_eq!(
            access_error(&gst::glib::Error::new(
                gst::ResourceError::OpenReadWrite,
                "Could not open device '/dev/video0' for reading and writing: Permission denied"
            )),
            MediaAccessError::PermissionDenied
        );
        assert!(matches!(
            access_error(&gst::glib::Error::new(
                gst::ResourceError::Busy,
                "Device '/dev/video0' is busy"
            )),
            MediaAccessError::Unavailable(TrackKind::Video, _)
        ));
    }
}
