use crate::device::InputDevice;
use crate::dsp::downmix_interleaved_to_mono;
use crate::{FRAME_SIZE, TARGET_SAMPLE_RATE};
use bytes::Bytes;
use cpal::traits::StreamTrait;
use peercall_webrtc::{CaptureHandle, MediaAccessError, TrackKind};
use ringbuf::HeapRb;
use ringbuf::consumer::Consumer;
use ringbuf::producer::Producer;
use ringbuf::traits::Split;
use rubato::Resampler;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const MAX_OPUS_FRAME_SIZE: usize = 1275; // RFC 6716 3.2.1
const MIN_INPUT_BUFFER_SIZE: usize = 4096;
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Starts capturing the microphone on a dedicated thread, which owns the cpal stream and encodes
/// 20ms mono Opus frames into `frames_tx`. Returns once the device is open and playing.
#[instrument(level = "debug", skip(frames_tx), err)]
pub(crate) async fn start(
    preferred_device: Option<String>,
    frames_tx: mpsc::Sender<Bytes>,
) -> Result<CaptureHandle, MediaAccessError> {
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_cancel = cancel.clone();
    std::thread::Builder::new()
        .name("peercall-audio-capture".to_string())
        .spawn(move || {
            run_capture(preferred_device.as_deref(), frames_tx, thread_cancel, ready_tx);
        })
        .map_err(|err| MediaAccessError::Unavailable(TrackKind::Audio, err.to_string()))?;

    ready_rx.await.map_err(|_| {
        MediaAccessError::Unavailable(
            TrackKind::Audio,
            "capture thread exited before starting".to_string(),
        )
    })??;

    tracing::info!("Audio capture started");
    Ok(CaptureHandle::new(TrackKind::Audio, cancel))
}

fn run_capture(
    preferred_device: Option<&str>,
    frames_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    ready_tx: oneshot::Sender<Result<(), MediaAccessError>>,
) {
    let (stream, mut pipeline) = match open_stream(preferred_device, frames_tx, &cancel) {
        Ok(opened) => opened,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if ready_tx.send(Ok(())).is_err() {
        tracing::debug!("Capture start was abandoned");
        return;
    }

    while !cancel.is_cancelled() {
        if !pipeline.poll() {
            break;
        }
    }

    drop(stream);
    tracing::info!("Audio capture stopped");
}

fn open_stream(
    preferred_device: Option<&str>,
    frames_tx: mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> Result<(cpal::Stream, EncodePipeline), MediaAccessError> {
    let device = InputDevice::open(preferred_device)?;
    let channels = device.channels();

    // ~100ms of mono input
    let (mut input_prod, input_cons) =
        HeapRb::<f32>::new(((device.sample_rate() / 10) as usize).max(MIN_INPUT_BUFFER_SIZE))
            .split();

    let mut mono_buf: Vec<f32> = Vec::with_capacity(MIN_INPUT_BUFFER_SIZE);
    let error_cancel = cancel.clone();
    let stream = device.build_input_stream(
        move |input: &[f32], _| {
            let mono: &[f32] = if channels > 1 {
                downmix_interleaved_to_mono(input, channels, &mut mono_buf);
                &mono_buf
            } else {
                input
            };

            let pushed = input_prod.push_slice(mono);
            if pushed < mono.len() {
                tracing::trace!(dropped = mono.len() - pushed, "Input buffer overflow");
            }
        },
        move |err| {
            tracing::error!(?err, "Audio capture stream error");
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                error_cancel.cancel();
            }
        },
    )?;
    stream
        .play()
        .map_err(crate::error::IntoAccessError::into_access_error)?;

    let pipeline = EncodePipeline {
        input_cons,
        resampler: device.resampler()?,
        resampler_buf: vec![Vec::with_capacity(FRAME_SIZE * 2)],
        stash: vec![0.0; MIN_INPUT_BUFFER_SIZE],
        framer: OpusFramer::new(frames_tx)?,
    };
    tracing::debug!(?device, resampling = pipeline.resampler.is_some(), "Audio input opened");
    Ok((stream, pipeline))
}

struct EncodePipeline {
    input_cons: ringbuf::HeapCons<f32>,
    resampler: Option<rubato::SincFixedIn<f32>>,
    resampler_buf: Vec<Vec<f32>>,
    stash: Vec<f32>,
    framer: OpusFramer,
}

impl EncodePipeline {
    /// Moves buffered input through the resampler into the framer. Returns `false` once the
    /// frames receiver is gone.
    fn poll(&mut self) -> bool {
        let n = self.input_cons.pop_slice(&mut self.stash);
        if n == 0 {
            std::thread::sleep(INPUT_POLL_INTERVAL);
            return true;
        }

        match &mut self.resampler {
            Some(resampler) => {
                let mut samples = &self.stash[..n];
                while !samples.is_empty() {
                    let need = resampler.input_frames_next() - self.resampler_buf[0].len();
                    let take = need.min(samples.len());
                    self.resampler_buf[0].extend_from_slice(&samples[..take]);
                    samples = &samples[take..];

                    if self.resampler_buf[0].len() == resampler.input_frames_next() {
                        match resampler.process(&self.resampler_buf, None) {
                            Ok(resampled) => self.framer.push_slice(&resampled[0]),
                            Err(err) => tracing::warn!(?err, "Failed to resample input"),
                        }
                        self.resampler_buf[0].clear();
                    }
                }
            }
            None => self.framer.push_slice(&self.stash[..n]),
        }

        !self.framer.is_closed()
    }
}

/// Cuts 48kHz mono samples into 20ms frames and encodes each into one Opus packet.
struct OpusFramer {
    frame: [f32; FRAME_SIZE],
    pos: usize,
    encoder: opus::Encoder,
    encoded: Vec<u8>,
    tx: mpsc::Sender<Bytes>,
}

impl OpusFramer {
    fn new(tx: mpsc::Sender<Bytes>) -> Result<Self, MediaAccessError> {
        let encoder_error =
            |err: opus::Error| MediaAccessError::Unavailable(TrackKind::Audio, err.to_string());

        let mut encoder = opus::Encoder::new(
            TARGET_SAMPLE_RATE,
            opus::Channels::Mono,
            opus::Application::Voip,
        )
        .map_err(encoder_error)?;
        encoder.set_inband_fec(true).map_err(encoder_error)?;

        Ok(Self {
            frame: [0.0f32; FRAME_SIZE],
            pos: 0,
            encoder,
            encoded: vec![0u8; MAX_OPUS_FRAME_SIZE],
            tx,
        })
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push_slice(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let take = (FRAME_SIZE - self.pos).min(samples.len());
            self.frame[self.pos..self.pos + take].copy_from_slice(&samples[..take]);
            self.pos += take;
            samples = &samples[take..];

            if self.pos == FRAME_SIZE {
                self.pos = 0;
                match self.encoder.encode_float(&self.frame, &mut self.encoded) {
                    Ok(len) => {
                        let packet = Bytes::copy_from_slice(&self.encoded[..len]);
                        if let Err(err) = self.tx.try_send(packet) {
                            tracing::trace!(?err, "Dropped encoded audio frame");
                        }
                    }
                    Err(err) => tracing::warn!(?err, "Failed to encode audio frame"),
                }
            }
        }
    }
}
