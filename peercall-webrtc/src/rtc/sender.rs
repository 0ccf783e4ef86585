use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::{Instrument, instrument};
use webrtc::media::Sample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Writes encoded frames from the capture pipeline onto a local track.
pub(crate) struct Sender {
    shutdown_tx: watch::Sender<()>,
}

impl Sender {
    #[instrument(level = "trace", skip_all, fields(track_id = %track.id()))]
    pub fn new(
        track: Arc<TrackLocalStaticSample>,
        frame_duration: Duration,
        mut input_rx: mpsc::Receiver<Bytes>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        tokio::runtime::Handle::current().spawn(
            async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            tracing::trace!("Shutdown signalled, stopping sending");
                            break;
                        }
                        frame = input_rx.recv() => {
                            match frame {
                                Some(frame) => {
                                    let sample = Sample {
                                        data: frame,
                                        duration: frame_duration,
                                        ..Default::default()
                                    };

                                    if let Err(err) = track.write_sample(&sample).await {
                                        tracing::warn!(?err, "Failed to write sample to track");
                                    }
                                }
                                None => {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            .instrument(tracing::Span::current()),
        );

        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.shutdown();
    }
}
