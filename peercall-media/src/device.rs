use crate::TARGET_SAMPLE_RATE;
use crate::error::IntoAccessError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Sample, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};
use peercall_webrtc::{MediaAccessError, TrackKind};
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use tracing::instrument;

const PREFERRED_CHANNELS: u16 = 1;
const DEFAULT_RESAMPLER_CHUNK: usize = 1024;

/// Microphone picked for capture together with the stream config it will be opened with.
pub(crate) struct InputDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
}

impl InputDevice {
    /// Opens `preferred_name` (exact, then substring match) or the host's default input device.
    #[instrument(level = "debug", err)]
    pub(crate) fn open(preferred_name: Option<&str>) -> Result<Self, MediaAccessError> {
        let host = cpal::default_host();
        tracing::debug!(host = host.id().name(), "Opening input device");

        let device = Self::select_device(&host, preferred_name)?;
        let stream_config = Self::pick_stream_config(&device)?;

        tracing::debug!(device = ?DeviceDebug(&device), ?stream_config, "Opened input device");
        Ok(Self {
            device,
            config: stream_config.config(),
            sample_format: stream_config.sample_format(),
        })
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub(crate) fn channels(&self) -> usize {
        self.config.channels as usize
    }

    fn select_device(
        host: &cpal::Host,
        preferred_name: Option<&str>,
    ) -> Result<cpal::Device, MediaAccessError> {
        if let Some(name) = preferred_name {
            let devices: Vec<cpal::Device> = host
                .input_devices()
                .map_err(IntoAccessError::into_access_error)?
                .collect();

            let name_matches = |exact: bool| {
                devices.iter().find(|device| {
                    device.name().is_ok_and(|device_name| {
                        if exact {
                            device_name.eq_ignore_ascii_case(name)
                        } else {
                            device_name.to_lowercase().contains(&name.to_lowercase())
                        }
                    })
                })
            };
            if let Some(device) = name_matches(true).or_else(|| name_matches(false)) {
                return Ok(device.clone());
            }
            tracing::warn!(%name, "Preferred input device not found, using default device");
        }

        host.default_input_device()
            .ok_or(MediaAccessError::NoDevice(TrackKind::Audio))
    }

    fn pick_stream_config(
        device: &cpal::Device,
    ) -> Result<SupportedStreamConfig, MediaAccessError> {
        let configs = device
            .supported_input_configs()
            .map_err(IntoAccessError::into_access_error)?;

        let (range, score) = configs
            .map(|range| {
                let score = StreamConfigScore::of(&range);
                (range, score)
            })
            .min_by_key(|(_, score)| *score)
            .ok_or_else(|| {
                MediaAccessError::Unavailable(
                    TrackKind::Audio,
                    "no supported input stream config".to_string(),
                )
            })?;

        let sample_rate =
            closest_sample_rate(range.min_sample_rate().0, range.max_sample_rate().0);
        tracing::trace!(?range, ?score, sample_rate, "Picked input stream config");
        Ok(range.with_sample_rate(cpal::SampleRate(sample_rate)))
    }

    /// Builds an input stream handing `data_callback` interleaved f32 samples, whatever the
    /// device's native sample format.
    pub(crate) fn build_input_stream<D, E>(
        &self,
        data_callback: D,
        error_callback: E,
    ) -> Result<cpal::Stream, MediaAccessError>
    where
        D: FnMut(&[f32], &cpal::InputCallbackInfo) + Send + 'static,
        E: FnMut(cpal::StreamError) + Send + 'static,
    {
        match self.sample_format {
            SampleFormat::F32 => self
                .device
                .build_input_stream::<f32, _, _>(&self.config, data_callback, error_callback, None)
                .map_err(IntoAccessError::into_access_error),
            SampleFormat::I16 => {
                self.build_f32_input_stream::<i16, _, _>(data_callback, error_callback)
            }
            SampleFormat::U16 => {
                self.build_f32_input_stream::<u16, _, _>(data_callback, error_callback)
            }
            other => Err(MediaAccessError::Unavailable(
                TrackKind::Audio,
                format!("unsupported input sample format {other:?}"),
            )),
        }
    }

    fn build_f32_input_stream<T, D, E>(
        &self,
        mut data_callback: D,
        error_callback: E,
    ) -> Result<cpal::Stream, MediaAccessError>
    where
        T: Sample<Float = f32> + cpal::SizedSample + 'static,
        D: FnMut(&[f32], &cpal::InputCallbackInfo) + Send + 'static,
        E: FnMut(cpal::StreamError) + Send + 'static,
    {
        let buf: RefCell<Vec<f32>> = RefCell::new(Vec::new());

        self.device
            .build_input_stream::<T, _, _>(
                &self.config,
                move |input: &[T], info| {
                    let mut b = buf.borrow_mut();
                    b.clear();
                    b.extend(input.iter().map(|sample| sample.to_float_sample()));
                    data_callback(&b, info);
                },
                error_callback,
                None,
            )
            .map_err(IntoAccessError::into_access_error)
    }

    /// Resampler to the Opus rate, `None` if the device already runs at it.
    pub(crate) fn resampler(&self) -> Result<Option<SincFixedIn<f32>>, MediaAccessError> {
        if self.sample_rate() == TARGET_SAMPLE_RATE {
            return Ok(None);
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let chunk = match self.config.buffer_size {
            cpal::BufferSize::Fixed(n) => n as usize,
            cpal::BufferSize::Default => DEFAULT_RESAMPLER_CHUNK,
        };

        SincFixedIn::<f32>::new(
            TARGET_SAMPLE_RATE as f64 / self.sample_rate() as f64,
            2.0,
            params,
            chunk,
            1,
        )
        .map(Some)
        .map_err(|err| MediaAccessError::Unavailable(TrackKind::Audio, err.to_string()))
    }
}

impl Debug for InputDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputDevice")
            .field("device", &DeviceDebug(&self.device))
            .field("config", &self.config)
            .field("sample_format", &self.sample_format)
            .finish()
    }
}

/// Lower is better: distance to the Opus rate, then to mono, then sample format preference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct StreamConfigScore(u32, u16, u8);

impl StreamConfigScore {
    fn of(range: &SupportedStreamConfigRange) -> Self {
        Self::new(
            range.min_sample_rate().0,
            range.max_sample_rate().0,
            range.channels(),
            range.sample_format(),
        )
    }

    fn new(min_rate: u32, max_rate: u32, channels: u16, format: SampleFormat) -> Self {
        let rate_distance = closest_sample_rate(min_rate, max_rate).abs_diff(TARGET_SAMPLE_RATE);
        let format_preference = match format {
            SampleFormat::F32 => 0,
            SampleFormat::I16 => 1,
            SampleFormat::U16 => 2,
            _ => 3,
        };
        Self(
            rate_distance,
            channels.abs_diff(PREFERRED_CHANNELS),
            format_preference,
        )
    }
}

fn closest_sample_rate(min: u32, max: u32) -> u32 {
    TARGET_SAMPLE_RATE.clamp(min, max.max(min))
}

struct DeviceDebug<'a>(&'a cpal::Device);

impl Debug for DeviceDebug<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device")
            .field(&self.0.name().unwrap_or_default())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sample_rate_is_clamped_to_range() {
        assert_eq!(closest_sample_rate(8_000, 96_000), 48_000);
        assert_eq!(closest_sample_rate(8_000, 44_100), 44_100);
        assert_eq!(closest_sample_rate(88_200, 192_000), 88_200);
        assert_eq!(closest_sample_rate(48_000, 48_000), 48_000);
    }

    #[test]
    fn opus_rate_mono_float_scores_best() {
        let best = StreamConfigScore::new(44_100, 48_000, 1, SampleFormat::F32);
        let stereo = StreamConfigScore::new(44_100, 48_000, 2, SampleFormat::F32);
        let integer = StreamConfigScore::new(48_000, 48_000, 1, SampleFormat::I16);
        let cd_rate = StreamConfigScore::new(44_100, 44_100, 1, SampleFormat::F32);

        assert!(best < stereo);
        assert!(best < integer);
        assert!(stereo < cd_rate);
        assert!(integer < cd_rate);
    }
}
