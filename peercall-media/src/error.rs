use cpal::{BuildStreamError, DevicesError, PlayStreamError, SupportedStreamConfigsError};
use peercall_webrtc::{MediaAccessError, TrackKind};

/// Maps capture backend failures onto [`MediaAccessError`].
pub(crate) trait IntoAccessError {
    fn into_access_error(self) -> MediaAccessError;
}

/// Backends only report denied access through their error text.
pub(crate) fn backend_error(kind: TrackKind, description: &str) -> MediaAccessError {
    let lower = description.to_lowercase();
    if ["permission", "denied", "not permitted", "not authorized", "eacces"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        MediaAccessError::PermissionDenied
    } else {
        MediaAccessError::Unavailable(kind, description.to_string())
    }
}

impl IntoAccessError for BuildStreamError {
    fn into_access_error(self) -> MediaAccessError {
        use BuildStreamError::*;
        match self {
            DeviceNotAvailable => MediaAccessError::NoDevice(TrackKind::Audio),
            StreamConfigNotSupported | InvalidArgument | StreamIdOverflow => {
                MediaAccessError::Unavailable(TrackKind::Audio, self.to_string())
            }
            BackendSpecific { err } => {
                tracing::debug!(?err, "Backend specific cpal build stream error");
                backend_error(TrackKind::Audio, &err.description)
            }
        }
    }
}

impl IntoAccessError for PlayStreamError {
    fn into_access_error(self) -> MediaAccessError {
        use PlayStreamError::*;
        match self {
            DeviceNotAvailable => MediaAccessError::NoDevice(TrackKind::Audio),
            BackendSpecific { err } => {
                tracing::debug!(?err, "Backend specific cpal play stream error");
                backend_error(TrackKind::Audio, &err.description)
            }
        }
    }
}

impl IntoAccessError for SupportedStreamConfigsError {
    fn into_access_error(self) -> MediaAccessError {
        match self {
            SupportedStreamConfigsError::DeviceNotAvailable => {
                MediaAccessError::NoDevice(TrackKind::Audio)
            }
            SupportedStreamConfigsError::BackendSpecific { err } => {
                backend_error(TrackKind::Audio, &err.description)
            }
            other => MediaAccessError::Unavailable(TrackKind::Audio, other.to_string()),
        }
    }
}

impl IntoAccessError for DevicesError {
    fn into_access_error(self) -> MediaAccessError {
        match self {
            DevicesError::BackendSpecific { err } => {
                backend_error(TrackKind::Audio, &err.description)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::BackendSpecificError;
    use pretty_assertions::assert_eq;

    fn backend_specific(description: &str) -> BackendSpecificError {
        BackendSpecificError {
            description: description.to_string(),
        }
    }

    #[test]
    fn denied_access_is_recognised() {
        for description in [
            "ALSA function 'snd_pcm_open' failed with error 'EACCES: Permission denied'",
            "Access is denied. (0x80070005)",
            "Operation not permitted",
        ] {
            assert_eq!(
                backend_error(TrackKind::Audio, description),
                MediaAccessError::PermissionDenied,
                "{description}"
            );
        }
    }

    #[test]
    fn other_backend_errors_are_unavailable() {
        assert_eq!(
            backend_error(TrackKind::Video, "Device or resource busy"),
            MediaAccessError::Unavailable(TrackKind::Video, "Device or resource busy".to_string())
        );
    }

    #[test]
    fn cpal_errors() {
        assert_eq!(
            BuildStreamError::DeviceNotAvailable.into_access_error(),
            MediaAccessError::NoDevice(TrackKind::Audio)
        );
        assert_eq!(
            BuildStreamError::BackendSpecific {
                err: backend_specific("Permission denied")
            }
            .into_access_error(),
            MediaAccessError::PermissionDenied
        );
        assert_eq!(
            PlayStreamError::DeviceNotAvailable.into_access_error(),
            MediaAccessError::NoDevice(TrackKind::Audio)
        );
        assert!(matches!(
            BuildStreamError::StreamConfigNotSupported.into_access_error(),
            MediaAccessError::Unavailable(TrackKind::Audio, _)
        ));
        assert!(matches!(
            DevicesError::BackendSpecific {
                err: backend_specific("host unavailable")
            }
            .into_access_error(),
            MediaAccessError::Unavailable(TrackKind::Audio, _)
        ));
    }
}
