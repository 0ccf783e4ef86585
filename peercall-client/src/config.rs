use crate::session::{CallSettings, OfferPolicy};
use anyhow::Context;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use peercall_media::DeviceCapture;
use peercall_protocol::IceConfig;
use peercall_webrtc::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

pub const DEFAULT_SETTINGS_FILE_NAME: &str = "config.toml";
pub const ENV_PREFIX: &str = "peercall";
pub const REMOTE_FRAMES_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub call: CallConfig,
}

impl AppConfig {
    /// Layers defaults, `<config_dir>/config.toml`, `./config.toml` and `PEERCALL_*`
    /// environment variables, later sources overriding earlier ones.
    pub fn parse(config_dir: &Path) -> anyhow::Result<Self> {
        let builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(config_dir.join(DEFAULT_SETTINGS_FILE_NAME)).required(false))
            .add_source(File::with_name(DEFAULT_SETTINGS_FILE_NAME).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let config = builder
            .build()
            .context("Failed to build config")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.signaling.url)
            .with_context(|| format!("Invalid signaling URL {}", self.signaling.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            anyhow::bail!(
                "Signaling URL must use ws or wss, got {}",
                url.scheme()
            );
        }

        if let Some(server) = self.ice.ice_servers.iter().find(|s| s.urls.is_empty()) {
            anyhow::bail!("ICE server entry without URLs: {server:?}");
        }

        if !self.media.audio && !self.media.video {
            anyhow::bail!("At least one of media.audio and media.video must be enabled");
        }

        Ok(())
    }

    pub fn capture(&self) -> DeviceCapture {
        DeviceCapture::new()
            .with_audio_device(self.media.audio_device.clone())
            .with_camera(self.media.camera.clone())
    }

    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            ice: self.ice.clone(),
            constraints: MediaConstraints {
                audio: self.media.audio,
                video: self.media.video,
            },
            offer_policy: self.call.offer_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub audio: bool,
    /// Defaults to on only in builds with camera support.
    pub video: bool,
    /// Name (or part of it) of the microphone to use instead of the default input device.
    #[serde(default)]
    pub audio_device: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: DeviceCapture::supports_video(),
            audio_device: None,
            camera: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallConfig {
    pub offer_policy: OfferPolicy,
}
