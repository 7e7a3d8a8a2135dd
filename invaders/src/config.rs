use crate::domain::error::PipelineError;
use crate::domain::error::PipelineError::ConfigurationError;
use clap::{Parser, ValueEnum};
use reqwest::Url;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://space-invaders.com/api/flashesV2/";
pub const DEFAULT_STORAGE_URL: &str = "https://storage.googleapis.com";

/// Download every invader a player flashed, optionally pushing the images to a bucket.
#[derive(Debug, Parser)]
#[command(name = "invaders", version)]
pub struct Cli {
    /// Player identifier (the `uid` of the flashes API).
    #[arg(env = "INVADERS_UID")]
    pub uid: Option<String>,

    /// Metadata endpoint, queried with `?uid=<UID>`.
    #[arg(long, env = "INVADERS_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: Url,

    /// Local directory the images are staged in.
    #[arg(long, env = "INVADERS_STAGING_DIR", default_value = "invaders")]
    pub staging_dir: PathBuf,

    /// Bucket to upload to. Images stay local when omitted.
    #[arg(long, env = "INVADERS_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long, env = "INVADERS_STORAGE_URL", default_value = DEFAULT_STORAGE_URL)]
    pub storage_url: Url,

    /// OAuth2 access token sent as a bearer token to the storage API.
    #[arg(long, env = "GCS_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, value_enum, env = "INVADERS_MODE", default_value_t = FanOutMode::Concurrent)]
    pub mode: FanOutMode,

    /// Cap on downloads in flight (concurrent mode only).
    #[arg(long, env = "INVADERS_MAX_IN_FLIGHT")]
    pub max_in_flight: Option<usize>,

    /// Only process the first K invaders (sequential mode only).
    #[arg(long, env = "INVADERS_LIMIT")]
    pub limit: Option<usize>,

    #[arg(long, value_enum, env = "INVADERS_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FanOutMode {
    Concurrent,
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Cloud Logging compatible JSON lines.
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Every record in flight at once, or at most `max_in_flight`.
    Concurrent { max_in_flight: Option<NonZeroUsize> },
    /// One record at a time in server order; the first failure ends the run.
    Sequential { limit: Option<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    DownloadOnly,
    DownloadAndUpload { bucket: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub uid: String,
    pub api_url: Url,
    pub staging_dir: PathBuf,
    pub storage_url: Url,
    pub access_token: Option<String>,
    pub mode: Mode,
    pub fan_out: FanOut,
}

impl Cli {
    /// Validates the raw arguments. Nothing here touches the network.
    pub fn into_settings(self) -> Result<Settings, PipelineError> {
        let uid = self
            .uid
            .map(|uid| uid.trim().to_string())
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| ConfigurationError {
                setting: "uid".to_string(),
                reason: "The UUID param is needed. Ex: `invaders $UUID`".to_string(),
            })?;

        let mode = match self.bucket.map(|bucket| bucket.trim().to_string()) {
            None => Mode::DownloadOnly,
            Some(bucket) if bucket.is_empty() => {
                return Err(ConfigurationError {
                    setting: "bucket".to_string(),
                    reason: "bucket name is blank".to_string(),
                })
            }
            Some(bucket) => Mode::DownloadAndUpload { bucket },
        };

        let fan_out = match (self.mode, self.max_in_flight, self.limit) {
            (FanOutMode::Concurrent, _, Some(_)) => {
                return Err(ConfigurationError {
                    setting: "limit".to_string(),
                    reason: "only applies to sequential mode".to_string(),
                })
            }
            (FanOutMode::Sequential, Some(_), _) => {
                return Err(ConfigurationError {
                    setting: "max-in-flight".to_string(),
                    reason: "only applies to concurrent mode".to_string(),
                })
            }
            (FanOutMode::Concurrent, Some(max), None) => FanOut::Concurrent {
                max_in_flight: Some(NonZeroUsize::new(max).ok_or_else(|| ConfigurationError {
                    setting: "max-in-flight".to_string(),
                    reason: "must be at least 1".to_string(),
                })?),
            },
            (FanOutMode::Concurrent, None, None) => FanOut::Concurrent {
                max_in_flight: None,
            },
            (FanOutMode::Sequential, None, limit) => FanOut::Sequential { limit },
        };

        Ok(Settings {
            uid,
            api_url: self.api_url,
            staging_dir: self.staging_dir,
            storage_url: self.storage_url,
            access_token: self.access_token.filter(|token| !token.is_empty()),
            mode,
            fan_out,
        })
    }
}
