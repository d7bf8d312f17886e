use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_SPOTIFY_API_BASE: &str = "https://api.spotify.com";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SEARCH_LIMIT: u32 = 5;
const DEFAULT_VOLUME: f32 = 0.5;
const DEFAULT_SEED_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: Secret,
    pub token_url: String,
    pub api_base: String,
    pub search_limit: u32,
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: Secret,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// Still images in a directory, cycled in file-name order.
    Directory(PathBuf),
    /// External grabber that writes one encoded image to stdout per run.
    /// Parsed with POSIX shell quoting, so arguments may contain spaces.
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interval: Duration,
    pub continuous: bool,
    pub camera: Option<CameraSource>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_CAPTURE_INTERVAL_SECS),
            continuous: false,
            camera: None,
        }
    }
}

/// Result of an authorization that happened outside this process.
#[derive(Debug, Clone)]
pub struct CredentialSeed {
    pub refresh_token: Secret,
    pub access_token: Option<Secret>,
    pub expires_in: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub spotify: SpotifyConfig,
    pub inference: InferenceConfig,
    pub capture: CaptureConfig,
    pub volume: f32,
    pub request_timeout: Duration,
    pub seed: Option<CredentialSeed>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        // Credentials first: a half-configured process should not get as far as the network.
        let client_id = required("SPOTIFY_CLIENT_ID")?;
        let client_secret = Secret::new(required("SPOTIFY_CLIENT_SECRET")?);
        let api_key = Secret::new(required("OPENAI_API_KEY")?);

        let search_limit = parse_or(&get, "SPOTIFY_SEARCH_LIMIT", DEFAULT_SEARCH_LIMIT)?;
        if !(1..=50).contains(&search_limit) {
            return Err(invalid("SPOTIFY_SEARCH_LIMIT", search_limit, "must be between 1 and 50"));
        }

        let interval_secs =
            parse_or(&get, "MOODPLAY_CAPTURE_INTERVAL_SECS", DEFAULT_CAPTURE_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(invalid("MOODPLAY_CAPTURE_INTERVAL_SECS", interval_secs, "must be greater than zero"));
        }

        let timeout_secs = parse_or(&get, "MOODPLAY_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(invalid("MOODPLAY_REQUEST_TIMEOUT_SECS", timeout_secs, "must be greater than zero"));
        }

        let volume: f32 = parse_or(&get, "MOODPLAY_VOLUME", DEFAULT_VOLUME)?;
        if !volume.is_finite() {
            return Err(invalid("MOODPLAY_VOLUME", volume, "must be a number"));
        }

        let continuous = get("MOODPLAY_CONTINUOUS")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let camera = match (get("MOODPLAY_CAMERA_DIR"), get("MOODPLAY_CAMERA_COMMAND")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid {
                    name: "MOODPLAY_CAMERA_COMMAND",
                    value: String::new(),
                    reason: "set either MOODPLAY_CAMERA_DIR or MOODPLAY_CAMERA_COMMAND, not both".into(),
                })
            }
            (Some(dir), None) => Some(CameraSource::Directory(PathBuf::from(dir))),
            (None, Some(command)) => {
                let mut parts = shell_words::split(&command)
                    .map_err(|err| invalid("MOODPLAY_CAMERA_COMMAND", &command, &err.to_string()))?
                    .into_iter();
                let Some(program) = parts.next().filter(|program| !program.is_empty()) else {
                    return Err(invalid("MOODPLAY_CAMERA_COMMAND", &command, "names no program"));
                };
                Some(CameraSource::Command {
                    program,
                    args: parts.collect(),
                })
            }
            (None, None) => None,
        };

        let seed = match get("SPOTIFY_REFRESH_TOKEN") {
            Some(refresh_token) => Some(CredentialSeed {
                refresh_token: Secret::new(refresh_token),
                access_token: get("SPOTIFY_ACCESS_TOKEN").map(Secret::new),
                expires_in: Duration::from_secs(parse_or(
                    &get,
                    "SPOTIFY_ACCESS_TOKEN_EXPIRES_IN",
                    DEFAULT_SEED_EXPIRES_IN_SECS,
                )?),
            }),
            None => None,
        };

        Ok(Self {
            spotify: SpotifyConfig {
                client_id,
                client_secret,
                token_url: get("SPOTIFY_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.into()),
                api_base: get("SPOTIFY_API_BASE").unwrap_or_else(|| DEFAULT_SPOTIFY_API_BASE.into()),
                search_limit,
            },
            inference: InferenceConfig {
                api_key,
                api_base: get("OPENAI_API_BASE").unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.into()),
                model: get("MOODPLAY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            },
            capture: CaptureConfig {
                interval: Duration::from_secs(interval_secs),
                continuous,
                camera,
            },
            volume: volume.clamp(0.0, 1.0),
            request_timeout: Duration::from_secs(timeout_secs),
            seed,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            value: raw,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn invalid(name: &'static str, value: impl fmt::Display, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
