use facemood_core::{DetectorOptions, EmotionLabels};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_BIND: &str = "127.0.0.1:8501";
const DEFAULT_USERS_PATH: &str = "auth/users.csv";
const DEFAULT_MODEL_PATH: &str = "Emotions.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_MAX_IMAGE_SIDE: u32 = 1280;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Optional settings read from the TOML file named by `FACEMOOD_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    users_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    labels: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_image_side: Option<u32>,
    max_upload_bytes: Option<usize>,
    background_image: Option<PathBuf>,
    admin_user: Option<String>,
    admin_password: Option<String>,
}

/// Daemon configuration: defaults, then the optional TOML file, then
/// `FACEMOOD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address the HTTP server listens on.
    pub bind: SocketAddr,
    /// CSV file holding user accounts.
    pub users_path: PathBuf,
    /// ONNX emotion model.
    pub model_path: PathBuf,
    /// Class names in model output order.
    pub labels: EmotionLabels,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Uploads with a longer side than this are downscaled before inference.
    pub max_image_side: u32,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
    /// Optional page background served at `/background`.
    pub background_image: Option<PathBuf>,
    /// Admin account created at startup when the store has no admin.
    pub admin_seed: Option<AdminSeed>,
}

#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load from the process environment, reading `FACEMOOD_CONFIG` if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var("FACEMOOD_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok())
    }

    /// Merge file settings with environment lookups over the defaults.
    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = env("FACEMOOD_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "bind",
            value: bind_raw.clone(),
        })?;

        let labels = match env("FACEMOOD_LABELS") {
            Some(raw) => EmotionLabels::parse_list(&raw),
            None => file.labels.map(EmotionLabels::new).unwrap_or_default(),
        };
        if labels.is_empty() {
            return Err(ConfigError::Invalid {
                key: "labels",
                value: String::new(),
            });
        }

        let confidence_threshold = env_parse(&env, "FACEMOOD_CONFIDENCE", "confidence_threshold")?
            .or(file.confidence_threshold)
            .unwrap_or(DEFAULT_CONFIDENCE);
        let iou_threshold = env_parse(&env, "FACEMOOD_IOU", "iou_threshold")?
            .or(file.iou_threshold)
            .unwrap_or(DEFAULT_IOU);
        for (key, value) in [("confidence_threshold", confidence_threshold), ("iou_threshold", iou_threshold)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid { key, value: value.to_string() });
            }
        }

        let admin_user = env("FACEMOOD_ADMIN_USER").or(file.admin_user);
        let admin_password = env("FACEMOOD_ADMIN_PASSWORD").or(file.admin_password);
        let admin_seed = match (admin_user, admin_password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(AdminSeed { username, password })
            }
            _ => None,
        };

        Ok(Self {
            bind,
            users_path: env("FACEMOOD_USERS_PATH")
                .map(PathBuf::from)
                .or(file.users_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_USERS_PATH)),
            model_path: env("FACEMOOD_MODEL_PATH")
                .map(PathBuf::from)
                .or(file.model_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels,
            confidence_threshold,
            iou_threshold,
            max_image_side: env_parse(&env, "FACEMOOD_MAX_IMAGE_SIDE", "max_image_side")?
                .or(file.max_image_side)
                .unwrap_or(DEFAULT_MAX_IMAGE_SIDE),
            max_upload_bytes: env_parse(&env, "FACEMOOD_MAX_UPLOAD_BYTES", "max_upload_bytes")?
                .or(file.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            background_image: env("FACEMOOD_BACKGROUND")
                .map(PathBuf::from)
                .or(file.background_image),
            admin_seed,
        })
    }

    /// Post-processing options handed to the detector.
    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            labels: self.labels.clone(),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    var: &str,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(None),
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with the user table at `users_path`.
    pub(crate) fn for_tests(users_path: PathBuf) -> Self {
        let mut config = Self::resolve(FileConfig::default(), |_| None).unwrap();
        config.users_path = users_path;
        config
    }
}
