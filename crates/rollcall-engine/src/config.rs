use rollcall_core::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Engine configuration.
///
/// Defaults, then an optional TOML file named by `ROLLCALL_CONFIG`, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite descriptor database.
    pub db_path: PathBuf,
    /// Euclidean distance a match must stay strictly below.
    pub match_threshold: f32,
    /// Number of samples averaged per enrollment.
    pub enroll_samples: usize,
    /// Pause before each enrollment sample.
    pub enroll_sample_delay: Duration,
    /// Recognition tick period.
    pub poll_interval: Duration,
    /// How many recent matches a recognition session remembers.
    pub recent_matches: usize,
}

/// Subset of [`Config`] driving the enrollment protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrollmentConfig {
    pub samples: usize,
    pub sample_delay: Duration,
}

/// Subset of [`Config`] driving the recognition loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionConfig {
    pub match_threshold: f32,
    pub poll_interval: Duration,
    pub recent_matches: usize,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            sample_delay: Duration::from_millis(500),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            poll_interval: Duration::from_millis(100),
            recent_matches: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let enroll = EnrollmentConfig::default();
        let recognition = RecognitionConfig::default();
        Self {
            db_path: default_data_dir().join("descriptors.db"),
            match_threshold: recognition.match_threshold,
            enroll_samples: enroll.samples,
            enroll_sample_delay: enroll.sample_delay,
            poll_interval: recognition.poll_interval,
            recent_matches: recognition.recent_matches,
        }
    }
}

/// On-disk shape; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    enroll_samples: Option<usize>,
    enroll_sample_delay_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    recent_matches: Option<usize>,
}

impl Config {
    /// Load and validate configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env();
        config.validate()?;

        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Overlay values from a TOML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.enroll_samples {
            self.enroll_samples = v;
        }
        if let Some(v) = file.enroll_sample_delay_ms {
            self.enroll_sample_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.poll_interval_ms {
            self.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = file.recent_matches {
            self.recent_matches = v;
        }
        Ok(())
    }

    /// Overlay `ROLLCALL_*` environment variables. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.enroll_samples = env_parse("ROLLCALL_ENROLL_SAMPLES", self.enroll_samples);
        self.enroll_sample_delay = Duration::from_millis(env_parse(
            "ROLLCALL_ENROLL_SAMPLE_DELAY_MS",
            self.enroll_sample_delay.as_millis() as u64,
        ));
        self.poll_interval = Duration::from_millis(env_parse(
            "ROLLCALL_POLL_INTERVAL_MS",
            self.poll_interval.as_millis() as u64,
        ));
        self.recent_matches = env_parse("ROLLCALL_RECENT_MATCHES", self.recent_matches);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                reason: format!("must be a positive number, got {}", self.match_threshold),
            });
        }
        if self.enroll_samples == 0 {
            return Err(ConfigError::Invalid {
                key: "enroll_samples",
                reason: "must be at least 1".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                reason: "must be greater than 0".into(),
            });
        }
        if self.recent_matches == 0 {
            return Err(ConfigError::Invalid {
                key: "recent_matches",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn enrollment(&self) -> EnrollmentConfig {
        EnrollmentConfig {
            samples: self.enroll_samples,
            sample_delay: self.enroll_sample_delay,
        }
    }

    pub fn recognition(&self) -> RecognitionConfig {
        RecognitionConfig {
            match_threshold: self.match_threshold,
            poll_interval: self.poll_interval,
            recent_matches: self.recent_matches,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
