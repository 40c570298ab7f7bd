use clockface_core::{MatchProfile, ProfileName};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Match profile chosen by name or given in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileSetting {
    Named(ProfileName),
    Custom(MatchProfile),
}

impl ProfileSetting {
    pub fn resolve(&self) -> MatchProfile {
        match self {
            ProfileSetting::Named(name) => name.profile(),
            ProfileSetting::Custom(profile) => profile.clone(),
        }
    }
}

impl Default for ProfileSetting {
    fn default() -> Self {
        ProfileSetting::Named(ProfileName::Balanced)
    }
}

/// Engine configuration.
///
/// Every field has a default, so an empty TOML file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Match profile for verification (`"strict"`, `"balanced"`, `"permissive"` or a table).
    pub profile: ProfileSetting,
    /// Hard deadline for one verification call.
    pub verify_timeout_secs: u64,
    /// Hard deadline for one enrollment call.
    pub enroll_timeout_secs: u64,
    /// Soft budget for the gallery scan inside a verification.
    pub search_budget_ms: u64,
    /// Remaining budget under which the scan falls back to distance-only scoring.
    pub degrade_window_ms: u64,
    /// Confidence above which a new enrollment is rejected as someone else's face.
    pub duplicate_threshold: f32,
    pub min_photos: usize,
    pub min_valid_photos: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: ProfileSetting::default(),
            verify_timeout_secs: 10,
            enroll_timeout_secs: 30,
            search_budget_ms: 8_000,
            degrade_window_ms: 1_000,
            duplicate_threshold: clockface_core::duplicate::DEFAULT_DUPLICATE_THRESHOLD,
            min_photos: 5,
            min_valid_photos: 3,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, then apply `CLOCKFACE_*` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Defaults overridden by `CLOCKFACE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        let profile = match std::env::var("CLOCKFACE_PROFILE") {
            Ok(name) => match name.parse::<ProfileName>() {
                Ok(name) => ProfileSetting::Named(name),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring CLOCKFACE_PROFILE");
                    self.profile
                }
            },
            Err(_) => self.profile,
        };
        Self {
            profile,
            verify_timeout_secs: env_u64("CLOCKFACE_VERIFY_TIMEOUT_SECS", self.verify_timeout_secs),
            enroll_timeout_secs: env_u64("CLOCKFACE_ENROLL_TIMEOUT_SECS", self.enroll_timeout_secs),
            search_budget_ms: env_u64("CLOCKFACE_SEARCH_BUDGET_MS", self.search_budget_ms),
            degrade_window_ms: env_u64("CLOCKFACE_DEGRADE_WINDOW_MS", self.degrade_window_ms),
            duplicate_threshold: env_f32("CLOCKFACE_DUPLICATE_THRESHOLD", self.duplicate_threshold),
            min_photos: env_usize("CLOCKFACE_MIN_PHOTOS", self.min_photos),
            min_valid_photos: env_usize("CLOCKFACE_MIN_VALID_PHOTOS", self.min_valid_photos),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile.resolve().validate().map_err(ConfigError::Invalid)?;
        if self.verify_timeout_secs == 0 || self.enroll_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }
        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err(ConfigError::Invalid(format!(
                "duplicate_threshold must be within [0, 1], got {}",
                self.duplicate_threshold
            )));
        }
        if self.min_valid_photos == 0 || self.min_valid_photos > self.min_photos {
            return Err(ConfigError::Invalid(format!(
                "min_valid_photos ({}) must be between 1 and min_photos ({})",
                self.min_valid_photos, self.min_photos
            )));
        }
        Ok(())
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn enroll_timeout(&self) -> Duration {
        Duration::from_secs(self.enroll_timeout_secs)
    }

    pub fn search_budget(&self) -> Duration {
        Duration::from_millis(self.search_budget_ms)
    }

    pub fn degrade_window(&self) -> Duration {
        Duration::from_millis(self.degrade_window_ms)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
