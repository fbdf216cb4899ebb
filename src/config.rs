use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::engine::AdmissionPolicy;
use crate::model::NewRestaurant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
    pub grace_period: Duration,
    pub admission_policy: AdmissionPolicy,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sweep_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(120),
            admission_policy: AdmissionPolicy::default(),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
            seed_file: None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    parsed::<u64>(lookup, key)
        .filter(|&s| s > 0)
        .map(Duration::from_secs)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults;
    /// an unknown admission policy is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let admission_policy = match lookup("TABLEBOOK_ADMISSION_POLICY") {
            Some(raw) => raw.trim().parse().map_err(ConfigError)?,
            None => defaults.admission_policy,
        };
        Ok(Self {
            data_dir: lookup("TABLEBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sweep_interval: secs(&lookup, "TABLEBOOK_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval),
            grace_period: secs(&lookup, "TABLEBOOK_GRACE_PERIOD_SECS")
                .unwrap_or(defaults.grace_period),
            admission_policy,
            compact_threshold: parsed(&lookup, "TABLEBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: secs(&lookup, "TABLEBOOK_COMPACT_INTERVAL_SECS")
                .unwrap_or(defaults.compact_interval),
            metrics_port: parsed(&lookup, "TABLEBOOK_METRICS_PORT"),
            seed_file: lookup("TABLEBOOK_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

/// Read a JSON array of restaurants.
pub fn load_seed(path: &Path) -> Result<Vec<NewRestaurant>, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError(format!("parsing {}: {e}", path.display())))
}
