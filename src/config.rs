use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// All the knobs spec.md leaves to "per deployment": directory roots,
/// the anomaly threshold, timing cadences, and the upload collaborator's
/// address. Loaded once at process start, shared by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyse_root: PathBuf,
    pub datasets_root: PathBuf,
    pub models_root: PathBuf,

    /// Where the ingest watcher (C9) looks for capture files dropped by the
    /// sensor, before they're quiescent enough to promote into `pcap/todo/`.
    pub capture_staging_dir: PathBuf,

    /// Anomaly-score threshold (tau). Anything <= this is flagged anomalous.
    pub anomaly_threshold: f64,

    /// Flow idle timeout, seconds, used by the flow table sweep (C3).
    pub flow_timeout_secs: u64,
    /// How often the flow table is swept while a capture is being read.
    pub sweep_interval_secs: u64,

    /// Minutes a staged file's mtime must be unchanged before the ingest
    /// watcher (C9) promotes it into the FFE's todo directory.
    pub ingest_quiescence_minutes: u64,
    /// Polling cadence for the ingest watcher.
    pub ingest_poll_interval_secs: u64,

    pub upload: UploadConfig,

    pub train: TrainConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub base_url: String,
    pub username: String,
    /// Name of the environment variable holding the password. The password
    /// itself never lives in the config file or in logs.
    pub password_env: String,
    pub request_timeout_secs: u64,
    pub token_refresh_margin_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub target_sample_size: usize,
    pub chunk_size: usize,
    pub n_estimators: u32,
    pub max_depth: Option<u32>,
    pub n_jobs: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            analyse_root: PathBuf::from("analyse"),
            datasets_root: PathBuf::from("datasets"),
            models_root: PathBuf::from("models"),
            capture_staging_dir: PathBuf::from("incoming"),
            anomaly_threshold: -0.75,
            flow_timeout_secs: 120,
            sweep_interval_secs: 10,
            ingest_quiescence_minutes: 30,
            ingest_poll_interval_secs: 60,
            upload: UploadConfig::default(),
            train: TrainConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            base_url: String::from("http://localhost:8000"),
            username: String::new(),
            password_env: String::from("MLNIDS_UPLOAD_PASSWORD"),
            request_timeout_secs: 30,
            token_refresh_margin_secs: 60,
        }
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            target_sample_size: 200_000,
            chunk_size: 50_000,
            n_estimators: 200,
            max_depth: None,
            n_jobs: -1,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            log::warn!("config file {:?} not found, using defaults", path);
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    pub fn capture_staging(&self) -> PathBuf {
        self.capture_staging_dir.clone()
    }
    pub fn pcap_todo(&self) -> PathBuf {
        self.analyse_root.join("pcap").join("todo")
    }
    pub fn pcap_done(&self) -> PathBuf {
        self.analyse_root.join("pcap").join("done")
    }
    pub fn csv_todo(&self) -> PathBuf {
        self.analyse_root.join("csv").join("todo")
    }
    pub fn csv_done(&self) -> PathBuf {
        self.analyse_root.join("csv").join("done")
    }
    pub fn processed_output(&self) -> PathBuf {
        self.analyse_root.join("processed_output")
    }
    pub fn suspicious_todo(&self) -> PathBuf {
        self.analyse_root.join("suspicious").join("todo")
    }
    pub fn suspicious_done(&self) -> PathBuf {
        self.analyse_root.join("suspicious").join("done")
    }
    pub fn if_training_csv(&self) -> PathBuf {
        self.datasets_root.join("if_training.csv")
    }
    pub fn preprocessor_bundle_path(&self) -> PathBuf {
        self.models_root.join("preprocessor_and_features")
    }
    pub fn rf_model_path(&self) -> PathBuf {
        self.models_root.join("rf_model")
    }
    pub fn if_model_path(&self) -> PathBuf {
        self.models_root.join("if_model")
    }
}
