use std::fmt;

/// Error surface for the whole pipeline, named after the failure modes the
/// two subsystems actually raise rather than after the crates that produce
/// them.
#[derive(Debug)]
pub enum PipelineError {
    /// A capture file could not be opened or its format is not recognized.
    InputUnreadable(String),
    /// A CSV's header does not match the schema a stage expects.
    SchemaMismatch(String),
    /// A persisted preprocessor bundle is missing a required key or shape.
    BundleInvalid(String),
    /// A classifier/detector artifact file is missing on disk.
    ModelMissing(String),
    /// Suspicious-flow upload failed after the configured attempt budget.
    UploadFailed(String),
    /// The Isolation Forest retrain step failed; callers treat this as
    /// non-fatal and keep serving.
    RetrainFailed(String),
    Io(String),
    Csv(String),
    Config(String),
    Model(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InputUnreadable(msg) => write!(f, "input unreadable: {}", msg),
            PipelineError::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            PipelineError::BundleInvalid(msg) => write!(f, "bundle invalid: {}", msg),
            PipelineError::ModelMissing(msg) => write!(f, "model missing: {}", msg),
            PipelineError::UploadFailed(msg) => write!(f, "upload failed: {}", msg),
            PipelineError::RetrainFailed(msg) => write!(f, "retrain failed: {}", msg),
            PipelineError::Io(msg) => write!(f, "io error: {}", msg),
            PipelineError::Csv(msg) => write!(f, "csv error: {}", msg),
            PipelineError::Config(msg) => write!(f, "config error: {}", msg),
            PipelineError::Model(msg) => write!(f, "model error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Csv(err.to_string())
    }
}

impl From<ctrlc::Error> for PipelineError {
    fn from(err: ctrlc::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::UploadFailed(err.to_string())
    }
}

impl From<pyo3::PyErr> for PipelineError {
    fn from(err: pyo3::PyErr) -> Self {
        PipelineError::Model(err.to_string())
    }
}

impl From<pcap_file::PcapError> for PipelineError {
    fn from(err: pcap_file::PcapError) -> Self {
        PipelineError::InputUnreadable(err.to_string())
    }
}

impl From<String> for PipelineError {
    fn from(msg: String) -> Self {
        PipelineError::Config(msg)
    }
}

impl From<&str> for PipelineError {
    fn from(msg: &str) -> Self {
        PipelineError::Config(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
