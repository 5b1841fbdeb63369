use std::path::Path;

use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::error::{PipelineError, Result};

/// The persisted `{preprocessor, features}` bundle (C10). `preprocessor` is
/// an opaque handle to a fitted `sklearn.ColumnTransformer`; `features`
/// names the numeric/categorical columns it was fit on. Both halves stay
/// Python objects — the bundle is never reinterpreted in Rust, only passed
/// back into Python at transform time, so round-tripping it is a pure file
/// copy.
pub struct PreprocessorBundle {
    pub preprocessor: PyObject,
    pub numeric_features: Vec<String>,
    pub categorical_features: Vec<String>,
    pub all_features: Vec<String>,
}

/// Tracks whether a usable bundle exists on disk. The scorer (C6) and
/// trainer consult this before attempting to load, instead of racing a
/// try/fallback against every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    NoBundle,
    BundleReady,
}

pub fn state_of(path: &Path) -> BundleState {
    if path.exists() {
        BundleState::BundleReady
    } else {
        BundleState::NoBundle
    }
}

/// Loads and structurally validates the bundle at `path`. `BundleInvalid`
/// on anything short of the full `{preprocessor, features: {all: [...]}}`
/// shape — a corrupt or partially-written bundle falls back to
/// `NoBundle` from the caller's point of view rather than panicking.
pub fn load(path: &Path) -> Result<PreprocessorBundle> {
    if !path.exists() {
        return Err(PipelineError::ModelMissing(format!("{:?}", path)));
    }

    Python::with_gil(|py| {
        let joblib = py.import("joblib")?;
        let path_str = path.to_string_lossy().to_string();
        let loaded = joblib.call_method1("load", (path_str,))?;

        let dict = loaded.downcast::<PyDict>().map_err(|_| {
            PipelineError::BundleInvalid("bundle is not a dict".to_string())
        })?;

        let preprocessor = dict
            .get_item("preprocessor")?
            .ok_or_else(|| PipelineError::BundleInvalid("missing 'preprocessor' key".to_string()))?;

        let features = dict
            .get_item("features")?
            .ok_or_else(|| PipelineError::BundleInvalid("missing 'features' key".to_string()))?;
        let features = features.downcast::<PyDict>().map_err(|_| {
            PipelineError::BundleInvalid("'features' is not a dict".to_string())
        })?;

        let numeric_features: Vec<String> = features
            .get_item("num")?
            .map(|v| v.extract())
            .transpose()?
            .unwrap_or_default();
        let categorical_features: Vec<String> = features
            .get_item("cat")?
            .map(|v| v.extract())
            .transpose()?
            .unwrap_or_default();
        let all_features: Vec<String> = features
            .get_item("all")?
            .ok_or_else(|| PipelineError::BundleInvalid("missing 'features.all' key".to_string()))?
            .extract()?;

        if all_features.is_empty() {
            return Err(PipelineError::BundleInvalid("'features.all' is empty".to_string()));
        }

        Ok(PreprocessorBundle {
            preprocessor: preprocessor.into(),
            numeric_features,
            categorical_features,
            all_features,
        })
    })
}

/// Persists `bundle` atomically: write to a temp file in the same
/// directory, then rename over the destination. A reader never observes a
/// half-written bundle.
pub fn save(path: &Path, bundle: &PreprocessorBundle) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let temp = tempfile::Builder::new()
        .prefix(".preprocessor-")
        .tempfile_in(dir)?;
    let temp_path = temp.path().to_path_buf();
    drop(temp);

    Python::with_gil(|py| -> Result<()> {
        let joblib = py.import("joblib")?;
        let dict = PyDict::new(py);
        dict.set_item("preprocessor", &bundle.preprocessor)?;

        let features = PyDict::new(py);
        features.set_item("num", &bundle.numeric_features)?;
        features.set_item("cat", &bundle.categorical_features)?;
        features.set_item("all", &bundle.all_features)?;
        dict.set_item("features", features)?;

        joblib.call_method1("dump", (dict, temp_path.to_string_lossy().to_string()))?;
        Ok(())
    })?;

    std::fs::rename(&temp_path, path)?;
    log::info!("wrote preprocessor bundle to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_reports_no_bundle() {
        let path = Path::new("/nonexistent/preprocessor_and_features");
        assert_eq!(state_of(path), BundleState::NoBundle);
    }
}
