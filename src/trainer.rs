use pyo3::prelude::*;
use pyo3::types::{IntoPyDict, PyList};
use pyo3::IntoPyObjectExt;

use crate::bundle::{self, PreprocessorBundle};
use crate::config::Config;
use crate::error::{PipelineError, Result};

/// The fixed numerical feature set the trainer fits the preprocessor and
/// both models on (mirrors `DEFAULT_NUMERICAL_FEATURES` in the original
/// training tool). No categorical features are used by default.
pub const NUMERICAL_FEATURES: &[&str] = &[
    "flow_duration", "fwd_pkts_tot", "bwd_pkts_tot",
    "fwd_bytes_tot", "bwd_bytes_tot", "fwd_pkt_len_min", "fwd_pkt_len_max",
    "fwd_pkt_len_mean", "fwd_pkt_len_std", "bwd_pkt_len_min", "bwd_pkt_len_max",
    "bwd_pkt_len_mean", "bwd_pkt_len_std", "flow_pkt_len_min", "flow_pkt_len_max",
    "flow_pkt_len_mean", "flow_pkt_len_std", "fwd_iat_min", "fwd_iat_max",
    "fwd_iat_mean", "fwd_iat_std", "bwd_iat_min", "bwd_iat_max",
    "bwd_iat_mean", "bwd_iat_std", "flow_iat_min", "flow_iat_max",
    "flow_iat_mean", "flow_iat_std", "fwd_header_len", "bwd_header_len",
    "pkts_per_sec", "bytes_per_sec", "down_up_ratio", "avg_pkt_size",
    "fwd_seg_size_avg", "bwd_seg_size_avg", "init_win_bytes_fwd",
    "init_win_bytes_bwd",
    "fwd_psh_flags", "bwd_psh_flags", "fwd_urg_flags", "bwd_urg_flags",
    "syn_flag_cnt", "fin_flag_cnt", "rst_flag_cnt", "ack_flag_cnt",
    "psh_flag_cnt", "urg_flag_cnt",
    "protocol", "dst_port",
];

pub const LABEL_COLUMN: &str = "Label";

/// Arguments the `train` subcommand validates before calling into this
/// module, mirroring the original tool's argparse validation (spec §6).
pub struct TrainArgs {
    pub train_rf: bool,
    pub train_if: bool,
    pub rf_data: Option<std::path::PathBuf>,
    pub if_data: Option<std::path::PathBuf>,
}

pub fn validate(args: &TrainArgs, config: &Config) -> Result<()> {
    if !args.train_rf && !args.train_if {
        return Err(PipelineError::Config("must specify --train-rf and/or --train-if".into()));
    }
    if args.train_rf {
        match &args.rf_data {
            None => return Err(PipelineError::Config("--train-rf requires --rf-data".into())),
            Some(path) if !path.is_file() => {
                return Err(PipelineError::Config(format!("RF data file not found: {:?}", path)))
            }
            _ => {}
        }
    }
    if args.train_if {
        match &args.if_data {
            None => return Err(PipelineError::Config("--train-if requires --if-data".into())),
            Some(path) if !path.is_file() => {
                return Err(PipelineError::Config(format!("IF data file not found: {:?}", path)))
            }
            _ => {}
        }
    }
    let bundle_exists = config.preprocessor_bundle_path().exists();
    if !bundle_exists && args.rf_data.is_none() {
        return Err(PipelineError::Config(
            "preprocessor bundle not found; --rf-data is required for initial fitting".into(),
        ));
    }
    if config.train.target_sample_size == 0 {
        return Err(PipelineError::Config("target_sample_size must be positive".into()));
    }
    if config.train.chunk_size == 0 {
        return Err(PipelineError::Config("chunk_size must be positive".into()));
    }
    if config.train.n_estimators == 0 {
        return Err(PipelineError::Config("n_estimators must be positive".into()));
    }
    if config.train.n_jobs < -1 || config.train.n_jobs == 0 {
        return Err(PipelineError::Config("n_jobs must be a positive integer or -1".into()));
    }
    Ok(())
}

/// Loads the existing bundle, or fits a fresh one from `rf_data` when none
/// exists. Matches the original tool's "load if present, else fit" policy
/// so retraining never silently discards a preprocessor fit on more data
/// than the current batch.
fn load_or_fit_preprocessor(config: &Config, rf_data: &std::path::Path) -> Result<PreprocessorBundle> {
    if config.preprocessor_bundle_path().exists() {
        if let Ok(existing) = bundle::load(&config.preprocessor_bundle_path()) {
            return Ok(existing);
        }
        log::warn!("existing preprocessor bundle is invalid, refitting");
    }

    Python::with_gil(|py| -> Result<PreprocessorBundle> {
        let pandas = py.import("pandas")?;
        let sklearn_compose = py.import("sklearn.compose")?;
        let sklearn_pipeline = py.import("sklearn.pipeline")?;
        let sklearn_impute = py.import("sklearn.impute")?;
        let sklearn_preprocessing = py.import("sklearn.preprocessing")?;

        let df = pandas.call_method1("read_csv", (rf_data.to_string_lossy().to_string(),))?;
        let numeric: Vec<&str> = NUMERICAL_FEATURES.to_vec();

        let imputer_kwargs = pyo3::types::PyDict::new(py);
        imputer_kwargs.set_item("strategy", "median")?;
        let imputer = sklearn_impute.call_method("SimpleImputer", (), Some(&imputer_kwargs))?;
        let scaler = sklearn_preprocessing.call_method0("StandardScaler")?;
        let steps = PyList::new(py, [
            ("imputer", imputer),
            ("scaler", scaler),
        ].into_iter().map(|(name, step)| (name, step).into_py_any(py).unwrap()))?;
        let numeric_pipeline = sklearn_pipeline.call_method1("Pipeline", (steps,))?;

        let transformers = PyList::new(py, [("num", numeric_pipeline, numeric.clone())
            .into_py_any(py)?])?;
        let kwargs = pyo3::types::PyDict::new(py);
        kwargs.set_item("remainder", "drop")?;
        kwargs.set_item("n_jobs", 1)?;
        let preprocessor = sklearn_compose
            .call_method("ColumnTransformer", (transformers,), Some(&kwargs))?;

        let feature_cols = PyList::new(py, numeric.clone())?;
        let x_fit = df.get_item(feature_cols)?;
        preprocessor.call_method1("fit", (x_fit,))?;

        let bundle = PreprocessorBundle {
            preprocessor: preprocessor.into(),
            numeric_features: numeric.iter().map(|s| s.to_string()).collect(),
            categorical_features: Vec::new(),
            all_features: numeric.iter().map(|s| s.to_string()).collect(),
        };

        Ok(bundle)
    })
}

/// Trains the Random Forest classifier from `rf_data`'s labeled rows,
/// fitting/loading the shared preprocessor first (spec §4.10 / §6).
pub fn train_random_forest(config: &Config, rf_data: &std::path::Path) -> Result<()> {
    let bundle = load_or_fit_preprocessor(config, rf_data)?;
    crate::bundle::save(&config.preprocessor_bundle_path(), &bundle)?;

    Python::with_gil(|py| -> Result<()> {
        let pandas = py.import("pandas")?;
        let ensemble = py.import("sklearn.ensemble")?;
        let joblib = py.import("joblib")?;

        let df = pandas.call_method1("read_csv", (rf_data.to_string_lossy().to_string(),))?;
        let feature_cols = PyList::new(py, bundle.all_features.clone())?;
        let x = df.get_item(feature_cols)?;
        let x_transformed = bundle.preprocessor.call_method1(py, "transform", (x,))?;
        let y = df.get_item(LABEL_COLUMN)?;

        let kwargs = [
            ("n_estimators", config.train.n_estimators.into_py_any(py)?),
            ("max_depth", config.train.max_depth.into_py_any(py)?),
            ("n_jobs", config.train.n_jobs.into_py_any(py)?),
        ].into_py_dict(py)?;
        let rf = ensemble.call_method("RandomForestClassifier", (), Some(&kwargs))?;
        rf.call_method1("fit", (x_transformed, y))?;

        joblib.call_method1(
            "dump",
            (rf, config.rf_model_path().to_string_lossy().to_string()),
        )?;
        Ok(())
    })
}

/// Trains the Isolation Forest anomaly detector from `if_data` (C8's
/// retrain target, and also reachable directly from the `train` CLI).
pub fn train_isolation_forest_from(config: &Config, if_data: &std::path::Path) -> Result<()> {
    let bundle = bundle::load(&config.preprocessor_bundle_path())?;

    Python::with_gil(|py| -> Result<()> {
        let pandas = py.import("pandas")?;
        let ensemble = py.import("sklearn.ensemble")?;
        let joblib = py.import("joblib")?;

        let df = pandas.call_method1("read_csv", (if_data.to_string_lossy().to_string(),))?;
        let feature_cols = PyList::new(py, bundle.all_features.clone())?;
        let x = df.get_item(feature_cols)?;
        let x_transformed = bundle.preprocessor.call_method1(py, "transform", (x,))?;

        let kwargs = [
            ("n_estimators", config.train.n_estimators.into_py_any(py)?),
            ("n_jobs", config.train.n_jobs.into_py_any(py)?),
        ].into_py_dict(py)?;
        let model = ensemble.call_method("IsolationForest", (), Some(&kwargs))?;
        model.call_method1("fit", (x_transformed,))?;

        joblib.call_method1(
            "dump",
            (model, config.if_model_path().to_string_lossy().to_string()),
        )?;
        Ok(())
    })
}

/// Convenience entry point the retrainer trigger (C8) calls: refits the IF
/// model against the rolling benign corpus the router has been appending
/// to.
pub fn train_isolation_forest(config: &Config) -> Result<()> {
    train_isolation_forest_from(config, &config.if_training_csv())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_no_model_selected() {
        let config = Config::default();
        let args = TrainArgs { train_rf: false, train_if: false, rf_data: None, if_data: None };
        assert!(validate(&args, &config).is_err());
    }

    #[test]
    fn validate_requires_rf_data_for_rf_training() {
        let config = Config::default();
        let args = TrainArgs { train_rf: true, train_if: false, rf_data: None, if_data: None };
        assert!(validate(&args, &config).is_err());
    }
}
