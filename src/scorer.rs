use std::collections::HashSet;

use pyo3::prelude::*;
use pyo3::types::{IntoPyDict, PyDict};

use crate::bundle::{self, PreprocessorBundle};
use crate::error::{PipelineError, Result};
use crate::features::FeatureRecord;

/// Output of scoring one feature row: the row plus the four columns the
/// Scored CSV adds. Written with `csv::Writer::write_record` rather than
/// `serde::Serialize` (the `csv` crate's derive-based row writer doesn't
/// support nesting a struct inside a struct), via `to_row`/`header`, so the
/// column order exactly matches the Scored CSV format: every Feature CSV
/// column, then the four trailing score columns.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub features: FeatureRecord,
    pub rf_prediction: String,
    pub rf_confidence: f64,
    pub if_anomaly_score: f64,
    pub if_is_anomaly: bool,
}

impl ScoredRecord {
    pub fn header() -> Vec<&'static str> {
        let mut fields = crate::features::FeatureRecord::csv_header();
        fields.extend_from_slice(&[
            "rf_prediction", "rf_confidence", "if_anomaly_score", "if_is_anomaly",
        ]);
        fields
    }

    pub fn to_row(&self) -> Vec<String> {
        let mut row = self.features.to_row();
        row.push(self.rf_prediction.clone());
        row.push(self.rf_confidence.to_string());
        row.push(self.if_anomaly_score.to_string());
        row.push(self.if_is_anomaly.to_string());
        row
    }
}

/// Loads the preprocessor bundle, RF classifier, and IF detector once per
/// process (C6). Any model that fails to load degrades gracefully rather
/// than aborting scoring: `rf` absent means every row's RF columns read
/// `Unknown`/`NaN`; `anomaly_detector` absent means every row's IF columns
/// read `0.0`/`false`.
pub struct Scorer {
    bundle: Option<PreprocessorBundle>,
    rf: Option<PyObject>,
    anomaly_detector: Option<PyObject>,
}

impl Scorer {
    pub fn load(bundle_path: &std::path::Path, rf_path: &std::path::Path, if_path: &std::path::Path) -> Self {
        let bundle = match bundle::load(bundle_path) {
            Ok(b) => Some(b),
            Err(e) => {
                log::warn!("preprocessor bundle unavailable ({}), scoring will degrade", e);
                None
            }
        };

        let rf = Python::with_gil(|py| match py.import("joblib") {
            Ok(joblib) => match joblib.call_method1("load", (rf_path.to_string_lossy().to_string(),)) {
                Ok(obj) => Some(obj.into()),
                Err(e) => {
                    log::warn!("RF classifier unavailable ({}), rf_prediction will read Unknown", e);
                    None
                }
            },
            Err(_) => None,
        });

        let anomaly_detector = Python::with_gil(|py| match py.import("joblib") {
            Ok(joblib) => match joblib.call_method1("load", (if_path.to_string_lossy().to_string(),)) {
                Ok(obj) => Some(obj.into()),
                Err(e) => {
                    log::warn!("IF detector unavailable ({}), if_anomaly_score will read 0.0", e);
                    None
                }
            },
            Err(_) => None,
        });

        Scorer { bundle, rf, anomaly_detector }
    }

    /// Scores one feature row: cleans it, transforms through the bundled
    /// preprocessor (when present), then runs the RF and IF models
    /// independently so a missing one doesn't block the other.
    pub fn score(&self, record: FeatureRecord) -> Result<ScoredRecord> {
        let (rf_prediction, rf_confidence, if_anomaly_score, if_is_anomaly) =
            match (&self.bundle, &self.rf, &self.anomaly_detector) {
                (None, _, _) => (String::from("Unknown"), 0.0, 0.0, false),
                (Some(bundle), rf, anomaly_detector) => {
                    Python::with_gil(|py| -> Result<(String, f64, f64, bool)> {
                        let transformed = transform_row(py, bundle, &record)?;

                        let (pred, confidence) = match rf {
                            Some(rf) => predict_rf(py, rf, &transformed)?,
                            None => (String::from("Unknown"), 0.0),
                        };

                        let (score, is_anomaly) = match anomaly_detector {
                            Some(model) => predict_anomaly(py, model, &transformed)?,
                            None => (0.0, false),
                        };

                        Ok((pred, confidence, score, is_anomaly))
                    })?
                }
            };

        Ok(ScoredRecord {
            features: record,
            rf_prediction,
            rf_confidence,
            if_anomaly_score,
            if_is_anomaly,
        })
    }
}

/// Cleans and reindexes one row to the bundle's known feature columns,
/// then runs it through the fitted `ColumnTransformer`. Mirrors
/// `clean_data_chunk` + `preprocessor.transform` in the Python trainer.
///
/// Refuses with `SchemaMismatch` up front if the bundle expects a column
/// this record can never supply, rather than letting `reindex` silently
/// fill the gap with `NaN` (spec: scoring a row missing a required feature
/// column must yield no scored output).
fn transform_row<'py>(
    py: Python<'py>,
    bundle: &PreprocessorBundle,
    record: &FeatureRecord,
) -> Result<Bound<'py, pyo3::PyAny>> {
    ensure_columns_available(bundle)?;

    let pandas = py.import("pandas")?;
    let row = feature_dict(py, record)?;
    let df = pandas.call_method1("DataFrame", ([row],))?;
    let kwargs = [("columns", bundle.all_features.clone())].into_py_dict(py)?;
    let df = df.call_method("reindex", (), Some(&kwargs))?;
    let transformed = bundle.preprocessor.call_method1(py, "transform", (df,))?;
    Ok(transformed.into_bound(py))
}

/// The full set of column names `feature_dict` ever populates — every
/// field a `FeatureRecord` carries.
fn available_columns() -> HashSet<&'static str> {
    FeatureRecord::csv_header().into_iter().collect()
}

fn ensure_columns_available(bundle: &PreprocessorBundle) -> Result<()> {
    let available = available_columns();
    let missing: Vec<&str> = bundle
        .all_features
        .iter()
        .filter(|col| !available.contains(col.as_str()))
        .map(|col| col.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::SchemaMismatch(format!(
            "bundle expects column(s) not present in the feature record: {}",
            missing.join(", ")
        )))
    }
}

fn predict_rf(py: Python<'_>, rf: &PyObject, transformed: &Bound<'_, pyo3::PyAny>) -> Result<(String, f64)> {
    let prediction = rf.call_method1(py, "predict", (transformed,))?;
    let proba = rf.call_method1(py, "predict_proba", (transformed,))?;

    let labels: Vec<String> = prediction.extract(py)?;
    let label = labels.into_iter().next().unwrap_or_else(|| "Unknown".to_string());

    let probabilities: Vec<Vec<f64>> = proba.extract(py)?;
    let confidence = probabilities
        .first()
        .map(|row| row.iter().cloned().fold(0.0_f64, f64::max))
        .unwrap_or(0.0);

    Ok((label, confidence))
}

fn predict_anomaly(py: Python<'_>, model: &PyObject, transformed: &Bound<'_, pyo3::PyAny>) -> Result<(f64, bool)> {
    let scores: Vec<f64> = model
        .call_method1(py, "decision_function", (transformed,))?
        .extract(py)?;
    let predictions: Vec<i64> = model.call_method1(py, "predict", (transformed,))?.extract(py)?;

    let score = scores.first().copied().unwrap_or(0.0);
    // sklearn's IsolationForest.predict returns -1 for anomalies, 1 for inliers.
    let is_anomaly = predictions.first().map(|&p| p == -1).unwrap_or(false);

    Ok((score, is_anomaly))
}

/// Builds the full-row dict the scorer hands to pandas — every column
/// `FeatureRecord` carries, not just the ones a particular bundle happens
/// to need. `reindex` in `transform_row` then narrows it to
/// `bundle.all_features`.
fn feature_dict<'py>(py: Python<'py>, record: &FeatureRecord) -> Result<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("flow_key", &record.flow_key)?;
    dict.set_item("src_ip", &record.src_ip)?;
    dict.set_item("dst_ip", &record.dst_ip)?;
    dict.set_item("src_port", record.src_port)?;
    dict.set_item("dst_port", record.dst_port)?;
    dict.set_item("protocol", record.protocol)?;
    dict.set_item("flow_start_ts", record.flow_start_ts)?;
    dict.set_item("flow_last_ts", record.flow_last_ts)?;
    dict.set_item("flow_duration", record.flow_duration)?;
    dict.set_item("fwd_pkts_tot", record.fwd_pkts_tot)?;
    dict.set_item("bwd_pkts_tot", record.bwd_pkts_tot)?;
    dict.set_item("tot_pkts", record.tot_pkts)?;
    dict.set_item("fwd_bytes_tot", record.fwd_bytes_tot)?;
    dict.set_item("bwd_bytes_tot", record.bwd_bytes_tot)?;
    dict.set_item("tot_bytes", record.tot_bytes)?;
    dict.set_item("fwd_pkt_len_min", record.fwd_pkt_len_min)?;
    dict.set_item("fwd_pkt_len_max", record.fwd_pkt_len_max)?;
    dict.set_item("fwd_pkt_len_mean", record.fwd_pkt_len_mean)?;
    dict.set_item("fwd_pkt_len_std", record.fwd_pkt_len_std)?;
    dict.set_item("bwd_pkt_len_min", record.bwd_pkt_len_min)?;
    dict.set_item("bwd_pkt_len_max", record.bwd_pkt_len_max)?;
    dict.set_item("bwd_pkt_len_mean", record.bwd_pkt_len_mean)?;
    dict.set_item("bwd_pkt_len_std", record.bwd_pkt_len_std)?;
    dict.set_item("flow_pkt_len_min", record.flow_pkt_len_min)?;
    dict.set_item("flow_pkt_len_max", record.flow_pkt_len_max)?;
    dict.set_item("flow_pkt_len_mean", record.flow_pkt_len_mean)?;
    dict.set_item("flow_pkt_len_std", record.flow_pkt_len_std)?;
    dict.set_item("avg_pkt_size", record.avg_pkt_size)?;
    dict.set_item("fwd_iat_min", record.fwd_iat_min)?;
    dict.set_item("fwd_iat_max", record.fwd_iat_max)?;
    dict.set_item("fwd_iat_mean", record.fwd_iat_mean)?;
    dict.set_item("fwd_iat_std", record.fwd_iat_std)?;
    dict.set_item("bwd_iat_min", record.bwd_iat_min)?;
    dict.set_item("bwd_iat_max", record.bwd_iat_max)?;
    dict.set_item("bwd_iat_mean", record.bwd_iat_mean)?;
    dict.set_item("bwd_iat_std", record.bwd_iat_std)?;
    dict.set_item("flow_iat_min", record.flow_iat_min)?;
    dict.set_item("flow_iat_max", record.flow_iat_max)?;
    dict.set_item("flow_iat_mean", record.flow_iat_mean)?;
    dict.set_item("flow_iat_std", record.flow_iat_std)?;
    dict.set_item("fwd_header_len", record.fwd_header_len)?;
    dict.set_item("bwd_header_len", record.bwd_header_len)?;
    dict.set_item("fwd_seg_size_avg", record.fwd_seg_size_avg)?;
    dict.set_item("bwd_seg_size_avg", record.bwd_seg_size_avg)?;
    dict.set_item("pkts_per_sec", record.pkts_per_sec)?;
    dict.set_item("bytes_per_sec", record.bytes_per_sec)?;
    dict.set_item("fwd_psh_flags", record.fwd_psh_flags)?;
    dict.set_item("bwd_psh_flags", record.bwd_psh_flags)?;
    dict.set_item("fwd_urg_flags", record.fwd_urg_flags)?;
    dict.set_item("bwd_urg_flags", record.bwd_urg_flags)?;
    dict.set_item("syn_flag_cnt", record.syn_flag_cnt)?;
    dict.set_item("fin_flag_cnt", record.fin_flag_cnt)?;
    dict.set_item("rst_flag_cnt", record.rst_flag_cnt)?;
    dict.set_item("ack_flag_cnt", record.ack_flag_cnt)?;
    dict.set_item("psh_flag_cnt", record.psh_flag_cnt)?;
    dict.set_item("urg_flag_cnt", record.urg_flag_cnt)?;
    dict.set_item("down_up_ratio", record.down_up_ratio)?;
    dict.set_item("init_win_bytes_fwd", record.init_win_bytes_fwd)?;
    dict.set_item("init_win_bytes_bwd", record.init_win_bytes_bwd)?;
    Ok(dict)
}
