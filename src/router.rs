use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::scorer::ScoredRecord;
use crate::upload::Uploader;

/// Outcome of routing one scored batch: how many rows went each way, used
/// by the retrainer trigger (C8) to decide whether a retrain is warranted.
pub struct RouteOutcome {
    pub benign_count: usize,
    pub suspicious_count: usize,
}

/// A row is suspicious if the classifier didn't call it benign, or the
/// anomaly detector scored it at or below the threshold — either signal is
/// enough (spec: OR, not AND).
fn is_suspicious(record: &ScoredRecord, anomaly_threshold: f64) -> bool {
    record.rf_prediction != "Benign" || record.if_anomaly_score <= anomaly_threshold
}

/// Splits one scored batch: suspicious rows are uploaded to the
/// collaborator and the source file is moved to `suspicious/done/`; benign
/// rows are appended to the rolling Isolation Forest training corpus.
/// Upload failures are logged and do not block appending the benign rows
/// from the same batch.
pub fn route_batch(
    config: &Config,
    uploader: &Uploader,
    scored: Vec<ScoredRecord>,
    batch_label: &str,
) -> Result<RouteOutcome> {
    let mut benign = Vec::new();
    let mut suspicious = Vec::new();

    for record in scored {
        if is_suspicious(&record, config.anomaly_threshold) {
            suspicious.push(record);
        } else {
            benign.push(record);
        }
    }

    let outcome = RouteOutcome {
        benign_count: benign.len(),
        suspicious_count: suspicious.len(),
    };

    if !suspicious.is_empty() {
        stage_and_upload_suspicious(config, uploader, &suspicious, batch_label)?;
    }

    if !benign.is_empty() {
        append_benign_corpus(&config.if_training_csv(), &benign)?;
    }

    Ok(outcome)
}

/// Stages suspicious rows to `suspicious/todo/<batch_label>.csv`, attempts
/// the upload, and moves the staged file to `suspicious/done/` only on
/// success — a failed upload leaves the file in `todo/` so the next batch's
/// run (or an operator) can retry it, matching the todo/done hand-off the
/// rest of the directory layout uses.
fn stage_and_upload_suspicious(
    config: &Config,
    uploader: &Uploader,
    rows: &[ScoredRecord],
    batch_label: &str,
) -> Result<()> {
    let todo_dir = config.suspicious_todo();
    std::fs::create_dir_all(&todo_dir)?;
    let staged_path = todo_dir.join(format!("{}.csv", batch_label));

    let mut writer = csv::Writer::from_path(&staged_path)?;
    writer.write_record(crate::scorer::ScoredRecord::header())?;
    for row in rows {
        writer.write_record(row.to_row())?;
    }
    writer.flush()?;

    match uploader.upload_suspicious(rows, batch_label) {
        Ok(()) => {
            log::info!("uploaded {} suspicious row(s) from {}", rows.len(), batch_label);
            let done_dir = config.suspicious_done();
            std::fs::create_dir_all(&done_dir)?;
            std::fs::rename(&staged_path, done_dir.join(format!("{}.csv", batch_label)))?;
        }
        Err(e) => {
            log::error!("upload failed for {}: {} (staged file kept in todo/)", batch_label, e);
        }
    }
    Ok(())
}

fn append_benign_corpus(path: &Path, rows: &[ScoredRecord]) -> Result<()> {
    let needs_header = !path.exists();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if needs_header {
        writer.write_record(crate::features::FeatureRecord::csv_header())?;
    }
    for row in rows {
        writer.write_record(row.features.to_row())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: &str, score: f64) -> ScoredRecord {
        ScoredRecord {
            features: crate::features::FeatureRecord {
                flow_key: "k".into(), src_ip: "1.1.1.1".into(), dst_ip: "2.2.2.2".into(),
                src_port: 1, dst_port: 2, protocol: 6,
                flow_start_ts: 0.0, flow_last_ts: 0.0, flow_duration: 1.0,
                fwd_pkts_tot: 1, bwd_pkts_tot: 0, tot_pkts: 1,
                fwd_bytes_tot: 0, bwd_bytes_tot: 0, tot_bytes: 0,
                fwd_pkt_len_min: 0.0, fwd_pkt_len_max: 0.0, fwd_pkt_len_mean: 0.0, fwd_pkt_len_std: 0.0,
                bwd_pkt_len_min: 0.0, bwd_pkt_len_max: 0.0, bwd_pkt_len_mean: 0.0, bwd_pkt_len_std: 0.0,
                flow_pkt_len_min: 0.0, flow_pkt_len_max: 0.0, flow_pkt_len_mean: 0.0, flow_pkt_len_std: 0.0,
                avg_pkt_size: 0.0,
                fwd_iat_min: 0.0, fwd_iat_max: 0.0, fwd_iat_mean: 0.0, fwd_iat_std: 0.0,
                bwd_iat_min: 0.0, bwd_iat_max: 0.0, bwd_iat_mean: 0.0, bwd_iat_std: 0.0,
                flow_iat_min: 0.0, flow_iat_max: 0.0, flow_iat_mean: 0.0, flow_iat_std: 0.0,
                fwd_header_len: 0, bwd_header_len: 0,
                fwd_seg_size_avg: 0.0, bwd_seg_size_avg: 0.0,
                pkts_per_sec: 0.0, bytes_per_sec: 0.0,
                fwd_psh_flags: 0, bwd_psh_flags: 0, fwd_urg_flags: 0, bwd_urg_flags: 0,
                syn_flag_cnt: 0, fin_flag_cnt: 0, rst_flag_cnt: 0, ack_flag_cnt: 0,
                psh_flag_cnt: 0, urg_flag_cnt: 0,
                down_up_ratio: 0.0,
                init_win_bytes_fwd: -1, init_win_bytes_bwd: -1,
            },
            rf_prediction: label.to_string(),
            rf_confidence: 1.0,
            if_anomaly_score: score,
            if_is_anomaly: score <= -0.75,
        }
    }

    #[test]
    fn benign_label_and_high_score_is_not_suspicious() {
        assert!(!is_suspicious(&sample("Benign", 0.1), -0.75));
    }

    #[test]
    fn non_benign_label_is_suspicious_even_with_high_score() {
        assert!(is_suspicious(&sample("DDoS", 0.5), -0.75));
    }

    #[test]
    fn benign_label_with_low_score_is_still_suspicious() {
        assert!(is_suspicious(&sample("Benign", -0.9), -0.75));
    }
}
