use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use csv::Writer;
use rayon::prelude::*;

use crate::error::Result;
use crate::features;
use crate::flow::FlowTable;
use crate::packet::capture::CaptureReader;

/// Outcome of converting one capture file, returned alongside its temp
/// output so the orchestrator can merge only the successes.
struct WorkerResult {
    source: PathBuf,
    temp_path: Option<PathBuf>,
    flows_written: u64,
    malformed_packets: u64,
    error: Option<String>,
}

/// Converts every capture file under `pcap_dir` into `out_csv`, one worker
/// per file, `max(1, cpu_count - 1)` workers in flight at a time (spec
/// §4.5). Tolerant of individual file failures: a bad capture is logged and
/// skipped, the rest still get merged.
pub fn convert_directory(pcap_dir: &Path, out_csv: &Path, flow_timeout: Duration) -> Result<u64> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(pcap_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let worker_count = (num_cpus::get().saturating_sub(1)).max(1);
    log::info!("converting {} capture file(s) with {} worker(s)", files.len(), worker_count);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .map_err(|e| crate::error::PipelineError::Config(e.to_string()))?;

    let results: Vec<WorkerResult> = pool.install(|| {
        files
            .par_iter()
            .map(|file| process_one_file(file, flow_timeout))
            .collect()
    });

    let mut total_flows = 0u64;
    let mut temp_paths = Vec::new();
    for result in &results {
        match &result.error {
            Some(err) => log::warn!("skipping {:?}: {}", result.source, err),
            None => {
                log::info!(
                    "{:?}: {} flows, {} malformed packets skipped",
                    result.source, result.flows_written, result.malformed_packets
                );
                total_flows += result.flows_written;
                if let Some(path) = &result.temp_path {
                    temp_paths.push(path.clone());
                }
            }
        }
    }

    merge_temp_files(&temp_paths, out_csv)?;
    Ok(total_flows)
}

fn process_one_file(path: &Path, flow_timeout: Duration) -> WorkerResult {
    match process_one_file_inner(path, flow_timeout) {
        Ok((temp_path, flows_written, malformed_packets)) => WorkerResult {
            source: path.to_path_buf(),
            temp_path: Some(temp_path),
            flows_written,
            malformed_packets,
            error: None,
        },
        Err(e) => WorkerResult {
            source: path.to_path_buf(),
            temp_path: None,
            flows_written: 0,
            malformed_packets: 0,
            error: Some(e.to_string()),
        },
    }
}

fn process_one_file_inner(path: &Path, flow_timeout: Duration) -> Result<(PathBuf, u64, u64)> {
    let mut reader = CaptureReader::open(path)?;
    let mut table = FlowTable::new(flow_timeout);

    let temp = tempfile::Builder::new()
        .prefix("mlnids-worker-")
        .suffix(".csv")
        .tempfile()?;
    let (file, temp_path) = temp.keep().map_err(|e| crate::error::PipelineError::Io(e.to_string()))?;
    let mut writer = Writer::from_writer(file);

    let mut flows_written = 0u64;
    let mut packet_count = 0u64;
    const SWEEP_INTERVAL: u64 = 5000;

    while let Some(packet) = reader.next_packet() {
        packet_count += 1;
        let now = packet.timestamp;
        table.upsert(&packet);

        if packet_count % SWEEP_INTERVAL == 0 {
            for flow in table.sweep(now) {
                if let Some(key) = rebuild_key(&flow) {
                    if let Some(record) = features::compute(&key, &flow) {
                        writer.serialize(&record)?;
                        flows_written += 1;
                    }
                }
            }
        }
    }

    for flow in table.drain() {
        if let Some(key) = rebuild_key(&flow) {
            if let Some(record) = features::compute(&key, &flow) {
                writer.serialize(&record)?;
                flows_written += 1;
            }
        }
    }
    writer.flush()?;

    log::debug!(
        "{:?}: {} packets read, {} malformed skipped",
        path, packet_count, reader.malformed_count()
    );

    Ok((temp_path, flows_written, reader.malformed_count()))
}

fn rebuild_key(flow: &crate::flow::FlowRecord) -> Option<crate::flow::FlowKey> {
    Some(crate::flow::FlowKey::canonicalize(
        flow.initiator_ip,
        flow.initiator_port,
        flow.responder_ip,
        flow.responder_port,
        flow.protocol,
    ))
}

/// Writes the shared header once, then streams each temp file's body
/// (skipping its own header line) into the final CSV. Mirrors the
/// original tool's sequential merge step exactly.
fn merge_temp_files(temp_paths: &[PathBuf], out_csv: &Path) -> Result<()> {
    let out_file = File::create(out_csv)?;
    let mut out = std::io::BufWriter::new(out_file);

    let header = csv_header();
    writeln!(out, "{}", header)?;

    for temp_path in temp_paths {
        let file = File::open(temp_path)?;
        let reader = BufReader::new(file);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if i == 0 {
                continue;
            }
            writeln!(out, "{}", line)?;
        }
        let _ = std::fs::remove_file(temp_path);
    }

    Ok(())
}

fn csv_header() -> String {
    let mut writer = Writer::from_writer(Vec::new());
    writer
        .write_record(features::FeatureRecord::csv_header())
        .expect("in-memory header write cannot fail");
    String::from_utf8(writer.into_inner().expect("in-memory writer has no flush error")).unwrap()
        .trim_end()
        .to_string()
}
