use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use mlnids_pipeline::config::Config;
use mlnids_pipeline::error::Result;
use mlnids_pipeline::{orchestrator, retrain, router, scorer, trainer, upload, watcher};

#[derive(Parser)]
#[command(name = "mlnids-pipeline", about = "Flow feature extraction and ML scoring pipeline")]
struct Cli {
    /// Path to a TOML config file; defaults are used if it doesn't exist.
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert every capture file in a directory into one Feature CSV.
    Convert {
        pcap_dir: PathBuf,
        out_csv: PathBuf,
    },
    /// Score a Feature CSV, producing a Scored CSV under processed_output/.
    Score {
        in_csv: PathBuf,
        out_name: String,
    },
    /// Fit/refit the preprocessor and the RF and/or IF models.
    Train {
        #[arg(long)]
        train_rf: bool,
        #[arg(long)]
        train_if: bool,
        #[arg(long)]
        rf_data: Option<PathBuf>,
        #[arg(long)]
        if_data: Option<PathBuf>,
        #[arg(long)]
        target_sample_size: Option<usize>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        n_estimators: Option<u32>,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        n_jobs: Option<i32>,
    },
    /// Run the ingest watcher loop until interrupted.
    Watch,
    /// Run the full scoring/routing/retraining loop until interrupted.
    Serve,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Convert { pcap_dir, out_csv } => run_convert(&config, &pcap_dir, &out_csv),
        Command::Score { in_csv, out_name } => run_score(&config, &in_csv, &out_name),
        Command::Train {
            train_rf, train_if, rf_data, if_data,
            target_sample_size, chunk_size, n_estimators, max_depth, n_jobs,
        } => {
            let mut config = config;
            if let Some(v) = target_sample_size { config.train.target_sample_size = v; }
            if let Some(v) = chunk_size { config.train.chunk_size = v; }
            if let Some(v) = n_estimators { config.train.n_estimators = v; }
            if max_depth.is_some() { config.train.max_depth = max_depth; }
            if let Some(v) = n_jobs { config.train.n_jobs = v; }

            run_train(&config, train_rf, train_if, rf_data, if_data)
        }
        Command::Watch => run_watch(&config),
        Command::Serve => run_serve(&config),
    }
}

fn run_convert(config: &Config, pcap_dir: &PathBuf, out_csv: &PathBuf) -> Result<()> {
    let timeout = Duration::from_secs(config.flow_timeout_secs);
    let flows = orchestrator::convert_directory(pcap_dir, out_csv, timeout)?;
    log::info!("wrote {} flows to {:?}", flows, out_csv);
    Ok(())
}

fn run_score(config: &Config, in_csv: &PathBuf, out_name: &str) -> Result<()> {
    let scorer = scorer::Scorer::load(
        &config.preprocessor_bundle_path(),
        &config.rf_model_path(),
        &config.if_model_path(),
    );

    let mut reader = csv::Reader::from_path(in_csv)?;
    let mut scored = Vec::new();
    for result in reader.deserialize() {
        let record: mlnids_pipeline::features::FeatureRecord = result?;
        scored.push(scorer.score(record)?);
    }

    let out_path = config.processed_output().join(out_name);
    std::fs::create_dir_all(config.processed_output())?;
    let mut writer = csv::Writer::from_path(&out_path)?;
    writer.write_record(mlnids_pipeline::scorer::ScoredRecord::header())?;
    for row in &scored {
        writer.write_record(row.to_row())?;
    }
    writer.flush()?;

    log::info!("scored {} row(s), wrote {:?}", scored.len(), out_path);
    Ok(())
}

fn run_train(
    config: &Config,
    train_rf: bool,
    train_if: bool,
    rf_data: Option<PathBuf>,
    if_data: Option<PathBuf>,
) -> Result<()> {
    let args = trainer::TrainArgs {
        train_rf,
        train_if,
        rf_data: rf_data.clone(),
        if_data: if_data.clone(),
    };
    trainer::validate(&args, config)?;

    if train_rf {
        let rf_data = rf_data.expect("validated above");
        trainer::train_random_forest(config, &rf_data)?;
        log::info!("RF model trained");
    }
    if train_if {
        let if_data = if_data.expect("validated above");
        trainer::train_isolation_forest_from(config, &if_data)?;
        log::info!("IF model trained");
    }
    Ok(())
}

fn run_watch(config: &Config) -> Result<()> {
    let stop = install_shutdown_handler()?;
    let mut watcher = watcher::IngestWatcher::new(
        config.capture_staging(),
        config.pcap_todo(),
        Duration::from_secs(config.ingest_quiescence_minutes * 60),
        Duration::from_secs(config.ingest_poll_interval_secs),
    );
    log::info!("ingest watcher running, Ctrl+C to stop");
    watcher.run(stop)
}

fn run_serve(config: &Config) -> Result<()> {
    let stop = install_shutdown_handler()?;
    let uploader = upload::Uploader::new(config.upload.clone())?;
    let scorer = scorer::Scorer::load(
        &config.preprocessor_bundle_path(),
        &config.rf_model_path(),
        &config.if_model_path(),
    );

    log::info!("serve loop running, Ctrl+C to stop");
    while !stop.load(Ordering::SeqCst) {
        match std::fs::read_dir(config.csv_todo()) {
            Ok(entries) => {
                for entry in entries.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    if let Err(e) = process_one_csv(config, &scorer, &uploader, &path) {
                        log::error!("failed to process {:?}: {}", path, e);
                    }
                }
            }
            Err(e) => log::warn!("could not read {:?}: {}", config.csv_todo(), e),
        }
        std::thread::sleep(Duration::from_secs(config.ingest_poll_interval_secs));
    }
    Ok(())
}

fn process_one_csv(
    config: &Config,
    scorer: &scorer::Scorer,
    uploader: &upload::Uploader,
    path: &std::path::Path,
) -> Result<()> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut scored = Vec::new();
    for result in reader.deserialize() {
        let record: mlnids_pipeline::features::FeatureRecord = result?;
        scored.push(scorer.score(record)?);
    }

    let label = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let outcome = router::route_batch(config, uploader, scored, &label)?;
    retrain::trigger(config, &outcome);

    let done_dir = config.csv_done();
    std::fs::create_dir_all(&done_dir)?;
    if let Some(file_name) = path.file_name() {
        std::fs::rename(path, done_dir.join(file_name))?;
    }

    Ok(())
}

fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("received interrupt, shutting down");
        handler_stop.store(true, Ordering::SeqCst);
    })?;
    Ok(stop)
}
