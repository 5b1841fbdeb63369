use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// Polls a staging directory and promotes files whose mtime has been
/// unchanged for at least `quiescence` (C9). Atomic rename into the FFE's
/// `todo/` directory is the hand-off; nothing else synchronizes producer
/// and consumer.
pub struct IngestWatcher {
    staging_dir: PathBuf,
    promote_to: PathBuf,
    quiescence: Duration,
    poll_interval: Duration,
    last_seen_mtime: HashMap<PathBuf, (SystemTime, SystemTime)>,
}

impl IngestWatcher {
    pub fn new(staging_dir: PathBuf, promote_to: PathBuf, quiescence: Duration, poll_interval: Duration) -> Self {
        IngestWatcher {
            staging_dir,
            promote_to,
            quiescence,
            poll_interval,
            last_seen_mtime: HashMap::new(),
        }
    }

    /// Runs the poll loop until `stop` is set (wired to Ctrl+C by the
    /// `watch` subcommand).
    pub fn run(&mut self, stop: Arc<AtomicBool>) -> Result<()> {
        std::fs::create_dir_all(&self.staging_dir)?;
        std::fs::create_dir_all(&self.promote_to)?;

        while !stop.load(Ordering::SeqCst) {
            if let Err(e) = self.scan_once() {
                log::error!("ingest watcher scan failed: {}", e);
            }
            std::thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    /// One pass: check every staged file's mtime against what was observed
    /// last pass, promoting anything quiescent long enough.
    pub fn scan_once(&mut self) -> Result<()> {
        let now = SystemTime::now();
        let mut still_present = HashMap::new();

        for entry in std::fs::read_dir(&self.staging_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let mtime = entry.metadata()?.modified()?;

            let first_seen_unchanged = match self.last_seen_mtime.get(&path) {
                Some((seen_mtime, first_seen)) if *seen_mtime == mtime => *first_seen,
                _ => now,
            };
            still_present.insert(path.clone(), (mtime, first_seen_unchanged));

            let unchanged_for = now
                .duration_since(first_seen_unchanged)
                .unwrap_or(Duration::ZERO);
            if unchanged_for >= self.quiescence {
                self.promote(&path)?;
                still_present.remove(&path);
            }
        }

        self.last_seen_mtime = still_present;
        Ok(())
    }

    fn promote(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| crate::error::PipelineError::Io(format!("{:?} has no file name", path)))?;
        let dest = self.promote_to.join(file_name);
        std::fs::rename(path, &dest)?;
        log::info!("promoted {:?} -> {:?}", path, dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotes_file_quiescent_past_threshold() {
        let staging = tempfile::tempdir().unwrap();
        let done = tempfile::tempdir().unwrap();
        let file_path = staging.path().join("upload.csv");
        std::fs::write(&file_path, b"data").unwrap();

        let mut watcher = IngestWatcher::new(
            staging.path().to_path_buf(),
            done.path().to_path_buf(),
            Duration::from_millis(0),
            Duration::from_secs(1),
        );

        watcher.scan_once().unwrap();

        assert!(!file_path.exists());
        assert!(done.path().join("upload.csv").exists());
    }

    #[test]
    fn leaves_freshly_modified_file_in_place() {
        let staging = tempfile::tempdir().unwrap();
        let done = tempfile::tempdir().unwrap();
        let file_path = staging.path().join("upload.csv");
        std::fs::write(&file_path, b"data").unwrap();

        let mut watcher = IngestWatcher::new(
            staging.path().to_path_buf(),
            done.path().to_path_buf(),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        );

        watcher.scan_once().unwrap();

        assert!(file_path.exists());
        assert!(!done.path().join("upload.csv").exists());
    }
}
