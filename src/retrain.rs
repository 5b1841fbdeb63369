use crate::config::Config;
use crate::router::RouteOutcome;
use crate::trainer;

/// Invokes an Isolation Forest refit against the updated training corpus
/// exactly once per router batch that appended benign rows (C8). A retrain
/// failure is logged and swallowed here — it must never take down the
/// serving loop, only delay the next model update (spec: RetrainFailed is
/// non-fatal).
pub fn trigger(config: &Config, outcome: &RouteOutcome) {
    if outcome.benign_count == 0 {
        return;
    }

    log::info!(
        "retrain trigger: {} new benign row(s) appended, refitting IF",
        outcome.benign_count
    );

    match trainer::train_isolation_forest(config) {
        Ok(()) => log::info!("retrain succeeded"),
        Err(e) => log::error!("retrain failed, keeping previous IF model: {}", e),
    }
}
