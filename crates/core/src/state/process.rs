//! Run state transitions and live process handles.
//!
//! The functions here are pure: they take the current [`Run`] and a clock
//! reading, which keeps the lifecycle rules testable without a registry.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use wf_protocol::{Run, RunStatus, RunUpdate};

/// The live external process behind a run's current stage.
///
/// Held by the job registry only while the process runs. Dropping the handle
/// without calling [`ProcessHandle::terminate`] leaves the process alone.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    cancel_tx: oneshot::Sender<()>,
}

impl ProcessHandle {
    /// Create a handle plus the receiver the owning runner listens on.
    pub fn new(pid: u32, stage: impl Into<String>) -> (Self, oneshot::Receiver<()>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = Self {
            pid,
            stage: stage.into(),
            started_at: Utc::now(),
            cancel_tx,
        };
        (handle, cancel_rx)
    }

    /// Ask the owning runner to terminate the process.
    pub fn terminate(self) {
        // The runner may have finished between lookup and send.
        let _ = self.cancel_tx.send(());
    }
}

/// Merge `update` into `run`.
///
/// - Progress never decreases and is clamped to 100.
/// - The first transition into `Running` stamps `started_at`.
/// - The first terminal transition stamps `completed_at`; later ones keep it.
/// - A terminal run never returns to a non-terminal status.
/// - `error` survives only while the status is `Failed`.
/// - The ETA is recomputed on every update.
pub fn apply_update(run: &mut Run, update: RunUpdate, now: DateTime<Utc>) {
    if let Some(status) = update.status {
        if run.status.is_terminal() && !status.is_terminal() {
            tracing::debug!(
                run_id = %run.run_id,
                from = %run.status,
                to = %status,
                "ignoring transition out of terminal state"
            );
        } else {
            run.status = status;
            if status == RunStatus::Running && run.started_at.is_none() {
                run.started_at = Some(now);
            }
            if status.is_terminal() && run.completed_at.is_none() {
                run.completed_at = Some(now);
            }
        }
    }

    if let Some(progress) = update.progress {
        run.progress = run.progress.max(progress.min(100));
    }

    if let Some(stage) = update.current_stage {
        run.current_stage = stage;
    }

    if let Some(error) = update.error {
        run.error = Some(error);
    }
    if run.status != RunStatus::Failed {
        run.error = None;
    }

    run.eta_seconds = estimate_eta(run.started_at, run.progress, now);
}

/// Seconds remaining, extrapolated linearly from elapsed time.
///
/// `None` when the run has not started or has made no progress.
pub fn estimate_eta(
    started_at: Option<DateTime<Utc>>,
    progress: u8,
    now: DateTime<Utc>,
) -> Option<f64> {
    let started_at = started_at?;
    if progress == 0 {
        return None;
    }
    let elapsed = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    let progress = f64::from(progress.min(100));
    Some(elapsed * (100.0 - progress) / progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_eta_from_elapsed_and_progress() {
        let now = Utc::now();
        let started = now - Duration::seconds(60);

        let eta = estimate_eta(Some(started), 25, now).expect("ETA should be defined");
        assert!((eta - 180.0).abs() < 0.01, "eta was {eta}");

        assert!(estimate_eta(Some(started), 0, now).is_none());
        assert!(estimate_eta(None, 50, now).is_none());
        assert_eq!(estimate_eta(Some(started), 100, now), Some(0.0));
    }

    #[test]
    fn test_started_at_stamped_once() {
        let mut run = Run::new("r");
        let first = Utc::now();
        apply_update(&mut run, RunUpdate::status(RunStatus::Running), first);
        apply_update(
            &mut run,
            RunUpdate::status(RunStatus::Running),
            first + Duration::seconds(5),
        );
        assert_eq!(run.started_at, Some(first));
    }

    #[test]
    fn test_completed_at_stamped_on_first_terminal_only() {
        let mut run = Run::new("r");
        let t0 = Utc::now();
        apply_update(&mut run, RunUpdate::status(RunStatus::Running), t0);
        let t1 = t0 + Duration::seconds(10);
        apply_update(&mut run, RunUpdate::status(RunStatus::Stopped), t1);
        apply_update(
            &mut run,
            RunUpdate::status(RunStatus::Failed).with_error("late"),
            t1 + Duration::seconds(10),
        );
        assert_eq!(run.completed_at, Some(t1));
    }

    #[test]
    fn test_terminal_run_does_not_resume() {
        let mut run = Run::new("r");
        let now = Utc::now();
        apply_update(&mut run, RunUpdate::status(RunStatus::Success), now);
        apply_update(&mut run, RunUpdate::status(RunStatus::Running), now);
        assert_eq!(run.status, RunStatus::Success);
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let mut run = Run::new("r");
        let now = Utc::now();
        apply_update(&mut run, RunUpdate::default().with_progress(40), now);
        apply_update(&mut run, RunUpdate::default().with_progress(20), now);
        assert_eq!(run.progress, 40);
        apply_update(&mut run, RunUpdate::default().with_progress(250), now);
        assert_eq!(run.progress, 100);
    }

    #[test]
    fn test_error_only_kept_when_failed() {
        let mut run = Run::new("r");
        let now = Utc::now();
        apply_update(&mut run, RunUpdate::default().with_error("boom"), now);
        assert!(run.error.is_none());
        apply_update(
            &mut run,
            RunUpdate::status(RunStatus::Failed).with_error("boom"),
            now,
        );
        assert_eq!(run.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_terminate_signals_receiver() {
        let (handle, rx) = ProcessHandle::new(42, "Running solver");
        handle.terminate();
        assert!(rx.await.is_ok());
    }
}
