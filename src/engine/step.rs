use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bench::BenchFactory;
use crate::catalog::bundle::ParameterBundle;
use crate::engine::watch::{CancelToken, WatcherRegistry};
use crate::error::EngineError;

/// Everything a step instance is given at construction: its resolved
/// parameters, the bench factory, the cancellation token, the watcher
/// registry, and an optional deadline.
///
/// Steps receive their collaborators here instead of reaching for ambient
/// state; the factory builds one `StepEnv` per instantiation.
pub struct StepEnv {
    pub bundle: ParameterBundle,
    pub bench: Arc<dyn BenchFactory>,
    pub cancel: CancelToken,
    pub watchers: Arc<WatcherRegistry>,
    pub deadline: Option<Instant>,
    /// Polling granularity for cooperative waits. 200 ms unless a test
    /// tightens it.
    pub poll_interval: Duration,
}

impl StepEnv {
    /// Fail if the deadline has passed or cancellation was requested.
    /// Blocking steps call this at every suspension point.
    ///
    /// # Errors
    ///
    /// Returns a timeout- or interrupted-kind error.
    pub fn suspension_point(&self) -> Result<(), EngineError> {
        self.cancel.checkpoint()?;
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::timeout("step deadline expired"));
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, honoring the deadline and the cancel flag at
    /// `poll_interval` granularity.
    ///
    /// # Errors
    ///
    /// Returns a timeout- or interrupted-kind error raised mid-sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), EngineError> {
        let end = Instant::now() + duration;
        loop {
            self.suspension_point()?;
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            std::thread::sleep((end - now).min(self.poll_interval));
        }
    }
}

/// The contract of one atomic test step.
///
/// The executor calls `apply` then `check`; an error from `apply` skips
/// `check` entirely and is classified by its kind. `check` returning
/// `None` marks the step unchecked, which reports a trivial pass. An
/// implementation that fails internally while checking reports
/// `Some(false)` rather than erroring.
pub trait TestStep: Send + Sync {
    /// Perform the step's side effects (device, equipment, host).
    ///
    /// # Errors
    ///
    /// Returns an engine error classified into a verdict by its kind.
    fn apply(&self, ctx: &crate::context::Context, env: &StepEnv) -> Result<(), EngineError>;

    /// Optional post-condition over the context.
    fn check(&self, ctx: &crate::context::Context, env: &StepEnv) -> Option<bool> {
        let _ = (ctx, env);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::NullBench;
    use crate::error::ErrorKind;

    fn env() -> StepEnv {
        StepEnv {
            bundle: ParameterBundle::empty(),
            bench: NullBench::shared(),
            cancel: CancelToken::new(),
            watchers: Arc::new(WatcherRegistry::new()),
            deadline: None,
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn suspension_point_passes_by_default() {
        assert!(env().suspension_point().is_ok());
    }

    #[test]
    fn suspension_point_reports_cancellation() {
        let env = env();
        env.cancel.cancel();
        assert_eq!(
            env.suspension_point().unwrap_err().kind,
            ErrorKind::Interrupted
        );
    }

    #[test]
    fn suspension_point_reports_expired_deadline() {
        let mut env = env();
        env.deadline = Some(Instant::now() - Duration::from_millis(1));
        assert_eq!(env.suspension_point().unwrap_err().kind, ErrorKind::Timeout);
    }

    #[test]
    fn sleep_completes_within_deadline() {
        let env = env();
        assert!(env.sleep(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn sleep_interrupted_by_deadline() {
        let mut env = env();
        env.deadline = Some(Instant::now() + Duration::from_millis(10));
        let err = env.sleep(Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[test]
    fn sleep_interrupted_by_cancellation() {
        let env = env();
        let cancel = env.cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(15));
            cancel.cancel();
        });
        let err = env.sleep(Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Interrupted);
        handle.join().unwrap();
    }
}
