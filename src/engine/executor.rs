use log::{debug, info, warn};

use crate::context::Context;
use crate::engine::factory::PreparedStep;
use crate::error::{EngineError, ErrorKind};
use crate::verdict::Verdict;

/// What a single step contributed to its phase.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub id: String,
    pub verdict: Verdict,
    pub message: String,
    pub error: Option<EngineError>,
}

impl StepOutcome {
    pub fn pass(id: &str, message: &str) -> Self {
        Self {
            id: id.to_owned(),
            verdict: Verdict::Pass,
            message: message.to_owned(),
            error: None,
        }
    }
}

/// Whether the phase keeps running after a step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    AbortPhase,
}

/// Run one prepared step against the context and classify the result.
///
/// Flow rules:
/// - a device fault records `Fail` and continues, unless the step is
///   blocking;
/// - a timeout records `Timeout` and aborts, unless the step is
///   non-critical;
/// - an interruption always aborts;
/// - any other error blames the environment and aborts;
/// - a failed `check` records `Fail`; it aborts when the step is
///   blocking or critical.
pub fn run_step(prepared: &PreparedStep, ctx: &Context) -> (StepOutcome, StepFlow) {
    debug!("step {}: begin", prepared.id);

    if let Err(err) = prepared.env.suspension_point() {
        return classify_error(prepared, err);
    }
    if let Err(err) = prepared.step.apply(ctx, &prepared.env) {
        return classify_error(prepared, err);
    }

    match prepared.step.check(ctx, &prepared.env) {
        None => {
            info!("step {}: [Unchecked] PASS", prepared.id);
            (
                StepOutcome::pass(&prepared.id, "[Unchecked] PASS"),
                StepFlow::Continue,
            )
        }
        Some(true) => {
            info!("step {}: PASSED", prepared.id);
            (StepOutcome::pass(&prepared.id, "PASSED"), StepFlow::Continue)
        }
        Some(false) => {
            let flow = if prepared.blocking || prepared.critical {
                StepFlow::AbortPhase
            } else {
                StepFlow::Continue
            };
            warn!("step {}: FAILED", prepared.id);
            (
                StepOutcome {
                    id: prepared.id.clone(),
                    verdict: Verdict::Fail,
                    message: "FAILED".to_owned(),
                    error: None,
                },
                flow,
            )
        }
    }
}

fn classify_error(prepared: &PreparedStep, err: EngineError) -> (StepOutcome, StepFlow) {
    let flow = match err.kind {
        ErrorKind::Device(_) => {
            if prepared.blocking {
                StepFlow::AbortPhase
            } else {
                StepFlow::Continue
            }
        }
        ErrorKind::Timeout => {
            if prepared.critical {
                StepFlow::AbortPhase
            } else {
                StepFlow::Continue
            }
        }
        _ => StepFlow::AbortPhase,
    };
    warn!("step {}: {err}", prepared.id);
    (
        StepOutcome {
            id: prepared.id.clone(),
            verdict: err.verdict(),
            message: err.to_string(),
            error: Some(err),
        },
        flow,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::bench::NullBench;
    use crate::catalog::bundle::ParameterBundle;
    use crate::engine::step::{StepEnv, TestStep};
    use crate::engine::watch::{CancelToken, WatcherRegistry};
    use crate::error::DeviceFault;

    enum Behavior {
        Ok(Option<bool>),
        Err(EngineError),
    }

    struct Scripted(Behavior);

    impl TestStep for Scripted {
        fn apply(&self, _ctx: &Context, _env: &StepEnv) -> Result<(), EngineError> {
            match &self.0 {
                Behavior::Ok(_) => Ok(()),
                Behavior::Err(err) => Err(err.clone()),
            }
        }

        fn check(&self, _ctx: &Context, _env: &StepEnv) -> Option<bool> {
            match &self.0 {
                Behavior::Ok(checked) => *checked,
                Behavior::Err(_) => None,
            }
        }
    }

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

    fn prepared(behavior: Behavior, blocking: bool, critical: bool) -> PreparedStep {
        PreparedStep {
            id: "STEP".to_owned(),
            blocking,
            critical,
            step: Box::new(Scripted(behavior)),
            env: env(),
        }
    }

    #[test]
    fn unchecked_pass() {
        let (outcome, flow) = run_step(&prepared(Behavior::Ok(None), false, true), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.message, "[Unchecked] PASS");
        assert_eq!(flow, StepFlow::Continue);
    }

    #[test]
    fn checked_pass() {
        let (outcome, flow) =
            run_step(&prepared(Behavior::Ok(Some(true)), false, true), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.message, "PASSED");
        assert_eq!(flow, StepFlow::Continue);
    }

    #[test]
    fn critical_check_failure_aborts() {
        let (outcome, flow) =
            run_step(&prepared(Behavior::Ok(Some(false)), false, true), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(flow, StepFlow::AbortPhase);
    }

    #[test]
    fn non_critical_check_failure_continues() {
        let (outcome, flow) =
            run_step(&prepared(Behavior::Ok(Some(false)), false, false), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(flow, StepFlow::Continue);
    }

    #[test]
    fn blocking_overrides_non_critical_on_check_failure() {
        let (_, flow) =
            run_step(&prepared(Behavior::Ok(Some(false)), true, false), &Context::new());
        assert_eq!(flow, StepFlow::AbortPhase);
    }

    #[test]
    fn device_error_continues_unless_blocking() {
        let err = EngineError::device(DeviceFault::AdbError, "shell failed");
        let (outcome, flow) =
            run_step(&prepared(Behavior::Err(err.clone()), false, true), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(flow, StepFlow::Continue);

        let (_, flow) = run_step(&prepared(Behavior::Err(err), true, true), &Context::new());
        assert_eq!(flow, StepFlow::AbortPhase);
    }

    #[test]
    fn timeout_aborts_unless_non_critical() {
        let err = EngineError::timeout("deadline expired");
        let (outcome, flow) =
            run_step(&prepared(Behavior::Err(err.clone()), false, true), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert_eq!(flow, StepFlow::AbortPhase);

        let (_, flow) = run_step(&prepared(Behavior::Err(err), false, false), &Context::new());
        assert_eq!(flow, StepFlow::Continue);
    }

    #[test]
    fn environment_error_always_aborts() {
        let err = EngineError::equipment("psu offline");
        let (outcome, flow) =
            run_step(&prepared(Behavior::Err(err), false, false), &Context::new());
        assert_eq!(outcome.verdict, Verdict::Blocked);
        assert_eq!(flow, StepFlow::AbortPhase);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn cancelled_token_interrupts_before_apply() {
        let prepared = prepared(Behavior::Ok(None), false, true);
        prepared.env.cancel.cancel();
        let (outcome, flow) = run_step(&prepared, &Context::new());
        assert_eq!(outcome.verdict, Verdict::Interrupted);
        assert_eq!(flow, StepFlow::AbortPhase);
    }

    #[test]
    fn expired_deadline_times_out_before_apply() {
        let mut prepared = prepared(Behavior::Ok(None), false, true);
        prepared.env.deadline = Some(Instant::now() - Duration::from_millis(1));
        let (outcome, flow) = run_step(&prepared, &Context::new());
        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert_eq!(flow, StepFlow::AbortPhase);
    }
}
