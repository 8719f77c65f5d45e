use std::sync::Arc;

use log::{info, warn};

use crate::campaign::descriptor::TestCaseDescriptor;
use crate::context::Context;
use crate::engine::composite::{CompositeRuntime, SequenceOutcome, run_nodes};
use crate::engine::factory::StepFactory;
use crate::engine::watch::{CancelToken, WatcherRegistry};
use crate::report::{CaseRecord, StepRecord};
use crate::testcase::{Phase, TestCaseFile};
use crate::verdict::{Verdict, aggregate};
use crate::xml::AttrMap;

/// Everything one case produced: one record per `(retry, iteration)` and
/// the final attempt's verdict.
#[derive(Debug)]
pub struct CaseRun {
    pub records: Vec<CaseRecord>,
    pub verdict: Verdict,
}

/// Run one case: up to `max_retries` retries, each attempt holding `B2B`
/// back-to-back iterations over a single fresh context.
///
/// A retry happens only for a `Fail` or `Blocked` attempt on a
/// non-provisioning case. Iterations stop early when one signals
/// `Blocked` or cancellation is observed.
pub fn run_case(
    desc: &TestCaseDescriptor,
    case: &TestCaseFile,
    factory: &StepFactory,
    cancel: &CancelToken,
    max_retries: u32,
) -> CaseRun {
    let retries_allowed = if desc.provisioning { 0 } else { max_retries };
    let mut records = Vec::new();
    let mut verdict = Verdict::NotRun;

    for retry in 0..=retries_allowed {
        if retry > 0 {
            info!(
                "case {}: verdict {verdict}, retry {retry} of {retries_allowed}",
                desc.id
            );
        }
        let ctx = Context::new();
        let watchers = Arc::new(WatcherRegistry::new());
        let mut iteration_verdicts = Vec::new();

        for iteration in 1..=desc.b2b {
            let attempt = run_phases(case, &ctx, factory, cancel, &watchers);
            iteration_verdicts.push(attempt.verdict);
            records.push(CaseRecord {
                id: desc.id.clone(),
                order: desc.order,
                iteration,
                retry,
                verdict: attempt.verdict,
                messages: attempt.messages,
                steps: attempt.steps,
            });
            if matches!(attempt.verdict, Verdict::Blocked | Verdict::Interrupted)
                || cancel.is_cancelled()
            {
                break;
            }
        }

        verdict = aggregate(iteration_verdicts);
        if verdict == Verdict::Interrupted || cancel.is_cancelled() {
            break;
        }
        if !verdict.is_retryable() {
            break;
        }
    }

    CaseRun { records, verdict }
}

struct Attempt {
    verdict: Verdict,
    steps: Vec<StepRecord>,
    messages: Vec<String>,
}

/// Run the five phases in order per the phase table: an Initialize or
/// Setup failure blocks the case and skips forward phases, a RunTest
/// failure keeps its own verdict, TearDown and Finalize results are
/// recorded without affecting the verdict.
fn run_phases(
    case: &TestCaseFile,
    ctx: &Context,
    factory: &StepFactory,
    cancel: &CancelToken,
    watchers: &Arc<WatcherRegistry>,
) -> Attempt {
    let rt = CompositeRuntime {
        factory,
        sets: &case.sets,
        cancel,
        watchers,
    };
    let forwarded = AttrMap::new();
    let mut attempt = Attempt {
        verdict: Verdict::NotRun,
        steps: Vec::new(),
        messages: Vec::new(),
    };
    let mut fatal_phases = Vec::new();
    let mut skip_from = None;

    for phase in Phase::ALL {
        if cancel.is_cancelled() && attempt.verdict == Verdict::Interrupted {
            break;
        }
        if skipped(phase, skip_from) {
            attempt.messages.push(format!("{phase}: skipped"));
            continue;
        }
        let out = run_nodes(case.phase(phase), ctx, &rt, &forwarded);
        let verdict = sequence_verdict(&out);
        record_sequence(&mut attempt, phase, out);

        match phase {
            Phase::Initialize | Phase::Setup => {
                if verdict.is_pass() {
                    fatal_phases.push(Verdict::Pass);
                } else {
                    let mapped = block_unless_interrupted(verdict);
                    fatal_phases.push(mapped);
                    skip_from = Some(phase);
                    attempt
                        .messages
                        .push(format!("{phase} failed ({verdict}), case {mapped}"));
                }
            }
            Phase::RunTest => fatal_phases.push(verdict),
            Phase::TearDown | Phase::Finalize => {
                if !verdict.is_pass() {
                    warn!("{phase} ended with {verdict}");
                    attempt.messages.push(format!("{phase} ended with {verdict}"));
                }
            }
        }
        attempt.verdict = aggregate(fatal_phases.iter().copied());
    }

    attempt
}

/// Initialize failure skips Setup, RunTest, and TearDown; Setup failure
/// skips RunTest only. Finalize always runs.
fn skipped(phase: Phase, skip_from: Option<Phase>) -> bool {
    match skip_from {
        None => false,
        Some(Phase::Initialize) => {
            matches!(phase, Phase::Setup | Phase::RunTest | Phase::TearDown)
        }
        Some(Phase::Setup) => phase == Phase::RunTest,
        Some(_) => false,
    }
}

fn block_unless_interrupted(verdict: Verdict) -> Verdict {
    if verdict == Verdict::Interrupted {
        Verdict::Interrupted
    } else {
        Verdict::Blocked
    }
}

fn sequence_verdict(out: &SequenceOutcome) -> Verdict {
    let steps = aggregate(out.steps.iter().map(|s| s.verdict));
    match &out.error {
        Some(err) => steps.max(err.verdict()),
        None => steps,
    }
}

fn record_sequence(attempt: &mut Attempt, phase: Phase, out: SequenceOutcome) {
    for step in out.steps {
        attempt.steps.push(StepRecord {
            id: step.id,
            verdict: step.verdict,
            message: step.message,
        });
    }
    if let Some(err) = out.error {
        attempt.messages.push(format!("{phase}: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::bench::NullBench;
    use crate::catalog::Catalog;
    use crate::engine::factory::EngineConfig;
    use crate::steps::{builtin_registry, builtin_scope};
    use crate::testcase::parser::parse_testcase_str;

    fn factory() -> StepFactory {
        let mut catalog = Catalog::new();
        catalog.merge_scope(builtin_scope()).unwrap();
        StepFactory::new(
            Arc::new(catalog),
            Arc::new(builtin_registry()),
            NullBench::shared(),
            EngineConfig::default(),
        )
    }

    fn descriptor() -> TestCaseDescriptor {
        let mut desc = TestCaseDescriptor::new("case.xml", PathBuf::from("case.xml"));
        desc.order = 1;
        desc
    }

    fn run(xml: &str, desc: &TestCaseDescriptor, max_retries: u32) -> CaseRun {
        let case = parse_testcase_str(xml, None).unwrap();
        run_case(desc, &case, &factory(), &CancelToken::new(), max_retries)
    }

    #[test]
    fn passing_case_yields_one_pass_record() {
        let run = run(
            r#"<TestCase><RunTest><TestStep Id="NOOP_PASS"/></RunTest></TestCase>"#,
            &descriptor(),
            0,
        );
        assert_eq!(run.verdict, Verdict::Pass);
        assert_eq!(run.records.len(), 1);
        let record = &run.records[0];
        assert_eq!(record.verdict, Verdict::Pass);
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.steps[0].message, "[Unchecked] PASS");
    }

    #[test]
    fn setup_blocking_failure_blocks_and_still_tears_down() {
        let run = run(
            r#"<TestCase>
                 <Setup><TestStep Id="NOOP_FAIL" blocking="true"/></Setup>
                 <RunTest><TestStep Id="SET_CONTEXT_VALUE" KEY="ran" VALUE="1"/></RunTest>
                 <TearDown><TestStep Id="NOOP_PASS" MESSAGE="teardown"/></TearDown>
                 <Finalize><TestStep Id="NOOP_PASS" MESSAGE="finalize"/></Finalize>
               </TestCase>"#,
            &descriptor(),
            0,
        );
        assert_eq!(run.verdict, Verdict::Blocked);
        let record = &run.records[0];
        // NOOP_FAIL, then the TearDown and Finalize steps; RunTest absent.
        let ids: Vec<&str> = record.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["NOOP_FAIL", "NOOP_PASS", "NOOP_PASS"]);
        assert!(record.messages.iter().any(|m| m == "RunTest: skipped"));
    }

    #[test]
    fn initialize_failure_skips_teardown_but_finalizes() {
        let run = run(
            r#"<TestCase>
                 <Initialize><TestStep Id="RAISE_ERROR" KIND="environment"/></Initialize>
                 <TearDown><TestStep Id="NOOP_PASS"/></TearDown>
                 <Finalize><TestStep Id="NOOP_PASS" MESSAGE="last"/></Finalize>
               </TestCase>"#,
            &descriptor(),
            0,
        );
        assert_eq!(run.verdict, Verdict::Blocked);
        let record = &run.records[0];
        assert!(record.messages.iter().any(|m| m == "TearDown: skipped"));
        // The only pass step is the Finalize one.
        assert_eq!(
            record
                .steps
                .iter()
                .filter(|s| s.verdict == Verdict::Pass)
                .count(),
            1
        );
    }

    #[test]
    fn non_critical_failure_keeps_phase_running() {
        let run = run(
            r#"<TestCase><RunTest>
                 <TestStep Id="NOOP_FAIL" critical="false"/>
                 <TestStep Id="NOOP_PASS"/>
               </RunTest></TestCase>"#,
            &descriptor(),
            0,
        );
        assert_eq!(run.verdict, Verdict::Fail);
        assert_eq!(run.records[0].steps.len(), 2);
    }

    #[test]
    fn b2b_shares_context_and_aggregates_mixed_verdicts() {
        let mut desc = descriptor();
        desc.b2b = 3;
        // The check fails on the first iteration only; later iterations
        // see the value written by the first, proving the context is not
        // recreated between iterations.
        let run = run(
            r#"<TestCase><RunTest>
                 <TestStep Id="CHECK_CONTEXT_VALUE" KEY="armed" EXPECT="yes" critical="false"/>
                 <TestStep Id="SET_CONTEXT_VALUE" KEY="armed" VALUE="yes"/>
               </RunTest></TestCase>"#,
            &desc,
            0,
        );
        assert_eq!(run.records.len(), 3);
        let verdicts: Vec<Verdict> = run.records.iter().map(|r| r.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Fail, Verdict::Pass, Verdict::Pass]);
        let iterations: Vec<u32> = run.records.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3]);
        assert_eq!(run.verdict, Verdict::Fail);
    }

    #[test]
    fn blocked_iteration_stops_b2b() {
        let mut desc = descriptor();
        desc.b2b = 3;
        let run = run(
            r#"<TestCase><Setup><TestStep Id="RAISE_ERROR" KIND="equipment"/></Setup></TestCase>"#,
            &desc,
            0,
        );
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.verdict, Verdict::Blocked);
    }

    #[test]
    fn failed_case_retries_up_to_max() {
        let run = run(
            r#"<TestCase><RunTest><TestStep Id="NOOP_FAIL"/></RunTest></TestCase>"#,
            &descriptor(),
            2,
        );
        assert_eq!(run.records.len(), 3);
        let retries: Vec<u32> = run.records.iter().map(|r| r.retry).collect();
        assert_eq!(retries, vec![0, 1, 2]);
        assert_eq!(run.verdict, Verdict::Fail);
    }

    #[test]
    fn provisioning_case_never_retries() {
        let mut desc = descriptor();
        desc.provisioning = true;
        let run = run(
            r#"<TestCase><RunTest><TestStep Id="NOOP_FAIL"/></RunTest></TestCase>"#,
            &desc,
            5,
        );
        assert_eq!(run.records.len(), 1);
    }

    #[test]
    fn retry_gets_a_fresh_context() {
        // The check passes only if "left" survives into the next attempt;
        // with a fresh context per retry it must keep failing.
        let run = run(
            r#"<TestCase><RunTest>
                 <TestStep Id="CHECK_CONTEXT_VALUE" KEY="left" EXPECT="1" critical="false"/>
                 <TestStep Id="SET_CONTEXT_VALUE" KEY="left" VALUE="1"/>
               </RunTest></TestCase>"#,
            &descriptor(),
            1,
        );
        assert_eq!(run.records.len(), 2);
        assert!(run.records.iter().all(|r| r.verdict == Verdict::Fail));
    }

    #[test]
    fn timeout_verdict_is_not_retried() {
        let run = run(
            r#"<TestCase><RunTest><TestStep Id="RAISE_ERROR" KIND="timeout"/></RunTest></TestCase>"#,
            &descriptor(),
            3,
        );
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.verdict, Verdict::Timeout);
    }
}
