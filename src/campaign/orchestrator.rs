use std::time::SystemTime;

use log::{error, info};

use crate::campaign::case_runner::run_case;
use crate::campaign::descriptor::CampaignDescriptor;
use crate::engine::factory::StepFactory;
use crate::engine::watch::CancelToken;
use crate::report::{CampaignRecord, CaseRecord, HostProps, rfc3339};
use crate::testcase::parser::parse_testcase_file;
use crate::verdict::Verdict;

/// Execute a linearized campaign case by case.
///
/// A case whose file cannot be loaded is recorded `Blocked` and the
/// campaign moves on. A case flagged `Warning` contributes `Pass`
/// instead of `Fail` to the aggregate (its own records keep the real
/// verdict). `StopOnFailure` and cancellation end the campaign early;
/// bench handles are released on the way out.
pub fn run_campaign(
    descriptor: &CampaignDescriptor,
    factory: &StepFactory,
    cancel: &CancelToken,
    max_retries: u32,
) -> CampaignRecord {
    let start = SystemTime::now();
    info!(
        "campaign {}: {} case(s)",
        descriptor.name,
        descriptor.cases.len()
    );

    let mut cases = Vec::new();
    let mut aggregate = Verdict::Pass;

    for desc in &descriptor.cases {
        if cancel.is_cancelled() {
            info!("campaign {}: cancelled", descriptor.name);
            aggregate = aggregate.max(Verdict::Interrupted);
            break;
        }
        let run_verdict = match parse_testcase_file(&desc.path) {
            Ok(case) => {
                let run = run_case(desc, &case, factory, cancel, max_retries);
                cases.extend(run.records);
                run.verdict
            }
            Err(err) => {
                error!("case {}: {err}", desc.id);
                cases.push(CaseRecord {
                    id: desc.id.clone(),
                    order: desc.order,
                    iteration: 1,
                    retry: 0,
                    verdict: Verdict::Blocked,
                    messages: vec![err.to_string()],
                    steps: Vec::new(),
                });
                Verdict::Blocked
            }
        };

        let effective = if desc.warning && run_verdict == Verdict::Fail {
            info!("case {}: FAIL downgraded to warning", desc.id);
            Verdict::Pass
        } else {
            run_verdict
        };
        aggregate = aggregate.max(effective);

        if run_verdict == Verdict::Interrupted {
            break;
        }
        if desc.stop_on_failure && !effective.is_pass() {
            info!("case {}: {run_verdict}, stopping campaign", desc.id);
            break;
        }
    }

    factory.bench().release_all();

    CampaignRecord {
        campaign_name: descriptor.name.clone(),
        start: rfc3339(start),
        end: rfc3339(SystemTime::now()),
        aggregate,
        host: HostProps::capture(),
        cases,
    }
}

/// The final verdict of one linearized case: the aggregate of the last
/// attempt's iterations, `NotRun` when the campaign never reached it.
pub fn case_verdict(record: &CampaignRecord, order: usize) -> Verdict {
    let attempts: Vec<&CaseRecord> = record
        .cases
        .iter()
        .filter(|c| c.order == order)
        .collect();
    let Some(last_retry) = attempts.iter().map(|c| c.retry).max() else {
        return Verdict::NotRun;
    };
    crate::verdict::aggregate(
        attempts
            .iter()
            .filter(|c| c.retry == last_retry)
            .map(|c| c.verdict),
    )
}
