//! End-to-end tests for campaigns: XML files on disk through loading,
//! linearization, execution, reporting, and the CLI command layer.

use std::path::Path;

use benchrun::campaign::loader::load_campaign_file;
use benchrun::cli::commands::{RunOptions, run_catalog, run_run, run_validate};
use benchrun::error::ErrorKind;
use benchrun::report::CampaignRecord;
use benchrun::verdict::Verdict;

fn write(dir: &Path, name: &str, text: &str) {
    if let Some(parent) = dir.join(name).parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(dir.join(name), text).unwrap();
}

const PASS_CASE: &str = r#"<TestCase><RunTest><TestStep Id="NOOP_PASS"/></RunTest></TestCase>"#;
const FAIL_CASE: &str = r#"<TestCase><RunTest><TestStep Id="NOOP_FAIL"/></RunTest></TestCase>"#;

fn run_to_record(dir: &Path, campaign: &str, options: &RunOptions) -> CampaignRecord {
    let summary = run_run(&dir.join(campaign), options).unwrap();
    serde_json::from_str(&summary.output).unwrap()
}

#[test]
fn campaign_of_one_passing_case() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "case.xml", PASS_CASE);
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c"><TestCase Id="case.xml"/></Campaign>"#,
    );
    let record = run_to_record(dir.path(), "c.xml", &RunOptions::default());
    assert_eq!(record.aggregate, Verdict::Pass);
    assert_eq!(record.cases.len(), 1);
    assert_eq!(record.cases[0].order, 1);
}

#[test]
fn sub_campaign_cycle_fails_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.xml",
        r#"<Campaign Name="a"><SubCampaign Id="b.xml"/></Campaign>"#,
    );
    write(
        dir.path(),
        "b.xml",
        r#"<Campaign Name="b"><SubCampaign Id="a.xml"/></Campaign>"#,
    );
    let err = load_campaign_file(&dir.path().join("a.xml")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CampaignCycle);

    // The CLI surfaces the same failure without running anything.
    let message = run_run(&dir.path().join("a.xml"), &RunOptions::default()).unwrap_err();
    assert!(message.contains("campaign cycle"));
}

#[test]
fn b2b_produces_one_record_per_iteration() {
    let dir = tempfile::tempdir().unwrap();
    // The check fails on iteration 1 and passes afterwards, because the
    // context survives across back-to-back iterations.
    write(
        dir.path(),
        "case.xml",
        r#"<TestCase><RunTest>
             <TestStep Id="CHECK_CONTEXT_VALUE" KEY="armed" EXPECT="yes" critical="false"/>
             <TestStep Id="SET_CONTEXT_VALUE" KEY="armed" VALUE="yes"/>
           </RunTest></TestCase>"#,
    );
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c"><TestCase Id="case.xml" B2B="3"/></Campaign>"#,
    );
    let record = run_to_record(dir.path(), "c.xml", &RunOptions::default());
    assert_eq!(record.cases.len(), 3);
    let verdicts: Vec<Verdict> = record.cases.iter().map(|c| c.verdict).collect();
    assert_eq!(verdicts, vec![Verdict::Fail, Verdict::Pass, Verdict::Pass]);
    assert_eq!(record.aggregate, Verdict::Fail);
}

#[test]
fn max_retries_reruns_failed_cases() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "case.xml", FAIL_CASE);
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c"><TestCase Id="case.xml"/></Campaign>"#,
    );
    let options = RunOptions {
        max_retries: 2,
        ..RunOptions::default()
    };
    let record = run_to_record(dir.path(), "c.xml", &options);
    assert_eq!(record.cases.len(), 3);
    assert_eq!(record.cases.last().unwrap().retry, 2);
}

#[test]
fn warning_case_passes_the_campaign() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "case.xml", FAIL_CASE);
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c"><TestCase Id="case.xml" Warning="true"/></Campaign>"#,
    );
    let summary = run_run(&dir.path().join("c.xml"), &RunOptions::default()).unwrap();
    assert!(summary.passed);
    let record: CampaignRecord = serde_json::from_str(&summary.output).unwrap();
    assert_eq!(record.cases[0].verdict, Verdict::Fail);
}

#[test]
fn failed_campaign_round_trip_preserves_order_and_partition() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pass.xml", PASS_CASE);
    write(dir.path(), "fail.xml", FAIL_CASE);
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c">
             <TestCase Id="pass.xml"/>
             <TestCase Id="fail.xml"/>
             <TestCase Id="pass.xml"/>
           </Campaign>"#,
    );
    let options = RunOptions {
        failed_campaign: Some(dir.path().join("failed.xml")),
        ..RunOptions::default()
    };
    run_run(&dir.path().join("c.xml"), &options).unwrap();

    let reloaded = load_campaign_file(&dir.path().join("failed.xml")).unwrap();
    let ids: Vec<&str> = reloaded.cases.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["fail.xml"]);

    // Running the reloaded campaign and emitting again keeps the same
    // live set: the partition is stable under a second round trip.
    let options = RunOptions {
        failed_campaign: Some(dir.path().join("failed2.xml")),
        ..RunOptions::default()
    };
    run_run(&dir.path().join("failed.xml"), &options).unwrap();
    let again = load_campaign_file(&dir.path().join("failed2.xml")).unwrap();
    let ids: Vec<&str> = again.cases.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["fail.xml"]);
}

#[test]
fn user_catalog_extends_and_replaces_builtins() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "catalog/steps/marker.xml",
        r#"<TestStep Id="MARKER" ClassName="SetContextValue" Description="Writes a fixed marker.">
             <Parameters>
               <Parameter Name="KEY" Type="string" Optional="true" Default="marker"/>
               <Parameter Name="VALUE" Type="string" Optional="true" Default="set"/>
             </Parameters>
           </TestStep>"#,
    );
    // Replaces the built-in NOOP_PASS entry wholesale.
    write(
        dir.path(),
        "catalog/steps/noop.xml",
        r#"<TestStep Id="NOOP_PASS" ClassName="NoopPass">
             <Parameters>
               <Parameter Name="MESSAGE" Type="string" Optional="true" Default="replaced"/>
             </Parameters>
           </TestStep>"#,
    );
    write(
        dir.path(),
        "case.xml",
        r#"<TestCase><RunTest>
             <TestStep Id="MARKER"/>
             <TestStep Id="CHECK_CONTEXT_VALUE" KEY="marker" EXPECT="set"/>
             <TestStep Id="NOOP_PASS"/>
           </RunTest></TestCase>"#,
    );
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c"><TestCase Id="case.xml"/></Campaign>"#,
    );
    let options = RunOptions {
        catalogs: vec![dir.path().join("catalog")],
        ..RunOptions::default()
    };
    let record = run_to_record(dir.path(), "c.xml", &options);
    assert_eq!(record.aggregate, Verdict::Pass);

    let listing = run_catalog(std::slice::from_ref(&dir.path().join("catalog"))).unwrap();
    assert!(listing.contains("MARKER"));
}

#[test]
fn validate_reports_every_problem_without_running() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "case.xml",
        r#"<TestCase><RunTest>
             <TestStep Id="NO_SUCH_STEP"/>
             <TestStep SetId="NoSuchSet"/>
           </RunTest></TestCase>"#,
    );
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c"><TestCase Id="case.xml"/></Campaign>"#,
    );
    let err = run_validate(&dir.path().join("c.xml"), &[]).unwrap_err();
    assert!(err.contains("NO_SUCH_STEP"));
    assert!(err.contains("NoSuchSet"));
}

#[test]
fn stop_on_failure_leaves_later_cases_live_in_failed_campaign() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pass.xml", PASS_CASE);
    write(dir.path(), "fail.xml", FAIL_CASE);
    write(
        dir.path(),
        "c.xml",
        r#"<Campaign Name="c">
             <TestCase Id="fail.xml" StopOnFailure="true"/>
             <TestCase Id="pass.xml"/>
           </Campaign>"#,
    );
    let options = RunOptions {
        failed_campaign: Some(dir.path().join("failed.xml")),
        ..RunOptions::default()
    };
    let summary = run_run(&dir.path().join("c.xml"), &options).unwrap();
    assert!(!summary.passed);
    let reloaded = load_campaign_file(&dir.path().join("failed.xml")).unwrap();
    // Both the failing case and the never-reached case must rerun.
    let ids: Vec<&str> = reloaded.cases.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["fail.xml", "pass.xml"]);
}
