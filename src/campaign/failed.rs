use std::fmt::Write;

use crate::campaign::descriptor::{CampaignDescriptor, TestCaseDescriptor};
use crate::campaign::orchestrator::case_verdict;
use crate::report::CampaignRecord;
use crate::verdict::Verdict;
use crate::xml::escape;

/// Rebuild the campaign XML from a completed run, keeping the original
/// case order: cases that did not pass stay live elements, passing
/// cases become comments.
///
/// Reloading the emitted file yields exactly the non-passing subset in
/// the original order.
pub fn emit_failed_campaign(
    descriptor: &CampaignDescriptor,
    record: &CampaignRecord,
) -> String {
    let mut out = String::new();
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).unwrap();
    writeln!(out, r#"<Campaign Name="{}">"#, escape(&descriptor.name)).unwrap();
    for case in &descriptor.cases {
        let element = case_element(case);
        // Strictly `Pass`: a case the run never reached stays live.
        if case_verdict(record, case.order) == Verdict::Pass {
            writeln!(out, "  <!-- {element} -->").unwrap();
        } else {
            writeln!(out, "  {element}").unwrap();
        }
    }
    writeln!(out, "</Campaign>").unwrap();
    out
}

fn case_element(case: &TestCaseDescriptor) -> String {
    let mut element = format!(r#"<TestCase Id="{}""#, escape(&case.id));
    if case.b2b != 1 {
        write!(element, r#" B2B="{}""#, case.b2b).unwrap();
    }
    if case.warning {
        element.push_str(r#" Warning="true""#);
    }
    if case.provisioning {
        element.push_str(r#" Provisioning="true""#);
    }
    if case.stop_on_failure {
        element.push_str(r#" StopOnFailure="true""#);
    }
    element.push_str("/>");
    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CaseRecord, HostProps};
    use std::path::PathBuf;

    fn descriptor() -> CampaignDescriptor {
        let mut cases = Vec::new();
        for (index, id) in ["a.xml", "b.xml", "c.xml"].iter().enumerate() {
            let mut case = TestCaseDescriptor::new(id, PathBuf::from(id));
            case.order = index + 1;
            cases.push(case);
        }
        cases[1].b2b = 2;
        CampaignDescriptor {
            name: "nightly".to_owned(),
            cases,
        }
    }

    fn record_with(verdicts: &[(usize, Verdict)]) -> CampaignRecord {
        CampaignRecord {
            campaign_name: "nightly".to_owned(),
            start: String::new(),
            end: String::new(),
            aggregate: Verdict::Fail,
            host: HostProps {
                hostname: String::new(),
                os: String::new(),
                engine_version: String::new(),
            },
            cases: verdicts
                .iter()
                .map(|(order, verdict)| CaseRecord {
                    id: format!("case-{order}"),
                    order: *order,
                    iteration: 1,
                    retry: 0,
                    verdict: *verdict,
                    messages: Vec::new(),
                    steps: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn passing_cases_become_comments() {
        let record = record_with(&[
            (1, Verdict::Pass),
            (2, Verdict::Fail),
            (3, Verdict::Blocked),
        ]);
        let xml = emit_failed_campaign(&descriptor(), &record);
        assert!(xml.contains(r#"<!-- <TestCase Id="a.xml"/> -->"#));
        assert!(xml.contains(r#"<TestCase Id="b.xml" B2B="2"/>"#));
        assert!(xml.contains(r#"<TestCase Id="c.xml"/>"#));
    }

    #[test]
    fn unreached_cases_stay_live() {
        // Order 3 has no record at all: the campaign stopped before it.
        let record = record_with(&[(1, Verdict::Pass), (2, Verdict::Fail)]);
        let xml = emit_failed_campaign(&descriptor(), &record);
        assert!(xml.contains(r#"<TestCase Id="c.xml"/>"#));
        assert!(!xml.contains(r#"<!-- <TestCase Id="c.xml"/> -->"#));
    }

    #[test]
    fn reloading_keeps_order_and_partition() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_with(&[
            (1, Verdict::Pass),
            (2, Verdict::Fail),
            (3, Verdict::Fail),
        ]);
        let xml = emit_failed_campaign(&descriptor(), &record);
        std::fs::write(dir.path().join("failed.xml"), &xml).unwrap();
        let reloaded =
            crate::campaign::loader::load_campaign_file(&dir.path().join("failed.xml")).unwrap();
        let ids: Vec<&str> = reloaded.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b.xml", "c.xml"]);
        assert_eq!(reloaded.cases[0].b2b, 2);

        // Emitting again from an empty second run keeps every surviving
        // case live and in order.
        let empty = record_with(&[]);
        let again = emit_failed_campaign(&reloaded, &empty);
        let reloaded_again = {
            std::fs::write(dir.path().join("failed2.xml"), &again).unwrap();
            crate::campaign::loader::load_campaign_file(&dir.path().join("failed2.xml")).unwrap()
        };
        let ids: Vec<&str> = reloaded_again.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b.xml", "c.xml"]);
    }
}
