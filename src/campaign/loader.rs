use std::path::{Path, PathBuf};

use log::debug;

use crate::campaign::descriptor::{CampaignDescriptor, TestCaseDescriptor};
use crate::catalog::bundle::parse_bool;
use crate::error::EngineError;
use crate::xml::{self, XmlNode};

/// Load a campaign file, expanding `<SubCampaign>` references in place.
///
/// # Errors
///
/// Returns `InvalidCampaign` for malformed XML or schema violations,
/// `InvalidParameter` for ill-formed `B2B`/`runNumber` attributes, and
/// `CampaignCycle` when a sub-campaign chain reaches a file already on
/// the chain.
pub fn load_campaign_file(path: &Path) -> Result<CampaignDescriptor, EngineError> {
    let mut chain = Vec::new();
    let mut descriptor = load_into_chain(path, &mut chain)?;
    for (index, case) in descriptor.cases.iter_mut().enumerate() {
        case.order = index + 1;
    }
    Ok(descriptor)
}

fn load_into_chain(
    path: &Path,
    chain: &mut Vec<PathBuf>,
) -> Result<CampaignDescriptor, EngineError> {
    let key = normalize(path);
    if chain.contains(&key) {
        return Err(EngineError::campaign_cycle(format!(
            "campaign chain reaches {} again",
            path.display()
        )));
    }
    chain.push(key);

    let text = std::fs::read_to_string(path).map_err(|e| {
        EngineError::invalid_campaign(format!("cannot read {}: {e}", path.display()))
    })?;
    let doc = xml::parse_document(&text, EngineError::invalid_campaign)
        .map_err(|e| e.with_detail(path.display().to_string()))?;
    if doc.name != "Campaign" {
        return Err(EngineError::invalid_campaign(format!(
            "expected <Campaign> root in {}, found <{}>",
            path.display(),
            doc.name
        )));
    }
    let name = doc
        .require_attr("Name", EngineError::invalid_campaign)?
        .to_owned();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut cases = Vec::new();
    for child in &doc.children {
        match child.name.as_str() {
            "TestCase" => cases.push(parse_case(child, base_dir)?),
            "SubCampaign" => {
                let id = child.require_attr("Id", EngineError::invalid_campaign)?;
                let runs = parse_run_number(child)?;
                let sub_path = base_dir.join(id);
                debug!("campaign {name}: expanding sub-campaign {id} x{runs}");
                let sub = load_into_chain(&sub_path, chain)?;
                for _ in 0..runs {
                    cases.extend(sub.cases.iter().cloned());
                }
            }
            other => {
                return Err(EngineError::invalid_campaign(format!(
                    "unexpected element <{other}> under <Campaign>"
                )));
            }
        }
    }

    chain.pop();
    Ok(CampaignDescriptor { name, cases })
}

fn parse_case(element: &XmlNode, base_dir: &Path) -> Result<TestCaseDescriptor, EngineError> {
    if !element.children.is_empty() {
        return Err(EngineError::invalid_campaign(
            "<TestCase> does not take child elements".to_owned(),
        ));
    }
    let id = element.require_attr("Id", EngineError::invalid_campaign)?;
    let mut desc = TestCaseDescriptor::new(id, base_dir.join(id));
    for (name, raw) in &element.attrs {
        match name.as_str() {
            "Id" => {}
            "B2B" => desc.b2b = parse_positive(raw, "B2B", id)?,
            "Warning" => desc.warning = parse_case_flag(raw, "Warning", id)?,
            "Provisioning" => desc.provisioning = parse_case_flag(raw, "Provisioning", id)?,
            "StopOnFailure" => {
                desc.stop_on_failure = parse_case_flag(raw, "StopOnFailure", id)?;
            }
            other => {
                return Err(EngineError::invalid_campaign(format!(
                    "case \"{id}\": unexpected attribute \"{other}\""
                )));
            }
        }
    }
    Ok(desc)
}

fn parse_case_flag(raw: &str, attr: &str, case_id: &str) -> Result<bool, EngineError> {
    parse_bool(raw).ok_or_else(|| {
        EngineError::invalid_parameter(format!(
            "case \"{case_id}\": {attr} expects a boolean, got \"{raw}\""
        ))
    })
}

fn parse_run_number(element: &XmlNode) -> Result<u32, EngineError> {
    match element.attr("runNumber") {
        None => Ok(1),
        Some(raw) => parse_positive(raw, "runNumber", element.attr("Id").unwrap_or("?")),
    }
}

/// A positive decimal integer; `0`, signs, and non-digit text are
/// rejected.
fn parse_positive(raw: &str, attr: &str, id: &str) -> Result<u32, EngineError> {
    let ok = !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit());
    let value = if ok { raw.parse::<u32>().ok() } else { None };
    match value {
        Some(n) if n > 0 => Ok(n),
        _ => Err(EngineError::invalid_parameter(format!(
            "\"{id}\": {attr} expects a positive integer, got \"{raw}\""
        ))),
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn write(dir: &Path, name: &str, text: &str) {
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn loads_cases_in_order_with_attributes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "c.xml",
            r#"<Campaign Name="nightly">
                 <TestCase Id="a.xml"/>
                 <TestCase Id="b.xml" B2B="3" Warning="true" Provisioning="yes" StopOnFailure="1"/>
               </Campaign>"#,
        );
        let campaign = load_campaign_file(&dir.path().join("c.xml")).unwrap();
        assert_eq!(campaign.name, "nightly");
        assert_eq!(campaign.cases.len(), 2);
        assert_eq!(campaign.cases[0].order, 1);
        assert_eq!(campaign.cases[0].b2b, 1);
        let second = &campaign.cases[1];
        assert_eq!(second.order, 2);
        assert_eq!(second.b2b, 3);
        assert!(second.warning && second.provisioning && second.stop_on_failure);
        assert_eq!(second.path, dir.path().join("b.xml"));
    }

    #[test]
    fn expands_sub_campaigns_run_number_times() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sub.xml",
            r#"<Campaign Name="smoke"><TestCase Id="s.xml"/></Campaign>"#,
        );
        write(
            dir.path(),
            "main.xml",
            r#"<Campaign Name="main">
                 <TestCase Id="first.xml"/>
                 <SubCampaign Id="sub.xml" runNumber="2"/>
               </Campaign>"#,
        );
        let campaign = load_campaign_file(&dir.path().join("main.xml")).unwrap();
        let ids: Vec<&str> = campaign.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["first.xml", "s.xml", "s.xml"]);
        let orders: Vec<usize> = campaign.cases.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn cycle_is_rejected_before_execution() {
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
    }

    #[test]
    fn run_number_zero_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sub.xml",
            r#"<Campaign Name="smoke"><TestCase Id="s.xml"/></Campaign>"#,
        );
        write(
            dir.path(),
            "c.xml",
            r#"<Campaign Name="c"><SubCampaign Id="sub.xml" runNumber="0"/></Campaign>"#,
        );
        let err = load_campaign_file(&dir.path().join("c.xml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParameter);
    }

    #[test]
    fn run_number_text_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "c.xml",
            r#"<Campaign Name="c"><SubCampaign Id="sub.xml" runNumber="twice"/></Campaign>"#,
        );
        let err = load_campaign_file(&dir.path().join("c.xml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParameter);
    }

    #[test]
    fn unknown_case_attribute_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "c.xml",
            r#"<Campaign Name="c"><TestCase Id="a.xml" Retry="3"/></Campaign>"#,
        );
        let err = load_campaign_file(&dir.path().join("c.xml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCampaign);
    }

    #[test]
    fn missing_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "c.xml", r#"<Campaign><TestCase Id="a.xml"/></Campaign>"#);
        let err = load_campaign_file(&dir.path().join("c.xml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCampaign);
    }
}
