use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::bundle::{parse_bool, parse_duration_secs};
use crate::error::EngineError;
use crate::testcase::{Phase, StepNode, TestCaseFile};
use crate::xml::{self, XmlNode};

/// Parse a test-case file from disk. `<Include Src="...">` fragments are
/// resolved relative to the file's directory.
///
/// # Errors
///
/// Returns `InvalidCampaign` for malformed XML, schema violations, or
/// include cycles, and `InvalidParameter` for ill-formed `Nb`/`Delay`
/// attributes.
pub fn parse_testcase_file(path: &Path) -> Result<TestCaseFile, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        EngineError::invalid_campaign(format!("cannot read {}: {e}", path.display()))
    })?;
    let base_dir = path.parent().map(Path::to_path_buf);
    let mut includes = vec![normalize(path)];
    parse_testcase(&text, base_dir.as_deref(), &mut includes)
        .map_err(|e| e.with_detail(path.display().to_string()))
}

/// Parse a test-case document from a string. Includes resolve against
/// `base_dir`; without one, any `<Include>` is rejected.
///
/// # Errors
///
/// Same classification as [`parse_testcase_file`].
pub fn parse_testcase_str(
    xml: &str,
    base_dir: Option<&Path>,
) -> Result<TestCaseFile, EngineError> {
    let mut includes = Vec::new();
    parse_testcase(xml, base_dir, &mut includes)
}

fn parse_testcase(
    text: &str,
    base_dir: Option<&Path>,
    includes: &mut Vec<PathBuf>,
) -> Result<TestCaseFile, EngineError> {
    let doc = xml::parse_document(text, EngineError::invalid_campaign)?;
    if doc.name != "TestCase" {
        return Err(EngineError::invalid_campaign(format!(
            "expected <TestCase> root, found <{}>",
            doc.name
        )));
    }
    for name in doc.attrs.keys() {
        if name != "UseCase" {
            return Err(EngineError::invalid_campaign(format!(
                "unexpected attribute \"{name}\" on <TestCase>"
            )));
        }
    }

    let mut case = TestCaseFile {
        use_case: doc.attr("UseCase").map(str::to_owned),
        ..TestCaseFile::default()
    };

    for child in &doc.children {
        if let Some(phase) = phase_for(&child.name) {
            let nodes = parse_nodes(&child.children, base_dir, includes)?;
            let slot = case.phase_mut(phase);
            if !slot.is_empty() {
                return Err(EngineError::invalid_campaign(format!(
                    "phase <{}> appears more than once",
                    child.name
                )));
            }
            *slot = nodes;
        } else if child.name == "TestStepSet" {
            let id = child.require_attr("Id", EngineError::invalid_campaign)?;
            let nodes = parse_nodes(&child.children, base_dir, includes)?;
            if case.sets.insert(id.to_owned(), nodes).is_some() {
                return Err(EngineError::invalid_campaign(format!(
                    "duplicate TestStepSet \"{id}\""
                )));
            }
        } else {
            return Err(EngineError::invalid_campaign(format!(
                "unexpected element <{}> under <TestCase>",
                child.name
            )));
        }
    }
    Ok(case)
}

fn phase_for(name: &str) -> Option<Phase> {
    Phase::ALL.into_iter().find(|p| p.element_name() == name)
}

/// Parse a sequence of step elements into nodes, splicing includes.
fn parse_nodes(
    elements: &[XmlNode],
    base_dir: Option<&Path>,
    includes: &mut Vec<PathBuf>,
) -> Result<Vec<StepNode>, EngineError> {
    let mut nodes = Vec::new();
    for element in elements {
        match element.name.as_str() {
            "TestStep" => nodes.push(parse_leaf(element)?),
            "Loop" => {
                let id = element.require_attr("Id", EngineError::invalid_campaign)?;
                let count = parse_count(element)?;
                nodes.push(StepNode::Loop {
                    id: id.to_owned(),
                    count,
                    children: parse_nodes(&element.children, base_dir, includes)?,
                });
            }
            "If" => {
                let id = element.require_attr("Id", EngineError::invalid_campaign)?;
                let condition = element
                    .attr("Condition")
                    .unwrap_or_default()
                    .to_owned();
                nodes.push(StepNode::If {
                    id: id.to_owned(),
                    condition,
                    children: parse_nodes(&element.children, base_dir, includes)?,
                });
            }
            "Fork" => {
                let id = element.require_attr("Id", EngineError::invalid_campaign)?;
                let serialize = match element.attr("Serialize") {
                    None => false,
                    Some(raw) => parse_bool(raw).ok_or_else(|| {
                        EngineError::invalid_parameter(format!(
                            "Fork \"{id}\": Serialize expects a boolean, got \"{raw}\""
                        ))
                    })?,
                };
                let delay = parse_delay(element, id)?;
                nodes.push(StepNode::Fork {
                    id: id.to_owned(),
                    serialize,
                    delay,
                    children: parse_nodes(&element.children, base_dir, includes)?,
                });
            }
            "Include" => {
                let spliced = parse_include(element, base_dir, includes)?;
                nodes.extend(spliced);
            }
            other => {
                return Err(EngineError::invalid_campaign(format!(
                    "unexpected step element <{other}>"
                )));
            }
        }
    }
    Ok(nodes)
}

fn parse_leaf(element: &XmlNode) -> Result<StepNode, EngineError> {
    if !element.children.is_empty() {
        return Err(EngineError::invalid_campaign(
            "<TestStep> does not take child elements".to_owned(),
        ));
    }
    let id = element.attr("Id");
    let set_id = element.attr("SetId");
    let mut attrs = element.attrs.clone();
    match (id, set_id) {
        (Some(id), None) => {
            let id = id.to_owned();
            attrs.remove("Id");
            Ok(StepNode::Step { id, attrs })
        }
        (None, Some(set_id)) => {
            let set_id = set_id.to_owned();
            attrs.remove("SetId");
            Ok(StepNode::SetRef { set_id, attrs })
        }
        (Some(_), Some(_)) => Err(EngineError::invalid_campaign(
            "<TestStep> takes either Id or SetId, not both".to_owned(),
        )),
        (None, None) => Err(EngineError::invalid_campaign(
            "<TestStep> needs an Id or a SetId".to_owned(),
        )),
    }
}

fn parse_count(element: &XmlNode) -> Result<u32, EngineError> {
    let raw = element.require_attr("Nb", EngineError::invalid_campaign)?;
    // Non-negative integer; a sign, a decimal point, or text is rejected.
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::invalid_parameter(format!(
            "Loop \"{}\": Nb expects a non-negative integer, got \"{raw}\"",
            element.attr("Id").unwrap_or("?")
        )));
    }
    raw.parse::<u32>().map_err(|_| {
        EngineError::invalid_parameter(format!(
            "Loop \"{}\": Nb \"{raw}\" is out of range",
            element.attr("Id").unwrap_or("?")
        ))
    })
}

fn parse_delay(element: &XmlNode, fork_id: &str) -> Result<Option<Duration>, EngineError> {
    match element.attr("Delay") {
        None => Ok(None),
        Some(raw) => {
            let secs = parse_duration_secs(raw).ok_or_else(|| {
                EngineError::invalid_parameter(format!(
                    "Fork \"{fork_id}\": Delay expects a duration, got \"{raw}\""
                ))
            })?;
            if secs <= 0.0 {
                Ok(None)
            } else {
                Ok(Some(Duration::from_secs_f64(secs)))
            }
        }
    }
}

fn parse_include(
    element: &XmlNode,
    base_dir: Option<&Path>,
    includes: &mut Vec<PathBuf>,
) -> Result<Vec<StepNode>, EngineError> {
    let src = element.require_attr("Src", EngineError::invalid_campaign)?;
    let Some(base_dir) = base_dir else {
        return Err(EngineError::invalid_campaign(format!(
            "<Include Src=\"{src}\"> cannot be resolved without a base directory"
        )));
    };
    let path = base_dir.join(src);
    let key = normalize(&path);
    if includes.contains(&key) {
        return Err(EngineError::invalid_campaign(format!(
            "include cycle through {}",
            path.display()
        )));
    }
    includes.push(key);

    let text = std::fs::read_to_string(&path).map_err(|e| {
        EngineError::invalid_campaign(format!("cannot read include {}: {e}", path.display()))
    })?;
    let doc = xml::parse_document(&text, EngineError::invalid_campaign)
        .map_err(|e| e.with_detail(path.display().to_string()))?;
    let nested_base = path.parent().map(Path::to_path_buf);
    let nodes = parse_nodes(&doc.children, nested_base.as_deref(), includes)?;

    includes.pop();
    Ok(nodes)
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
