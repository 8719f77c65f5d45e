use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bench::NullBench;
use crate::campaign::failed::emit_failed_campaign;
use crate::campaign::loader::load_campaign_file;
use crate::campaign::orchestrator::run_campaign;
use crate::catalog::Catalog;
use crate::catalog::loader::load_catalog_dir;
use crate::engine::factory::{EngineConfig, StepFactory};
use crate::engine::registry::StepRegistry;
use crate::engine::watch::CancelToken;
use crate::report::{emit_campaign_json, emit_campaign_yaml};
use crate::steps::{builtin_registry, builtin_scope};
use crate::testcase::StepNode;
use crate::testcase::parser::parse_testcase_file;

/// Options for the `run` command.
pub struct RunOptions {
    pub catalogs: Vec<PathBuf>,
    pub report: Option<PathBuf>,
    pub format: String,
    pub max_retries: u32,
    pub failed_campaign: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            catalogs: Vec::new(),
            report: None,
            format: "json".to_owned(),
            max_retries: 0,
            failed_campaign: None,
        }
    }
}

/// What `run` hands back to the binary: the text to print and whether
/// the process should exit zero.
#[derive(Debug)]
pub struct RunSummary {
    pub output: String,
    pub passed: bool,
}

/// Run the `run` command: load catalogs and the campaign, execute it,
/// and emit the campaign record.
///
/// # Errors
///
/// Returns an error string if loading, validation, execution setup, or
/// report writing fails.
pub fn run_run(campaign_path: &Path, options: &RunOptions) -> Result<RunSummary, String> {
    let (catalog, registry) = load_everything(&options.catalogs)?;
    registry.verify_catalog(&catalog).map_err(|e| e.to_string())?;
    let descriptor = load_campaign_file(campaign_path).map_err(|e| e.to_string())?;

    let factory = StepFactory::new(
        Arc::new(catalog),
        Arc::new(registry),
        NullBench::shared(),
        EngineConfig::default(),
    );
    let cancel = CancelToken::new();
    let record = run_campaign(&descriptor, &factory, &cancel, options.max_retries);

    if let Some(path) = &options.failed_campaign {
        let xml = emit_failed_campaign(&descriptor, &record);
        std::fs::write(path, xml).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    }

    let emitted = match options.format.as_str() {
        "json" => emit_campaign_json(&record),
        "yaml" => emit_campaign_yaml(&record),
        other => return Err(format!("unknown format '{other}' (expected: json, yaml)")),
    };
    let output = match &options.report {
        Some(path) => {
            std::fs::write(path, &emitted)
                .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
            format!(
                "campaign {}: {} ({} case record(s), report written to {})\n",
                record.campaign_name,
                record.aggregate,
                record.cases.len(),
                path.display()
            )
        }
        None => emitted,
    };
    Ok(RunSummary {
        output,
        passed: record.aggregate.is_pass(),
    })
}

/// Run the `validate` command: resolve every case file and every
/// referenced step and use-case id without executing anything.
///
/// # Errors
///
/// Returns an error string listing every problem found.
pub fn run_validate(campaign_path: &Path, catalogs: &[PathBuf]) -> Result<String, String> {
    let (catalog, registry) = load_everything(catalogs)?;
    registry.verify_catalog(&catalog).map_err(|e| e.to_string())?;
    let descriptor = load_campaign_file(campaign_path).map_err(|e| e.to_string())?;

    let mut problems = Vec::new();
    let mut step_count = 0usize;
    for case in &descriptor.cases {
        let parsed = match parse_testcase_file(&case.path) {
            Ok(parsed) => parsed,
            Err(e) => {
                problems.push(format!("case {}: {e}", case.id));
                continue;
            }
        };
        if let Some(use_case) = &parsed.use_case {
            if catalog.resolve_usecase(use_case).is_err() {
                problems.push(format!("case {}: unknown use case \"{use_case}\"", case.id));
            }
        }
        let mut trees: Vec<&[StepNode]> = parsed.sets.values().map(Vec::as_slice).collect();
        trees.extend([
            parsed.initialize.as_slice(),
            parsed.setup.as_slice(),
            parsed.run_test.as_slice(),
            parsed.tear_down.as_slice(),
            parsed.finalize.as_slice(),
        ]);
        for tree in trees {
            check_nodes(tree, &parsed.sets, &catalog, &case.id, &mut problems, &mut step_count);
        }
    }

    if problems.is_empty() {
        Ok(format!(
            "campaign {}: {} case(s), {} step reference(s), all resolvable\n",
            descriptor.name,
            descriptor.cases.len(),
            step_count
        ))
    } else {
        Err(problems.join("\n"))
    }
}

/// Run the `catalog` command: list every loaded entry.
///
/// # Errors
///
/// Returns an error string if a catalog directory fails to load.
pub fn run_catalog(catalogs: &[PathBuf]) -> Result<String, String> {
    let (catalog, _) = load_everything(catalogs)?;
    let mut out = String::new();
    writeln!(out, "steps:").unwrap();
    for entry in catalog.steps() {
        let description = if entry.description.is_empty() {
            "-"
        } else {
            entry.description.as_str()
        };
        writeln!(out, "  {} ({}): {description}", entry.id, entry.class_name).unwrap();
    }
    writeln!(out, "usecases:").unwrap();
    for id in catalog.usecase_ids() {
        writeln!(out, "  {id}").unwrap();
    }
    writeln!(out, "parameters:").unwrap();
    for name in catalog.parameter_names() {
        writeln!(out, "  {name}").unwrap();
    }
    Ok(out)
}

/// Merge the built-in scope and every user catalog directory, in order.
fn load_everything(catalogs: &[PathBuf]) -> Result<(Catalog, StepRegistry), String> {
    let mut catalog = Catalog::new();
    catalog
        .merge_scope(builtin_scope())
        .map_err(|e| e.to_string())?;
    for dir in catalogs {
        let scope = load_catalog_dir(dir).map_err(|e| e.to_string())?;
        catalog.merge_scope(scope).map_err(|e| e.to_string())?;
    }
    Ok((catalog, builtin_registry()))
}

fn check_nodes(
    nodes: &[StepNode],
    sets: &std::collections::BTreeMap<String, Vec<StepNode>>,
    catalog: &Catalog,
    case_id: &str,
    problems: &mut Vec<String>,
    step_count: &mut usize,
) {
    for node in nodes {
        match node {
            StepNode::Step { id, .. } => {
                *step_count += 1;
                if catalog.resolve_step(id).is_err() {
                    problems.push(format!("case {case_id}: unknown step id \"{id}\""));
                }
            }
            StepNode::SetRef { set_id, .. } => {
                if !sets.contains_key(set_id) {
                    problems.push(format!("case {case_id}: unknown step set \"{set_id}\""));
                }
            }
            StepNode::Loop { children, .. }
            | StepNode::If { children, .. }
            | StepNode::Fork { children, .. } => {
                check_nodes(children, sets, catalog, case_id, problems, step_count);
            }
        }
    }
}
