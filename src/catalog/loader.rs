use std::path::Path;

use log::debug;

use crate::catalog::entry::{CatalogEntry, ParamSpec, ParamType, ParameterEntry, UseCaseEntry};
use crate::catalog::taxonomy::DomainTaxonomy;
use crate::error::EngineError;
use crate::xml::{self, XmlNode};

/// One catalog root on disk, loaded and schema-checked but not yet merged.
///
/// Layout of a root directory:
///
/// ```text
/// <root>/steps/*.xml        one step descriptor per file
/// <root>/usecases/*.xml     one use-case descriptor per file
/// <root>/parameters/*.xml   one parameter descriptor per file
/// <root>/domains.yaml       optional domain taxonomy side file
/// ```
#[derive(Debug, Default)]
pub struct CatalogScope {
    pub name: String,
    pub steps: Vec<CatalogEntry>,
    pub usecases: Vec<UseCaseEntry>,
    pub parameters: Vec<ParameterEntry>,
}

/// Load a catalog root directory into a scope.
///
/// # Errors
///
/// Returns `InvalidCatalog` for unreadable files, schema violations,
/// taxonomy violations, or duplicate ids within this scope.
pub fn load_catalog_dir(root: &Path) -> Result<CatalogScope, EngineError> {
    if !root.is_dir() {
        return Err(EngineError::invalid_catalog(format!(
            "catalog root {} is not a directory",
            root.display()
        )));
    }

    let taxonomy_path = root.join("domains.yaml");
    let taxonomy = if taxonomy_path.is_file() {
        DomainTaxonomy::load(&taxonomy_path)?
    } else {
        DomainTaxonomy::empty()
    };

    let mut scope = CatalogScope {
        name: root.display().to_string(),
        ..CatalogScope::default()
    };

    for path in xml_files(&root.join("steps"))? {
        let doc = read_descriptor(&path)?;
        let entry = parse_step_descriptor(&doc)?;
        taxonomy.validate(&entry.id, entry.domain.as_deref(), entry.sub_domain.as_deref())?;
        if scope.steps.iter().any(|e| e.id == entry.id) {
            return Err(duplicate_id("step", &entry.id, root));
        }
        debug!("catalog {}: step {}", scope.name, entry.id);
        scope.steps.push(entry);
    }

    for path in xml_files(&root.join("usecases"))? {
        let doc = read_descriptor(&path)?;
        let entry = parse_usecase_descriptor(&doc)?;
        if scope.usecases.iter().any(|e| e.id == entry.id) {
            return Err(duplicate_id("use-case", &entry.id, root));
        }
        scope.usecases.push(entry);
    }

    for path in xml_files(&root.join("parameters"))? {
        let doc = read_descriptor(&path)?;
        let entry = parse_parameter_descriptor(&doc)?;
        if scope.parameters.iter().any(|e| e.name == entry.name) {
            return Err(duplicate_id("parameter", &entry.name, root));
        }
        scope.parameters.push(entry);
    }

    Ok(scope)
}

fn duplicate_id(kind: &str, id: &str, root: &Path) -> EngineError {
    EngineError::invalid_catalog(format!(
        "duplicate {kind} id \"{id}\" in catalog {}",
        root.display()
    ))
}

fn read_descriptor(path: &Path) -> Result<XmlNode, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        EngineError::invalid_catalog(format!("cannot read {}: {e}", path.display()))
    })?;
    xml::parse_document(&text, EngineError::invalid_catalog)
        .map_err(|e| e.with_detail(path.display().to_string()))
}

fn xml_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, EngineError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        EngineError::invalid_catalog(format!("cannot list {}: {e}", dir.display()))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            EngineError::invalid_catalog(format!("cannot list {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "xml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse a `<TestStep>` descriptor element.
///
/// # Errors
///
/// Returns `InvalidCatalog` for any schema violation, including unknown
/// elements or attributes.
pub fn parse_step_descriptor(doc: &XmlNode) -> Result<CatalogEntry, EngineError> {
    expect_element(doc, "TestStep")?;
    check_attrs(
        doc,
        &["Id", "ClassName", "Description", "Domain", "SubDomain", "Timeout"],
    )?;

    let mut entry = CatalogEntry::new(
        doc.require_attr("Id", EngineError::invalid_catalog)?,
        doc.require_attr("ClassName", EngineError::invalid_catalog)?,
    );
    entry.description = doc.attr("Description").unwrap_or_default().to_owned();
    entry.domain = doc.attr("Domain").map(str::to_owned);
    entry.sub_domain = doc.attr("SubDomain").map(str::to_owned);
    if let Some(raw) = doc.attr("Timeout") {
        let secs = crate::catalog::bundle::parse_duration_secs(raw).ok_or_else(|| {
            EngineError::invalid_catalog(format!(
                "step \"{}\": Timeout expects a duration, got \"{raw}\"",
                entry.id
            ))
        })?;
        if secs > 0.0 {
            entry.timeout = Some(std::time::Duration::from_secs_f64(secs));
        }
    }
    if entry.sub_domain.is_some() && entry.domain.is_none() {
        return Err(EngineError::invalid_catalog(format!(
            "step \"{}\": SubDomain without Domain",
            entry.id
        )));
    }

    for child in &doc.children {
        if child.name != "Parameters" {
            return Err(unknown_element(doc, child));
        }
        for param in &child.children {
            let spec = parse_param_spec(param, &entry.id)?;
            if entry.params.insert(spec.name.clone(), spec.clone()).is_some() {
                return Err(EngineError::invalid_catalog(format!(
                    "step \"{}\": duplicate parameter \"{}\"",
                    entry.id, spec.name
                )));
            }
        }
    }
    Ok(entry)
}

fn parse_param_spec(node: &XmlNode, step_id: &str) -> Result<ParamSpec, EngineError> {
    if node.name != "Parameter" {
        return Err(EngineError::invalid_catalog(format!(
            "step \"{step_id}\": unexpected element <{}> under <Parameters>",
            node.name
        )));
    }
    check_attrs(
        node,
        &[
            "Name",
            "Type",
            "Optional",
            "Default",
            "AllowedValues",
            "BlankAllowed",
        ],
    )?;
    let name = node.require_attr("Name", EngineError::invalid_catalog)?;
    let ty = ParamType::parse(node.require_attr("Type", EngineError::invalid_catalog)?)?;

    let mut spec = ParamSpec::required(name, ty);
    spec.optional = parse_bool_attr(node, "Optional", false)?;
    spec.default = node.attr("Default").map(str::to_owned);
    spec.blank_allowed = parse_bool_attr(node, "BlankAllowed", false)?;
    if let Some(allowed) = node.attr("AllowedValues") {
        spec.allowed_values = allowed.split(';').map(|v| v.trim().to_owned()).collect();
    }
    if spec.default.is_some() && !spec.optional {
        return Err(EngineError::invalid_catalog(format!(
            "step \"{step_id}\": parameter \"{name}\" has a default but is not optional"
        )));
    }
    Ok(spec)
}

/// Parse a `<UseCase>` descriptor element.
///
/// # Errors
///
/// Returns `InvalidCatalog` for any schema violation.
pub fn parse_usecase_descriptor(doc: &XmlNode) -> Result<UseCaseEntry, EngineError> {
    expect_element(doc, "UseCase")?;
    check_attrs(doc, &["Id", "ClassName", "Description"])?;
    if let Some(child) = doc.children.first() {
        return Err(unknown_element(doc, child));
    }
    Ok(UseCaseEntry {
        id: doc.require_attr("Id", EngineError::invalid_catalog)?.to_owned(),
        class_name: doc
            .require_attr("ClassName", EngineError::invalid_catalog)?
            .to_owned(),
        description: doc.attr("Description").unwrap_or_default().to_owned(),
    })
}

/// Parse a `<Parameter>` catalog descriptor element.
///
/// # Errors
///
/// Returns `InvalidCatalog` for any schema violation.
pub fn parse_parameter_descriptor(doc: &XmlNode) -> Result<ParameterEntry, EngineError> {
    expect_element(doc, "Parameter")?;
    check_attrs(doc, &["Name", "Type", "Default", "Override", "Description"])?;
    if let Some(child) = doc.children.first() {
        return Err(unknown_element(doc, child));
    }
    Ok(ParameterEntry {
        name: doc
            .require_attr("Name", EngineError::invalid_catalog)?
            .to_owned(),
        ty: ParamType::parse(doc.require_attr("Type", EngineError::invalid_catalog)?)?,
        default: doc.attr("Default").map(str::to_owned),
        override_allowed: parse_bool_attr(doc, "Override", false)?,
        description: doc.attr("Description").unwrap_or_default().to_owned(),
    })
}

fn expect_element(doc: &XmlNode, expected: &str) -> Result<(), EngineError> {
    if doc.name == expected {
        Ok(())
    } else {
        Err(EngineError::invalid_catalog(format!(
            "expected a <{expected}> descriptor, found <{}>",
            doc.name
        )))
    }
}

fn unknown_element(parent: &XmlNode, child: &XmlNode) -> EngineError {
    EngineError::invalid_catalog(format!(
        "unexpected element <{}> under <{}>",
        child.name, parent.name
    ))
}

fn check_attrs(node: &XmlNode, allowed: &[&str]) -> Result<(), EngineError> {
    for name in node.attrs.keys() {
        if !allowed.contains(&name.as_str()) {
            return Err(EngineError::invalid_catalog(format!(
                "unexpected attribute \"{name}\" on <{}>",
                node.name
            )));
        }
    }
    Ok(())
}

fn parse_bool_attr(node: &XmlNode, name: &str, default: bool) -> Result<bool, EngineError> {
    match node.attr(name) {
        None => Ok(default),
        Some(raw) => crate::catalog::bundle::parse_bool(raw).ok_or_else(|| {
            EngineError::invalid_catalog(format!(
                "attribute \"{name}\" on <{}> expects a boolean, got \"{raw}\"",
                node.name
            ))
        }),
    }
}
