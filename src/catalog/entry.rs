use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The declared type of a step or catalog parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    /// A bare identifier: non-empty, alphanumeric plus `_` and `-`.
    Ident,
    /// A duration: bare decimal seconds, or an integer with `ms`/`s`/`m`.
    Duration,
    List(Box<ParamType>),
    Map(Box<ParamType>, Box<ParamType>),
}

impl ParamType {
    /// Parse a type name as written in a catalog descriptor, e.g.
    /// `"int"`, `"list<float>"`, `"map<string,int>"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` for an unknown or malformed type name.
    pub fn parse(name: &str) -> Result<Self, EngineError> {
        let name = name.trim();
        match name {
            "string" => return Ok(Self::Str),
            "int" => return Ok(Self::Int),
            "float" => return Ok(Self::Float),
            "bool" => return Ok(Self::Bool),
            "ident" => return Ok(Self::Ident),
            "duration" => return Ok(Self::Duration),
            _ => {}
        }
        if let Some(inner) = generic_arg(name, "list") {
            return Ok(Self::List(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = generic_arg(name, "map") {
            let (key, value) = split_top_level(inner).ok_or_else(|| {
                EngineError::invalid_catalog(format!(
                    "map type needs two arguments, got \"{name}\""
                ))
            })?;
            return Ok(Self::Map(
                Box::new(Self::parse(key)?),
                Box::new(Self::parse(value)?),
            ));
        }
        Err(EngineError::invalid_catalog(format!(
            "unknown parameter type \"{name}\""
        )))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Ident => write!(f, "ident"),
            Self::Duration => write!(f, "duration"),
            Self::List(inner) => write!(f, "list<{inner}>"),
            Self::Map(key, value) => write!(f, "map<{key},{value}>"),
        }
    }
}

/// Extract the argument of `outer<...>`, or `None` if `name` is not that
/// generic form.
fn generic_arg<'a>(name: &'a str, outer: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(outer)?;
    let rest = rest.trim_start();
    let inner = rest.strip_prefix('<')?.strip_suffix('>')?;
    Some(inner)
}

/// Split `"K,V"` at the first comma not nested inside angle brackets.
fn split_top_level(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

/// The declaration of one parameter inside a step's catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub optional: bool,
    /// Raw default, coerced at bundle construction. Required for optional
    /// parameters.
    pub default: Option<String>,
    /// Allowed raw values; empty means unrestricted.
    pub allowed_values: Vec<String>,
    pub blank_allowed: bool,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            optional: false,
            default: None,
            allowed_values: Vec::new(),
            blank_allowed: false,
        }
    }

    pub fn optional(name: &str, ty: ParamType, default: &str) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            optional: true,
            default: Some(default.to_owned()),
            allowed_values: Vec::new(),
            blank_allowed: false,
        }
    }
}

/// A step descriptor from a catalog: which implementation to construct and
/// which parameters it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    /// Logical implementation name, resolved against the step registry.
    pub class_name: String,
    pub description: String,
    pub params: BTreeMap<String, ParamSpec>,
    pub domain: Option<String>,
    pub sub_domain: Option<String>,
    /// Wall-clock budget for one invocation, enforced cooperatively at
    /// suspension points. A leaf's `timeout` attribute overrides it.
    pub timeout: Option<std::time::Duration>,
}

impl CatalogEntry {
    pub fn new(id: &str, class_name: &str) -> Self {
        Self {
            id: id.to_owned(),
            class_name: class_name.to_owned(),
            description: String::new(),
            params: BTreeMap::new(),
            domain: None,
            sub_domain: None,
            timeout: None,
        }
    }

    pub fn with_param(mut self, spec: ParamSpec) -> Self {
        self.params.insert(spec.name.clone(), spec);
        self
    }
}

/// A use-case descriptor from a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseCaseEntry {
    pub id: String,
    pub class_name: String,
    pub description: String,
}

/// A shared parameter descriptor from a parameter catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub ty: ParamType,
    pub default: Option<String>,
    /// Whether a later catalog may redefine this entry's default.
    pub override_allowed: bool,
    pub description: String,
}
