use std::collections::BTreeMap;
use std::time::Duration;

use crate::catalog::entry::{CatalogEntry, ParamSpec, ParamType};
use crate::context::Value;
use crate::error::EngineError;
use crate::xml::AttrMap;

/// The resolved, read-only parameter set of one step instance.
///
/// Construction validates every raw attribute against the step's catalog
/// entry: unknown names are rejected, required parameters must be bound,
/// values must coerce to their declared types, and allowed-value lists are
/// enforced. After that the bundle never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBundle {
    values: BTreeMap<String, Value>,
}

impl ParameterBundle {
    /// Resolve raw attribute strings against a catalog entry.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an attribute not in the entry, a value that
    /// does not coerce, or a value outside the allowed list;
    /// `MissingParameter` for an unbound required parameter.
    pub fn resolve(entry: &CatalogEntry, attrs: &AttrMap) -> Result<Self, EngineError> {
        for name in attrs.keys() {
            if !entry.params.contains_key(name) {
                return Err(EngineError::invalid_parameter(format!(
                    "step \"{}\" does not declare attribute \"{name}\"",
                    entry.id
                )));
            }
        }

        let mut values = BTreeMap::new();
        for (name, spec) in &entry.params {
            let raw = match attrs.get(name) {
                Some(raw) => raw.as_str(),
                None if spec.optional => match &spec.default {
                    Some(default) => default.as_str(),
                    None => continue,
                },
                None => {
                    return Err(EngineError::missing_parameter(format!(
                        "step \"{}\" requires parameter \"{name}\"",
                        entry.id
                    )));
                }
            };
            values.insert(name.clone(), coerce(spec, raw, &entry.id)?);
        }
        Ok(Self { values })
    }

    /// An empty bundle, for steps with no declared parameters.
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed accessors. A miss is a programming error: the step asked for
    /// a name its own catalog entry does not bind.
    pub fn str(&self, name: &str) -> Result<&str, EngineError> {
        match self.get(name) {
            Some(Value::Str(s)) => Ok(s),
            other => Err(access_error(name, "string", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, EngineError> {
        match self.get(name) {
            Some(Value::Int(n)) => Ok(*n),
            other => Err(access_error(name, "int", other)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, EngineError> {
        match self.get(name) {
            Some(Value::Float(x)) => Ok(*x),
            Some(Value::Int(n)) => Ok(*n as f64),
            other => Err(access_error(name, "float", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, EngineError> {
        match self.get(name) {
            Some(Value::Bool(b)) => Ok(*b),
            other => Err(access_error(name, "bool", other)),
        }
    }

    pub fn duration(&self, name: &str) -> Result<Duration, EngineError> {
        match self.get(name) {
            Some(Value::Float(secs)) if *secs >= 0.0 => Ok(Duration::from_secs_f64(*secs)),
            other => Err(access_error(name, "duration", other)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn access_error(name: &str, expected: &str, got: Option<&Value>) -> EngineError {
    match got {
        Some(value) => EngineError::internal(format!(
            "parameter \"{name}\" accessed as {expected} but holds {}",
            value.render()
        )),
        None => EngineError::internal(format!(
            "parameter \"{name}\" accessed but not bound by the catalog entry"
        )),
    }
}

/// Coerce one raw attribute string to its declared type.
fn coerce(spec: &ParamSpec, raw: &str, step_id: &str) -> Result<Value, EngineError> {
    if raw.is_empty() && !spec.blank_allowed {
        return Err(EngineError::invalid_parameter(format!(
            "step \"{step_id}\": parameter \"{}\" may not be blank",
            spec.name
        )));
    }
    if !spec.allowed_values.is_empty() && !spec.allowed_values.iter().any(|v| v == raw) {
        return Err(EngineError::invalid_parameter(format!(
            "step \"{step_id}\": \"{raw}\" is not an allowed value of \"{}\" (allowed: {})",
            spec.name,
            spec.allowed_values.join(", ")
        )));
    }
    coerce_type(&spec.ty, raw).map_err(|reason| {
        EngineError::invalid_parameter(format!(
            "step \"{step_id}\": parameter \"{}\" {reason}",
            spec.name
        ))
    })
}

fn coerce_type(ty: &ParamType, raw: &str) -> Result<Value, String> {
    match ty {
        ParamType::Str => Ok(Value::Str(raw.to_owned())),
        ParamType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("expects an integer, got \"{raw}\"")),
        ParamType::Float => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("expects a float, got \"{raw}\"")),
        ParamType::Bool => parse_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| format!("expects a boolean, got \"{raw}\"")),
        ParamType::Ident => {
            let trimmed = raw.trim();
            let valid = !trimmed.is_empty()
                && trimmed
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if valid {
                Ok(Value::Str(trimmed.to_owned()))
            } else {
                Err(format!("expects an identifier, got \"{raw}\""))
            }
        }
        ParamType::Duration => parse_duration_secs(raw)
            .map(Value::Float)
            .ok_or_else(|| format!("expects a duration, got \"{raw}\"")),
        ParamType::List(inner) => {
            if raw.trim().is_empty() {
                return Ok(Value::List(Vec::new()));
            }
            let mut items = Vec::new();
            for part in raw.split(';') {
                items.push(coerce_type(inner, part.trim())?);
            }
            Ok(Value::List(items))
        }
        ParamType::Map(key_ty, value_ty) => {
            let mut entries = BTreeMap::new();
            if raw.trim().is_empty() {
                return Ok(Value::Map(entries));
            }
            for part in raw.split(';') {
                let (k, v) = part
                    .split_once('=')
                    .ok_or_else(|| format!("expects k=v entries, got \"{part}\""))?;
                // Map keys are kept as their raw text; the key type still
                // has to accept them.
                coerce_type(key_ty, k.trim())?;
                entries.insert(k.trim().to_owned(), coerce_type(value_ty, v.trim())?);
            }
            Ok(Value::Map(entries))
        }
    }
}

/// Boolean coercion accepts `true/false/yes/no/1/0`, case-insensitively.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a duration as bare decimal seconds or an integer with an
/// `ms`/`s`/`m` suffix. Negative durations are rejected.
pub fn parse_duration_secs(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let secs = if let Some(number) = raw.strip_suffix("ms") {
        number.trim().parse::<u64>().ok()? as f64 / 1000.0
    } else if let Some(number) = raw.strip_suffix('s') {
        number.trim().parse::<u64>().ok()? as f64
    } else if let Some(number) = raw.strip_suffix('m') {
        number.trim().parse::<u64>().ok()? as f64 * 60.0
    } else {
        let value = raw.parse::<f64>().ok()?;
        if value < 0.0 || !value.is_finite() {
            return None;
        }
        value
    };
    Some(secs)
}
