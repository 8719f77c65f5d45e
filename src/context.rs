use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// A value stored in the test-case context.
///
/// Scalars, lists, and maps cover everything a step writes itself; `Handle`
/// wraps an opaque object obtained from a collaborator (a device, a piece
/// of equipment) that later steps retrieve by path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Handle(Handle),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Render the value for the message stream. Handles are opaque.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(x) => x.to_string(),
            Self::Str(s) => s.clone(),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", rendered.join(", "))
            }
            Self::Map(entries) => {
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.render()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Self::Handle(h) => format!("<{}>", h.label()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// An opaque, shareable handle to a collaborator-owned object.
///
/// Equality is identity: two handles are equal only if they wrap the same
/// allocation.
#[derive(Clone)]
pub struct Handle {
    label: String,
    object: Arc<dyn Any + Send + Sync>,
}

impl Handle {
    pub fn new(label: impl Into<String>, object: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            label: label.into(),
            object,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Downcast the wrapped object to a concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.label)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

/// The default path separator for dotted keys.
pub const DEFAULT_SEPARATOR: char = ':';

/// The typed key/value store shared by every step of a test case.
///
/// Keys are dotted paths (`a:b:c` with the default separator); setting a
/// path creates nested maps for missing ancestors, and getting a missing
/// path returns `None`. The store is owned by exactly one test-case driver
/// and dropped at case finalize; cloning a `Context` clones the shared
/// handle, which is how parallel children of a Fork see the same tree.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Mutex<BTreeMap<String, Value>>>,
    /// Read-through attribute layer; `None` outside `overlay` scopes.
    overlay: Option<Arc<Mutex<BTreeMap<String, Value>>>>,
    separator: char,
}

impl Context {
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }

    pub fn with_separator(separator: char) -> Self {
        Self {
            shared: Arc::new(Mutex::new(BTreeMap::new())),
            overlay: None,
            separator,
        }
    }

    /// Get the value at a dotted path, descending nested maps.
    ///
    /// Returns `None` for a missing path. In an overlay scope the overlay
    /// layer is consulted first and reads fall through to the parent.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(overlay) = &self.overlay {
            let layer = overlay.lock().expect("context overlay poisoned");
            if let Some(value) = lookup(&layer, key, self.separator) {
                return Some(value);
            }
        }
        let tree = self.shared.lock().expect("context tree poisoned");
        lookup(&tree, key, self.separator)
    }

    /// Set the value at a dotted path, creating nested maps for missing
    /// ancestor segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if an ancestor segment exists and is not a
    /// map.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), EngineError> {
        let target = match &self.overlay {
            Some(overlay) => overlay,
            None => &self.shared,
        };
        let mut tree = target.lock().expect("context tree poisoned");
        insert(&mut tree, key, value.into(), self.separator)
    }

    /// Delete a top-level key. Dotted paths are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if the key contains the path separator.
    pub fn del(&self, key: &str) -> Result<(), EngineError> {
        if key.contains(self.separator) {
            return Err(EngineError::invalid_context(format!(
                "del accepts top-level keys only, got \"{key}\""
            )));
        }
        let target = match &self.overlay {
            Some(overlay) => overlay,
            None => &self.shared,
        };
        target
            .lock()
            .expect("context tree poisoned")
            .remove(key);
        Ok(())
    }

    /// Create an overlay scope seeded with the given pairs.
    ///
    /// Reads fall through to this context; writes land in the overlay and
    /// never reach the parent. Used by composites that forward attributes
    /// to children without polluting the shared tree.
    pub fn overlay(&self, pairs: Vec<(String, Value)>) -> Self {
        let mut layer = BTreeMap::new();
        for (key, value) in pairs {
            // Seeding uses plain keys; dotted seeds nest like `set` does.
            let _ = insert(&mut layer, &key, value, self.separator);
        }
        Self {
            shared: Arc::clone(&self.shared),
            overlay: Some(Arc::new(Mutex::new(layer))),
            separator: self.separator,
        }
    }

    /// A shared handle to the same underlying tree, without any overlay.
    /// Writes through the result propagate to every other handle.
    pub fn shared(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            overlay: None,
            separator: self.separator,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.shared.lock().expect("context tree poisoned");
        f.debug_struct("Context")
            .field("keys", &tree.keys().collect::<Vec<_>>())
            .field("overlay", &self.overlay.is_some())
            .finish()
    }
}

fn lookup(tree: &BTreeMap<String, Value>, key: &str, separator: char) -> Option<Value> {
    let mut segments = key.split(separator);
    let first = segments.next()?;
    let mut current = tree.get(first)?;
    for segment in segments {
        match current {
            Value::Map(entries) => current = entries.get(segment)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

fn insert(
    tree: &mut BTreeMap<String, Value>,
    key: &str,
    value: Value,
    separator: char,
) -> Result<(), EngineError> {
    let segments: Vec<&str> = key.split(separator).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(EngineError::invalid_context(format!(
            "empty segment in context path \"{key}\""
        )));
    }
    let (leaf, ancestors) = segments.split_last().expect("split never yields empty");

    let mut current = tree;
    for (i, segment) in ancestors.iter().enumerate() {
        let entry = current
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        match entry {
            Value::Map(entries) => current = entries,
            _ => {
                return Err(EngineError::invalid_context(format!(
                    "ancestor \"{}\" of \"{key}\" is not a map",
                    segments[..=i].join(&separator.to_string())
                )));
            }
        }
    }
    current.insert((*leaf).to_owned(), value);
    Ok(())
}
