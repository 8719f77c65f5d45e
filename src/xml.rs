use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::EngineError;

/// Attribute map of an XML element, in document order-independent form.
pub type AttrMap = BTreeMap<String, String>;

/// A parsed XML element: name, attributes, child elements, and text.
///
/// The descriptor formats this engine consumes are small, so every loader
/// works on a fully materialized element tree instead of streaming events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: AttrMap,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    /// Look up an attribute by exact name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Look up a required attribute, or fail with the given error builder.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `err` when the attribute is absent.
    pub fn require_attr(
        &self,
        name: &str,
        err: fn(String) -> EngineError,
    ) -> Result<&str, EngineError> {
        self.attr(name).ok_or_else(|| {
            err(format!(
                "element <{}> is missing required attribute \"{name}\"",
                self.name
            ))
        })
    }

    /// Child elements with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// The single child element with the given name, if present.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parse an XML document into its root element.
///
/// Comments, processing instructions, and the XML declaration are skipped;
/// whitespace-only text is ignored. Trailing content after the root
/// element is rejected.
///
/// # Errors
///
/// Returns the error built by `err` for malformed XML or a missing root.
pub fn parse_document(
    xml: &str,
    err: fn(String) -> EngineError,
) -> Result<XmlNode, EngineError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| err(format!("malformed XML: {e}")))?;
        match event {
            Event::Start(start) => {
                if root.is_some() && stack.is_empty() {
                    return Err(err("content after the root element".to_owned()));
                }
                stack.push(node_from_start(start.name().as_ref(), start.attributes(), err)?);
            }
            Event::Empty(start) => {
                let node =
                    node_from_start(start.name().as_ref(), start.attributes(), err)?;
                attach(&mut stack, &mut root, node, err)?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| err("unbalanced closing tag".to_owned()))?;
                attach(&mut stack, &mut root, node, err)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| err(format!("malformed text: {e}")))?;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    match stack.last_mut() {
                        Some(parent) => parent.text.push_str(trimmed),
                        None => return Err(err("text outside the root element".to_owned())),
                    }
                }
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.text.push_str(&text);
                }
            }
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(err("unexpected end of document".to_owned()));
    }
    root.ok_or_else(|| err("document has no root element".to_owned()))
}

fn node_from_start(
    name: &[u8],
    attributes: quick_xml::events::attributes::Attributes<'_>,
    err: fn(String) -> EngineError,
) -> Result<XmlNode, EngineError> {
    let mut attrs = AttrMap::new();
    for attr in attributes {
        let attr = attr.map_err(|e| err(format!("malformed attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| err(format!("malformed attribute value: {e}")))?
            .into_owned();
        if attrs.insert(key.clone(), value).is_some() {
            return Err(err(format!("duplicate attribute \"{key}\"")));
        }
    }
    Ok(XmlNode {
        name: String::from_utf8_lossy(name).into_owned(),
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
    err: fn(String) -> EngineError,
) -> Result<(), EngineError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(err("multiple root elements".to_owned()));
            }
            *root = Some(node);
            Ok(())
        }
    }
}

/// Escape a string for use in XML text or attribute values.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
