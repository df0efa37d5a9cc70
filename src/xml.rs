//! Owned XML element tree used for payload and model documents.
//!
//! Parsing goes through `quick_xml`'s pull reader and resolves namespace
//! prefixes while building the tree, so every element and prefixed attribute
//! remembers its namespace URI. Writing re-declares namespaces wherever the
//! surrounding scope would otherwise change their meaning, which lets a
//! detached subtree (a structured field value, say) serialize on its own.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Malformed(String),

    #[error("xml document has no root element")]
    MissingRoot,

    #[error("unexpected root element '{found}', expected '{expected}'")]
    UnexpectedRoot { expected: &'static str, found: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

type Scope = Vec<(Option<String>, Option<String>)>;

impl XmlElement {
    pub fn new(namespace: Option<&str>, local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        parse_document(xml)
    }

    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == namespace
    }

    /// Value of an attribute without a namespace prefix.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.prefix.is_none() && attr.local_name == local_name)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attribute(&mut self, local_name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|attr| attr.prefix.is_none() && attr.local_name == local_name)
        {
            Some(attr) => attr.value = value,
            None => self.attributes.push(XmlAttribute {
                prefix: None,
                local_name: local_name.to_string(),
                namespace: None,
                value,
            }),
        }
    }

    pub fn child_elements(&self) -> ChildElements<'_> {
        ChildElements {
            nodes: self.children.iter(),
            namespace: None,
            local_name: None,
        }
    }

    /// Child elements filtered by namespace and name; `None` matches anything.
    pub fn children_named<'a>(
        &'a self,
        namespace: Option<&'a str>,
        local_name: Option<&'a str>,
    ) -> ChildElements<'a> {
        ChildElements {
            nodes: self.children.iter(),
            namespace,
            local_name,
        }
    }

    pub fn first_child_element(&self) -> Option<&XmlElement> {
        self.child_elements().next()
    }

    /// Concatenation of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    pub fn push_element(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(XmlNode::Text(text));
        }
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        let mut scope = Scope::new();
        write_element(self, &mut scope, &mut out);
        out
    }
}

/// Lazy walk over the element children of one parent.
///
/// A clone continues from the same position as the original.
#[derive(Debug, Clone)]
pub struct ChildElements<'a> {
    nodes: std::slice::Iter<'a, XmlNode>,
    namespace: Option<&'a str>,
    local_name: Option<&'a str>,
}

impl<'a> Iterator for ChildElements<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        for node in self.nodes.by_ref() {
            let XmlNode::Element(element) = node else {
                continue;
            };
            if self
                .namespace
                .is_some_and(|ns| element.namespace.as_deref() != Some(ns))
            {
                continue;
            }
            if self.local_name.is_some_and(|name| element.local_name != name) {
                continue;
            }
            return Some(element);
        }
        None
    }
}

fn parse_document(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);
    let mut scopes: Vec<Scope> = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                let (element, declarations) = open_element(&start, &scopes)?;
                scopes.push(declarations);
                stack.push(element);
            }
            Event::Empty(start) => {
                let (element, _declarations) = open_element(&start, &scopes)?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                scopes.pop();
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Malformed("unbalanced end tag".to_string()))?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.push_text(text.unescape().map_err(malformed)?.into_owned());
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8(data.into_inner().into_owned())
                        .map_err(malformed)?;
                    parent.push_text(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(XmlError::Malformed(format!(
            "unclosed element '{}'",
            open.local_name
        )));
    }

    root.ok_or(XmlError::MissingRoot)
}

fn open_element(start: &BytesStart<'_>, scopes: &[Scope]) -> Result<(XmlElement, Scope), XmlError> {
    let mut declarations = Scope::new();
    let mut raw_attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?.into_owned();

        if key == "xmlns" {
            declarations.push((None, non_empty(value)));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((Some(prefix.to_string()), non_empty(value)));
        } else {
            raw_attributes.push((key.to_string(), value));
        }
    }

    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(malformed)?
        .to_string();
    let (prefix, local_name) = split_qname(&name);
    let namespace = resolve(&declarations, scopes, prefix.as_deref()).map(str::to_string);

    let attributes = raw_attributes
        .into_iter()
        .map(|(key, value)| {
            let (prefix, local_name) = split_qname(&key);
            let namespace = prefix
                .as_deref()
                .and_then(|prefix| resolve(&declarations, scopes, Some(prefix)))
                .map(str::to_string);
            XmlAttribute {
                prefix,
                local_name,
                namespace,
                value,
            }
        })
        .collect();

    let element = XmlElement {
        prefix,
        local_name,
        namespace,
        attributes,
        children: Vec::new(),
    };

    Ok((element, declarations))
}

fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_element(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(XmlError::Malformed("multiple root elements".to_string())),
    }
}

fn resolve<'a>(own: &'a Scope, scopes: &'a [Scope], prefix: Option<&str>) -> Option<&'a str> {
    let declared = own
        .iter()
        .rev()
        .chain(scopes.iter().rev().flat_map(|scope| scope.iter().rev()))
        .find(|(declared, _)| declared.as_deref() == prefix);

    match declared {
        Some((_, namespace)) => namespace.as_deref(),
        None if prefix == Some("xml") => Some(XML_NS),
        None => None,
    }
}

fn lookup<'a>(scope: &'a Scope, prefix: Option<&str>) -> Option<&'a str> {
    resolve(scope, &[], prefix)
}

fn write_element(element: &XmlElement, scope: &mut Scope, out: &mut String) {
    let depth = scope.len();
    let qname = qualified(element.prefix.as_deref(), &element.local_name);

    out.push('<');
    out.push_str(&qname);

    declare(element.prefix.as_deref(), element.namespace.as_deref(), scope, out);
    for attr in &element.attributes {
        if let Some(prefix) = attr.prefix.as_deref() {
            if prefix != "xml" {
                declare(Some(prefix), attr.namespace.as_deref(), scope, out);
            }
        }
    }

    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&qualified(attr.prefix.as_deref(), &attr.local_name));
        out.push_str("=\"");
        out.push_str(&escape(attr.value.as_str()));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for child in &element.children {
            match child {
                XmlNode::Element(child) => write_element(child, scope, out),
                XmlNode::Text(text) => out.push_str(&escape(text.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&qname);
        out.push('>');
    }

    scope.truncate(depth);
}

fn declare(prefix: Option<&str>, namespace: Option<&str>, scope: &mut Scope, out: &mut String) {
    if lookup(scope, prefix) == namespace {
        return;
    }
    // A prefix cannot be bound to "no namespace".
    if prefix.is_some() && namespace.is_none() {
        return;
    }

    match prefix {
        Some(prefix) => {
            out.push_str(" xmlns:");
            out.push_str(prefix);
        }
        None => out.push_str(" xmlns"),
    }
    out.push_str("=\"");
    out.push_str(&escape(namespace.unwrap_or("")));
    out.push('"');

    scope.push((prefix.map(str::to_string), namespace.map(str::to_string)));
}

fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

fn qualified(prefix: Option<&str>, local_name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local_name}"),
        None => local_name.to_string(),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn malformed(err: impl std::fmt::Display) -> XmlError {
    XmlError::Malformed(err.to_string())
}
