//! A [`Payload`] is an ordered set of [`Field`]s. A field holds nothing, a
//! scalar [`FieldValue`] or a list of row payloads, and may carry sub-fields
//! and annotations. Elements this module does not understand are kept and
//! written back untouched so the host receives everything it sent.

use indexmap::IndexMap;

use crate::xml::{XmlAttribute, XmlElement, XmlError};

pub const VIZ_NS: &str = "http://www.vizrt.com/types";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Xml(XmlElement),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Xml(_) => None,
        }
    }

    pub fn as_xml(&self) -> Option<&XmlElement> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::Xml(element) => Some(element),
        }
    }

    /// Comparable string form: the text itself, or the serialized element.
    pub fn serialize(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Xml(element) => element.to_xml_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldContent {
    #[default]
    Empty,
    Value(FieldValue),
    List(Vec<Payload>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub content: FieldContent,
    pub annotations: IndexMap<String, String>,
    pub fields: Vec<Field>,
    attributes: Vec<XmlAttribute>,
    /// Namespaced annotation attributes, written back after the plain ones.
    annotation_attributes: Vec<XmlAttribute>,
    unknown: Vec<XmlElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub fields: Vec<Field>,
    /// Inline `<model>` element, kept verbatim.
    pub model: Option<XmlElement>,
    attributes: Vec<XmlAttribute>,
    unknown: Vec<XmlElement>,
}

impl Payload {
    pub fn with_fields(fields: Vec<Field>) -> Self {
        Self {
            fields,
            ..Payload::default()
        }
    }

    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let root = XmlElement::parse(xml)?;
        if !is_viz(&root, "payload") {
            return Err(XmlError::UnexpectedRoot {
                expected: "payload",
                found: root.local_name,
            });
        }
        Ok(Self::from_element(&root))
    }

    pub fn from_element(element: &XmlElement) -> Self {
        let mut payload = Payload {
            attributes: element.attributes.clone(),
            ..Payload::default()
        };

        for child in element.child_elements() {
            if is_viz(child, "field") {
                payload.fields.push(Field::from_element(child));
            } else if is_viz(child, "model") {
                payload.model = Some(child.clone());
            } else {
                payload.unknown.push(child.clone());
            }
        }

        payload
    }

    pub fn to_element(&self) -> XmlElement {
        let mut element = viz_element("payload");
        element.attributes = self.attributes.clone();

        if let Some(model) = &self.model {
            element.push_element(model.clone());
        }
        for field in &self.fields {
            element.push_element(field.to_element());
        }
        for unknown in &self.unknown {
            element.push_element(unknown.clone());
        }

        element
    }

    pub fn to_xml_string(&self) -> String {
        self.to_element().to_xml_string()
    }

    /// Identifier of an external model, from the `model` attribute.
    pub fn model_reference(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.prefix.is_none() && attr.local_name == "model")
            .map(|attr| attr.value.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.name == name)
    }

    /// Depth-first walk over every field and sub-field, list rows excluded.
    pub fn walk_fields(&self) -> FieldWalk<'_> {
        FieldWalk {
            stack: vec![(String::new(), self.fields.iter())],
        }
    }

    /// Copy of this row with the same field names and no content.
    pub fn blank_copy(&self) -> Payload {
        Payload::with_fields(self.fields.iter().map(Field::blank_copy).collect())
    }
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Field::default()
        }
    }

    pub fn with_content(mut self, content: FieldContent) -> Self {
        self.content = content;
        self
    }

    fn from_element(element: &XmlElement) -> Self {
        let mut field = Field::default();

        for attr in &element.attributes {
            if attr.prefix.is_none() && attr.local_name == "name" {
                field.name = attr.value.clone();
            } else {
                field.attributes.push(attr.clone());
            }
        }

        for child in element.child_elements() {
            if is_viz(child, "value") {
                field.content = FieldContent::Value(value_from_element(child));
            } else if is_viz(child, "list") {
                if !matches!(field.content, FieldContent::Value(_)) {
                    field.content = FieldContent::List(rows_from_element(child));
                }
            } else if is_viz(child, "annotation") {
                for attr in &child.attributes {
                    if attr.prefix.is_none() {
                        field
                            .annotations
                            .insert(attr.local_name.clone(), attr.value.clone());
                    } else {
                        field.annotation_attributes.push(attr.clone());
                    }
                }
            } else if is_viz(child, "field") {
                field.fields.push(Field::from_element(child));
            } else {
                field.unknown.push(child.clone());
            }
        }

        field
    }

    fn to_element(&self) -> XmlElement {
        let mut element = viz_element("field");
        element.set_attribute("name", self.name.as_str());
        element.attributes.extend(self.attributes.iter().cloned());

        match &self.content {
            FieldContent::Empty => {}
            FieldContent::Value(value) => element.push_element(value_element(value)),
            FieldContent::List(rows) => element.push_element(list_element(rows)),
        }

        if !self.annotations.is_empty() || !self.annotation_attributes.is_empty() {
            let mut annotation = viz_element("annotation");
            for (key, value) in &self.annotations {
                annotation.set_attribute(key, value.as_str());
            }
            annotation
                .attributes
                .extend(self.annotation_attributes.iter().cloned());
            element.push_element(annotation);
        }

        for field in &self.fields {
            element.push_element(field.to_element());
        }
        for unknown in &self.unknown {
            element.push_element(unknown.clone());
        }

        element
    }

    fn blank_copy(&self) -> Field {
        let content = match &self.content {
            FieldContent::List(_) => FieldContent::List(Vec::new()),
            _ => FieldContent::Empty,
        };
        Field {
            name: self.name.clone(),
            content,
            fields: self.fields.iter().map(Field::blank_copy).collect(),
            ..Field::default()
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match &self.content {
            FieldContent::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Text of the value; a structured value has no text of its own.
    pub fn text(&self) -> Option<String> {
        self.value().map(|value| match value {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Xml(_) => String::new(),
        })
    }

    pub fn xml(&self) -> Option<&XmlElement> {
        self.value().and_then(FieldValue::as_xml)
    }

    pub fn xml_string(&self) -> Option<String> {
        self.xml().map(XmlElement::to_xml_string)
    }

    pub fn set_value(&mut self, value: Option<FieldValue>) {
        self.content = match value {
            Some(value) => FieldContent::Value(value),
            None => FieldContent::Empty,
        };
    }

    pub fn rows(&self) -> Option<&[Payload]> {
        match &self.content {
            FieldContent::List(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn rows_mut(&mut self) -> Option<&mut Vec<Payload>> {
        match &mut self.content {
            FieldContent::List(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn row(&self, index: usize) -> Option<&Payload> {
        self.rows().and_then(|rows| rows.get(index))
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut Payload> {
        self.rows_mut().and_then(|rows| rows.get_mut(index))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.name == name)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Sets or clears one annotation; returns whether anything changed.
    pub fn set_annotation(&mut self, key: &str, value: Option<&str>) -> bool {
        match value {
            None => self.annotations.shift_remove(key).is_some(),
            Some(value) if self.annotation(key) == Some(value) => false,
            Some(value) => {
                self.annotations.insert(key.to_string(), value.to_string());
                true
            }
        }
    }
}

/// Depth-first traversal yielding `(path, field)` pairs.
///
/// The walk is lazy and `Clone`, so a caller can restart from any point by
/// keeping a copy.
#[derive(Debug, Clone)]
pub struct FieldWalk<'a> {
    stack: Vec<(String, std::slice::Iter<'a, Field>)>,
}

impl<'a> Iterator for FieldWalk<'a> {
    type Item = (String, &'a Field);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (parent, fields) = self.stack.last_mut()?;
            let Some(field) = fields.next() else {
                self.stack.pop();
                continue;
            };

            let path = if parent.is_empty() {
                field.name.clone()
            } else {
                format!("{parent}/{}", field.name)
            };
            if !field.fields.is_empty() {
                self.stack.push((path.clone(), field.fields.iter()));
            }
            return Some((path, field));
        }
    }
}

pub(crate) fn is_viz(element: &XmlElement, local_name: &str) -> bool {
    element.is(Some(VIZ_NS), local_name) || element.is(None, local_name)
}

/// Children named `local_name` in the types namespace (or in none).
pub(crate) fn viz_children<'a>(
    element: &'a XmlElement,
    local_name: &'a str,
) -> impl Iterator<Item = &'a XmlElement> + Clone {
    element
        .children_named(None, Some(local_name))
        .filter(move |child| is_viz(child, local_name))
}

pub(crate) fn viz_element(local_name: &str) -> XmlElement {
    XmlElement::new(Some(VIZ_NS), local_name)
}

pub(crate) fn value_from_element(element: &XmlElement) -> FieldValue {
    match element.first_child_element() {
        Some(xml) => FieldValue::Xml(xml.clone()),
        None => FieldValue::Text(element.text()),
    }
}

pub(crate) fn rows_from_element(element: &XmlElement) -> Vec<Payload> {
    viz_children(element, "payload")
        .map(Payload::from_element)
        .collect()
}

fn value_element(value: &FieldValue) -> XmlElement {
    let mut element = viz_element("value");
    match value {
        FieldValue::Text(text) if text.is_empty() => {}
        FieldValue::Text(text) => element.push_text(text.as_str()),
        FieldValue::Xml(xml) => element.push_element(xml.clone()),
    }
    element
}

fn list_element(rows: &[Payload]) -> XmlElement {
    let mut element = viz_element("list");
    for row in rows {
        element.push_element(row.to_element());
    }
    element
}
