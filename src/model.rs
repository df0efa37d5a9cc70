use crate::payload::{
    Field, FieldContent, Payload, is_viz, rows_from_element, value_from_element, viz_children,
};
use crate::xml::{XmlElement, XmlError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    pub schema: Schema,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub media_type: Option<String>,
    pub xsd_type: Option<String>,
    /// Content copied into new rows.
    pub default: FieldContent,
    pub list: Option<ListDef>,
    /// Sub-field definitions of a grouping field.
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDef {
    pub minimum_count: Option<usize>,
    pub maximum_count: Option<usize>,
    pub schema: Schema,
}

impl Model {
    /// Parses a standalone model document.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let root = XmlElement::parse(xml)?;
        if !is_viz(&root, "model") {
            return Err(XmlError::UnexpectedRoot {
                expected: "model",
                found: root.local_name,
            });
        }
        Ok(Self::from_element(&root))
    }

    pub fn from_element(element: &XmlElement) -> Self {
        let schema = viz_children(element, "schema")
            .next()
            .map(Schema::from_element)
            .unwrap_or_default();
        Self { schema }
    }
}

impl Schema {
    fn from_element(element: &XmlElement) -> Self {
        Self {
            fields: viz_children(element, "fielddef")
                .map(FieldDef::from_element)
                .collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|def| def.name == name)
    }

    fn instantiate(&self) -> Vec<Field> {
        self.fields.iter().map(FieldDef::instantiate).collect()
    }
}

impl FieldDef {
    fn from_element(element: &XmlElement) -> Self {
        let mut def = FieldDef {
            name: element.attribute("name").unwrap_or_default().to_string(),
            media_type: element.attribute("mediatype").map(str::to_string),
            xsd_type: element.attribute("xsdtype").map(str::to_string),
            ..FieldDef::default()
        };
        let mut nested = Vec::new();

        for child in element.child_elements() {
            if is_viz(child, "value") {
                def.default = FieldContent::Value(value_from_element(child));
            } else if is_viz(child, "list") {
                if matches!(def.default, FieldContent::Empty) {
                    def.default = FieldContent::List(rows_from_element(child));
                }
            } else if is_viz(child, "listdef") {
                def.list = Some(ListDef::from_element(child));
            } else if is_viz(child, "schema") {
                nested.extend(Schema::from_element(child).fields);
            } else if is_viz(child, "fielddef") {
                nested.push(FieldDef::from_element(child));
            }
        }

        if !nested.is_empty() {
            def.schema = Some(Schema { fields: nested });
        }
        def
    }

    pub fn is_scalar(&self) -> bool {
        self.media_type.is_some()
    }

    pub fn is_list(&self) -> bool {
        self.list.is_some()
    }

    /// Neither media type nor XSD type: only groups sub-fields.
    pub fn is_void(&self) -> bool {
        self.media_type.is_none() && self.xsd_type.is_none()
    }

    pub fn sub_field(&self, name: &str) -> Option<&FieldDef> {
        self.schema.as_ref().and_then(|schema| schema.field(name))
    }

    fn instantiate(&self) -> Field {
        let mut field = Field::new(self.name.as_str()).with_content(self.default.clone());
        if let Some(schema) = &self.schema {
            field.fields = schema.instantiate();
        }
        field
    }
}

impl ListDef {
    fn from_element(element: &XmlElement) -> Self {
        let count = |name: &str| {
            viz_children(element, name)
                .next()
                .and_then(|child| child.text().trim().parse::<usize>().ok())
        };

        Self {
            minimum_count: count("minimumcount"),
            maximum_count: count("maximumcount"),
            schema: viz_children(element, "schema")
                .next()
                .map(Schema::from_element)
                .unwrap_or_default(),
        }
    }

    pub fn minimum(&self) -> usize {
        self.minimum_count.unwrap_or(0)
    }

    /// A fresh row holding every row field with its default content.
    pub fn new_row(&self) -> Payload {
        Payload::with_fields(self.schema.instantiate())
    }
}
