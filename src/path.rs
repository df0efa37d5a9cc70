//! Field path parsing and resolution.
//!
//! A path is a `/`-separated list of segments. Plain segments name fields;
//! `#N` segments select the zero-based row `N` of the list held by the field
//! addressed so far. Resolution alternates between payload context (a root
//! or a row, whose children are fields) and field context (whose children
//! are sub-fields or rows), and a lookup only succeeds when it ends in the
//! context the caller asked for.

use crate::model::{FieldDef, ListDef, Model, Schema};
use crate::payload::{Field, Payload};

/// Splits a path into segments; empty paths and empty segments resolve nowhere.
pub fn segments(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() {
        return None;
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return None;
    }
    Some(segments)
}

/// Row index of a `#N` segment.
pub fn row_index(segment: &str) -> Option<usize> {
    let digits = segment.strip_prefix('#')?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn row_path(list_path: &str, index: usize) -> String {
    format!("{list_path}/#{index}")
}

/// Identifier of the UI element bound to a field path.
pub fn element_id(path: &str) -> String {
    format!("field_{}", path.replace('/', "_"))
}

enum Node<'a> {
    Payload(&'a Payload),
    Field(&'a Field),
}

enum NodeMut<'a> {
    Payload(&'a mut Payload),
    Field(&'a mut Field),
}

fn walk<'a>(root: &'a Payload, path: &str) -> Option<Node<'a>> {
    let mut node = Node::Payload(root);
    for segment in segments(path)? {
        node = match node {
            Node::Payload(payload) => Node::Field(payload.field(segment)?),
            Node::Field(field) => match row_index(segment) {
                Some(index) => Node::Payload(field.row(index)?),
                None => Node::Field(field.field(segment)?),
            },
        };
    }
    Some(node)
}

fn walk_mut<'a>(root: &'a mut Payload, path: &str) -> Option<NodeMut<'a>> {
    let mut node = NodeMut::Payload(root);
    for segment in segments(path)? {
        node = match node {
            NodeMut::Payload(payload) => NodeMut::Field(payload.field_mut(segment)?),
            NodeMut::Field(field) => match row_index(segment) {
                Some(index) => NodeMut::Payload(field.row_mut(index)?),
                None => NodeMut::Field(field.field_mut(segment)?),
            },
        };
    }
    Some(node)
}

pub fn resolve_field<'a>(root: &'a Payload, path: &str) -> Option<&'a Field> {
    match walk(root, path)? {
        Node::Field(field) => Some(field),
        Node::Payload(_) => None,
    }
}

pub fn resolve_field_mut<'a>(root: &'a mut Payload, path: &str) -> Option<&'a mut Field> {
    match walk_mut(root, path)? {
        NodeMut::Field(field) => Some(field),
        NodeMut::Payload(_) => None,
    }
}

pub fn resolve_row<'a>(root: &'a Payload, path: &str) -> Option<&'a Payload> {
    match walk(root, path)? {
        Node::Payload(row) => Some(row),
        Node::Field(_) => None,
    }
}

pub fn resolve_row_mut<'a>(root: &'a mut Payload, path: &str) -> Option<&'a mut Payload> {
    match walk_mut(root, path)? {
        NodeMut::Payload(row) => Some(row),
        NodeMut::Field(_) => None,
    }
}

enum DefNode<'a> {
    /// The model root or a list's row schema.
    Level(&'a Schema, Option<&'a ListDef>),
    Def(&'a FieldDef),
}

// Any `#` segment after a list field steps into its row schema, so
// `items/#3/symbol` and `items/#0/symbol` share one definition.
fn walk_defs<'a>(model: &'a Model, path: &str) -> Option<DefNode<'a>> {
    let mut node = DefNode::Level(&model.schema, None);
    for segment in segments(path)? {
        node = match node {
            DefNode::Level(schema, _) => DefNode::Def(schema.field(segment)?),
            DefNode::Def(def) if segment.starts_with('#') => {
                let list = def.list.as_ref()?;
                DefNode::Level(&list.schema, Some(list))
            }
            DefNode::Def(def) => DefNode::Def(def.sub_field(segment)?),
        };
    }
    Some(node)
}

pub fn resolve_field_def<'a>(model: &'a Model, path: &str) -> Option<&'a FieldDef> {
    match walk_defs(model, path)? {
        DefNode::Def(def) => Some(def),
        DefNode::Level(..) => None,
    }
}

pub fn resolve_list_def<'a>(model: &'a Model, path: &str) -> Option<&'a ListDef> {
    match walk_defs(model, path)? {
        DefNode::Level(_, list) => list,
        DefNode::Def(_) => None,
    }
}
