//! Two-way binding between payload fields and UI input elements.
//!
//! Elements are found by naming convention (`field_` + path with `/`
//! replaced by `_`). Every bound element gets an input listener; a focused
//! element whose value is stale gets a one-shot blur listener instead of an
//! immediate overwrite. Both are tracked here and released together.

use tracing::{debug, warn};

use crate::path::element_id;
use crate::payload::{Field, FieldValue, Payload};
use crate::xml::XmlElement;

/// `data-type` marker of elements that hold serialized structured content.
pub const XML_DATA_TYPE: &str = "text/xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementEvent {
    Input,
    Blur,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementState {
    pub value: String,
    pub data_type: Option<String>,
    pub focused: bool,
}

/// The UI the guest presents. Listeners registered here are expected to call
/// back into [`crate::PayloadHosting::handle_element_event`].
pub trait UiSurface {
    fn element(&self, id: &str) -> Option<ElementState>;

    fn set_value(&mut self, id: &str, value: &str);

    fn listen(&mut self, id: &str, event: ElementEvent);

    fn unlisten(&mut self, id: &str, event: ElementEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Text,
    Xml,
}

impl BindingKind {
    fn of(state: &ElementState) -> Self {
        if state.data_type.as_deref() == Some(XML_DATA_TYPE) {
            BindingKind::Xml
        } else {
            BindingKind::Text
        }
    }

    fn render(self, field: &Field) -> String {
        match self {
            BindingKind::Text => field.text().unwrap_or_default(),
            BindingKind::Xml => field.xml_string().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub element_id: String,
    pub field_path: String,
    pub kind: BindingKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeferredWrite {
    element_id: String,
    value: String,
}

/// A value typed into a bound element, ready to be written to its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEdit {
    pub field_path: String,
    /// `None` clears the field.
    pub value: Option<FieldValue>,
}

#[derive(Debug, Default)]
pub struct BindingEngine {
    enabled: bool,
    bindings: Vec<Binding>,
    deferred: Option<DeferredWrite>,
}

impl BindingEngine {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Element waiting for a blur before its value is refreshed.
    pub fn pending_element(&self) -> Option<&str> {
        self.deferred.as_ref().map(|write| write.element_id.as_str())
    }

    /// Releases every previous binding, then binds each field that has a
    /// matching element.
    pub fn bind(&mut self, surface: &mut dyn UiSurface, payload: &Payload) {
        self.release(surface);

        for (path, field) in payload.walk_fields() {
            let id = element_id(&path);
            let Some(state) = surface.element(&id) else {
                continue;
            };
            let kind = BindingKind::of(&state);

            let value = kind.render(field);
            if state.value != value {
                if state.focused {
                    self.defer(surface, &id, value);
                } else {
                    surface.set_value(&id, &value);
                }
            }

            surface.listen(&id, ElementEvent::Input);
            self.bindings.push(Binding {
                element_id: id,
                field_path: path,
                kind,
            });
        }

        debug!(count = self.bindings.len(), "bound payload fields to elements");
    }

    pub fn release(&mut self, surface: &mut dyn UiSurface) {
        for binding in self.bindings.drain(..) {
            surface.unlisten(&binding.element_id, ElementEvent::Input);
        }
        if let Some(write) = self.deferred.take() {
            surface.unlisten(&write.element_id, ElementEvent::Blur);
        }
    }

    fn defer(&mut self, surface: &mut dyn UiSurface, id: &str, value: String) {
        if let Some(previous) = self.deferred.take() {
            surface.unlisten(&previous.element_id, ElementEvent::Blur);
        }
        surface.listen(id, ElementEvent::Blur);
        self.deferred = Some(DeferredWrite {
            element_id: id.to_string(),
            value,
        });
    }

    /// Applies the deferred write for `id`; returns whether one was pending.
    pub fn on_blur(&mut self, surface: &mut dyn UiSurface, id: &str) -> bool {
        let Some(write) = self.deferred.take_if(|write| write.element_id == id) else {
            return false;
        };
        surface.unlisten(id, ElementEvent::Blur);
        surface.set_value(id, &write.value);
        true
    }

    /// Reads the edited element back into a field edit.
    ///
    /// A pending refresh of the same element is dropped, the user's input
    /// wins. Structured elements holding invalid markup produce no edit.
    pub fn on_input(&mut self, surface: &mut dyn UiSurface, id: &str) -> Option<FieldEdit> {
        let binding = self.bindings.iter().find(|binding| binding.element_id == id)?;
        let field_path = binding.field_path.clone();
        let kind = binding.kind;

        if self.deferred.take_if(|write| write.element_id == id).is_some() {
            surface.unlisten(id, ElementEvent::Blur);
        }

        let state = surface.element(id)?;
        let value = match kind {
            BindingKind::Text => Some(FieldValue::Text(state.value)),
            BindingKind::Xml if state.value.is_empty() => None,
            BindingKind::Xml => match XmlElement::parse(&state.value) {
                Ok(element) => Some(FieldValue::Xml(element)),
                Err(err) => {
                    warn!(element = id, %err, "ignoring invalid XML input");
                    return None;
                }
            },
        };

        Some(FieldEdit { field_path, value })
    }
}
