use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::binding::{ElementEvent, ElementState, UiSurface, XML_DATA_TYPE};
use crate::protocol::GuestMessage;
use crate::store::ModelFetcher;
use crate::transport::HostChannel;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Attached { focus_tracking: bool },
    Detached,
    Posted { message: GuestMessage, origin: String },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    events: Rc<RefCell<Vec<ChannelEvent>>>,
}

impl RecordingChannel {
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.borrow().clone()
    }

    pub fn posted(&self) -> Vec<GuestMessage> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ChannelEvent::Posted { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// XML of every `payload_changed` message, oldest first.
    pub fn payload_changes(&self) -> Vec<String> {
        self.posted()
            .into_iter()
            .filter_map(|message| match message {
                GuestMessage::PayloadChanged { xml, .. } => Some(xml),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl HostChannel for RecordingChannel {
    fn post(&mut self, message: &GuestMessage, target_origin: &str) {
        self.events.borrow_mut().push(ChannelEvent::Posted {
            message: message.clone(),
            origin: target_origin.to_string(),
        });
    }

    fn attach(&mut self, focus_tracking: bool) {
        self.events
            .borrow_mut()
            .push(ChannelEvent::Attached { focus_tracking });
    }

    fn detach(&mut self) {
        self.events.borrow_mut().push(ChannelEvent::Detached);
    }
}

#[derive(Debug, Clone, Default)]
struct FakeElement {
    value: String,
    data_type: Option<String>,
    focused: bool,
}

#[derive(Debug, Default)]
struct SurfaceState {
    elements: IndexMap<String, FakeElement>,
    listeners: Vec<(String, ElementEvent)>,
    writes: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeSurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl FakeSurface {
    pub fn add_text_element(&self, id: &str, value: &str) {
        self.state.borrow_mut().elements.insert(
            id.to_string(),
            FakeElement {
                value: value.to_string(),
                ..FakeElement::default()
            },
        );
    }

    pub fn add_xml_element(&self, id: &str, value: &str) {
        self.state.borrow_mut().elements.insert(
            id.to_string(),
            FakeElement {
                value: value.to_string(),
                data_type: Some(XML_DATA_TYPE.to_string()),
                focused: false,
            },
        );
    }

    pub fn set_focused(&self, id: &str, focused: bool) {
        if let Some(element) = self.state.borrow_mut().elements.get_mut(id) {
            element.focused = focused;
        }
    }

    /// Simulates the user editing an element.
    pub fn type_value(&self, id: &str, value: &str) {
        if let Some(element) = self.state.borrow_mut().elements.get_mut(id) {
            element.value = value.to_string();
        }
    }

    pub fn value(&self, id: &str) -> Option<String> {
        self.state
            .borrow()
            .elements
            .get(id)
            .map(|element| element.value.clone())
    }

    pub fn listeners(&self) -> Vec<(String, ElementEvent)> {
        self.state.borrow().listeners.clone()
    }

    pub fn has_listener(&self, id: &str, event: ElementEvent) -> bool {
        self.state
            .borrow()
            .listeners
            .iter()
            .any(|(listened, kind)| listened == id && *kind == event)
    }

    /// Values written by the guest, oldest first.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.borrow().writes.clone()
    }
}

impl UiSurface for FakeSurface {
    fn element(&self, id: &str) -> Option<ElementState> {
        self.state
            .borrow()
            .elements
            .get(id)
            .map(|element| ElementState {
                value: element.value.clone(),
                data_type: element.data_type.clone(),
                focused: element.focused,
            })
    }

    fn set_value(&mut self, id: &str, value: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(element) = state.elements.get_mut(id) {
            element.value = value.to_string();
        }
        state.writes.push((id.to_string(), value.to_string()));
    }

    fn listen(&mut self, id: &str, event: ElementEvent) {
        self.state
            .borrow_mut()
            .listeners
            .push((id.to_string(), event));
    }

    fn unlisten(&mut self, id: &str, event: ElementEvent) {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state
            .listeners
            .iter()
            .position(|(listened, kind)| listened == id && *kind == event)
        {
            state.listeners.remove(index);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingFetcher {
    requests: Rc<RefCell<Vec<String>>>,
}

impl RecordingFetcher {
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl ModelFetcher for RecordingFetcher {
    fn request(&mut self, uri: &str) {
        self.requests.borrow_mut().push(uri.to_string());
    }
}
