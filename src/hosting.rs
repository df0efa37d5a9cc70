use serde_json::Value;
use tracing::{debug, info, warn};

use crate::binding::{BindingEngine, ElementEvent, UiSurface};
use crate::config::GuestConfig;
use crate::error::HostingError;
use crate::list;
use crate::model::{FieldDef, ListDef, Model};
use crate::path::{
    resolve_field, resolve_field_def, resolve_field_mut, resolve_list_def, resolve_row, row_path,
};
use crate::payload::{Field, FieldValue, Payload};
use crate::protocol::{EditRequest, FocusEvent, GuestMessage, HostMessage, edit_field_message};
use crate::store::{DocumentStore, ModelFetch, ModelFetcher, Replacement};
use crate::transport::{HostChannel, Transport};
use crate::watch::{Snapshot, WatchSet};
use crate::xml::XmlElement;

pub type ReadyCallback = Box<dyn FnOnce(&mut PayloadHosting)>;
pub type WatchCallback = Box<dyn FnMut(&mut PayloadHosting, Option<FieldValue>)>;
pub type PayloadChangeListener = Box<dyn FnMut(&mut PayloadHosting)>;
/// Gets the raw message and returns whether it handled it.
pub type UnknownMessageHandler = Box<dyn FnMut(&mut PayloadHosting, &Value) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

const VISIBILITY: &str = "visibility";
const CONTENT_EDITABLE: &str = "contenteditable";

/// Hosts one payload for one guest session.
///
/// Everything runs on the caller's thread. Host messages, UI element events
/// and model fetch outcomes are fed in by the embedder; callbacks receive the
/// context itself and may read or mutate the payload.
pub struct PayloadHosting {
    config: GuestConfig,
    transport: Option<Transport>,
    surface: Option<Box<dyn UiSurface>>,
    fetcher: Option<Box<dyn ModelFetcher>>,
    store: DocumentStore,
    bindings: BindingEngine,
    watches: WatchSet<WatchCallback>,
    ready_callback: Option<ReadyCallback>,
    change_listeners: Vec<(ListenerId, Option<PayloadChangeListener>)>,
    next_listener_id: u64,
    unknown_handler: Option<UnknownMessageHandler>,
    in_update: bool,
    changed_during_update: bool,
    about_to_notify: bool,
    in_finish_set_payload: bool,
}

impl PayloadHosting {
    pub fn new(config: GuestConfig) -> Self {
        Self {
            bindings: BindingEngine::new(config.automatic_bindings),
            config,
            transport: None,
            surface: None,
            fetcher: None,
            store: DocumentStore::default(),
            watches: WatchSet::default(),
            ready_callback: None,
            change_listeners: Vec::new(),
            next_listener_id: 0,
            unknown_handler: None,
            in_update: false,
            changed_during_update: false,
            about_to_notify: false,
            in_finish_set_payload: false,
        }
    }

    pub fn with_surface(mut self, surface: Box<dyn UiSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_model_fetcher(mut self, fetcher: Box<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn config(&self) -> &GuestConfig {
        &self.config
    }

    /// Starts listening on `channel` and announces the guest to the host.
    ///
    /// When already initialized only the ready callback is replaced and
    /// `channel` is dropped.
    pub fn initialize(&mut self, channel: Box<dyn HostChannel>, ready: Option<ReadyCallback>) {
        self.ready_callback = ready;
        if self.transport.is_some() {
            debug!("payload hosting already initialized");
            return;
        }

        let mut transport = Transport::new(channel, &self.config);
        transport.listen();
        self.transport = Some(transport);
        info!(guest_id = %self.config.guest_id, "payload hosting initialized");
    }

    pub fn uninitialize(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        transport.release();

        self.release_bindings();
        self.store.clear();
        self.watches.clear();
        self.ready_callback = None;
        self.change_listeners.clear();
        self.in_update = false;
        self.changed_during_update = false;
        self.about_to_notify = false;
        self.in_finish_set_payload = false;
        info!(guest_id = %self.config.guest_id, "payload hosting uninitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_payload_ready(&self) -> bool {
        self.store.is_payload_ready()
    }

    pub fn has_model(&self) -> bool {
        self.store.has_model()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.store.payload()
    }

    pub fn model(&self) -> Option<&Model> {
        self.store.model()
    }

    /// Entry point for raw inbound messages.
    pub fn handle_message(&mut self, raw: Value) {
        self.handle_host_message(HostMessage::from_value(raw));
    }

    pub fn handle_host_message(&mut self, message: HostMessage) {
        if !self.is_initialized() {
            debug!(message_type = message.message_type(), "ignoring host message before initialize");
            return;
        }

        match message {
            HostMessage::SetPayload { xml } => {
                if let Err(err) = self.set_payload(&xml) {
                    warn!(%err, "failed to apply payload from host");
                }
            }
            HostMessage::SetTime => {
                if let Err(err) = self.send(GuestMessage::Present) {
                    warn!(%err, "failed to acknowledge set_time");
                }
            }
            HostMessage::Unhandled(raw) => {
                if let Some(mut handler) = self.unknown_handler.take() {
                    let handled = handler(self, &raw);
                    if self.unknown_handler.is_none() {
                        self.unknown_handler = Some(handler);
                    }
                    if handled {
                        return;
                    }
                }
                let message_type = raw
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<no message type>");
                warn!(message_type, "unhandled host message");
            }
        }
    }

    pub fn set_unknown_message_handler(&mut self, handler: Option<UnknownMessageHandler>) {
        self.unknown_handler = handler;
    }

    /// Replaces the payload. Binding, watches and listeners run once the
    /// model is settled, which may be later if a model must be fetched.
    pub fn set_payload(&mut self, xml: &str) -> Result<(), HostingError> {
        match self.store.replace(xml)? {
            Replacement::Ready => self.finish_set_payload(),
            Replacement::AwaitingModel => Ok(()),
            Replacement::Fetch(uri) => match self.fetcher.as_mut() {
                Some(fetcher) => {
                    debug!(%uri, "requesting model");
                    fetcher.request(&uri);
                    Ok(())
                }
                None => {
                    warn!(%uri, "no model fetcher configured");
                    self.store.settle(&uri, ModelFetch::Failed);
                    self.finish_set_payload()
                }
            },
        }
    }

    /// Settles a fetch started through the [`ModelFetcher`]. Outcomes for a
    /// model that is no longer wanted are ignored.
    pub fn complete_model_fetch(&mut self, uri: &str, outcome: ModelFetch) -> Result<(), HostingError> {
        if self.store.settle(uri, outcome) {
            self.finish_set_payload()
        } else {
            Ok(())
        }
    }

    fn finish_set_payload(&mut self) -> Result<(), HostingError> {
        self.in_finish_set_payload = true;
        let result = self.with_batched_updates(|hosting| {
            if hosting.bindings.enabled() {
                hosting.rebind();
            }
            hosting.update_watches();
            if let Some(ready) = hosting.ready_callback.take() {
                ready(hosting);
            }
            hosting.dispatch_payload_change();
            Ok(false)
        });
        self.in_finish_set_payload = false;
        result
    }

    pub fn uses_automatic_bindings(&self) -> bool {
        self.bindings.enabled()
    }

    pub fn set_uses_automatic_bindings(&mut self, enabled: bool) {
        if enabled == self.bindings.enabled() {
            return;
        }
        self.bindings.set_enabled(enabled);
        if enabled {
            self.rebind();
        } else {
            self.release_bindings();
        }
    }

    fn rebind(&mut self) {
        let (Some(surface), Some(payload)) = (self.surface.as_deref_mut(), self.store.payload()) else {
            return;
        };
        self.bindings.bind(surface, payload);
    }

    fn release_bindings(&mut self) {
        if let Some(surface) = self.surface.as_deref_mut() {
            self.bindings.release(surface);
        }
    }

    /// Routes an event from a listener registered on the UI surface.
    pub fn handle_element_event(&mut self, element_id: &str, event: ElementEvent) -> Result<(), HostingError> {
        let Some(surface) = self.surface.as_deref_mut() else {
            return Ok(());
        };

        match event {
            ElementEvent::Blur => {
                self.bindings.on_blur(surface, element_id);
                Ok(())
            }
            ElementEvent::Input => {
                let Some(edit) = self.bindings.on_input(surface, element_id) else {
                    return Ok(());
                };
                self.with_batched_updates(|hosting| {
                    hosting.field_mut(&edit.field_path)?.set_value(edit.value);
                    Ok(true)
                })
            }
        }
    }

    pub fn handle_focus_event(&mut self, event: FocusEvent) {
        if let Some(transport) = self.transport.as_mut() {
            transport.focus_changed(event);
        }
    }

    /// Replaces every watch with `watches`.
    pub fn watch<I, P>(&mut self, watches: I)
    where
        I: IntoIterator<Item = (P, WatchCallback)>,
        P: Into<String>,
    {
        self.watches.clear();
        self.add_watches(watches);
    }

    pub fn add_watches<I, P>(&mut self, watches: I)
    where
        I: IntoIterator<Item = (P, WatchCallback)>,
        P: Into<String>,
    {
        for (path, callback) in watches {
            let path = path.into();
            let snapshot = if self.is_payload_ready() {
                Snapshot::of(self.current_value(&path).as_ref())
            } else {
                Snapshot::Unobserved
            };
            self.watches.add(path, callback, snapshot);
        }
    }

    pub fn add_watch<F>(&mut self, path: &str, callback: F)
    where
        F: FnMut(&mut PayloadHosting, Option<FieldValue>) + 'static,
    {
        self.add_watches([(path, Box::new(callback) as WatchCallback)]);
    }

    pub fn clear_watches(&mut self) {
        self.watches.clear();
    }

    pub fn has_watches(&self) -> bool {
        !self.watches.is_empty()
    }

    pub fn is_watching(&self, path: &str) -> bool {
        self.watches.contains(path)
    }

    fn current_value(&self, path: &str) -> Option<FieldValue> {
        let payload = self.store.payload()?;
        resolve_field(payload, path)?.value().cloned()
    }

    // Callbacks run in registration order against the tree as it is when
    // their turn comes, so a mutation reaches later watches in this pass
    // and earlier ones in the next.
    fn update_watches(&mut self) {
        if !self.is_payload_ready() {
            return;
        }
        for path in self.watches.paths() {
            let value = self.current_value(&path);
            let Some(mut callback) = self.watches.take_if_changed(&path, Snapshot::of(value.as_ref())) else {
                continue;
            };
            callback(self, value);
            self.watches.restore(&path, callback);
        }
    }

    pub fn add_payload_change_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut PayloadHosting) + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.change_listeners.push((id, Some(Box::new(listener))));
        id
    }

    pub fn remove_payload_change_listener(&mut self, id: ListenerId) -> bool {
        let before = self.change_listeners.len();
        self.change_listeners.retain(|(listener_id, _)| *listener_id != id);
        self.change_listeners.len() != before
    }

    fn dispatch_payload_change(&mut self) {
        let ids: Vec<ListenerId> = self.change_listeners.iter().map(|(id, _)| *id).collect();
        for id in ids {
            let Some(mut listener) = self
                .change_listeners
                .iter_mut()
                .find(|(listener_id, _)| *listener_id == id)
                .and_then(|(_, listener)| listener.take())
            else {
                continue;
            };
            listener(self);
            if let Some((_, slot)) = self
                .change_listeners
                .iter_mut()
                .find(|(listener_id, _)| *listener_id == id)
            {
                *slot = Some(listener);
            }
        }
    }

    /// Runs `f` as one update session: the host hears about all changes
    /// made inside it once, when the outermost session ends. Returning
    /// `true` from `f` notifies even without changes.
    pub fn with_batched_updates<F>(&mut self, f: F) -> Result<(), HostingError>
    where
        F: FnOnce(&mut PayloadHosting) -> Result<bool, HostingError>,
    {
        let was_in_update = self.in_update;
        self.in_update = true;
        let result = f(self);
        self.in_update = was_in_update;

        if result? {
            self.changed_during_update = true;
        }
        if !was_in_update && self.changed_during_update {
            self.changed_during_update = false;
            self.notify_host_about_payload_change()?;
        }
        Ok(())
    }

    /// Re-evaluates watches and sends the payload to the host, or marks the
    /// current update session as changed.
    pub fn notify_host_about_payload_change(&mut self) -> Result<(), HostingError> {
        if self.about_to_notify {
            return Ok(());
        }
        if self.in_update {
            self.changed_during_update = true;
            return Ok(());
        }

        self.about_to_notify = true;
        if !self.in_finish_set_payload {
            self.update_watches();
        }
        let result = self.send_payload();
        self.about_to_notify = false;
        result
    }

    fn send_payload(&mut self) -> Result<(), HostingError> {
        let xml = self.payload_ref()?.to_xml_string();
        let guest_id = self.config.guest_id.clone();
        self.send(GuestMessage::PayloadChanged { xml, guest_id })
    }

    fn send(&mut self, message: GuestMessage) -> Result<(), HostingError> {
        let transport = self.transport.as_mut().ok_or(HostingError::NotInitialized)?;
        transport.send(message);
        Ok(())
    }

    /// Asks the host to open its editor for the field at `path`.
    pub fn edit_field(&mut self, path: &str, request: Option<EditRequest>) -> Result<(), HostingError> {
        let message = edit_field_message(path, &self.config.guest_id, request);
        self.send(message)
    }

    fn payload_ref(&self) -> Result<&Payload, HostingError> {
        self.store.payload().ok_or(HostingError::NotReady)
    }

    fn model_ref(&self) -> Result<&Model, HostingError> {
        self.store.model().ok_or(HostingError::NoModel)
    }

    fn field(&self, path: &str) -> Result<&Field, HostingError> {
        resolve_field(self.payload_ref()?, path).ok_or_else(|| field_not_found(path))
    }

    fn field_mut(&mut self, path: &str) -> Result<&mut Field, HostingError> {
        let payload = self.store.payload_mut().ok_or(HostingError::NotReady)?;
        resolve_field_mut(payload, path).ok_or_else(|| field_not_found(path))
    }

    fn field_def(&self, path: &str) -> Result<&FieldDef, HostingError> {
        strict_field_def(self.model_ref()?, path)
    }

    /// The list row at a path ending in `#N`, such as `items/#0`.
    pub fn row(&self, path: &str) -> Result<&Payload, HostingError> {
        resolve_row(self.payload_ref()?, path).ok_or_else(|| HostingError::ListItemNotFound {
            path: path.to_string(),
        })
    }

    /// Definition of the list a row path points into.
    pub fn list_def(&self, path: &str) -> Result<&ListDef, HostingError> {
        resolve_list_def(self.model_ref()?, path).ok_or_else(|| HostingError::ListDefNotFound {
            path: path.to_string(),
        })
    }

    /// Never fails: a missing payload or path simply does not exist.
    pub fn field_exists(&self, path: &str) -> bool {
        self.store
            .payload()
            .is_some_and(|payload| resolve_field(payload, path).is_some())
    }

    pub fn field_text(&self, path: &str) -> Result<Option<String>, HostingError> {
        Ok(self.field(path)?.text())
    }

    pub fn field_xml(&self, path: &str) -> Result<Option<&XmlElement>, HostingError> {
        Ok(self.field(path)?.xml())
    }

    pub fn field_xml_string(&self, path: &str) -> Result<Option<String>, HostingError> {
        Ok(self.field(path)?.xml_string())
    }

    fn set_field_value(&mut self, path: &str, value: Option<FieldValue>) -> Result<(), HostingError> {
        self.field_mut(path)?.set_value(value);
        self.notify_host_about_payload_change()
    }

    /// `None` removes the value.
    pub fn set_field_text(&mut self, path: &str, text: Option<&str>) -> Result<(), HostingError> {
        self.set_field_value(path, text.map(|text| FieldValue::Text(text.to_string())))
    }

    pub fn set_field_xml(&mut self, path: &str, xml: Option<XmlElement>) -> Result<(), HostingError> {
        self.set_field_value(path, xml.map(FieldValue::Xml))
    }

    /// An empty string clears the value like `None` does.
    pub fn set_field_xml_str(&mut self, path: &str, xml: Option<&str>) -> Result<(), HostingError> {
        let element = xml
            .filter(|xml| !xml.is_empty())
            .map(XmlElement::parse)
            .transpose()?;
        self.set_field_xml(path, element)
    }

    /// `None` drops the annotation and leaves visibility to the host.
    pub fn set_field_visibility(&mut self, path: &str, visible: Option<bool>) -> Result<(), HostingError> {
        let value = visible.map(|visible| if visible { "visible" } else { "hidden" });
        self.set_field_annotation(path, VISIBILITY, value)
    }

    pub fn set_field_read_only(&mut self, path: &str, read_only: Option<bool>) -> Result<(), HostingError> {
        let value = read_only.map(|read_only| if read_only { "false" } else { "true" });
        self.set_field_annotation(path, CONTENT_EDITABLE, value)
    }

    fn set_field_annotation(&mut self, path: &str, key: &str, value: Option<&str>) -> Result<(), HostingError> {
        if self.field_mut(path)?.set_annotation(key, value) {
            self.notify_host_about_payload_change()?;
        }
        Ok(())
    }

    pub fn field_media_type(&self, path: &str) -> Result<Option<String>, HostingError> {
        Ok(self.field_def(path)?.media_type.clone())
    }

    pub fn field_xsd_type(&self, path: &str) -> Result<Option<String>, HostingError> {
        Ok(self.field_def(path)?.xsd_type.clone())
    }

    pub fn is_field_defined(&self, path: &str) -> Result<bool, HostingError> {
        Ok(resolve_field_def(self.model_ref()?, path).is_some())
    }

    pub fn is_list_field(&self, path: &str) -> Result<Option<bool>, HostingError> {
        Ok(resolve_field_def(self.model_ref()?, path).map(FieldDef::is_list))
    }

    pub fn is_scalar_field(&self, path: &str) -> Result<Option<bool>, HostingError> {
        Ok(resolve_field_def(self.model_ref()?, path).map(FieldDef::is_scalar))
    }

    /// Number of rows, or `None` when the field holds no list.
    pub fn list_len(&self, path: &str) -> Result<Option<usize>, HostingError> {
        Ok(self.field(path)?.rows().map(<[Payload]>::len))
    }

    pub fn list_max_len(&self, path: &str) -> Result<Option<usize>, HostingError> {
        Ok(strict_list_def(self.model_ref()?, path)?.maximum_count)
    }

    /// Declared minimum, 0 when the list has none.
    pub fn list_min_len(&self, path: &str) -> Result<usize, HostingError> {
        Ok(strict_list_def(self.model_ref()?, path)?.minimum())
    }

    /// Inserts a row into the list field at `path` and returns the row's
    /// path. `None` appends; negative positions count from the back.
    pub fn insert_row(&mut self, path: &str, position: Option<i64>) -> Result<String, HostingError> {
        let (payload, model) = self.store.parts_mut();
        let payload = payload.ok_or(HostingError::NotReady)?;
        let field = resolve_field_mut(payload, path).ok_or_else(|| field_not_found(path))?;
        let list_def = model.map(|model| strict_list_def(model, path)).transpose()?;

        let index = list::insert_row(field, path, position, list_def)?;
        self.notify_host_about_payload_change()?;
        Ok(row_path(path, index))
    }

    /// Removes one row from the list field at `path`; negative positions
    /// count from the back.
    pub fn remove_row(&mut self, path: &str, position: i64) -> Result<(), HostingError> {
        let (payload, model) = self.store.parts_mut();
        let payload = payload.ok_or(HostingError::NotReady)?;
        let field = resolve_field_mut(payload, path).ok_or_else(|| field_not_found(path))?;
        if field.rows().is_none() {
            return Err(HostingError::NotAList {
                path: path.to_string(),
            });
        }
        let list_def = model.map(|model| strict_list_def(model, path)).transpose()?;

        list::remove_row(field, path, position, list_def)?;
        self.notify_host_about_payload_change()
    }
}

impl Drop for PayloadHosting {
    fn drop(&mut self) {
        self.release_bindings();
    }
}

fn field_not_found(path: &str) -> HostingError {
    HostingError::FieldNotFound {
        path: path.to_string(),
    }
}

fn strict_field_def<'a>(model: &'a Model, path: &str) -> Result<&'a FieldDef, HostingError> {
    resolve_field_def(model, path).ok_or_else(|| HostingError::FieldDefNotFound {
        path: path.to_string(),
    })
}

fn strict_list_def<'a>(model: &'a Model, path: &str) -> Result<&'a ListDef, HostingError> {
    strict_field_def(model, path)?
        .list
        .as_ref()
        .ok_or_else(|| HostingError::NotAList {
            path: path.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListRangeError;
    use crate::testing::{ChannelEvent, FakeSurface, RecordingChannel, RecordingFetcher};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    const STOCKS: &str = r#"<payload xmlns="http://www.vizrt.com/types"><field name="stock1"><value/></field></payload>"#;

    const BOARD: &str = r#"<payload xmlns="http://www.vizrt.com/types">
  <model>
    <schema>
      <fielddef name="a" mediatype="text/plain"/>
      <fielddef name="b" mediatype="text/plain"/>
      <fielddef name="c" mediatype="text/plain" xsdtype="string"/>
      <fielddef name="items">
        <listdef>
          <minimumcount>1</minimumcount>
          <maximumcount>3</maximumcount>
          <schema><fielddef name="symbol" mediatype="text/plain"><value>SPY</value></fielddef></schema>
        </listdef>
      </fielddef>
    </schema>
  </model>
  <field name="a"><value>0</value></field>
  <field name="b"><value>0</value></field>
  <field name="c"/>
  <field name="items">
    <list>
      <payload><field name="symbol"><value>AAPL</value></field></payload>
      <payload><field name="symbol"><value>MSFT</value></field></payload>
      <payload><field name="symbol"><value>IBM</value></field></payload>
    </list>
  </field>
</payload>"#;

    fn referencing(uri: &str) -> String {
        format!(r#"<payload xmlns="http://www.vizrt.com/types" model="{uri}"><field name="a"/></payload>"#)
    }

    const MODEL: &str = r#"<model xmlns="http://www.vizrt.com/types"><schema><fielddef name="a" mediatype="text/plain"/></schema></model>"#;

    fn config() -> GuestConfig {
        GuestConfig {
            guest_id: "g1".to_string(),
            ..GuestConfig::default()
        }
    }

    fn hosting_with(surface: &FakeSurface) -> (PayloadHosting, RecordingChannel) {
        let channel = RecordingChannel::default();
        let mut hosting = PayloadHosting::new(config()).with_surface(Box::new(surface.clone()));
        hosting.initialize(Box::new(channel.clone()), None);
        (hosting, channel)
    }

    fn loaded(xml: &str) -> (PayloadHosting, RecordingChannel) {
        let (mut hosting, channel) = hosting_with(&FakeSurface::default());
        hosting.set_payload(xml).expect("set payload");
        channel.clear();
        (hosting, channel)
    }

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn initialize_announces_and_set_time_is_acknowledged() {
        let (mut hosting, channel) = hosting_with(&FakeSurface::default());
        assert_eq!(
            channel.posted(),
            vec![GuestMessage::PayloadGuestLoaded {
                guest_id: "g1".to_string()
            }]
        );

        hosting.handle_message(json!({"type": "set_time", "time": 3}));
        assert_eq!(channel.posted().last(), Some(&GuestMessage::Present));
    }

    #[test]
    fn typing_into_a_bound_element_sends_the_updated_payload() {
        let surface = FakeSurface::default();
        surface.add_text_element("field_stock1", "");
        let (mut hosting, channel) = hosting_with(&surface);

        hosting.handle_message(json!({"type": "set_payload", "xml": STOCKS}));
        assert!(surface.has_listener("field_stock1", ElementEvent::Input));
        channel.clear();

        surface.type_value("field_stock1", "AAPL");
        hosting
            .handle_element_event("field_stock1", ElementEvent::Input)
            .expect("input");

        assert_eq!(
            channel.payload_changes(),
            vec![
                r#"<payload xmlns="http://www.vizrt.com/types"><field name="stock1"><value>AAPL</value></field></payload>"#
                    .to_string()
            ]
        );
        assert_eq!(hosting.field_text("stock1").expect("text").as_deref(), Some("AAPL"));
    }

    #[test]
    fn focused_element_refreshes_after_blur() {
        let surface = FakeSurface::default();
        surface.add_text_element("field_a", "typing");
        surface.set_focused("field_a", true);
        let (mut hosting, _channel) = hosting_with(&surface);

        hosting.set_payload(BOARD).expect("set payload");
        assert_eq!(surface.value("field_a").as_deref(), Some("typing"));

        surface.set_focused("field_a", false);
        hosting
            .handle_element_event("field_a", ElementEvent::Blur)
            .expect("blur");
        assert_eq!(surface.value("field_a").as_deref(), Some("0"));
    }

    #[test]
    fn batched_writes_send_one_message() {
        let (mut hosting, channel) = loaded(BOARD);

        hosting
            .with_batched_updates(|hosting| {
                hosting.set_field_text("a", Some("1"))?;
                hosting.set_field_text("b", Some("2"))?;
                hosting.with_batched_updates(|hosting| {
                    hosting.set_field_text("c", Some("3"))?;
                    Ok(false)
                })?;
                Ok(false)
            })
            .expect("batch");

        assert_eq!(channel.payload_changes().len(), 1);
    }

    #[test]
    fn batch_can_force_a_notification() {
        let (mut hosting, channel) = loaded(BOARD);

        hosting.with_batched_updates(|_| Ok(false)).expect("batch");
        assert!(channel.payload_changes().is_empty());

        hosting.with_batched_updates(|_| Ok(true)).expect("batch");
        assert_eq!(channel.payload_changes().len(), 1);
    }

    #[test]
    fn later_watches_see_mutations_in_the_same_pass() {
        let (mut hosting, channel) = loaded(BOARD);
        let fired = log();

        let seen = fired.clone();
        hosting.add_watch("a", move |hosting, _| {
            seen.borrow_mut().push("a".to_string());
            hosting.set_field_text("b", Some("from a")).expect("set b");
        });
        let seen = fired.clone();
        hosting.add_watch("b", move |_, value| {
            seen.borrow_mut().push(format!("b={}", value.map(|value| value.serialize()).unwrap_or_default()));
        });

        hosting.set_field_text("a", Some("1")).expect("set a");

        assert_eq!(*fired.borrow(), vec!["a", "b=from a"]);
        assert_eq!(channel.payload_changes().len(), 1);
        assert!(channel.payload_changes()[0].contains("from a"));
    }

    #[test]
    fn earlier_watches_see_mutations_in_the_next_pass() {
        let (mut hosting, _channel) = loaded(BOARD);
        let fired = log();

        let seen = fired.clone();
        hosting.add_watch("b", move |_, _| seen.borrow_mut().push("b".to_string()));
        let seen = fired.clone();
        hosting.add_watch("a", move |hosting, _| {
            seen.borrow_mut().push("a".to_string());
            hosting.set_field_text("b", Some("from a")).expect("set b");
        });

        hosting.set_field_text("a", Some("1")).expect("set a");
        assert_eq!(*fired.borrow(), vec!["a"]);

        hosting.set_field_text("c", Some("x")).expect("set c");
        assert_eq!(*fired.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn watches_registered_early_fire_once_the_payload_arrives() {
        let (mut hosting, _channel) = hosting_with(&FakeSurface::default());
        let fired = log();

        let seen = fired.clone();
        hosting.watch([(
            "c",
            Box::new(move |_: &mut PayloadHosting, value: Option<FieldValue>| {
                seen.borrow_mut().push(format!("{value:?}"));
            }) as WatchCallback,
        )]);
        assert!(hosting.has_watches());

        hosting.set_payload(BOARD).expect("set payload");
        assert_eq!(*fired.borrow(), vec!["None"]);

        hosting.set_payload(BOARD).expect("set payload again");
        assert_eq!(fired.borrow().len(), 1);

        hosting.clear_watches();
        assert!(!hosting.is_watching("c"));
    }

    #[test]
    fn list_limits_follow_the_schema() {
        let (mut hosting, channel) = loaded(BOARD);

        assert_eq!(
            hosting.insert_row("items", None),
            Err(HostingError::ListCapacity {
                path: "items".to_string(),
                maximum: 3
            })
        );
        assert_eq!(hosting.list_len("items"), Ok(Some(3)));
        assert!(channel.payload_changes().is_empty());

        hosting.remove_row("items", 0).expect("remove first");
        assert_eq!(hosting.list_len("items"), Ok(Some(2)));
        hosting.remove_row("items", -1).expect("remove last");
        assert_eq!(
            hosting.remove_row("items", 0),
            Err(HostingError::ListMinimum {
                path: "items".to_string(),
                minimum: 1
            })
        );
        assert_eq!(hosting.field_text("items/#0/symbol"), Ok(Some("MSFT".to_string())));
        assert_eq!(channel.payload_changes().len(), 2);
    }

    #[test]
    fn inserted_rows_are_addressable_by_the_returned_path() {
        let (mut hosting, _channel) = loaded(BOARD);
        hosting.remove_row("items", -1).expect("make room");

        let path = hosting.insert_row("items", Some(0)).expect("insert");
        assert_eq!(path, "items/#0");
        assert_eq!(hosting.field_text("items/#0/symbol"), Ok(Some("SPY".to_string())));

        hosting.set_field_text(&format!("{path}/symbol"), Some("TSLA")).expect("set");
        assert_eq!(hosting.field_text("items/#0/symbol"), Ok(Some("TSLA".to_string())));
        assert_eq!(
            hosting.insert_row("items", Some(9)),
            Err(HostingError::ListCapacity {
                path: "items".to_string(),
                maximum: 3
            })
        );
    }

    #[test]
    fn out_of_range_positions_report_the_valid_range() {
        let (mut hosting, _channel) = loaded(BOARD);
        let err = hosting.remove_row("items", 3).expect_err("range");
        assert_eq!(err, HostingError::ListRange(ListRangeError::Remove { count: 3 }));
        assert_eq!(err.to_string(), "delete position out of range (-3 to 2 expected)");
    }

    #[test]
    fn list_operations_on_scalars_fail() {
        let (mut hosting, _channel) = loaded(BOARD);
        assert!(matches!(hosting.insert_row("a", None), Err(HostingError::NotAList { .. })));
        assert!(matches!(hosting.remove_row("c", 0), Err(HostingError::NotAList { .. })));
        assert!(matches!(
            hosting.insert_row("missing", None),
            Err(HostingError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn referenced_model_is_applied_when_its_fetch_settles() {
        let fetcher = RecordingFetcher::default();
        let channel = RecordingChannel::default();
        let ready = Rc::new(RefCell::new(0));
        let mut hosting = PayloadHosting::new(config()).with_model_fetcher(Box::new(fetcher.clone()));

        let calls = ready.clone();
        hosting.initialize(
            Box::new(channel.clone()),
            Some(Box::new(move |hosting: &mut PayloadHosting| {
                assert!(hosting.has_model());
                *calls.borrow_mut() += 1;
            })),
        );

        hosting.set_payload(&referencing("http://m/1")).expect("first");
        hosting.set_payload(&referencing("http://m/2")).expect("second");
        assert_eq!(fetcher.requests(), vec!["http://m/1", "http://m/2"]);
        assert!(hosting.is_payload_ready());

        hosting
            .complete_model_fetch("http://m/1", ModelFetch::Loaded(MODEL.to_string()))
            .expect("stale");
        assert_eq!(*ready.borrow(), 0);

        hosting
            .complete_model_fetch("http://m/2", ModelFetch::Loaded(MODEL.to_string()))
            .expect("current");
        assert_eq!(*ready.borrow(), 1);
        assert_eq!(hosting.field_media_type("a"), Ok(Some("text/plain".to_string())));

        hosting.set_payload(&referencing("http://m/2")).expect("cached");
        assert_eq!(fetcher.requests().len(), 2);
        assert_eq!(*ready.borrow(), 1);
    }

    #[test]
    fn failed_model_fetch_still_finishes_the_payload() {
        let fetcher = RecordingFetcher::default();
        let mut hosting = PayloadHosting::new(config()).with_model_fetcher(Box::new(fetcher));
        hosting.initialize(Box::new(RecordingChannel::default()), None);
        let changes = Rc::new(RefCell::new(0));
        let count = changes.clone();
        hosting.add_payload_change_listener(move |_| *count.borrow_mut() += 1);

        hosting.set_payload(&referencing("http://m/1")).expect("set payload");
        assert_eq!(*changes.borrow(), 0);
        hosting
            .complete_model_fetch("http://m/1", ModelFetch::Failed)
            .expect("settle");

        assert_eq!(*changes.borrow(), 1);
        assert!(!hosting.has_model());
        assert_eq!(hosting.field_media_type("a"), Err(HostingError::NoModel));
    }

    #[test]
    fn payload_change_listeners_fire_per_payload_until_removed() {
        let (mut hosting, _channel) = hosting_with(&FakeSurface::default());
        let changes = Rc::new(RefCell::new(0));
        let count = changes.clone();
        let id = hosting.add_payload_change_listener(move |_| *count.borrow_mut() += 1);

        hosting.set_payload(BOARD).expect("first");
        hosting.set_payload(STOCKS).expect("second");
        assert_eq!(*changes.borrow(), 2);

        assert!(hosting.remove_payload_change_listener(id));
        assert!(!hosting.remove_payload_change_listener(id));
        hosting.set_payload(BOARD).expect("third");
        assert_eq!(*changes.borrow(), 2);
    }

    #[test]
    fn ready_callback_runs_once() {
        let channel = RecordingChannel::default();
        let ready = Rc::new(RefCell::new(0));
        let calls = ready.clone();
        let mut hosting = PayloadHosting::new(config());
        hosting.initialize(
            Box::new(channel),
            Some(Box::new(move |_: &mut PayloadHosting| *calls.borrow_mut() += 1)),
        );

        hosting.set_payload(BOARD).expect("first");
        hosting.set_payload(BOARD).expect("second");
        assert_eq!(*ready.borrow(), 1);
    }

    #[test]
    fn reads_and_writes_require_a_payload() {
        let (mut hosting, _channel) = hosting_with(&FakeSurface::default());
        assert!(!hosting.field_exists("a"));
        assert_eq!(hosting.field_text("a"), Err(HostingError::NotReady));
        assert_eq!(hosting.set_field_text("a", Some("1")), Err(HostingError::NotReady));

        hosting.set_payload(BOARD).expect("set payload");
        assert!(hosting.field_exists("items/#2/symbol"));
        assert!(!hosting.field_exists("items/#3/symbol"));
        assert_eq!(
            hosting.field_text("nope"),
            Err(HostingError::FieldNotFound {
                path: "nope".to_string()
            })
        );
    }

    #[test]
    fn structured_values_round_trip_through_the_accessors() {
        let (mut hosting, channel) = loaded(BOARD);

        hosting
            .set_field_xml_str("c", Some(r#"<img xmlns="urn:img" src="a.png"/>"#))
            .expect("set xml");
        assert_eq!(
            hosting.field_xml_string("c"),
            Ok(Some(r#"<img xmlns="urn:img" src="a.png"/>"#.to_string()))
        );
        assert_eq!(hosting.field_text("c"), Ok(Some(String::new())));

        assert!(matches!(
            hosting.set_field_xml_str("c", Some("<img")),
            Err(HostingError::Xml(_))
        ));

        hosting.set_field_xml("c", None).expect("clear");
        assert_eq!(hosting.field_xml("c"), Ok(None));
        assert_eq!(channel.payload_changes().len(), 2);
    }

    #[test]
    fn empty_structured_input_clears_the_value() {
        let (mut hosting, channel) = loaded(BOARD);
        hosting
            .set_field_xml_str("c", Some(r#"<img xmlns="urn:img" src="a.png"/>"#))
            .expect("set xml");

        hosting.set_field_xml_str("c", Some("")).expect("clear with empty string");
        assert_eq!(hosting.field_xml_string("c"), Ok(None));
        assert_eq!(hosting.field_text("c"), Ok(None));
        assert_eq!(channel.payload_changes().len(), 2);
    }

    #[test]
    fn rows_and_list_definitions_resolve_strictly() {
        let (mut hosting, _channel) = loaded(BOARD);

        let row = hosting.row("items/#1").expect("second row");
        assert_eq!(
            row.field("symbol").and_then(Field::text).as_deref(),
            Some("MSFT")
        );
        assert_eq!(
            hosting.row("items/#3"),
            Err(HostingError::ListItemNotFound {
                path: "items/#3".to_string()
            })
        );
        assert_eq!(
            hosting.row("items"),
            Err(HostingError::ListItemNotFound {
                path: "items".to_string()
            })
        );

        assert_eq!(hosting.list_def("items/#0").map(|def| def.maximum_count), Ok(Some(3)));
        assert_eq!(
            hosting.list_def("a/#0"),
            Err(HostingError::ListDefNotFound {
                path: "a/#0".to_string()
            })
        );

        hosting.remove_row("items", 0).expect("remove");
        let inserted = hosting.insert_row("items", None).expect("insert");
        assert!(hosting.row(&inserted).is_ok());
    }

    #[test]
    fn scalar_writes_replace_lists() {
        let (mut hosting, _channel) = loaded(BOARD);
        hosting.set_field_text("items", Some("flat")).expect("set");
        assert_eq!(hosting.list_len("items"), Ok(None));
        assert_eq!(hosting.field_text("items"), Ok(Some("flat".to_string())));
    }

    #[test]
    fn annotations_notify_only_when_changed() {
        let (mut hosting, channel) = loaded(BOARD);

        hosting.set_field_visibility("a", Some(false)).expect("hide");
        hosting.set_field_visibility("a", Some(false)).expect("hide again");
        hosting.set_field_read_only("a", Some(true)).expect("read only");
        hosting.set_field_visibility("a", None).expect("reset");

        let changes = channel.payload_changes();
        assert_eq!(changes.len(), 3);
        assert!(changes[0].contains(r#"<annotation visibility="hidden"/>"#));
        assert!(changes[2].contains(r#"<annotation contenteditable="false"/>"#));
    }

    #[test]
    fn schema_queries_answer_from_the_model() {
        let (hosting, _channel) = loaded(BOARD);

        assert_eq!(hosting.field_xsd_type("c"), Ok(Some("string".to_string())));
        assert_eq!(hosting.is_field_defined("items/#0/symbol"), Ok(true));
        assert_eq!(hosting.is_field_defined("nope"), Ok(false));
        assert_eq!(hosting.is_list_field("items"), Ok(Some(true)));
        assert_eq!(hosting.is_scalar_field("items"), Ok(Some(false)));
        assert_eq!(hosting.is_list_field("nope"), Ok(None));
        assert_eq!(hosting.list_max_len("items"), Ok(Some(3)));
        assert_eq!(hosting.list_min_len("items"), Ok(1));
        assert!(matches!(hosting.list_min_len("a"), Err(HostingError::NotAList { .. })));
        assert!(matches!(
            hosting.field_media_type("nope"),
            Err(HostingError::FieldDefNotFound { .. })
        ));

        let (hosting, _channel) = loaded(STOCKS);
        assert_eq!(hosting.is_field_defined("stock1"), Err(HostingError::NoModel));
    }

    #[test]
    fn toggling_automatic_bindings_releases_and_rebinds() {
        let surface = FakeSurface::default();
        surface.add_text_element("field_a", "");
        let (mut hosting, _channel) = hosting_with(&surface);

        hosting.set_uses_automatic_bindings(false);
        hosting.set_payload(BOARD).expect("set payload");
        assert!(surface.listeners().is_empty());
        assert_eq!(surface.value("field_a").as_deref(), Some(""));

        hosting.set_uses_automatic_bindings(true);
        assert!(hosting.uses_automatic_bindings());
        assert!(surface.has_listener("field_a", ElementEvent::Input));
        assert_eq!(surface.value("field_a").as_deref(), Some("0"));

        hosting.set_uses_automatic_bindings(false);
        assert!(surface.listeners().is_empty());
    }

    #[test]
    fn unknown_messages_reach_the_handler() {
        let (mut hosting, _channel) = hosting_with(&FakeSurface::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = seen.clone();
        hosting.set_unknown_message_handler(Some(Box::new(move |_: &mut PayloadHosting, raw: &Value| {
            record.borrow_mut().push(raw.clone());
            raw["type"] == "select_tab"
        })));

        hosting.handle_message(json!({"type": "select_tab", "tab": 1}));
        hosting.handle_message(json!({"type": "other"}));

        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[0]["tab"], 1);
    }

    #[test]
    fn edit_and_focus_requests_reach_the_host() {
        let (mut hosting, channel) = loaded(STOCKS);

        hosting
            .edit_field(
                "stock1",
                Some(EditRequest {
                    search_tag: Some("nyse".to_string()),
                    ..EditRequest::default()
                }),
            )
            .expect("edit");
        hosting.handle_focus_event(FocusEvent::InputFocused);

        assert_eq!(
            channel.posted(),
            vec![
                GuestMessage::EditField {
                    path: "stock1".to_string(),
                    guest_id: "g1".to_string(),
                    hints: None,
                    search_terms: None,
                    search_date: None,
                    search_tag: Some("nyse".to_string()),
                },
                GuestMessage::FocusChanged {
                    event: FocusEvent::InputFocused,
                    guest_id: "g1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn uninitialize_drops_session_state() {
        let surface = FakeSurface::default();
        surface.add_text_element("field_a", "");
        let (mut hosting, channel) = hosting_with(&surface);
        hosting.set_payload(BOARD).expect("set payload");
        hosting.add_watch("a", |_, _| {});

        hosting.uninitialize();

        assert!(!hosting.is_initialized());
        assert!(!hosting.is_payload_ready());
        assert!(!hosting.has_watches());
        assert!(surface.listeners().is_empty());
        assert_eq!(channel.events().last(), Some(&ChannelEvent::Detached));
        assert_eq!(hosting.edit_field("a", None), Err(HostingError::NotInitialized));

        hosting.handle_message(json!({"type": "set_payload", "xml": BOARD}));
        assert!(!hosting.is_payload_ready());
        hosting.uninitialize();
    }
}
