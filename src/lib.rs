pub mod binding;
pub mod config;
pub mod error;
pub mod hosting;
pub mod list;
pub mod model;
pub mod path;
pub mod payload;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod watch;
pub mod xml;

#[cfg(test)]
mod testing;

use std::io;

pub use crate::binding::{ElementEvent, ElementState, UiSurface, XML_DATA_TYPE};
pub use crate::config::GuestConfig;
pub use crate::error::{HostingError, ListRangeError};
pub use crate::hosting::{
    ListenerId, PayloadChangeListener, PayloadHosting, ReadyCallback, UnknownMessageHandler,
    WatchCallback,
};
pub use crate::model::{FieldDef, ListDef, Model, Schema};
pub use crate::payload::{Field, FieldContent, FieldValue, Payload, VIZ_NS};
pub use crate::protocol::{
    EditRequest, FocusEvent, GUEST_TO_HOST_CAP, GuestMessage, HOST_TO_GUEST_CAP, HostMessage,
};
pub use crate::store::{ModelFetch, ModelFetcher};
pub use crate::transport::{FramedChannel, HostChannel};
pub use crate::xml::{XmlElement, XmlError};
pub use serde_json;

/// Hosts a payload over stdio: framed host messages in on stdin, guest
/// messages out on stdout, configured from the environment.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut hosting = PayloadHosting::new(GuestConfig::from_env());
    hosting.initialize(Box::new(FramedChannel::stdout()), None);

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    protocol::reader_loop(&mut reader, |message| hosting.handle_host_message(message))?;

    hosting.uninitialize();
    Ok(())
}
