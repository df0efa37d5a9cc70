use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use tracing::warn;

pub const GUEST_TO_HOST_CAP: usize = 4_194_304;
pub const HOST_TO_GUEST_CAP: usize = 4_194_304;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GuestMessage {
    #[serde(rename = "payload_guest_loaded")]
    PayloadGuestLoaded {
        #[serde(rename = "guestid")]
        guest_id: String,
    },

    #[serde(rename = "present")]
    Present,

    #[serde(rename = "payload_changed")]
    PayloadChanged {
        xml: String,
        #[serde(rename = "guestid")]
        guest_id: String,
    },

    #[serde(rename = "focus_changed")]
    FocusChanged {
        event: FocusEvent,
        #[serde(rename = "guestid")]
        guest_id: String,
    },

    #[serde(rename = "edit_field")]
    EditField {
        path: String,
        #[serde(rename = "guestid")]
        guest_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hints: Option<String>,
        #[serde(rename = "searchTerms", default, skip_serializing_if = "Option::is_none")]
        search_terms: Option<String>,
        #[serde(rename = "searchDate", default, skip_serializing_if = "Option::is_none")]
        search_date: Option<String>,
        #[serde(rename = "searchTag", default, skip_serializing_if = "Option::is_none")]
        search_tag: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusEvent {
    Focused,
    Blurred,
    InputFocused,
    InputBlurred,
}

/// Inbound messages. Anything that is not a well-formed `set_payload` or
/// `set_time` is kept raw for host-specific extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    SetPayload { xml: String },
    SetTime,
    Unhandled(Value),
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum KnownHostMessage {
    #[serde(rename = "set_payload")]
    SetPayload { xml: String },
    #[serde(rename = "set_time")]
    SetTime,
}

impl HostMessage {
    pub fn from_value(value: Value) -> Self {
        match KnownHostMessage::deserialize(&value) {
            Ok(KnownHostMessage::SetPayload { xml }) => HostMessage::SetPayload { xml },
            Ok(KnownHostMessage::SetTime) => HostMessage::SetTime,
            Err(_) => HostMessage::Unhandled(value),
        }
    }

    pub fn message_type(&self) -> &str {
        match self {
            HostMessage::SetPayload { .. } => "set_payload",
            HostMessage::SetTime => "set_time",
            HostMessage::Unhandled(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("<no message type>"),
        }
    }
}

/// Optional parameters of an `edit_field` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub prefer_feed_browser: bool,
    pub search_terms: Option<String>,
    pub search_date: Option<String>,
    pub search_tag: Option<String>,
}

pub fn edit_field_message(path: &str, guest_id: &str, request: Option<EditRequest>) -> GuestMessage {
    let request = request.unwrap_or_default();
    GuestMessage::EditField {
        path: path.to_string(),
        guest_id: guest_id.to_string(),
        hints: request
            .prefer_feed_browser
            .then(|| "prefer-feed-browser".to_string()),
        search_terms: request.search_terms,
        search_date: request.search_date,
        search_tag: request.search_tag,
    }
}

/// Reads framed host messages until the stream ends. Frames that are not
/// JSON are logged and skipped.
pub fn reader_loop<R, F>(reader: &mut R, mut on_message: F) -> io::Result<()>
where
    R: Read,
    F: FnMut(HostMessage),
{
    loop {
        match read_frame(reader, HOST_TO_GUEST_CAP) {
            Ok(payload) => match decode_host_message(&payload) {
                Ok(message) => on_message(message),
                Err(err) => warn!(%err, len = payload.len(), "dropping undecodable host frame"),
            },
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

pub fn encode_guest_message(message: &GuestMessage) -> io::Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(json_error)
}

pub fn decode_host_message(payload: &[u8]) -> io::Result<HostMessage> {
    let value: Value = serde_json::from_slice(payload).map_err(json_error)?;
    Ok(HostMessage::from_value(value))
}

pub fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
