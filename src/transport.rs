use std::io::{self, Write};

use tracing::{debug, warn};

use crate::config::GuestConfig;
use crate::protocol::{FocusEvent, GUEST_TO_HOST_CAP, GuestMessage, encode_guest_message, write_frame};

/// The boundary to the host application.
///
/// Implementations deliver outbound messages and, between `attach` and
/// `detach`, route inbound host messages (and focus changes when asked to)
/// back into the guest.
pub trait HostChannel {
    fn post(&mut self, message: &GuestMessage, target_origin: &str);

    fn attach(&mut self, focus_tracking: bool);

    fn detach(&mut self);
}

/// Owns the host channel and the single inbound listener installed on it.
pub struct Transport {
    channel: Box<dyn HostChannel>,
    host_origin: String,
    guest_id: String,
    focus_tracking: bool,
    listening: bool,
}

impl Transport {
    pub fn new(channel: Box<dyn HostChannel>, config: &GuestConfig) -> Self {
        Self {
            channel,
            host_origin: config.host_origin.clone(),
            guest_id: config.guest_id.clone(),
            focus_tracking: config.focus_tracking,
            listening: false,
        }
    }

    /// Installs the inbound listener, replacing any previous one, and
    /// announces the guest to the host.
    pub fn listen(&mut self) {
        self.release();
        self.channel.attach(self.focus_tracking);
        self.listening = true;

        let guest_id = self.guest_id.clone();
        self.send(GuestMessage::PayloadGuestLoaded { guest_id });
    }

    pub fn release(&mut self) {
        if self.listening {
            self.channel.detach();
            self.listening = false;
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn guest_id(&self) -> &str {
        &self.guest_id
    }

    pub fn send(&mut self, message: GuestMessage) {
        debug!(origin = %self.host_origin, ?message, "posting message to host");
        self.channel.post(&message, &self.host_origin);
    }

    pub fn focus_changed(&mut self, event: FocusEvent) {
        if !(self.listening && self.focus_tracking) {
            return;
        }
        let guest_id = self.guest_id.clone();
        self.send(GuestMessage::FocusChanged { event, guest_id });
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.release();
    }
}

/// Host channel over a length-prefixed JSON byte stream.
///
/// Inbound frames are read separately with [`crate::protocol::reader_loop`].
pub struct FramedChannel<W: Write> {
    writer: W,
    attached: bool,
}

impl<W: Write> FramedChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            attached: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_message(&mut self, message: &GuestMessage) -> io::Result<()> {
        let payload = encode_guest_message(message)?;
        write_frame(&mut self.writer, &payload, GUEST_TO_HOST_CAP)?;
        self.writer.flush()
    }
}

impl FramedChannel<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> HostChannel for FramedChannel<W> {
    fn post(&mut self, message: &GuestMessage, _target_origin: &str) {
        if let Err(err) = self.write_message(message) {
            warn!(%err, "failed to write message frame to host");
        }
    }

    fn attach(&mut self, focus_tracking: bool) {
        if focus_tracking {
            debug!("framed channel has no focus source; focus events must be forwarded by the embedder");
        }
        self.attached = true;
    }

    fn detach(&mut self) {
        self.attached = false;
    }
}
