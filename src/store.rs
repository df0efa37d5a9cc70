use tracing::{debug, warn};

use crate::model::Model;
use crate::payload::Payload;
use crate::xml::XmlError;

/// Starts loading a model document. The embedder reports the outcome with
/// [`crate::PayloadHosting::complete_model_fetch`].
pub trait ModelFetcher {
    fn request(&mut self, uri: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelFetch {
    Loaded(String),
    Failed,
    Aborted,
}

/// What a payload replacement still needs before it is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    Ready,
    /// A new model must be requested.
    Fetch(String),
    /// The model is already being fetched.
    AwaitingModel,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    payload: Option<Payload>,
    model: Option<Model>,
    model_uri: Option<String>,
    pending_model_uri: Option<String>,
}

impl DocumentStore {
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut Payload> {
        self.payload.as_mut()
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// The payload for mutation alongside the model that constrains it.
    pub fn parts_mut(&mut self) -> (Option<&mut Payload>, Option<&Model>) {
        (self.payload.as_mut(), self.model.as_ref())
    }

    pub fn is_payload_ready(&self) -> bool {
        self.payload.is_some()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn pending_model_uri(&self) -> Option<&str> {
        self.pending_model_uri.as_deref()
    }

    /// Replaces the payload. An inline model (or no model reference) is
    /// final immediately; a reference to the cached model reuses it.
    pub fn replace(&mut self, xml: &str) -> Result<Replacement, XmlError> {
        let payload = Payload::parse(xml)?;
        let inline = payload.model.as_ref().map(Model::from_element);
        let reference = payload.model_reference().map(str::to_string);
        self.payload = Some(payload);

        let uri = match (inline, reference) {
            (Some(model), _) => return Ok(self.use_model(Some(model))),
            (None, None) => return Ok(self.use_model(None)),
            (None, Some(uri)) => uri,
        };

        if self.model.is_some() && self.model_uri.as_deref() == Some(uri.as_str()) {
            return Ok(Replacement::Ready);
        }
        if self.pending_model_uri.as_deref() == Some(uri.as_str()) {
            return Ok(Replacement::AwaitingModel);
        }

        self.model = None;
        self.model_uri = None;
        self.pending_model_uri = Some(uri.clone());
        Ok(Replacement::Fetch(uri))
    }

    fn use_model(&mut self, model: Option<Model>) -> Replacement {
        self.model = model;
        self.model_uri = None;
        self.pending_model_uri = None;
        Replacement::Ready
    }

    /// Applies the outcome of the outstanding fetch. Returns `false` for a
    /// settlement that no longer matches the requested model.
    pub fn settle(&mut self, uri: &str, outcome: ModelFetch) -> bool {
        if self.pending_model_uri.as_deref() != Some(uri) {
            debug!(uri, "ignoring stale model fetch");
            return false;
        }
        self.pending_model_uri = None;

        match outcome {
            ModelFetch::Loaded(xml) => match Model::parse(&xml) {
                Ok(model) => {
                    self.model = Some(model);
                    self.model_uri = Some(uri.to_string());
                }
                Err(err) => warn!(uri, %err, "model document is unusable; continuing without a model"),
            },
            ModelFetch::Failed => warn!(uri, "model fetch failed; continuing without a model"),
            ModelFetch::Aborted => debug!(uri, "model fetch aborted; continuing without a model"),
        }
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
