use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::forms::Form;
use crate::session::Session;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to serialize view {view}: {source}")]
    Serialize {
        view: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize template data {key}: {source}")]
    Data {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The data bag handed to a view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub string_map: BTreeMap<String, String>,
    pub int_map: BTreeMap<String, i64>,
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<Form>,
    pub is_authenticated: bool,
}

impl TemplateData {
    pub fn string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.string_map.insert(key.to_string(), value.into());
        self
    }

    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.int_map.insert(key.to_string(), value);
        self
    }

    /// Attach any serializable value under `key`.
    pub fn data(mut self, key: &str, value: &impl Serialize) -> Result<Self, RenderError> {
        let value = serde_json::to_value(value).map_err(|source| RenderError::Data {
            key: key.to_string(),
            source,
        })?;
        self.data.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn form(mut self, form: Form) -> Self {
        self.form = Some(form);
        self
    }

    /// Move the one-shot session messages into the data bag and note
    /// whether the session belongs to a logged-in user.
    pub fn with_messages(mut self, session: &Session<'_>) -> Self {
        self.flash = session.pop_flash();
        self.warning = session.pop_warning();
        self.error = session.pop_error();
        self.is_authenticated = session.is_authenticated();
        self
    }
}

/// Turns a named view and its data into a response body.
pub trait Presenter: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn render(&self, view: &str, data: &TemplateData) -> Result<String, RenderError>;
}

/// Renders every view as a JSON document `{"view": ..., ...data}`.
pub struct JsonPresenter;

#[derive(Serialize)]
struct JsonView<'a> {
    view: &'a str,
    #[serde(flatten)]
    data: &'a TemplateData,
}

impl Presenter for JsonPresenter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, view: &str, data: &TemplateData) -> Result<String, RenderError> {
        serde_json::to_string(&JsonView { view, data }).map_err(|source| RenderError::Serialize {
            view: view.to_string(),
            source,
        })
    }
}
